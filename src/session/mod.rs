//! Conversation session state machine
//!
//! Owns the relay socket and drives the whole conversation:
//! connect/retry/backoff, event dispatch, capture flushing, the stop and
//! save sequences, and guaranteed teardown on every exit path.
//!
//! Event routing is a pure reducer ([`handle_event`]) producing [`Effect`]s
//! that the run loop applies, so the state machine is testable without a
//! socket or audio hardware. Capture, playback, and socket work interleave
//! on independent select arms coordinated through [`SessionFlags`], which
//! are consulted at every entry rather than trusted to be fresh.

mod retry;
mod timer;

pub use retry::RetryPolicy;
pub use timer::SessionTimer;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use crate::audio::capture::{AudioCapture, SEND_INTERVAL};
use crate::audio::playback::{
    AudioSegment, AudioSink, CpalSink, PlaybackHandle, PlaybackScheduler,
};
use crate::audio::resample::encode_chunk;
use crate::protocol::{ApiType, ControlMessage, ServerEvent, close_is_retryable};
use crate::{Error, Result};

/// How long a connection attempt may take before it counts as failed
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the relay to acknowledge a save
pub const SAVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between the stop sequence and the automatic save
pub const AUTO_SAVE_DELAY: Duration = Duration::from_millis(500);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStatus {
    /// No conversation active
    #[default]
    Idle,
    /// Socket opening, possibly on a retry
    Connecting,
    /// Upstream session live, microphone streaming
    Listening,
    /// Terminal failure, surfaced to the user
    Error,
    /// Orderly end
    Stopped,
}

/// Flags shared across the capture, playback, and socket arms
///
/// Each is consulted at every callback or loop entry; none is trusted to
/// be fresh across a suspension point.
#[derive(Debug, Clone, Default)]
pub struct SessionFlags {
    /// Force-halts the segment currently on the output device
    pub should_stop_audio: Arc<AtomicBool>,
    /// A segment is on the output device right now
    pub is_playing: Arc<AtomicBool>,
    /// The relay socket is open
    pub is_connected: Arc<AtomicBool>,
    /// Capture chunks should be sent rather than dropped
    pub is_listening: Arc<AtomicBool>,
}

/// Mutable per-conversation state, owned by the state machine
#[derive(Debug, Default)]
pub struct SessionState {
    pub status: SessionStatus,
    /// Failed connection attempts so far
    pub retry_count: u32,
    /// Response currently streaming back, if any
    pub current_response_id: Option<String>,
    /// The relay confirmed the upstream session at least once
    pub connected_once: bool,
    /// A save request is awaiting acknowledgement
    pub save_pending: bool,
    /// The last save attempt timed out or failed
    pub save_failed: bool,
    /// The relay acknowledged a save
    pub saved: bool,
    pub timer: SessionTimer,
}

/// Side effects requested by the event reducer
#[derive(Debug, PartialEq)]
pub enum Effect {
    /// Acquire the microphone and start streaming
    StartCapture,
    /// Release the microphone
    StopCapture,
    /// Enqueue response audio for ordered playback
    EnqueueAudio(AudioSegment),
    /// Flush playback for a response, or everything when `None`
    CancelPlayback(Option<String>),
    /// Status text for the user
    Notify(String),
    /// User-visible failure
    SurfaceError(String),
    /// Disarm the pending save deadline
    ClearSaveDeadline,
    /// The conversation is over; leave the dispatch loop
    Shutdown,
}

/// Route one relay event
///
/// Mutates `state` and returns the effects the run loop must apply.
/// No IO happens here.
pub fn handle_event(state: &mut SessionState, event: ServerEvent) -> Vec<Effect> {
    match event {
        ServerEvent::Connected => {
            state.status = SessionStatus::Listening;
            state.connected_once = true;
            vec![
                Effect::StartCapture,
                Effect::Notify("connected, listening".to_string()),
            ]
        }
        ServerEvent::AudioChunk { audio, response_id } => {
            if let Some(id) = &response_id {
                state.current_response_id = Some(id.clone());
            }
            vec![Effect::EnqueueAudio(AudioSegment { audio, response_id })]
        }
        ServerEvent::Greeting {
            coach_name,
            message,
        } => vec![Effect::Notify(format!("{coach_name}: {message}"))],
        ServerEvent::ResponseCancelled { response_id } => {
            state.current_response_id = None;
            vec![Effect::CancelPlayback(response_id)]
        }
        ServerEvent::Error { message } => {
            let mut effects = vec![Effect::SurfaceError(message)];
            if state.save_pending {
                state.save_pending = false;
                state.save_failed = true;
                effects.push(Effect::ClearSaveDeadline);
            }
            effects
        }
        ServerEvent::ConversationSaved => {
            state.save_pending = false;
            state.save_failed = false;
            state.saved = true;
            state.timer.stop();
            vec![
                Effect::ClearSaveDeadline,
                Effect::Notify("conversation saved".to_string()),
            ]
        }
        ServerEvent::Stopped => {
            state.status = SessionStatus::Stopped;
            vec![Effect::StopCapture, Effect::Shutdown]
        }
        ServerEvent::Unknown => Vec::new(),
    }
}

/// Everything needed to open a conversation
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Relay websocket URL
    pub relay_url: String,
    /// Auth token, passed through to the relay verbatim
    pub token: SecretString,
    pub coach_id: i64,
    pub coach_name: String,
    pub api_type: ApiType,
    pub user_name: Option<String>,
    pub user_id: Option<i64>,
}

/// What a finished session reports back to the caller
#[derive(Debug)]
pub struct SessionSummary {
    pub status: SessionStatus,
    pub elapsed: Duration,
    pub saved: bool,
}

/// How a dispatch loop ended
enum LoopEnd {
    /// Conversation over; tear down and return
    Finished,
    /// Socket lost before the upstream session came up; try again
    Reconnect,
}

/// One voice conversation: socket, state machine, and audio pipelines
pub struct Session {
    options: SessionOptions,
    policy: RetryPolicy,
    save_timeout: Duration,
    state: SessionState,
    flags: SessionFlags,
    playback: PlaybackHandle,
    scheduler: Option<PlaybackScheduler>,
}

impl Session {
    /// Create a session for `options` with the default retry policy
    #[must_use]
    pub fn new(options: SessionOptions) -> Self {
        Self::with_policy(options, RetryPolicy::default())
    }

    /// Create a session with an explicit retry policy
    #[must_use]
    pub fn with_policy(options: SessionOptions, policy: RetryPolicy) -> Self {
        let flags = SessionFlags::default();
        let (scheduler, playback) = PlaybackScheduler::new(
            Arc::clone(&flags.is_playing),
            Arc::clone(&flags.should_stop_audio),
        );

        Self {
            options,
            policy,
            save_timeout: SAVE_TIMEOUT,
            state: SessionState::default(),
            flags,
            playback,
            scheduler: Some(scheduler),
        }
    }

    /// Override the save acknowledgement deadline
    #[must_use]
    pub fn with_save_timeout(mut self, timeout: Duration) -> Self {
        self.save_timeout = timeout;
        self
    }

    /// Flags shared with the audio pipelines
    #[must_use]
    pub fn flags(&self) -> SessionFlags {
        self.flags.clone()
    }

    /// Run the conversation on the default output device
    ///
    /// `stop_rx` delivers user stop requests: the first triggers the stop
    /// and auto-save sequence, a second retries a failed save, a third
    /// leaves immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if audio hardware is unavailable,
    /// [`Error::Connection`] on a terminal connection failure.
    #[allow(clippy::future_not_send)]
    pub async fn run(self, stop_rx: mpsc::Receiver<()>) -> Result<SessionSummary> {
        let sink = CpalSink::new()?;
        self.run_with_sink(sink, stop_rx).await
    }

    /// Run the conversation on a caller-provided output sink
    ///
    /// # Errors
    ///
    /// Same as [`Session::run`].
    #[allow(clippy::future_not_send)]
    pub async fn run_with_sink(
        mut self,
        sink: impl AudioSink + 'static,
        mut stop_rx: mpsc::Receiver<()>,
    ) -> Result<SessionSummary> {
        let conversation = Uuid::new_v4();
        tracing::info!(
            %conversation,
            coach = %self.options.coach_name,
            api = ?self.options.api_type,
            "starting conversation"
        );

        let playback_task = self
            .scheduler
            .take()
            .map(|scheduler| tokio::spawn(scheduler.run(sink)));

        let result = self.drive(&mut stop_rx).await;

        self.cleanup();
        if let Some(task) = playback_task {
            let _ = task.await;
        }

        result?;
        Ok(SessionSummary {
            status: self.state.status,
            elapsed: self.state.timer.elapsed(),
            saved: self.state.saved,
        })
    }

    /// Connect (with retries) and dispatch until the conversation ends
    #[allow(clippy::future_not_send)]
    async fn drive(&mut self, stop_rx: &mut mpsc::Receiver<()>) -> Result<()> {
        loop {
            self.state.status = SessionStatus::Connecting;

            let ws = match self.connect_once().await {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::warn!(error = %e, "connect attempt failed");
                    self.backoff_or_fail().await?;
                    continue;
                }
            };

            self.flags.is_connected.store(true, Ordering::Release);
            self.state.timer.start();

            let (mut tx, mut rx) = ws.split();
            send_message(&mut tx, &self.start_message()).await?;

            match self.dispatch(&mut tx, &mut rx, stop_rx).await? {
                LoopEnd::Finished => return Ok(()),
                LoopEnd::Reconnect => {
                    self.flags.is_connected.store(false, Ordering::Release);
                    self.backoff_or_fail().await?;
                }
            }
        }
    }

    /// One connection attempt, bounded by [`CONNECT_TIMEOUT`]
    async fn connect_once(&self) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        tracing::info!(
            url = %self.options.relay_url,
            attempt = self.state.retry_count + 1,
            "connecting to relay"
        );

        let connect = connect_async(self.options.relay_url.as_str());
        match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(Error::Connection(format!("relay connect failed: {e}"))),
            Err(_) => Err(Error::Connection(format!(
                "relay connect timed out after {CONNECT_TIMEOUT:?}"
            ))),
        }
    }

    /// Book a failure; sleep out the backoff or fail terminally
    async fn backoff_or_fail(&mut self) -> Result<()> {
        self.state.retry_count += 1;

        if self.policy.should_retry(self.state.retry_count) {
            let delay = self.policy.delay_for(self.state.retry_count);
            tracing::info!(retry = self.state.retry_count, ?delay, "retrying connect");
            tokio::time::sleep(delay).await;
            Ok(())
        } else {
            self.state.status = SessionStatus::Error;
            Err(Error::Connection(format!(
                "relay unreachable after {} attempts",
                self.state.retry_count
            )))
        }
    }

    /// The dispatch loop: socket events, capture flushing, the save
    /// deadline, and user stop requests interleave here
    #[allow(clippy::future_not_send)]
    async fn dispatch(
        &mut self,
        tx: &mut WsSink,
        rx: &mut WsSource,
        stop_rx: &mut mpsc::Receiver<()>,
    ) -> Result<LoopEnd> {
        let mut capture: Option<AudioCapture> = None;
        let mut save_deadline: Option<Instant> = None;
        let mut stop_initiated = false;
        let mut done = false;

        let mut flush = tokio::time::interval(SEND_INTERVAL);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let end = loop {
            tokio::select! {
                frame = rx.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let effects = parse_and_route(&mut self.state, &text);
                        for effect in effects {
                            self.apply(effect, &mut capture, &mut save_deadline, &mut done)?;
                        }
                        if done {
                            break LoopEnd::Finished;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => break self.on_close(frame)?,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break self.on_transport_error(&e)?,
                    None => break self.on_close(None)?,
                },
                _ = flush.tick() => {
                    self.flush_capture(tx, capture.as_ref()).await?;
                }
                () = async {
                    match save_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                }, if save_deadline.is_some() => {
                    save_deadline = None;
                    self.state.save_pending = false;
                    self.state.save_failed = true;
                    tracing::error!(
                        timeout = ?self.save_timeout,
                        "save not acknowledged; stop again to retry"
                    );
                }
                stop = stop_rx.recv() => {
                    if stop.is_none() {
                        tracing::debug!("stop channel closed, ending session");
                        break LoopEnd::Finished;
                    }
                    if !stop_initiated {
                        stop_initiated = true;
                        self.begin_stop(tx, &mut save_deadline).await?;
                    } else if self.state.save_failed {
                        self.state.save_failed = false;
                        self.request_save(tx, &mut save_deadline).await?;
                    } else {
                        tracing::info!("stop requested again, leaving session");
                        break LoopEnd::Finished;
                    }
                }
            }
        };

        if let Some(mic) = capture.as_mut() {
            mic.stop();
        }

        Ok(end)
    }

    /// Apply one reducer effect
    fn apply(
        &mut self,
        effect: Effect,
        capture: &mut Option<AudioCapture>,
        save_deadline: &mut Option<Instant>,
        done: &mut bool,
    ) -> Result<()> {
        match effect {
            Effect::StartCapture => {
                if capture.is_none() {
                    let mut mic = AudioCapture::new().inspect_err(|e| {
                        tracing::error!(error = %e, "microphone unavailable, ending session");
                    })?;
                    mic.start()?;
                    *capture = Some(mic);
                }
                self.flags.is_listening.store(true, Ordering::Release);
                tracing::info!("listening; speak when ready");
            }
            Effect::StopCapture => {
                self.flags.is_listening.store(false, Ordering::Release);
                if let Some(mic) = capture.as_mut() {
                    mic.stop();
                }
            }
            Effect::EnqueueAudio(segment) => self.playback.enqueue(segment),
            Effect::CancelPlayback(id) => self.playback.cancel(id.as_deref()),
            Effect::Notify(text) => tracing::info!(%text, "relay status"),
            Effect::SurfaceError(message) => {
                tracing::error!(%message, "relay reported an error");
            }
            Effect::ClearSaveDeadline => *save_deadline = None,
            Effect::Shutdown => *done = true,
        }

        Ok(())
    }

    /// Drain the capture buffer; send while listening, drop otherwise
    async fn flush_capture(
        &mut self,
        tx: &mut WsSink,
        capture: Option<&AudioCapture>,
    ) -> Result<()> {
        let Some(capture) = capture else {
            return Ok(());
        };

        let chunk = capture.take_chunk();
        if chunk.is_empty() {
            return Ok(());
        }

        if self.flags.is_connected.load(Ordering::Acquire)
            && self.flags.is_listening.load(Ordering::Acquire)
        {
            let audio = encode_chunk(&chunk);
            send_message(tx, &ControlMessage::AudioChunk { audio }).await?;
        }

        Ok(())
    }

    /// User-initiated stop: flush playback, cancel the in-flight response,
    /// quiesce the relay, then auto-save
    async fn begin_stop(
        &mut self,
        tx: &mut WsSink,
        save_deadline: &mut Option<Instant>,
    ) -> Result<()> {
        tracing::info!("stopping conversation");

        self.playback.cancel(None);
        self.flags.is_listening.store(false, Ordering::Release);

        if let Some(id) = self.state.current_response_id.take() {
            send_message(tx, &ControlMessage::CancelResponse { response_id: id }).await?;
        }
        send_message(tx, &ControlMessage::ClearInputBuffer).await?;
        send_message(tx, &ControlMessage::Stop).await?;

        // Give the relay a moment to process the stop before the save
        tokio::time::sleep(AUTO_SAVE_DELAY).await;
        self.request_save(tx, save_deadline).await
    }

    /// Send the save request and arm its acknowledgement deadline
    async fn request_save(
        &mut self,
        tx: &mut WsSink,
        save_deadline: &mut Option<Instant>,
    ) -> Result<()> {
        let duration = self.state.timer.duration_minutes();
        tracing::info!(minutes = duration, "saving conversation");

        send_message(
            tx,
            &ControlMessage::SaveConversation {
                token: self.options.token.expose_secret().to_string(),
                coach_id: self.options.coach_id,
                duration,
            },
        )
        .await?;

        *save_deadline = Some(Instant::now() + self.save_timeout);
        self.state.save_pending = true;
        Ok(())
    }

    /// Classify a socket close
    fn on_close(&mut self, frame: Option<CloseFrame<'_>>) -> Result<LoopEnd> {
        let code = frame.as_ref().map_or(1006, |f| u16::from(f.code));
        let reason = frame
            .as_ref()
            .map(|f| f.reason.to_string())
            .unwrap_or_default();
        tracing::info!(code, reason = %reason, "relay socket closed");

        if !close_is_retryable(code) {
            self.state.status = SessionStatus::Stopped;
            return Ok(LoopEnd::Finished);
        }

        if self.state.connected_once {
            self.state.status = SessionStatus::Error;
            return Err(Error::Connection(format!(
                "connection lost (close code {code})"
            )));
        }

        Ok(LoopEnd::Reconnect)
    }

    /// Classify a transport error
    fn on_transport_error(
        &mut self,
        error: &tokio_tungstenite::tungstenite::Error,
    ) -> Result<LoopEnd> {
        tracing::warn!(error = %error, "relay transport error");

        if self.state.connected_once {
            self.state.status = SessionStatus::Error;
            return Err(Error::Connection(format!("relay transport failed: {error}")));
        }

        Ok(LoopEnd::Reconnect)
    }

    fn start_message(&self) -> ControlMessage {
        ControlMessage::Start {
            coach_name: self.options.coach_name.clone(),
            api_type: self.options.api_type,
            token: self.options.token.expose_secret().to_string(),
            coach_id: self.options.coach_id,
            user_name: self.options.user_name.clone(),
            user_id: self.options.user_id,
        }
    }

    /// Release everything the session holds; runs on every exit path
    ///
    /// The capture stream and socket are dropped with the dispatch scope;
    /// this covers the shared pieces.
    fn cleanup(&mut self) {
        self.playback.cancel(None);
        self.playback.shutdown();
        self.flags.is_listening.store(false, Ordering::Release);
        self.flags.is_connected.store(false, Ordering::Release);
        self.flags.should_stop_audio.store(true, Ordering::Release);
        self.state.timer.stop();
        tracing::debug!("session resources released");
    }
}

/// Parse one text frame and route it through the reducer
///
/// Malformed frames and unhandled event types are logged and dropped; the
/// session keeps running.
fn parse_and_route(state: &mut SessionState, text: &str) -> Vec<Effect> {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(ServerEvent::Unknown) => {
            tracing::debug!("ignoring unhandled relay event");
            Vec::new()
        }
        Ok(event) => handle_event(state, event),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed relay frame");
            Vec::new()
        }
    }
}

async fn send_message(tx: &mut WsSink, message: &ControlMessage) -> Result<()> {
    let json = serde_json::to_string(message)?;
    tx.send(Message::Text(json)).await?;
    Ok(())
}
