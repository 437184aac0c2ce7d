//! Playback scheduler integration tests
//!
//! Exercises ordering and cancellation through a recording sink, without
//! audio hardware.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use coachlink::audio::{AudioSegment, PlaybackScheduler};

mod common;
use common::{RecordingSink, chunk_of_len, wait_for};

fn segment(len: usize, id: Option<&str>) -> AudioSegment {
    AudioSegment {
        audio: chunk_of_len(len),
        response_id: id.map(ToString::to_string),
    }
}

fn scheduler() -> (PlaybackScheduler, coachlink::audio::PlaybackHandle) {
    PlaybackScheduler::new(
        Arc::new(AtomicBool::new(false)),
        Arc::new(AtomicBool::new(false)),
    )
}

#[tokio::test]
async fn segments_play_in_arrival_order() {
    let (scheduler, handle) = scheduler();
    let sink = RecordingSink::new();
    let played = sink.played();

    let task = tokio::spawn(scheduler.run(sink));

    for len in [10, 20, 30, 40, 50] {
        handle.enqueue(segment(len, Some("r1")));
    }

    assert!(
        wait_for(Duration::from_secs(1), || played.lock().unwrap().len() == 5).await,
        "all segments should play"
    );
    assert_eq!(*played.lock().unwrap(), vec![10, 20, 30, 40, 50]);

    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn cancellation_halts_in_flight_and_discards_queued() {
    let (scheduler, handle) = scheduler();
    let sink = RecordingSink::blocking(1);
    let played = sink.played();

    let task = tokio::spawn(scheduler.run(sink));

    // First segment parks on the sink; second waits behind it
    handle.enqueue(segment(10, Some("r1")));
    handle.enqueue(segment(20, Some("r1")));

    assert!(
        wait_for(Duration::from_secs(1), || !played.lock().unwrap().is_empty()).await,
        "first segment should start"
    );

    handle.cancel(Some("r1"));

    // The queued segment must never start
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*played.lock().unwrap(), vec![10]);
    assert_eq!(handle.queued(), 0);

    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn fresh_response_plays_after_a_cancellation() {
    let (scheduler, handle) = scheduler();
    let sink = RecordingSink::new();
    let played = sink.played();

    let task = tokio::spawn(scheduler.run(sink));

    handle.enqueue(segment(10, Some("r1")));
    handle.cancel(Some("r1"));

    // A new response id clears the stop flag and plays normally
    handle.enqueue(segment(30, Some("r2")));

    assert!(
        wait_for(Duration::from_secs(1), || {
            played.lock().unwrap().contains(&30)
        })
        .await,
        "the fresh response should play"
    );

    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn stale_response_segments_never_start() {
    let (scheduler, handle) = scheduler();
    let sink = RecordingSink::blocking(1);
    let played = sink.played();

    let task = tokio::spawn(scheduler.run(sink));

    // r1 parks on the sink with more r1 audio queued behind it
    handle.enqueue(segment(10, Some("r1")));
    handle.enqueue(segment(20, Some("r1")));
    handle.enqueue(segment(21, None));

    assert!(
        wait_for(Duration::from_secs(1), || !played.lock().unwrap().is_empty()).await,
        "first segment should start"
    );

    // A new response arrives: everything still queued under r1 is flushed
    handle.enqueue(segment(30, Some("r2")));
    handle.cancel(Some("r2"));
    handle.enqueue(segment(40, Some("r3")));

    assert!(
        wait_for(Duration::from_secs(1), || {
            played.lock().unwrap().contains(&40)
        })
        .await,
        "r3 should play"
    );

    let played = played.lock().unwrap().clone();
    assert!(!played.contains(&20), "queued r1 segment must not play");
    assert!(!played.contains(&21), "queued r1 segment must not play");
    assert!(!played.contains(&30), "cancelled r2 segment must not play");

    handle.shutdown();
    let _ = task.await;
}

#[tokio::test]
async fn undecodable_segment_is_skipped_not_fatal() {
    let (scheduler, handle) = scheduler();
    let sink = RecordingSink::new();
    let played = sink.played();

    let task = tokio::spawn(scheduler.run(sink));

    handle.enqueue(segment(10, Some("r1")));
    handle.enqueue(AudioSegment {
        audio: "!!! not base64 !!!".to_string(),
        response_id: None,
    });
    handle.enqueue(segment(30, None));

    assert!(
        wait_for(Duration::from_secs(1), || played.lock().unwrap().len() == 2).await,
        "decodable segments should still play"
    );
    assert_eq!(*played.lock().unwrap(), vec![10, 30]);

    handle.shutdown();
    let _ = task.await;
}
