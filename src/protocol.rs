//! Wire protocol for the relay socket
//!
//! JSON text frames over the persistent websocket. The relay forwards
//! capture audio to the upstream voice API and streams reply audio back,
//! tagged with the response it belongs to. Field naming follows the relay
//! exactly, including the mixed conventions (`coachName` vs `response_id`).

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Normal close, conversation ended cleanly
const CLOSE_NORMAL: u16 = 1000;

/// Relay is going away; orderly, not an error
const CLOSE_GOING_AWAY: u16 = 1001;

/// Which upstream voice API the relay should drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    /// `OpenAI` realtime voice
    #[default]
    OpenAi,
    /// `ElevenLabs` conversational voice
    ElevenLabs,
}

impl FromStr for ApiType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown api type: {other}"))),
        }
    }
}

/// Messages sent from the client to the relay
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Open a conversation with a coach
    #[serde(rename = "start", rename_all = "camelCase")]
    Start {
        coach_name: String,
        api_type: ApiType,
        token: String,
        coach_id: i64,
        user_name: Option<String>,
        user_id: Option<i64>,
    },

    /// One capture chunk, base64 PCM16 mono at the relay rate
    #[serde(rename = "audio")]
    AudioChunk { audio: String },

    /// End the conversation
    #[serde(rename = "stop")]
    Stop,

    /// Cancel an in-flight response
    #[serde(rename = "response.cancel")]
    CancelResponse { response_id: String },

    /// Drop any capture audio buffered relay-side
    #[serde(rename = "input_audio_buffer.clear")]
    ClearInputBuffer,

    /// Persist the conversation, reporting elapsed minutes
    #[serde(rename = "save_conversation", rename_all = "camelCase")]
    SaveConversation {
        token: String,
        coach_id: i64,
        duration: f64,
    },
}

/// Events received from the relay
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Upstream session established, capture may begin
    #[serde(rename = "connected")]
    Connected,

    /// One reply chunk, base64 PCM16 mono
    #[serde(rename = "audio", rename_all = "camelCase")]
    AudioChunk {
        audio: String,
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Opening message from the coach
    #[serde(rename = "greeting", rename_all = "camelCase")]
    Greeting { coach_name: String, message: String },

    /// A response was cancelled upstream; flush its audio
    #[serde(rename = "response_cancelled", rename_all = "camelCase")]
    ResponseCancelled {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Relay-side failure, surfaced to the user
    #[serde(rename = "error")]
    Error { message: String },

    /// Save request acknowledged
    #[serde(rename = "conversation_saved")]
    ConversationSaved,

    /// Relay finished tearing the conversation down
    #[serde(rename = "stopped")]
    Stopped,

    /// Any event type this client does not handle; logged and ignored
    #[serde(other)]
    Unknown,
}

/// Whether a socket close code leaves the session eligible for a reconnect
///
/// 1000 (normal) and 1001 (going away) are orderly ends; everything else
/// counts as abnormal.
#[must_use]
pub const fn close_is_retryable(code: u16) -> bool {
    code != CLOSE_NORMAL && code != CLOSE_GOING_AWAY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_uses_relay_field_names() {
        let msg = ControlMessage::Start {
            coach_name: "Alan Wozniak".to_string(),
            api_type: ApiType::OpenAi,
            token: "tok".to_string(),
            coach_id: 3,
            user_name: Some("Pat".to_string()),
            user_id: Some(17),
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "start");
        assert_eq!(json["coachName"], "Alan Wozniak");
        assert_eq!(json["apiType"], "openai");
        assert_eq!(json["coachId"], 3);
        assert_eq!(json["userName"], "Pat");
        assert_eq!(json["userId"], 17);
    }

    #[test]
    fn cancel_uses_dotted_tag_and_snake_field() {
        let msg = ControlMessage::CancelResponse {
            response_id: "resp_1".to_string(),
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "response.cancel");
        assert_eq!(json["response_id"], "resp_1");
    }

    #[test]
    fn clear_input_buffer_tag() {
        let json = serde_json::to_value(ControlMessage::ClearInputBuffer).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.clear");
    }

    #[test]
    fn save_reports_duration_in_minutes() {
        let msg = ControlMessage::SaveConversation {
            token: "tok".to_string(),
            coach_id: 5,
            duration: 2.5,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "save_conversation");
        assert_eq!(json["coachId"], 5);
        assert!((json["duration"].as_f64().unwrap() - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn audio_event_parses_camel_case_response_id() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"audio","audio":"AAAA","responseId":"resp_9"}"#)
                .unwrap();

        assert_eq!(
            event,
            ServerEvent::AudioChunk {
                audio: "AAAA".to_string(),
                response_id: Some("resp_9".to_string()),
            }
        );
    }

    #[test]
    fn audio_event_without_response_id() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"audio","audio":"AAAA"}"#).unwrap();

        assert_eq!(
            event,
            ServerEvent::AudioChunk {
                audio: "AAAA".to_string(),
                response_id: None,
            }
        );
    }

    #[test]
    fn unknown_event_type_is_tolerated() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"notes_sent","message":"done"}"#).unwrap();
        assert_eq!(event, ServerEvent::Unknown);
    }

    #[test]
    fn malformed_frame_is_an_error() {
        assert!(serde_json::from_str::<ServerEvent>("not json").is_err());
    }

    #[test]
    fn close_code_policy() {
        assert!(!close_is_retryable(1000));
        assert!(!close_is_retryable(1001));
        assert!(close_is_retryable(1006));
        assert!(close_is_retryable(1011));
        assert!(close_is_retryable(4000));
    }

    #[test]
    fn api_type_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<ApiType>().unwrap(), ApiType::OpenAi);
        assert_eq!(
            "elevenlabs".parse::<ApiType>().unwrap(),
            ApiType::ElevenLabs
        );
        assert!("whisper".parse::<ApiType>().is_err());
    }
}
