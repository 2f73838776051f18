//! Typed events produced from inbound frames.
//!
//! The decoder is a pure mapping: one frame in, at most one event out.
//! Control signals are checked before content parts, so a frame that
//! carries both (e.g. turn completion plus an empty model turn) always
//! surfaces as the control event. Malformed frames are logged and dropped;
//! a single bad control frame must never tear down a healthy session.

use crate::protocol::{FunctionCall, ServerFrame};

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    Text(String),
    /// Raw PCM16 bytes, already base64-decoded when they arrived inline.
    Audio(Vec<u8>),
    SetupComplete,
    TurnComplete,
    Interrupted,
    ToolCall(Vec<FunctionCall>),
    InputTranscription { text: String, finished: bool },
    OutputTranscription { text: String, finished: bool },
    SessionResumptionUpdate {
        handle: Option<String>,
        token: Option<String>,
    },
    GoAway { reason: Option<String> },
    MessageLimitWarning { count: u64, limit: u64 },
    Error { message: String },
}

/// Decode one inbound text frame. Returns `None` for frames that don't
/// parse or don't carry anything recognizable.
pub fn decode_text(text: &str) -> Option<ResponseEvent> {
    let frame: ServerFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("Dropping malformed inbound frame: {}", e);
            return None;
        }
    };
    decode_frame(frame)
}

/// A raw binary frame is always audio; there is no ambiguity on that path.
pub fn decode_binary(data: Vec<u8>) -> ResponseEvent {
    ResponseEvent::Audio(data)
}

/// Decode one structured frame into at most one event, control signals
/// first.
pub fn decode_frame(frame: ServerFrame) -> Option<ResponseEvent> {
    if frame.setup_complete.is_some() {
        return Some(ResponseEvent::SetupComplete);
    }

    if let Some(content) = &frame.server_content {
        if content.turn_complete == Some(true) {
            return Some(ResponseEvent::TurnComplete);
        }
        if content.interrupted == Some(true) {
            return Some(ResponseEvent::Interrupted);
        }
        if let Some(transcription) = &content.input_transcription {
            return Some(ResponseEvent::InputTranscription {
                text: transcription.text.clone(),
                finished: transcription.finished.unwrap_or(false),
            });
        }
        if let Some(transcription) = &content.output_transcription {
            return Some(ResponseEvent::OutputTranscription {
                text: transcription.text.clone(),
                finished: transcription.finished.unwrap_or(false),
            });
        }
    }

    if let Some(tool_call) = frame.tool_call {
        return Some(ResponseEvent::ToolCall(tool_call.function_calls));
    }

    if let Some(update) = frame.session_resumption_update {
        return Some(ResponseEvent::SessionResumptionUpdate {
            handle: update.session_id,
            token: update.token,
        });
    }

    if let Some(go_away) = frame.go_away {
        return Some(ResponseEvent::GoAway {
            reason: go_away.reason,
        });
    }

    if let Some(warning) = frame.message_limit_warning {
        return Some(ResponseEvent::MessageLimitWarning {
            count: warning.count.unwrap_or(0),
            limit: warning.limit.unwrap_or(0),
        });
    }

    if frame.frame_type.as_deref() == Some("error") || frame.error.is_some() {
        let message = frame
            .error
            .map(|e| match e {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .unwrap_or_else(|| "unknown server error".to_string());
        return Some(ResponseEvent::Error { message });
    }

    // Control signals exhausted; fall through to content parts.
    if let Some(content) = frame.server_content {
        if let Some(model_turn) = content.model_turn {
            for part in model_turn.parts {
                if let Some(text) = part.text {
                    return Some(ResponseEvent::Text(text));
                }
                if let Some(inline) = part.inline_data {
                    match crate::pcm::decode_pcm_base64(&inline.data) {
                        Ok(bytes) => return Some(ResponseEvent::Audio(bytes)),
                        Err(e) => {
                            log::warn!("Dropping inline audio with bad base64: {}", e);
                            return None;
                        }
                    }
                }
            }
        }
    }

    log::debug!("Inbound frame carried no recognizable signal");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_complete() {
        let event = decode_text(r#"{"setupComplete":{}}"#);
        assert_eq!(event, Some(ResponseEvent::SetupComplete));
    }

    #[test]
    fn test_control_masks_empty_content() {
        // Turn completion plus an empty model turn: control wins.
        let event = decode_text(
            r#"{"serverContent":{"turnComplete":true,"modelTurn":{"parts":[]}}}"#,
        );
        assert_eq!(event, Some(ResponseEvent::TurnComplete));
    }

    #[test]
    fn test_interrupted() {
        let event = decode_text(r#"{"serverContent":{"interrupted":true}}"#);
        assert_eq!(event, Some(ResponseEvent::Interrupted));
    }

    #[test]
    fn test_text_part() {
        let event =
            decode_text(r#"{"serverContent":{"modelTurn":{"parts":[{"text":"hello"}]}}}"#);
        assert_eq!(event, Some(ResponseEvent::Text("hello".to_string())));
    }

    #[test]
    fn test_inline_audio_part() {
        let data = crate::pcm::encode_pcm_base64(&[0.5f32; 4]);
        let frame = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"data":"{}","mimeType":"audio/pcm;rate=24000"}}}}]}}}}}}"#,
            data
        );
        match decode_text(&frame) {
            Some(ResponseEvent::Audio(bytes)) => assert_eq!(bytes.len(), 8),
            other => panic!("Expected Audio, got {:?}", other),
        }
    }

    #[test]
    fn test_input_transcription() {
        let event = decode_text(
            r#"{"serverContent":{"inputTranscription":{"text":"hi there","finished":true}}}"#,
        );
        assert_eq!(
            event,
            Some(ResponseEvent::InputTranscription {
                text: "hi there".to_string(),
                finished: true,
            })
        );
    }

    #[test]
    fn test_transcription_checked_before_model_turn() {
        let event = decode_text(
            r#"{"serverContent":{"outputTranscription":{"text":"spoken","finished":false},"modelTurn":{"parts":[{"text":"typed"}]}}}"#,
        );
        assert_eq!(
            event,
            Some(ResponseEvent::OutputTranscription {
                text: "spoken".to_string(),
                finished: false,
            })
        );
    }

    #[test]
    fn test_tool_call() {
        let event = decode_text(
            r#"{"toolCall":{"functionCalls":[{"name":"lookup","args":{"q":"x"},"id":"call-1"},{"name":"save","id":"call-2"}]}}"#,
        );
        match event {
            Some(ResponseEvent::ToolCall(calls)) => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].name, "lookup");
                assert_eq!(calls[1].name, "save");
            }
            other => panic!("Expected ToolCall, got {:?}", other),
        }
    }

    #[test]
    fn test_resumption_update() {
        let event = decode_text(
            r#"{"sessionResumptionUpdate":{"sessionId":"sess-1","token":"tok-1"}}"#,
        );
        assert_eq!(
            event,
            Some(ResponseEvent::SessionResumptionUpdate {
                handle: Some("sess-1".to_string()),
                token: Some("tok-1".to_string()),
            })
        );
    }

    #[test]
    fn test_go_away_and_limit_warning() {
        assert_eq!(
            decode_text(r#"{"goAway":{"reason":"maintenance"}}"#),
            Some(ResponseEvent::GoAway {
                reason: Some("maintenance".to_string())
            })
        );
        assert_eq!(
            decode_text(r#"{"messageLimitWarning":{"count":95,"limit":100}}"#),
            Some(ResponseEvent::MessageLimitWarning {
                count: 95,
                limit: 100
            })
        );
    }

    #[test]
    fn test_proxy_error_frame() {
        let event = decode_text(r#"{"type":"error","error":"backend exploded"}"#);
        assert_eq!(
            event,
            Some(ResponseEvent::Error {
                message: "backend exploded".to_string()
            })
        );
    }

    #[test]
    fn test_malformed_frame_dropped() {
        assert_eq!(decode_text("{not json"), None);
        assert_eq!(decode_text(r#"{"serverContent":"not an object"}"#), None);
    }

    #[test]
    fn test_unrecognized_frame_dropped() {
        assert_eq!(decode_text(r#"{"somethingElse":true}"#), None);
    }

    #[test]
    fn test_binary_is_always_audio() {
        let event = decode_binary(vec![1, 2, 3, 4]);
        assert_eq!(event, ResponseEvent::Audio(vec![1, 2, 3, 4]));
    }
}
