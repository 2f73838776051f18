//! Wire frames for the live-session socket.
//!
//! Outbound frames use snake_case keys; inbound frames arrive camelCase.
//! Binary frames in either direction carry raw PCM16 audio and never go
//! through JSON.

use crate::config::{ActivityDetection, ResponseModality, SessionConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Outbound -----------------------------------------------------------

/// First frame after the socket opens. The credential travels here, never
/// in the connection URI, so URI logging cannot leak it.
#[derive(Debug, Serialize)]
pub struct AuthFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub token: String,
}

impl AuthFrame {
    pub fn new(token: &str) -> Self {
        Self {
            frame_type: "auth",
            token: token.to_string(),
        }
    }
}

/// Every non-auth outbound frame. Externally tagged, so `Setup(..)`
/// serializes as `{"setup": {..}}` and so on.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientFrame {
    Setup(Setup),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
    RealtimeInput(RealtimeInput),
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Serialize)]
pub struct Setup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proactivity: Option<Proactivity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_input_config: Option<RealtimeInputConfig>,
    pub session_resumption: SessionResumption,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

impl Setup {
    /// Build the setup frame from the caller's configuration, the registered
    /// tool declarations, and the current resumption block.
    pub fn new(
        config: &SessionConfig,
        function_declarations: Vec<FunctionDeclaration>,
        session_resumption: SessionResumption,
    ) -> Self {
        let speech_config = config.voice_name.as_ref().map(|name| SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: name.clone(),
                },
            },
        });

        let tools = if function_declarations.is_empty() {
            None
        } else {
            Some(ToolsConfig {
                function_declarations,
            })
        };

        Self {
            generation_config: Some(GenerationConfig {
                response_modalities: config.response_modalities.clone(),
                speech_config,
                temperature: config.temperature,
            }),
            system_instruction: config.system_instruction.as_ref().map(|text| {
                SystemInstruction {
                    parts: vec![Part { text: text.clone() }],
                }
            }),
            tools,
            proactivity: config.proactive_audio.then_some(Proactivity {
                proactive_audio: true,
            }),
            realtime_input_config: config.activity_detection.as_ref().map(|detection| {
                RealtimeInputConfig {
                    automatic_activity_detection: detection.clone(),
                }
            }),
            session_resumption,
            input_audio_transcription: config
                .input_audio_transcription
                .then_some(TranscriptionConfig {}),
            output_audio_transcription: config
                .output_audio_transcription
                .then_some(TranscriptionConfig {}),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Serialize)]
pub struct ToolsConfig {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
pub struct Proactivity {
    pub proactive_audio: bool,
}

#[derive(Debug, Serialize)]
pub struct RealtimeInputConfig {
    pub automatic_activity_detection: ActivityDetection,
}

/// Empty object on the wire; presence alone enables the transcript stream.
#[derive(Debug, Serialize)]
pub struct TranscriptionConfig {}

/// Resumption block of the setup frame. A fresh connect carries only the
/// last-known handle (nullable); a reconnect additionally carries the
/// single-use token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionResumption {
    pub handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClientContent {
    pub turns: Vec<Turn>,
    pub turn_complete: bool,
}

#[derive(Debug, Serialize)]
pub struct Turn {
    pub role: String,
    pub parts: Vec<Part>,
}

impl ClientContent {
    /// A complete user text turn.
    pub fn user_text(text: &str) -> Self {
        Self {
            turns: vec![Turn {
                role: "user".to_string(),
                parts: vec![Part {
                    text: text.to_string(),
                }],
            }],
            turn_complete: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub id: String,
    pub response: Value,
}

#[derive(Debug, Serialize)]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize)]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl RealtimeInput {
    /// One chunk of live microphone audio, transmitted immediately.
    pub fn audio(samples: &[f32]) -> Self {
        Self {
            media_chunks: vec![MediaChunk {
                mime_type: format!("audio/pcm;rate={}", crate::pcm::CAPTURE_SAMPLE_RATE),
                data: crate::pcm::encode_pcm_base64(samples),
            }],
        }
    }

    /// One JPEG camera/screen frame.
    pub fn image(jpeg_bytes: &[u8]) -> Self {
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
        Self {
            media_chunks: vec![MediaChunk {
                mime_type: "image/jpeg".to_string(),
                data: BASE64.encode(jpeg_bytes),
            }],
        }
    }
}

// --- Inbound ------------------------------------------------------------

/// One structured inbound frame. All fields optional; the codec in
/// `events` decides which one wins when several are present.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFrame {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCallFrame>,
    pub session_resumption_update: Option<SessionResumptionUpdate>,
    pub go_away: Option<GoAway>,
    pub message_limit_warning: Option<MessageLimitWarning>,
    // Proxy-style error frames: {"type":"error","error":...}
    #[serde(rename = "type")]
    pub frame_type: Option<String>,
    pub error: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub turn_complete: Option<bool>,
    pub interrupted: Option<bool>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    pub model_turn: Option<ModelTurn>,
}

#[derive(Debug, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub finished: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ModelTurn {
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub data: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallFrame {
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: Option<Value>,
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumptionUpdate {
    pub session_id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GoAway {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageLimitWarning {
    pub count: Option<u64>,
    pub limit: Option<u64>,
}
