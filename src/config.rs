use secrecy::{ExposeSecret, SecretBox};
use serde::Serialize;
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Which modalities the model may respond with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

/// Automatic voice-activity-detection parameters sent in the setup frame.
/// All fields are optional; the server applies its defaults for anything
/// left unset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivityDetection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_of_speech_sensitivity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_of_speech_sensitivity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_padding_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u32>,
}

/// Everything the caller configures before `connect()`. The session
/// controller holds this by value; there is no post-connect mutation.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub response_modalities: Vec<ResponseModality>,
    /// Prebuilt voice to synthesize with (None = server default).
    pub voice_name: Option<String>,
    pub temperature: Option<f32>,
    pub system_instruction: Option<String>,
    /// Let the model decide when to speak without an explicit prompt.
    pub proactive_audio: bool,
    pub activity_detection: Option<ActivityDetection>,
    /// Request transcripts of the user's speech.
    pub input_audio_transcription: bool,
    /// Request transcripts of the model's speech.
    pub output_audio_transcription: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_modalities: vec![ResponseModality::Audio],
            voice_name: None,
            temperature: None,
            system_instruction: None,
            proactive_audio: false,
            activity_detection: None,
            input_audio_transcription: true,
            output_audio_transcription: true,
        }
    }
}

/// Credentials the caller supplies to `connect()`. The core treats these as
/// opaque and hands them to the `Authenticator`; which fields matter is the
/// authenticator's policy.
#[derive(Debug, Default)]
pub struct AuthOptions {
    pub password: Option<SecretBox<String>>,
    pub jwt_token: Option<SecretBox<String>>,
    pub recaptcha_token: Option<String>,
    pub signed_params: Option<serde_json::Value>,
}

impl AuthOptions {
    pub fn with_password(password: String) -> Self {
        Self {
            password: Some(SecretBox::new(Box::new(password))),
            ..Default::default()
        }
    }

    pub fn with_jwt(jwt_token: String) -> Self {
        Self {
            jwt_token: Some(SecretBox::new(Box::new(jwt_token))),
            ..Default::default()
        }
    }

    /// Serialize into the authenticator's request body. Secrets are exposed
    /// only here, at the point of use.
    pub fn to_request_body(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        if let Some(password) = &self.password {
            body.insert(
                "password".to_string(),
                serde_json::Value::String(password.expose_secret().clone()),
            );
        }
        if let Some(jwt) = &self.jwt_token {
            body.insert(
                "jwt_token".to_string(),
                serde_json::Value::String(jwt.expose_secret().clone()),
            );
        }
        if let Some(token) = &self.recaptcha_token {
            body.insert(
                "recaptcha_token".to_string(),
                serde_json::Value::String(token.clone()),
            );
        }
        if let Some(params) = &self.signed_params {
            body.insert("signed_params".to_string(), params.clone());
        }
        serde_json::Value::Object(body)
    }
}

/// Server endpoints, loaded from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// WebSocket endpoint for the live session (wss://...).
    pub ws_url: String,
    /// HTTP endpoint of the credential-exchange authenticator.
    pub auth_url: String,
}

impl ServerConfig {
    /// Load endpoints from `VOICE_LIVE_WS_URL` and `VOICE_LIVE_AUTH_URL`.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let ws_url = Self::load_url("VOICE_LIVE_WS_URL", &["ws", "wss"])?;
        let auth_url = Self::load_url("VOICE_LIVE_AUTH_URL", &["http", "https"])?;

        Ok(Self { ws_url, auth_url })
    }

    fn load_url(env_var: &str, schemes: &[&str]) -> Result<String, ConfigError> {
        let value =
            env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;

        let parsed = url::Url::parse(&value).map_err(|e| {
            ConfigError::InvalidUrl(format!("{}: {}", env_var, e))
        })?;

        if !schemes.contains(&parsed.scheme()) {
            return Err(ConfigError::InvalidUrl(format!(
                "{}: unexpected scheme '{}'",
                env_var,
                parsed.scheme()
            )));
        }

        Ok(value)
    }
}

/// Load server configuration with helpful error messages for development.
pub fn load_server_config() -> Result<ServerConfig, ConfigError> {
    match ServerConfig::load() {
        Ok(config) => {
            log::info!("Loaded server configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_endpoint_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}
