use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Authentication error: {0}")]
    Auth(#[from] crate::auth::AuthError),

    #[error("Session error: {0}")]
    Session(#[from] crate::session::SessionError),

    #[error("Audio capture error: {0}")]
    Capture(#[from] crate::capture::CaptureError),

    #[error("Audio playback error: {0}")]
    Playback(#[from] crate::playback::PlaybackError),

    #[error("Tool error: {0}")]
    Tool(#[from] crate::tools::ToolError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
