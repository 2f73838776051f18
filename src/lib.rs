pub mod auth;
pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod pcm;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod tools;

pub use error::{ClientError, Result};
pub use events::ResponseEvent;
pub use session::{LiveClient, LiveHandler, SessionState};
