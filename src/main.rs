use clap::Parser;
use futures_util::StreamExt;
use std::sync::Arc;
use voice_live_rs::{
    auth::HttpAuthenticator,
    capture::{CaptureConfig, CpalCapture},
    config::{load_server_config, AuthOptions, SessionConfig},
    error::Result as ClientResult,
    playback::CpalPlayer,
    session::{LiveClient, LiveHandler, SessionError},
    ResponseEvent,
};

#[derive(Parser, Debug)]
#[command(name = "voice-live", about = "Talk to a conversational model in realtime")]
struct Args {
    /// Prebuilt voice for synthesized replies
    #[arg(long)]
    voice: Option<String>,

    /// System instruction for the session
    #[arg(long)]
    system_instruction: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Input device name (default: system default microphone)
    #[arg(long)]
    input_device: Option<String>,

    /// List capture devices and exit
    #[arg(long)]
    list_devices: bool,
}

/// Prints conversation progress; everything else is already logged.
struct ConsoleHandler;

impl LiveHandler for ConsoleHandler {
    fn on_event(&self, event: &ResponseEvent) {
        match event {
            ResponseEvent::Text(text) => println!("🗣️  {}", text),
            ResponseEvent::InputTranscription { text, .. } => println!("🎤 you: {}", text),
            ResponseEvent::OutputTranscription { text, .. } => println!("🔊 model: {}", text),
            ResponseEvent::TurnComplete => println!("—"),
            ResponseEvent::Error { message } => eprintln!("❌ server error: {}", message),
            _ => {}
        }
    }

    fn on_open(&self) {
        println!("🎧 Connected. Start talking; press Ctrl+C to exit.");
    }

    fn on_close(&self) {
        println!("👋 Session closed.");
    }

    fn on_error(&self, error: &SessionError) {
        eprintln!("❌ {}", error);
    }
}

#[tokio::main]
async fn main() -> ClientResult<()> {
    env_logger::init();
    log::info!("🚀 Initializing voice-live");

    let args = Args::parse();

    if args.list_devices {
        for device in CpalCapture::list_devices()? {
            println!(
                "{}{} ({} channels)",
                if device.is_default { "* " } else { "  " },
                device.name,
                device.channel_count
            );
        }
        return Ok(());
    }

    let server = load_server_config()?;

    let mut config = SessionConfig::default();
    config.voice_name = args.voice;
    config.system_instruction = args.system_instruction;
    config.temperature = args.temperature;

    let auth_options = match std::env::var("VOICE_LIVE_PASSWORD") {
        Ok(password) => AuthOptions::with_password(password),
        Err(_) => match std::env::var("VOICE_LIVE_JWT") {
            Ok(jwt) => AuthOptions::with_jwt(jwt),
            Err(_) => {
                eprintln!("❌ Neither VOICE_LIVE_PASSWORD nor VOICE_LIVE_JWT is set");
                eprintln!("   Set one with: export VOICE_LIVE_PASSWORD=your_password");
                std::process::exit(1);
            }
        },
    };

    let authenticator = Arc::new(HttpAuthenticator::new(server.auth_url.clone())?);

    let mut player = CpalPlayer::new()?;
    log::info!("🔊 Playback pipeline ready");

    let mut capture = CpalCapture::new(CaptureConfig {
        device_id: args.input_device,
        ..Default::default()
    })?;
    log::info!("🎤 Capture pipeline ready");

    let mut client = LiveClient::new(server.ws_url, config, authenticator, Arc::new(ConsoleHandler));
    client.attach_playback(player.command_sender());

    client.connect(auth_options).await?;

    loop {
        tokio::select! {
            buffer = capture.next() => {
                match buffer {
                    Some(samples) => {
                        if let Err(e) = client.send_realtime_audio(samples).await {
                            // NotConnected after reconnect exhaustion is the
                            // end of the session, not a crash.
                            log::warn!("Dropping capture buffer: {}", e);
                            break;
                        }
                    }
                    None => {
                        log::warn!("Capture stream ended");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    client.disconnect();
    capture.stop();
    player.stop();
    log::info!("Sent {} bytes this session", client.bytes_sent());

    Ok(())
}
