//! Session controller: owns the socket, runs the connection/reconnection
//! state machine, and routes decoded events between the wire and the
//! caller's handler and audio pipelines.
//!
//! The protocol state lives in [`Session`], a plain value with no I/O, so
//! the reconnection policy is testable without a socket. [`LiveClient`] is
//! the caller-facing surface; it spawns one driver task per `connect()`
//! that performs all socket work.

use crate::auth::{AuthError, Authenticator, SessionCredential};
use crate::config::{AuthOptions, SessionConfig};
use crate::events::{self, ResponseEvent};
use crate::playback::{AudioChunk, PlaybackCommand};
use crate::protocol::{
    AuthFrame, ClientContent, ClientFrame, RealtimeInput, SessionResumption, Setup, ToolResponse,
};
use crate::tools::{ToolDefinition, ToolError, ToolRegistry};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Ceiling on consecutive reconnect attempts without a successful
/// resumption update.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Fixed delay before each reconnect attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Tool dispatch failed: {0}")]
    Tool(#[from] ToolError),
    #[error("Not connected")]
    NotConnected,
    #[error("Already connected")]
    AlreadyConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SessionState {
    Idle,
    Authenticating,
    SocketOpening,
    AwaitingSetupComplete,
    Active,
    Reconnecting,
}

/// What the connection-ended policy decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Reconnect { attempt: u32 },
    Finished,
}

/// Protocol state for one controller. No I/O: every transition is a plain
/// method call, driven by the socket task or the caller.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    session_handle: Option<String>,
    resumption_token: Option<String>,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
    auto_reconnect: bool,
    reached_active: bool,
    close_pending: bool,
    bytes_sent: u64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            session_handle: None,
            resumption_token: None,
            reconnect_attempts: 0,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            auto_reconnect: false,
            reached_active: false,
            close_pending: false,
            bytes_sent: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_handle(&self) -> Option<&str> {
        self.session_handle.as_deref()
    }

    pub fn resumption_token(&self) -> Option<&str> {
        self.resumption_token.as_deref()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Start a fresh connect: resumption state reset, attempt counter
    /// zeroed, auto-reconnect re-armed.
    pub fn begin_connect(&mut self) {
        self.session_handle = None;
        self.resumption_token = None;
        self.reconnect_attempts = 0;
        self.auto_reconnect = true;
        self.reached_active = false;
        self.close_pending = false;
        self.bytes_sent = 0;
        self.state = SessionState::Authenticating;
    }

    /// A reconnect attempt re-enters the credential exchange.
    pub fn begin_reconnect_auth(&mut self) {
        self.state = SessionState::Authenticating;
    }

    pub fn socket_opening(&mut self) {
        self.state = SessionState::SocketOpening;
    }

    /// The socket is open and the handshake frames are on the wire. From
    /// here on a close callback is owed to the caller.
    pub fn socket_opened(&mut self) {
        self.close_pending = true;
        self.state = SessionState::AwaitingSetupComplete;
    }

    pub fn on_setup_complete(&mut self) {
        self.reached_active = true;
        self.state = SessionState::Active;
    }

    /// A fresh token implies the server considers the session healthy, so
    /// the attempt counter starts over.
    pub fn on_resumption_update(&mut self, handle: Option<String>, token: Option<String>) {
        if handle.is_some() {
            self.session_handle = handle;
        }
        if token.is_some() {
            self.resumption_token = token;
        }
        self.reconnect_attempts = 0;
    }

    /// Resumption block for the setup frame. The token rides along only on
    /// reconnect attempts.
    pub fn resumption_block(&self) -> SessionResumption {
        SessionResumption {
            handle: self.session_handle.clone(),
            token: if self.reconnect_attempts > 0 {
                self.resumption_token.clone()
            } else {
                None
            },
        }
    }

    /// Policy check run whenever a connection ends for any reason other
    /// than `disconnect()`.
    pub fn on_connection_ended(&mut self) -> CloseOutcome {
        let eligible = self.auto_reconnect
            && self.reached_active
            && self.resumption_token.is_some()
            && self.reconnect_attempts < self.max_reconnect_attempts;

        if eligible {
            self.reconnect_attempts += 1;
            self.state = SessionState::Reconnecting;
            CloseOutcome::Reconnect {
                attempt: self.reconnect_attempts,
            }
        } else {
            self.state = SessionState::Idle;
            CloseOutcome::Finished
        }
    }

    /// Intentional teardown. Clears the resumption state so a later
    /// unexpected close cannot trigger an unwanted reconnect. Idempotent.
    pub fn disconnect(&mut self) {
        self.session_handle = None;
        self.resumption_token = None;
        self.auto_reconnect = false;
        self.state = SessionState::Idle;
    }

    /// True exactly once per opened connection cycle: whether the caller's
    /// close callback still needs to fire.
    pub fn take_close_notification(&mut self) -> bool {
        std::mem::take(&mut self.close_pending)
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller-facing callbacks. All methods default to no-ops; implement the
/// ones you care about.
pub trait LiveHandler: Send + Sync {
    /// Every decoded inbound event, in network-arrival order.
    fn on_event(&self, _event: &ResponseEvent) {}
    /// A connection attempt (initial or reconnect) is starting.
    fn on_connect_started(&self) {}
    /// The socket is open and the auth + setup frames have been sent.
    fn on_open(&self) {}
    /// The session is over: no socket open and no reconnect pending.
    fn on_close(&self) {}
    fn on_error(&self, _error: &SessionError) {}
}

/// No-op handler for callers that only poll state.
pub struct NullHandler;

impl LiveHandler for NullHandler {}

enum Command {
    Text(String),
    ToolResponse { id: String, response: Value },
    RealtimeAudio(Vec<f32>),
    RealtimeImage(Vec<u8>),
}

/// The session controller. One live session per instance.
pub struct LiveClient {
    server_url: String,
    config: SessionConfig,
    authenticator: Arc<dyn Authenticator>,
    handler: Arc<dyn LiveHandler>,
    tools: Arc<ToolRegistry>,
    playback_tx: Option<std::sync::mpsc::Sender<PlaybackCommand>>,
    session: Arc<Mutex<Session>>,
    command_tx: Mutex<Option<mpsc::Sender<Command>>>,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveClient {
    pub fn new(
        server_url: impl Into<String>,
        config: SessionConfig,
        authenticator: Arc<dyn Authenticator>,
        handler: Arc<dyn LiveHandler>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            config,
            authenticator,
            handler,
            tools: Arc::new(ToolRegistry::new()),
            playback_tx: None,
            session: Arc::new(Mutex::new(Session::new())),
            command_tx: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    /// Route inbound audio (and interrupts) into a playback pipeline.
    pub fn attach_playback(&mut self, tx: std::sync::mpsc::Sender<PlaybackCommand>) {
        self.playback_tx = Some(tx);
    }

    /// Register a tool. Only possible while no session is running.
    pub fn register_tool(&mut self, tool: ToolDefinition) -> Result<(), ToolError> {
        Arc::get_mut(&mut self.tools)
            .ok_or(ToolError::RegistryLocked)?
            .register(tool)
    }

    pub fn state(&self) -> SessionState {
        self.session.lock().unwrap().state()
    }

    pub fn session_handle(&self) -> Option<String> {
        self.session.lock().unwrap().session_handle().map(String::from)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.session.lock().unwrap().bytes_sent()
    }

    /// Authenticate and open the session. The credential exchange happens
    /// before this returns: an auth failure surfaces here as a typed error
    /// and no socket is opened. On success the socket work continues on a
    /// background task and progress is reported through the handler.
    pub async fn connect(&self, auth_options: AuthOptions) -> Result<(), SessionError> {
        {
            let session = self.session.lock().unwrap();
            if session.state() != SessionState::Idle {
                return Err(SessionError::AlreadyConnected);
            }
        }

        // Reap a finished or cancelled driver so its final transitions
        // cannot interleave with the new session's.
        let previous = self.task.lock().unwrap().take();
        if let Some(handle) = previous {
            let _ = handle.await;
        }

        self.session.lock().unwrap().begin_connect();
        self.handler.on_connect_started();

        let credential = match self.authenticator.authenticate(&auth_options).await {
            Ok(credential) => credential,
            Err(e) => {
                self.session.lock().unwrap().disconnect();
                return Err(SessionError::Auth(e));
            }
        };

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap() = cancel.clone();

        let (command_tx, command_rx) = mpsc::channel(64);
        *self.command_tx.lock().unwrap() = Some(command_tx);

        let driver = Driver {
            url: self.server_url.clone(),
            config: self.config.clone(),
            authenticator: self.authenticator.clone(),
            handler: self.handler.clone(),
            tools: self.tools.clone(),
            playback_tx: self.playback_tx.clone(),
            session: self.session.clone(),
            cancel,
            auth_options,
        };

        let handle = tokio::spawn(driver.run(command_rx, credential));
        *self.task.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Tear the session down. Clears the resumption state first so the
    /// resulting socket close cannot trigger a reconnect. Idempotent and
    /// safe from any state.
    pub fn disconnect(&self) {
        self.session.lock().unwrap().disconnect();
        self.cancel.lock().unwrap().cancel();
        *self.command_tx.lock().unwrap() = None;
    }

    /// Send a complete user text turn.
    pub async fn send_text_message(&self, text: &str) -> Result<(), SessionError> {
        self.command(Command::Text(text.to_string())).await
    }

    /// Answer a tool call the caller resolved itself.
    pub async fn send_tool_response(&self, id: &str, response: Value) -> Result<(), SessionError> {
        self.command(Command::ToolResponse {
            id: id.to_string(),
            response,
        })
        .await
    }

    /// Send one chunk of live microphone audio. Transmitted immediately;
    /// batching would add latency a live conversation partner can hear.
    pub async fn send_realtime_audio(&self, samples: Vec<f32>) -> Result<(), SessionError> {
        self.command(Command::RealtimeAudio(samples)).await
    }

    /// Send one JPEG camera or screen frame.
    pub async fn send_realtime_image(&self, jpeg_bytes: Vec<u8>) -> Result<(), SessionError> {
        self.command(Command::RealtimeImage(jpeg_bytes)).await
    }

    async fn command(&self, command: Command) -> Result<(), SessionError> {
        let tx = self
            .command_tx
            .lock()
            .unwrap()
            .clone()
            .ok_or(SessionError::NotConnected)?;
        tx.send(command)
            .await
            .map_err(|_| SessionError::NotConnected)
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// How an open connection ended.
enum Ended {
    /// `disconnect()` or teardown: never reconnect.
    Cancelled,
    /// Socket closed or errored underneath us: run the reconnect policy.
    Lost,
}

/// What to do after dispatching an event.
enum EventFlow {
    Continue,
    /// Close the socket now so the reconnect policy can resume the session
    /// before the server enforces a hard limit.
    CloseForResume,
}

struct Driver {
    url: String,
    config: SessionConfig,
    authenticator: Arc<dyn Authenticator>,
    handler: Arc<dyn LiveHandler>,
    tools: Arc<ToolRegistry>,
    playback_tx: Option<std::sync::mpsc::Sender<PlaybackCommand>>,
    session: Arc<Mutex<Session>>,
    cancel: CancellationToken,
    auth_options: AuthOptions,
}

impl Driver {
    async fn run(self, mut command_rx: mpsc::Receiver<Command>, initial: SessionCredential) {
        let mut credential = Some(initial);

        loop {
            // Authenticate. The first attempt arrives with a credential from
            // `connect()`; every reconnect performs a fresh exchange.
            let credential_now = match credential.take() {
                Some(c) => c,
                None => {
                    self.handler.on_connect_started();
                    self.session.lock().unwrap().begin_reconnect_auth();

                    let result = tokio::select! {
                        _ = self.cancel.cancelled() => {
                            self.finish();
                            return;
                        }
                        result = self.authenticator.authenticate(&self.auth_options) => result,
                    };
                    match result {
                        Ok(c) => c,
                        Err(e) => {
                            self.handler.on_error(&SessionError::Auth(e));
                            if !self.retry_or_finish().await {
                                return;
                            }
                            continue;
                        }
                    }
                }
            };

            // Open the socket. The URL never carries the credential.
            self.session.lock().unwrap().socket_opening();
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.finish();
                    return;
                }
                result = connect_async(self.url.as_str()) => result,
            };
            let (ws, _) = match connected {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("WebSocket connect failed: {}", e);
                    self.handler.on_error(&SessionError::WebSocket(e));
                    if !self.retry_or_finish().await {
                        return;
                    }
                    continue;
                }
            };

            let (mut ws_tx, mut ws_rx) = ws.split();

            // Credential first, then setup, then wait for setupComplete.
            if let Err(e) = self.send_handshake(&mut ws_tx, &credential_now).await {
                self.handler.on_error(&e);
                if !self.retry_or_finish().await {
                    return;
                }
                continue;
            }
            self.session.lock().unwrap().socket_opened();
            self.handler.on_open();

            let ended = self
                .connection_loop(&mut ws_tx, &mut ws_rx, &mut command_rx)
                .await;

            match ended {
                Ended::Cancelled => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    self.finish();
                    return;
                }
                Ended::Lost => {
                    if !self.retry_or_finish().await {
                        return;
                    }
                }
            }
        }
    }

    /// Run the reconnect policy. Returns true when another attempt should
    /// be made (after the fixed delay).
    async fn retry_or_finish(&self) -> bool {
        let outcome = self.session.lock().unwrap().on_connection_ended();
        match outcome {
            CloseOutcome::Reconnect { attempt } => {
                log::info!(
                    "Connection lost, reconnecting (attempt {}/{})",
                    attempt,
                    MAX_RECONNECT_ATTEMPTS
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        self.finish();
                        false
                    }
                    _ = tokio::time::sleep(RECONNECT_DELAY) => true,
                }
            }
            CloseOutcome::Finished => {
                self.finish();
                false
            }
        }
    }

    /// Emit the close callback, at most once per opened connection cycle.
    fn finish(&self) {
        let notify = self.session.lock().unwrap().take_close_notification();
        if notify {
            self.handler.on_close();
        }
    }

    async fn send_handshake(
        &self,
        ws_tx: &mut WsSink,
        credential: &SessionCredential,
    ) -> Result<(), SessionError> {
        let auth_json = serde_json::to_string(&AuthFrame::new(credential.token()))?;
        let auth_len = auth_json.len();
        ws_tx.send(Message::Text(auth_json.into())).await?;
        self.session.lock().unwrap().record_sent(auth_len);

        let (resumption, reconnecting) = {
            let session = self.session.lock().unwrap();
            (session.resumption_block(), session.reconnect_attempts() > 0)
        };
        if reconnecting {
            log::info!(
                "Resuming session (handle: {:?})",
                resumption.handle.as_deref()
            );
        }

        let setup = Setup::new(&self.config, self.tools.declarations(), resumption);
        self.send_frame(ws_tx, &ClientFrame::Setup(setup)).await
    }

    async fn send_frame(&self, ws_tx: &mut WsSink, frame: &ClientFrame) -> Result<(), SessionError> {
        let json = frame.to_json()?;
        let len = json.len();
        ws_tx.send(Message::Text(json.into())).await?;
        self.session.lock().unwrap().record_sent(len);
        Ok(())
    }

    async fn connection_loop(
        &self,
        ws_tx: &mut WsSink,
        ws_rx: &mut WsSource,
        command_rx: &mut mpsc::Receiver<Command>,
    ) -> Ended {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Ended::Cancelled;
                }
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        // Controller dropped its sender: clean teardown.
                        return Ended::Cancelled;
                    };
                    if let Err(e) = self.handle_command(command, ws_tx).await {
                        self.handler.on_error(&e);
                        return Ended::Lost;
                    }
                }
                message = ws_rx.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let Some(event) = events::decode_text(text.as_str()) else {
                                continue;
                            };
                            match self.dispatch_event(event, ws_tx).await {
                                Ok(EventFlow::Continue) => {}
                                Ok(EventFlow::CloseForResume) => {
                                    let _ = ws_tx.send(Message::Close(None)).await;
                                    return Ended::Lost;
                                }
                                Err(e) => {
                                    // Tool failures are the caller's code
                                    // failing; surface them without tearing
                                    // down an otherwise-healthy session.
                                    self.handler.on_error(&e);
                                }
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            let event = events::decode_binary(data.as_slice().to_vec());
                            if let Err(e) = self.dispatch_event(event, ws_tx).await {
                                self.handler.on_error(&e);
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed the socket: {:?}", frame);
                            return Ended::Lost;
                        }
                        Some(Ok(_)) => {} // Ping/Pong answered by tungstenite
                        Some(Err(e)) => {
                            log::error!("WebSocket receive error: {}", e);
                            self.handler.on_error(&SessionError::WebSocket(e));
                            return Ended::Lost;
                        }
                        None => {
                            log::info!("WebSocket stream ended");
                            return Ended::Lost;
                        }
                    }
                }
            }
        }
    }

    async fn handle_command(
        &self,
        command: Command,
        ws_tx: &mut WsSink,
    ) -> Result<(), SessionError> {
        let frame = match command {
            Command::Text(text) => ClientFrame::ClientContent(ClientContent::user_text(&text)),
            Command::ToolResponse { id, response } => {
                ClientFrame::ToolResponse(ToolResponse { id, response })
            }
            Command::RealtimeAudio(samples) => {
                ClientFrame::RealtimeInput(RealtimeInput::audio(&samples))
            }
            Command::RealtimeImage(bytes) => {
                ClientFrame::RealtimeInput(RealtimeInput::image(&bytes))
            }
        };
        self.send_frame(ws_tx, &frame).await
    }

    async fn dispatch_event(
        &self,
        event: ResponseEvent,
        ws_tx: &mut WsSink,
    ) -> Result<EventFlow, SessionError> {
        // Protocol bookkeeping before the caller sees the event.
        match &event {
            ResponseEvent::SetupComplete => {
                log::info!("Session setup complete");
                self.session.lock().unwrap().on_setup_complete();
            }
            ResponseEvent::SessionResumptionUpdate { handle, token } => {
                log::debug!("Resumption update (handle: {:?})", handle.as_deref());
                self.session
                    .lock()
                    .unwrap()
                    .on_resumption_update(handle.clone(), token.clone());
            }
            ResponseEvent::GoAway { reason } => {
                // Advisory only: the close that follows drives reconnection.
                log::warn!("Server going away: {:?}", reason.as_deref());
            }
            _ => {}
        }

        // Audio routing into the playback pipeline.
        match &event {
            ResponseEvent::Audio(bytes) => {
                if let Some(tx) = &self.playback_tx {
                    let _ = tx.send(PlaybackCommand::Append(AudioChunk::from_pcm16(bytes)));
                }
            }
            ResponseEvent::Interrupted => {
                if let Some(tx) = &self.playback_tx {
                    let _ = tx.send(PlaybackCommand::Interrupt);
                }
            }
            _ => {}
        }

        self.handler.on_event(&event);

        match event {
            ResponseEvent::ToolCall(calls) => {
                // Synchronous, in array order. Unknown names and failing
                // tools propagate; both are caller-owned defects.
                for call in calls {
                    let args = call.args.unwrap_or(Value::Null);
                    let result = self.tools.invoke(&call.name, args)?;
                    let frame = ClientFrame::ToolResponse(ToolResponse {
                        id: call.id.unwrap_or_default(),
                        response: result,
                    });
                    self.send_frame(ws_tx, &frame).await?;
                }
                Ok(EventFlow::Continue)
            }
            ResponseEvent::MessageLimitWarning { count, limit } => {
                let has_token = self.session.lock().unwrap().resumption_token().is_some();
                if has_token {
                    // One extra reconnect now buys zero audio loss at the
                    // hard limit.
                    log::info!(
                        "Message limit warning ({}/{}), closing early to resume",
                        count,
                        limit
                    );
                    Ok(EventFlow::CloseForResume)
                } else {
                    Ok(EventFlow::Continue)
                }
            }
            _ => Ok(EventFlow::Continue),
        }
    }
}
