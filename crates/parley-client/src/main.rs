//! Parley client binary: a terminal front end for one agent conversation.
//!
//! Connects to the backend with structured logging and automatic
//! reconnection, prints assistant replies, speaks them aloud, and reads user
//! turns from stdin until EOF, `/quit`, SIGINT or SIGTERM.

use parley_client::config::{self, Config};
use parley_client::{
    websocket_url, ConnectionManager, MessageRouter, SessionContext, WebSocketConnector,
};
use parley_types::{ConnectionState, OutboundMessage, SessionEvent};
use parley_voice::{
    ApiConfig, CaptureEvent, CommandAudioPlayer, CommandMicrophone, CommandSpeechEngine,
    CredentialSource, ListenOptions, SpeechCaptureController, SpeechOutputController,
    StaticCredential, SynthesisFallbackChain, TranscribingRecognizer, VoiceApiClient,
    VoiceSessionState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Quit,
    /// Interrupt whatever is being spoken.
    Stop,
    Connect,
    Disconnect,
    /// Toggle microphone capture.
    Listen,
    Message {
        agent_id: Option<String>,
        content: String,
    },
    Unknown(String),
    Empty,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    match line {
        "" => Input::Empty,
        "/quit" | "/exit" => Input::Quit,
        "/stop" => Input::Stop,
        "/connect" => Input::Connect,
        "/disconnect" => Input::Disconnect,
        "/listen" => Input::Listen,
        _ if line.starts_with('/') => Input::Unknown(line.to_string()),
        _ => match line.strip_prefix('@').and_then(|rest| rest.split_once(char::is_whitespace)) {
            Some((agent, content)) if !agent.is_empty() && !content.trim().is_empty() => {
                Input::Message {
                    agent_id: Some(agent.to_string()),
                    content: content.trim().to_string(),
                }
            }
            _ => Input::Message {
                agent_id: None,
                content: line.to_string(),
            },
        },
    }
}

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

/// Everything the input loop acts on.
struct Client {
    session_id: String,
    manager: Arc<ConnectionManager>,
    output: Arc<SpeechOutputController>,
    capture: SpeechCaptureController,
    listen: ListenOptions,
}

impl Client {
    /// Returns `false` when the user asked to quit.
    async fn handle(&self, input: Input) -> bool {
        match input {
            Input::Quit => return false,
            Input::Empty => {}
            Input::Stop => {
                if !self.output.stop() {
                    println!("(nothing is playing)");
                }
            }
            Input::Connect => self.manager.connect(),
            Input::Disconnect => self.manager.disconnect(),
            Input::Listen => self.toggle_listening().await,
            Input::Unknown(command) => {
                println!("unknown command {}; try /listen /stop /connect /disconnect /quit", command);
            }
            Input::Message { agent_id, content } => {
                let mut message = OutboundMessage::text(&self.session_id, content);
                if let Some(agent_id) = agent_id {
                    message = message.with_agent(agent_id);
                }
                if !self.manager.send(&message) {
                    tracing::warn!(state = %self.manager.state(), "message not sent: not connected");
                    println!("(not connected; message dropped)");
                }
            }
        }
        true
    }

    async fn toggle_listening(&self) {
        if self.capture.is_listening() {
            self.capture.stop_listening().await;
            return;
        }

        let manager = self.manager.clone();
        let session_id = self.session_id.clone();
        let on_result = move |text: &str, is_final: bool| {
            if !is_final {
                return;
            }
            println!("you (voice): {}", text);
            if !manager.send(&OutboundMessage::text(&session_id, text)) {
                tracing::warn!("voice transcript not sent: not connected");
            }
        };
        if let Err(e) = self.capture.start_listening(on_result, self.listen.clone()) {
            tracing::warn!("cannot start listening: {}", e);
            println!("(cannot listen: {})", e);
        }
    }
}

fn build_output(config: &Config, state: &VoiceSessionState) -> Arc<SpeechOutputController> {
    let mut output = SpeechOutputController::new(state.clone())
        .with_engine(Arc::new(CommandSpeechEngine::new(&config.speech.engine)));
    match CommandAudioPlayer::from_command_line(&config.speech.player) {
        Ok(player) => output = output.with_player(Arc::new(player)),
        Err(e) => tracing::warn!("audio playback disabled: {}", e),
    }
    Arc::new(output)
}

async fn print_events(context: Arc<SessionContext>) {
    let mut events = context.subscribe();
    loop {
        match events.recv().await {
            Ok(SessionEvent::AssistantMessage(message)) if message.error => {
                println!("[{}] error: {}", message.agent_id, message.content);
            }
            Ok(SessionEvent::AssistantMessage(message)) => {
                println!("[{}] {}", message.agent_id, message.content);
            }
            Ok(SessionEvent::Composing { agent_id, active }) => {
                if active {
                    println!("[{}] is typing...", agent_id);
                }
            }
            Ok(SessionEvent::ApprovalRequested { agent_id, content, approval }) => {
                println!("[{}] approval requested: {} {}", agent_id, content, approval);
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event printer fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn print_capture_events(mut events: tokio::sync::broadcast::Receiver<CaptureEvent>) {
    loop {
        match events.recv().await {
            Ok(CaptureEvent::ListeningStarted) => println!("(listening)"),
            Ok(CaptureEvent::ListeningStopped { reason }) => {
                println!("(stopped listening: {:?})", reason);
            }
            Ok(CaptureEvent::RecognitionFailed { message }) => {
                println!("(recognition failed: {})", message);
            }
            Ok(CaptureEvent::VoiceDetected) => {}
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
}

async fn report_connection(mut state: tokio::sync::watch::Receiver<ConnectionState>) {
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        match current {
            ConnectionState::Connected => println!("(connected)"),
            ConnectionState::Failed => {
                println!("(connection failed; type /connect to try again)");
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("parley.toml"));

    let mut config = config::load_config(selected_config_path)
        .expect("failed to load configuration; fix the config file or PARLEY_* variables");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr so they never interleave with the transcript.
    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    if config.server.session_id.trim().is_empty() {
        config.server.session_id = uuid::Uuid::new_v4().to_string();
    }
    let session_id = config.server.session_id.clone();
    let timeout = Duration::from_secs(config.server.request_timeout_secs);

    let credentials: Arc<dyn CredentialSource> =
        Arc::new(StaticCredential::new(config.server.token.clone()));
    let api_config = ApiConfig {
        request_timeout_secs: config.server.request_timeout_secs,
        ..ApiConfig::new(&config.server.base_url)
    };
    let api = Arc::new(
        VoiceApiClient::new(&api_config, credentials.clone())
            .expect("invalid server.base_url; expected an http or https origin"),
    );

    let voice = VoiceSessionState::new();
    let output = build_output(&config, &voice);
    let chain = Arc::new(
        SynthesisFallbackChain::new(output.clone())
            .with_remote(api.clone())
            .with_voices(config.agents.clone())
            .with_local_options(config.speech.defaults.clone()),
    );

    let context = Arc::new(SessionContext::new(session_id.clone()));
    let mut router = MessageRouter::new(context.clone())
        .with_output(output.clone())
        .with_audio_base(api.base_url().clone());
    if config.speech.speak_replies {
        router = router.with_spoken_replies(chain);
    }

    let url = websocket_url(&config.server.base_url, &session_id)
        .expect("cannot derive the WebSocket endpoint from server.base_url");
    tracing::info!(%url, session_id = %session_id, "starting parley client");

    let (manager, frames) = ConnectionManager::spawn(
        WebSocketConnector::new(credentials, timeout),
        url,
        config.reconnect,
        Some(voice.clone()),
    );
    let manager = Arc::new(manager);

    let capture = SpeechCaptureController::new(voice, config.vad)
        .with_microphone(Arc::new(CommandMicrophone::default()))
        .with_recognizer(Arc::new(TranscribingRecognizer::new(api, config.vad)))
        .with_output(output.clone());

    tokio::spawn(print_events(context));
    tokio::spawn(print_capture_events(capture.subscribe()));
    tokio::spawn(report_connection(manager.subscribe()));
    tokio::spawn(router.run(frames));

    manager.connect();

    let client = Client {
        session_id,
        manager: manager.clone(),
        output,
        capture,
        listen: config.listen.clone(),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !client.handle(parse_input(&line)).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("failed to read stdin: {}", e);
                    break;
                }
            },
        }
    }

    client.capture.stop_listening().await;
    client.output.stop();
    manager.shutdown().await;

    tracing::info!("parley client shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, shutting down"); }
        () = terminate => { tracing::info!("received SIGTERM, shutting down"); }
    }
}
