//! Session lifecycle and the turn-taking state machine.
//!
//! One `Session` owns one transport connection, one listener task, and the
//! audio device handles; none of these are shared. All session state
//! (response tracking, feedback suppression, function-call bookkeeping) is
//! mutated by a single engine task. The capture callback runs on the audio
//! backend's thread and only hands frames into the engine through a channel.

use crate::audio::{AudioIo, AudioSpec, PlaybackHandle};
use crate::error::RealtimeError;
use crate::events::{ClientEvent, ERR_ACTIVE_RESPONSE, ServerEvent, SessionConfig};
use crate::pcm;
use crate::transport::{self, DEFAULT_MODEL, endpoint_url};
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Everything needed to open a session.
#[derive(Clone)]
pub struct SessionOptions {
    pub url: String,
    pub api_key: SecretString,
    pub config: SessionConfig,
    /// Watchdog: a response older than this is treated as abandoned when the
    /// next user turn arrives.
    pub response_timeout: Duration,
    /// How long the microphone stays suppressed after a response completes,
    /// so trailing playback is not clipped or re-captured.
    pub playback_grace: Duration,
    /// Pause between submitting a function result and requesting the
    /// follow-up response.
    pub function_settle: Duration,
}

impl SessionOptions {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            url: endpoint_url(DEFAULT_MODEL),
            api_key,
            config: SessionConfig::default(),
            response_timeout: Duration::from_secs(30),
            playback_grace: Duration::from_millis(300),
            function_settle: Duration::from_millis(100),
        }
    }
}

/// Callbacks into the application. All methods default to no-ops so
/// implementors only override what they consume.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    /// A decoded chunk of assistant PCM16 audio, in arrival order.
    async fn on_audio(&self, _pcm: &[u8]) {}

    /// A fragment of the assistant's spoken-output transcript.
    async fn on_transcript(&self, _fragment: &str) {}

    /// A completed function call. The returned string is submitted as the
    /// function result; the default reports the tool as unknown.
    async fn on_function_call(&self, name: &str, _args: serde_json::Value) -> String {
        format!("Unknown tool: {name}")
    }

    /// The assistant finished a response turn.
    async fn on_response_done(&self) {}
}

/// A live realtime session. Created via [`Session::initialize`], torn down
/// via [`Session::shutdown`]. Holds the audio streams, so it stays on the
/// task that created it; the engine runs in its own spawned task.
pub struct Session {
    audio: Option<AudioIo>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    engine: Option<JoinHandle<()>>,
}

impl Session {
    /// Connects, opens the audio devices, and starts the engine.
    ///
    /// Connection failure is fatal and propagates. Audio device failure is
    /// not: the session continues without capture or playback.
    pub async fn initialize(
        options: SessionOptions,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self, RealtimeError> {
        let (writer, mut reader) = transport::connect(&options.url, &options.api_key).await?;

        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerEvent>(256);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientEvent>(256);
        let (mic_tx, mic_rx) = mpsc::channel::<Vec<i16>>(32);

        let (audio, playback) = match AudioIo::open(&AudioSpec::default(), mic_tx) {
            Ok((audio, playback)) => (Some(audio), Some(playback)),
            Err(e) => {
                warn!(error = %e, "audio unavailable, continuing without capture or playback");
                (None, None)
            }
        };

        let reader_task = tokio::spawn(async move {
            while let Some(event) = reader.next_event().await {
                if inbound_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        let mut writer = writer;
        let writer_task = tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                if let Err(e) = writer.send(&event).await {
                    error!(error = %e, "outbound send failed, stopping writer");
                    break;
                }
            }
            writer.close().await;
        });

        let engine = Engine::new(&options, outbound_tx, playback, observer);
        let engine_task = tokio::spawn(engine.run(inbound_rx, mic_rx));

        info!("session initialized");
        Ok(Self {
            audio,
            reader: Some(reader_task),
            writer: Some(writer_task),
            engine: Some(engine_task),
        })
    }

    /// Runs until the remote closes the connection or the session is shut
    /// down from another task.
    pub async fn wait(&mut self) {
        if let Some(engine) = self.engine.take() {
            let _ = engine.await;
        }
    }

    /// Tears the session down: stops capture and playback, cancels the
    /// listener, closes the transport. Idempotent; runs the same on error
    /// paths and interrupt-driven exits.
    pub async fn shutdown(&mut self) {
        if let Some(mut audio) = self.audio.take() {
            audio.stop();
        }
        if let Some(reader) = self.reader.take() {
            // Dropping the reader drops the inbound sender, which ends the
            // engine loop, which in turn ends the writer and closes the
            // transport.
            reader.abort();
            let _ = reader.await;
        }
        if let Some(engine) = self.engine.take() {
            let _ = engine.await;
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        info!("session terminated");
    }
}

/// Tracks whether an assistant turn is currently being generated.
/// `in_progress` goes true only right before a `response.create` is sent,
/// and false only on `response.done`, an unrecoverable error event, or a
/// watchdog reset.
#[derive(Debug, Default)]
struct ResponseState {
    in_progress: bool,
    started_at: Option<Instant>,
}

impl ResponseState {
    fn reset(&mut self) {
        self.in_progress = false;
        self.started_at = None;
    }
}

/// Tracks whether assistant audio is currently being emitted. While `active`,
/// captured microphone frames are dropped before reaching the transport.
#[derive(Debug, Default)]
struct AudioOutputState {
    active: bool,
    grace_deadline: Option<Instant>,
}

/// Accumulates streamed function-call arguments until the call is done.
/// The buffer backs up the `done` event: some servers stream the payload
/// only through deltas and leave `arguments` empty.
#[derive(Debug, Default)]
struct FunctionCallState {
    pending: bool,
    call_id: Option<String>,
    argument_buffer: String,
}

struct Engine {
    config: SessionConfig,
    response_timeout: Duration,
    playback_grace: Duration,
    function_settle: Duration,
    outbound: mpsc::Sender<ClientEvent>,
    playback: Option<PlaybackHandle>,
    observer: Arc<dyn SessionObserver>,
    response: ResponseState,
    audio_out: AudioOutputState,
    function_call: FunctionCallState,
    /// Assigned once by the server via `session.created`, kept for log
    /// correlation.
    session_id: Option<String>,
}

impl Engine {
    fn new(
        options: &SessionOptions,
        outbound: mpsc::Sender<ClientEvent>,
        playback: Option<PlaybackHandle>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            config: options.config.clone(),
            response_timeout: options.response_timeout,
            playback_grace: options.playback_grace,
            function_settle: options.function_settle,
            outbound,
            playback,
            observer,
            response: ResponseState::default(),
            audio_out: AudioOutputState::default(),
            function_call: FunctionCallState::default(),
            session_id: None,
        }
    }

    /// The event loop. Sole owner of all session state; exits when the
    /// inbound stream ends.
    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<ServerEvent>,
        mut mic: mpsc::Receiver<Vec<i16>>,
    ) {
        let mut mic_open = true;
        loop {
            let grace_deadline = self.audio_out.grace_deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                frame = mic.recv(), if mic_open => match frame {
                    Some(frame) => self.handle_mic_frame(&frame).await,
                    None => mic_open = false,
                },
                _ = tokio::time::sleep_until(grace_deadline),
                    if self.audio_out.grace_deadline.is_some() =>
                {
                    self.on_grace_elapsed();
                }
            }
        }
        debug!("engine loop finished");
    }

    /// Forwards one microphone frame unless assistant audio is active (or
    /// still within the post-response grace window).
    async fn handle_mic_frame(&mut self, frame: &[i16]) {
        if self.audio_out.active {
            return;
        }
        let event = ClientEvent::InputAudioBufferAppend {
            audio: pcm::encode_base64_i16(frame),
        };
        if self.outbound.send(event).await.is_err() {
            warn!("outbound channel closed, dropping microphone frame");
        }
    }

    fn on_grace_elapsed(&mut self) {
        self.audio_out.active = false;
        self.audio_out.grace_deadline = None;
        debug!("playback grace elapsed, microphone resumed");
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { session } => {
                info!(session_id = session.id.as_deref().unwrap_or("?"), "session created");
                self.session_id = session.id;
                self.send(ClientEvent::SessionUpdate {
                    session: self.config.clone(),
                })
                .await;
            }
            ServerEvent::SessionUpdated => {
                info!("session configuration accepted");
            }
            ServerEvent::SpeechStarted => {
                if self.audio_out.active {
                    warn!("speech detected while assistant audio is playing, likely feedback");
                } else {
                    info!("user speech started");
                }
            }
            ServerEvent::SpeechStopped => self.on_speech_stopped().await,
            ServerEvent::ResponseCreated => {
                debug!("response created by server");
            }
            ServerEvent::OutputItemAdded => {
                debug!("response output item added");
            }
            ServerEvent::AudioDelta { delta } => {
                let bytes = pcm::decode_base64_pcm(&delta);
                if bytes.is_empty() {
                    return;
                }
                if !self.audio_out.active {
                    self.audio_out.active = true;
                    self.audio_out.grace_deadline = None;
                    debug!("assistant audio started, microphone suppressed");
                }
                if let Some(playback) = &mut self.playback {
                    playback.write(&pcm::bytes_to_i16(&bytes));
                }
                self.observer.on_audio(&bytes).await;
            }
            ServerEvent::TranscriptDelta { delta } => {
                self.observer.on_transcript(&delta).await;
            }
            ServerEvent::FunctionCallArgumentsDelta { call_id, delta } => {
                if self.function_call.call_id.as_deref() != Some(&call_id) {
                    self.function_call.call_id = Some(call_id);
                    self.function_call.argument_buffer.clear();
                }
                self.function_call.argument_buffer.push_str(&delta);
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => self.on_function_call_done(call_id, name, arguments).await,
            ServerEvent::ResponseDone => {
                self.response.reset();
                self.function_call.pending = false;
                if self.audio_out.active {
                    self.audio_out.grace_deadline = Some(Instant::now() + self.playback_grace);
                }
                self.observer.on_response_done().await;
                info!("response done");
            }
            ServerEvent::Error { error } => {
                if error.code.as_deref() == Some(ERR_ACTIVE_RESPONSE) {
                    // The server already has a response going; drop the local
                    // follow-up intent but keep the in-flight tracking.
                    warn!("response.create rejected, a response is already active");
                    self.function_call.pending = false;
                } else {
                    error!(
                        session_id = self.session_id.as_deref().unwrap_or("?"),
                        code = error.code.as_deref().unwrap_or("?"),
                        message = error.message.as_deref().unwrap_or(""),
                        "server reported an error, resetting turn state"
                    );
                    self.response.reset();
                    self.function_call.pending = false;
                    self.audio_out.active = false;
                    self.audio_out.grace_deadline = None;
                }
            }
            ServerEvent::Unhandled => {
                debug!("ignoring unhandled event type");
            }
        }
    }

    /// The user finished speaking: start a response unless one is already in
    /// flight. A stale in-flight response (watchdog expired) is abandoned
    /// first so the session cannot wedge.
    async fn on_speech_stopped(&mut self) {
        if self.response.in_progress {
            let stale = self
                .response
                .started_at
                .is_some_and(|t| t.elapsed() > self.response_timeout);
            if stale {
                warn!("in-flight response exceeded its timeout, abandoning it");
                self.response.reset();
            } else {
                info!("response already in progress, skipping this turn");
                return;
            }
        }
        self.response.in_progress = true;
        self.response.started_at = Some(Instant::now());
        self.send(ClientEvent::response_create()).await;
    }

    /// Runs the completed function call through the observer and submits its
    /// result, then requests the follow-up response after a short settle
    /// delay. An empty `arguments` payload falls back to the fragments
    /// accumulated for this call_id; malformed arguments degrade to an empty
    /// object rather than dropping the call.
    async fn on_function_call_done(&mut self, call_id: String, name: String, arguments: String) {
        let raw = if arguments.trim().is_empty()
            && self.function_call.call_id.as_deref() == Some(call_id.as_str())
        {
            std::mem::take(&mut self.function_call.argument_buffer)
        } else {
            arguments
        };
        let args: serde_json::Value = if raw.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "malformed function arguments, using empty object");
                serde_json::json!({})
            })
        };
        self.function_call.pending = true;
        info!(tool = %name, %call_id, "dispatching function call");

        let output = self.observer.on_function_call(&name, args).await;
        self.send(ClientEvent::function_output(call_id, output)).await;

        tokio::time::sleep(self.function_settle).await;
        if self.function_call.pending {
            self.function_call.pending = false;
            self.response.in_progress = true;
            self.response.started_at = Some(Instant::now());
            self.send(ClientEvent::response_create()).await;
        }
        self.function_call.call_id = None;
        self.function_call.argument_buffer.clear();
    }

    async fn send(&mut self, event: ClientEvent) {
        if self.outbound.send(event).await.is_err() {
            warn!("outbound channel closed, event dropped");
        }
    }
}
