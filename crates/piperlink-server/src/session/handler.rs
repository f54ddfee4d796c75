//! One client connection, from handshake to close.
//!
//! A reader task decodes events into a channel so the session can keep
//! watching the connection while it streams audio; a disconnect observed
//! mid-synthesis drops the chunk stream, which releases the worker.

use std::pin::pin;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use piperlink_core::text::normalize_text;
use piperlink_core::{
    AudioFormat, BridgeConfig, PreparedRequest, SynthesisError, SynthesizeRequest, VoiceRegistry,
};
use piperlink_runtime::SynthesisDispatcher;

use super::state::{Action, SessionState};
use super::SessionError;
use crate::info::build_info;
use crate::protocol::{
    read_event, write_event, ClientEvent, Event, ProtocolError, ServerEvent, Synthesize,
};

/// Decoded events queued by the reader task.
const INCOMING_CAPACITY: usize = 4;

type Incoming = Result<Option<Event>, ProtocolError>;

/// Per-session defaults taken from the bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub default_voice: String,
    pub default_speaker: Option<String>,
    pub auto_punctuation: String,
    pub strict_handshake: bool,
}

impl SessionConfig {
    pub fn from_bridge(config: &BridgeConfig) -> Self {
        Self {
            default_voice: config.voice.clone(),
            default_speaker: config.speaker.clone(),
            auto_punctuation: config.auto_punctuation.clone(),
            strict_handshake: config.strict_handshake,
        }
    }
}

/// Everything sessions share.
pub struct SessionContext {
    pub dispatcher: SynthesisDispatcher,
    pub registry: Arc<dyn VoiceRegistry>,
    pub config: SessionConfig,
}

impl SessionContext {
    pub fn new(
        dispatcher: SynthesisDispatcher,
        registry: Arc<dyn VoiceRegistry>,
        config: SessionConfig,
    ) -> Self {
        Self {
            dispatcher,
            registry,
            config,
        }
    }
}

/// Outcome of handling one event.
enum Flow {
    Continue,
    Close,
}

/// Aborts the reader task when the session ends.
struct ReaderTask(JoinHandle<()>);

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn spawn_reader<R>(reader: R, tx: mpsc::Sender<Incoming>) -> ReaderTask
where
    R: AsyncRead + Send + Unpin + 'static,
{
    ReaderTask(tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        loop {
            let item = read_event(&mut reader).await;
            let last = !matches!(item, Ok(Some(_)));
            if tx.send(item).await.is_err() || last {
                break;
            }
        }
    }))
}

/// Serve one connection until the client leaves, a protocol error occurs or
/// `shutdown` fires.
///
/// # Errors
///
/// Transport failures and protocol violations. A clean disconnect or a
/// shutdown is `Ok`.
pub async fn run_session<R, W>(
    ctx: Arc<SessionContext>,
    reader: R,
    writer: W,
    shutdown: CancellationToken,
    peer: &str,
) -> Result<(), SessionError>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin,
{
    let (tx, incoming) = mpsc::channel(INCOMING_CAPACITY);
    let _reader = spawn_reader(reader, tx);

    let mut session = Session {
        id: Uuid::new_v4().simple().to_string()[..8].to_string(),
        ctx,
        writer: BufWriter::new(writer),
        incoming,
        shutdown,
        state: SessionState::Handshake,
    };
    info!(session = %session.id, peer, "Session opened");

    let result = session.run().await;
    session.state = SessionState::Closed;

    match &result {
        Ok(()) => info!(session = %session.id, "Session closed"),
        Err(e) => warn!(session = %session.id, error = %e, "Session closed with error"),
    }
    result
}

struct Session<W> {
    id: String,
    ctx: Arc<SessionContext>,
    writer: BufWriter<W>,
    incoming: mpsc::Receiver<Incoming>,
    shutdown: CancellationToken,
    state: SessionState,
}

impl<W> Session<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn run(&mut self) -> Result<(), SessionError> {
        loop {
            let incoming = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    debug!(session = %self.id, "Shutdown requested");
                    self.state = SessionState::Closing;
                    return Ok(());
                }
                incoming = self.incoming.recv() => incoming,
            };

            let Some(event) = self.decode(incoming).await? else {
                debug!(session = %self.id, state = %self.state, "Client disconnected");
                self.state = SessionState::Closing;
                return Ok(());
            };

            if let Flow::Close = self.handle(event).await? {
                self.state = SessionState::Closing;
                return Ok(());
            }
        }
    }

    /// Turn one channel item into a client event. `Ok(None)` is a clean
    /// disconnect.
    async fn decode(
        &mut self,
        incoming: Option<Incoming>,
    ) -> Result<Option<ClientEvent>, SessionError> {
        let event = match incoming {
            None | Some(Ok(None)) => return Ok(None),
            Some(Ok(Some(event))) => event,
            Some(Err(e)) => return Err(self.reject(e).await),
        };
        match ClientEvent::parse(event) {
            Ok(event) => Ok(Some(event)),
            Err(e) => Err(self.reject(e).await),
        }
    }

    async fn handle(&mut self, event: ClientEvent) -> Result<Flow, SessionError> {
        debug!(session = %self.id, state = %self.state, event = event.name(), "Received event");

        let (next, action) = match self.state.accept(event, self.ctx.config.strict_handshake) {
            Ok(accepted) => accepted,
            Err(e) => return Err(self.reject(e).await),
        };
        self.state = next;

        match action {
            Action::SendInfo => self.send_info().await?,
            Action::Pong(text) => self.send(ServerEvent::Pong { text }).await?,
            Action::Synthesize(request) => {
                let flow = self.synthesize(request).await?;
                self.state = SessionState::Idle;
                return Ok(flow);
            }
        }
        Ok(Flow::Continue)
    }

    /// Close on a protocol violation, telling the client why if possible.
    async fn reject(&mut self, err: ProtocolError) -> SessionError {
        if err.is_transport() {
            return SessionError::from(err);
        }
        warn!(session = %self.id, state = %self.state, error = %err, "Protocol error; closing");
        self.state = SessionState::Closing;
        let notice = ServerEvent::Error {
            text: err.to_string(),
            code: ProtocolError::CODE,
        };
        if let Err(e) = self.send(notice).await {
            debug!(session = %self.id, error = %e, "Could not report protocol error");
        }
        SessionError::Protocol(err)
    }

    async fn send(&mut self, event: ServerEvent) -> Result<(), SessionError> {
        write_event(&mut self.writer, &event.into_event())
            .await
            .map_err(SessionError::Transport)
    }

    async fn send_error(&mut self, err: &SynthesisError) -> Result<(), SessionError> {
        self.send(ServerEvent::Error {
            text: err.to_string(),
            code: err.code(),
        })
        .await
    }

    async fn send_info(&mut self) -> Result<(), SessionError> {
        let voices = match self.ctx.registry.list_voices().await {
            Ok(voices) => voices,
            Err(e) => {
                warn!(session = %self.id, error = %e, "Could not list voices");
                Vec::new()
            }
        };
        self.send(ServerEvent::Info(build_info(&voices))).await
    }

    async fn synthesize(&mut self, request: Synthesize) -> Result<Flow, SessionError> {
        let ctx = Arc::clone(&self.ctx);
        let prepared = match prepare(&ctx, request).await {
            Ok(prepared) => prepared,
            Err(e) => {
                info!(session = %self.id, error = %e, "Rejected synthesis request");
                self.send_error(&e).await?;
                return Ok(Flow::Continue);
            }
        };
        debug!(
            session = %self.id,
            request = %prepared.id(),
            voice = %prepared.voice.id,
            speaker = ?prepared.speaker_id,
            "Synthesizing"
        );

        let fallback = AudioFormat::pcm16_mono(prepared.voice.sample_rate);
        let cancel = self.shutdown.child_token();
        let _cancel_on_exit = cancel.clone().drop_guard();
        let mut chunks = pin!(self.ctx.dispatcher.synthesize(prepared, cancel));
        let mut format = fallback;

        loop {
            tokio::select! {
                item = chunks.next() => match item {
                    None => return Ok(Flow::Continue),
                    Some(Ok(chunk)) => {
                        if chunk.seq == 0 {
                            format = chunk.format.unwrap_or(fallback);
                            self.send(ServerEvent::AudioStart(format)).await?;
                        }
                        let is_last = chunk.is_last;
                        if !chunk.payload.is_empty() {
                            self.send(ServerEvent::AudioChunk {
                                format,
                                seq: chunk.seq,
                                payload: chunk.payload,
                            })
                            .await?;
                        }
                        if is_last {
                            self.send(ServerEvent::AudioStop).await?;
                        }
                    }
                    Some(Err(SynthesisError::Cancelled)) => {}
                    Some(Err(e)) => self.send_error(&e).await?,
                },
                incoming = self.incoming.recv() => {
                    let Some(event) = self.decode(incoming).await? else {
                        info!(session = %self.id, "Client disconnected mid-synthesis; releasing worker");
                        return Ok(Flow::Close);
                    };
                    self.handle_during_synthesis(event).await?;
                }
            }
        }
    }

    /// `describe` and `ping` are answered between chunks; anything else is
    /// out of order.
    async fn handle_during_synthesis(&mut self, event: ClientEvent) -> Result<(), SessionError> {
        let strict = self.ctx.config.strict_handshake;
        match self.state.accept(event, strict) {
            Ok((_, Action::SendInfo)) => self.send_info().await,
            Ok((_, Action::Pong(text))) => self.send(ServerEvent::Pong { text }).await,
            Ok((_, Action::Synthesize(_))) => Err(self.reject(ProtocolError::OutOfOrder {
                event: "synthesize".to_string(),
                state: self.state.as_str(),
            })
            .await),
            Err(e) => Err(self.reject(e).await),
        }
    }
}

/// Resolve voice and speaker. Fails before any worker is involved.
async fn prepare(
    ctx: &SessionContext,
    request: Synthesize,
) -> Result<PreparedRequest, SynthesisError> {
    let config = &ctx.config;
    let text = normalize_text(&request.text, &config.auto_punctuation);
    let selection = request.voice.unwrap_or_default();

    let voice_id = selection
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| config.default_voice.clone());
    let voice = ctx.registry.resolve(&voice_id).await?;

    let mut synth = SynthesizeRequest::new(text, voice_id);
    if let Some(speaker) = selection.speaker.or_else(|| config.default_speaker.clone()) {
        synth = synth.with_speaker(speaker);
    }
    if let Some(hints) = request.output {
        synth = synth.with_hints(hints);
    }
    PreparedRequest::prepare(synth, voice)
}
