//! End-to-end session tests over in-memory and TCP transports.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use piperlink_core::EngineParams;
use piperlink_runtime::testing::{
    test_voice, RecordingObserver, ScriptedBackend, ScriptedBehavior, StaticRegistry,
};
use piperlink_runtime::{DispatcherConfig, EnginePool, PoolConfig, PoolObserver, SynthesisDispatcher};
use piperlink_server::protocol::{read_event, write_event, Event};
use piperlink_server::{
    run_session, serve, ListenUri, Listener, SessionConfig, SessionContext, SessionError,
};

const VOICE: &str = "en_US-lessac-medium";
const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    ctx: Arc<SessionContext>,
    backend: Arc<ScriptedBackend>,
    observer: Arc<RecordingObserver>,
}

fn harness(backend: ScriptedBackend, pool_size: usize, strict: bool) -> Harness {
    let backend = Arc::new(backend);
    let observer = Arc::new(RecordingObserver::default());
    let pool = EnginePool::with_observer(
        Arc::clone(&backend) as _,
        PoolConfig {
            size: pool_size,
            terminate_grace: Duration::from_millis(50),
            reclaim_timeout: Duration::from_millis(300),
        },
        Some(Arc::clone(&observer) as Arc<dyn PoolObserver>),
    );
    let dispatcher = SynthesisDispatcher::new(
        pool,
        DispatcherConfig {
            first_byte_timeout: Duration::from_secs(2),
            chunk_gap_timeout: Duration::from_secs(2),
            samples_per_chunk: 256,
            params: EngineParams::default(),
        },
    );
    let registry = Arc::new(StaticRegistry::new([
        test_voice(VOICE, 22_050),
        test_voice("en_GB-alan-low", 16_000),
    ]));
    let config = SessionConfig {
        default_voice: VOICE.to_string(),
        default_speaker: None,
        auto_punctuation: ".?!".to_string(),
        strict_handshake: strict,
    };
    Harness {
        ctx: Arc::new(SessionContext::new(dispatcher, registry, config)),
        backend,
        observer,
    }
}

struct Client<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl<R, W> Client<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn send(&mut self, event_type: &str, data: Value) {
        let event = Event::new(event_type).with_data(data);
        write_event(&mut self.writer, &event).await.unwrap();
    }

    async fn recv(&mut self) -> Option<Event> {
        timeout(WAIT, read_event(&mut self.reader))
            .await
            .expect("timed out waiting for an event")
            .unwrap()
    }

    async fn expect(&mut self, event_type: &str) -> Event {
        let event = self.recv().await.expect("connection closed");
        assert_eq!(event.event_type, event_type, "unexpected {event:?}");
        event
    }

    /// Read one synthesis response up to and including `audio-stop` or
    /// `error`.
    async fn response(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let event = self.recv().await.expect("connection closed");
            let done = matches!(event.event_type.as_str(), "audio-stop" | "error");
            events.push(event);
            if done {
                return events;
            }
        }
    }
}

type DuplexClient = Client<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

fn connect(
    ctx: &Arc<SessionContext>,
    shutdown: &CancellationToken,
) -> (DuplexClient, JoinHandle<Result<(), SessionError>>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let session = tokio::spawn(run_session(
        Arc::clone(ctx),
        server_read,
        server_write,
        shutdown.clone(),
        "test",
    ));
    let (read, write) = tokio::io::split(client);
    (
        Client {
            reader: BufReader::new(read),
            writer: write,
        },
        session,
    )
}

fn payload_bytes(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|e| e.event_type == "audio-chunk")
        .map(|e| e.payload.len())
        .sum()
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_describe_synthesize_ping() {
    let h = harness(ScriptedBackend::new(), 1, true);
    let shutdown = CancellationToken::new();
    let (mut client, session) = connect(&h.ctx, &shutdown);

    client.send("describe", json!({})).await;
    let info = client.expect("info").await;
    let program = &info.data["tts"][0];
    assert_eq!(program["name"], "piper");
    let names: Vec<&str> = program["voices"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v["name"].as_str())
        .collect();
    assert_eq!(names, vec!["en_GB-alan-low", VOICE]);

    client.send("synthesize", json!({ "text": "Hello world" })).await;
    let events = client.response().await;

    let start = &events[0];
    assert_eq!(start.event_type, "audio-start");
    assert_eq!(start.data["rate"], 22_050);
    assert_eq!(start.data["width"], 2);
    assert_eq!(start.data["channels"], 1);
    assert_eq!(events.last().unwrap().event_type, "audio-stop");
    assert!(events[1..events.len() - 1]
        .iter()
        .all(|e| e.event_type == "audio-chunk"));
    // Auto-punctuation appends a period before synthesis
    assert_eq!(payload_bytes(&events), h.backend.expected_bytes("Hello world."));

    let seqs: Vec<u64> = events
        .iter()
        .filter(|e| e.event_type == "audio-chunk")
        .filter_map(|e| e.data["seq"].as_u64())
        .collect();
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));

    client.send("ping", json!({ "text": "still there?" })).await;
    let pong = client.expect("pong").await;
    assert_eq!(pong.data["text"], "still there?");

    drop(client);
    assert_ok!(timeout(WAIT, session).await.unwrap().unwrap());
    assert_eq!(h.observer.held(), 0);
}

#[tokio::test]
async fn test_voice_selection_uses_voice_rate() {
    let h = harness(ScriptedBackend::new(), 1, true);
    let shutdown = CancellationToken::new();
    let (mut client, _session) = connect(&h.ctx, &shutdown);

    client.send("describe", json!({})).await;
    client.expect("info").await;
    client
        .send(
            "synthesize",
            json!({ "text": "Hi.", "voice": { "name": "en_GB-alan-low" } }),
        )
        .await;
    let events = client.response().await;
    assert_eq!(events[0].data["rate"], 16_000);
    assert_eq!(events.last().unwrap().event_type, "audio-stop");
}

fn chunk_sizes(events: &[Event]) -> Vec<usize> {
    events
        .iter()
        .filter(|e| e.event_type == "audio-chunk")
        .map(|e| e.payload.len())
        .collect()
}

#[tokio::test]
async fn test_output_hint_sets_chunk_size() {
    let h = harness(ScriptedBackend::new().with_chunk_bytes(4096), 1, true);
    let shutdown = CancellationToken::new();
    let (mut client, _session) = connect(&h.ctx, &shutdown);

    client.send("describe", json!({})).await;
    client.expect("info").await;

    client.send("synthesize", json!({ "text": "Hello world" })).await;
    let default_sizes = chunk_sizes(&client.response().await);
    assert!(default_sizes.iter().all(|&n| n <= 512));
    assert_eq!(default_sizes[0], 512);

    client
        .send(
            "synthesize",
            json!({ "text": "Hello world", "output": { "samples_per_chunk": 32 } }),
        )
        .await;
    let events = client.response().await;
    assert_eq!(events.last().unwrap().event_type, "audio-stop");
    let hinted = chunk_sizes(&events);
    assert!(hinted.iter().all(|&n| n <= 64));
    assert_eq!(hinted[0], 64);
    assert!(hinted.len() > default_sizes.len());
    assert_eq!(hinted.iter().sum::<usize>(), default_sizes.iter().sum::<usize>());
}

#[tokio::test]
async fn test_zero_chunk_hint_is_invalid_request() {
    let h = harness(ScriptedBackend::new(), 1, true);
    let shutdown = CancellationToken::new();
    let (mut client, _session) = connect(&h.ctx, &shutdown);

    client.send("describe", json!({})).await;
    client.expect("info").await;
    client
        .send(
            "synthesize",
            json!({ "text": "Hi.", "output": { "samples_per_chunk": 0 } }),
        )
        .await;
    let error = client.expect("error").await;
    assert_eq!(error.data["code"], "invalid-request");
    assert_eq!(h.backend.stats().spawned(), 0);
}

#[tokio::test]
async fn test_strict_handshake_rejects_early_synthesize() {
    let h = harness(ScriptedBackend::new(), 1, true);
    let shutdown = CancellationToken::new();
    let (mut client, session) = connect(&h.ctx, &shutdown);

    client.send("synthesize", json!({ "text": "Too early." })).await;
    let error = client.expect("error").await;
    assert_eq!(error.data["code"], "protocol-error");
    assert!(client.recv().await.is_none());

    let result = timeout(WAIT, session).await.unwrap().unwrap();
    assert!(matches!(result, Err(SessionError::Protocol(_))));
    assert_eq!(h.backend.stats().spawned(), 0);
}

#[tokio::test]
async fn test_lenient_handshake_allows_synthesize_first() {
    let h = harness(ScriptedBackend::new(), 1, false);
    let shutdown = CancellationToken::new();
    let (mut client, _session) = connect(&h.ctx, &shutdown);

    client.send("synthesize", json!({ "text": "No describe." })).await;
    let events = client.response().await;
    assert_eq!(events[0].event_type, "audio-start");
    assert_eq!(events.last().unwrap().event_type, "audio-stop");
}

#[tokio::test]
async fn test_unknown_voice_is_rejected_without_spawning() {
    let h = harness(ScriptedBackend::new(), 1, true);
    let shutdown = CancellationToken::new();
    let (mut client, _session) = connect(&h.ctx, &shutdown);

    client.send("describe", json!({})).await;
    client.expect("info").await;
    client
        .send(
            "synthesize",
            json!({ "text": "Hello.", "voice": { "name": "xx_XX-nobody-low" } }),
        )
        .await;
    let error = client.expect("error").await;
    assert_eq!(error.data["code"], "invalid-request");
    assert_eq!(h.backend.stats().spawned(), 0);

    // The session survives a rejected request
    client.send("ping", json!({})).await;
    client.expect("pong").await;
}

#[tokio::test]
async fn test_empty_text_is_invalid_request() {
    let h = harness(ScriptedBackend::new(), 1, true);
    let shutdown = CancellationToken::new();
    let (mut client, _session) = connect(&h.ctx, &shutdown);

    client.send("describe", json!({})).await;
    client.expect("info").await;
    client.send("synthesize", json!({ "text": "   " })).await;
    let error = client.expect("error").await;
    assert_eq!(error.data["code"], "invalid-request");
}

#[tokio::test]
async fn test_engine_crash_reports_one_error_and_session_continues() {
    let h = harness(
        ScriptedBackend::new().with_behavior(ScriptedBehavior::CrashMidStream),
        1,
        true,
    );
    let shutdown = CancellationToken::new();
    let (mut client, _session) = connect(&h.ctx, &shutdown);

    client.send("describe", json!({})).await;
    client.expect("info").await;
    client
        .send("synthesize", json!({ "text": "This one will crash." }))
        .await;
    let events = client.response().await;
    let last = events.last().unwrap();
    assert_eq!(last.event_type, "error");
    assert_eq!(last.data["code"], "engine-crash");
    assert!(events.iter().all(|e| e.event_type != "audio-stop"));
    assert_eq!(events.iter().filter(|e| e.event_type == "error").count(), 1);

    h.backend.set_behavior(ScriptedBehavior::Speak);
    client.send("synthesize", json!({ "text": "Recovered." })).await;
    let events = client.response().await;
    assert_eq!(events.last().unwrap().event_type, "audio-stop");
    assert_eq!(payload_bytes(&events), h.backend.expected_bytes("Recovered."));
    assert_eq!(h.backend.stats().spawned(), 2);
}

#[tokio::test]
async fn test_describe_answered_mid_synthesis() {
    let h = harness(
        ScriptedBackend::new()
            .with_delay(Duration::from_millis(20))
            .with_chunk_bytes(128),
        1,
        true,
    );
    let shutdown = CancellationToken::new();
    let (mut client, _session) = connect(&h.ctx, &shutdown);

    client.send("describe", json!({})).await;
    client.expect("info").await;
    client
        .send("synthesize", json!({ "text": "A longer sentence to stream." }))
        .await;
    client.expect("audio-start").await;
    client.send("ping", json!({ "text": "mid" })).await;

    let mut saw_pong = false;
    loop {
        let event = client.recv().await.unwrap();
        match event.event_type.as_str() {
            "pong" => saw_pong = true,
            "audio-chunk" => {}
            "audio-stop" => break,
            other => panic!("unexpected {other}"),
        }
    }
    assert!(saw_pong);
}

#[tokio::test]
async fn test_disconnect_mid_synthesis_releases_worker() {
    let h = harness(
        ScriptedBackend::new().with_behavior(ScriptedBehavior::HangAfterFirstChunk),
        1,
        true,
    );
    let shutdown = CancellationToken::new();
    let (mut client, session) = connect(&h.ctx, &shutdown);

    client.send("describe", json!({})).await;
    client.expect("info").await;
    client
        .send("synthesize", json!({ "text": "Never finishes." }))
        .await;
    client.expect("audio-start").await;
    client.expect("audio-chunk").await;
    let observer = Arc::clone(&h.observer);
    assert_eq!(observer.held(), 1);

    drop(client);
    timeout(WAIT, session).await.unwrap().unwrap().unwrap();

    let stats = h.backend.stats();
    wait_until(|| observer.held() == 0 && stats.terminated() == 1).await;
    assert_eq!(h.ctx.dispatcher.stats().busy, 0);
}

#[tokio::test]
async fn test_single_worker_serves_sessions_in_turn() {
    let h = harness(
        ScriptedBackend::new().with_delay(Duration::from_millis(5)),
        1,
        true,
    );
    let shutdown = CancellationToken::new();

    let mut tasks = Vec::new();
    for text in ["First speaker.", "Second speaker."] {
        let (mut client, _session) = connect(&h.ctx, &shutdown);
        let backend = Arc::clone(&h.backend);
        tasks.push(tokio::spawn(async move {
            client.send("describe", json!({})).await;
            client.expect("info").await;
            client.send("synthesize", json!({ "text": text })).await;
            let events = client.response().await;
            assert_eq!(events.last().unwrap().event_type, "audio-stop");
            assert_eq!(payload_bytes(&events), backend.expected_bytes(text));
        }));
    }
    for task in tasks {
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    assert_eq!(h.observer.intervals().len(), 2);
    assert!(h.observer.overlaps().is_empty());
    assert_eq!(h.backend.stats().spawned(), 1);
}

#[tokio::test]
async fn test_tcp_listener_end_to_end() {
    let h = harness(ScriptedBackend::new(), 2, true);
    let shutdown = CancellationToken::new();

    let uri: ListenUri = "tcp://127.0.0.1:0".parse().unwrap();
    let listener = Listener::bind(&uri).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve(listener, Arc::clone(&h.ctx), shutdown.clone()));

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (read, write) = stream.into_split();
    let mut client = Client {
        reader: BufReader::new(read),
        writer: write,
    };

    client.send("describe", json!({})).await;
    client.expect("info").await;
    client.send("synthesize", json!({ "text": "Over TCP." })).await;
    let events = client.response().await;
    assert_eq!(events.last().unwrap().event_type, "audio-stop");

    shutdown.cancel();
    timeout(WAIT, server).await.unwrap().unwrap();
    assert!(client.recv().await.is_none());
}
