//! In-process RCON server for tests.
//!
//! Replies to every command with the command text unless told otherwise, and
//! understands a few magic commands:
//! * `drop` closes the connection without replying.
//! * `slow` waits `slow_delay` before replying and notes whether anything
//!   else arrived on the socket meanwhile.
//! * [`SUBSCRIBE_COMMAND`] marks the connection as a broadcast subscriber.

use super::ClientConfig;
use crate::socket::ReadFrame;
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::AsyncWriteExt,
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
    sync::Mutex as AsyncMutex,
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tokio_util::sync::CancellationToken;

pub(crate) const SUBSCRIBE_COMMAND: &str = "ListenToBroadcasts";

const AUTH: i32 = 3;
const EXEC: i32 = 2;
const RESPONSE_VALUE: i32 = 0;
const CHAT: i32 = 1;

#[derive(Debug, Clone)]
pub(crate) struct MockOptions {
    pub password: String,
    /// Send an empty response value ahead of the auth reply like Source servers do.
    pub source_auth: bool,
    pub slow_delay: Duration,
}

impl MockOptions {
    pub(crate) fn new(password: &str) -> Self {
        Self {
            password: password.to_string(),
            source_auth: false,
            slow_delay: Duration::from_millis(100),
        }
    }
}

type Writer = Arc<AsyncMutex<OwnedWriteHalf>>;

struct Peer {
    id: usize,
    writer: Writer,
    kick: CancellationToken,
    subscribed: Arc<AtomicBool>,
}

struct State {
    options: MockOptions,
    password: Mutex<String>,
    replies: Mutex<HashMap<String, String>>,
    commands: Mutex<Vec<String>>,
    peers: Mutex<Vec<Peer>>,
    auth_count: AtomicUsize,
    interleaved: AtomicBool,
}

pub(crate) struct MockServer {
    port: u16,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub(crate) async fn start(options: MockOptions) -> Self {
        init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let state = Arc::new(State {
            password: Mutex::new(options.password.clone()),
            options,
            replies: Mutex::default(),
            commands: Mutex::default(),
            peers: Mutex::default(),
            auth_count: AtomicUsize::new(0),
            interleaved: AtomicBool::new(false),
        });

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            let mut next_id = 0;
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(Arc::clone(&accept_state), next_id, stream));
                next_id += 1;
            }
        });

        Self { port, state, task }
    }

    pub(crate) fn config(&self) -> ClientConfig {
        ClientConfig::new("127.0.0.1", self.port, self.state.options.password.clone())
    }

    pub(crate) fn set_reply(&self, command: &str, body: &str) {
        self.state
            .replies
            .lock()
            .insert(command.to_string(), body.to_string());
    }

    pub(crate) fn set_password(&self, password: &str) {
        *self.state.password.lock() = password.to_string();
    }

    /// Every command recieved so far, across all connections.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.state.commands.lock().clone()
    }

    pub(crate) fn auth_count(&self) -> usize {
        self.state.auth_count.load(Ordering::SeqCst)
    }

    pub(crate) fn interleaved(&self) -> bool {
        self.state.interleaved.load(Ordering::SeqCst)
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.state.peers.lock().len()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.state
            .peers
            .lock()
            .iter()
            .filter(|p| p.subscribed.load(Ordering::SeqCst))
            .count()
    }

    fn subscribers(&self) -> Vec<Writer> {
        self.state
            .peers
            .lock()
            .iter()
            .filter(|p| p.subscribed.load(Ordering::SeqCst))
            .map(|p| Arc::clone(&p.writer))
            .collect()
    }

    /// Push `body` to every subscribed connection.
    pub(crate) async fn broadcast(&self, body: &str) {
        for writer in self.subscribers() {
            let _ = write(&writer, 0, CHAT, body.as_bytes()).await;
        }
    }

    /// Write `bytes` as-is to every subscribed connection.
    pub(crate) async fn push_raw(&self, bytes: &[u8]) {
        for writer in self.subscribers() {
            let _ = writer.lock().await.write_all(bytes).await;
        }
    }

    /// Close every open connection from the server side.
    pub(crate) async fn kick_all(&self) {
        let peers: Vec<Peer> = self.state.peers.lock().drain(..).collect();
        for peer in peers {
            peer.kick.cancel();
            let _ = peer.writer.lock().await.shutdown().await;
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
        for peer in self.state.peers.lock().iter() {
            peer.kick.cancel();
        }
    }
}

/// Route client logs to the test output, filtered by `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        sleep(Duration::from_millis(10)).await;
    }
}

async fn write(writer: &Writer, request_id: i32, packet_type: i32, body: &[u8]) -> std::io::Result<()> {
    let mut bytes = BytesMut::new();
    bytes.put_i32_le((body.len() + 10) as i32);
    bytes.put_i32_le(request_id);
    bytes.put_i32_le(packet_type);
    bytes.put_slice(body);
    bytes.put_u16(0);

    writer.lock().await.write_all(&bytes).await
}

async fn serve(state: Arc<State>, id: usize, stream: TcpStream) {
    let (mut reader, writer) = stream.into_split();
    let writer: Writer = Arc::new(AsyncMutex::new(writer));
    let kick = CancellationToken::new();
    let subscribed = Arc::new(AtomicBool::new(false));

    state.peers.lock().push(Peer {
        id,
        writer: Arc::clone(&writer),
        kick: kick.clone(),
        subscribed: Arc::clone(&subscribed),
    });

    let mut authed = false;

    loop {
        let frame = tokio::select! {
            () = kick.cancelled() => break,
            frame = reader.read_frame() => match frame {
                Ok(frame) => frame,
                Err(_) => break,
            },
        };

        let body = String::from_utf8_lossy(&frame.body).into_owned();

        match frame.packet_type {
            AUTH => {
                state.auth_count.fetch_add(1, Ordering::SeqCst);
                authed = body == *state.password.lock();

                if state.options.source_auth {
                    let _ = write(&writer, frame.request_id, RESPONSE_VALUE, b"").await;
                }
                let reply_id = if authed { frame.request_id } else { -1 };
                let _ = write(&writer, reply_id, EXEC, b"").await;
            }
            EXEC if !authed => {
                let _ = write(&writer, -1, RESPONSE_VALUE, b"").await;
            }
            EXEC => {
                state.commands.lock().push(body.clone());

                match body.as_str() {
                    "drop" => break,
                    "slow" => {
                        let mut buf = [0u8; 1];
                        if let Ok(Ok(n)) = timeout(state.options.slow_delay, reader.peek(&mut buf)).await {
                            if n > 0 {
                                state.interleaved.store(true, Ordering::SeqCst);
                            }
                        }
                    }
                    SUBSCRIBE_COMMAND => subscribed.store(true, Ordering::SeqCst),
                    _ => {}
                }

                let reply = state.replies.lock().get(&body).cloned().unwrap_or(body);
                let _ = write(&writer, frame.request_id, RESPONSE_VALUE, reply.as_bytes()).await;
            }
            _ => {}
        }
    }

    state.peers.lock().retain(|p| p.id != id);
    let _ = writer.lock().await.shutdown().await;
}
