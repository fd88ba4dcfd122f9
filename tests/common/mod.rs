//! Shared helpers for integration tests

#![allow(dead_code)]

use parley::{Chat, ChatError, ChatOptions, Message, Role};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Counts callback invocations and keeps the errors seen.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub finished: Arc<AtomicUsize>,
    pub errors: Arc<Mutex<Vec<ChatError>>>,
}

impl Callbacks {
    pub fn attach(&self, options: ChatOptions) -> ChatOptions {
        let finished = self.finished.clone();
        let errors = self.errors.clone();
        options
            .on_finish(move || {
                finished.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |err| errors.lock().unwrap().push(err.clone()))
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> Vec<ChatError> {
        self.errors.lock().unwrap().clone()
    }
}

pub fn transcript(chat: &Chat) -> Vec<(Role, String)> {
    chat.messages()
        .into_iter()
        .map(|m| (m.role, m.content))
        .collect()
}

pub fn seeded(pairs: &[(Role, &str)]) -> Vec<Message> {
    pairs.iter().map(|(role, content)| Message::new(*role, *content)).collect()
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// SSE body from a list of payloads.
pub fn sse_body(payloads: &[&str]) -> String {
    payloads.iter().map(|p| format!("data: {p}\n\n")).collect()
}

/// Backend that answers every connection with the given frames as one
/// chunk, then keeps the response open until released. A silent backend
/// reads the request and never sends response headers.
pub struct HangingBackend {
    pub endpoint: String,
    requests: Arc<AtomicUsize>,
    release: watch::Sender<bool>,
}

impl HangingBackend {
    pub async fn start(first_chunk: &str) -> Self {
        Self::spawn(Some(first_chunk.to_string())).await
    }

    pub async fn silent() -> Self {
        Self::spawn(None).await
    }

    async fn spawn(first_chunk: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (release, released) = watch::channel(false);
        let requests = Arc::new(AtomicUsize::new(0));

        let counter = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(
                    socket,
                    first_chunk.clone(),
                    counter.clone(),
                    released.clone(),
                ));
            }
        });

        Self {
            endpoint: format!("http://{addr}/chat"),
            requests,
            release,
        }
    }

    /// Requests read so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// End every open response.
    pub fn release(&self) {
        let _ = self.release.send(true);
    }
}

async fn serve(
    mut socket: TcpStream,
    first_chunk: Option<String>,
    requests: Arc<AtomicUsize>,
    mut released: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 64 * 1024];
    let _ = socket.read(&mut buf).await;
    requests.fetch_add(1, Ordering::SeqCst);

    let Some(first_chunk) = first_chunk else {
        let _ = released.wait_for(|done| *done).await;
        return;
    };

    let head = "HTTP/1.1 200 OK\r\n\
                Content-Type: text/event-stream\r\n\
                Transfer-Encoding: chunked\r\n\r\n";
    let chunk = format!("{:x}\r\n{}\r\n", first_chunk.len(), first_chunk);
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(chunk.as_bytes()).await;
    let _ = socket.flush().await;

    let _ = released.wait_for(|done| *done).await;
    let _ = socket.write_all(b"0\r\n\r\n").await;
}
