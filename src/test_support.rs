//! In-process HTTP stand-in for unit tests that need to exercise a client's
//! request/response handling without a real network call or a mocking
//! framework dependency. Binds an ephemeral loopback port, serves one canned
//! response per accepted connection, then falls silent once the queue is
//! empty.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub struct MockResponse {
    pub status: u16,
    pub body: String,
}

impl MockResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }
}

pub struct MockServer {
    pub base_url: String,
}

impl MockServer {
    /// Starts serving `responses` in order, one per accepted connection.
    /// Requests beyond the queue's length get a 500 so a test over-calling
    /// the server fails loudly instead of hanging.
    pub async fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
        let addr = listener.local_addr().expect("read local addr");
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { break };
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 8192];
                    let _ = stream.read(&mut buf).await;

                    let next = queue.lock().expect("queue lock").pop_front();
                    let (status, body) = match next {
                        Some(r) => (r.status, r.body),
                        None => (500, "mock server queue exhausted".to_string()),
                    };
                    let payload = format!(
                        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n{body}",
                        reason = reason_phrase(status),
                        len = body.len(),
                    );
                    let _ = stream.write_all(payload.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self { base_url: format!("http://{addr}") }
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        409 => "Conflict",
        429 => "Too Many Requests",
        _ if status >= 500 => "Internal Server Error",
        _ => "Error",
    }
}
