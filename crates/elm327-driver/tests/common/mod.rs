//! In-memory ELM327 adapter for driver tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;

/// How the mock answers one command
#[derive(Debug, Clone)]
pub enum Reply {
    /// Write the text followed by a prompt
    Now(String),
    /// Wait, then write the text followed by a prompt
    After(Duration, String),
    /// Close the connection
    Hangup,
}

impl Reply {
    pub fn now(text: &str) -> Self {
        Reply::Now(text.to_string())
    }

    pub fn after(ms: u64, text: &str) -> Self {
        Reply::After(Duration::from_millis(ms), text.to_string())
    }
}

/// Scripted adapter: OBD commands are answered from per-command reply
/// queues, AT commands with `OK`, unknown commands with `NO DATA`.
#[derive(Default)]
pub struct MockAdapter {
    script: HashMap<String, VecDeque<Reply>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for a command; the last reply for a command repeats
    pub fn on(mut self, command: &str, reply: Reply) -> Self {
        self.script.entry(command.to_string()).or_default().push_back(reply);
        self
    }

    /// Start serving; returns the driver side of the link and the log of
    /// commands received
    pub fn spawn(self) -> (DuplexStream, Arc<Mutex<Vec<String>>>, JoinHandle<()>) {
        let (client, server) = duplex(4096);
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);
        let task = tokio::spawn(self.serve(server, log));
        (client, received, task)
    }

    fn next_reply(&mut self, command: &str) -> Reply {
        if command.is_empty() {
            return Reply::now("");
        }
        if command == "ATZ" {
            return Reply::now("\r\rELM327 v1.5\r");
        }
        if command.starts_with("AT") {
            return Reply::now("OK\r");
        }
        match self.script.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| Reply::now("NO DATA\r")),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| Reply::now("NO DATA\r")),
            None => Reply::now("NO DATA\r"),
        }
    }

    async fn serve(mut self, mut stream: DuplexStream, log: Arc<Mutex<Vec<String>>>) {
        let mut buffer = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match stream.read(&mut byte).await {
                Ok(0) | Err(_) => break,
                Ok(_) if byte[0] == b'\r' => {
                    let command = String::from_utf8_lossy(&buffer).trim().to_uppercase();
                    buffer.clear();
                    log.lock().unwrap().push(command.clone());
                    let text = match self.next_reply(&command) {
                        Reply::Now(text) => text,
                        Reply::After(delay, text) => {
                            tokio::time::sleep(delay).await;
                            text
                        }
                        Reply::Hangup => break,
                    };
                    let response = format!("{}\r>", text);
                    if stream.write_all(response.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Ok(_) if byte[0] == b'\n' => {}
                Ok(_) => buffer.push(byte[0]),
            }
        }
    }
}

/// Transport whose writes always fail and whose reads never complete
pub struct BrokenTransport;

impl AsyncRead for BrokenTransport {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenTransport {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "adapter unplugged")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
