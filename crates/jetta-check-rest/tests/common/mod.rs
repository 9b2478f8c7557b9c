//! Shared stub HTTP server for request client integration tests.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Runtime;
use tracing_subscriber::fmt::MakeWriter;
use wiremock::{Mock, MockServer, Request};

/// Stub server plus the runtime used to drive its setup futures.
///
/// The server itself runs on its own thread, so the blocking client can be
/// called directly from the test thread.
pub struct StubServer {
    runtime: Runtime,
    server: MockServer,
}

impl StubServer {
    /// Starts a fresh stub server.
    pub fn start() -> Self {
        let runtime = Runtime::new().expect("tokio runtime should start");
        let server = runtime.block_on(MockServer::start());
        Self { runtime, server }
    }

    /// Registers one mock.
    pub fn mount(&self, mock: Mock) {
        self.runtime.block_on(mock.mount(&self.server));
    }

    /// Absolute URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    /// Requests received so far, oldest first.
    #[allow(dead_code)]
    pub fn received(&self) -> Vec<Request> {
        self.runtime
            .block_on(self.server.received_requests())
            .expect("request recording should be enabled")
    }
}

/// In-memory log sink for asserting on emitted log lines.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl CapturedLogs {
    /// Runs `f` with a plain-text subscriber writing into this sink.
    pub fn capture<T>(&self, f: impl FnOnce() -> T) -> T {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }

    /// Everything written so far.
    pub fn text(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Lines containing `needle`.
    pub fn lines_with(&self, needle: &str) -> Vec<String> {
        self.text()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
