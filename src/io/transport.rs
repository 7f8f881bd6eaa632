//! Transport layer - Pure I/O abstraction for byte exchange
//!
//! This module provides the core transport abstraction that handles
//! bidirectional byte exchange without knowledge of message format
//! or process management. Framing lives one layer up in `crate::rpc`.

use async_trait::async_trait;
#[cfg(test)]
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
#[cfg(test)]
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tracing::{error, trace};

// ============================================================================
// Constants
// ============================================================================

/// Size of the read buffer for stream reading operations
const READ_BUFFER_SIZE: usize = 8192;

/// Core transport trait for bidirectional byte exchange
///
/// Methods take `&self` so a single owner can wait on `receive` while
/// concurrently pushing outbound bytes through `send`.
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a chunk of raw bytes
    async fn send(&self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Receive the next chunk of raw bytes as it arrived from the peer
    async fn receive(&self) -> Result<Vec<u8>, Self::Error>;

    /// Close the transport
    async fn close(&self) -> Result<(), Self::Error>;

    /// Check if transport is still active
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Stream Transport Implementation
// ============================================================================

/// Error types for stream transports
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Transport over any async reader/writer pair
///
/// Reading and writing happen on background tasks; this handle only
/// talks to them through channels.
#[derive(Debug)]
pub struct StreamTransport {
    /// Channel feeding the writer task
    writer: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,

    /// Channel fed by the reader task
    reader: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,

    /// Connection status
    connected: AtomicBool,
}

/// Transport bound to a child process's stdin/stdout
pub type StdioTransport = StreamTransport;

impl StreamTransport {
    /// Create a new transport reading from `reader` and writing to `writer`
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_sender, writer_receiver) = mpsc::unbounded_channel();
        let (reader_sender, reader_receiver) = mpsc::unbounded_channel();

        tokio::spawn(Self::writer_task(writer, writer_receiver));
        tokio::spawn(Self::reader_task(reader, reader_sender));

        Self {
            writer: Mutex::new(Some(writer_sender)),
            reader: tokio::sync::Mutex::new(reader_receiver),
            connected: AtomicBool::new(true),
        }
    }

    /// Create a transport from child process streams
    pub fn from_child(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self::new(stdout, stdin)
    }

    /// Background task that writes chunks to the stream
    async fn writer_task<W>(mut writer: W, mut receiver: mpsc::UnboundedReceiver<Vec<u8>>)
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(bytes) = receiver.recv().await {
            trace!("StreamTransport: Writing {} bytes", bytes.len());

            if let Err(e) = writer.write_all(&bytes).await {
                error!("Failed to write to stream: {}", e);
                break;
            }

            if let Err(e) = writer.flush().await {
                error!("Failed to flush stream: {}", e);
                break;
            }
        }

        let _ = writer.shutdown().await;
        trace!("StreamTransport: writer task finished");
    }

    /// Background task that forwards every chunk read from the stream
    async fn reader_task<R>(mut reader: R, sender: mpsc::UnboundedSender<Vec<u8>>)
    where
        R: AsyncRead + Unpin,
    {
        let mut read_buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match reader.read(&mut read_buffer).await {
                Ok(0) => {
                    trace!("StreamTransport: reader reached EOF");
                    break;
                }
                Ok(n) => {
                    if sender.send(read_buffer[..n].to_vec()).is_err() {
                        trace!("StreamTransport: receiver dropped, stopping reader");
                        return;
                    }
                }
                Err(e) => {
                    error!("Failed to read from stream: {}", e);
                    break;
                }
            }
        }

        trace!("StreamTransport: reader task finished");
    }
}

#[async_trait]
impl Transport for StreamTransport {
    type Error = TransportError;

    async fn send(&self, bytes: &[u8]) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        let writer = self.writer.lock().unwrap();
        let sender = writer.as_ref().ok_or(TransportError::Disconnected)?;

        sender
            .send(bytes.to_vec())
            .map_err(|e| TransportError::Channel(e.to_string()))
    }

    async fn receive(&self) -> Result<Vec<u8>, Self::Error> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        let mut reader = self.reader.lock().await;
        reader.recv().await.ok_or(TransportError::Disconnected)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the sender lets the writer task flush and shut the stream down
        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        self.writer.lock().unwrap().take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Mock Transport Implementation
// ============================================================================

/// Error type for mock transport
#[cfg(test)]
#[derive(Debug, thiserror::Error)]
pub enum MockTransportError {
    #[error("Transport is disconnected")]
    Disconnected,
    #[error("No more responses available")]
    NoMoreResponses,
}

/// Mock transport for testing - allows controlling sent/received bytes
#[cfg(test)]
#[derive(Clone)]
pub struct MockTransport {
    /// Chunks that were sent via this transport
    sent: Arc<Mutex<Vec<Vec<u8>>>>,

    /// Predefined chunks to return when receive() is called
    responses: Arc<Mutex<VecDeque<Vec<u8>>>>,

    /// Connection status
    connected: Arc<AtomicBool>,
}

#[cfg(test)]
impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create a mock transport with predefined responses
    pub fn with_responses(responses: Vec<Vec<u8>>) -> Self {
        let transport = Self::new();
        transport.responses.lock().unwrap().extend(responses);
        transport
    }

    /// Add a chunk that will be returned by the next receive() call
    pub fn add_response(&self, response: Vec<u8>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Get all chunks that were sent via this transport
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn send(&self, bytes: &[u8]) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(MockTransportError::Disconnected);
        }

        self.sent.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<u8>, Self::Error> {
        if !self.is_connected() {
            return Err(MockTransportError::Disconnected);
        }

        let next = self.responses.lock().unwrap().pop_front();
        next.ok_or(MockTransportError::NoMoreResponses)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Tests
// ============================================================================
