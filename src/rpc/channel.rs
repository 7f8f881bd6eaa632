//! msgpack-rpc channel
//!
//! Request/response correlation by message id, fire-and-forget
//! notifications, and an explicit inbound queue for messages the peer
//! originates. Inbound requests are answered by the I/O task itself so the
//! peer never waits on us; the owner drains the queue when it wants to
//! look at what arrived.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use rmpv::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Level, debug, error, trace, warn};

use crate::io::transport::Transport;
use crate::rpc::codec::{MessageDecoder, encode_message};
use crate::rpc::error::RpcError;
use crate::rpc::protocol::{RemoteError, RpcMessage};
use crate::{log_rpc_message, log_timing};

/// How long `close` waits for queued messages to be written
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

type PendingReply = oneshot::Sender<Result<Value, RemoteError>>;
type PendingTable = Arc<Mutex<HashMap<u64, PendingReply>>>;

/// Message originated by the peer
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A request; it has already been answered with an error reply
    Request { method: String, params: Vec<Value> },
    /// A notification
    Notification { method: String, params: Vec<Value> },
}

/// Bidirectional msgpack-rpc channel over a transport
pub struct RpcChannel {
    /// Outbound messages for the I/O task; taken on close
    outbound: Option<mpsc::UnboundedSender<RpcMessage>>,

    /// Next request id
    next_id: AtomicU32,

    /// Calls waiting for their response, keyed by message id
    pending: PendingTable,

    /// Peer-originated messages waiting to be drained
    inbound: mpsc::UnboundedReceiver<InboundMessage>,

    /// Per-call timeout
    request_timeout: Duration,

    /// I/O task handle
    io_task: Option<JoinHandle<()>>,
}

impl RpcChannel {
    /// Create a channel and start its I/O task
    pub fn new<T: Transport + 'static>(transport: T, request_timeout: Duration) -> Self {
        let (outbound, outbound_receiver) = mpsc::unbounded_channel();
        let (inbound_sender, inbound) = mpsc::unbounded_channel();
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));

        let io_task = tokio::spawn(Self::io_loop(
            transport,
            outbound_receiver,
            Arc::clone(&pending),
            inbound_sender,
        ));

        Self {
            outbound: Some(outbound),
            next_id: AtomicU32::new(1),
            pending,
            inbound,
            request_timeout,
            io_task: Some(io_task),
        }
    }

    /// Send a request and wait for the matching response
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let start = Instant::now();
        let id = u64::from(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (reply_sender, reply_receiver) = oneshot::channel();

        self.pending.lock().await.insert(id, reply_sender);

        log_rpc_message!(Level::DEBUG, "outgoing", method, &params);
        let request = RpcMessage::Request {
            id,
            method: method.to_string(),
            params,
        };

        if self.send_outbound(request).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(RpcError::ChannelClosed);
        }

        let reply = match tokio::time::timeout(self.request_timeout, reply_receiver).await {
            Ok(Ok(reply)) => reply,
            // Sender dropped: the I/O task ended before the response arrived
            Ok(Err(_)) => return Err(RpcError::ChannelClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout: self.request_timeout,
                });
            }
        };

        log_timing!(Level::TRACE, method, start.elapsed());

        reply.map_err(|error| RpcError::Remote {
            method: method.to_string(),
            error,
        })
    }

    /// Send a notification without waiting for anything
    pub fn notify(&self, method: &str, params: Vec<Value>) -> Result<(), RpcError> {
        log_rpc_message!(Level::DEBUG, "outgoing", method, &params);
        self.send_outbound(RpcMessage::Notification {
            method: method.to_string(),
            params,
        })
    }

    fn send_outbound(&self, message: RpcMessage) -> Result<(), RpcError> {
        self.outbound
            .as_ref()
            .ok_or(RpcError::ChannelClosed)?
            .send(message)
            .map_err(|_| RpcError::ChannelClosed)
    }

    /// Take every inbound message received so far
    pub fn drain_inbound(&mut self) -> Vec<InboundMessage> {
        let mut drained = Vec::new();
        while let Ok(message) = self.inbound.try_recv() {
            drained.push(message);
        }
        drained
    }

    /// Whether the I/O task is still running
    pub fn is_connected(&self) -> bool {
        self.outbound
            .as_ref()
            .is_some_and(|outbound| !outbound.is_closed())
    }

    /// Flush queued messages, stop the I/O task and fail every call still waiting
    pub async fn close(&mut self) {
        let abandoned = {
            let mut pending = self.pending.lock().await;
            let count = pending.len();
            pending.clear();
            count
        };
        if abandoned > 0 {
            warn!("RpcChannel: Abandoning {} pending requests on close", abandoned);
        }

        // The I/O task sends everything already queued before it sees the end
        self.outbound.take();

        if let Some(mut task) = self.io_task.take() {
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                debug!("RpcChannel: I/O task did not finish flushing, aborting");
                task.abort();
            }
        }
    }

    async fn io_loop<T: Transport>(
        transport: T,
        mut outbound: mpsc::UnboundedReceiver<RpcMessage>,
        pending: PendingTable,
        inbound: mpsc::UnboundedSender<InboundMessage>,
    ) {
        let mut decoder = MessageDecoder::new();

        loop {
            tokio::select! {
                // Outbound messages (prioritized)
                biased;

                message = outbound.recv() => {
                    let Some(message) = message else {
                        trace!("RpcChannel: outbound side dropped");
                        break;
                    };
                    if let Err(e) = Self::send_message(&transport, message).await {
                        error!("RpcChannel: Failed to send message: {}", e);
                        break;
                    }
                }
                chunk = transport.receive() => {
                    let bytes = match chunk {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            debug!("RpcChannel: transport closed: {}", e);
                            break;
                        }
                    };
                    if let Err(e) = decoder.push(&bytes) {
                        error!("RpcChannel: {}", e);
                        break;
                    }
                    if !Self::dispatch_buffered(&transport, &mut decoder, &pending, &inbound).await {
                        break;
                    }
                }
            }
        }

        if decoder.buffered() > 0 {
            debug!(
                "RpcChannel: Dropping {} bytes of an incomplete message",
                decoder.buffered()
            );
        }

        // Refuse new calls first, then wake every waiting call with ChannelClosed
        outbound.close();
        pending.lock().await.clear();
        let _ = transport.close().await;
        trace!("RpcChannel: I/O task finished");
    }

    /// Dispatch every complete message in the decoder; false stops the loop
    async fn dispatch_buffered<T: Transport>(
        transport: &T,
        decoder: &mut MessageDecoder,
        pending: &PendingTable,
        inbound: &mpsc::UnboundedSender<InboundMessage>,
    ) -> bool {
        loop {
            let message = match decoder.next_message() {
                Ok(Some(message)) => message,
                Ok(None) => return true,
                Err(RpcError::InvalidMessage(reason)) => {
                    warn!("RpcChannel: Skipping invalid message: {}", reason);
                    continue;
                }
                Err(RpcError::InvalidRequest { id, reason }) => {
                    warn!("RpcChannel: Rejecting invalid request {}: {}", id, reason);
                    let reply = RpcMessage::failure(id, format!("invalid request: {reason}"));
                    if let Err(e) = Self::send_message(transport, reply).await {
                        error!("RpcChannel: Failed to answer inbound request: {}", e);
                        return false;
                    }
                    continue;
                }
                Err(e) => {
                    error!("RpcChannel: Undecodable stream: {}", e);
                    return false;
                }
            };

            match message {
                RpcMessage::Response { id, error, result } => {
                    log_rpc_message!(Level::DEBUG, "incoming", "response", &result);
                    let reply = if error.is_nil() {
                        Ok(result)
                    } else {
                        Err(RemoteError::from_value(&error))
                    };
                    match pending.lock().await.remove(&id) {
                        Some(sender) => {
                            if sender.send(reply).is_err() {
                                debug!("RpcChannel: Caller for request {} went away", id);
                            }
                        }
                        None => debug!("RpcChannel: Response for unknown request {}", id),
                    }
                }
                RpcMessage::Request { id, method, params } => {
                    log_rpc_message!(Level::DEBUG, "incoming", &method, &params);
                    let reply = RpcMessage::failure(id, format!("request not handled: {method}"));
                    if let Err(e) = Self::send_message(transport, reply).await {
                        error!("RpcChannel: Failed to answer inbound request: {}", e);
                        return false;
                    }
                    let _ = inbound.send(InboundMessage::Request { method, params });
                }
                RpcMessage::Notification { method, params } => {
                    log_rpc_message!(Level::DEBUG, "incoming", &method, &params);
                    let _ = inbound.send(InboundMessage::Notification { method, params });
                }
            }
        }
    }

    async fn send_message<T: Transport>(transport: &T, message: RpcMessage) -> Result<(), RpcError> {
        let bytes = encode_message(message)?;
        transport
            .send(&bytes)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }
}

impl Drop for RpcChannel {
    fn drop(&mut self) {
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
    }
}
