//! Duplex message channel to the provider endpoint.
//!
//! Inbound frames are buffered FIFO. A read drains the buffer or becomes the
//! single waiting consumer for the next arrival; a second concurrent reader is
//! refused with [`McpError::ReaderBusy`].

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::errors::McpError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Delivery = Result<String, McpError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

struct InboxState {
    buffer: VecDeque<String>,
    waiter: Option<oneshot::Sender<Delivery>>,
    state: ChannelState,
}

/// Inbound half of the channel: message buffer plus the single reader slot.
pub struct Inbox {
    inner: Mutex<InboxState>,
}

impl Inbox {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(InboxState {
                buffer: VecDeque::new(),
                waiter: None,
                state: ChannelState::Connecting,
            }),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.inner.lock().state
    }

    pub fn mark_open(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ChannelState::Connecting {
            inner.state = ChannelState::Open;
        }
    }

    /// Hand an arrived message to the waiting reader, or buffer it.
    pub fn deliver(&self, message: String) {
        let mut inner = self.inner.lock();
        match inner.waiter.take() {
            Some(waiter) => {
                // The reader gave up waiting; keep the message for the next one.
                if let Err(Ok(message)) = waiter.send(Ok(message)) {
                    inner.buffer.push_back(message);
                }
            }
            None => inner.buffer.push_back(message),
        }
    }

    /// Mark the channel closed and fail a pending reader.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.state = ChannelState::Closed;
        if let Some(waiter) = inner.waiter.take() {
            let _ = waiter.send(Err(McpError::Closed));
        }
    }

    /// Next whole message. Buffered messages still drain after close.
    pub async fn next(&self) -> Result<String, McpError> {
        let rx = {
            let mut inner = self.inner.lock();
            if let Some(message) = inner.buffer.pop_front() {
                return Ok(message);
            }
            if inner.state == ChannelState::Closed {
                return Err(McpError::Closed);
            }
            if inner.waiter.as_ref().is_some_and(|w| !w.is_closed()) {
                return Err(McpError::ReaderBusy);
            }
            let (tx, rx) = oneshot::channel();
            inner.waiter = Some(tx);
            rx
        };
        rx.await.unwrap_or(Err(McpError::Closed))
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Websocket connection to a provider endpoint.
pub struct Channel {
    endpoint: String,
    inbox: Arc<Inbox>,
    sink: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Channel {
    pub async fn open(endpoint: &str) -> Result<Arc<Self>, McpError> {
        let inbox = Arc::new(Inbox::new());
        debug!("Connecting channel to {}", endpoint);

        let (stream, _response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| McpError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        let (sink, source) = stream.split();

        inbox.mark_open();
        let pump = tokio::spawn(pump(source, inbox.clone()));

        Ok(Arc::new(Self {
            endpoint: endpoint.to_string(),
            inbox,
            sink: tokio::sync::Mutex::new(sink),
            pump: Mutex::new(Some(pump)),
        }))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ChannelState {
        self.inbox.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub async fn write(&self, message: String) -> Result<(), McpError> {
        if !self.is_open() {
            return Err(McpError::NotConnected);
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(message.into()))
            .await
            .map_err(|e| McpError::Transport(format!("failed to send message: {e}")))
    }

    pub async fn read(&self) -> Result<String, McpError> {
        self.inbox.next().await
    }

    /// Close the connection. Errors from an already-dead socket are ignored.
    pub async fn close(&self) {
        if self.state() == ChannelState::Closed {
            return;
        }
        self.inbox.close();
        {
            let mut sink = self.sink.lock().await;
            if let Err(e) = sink.close().await {
                debug!("Ignoring error while closing channel to {}: {}", self.endpoint, e);
            }
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

async fn pump(mut source: SplitStream<WsStream>, inbox: Arc<Inbox>) {
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => inbox.deliver(text.as_str().to_owned()),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => inbox.deliver(text),
                Err(e) => warn!("Dropping non-UTF-8 binary frame: {}", e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Channel read failed: {}", e);
                break;
            }
        }
    }
    inbox.close();
}
