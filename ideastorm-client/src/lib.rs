//! Reconnecting WebSocket helper for ideastorm clients.
//!
//! Presents one always-available send/receive surface across transport
//! drops. Reconnects forever with capped exponential backoff, by design:
//! the only way to stop retrying is an explicit [ReconnectingSocket::disconnect].

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{net::TcpStream, select, sync::mpsc, task::JoinHandle, time::sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// Delay before the first reconnect attempt.
pub const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Consecutive failures back off up to this much, never further.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

pub type HandlerId = u64;

type MessageHandler = Box<dyn Fn(&str) + Send + Sync>;
type StatusHandler = Box<dyn Fn(bool) + Send + Sync>;

type Transport = WebSocketStream<MaybeTlsStream<TcpStream>>;

static HANDLER_COUNTER: AtomicCell<HandlerId> = AtomicCell::new(1);

/// A single logical connection that survives underlying transport drops.
pub struct ReconnectingSocket {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    endpoint: String,
    shutdown: AtomicBool,
    connected: AtomicBool,
    /// Present only while a transport is up.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    message_handlers: DashMap<HandlerId, MessageHandler>,
    status_handlers: DashMap<HandlerId, StatusHandler>,
}

impl ReconnectingSocket {
    /// Starts connecting to the endpoint, retrying forever in the
    /// background until [Self::disconnect] is called.
    pub fn connect(endpoint: impl Into<String>) -> Self {
        let inner = Arc::new(Inner::new(endpoint.into()));
        let task = tokio::spawn(run_loop(inner.clone()));

        Self {
            inner,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Attempts immediate delivery. Returns false without queueing when
    /// no transport is up; callers own retry and UX.
    pub fn send<S: Serialize>(&self, message: &S) -> bool {
        let outbound = self.inner.outbound.lock();

        let Some(sender) = outbound.as_ref() else {
            return false;
        };

        let Ok(text) = serde_json::to_string(message) else {
            return false;
        };

        sender.send(text).is_ok()
    }

    /// Registers an observer for inbound text frames.
    pub fn add_message_handler(&self, handler: impl Fn(&str) + Send + Sync + 'static) -> HandlerId {
        let id = HANDLER_COUNTER.fetch_add(1);
        self.inner.message_handlers.insert(id, Box::new(handler));
        id
    }

    /// Removing an already-removed handler is a no-op.
    pub fn remove_message_handler(&self, id: HandlerId) {
        self.inner.message_handlers.remove(&id);
    }

    /// Registers an observer for connectivity changes (true = up).
    pub fn add_status_handler(&self, handler: impl Fn(bool) + Send + Sync + 'static) -> HandlerId {
        let id = HANDLER_COUNTER.fetch_add(1);
        self.inner.status_handlers.insert(id, Box::new(handler));
        id
    }

    pub fn remove_status_handler(&self, id: HandlerId) {
        self.inner.status_handlers.remove(&id);
    }

    /// Tears the connection down and stops the retry loop for good.
    pub fn disconnect(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);

        // Dropping the sender makes the pump loop exit.
        self.inner.outbound.lock().take();

        if let Some(task) = self.task.lock().take() {
            task.abort();
        }

        self.inner.set_connected(false);
    }
}

impl Drop for ReconnectingSocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Inner {
    fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            shutdown: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            outbound: Mutex::new(None),
            message_handlers: Default::default(),
            status_handlers: Default::default(),
        }
    }

    fn set_connected(&self, up: bool) {
        let was = self.connected.swap(up, Ordering::SeqCst);

        if was != up {
            for handler in self.status_handlers.iter() {
                handler.value()(up);
            }
        }
    }

    fn dispatch_message(&self, text: &str) {
        for handler in self.message_handlers.iter() {
            handler.value()(text);
        }
    }

    /// Drives one live transport until it drops.
    async fn pump(&self, transport: Transport) {
        let (mut sink, mut stream) = transport.split();
        let (sender, mut outbound) = mpsc::unbounded_channel();

        *self.outbound.lock() = Some(sender);

        loop {
            select! {
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => self.dispatch_message(&text),
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("Transport errored: {}", err);
                        break;
                    }
                },
                outgoing = outbound.recv() => match outgoing {
                    Some(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    // disconnect() dropped the sender
                    None => break,
                }
            }
        }

        self.outbound.lock().take();
    }
}

async fn run_loop(inner: Arc<Inner>) {
    let mut delay = INITIAL_RECONNECT_DELAY;

    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }

        match connect_async(inner.endpoint.as_str()).await {
            Ok((transport, _)) => {
                info!("Connected to {}", inner.endpoint);

                delay = INITIAL_RECONNECT_DELAY;
                inner.set_connected(true);

                inner.pump(transport).await;

                inner.set_connected(false);
                warn!("Disconnected from {}", inner.endpoint);
            }
            Err(err) => {
                warn!("Failed to connect to {}: {}", inner.endpoint, err);
            }
        }

        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }

        sleep(delay).await;
        delay = next_delay(delay);
    }
}

/// Exponential backoff with a ceiling.
fn next_delay(current: Duration) -> Duration {
    (current * 3 / 2).min(MAX_RECONNECT_DELAY)
}
