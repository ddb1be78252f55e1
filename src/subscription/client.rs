//! Reconnecting WebSocket client for the notification feed.
//!
//! # Responsibilities
//! - Perform the initial handshake with bounded retries
//! - Remember subscribed topics and replay them after every reconnect
//! - Decode frames into `InboundEvent`s and queue them for the consumer
//! - Track the best block height from new-block notifications
//! - Reconnect forever with jittered backoff until shut down

use futures_util::{SinkExt, StreamExt};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::SubscriptionConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::{with_deadline, BackoffPolicy};
use crate::subscription::best_block::BestBlock;
use crate::subscription::codec;
use crate::subscription::types::{ConnectionState, InboundEvent, SubscriptionError, Topic};
use crate::subscription::Subscriptions;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Command {
    Subscribe(Topic),
    Unsubscribe(Topic),
}

/// State shared between the client handle and its connection task.
struct Shared {
    topics: Mutex<BTreeSet<Topic>>,
    state: watch::Sender<ConnectionState>,
    best_block: BestBlock,
}

impl Shared {
    /// Move to `next` unless the client is already closed.
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::Closed || *current == next {
                return false;
            }
            tracing::debug!(from = ?*current, to = ?next, "Feed connection state change");
            *current = next;
            true
        });
    }

    fn close(&self) {
        self.state.send_replace(ConnectionState::Closed);
    }

    fn topics(&self) -> Vec<Topic> {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

/// Persistent, self-healing subscription to a notification feed.
pub struct SubscriptionClient {
    endpoint: String,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    events: tokio::sync::Mutex<mpsc::Receiver<InboundEvent>>,
    shutdown: Shutdown,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionClient {
    /// Connect to the feed described by `config`.
    ///
    /// Fails only if the first handshake cannot complete within
    /// `connect_retries` attempts. Later disconnects are handled internally.
    pub async fn connect(config: &SubscriptionConfig) -> Result<Self, SubscriptionError> {
        let endpoint = config.endpoint.clone();
        match url::Url::parse(&endpoint) {
            Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
            Ok(url) => {
                return Err(SubscriptionError::Endpoint {
                    endpoint,
                    reason: format!("unsupported scheme '{}'", url.scheme()),
                })
            }
            Err(e) => {
                return Err(SubscriptionError::Endpoint {
                    endpoint,
                    reason: e.to_string(),
                })
            }
        }

        let backoff = BackoffPolicy::new(config.backoff_base_ms, config.backoff_max_ms);
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let attempts = config.connect_retries.max(1);

        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            topics: Mutex::new(BTreeSet::new()),
            state,
            best_block: BestBlock::new(),
        });

        shared.set_state(ConnectionState::Connecting);
        let mut last_error = String::new();
        let mut stream = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(backoff.delay(attempt - 1)).await;
            }
            match open(&endpoint, connect_timeout).await {
                Ok(ws) => {
                    stream = Some(ws);
                    break;
                }
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, attempt, error = %e, "Feed handshake failed");
                    last_error = e;
                }
            }
        }

        let Some(stream) = stream else {
            shared.set_state(ConnectionState::Disconnected);
            return Err(SubscriptionError::Connection {
                endpoint,
                attempts,
                reason: last_error,
            });
        };

        tracing::info!(endpoint = %endpoint, "Connected to notification feed");

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::channel(config.event_buffer.max(1));
        let shutdown = Shutdown::new();

        let connection = Connection {
            endpoint: endpoint.clone(),
            shared: shared.clone(),
            commands: command_rx,
            events: event_tx,
            shutdown: shutdown.subscribe(),
            backoff,
            connect_timeout,
        };
        let task = tokio::spawn(connection.run(stream));

        Ok(Self {
            endpoint,
            shared,
            commands,
            events: tokio::sync::Mutex::new(events),
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Register interest in `topic`. Subscribing twice is a no-op.
    pub fn subscribe(&self, topic: Topic) {
        let inserted = self
            .shared
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.clone());
        if !inserted {
            return;
        }
        tracing::debug!(%topic, "Subscribing");
        let _ = self.commands.send(Command::Subscribe(topic));
    }

    /// Drop interest in `topic`. Events already in flight may still arrive.
    pub fn unsubscribe(&self, topic: &Topic) {
        let removed = self
            .shared
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        if !removed {
            return;
        }
        tracing::debug!(%topic, "Unsubscribing");
        let _ = self.commands.send(Command::Unsubscribe(topic.clone()));
    }

    /// Wait for the next decoded event.
    ///
    /// Returns `None` once the client has been shut down; transient
    /// disconnects only delay delivery.
    pub async fn next_event(&self) -> Option<InboundEvent> {
        let mut state = self.shared.state.subscribe();
        let mut events = self.events.lock().await;
        loop {
            if *state.borrow_and_update() == ConnectionState::Closed {
                return None;
            }
            tokio::select! {
                biased;
                changed = state.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                event = events.recv() => return event,
            }
        }
    }

    /// Most recently observed block height.
    pub fn best_block_height(&self) -> u64 {
        self.shared.best_block.height()
    }

    /// Handle to the best block height, for injection elsewhere.
    pub fn best_block(&self) -> BestBlock {
        self.shared.best_block.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Topics that will be replayed on the next reconnect.
    pub fn subscribed_topics(&self) -> Vec<Topic> {
        self.shared.topics()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Close the connection and release any consumer blocked in `next_event`.
    pub async fn shutdown(&self) {
        self.shared.close();
        self.shutdown.trigger();

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Feed connection task ended abnormally");
            }
            tracing::info!(endpoint = %self.endpoint, "Notification feed closed");
        }
    }
}

impl Subscriptions for SubscriptionClient {
    fn subscribe(&self, topic: Topic) {
        SubscriptionClient::subscribe(self, topic);
    }

    fn unsubscribe(&self, topic: &Topic) {
        SubscriptionClient::unsubscribe(self, topic);
    }
}

impl Drop for SubscriptionClient {
    fn drop(&mut self) {
        self.shared.close();
        self.shutdown.trigger();
    }
}

impl std::fmt::Debug for SubscriptionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionClient")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("best_block", &self.best_block_height())
            .finish()
    }
}

async fn open(endpoint: &str, limit: Duration) -> Result<WsStream, String> {
    match with_deadline(limit, connect_async(endpoint)).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Why a live connection stopped being driven.
enum Exit {
    Shutdown,
    Lost(String),
}

/// The background task owning the socket.
struct Connection {
    endpoint: String,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::Sender<InboundEvent>,
    shutdown: broadcast::Receiver<()>,
    backoff: BackoffPolicy,
    connect_timeout: Duration,
}

impl Connection {
    async fn run(mut self, mut stream: WsStream) {
        loop {
            match self.drive(stream).await {
                Exit::Shutdown => break,
                Exit::Lost(reason) => {
                    tracing::warn!(endpoint = %self.endpoint, %reason, "Feed connection lost");
                    self.shared.set_state(ConnectionState::Disconnected);
                }
            }

            stream = match self.reconnect().await {
                Some(stream) => stream,
                None => break,
            };
        }

        self.shared.close();
        tracing::debug!(endpoint = %self.endpoint, "Feed connection task exiting");
    }

    async fn drive(&mut self, stream: WsStream) -> Exit {
        let (mut write, mut read) = stream.split();

        // The topic set is authoritative; queued commands are already in it.
        while self.commands.try_recv().is_ok() {}
        for topic in self.shared.topics() {
            let frame = codec::subscribe_request(&topic);
            if let Err(e) = write.send(Message::Text(frame.into())).await {
                return Exit::Lost(e.to_string());
            }
        }
        self.shared.set_state(ConnectionState::Active);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Exit::Shutdown;
                }
                Some(command) = self.commands.recv() => {
                    let frame = match command {
                        Command::Subscribe(topic) => codec::subscribe_request(&topic),
                        Command::Unsubscribe(topic) => codec::unsubscribe_request(&topic),
                    };
                    if let Err(e) = write.send(Message::Text(frame.into())).await {
                        return Exit::Lost(e.to_string());
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let Some(event) = self.decode(text.as_str()) else {
                                continue;
                            };
                            if !self.deliver(event).await {
                                let _ = write.send(Message::Close(None)).await;
                                return Exit::Shutdown;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                return Exit::Lost(e.to_string());
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Exit::Lost(format!("closed by server: {:?}", frame));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Exit::Lost(e.to_string()),
                        None => return Exit::Lost("stream ended".to_string()),
                    }
                }
            }
        }
    }

    fn decode(&self, text: &str) -> Option<InboundEvent> {
        match codec::decode_frame(text) {
            Ok(Some(event)) => {
                metrics::record_feed_event(event.kind());
                if let InboundEvent::NewBlock { height, hash } = &event {
                    self.shared.best_block.set(*height);
                    tracing::debug!(height, %hash, "New block");
                }
                Some(event)
            }
            Ok(None) => {
                tracing::debug!(frame = %text, "Ignoring unrecognized feed frame");
                None
            }
            Err(e) => {
                metrics::record_decode_error();
                tracing::warn!(error = %e, "Skipping malformed feed frame");
                None
            }
        }
    }

    /// Queue `event` for the consumer. `false` means stop: either shutdown was
    /// requested or nobody is listening any more.
    async fn deliver(&mut self, event: InboundEvent) -> bool {
        tokio::select! {
            sent = self.events.send(event) => sent.is_ok(),
            _ = self.shutdown.recv() => false,
        }
    }

    async fn reconnect(&mut self) -> Option<WsStream> {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let delay = self.backoff.delay(attempt);
            tracing::info!(endpoint = %self.endpoint, attempt, ?delay, "Reconnecting to notification feed");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.recv() => return None,
            }

            self.shared.set_state(ConnectionState::Connecting);
            let result = tokio::select! {
                result = open(&self.endpoint, self.connect_timeout) => result,
                _ = self.shutdown.recv() => return None,
            };

            match result {
                Ok(stream) => {
                    metrics::record_reconnect();
                    tracing::info!(endpoint = %self.endpoint, attempt, "Reconnected to notification feed");
                    return Some(stream);
                }
                Err(e) => {
                    tracing::warn!(endpoint = %self.endpoint, attempt, error = %e, "Reconnect attempt failed");
                    self.shared.set_state(ConnectionState::Disconnected);
                }
            }
        }
    }
}
