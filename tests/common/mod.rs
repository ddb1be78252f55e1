//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

use paywall_watcher::config::SubscriptionConfig;

#[derive(Debug, Clone)]
enum FeedCommand {
    Push(String),
    Disconnect,
}

/// In-process notification feed.
///
/// Accepts any number of WebSocket peers, records every text request they
/// send, and pushes frames to all peers connected at the time of the push.
pub struct MockFeed {
    pub endpoint: String,
    commands: broadcast::Sender<FeedCommand>,
    requests: Mutex<mpsc::UnboundedReceiver<String>>,
    connections: Arc<AtomicUsize>,
}

impl MockFeed {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (commands, _) = broadcast::channel(64);
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_commands = commands.clone();
        let accept_connections = connections.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    continue;
                };
                let mut commands = accept_commands.subscribe();
                let requests = request_tx.clone();
                accept_connections.fetch_add(1, Ordering::SeqCst);

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            command = commands.recv() => match command {
                                Ok(FeedCommand::Push(frame)) => {
                                    if ws.send(Message::Text(frame.into())).await.is_err() {
                                        break;
                                    }
                                }
                                // Drop the socket without a close handshake.
                                Ok(FeedCommand::Disconnect) | Err(_) => break,
                            },
                            msg = ws.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = requests.send(text.as_str().to_string());
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            endpoint: format!("ws://{}", addr),
            commands,
            requests: Mutex::new(request_rx),
            connections,
        }
    }

    /// Number of peers accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.commands.send(FeedCommand::Push(frame.into()));
    }

    pub fn push_block(&self, height: u64) {
        self.push(format!(
            r#"{{"event_id":"newblock","message":{{"block":{{"height":{},"hash":"h{}"}}}}}}"#,
            height, height
        ));
    }

    pub fn push_address_activity(&self, address: &str, tx_id: &str) {
        self.push(format!(
            r#"{{"event_id":"address:{a}","message":{{"address":"{a}","tx_hash":"{t}"}}}}"#,
            a = address,
            t = tx_id
        ));
    }

    /// Drop every live peer.
    pub fn disconnect_all(&self) {
        let _ = self.commands.send(FeedCommand::Disconnect);
    }

    /// Wait until a request equal to `expected` arrives, discarding others.
    pub async fn expect_request(&self, expected: &str) {
        let mut requests = self.requests.lock().await;
        let wait = async {
            while let Some(request) = requests.recv().await {
                if request == expected {
                    return;
                }
            }
            panic!("feed closed before request {expected}");
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for request {expected}"));
    }

    /// Wait until every request in `expected` has arrived, in any order.
    pub async fn expect_requests(&self, expected: &[String]) {
        let mut pending: Vec<&String> = expected.iter().collect();
        let mut requests = self.requests.lock().await;
        let wait = async {
            while !pending.is_empty() {
                match requests.recv().await {
                    Some(request) => pending.retain(|want| **want != request),
                    None => panic!("feed closed with requests outstanding: {pending:?}"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for requests {expected:?}"));
    }
}

pub fn subscription_config(endpoint: &str) -> SubscriptionConfig {
    SubscriptionConfig {
        endpoint: endpoint.to_string(),
        connect_retries: 3,
        connect_timeout_secs: 2,
        backoff_base_ms: 10,
        backoff_max_ms: 50,
        event_buffer: 64,
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
