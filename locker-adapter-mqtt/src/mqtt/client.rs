//! MQTT client session
//!
//! Owns the broker connection for the lifetime of the adapter:
//! - Initial CONNECT with CONNACK check (fatal on failure)
//! - Subscriptions, renewed after every reconnect
//! - Event loop task forwarding inbound publishes over a channel
//! - DISCONNECT flush on shutdown
//!
//! The handler and scheduler only see the [`Publisher`] seam.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;

/// Status and response publications are at-least-once
pub const PUBLISH_QOS: QoS = QoS::AtLeastOnce;

/// Errors from the message transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {broker}: {reason}")]
    Connect { broker: String, reason: String },

    #[error("Failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Failed to disconnect: {0}")]
    Disconnect(String),

    #[error("Connection closed")]
    Closed,
}

/// Outbound side of the transport
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Queue a publication with at-least-once delivery. Must not wait for
    /// the broker.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Inbound publication received from the broker
#[derive(Debug, Clone)]
pub struct InboundPublish {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publisher backed by the rumqttc client
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        debug!("MQTT: Publishing {} bytes to {}", payload.len(), topic);
        // Fails instead of waiting when the request queue is full (broker outage)
        self.client
            .try_publish(topic, PUBLISH_QOS, false, payload)
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

/// A live broker session
pub struct MqttSession {
    client: AsyncClient,
    pump: JoinHandle<()>,
    disconnecting: Arc<AtomicBool>,
    disconnect_timeout: Duration,
}

impl MqttSession {
    /// Connect, subscribe and start the event loop task.
    ///
    /// Returns the session and the stream of inbound publishes.
    pub async fn connect(
        config: &MqttConfig,
        client_id: &str,
        subscriptions: Vec<String>,
    ) -> Result<(Self, mpsc::Receiver<InboundPublish>), TransportError> {
        let broker = format!("{}:{}", config.broker_host, config.broker_port);
        info!("MQTT: Connecting to {} as {}", broker, client_id);

        let mut options = MqttOptions::new(client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(config.keep_alive);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, config.channel_capacity);

        match tokio::time::timeout(config.connect_timeout, await_connack(&mut eventloop)).await {
            Ok(Ok(())) => info!("MQTT: Connected to {}", broker),
            Ok(Err(reason)) => return Err(TransportError::Connect { broker, reason }),
            Err(_) => {
                return Err(TransportError::Connect {
                    broker,
                    reason: format!("no CONNACK within {:?}", config.connect_timeout),
                })
            }
        }

        for topic in &subscriptions {
            client
                .subscribe(topic.as_str(), QoS::AtLeastOnce)
                .await
                .map_err(|e| TransportError::Subscribe {
                    topic: topic.clone(),
                    reason: e.to_string(),
                })?;
            info!("MQTT: Subscribed to '{}'", topic);
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity);
        let disconnecting = Arc::new(AtomicBool::new(false));

        let pump = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            subscriptions,
            inbound_tx,
            disconnecting.clone(),
            config.reconnect_delay,
        ));

        Ok((
            Self {
                client,
                pump,
                disconnecting,
                disconnect_timeout: config.disconnect_timeout,
            },
            inbound_rx,
        ))
    }

    /// Publisher sharing this session's connection
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    /// Send DISCONNECT and wait for the event loop to flush it.
    ///
    /// Returns within `disconnect_timeout`; the event loop task is aborted
    /// if it has not stopped by then.
    pub async fn disconnect(self) -> Result<(), TransportError> {
        self.disconnecting.store(true, Ordering::SeqCst);
        let mut pump = self.pump;

        if let Err(e) = self.client.try_disconnect() {
            warn!("MQTT: Could not queue DISCONNECT: {}", e);
            pump.abort();
            return Err(TransportError::Disconnect(e.to_string()));
        }

        if tokio::time::timeout(self.disconnect_timeout, &mut pump)
            .await
            .is_err()
        {
            warn!("MQTT: Event loop did not stop within {:?}", self.disconnect_timeout);
            pump.abort();
            return Err(TransportError::Disconnect(format!(
                "event loop did not stop within {:?}",
                self.disconnect_timeout
            )));
        }

        info!("MQTT: Client disconnected");
        Ok(())
    }
}

/// Poll until the broker answers CONNECT
async fn await_connack(eventloop: &mut EventLoop) -> Result<(), String> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(format!("connection refused: {:?}", ack.code))
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(e.to_string()),
        }
    }
}

/// Drive the connection until DISCONNECT has been sent
async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Vec<String>,
    inbound_tx: mpsc::Sender<InboundPublish>,
    disconnecting: Arc<AtomicBool>,
    reconnect_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundPublish {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                // Never block here: the dispatcher's publishes are drained by this loop
                match inbound_tx.try_send(message) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(m)) => {
                        warn!("MQTT: Inbound queue full, dropping message on {}", m.topic);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!("MQTT: Dispatcher gone, dropping inbound message");
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT: Reconnected, renewing subscriptions");
                for topic in &subscriptions {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        warn!("MQTT: Failed to resubscribe to {}: {}", topic, e);
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT: DISCONNECT sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if disconnecting.load(Ordering::SeqCst) {
                    debug!("MQTT: Connection closed during shutdown: {}", e);
                    break;
                }
                error!("MQTT: Connection error: {}, retrying in {:?}", e, reconnect_delay);
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

/// A publication captured by [`MemoryPublisher`]
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Published {
    /// Decode the payload as JSON
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// In-memory publisher for testing
#[derive(Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<Published>>,
    fail: AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Everything published so far
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    /// Publications on one topic
    pub fn on_topic(&self, topic: &str) -> Vec<Published> {
        self.published
            .lock()
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "simulated failure".to_string(),
            });
        }
        self.published.lock().push(Published {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_publisher_records() {
        let publisher = MemoryPublisher::new();
        publisher.publish("a/b", b"{\"x\":1}".to_vec()).await.unwrap();
        publisher.publish("a/c", b"[]".to_vec()).await.unwrap();

        assert_eq!(publisher.published().len(), 2);
        assert_eq!(publisher.on_topic("a/b")[0].json()["x"], 1);
    }

    #[tokio::test]
    async fn test_memory_publisher_failure() {
        let publisher = MemoryPublisher::new();
        publisher.set_failing(true);

        let result = publisher.publish("a/b", Vec::new()).await;
        assert!(matches!(result, Err(TransportError::Publish { .. })));
        assert!(publisher.published().is_empty());
    }

    /// Client whose event loop is never polled, like during a broker outage
    fn stalled_client(capacity: usize) -> (AsyncClient, EventLoop) {
        AsyncClient::new(MqttOptions::new("stalled", "127.0.0.1", 1), capacity)
    }

    #[tokio::test]
    async fn test_publish_fails_fast_when_queue_full() {
        let (client, _eventloop) = stalled_client(1);
        let publisher = MqttPublisher { client };

        let result = tokio::time::timeout(Duration::from_secs(1), async {
            publisher.publish("a/b", b"1".to_vec()).await?;
            publisher.publish("a/b", b"2".to_vec()).await
        })
        .await
        .expect("publish waited on a full request queue");
        assert!(matches!(result, Err(TransportError::Publish { .. })));
    }

    fn stalled_session(capacity: usize) -> (MqttSession, EventLoop) {
        let (client, eventloop) = stalled_client(capacity);
        let session = MqttSession {
            client,
            pump: tokio::spawn(std::future::pending::<()>()),
            disconnecting: Arc::new(AtomicBool::new(false)),
            disconnect_timeout: Duration::from_millis(100),
        };
        (session, eventloop)
    }

    #[tokio::test]
    async fn test_disconnect_bounded_when_event_loop_stalls() {
        let (session, _eventloop) = stalled_session(4);

        let result = tokio::time::timeout(Duration::from_secs(1), session.disconnect())
            .await
            .expect("disconnect exceeded its timeout");
        assert!(matches!(result, Err(TransportError::Disconnect(_))));
    }

    #[tokio::test]
    async fn test_disconnect_bounded_when_queue_full() {
        let (session, _eventloop) = stalled_session(1);
        session.publisher().publish("a/b", Vec::new()).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), session.disconnect())
            .await
            .expect("disconnect waited on a full request queue");
        assert!(matches!(result, Err(TransportError::Disconnect(_))));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        // Nothing listens on port 1 of the loopback interface
        let config = MqttConfig {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1,
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        };

        let result = MqttSession::connect(&config, "test-client", Vec::new()).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
