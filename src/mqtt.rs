//! MQTT forwarding handler.
//!
//! Publishes each event payload, unmodified, to the topic named by the
//! payload's `table` field (`events` when it has none) at QoS 0.

use std::fmt;
use std::thread;
use std::time::Duration;

use rumqttc::{Client, ConnectionError, MqttOptions, QoS};

use crate::error::HandlerError;
use crate::event::Event;
use crate::handler::{EventHandler, HandlerRegistry};
use crate::handlers::payload_table;

/// Standard MQTT port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Broker connection options.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_MQTT_PORT,
            client_id: "pg-notify".to_string(),
            keep_alive: Duration::from_secs(60),
        }
    }
}

/// Where the forwarder sends messages.
pub trait Publish: Send {
    /// Send `payload` on `topic`.
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), HandlerError>;
}

/// Forwards events to MQTT, one topic per table.
#[derive(Debug)]
pub struct MqttForwarder<P: Publish = BrokerPublisher> {
    publisher: P,
}

impl MqttForwarder<BrokerPublisher> {
    /// Forwarder for the broker in `settings`. Connects on the first event.
    #[must_use]
    pub fn new(settings: MqttSettings) -> Self {
        Self::with_publisher(BrokerPublisher::new(settings))
    }
}

impl<P: Publish> MqttForwarder<P> {
    #[allow(missing_docs)]
    pub fn with_publisher(publisher: P) -> Self {
        Self { publisher }
    }

    #[allow(missing_docs)]
    pub fn into_publisher(self) -> P {
        self.publisher
    }
}

impl<P: Publish> EventHandler for MqttForwarder<P> {
    fn handle(&mut self, event: &Event) -> Result<(), HandlerError> {
        let topic = payload_table(event)?;
        tracing::debug!(%topic, origin_id = event.origin_id, "forwarding event to mqtt");
        self.publisher.publish(&topic, &event.payload)
    }
}

/// `rumqttc` client with its event loop on a background thread.
pub struct BrokerPublisher {
    settings: MqttSettings,
    client: Option<Client>,
}

impl BrokerPublisher {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(settings: MqttSettings) -> Self {
        Self { settings, client: None }
    }

    fn client(&mut self) -> Result<&mut Client, HandlerError> {
        if self.client.is_none() {
            let mut options = MqttOptions::new(
                self.settings.client_id.clone(),
                self.settings.host.clone(),
                self.settings.port,
            );
            options.set_keep_alive(self.settings.keep_alive);
            let (client, mut connection) = Client::new(options, 64);

            thread::Builder::new()
                .name("pg-notify-mqtt".to_string())
                .spawn(move || {
                    for notification in connection.iter() {
                        match notification {
                            Ok(event) => tracing::trace!(?event, "mqtt event"),
                            Err(ConnectionError::RequestsDone) => break,
                            Err(err) => {
                                tracing::warn!(error = %err, "mqtt connection error, retrying");
                                thread::sleep(Duration::from_secs(1));
                            }
                        }
                    }
                })?;
            tracing::info!(host = %self.settings.host, port = self.settings.port, "mqtt client started");
            self.client = Some(client);
        }
        self.client
            .as_mut()
            .ok_or_else(|| HandlerError::failed("mqtt client unavailable"))
    }
}

impl Publish for BrokerPublisher {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), HandlerError> {
        self.client()?
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| HandlerError::failed(format!("mqtt publish to {topic} failed: {e}")))
    }
}

impl Drop for BrokerPublisher {
    fn drop(&mut self) {
        if let Some(client) = self.client.as_mut() {
            let _ = client.disconnect();
        }
    }
}

impl fmt::Debug for BrokerPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerPublisher")
            .field("settings", &self.settings)
            .field("connected", &self.client.is_some())
            .finish()
    }
}

/// Register `mqtt` as a forwarder to the broker in `settings`.
pub fn register(registry: &mut HandlerRegistry, settings: MqttSettings) {
    registry.register("mqtt", move || MqttForwarder::new(settings.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Sent(Vec<(String, String)>);

    impl Publish for Sent {
        fn publish(&mut self, topic: &str, payload: &str) -> Result<(), HandlerError> {
            self.0.push((topic.to_string(), payload.to_string()));
            Ok(())
        }
    }

    fn event(payload: &str) -> Event {
        Event {
            origin_id: 7,
            channel: "events".to_string(),
            payload: payload.to_string(),
        }
    }

    #[test]
    fn publishes_payload_on_table_topic() {
        let users = r#"{"table":"users","action":"INSERT","data":{"id":1}}"#;
        let untagged = r#"{"action":"DELETE"}"#;

        let mut forwarder = MqttForwarder::with_publisher(Sent::default());
        forwarder.handle(&event(users)).unwrap();
        forwarder.handle(&event(untagged)).unwrap();

        let sent = forwarder.into_publisher().0;
        assert_eq!(
            sent,
            vec![
                ("users".to_string(), users.to_string()),
                ("events".to_string(), untagged.to_string()),
            ]
        );
    }

    #[test]
    fn malformed_payload_is_not_published() {
        let mut forwarder = MqttForwarder::with_publisher(Sent::default());
        assert!(matches!(
            forwarder.handle(&event("not json")),
            Err(HandlerError::Payload(_))
        ));
        assert!(forwarder.into_publisher().0.is_empty());
    }

    #[test]
    fn registered_forwarder_does_not_connect_until_used() {
        let mut registry = HandlerRegistry::new();
        register(
            &mut registry,
            MqttSettings {
                host: "broker.invalid".to_string(),
                ..MqttSettings::default()
            },
        );
        assert!(registry.resolve("mqtt").is_ok());
    }
}
