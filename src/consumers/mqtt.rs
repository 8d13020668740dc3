// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! MQTT fan-out: each [`Signal`]/[`MatchedSignal`] is published three
//! times, once per encoding, on distinct sub-topics
//! (`<prefix>/json/<device>`, `.../csv/<device>`, `.../cbor/<device>`) -
//! the same triad the upstream consumer publishes, kept here because
//! nothing in the spec's Non-goals excludes it.

use super::wire;
use super::Consumer;
use crate::model::{DeviceId, QueueItem};
use rumqttc::{Client, MqttOptions, QoS};
use std::time::Duration;
use tracing::{debug, warn};

pub struct MqttConsumer {
    client: Client,
    topic_prefix: String,
    // The connection event loop must be polled continuously or the client
    // silently stalls; rumqttc::Client already spawns a background
    // connection thread that drives this, so only the handle is kept here.
    _connection: std::thread::JoinHandle<()>,
}

impl MqttConsumer {
    pub fn connect(broker: &str, topic_prefix: &str) -> anyhow::Result<Self> {
        let (host, port) = parse_broker(broker)?;
        let mut options = MqttOptions::new("pulsewatch", host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut connection) = Client::new(options, 64);
        let connection_thread = std::thread::Builder::new()
            .name("mqtt-eventloop".into())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(_) => {}
                        Err(err) => {
                            warn!("MQTT connection error: {err}");
                            std::thread::sleep(Duration::from_secs(1));
                        }
                    }
                }
            })?;

        Ok(Self {
            client,
            topic_prefix: topic_prefix.to_string(),
            _connection: connection_thread,
        })
    }

    fn publish(&mut self, suffix: &str, device: Option<&DeviceId>, payload: Vec<u8>) -> anyhow::Result<()> {
        let topic = match device {
            Some(d) => format!("{}/{suffix}/{d}", self.topic_prefix),
            None => format!("{}/{suffix}/matched", self.topic_prefix),
        };
        self.client.publish(topic, QoS::AtLeastOnce, false, payload)?;
        Ok(())
    }
}

impl Consumer for MqttConsumer {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn handle(&mut self, item: &QueueItem) -> anyhow::Result<()> {
        match item {
            QueueItem::Signal(s) => {
                self.publish("json", Some(&s.device), wire::signal_to_json(s)?)?;
                self.publish("csv", Some(&s.device), s.as_csv_fields().join(";").into_bytes())?;
                self.publish("cbor", Some(&s.device), wire::signal_to_cbor(s)?)?;
            }
            QueueItem::Matched(m) => {
                self.publish("json", None, wire::matched_to_json(m)?)?;
                self.publish("csv", None, m.as_csv_fields().join(";").into_bytes())?;
                self.publish("cbor", None, wire::matched_to_cbor(m)?)?;
            }
            QueueItem::State(_) => {
                debug!("mqtt consumer ignores state messages");
            }
        }
        Ok(())
    }
}

fn parse_broker(broker: &str) -> anyhow::Result<(String, u16)> {
    match broker.split_once(':') {
        Some((host, port)) => Ok((host.to_string(), port.parse()?)),
        None => Ok((broker.to_string(), 1883)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        assert_eq!(
            parse_broker("broker.local:8883").unwrap(),
            ("broker.local".to_string(), 8883)
        );
        assert_eq!(
            parse_broker("broker.local").unwrap(),
            ("broker.local".to_string(), 1883)
        );
    }
}
