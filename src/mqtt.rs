use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info};
use rumqttc::{MqttOptions, QoS};
use serde_derive::Serialize;

use crate::config;
use crate::messages::Notification;
use crate::notifier::{Notifier, NotifyError};

const REQUEST_QUEUE_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct MqttNotifier {
    client: rumqttc::AsyncClient,
    topic: String,
}

#[derive(Debug, Serialize)]
struct PowerMqttMessage {
    state: &'static str,
    online: Option<bool>,
    timestamp: String,
    text: String,
}

impl PowerMqttMessage {
    fn from_notification(notification: &Notification) -> Self {
        let state = match notification.online() {
            Some(true) => "on",
            Some(false) => "off",
            None => "test",
        };
        PowerMqttMessage {
            state,
            online: notification.online(),
            timestamp: notification.at().to_rfc3339(),
            text: notification.text(),
        }
    }
}

impl MqttNotifier {
    pub fn new(config: &config::MqttConfig, device_name: &str) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .clone()
            .unwrap_or_else(|| "power-monitor".to_string());

        let mut mqttoptions = MqttOptions::new(
            publisher_id.clone(),
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, REQUEST_QUEUE_CAPACITY);
        let topic_path = config.topic_path.as_deref().unwrap_or("power");

        (
            MqttNotifier {
                client,
                topic: format!("{}/{}/{}", topic_path, publisher_id, sanitize_name(device_name)),
            },
            eventloop,
        )
    }

    /// Drives the connection until the client disconnects.
    pub async fn event_loop(mut eventloop: rumqttc::EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                    debug!("Connection acknowledged");
                }
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::PubAck(ack))) => {
                    debug!("Publish {} acknowledged", ack.pkid);
                }
                Ok(rumqttc::Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                    debug!("MQTT client disconnected");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    pub fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.try_disconnect()
    }
}

#[async_trait]
impl Notifier for MqttNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let message = PowerMqttMessage::from_notification(notification);
        info!("Announcing power state {} on {}", message.state, self.topic);
        // The request queue only drains while the broker is reachable; fail instead of waiting.
        self.client.try_publish(
            self.topic.clone(),
            QoS::AtLeastOnce,
            true,
            serde_json::to_string(&message)?,
        )?;
        Ok(())
    }
}

fn sanitize_name(name: &str) -> String {
    // Remove any non-alphanumeric characters and replace spaces with underscores
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
}
