//! Adafruit IO over the ESP-IDF MQTT client
//!
//! Events are copied out of the connection before the shared state is
//! touched, so the MQTT task is never blocked on the state lock.

use esp_idf_svc::mqtt::client::{
    Details, EspMqttClient, EspMqttConnection, EventPayload, MqttClientConfiguration, QoS,
};
use esp_idf_svc::sys::EspError;
use log::*;
use std::thread;
use std::time::Duration;
use yct_core::{connect_with_retry, Broker, RECONNECT_DELAY};

use crate::SharedState;

pub struct EspBroker(EspMqttClient<'static>);

impl Broker for EspBroker {
    type Error = EspError;

    fn subscribe(&mut self, topic: &str, qos: yct_core::QoS) -> Result<(), EspError> {
        let qos = match qos {
            yct_core::QoS::AtMostOnce => QoS::AtMostOnce,
            yct_core::QoS::AtLeastOnce => QoS::AtLeastOnce,
            yct_core::QoS::ExactlyOnce => QoS::ExactlyOnce,
        };
        self.0.subscribe(topic, qos).map(|_| ())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), EspError> {
        self.0
            .enqueue(topic, QoS::AtLeastOnce, false, payload)
            .map(|_| ())
    }
}

/// Create the client, retrying every [`RECONNECT_DELAY`] until it exists
pub fn connect(
    url: &str,
    client_id: &'static str,
    username: &'static str,
    key: &'static str,
) -> (EspBroker, EspMqttConnection) {
    let conf = MqttClientConfiguration {
        client_id: Some(client_id),
        username: Some(username),
        password: Some(key),
        reconnect_timeout: Some(RECONNECT_DELAY),
        ..Default::default()
    };
    info!("Connecting to broker {url}...");
    let (client, connection) =
        connect_with_retry(|| EspMqttClient::new(url, &conf), RECONNECT_DELAY, thread::sleep);
    (EspBroker(client), connection)
}

enum Incoming {
    Connected,
    Disconnected,
    Message(String, Vec<u8>),
}

pub fn spawn_receiver(state: SharedState, mut conn: EspMqttConnection) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(12 * 1024)
        .spawn(move || loop {
            let incoming = match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => Some(Incoming::Connected),
                    EventPayload::Disconnected => Some(Incoming::Disconnected),
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details: Details::Complete,
                        ..
                    } => Some(Incoming::Message(topic.to_string(), data.to_vec())),
                    _ => None,
                },
                Err(e) => {
                    warn!("mqtt receive loop error: {e:?}");
                    thread::sleep(Duration::from_secs(2));
                    None
                }
            };

            let Some(incoming) = incoming else {
                continue;
            };
            let Ok(mut state) = state.lock() else {
                error!("state lock poisoned, mqtt receiver stops");
                return;
            };
            let result = match incoming {
                Incoming::Connected => {
                    info!("broker connected");
                    state.on_connected()
                }
                Incoming::Disconnected => {
                    warn!(
                        "broker disconnected, client retries every {} seconds",
                        RECONNECT_DELAY.as_secs()
                    );
                    Ok(())
                }
                Incoming::Message(topic, data) => state.on_message(&topic, &data),
            };
            if let Err(e) = result {
                warn!("mqtt message handling failed: {e:#}");
            }
        })?;
    Ok(())
}
