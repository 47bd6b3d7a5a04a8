//! Publish/subscribe bridge to the dashboard broker
//!
//! Feeds live under the broker account, `{username}/feeds/{key}`. The bridge
//! consumes the on/off toggle, the slider, the shared positive feed and this
//! device's own health feed, and announces `CAS CONTACT` on the health feed
//! when the device becomes a contact case.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::NaiveDateTime;
use log::*;

use crate::contacts::AddOutcome;
use crate::device::{Device, DeviceIdentity};
use crate::status::HealthStatus;
use crate::storage::{Storage, StoreError};

/// Fixed delay between two broker connection attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Upper bound on deliveries drained by one [`Bridge::pump`] call
const MAX_PUMP: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// What a health feed says about its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthReport {
    Sick,
    ContactCase,
    Healthy,
}

impl HealthReport {
    pub fn from_payload(payload: &str) -> Self {
        match payload {
            "MALADE" => HealthReport::Sick,
            "CAS CONTACT" => HealthReport::ContactCase,
            _ => HealthReport::Healthy,
        }
    }

    pub fn as_payload(&self) -> &'static str {
        match self {
            HealthReport::Sick => "MALADE",
            HealthReport::ContactCase => "CAS CONTACT",
            HealthReport::Healthy => "OK",
        }
    }

    fn tracking_text(&self) -> &'static str {
        match self {
            HealthReport::Sick => "MQTT \t Je suis malade",
            HealthReport::ContactCase => "MQTT \t Je suis cas contact",
            HealthReport::Healthy => "MQTT \t Je suis en pleine forme",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Switch(bool),
    Slider(f64),
    Positive(String),
    Health(HealthReport),
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("payload on {topic} is not UTF-8")]
    NotUtf8 { topic: String },
    #[error("slider value {value:?} is not a number")]
    InvalidSlider { value: String },
    #[error("empty identifier on the positive feed")]
    EmptyPositive,
}

/// Topic names of the feeds this device uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feeds {
    pub onoff: String,
    pub slider: String,
    pub positive: String,
    pub health: String,
}

impl Feeds {
    pub fn new(username: &str, identity: &DeviceIdentity) -> Self {
        let feed = |key: &str| format!("{username}/feeds/{key}");
        Self {
            onoff: feed("onoff"),
            slider: feed("slider"),
            positive: feed("positive"),
            health: feed(&format!(
                "{}.etat-de-sante",
                identity.as_str().to_lowercase()
            )),
        }
    }

    pub fn all(&self) -> [&str; 4] {
        [&self.onoff, &self.slider, &self.positive, &self.health]
    }

    /// `Ok(None)` for topics that are not ours
    pub fn parse(&self, topic: &str, payload: &[u8]) -> Result<Option<FeedMessage>, FeedError> {
        if !self.all().contains(&topic) {
            return Ok(None);
        }
        let text = std::str::from_utf8(payload)
            .map_err(|_| FeedError::NotUtf8 {
                topic: topic.to_string(),
            })?
            .trim();

        let message = if topic == self.onoff {
            FeedMessage::Switch(text == "ON")
        } else if topic == self.slider {
            let value = text.parse().map_err(|_| FeedError::InvalidSlider {
                value: text.to_string(),
            })?;
            FeedMessage::Slider(value)
        } else if topic == self.positive {
            if text.is_empty() {
                return Err(FeedError::EmptyPositive);
            }
            FeedMessage::Positive(text.to_string())
        } else {
            FeedMessage::Health(HealthReport::from_payload(text))
        };
        Ok(Some(message))
    }
}

/// Client side of a publish/subscribe broker
pub trait Broker {
    type Error: std::fmt::Display;

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Self::Error>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error>;
}

/// Last values seen on the feeds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryState {
    pub switch_on: Option<bool>,
    pub slider: Option<f64>,
    pub own_report: Option<HealthReport>,
    pub last_status: Option<HealthStatus>,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("broker: {0}")]
    Broker(String),
}

fn broker_error<E: std::fmt::Display>(e: E) -> BridgeError {
    BridgeError::Broker(e.to_string())
}

pub struct Bridge<B> {
    broker: B,
    feeds: Feeds,
    state: TelemetryState,
}

impl<B: Broker> Bridge<B> {
    pub fn new(broker: B, feeds: Feeds) -> Self {
        Self {
            broker,
            feeds,
            state: TelemetryState::default(),
        }
    }

    pub fn feeds(&self) -> &Feeds {
        &self.feeds
    }

    pub fn state(&self) -> &TelemetryState {
        &self.state
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    pub fn subscribe_all(&mut self) -> Result<(), BridgeError> {
        for topic in self.feeds.all() {
            self.broker
                .subscribe(topic, QoS::AtLeastOnce)
                .map_err(broker_error)?;
            info!("subscribed to {topic}");
        }
        Ok(())
    }

    /// Process one incoming message
    pub fn handle<S: Storage>(
        &mut self,
        device: &mut Device<S>,
        now: NaiveDateTime,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), BridgeError> {
        let Some(message) = self.feeds.parse(topic, payload)? else {
            debug!("ignoring message on {topic}");
            return Ok(());
        };

        match message {
            FeedMessage::Switch(on) => {
                info!("{}", if on { "switch on" } else { "switch off" });
                self.state.switch_on = Some(on);
            }
            FeedMessage::Slider(value) => {
                info!("slider at {value}");
                self.state.slider = Some(value);
            }
            FeedMessage::Positive(id) => {
                if id == device.identity().as_str() {
                    debug!("own identity on the positive feed, ignored");
                    return Ok(());
                }
                match device.report_partner_positive(&id)? {
                    Some(AddOutcome::Added) => {
                        track(device, now, &format!("MQTT \t {id} est positif"));
                        self.refresh_status(device, now)?;
                    }
                    Some(outcome) => debug!("positive {id}: {outcome:?}"),
                    None => debug!("positive {id} is not a contact, ignored"),
                }
            }
            FeedMessage::Health(report) => {
                info!("own health feed: {}", report.as_payload());
                self.state.own_report = Some(report);
                track(device, now, report.tracking_text());
                if report == HealthReport::Sick {
                    let own = device.identity().as_str().to_string();
                    device.report_positive(&own)?;
                }
            }
        }
        Ok(())
    }

    /// Reclassify the device and announce a new contact case on its health feed
    pub fn refresh_status<S: Storage>(
        &mut self,
        device: &mut Device<S>,
        now: NaiveDateTime,
    ) -> Result<HealthStatus, BridgeError> {
        let status = device.health_status()?;
        let previous = self.state.last_status.replace(status);
        if status == HealthStatus::ContactCase && previous != Some(HealthStatus::ContactCase) {
            warn!("{} is now a contact case", device.identity());
            track(device, now, "MQTT \t Mon contact est malade");
            self.broker
                .publish(
                    &self.feeds.health,
                    HealthReport::ContactCase.as_payload().as_bytes(),
                )
                .map_err(broker_error)?;
        }
        Ok(status)
    }

    /// Declare this device positive, locally and on the shared feed
    pub fn report_self_positive<S: Storage>(
        &mut self,
        device: &mut Device<S>,
        now: NaiveDateTime,
    ) -> Result<(), BridgeError> {
        let own = device.identity().as_str().to_string();
        device.report_positive(&own)?;
        track(device, now, "MQTT \t Je me déclare positif");
        self.broker
            .publish(&self.feeds.positive, own.as_bytes())
            .map_err(broker_error)?;
        info!("{own} published on {}", self.feeds.positive);
        Ok(())
    }

    pub fn publish_switch(&mut self, on: bool) -> Result<(), BridgeError> {
        let payload: &[u8] = if on { b"ON" } else { b"OFF" };
        self.broker
            .publish(&self.feeds.onoff, payload)
            .map_err(broker_error)
    }

    pub fn publish_slider(&mut self, value: f64) -> Result<(), BridgeError> {
        self.broker
            .publish(&self.feeds.slider, value.to_string().as_bytes())
            .map_err(broker_error)
    }
}

/// The tracking log is best effort, a failed write never stops the bridge
fn track<S: Storage>(device: &mut Device<S>, now: NaiveDateTime, text: &str) {
    if let Err(e) = device.log_tracking(now, text) {
        warn!("tracking log: {e}");
    }
}

/// In-process broker. Publishes to a subscribed topic come back as deliveries.
#[derive(Debug, Default)]
pub struct LoopbackBroker {
    subscriptions: Vec<(String, QoS)>,
    published: Vec<(String, Vec<u8>)>,
    pending: VecDeque<(String, Vec<u8>)>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriptions(&self) -> &[(String, QoS)] {
        &self.subscriptions
    }

    /// Everything published so far, in order
    pub fn published(&self) -> &[(String, Vec<u8>)] {
        &self.published
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|(t, _)| t == topic)
    }

    /// A message arriving from another client
    pub fn inject(&mut self, topic: &str, payload: &[u8]) {
        if self.is_subscribed(topic) {
            self.pending.push_back((topic.to_string(), payload.to_vec()));
        }
    }

    pub fn next_delivery(&mut self) -> Option<(String, Vec<u8>)> {
        self.pending.pop_front()
    }
}

impl Broker for LoopbackBroker {
    type Error = std::convert::Infallible;

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        if !self.is_subscribed(topic) {
            self.subscriptions.push((topic.to_string(), qos));
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        self.published.push((topic.to_string(), payload.to_vec()));
        self.inject(topic, payload);
        Ok(())
    }
}

impl Bridge<LoopbackBroker> {
    /// Deliver queued messages until the queue is empty, returns how many
    pub fn pump<S: Storage>(
        &mut self,
        device: &mut Device<S>,
        now: NaiveDateTime,
    ) -> Result<usize, BridgeError> {
        let mut delivered = 0;
        while delivered < MAX_PUMP {
            let Some((topic, payload)) = self.broker.next_delivery() else {
                break;
            };
            self.handle(device, now, &topic, &payload)?;
            delivered += 1;
        }
        if !self.broker.pending.is_empty() {
            warn!("stopped after {MAX_PUMP} deliveries, messages still queued");
        }
        Ok(delivered)
    }
}

/// Call `connect` until it succeeds, sleeping `delay` between attempts
pub fn connect_with_retry<T, E, C, Z>(mut connect: C, delay: Duration, mut sleep: Z) -> T
where
    E: std::fmt::Display,
    C: FnMut() -> Result<T, E>,
    Z: FnMut(Duration),
{
    let mut attempt: u32 = 1;
    loop {
        match connect() {
            Ok(connection) => {
                info!("connected to broker (attempt {attempt})");
                return connection;
            }
            Err(e) => {
                warn!(
                    "broker connection failed: {e}, retrying in {} seconds",
                    delay.as_secs()
                );
                sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;
    use std::cell::RefCell;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, crate::TIMESTAMP_FORMAT).unwrap()
    }

    fn setup() -> (Device<MemStorage>, Bridge<LoopbackBroker>) {
        let identity = DeviceIdentity::new("ESP32-MAXIME");
        let feeds = Feeds::new("alice", &identity);
        let device = Device::open(MemStorage::new(), identity).unwrap();
        let mut bridge = Bridge::new(LoopbackBroker::new(), feeds);
        bridge.subscribe_all().unwrap();
        (device, bridge)
    }

    #[test]
    fn feed_names() {
        let feeds = Feeds::new("alice", &"ESP32-MAXIME".into());
        assert_eq!(feeds.onoff, "alice/feeds/onoff");
        assert_eq!(feeds.slider, "alice/feeds/slider");
        assert_eq!(feeds.positive, "alice/feeds/positive");
        assert_eq!(feeds.health, "alice/feeds/esp32-maxime.etat-de-sante");
    }

    #[test]
    fn parse_payloads() {
        let feeds = Feeds::new("alice", &"ESP32-MAXIME".into());
        assert_eq!(
            feeds.parse(&feeds.onoff, b"ON").unwrap(),
            Some(FeedMessage::Switch(true))
        );
        assert_eq!(
            feeds.parse(&feeds.onoff, b"whatever").unwrap(),
            Some(FeedMessage::Switch(false))
        );
        assert_eq!(
            feeds.parse(&feeds.slider, b" 42.5 ").unwrap(),
            Some(FeedMessage::Slider(42.5))
        );
        assert_eq!(
            feeds.parse(&feeds.health, b"CAS CONTACT").unwrap(),
            Some(FeedMessage::Health(HealthReport::ContactCase))
        );
        assert_eq!(
            feeds.parse(&feeds.health, b"bien").unwrap(),
            Some(FeedMessage::Health(HealthReport::Healthy))
        );
        assert_eq!(feeds.parse("bob/feeds/onoff", b"ON").unwrap(), None);
        assert!(matches!(
            feeds.parse(&feeds.slider, b"loud"),
            Err(FeedError::InvalidSlider { .. })
        ));
        assert!(matches!(
            feeds.parse(&feeds.positive, b"  "),
            Err(FeedError::EmptyPositive)
        ));
    }

    #[test]
    fn subscriptions_are_at_least_once() {
        let (_, bridge) = setup();
        let subs = bridge.broker().subscriptions();
        assert_eq!(subs.len(), 4);
        assert!(subs.iter().all(|(_, qos)| *qos == QoS::AtLeastOnce));
    }

    #[test]
    fn positive_partner_triggers_one_announcement() {
        let (mut device, mut bridge) = setup();
        let now = at("2024-04-11T12:17:08");
        device.record_contact("ESP32-NOA", now).unwrap();
        let positive = bridge.feeds().positive.clone();
        let health = bridge.feeds().health.clone();

        bridge.broker_mut().inject(&positive, b"ESP32-NOA");
        bridge.broker_mut().inject(&positive, b"ESP32-NOA");
        bridge.pump(&mut device, now).unwrap();

        assert!(device.positives().unwrap().contains("ESP32-NOA"));
        let announcements: Vec<_> = bridge
            .broker()
            .published()
            .iter()
            .filter(|(topic, _)| *topic == health)
            .collect();
        assert_eq!(announcements.len(), 1);
        assert_eq!(announcements[0].1, b"CAS CONTACT".to_vec());
        assert_eq!(bridge.state().last_status, Some(HealthStatus::ContactCase));
        // the announcement came back on the own health feed
        assert_eq!(bridge.state().own_report, Some(HealthReport::ContactCase));
    }

    #[test]
    fn unrelated_positive_is_not_stored() {
        let (mut device, mut bridge) = setup();
        let now = at("2024-04-11T12:17:08");
        let positive = bridge.feeds().positive.clone();

        bridge.broker_mut().inject(&positive, b"ESP32-DIMITRI");
        bridge.pump(&mut device, now).unwrap();

        assert!(device.positives().unwrap().is_empty());
        assert!(device.tracking_log().unwrap().is_empty());
        assert!(bridge.broker().published().is_empty());
    }

    #[test]
    fn partner_positive_counts_after_many_unrelated_ones() {
        let (mut device, mut bridge) = setup();
        let now = at("2024-04-11T12:17:08");
        device.record_contact("ESP32-NOA", now).unwrap();
        let positive = bridge.feeds().positive.clone();

        for i in 0..crate::MAX_CONTACTS {
            bridge
                .broker_mut()
                .inject(&positive, format!("ESP32-OTHER-{i}").as_bytes());
        }
        bridge.pump(&mut device, now).unwrap();
        bridge.broker_mut().inject(&positive, b"ESP32-NOA");
        bridge.pump(&mut device, now).unwrap();

        assert_eq!(device.positives().unwrap().ids(), ["ESP32-NOA".to_string()]);
        assert_eq!(device.health_status().unwrap(), HealthStatus::ContactCase);
    }

    #[test]
    fn failed_tracking_write_does_not_stop_the_bridge() {
        #[derive(Default)]
        struct NoAppend(MemStorage);

        impl Storage for NoAppend {
            fn read(&self, name: &str) -> std::io::Result<Option<Vec<u8>>> {
                self.0.read(name)
            }
            fn write(&mut self, name: &str, data: &[u8]) -> std::io::Result<()> {
                self.0.write(name, data)
            }
            fn append(&mut self, _: &str, _: &[u8]) -> std::io::Result<()> {
                Err(std::io::Error::other("filesystem full"))
            }
            fn remove(&mut self, name: &str) -> std::io::Result<()> {
                self.0.remove(name)
            }
            fn format(&mut self) -> std::io::Result<()> {
                self.0.format()
            }
        }

        let identity = DeviceIdentity::new("ESP32-MAXIME");
        let feeds = Feeds::new("alice", &identity);
        let mut device = Device::open(NoAppend::default(), identity).unwrap();
        let mut bridge = Bridge::new(LoopbackBroker::new(), feeds);
        bridge.subscribe_all().unwrap();
        let now = at("2024-04-11T12:17:08");
        device.record_contact("ESP32-NOA", now).unwrap();

        let positive = bridge.feeds().positive.clone();
        bridge.broker_mut().inject(&positive, b"ESP32-NOA");
        bridge.pump(&mut device, now).unwrap();

        assert_eq!(bridge.state().last_status, Some(HealthStatus::ContactCase));
        let health = bridge.feeds().health.clone();
        assert!(bridge
            .broker()
            .published()
            .contains(&(health, b"CAS CONTACT".to_vec())));
    }

    #[test]
    fn own_identity_on_positive_feed_is_ignored() {
        let (mut device, mut bridge) = setup();
        let positive = bridge.feeds().positive.clone();
        bridge.broker_mut().inject(&positive, b"ESP32-MAXIME");
        bridge
            .pump(&mut device, at("2024-04-11T12:17:08"))
            .unwrap();
        assert!(device.positives().unwrap().is_empty());
    }

    #[test]
    fn own_sick_report_is_a_self_report() {
        let (mut device, mut bridge) = setup();
        let health = bridge.feeds().health.clone();
        bridge.broker_mut().inject(&health, b"MALADE");
        bridge
            .pump(&mut device, at("2024-04-11T12:17:08"))
            .unwrap();

        assert!(device.positives().unwrap().contains("ESP32-MAXIME"));
        assert_eq!(bridge.state().own_report, Some(HealthReport::Sick));
        assert_eq!(
            device.tracking_log().unwrap(),
            vec!["12:17:08\tMQTT \t Je suis malade".to_string()]
        );
    }

    #[test]
    fn self_positive_is_published_once_and_not_reprocessed() {
        let (mut device, mut bridge) = setup();
        let now = at("2024-04-11T12:17:08");
        bridge.report_self_positive(&mut device, now).unwrap();
        assert_eq!(bridge.pump(&mut device, now).unwrap(), 1);

        assert_eq!(device.positives().unwrap().ids(), ["ESP32-MAXIME".to_string()]);
        assert_eq!(bridge.broker().published().len(), 1);
    }

    #[test]
    fn commands_update_state() {
        let (mut device, mut bridge) = setup();
        let now = at("2024-04-11T12:17:08");
        bridge.publish_switch(true).unwrap();
        bridge.publish_slider(30.0).unwrap();
        assert_eq!(bridge.pump(&mut device, now).unwrap(), 2);
        assert_eq!(bridge.state().switch_on, Some(true));
        assert_eq!(bridge.state().slider, Some(30.0));
    }

    #[test]
    fn retry_until_connected() {
        let attempts = RefCell::new(0);
        let sleeps = RefCell::new(Vec::new());
        let connection = connect_with_retry(
            || {
                *attempts.borrow_mut() += 1;
                if *attempts.borrow() < 3 {
                    Err("refused")
                } else {
                    Ok("session")
                }
            },
            RECONNECT_DELAY,
            |d| sleeps.borrow_mut().push(d),
        );
        assert_eq!(connection, "session");
        assert_eq!(*attempts.borrow(), 3);
        assert_eq!(
            *sleeps.borrow(),
            vec![Duration::from_secs(10), Duration::from_secs(10)]
        );
    }
}
