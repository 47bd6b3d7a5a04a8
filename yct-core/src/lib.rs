//! YCT Core Library
//!
//! Everything a contact tracer device does, independent of the hardware it
//! runs on.
//!
//! This crate provides:
//! - JSON documents kept on the device filesystem: configuration, contacts,
//!   positive identifiers and a tracking log
//! - Classification of the device as negative or contact case
//! - A bridge to the dashboard broker feeds
//! - Dwell-time detection turning nearby devices into contacts
//! - The HTML pages of the device web server
//!
//! # Implementations
//! - `yct-hub`: host simulation served over hyper, filesystem in a directory
//! - `yct-esp32`: firmware on ESP-IDF with SPIFFS, MQTT and BLE scanning
//!
//! # Note
//! Hardware sits behind the [`Storage`], [`Broker`] and [`NetworkScanner`]
//! traits.

pub mod config;
pub mod contacts;
pub mod device;
pub mod pages;
pub mod positives;
pub mod proximity;
pub mod status;
pub mod storage;
pub mod telemetry;
pub mod web;
pub mod wifi;

pub use config::{Config, ConfigError};
pub use contacts::{AddOutcome, ContactList, ContactRecord, MAX_CONTACTS, TIMESTAMP_FORMAT};
pub use device::{Device, DeviceIdentity};
pub use positives::PositiveList;
pub use proximity::ProximityTracker;
pub use status::{classify, HealthStatus};
pub use storage::{DirStorage, MemStorage, Storage, StoreError};
pub use telemetry::{
    connect_with_retry, Bridge, BridgeError, Broker, Feeds, LoopbackBroker, QoS,
    RECONNECT_DELAY,
};
pub use web::{handle_request, Request, Response};
pub use wifi::{NetworkScanner, ScanResult, StaticNetworks};
