//! The device and the documents it owns on its filesystem
//!
//! Every mutation is a full read-modify-write of one document. A document that
//! exists but cannot be read or parsed is reported to the caller and never
//! overwritten with an empty default.

use chrono::NaiveDateTime;
use log::*;

use crate::config::{Config, CONFIG_FILE};
use crate::contacts::{AddOutcome, ContactList, ContactRecord, CONTACTS_FILE};
use crate::positives::{PositiveList, POSITIVES_FILE};
use crate::status::{classify, HealthStatus};
use crate::storage::{Storage, StoreError};

/// Name of the tracking log
pub const TRACKING_FILE: &str = "/spiffs_tracking.txt";

/// Size bound of the tracking log in bytes
pub const MAX_TRACKING_LEN: usize = 16 * 1024;

/// Constant name of this device, one side of every contact it records
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceIdentity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

pub struct Device<S> {
    storage: S,
    identity: DeviceIdentity,
}

impl<S: Storage> Device<S> {
    /// Take ownership of a mounted filesystem and create missing documents
    pub fn open(storage: S, identity: DeviceIdentity) -> Result<Self, StoreError> {
        let mut device = Self { storage, identity };
        device.initialize()?;
        Ok(device)
    }

    fn initialize(&mut self) -> Result<(), StoreError> {
        match Config::load(&self.storage) {
            Ok(Some(config)) => debug!("{CONFIG_FILE}: {config:?}"),
            Ok(None) => {
                Config::default().save(&mut self.storage)?;
                info!("{CONFIG_FILE} created with defaults");
            }
            Err(e) => warn!("{e}, leaving it untouched"),
        }

        let contacts_exist = self.exists(CONTACTS_FILE)?;
        match ContactList::load(&self.storage) {
            Ok(list) if contacts_exist => {
                info!("{CONTACTS_FILE}: {} contact(s)", list.len())
            }
            Ok(list) => {
                list.save(&mut self.storage)?;
                info!("{CONTACTS_FILE} created");
            }
            Err(e) => warn!("{e}, leaving it untouched"),
        }

        let positives_exist = self.exists(POSITIVES_FILE)?;
        match PositiveList::load(&self.storage) {
            Ok(list) if positives_exist => {
                info!("{POSITIVES_FILE}: {} positive id(s)", list.len())
            }
            Ok(list) => {
                list.save(&mut self.storage)?;
                info!("{POSITIVES_FILE} created");
            }
            Err(e) => warn!("{e}, leaving it untouched"),
        }

        if !self.exists(TRACKING_FILE)? {
            self.storage
                .write(TRACKING_FILE, b"")
                .map_err(|source| StoreError::Io {
                    name: TRACKING_FILE,
                    source,
                })?;
            info!("{TRACKING_FILE} created");
        }

        Ok(())
    }

    fn exists(&self, name: &'static str) -> Result<bool, StoreError> {
        self.storage
            .exists(name)
            .map_err(|source| StoreError::Io { name, source })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Erase the filesystem and recreate the default documents
    pub fn format(&mut self) -> Result<(), StoreError> {
        warn!("formatting filesystem");
        self.storage.format().map_err(|source| StoreError::Io {
            name: "filesystem",
            source,
        })?;
        self.initialize()
    }

    pub fn config(&self) -> Result<Config, StoreError> {
        Ok(Config::load(&self.storage)?.unwrap_or_default())
    }

    pub fn save_config(&mut self, config: &Config) -> Result<(), StoreError> {
        config.save(&mut self.storage)?;
        info!("configuration saved: {config:?}");
        Ok(())
    }

    pub fn contacts(&self) -> Result<ContactList, StoreError> {
        ContactList::load(&self.storage)
    }

    /// Store a contact between any two devices
    pub fn add_contact(&mut self, record: ContactRecord) -> Result<AddOutcome, StoreError> {
        let mut list = ContactList::load(&self.storage)?;
        let (a, b) = (record.id_a.clone(), record.id_b.clone());
        let outcome = list.add(record);
        if outcome == AddOutcome::Added {
            list.save(&mut self.storage)?;
            info!("contact saved: {a} - {b}");
        }
        Ok(outcome)
    }

    /// Store a contact between this device and `other`
    pub fn record_contact(&mut self, other: &str, now: NaiveDateTime) -> Result<AddOutcome, StoreError> {
        let record = ContactRecord::new(self.identity.as_str(), other, now);
        self.add_contact(record)
    }

    /// Evict contacts older than the configured retention window
    pub fn expire_contacts(&mut self, now: NaiveDateTime) -> Result<usize, StoreError> {
        let days = self.config()?.days_of_historic;
        let mut list = ContactList::load(&self.storage)?;
        let removed = list.evict_older_than(now, days);
        if removed > 0 {
            list.save(&mut self.storage)?;
            info!("{removed} contact(s) older than {days} day(s) removed");
        }
        Ok(removed)
    }

    pub fn positives(&self) -> Result<PositiveList, StoreError> {
        PositiveList::load(&self.storage)
    }

    pub fn report_positive(&mut self, id: &str) -> Result<AddOutcome, StoreError> {
        let mut list = PositiveList::load(&self.storage)?;
        let outcome = list.insert(id);
        if outcome == AddOutcome::Added {
            list.save(&mut self.storage)?;
            info!("positive id saved: {id}");
        }
        Ok(outcome)
    }

    /// Store `id` as positive only when it is one of this device's contacts,
    /// `None` otherwise
    pub fn report_partner_positive(&mut self, id: &str) -> Result<Option<AddOutcome>, StoreError> {
        let contacts = ContactList::load(&self.storage)?;
        if !contacts.partners_of(self.identity.as_str()).any(|p| p == id) {
            debug!("{id} is not a contact, not stored as positive");
            return Ok(None);
        }
        self.report_positive(id).map(Some)
    }

    pub fn remove_positive(&mut self, id: &str) -> Result<bool, StoreError> {
        let mut list = PositiveList::load(&self.storage)?;
        if !list.remove(id) {
            debug!("{id} not in positive list, nothing to delete");
            return Ok(false);
        }
        list.save(&mut self.storage)?;
        info!("positive id deleted: {id}");
        Ok(true)
    }

    pub fn health_status(&self) -> Result<HealthStatus, StoreError> {
        let contacts = ContactList::load(&self.storage)?;
        let positives = PositiveList::load(&self.storage)?;
        Ok(classify(self.identity.as_str(), &contacts, &positives))
    }

    /// Append `HH:MM:SS<TAB>text` to the tracking log
    ///
    /// Past [`MAX_TRACKING_LEN`] bytes the oldest lines are dropped until the
    /// log is back to half that size.
    pub fn log_tracking(&mut self, now: NaiveDateTime, text: &str) -> Result<(), StoreError> {
        let line = format!("{}\t{}\n", now.format("%H:%M:%S"), text);
        let io_error = |source| StoreError::Io {
            name: TRACKING_FILE,
            source,
        };
        let current = self.storage.read(TRACKING_FILE).map_err(io_error)?.unwrap_or_default();
        if current.len() + line.len() <= MAX_TRACKING_LEN {
            return self
                .storage
                .append(TRACKING_FILE, line.as_bytes())
                .map_err(io_error);
        }

        let mut start = current.len().saturating_sub(MAX_TRACKING_LEN / 2);
        while start < current.len() && start > 0 && current[start - 1] != b'\n' {
            start += 1;
        }
        let mut kept = current[start..].to_vec();
        kept.extend_from_slice(line.as_bytes());
        info!("{TRACKING_FILE} trimmed to its last {} bytes", kept.len());
        self.storage.write(TRACKING_FILE, &kept).map_err(io_error)
    }

    pub fn tracking_log(&self) -> Result<Vec<String>, StoreError> {
        let bytes = self
            .storage
            .read(TRACKING_FILE)
            .map_err(|source| StoreError::Io {
                name: TRACKING_FILE,
                source,
            })?
            .unwrap_or_default();
        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect())
    }
}
