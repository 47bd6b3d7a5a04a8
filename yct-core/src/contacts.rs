//! Contact records and the bounded contact list
//!
//! A contact is evidence that two devices were near each other at some point
//! in time. The pair is unordered: (A, B) and (B, A) are the same contact.

use chrono::NaiveDateTime;
use log::*;
use serde::{Deserialize, Serialize};

use crate::storage::{load_document, save_document, Storage, StoreError};

/// Name of the contact list document
pub const CONTACTS_FILE: &str = "/contacts.json";

/// Maximum number of records kept in the contact list (and positive list)
pub const MAX_CONTACTS: usize = 50;

/// Timestamp format used in the stored documents
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    #[serde(rename = "id-1")]
    pub id_a: String,
    #[serde(rename = "id-2")]
    pub id_b: String,
    #[serde(rename = "timestamp", with = "timestamp")]
    pub observed_at: NaiveDateTime,
}

impl ContactRecord {
    pub fn new(id_a: impl Into<String>, id_b: impl Into<String>, observed_at: NaiveDateTime) -> Self {
        Self {
            id_a: id_a.into(),
            id_b: id_b.into(),
            observed_at,
        }
    }

    /// Pair-order-insensitive comparison
    pub fn same_pair(&self, a: &str, b: &str) -> bool {
        (self.id_a == a && self.id_b == b) || (self.id_a == b && self.id_b == a)
    }

    pub fn involves(&self, id: &str) -> bool {
        self.id_a == id || self.id_b == id
    }

    /// The other side of the record, if `id` is one of its sides
    pub fn partner_of(&self, id: &str) -> Option<&str> {
        if self.id_a == id {
            Some(self.id_b.as_str())
        } else if self.id_b == id {
            Some(self.id_a.as_str())
        } else {
            None
        }
    }

    /// Age in whole days
    pub fn age_in_days(&self, now: NaiveDateTime) -> i64 {
        (now - self.observed_at).num_days()
    }
}

/// Result of inserting into a bounded list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Duplicate,
    /// Capacity reached, nothing was inserted
    Full,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactList {
    #[serde(rename = "list_of_contacts", default)]
    records: Vec<ContactRecord>,
}

impl ContactList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ContactRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains_pair(&self, a: &str, b: &str) -> bool {
        self.records.iter().any(|r| r.same_pair(a, b))
    }

    /// Insert a record unless the pair is already known or the list is full
    pub fn add(&mut self, record: ContactRecord) -> AddOutcome {
        if self.contains_pair(&record.id_a, &record.id_b) {
            debug!("duplicate contact {} - {}", record.id_a, record.id_b);
            return AddOutcome::Duplicate;
        }
        if self.records.len() >= MAX_CONTACTS {
            warn!(
                "contact list full ({MAX_CONTACTS}), dropping {} - {}",
                record.id_a, record.id_b
            );
            return AddOutcome::Full;
        }
        self.records.push(record);
        AddOutcome::Added
    }

    /// Drop every record whose age in whole days reaches `days`, returns how many went
    pub fn evict_older_than(&mut self, now: NaiveDateTime, days: u32) -> usize {
        let before = self.records.len();
        self.records.retain(|r| {
            let keep = r.age_in_days(now) < i64::from(days);
            if !keep {
                info!("contact expired: {} - {} ({})", r.id_a, r.id_b, r.observed_at);
            }
            keep
        });
        before - self.records.len()
    }

    /// Every identifier met by `id`
    pub fn partners_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.records.iter().filter_map(move |r| r.partner_of(id))
    }

    /// Load the list, an absent document is an empty list
    pub fn load<S: Storage + ?Sized>(storage: &S) -> Result<Self, StoreError> {
        let mut list: Self = load_document(storage, CONTACTS_FILE)?.unwrap_or_default();
        if list.records.len() > MAX_CONTACTS {
            warn!(
                "{CONTACTS_FILE} holds {} records, keeping the first {MAX_CONTACTS}",
                list.records.len()
            );
            list.records.truncate(MAX_CONTACTS);
        }
        Ok(list)
    }

    pub fn save<S: Storage + ?Sized>(&self, storage: &mut S) -> Result<(), StoreError> {
        save_document(storage, CONTACTS_FILE, self)
    }
}

mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&t.format(super::TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&s, super::TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}
