//! Identifiers reported as positive cases

use log::*;
use serde::{Deserialize, Serialize};

use crate::contacts::{AddOutcome, MAX_CONTACTS};
use crate::storage::{load_document, save_document, Storage, StoreError};

/// Name of the positive list document
pub const POSITIVES_FILE: &str = "/positivelist.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositiveList {
    #[serde(rename = "positive_list", default)]
    ids: Vec<String>,
}

impl PositiveList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|p| p == id)
    }

    pub fn insert(&mut self, id: &str) -> AddOutcome {
        if self.contains(id) {
            return AddOutcome::Duplicate;
        }
        if self.ids.len() >= MAX_CONTACTS {
            warn!("positive list full ({MAX_CONTACTS}), dropping {id}");
            return AddOutcome::Full;
        }
        self.ids.push(id.to_string());
        AddOutcome::Added
    }

    /// Returns false when `id` was not listed
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|p| p != id);
        before != self.ids.len()
    }

    /// Load the list, an absent document is an empty list
    pub fn load<S: Storage + ?Sized>(storage: &S) -> Result<Self, StoreError> {
        let mut list: Self = load_document(storage, POSITIVES_FILE)?.unwrap_or_default();
        if list.ids.len() > MAX_CONTACTS {
            warn!(
                "{POSITIVES_FILE} holds {} ids, keeping the first {MAX_CONTACTS}",
                list.ids.len()
            );
            list.ids.truncate(MAX_CONTACTS);
        }
        Ok(list)
    }

    pub fn save<S: Storage + ?Sized>(&self, storage: &mut S) -> Result<(), StoreError> {
        save_document(storage, POSITIVES_FILE, self)
    }
}

#[cfg(test)]
mod tests {
    use super::PositiveList;
    use crate::contacts::{AddOutcome, MAX_CONTACTS};
    use crate::storage::{MemStorage, Storage};

    #[test]
    fn insert_refuses_duplicates_and_overflow() {
        let mut list = PositiveList::new();
        assert_eq!(list.insert("ESP32-DIMITRI"), AddOutcome::Added);
        assert_eq!(list.insert("ESP32-DIMITRI"), AddOutcome::Duplicate);

        for i in 1..MAX_CONTACTS {
            assert_eq!(list.insert(&format!("id-{i}")), AddOutcome::Added);
        }
        assert_eq!(list.insert("late"), AddOutcome::Full);
        assert_eq!(list.len(), MAX_CONTACTS);
    }

    #[test]
    fn remove_reports_whether_anything_changed() {
        let mut list = PositiveList::new();
        list.insert("a");
        list.insert("b");
        assert!(list.remove("a"));
        assert!(!list.remove("a"));
        assert_eq!(list.ids(), ["b".to_string()]);
    }

    #[test]
    fn reads_device_document() {
        let mut storage = MemStorage::new();
        storage
            .write(super::POSITIVES_FILE, br#"{"positive_list":["ESP32-DIMITRI","ESP32-NOA"]}"#)
            .unwrap();

        let list = PositiveList::load(&storage).unwrap();
        assert!(list.contains("ESP32-NOA"));
        assert!(!list.contains("ESP32-ADRIEN"));
        assert_eq!(list.len(), 2);
    }
}
