//! Health status of this device

use crate::contacts::ContactList;
use crate::positives::PositiveList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// No contact of this device is a positive case
    Negative,
    /// At least one contact of this device is a positive case
    ContactCase,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Negative => "négatif",
            HealthStatus::ContactCase => "cas contact",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device is a contact case when anyone it met is in the positive list.
/// Records that do not involve `own` play no part, and contacts of contacts
/// are not followed.
pub fn classify(own: &str, contacts: &ContactList, positives: &PositiveList) -> HealthStatus {
    if contacts.partners_of(own).any(|partner| positives.contains(partner)) {
        HealthStatus::ContactCase
    } else {
        HealthStatus::Negative
    }
}

#[cfg(test)]
mod tests {
    use super::{classify, HealthStatus};
    use crate::contacts::{ContactList, ContactRecord};
    use crate::positives::PositiveList;
    use chrono::NaiveDateTime;

    fn contacts(pairs: &[(&str, &str)]) -> ContactList {
        let t = NaiveDateTime::parse_from_str("2024-04-11T12:17:08", crate::TIMESTAMP_FORMAT).unwrap();
        let mut list = ContactList::new();
        for (a, b) in pairs {
            list.add(ContactRecord::new(*a, *b, t));
        }
        list
    }

    fn positives(ids: &[&str]) -> PositiveList {
        let mut list = PositiveList::new();
        for id in ids {
            list.insert(id);
        }
        list
    }

    #[test]
    fn positive_partner_makes_a_contact_case() {
        let c = contacts(&[("ESP32-NOA", "ESP32-MAXIME")]);
        let p = positives(&["ESP32-NOA"]);
        assert_eq!(classify("ESP32-MAXIME", &c, &p), HealthStatus::ContactCase);
        assert_eq!(classify("ESP32-MAXIME", &c, &p).to_string(), "cas contact");
    }

    #[test]
    fn no_link_means_negative() {
        let c = contacts(&[("ESP32-NOA", "ESP32-MAXIME")]);
        let p = positives(&["ESP32-DIMITRI"]);
        assert_eq!(classify("ESP32-MAXIME", &c, &p), HealthStatus::Negative);
        assert_eq!(HealthStatus::Negative.as_str(), "négatif");
    }

    #[test]
    fn records_between_other_devices_do_not_count() {
        let c = contacts(&[("ESP32-NOA", "ESP32-DIMITRI"), ("ESP32-MAXIME", "ESP32-ADRIEN")]);
        let p = positives(&["ESP32-NOA"]);
        assert_eq!(classify("ESP32-MAXIME", &c, &p), HealthStatus::Negative);
    }

    #[test]
    fn being_positive_yourself_is_not_a_contact_case() {
        let c = contacts(&[("ESP32-MAXIME", "ESP32-ADRIEN")]);
        let p = positives(&["ESP32-MAXIME"]);
        assert_eq!(classify("ESP32-MAXIME", &c, &p), HealthStatus::Negative);
    }
}
