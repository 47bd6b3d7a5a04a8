//! Turning nearby sightings into contacts
//!
//! A device seen nearby only becomes a contact after it stayed in range for
//! the configured stand-by time. Each encounter yields at most one record; a
//! device that disappears for longer than `lost_after` starts a new encounter
//! when it comes back.

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use log::*;

use crate::contacts::ContactRecord;

#[derive(Debug, Clone)]
struct Encounter {
    first_seen: NaiveDateTime,
    last_seen: NaiveDateTime,
    recorded: bool,
}

#[derive(Debug, Default)]
pub struct ProximityTracker {
    encounters: HashMap<String, Encounter>,
}

impl ProximityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of devices currently in an encounter
    pub fn tracked(&self) -> usize {
        self.encounters.len()
    }

    /// Register that `id` was seen at `now`. Returns the contact to store once
    /// the encounter has lasted `stand_by`.
    pub fn observe(
        &mut self,
        own: &str,
        id: &str,
        now: NaiveDateTime,
        stand_by: Duration,
        lost_after: Duration,
    ) -> Option<ContactRecord> {
        if id == own {
            return None;
        }

        let encounter = self
            .encounters
            .entry(id.to_string())
            .or_insert_with(|| Encounter {
                first_seen: now,
                last_seen: now,
                recorded: false,
            });

        if now - encounter.last_seen > lost_after {
            debug!("{id} back in range, new encounter");
            *encounter = Encounter {
                first_seen: now,
                last_seen: now,
                recorded: false,
            };
        }
        encounter.last_seen = now;

        if encounter.recorded || now - encounter.first_seen < stand_by {
            return None;
        }

        encounter.recorded = true;
        info!(
            "{id} nearby since {}, recording contact",
            encounter.first_seen.format("%H:%M:%S")
        );
        Some(ContactRecord::new(own, id, now))
    }

    /// Forget devices not seen for longer than `lost_after`
    pub fn prune(&mut self, now: NaiveDateTime, lost_after: Duration) {
        self.encounters
            .retain(|_, encounter| now - encounter.last_seen <= lost_after);
    }
}

#[cfg(test)]
mod tests {
    use super::ProximityTracker;
    use chrono::{Duration, NaiveDateTime};

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, crate::TIMESTAMP_FORMAT).unwrap()
    }

    const OWN: &str = "ESP32-MAXIME";

    #[test]
    fn contact_after_stand_by_and_only_once() {
        let mut tracker = ProximityTracker::new();
        let stand_by = Duration::minutes(5);
        let lost = Duration::minutes(2);

        let seen = |t: &mut ProximityTracker, s: &str| {
            t.observe(OWN, "ESP32-NOA", at(s), stand_by, lost)
        };

        assert!(seen(&mut tracker, "2024-04-11T12:00:00").is_none());
        assert!(seen(&mut tracker, "2024-04-11T12:02:00").is_none());
        assert!(seen(&mut tracker, "2024-04-11T12:04:00").is_none());
        let record = seen(&mut tracker, "2024-04-11T12:05:30").unwrap();
        assert_eq!(record.id_a, OWN);
        assert_eq!(record.id_b, "ESP32-NOA");
        assert_eq!(record.observed_at, at("2024-04-11T12:05:30"));

        assert!(seen(&mut tracker, "2024-04-11T12:06:00").is_none());
    }

    #[test]
    fn gap_restarts_the_encounter() {
        let mut tracker = ProximityTracker::new();
        let stand_by = Duration::minutes(5);
        let lost = Duration::minutes(2);

        tracker.observe(OWN, "ESP32-NOA", at("2024-04-11T12:00:00"), stand_by, lost);
        // gone for 4 minutes, the clock starts again
        assert!(tracker
            .observe(OWN, "ESP32-NOA", at("2024-04-11T12:04:00"), stand_by, lost)
            .is_none());
        assert!(tracker
            .observe(OWN, "ESP32-NOA", at("2024-04-11T12:06:00"), stand_by, lost)
            .is_none());
        assert!(tracker
            .observe(OWN, "ESP32-NOA", at("2024-04-11T12:08:00"), stand_by, lost)
            .is_none());
        assert!(tracker
            .observe(OWN, "ESP32-NOA", at("2024-04-11T12:09:00"), stand_by, lost)
            .is_some());
    }

    #[test]
    fn zero_stand_by_records_on_first_sighting_and_own_id_is_ignored() {
        let mut tracker = ProximityTracker::new();
        let t = at("2024-04-11T12:00:00");
        assert!(tracker
            .observe(OWN, OWN, t, Duration::zero(), Duration::minutes(1))
            .is_none());
        assert!(tracker
            .observe(OWN, "ESP32-NOA", t, Duration::zero(), Duration::minutes(1))
            .is_some());
    }

    #[test]
    fn prune_forgets_stale_devices() {
        let mut tracker = ProximityTracker::new();
        let lost = Duration::minutes(2);
        tracker.observe(OWN, "a", at("2024-04-11T12:00:00"), Duration::minutes(5), lost);
        tracker.observe(OWN, "b", at("2024-04-11T12:03:00"), Duration::minutes(5), lost);

        tracker.prune(at("2024-04-11T12:04:00"), lost);
        assert_eq!(tracker.tracked(), 1);
    }
}
