//! BLE proximity
//!
//! Every YCT device advertises its identity as its BLE name and scans
//! passively for the others. Names seen in a scan window feed the
//! [`ProximityTracker`]; a device that stays close for `minutes_stand_by`
//! becomes a contact.

use chrono::Duration;
use esp32_nimble::{BLEAdvertisementData, BLEDevice, BLEScan};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::task::block_on;
use log::*;
use std::cell::RefCell;
use std::thread;
use yct_core::ProximityTracker;

use crate::SharedState;

/// Identities of YCT devices start with this
const ID_PREFIX: &str = "ESP32-";

/// Scan duration in milliseconds for each scan cycle
const SCAN_DURATION_MS: i32 = 5000;

/// Delay between scan cycles in milliseconds
const SCAN_INTERVAL_MS: u32 = 1000;

/// A device unseen for this long has left
fn lost_after() -> Duration {
    Duration::minutes(2)
}

pub fn spawn_scanner(state: SharedState) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("ble-scan".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            if let Err(e) = block_on(run(state)) {
                error!("BLE scanner stopped: {e:?}");
            }
        })?;
    Ok(())
}

async fn run(state: SharedState) -> anyhow::Result<()> {
    let own = match state.lock() {
        Ok(state) => state.identity().as_str().to_string(),
        Err(_) => anyhow::bail!("state lock poisoned"),
    };

    let ble_device = BLEDevice::take();
    let advertising = ble_device.get_advertising();
    advertising
        .lock()
        .set_data(BLEAdvertisementData::new().name(&own))
        .map_err(|e| anyhow::anyhow!("advertising data: {e:?}"))?;
    advertising
        .lock()
        .start()
        .map_err(|e| anyhow::anyhow!("advertising start: {e:?}"))?;
    info!("BLE advertising as '{own}'");

    let mut ble_scan = BLEScan::new();
    ble_scan.active_scan(false).interval(100).window(50);
    let mut tracker = ProximityTracker::new();

    loop {
        let seen = RefCell::new(Vec::<String>::new());
        let scanned = ble_scan
            .start(ble_device, SCAN_DURATION_MS, |_device, data| {
                if let Some(name) = data.name() {
                    let name = name.to_string();
                    let mut seen = seen.borrow_mut();
                    if name.starts_with(ID_PREFIX) && !seen.contains(&name) {
                        seen.push(name);
                    }
                }
                None::<()>
            })
            .await;
        if let Err(e) = scanned {
            warn!("Scan error: {e:?}");
            FreeRtos::delay_ms(100);
            continue;
        }

        let now = crate::now();
        match state.lock() {
            Ok(mut state) => {
                let stand_by = match state.config() {
                    Ok(config) => Duration::minutes(i64::from(config.minutes_stand_by)),
                    Err(e) => {
                        warn!("{e:#}");
                        continue;
                    }
                };
                for id in seen.into_inner() {
                    if let Some(record) = tracker.observe(&own, &id, now, stand_by, lost_after()) {
                        if let Err(e) = state.record_contact(record) {
                            warn!("saving contact with {id}: {e:#}");
                        }
                    }
                }
            }
            Err(_) => anyhow::bail!("state lock poisoned"),
        }
        tracker.prune(now, lost_after());

        FreeRtos::delay_ms(SCAN_INTERVAL_MS);
    }
}
