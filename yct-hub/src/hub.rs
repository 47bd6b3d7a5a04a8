use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use log::*;
use yct_core::{
    Bridge, BridgeError, Device, DeviceIdentity, DirStorage, Feeds, HealthStatus, LoopbackBroker,
    Request, Response, ScanResult, StaticNetworks, StoreError,
};

pub type SharedHub = Arc<tokio::sync::Mutex<Hub>>;

/// Name of the directory standing in for the device flash
const FLASH_DIR: &str = "spiffs";

pub struct Settings {
    pub device_name: String,
    pub io_username: String,
    /// Networks reported by the scan page
    pub networks: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("failed to prepare flash directory: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// One simulated device: its flash, its broker link and its scanner
pub struct Hub {
    device: Device<DirStorage>,
    bridge: Bridge<LoopbackBroker>,
    scanner: StaticNetworks,
}

pub fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

impl Hub {
    pub fn open(home: &Path, settings: Settings) -> Result<Self, OpenError> {
        let storage = DirStorage::new(home.join(FLASH_DIR))?;
        let identity = DeviceIdentity::new(settings.device_name);
        let feeds = Feeds::new(&settings.io_username, &identity);

        let mut device = Device::open(storage, identity)?;
        let mut bridge = Bridge::new(LoopbackBroker::new(), feeds);
        bridge.subscribe_all()?;
        let status = bridge.refresh_status(&mut device, now())?;
        info!("{} opened, {status}", device.identity());

        let scanner = StaticNetworks(settings.networks.into_iter().map(ScanResult::open).collect());
        Ok(Self {
            device,
            bridge,
            scanner,
        })
    }

    pub fn device(&self) -> &Device<DirStorage> {
        &self.device
    }

    pub fn bridge(&self) -> &Bridge<LoopbackBroker> {
        &self.bridge
    }

    /// Serve a request, then deliver whatever it published
    pub fn handle(&mut self, now: NaiveDateTime, request: &Request) -> Response {
        let response = yct_core::handle_request(
            &mut self.device,
            &mut self.bridge,
            &mut self.scanner,
            now,
            request,
        );
        if let Err(e) = self.bridge.pump(&mut self.device, now) {
            warn!("delivering broker messages: {e}");
        }
        response
    }

    /// Drop contacts past the retention window and reclassify
    pub fn expire(&mut self, now: NaiveDateTime) -> Result<usize, BridgeError> {
        let removed = self.device.expire_contacts(now)?;
        self.bridge.refresh_status(&mut self.device, now)?;
        Ok(removed)
    }

    pub fn format(&mut self) -> Result<(), StoreError> {
        self.device.format()
    }

    pub fn status(&self) -> Result<HealthStatus, StoreError> {
        self.device.health_status()
    }
}

/// Expire contacts every `every`, forever
pub async fn run_expiry(hub: SharedHub, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let mut hub = hub.lock().await;
        match hub.expire(now()) {
            Ok(0) => debug!("no contact expired"),
            Ok(n) => info!("{n} contact(s) expired"),
            Err(e) => error!("contact expiry failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Hub, Settings};
    use chrono::NaiveDateTime;
    use yct_core::{HealthStatus, Request};

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, yct_core::TIMESTAMP_FORMAT).unwrap()
    }

    fn settings() -> Settings {
        Settings {
            device_name: "ESP32-MAXIME".to_string(),
            io_username: "alice".to_string(),
            networks: vec!["Livebox-1234".to_string()],
        }
    }

    #[test]
    fn reopening_keeps_the_flash() {
        let home = tempfile::tempdir().unwrap();
        let mut hub = Hub::open(home.path(), settings()).unwrap();
        let r = hub.handle(
            at("2024-04-11T12:17:08"),
            &Request::from_parts("POST", "/contact_tracer", None, "contact=ESP32-NOA"),
        );
        assert_eq!(r.status, 200);
        drop(hub);

        let hub = Hub::open(home.path(), settings()).unwrap();
        assert_eq!(hub.device().contacts().unwrap().len(), 1);
        assert!(home.path().join("spiffs/contacts.json").is_file());
    }

    #[test]
    fn telemetry_commands_are_delivered_after_the_request() {
        let home = tempfile::tempdir().unwrap();
        let mut hub = Hub::open(home.path(), settings()).unwrap();
        hub.handle(
            at("2024-04-11T12:17:08"),
            &Request::from_parts("GET", "/adafruit", Some("onoff=ON"), ""),
        );
        assert_eq!(hub.bridge().state().switch_on, Some(true));
    }

    #[test]
    fn expiry_clears_a_stale_contact_case() {
        let home = tempfile::tempdir().unwrap();
        let mut hub = Hub::open(home.path(), settings()).unwrap();
        hub.handle(
            at("2024-03-01T08:00:00"),
            &Request::from_parts(
                "POST",
                "/contact_tracer",
                None,
                "contact=ESP32-NOA&positive=ESP32-NOA",
            ),
        );
        assert_eq!(hub.status().unwrap(), HealthStatus::ContactCase);

        assert_eq!(hub.expire(at("2024-04-11T08:00:00")).unwrap(), 1);
        assert_eq!(hub.status().unwrap(), HealthStatus::Negative);
        assert_eq!(
            hub.bridge().state().last_status,
            Some(HealthStatus::Negative)
        );
    }
}
