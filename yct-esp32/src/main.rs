//! YCT Contact Tracer for ESP32
//!
//! This firmware keeps its documents on SPIFFS, serves the device pages,
//! bridges the Adafruit IO feeds over MQTT and records nearby YCT devices
//! as contacts from BLE advertisements.

mod ble;
mod mqtt;
mod server;

use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    nvs::EspDefaultNvsPartition,
    sntp::{EspSntp, SyncStatus},
    wifi::{
        AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration,
        EspWifi,
    },
};
use log::*;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use yct_core::{
    Bridge, Config, ContactRecord, Device, DeviceIdentity, DirStorage, Feeds, NetworkScanner,
    Request, Response, ScanResult,
};

// Configuration
const DEVICE_NAME: &str = "ESP32-MAXIME";
const IO_SERVER: &str = "mqtt://io.adafruit.com:1883";
const IO_USERNAME: &str = env!("YCT_IO_USERNAME");
const IO_KEY: &str = env!("YCT_IO_KEY");
const SPIFFS_ROOT: &str = "/spiffs";
const EXPIRY_PERIOD: Duration = Duration::from_secs(60 * 60);

pub type SharedWifi = Arc<Mutex<BlockingWifi<EspWifi<'static>>>>;
pub type SharedState = Arc<Mutex<State>>;

pub fn now() -> chrono::NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Everything the HTTP handlers, the MQTT receiver and the BLE scanner share
pub struct State {
    device: Device<DirStorage>,
    bridge: Bridge<mqtt::EspBroker>,
    scanner: WifiScanner,
}

impl State {
    pub fn identity(&self) -> &DeviceIdentity {
        self.device.identity()
    }

    pub fn handle(&mut self, request: &Request) -> Response {
        yct_core::handle_request(
            &mut self.device,
            &mut self.bridge,
            &mut self.scanner,
            now(),
            request,
        )
    }

    /// Broker session (re)established
    pub fn on_connected(&mut self) -> anyhow::Result<()> {
        self.bridge.subscribe_all()?;
        let status = self.bridge.refresh_status(&mut self.device, now())?;
        info!("{}: {status}", self.device.identity());
        Ok(())
    }

    pub fn on_message(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        self.bridge.handle(&mut self.device, now(), topic, payload)?;
        Ok(())
    }

    pub fn config(&self) -> anyhow::Result<Config> {
        Ok(self.device.config()?)
    }

    /// Store a contact found by proximity
    pub fn record_contact(&mut self, record: ContactRecord) -> anyhow::Result<()> {
        let at = record.observed_at;
        let outcome = self.device.add_contact(record)?;
        info!("proximity contact: {outcome:?}");
        self.bridge.refresh_status(&mut self.device, at)?;
        Ok(())
    }

    fn expire(&mut self) -> anyhow::Result<usize> {
        let at = now();
        let removed = self.device.expire_contacts(at)?;
        self.bridge.refresh_status(&mut self.device, at)?;
        Ok(removed)
    }
}

/// Scans with the station interface
pub struct WifiScanner(SharedWifi);

impl NetworkScanner for WifiScanner {
    type Error = anyhow::Error;

    fn scan(&mut self) -> anyhow::Result<Vec<ScanResult>> {
        let mut wifi = self
            .0
            .lock()
            .map_err(|_| anyhow::anyhow!("wifi lock poisoned"))?;
        let found = wifi.scan()?;
        Ok(found
            .into_iter()
            .map(|ap| ScanResult {
                ssid: ap.ssid.to_string(),
                channel: ap.channel,
                rssi: ap.signal_strength,
                auth_required: ap.auth_method.is_some_and(|m| m != AuthMethod::None),
            })
            .collect())
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("YCT contact tracer v0.1, {DEVICE_NAME}");

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    mount_spiffs()?;
    let device = Device::open(
        DirStorage::mounted(SPIFFS_ROOT),
        DeviceIdentity::new(DEVICE_NAME),
    )?;
    let config = device.config()?;
    info!(
        "contacts kept {} day(s), stand-by {} minute(s)",
        config.days_of_historic, config.minutes_stand_by
    );

    let wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs))?,
        sys_loop,
    )?;
    let wifi: SharedWifi = Arc::new(Mutex::new(wifi));
    if let Ok(mut wifi) = wifi.lock() {
        if let Err(e) = start_wifi(&mut wifi, &config) {
            warn!("station not connected ({e:?}), pages stay reachable on {}", config.ap_ssid);
        }
    }

    let sntp = EspSntp::new_default()?;
    wait_for_time(&sntp);

    let (broker, connection) = mqtt::connect(IO_SERVER, DEVICE_NAME, IO_USERNAME, IO_KEY);
    let identity = device.identity().clone();
    let state: SharedState = Arc::new(Mutex::new(State {
        device,
        bridge: Bridge::new(broker, Feeds::new(IO_USERNAME, &identity)),
        scanner: WifiScanner(wifi.clone()),
    }));

    mqtt::spawn_receiver(state.clone(), connection)?;
    let _server = server::start(state.clone())?;
    ble::spawn_scanner(state.clone())?;

    let mut last_expiry = Instant::now();
    loop {
        std::thread::sleep(yct_core::RECONNECT_DELAY);
        ensure_wifi_connected(&wifi);

        if last_expiry.elapsed() >= EXPIRY_PERIOD {
            last_expiry = Instant::now();
            match state.lock() {
                Ok(mut state) => match state.expire() {
                    Ok(n) => info!("{n} contact(s) expired"),
                    Err(e) => error!("contact expiry failed: {e:?}"),
                },
                Err(_) => error!("state lock poisoned"),
            }
        }
    }
}

fn mount_spiffs() -> anyhow::Result<()> {
    let base_path = std::ffi::CString::new(SPIFFS_ROOT)?;
    let conf = esp_idf_svc::sys::esp_vfs_spiffs_conf_t {
        base_path: base_path.as_ptr(),
        partition_label: std::ptr::null(),
        max_files: 5,
        format_if_mount_failed: true,
    };
    esp_idf_svc::sys::esp!(unsafe { esp_idf_svc::sys::esp_vfs_spiffs_register(&conf) })?;
    info!("SPIFFS mounted on {SPIFFS_ROOT}");
    Ok(())
}

/// Station on the configured network plus an access point serving the pages
fn start_wifi(wifi: &mut BlockingWifi<EspWifi<'static>>, config: &Config) -> anyhow::Result<()> {
    let client = ClientConfiguration {
        ssid: config
            .ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow::anyhow!("SSID too long"))?,
        password: config
            .password
            .as_str()
            .try_into()
            .map_err(|_| anyhow::anyhow!("Password too long"))?,
        ..Default::default()
    };
    let access_point = AccessPointConfiguration {
        ssid: config
            .ap_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow::anyhow!("AP SSID too long"))?,
        password: config
            .ap_password
            .as_str()
            .try_into()
            .map_err(|_| anyhow::anyhow!("AP password too long"))?,
        auth_method: AuthMethod::WPA2Personal,
        ..Default::default()
    };

    wifi.set_configuration(&Configuration::Mixed(client, access_point))?;
    wifi.start()?;
    info!("WiFi started, access point {}", config.ap_ssid);

    info!("Connecting to {}...", config.ssid);
    wifi.connect()?;
    wifi.wait_netif_up()?;
    info!("WiFi connected, IP: {:?}", wifi.wifi().sta_netif().get_ip_info()?);
    Ok(())
}

/// One reconnection attempt when the station is down
fn ensure_wifi_connected(wifi: &SharedWifi) {
    let Ok(mut wifi) = wifi.lock() else {
        error!("wifi lock poisoned");
        return;
    };
    if wifi.is_connected().unwrap_or(false) {
        return;
    }

    warn!("WiFi disconnected, attempting to reconnect...");
    match wifi.connect().and_then(|_| wifi.wait_netif_up()) {
        Ok(()) => info!("WiFi reconnected"),
        Err(e) => warn!(
            "WiFi reconnect failed: {e:?}, retrying in {}s",
            yct_core::RECONNECT_DELAY.as_secs()
        ),
    }
}

/// Contacts are timestamped, so wait a little for SNTP
fn wait_for_time(sntp: &EspSntp) {
    for _ in 0..30 {
        if sntp.get_sync_status() == SyncStatus::Completed {
            info!("time synchronized: {}", now().format(yct_core::TIMESTAMP_FORMAT));
            return;
        }
        std::thread::sleep(Duration::from_secs(1));
    }
    warn!("time not synchronized yet, timestamps may be wrong");
}
