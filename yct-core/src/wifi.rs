//! WiFi Scan Abstraction
//!
//! The firmware scans with its radio; the hub has none and reports the
//! networks it was told about.

/// WiFi network scan result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub ssid: String,
    pub channel: u8,
    pub rssi: i8,
    pub auth_required: bool,
}

impl ScanResult {
    pub fn open(ssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            channel: 0,
            rssi: 0,
            auth_required: false,
        }
    }
}

/// Trait for scanning nearby networks
pub trait NetworkScanner {
    /// Error type for scan operations
    type Error: std::fmt::Display;

    /// Scan for available networks (blocking)
    fn scan(&mut self) -> Result<Vec<ScanResult>, Self::Error>;
}

/// A fixed list of networks
#[derive(Debug, Clone, Default)]
pub struct StaticNetworks(pub Vec<ScanResult>);

impl NetworkScanner for StaticNetworks {
    type Error = std::convert::Infallible;

    fn scan(&mut self) -> Result<Vec<ScanResult>, Self::Error> {
        Ok(self.0.clone())
    }
}
