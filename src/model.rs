//! Core data model shared across the upgrade and advertisement subsystems:
//! endpoints, services, and the medium/power-level tags attached to a
//! channel or advertisement.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Suffix appended to a `service_id` to derive its upgrade-listening
/// namespace. Advertising and upgrade-listening must not collide on the same
/// medium, so the upgrade path always listens/dials on the wrapped id.
const UPGRADE_SUFFIX: &str = "_UPGRADE";

/// A peer's opaque, printable identifier.
pub type EndpointId = String;

/// A discovery/advertising namespace identifier.
pub type ServiceId = String;

/// Derives the upgrade-service-id for `service_id`. Idempotent: wrapping an
/// already-wrapped id returns it unchanged.
pub fn wrap_service_id(service_id: &str) -> String {
    if is_wrapped(service_id) {
        service_id.to_string()
    } else {
        format!("{service_id}{UPGRADE_SUFFIX}")
    }
}

/// Returns whether `service_id` is already in wrapped (upgrade) form.
pub fn is_wrapped(service_id: &str) -> bool {
    service_id.ends_with(UPGRADE_SUFFIX)
}

/// A radio transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Medium {
    Unknown,
    Bluetooth,
    Ble,
    WifiLan,
    WifiHotspot,
    WifiDirect,
    WifiAware,
    WebRtc,
    Nfc,
    Mdns,
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Medium::Unknown => "UNKNOWN",
            Medium::Bluetooth => "BLUETOOTH",
            Medium::Ble => "BLE",
            Medium::WifiLan => "WIFI_LAN",
            Medium::WifiHotspot => "WIFI_HOTSPOT",
            Medium::WifiDirect => "WIFI_DIRECT",
            Medium::WifiAware => "WIFI_AWARE",
            Medium::WebRtc => "WEB_RTC",
            Medium::Nfc => "NFC",
            Medium::Mdns => "MDNS",
        };
        f.write_str(s)
    }
}

/// Cooperative cancellation flag for an in-flight dial, owned by the
/// client-facing layer and polled by `MediumHandler::create_upgraded_channel`.
/// Cloning shares the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Transmit power level advertised alongside a medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TxPowerLevel {
    Unknown,
    Low,
    Medium,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_is_idempotent() {
        for s in ["svc", "A", "B", "svc_UPGRADE", ""] {
            let once = wrap_service_id(s);
            let twice = wrap_service_id(&once);
            assert_eq!(once, twice, "wrap(wrap({s})) != wrap({s})");
        }
    }

    #[test]
    fn wrap_adds_suffix_exactly_once() {
        assert_eq!(wrap_service_id("svc"), "svc_UPGRADE");
        assert_eq!(wrap_service_id("svc_UPGRADE"), "svc_UPGRADE");
        assert!(is_wrapped(&wrap_service_id("svc")));
        assert!(!is_wrapped("svc"));
    }
}
