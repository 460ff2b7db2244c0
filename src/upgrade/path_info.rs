//! `UpgradePathInfo` and `ClientIntroduction` — the descriptors carried by
//! the first two control messages of the upgrade handshake.

use crate::bytes::{ByteReader, ByteWriter, BytesError};
use crate::model::{EndpointId, Medium};

fn write_string(w: &mut ByteWriter, s: &str) {
    let bytes = s.as_bytes();
    w.write_u16_be(bytes.len() as u16);
    w.write_slice(bytes);
}

fn read_string<'a>(r: &mut ByteReader<'a>) -> Result<String, BytesError> {
    let len = r.read_u16_be()? as usize;
    let bytes = r.read_slice(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| BytesError::InvalidLength)
}

/// The medium-specific half of an [`UpgradePathInfo`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum UpgradePath {
    Bluetooth {
        service_name: String,
        mac_address: String,
    },
    WifiLan {
        ip_address: String,
        port: u16,
    },
    WifiHotspot {
        ssid: String,
        password: String,
        port: u16,
        gateway: String,
        frequency: i32,
        supports_disabling_encryption: bool,
    },
    WifiDirect {
        ssid: String,
        password: String,
        port: u16,
        gateway: String,
        frequency: i32,
        supports_disabling_encryption: bool,
    },
    WifiAware {
        service_id: String,
        service_info: String,
        password: String,
        supports_disabling_encryption: bool,
    },
    WebRtc {
        peer_id: String,
        location_hint: String,
    },
}

impl UpgradePath {
    pub fn medium(&self) -> Medium {
        match self {
            UpgradePath::Bluetooth { .. } => Medium::Bluetooth,
            UpgradePath::WifiLan { .. } => Medium::WifiLan,
            UpgradePath::WifiHotspot { .. } => Medium::WifiHotspot,
            UpgradePath::WifiDirect { .. } => Medium::WifiDirect,
            UpgradePath::WifiAware { .. } => Medium::WifiAware,
            UpgradePath::WebRtc { .. } => Medium::WebRtc,
        }
    }

    /// Whether this path's responder can be asked to drop encryption on its
    /// best-effort disconnect write. Bluetooth has no such
    /// field in the original; it is simply not supported there.
    pub fn supports_disabling_encryption(&self) -> bool {
        match self {
            UpgradePath::Bluetooth { .. } => false,
            UpgradePath::WifiLan { .. } => false,
            UpgradePath::WifiHotspot {
                supports_disabling_encryption,
                ..
            }
            | UpgradePath::WifiDirect {
                supports_disabling_encryption,
                ..
            }
            | UpgradePath::WifiAware {
                supports_disabling_encryption,
                ..
            } => *supports_disabling_encryption,
            UpgradePath::WebRtc { .. } => false,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            UpgradePath::Bluetooth { .. } => 0,
            UpgradePath::WifiLan { .. } => 1,
            UpgradePath::WifiHotspot { .. } => 2,
            UpgradePath::WifiDirect { .. } => 3,
            UpgradePath::WifiAware { .. } => 4,
            UpgradePath::WebRtc { .. } => 5,
        }
    }

    fn write(&self, w: &mut ByteWriter) {
        w.write_u8(self.tag());
        match self {
            UpgradePath::Bluetooth {
                service_name,
                mac_address,
            } => {
                write_string(w, service_name);
                write_string(w, mac_address);
            }
            UpgradePath::WifiLan { ip_address, port } => {
                write_string(w, ip_address);
                w.write_u16_be(*port);
            }
            UpgradePath::WifiHotspot {
                ssid,
                password,
                port,
                gateway,
                frequency,
                supports_disabling_encryption,
            } => {
                write_string(w, ssid);
                write_string(w, password);
                w.write_u16_be(*port);
                write_string(w, gateway);
                w.write_u32_be(*frequency as u32);
                w.write_u8(*supports_disabling_encryption as u8);
            }
            UpgradePath::WifiDirect {
                ssid,
                password,
                port,
                gateway,
                frequency,
                supports_disabling_encryption,
            } => {
                write_string(w, ssid);
                write_string(w, password);
                w.write_u16_be(*port);
                write_string(w, gateway);
                w.write_u32_be(*frequency as u32);
                w.write_u8(*supports_disabling_encryption as u8);
            }
            UpgradePath::WifiAware {
                service_id,
                service_info,
                password,
                supports_disabling_encryption,
            } => {
                write_string(w, service_id);
                write_string(w, service_info);
                write_string(w, password);
                w.write_u8(*supports_disabling_encryption as u8);
            }
            UpgradePath::WebRtc {
                peer_id,
                location_hint,
            } => {
                write_string(w, peer_id);
                write_string(w, location_hint);
            }
        }
    }

    fn read(r: &mut ByteReader) -> Result<Self, BytesError> {
        let tag = r.read_u8()?;
        Ok(match tag {
            0 => UpgradePath::Bluetooth {
                service_name: read_string(r)?,
                mac_address: read_string(r)?,
            },
            1 => UpgradePath::WifiLan {
                ip_address: read_string(r)?,
                port: r.read_u16_be()?,
            },
            2 => UpgradePath::WifiHotspot {
                ssid: read_string(r)?,
                password: read_string(r)?,
                port: r.read_u16_be()?,
                gateway: read_string(r)?,
                frequency: r.read_u32_be()? as i32,
                supports_disabling_encryption: r.read_u8()? != 0,
            },
            3 => UpgradePath::WifiDirect {
                ssid: read_string(r)?,
                password: read_string(r)?,
                port: r.read_u16_be()?,
                gateway: read_string(r)?,
                frequency: r.read_u32_be()? as i32,
                supports_disabling_encryption: r.read_u8()? != 0,
            },
            4 => UpgradePath::WifiAware {
                service_id: read_string(r)?,
                service_info: read_string(r)?,
                password: read_string(r)?,
                supports_disabling_encryption: r.read_u8()? != 0,
            },
            5 => UpgradePath::WebRtc {
                peer_id: read_string(r)?,
                location_hint: read_string(r)?,
            },
            _ => return Err(BytesError::InvalidLength),
        })
    }
}

/// A per-medium description generated by the initiator, sufficient for the
/// responder to dial.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UpgradePathInfo {
    pub medium: Medium,
    pub supports_client_introduction_ack: bool,
    pub path: UpgradePath,
}

impl UpgradePathInfo {
    pub fn new(path: UpgradePath, supports_client_introduction_ack: bool) -> Self {
        Self {
            medium: path.medium(),
            supports_client_introduction_ack,
            path,
        }
    }

    pub fn bluetooth(service_name: impl Into<String>, mac_address: impl Into<String>) -> Self {
        Self::new(
            UpgradePath::Bluetooth {
                service_name: service_name.into(),
                mac_address: mac_address.into(),
            },
            false,
        )
    }

    pub fn wifi_lan(ip_address: impl Into<String>, port: u16) -> Self {
        Self::new(
            UpgradePath::WifiLan {
                ip_address: ip_address.into(),
                port,
            },
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn wifi_hotspot(
        ssid: impl Into<String>,
        password: impl Into<String>,
        port: u16,
        gateway: impl Into<String>,
        frequency: i32,
        supports_disabling_encryption: bool,
    ) -> Self {
        Self::new(
            UpgradePath::WifiHotspot {
                ssid: ssid.into(),
                password: password.into(),
                port,
                gateway: gateway.into(),
                frequency,
                supports_disabling_encryption,
            },
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn wifi_direct(
        ssid: impl Into<String>,
        password: impl Into<String>,
        port: u16,
        gateway: impl Into<String>,
        frequency: i32,
        supports_disabling_encryption: bool,
    ) -> Self {
        Self::new(
            UpgradePath::WifiDirect {
                ssid: ssid.into(),
                password: password.into(),
                port,
                gateway: gateway.into(),
                frequency,
                supports_disabling_encryption,
            },
            false,
        )
    }

    pub fn webrtc(peer_id: impl Into<String>, location_hint: impl Into<String>) -> Self {
        Self::new(
            UpgradePath::WebRtc {
                peer_id: peer_id.into(),
                location_hint: location_hint.into(),
            },
            false,
        )
    }

    pub fn with_client_introduction_ack(mut self, supported: bool) -> Self {
        self.supports_client_introduction_ack = supported;
        self
    }

    pub(crate) fn write(&self, w: &mut ByteWriter) {
        w.write_u8(self.supports_client_introduction_ack as u8);
        self.path.write(w);
    }

    pub(crate) fn read(r: &mut ByteReader) -> Result<Self, BytesError> {
        let ack = r.read_u8()? != 0;
        let path = UpgradePath::read(r)?;
        Ok(Self::new(path, ack))
    }
}

/// First frame written by the responder on the newly-dialed channel,
/// identifying itself.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClientIntroduction {
    pub endpoint_id: EndpointId,
    pub supports_disabling_encryption: bool,
}

impl ClientIntroduction {
    pub(crate) fn write(&self, w: &mut ByteWriter) {
        write_string(w, &self.endpoint_id);
        w.write_u8(self.supports_disabling_encryption as u8);
    }

    pub(crate) fn read(r: &mut ByteReader) -> Result<Self, BytesError> {
        Ok(Self {
            endpoint_id: read_string(r)?,
            supports_disabling_encryption: r.read_u8()? != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(info: UpgradePathInfo) {
        let mut w = ByteWriter::new();
        info.write(&mut w);
        let bytes = w.into_vec();
        let mut r = ByteReader::new(&bytes);
        let decoded = UpgradePathInfo::read(&mut r).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn wifi_lan_round_trips() {
        round_trip(UpgradePathInfo::wifi_lan("10.0.0.5", 4242));
    }

    #[test]
    fn wifi_direct_round_trips() {
        round_trip(UpgradePathInfo::wifi_direct(
            "DIRECT-ab-hello",
            "password123",
            80,
            "192.168.49.1",
            -1,
            true,
        ));
    }

    #[test]
    fn bluetooth_round_trips() {
        round_trip(UpgradePathInfo::bluetooth("svc", "AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn client_introduction_round_trips() {
        let ci = ClientIntroduction {
            endpoint_id: "1".into(),
            supports_disabling_encryption: true,
        };
        let mut w = ByteWriter::new();
        ci.write(&mut w);
        let bytes = w.into_vec();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(ClientIntroduction::read(&mut r).unwrap(), ci);
    }
}
