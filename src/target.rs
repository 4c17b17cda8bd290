//! The device and characteristic a run targets.

use std::fmt;
use std::str::FromStr;

use btleplug::api::BDAddr;
use uuid::Uuid;

use crate::ble::uuids::uuid_from_fragment;
use crate::error::{Error, Result};

/// Which device to connect to and which characteristic to read.
///
/// Built once from user input and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSelector {
    address: BDAddr,
    mac_address: String,
    service: String,
    characteristic: String,
}

impl TargetSelector {
    /// Validate and normalize user input.
    ///
    /// The MAC address is accepted in any case and stored uppercase; the
    /// 4-hex-digit service and characteristic identifiers are stored
    /// lowercase.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for a malformed address or
    /// identifier.
    pub fn new(mac_address: &str, service: &str, characteristic: &str) -> Result<Self> {
        let mac_address = mac_address.trim();
        let address = BDAddr::from_str(mac_address).map_err(|_| Error::InvalidParameter {
            name: "mac_address".to_string(),
            value: mac_address.to_string(),
        })?;

        Ok(Self {
            address,
            mac_address: address.to_string().to_uppercase(),
            service: normalize_fragment("service", service)?,
            characteristic: normalize_fragment("characteristic", characteristic)?,
        })
    }

    /// Bluetooth device address.
    pub fn address(&self) -> BDAddr {
        self.address
    }

    /// MAC address, uppercase and colon separated.
    pub fn mac_address(&self) -> &str {
        &self.mac_address
    }

    /// Lowercase 16-bit service identifier.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Lowercase 16-bit characteristic identifier.
    pub fn characteristic(&self) -> &str {
        &self.characteristic
    }

    /// Full service UUID.
    pub fn service_uuid(&self) -> Uuid {
        // Validated in `new`.
        uuid_from_fragment(&self.service).unwrap_or_default()
    }

    /// Full characteristic UUID.
    pub fn characteristic_uuid(&self) -> Uuid {
        uuid_from_fragment(&self.characteristic).unwrap_or_default()
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} service {} characteristic {}",
            self.mac_address, self.service, self.characteristic
        )
    }
}

fn normalize_fragment(name: &str, fragment: &str) -> Result<String> {
    let fragment = fragment.trim().to_lowercase();
    match uuid_from_fragment(&fragment) {
        Some(_) => Ok(fragment),
        None => Err(Error::InvalidParameter {
            name: name.to_string(),
            value: fragment,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalizes_case() {
        let target = TargetSelector::new("aa:bb:cc:dd:ee:0f", "180A", "2A26").unwrap();
        assert_eq!(target.mac_address(), "AA:BB:CC:DD:EE:0F");
        assert_eq!(target.service(), "180a");
        assert_eq!(target.characteristic(), "2a26");
    }

    #[test]
    fn test_uuids() {
        let target = TargetSelector::new("AA:BB:CC:DD:EE:FF", "180a", "2a26").unwrap();
        assert_eq!(
            target.service_uuid().to_string(),
            "0000180a-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            target.characteristic_uuid().to_string(),
            "00002a26-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_rejects_bad_address() {
        let err = TargetSelector::new("not-a-mac", "180a", "2a26").unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref name, .. } if name == "mac_address"));
    }

    #[test]
    fn test_rejects_bad_fragments() {
        let err = TargetSelector::new("AA:BB:CC:DD:EE:FF", "180", "2a26").unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref name, .. } if name == "service"));

        let err = TargetSelector::new("AA:BB:CC:DD:EE:FF", "180a", "2g26").unwrap_err();
        assert!(
            matches!(err, Error::InvalidParameter { ref name, .. } if name == "characteristic")
        );
    }

    #[test]
    fn test_display() {
        let target = TargetSelector::new("aa:bb:cc:dd:ee:ff", "180a", "2a26").unwrap();
        assert_eq!(
            target.to_string(),
            "AA:BB:CC:DD:EE:FF service 180a characteristic 2a26"
        );
    }
}
