//! BLE Service and Characteristic UUIDs.
//!
//! 16-bit assigned numbers are expanded into full 128-bit UUIDs through the
//! Bluetooth Base UUID `0000XXXX-0000-1000-8000-00805f9b34fb`.

use uuid::Uuid;

/// The Bluetooth Base UUID with the 16-bit alias slot zeroed.
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb);

// Battery Service (Standard BLE)
/// Standard BLE Battery Service UUID.
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_00805f9b34fb);
/// Battery Level characteristic UUID (Read, Notify).
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_00805f9b34fb);

/// Name of the battery sub-interface property changes are reported for.
pub const BATTERY_INTERFACE: &str = "org.bluez.Battery1";
/// Battery property carrying the charge level in percent.
pub const BATTERY_PERCENTAGE_PROPERTY: &str = "Percentage";

/// Expand a 16-bit alias into a full 128-bit UUID.
pub const fn uuid_from_u16(alias: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID.as_u128() | ((alias as u128) << 96))
}

/// Expand a 4-hex-digit fragment (e.g. `"180a"`) into a full UUID.
///
/// Returns `None` unless the fragment is exactly four hex digits.
pub fn uuid_from_fragment(fragment: &str) -> Option<Uuid> {
    if fragment.len() != 4 || !fragment.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(fragment, 16).ok().map(uuid_from_u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_expansion_matches_base_template() {
        let uuid = uuid_from_fragment("180a").unwrap();
        assert_eq!(uuid.to_string(), "0000180a-0000-1000-8000-00805f9b34fb");

        let uuid = uuid_from_fragment("2A26").unwrap();
        assert_eq!(uuid.to_string(), "00002a26-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_fragment_rejects_bad_input() {
        assert!(uuid_from_fragment("").is_none());
        assert!(uuid_from_fragment("180").is_none());
        assert!(uuid_from_fragment("180aa").is_none());
        assert!(uuid_from_fragment("zz0a").is_none());
        assert!(uuid_from_fragment("+18a").is_none());
    }

    #[test]
    fn test_battery_uuids() {
        assert_eq!(uuid_from_u16(0x180f), BATTERY_SERVICE_UUID);
        assert_eq!(uuid_from_u16(0x2a19), BATTERY_LEVEL_UUID);
    }
}
