//! GATT service tree and target resolution.
//!
//! The tree is populated in one piece when the adapter reports its services
//! resolved and is read-only afterwards.

use uuid::Uuid;

use crate::ble::uuids::uuid_from_fragment;
use crate::error::{Error, Result};

/// A GATT characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// Last value read, absent until a read succeeds.
    pub value: Option<Vec<u8>>,
}

impl Characteristic {
    /// Create a characteristic with no cached value.
    pub fn new(uuid: Uuid, service_uuid: Uuid) -> Self {
        Self {
            uuid,
            service_uuid,
            value: None,
        }
    }
}

/// A GATT service and its characteristics, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics of this service.
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    /// Create a service with the given characteristic UUIDs.
    pub fn new(uuid: Uuid, characteristics: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            uuid,
            characteristics: characteristics
                .into_iter()
                .map(|c| Characteristic::new(c, uuid))
                .collect(),
        }
    }
}

/// Locate the target service and characteristic by their 16-bit fragments.
///
/// First match in tree order wins for both lookups. A missing service and a
/// missing characteristic are both resolution failures; see
/// [`Error::is_target_not_found`].
pub fn resolve<'a>(
    services: &'a [Service],
    service_fragment: &str,
    characteristic_fragment: &str,
) -> Result<(&'a Service, &'a Characteristic)> {
    let service_uuid = expand(service_fragment, "service")?;
    let characteristic_uuid = expand(characteristic_fragment, "characteristic")?;

    let service = services
        .iter()
        .find(|s| s.uuid == service_uuid)
        .ok_or_else(|| Error::ServiceNotFound {
            uuid: service_uuid.to_string(),
        })?;

    let characteristic = service
        .characteristics
        .iter()
        .find(|c| c.uuid == characteristic_uuid)
        .ok_or_else(|| Error::CharacteristicNotFound {
            uuid: characteristic_uuid.to_string(),
        })?;

    Ok((service, characteristic))
}

fn expand(fragment: &str, name: &str) -> Result<Uuid> {
    uuid_from_fragment(fragment).ok_or_else(|| Error::InvalidParameter {
        name: name.to_string(),
        value: fragment.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::uuid_from_u16;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn device_info_tree() -> Vec<Service> {
        vec![
            Service::new(uuid_from_u16(0x1800), [uuid_from_u16(0x2a00)]),
            Service::new(
                uuid_from_u16(0x180a),
                [uuid_from_u16(0x2a29), uuid_from_u16(0x2a26)],
            ),
        ]
    }

    #[test]
    fn test_resolve_finds_pair() {
        let tree = device_info_tree();
        let (service, characteristic) = resolve(&tree, "180a", "2a26").unwrap();
        assert_eq!(service.uuid, uuid_from_u16(0x180a));
        assert_eq!(characteristic.uuid, uuid_from_u16(0x2a26));
        assert_eq!(characteristic.service_uuid, service.uuid);
    }

    #[test]
    fn test_resolve_missing_characteristic() {
        let tree = device_info_tree();
        let err = resolve(&tree, "180a", "ffff").unwrap_err();
        assert!(err.is_target_not_found());
        assert!(matches!(err, Error::CharacteristicNotFound { .. }));
    }

    #[test]
    fn test_resolve_missing_service() {
        let tree = device_info_tree();
        let err = resolve(&tree, "ffff", "2a26").unwrap_err();
        assert!(err.is_target_not_found());
        assert!(matches!(err, Error::ServiceNotFound { .. }));
    }

    #[test]
    fn test_resolve_empty_tree() {
        assert!(resolve(&[], "180a", "2a26").unwrap_err().is_target_not_found());
    }

    #[test]
    fn test_duplicate_services_pick_first() {
        let mut tree = device_info_tree();
        tree.push(Service::new(uuid_from_u16(0x180a), [uuid_from_u16(0x2a26)]));
        let (service, _) = resolve(&tree, "180a", "2a26").unwrap();
        assert!(std::ptr::eq(service, &tree[1]));
    }

    #[test]
    fn test_duplicate_service_without_characteristic_is_not_found() {
        // Only the first matching service is searched.
        let tree = vec![
            Service::new(uuid_from_u16(0x180a), [uuid_from_u16(0x2a29)]),
            Service::new(uuid_from_u16(0x180a), [uuid_from_u16(0x2a26)]),
        ];
        assert!(resolve(&tree, "180a", "2a26").unwrap_err().is_target_not_found());
    }

    #[test]
    fn test_bad_fragment_is_invalid_parameter() {
        let tree = device_info_tree();
        let err = resolve(&tree, "18", "2a26").unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    proptest! {
        #[test]
        fn prop_resolve_is_pure(service in 0u16..=0x20, characteristic in 0u16..=0x20) {
            let tree: Vec<Service> = (0u16..0x10)
                .map(|s| Service::new(uuid_from_u16(s), (0u16..0x10).map(uuid_from_u16)))
                .collect();
            let s = format!("{:04x}", service);
            let c = format!("{:04x}", characteristic);

            let first = resolve(&tree, &s, &c).map(|(s, c)| (s.uuid, c.uuid)).ok();
            let second = resolve(&tree, &s, &c).map(|(s, c)| (s.uuid, c.uuid)).ok();
            prop_assert_eq!(first, second);
            prop_assert_eq!(first.is_some(), service < 0x10 && characteristic < 0x10);
        }
    }
}
