use std::collections::HashMap;

use uuid::Uuid;

/// Advertisement payload, either received during a scan or handed to
/// `PeripheralManager::start_advertising`.
///
/// CoreBluetooth only honours `local_name` and `service_uuids` when
/// advertising; the remaining fields are filled in on the scanning side.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AdvertisementData {
    pub local_name: Option<String>,
    pub service_uuids: Vec<Uuid>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    pub tx_power_level: Option<i16>,
    pub is_connectable: Option<bool>,
}

impl AdvertisementData {
    pub fn new(local_name: &str, service_uuids: &[Uuid]) -> Self {
        AdvertisementData {
            local_name: Some(local_name.to_string()),
            service_uuids: service_uuids.to_vec(),
            ..Default::default()
        }
    }

    /// Whether a scan filter lets this advertisement through. No filter
    /// matches everything.
    pub fn matches(&self, filter: Option<&std::collections::BTreeSet<Uuid>>) -> bool {
        match filter {
            None => true,
            Some(services) => self
                .service_uuids
                .iter()
                .any(|service| services.contains(service)),
        }
    }
}
