use std::collections::{BTreeSet, HashMap};

use uuid::Uuid;

use crate::api::advertisement::AdvertisementData;
use crate::api::central::PeripheralId;
use crate::api::service::MutableService;

/// A remote peripheral living in the simulated radio environment: what it
/// advertises and the GATT table it serves once connected.
#[derive(Clone, Debug)]
pub struct SimulatedDevice {
    pub(crate) id: PeripheralId,
    pub(crate) name: Option<String>,
    pub(crate) rssi: Option<i16>,
    pub(crate) advertisement: AdvertisementData,
    pub(crate) services: Vec<MutableService>,
    pub(crate) values: HashMap<(Uuid, Uuid), Vec<u8>>,
    pub(crate) connectable: bool,
    pub(crate) known: bool,
}

impl SimulatedDevice {
    pub fn new(id: PeripheralId) -> Self {
        SimulatedDevice {
            id,
            name: None,
            rssi: None,
            advertisement: AdvertisementData::default(),
            services: Vec::new(),
            values: HashMap::new(),
            connectable: true,
            known: false,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    pub fn with_advertisement(mut self, advertisement: AdvertisementData) -> Self {
        self.advertisement = advertisement;
        self
    }

    /// Adds a service to the device's GATT table. Static characteristic
    /// values become the initial remote values.
    pub fn with_service(mut self, service: MutableService) -> Self {
        for characteristic in service.characteristics().unwrap_or_default() {
            if let Some(value) = characteristic.value() {
                self.values
                    .insert((service.uuid(), characteristic.uuid()), value.to_vec());
            }
        }
        self.services.push(service);
        self
    }

    pub fn with_value(mut self, service: Uuid, characteristic: Uuid, value: Vec<u8>) -> Self {
        self.values.insert((service, characteristic), value);
        self
    }

    pub fn connectable(mut self, connectable: bool) -> Self {
        self.connectable = connectable;
        self
    }

    /// Already known to the platform (bonded or seen in an earlier session),
    /// so `known_peripherals` returns it without a scan.
    pub fn known(mut self) -> Self {
        self.known = true;
        self
    }

    pub fn id(&self) -> &PeripheralId {
        &self.id
    }

    pub(crate) fn display_name(&self) -> Option<String> {
        self.name
            .clone()
            .or_else(|| self.advertisement.local_name.clone())
    }

    pub(crate) fn exposes_any(&self, services: &BTreeSet<Uuid>) -> bool {
        self.services
            .iter()
            .any(|service| services.contains(&service.uuid()))
    }
}
