use uuid::Uuid;

use crate::api::central::PeripheralId;
use crate::api::characteristic::{Characteristic, MutableCharacteristic};
use crate::{Error, Result};

/// Snapshot of a service discovered on a remote peripheral.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Service {
    peripheral: PeripheralId,
    uuid: Uuid,
    primary: bool,
    characteristics: Option<Vec<Characteristic>>,
}

impl Service {
    pub fn new(peripheral: PeripheralId, uuid: Uuid, primary: bool) -> Self {
        Service {
            peripheral,
            uuid,
            primary,
            characteristics: None,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn peripheral_id(&self) -> &PeripheralId {
        &self.peripheral
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// `None` until a characteristic discovery on this service completed.
    pub fn characteristics(&self) -> Option<&[Characteristic]> {
        self.characteristics.as_deref()
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&Characteristic> {
        self.characteristics
            .as_ref()?
            .iter()
            .find(|characteristic| characteristic.uuid() == uuid)
    }

    pub(crate) fn characteristic_mut(&mut self, uuid: Uuid) -> Option<&mut Characteristic> {
        self.characteristics
            .as_mut()?
            .iter_mut()
            .find(|characteristic| characteristic.uuid() == uuid)
    }

    pub(crate) fn set_characteristics(&mut self, characteristics: Vec<Characteristic>) {
        self.characteristics = Some(characteristics);
    }
}

/// A service authored locally. Characteristics are attached before the
/// service is handed to `PeripheralManager::add_service`, which takes it by
/// value: a published service can no longer be changed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MutableService {
    uuid: Uuid,
    primary: bool,
    characteristics: Option<Vec<MutableCharacteristic>>,
}

impl MutableService {
    pub fn new(uuid: Uuid, primary: bool) -> Self {
        MutableService {
            uuid,
            primary,
            characteristics: None,
        }
    }

    pub fn with_characteristics(mut self, characteristics: Vec<MutableCharacteristic>) -> Self {
        self.set_characteristics(Some(characteristics));
        self
    }

    /// Attaching a characteristic records this service as its owner.
    pub fn set_characteristics(&mut self, characteristics: Option<Vec<MutableCharacteristic>>) {
        self.characteristics = characteristics.map(|mut characteristics| {
            for characteristic in &mut characteristics {
                characteristic.set_service(self.uuid);
            }
            characteristics
        });
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn characteristics(&self) -> Option<&[MutableCharacteristic]> {
        self.characteristics.as_deref()
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&MutableCharacteristic> {
        self.characteristics
            .as_ref()?
            .iter()
            .find(|characteristic| characteristic.uuid() == uuid)
    }
}

/// The published service an update of `characteristic` addresses.
///
/// A characteristic attached to a service names its owner. A bare one is
/// resolved by UUID and must match exactly one published service.
pub(crate) fn owning_service<'a>(
    services: &'a [MutableService],
    characteristic: &MutableCharacteristic,
) -> Result<&'a MutableService> {
    let uuid = characteristic.uuid();
    let mut candidates = services.iter().filter(|service| {
        characteristic
            .service_uuid()
            .is_none_or(|owner| owner == service.uuid())
            && service.characteristic(uuid).is_some()
    });
    match (candidates.next(), candidates.next()) {
        (Some(service), None) => Ok(service),
        (Some(_), Some(_)) => Err(Error::unknown(format!(
            "characteristic {uuid} shared by several services"
        ))),
        (None, _) => Err(Error::unknown(format!("characteristic {uuid}"))),
    }
}
