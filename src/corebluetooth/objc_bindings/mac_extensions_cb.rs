use log::warn;
use objc2::rc::Retained;
use objc2_core_bluetooth::{CBCharacteristic, CBPeripheral, CBService, CBUUID};
use objc2_foundation::{NSError, NSString, NSUUID};
use uuid::Uuid;

use crate::api::central::PeripheralId;
use crate::uuid::ShortUuid;
use crate::{Error, ErrorType};

pub fn uuid_to_cbuuid(uuid: Uuid) -> Retained<CBUUID> {
    unsafe { CBUUID::UUIDWithString(&NSString::from_str(&uuid.to_short_string())) }
}

pub fn nsuuid_to_uuid(uuid: &NSUUID) -> Uuid {
    Uuid::from_bytes(uuid.as_bytes())
}

pub fn uuid_to_nsuuid(uuid: Uuid) -> Retained<NSUUID> {
    NSUUID::from_bytes(*uuid.as_bytes())
}

pub fn localized_description(error: Option<&NSError>) -> String {
    error
        .map(|error| error.localizedDescription().to_string())
        .unwrap_or_default()
}

/// `Err` carrying the platform's description when CoreBluetooth reported one.
pub fn platform_result(error: Option<&NSError>) -> crate::Result<()> {
    match error {
        None => Ok(()),
        Some(error) => Err(Error::from_string(
            error.localizedDescription().to_string(),
            ErrorType::CoreBluetooth,
        )),
    }
}

pub trait UuidExtension {
    fn get_uuid(self) -> Uuid;
}

impl UuidExtension for &CBUUID {
    fn get_uuid(self) -> Uuid {
        let uuid_str = unsafe { self.UUIDString() }.to_string();
        Uuid::from_short_string(&uuid_str).unwrap_or_else(|| {
            warn!("Unparseable CBUUID {uuid_str}");
            Uuid::nil()
        })
    }
}

impl UuidExtension for &CBService {
    fn get_uuid(self) -> Uuid {
        unsafe { self.UUID() }.get_uuid()
    }
}

impl UuidExtension for &CBCharacteristic {
    fn get_uuid(self) -> Uuid {
        unsafe { self.UUID() }.get_uuid()
    }
}

pub fn peripheral_id(peripheral: &CBPeripheral) -> PeripheralId {
    PeripheralId::from(nsuuid_to_uuid(&unsafe { peripheral.identifier() }))
}
