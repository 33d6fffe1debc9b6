use objc2::AnyThread;
use objc2::rc::Retained;
use objc2_core_bluetooth::{
    CBATTError, CBAttributePermissions, CBCharacteristic, CBCharacteristicProperties,
    CBMutableCharacteristic, CBMutableService,
};
use objc2_foundation::{NSArray, NSData};

use super::mac_extensions_cb::uuid_to_cbuuid;
use crate::api::attribute::RequestResponse;
use crate::api::characteristic::{CharacteristicProperties, MutableCharacteristic};
use crate::api::service::MutableService;

pub fn properties_from_cb(characteristic: &CBCharacteristic) -> CharacteristicProperties {
    let properties = unsafe { characteristic.properties() };
    CharacteristicProperties::from_bits_truncate(properties.0 as u16)
}

// A characteristic with a cached value must be read-only, which
// `MutableCharacteristic::with_static_value` guarantees.
pub fn parse_characteristic(characteristic: &MutableCharacteristic) -> Retained<CBMutableCharacteristic> {
    let value = characteristic.value().map(NSData::with_bytes);
    unsafe {
        CBMutableCharacteristic::initWithType_properties_value_permissions(
            CBMutableCharacteristic::alloc(),
            &uuid_to_cbuuid(characteristic.uuid()),
            CBCharacteristicProperties(characteristic.properties().bits() as usize),
            value.as_deref(),
            CBAttributePermissions(characteristic.permissions().bits() as usize),
        )
    }
}

pub fn parse_service(service: &MutableService) -> Retained<CBMutableService> {
    let characteristics: Vec<Retained<CBCharacteristic>> = service
        .characteristics()
        .unwrap_or_default()
        .iter()
        .map(|characteristic| Retained::into_super(parse_characteristic(characteristic)))
        .collect();
    unsafe {
        let mutable_service = CBMutableService::initWithType_primary(
            CBMutableService::alloc(),
            &uuid_to_cbuuid(service.uuid()),
            service.is_primary(),
        );
        if !characteristics.is_empty() {
            let characteristics = NSArray::from_retained_slice(&characteristics);
            mutable_service.setCharacteristics(Some(&characteristics));
        }
        mutable_service
    }
}

pub fn to_cb_error(response: RequestResponse) -> CBATTError {
    CBATTError(response.code() as isize)
}
