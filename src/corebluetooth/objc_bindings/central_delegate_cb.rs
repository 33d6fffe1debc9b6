use std::collections::HashMap;

use futures::executor;
use log::{error, trace, warn};
use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2::{AnyThread, DefinedClass, define_class, msg_send};
use objc2_core_bluetooth::{
    CBAdvertisementDataIsConnectable, CBAdvertisementDataLocalNameKey,
    CBAdvertisementDataManufacturerDataKey, CBAdvertisementDataServiceDataKey,
    CBAdvertisementDataServiceUUIDsKey, CBAdvertisementDataTxPowerLevelKey, CBCentralManager,
    CBCentralManagerDelegate, CBCharacteristic, CBManagerState, CBPeripheral,
    CBPeripheralDelegate, CBService, CBUUID,
};
use objc2_foundation::{
    NSArray, NSData, NSDictionary, NSError, NSNumber, NSObject, NSObjectProtocol, NSString,
};
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use super::SendRetained;
use super::characteristic_utils_cb::properties_from_cb;
use super::mac_extensions_cb::{
    UuidExtension, localized_description, peripheral_id, platform_result,
};
use crate::api::advertisement::AdvertisementData;
use crate::api::central::PeripheralId;
use crate::api::characteristic::{Characteristic, CharacteristicId};
use crate::api::service::Service;
use crate::api::state::ManagerState;
use crate::{Error, ErrorType, Result};

/// What the delegate reports to the central manager's worker thread.
#[derive(Debug)]
pub(crate) enum CentralDelegateEvent {
    StateUpdate {
        state: ManagerState,
    },
    DiscoveredPeripheral {
        peripheral: SendRetained<CBPeripheral>,
        name: Option<String>,
        rssi: i16,
        advertisement: AdvertisementData,
    },
    Connected {
        peripheral: PeripheralId,
    },
    ConnectionFailed {
        peripheral: PeripheralId,
        error: Error,
    },
    Disconnected {
        peripheral: PeripheralId,
        error: Option<Error>,
    },
    RssiRead {
        peripheral: PeripheralId,
        result: Result<i16>,
    },
    ServicesDiscovered {
        peripheral: PeripheralId,
        result: Result<Vec<Service>>,
    },
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: Uuid,
        result: Result<Vec<Characteristic>>,
    },
    NotificationStateUpdate {
        characteristic: CharacteristicId,
        result: Result<bool>,
    },
    ValueUpdate {
        characteristic: CharacteristicId,
        result: Result<Vec<u8>>,
    },
    Written {
        characteristic: CharacteristicId,
        result: Result<()>,
    },
}

// Instance variables stored within the ObjC class, the channel back into Rust.
#[derive(Debug)]
pub struct IVars {
    pub sender: Sender<CentralDelegateEvent>,
}

define_class!(
    #[derive(Debug)]
    #[unsafe(super(NSObject))]
    #[thread_kind = AnyThread]
    #[name = "BlehalCentralDelegate"]
    #[ivars = IVars]
    pub struct CentralDelegate;

    unsafe impl NSObjectProtocol for CentralDelegate {}

    unsafe impl CBCentralManagerDelegate for CentralDelegate {
        #[unsafe(method(centralManagerDidUpdateState:))]
        fn delegate_centralmanagerdidupdatestate(&self, central: &CBCentralManager) {
            trace!("delegate_centralmanagerdidupdatestate");
            let state = convert_state(unsafe { central.state() });
            self.send_event(CentralDelegateEvent::StateUpdate { state });
        }

        #[unsafe(method(centralManager:didConnectPeripheral:))]
        fn delegate_centralmanager_didconnectperipheral(
            &self,
            _central: &CBCentralManager,
            peripheral: &CBPeripheral,
        ) {
            trace!(
                "delegate_centralmanager_didconnectperipheral {}",
                peripheral_debug(peripheral)
            );
            self.send_event(CentralDelegateEvent::Connected {
                peripheral: peripheral_id(peripheral),
            });
        }

        #[unsafe(method(centralManager:didDisconnectPeripheral:error:))]
        fn delegate_centralmanager_diddisconnectperipheral_error(
            &self,
            _central: &CBCentralManager,
            peripheral: &CBPeripheral,
            error: Option<&NSError>,
        ) {
            trace!(
                "delegate_centralmanager_diddisconnectperipheral_error {} {}",
                peripheral_debug(peripheral),
                localized_description(error)
            );
            let error = error.map(|error| {
                Error::from_string(error.localizedDescription().to_string(), ErrorType::LinkLost)
            });
            self.send_event(CentralDelegateEvent::Disconnected {
                peripheral: peripheral_id(peripheral),
                error,
            });
        }

        #[unsafe(method(centralManager:didFailToConnectPeripheral:error:))]
        fn delegate_centralmanager_didfailtoconnectperipheral_error(
            &self,
            _central: &CBCentralManager,
            peripheral: &CBPeripheral,
            error: Option<&NSError>,
        ) {
            trace!(
                "delegate_centralmanager_didfailtoconnectperipheral_error {} {}",
                peripheral_debug(peripheral),
                localized_description(error)
            );
            let error = platform_result(error)
                .err()
                .unwrap_or_else(|| Error::new(ErrorType::CoreBluetooth, "connection failed"));
            self.send_event(CentralDelegateEvent::ConnectionFailed {
                peripheral: peripheral_id(peripheral),
                error,
            });
        }

        #[unsafe(method(centralManager:didDiscoverPeripheral:advertisementData:RSSI:))]
        fn delegate_centralmanager_diddiscoverperipheral_advertisementdata_rssi(
            &self,
            _central: &CBCentralManager,
            peripheral: &CBPeripheral,
            adv_data: &NSDictionary<NSString, AnyObject>,
            rssi: &NSNumber,
        ) {
            trace!(
                "delegate_centralmanager_diddiscoverperipheral_advertisementdata_rssi {}",
                peripheral_debug(peripheral)
            );
            let advertisement = parse_advertisement(adv_data);
            let name = advertisement
                .local_name
                .clone()
                .or_else(|| unsafe { peripheral.name() }.map(|name| name.to_string()));
            self.send_event(CentralDelegateEvent::DiscoveredPeripheral {
                peripheral: SendRetained(peripheral.retain()),
                name,
                rssi: rssi.as_i16(),
                advertisement,
            });
        }
    }

    unsafe impl CBPeripheralDelegate for CentralDelegate {
        #[unsafe(method(peripheral:didDiscoverServices:))]
        fn delegate_peripheral_diddiscoverservices(
            &self,
            peripheral: &CBPeripheral,
            error: Option<&NSError>,
        ) {
            trace!(
                "delegate_peripheral_diddiscoverservices {} {}",
                peripheral_debug(peripheral),
                localized_description(error)
            );
            let id = peripheral_id(peripheral);
            let result = platform_result(error).map(|()| {
                unsafe { peripheral.services() }
                    .map(|services| {
                        services
                            .iter()
                            .map(|service| {
                                Service::new(id.clone(), service.get_uuid(), unsafe {
                                    service.isPrimary()
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            });
            self.send_event(CentralDelegateEvent::ServicesDiscovered {
                peripheral: id,
                result,
            });
        }

        #[unsafe(method(peripheral:didDiscoverCharacteristicsForService:error:))]
        fn delegate_peripheral_diddiscovercharacteristicsforservice_error(
            &self,
            peripheral: &CBPeripheral,
            service: &CBService,
            error: Option<&NSError>,
        ) {
            trace!(
                "delegate_peripheral_diddiscovercharacteristicsforservice_error {} {} {}",
                peripheral_debug(peripheral),
                service_debug(service),
                localized_description(error)
            );
            let id = peripheral_id(peripheral);
            let service_uuid = service.get_uuid();
            let result = platform_result(error).map(|()| {
                unsafe { service.characteristics() }
                    .map(|characteristics| {
                        characteristics
                            .iter()
                            .map(|characteristic| {
                                Characteristic::new(
                                    id.clone(),
                                    service_uuid,
                                    characteristic.get_uuid(),
                                    properties_from_cb(&characteristic),
                                )
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            });
            self.send_event(CentralDelegateEvent::CharacteristicsDiscovered {
                peripheral: id,
                service: service_uuid,
                result,
            });
        }

        #[unsafe(method(peripheral:didUpdateValueForCharacteristic:error:))]
        fn delegate_peripheral_didupdatevalueforcharacteristic_error(
            &self,
            peripheral: &CBPeripheral,
            characteristic: &CBCharacteristic,
            error: Option<&NSError>,
        ) {
            trace!(
                "delegate_peripheral_didupdatevalueforcharacteristic_error {} {} {}",
                peripheral_debug(peripheral),
                characteristic_debug(characteristic),
                localized_description(error)
            );
            let Some(id) = characteristic_id(peripheral, characteristic) else {
                return;
            };
            let result = platform_result(error).map(|()| {
                unsafe { characteristic.value() }
                    .map(|value| value.to_vec())
                    .unwrap_or_default()
            });
            self.send_event(CentralDelegateEvent::ValueUpdate {
                characteristic: id,
                result,
            });
        }

        #[unsafe(method(peripheral:didWriteValueForCharacteristic:error:))]
        fn delegate_peripheral_didwritevalueforcharacteristic_error(
            &self,
            peripheral: &CBPeripheral,
            characteristic: &CBCharacteristic,
            error: Option<&NSError>,
        ) {
            trace!(
                "delegate_peripheral_didwritevalueforcharacteristic_error {} {} {}",
                peripheral_debug(peripheral),
                characteristic_debug(characteristic),
                localized_description(error)
            );
            let Some(id) = characteristic_id(peripheral, characteristic) else {
                return;
            };
            self.send_event(CentralDelegateEvent::Written {
                characteristic: id,
                result: platform_result(error),
            });
        }

        #[unsafe(method(peripheral:didUpdateNotificationStateForCharacteristic:error:))]
        fn delegate_peripheral_didupdatenotificationstateforcharacteristic_error(
            &self,
            peripheral: &CBPeripheral,
            characteristic: &CBCharacteristic,
            error: Option<&NSError>,
        ) {
            trace!(
                "delegate_peripheral_didupdatenotificationstateforcharacteristic_error {} {}",
                characteristic_debug(characteristic),
                localized_description(error)
            );
            let Some(id) = characteristic_id(peripheral, characteristic) else {
                return;
            };
            let result = platform_result(error).map(|()| unsafe { characteristic.isNotifying() });
            self.send_event(CentralDelegateEvent::NotificationStateUpdate {
                characteristic: id,
                result,
            });
        }

        #[unsafe(method(peripheral:didReadRSSI:error:))]
        fn delegate_peripheral_didreadrssi_error(
            &self,
            peripheral: &CBPeripheral,
            rssi: &NSNumber,
            error: Option<&NSError>,
        ) {
            trace!(
                "delegate_peripheral_didreadrssi_error {}",
                peripheral_debug(peripheral)
            );
            self.send_event(CentralDelegateEvent::RssiRead {
                peripheral: peripheral_id(peripheral),
                result: platform_result(error).map(|()| rssi.as_i16()),
            });
        }
    }
);

impl CentralDelegate {
    pub fn new(sender: Sender<CentralDelegateEvent>) -> Retained<Self> {
        let this = CentralDelegate::alloc().set_ivars(IVars { sender });
        unsafe { msg_send![super(this), init] }
    }

    fn send_event(&self, event: CentralDelegateEvent) {
        let sender = self.ivars().sender.clone();
        executor::block_on(async {
            if let Err(e) = sender.send(event).await {
                error!("Error sending delegate event: {}", e);
            }
        });
    }
}

fn characteristic_id(
    peripheral: &CBPeripheral,
    characteristic: &CBCharacteristic,
) -> Option<CharacteristicId> {
    let Some(service) = (unsafe { characteristic.service() }) else {
        warn!(
            "{} has no owning service",
            characteristic_debug(characteristic)
        );
        return None;
    };
    Some(CharacteristicId {
        peripheral: peripheral_id(peripheral),
        service: service.get_uuid(),
        characteristic: characteristic.get_uuid(),
    })
}

fn parse_advertisement(adv_data: &NSDictionary<NSString, AnyObject>) -> AdvertisementData {
    let mut advertisement = AdvertisementData::default();

    if let Some(name) = adv_data.objectForKey(unsafe { CBAdvertisementDataLocalNameKey }) {
        if let Ok(name) = name.downcast::<NSString>() {
            advertisement.local_name = Some(name.to_string());
        }
    }

    if let Some(data) = adv_data.objectForKey(unsafe { CBAdvertisementDataManufacturerDataKey }) {
        if let Ok(data) = data.downcast::<NSData>() {
            let bytes = data.to_vec();
            // first two bytes are the little endian company identifier
            if bytes.len() >= 2 {
                let company = u16::from_le_bytes([bytes[0], bytes[1]]);
                advertisement
                    .manufacturer_data
                    .insert(company, bytes[2..].to_vec());
            }
        }
    }

    if let Some(service_data) = adv_data.objectForKey(unsafe { CBAdvertisementDataServiceDataKey })
    {
        // SAFETY: service data is documented as `NSDictionary<CBUUID, NSData>`
        let service_data: Retained<NSDictionary<CBUUID, NSData>> =
            unsafe { Retained::cast_unchecked(service_data) };
        let mut result = HashMap::new();
        for uuid in service_data.allKeys().iter() {
            if let Some(data) = service_data.objectForKey(&uuid) {
                result.insert(uuid.get_uuid(), data.to_vec());
            }
        }
        advertisement.service_data = result;
    }

    if let Some(services) = adv_data.objectForKey(unsafe { CBAdvertisementDataServiceUUIDsKey }) {
        // SAFETY: advertised services are documented as `NSArray<CBUUID>`
        let services: Retained<NSArray<CBUUID>> = unsafe { Retained::cast_unchecked(services) };
        advertisement.service_uuids = services.iter().map(|uuid| uuid.get_uuid()).collect();
    }

    if let Some(power) = adv_data.objectForKey(unsafe { CBAdvertisementDataTxPowerLevelKey }) {
        if let Ok(power) = power.downcast::<NSNumber>() {
            advertisement.tx_power_level = Some(power.as_i16());
        }
    }

    if let Some(connectable) = adv_data.objectForKey(unsafe { CBAdvertisementDataIsConnectable }) {
        if let Ok(connectable) = connectable.downcast::<NSNumber>() {
            advertisement.is_connectable = Some(connectable.as_bool());
        }
    }

    advertisement
}

fn peripheral_debug(peripheral: &CBPeripheral) -> String {
    let uuid = unsafe { peripheral.identifier() }.UUIDString();
    if let Some(name) = unsafe { peripheral.name() } {
        format!("CBPeripheral({}, {})", name, uuid)
    } else {
        format!("CBPeripheral({})", uuid)
    }
}

fn service_debug(service: &CBService) -> String {
    let uuid = unsafe { service.UUID().UUIDString() };
    format!("CBService({})", uuid)
}

fn characteristic_debug(characteristic: &CBCharacteristic) -> String {
    let uuid = unsafe { characteristic.UUID().UUIDString() };
    format!("CBCharacteristic({})", uuid)
}

pub fn convert_state(cb_state: CBManagerState) -> ManagerState {
    match cb_state {
        CBManagerState::Unknown => ManagerState::Unknown,
        CBManagerState::Resetting => ManagerState::Resetting,
        CBManagerState::Unsupported => ManagerState::Unsupported,
        CBManagerState::Unauthorized => ManagerState::Unauthorized,
        CBManagerState::PoweredOff => ManagerState::PoweredOff,
        CBManagerState::PoweredOn => ManagerState::PoweredOn,
        _ => {
            warn!("Unexpected CBManagerState value, treating as Unknown");
            ManagerState::Unknown
        }
    }
}
