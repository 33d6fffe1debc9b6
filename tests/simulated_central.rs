use std::collections::BTreeSet;

use blehal::api::advertisement::AdvertisementData;
use blehal::api::attribute::RequestResponse;
use blehal::api::central::{
    CentralManager, ConnectOptions, PeripheralId, PeripheralRemote, ScanOptions,
};
use blehal::api::central_event::{CentralEvent, CentralOperation};
use blehal::api::characteristic::{
    AttributePermissions, Characteristic, CharacteristicProperties, CharacteristicWriteType,
    MutableCharacteristic,
};
use blehal::api::service::MutableService;
use blehal::api::state::{ConnectionState, ManagerState};
use blehal::simulated::{
    SimulatedCentral, SimulatedCentralDriver, SimulatedDevice, SimulatedPeripheral,
};
use blehal::uuid::ShortUuid;
use blehal::{DEFAULT_EVENT_CAPACITY, ErrorType};
use tokio::sync::mpsc::{self, Receiver};
use uuid::Uuid;

fn heart_rate() -> Uuid {
    Uuid::from_u16(0x180D)
}

fn measurement() -> Uuid {
    Uuid::from_u16(0x2A37)
}

fn control_point() -> Uuid {
    Uuid::from_u16(0x2A39)
}

fn battery() -> Uuid {
    Uuid::from_u16(0x180F)
}

fn monitor_id() -> PeripheralId {
    PeripheralId::from(Uuid::from_u128(0xA1))
}

fn heart_rate_monitor() -> SimulatedDevice {
    SimulatedDevice::new(monitor_id())
        .with_name("hrm")
        .with_advertisement(AdvertisementData::new("hrm", &[heart_rate()]))
        .with_service(MutableService::new(heart_rate(), true).with_characteristics(vec![
            MutableCharacteristic::new(
                measurement(),
                CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
                AttributePermissions::READABLE,
            ),
            MutableCharacteristic::new(
                control_point(),
                CharacteristicProperties::WRITE,
                AttributePermissions::WRITEABLE,
            ),
        ]))
        .with_service(MutableService::new(battery(), true))
        .with_value(heart_rate(), measurement(), vec![0x06, 0x48])
}

fn drain<T>(receiver: &mut Receiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

async fn powered_central() -> (SimulatedCentral, SimulatedCentralDriver, Receiver<CentralEvent>) {
    let _ = pretty_env_logger::try_init();
    let (sender, mut receiver) = mpsc::channel(DEFAULT_EVENT_CAPACITY);
    let (central, driver) = SimulatedCentral::new(sender);
    driver.power_on().await.unwrap();
    drain(&mut receiver);
    (central, driver, receiver)
}

/// Connects to the heart rate monitor and discovers its whole table.
async fn connected_monitor(
    central: &SimulatedCentral,
    driver: &SimulatedCentralDriver,
    receiver: &mut Receiver<CentralEvent>,
) -> SimulatedPeripheral {
    driver.add_device(heart_rate_monitor().known());
    let peripheral = central.peripheral(&monitor_id()).unwrap();
    central
        .connect(&peripheral, ConnectOptions::default())
        .await
        .unwrap();
    peripheral.discover_services(None).await.unwrap();
    driver.run_until_idle().await;
    for service in peripheral.services().unwrap() {
        peripheral
            .discover_characteristics(None, &service)
            .await
            .unwrap();
    }
    driver.run_until_idle().await;
    drain(receiver);
    peripheral
}

fn characteristic<P: PeripheralRemote>(peripheral: &P, uuid: Uuid) -> Characteristic {
    peripheral
        .characteristics()
        .into_iter()
        .find(|characteristic| characteristic.uuid() == uuid)
        .unwrap()
}

#[tokio::test]
async fn scan_reports_a_peripheral_once_per_session() {
    let (central, driver, mut receiver) = powered_central().await;
    driver.add_device(heart_rate_monitor());

    central.scan(None, ScanOptions::default()).await.unwrap();
    driver.run_until_idle().await;
    assert!(central.is_scanning());

    driver.advertise(&monitor_id());
    driver.advertise(&monitor_id());
    driver.run_until_idle().await;

    let events = drain(&mut receiver);
    assert_eq!(events.len(), 1);
    match &events[0] {
        CentralEvent::DeviceDiscovered {
            peripheral,
            name,
            rssi,
            advertisement,
        } => {
            assert_eq!(peripheral, &monitor_id());
            assert_eq!(name.as_deref(), Some("hrm"));
            assert_eq!(*rssi, -60);
            assert_eq!(advertisement.service_uuids, vec![heart_rate()]);
        }
        other => panic!("unexpected event {other:?}"),
    }

    central.stop_scan().await.unwrap();
    driver.advertise(&monitor_id());
    driver.run_until_idle().await;
    assert!(!central.is_scanning());
    assert!(drain(&mut receiver).is_empty());
}

#[tokio::test]
async fn scan_filter_and_duplicates() {
    let (central, driver, mut receiver) = powered_central().await;
    driver.add_device(heart_rate_monitor());

    central
        .scan(Some(BTreeSet::from([battery()])), ScanOptions::default())
        .await
        .unwrap();
    driver.advertise(&monitor_id());
    driver.run_until_idle().await;
    assert!(drain(&mut receiver).is_empty());
    assert!(central.peripheral(&monitor_id()).is_none());

    let options = ScanOptions {
        allow_duplicates: true,
        ..Default::default()
    };
    central
        .scan(Some(BTreeSet::from([heart_rate()])), options)
        .await
        .unwrap();
    driver.advertise(&monitor_id());
    driver.advertise(&monitor_id());
    driver.run_until_idle().await;
    assert_eq!(drain(&mut receiver).len(), 2);
    assert!(central.peripheral(&monitor_id()).is_some());
}

#[tokio::test]
async fn connect_then_discover_replaces_the_service_cache() {
    let (central, driver, mut receiver) = powered_central().await;
    driver.add_device(heart_rate_monitor().known());

    let known = central.known_peripherals(&[monitor_id()]).await.unwrap();
    assert_eq!(known.len(), 1);
    let peripheral = known[0].clone();
    assert_eq!(peripheral.name().as_deref(), Some("hrm"));
    assert_eq!(peripheral.services(), None);

    central
        .connect(&peripheral, ConnectOptions::default())
        .await
        .unwrap();
    assert_eq!(peripheral.connection_state(), ConnectionState::Disconnected);
    driver.step().await;
    assert_eq!(peripheral.connection_state(), ConnectionState::Connecting);
    driver.run_until_idle().await;
    assert_eq!(peripheral.connection_state(), ConnectionState::Connected);
    assert!(matches!(
        drain(&mut receiver).as_slice(),
        [CentralEvent::DeviceConnected { .. }]
    ));

    peripheral
        .discover_services(Some(BTreeSet::from([heart_rate()])))
        .await
        .unwrap();
    driver.run_until_idle().await;
    assert!(matches!(
        drain(&mut receiver).as_slice(),
        [CentralEvent::ServicesDiscovered { result: Ok(()), .. }]
    ));
    let services = peripheral.services().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].uuid(), heart_rate());
    assert_eq!(services[0].characteristics(), None);

    peripheral
        .discover_characteristics(Some(BTreeSet::from([measurement()])), &services[0])
        .await
        .unwrap();
    driver.run_until_idle().await;
    assert!(matches!(
        drain(&mut receiver).as_slice(),
        [CentralEvent::CharacteristicsDiscovered { result: Ok(()), .. }]
    ));
    let measured = characteristic(&peripheral, measurement());
    assert_eq!(measured.peripheral_id(), &monitor_id());
    assert_eq!(peripheral.characteristics().len(), 1);

    // a broader discovery replaces the list, known services keep their characteristics
    peripheral.discover_services(None).await.unwrap();
    driver.run_until_idle().await;
    let services = peripheral.services().unwrap();
    assert_eq!(services.len(), 2);
    assert_eq!(peripheral.characteristics().len(), 1);
    let battery_service = services.iter().find(|s| s.uuid() == battery()).unwrap();
    assert_eq!(battery_service.characteristics(), None);

    let connected = central
        .connected_peripherals(&BTreeSet::from([battery()]))
        .await
        .unwrap();
    assert_eq!(connected.len(), 1);
    assert!(
        central
            .connected_peripherals(&BTreeSet::from([Uuid::from_u16(0x1812)]))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn notifying_flag_changes_only_on_acknowledgement() {
    let (central, driver, mut receiver) = powered_central().await;
    let peripheral = connected_monitor(&central, &driver, &mut receiver).await;
    let measured = characteristic(&peripheral, measurement());
    let id = measured.id().clone();

    driver.notify(&id, vec![0x06, 0x50]);
    driver.run_until_idle().await;
    assert!(drain(&mut receiver).is_empty());

    peripheral.set_notify(true, &measured).await.unwrap();
    assert!(!characteristic(&peripheral, measurement()).is_notifying());
    driver.run_until_idle().await;
    assert!(characteristic(&peripheral, measurement()).is_notifying());
    assert!(matches!(
        drain(&mut receiver).as_slice(),
        [CentralEvent::NotificationStateUpdate { result: Ok(true), .. }]
    ));

    driver.notify(&id, vec![0x06, 0x52]);
    driver.run_until_idle().await;
    match drain(&mut receiver).as_slice() {
        [
            CentralEvent::CharacteristicValueUpdate {
                characteristic,
                result: Ok(value),
            },
        ] => {
            assert_eq!(characteristic, &id);
            assert_eq!(value, &vec![0x06, 0x52]);
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert_eq!(
        characteristic(&peripheral, measurement()).value(),
        Some(&[0x06, 0x52][..])
    );

    let control = characteristic(&peripheral, control_point());
    peripheral.set_notify(true, &control).await.unwrap();
    driver.run_until_idle().await;
    match drain(&mut receiver).as_slice() {
        [CentralEvent::NotificationStateUpdate { result: Err(e), .. }] => {
            assert_eq!(e.kind(), ErrorType::NotSupported)
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn rediscovery_keeps_acknowledged_notifications() {
    let (central, driver, mut receiver) = powered_central().await;
    let peripheral = connected_monitor(&central, &driver, &mut receiver).await;
    let measured = characteristic(&peripheral, measurement());
    let id = measured.id().clone();
    peripheral.set_notify(true, &measured).await.unwrap();
    driver.run_until_idle().await;
    drain(&mut receiver);

    peripheral.discover_services(None).await.unwrap();
    driver.run_until_idle().await;
    assert!(characteristic(&peripheral, measurement()).is_notifying());

    driver.notify(&id, vec![0x06, 0x54]);
    driver.run_until_idle().await;
    match drain(&mut receiver).as_slice() {
        [
            CentralEvent::ServicesDiscovered { result: Ok(()), .. },
            CentralEvent::CharacteristicValueUpdate {
                characteristic,
                result: Ok(value),
            },
        ] => {
            assert_eq!(characteristic, &id);
            assert_eq!(value, &vec![0x06, 0x54]);
        }
        other => panic!("unexpected events {other:?}"),
    }

    let service = peripheral
        .services()
        .unwrap()
        .into_iter()
        .find(|service| service.uuid() == heart_rate())
        .unwrap();
    peripheral
        .discover_characteristics(None, &service)
        .await
        .unwrap();
    driver.run_until_idle().await;
    let measured = characteristic(&peripheral, measurement());
    assert!(measured.is_notifying());
    assert_eq!(measured.value(), Some(&[0x06, 0x54][..]));
    assert!(!characteristic(&peripheral, control_point()).is_notifying());
}

#[tokio::test]
async fn reads_and_writes() {
    let (central, driver, mut receiver) = powered_central().await;
    let peripheral = connected_monitor(&central, &driver, &mut receiver).await;
    let measured = characteristic(&peripheral, measurement());
    let control = characteristic(&peripheral, control_point());

    peripheral.read_value(&measured).await.unwrap();
    peripheral
        .write_value(&[0x01], &control, CharacteristicWriteType::WriteWithResponse)
        .await
        .unwrap();
    peripheral
        .write_value(&[0x02], &control, CharacteristicWriteType::WriteWithoutResponse)
        .await
        .unwrap();
    peripheral
        .write_value(&[0x03], &measured, CharacteristicWriteType::WriteWithResponse)
        .await
        .unwrap();
    peripheral.read_value(&control).await.unwrap();
    driver.run_until_idle().await;

    let events = drain(&mut receiver);
    assert_eq!(events.len(), 5);
    assert!(matches!(
        &events[0],
        CentralEvent::CharacteristicValueUpdate { result: Ok(value), .. } if value == &vec![0x06, 0x48]
    ));
    assert!(matches!(
        &events[1],
        CentralEvent::CharacteristicWritten { result: Ok(()), .. }
    ));
    match &events[2] {
        CentralEvent::OperationFailed {
            operation: CentralOperation::WriteWithoutResponse { characteristic },
            error,
        } => {
            assert_eq!(characteristic, control.id());
            assert_eq!(error.kind(), ErrorType::Att(RequestResponse::WriteNotPermitted));
        }
        other => panic!("unexpected event {other:?}"),
    }
    match &events[3] {
        CentralEvent::CharacteristicWritten { result: Err(e), .. } => {
            assert_eq!(e.kind(), ErrorType::Att(RequestResponse::WriteNotPermitted))
        }
        other => panic!("unexpected event {other:?}"),
    }
    match &events[4] {
        CentralEvent::CharacteristicValueUpdate { result: Err(e), .. } => {
            assert_eq!(e.kind(), ErrorType::Att(RequestResponse::ReadNotPermitted))
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(driver.remote_value(control.id()), Some(vec![0x01]));
    assert_eq!(
        characteristic(&peripheral, measurement()).value(),
        Some(&[0x06, 0x48][..])
    );
}

#[tokio::test]
async fn write_without_response_has_no_completion() {
    let (central, driver, mut receiver) = powered_central().await;
    let id = PeripheralId::from(Uuid::from_u128(0xB2));
    let service = Uuid::from_u16(0xFFE0);
    let uart = Uuid::from_u16(0xFFE1);
    driver.add_device(
        SimulatedDevice::new(id.clone())
            .known()
            .with_service(MutableService::new(service, true).with_characteristics(vec![
                MutableCharacteristic::new(
                    uart,
                    CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
                    AttributePermissions::WRITEABLE,
                ),
            ])),
    );
    let peripheral = central.peripheral(&id).unwrap();
    central
        .connect(&peripheral, ConnectOptions::default())
        .await
        .unwrap();
    peripheral.discover_services(None).await.unwrap();
    driver.run_until_idle().await;
    let services = peripheral.services().unwrap();
    peripheral
        .discover_characteristics(None, &services[0])
        .await
        .unwrap();
    driver.run_until_idle().await;
    drain(&mut receiver);

    let target = characteristic(&peripheral, uart);
    peripheral
        .write_value(b"ping", &target, CharacteristicWriteType::WriteWithoutResponse)
        .await
        .unwrap();
    driver.run_until_idle().await;
    assert!(drain(&mut receiver).is_empty());
    assert_eq!(driver.remote_value(target.id()), Some(b"ping".to_vec()));
}

#[tokio::test]
async fn rssi_falls_back_to_the_configured_default() {
    let (central, driver, mut receiver) = powered_central().await;
    let peripheral = connected_monitor(&central, &driver, &mut receiver).await;
    peripheral.read_rssi().await.unwrap();
    driver.run_until_idle().await;
    assert!(matches!(
        drain(&mut receiver).as_slice(),
        [CentralEvent::RssiRead { result: Ok(-60), .. }]
    ));

    let near = PeripheralId::from(Uuid::from_u128(0xC3));
    driver.add_device(SimulatedDevice::new(near.clone()).with_rssi(-42).known());
    let near = central.peripheral(&near).unwrap();
    near.read_rssi().await.unwrap();
    central
        .connect(&near, ConnectOptions::default())
        .await
        .unwrap();
    driver.run_until_idle().await;
    near.read_rssi().await.unwrap();
    driver.run_until_idle().await;
    match drain(&mut receiver).as_slice() {
        [
            CentralEvent::RssiRead { result: Err(e), .. },
            CentralEvent::DeviceConnected { .. },
            CentralEvent::RssiRead { result: Ok(-42), .. },
        ] => assert_eq!(e.kind(), ErrorType::NotConnected),
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn cancel_while_connecting_disconnects_without_error() {
    let (central, driver, mut receiver) = powered_central().await;
    driver.add_device(heart_rate_monitor().known());
    let peripheral = central.peripheral(&monitor_id()).unwrap();

    central
        .connect(&peripheral, ConnectOptions::default())
        .await
        .unwrap();
    central.cancel_connection(&peripheral).await.unwrap();
    driver.run_until_idle().await;

    assert!(matches!(
        drain(&mut receiver).as_slice(),
        [CentralEvent::DeviceDisconnected { error: None, .. }]
    ));
    assert_eq!(peripheral.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn cancel_connected_peripheral_drops_its_services() {
    let (central, driver, mut receiver) = powered_central().await;
    let peripheral = connected_monitor(&central, &driver, &mut receiver).await;
    assert!(peripheral.services().is_some());

    central.cancel_connection(&peripheral).await.unwrap();
    driver.step().await;
    assert_eq!(peripheral.connection_state(), ConnectionState::Disconnecting);
    driver.run_until_idle().await;

    assert!(matches!(
        drain(&mut receiver).as_slice(),
        [CentralEvent::DeviceDisconnected { error: None, .. }]
    ));
    assert_eq!(peripheral.services(), None);
}

#[tokio::test]
async fn refused_connection_reports_a_platform_error() {
    let (central, driver, mut receiver) = powered_central().await;
    driver.add_device(heart_rate_monitor().known().connectable(false));
    let peripheral = central.peripheral(&monitor_id()).unwrap();

    central
        .connect(&peripheral, ConnectOptions::default())
        .await
        .unwrap();
    driver.run_until_idle().await;

    match drain(&mut receiver).as_slice() {
        [CentralEvent::DeviceConnectionFailed { error, .. }] => {
            assert_eq!(error.kind(), ErrorType::CoreBluetooth)
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert_eq!(peripheral.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn link_loss_is_reported_with_an_error() {
    let (central, driver, mut receiver) = powered_central().await;
    let peripheral = connected_monitor(&central, &driver, &mut receiver).await;

    driver.lose_link(&monitor_id());
    driver.run_until_idle().await;

    match drain(&mut receiver).as_slice() {
        [CentralEvent::DeviceDisconnected { error: Some(e), .. }] => {
            assert_eq!(e.kind(), ErrorType::LinkLost)
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert_eq!(peripheral.connection_state(), ConnectionState::Disconnected);
    assert_eq!(peripheral.services(), None);
}

#[tokio::test]
async fn requests_fail_while_powered_off() {
    let (central, driver, mut receiver) = powered_central().await;
    let peripheral = connected_monitor(&central, &driver, &mut receiver).await;
    central.scan(None, ScanOptions::default()).await.unwrap();
    driver.run_until_idle().await;

    driver.set_state(ManagerState::PoweredOff).await.unwrap();
    assert!(!central.is_scanning());
    match drain(&mut receiver).as_slice() {
        [
            CentralEvent::StateUpdate {
                state: ManagerState::PoweredOff,
            },
            CentralEvent::DeviceDisconnected { error: Some(e), .. },
        ] => assert_eq!(e.kind(), ErrorType::NotPoweredOn),
        other => panic!("unexpected events {other:?}"),
    }

    // nothing is scanning, so stopping is a silent no-op
    central.stop_scan().await.unwrap();
    central.scan(None, ScanOptions::default()).await.unwrap();
    central
        .connect(&peripheral, ConnectOptions::default())
        .await
        .unwrap();
    peripheral.discover_services(None).await.unwrap();
    driver.run_until_idle().await;

    let events = drain(&mut receiver);
    assert_eq!(events.len(), 3);
    assert!(matches!(
        &events[0],
        CentralEvent::OperationFailed { operation: CentralOperation::Scan, error }
            if error.kind() == ErrorType::NotPoweredOn
    ));
    assert!(matches!(
        &events[1],
        CentralEvent::DeviceConnectionFailed { error, .. } if error.kind() == ErrorType::NotPoweredOn
    ));
    assert!(matches!(
        &events[2],
        CentralEvent::ServicesDiscovered { result: Err(error), .. }
            if error.kind() == ErrorType::NotPoweredOn
    ));
}

#[tokio::test]
async fn handles_from_another_manager_are_rejected_in_order() {
    let (central, driver, mut receiver) = powered_central().await;
    let (other, other_driver, _other_receiver) = powered_central().await;
    other_driver.add_device(heart_rate_monitor().known());
    let foreign = other.peripheral(&monitor_id()).unwrap();

    central.scan(None, ScanOptions::default()).await.unwrap();
    central
        .connect(&foreign, ConnectOptions::default())
        .await
        .unwrap();
    central.cancel_connection(&foreign).await.unwrap();
    assert_eq!(driver.pending(), 3);
    driver.run_until_idle().await;

    let events = drain(&mut receiver);
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        CentralEvent::DeviceConnectionFailed { error, .. } if error.kind() == ErrorType::UnknownEntity
    ));
    assert!(matches!(
        &events[1],
        CentralEvent::OperationFailed {
            operation: CentralOperation::CancelConnection { .. },
            error,
        } if error.kind() == ErrorType::UnknownEntity
    ));
    assert_eq!(foreign.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn illegal_radio_transition_is_refused() {
    let (sender, _receiver) = mpsc::channel(DEFAULT_EVENT_CAPACITY);
    let (central, driver) = SimulatedCentral::new(sender);
    let error = driver.set_state(ManagerState::PoweredOff).await.unwrap_err();
    assert_eq!(error.kind(), ErrorType::InvalidState);
    assert_eq!(central.state(), ManagerState::Unknown);
}
