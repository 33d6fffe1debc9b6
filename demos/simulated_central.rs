use std::time::Duration;

use blehal::api::advertisement::AdvertisementData;
use blehal::api::central::{
    CentralManager, ConnectOptions, PeripheralId, PeripheralRemote, ScanOptions,
};
use blehal::api::central_event::CentralEvent;
use blehal::api::characteristic::{
    AttributePermissions, CharacteristicId, CharacteristicProperties, MutableCharacteristic,
};
use blehal::api::service::MutableService;
use blehal::simulated::{SimulatedCentral, SimulatedDevice};
use blehal::uuid::ShortUuid;
use blehal::DEFAULT_EVENT_CAPACITY;
use log::LevelFilter;
use tokio::sync::mpsc;
use uuid::Uuid;

const HEART_RATE: u16 = 0x180D;
const MEASUREMENT: u16 = 0x2A37;

#[tokio::main]
async fn main() {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .init();

    let (sender_tx, mut receiver_rx) = mpsc::channel::<CentralEvent>(DEFAULT_EVENT_CAPACITY);
    let (central_manager, driver) = SimulatedCentral::new(sender_tx);

    let monitor = PeripheralId::from(Uuid::from_u128(0xA1));
    driver.add_device(
        SimulatedDevice::new(monitor.clone())
            .with_rssi(-48)
            .with_advertisement(AdvertisementData::new(
                "heart rate monitor",
                &[Uuid::from_u16(HEART_RATE)],
            ))
            .with_service(
                MutableService::new(Uuid::from_u16(HEART_RATE), true).with_characteristics(vec![
                    MutableCharacteristic::new(
                        Uuid::from_u16(MEASUREMENT),
                        CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
                        AttributePermissions::READABLE,
                    ),
                ]),
            )
            .with_value(Uuid::from_u16(HEART_RATE), Uuid::from_u16(MEASUREMENT), vec![0x06, 0x48]),
    );
    driver.power_on().await.unwrap();

    // start scanning for devices
    central_manager
        .scan(None, ScanOptions::default())
        .await
        .unwrap();

    // Handle Updates
    let consumer = central_manager.clone();
    tokio::spawn(async move {
        while let Some(event) = receiver_rx.recv().await {
            handle_updates(&consumer, event).await;
        }
    });

    let measurement = CharacteristicId {
        peripheral: monitor.clone(),
        service: Uuid::from_u16(HEART_RATE),
        characteristic: Uuid::from_u16(MEASUREMENT),
    };
    for beat in 0..8u8 {
        driver.advertise(&monitor);
        driver.notify(&measurement, vec![0x06, 70 + beat]);
        driver.run_until_idle().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    log::info!("done");
}

/// Listen to all updates and walk the monitor from discovery to notifications.
async fn handle_updates(central_manager: &SimulatedCentral, update: CentralEvent) {
    let peripheral = update
        .peripheral()
        .and_then(|id| central_manager.peripheral(id));
    match (update, peripheral) {
        (CentralEvent::StateUpdate { state }, _) => log::info!("radio is {state:?}"),
        (CentralEvent::DeviceDiscovered { name, rssi, .. }, Some(peripheral)) => {
            log::info!("found {:?} at {rssi} dBm", name);
            let _ = central_manager.stop_scan().await;
            let _ = central_manager
                .connect(&peripheral, ConnectOptions::default())
                .await;
        }
        (CentralEvent::DeviceConnected { .. }, Some(peripheral)) => {
            log::info!("connected to {}", peripheral.id());
            let _ = peripheral.discover_services(None).await;
        }
        (CentralEvent::ServicesDiscovered { result: Ok(()), .. }, Some(peripheral)) => {
            for service in peripheral.services().unwrap_or_default() {
                let _ = peripheral.discover_characteristics(None, &service).await;
            }
        }
        (CentralEvent::CharacteristicsDiscovered { result: Ok(()), .. }, Some(peripheral)) => {
            for characteristic in peripheral.characteristics() {
                if characteristic.properties().can_subscribe() {
                    let _ = peripheral.set_notify(true, &characteristic).await;
                }
            }
        }
        (
            CentralEvent::CharacteristicValueUpdate {
                characteristic,
                result: Ok(value),
            },
            _,
        ) => log::info!("{} -> {:02x?}", characteristic.characteristic, value),
        (event, _) => log::debug!("{event:?}"),
    }
}
