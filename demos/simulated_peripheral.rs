use blehal::api::advertisement::AdvertisementData;
use blehal::api::attribute::{RemoteCentral, RequestResponse};
use blehal::api::characteristic::{
    AttributePermissions, CharacteristicProperties, MutableCharacteristic,
};
use blehal::api::peripheral::PeripheralManager;
use blehal::api::peripheral_event::PeripheralEvent;
use blehal::api::service::MutableService;
use blehal::simulated::{IncomingWrite, SimulatedPeripheralManager};
use blehal::DEFAULT_EVENT_CAPACITY;
use log::LevelFilter;
use tokio::sync::mpsc;
use uuid::Uuid;

const SERVICE: Uuid = Uuid::from_u128(0x6E40_0001_B5A3_F393_E0A9_E50E_24DC_CA9E);
const RX: Uuid = Uuid::from_u128(0x6E40_0002_B5A3_F393_E0A9_E50E_24DC_CA9E);
const TX: Uuid = Uuid::from_u128(0x6E40_0003_B5A3_F393_E0A9_E50E_24DC_CA9E);

fn tx_characteristic() -> MutableCharacteristic {
    MutableCharacteristic::new(
        TX,
        CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
        AttributePermissions::READABLE,
    )
}

#[tokio::main]
async fn main() {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .init();

    let (sender_tx, mut receiver_rx) = mpsc::channel::<PeripheralEvent>(DEFAULT_EVENT_CAPACITY);
    let (peripheral_manager, driver) = SimulatedPeripheralManager::new(sender_tx);
    driver.power_on().await.unwrap();

    let service = MutableService::new(SERVICE, true).with_characteristics(vec![
        tx_characteristic(),
        MutableCharacteristic::new(
            RX,
            CharacteristicProperties::WRITE | CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
            AttributePermissions::WRITEABLE,
        ),
    ]);
    peripheral_manager.add_service(service).await.unwrap();
    // start advertising for centrals to connect
    peripheral_manager
        .start_advertising(AdvertisementData::new("uart", &[SERVICE]))
        .await
        .unwrap();

    let phone = RemoteCentral::new(Uuid::from_u128(1), 182);
    driver.subscribe(&phone, SERVICE, TX);
    driver.read_request(&phone, SERVICE, TX, 0);
    driver.write_requests(
        &phone,
        vec![IncomingWrite {
            service: SERVICE,
            characteristic: RX,
            offset: 0,
            value: b"ping".to_vec(),
        }],
    );
    driver.run_until_idle().await;

    // Handle Updates
    while let Ok(event) = receiver_rx.try_recv() {
        handle_updates(&peripheral_manager, event).await;
    }
    driver.run_until_idle().await;

    for sent in driver.transmit().await {
        log::info!("notified {} with {:?}", sent.central.identifier(), sent.value);
    }
    for response in driver.responses() {
        log::info!("answered {} with {:?}", response.characteristic, response.result);
    }
}

/// Echo every write back to the subscribers and answer reads with a greeting.
async fn handle_updates(peripheral_manager: &SimulatedPeripheralManager, update: PeripheralEvent) {
    match update {
        PeripheralEvent::ReadRequest { mut request } => {
            request.set_value(Some(b"hello".to_vec()));
            let _ = peripheral_manager
                .respond(request, RequestResponse::Success)
                .await;
        }
        PeripheralEvent::WriteRequests { mut requests } => {
            for request in &requests {
                if let Some(value) = request.value() {
                    match peripheral_manager
                        .update_value(value, &tx_characteristic(), None)
                        .await
                    {
                        Ok(true) => {}
                        Ok(false) => log::warn!("transmit queue full"),
                        Err(e) => log::error!("echo failed: {e}"),
                    }
                }
            }
            if !requests.is_empty() {
                let first = requests.swap_remove(0);
                let _ = peripheral_manager
                    .respond(first, RequestResponse::Success)
                    .await;
            }
        }
        PeripheralEvent::CharacteristicSubscriptionUpdate { request, subscribed } => {
            log::info!(
                "{} subscribed to {}: {subscribed}",
                request.client.identifier(),
                request.characteristic
            );
        }
        event => log::info!("{event:?}"),
    }
}
