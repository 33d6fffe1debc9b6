use blehal::api::advertisement::AdvertisementData;
use blehal::api::attribute::{RemoteCentral, RequestResponse};
use blehal::api::characteristic::{
    AttributePermissions, CharacteristicProperties, MutableCharacteristic,
};
use blehal::api::peripheral::PeripheralManager;
use blehal::api::peripheral_event::{PeripheralEvent, PeripheralManagerOperation};
use blehal::api::service::MutableService;
use blehal::api::state::ManagerState;
use blehal::simulated::{
    IncomingWrite, SimulatedConfig, SimulatedPeripheralDriver, SimulatedPeripheralManager,
};
use blehal::uuid::ShortUuid;
use blehal::{DEFAULT_EVENT_CAPACITY, ErrorType};
use tokio::sync::mpsc::{self, Receiver};
use uuid::Uuid;

fn service_uuid() -> Uuid {
    Uuid::from_u128(0x6E40_0001_B5A3_F393_E0A9_E50E_24DC_CA9E)
}

fn notify_uuid() -> Uuid {
    Uuid::from_u128(0x6E40_0003_B5A3_F393_E0A9_E50E_24DC_CA9E)
}

fn write_uuid() -> Uuid {
    Uuid::from_u128(0x6E40_0002_B5A3_F393_E0A9_E50E_24DC_CA9E)
}

fn notify_characteristic() -> MutableCharacteristic {
    MutableCharacteristic::new(
        notify_uuid(),
        CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
        AttributePermissions::READABLE,
    )
}

fn uart_service() -> MutableService {
    MutableService::new(service_uuid(), true).with_characteristics(vec![
        notify_characteristic(),
        MutableCharacteristic::new(
            write_uuid(),
            CharacteristicProperties::WRITE | CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
            AttributePermissions::WRITEABLE,
        ),
    ])
}

fn central(n: u128, maximum_update_value_length: usize) -> RemoteCentral {
    RemoteCentral::new(Uuid::from_u128(n), maximum_update_value_length)
}

fn drain<T>(receiver: &mut Receiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

async fn powered_manager(
    config: SimulatedConfig,
) -> (
    SimulatedPeripheralManager,
    SimulatedPeripheralDriver,
    Receiver<PeripheralEvent>,
) {
    let _ = pretty_env_logger::try_init();
    let (sender, mut receiver) = mpsc::channel(DEFAULT_EVENT_CAPACITY);
    let (manager, driver) = SimulatedPeripheralManager::with_config(sender, config);
    driver.power_on().await.unwrap();
    drain(&mut receiver);
    (manager, driver, receiver)
}

/// Publishes `service` and starts advertising it.
async fn publish<M: PeripheralManager>(manager: &M, service: MutableService) {
    let uuid = service.uuid();
    manager.add_service(service).await.unwrap();
    manager
        .start_advertising(AdvertisementData::new("uart", &[uuid]))
        .await
        .unwrap();
}

#[tokio::test]
async fn read_request_is_answered_once() {
    let (manager, driver, mut receiver) = powered_manager(SimulatedConfig::default()).await;
    publish(&manager, uart_service()).await;
    driver.run_until_idle().await;
    assert!(matches!(
        drain(&mut receiver).as_slice(),
        [
            PeripheralEvent::ServiceAdded { result: Ok(()), .. },
            PeripheralEvent::AdvertisingStarted { result: Ok(()) },
        ]
    ));
    assert!(manager.is_advertising());
    assert_eq!(
        driver.advertisement().unwrap().local_name.as_deref(),
        Some("uart")
    );
    assert_eq!(manager.services(), vec![uart_service()]);

    let phone = central(1, 182);
    driver.read_request(&phone, service_uuid(), notify_uuid(), 0);
    driver.run_until_idle().await;

    let mut events = drain(&mut receiver);
    assert_eq!(events.len(), 1);
    let PeripheralEvent::ReadRequest { mut request } = events.remove(0) else {
        panic!("expected a read request");
    };
    assert_eq!(request.offset(), 0);
    assert_eq!(request.central(), &phone);
    assert_eq!(request.service_uuid(), service_uuid());
    assert_eq!(request.characteristic().uuid(), notify_uuid());

    request.set_value(Some(b"hello".to_vec()));
    manager
        .respond(request, RequestResponse::Success)
        .await
        .unwrap();
    driver.run_until_idle().await;

    assert!(drain(&mut receiver).is_empty());
    let responses = driver.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].central, phone);
    assert_eq!(responses[0].result, RequestResponse::Success);
    assert_eq!(responses[0].value, Some(b"hello".to_vec()));
}

#[tokio::test]
async fn write_batch_is_answered_through_its_first_request() {
    let (manager, driver, mut receiver) = powered_manager(SimulatedConfig::default()).await;
    publish(&manager, uart_service()).await;
    driver.run_until_idle().await;
    drain(&mut receiver);

    let phone = central(1, 182);
    driver.write_requests(
        &phone,
        vec![
            IncomingWrite {
                service: service_uuid(),
                characteristic: write_uuid(),
                offset: 0,
                value: b"hel".to_vec(),
            },
            IncomingWrite {
                service: service_uuid(),
                characteristic: write_uuid(),
                offset: 3,
                value: b"lo".to_vec(),
            },
        ],
    );
    driver.run_until_idle().await;

    let mut events = drain(&mut receiver);
    assert_eq!(events.len(), 1);
    let PeripheralEvent::WriteRequests { mut requests } = events.remove(0) else {
        panic!("expected a write batch");
    };
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].value(), Some(&b"hel"[..]));
    assert_eq!(requests[1].offset(), 3);

    let second = requests.remove(1);
    let second_id = second.id();
    manager
        .respond(second, RequestResponse::Success)
        .await
        .unwrap();
    let first = requests.remove(0);
    manager
        .respond(first, RequestResponse::Success)
        .await
        .unwrap();
    driver.run_until_idle().await;

    match drain(&mut receiver).as_slice() {
        [
            PeripheralEvent::OperationFailed {
                operation: PeripheralManagerOperation::Respond { request },
                error,
            },
        ] => {
            assert_eq!(*request, second_id);
            assert_eq!(error.kind(), ErrorType::ProtocolMisuse);
        }
        other => panic!("unexpected events {other:?}"),
    }
    let responses = driver.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].characteristic, write_uuid());
    assert_eq!(responses[0].value, None);
}

#[tokio::test]
async fn refused_requests_are_answered_by_the_driver() {
    let (manager, driver, mut receiver) = powered_manager(SimulatedConfig::default()).await;
    publish(&manager, uart_service()).await;
    driver.run_until_idle().await;
    drain(&mut receiver);

    let phone = central(1, 182);
    driver.read_request(&phone, service_uuid(), write_uuid(), 0);
    driver.read_request(&phone, service_uuid(), Uuid::from_u16(0x2A00), 0);
    driver.write_requests(
        &phone,
        vec![IncomingWrite {
            service: service_uuid(),
            characteristic: notify_uuid(),
            offset: 0,
            value: vec![1],
        }],
    );
    driver.run_until_idle().await;

    assert!(drain(&mut receiver).is_empty());
    let results: Vec<RequestResponse> = driver
        .responses()
        .into_iter()
        .map(|response| response.result)
        .collect();
    assert_eq!(
        results,
        vec![
            RequestResponse::ReadNotPermitted,
            RequestResponse::InvalidHandle,
            RequestResponse::WriteNotPermitted,
        ]
    );
}

#[tokio::test]
async fn oversize_update_is_rejected() {
    let (manager, driver, mut receiver) = powered_manager(SimulatedConfig::default()).await;
    publish(&manager, uart_service()).await;
    let watch = central(2, 20);
    driver.subscribe(&watch, service_uuid(), notify_uuid());
    driver.run_until_idle().await;
    drain(&mut receiver);

    let error = manager
        .update_value(&[0u8; 21], &notify_characteristic(), None)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorType::InvalidLength);

    let error = manager
        .update_value(&[0u8; 21], &notify_characteristic(), Some(std::slice::from_ref(&watch)))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorType::InvalidLength);

    assert!(
        manager
            .update_value(&[0u8; 20], &notify_characteristic(), None)
            .await
            .unwrap()
    );
    let sent = driver.transmit().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].central, watch);
    assert_eq!(sent[0].value.len(), 20);
}

#[tokio::test]
async fn full_transmit_queue_asks_for_a_retry() {
    let config = SimulatedConfig {
        notification_queue_capacity: 1,
        ..Default::default()
    };
    let (manager, driver, mut receiver) = powered_manager(config).await;
    publish(&manager, uart_service()).await;
    let phone = central(1, 182);
    driver.subscribe(&phone, service_uuid(), notify_uuid());
    driver.run_until_idle().await;
    drain(&mut receiver);

    let characteristic = notify_characteristic();
    assert!(manager.update_value(b"one", &characteristic, None).await.unwrap());
    assert!(!manager.update_value(b"two", &characteristic, None).await.unwrap());

    let sent = driver.transmit().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].value, b"one".to_vec());
    assert!(matches!(
        drain(&mut receiver).as_slice(),
        [PeripheralEvent::ReadyToUpdateSubscribers]
    ));

    assert!(manager.update_value(b"two", &characteristic, None).await.unwrap());
    let sent = driver.transmit().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].value, b"two".to_vec());
    assert!(drain(&mut receiver).is_empty());
}

#[tokio::test]
async fn update_to_more_centrals_than_queue_slots_is_accepted() {
    let config = SimulatedConfig {
        notification_queue_capacity: 2,
        ..Default::default()
    };
    let (manager, driver, mut receiver) = powered_manager(config).await;
    publish(&manager, uart_service()).await;
    for n in 1..=3 {
        driver.subscribe(&central(n, 182), service_uuid(), notify_uuid());
    }
    driver.run_until_idle().await;
    drain(&mut receiver);

    let characteristic = notify_characteristic();
    for value in [&b"one"[..], &b"two"[..], &b"three"[..]] {
        assert!(manager.update_value(value, &characteristic, None).await.unwrap());
        assert_eq!(driver.transmit().await.len(), 3);
    }

    assert!(manager.update_value(b"four", &characteristic, None).await.unwrap());
    assert!(manager.update_value(b"five", &characteristic, None).await.unwrap());
    assert!(!manager.update_value(b"six", &characteristic, None).await.unwrap());
    assert_eq!(driver.transmit().await.len(), 6);
    assert!(matches!(
        drain(&mut receiver).as_slice(),
        [PeripheralEvent::ReadyToUpdateSubscribers]
    ));
    assert!(manager.update_value(b"six", &characteristic, None).await.unwrap());
    let sent = driver.transmit().await;
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|notification| notification.value == b"six".to_vec()));
}

#[tokio::test]
async fn shared_characteristic_uuid_is_scoped_to_its_service() {
    let (manager, driver, mut receiver) = powered_manager(SimulatedConfig::default()).await;
    let mirror_uuid = Uuid::from_u16(0xFFF0);
    let mirror = MutableService::new(mirror_uuid, true)
        .with_characteristics(vec![notify_characteristic()]);
    publish(&manager, uart_service()).await;
    manager.add_service(mirror.clone()).await.unwrap();
    let phone = central(1, 182);
    driver.subscribe(&phone, mirror_uuid, notify_uuid());
    driver.run_until_idle().await;
    drain(&mut receiver);

    let error = manager
        .update_value(b"x", &notify_characteristic(), None)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorType::UnknownEntity);

    let uart = uart_service();
    let uart_notify = uart.characteristic(notify_uuid()).unwrap();
    assert_eq!(uart_notify.service_uuid(), Some(service_uuid()));
    assert!(manager.update_value(b"uart", uart_notify, None).await.unwrap());
    assert!(driver.transmit().await.is_empty());

    let mirror_notify = mirror.characteristic(notify_uuid()).unwrap();
    assert!(manager.update_value(b"mirror", mirror_notify, None).await.unwrap());
    let sent = driver.transmit().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].central, phone);
    assert_eq!(sent[0].service, mirror_uuid);
}

#[tokio::test]
async fn explicit_centrals_must_be_subscribed() {
    let (manager, driver, mut receiver) = powered_manager(SimulatedConfig::default()).await;
    publish(&manager, uart_service()).await;
    let phone = central(1, 182);
    let stranger = central(2, 182);
    driver.subscribe(&phone, service_uuid(), notify_uuid());
    driver.run_until_idle().await;
    drain(&mut receiver);

    let error = manager
        .update_value(b"v", &notify_characteristic(), Some(&[phone.clone(), stranger]))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorType::UnknownEntity);
    assert!(driver.transmit().await.is_empty());

    assert!(
        manager
            .update_value(b"v", &notify_characteristic(), Some(std::slice::from_ref(&phone)))
            .await
            .unwrap()
    );
    assert_eq!(driver.transmit().await.len(), 1);
}

#[tokio::test]
async fn unsubscribe_matches_the_central_after_an_mtu_change() {
    let (manager, driver, mut receiver) = powered_manager(SimulatedConfig::default()).await;
    publish(&manager, uart_service()).await;
    driver.run_until_idle().await;
    drain(&mut receiver);

    driver.subscribe(&central(1, 20), service_uuid(), notify_uuid());
    driver.subscribe(&central(1, 244), service_uuid(), notify_uuid());
    driver.unsubscribe(&central(1, 244), service_uuid(), notify_uuid());
    driver.run_until_idle().await;

    assert!(matches!(
        drain(&mut receiver).as_slice(),
        [
            PeripheralEvent::CharacteristicSubscriptionUpdate { subscribed: true, .. },
            PeripheralEvent::CharacteristicSubscriptionUpdate { subscribed: false, .. },
        ]
    ));
    assert!(
        manager
            .update_value(b"idle", &notify_characteristic(), None)
            .await
            .unwrap()
    );
    assert!(driver.transmit().await.is_empty());
}

#[tokio::test]
async fn request_from_another_manager_is_an_unknown_entity() {
    let (manager, driver, mut receiver) = powered_manager(SimulatedConfig::default()).await;
    let (other, other_driver, mut other_receiver) =
        powered_manager(SimulatedConfig::default()).await;
    let phone = central(1, 182);
    for (manager, driver) in [(&manager, &driver), (&other, &other_driver)] {
        publish(manager, uart_service()).await;
        driver.run_until_idle().await;
        driver.read_request(&phone, service_uuid(), notify_uuid(), 0);
        driver.run_until_idle().await;
    }
    let Some(PeripheralEvent::ReadRequest { request }) = drain(&mut receiver).pop() else {
        panic!("expected a read request");
    };
    let Some(PeripheralEvent::ReadRequest {
        request: other_request,
    }) = drain(&mut other_receiver).pop()
    else {
        panic!("expected a read request");
    };
    assert_ne!(request.id(), other_request.id());

    let foreign_id = request.id();
    other
        .respond(request, RequestResponse::Success)
        .await
        .unwrap();
    other_driver.run_until_idle().await;
    match drain(&mut other_receiver).as_slice() {
        [
            PeripheralEvent::OperationFailed {
                operation: PeripheralManagerOperation::Respond { request },
                error,
            },
        ] => {
            assert_eq!(*request, foreign_id);
            assert_eq!(error.kind(), ErrorType::UnknownEntity);
        }
        unexpected => panic!("unexpected events {unexpected:?}"),
    }
    assert!(other_driver.responses().is_empty());

    other
        .respond(other_request, RequestResponse::Success)
        .await
        .unwrap();
    other_driver.run_until_idle().await;
    assert!(drain(&mut other_receiver).is_empty());
    assert_eq!(other_driver.responses().len(), 1);
    assert!(driver.responses().is_empty());
}

#[tokio::test]
async fn subscriptions_are_reported_on_change() {
    let (manager, driver, mut receiver) = powered_manager(SimulatedConfig::default()).await;
    publish(&manager, uart_service()).await;
    driver.run_until_idle().await;
    drain(&mut receiver);

    let phone = central(1, 182);
    driver.subscribe(&phone, service_uuid(), notify_uuid());
    driver.subscribe(&phone, service_uuid(), notify_uuid());
    driver.subscribe(&phone, service_uuid(), write_uuid());
    driver.unsubscribe(&phone, service_uuid(), notify_uuid());
    driver.run_until_idle().await;

    match drain(&mut receiver).as_slice() {
        [
            PeripheralEvent::CharacteristicSubscriptionUpdate {
                request: subscribe,
                subscribed: true,
            },
            PeripheralEvent::CharacteristicSubscriptionUpdate {
                request: unsubscribe,
                subscribed: false,
            },
        ] => {
            assert_eq!(subscribe.client, phone);
            assert_eq!(subscribe.characteristic, notify_uuid());
            assert_eq!(subscribe, unsubscribe);
        }
        other => panic!("unexpected events {other:?}"),
    }

    // nobody is listening any more
    assert!(
        manager
            .update_value(b"idle", &notify_characteristic(), None)
            .await
            .unwrap()
    );
    assert!(driver.transmit().await.is_empty());
}

#[tokio::test]
async fn service_table_changes() {
    let (manager, driver, mut receiver) = powered_manager(SimulatedConfig::default()).await;
    let battery = MutableService::new(Uuid::from_u16(0x180F), true);
    manager.add_service(uart_service()).await.unwrap();
    manager.add_service(battery.clone()).await.unwrap();
    manager.add_service(battery).await.unwrap();
    manager.remove_service(Uuid::from_u16(0x1812)).await.unwrap();
    driver.run_until_idle().await;

    let events = drain(&mut receiver);
    assert_eq!(events.len(), 4);
    assert!(matches!(
        &events[2],
        PeripheralEvent::ServiceAdded { result: Err(e), .. } if e.kind() == ErrorType::ProtocolMisuse
    ));
    assert!(matches!(
        &events[3],
        PeripheralEvent::ServiceRemoved { result: Err(e), .. } if e.kind() == ErrorType::UnknownEntity
    ));
    assert_eq!(manager.services().len(), 2);

    manager.remove_all_services().await.unwrap();
    driver.run_until_idle().await;
    let removed: Vec<Uuid> = drain(&mut receiver)
        .into_iter()
        .map(|event| match event {
            PeripheralEvent::ServiceRemoved { service, result } => {
                assert!(result.is_ok());
                service
            }
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(removed, vec![service_uuid(), Uuid::from_u16(0x180F)]);
    assert!(manager.services().is_empty());
}

#[tokio::test]
async fn advertising_twice_is_an_invalid_state() {
    let (manager, driver, mut receiver) = powered_manager(SimulatedConfig::default()).await;
    let advertisement = AdvertisementData::new("uart", &[service_uuid()]);
    manager
        .start_advertising(advertisement.clone())
        .await
        .unwrap();
    manager.start_advertising(advertisement).await.unwrap();
    manager.stop_advertising().await.unwrap();
    driver.run_until_idle().await;

    match drain(&mut receiver).as_slice() {
        [
            PeripheralEvent::AdvertisingStarted { result: Ok(()) },
            PeripheralEvent::AdvertisingStarted { result: Err(e) },
        ] => assert_eq!(e.kind(), ErrorType::InvalidState),
        other => panic!("unexpected events {other:?}"),
    }
    assert!(!manager.is_advertising());
}

#[tokio::test]
async fn requests_fail_while_powered_off() {
    let _ = pretty_env_logger::try_init();
    let (sender, mut receiver) = mpsc::channel(DEFAULT_EVENT_CAPACITY);
    let (manager, driver) = SimulatedPeripheralManager::new(sender);
    assert_eq!(manager.state(), ManagerState::Unknown);

    let error = manager
        .update_value(b"x", &notify_characteristic(), None)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorType::NotPoweredOn);

    publish(&manager, uart_service()).await;
    manager.remove_all_services().await.unwrap();
    driver.run_until_idle().await;

    let events = drain(&mut receiver);
    assert_eq!(events.len(), 3);
    assert!(matches!(
        &events[0],
        PeripheralEvent::ServiceAdded { result: Err(e), .. } if e.kind() == ErrorType::NotPoweredOn
    ));
    assert!(matches!(
        &events[1],
        PeripheralEvent::AdvertisingStarted { result: Err(e) } if e.kind() == ErrorType::NotPoweredOn
    ));
    assert!(matches!(
        &events[2],
        PeripheralEvent::OperationFailed {
            operation: PeripheralManagerOperation::RemoveAllServices,
            error,
        } if error.kind() == ErrorType::NotPoweredOn
    ));
}

#[tokio::test]
async fn unknown_characteristic_update_is_rejected() {
    let (manager, _driver, _receiver) = powered_manager(SimulatedConfig::default()).await;
    let error = manager
        .update_value(b"x", &notify_characteristic(), None)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorType::UnknownEntity);
}
