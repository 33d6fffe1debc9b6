use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, Sender};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::api::advertisement::AdvertisementData;
use crate::api::attribute::{AttributeRequest, RemoteCentral, RequestResponse};
use crate::api::characteristic::MutableCharacteristic;
use crate::api::peripheral::PeripheralManager;
use crate::api::peripheral_event::PeripheralEvent;
use crate::api::service::MutableService;
use crate::api::state::ManagerState;
use crate::corebluetooth::objc_bindings::peripheral_manager_cb::{
    PeripheralManagerCache, PeripheralManagerCommand, SharedPeripheralCache, lock,
    run_peripheral_thread,
};
use crate::{DEFAULT_EVENT_CAPACITY, Result};

/// `PeripheralManager` backed by `CBPeripheralManager`.
pub struct CoreBluetoothPeripheralManager {
    commands: Sender<PeripheralManagerCommand>,
    cache: SharedPeripheralCache,
}

impl CoreBluetoothPeripheralManager {
    pub fn new(sender: Sender<PeripheralEvent>) -> Result<Self> {
        let (commands, listener) = mpsc::channel(DEFAULT_EVENT_CAPACITY);
        let cache: SharedPeripheralCache = Arc::new(Mutex::new(PeripheralManagerCache::default()));
        run_peripheral_thread(sender, listener, cache.clone())?;
        Ok(Self { commands, cache })
    }

    async fn send(&self, command: PeripheralManagerCommand) -> Result<()> {
        self.commands.send(command).await?;
        Ok(())
    }
}

#[async_trait]
impl PeripheralManager for CoreBluetoothPeripheralManager {
    fn state(&self) -> ManagerState {
        lock(&self.cache).state
    }

    fn is_advertising(&self) -> bool {
        lock(&self.cache).advertising
    }

    fn services(&self) -> Vec<MutableService> {
        lock(&self.cache).services.clone()
    }

    async fn start_advertising(&self, advertisement: AdvertisementData) -> Result<()> {
        self.send(PeripheralManagerCommand::StartAdvertising(advertisement))
            .await
    }

    async fn stop_advertising(&self) -> Result<()> {
        self.send(PeripheralManagerCommand::StopAdvertising).await
    }

    async fn add_service(&self, service: MutableService) -> Result<()> {
        self.send(PeripheralManagerCommand::AddService(service)).await
    }

    async fn remove_service(&self, service: Uuid) -> Result<()> {
        self.send(PeripheralManagerCommand::RemoveService(service))
            .await
    }

    async fn remove_all_services(&self) -> Result<()> {
        self.send(PeripheralManagerCommand::RemoveAllServices).await
    }

    async fn respond(&self, request: AttributeRequest, result: RequestResponse) -> Result<()> {
        self.send(PeripheralManagerCommand::Respond { request, result })
            .await
    }

    async fn update_value(
        &self,
        value: &[u8],
        characteristic: &MutableCharacteristic,
        centrals: Option<&[RemoteCentral]>,
    ) -> Result<bool> {
        let (responder, response) = oneshot::channel();
        self.send(PeripheralManagerCommand::UpdateValue {
            value: value.to_vec(),
            characteristic: characteristic.clone(),
            centrals: centrals.map(<[RemoteCentral]>::to_vec),
            responder,
        })
        .await?;
        response.await?
    }
}
