use async_trait::async_trait;
use uuid::Uuid;

use crate::Result;
use crate::api::advertisement::AdvertisementData;
use crate::api::attribute::{AttributeRequest, RemoteCentral, RequestResponse};
use crate::api::characteristic::MutableCharacteristic;
use crate::api::service::MutableService;
use crate::api::state::ManagerState;

/// Server side of the radio: advertising, the local attribute table and
/// answering remote centrals.
///
/// As with `CentralManager`, request methods only hand work to the driver and
/// completions arrive as `PeripheralEvent`s. Consumers that must not change
/// the attribute table while advertising check `is_advertising` first.
#[async_trait]
pub trait PeripheralManager: Send + Sync {
    fn state(&self) -> ManagerState;

    fn is_advertising(&self) -> bool;

    /// Services currently published, in publication order.
    fn services(&self) -> Vec<MutableService>;

    async fn start_advertising(&self, advertisement: AdvertisementData) -> Result<()>;

    async fn stop_advertising(&self) -> Result<()>;

    /// Completes with `PeripheralEvent::ServiceAdded`. The service is either
    /// published whole or not at all.
    async fn add_service(&self, service: MutableService) -> Result<()>;

    async fn remove_service(&self, service: Uuid) -> Result<()>;

    async fn remove_all_services(&self) -> Result<()>;

    /// Answers a read or write request. For write batches, answer with the
    /// first request of the batch.
    async fn respond(&self, request: AttributeRequest, result: RequestResponse) -> Result<()>;

    /// Queues `value` for the given centrals, or for every central subscribed
    /// to `characteristic` when `centrals` is `None`.
    ///
    /// `Ok(false)` means the transmit queue is full: nothing was queued and the
    /// call should be repeated after `PeripheralEvent::ReadyToUpdateSubscribers`.
    /// A value longer than an addressed central's maximum update length is
    /// rejected with `ErrorType::InvalidLength`.
    async fn update_value(
        &self,
        value: &[u8],
        characteristic: &MutableCharacteristic,
        centrals: Option<&[RemoteCentral]>,
    ) -> Result<bool>;
}
