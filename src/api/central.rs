use std::collections::BTreeSet;
use std::fmt::{self, Debug, Display};

use async_trait::async_trait;
use uuid::Uuid;

use crate::Result;
use crate::api::characteristic::{Characteristic, CharacteristicWriteType};
use crate::api::service::Service;
use crate::api::state::{ConnectionState, ManagerState};

/// Client side of the radio: scanning and connection management.
///
/// Request methods hand the request to the driver and return immediately.
/// Their outcome is delivered as a `CentralEvent` on the sink the manager was
/// built with; an `Err` return only means the driver itself is gone. The
/// manager does not check the radio state before passing a request on.
#[async_trait]
pub trait CentralManager: Send + Sync {
    type Peripheral: PeripheralRemote;

    fn state(&self) -> ManagerState;

    fn is_scanning(&self) -> bool;

    /// `None` reports every advertising peripheral.
    async fn scan(&self, services: Option<BTreeSet<Uuid>>, options: ScanOptions) -> Result<()>;

    /// A no-op when not scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// A no-op for a peripheral that is already connecting or connected.
    async fn connect(&self, peripheral: &Self::Peripheral, options: ConnectOptions) -> Result<()>;

    async fn cancel_connection(&self, peripheral: &Self::Peripheral) -> Result<()>;

    /// Connected peripherals exposing any of `services`.
    async fn connected_peripherals(
        &self,
        services: &BTreeSet<Uuid>,
    ) -> Result<Vec<Self::Peripheral>>;

    /// Peripherals the driver already knows, in the order of `identifiers`.
    /// Unknown identifiers are skipped.
    async fn known_peripherals(&self, identifiers: &[PeripheralId])
    -> Result<Vec<Self::Peripheral>>;
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanOptions {
    /// Report every advertisement instead of one discovery per peripheral and
    /// scan.
    pub allow_duplicates: bool,
    pub solicited_service_uuids: Vec<Uuid>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectOptions {
    pub notify_on_connection: bool,
    pub notify_on_disconnection: bool,
    pub notify_on_notification: bool,
}

/// Handle to a remote GATT server.
///
/// Discovery, read, write and notify requests complete through
/// `CentralEvent`s keyed by this peripheral's id (and the characteristic's
/// id). `services` is a snapshot of what has been delivered so far.
#[async_trait]
pub trait PeripheralRemote: Clone + Debug + Send + Sync + 'static {
    fn id(&self) -> PeripheralId;

    fn name(&self) -> Option<String>;

    fn connection_state(&self) -> ConnectionState;

    async fn read_rssi(&self) -> Result<()>;

    async fn discover_services(&self, services: Option<BTreeSet<Uuid>>) -> Result<()>;

    async fn discover_characteristics(
        &self,
        characteristics: Option<BTreeSet<Uuid>>,
        service: &Service,
    ) -> Result<()>;

    // subscribe to / unsubscribe from notifications
    async fn set_notify(&self, enabled: bool, characteristic: &Characteristic) -> Result<()>;

    async fn read_value(&self, characteristic: &Characteristic) -> Result<()>;

    /// `WriteWithoutResponse` produces no completion event.
    async fn write_value(
        &self,
        data: &[u8],
        characteristic: &Characteristic,
        write_type: CharacteristicWriteType,
    ) -> Result<()>;

    /// `None` until a service discovery completed on the current connection.
    fn services(&self) -> Option<Vec<Service>>;

    fn characteristics(&self) -> Vec<Characteristic> {
        self.services()
            .unwrap_or_default()
            .iter()
            .flat_map(|service| service.characteristics().unwrap_or_default().to_vec())
            .collect()
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PeripheralId(Uuid);

impl PeripheralId {
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for PeripheralId {
    fn from(uuid: Uuid) -> Self {
        PeripheralId(uuid)
    }
}

impl Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
