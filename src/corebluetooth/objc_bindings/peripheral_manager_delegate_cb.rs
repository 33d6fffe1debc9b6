use futures::executor;
use log::{debug, error, trace, warn};
use objc2::rc::Retained;
use objc2::{AnyThread, DefinedClass, define_class, msg_send};
use objc2_core_bluetooth::{
    CBATTRequest, CBCentral, CBCharacteristic, CBPeripheralManager, CBPeripheralManagerDelegate,
    CBService,
};
use objc2_foundation::{NSArray, NSError, NSObject, NSObjectProtocol};
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use super::SendRetained;
use super::central_delegate_cb::convert_state;
use super::mac_extensions_cb::{UuidExtension, localized_description, platform_result};
use crate::Result;
use crate::api::state::ManagerState;

/// What the delegate reports to the peripheral manager's worker thread.
#[derive(Debug)]
pub(crate) enum PeripheralDelegateEvent {
    StateUpdate {
        state: ManagerState,
    },
    AdvertisingStarted {
        result: Result<()>,
    },
    ServiceAdded {
        service: Uuid,
        result: Result<()>,
    },
    SubscriptionUpdate {
        central: SendRetained<CBCentral>,
        service: Uuid,
        characteristic: Uuid,
        subscribed: bool,
    },
    ReadRequest {
        request: SendRetained<CBATTRequest>,
    },
    WriteRequests {
        requests: Vec<SendRetained<CBATTRequest>>,
    },
    ReadyToUpdateSubscribers,
}

// Instance variables stored within the ObjC class, the channel back into Rust.
#[derive(Debug)]
pub struct IVars {
    pub sender: Sender<PeripheralDelegateEvent>,
}

define_class! {
    #[derive(Debug)]
    #[unsafe(super(NSObject))]
    #[thread_kind = AnyThread]
    #[name = "BlehalPeripheralManagerDelegate"]
    #[ivars = IVars]
    pub struct PeripheralManagerDelegate;

    unsafe impl NSObjectProtocol for PeripheralManagerDelegate {}

    unsafe impl CBPeripheralManagerDelegate for PeripheralManagerDelegate {
        #[unsafe(method(peripheralManagerDidUpdateState:))]
        fn delegate_peripheralmanagerdidupdatestate(&self, peripheral: &CBPeripheralManager) {
            trace!("delegate_peripheralmanagerdidupdatestate");
            let state = convert_state(unsafe { peripheral.state() });
            self.send_event(PeripheralDelegateEvent::StateUpdate { state });
        }

        #[unsafe(method(peripheralManagerDidStartAdvertising:error:))]
        fn delegate_peripheralmanagerdidstartadvertising_error(
            &self,
            _: &CBPeripheralManager,
            error: Option<&NSError>,
        ) {
            debug!("Advertising started, error: {:?}", localized_description(error));
            self.send_event(PeripheralDelegateEvent::AdvertisingStarted {
                result: platform_result(error),
            });
        }

        #[unsafe(method(peripheralManager:didAddService:error:))]
        fn delegate_peripheralmanager_didaddservice_error(
            &self,
            _: &CBPeripheralManager,
            service: &CBService,
            error: Option<&NSError>,
        ) {
            debug!(
                "Service {} added, error: {:?}",
                service.get_uuid(),
                localized_description(error)
            );
            self.send_event(PeripheralDelegateEvent::ServiceAdded {
                service: service.get_uuid(),
                result: platform_result(error),
            });
        }

        #[unsafe(method(peripheralManager:central:didSubscribeToCharacteristic:))]
        fn delegate_peripheralmanager_central_didsubscribetocharacteristic(
            &self,
            _: &CBPeripheralManager,
            central: &CBCentral,
            characteristic: &CBCharacteristic,
        ) {
            trace!("delegate_peripheralmanager_central_didsubscribetocharacteristic");
            self.send_subscription(central, characteristic, true);
        }

        #[unsafe(method(peripheralManager:central:didUnsubscribeFromCharacteristic:))]
        fn delegate_peripheralmanager_central_didunsubscribefromcharacteristic(
            &self,
            _: &CBPeripheralManager,
            central: &CBCentral,
            characteristic: &CBCharacteristic,
        ) {
            trace!("delegate_peripheralmanager_central_didunsubscribefromcharacteristic");
            self.send_subscription(central, characteristic, false);
        }

        #[unsafe(method(peripheralManager:didReceiveReadRequest:))]
        fn delegate_peripheralmanager_didreceivereadrequest(
            &self,
            _: &CBPeripheralManager,
            request: &CBATTRequest,
        ) {
            trace!("delegate_peripheralmanager_didreceivereadrequest");
            self.send_event(PeripheralDelegateEvent::ReadRequest {
                request: SendRetained(request.retain()),
            });
        }

        #[unsafe(method(peripheralManager:didReceiveWriteRequests:))]
        fn delegate_peripheralmanager_didreceivewriterequests(
            &self,
            _: &CBPeripheralManager,
            requests: &NSArray<CBATTRequest>,
        ) {
            trace!("delegate_peripheralmanager_didreceivewriterequests {}", requests.count());
            let requests = requests.iter().map(SendRetained).collect();
            self.send_event(PeripheralDelegateEvent::WriteRequests { requests });
        }

        #[unsafe(method(peripheralManagerIsReadyToUpdateSubscribers:))]
        fn delegate_peripheralmanagerisreadytoupdatesubscribers(&self, _: &CBPeripheralManager) {
            trace!("delegate_peripheralmanagerisreadytoupdatesubscribers");
            self.send_event(PeripheralDelegateEvent::ReadyToUpdateSubscribers);
        }
    }
}

impl PeripheralManagerDelegate {
    pub fn new(sender: Sender<PeripheralDelegateEvent>) -> Retained<PeripheralManagerDelegate> {
        let this = PeripheralManagerDelegate::alloc().set_ivars(IVars { sender });
        unsafe { msg_send![super(this), init] }
    }

    fn send_event(&self, event: PeripheralDelegateEvent) {
        let sender = self.ivars().sender.clone();
        executor::block_on(async {
            if let Err(e) = sender.send(event).await {
                error!("Error sending delegate event: {}", e);
            }
        });
    }

    fn send_subscription(&self, central: &CBCentral, characteristic: &CBCharacteristic, subscribed: bool) {
        let Some(service) = (unsafe { characteristic.service() }) else {
            warn!("subscription to a characteristic without a service");
            return;
        };
        self.send_event(PeripheralDelegateEvent::SubscriptionUpdate {
            central: SendRetained(central.retain()),
            service: service.get_uuid(),
            characteristic: characteristic.get_uuid(),
            subscribed,
        });
    }
}
