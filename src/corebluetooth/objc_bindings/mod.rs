use objc2::rc::Retained;

pub(crate) mod central_delegate_cb;
pub(crate) mod central_manager_cb;
mod characteristic_utils_cb;
mod mac_extensions_cb;
mod mac_utils_cb;
pub(crate) mod peripheral_manager_cb;
mod peripheral_manager_delegate_cb;

pub use peripheral_manager_cb::is_authorized;

/// An Objective-C object handed from the delegate queue to the manager's
/// worker thread.
///
/// CoreBluetooth objects are not `Send`, but the manager serialises all use of
/// them on its worker once handed over, and the delegate keeps no reference.
pub(crate) struct SendRetained<T>(pub Retained<T>);

unsafe impl<T> Send for SendRetained<T> {}

impl<T> std::fmt::Debug for SendRetained<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SendRetained({:p})", Retained::as_ptr(&self.0))
    }
}
