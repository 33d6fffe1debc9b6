use std::ffi::{CString, c_char, c_void};

use objc2::runtime::AnyObject;

pub const DISPATCH_QUEUE_SERIAL: *const c_void = std::ptr::null();

#[link(name = "System", kind = "dylib")]
unsafe extern "C" {
    pub fn dispatch_queue_create(label: *const c_char, attr: *const c_void) -> *mut c_void;
}

/// Private serial queue CoreBluetooth delivers a manager's delegate
/// callbacks on.
pub fn serial_queue(label: &str) -> *mut AnyObject {
    let label = CString::new(label).unwrap_or_default();
    let queue = unsafe { dispatch_queue_create(label.as_ptr(), DISPATCH_QUEUE_SERIAL) };
    queue.cast()
}
