//! Driver errors

use core::fmt;

/// Errors returned synchronously by the driver API
///
/// Protocol conditions (stalls, a host abandoning a control transfer,
/// overruns) are never reported here. They show up in the request's
/// [`RequestStatus`](crate::RequestStatus), or as a stall handshake on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The resource is in use: a class driver is already bound, the endpoint
    /// is stalled or has requests in flight, or the request is still queued.
    Busy,
    /// The device can't accept transfers yet. There's no bound class driver,
    /// the bus speed isn't known, the endpoint is disabled, or the driver was
    /// uninitialized.
    Shutdown,
    /// Invalid parameters, like an unknown endpoint or request, or a request
    /// without a buffer.
    Invalid,
    /// No memory for the requested object.
    NoMemory,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::Busy => "resource busy",
            Error::Shutdown => "device not ready for transfers",
            Error::Invalid => "invalid parameter",
            Error::NoMemory => "out of memory",
        };
        f.write_str(msg)
    }
}

impl From<Error> for usb_device::UsbError {
    fn from(err: Error) -> Self {
        use usb_device::UsbError;
        match err {
            Error::Busy => UsbError::WouldBlock,
            Error::Shutdown => UsbError::InvalidState,
            Error::Invalid => UsbError::InvalidEndpoint,
            Error::NoMemory => UsbError::EndpointMemoryOverflow,
        }
    }
}
