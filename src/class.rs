//! The class driver contract

use crate::{
    endpoint::EndpointId,
    hardware::Hardware,
    request::{RequestId, RequestStatus},
    setup::SetupPacket,
    Device, Error,
};

/// A finished request, as reported to the class driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// The endpoint that moved the data.
    pub endpoint: EndpointId,
    pub request: RequestId,
    pub status: RequestStatus,
    /// Bytes moved before the request finished.
    pub transferred: usize,
    /// The request's opaque context.
    pub context: u32,
}

/// USB function logic bound on top of the device
///
/// The device calls into the class driver from the controller interrupt,
/// and from the API calls that complete requests. Each call receives the
/// device, so the class driver may submit or cancel requests, or configure
/// endpoints, while it handles the event.
pub trait ClassDriver<H: Hardware> {
    /// Called once when the driver is registered
    ///
    /// Allocate endpoints and requests here. An error aborts the
    /// registration.
    fn bind(&mut self, device: &mut Device<H>) -> Result<(), Error>;

    /// Called once when the driver is unregistered
    ///
    /// All requests have been cancelled by the time this runs.
    fn unbind(&mut self, device: &mut Device<H>);

    /// Handle a SETUP packet that the device doesn't answer itself
    ///
    /// For requests with a data stage, submit a request to
    /// [`EndpointId::CONTROL`] that moves the data. Return an error to stall
    /// the control endpoint.
    fn setup(&mut self, device: &mut Device<H>, setup: &SetupPacket) -> Result<(), Error>;

    /// A request finished
    ///
    /// Called exactly once for every submitted request, after the request
    /// left its endpoint's queue. The request may be resubmitted from here.
    fn complete(&mut self, device: &mut Device<H>, completion: Completion);

    /// The host reset the bus, or the device was detached
    fn disconnect(&mut self, device: &mut Device<H>) {
        let _ = device;
    }

    /// The bus went idle
    fn suspend(&mut self, device: &mut Device<H>) {
        let _ = device;
    }

    /// The bus left the suspended state
    fn resume(&mut self, device: &mut Device<H>) {
        let _ = device;
    }
}

/// The class driver object held by a device
pub type Driver<H> = dyn ClassDriver<H> + Send + 'static;
