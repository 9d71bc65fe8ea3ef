//! USB device driver core
//!
//! `Device` owns the controller, the endpoint table, the request pool, and
//! the bound class driver. It's not interrupt safe by itself. Wrap it in a
//! [`Controller`](crate::Controller) to share it between task code and the
//! controller's interrupt handler.

use crate::{
    class::{Completion, Driver},
    config::{Config, ENDPOINT_COUNT},
    control::Ep0State,
    endpoint::{Endpoint, EndpointId},
    hardware::Hardware,
    request::{Request, RequestId, RequestPool, RequestQueue, RequestStatus},
    Error,
};
use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

/// Bus speed
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Speed {
    /// No token observed since the last reset.
    #[default]
    Unknown,
    /// 12 Mbit/s.
    Full,
}

/// A USB device
///
/// After you create a `Device` with [`new()`](Device::new), you must
///
/// - call [`initialize()`](Device::initialize) once
/// - register a class driver with
///   [`register_class_driver()`](Device::register_class_driver)
///
/// The device connects to the bus once both have happened.
pub struct Device<H: Hardware> {
    pub(crate) hw: H,
    pub(crate) endpoints: [Endpoint; ENDPOINT_COUNT],
    pub(crate) pool: RequestPool,
    /// Requests that finished while the class driver was busy.
    pub(crate) completed: RequestQueue,
    pub(crate) driver: Option<&'static mut Driver<H>>,
    /// The class driver is running a callback, or binding.
    pub(crate) lent: bool,
    pub(crate) ep0: Ep0State,
    /// Data stage length of the current control transfer.
    pub(crate) ep0_length: u16,
    /// Control endpoint stall; cleared by the next SETUP.
    pub(crate) stalled: bool,
    pub(crate) self_powered: bool,
    pub(crate) pending_address: Option<u8>,
    pub(crate) address: Option<u8>,
    pub(crate) attached: bool,
    pub(crate) suspended: bool,
    pub(crate) remote_wakeup: bool,
    pub(crate) speed: Speed,
    pub(crate) initialized: bool,
}

impl<H: Hardware> Device<H> {
    /// Create a device that drives `hw`
    ///
    /// Returns an error if `config` doesn't describe endpoint 0 as a control
    /// endpoint, or if a non-zero endpoint isn't a unidirectional data
    /// endpoint.
    pub fn new(hw: H, config: Config) -> Result<Self, Error> {
        if !config.is_valid() {
            return Err(Error::Invalid);
        }
        Ok(Device {
            hw,
            endpoints: core::array::from_fn(|index| Endpoint::new(index, config.endpoints[index])),
            pool: RequestPool::new(),
            completed: RequestQueue::new(),
            driver: None,
            lent: false,
            ep0: Ep0State::Idle,
            ep0_length: 0,
            stalled: false,
            self_powered: config.self_powered,
            pending_address: None,
            address: None,
            attached: false,
            suspended: false,
            remote_wakeup: false,
            speed: Speed::Unknown,
            initialized: false,
        })
    }

    /// Initialize the controller, and enable its interrupts
    ///
    /// If a class driver is already registered, the device connects to the
    /// bus.
    pub fn initialize(&mut self) {
        self.hw.initialize();
        self.reset_control();
        self.hw.set_interrupts(true);
        self.attached = self.hw.is_attached();
        self.initialized = true;
        if self.has_driver() {
            self.hw.set_connected(true);
        }
        debug!("INITIALIZED ATTACHED {}", self.attached);
    }

    /// Disconnect from the bus, cancel all requests, and disable the
    /// controller's interrupts
    pub fn uninitialize(&mut self) {
        if !self.initialized {
            return;
        }
        self.initialized = false;
        self.hw.set_connected(false);
        self.hw.set_interrupts(false);
        for endpoint in self.endpoints.iter_mut().skip(1) {
            endpoint.enabled = false;
        }
        self.cancel_all(RequestStatus::Cancelled);
        for endpoint in self.endpoints.iter_mut() {
            endpoint.clear_flags();
        }
        for index in 0..ENDPOINT_COUNT {
            self.hw.reset_endpoint(index);
        }
        self.reset_control();
        debug!("UNINITIALIZED");
    }

    /// Claim a physical endpoint that supports `direction` and `kind`
    ///
    /// `hint` restricts the search to one physical endpoint. Returns `None`
    /// if no free endpoint supports the transfer.
    pub fn allocate_endpoint(
        &mut self,
        hint: Option<usize>,
        direction: UsbDirection,
        kind: EndpointType,
    ) -> Option<EndpointId> {
        let found = self
            .endpoints
            .iter()
            .skip(1)
            .filter(|endpoint| hint.map_or(true, |hint| hint == endpoint.index()))
            .find(|endpoint| !endpoint.allocated && endpoint.info().supports(direction, kind))
            .map(Endpoint::index);

        match found {
            Some(index) => {
                self.endpoints[index].allocate(direction, kind);
                debug!("EP{} ALLOCATED", index);
                Some(EndpointId::new(index))
            }
            None => {
                warn!("EP ALLOCATION FAILED");
                None
            }
        }
    }

    /// Disable and release an endpoint
    pub fn free_endpoint(&mut self, ep: EndpointId) -> Result<(), Error> {
        let index = endpoint_index(ep)?;
        if index == 0 || !self.endpoints[index].allocated {
            return Err(Error::Invalid);
        }
        self.disable_endpoint(ep);
        self.endpoints[index].release();
        debug!("EP{} RELEASED", index);
        Ok(())
    }

    /// Bind an allocated endpoint to a logical address, transfer type, and
    /// max packet size
    ///
    /// The endpoint must not have requests in flight.
    pub fn configure_endpoint(
        &mut self,
        ep: EndpointId,
        address: EndpointAddress,
        kind: EndpointType,
        max_packet: u16,
    ) -> Result<(), Error> {
        let index = endpoint_index(ep)?;
        let endpoint = &self.endpoints[index];
        if index == 0
            || !endpoint.allocated
            || address.index() == 0
            || max_packet == 0
            || max_packet > endpoint.info().max_packet
            || !endpoint.info().supports(address.direction(), kind)
        {
            return Err(Error::Invalid);
        }
        if !endpoint.queue.is_empty() {
            return Err(Error::Busy);
        }
        if self
            .endpoints
            .iter()
            .any(|other| other.index() != index && other.answers(address))
        {
            return Err(Error::Invalid);
        }

        self.hw.configure_endpoint(index, address, kind, max_packet)?;
        self.endpoints[index].configure(address, kind, max_packet);
        debug!(
            "EP{} CONFIGURED ADDRESS {} MAX PACKET {}",
            index,
            u8::from(address),
            max_packet
        );
        Ok(())
    }

    /// Cancel every queued request, and reset the endpoint's hardware state
    ///
    /// Disabled endpoints refuse new requests until they're configured again.
    /// The control endpoint is never disabled.
    pub fn disable_endpoint(&mut self, ep: EndpointId) {
        let Ok(index) = endpoint_index(ep) else {
            return;
        };
        if index != 0 {
            self.endpoints[index].enabled = false;
        }
        self.drain(index, RequestStatus::Cancelled);
        self.hw.reset_endpoint(index);
        self.endpoints[index].clear_flags();
        debug!("EP{} DISABLED", index);
    }

    /// Clear the endpoint's stall
    ///
    /// The host's halt feature is unaffected.
    pub fn reset_stall(&mut self, ep: EndpointId) -> Result<(), Error> {
        let index = endpoint_index(ep)?;
        let endpoint = &mut self.endpoints[index];
        endpoint.stalled = false;
        if index != 0 {
            let (direction, halted) = (endpoint.direction(), endpoint.halted);
            self.hw.set_stalled(index, direction, halted);
            self.service(index);
        }
        Ok(())
    }

    /// Stall (`true`) or unstall (`false`) an endpoint
    ///
    /// Stalling the control endpoint stalls the current control transfer.
    pub fn set_stall(&mut self, ep: EndpointId, stalled: bool) -> Result<(), Error> {
        let index = endpoint_index(ep)?;
        if index == 0 {
            if stalled {
                self.stall_ep0();
            } else {
                self.endpoints[0].stalled = false;
            }
            return Ok(());
        }

        let endpoint = &mut self.endpoints[index];
        if !endpoint.allocated {
            return Err(Error::Invalid);
        }
        endpoint.stalled = stalled;
        let (direction, blocked) = (endpoint.direction(), endpoint.is_blocked());
        self.hw.set_stalled(index, direction, blocked);
        debug!("EP{} STALL {}", index, stalled);
        if !blocked {
            self.service(index);
        }
        Ok(())
    }

    /// Allocate a request from the pool
    ///
    /// Returns `None` when the pool is exhausted. See
    /// [`allocation_failures`](Device::allocation_failures).
    pub fn allocate_request(&mut self) -> Option<RequestId> {
        self.pool.allocate()
    }

    /// Return a request to the pool, yielding its buffer
    ///
    /// Fails with [`Error::Busy`] if the request is still in flight.
    pub fn free_request(&mut self, id: RequestId) -> Result<Option<&'static mut [u8]>, Error> {
        self.pool.free(id)
    }

    /// Access a request
    pub fn request(&self, id: RequestId) -> Option<&Request> {
        self.pool.get(id)
    }

    /// Modify a request that isn't in flight
    pub fn request_mut(&mut self, id: RequestId) -> Option<&mut Request> {
        self.pool.get_idle_mut(id)
    }

    /// Number of times that request allocation found the pool empty
    pub fn allocation_failures(&self) -> u32 {
        self.pool.allocation_failures()
    }

    /// Queue a request on an endpoint
    ///
    /// If the endpoint was idle, the first packet moves before `submit`
    /// returns. A zero-length request on the control endpoint completes
    /// immediately.
    ///
    /// Returns [`Error::Shutdown`] if there's no class driver, the bus speed
    /// isn't known, or the endpoint is disabled or being cancelled. Returns
    /// [`Error::Busy`] if the endpoint is stalled.
    pub fn submit(&mut self, ep: EndpointId, id: RequestId) -> Result<(), Error> {
        let index = endpoint_index(ep)?;
        if !self.pool.is_idle(id) {
            return Err(Error::Invalid);
        }
        let length = {
            let request = self.pool.request_mut(id);
            if request.length() > 0 && request.buffer().is_none() {
                return Err(Error::Invalid);
            }
            request.length()
        };
        if !self.initialized || !self.has_driver() || self.speed == Speed::Unknown {
            return Err(Error::Shutdown);
        }
        let endpoint = &self.endpoints[index];
        if !endpoint.enabled || endpoint.draining {
            return Err(Error::Shutdown);
        }
        if self.is_refused(index) {
            return Err(Error::Busy);
        }

        self.pool.start(id, index);
        trace!("EP{} SUBMIT {}", index, length);

        if index == 0 && length == 0 {
            self.retire(id, RequestStatus::Success);
            self.report_completions();
            return Ok(());
        }

        let endpoint = &mut self.endpoints[index];
        let was_empty = endpoint.queue.is_empty();
        endpoint.queue.enqueue(&mut self.pool, id);
        if was_empty {
            self.service(index);
        }
        Ok(())
    }

    /// Cancel the requests queued on an endpoint
    ///
    /// Every queued request on the endpoint completes with
    /// [`RequestStatus::Cancelled`], including `id`.
    pub fn cancel(&mut self, ep: EndpointId, id: RequestId) -> Result<(), Error> {
        let index = endpoint_index(ep)?;
        if self.pool.get(id).is_none() {
            return Err(Error::Invalid);
        }
        self.drain(index, RequestStatus::Cancelled);
        Ok(())
    }

    /// Returns the frame number of the last start-of-frame
    pub fn frame_number(&self) -> u16 {
        self.hw.frame_number()
    }

    /// Report the device as self-powered (`true`) or bus-powered (`false`)
    pub fn set_self_powered(&mut self, self_powered: bool) {
        self.self_powered = self_powered;
    }

    /// Signal resume to a host that suspended the bus
    ///
    /// Does nothing unless the bus is suspended. Signaling continues until
    /// the host resumes the bus, or until [`end_wakeup`](Device::end_wakeup).
    /// USB expects the device to stop after 1 to 15 ms.
    pub fn wakeup_host(&mut self) {
        if self.suspended && !self.remote_wakeup {
            self.hw.set_remote_wakeup(true);
            self.remote_wakeup = true;
            debug!("REMOTE WAKEUP");
        }
    }

    /// Stop signaling resume
    ///
    /// Call this about 10 ms after [`wakeup_host`](Device::wakeup_host).
    /// Does nothing if the device isn't signaling.
    pub fn end_wakeup(&mut self) {
        if self.remote_wakeup {
            self.hw.set_remote_wakeup(false);
            self.remote_wakeup = false;
            debug!("REMOTE WAKEUP END");
        }
    }

    /// Bind a class driver, and connect to the bus
    ///
    /// Fails with [`Error::Busy`] if a class driver is already bound. Errors
    /// from the class driver's `bind` are returned, and leave the device
    /// unbound.
    pub fn register_class_driver(&mut self, driver: &'static mut Driver<H>) -> Result<(), Error> {
        if self.has_driver() {
            return Err(Error::Busy);
        }

        self.lent = true;
        let result = driver.bind(self);
        self.lent = false;

        if let Err(err) = result {
            warn!("CLASS BIND FAILED");
            self.report_completions();
            return Err(err);
        }

        self.driver = Some(driver);
        if self.initialized {
            self.hw.set_connected(true);
        }
        debug!("CLASS BOUND");
        self.report_completions();
        Ok(())
    }

    /// Disconnect from the bus, cancel all requests, and unbind the class
    /// driver
    ///
    /// Returns the class driver. Fails with [`Error::Invalid`] if there's no
    /// bound class driver, or [`Error::Busy`] if called from a class driver
    /// callback.
    pub fn unregister_class_driver(&mut self) -> Result<&'static mut Driver<H>, Error> {
        if self.lent {
            return Err(Error::Busy);
        }
        if self.driver.is_none() {
            return Err(Error::Invalid);
        }

        self.hw.set_connected(false);
        self.cancel_all(RequestStatus::Cancelled);
        self.reset_control();

        let driver = self.driver.take().ok_or(Error::Invalid)?;
        self.lent = true;
        driver.unbind(self);
        self.lent = false;
        self.report_completions();
        debug!("CLASS UNBOUND");
        Ok(driver)
    }

    /// Returns the bus speed
    pub fn speed(&self) -> Speed {
        self.speed
    }

    /// Returns the peripheral address assigned by the host
    pub fn address(&self) -> Option<u8> {
        self.address
    }

    /// Indicates if the device is attached to a host
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Indicates if the host suspended the bus
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Indicates if the endpoint is stalled, or halted by the host
    ///
    /// For the control endpoint, this reports the stall of the current control
    /// transfer.
    pub fn is_stalled(&self, ep: EndpointId) -> bool {
        endpoint_index(ep).map_or(false, |index| self.is_refused(index))
    }

    /// Access the controller
    pub fn hardware(&self) -> &H {
        &self.hw
    }

    /// Mutable access to the controller
    ///
    /// Changing the controller's state behind the driver's back may confuse
    /// the driver.
    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    pub(crate) fn has_driver(&self) -> bool {
        self.driver.is_some() || self.lent
    }

    /// Put the control pipe, the address, and the bus state back to their
    /// post-reset values
    pub(crate) fn reset_control(&mut self) {
        self.ep0 = Ep0State::Idle;
        self.ep0_length = 0;
        self.stalled = false;
        self.pending_address = None;
        self.address = None;
        self.suspended = false;
        self.speed = Speed::Unknown;
    }

    /// Record the outcome of a dequeued request
    ///
    /// The class driver learns about it in the next
    /// [`report_completions`](Device::report_completions).
    pub(crate) fn retire(&mut self, id: RequestId, status: RequestStatus) {
        self.pool.retire(id, status);
        self.completed.enqueue(&mut self.pool, id);
    }

    /// Hand retired requests to the class driver, in the order they finished
    ///
    /// Does nothing while the class driver is running a callback. The
    /// callback's caller reports the requests once the class driver returns.
    pub(crate) fn report_completions(&mut self) {
        if self.lent {
            return;
        }
        while let Some(id) = self.completed.dequeue(&mut self.pool) {
            let request = self.pool.finish(id);
            let completion = Completion {
                endpoint: EndpointId::new(request.endpoint),
                request: id,
                status: request.status(),
                transferred: request.transferred(),
                context: request.context(),
            };
            debug!(
                "EP{} COMPLETE {} BYTES SUCCESS {}",
                completion.endpoint.index(),
                completion.transferred,
                completion.status == RequestStatus::Success
            );
            if let Some(driver) = self.driver.take() {
                self.lent = true;
                driver.complete(self, completion);
                self.lent = false;
                self.driver = Some(driver);
            }
        }
    }

    /// Run `func` with the class driver
    ///
    /// Returns `None` if there's no class driver, or if it's already running a
    /// callback.
    pub(crate) fn with_driver<R>(
        &mut self,
        func: impl FnOnce(&mut Driver<H>, &mut Self) -> R,
    ) -> Option<R> {
        let driver = self.driver.take()?;
        self.lent = true;
        let result = func(&mut *driver, self);
        self.lent = false;
        self.driver = Some(driver);
        self.report_completions();
        Some(result)
    }
}

fn endpoint_index(ep: EndpointId) -> Result<usize, Error> {
    let index = ep.index();
    if index < ENDPOINT_COUNT {
        Ok(index)
    } else {
        Err(Error::Invalid)
    }
}
