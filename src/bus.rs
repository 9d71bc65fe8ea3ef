//! Interrupt-safe device handle

use crate::{
    class::Driver,
    endpoint::EndpointId,
    hardware::Hardware,
    request::{Request, RequestId},
    Device, Error, Speed,
};
use core::cell::RefCell;
#[cfg(not(test))]
use cortex_m::interrupt;
use cortex_m::interrupt::Mutex;
use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

/// A [`Device`] shared between task code and interrupt handlers
///
/// Every call runs in a critical section. Class driver callbacks run in
/// that same critical section, so they must use the `&mut Device` they're
/// given, never the `Controller`.
///
/// ```no_run
/// # use musb_usbd::{Config, Controller, Device, Musb, Peripherals};
/// # struct Usb; unsafe impl Peripherals for Usb { fn usb(&self) -> *const () { 0x4000_5000 as _ } }
/// # fn take() -> Usb { Usb }
/// let musb = Musb::new(take(), 2048);
/// let device = Device::new(musb, Config::default()).unwrap();
/// let controller = Controller::new(device);
/// controller.initialize();
///
/// // In the USB interrupt handler:
/// controller.on_interrupt();
/// ```
pub struct Controller<H: Hardware> {
    device: Mutex<RefCell<Device<H>>>,
}

impl<H: Hardware> Controller<H> {
    /// Wrap a device
    pub const fn new(device: Device<H>) -> Self {
        Controller {
            device: Mutex::new(RefCell::new(device)),
        }
    }

    /// Interrupt-safe, immutable access to the device
    pub fn with_device<R>(&self, func: impl FnOnce(&Device<H>) -> R) -> R {
        interrupt::free(|cs| {
            let device = self.device.borrow(cs);
            let device = device.borrow();
            func(&device)
        })
    }

    /// Interrupt-safe, mutable access to the device
    pub fn with_device_mut<R>(&self, func: impl FnOnce(&mut Device<H>) -> R) -> R {
        interrupt::free(|cs| {
            let device = self.device.borrow(cs);
            let mut device = device.borrow_mut();
            func(&mut device)
        })
    }

    /// See [`Device::initialize`]
    pub fn initialize(&self) {
        self.with_device_mut(|device| device.initialize());
    }

    /// See [`Device::uninitialize`]
    pub fn uninitialize(&self) {
        self.with_device_mut(|device| device.uninitialize());
    }

    /// Service the controller interrupt
    pub fn on_interrupt(&self) {
        self.with_device_mut(|device| device.on_interrupt());
    }

    /// Service the VBUS sense interrupt
    pub fn on_attach_interrupt(&self) {
        self.with_device_mut(|device| device.on_attach_interrupt());
    }

    pub fn register_class_driver(&self, driver: &'static mut Driver<H>) -> Result<(), Error> {
        self.with_device_mut(|device| device.register_class_driver(driver))
    }

    pub fn unregister_class_driver(&self) -> Result<&'static mut Driver<H>, Error> {
        self.with_device_mut(|device| device.unregister_class_driver())
    }

    pub fn allocate_endpoint(
        &self,
        hint: Option<usize>,
        direction: UsbDirection,
        kind: EndpointType,
    ) -> Option<EndpointId> {
        self.with_device_mut(|device| device.allocate_endpoint(hint, direction, kind))
    }

    pub fn free_endpoint(&self, ep: EndpointId) -> Result<(), Error> {
        self.with_device_mut(|device| device.free_endpoint(ep))
    }

    pub fn configure_endpoint(
        &self,
        ep: EndpointId,
        address: EndpointAddress,
        kind: EndpointType,
        max_packet: u16,
    ) -> Result<(), Error> {
        self.with_device_mut(|device| device.configure_endpoint(ep, address, kind, max_packet))
    }

    pub fn disable_endpoint(&self, ep: EndpointId) {
        self.with_device_mut(|device| device.disable_endpoint(ep));
    }

    pub fn set_stall(&self, ep: EndpointId, stalled: bool) -> Result<(), Error> {
        self.with_device_mut(|device| device.set_stall(ep, stalled))
    }

    pub fn reset_stall(&self, ep: EndpointId) -> Result<(), Error> {
        self.with_device_mut(|device| device.reset_stall(ep))
    }

    pub fn allocate_request(&self) -> Option<RequestId> {
        self.with_device_mut(|device| device.allocate_request())
    }

    pub fn free_request(&self, id: RequestId) -> Result<Option<&'static mut [u8]>, Error> {
        self.with_device_mut(|device| device.free_request(id))
    }

    /// Prepare an idle request
    ///
    /// Returns `None` if the request isn't allocated, or if it's queued.
    pub fn with_request<R>(
        &self,
        id: RequestId,
        func: impl FnOnce(&mut Request) -> R,
    ) -> Option<R> {
        self.with_device_mut(|device| device.request_mut(id).map(func))
    }

    pub fn submit(&self, ep: EndpointId, id: RequestId) -> Result<(), Error> {
        self.with_device_mut(|device| device.submit(ep, id))
    }

    pub fn cancel(&self, ep: EndpointId, id: RequestId) -> Result<(), Error> {
        self.with_device_mut(|device| device.cancel(ep, id))
    }

    pub fn set_self_powered(&self, self_powered: bool) {
        self.with_device_mut(|device| device.set_self_powered(self_powered));
    }

    pub fn wakeup_host(&self) {
        self.with_device_mut(|device| device.wakeup_host());
    }

    pub fn end_wakeup(&self) {
        self.with_device_mut(|device| device.end_wakeup());
    }

    pub fn frame_number(&self) -> u16 {
        self.with_device(|device| device.frame_number())
    }

    pub fn speed(&self) -> Speed {
        self.with_device(|device| device.speed())
    }

    pub fn address(&self) -> Option<u8> {
        self.with_device(|device| device.address())
    }

    pub fn is_attached(&self) -> bool {
        self.with_device(|device| device.is_attached())
    }

    pub fn is_suspended(&self) -> bool {
        self.with_device(|device| device.is_suspended())
    }
}
