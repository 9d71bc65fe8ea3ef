//! A USB device controller driver for Mentor-style (MUSB) controllers
//!
//! `musb-usbd` is the device side of a USB stack. It owns the controller,
//! answers the standard control requests that concern the device itself, and
//! moves data for a single class driver. The class driver describes
//! transfers as [`Request`]s, submits them to endpoints, and learns about
//! their completion through [`ClassDriver::complete`].
//!
//! - [`Device`] is the driver core. It talks to the controller through the
//!   [`Hardware`] trait.
//! - [`Musb`] implements [`Hardware`] for MUSB register blocks. To use it,
//!   define a safe implementation of [`Peripherals`].
//! - [`Controller`] wraps a [`Device`] in a critical section, so that task
//!   code and interrupt handlers can share it.
//!
//! # Features
//!
//! Enable `defmt-03` to log driver events through `defmt`, and to derive
//! `defmt::Format` on some `usb-device` types.

#![no_std]

#[cfg(feature = "defmt-03")]
extern crate defmt_03 as defmt;

#[macro_use]
mod log;

mod bus;
mod class;
mod config;
mod control;
mod driver;
mod endpoint;
mod error;
mod fifo;
mod hardware;
mod interrupt;
mod musb;
mod ral;
mod request;
mod setup;
mod transfer;
mod vcell;

#[cfg(test)]
mod testing;

pub use bus::Controller;
pub use class::{ClassDriver, Completion, Driver};
pub use config::{Config, EndpointInfo, Kinds, ENDPOINT_COUNT, EP0_MAX_PACKET};
pub use driver::{Device, Speed};
pub use endpoint::EndpointId;
pub use error::Error;
pub use hardware::{Ep0Status, Hardware, Interrupts};
pub use musb::Musb;
pub use request::{Request, RequestId, RequestStatus, MAX_REQUESTS};
pub use setup::SetupPacket;

/// A type that owns the USB controller's register block
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that owns the MUSB
/// register block. The pointer returned by [`usb`](Peripherals::usb) is
/// assumed to be valid for the life of the program, and will be cast to a
/// register definition.
///
/// # Example
///
/// A safe implementation of `Peripherals` for a board support crate that
/// hands out the controller as a singleton.
///
/// ```
/// # mod pac {
/// #   pub struct USB(());
/// #   impl USB { pub fn take() -> Option<USB> { Some(USB(())) } pub const PTR: *const u8 = 0x4000_5000 as _; }
/// # }
/// use musb_usbd::Peripherals;
///
/// struct Usb(pac::USB);
///
/// unsafe impl Peripherals for Usb {
///     fn usb(&self) -> *const () {
///         pac::USB::PTR.cast()
///     }
/// }
///
/// let usb = Usb(pac::USB::take().unwrap());
/// assert_eq!(usb.usb(), 0x4000_5000 as *const ());
/// ```
pub unsafe trait Peripherals {
    /// Returns the address of the USB controller registers
    fn usb(&self) -> *const ();
}
