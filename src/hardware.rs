//! The controller operations that the driver core depends on
//!
//! [`Musb`](crate::musb::Musb) implements [`Hardware`] for Mentor-style
//! controllers. Boards with a different FIFO controller can supply their own
//! implementation.

use crate::Error;
use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

bitflags::bitflags! {
    /// Pending controller interrupt conditions.
    ///
    /// Bit 8 + *n* signals a transmit event on endpoint *n*; bit 16 + *n*
    /// signals a receive event on endpoint *n*. The transmit bit of
    /// endpoint 0 is the control endpoint event, [`EP0`](Interrupts::EP0).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interrupts: u32 {
        const RESET = 1 << 0;
        const SUSPEND = 1 << 1;
        const RESUME = 1 << 2;
        const SESSION_REQUEST = 1 << 3;
        const VBUS_ERROR = 1 << 4;
        const CONNECT = 1 << 5;
        const DISCONNECT = 1 << 6;
        const SOF = 1 << 7;
        const EP0 = 1 << 8;
        /// Transmit events for the non-zero endpoints
        const TX = 0xFE << 8;
        /// Receive events for the non-zero endpoints
        const RX = 0xFE << 16;
    }
}

impl Interrupts {
    /// Transmit ("FIFO free") event for endpoint `index`
    pub const fn tx(index: usize) -> Self {
        Self::from_bits_retain(1 << (8 + index))
    }

    /// Receive ("data available") event for endpoint `index`
    pub const fn rx(index: usize) -> Self {
        Self::from_bits_retain(1 << (16 + index))
    }
}

bitflags::bitflags! {
    /// Control endpoint conditions that need software attention.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ep0Status: u8 {
        /// The controller answered a token with a STALL handshake.
        const SENT_STALL = 1 << 0;
        /// The host ended a control transfer before its data stage finished,
        /// usually by sending a new SETUP.
        const SETUP_END = 1 << 1;
    }
}

/// Controller operations used by the driver core
///
/// Endpoints are named by their physical index. All calls happen in the
/// driver's critical section; implementations must not block.
///
/// The device lives as long as the program, so implementations can't
/// borrow.
pub trait Hardware: 'static {
    /// Reset and initialize the controller
    ///
    /// Leaves the device soft-disconnected, with interrupts disabled, and
    /// with endpoint 0 ready for SETUP packets.
    fn initialize(&mut self);

    /// Enable (`true`) or disable (`false`) controller interrupts
    fn set_interrupts(&mut self, enable: bool);

    /// Connect (`true`) or disconnect (`false`) the bus pull-up
    fn set_connected(&mut self, connected: bool);

    /// Indicates if VBUS is present, i.e. the device is attached to a host
    fn is_attached(&self) -> bool;

    /// Returns all pending interrupt conditions, without clearing them
    fn interrupts(&mut self) -> Interrupts;

    /// Clear the acknowledged interrupt conditions
    fn acknowledge(&mut self, interrupts: Interrupts);

    /// Apply the peripheral address
    fn set_address(&mut self, address: u8);

    /// Returns the frame number of the last start-of-frame
    fn frame_number(&self) -> u16;

    /// Start (`true`) or stop (`false`) resume signaling to the host
    fn set_remote_wakeup(&mut self, signaling: bool);

    /// Bind physical endpoint `index` to a logical address and transfer type
    ///
    /// Returns an error if the controller can't express the binding.
    fn configure_endpoint(
        &mut self,
        index: usize,
        address: EndpointAddress,
        kind: EndpointType,
        max_packet: u16,
    ) -> Result<(), Error>;

    /// Flush the endpoint FIFO, reset its data toggle, and clear any stall
    fn reset_endpoint(&mut self, index: usize);

    /// Stall (`true`) or unstall (`false`) one direction of an endpoint
    fn set_stalled(&mut self, index: usize, direction: UsbDirection, stalled: bool);

    /// Indicates if the transmit FIFO can accept another packet
    fn tx_ready(&self, index: usize) -> bool;

    /// Load `data` into the transmit FIFO and hand it to the controller
    ///
    /// `last` marks the final packet of a control data stage. Non-zero
    /// endpoints ignore it.
    fn write_packet(&mut self, index: usize, data: &[u8], last: bool);

    /// Returns the size of the received packet, or `None` if there isn't one
    fn rx_count(&self, index: usize) -> Option<usize>;

    /// Read the received packet into `buffer`
    ///
    /// Bytes that don't fit into `buffer` are dropped. Returns the number of
    /// bytes copied. Non-zero endpoints release the FIFO to the controller;
    /// endpoint 0 releases its FIFO through [`ep0_ack`](Hardware::ep0_ack).
    fn read_packet(&mut self, index: usize, buffer: &mut [u8]) -> usize;

    /// Returns the control endpoint conditions
    fn ep0_status(&self) -> Ep0Status;

    /// Clear control endpoint conditions
    fn ep0_clear(&mut self, status: Ep0Status);

    /// Release the control endpoint's received packet
    ///
    /// `data_end` indicates that this was the last packet before the status
    /// stage.
    fn ep0_ack(&mut self, data_end: bool);

    /// Release the control endpoint's received packet, and stall the rest of
    /// the control transfer
    fn ep0_stall(&mut self);
}

#[cfg(test)]
mod test {
    use super::Interrupts;

    #[test]
    fn endpoint_bits() {
        assert_eq!(Interrupts::tx(0), Interrupts::EP0);
        assert!(Interrupts::TX.contains(Interrupts::tx(1)));
        assert!(Interrupts::TX.contains(Interrupts::tx(7)));
        assert!(!Interrupts::TX.contains(Interrupts::tx(0)));
        assert!(Interrupts::RX.contains(Interrupts::rx(3)));
        assert!(!Interrupts::RX.contains(Interrupts::rx(0)));
    }
}
