//! Endpoint records
//!
//! The device owns one record per physical endpoint. Each record carries its
//! physical index as data, along with the logical address presented to the
//! host.

use crate::{config::EndpointInfo, request::RequestQueue};
use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

/// Identifies a physical endpoint
///
/// Obtain these from [`allocate_endpoint`](crate::Device::allocate_endpoint).
/// [`EndpointId::CONTROL`] always names endpoint 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointId(u8);

impl EndpointId {
    /// The control endpoint
    pub const CONTROL: EndpointId = EndpointId(0);

    pub(crate) const fn new(index: usize) -> Self {
        EndpointId(index as u8)
    }

    /// Returns the physical index of this endpoint
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

pub(crate) struct Endpoint {
    index: usize,
    info: EndpointInfo,
    address: EndpointAddress,
    kind: EndpointType,
    max_packet: u16,
    /// Claimed by a class driver.
    pub allocated: bool,
    /// Configured, and able to move data.
    pub enabled: bool,
    /// Answers every token with a stall, until reset.
    pub stalled: bool,
    /// The ENDPOINT_HALT feature, owned by the host.
    pub halted: bool,
    /// The last packet was a full packet that ended a transfer.
    pub null_pending: bool,
    /// Cancelling its queue; new requests are refused.
    pub draining: bool,
    pub queue: RequestQueue,
}

impl Endpoint {
    pub fn new(index: usize, info: EndpointInfo) -> Self {
        let direction = info.direction.unwrap_or(UsbDirection::Out);
        let kind = if index == 0 {
            EndpointType::Control
        } else {
            EndpointType::Bulk
        };
        Endpoint {
            index,
            info,
            address: EndpointAddress::from_parts(index, direction),
            kind,
            max_packet: info.max_packet,
            allocated: index == 0,
            enabled: index == 0,
            stalled: false,
            halted: false,
            null_pending: false,
            draining: false,
            queue: RequestQueue::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn info(&self) -> &EndpointInfo {
        &self.info
    }

    pub fn address(&self) -> EndpointAddress {
        self.address
    }

    pub fn kind(&self) -> EndpointType {
        self.kind
    }

    pub fn max_packet(&self) -> usize {
        self.max_packet as usize
    }

    /// Direction of a non-control endpoint
    pub fn direction(&self) -> UsbDirection {
        self.address.direction()
    }

    /// Claim the endpoint for `direction` and `kind`
    ///
    /// The logical address defaults to the physical index.
    pub fn allocate(&mut self, direction: UsbDirection, kind: EndpointType) {
        self.allocated = true;
        self.address = EndpointAddress::from_parts(self.index, direction);
        self.kind = kind;
        self.max_packet = self.info.max_packet;
    }

    /// Rebind to a logical address
    pub fn configure(&mut self, address: EndpointAddress, kind: EndpointType, max_packet: u16) {
        self.address = address;
        self.kind = kind;
        self.max_packet = max_packet;
        self.enabled = true;
        self.clear_flags();
    }

    /// Release the endpoint; it must already be disabled
    pub fn release(&mut self) {
        *self = Endpoint::new(self.index, self.info);
    }

    pub fn clear_flags(&mut self) {
        self.stalled = false;
        self.halted = false;
        self.null_pending = false;
    }

    /// Indicates if the host's traffic is refused
    pub fn is_blocked(&self) -> bool {
        self.stalled || self.halted
    }

    /// Indicates if the host would reach this endpoint at `address`
    pub fn answers(&self, address: EndpointAddress) -> bool {
        if self.index == 0 {
            address.index() == 0
        } else {
            self.enabled && self.address == address
        }
    }
}
