//! Physical endpoint table and device configuration

use usb_device::{endpoint::EndpointType, UsbDirection};

/// Number of physical endpoints, including the control endpoint.
pub const ENDPOINT_COUNT: usize = 4;

/// Maximum packet size of the control endpoint.
pub const EP0_MAX_PACKET: u16 = 64;

bitflags::bitflags! {
    /// Transfer kinds supported by a physical endpoint.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Kinds: u8 {
        const CONTROL = 1 << 0;
        const BULK = 1 << 1;
        const INTERRUPT = 1 << 2;
    }
}

impl Kinds {
    /// Returns the kind flag for an endpoint type
    ///
    /// Isochronous endpoints aren't supported, and map to the empty set.
    pub fn of(kind: EndpointType) -> Kinds {
        match kind {
            EndpointType::Control => Kinds::CONTROL,
            EndpointType::Bulk => Kinds::BULK,
            EndpointType::Interrupt => Kinds::INTERRUPT,
            EndpointType::Isochronous { .. } => Kinds::empty(),
        }
    }
}

/// Capabilities of one physical endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    /// The direction this endpoint can move data, or `None` if it can
    /// move data in both directions.
    pub direction: Option<UsbDirection>,
    /// Supported transfer kinds.
    pub kinds: Kinds,
    /// Largest packet the endpoint FIFO can hold.
    pub max_packet: u16,
}

impl EndpointInfo {
    /// The bidirectional control endpoint
    pub const fn control() -> Self {
        EndpointInfo {
            direction: None,
            kinds: Kinds::CONTROL,
            max_packet: EP0_MAX_PACKET,
        }
    }

    /// A unidirectional endpoint supporting `kinds`
    pub const fn new(direction: UsbDirection, kinds: Kinds, max_packet: u16) -> Self {
        EndpointInfo {
            direction: Some(direction),
            kinds,
            max_packet,
        }
    }

    /// Indicates if the endpoint can act in `direction` with `kind` transfers
    pub fn supports(&self, direction: UsbDirection, kind: EndpointType) -> bool {
        let kind = Kinds::of(kind);
        !kind.is_empty()
            && self.kinds.contains(kind)
            && self.direction.map_or(true, |dir| dir == direction)
    }
}

/// Device configuration
///
/// Describes each physical endpoint, and the initial power source. Endpoint
/// 0 must be a control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Physical endpoint capabilities, indexed by physical endpoint number.
    pub endpoints: [EndpointInfo; ENDPOINT_COUNT],
    /// Report the device as self-powered in GET_STATUS responses.
    pub self_powered: bool,
}

impl Config {
    /// Check the invariants that the driver relies on
    pub(crate) fn is_valid(&self) -> bool {
        self.endpoints[0] == EndpointInfo::control()
            && self.endpoints[1..].iter().all(|info| {
                info.direction.is_some()
                    && !info.kinds.contains(Kinds::CONTROL)
                    && info.max_packet > 0
                    && info.max_packet <= 64
            })
    }
}

impl Default for Config {
    /// Control endpoint, a bulk/interrupt IN endpoint, a bulk/interrupt OUT
    /// endpoint, and an interrupt IN endpoint. Every endpoint holds 64 byte
    /// packets.
    fn default() -> Self {
        Config {
            endpoints: [
                EndpointInfo::control(),
                EndpointInfo::new(UsbDirection::In, Kinds::BULK.union(Kinds::INTERRUPT), 64),
                EndpointInfo::new(UsbDirection::Out, Kinds::BULK.union(Kinds::INTERRUPT), 64),
                EndpointInfo::new(UsbDirection::In, Kinds::INTERRUPT, 64),
            ],
            self_powered: false,
        }
    }
}
