//! SETUP packet decoding

use usb_device::{
    control::{Recipient, RequestType},
    UsbDirection,
};

/// A decoded SETUP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    /// Direction of the data stage.
    pub direction: UsbDirection,
    pub request_type: RequestType,
    pub recipient: Recipient,
    /// Request code, like [`Request::GET_DESCRIPTOR`](usb_device::control::Request::GET_DESCRIPTOR).
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// Length of the data stage.
    pub length: u16,
}

impl SetupPacket {
    /// Decode the eight bytes received in a SETUP transaction
    pub fn parse(raw: &[u8; 8]) -> Self {
        let request_type = match (raw[0] >> 5) & 0b11 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        };
        let recipient = match raw[0] & 0b1_1111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        };
        SetupPacket {
            direction: raw[0].into(),
            request_type,
            recipient,
            request: raw[1],
            value: u16::from_le_bytes([raw[2], raw[3]]),
            index: u16::from_le_bytes([raw[4], raw[5]]),
            length: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }

    /// Indicates if the request has a data stage
    pub fn has_data(&self) -> bool {
        self.length > 0
    }

    /// The raw `bmRequestType` field
    pub(crate) fn request_type_bits(&self) -> u8 {
        (self.direction as u8) | ((self.request_type as u8) << 5) | (self.recipient as u8)
    }
}
