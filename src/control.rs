//! Control transfer state machine
//!
//! Decodes SETUP packets on endpoint 0. Standard requests that concern the
//! device's own state are answered here; everything else goes to the class
//! driver. Data stages move through the transfer engine like any other
//! transfer.

use crate::{
    endpoint::Endpoint,
    hardware::{Ep0Status, Hardware},
    request::RequestStatus,
    setup::SetupPacket,
    Device, Error, Speed,
};
use usb_device::{
    control::{Recipient, Request, RequestType},
    endpoint::EndpointAddress,
    UsbDirection,
};

/// Progress of the current control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ep0State {
    /// Waiting for a SETUP.
    Idle,
    /// Sending the data stage.
    DataIn,
    /// Receiving the data stage.
    DataOut,
    /// Waiting for the status stage to finish.
    Status,
    /// Stalled until the next SETUP.
    Stalled,
}

impl<H: Hardware> Device<H> {
    /// Handle a control endpoint event
    pub(crate) fn ep0_interrupt(&mut self) {
        let status = self.hw.ep0_status();
        if status.contains(Ep0Status::SENT_STALL) {
            self.hw.ep0_clear(Ep0Status::SENT_STALL);
            trace!("EP0 SENT STALL");
        }
        if status.contains(Ep0Status::SETUP_END) {
            self.hw.ep0_clear(Ep0Status::SETUP_END);
            debug!("EP0 SETUP END");
            if matches!(self.ep0, Ep0State::DataIn | Ep0State::DataOut) {
                self.ep0 = Ep0State::Idle;
            }
        }

        if self.speed == Speed::Unknown {
            self.speed = Speed::Full;
            debug!("SPEED FULL");
        }

        match self.ep0 {
            Ep0State::Status => self.finish_status(),
            Ep0State::DataIn => self.write_request(0),
            Ep0State::DataOut => self.read_request(0),
            Ep0State::Idle | Ep0State::Stalled => {}
        }

        if matches!(self.ep0, Ep0State::Idle | Ep0State::Stalled) && self.hw.rx_count(0).is_some() {
            self.handle_setup();
        }
    }

    /// The status stage finished; a latched address takes effect now
    fn finish_status(&mut self) {
        if let Some(address) = self.pending_address.take() {
            self.hw.set_address(address);
            self.address = Some(address);
            debug!("ADDRESS {}", address);
        }
        self.ep0 = Ep0State::Idle;
    }

    /// Stall the rest of the control transfer
    pub(crate) fn stall_ep0(&mut self) {
        self.hw.ep0_stall();
        self.stalled = true;
        self.ep0 = Ep0State::Stalled;
        debug!("EP0 STALL");
    }

    fn handle_setup(&mut self) {
        // The host abandoned whatever was still in flight.
        if !self.endpoints[0].queue.is_empty() {
            debug!("EP0 ABANDONED");
            self.drain(0, RequestStatus::ProtocolError);
        }
        self.stalled = false;
        self.endpoints[0].clear_flags();
        self.pending_address = None;
        self.ep0 = Ep0State::Idle;

        let mut raw = [0; 8];
        let count = self.hw.rx_count(0).unwrap_or(0);
        let read = self.hw.read_packet(0, &mut raw);
        if count != raw.len() || read != raw.len() {
            warn!("EP0 SETUP LENGTH {}", count);
            self.stall_ep0();
            return;
        }

        let setup = SetupPacket::parse(&raw);
        self.ep0_length = setup.length;
        debug!(
            "SETUP {} {} {} {} {}",
            setup.request_type_bits(),
            setup.request,
            setup.value,
            setup.index,
            setup.length
        );

        if setup.request_type != RequestType::Standard {
            self.forward(&setup);
            return;
        }

        match setup.request {
            Request::GET_STATUS => self.get_status(&setup),
            Request::CLEAR_FEATURE => self.set_feature(&setup, false),
            Request::SET_FEATURE => self.set_feature(&setup, true),
            Request::SET_ADDRESS => self.latch_address(&setup),
            Request::GET_DESCRIPTOR
            | Request::SET_DESCRIPTOR
            | Request::GET_CONFIGURATION
            | Request::SET_CONFIGURATION
            | Request::GET_INTERFACE
            | Request::SET_INTERFACE => self.forward(&setup),
            // No isochronous endpoints to synchronize.
            Request::SYNCH_FRAME => self.stall_ep0(),
            _ => self.stall_ep0(),
        }
    }

    /// Find the endpoint the host calls `address`
    fn find_endpoint(&self, address: EndpointAddress) -> Option<usize> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.answers(address))
            .map(Endpoint::index)
    }

    fn get_status(&mut self, setup: &SetupPacket) {
        if setup.length != 2 || setup.direction != UsbDirection::In || setup.value != 0 {
            self.stall_ep0();
            return;
        }
        let status = match setup.recipient {
            Recipient::Device => [u8::from(self.self_powered), 0],
            Recipient::Interface => [0, 0],
            Recipient::Endpoint => {
                match self.find_endpoint(EndpointAddress::from(setup.index as u8)) {
                    Some(index) => [u8::from(self.endpoints[index].halted), 0],
                    None => {
                        self.stall_ep0();
                        return;
                    }
                }
            }
            _ => {
                self.stall_ep0();
                return;
            }
        };
        self.hw.ep0_ack(false);
        self.hw.write_packet(0, &status, true);
        self.ep0 = Ep0State::Status;
    }

    fn set_feature(&mut self, setup: &SetupPacket, enable: bool) {
        match setup.recipient {
            Recipient::Endpoint if setup.value == Request::FEATURE_ENDPOINT_HALT => {
                let Some(index) = self.find_endpoint(EndpointAddress::from(setup.index as u8))
                else {
                    self.stall_ep0();
                    return;
                };
                if index != 0 {
                    let endpoint = &mut self.endpoints[index];
                    endpoint.halted = enable;
                    let (direction, blocked) = (endpoint.direction(), endpoint.is_blocked());
                    self.hw.set_stalled(index, direction, blocked);
                    debug!("EP{} HALT {}", index, enable);
                }
                self.hw.ep0_ack(true);
                self.ep0 = Ep0State::Status;
                if !enable && index != 0 {
                    self.service(index);
                }
            }
            Recipient::Device => self.forward(setup),
            _ => self.stall_ep0(),
        }
    }

    fn latch_address(&mut self, setup: &SetupPacket) {
        if setup.value > 127 || setup.has_data() {
            self.stall_ep0();
            return;
        }
        // Applied once the status stage finishes.
        self.pending_address = Some(setup.value as u8);
        debug!("ADDRESS LATCHED {}", setup.value);
        self.hw.ep0_ack(true);
        self.ep0 = Ep0State::Status;
    }

    /// Let the class driver answer the request
    fn forward(&mut self, setup: &SetupPacket) {
        if setup.has_data() {
            self.hw.ep0_ack(false);
            self.ep0 = match setup.direction {
                UsbDirection::In => Ep0State::DataIn,
                UsbDirection::Out => Ep0State::DataOut,
            };
        }

        let result = self
            .with_driver(|driver, device| driver.setup(device, setup))
            .unwrap_or(Err(Error::Shutdown));

        match result {
            Err(_) => {
                self.drain(0, RequestStatus::ProtocolError);
                self.stall_ep0();
            }
            Ok(()) if !setup.has_data() => {
                self.hw.ep0_ack(true);
                self.ep0 = Ep0State::Status;
            }
            Ok(()) => {}
        }
    }
}
