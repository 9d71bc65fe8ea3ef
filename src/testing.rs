//! Simulated controller and class driver for host-side tests

extern crate std;

use crate::{
    class::{ClassDriver, Completion},
    config::{Config, ENDPOINT_COUNT},
    endpoint::EndpointId,
    hardware::{Ep0Status, Hardware, Interrupts},
    request::RequestId,
    setup::SetupPacket,
    Device, Error, RequestStatus,
};
use std::{
    boxed::Box,
    collections::VecDeque,
    sync::{Arc, Mutex},
    vec::Vec,
};
use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

/// A controller that records what the driver asks of it
pub struct Sim {
    pub pending: Interrupts,
    pub initialized: usize,
    pub interrupts_enabled: bool,
    pub connected: bool,
    pub attached: bool,
    pub address: u8,
    pub frame: u16,
    pub remote_wakeup: bool,
    pub configured: [Option<(EndpointAddress, EndpointType, u16)>; ENDPOINT_COUNT],
    pub resets: [usize; ENDPOINT_COUNT],
    pub stalled: [bool; ENDPOINT_COUNT],
    pub tx_busy: [bool; ENDPOINT_COUNT],
    pub sent: [Vec<Vec<u8>>; ENDPOINT_COUNT],
    pub rx: [VecDeque<Vec<u8>>; ENDPOINT_COUNT],
    pub ep0_status: Ep0Status,
    /// `data_end` of every EP0 acknowledge.
    pub ep0_acks: Vec<bool>,
    /// Packets written to EP0 with the last-packet flag.
    pub ep0_data_end: usize,
}

impl Sim {
    pub fn new() -> Self {
        Sim {
            pending: Interrupts::empty(),
            initialized: 0,
            interrupts_enabled: false,
            connected: false,
            attached: true,
            address: 0,
            frame: 0,
            remote_wakeup: false,
            configured: [None; ENDPOINT_COUNT],
            resets: [0; ENDPOINT_COUNT],
            stalled: [false; ENDPOINT_COUNT],
            tx_busy: [false; ENDPOINT_COUNT],
            sent: Default::default(),
            rx: Default::default(),
            ep0_status: Ep0Status::empty(),
            ep0_acks: Vec::new(),
            ep0_data_end: 0,
        }
    }
}

impl Hardware for Sim {
    fn initialize(&mut self) {
        self.initialized += 1;
        self.interrupts_enabled = false;
        self.connected = false;
        self.address = 0;
        self.configured = [None; ENDPOINT_COUNT];
        self.tx_busy = [false; ENDPOINT_COUNT];
    }
    fn set_interrupts(&mut self, enable: bool) {
        self.interrupts_enabled = enable;
    }
    fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
    fn is_attached(&self) -> bool {
        self.attached
    }
    fn interrupts(&mut self) -> Interrupts {
        self.pending
    }
    fn acknowledge(&mut self, interrupts: Interrupts) {
        self.pending.remove(interrupts);
    }
    fn set_address(&mut self, address: u8) {
        self.address = address;
    }
    fn frame_number(&self) -> u16 {
        self.frame
    }
    fn set_remote_wakeup(&mut self, signaling: bool) {
        self.remote_wakeup = signaling;
    }
    fn configure_endpoint(
        &mut self,
        index: usize,
        address: EndpointAddress,
        kind: EndpointType,
        max_packet: u16,
    ) -> Result<(), Error> {
        if index == 0 {
            return Err(Error::Invalid);
        }
        self.configured[index] = Some((address, kind, max_packet));
        Ok(())
    }
    fn reset_endpoint(&mut self, index: usize) {
        self.resets[index] += 1;
        self.tx_busy[index] = false;
        self.stalled[index] = false;
        if index != 0 {
            self.rx[index].clear();
        }
    }
    fn set_stalled(&mut self, index: usize, _: UsbDirection, stalled: bool) {
        self.stalled[index] = stalled;
    }
    fn tx_ready(&self, index: usize) -> bool {
        !self.tx_busy[index]
    }
    fn write_packet(&mut self, index: usize, data: &[u8], last: bool) {
        self.sent[index].push(data.to_vec());
        self.tx_busy[index] = true;
        if index == 0 && last {
            self.ep0_data_end += 1;
        }
    }
    fn rx_count(&self, index: usize) -> Option<usize> {
        self.rx[index].front().map(Vec::len)
    }
    fn read_packet(&mut self, index: usize, buffer: &mut [u8]) -> usize {
        let packet = self.rx[index].pop_front().unwrap_or_default();
        let count = packet.len().min(buffer.len());
        buffer[..count].copy_from_slice(&packet[..count]);
        count
    }
    fn ep0_status(&self) -> Ep0Status {
        self.ep0_status
    }
    fn ep0_clear(&mut self, status: Ep0Status) {
        self.ep0_status.remove(status);
    }
    fn ep0_ack(&mut self, data_end: bool) {
        self.ep0_acks.push(data_end);
    }
    fn ep0_stall(&mut self) {
        self.stalled[0] = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Bind,
    Unbind,
    Setup(SetupPacket),
    Complete(Completion),
    Disconnect,
    Suspend,
    Resume,
}

/// How the recording driver answers a forwarded SETUP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Accept,
    Stall,
    /// Submit a control IN request of this many bytes.
    In(usize),
    /// Submit a control OUT request of this many bytes.
    Out(usize),
    /// Submit a zero-length control request, then accept.
    Empty,
    /// Submit a control IN request of this many bytes, ignoring `wLength`.
    Long(usize),
}

struct Shared {
    events: Vec<Event>,
    reply: Reply,
    resubmit: bool,
    resubmit_any: bool,
    resubmits: Vec<Result<(), Error>>,
    fail_bind: bool,
}

/// Test-side view of a [`Recorder`]
#[derive(Clone)]
pub struct Log(Arc<Mutex<Shared>>);

impl Log {
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().events.clone()
    }
    pub fn setups(&self) -> Vec<SetupPacket> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Setup(setup) => Some(setup),
                _ => None,
            })
            .collect()
    }
    pub fn completions(&self) -> Vec<Completion> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Complete(completion) => Some(completion),
                _ => None,
            })
            .collect()
    }
    pub fn clear(&self) {
        self.0.lock().unwrap().events.clear();
    }
    pub fn reply(&self, reply: Reply) {
        self.0.lock().unwrap().reply = reply;
    }
    /// Resubmit every successful request from the completion callback
    pub fn resubmit(&self, resubmit: bool) {
        self.0.lock().unwrap().resubmit = resubmit;
    }
    /// Resubmit every request from the completion callback, whatever its
    /// status
    pub fn resubmit_any(&self, resubmit: bool) {
        self.0.lock().unwrap().resubmit_any = resubmit;
    }
    /// Results of the submissions made from the completion callback
    pub fn resubmits(&self) -> Vec<Result<(), Error>> {
        self.0.lock().unwrap().resubmits.clone()
    }
    pub fn fail_bind(&self, fail: bool) {
        self.0.lock().unwrap().fail_bind = fail;
    }
}

/// A class driver that records every call
pub struct Recorder(Log);

impl Recorder {
    pub fn new() -> (Self, Log) {
        let log = Log(Arc::new(Mutex::new(Shared {
            events: Vec::new(),
            reply: Reply::Accept,
            resubmit: false,
            resubmit_any: false,
            resubmits: Vec::new(),
            fail_bind: false,
        })));
        (Recorder(log.clone()), log)
    }

    fn push(&self, event: Event) {
        self.0 .0.lock().unwrap().events.push(event);
    }
}

/// Allocate a request with a `length` byte buffer of counting bytes
pub fn request<H: Hardware>(device: &mut Device<H>, length: usize) -> RequestId {
    let id = device.allocate_request().unwrap();
    let buffer: Vec<u8> = (0..length).map(|i| i as u8).collect();
    let buffer = Box::leak(buffer.into_boxed_slice());
    device.request_mut(id).unwrap().set_buffer(buffer);
    id
}

impl ClassDriver<Sim> for Recorder {
    fn bind(&mut self, _: &mut Device<Sim>) -> Result<(), Error> {
        self.push(Event::Bind);
        if self.0 .0.lock().unwrap().fail_bind {
            Err(Error::NoMemory)
        } else {
            Ok(())
        }
    }
    fn unbind(&mut self, _: &mut Device<Sim>) {
        self.push(Event::Unbind);
    }
    fn setup(&mut self, device: &mut Device<Sim>, setup: &SetupPacket) -> Result<(), Error> {
        self.push(Event::Setup(*setup));
        let reply = self.0 .0.lock().unwrap().reply;
        match reply {
            Reply::Accept => Ok(()),
            Reply::Stall => Err(Error::Invalid),
            Reply::In(length) | Reply::Out(length) => {
                let id = request(device, length);
                let length = length.min(usize::from(setup.length));
                device.request_mut(id).unwrap().set_length(length)?;
                device.submit(EndpointId::CONTROL, id)
            }
            Reply::Empty => {
                let id = request(device, 0);
                device.submit(EndpointId::CONTROL, id)
            }
            Reply::Long(length) => {
                let id = request(device, length);
                device.submit(EndpointId::CONTROL, id)
            }
        }
    }
    fn complete(&mut self, device: &mut Device<Sim>, completion: Completion) {
        self.push(Event::Complete(completion));
        let (resubmit, any) = {
            let shared = self.0 .0.lock().unwrap();
            (shared.resubmit, shared.resubmit_any)
        };
        if any || (resubmit && completion.status == RequestStatus::Success) {
            let result = device.submit(completion.endpoint, completion.request);
            self.0 .0.lock().unwrap().resubmits.push(result);
        }
    }
    fn disconnect(&mut self, _: &mut Device<Sim>) {
        self.push(Event::Disconnect);
    }
    fn suspend(&mut self, _: &mut Device<Sim>) {
        self.push(Event::Suspend);
    }
    fn resume(&mut self, _: &mut Device<Sim>) {
        self.push(Event::Resume);
    }
}

/// A simulated device, and the log of its class driver
pub struct Harness {
    pub device: Device<Sim>,
    pub log: Log,
}

/// Initialized, attached, with a bound class driver; no traffic yet
pub fn bound() -> Harness {
    let mut device = Device::new(Sim::new(), Config::default()).unwrap();
    device.initialize();
    let (recorder, log) = Recorder::new();
    device
        .register_class_driver(Box::leak(Box::new(recorder)))
        .unwrap();
    Harness { device, log }
}

/// Like [`bound`], after the host selected a configuration
pub fn configured() -> Harness {
    let mut harness = bound();
    harness.setup([0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
    harness.status_stage();
    harness.device.hardware_mut().ep0_acks.clear();
    harness.log.clear();
    harness
}

impl Harness {
    /// Allocate a request with a `length` byte buffer
    pub fn request(&mut self, length: usize) -> RequestId {
        request(&mut self.device, length)
    }

    /// Allocate and configure a bulk endpoint at `address`
    pub fn bulk(&mut self, direction: UsbDirection, address: u8, max_packet: u16) -> EndpointId {
        let ep = self
            .device
            .allocate_endpoint(None, direction, EndpointType::Bulk)
            .unwrap();
        self.device
            .configure_endpoint(
                ep,
                EndpointAddress::from(address),
                EndpointType::Bulk,
                max_packet,
            )
            .unwrap();
        ep
    }

    /// Raise interrupts, then run the interrupt handler
    pub fn interrupt(&mut self, interrupts: Interrupts) {
        self.device.hardware_mut().pending |= interrupts;
        self.device.on_interrupt();
    }

    /// The host received the last IN packet
    pub fn tx_complete(&mut self, index: usize) {
        self.device.hardware_mut().tx_busy[index] = false;
        self.interrupt(Interrupts::tx(index));
    }

    /// The host sent an OUT packet
    pub fn receive(&mut self, index: usize, data: &[u8]) {
        self.device.hardware_mut().rx[index].push_back(data.to_vec());
        let event = if index == 0 {
            Interrupts::EP0
        } else {
            Interrupts::rx(index)
        };
        self.interrupt(event);
    }

    /// The host sent a SETUP packet
    pub fn setup(&mut self, raw: [u8; 8]) {
        let sim = self.device.hardware_mut();
        sim.tx_busy[0] = false;
        sim.stalled[0] = false;
        sim.rx[0].push_back(raw.to_vec());
        self.interrupt(Interrupts::EP0);
    }

    /// The status stage of the control transfer finished
    pub fn status_stage(&mut self) {
        self.tx_complete(0);
    }

    /// Sizes of the packets written to an endpoint
    pub fn sent(&self, index: usize) -> Vec<usize> {
        self.device.hardware().sent[index]
            .iter()
            .map(Vec::len)
            .collect()
    }

    pub fn completions(&self) -> Vec<Completion> {
        self.log.completions()
    }
}
