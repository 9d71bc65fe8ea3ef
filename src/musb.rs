//! Mentor-style (MUSB) full-speed device controller
//!
//! `Musb` implements [`Hardware`] over the controller's register block. It
//! uses programmed I/O for all FIFO traffic.

use crate::{
    config::{ENDPOINT_COUNT, EP0_MAX_PACKET},
    fifo::{self, GRANULE},
    hardware::{Ep0Status, Hardware, Interrupts},
    ral::{self, RegisterBlock},
    Error, Peripherals,
};
use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

/// Endpoint interrupt enables for the endpoints that the driver uses.
const ENDPOINT_MASK: u16 = (1 << ENDPOINT_COUNT) - 1;

/// A MUSB controller
pub struct Musb {
    regs: &'static RegisterBlock,
    /// Conditions read from the read-to-clear registers, but not yet
    /// acknowledged.
    pending: Interrupts,
    fifo: fifo::Allocator,
    /// FIFO RAM offset and size for each endpoint index.
    slots: [Option<(usize, usize)>; ENDPOINT_COUNT],
}

// Safety: the register block is only reached through `Musb`, which is
// owned by one `Device`.
unsafe impl Send for Musb {}

impl Musb {
    /// Create a controller that manages `fifo_size` bytes of FIFO RAM
    ///
    /// Creation doesn't touch the registers. The device core initializes the
    /// controller when you initialize the device.
    pub fn new<P: Peripherals>(peripherals: P, fifo_size: usize) -> Self {
        // Safety: the Peripherals contract guarantees that the pointer is
        // a valid, owned register block.
        let regs = unsafe { &*peripherals.usb().cast::<RegisterBlock>() };
        Musb {
            regs,
            pending: Interrupts::empty(),
            fifo: fifo::Allocator::new(fifo_size),
            slots: [None; ENDPOINT_COUNT],
        }
    }

    fn select(&self, index: usize) {
        ral::write_reg!(ral, self.regs, INDEX, index as u8);
    }

    /// Find FIFO RAM for an endpoint; reuse the last allocation if it fits
    fn fifo_slot(&mut self, index: usize, size: usize) -> Result<usize, Error> {
        match self.slots[index] {
            Some((offset, capacity)) if capacity >= size => Ok(offset),
            _ => {
                let offset = self.fifo.allocate(size).ok_or(Error::NoMemory)?;
                self.slots[index] = Some((offset, size));
                Ok(offset)
            }
        }
    }
}

impl Hardware for Musb {
    fn initialize(&mut self) {
        ral::write_reg!(ral, self.regs, POWER, 0);
        ral::write_reg!(ral, self.regs, INTRUSBE, 0);
        ral::write_reg!(ral, self.regs, INTRTXE, 0);
        ral::write_reg!(ral, self.regs, INTRRXE, 0);

        // Read-to-clear
        ral::read_reg!(ral, self.regs, INTRUSB);
        ral::read_reg!(ral, self.regs, INTRTX);
        ral::read_reg!(ral, self.regs, INTRRX);
        self.pending = Interrupts::empty();

        ral::write_reg!(ral, self.regs, FADDR, 0);

        self.fifo.reset();
        self.slots = [None; ENDPOINT_COUNT];
        // Endpoint 0 has a fixed, 64 byte FIFO at the start of FIFO RAM.
        let ep0 = usize::from(EP0_MAX_PACKET);
        self.slots[0] = self.fifo.allocate(ep0).map(|offset| (offset, ep0));

        for index in 0..ENDPOINT_COUNT {
            self.reset_endpoint(index);
        }

        ral::write_reg!(ral, self.regs, POWER, ENSUSPEND: 1);
        debug!("INITIALIZED");
    }

    fn set_interrupts(&mut self, enable: bool) {
        if enable {
            ral::write_reg!(ral, self.regs, INTRUSBE,
                SUSPEND: 1, RESUME: 1, RESET: 1, CONN: 1, DISCON: 1, SESSREQ: 1, VBUSERR: 1);
            ral::write_reg!(ral, self.regs, INTRTXE, ENDPOINT_MASK);
            ral::write_reg!(ral, self.regs, INTRRXE, ENDPOINT_MASK & !1);
        } else {
            ral::write_reg!(ral, self.regs, INTRUSBE, 0);
            ral::write_reg!(ral, self.regs, INTRTXE, 0);
            ral::write_reg!(ral, self.regs, INTRRXE, 0);
        }
    }

    fn set_connected(&mut self, connected: bool) {
        ral::modify_reg!(ral, self.regs, POWER, SOFTCONN: u8::from(connected));
    }

    fn is_attached(&self) -> bool {
        ral::read_reg!(ral, self.regs, DEVCTL, VBUS == 0b11)
    }

    fn interrupts(&mut self) -> Interrupts {
        use ral::INTRUSB;

        let usb = ral::read_reg!(ral, self.regs, INTRUSB);
        let tx = ral::read_reg!(ral, self.regs, INTRTX);
        let rx = ral::read_reg!(ral, self.regs, INTRRX);

        const BUS: [(u8, Interrupts); 8] = [
            (INTRUSB::SUSPEND::mask, Interrupts::SUSPEND),
            (INTRUSB::RESUME::mask, Interrupts::RESUME),
            (INTRUSB::RESET::mask, Interrupts::RESET),
            (INTRUSB::SOF::mask, Interrupts::SOF),
            (INTRUSB::CONN::mask, Interrupts::CONNECT),
            (INTRUSB::DISCON::mask, Interrupts::DISCONNECT),
            (INTRUSB::SESSREQ::mask, Interrupts::SESSION_REQUEST),
            (INTRUSB::VBUSERR::mask, Interrupts::VBUS_ERROR),
        ];
        for (mask, condition) in BUS {
            if usb & mask != 0 {
                self.pending |= condition;
            }
        }
        self.pending |= Interrupts::from_bits_retain(u32::from(tx) << 8);
        self.pending |= Interrupts::from_bits_retain(u32::from(rx & !1) << 16);
        self.pending
    }

    fn acknowledge(&mut self, interrupts: Interrupts) {
        self.pending.remove(interrupts);
    }

    fn set_address(&mut self, address: u8) {
        ral::write_reg!(ral, self.regs, FADDR, FUNCADDR: address);
    }

    fn frame_number(&self) -> u16 {
        ral::read_reg!(ral, self.regs, FRAME, NUMBER)
    }

    fn set_remote_wakeup(&mut self, signaling: bool) {
        ral::modify_reg!(ral, self.regs, POWER, RESUME: u8::from(signaling));
    }

    fn configure_endpoint(
        &mut self,
        index: usize,
        address: EndpointAddress,
        kind: EndpointType,
        max_packet: u16,
    ) -> Result<(), Error> {
        if index == 0 || index >= ENDPOINT_COUNT || address.index() != index || max_packet == 0 {
            return Err(Error::Invalid);
        }

        let (size, code) = fifo::fifo_size(max_packet);
        let offset = self.fifo_slot(index, size)?;
        let fifoadd = (offset / GRANULE) as u16;
        let iso = u16::from(matches!(kind, EndpointType::Isochronous { .. }));

        self.select(index);
        match address.direction() {
            UsbDirection::In => {
                ral::write_reg!(ral, self.regs, TXMAXP, max_packet);
                ral::write_reg!(ral, self.regs, TXFIFOSZ, SZ: code);
                ral::write_reg!(ral, self.regs, TXFIFOADD, fifoadd);
                ral::write_reg!(ral, &self.regs.txcsr(), TXCSR, MODE: 1, ISO: iso, CLRDATATOG: 1);
            }
            UsbDirection::Out => {
                ral::write_reg!(ral, self.regs, RXMAXP, max_packet);
                ral::write_reg!(ral, self.regs, RXFIFOSZ, SZ: code);
                ral::write_reg!(ral, self.regs, RXFIFOADD, fifoadd);
                ral::write_reg!(ral, &self.regs.txcsr(), TXCSR, MODE: 0);
                ral::write_reg!(ral, self.regs, RXCSR, ISO: iso, CLRDATATOG: 1);
            }
        }
        debug!("EP{} CONFIGURED MAX_PACKET={} FIFO={}", index, max_packet, offset);
        Ok(())
    }

    fn reset_endpoint(&mut self, index: usize) {
        self.select(index);
        if index == 0 {
            let csr0 = self.regs.csr0();
            if ral::read_reg!(ral, &csr0, CSR0, RXPKTRDY == 1)
                || ral::read_reg!(ral, &csr0, CSR0, TXPKTRDY == 1)
            {
                ral::write_reg!(ral, &csr0, CSR0, FLUSHFIFO: 1);
            }
            ral::write_reg!(ral, &csr0, CSR0, SERVICED_SETUPEND: 1);
            return;
        }

        let txcsr = self.regs.txcsr();
        if ral::read_reg!(ral, &txcsr, TXCSR, FIFONOTEMPTY == 1) {
            ral::modify_reg!(ral, &txcsr, TXCSR, FLUSHFIFO: 1);
        }
        ral::modify_reg!(ral, &txcsr, TXCSR,
            TXPKTRDY: 0, UNDERRUN: 0, FLUSHFIFO: 0, SENDSTALL: 0, SENTSTALL: 0, CLRDATATOG: 1);

        if ral::read_reg!(ral, self.regs, RXCSR, RXPKTRDY == 1) {
            ral::modify_reg!(ral, self.regs, RXCSR, FLUSHFIFO: 1);
        }
        ral::modify_reg!(ral, self.regs, RXCSR,
            RXPKTRDY: 0, OVERRUN: 0, FLUSHFIFO: 0, SENDSTALL: 0, SENTSTALL: 0, CLRDATATOG: 1);
    }

    fn set_stalled(&mut self, index: usize, direction: UsbDirection, stalled: bool) {
        if index == 0 {
            // The next SETUP clears an endpoint 0 stall.
            if stalled {
                self.ep0_stall();
            }
            return;
        }

        self.select(index);
        let stall = u16::from(stalled);
        let toggle = u16::from(!stalled);
        match direction {
            UsbDirection::In => {
                ral::modify_reg!(ral, &self.regs.txcsr(), TXCSR,
                    SENDSTALL: stall, SENTSTALL: 0, CLRDATATOG: toggle);
            }
            UsbDirection::Out => {
                ral::modify_reg!(ral, self.regs, RXCSR,
                    SENDSTALL: stall, SENTSTALL: 0, CLRDATATOG: toggle);
            }
        }
        debug!("EP{} STALLED={}", index, stalled);
    }

    fn tx_ready(&self, index: usize) -> bool {
        self.select(index);
        if index == 0 {
            ral::read_reg!(ral, &self.regs.csr0(), CSR0, TXPKTRDY == 0)
        } else {
            ral::read_reg!(ral, &self.regs.txcsr(), TXCSR, TXPKTRDY == 0)
        }
    }

    fn write_packet(&mut self, index: usize, data: &[u8], last: bool) {
        self.select(index);
        let fifo = self.regs.FIFO[index].byte();
        for byte in data {
            fifo.write(*byte);
        }
        if index == 0 {
            ral::write_reg!(ral, &self.regs.csr0(), CSR0, TXPKTRDY: 1, DATAEND: u16::from(last));
        } else {
            ral::modify_reg!(ral, &self.regs.txcsr(), TXCSR, TXPKTRDY: 1);
        }
        trace!("EP{} WROTE {} BYTES", index, data.len());
    }

    fn rx_count(&self, index: usize) -> Option<usize> {
        self.select(index);
        let ready = if index == 0 {
            ral::read_reg!(ral, &self.regs.csr0(), CSR0, RXPKTRDY == 1)
        } else {
            ral::read_reg!(ral, self.regs, RXCSR, RXPKTRDY == 1)
        };
        ready.then(|| usize::from(ral::read_reg!(ral, self.regs, COUNT, COUNT)))
    }

    fn read_packet(&mut self, index: usize, buffer: &mut [u8]) -> usize {
        self.select(index);
        let count = usize::from(ral::read_reg!(ral, self.regs, COUNT, COUNT));
        let fifo = self.regs.FIFO[index].byte();
        for position in 0..count {
            let byte = fifo.read();
            if let Some(slot) = buffer.get_mut(position) {
                *slot = byte;
            }
        }
        if index != 0 {
            ral::modify_reg!(ral, self.regs, RXCSR, RXPKTRDY: 0);
        }
        trace!("EP{} READ {} BYTES", index, count);
        count.min(buffer.len())
    }

    fn ep0_status(&self) -> Ep0Status {
        self.select(0);
        let csr0 = self.regs.csr0();
        let mut status = Ep0Status::empty();
        if ral::read_reg!(ral, &csr0, CSR0, SENTSTALL == 1) {
            status |= Ep0Status::SENT_STALL;
        }
        if ral::read_reg!(ral, &csr0, CSR0, SETUPEND == 1) {
            status |= Ep0Status::SETUP_END;
        }
        status
    }

    fn ep0_clear(&mut self, status: Ep0Status) {
        self.select(0);
        if status.contains(Ep0Status::SENT_STALL) {
            ral::write_reg!(ral, &self.regs.csr0(), CSR0, SENTSTALL: 0);
        }
        if status.contains(Ep0Status::SETUP_END) {
            ral::write_reg!(ral, &self.regs.csr0(), CSR0, SERVICED_SETUPEND: 1);
        }
    }

    fn ep0_ack(&mut self, data_end: bool) {
        self.select(0);
        ral::write_reg!(ral, &self.regs.csr0(), CSR0,
            SERVICED_RXPKTRDY: 1, DATAEND: u16::from(data_end));
    }

    fn ep0_stall(&mut self) {
        self.select(0);
        ral::write_reg!(ral, &self.regs.csr0(), CSR0, SERVICED_RXPKTRDY: 1, SENDSTALL: 1);
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::Musb;
    use crate::{
        hardware::{Ep0Status, Hardware, Interrupts},
        ral::RegisterBlock,
        Error, Peripherals,
    };
    use std::boxed::Box;
    use usb_device::{
        endpoint::{EndpointAddress, EndpointType},
        UsbDirection,
    };

    struct Block(&'static RegisterBlock);

    unsafe impl Peripherals for Block {
        fn usb(&self) -> *const () {
            (self.0 as *const RegisterBlock).cast()
        }
    }

    fn musb(fifo_size: usize) -> (Musb, &'static RegisterBlock) {
        let regs: &'static RegisterBlock = Box::leak(Box::new(RegisterBlock::new()));
        let mut musb = Musb::new(Block(regs), fifo_size);
        musb.initialize();
        (musb, regs)
    }

    fn bulk(address: u8) -> (usize, EndpointAddress) {
        let address = EndpointAddress::from(address);
        (address.index(), address)
    }

    #[test]
    fn initialize_disconnects_and_masks() {
        let regs: &'static RegisterBlock = Box::leak(Box::new(RegisterBlock::new()));
        regs.POWER.write(0x40);
        regs.INTRTXE.write(0xFFFF);
        let mut musb = Musb::new(Block(regs), 512);
        musb.initialize();
        assert_eq!(regs.POWER.read(), 0x01);
        assert_eq!(regs.INTRTXE.read(), 0);

        musb.set_interrupts(true);
        assert_eq!(regs.INTRUSBE.read(), 0xF7);
        assert_eq!(regs.INTRTXE.read(), 0x000F);
        assert_eq!(regs.INTRRXE.read(), 0x000E);

        musb.set_connected(true);
        assert_eq!(regs.POWER.read(), 0x41);
    }

    #[test]
    fn interrupts_latch_until_acknowledged() {
        let (mut musb, regs) = musb(512);
        regs.INTRUSB.write(0x04 | 0x08);
        regs.INTRTX.write(0b11);
        regs.INTRRX.write(0b101);

        let pending = musb.interrupts();
        assert!(pending.contains(Interrupts::RESET | Interrupts::SOF));
        assert!(pending.contains(Interrupts::EP0 | Interrupts::tx(1)));
        assert!(pending.contains(Interrupts::rx(2)));
        assert!(!pending.contains(Interrupts::rx(0)));

        // Hardware cleared the registers on read
        regs.INTRUSB.write(0);
        regs.INTRTX.write(0);
        regs.INTRRX.write(0);
        musb.acknowledge(Interrupts::RESET | Interrupts::EP0);
        assert_eq!(
            musb.interrupts(),
            Interrupts::SOF | Interrupts::tx(1) | Interrupts::rx(2)
        );
    }

    #[test]
    fn endpoint_fifos_follow_ep0() {
        let (mut musb, regs) = musb(512);
        let (index, address) = bulk(0x81);
        musb.configure_endpoint(index, address, EndpointType::Bulk, 64).unwrap();
        assert_eq!(regs.INDEX.read(), 1);
        assert_eq!(regs.TXMAXP.read(), 64);
        assert_eq!(regs.TXFIFOSZ.read(), 3);
        assert_eq!(regs.TXFIFOADD.read(), 8);
        assert_eq!(regs.CSR.read() & (1 << 13), 1 << 13);

        let (index, address) = bulk(0x02);
        musb.configure_endpoint(index, address, EndpointType::Bulk, 20).unwrap();
        assert_eq!(regs.RXMAXP.read(), 20);
        assert_eq!(regs.RXFIFOSZ.read(), 2);
        assert_eq!(regs.RXFIFOADD.read(), 16);
    }

    #[test]
    fn reconfigure_reuses_fifo() {
        let (mut musb, regs) = musb(192);
        let (index, address) = bulk(0x81);
        musb.configure_endpoint(index, address, EndpointType::Bulk, 64).unwrap();
        musb.configure_endpoint(index, address, EndpointType::Bulk, 32).unwrap();
        assert_eq!(regs.TXFIFOADD.read(), 8);

        let (index, address) = bulk(0x02);
        musb.configure_endpoint(index, address, EndpointType::Bulk, 64).unwrap();
        assert_eq!(regs.RXFIFOADD.read(), 16);
    }

    #[test]
    fn configure_errors() {
        let (mut musb, _) = musb(128);
        let (_, address) = bulk(0x81);
        assert_eq!(
            musb.configure_endpoint(0, address, EndpointType::Bulk, 64),
            Err(Error::Invalid)
        );
        assert_eq!(
            musb.configure_endpoint(2, address, EndpointType::Bulk, 64),
            Err(Error::Invalid)
        );
        assert_eq!(
            musb.configure_endpoint(1, address, EndpointType::Bulk, 0),
            Err(Error::Invalid)
        );
        musb.configure_endpoint(1, address, EndpointType::Bulk, 64).unwrap();
        let (index, address) = bulk(0x02);
        assert_eq!(
            musb.configure_endpoint(index, address, EndpointType::Bulk, 8),
            Err(Error::NoMemory)
        );
    }

    #[test]
    fn ep0_packets() {
        let (mut musb, regs) = musb(512);
        assert!(musb.tx_ready(0));
        musb.write_packet(0, &[1, 2, 3], true);
        assert_eq!(regs.CSR.read(), 0x0A);
        assert_eq!(regs.FIFO[0].byte().read(), 3);
        assert!(!musb.tx_ready(0));

        regs.CSR.write(0x01);
        regs.COUNT.write(8);
        assert_eq!(musb.rx_count(0), Some(8));
        let mut buffer = [0; 4];
        assert_eq!(musb.read_packet(0, &mut buffer), 4);

        musb.ep0_ack(true);
        assert_eq!(regs.CSR.read(), 0x48);
        musb.ep0_stall();
        assert_eq!(regs.CSR.read(), 0x60);
    }

    #[test]
    fn ep0_conditions() {
        let (mut musb, regs) = musb(512);
        regs.CSR.write(0x14);
        assert_eq!(
            musb.ep0_status(),
            Ep0Status::SENT_STALL | Ep0Status::SETUP_END
        );
        musb.ep0_clear(Ep0Status::SETUP_END);
        assert_eq!(regs.CSR.read(), 0x80);
    }

    #[test]
    fn data_endpoint_packets() {
        let (mut musb, regs) = musb(512);
        let (index, address) = bulk(0x02);
        musb.configure_endpoint(index, address, EndpointType::Bulk, 64).unwrap();
        assert_eq!(musb.rx_count(2), None);
        regs.RXCSR.write(0x01);
        regs.COUNT.write(2);
        assert_eq!(musb.rx_count(2), Some(2));
        let mut buffer = [0; 64];
        assert_eq!(musb.read_packet(2, &mut buffer), 2);
        assert_eq!(regs.RXCSR.read() & 1, 0);

        musb.set_stalled(2, UsbDirection::Out, true);
        assert_eq!(regs.RXCSR.read() & (1 << 5), 1 << 5);
        musb.set_stalled(2, UsbDirection::Out, false);
        assert_eq!(regs.RXCSR.read() & (1 << 5), 0);
    }

    #[test]
    fn bus_state() {
        let (mut musb, regs) = musb(512);
        assert!(!musb.is_attached());
        regs.DEVCTL.write(0b11 << 3);
        assert!(musb.is_attached());

        musb.set_address(0x85);
        assert_eq!(regs.FADDR.read(), 0x05);

        regs.FRAME.write(0xFFFF);
        assert_eq!(musb.frame_number(), 0x7FF);
    }
}
