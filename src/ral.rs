//! MUSB register block, with a RAL-compatible interface
//!
//! Endpoint registers at `0x10..0x20` are banked behind `INDEX`. The
//! control/status register at `0x12` means `CSR0` for endpoint 0, and
//! `TXCSR` for every other endpoint. Use the [`Csr0`] and [`TxCsr`] views to
//! name the fields of each meaning.

#![allow(non_snake_case, non_upper_case_globals)]

use crate::vcell::VCell;

pub use ral_registers::{modify_reg, read_reg, write_reg};

#[repr(C)]
pub struct RegisterBlock {
    pub FADDR: VCell<u8>,
    pub POWER: VCell<u8>,
    pub INTRTX: VCell<u16>,
    pub INTRRX: VCell<u16>,
    pub INTRTXE: VCell<u16>,
    pub INTRRXE: VCell<u16>,
    pub INTRUSB: VCell<u8>,
    pub INTRUSBE: VCell<u8>,
    pub FRAME: VCell<u16>,
    pub INDEX: VCell<u8>,
    pub TESTMODE: VCell<u8>,
    pub TXMAXP: VCell<u16>,
    pub CSR: VCell<u16>,
    pub RXMAXP: VCell<u16>,
    pub RXCSR: VCell<u16>,
    pub COUNT: VCell<u16>,
    _reserved0: [u8; 6],
    pub FIFO: [VCell<u32>; 16],
    pub DEVCTL: VCell<u8>,
    _reserved1: u8,
    pub TXFIFOSZ: VCell<u8>,
    pub RXFIFOSZ: VCell<u8>,
    pub TXFIFOADD: VCell<u16>,
    pub RXFIFOADD: VCell<u16>,
}

#[cfg(test)]
impl RegisterBlock {
    /// A zeroed register block, for testing against plain memory
    pub const fn new() -> Self {
        const FIFO: VCell<u32> = VCell::new(0);
        RegisterBlock {
            FADDR: VCell::new(0),
            POWER: VCell::new(0),
            INTRTX: VCell::new(0),
            INTRRX: VCell::new(0),
            INTRTXE: VCell::new(0),
            INTRRXE: VCell::new(0),
            INTRUSB: VCell::new(0),
            INTRUSBE: VCell::new(0),
            FRAME: VCell::new(0),
            INDEX: VCell::new(0),
            TESTMODE: VCell::new(0),
            TXMAXP: VCell::new(0),
            CSR: VCell::new(0),
            RXMAXP: VCell::new(0),
            RXCSR: VCell::new(0),
            COUNT: VCell::new(0),
            _reserved0: [0; 6],
            FIFO: [FIFO; 16],
            DEVCTL: VCell::new(0),
            _reserved1: 0,
            TXFIFOSZ: VCell::new(0),
            RXFIFOSZ: VCell::new(0),
            TXFIFOADD: VCell::new(0),
            RXFIFOADD: VCell::new(0),
        }
    }
}

/// Endpoint 0 view of the banked control/status register
pub struct Csr0<'a> {
    pub CSR0: &'a VCell<u16>,
}

/// Transmit endpoint view of the banked control/status register
pub struct TxCsr<'a> {
    pub TXCSR: &'a VCell<u16>,
}

impl RegisterBlock {
    pub fn csr0(&self) -> Csr0<'_> {
        Csr0 { CSR0: &self.CSR }
    }

    pub fn txcsr(&self) -> TxCsr<'_> {
        TxCsr { TXCSR: &self.CSR }
    }
}

/// Field modules, in the shape that the `ral-registers` macros expect
macro_rules! fields {
    ($width:ty; $($field:ident: $offset:expr, $bits:expr;)+) => {
        $(
            pub mod $field {
                pub const offset: $width = $offset;
                pub const mask: $width = ((1 << $bits) - 1) << offset;
                pub mod RW {}
                pub mod R {}
                pub mod W {}
            }
        )+
    };
}

pub mod FADDR {
    fields! { u8;
        FUNCADDR: 0, 7;
    }
}

pub mod POWER {
    fields! { u8;
        ENSUSPEND: 0, 1;
        SUSPENDM: 1, 1;
        RESUME: 2, 1;
        RESET: 3, 1;
        SOFTCONN: 6, 1;
    }
}

pub mod INTRUSB {
    fields! { u8;
        SUSPEND: 0, 1;
        RESUME: 1, 1;
        RESET: 2, 1;
        SOF: 3, 1;
        CONN: 4, 1;
        DISCON: 5, 1;
        SESSREQ: 6, 1;
        VBUSERR: 7, 1;
    }
}

pub use INTRUSB as INTRUSBE;

pub mod FRAME {
    fields! { u16;
        NUMBER: 0, 11;
    }
}

pub mod CSR0 {
    fields! { u16;
        RXPKTRDY: 0, 1;
        TXPKTRDY: 1, 1;
        SENTSTALL: 2, 1;
        DATAEND: 3, 1;
        SETUPEND: 4, 1;
        SENDSTALL: 5, 1;
        SERVICED_RXPKTRDY: 6, 1;
        SERVICED_SETUPEND: 7, 1;
        FLUSHFIFO: 8, 1;
    }
}

pub mod TXCSR {
    fields! { u16;
        TXPKTRDY: 0, 1;
        FIFONOTEMPTY: 1, 1;
        UNDERRUN: 2, 1;
        FLUSHFIFO: 3, 1;
        SENDSTALL: 4, 1;
        SENTSTALL: 5, 1;
        CLRDATATOG: 6, 1;
        MODE: 13, 1;
        ISO: 14, 1;
    }
}

pub mod RXCSR {
    fields! { u16;
        RXPKTRDY: 0, 1;
        FIFOFULL: 1, 1;
        OVERRUN: 2, 1;
        FLUSHFIFO: 4, 1;
        SENDSTALL: 5, 1;
        SENTSTALL: 6, 1;
        CLRDATATOG: 7, 1;
        ISO: 14, 1;
    }
}

pub mod COUNT {
    fields! { u16;
        COUNT: 0, 13;
    }
}

pub mod DEVCTL {
    fields! { u8;
        SESSION: 0, 1;
        VBUS: 3, 2;
    }
}

pub mod TXFIFOSZ {
    fields! { u8;
        SZ: 0, 4;
    }
}

pub mod RXFIFOSZ {
    fields! { u8;
        SZ: 0, 4;
    }
}


const _: [(); 1] = [(); (core::mem::size_of::<RegisterBlock>() == 0x68) as usize];
