//! Volatile cell that conforms to the RAL's register API
//!
//! The controller register block is built from these cells, so that the same
//! layout overlays MMIO in the driver, and plain memory in tests.

use core::cell::UnsafeCell;

#[repr(transparent)]
pub struct VCell<T>(UnsafeCell<T>);

impl<T> VCell<T> {
    pub const fn new(val: T) -> Self {
        VCell(UnsafeCell::new(val))
    }
}

impl<T: Copy> VCell<T> {
    pub fn read(&self) -> T {
        unsafe { self.0.get().read_volatile() }
    }
    pub fn write(&self, val: T) {
        unsafe { self.0.get().write_volatile(val) }
    }
}

impl VCell<u32> {
    /// Byte-wide view of the lowest-addressed byte of this cell
    ///
    /// FIFO registers are 32 bits wide, but a byte access moves a single
    /// byte into, or out of, the FIFO.
    pub fn byte(&self) -> &VCell<u8> {
        // Safety: VCell is transparent over UnsafeCell, which is transparent
        // over T. The first byte of a u32 is a valid, aligned u8 location
        // for as long as the u32 cell lives.
        unsafe { &*(self as *const VCell<u32>).cast::<VCell<u8>>() }
    }
}
