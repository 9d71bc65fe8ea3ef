//! Endpoint FIFO RAM
//!
//! The controller's FIFO RAM is shared by all endpoints. Endpoint 0 always
//! owns the start of the RAM; the other endpoints take space when they're
//! configured.

/// FIFO addresses and sizes are in units of this many bytes.
pub const GRANULE: usize = 8;

/// FIFO RAM allocator
///
/// Hands out offsets into FIFO RAM, lowest address first. Space isn't
/// returned until the allocator is reset.
pub struct Allocator {
    next: usize,
    size: usize,
}

impl Allocator {
    /// An allocator for `size` bytes of FIFO RAM
    pub const fn new(size: usize) -> Self {
        Allocator { next: 0, size }
    }

    /// Allocates a FIFO of `size` bytes
    ///
    /// The offset returned from `allocate` is a multiple of [`GRANULE`].
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        let start = self.next;
        let end = start.checked_add(size)?;
        if end > self.size {
            None
        } else {
            self.next = end.checked_add(GRANULE - 1)? & !(GRANULE - 1);
            Some(start)
        }
    }

    /// Forget all allocations
    pub fn reset(&mut self) {
        self.next = 0;
    }
}

/// Hardware FIFO size for a max packet size
///
/// Returns the byte size, a power of two no less than [`GRANULE`], and the
/// size code that describes it to the controller.
pub fn fifo_size(max_packet: u16) -> (usize, u8) {
    let size = usize::from(max_packet).next_power_of_two().max(GRANULE);
    (size, (size.trailing_zeros() - GRANULE.trailing_zeros()) as u8)
}
