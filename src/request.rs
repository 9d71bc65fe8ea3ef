//! Transfer requests, the request pool, and per-endpoint request queues
//!
//! Requests live in a fixed pool owned by the device. Endpoint queues link
//! requests through their pool index, so enqueue and dequeue are O(1) and
//! never allocate. The queues perform no locking; callers hold the driver's
//! critical section.

use crate::Error;

/// Number of requests in the device's pool.
pub const MAX_REQUESTS: usize = 16;

/// Identifies a request in the device's pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(u8);

impl RequestId {
    /// Returns the pool index of this request
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Outcome of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Queued on an endpoint, or not yet submitted.
    InProgress,
    /// All data moved, or the transfer ended with a short OUT packet.
    Success,
    /// The host abandoned the control transfer, or sent more data than the
    /// request could hold.
    ProtocolError,
    /// Cancelled before it completed.
    Cancelled,
}

/// A data transfer request
///
/// The caller owns the payload. Give the request a buffer with
/// [`set_buffer`](Request::set_buffer), and take it back after completion
/// with [`take_buffer`](Request::take_buffer). A request's fields can only be
/// changed while the request isn't queued.
pub struct Request {
    buffer: Option<&'static mut [u8]>,
    length: usize,
    transferred: usize,
    status: RequestStatus,
    context: u32,
    /// Physical endpoint of the last submission.
    pub(crate) endpoint: usize,
}

impl Request {
    const fn new() -> Self {
        Request {
            buffer: None,
            length: 0,
            transferred: 0,
            status: RequestStatus::InProgress,
            context: 0,
            endpoint: 0,
        }
    }

    /// Assign the payload buffer, returning any previous buffer
    ///
    /// The transfer length becomes the size of the buffer. Use
    /// [`set_length`](Request::set_length) to move fewer bytes.
    pub fn set_buffer(&mut self, buffer: &'static mut [u8]) -> Option<&'static mut [u8]> {
        self.length = buffer.len();
        self.buffer.replace(buffer)
    }

    /// Take the payload buffer back from the request
    pub fn take_buffer(&mut self) -> Option<&'static mut [u8]> {
        self.length = 0;
        self.buffer.take()
    }

    /// Set the number of bytes to transfer
    ///
    /// Returns an error if there's no buffer, or if the buffer is too small.
    pub fn set_length(&mut self, length: usize) -> Result<(), Error> {
        match &self.buffer {
            Some(buffer) if length <= buffer.len() => {
                self.length = length;
                Ok(())
            }
            _ => Err(Error::Invalid),
        }
    }

    /// Set the opaque context that's reported on completion
    pub fn set_context(&mut self, context: u32) {
        self.context = context;
    }

    /// Returns the payload buffer
    pub fn buffer(&self) -> Option<&[u8]> {
        self.buffer.as_deref()
    }

    /// Returns the payload buffer, mutably
    pub fn buffer_mut(&mut self) -> Option<&mut [u8]> {
        self.buffer.as_deref_mut()
    }

    /// Returns the bytes moved so far
    ///
    /// For an OUT request, this is the data received from the host.
    pub fn data(&self) -> &[u8] {
        self.buffer
            .as_deref()
            .map(|buffer| &buffer[..self.transferred])
            .unwrap_or(&[])
    }

    /// Returns the number of bytes to transfer
    pub fn length(&self) -> usize {
        self.length
    }

    /// Returns the number of bytes transferred so far
    pub fn transferred(&self) -> usize {
        self.transferred
    }

    /// Returns the request status
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Returns the opaque context
    pub fn context(&self) -> u32 {
        self.context
    }

    /// Bytes that still need to move
    pub(crate) fn remaining(&self) -> usize {
        self.length - self.transferred
    }

    /// Bytes that are still waiting to be sent
    pub(crate) fn pending_in(&self) -> &[u8] {
        self.buffer
            .as_deref()
            .map(|buffer| &buffer[self.transferred..self.length])
            .unwrap_or(&[])
    }

    /// Space that can still receive data
    pub(crate) fn pending_out(&mut self) -> &mut [u8] {
        let (transferred, length) = (self.transferred, self.length);
        self.buffer
            .as_deref_mut()
            .map(|buffer| &mut buffer[transferred..length])
            .unwrap_or(&mut [])
    }

    /// Record `count` more bytes moved
    pub(crate) fn advance(&mut self, count: usize) {
        self.transferred = (self.transferred + count).min(self.length);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Free,
    Idle,
    Queued,
}

struct Slot {
    request: Request,
    state: State,
    next: Option<RequestId>,
}

impl Slot {
    const fn new() -> Self {
        Slot {
            request: Request::new(),
            state: State::Free,
            next: None,
        }
    }
}

/// The fixed collection of requests owned by a device
pub(crate) struct RequestPool {
    slots: [Slot; MAX_REQUESTS],
    allocation_failures: u32,
}

impl RequestPool {
    pub const fn new() -> Self {
        const SLOT: Slot = Slot::new();
        RequestPool {
            slots: [SLOT; MAX_REQUESTS],
            allocation_failures: 0,
        }
    }

    /// Allocate an idle request
    ///
    /// Counts a failure when the pool is exhausted.
    pub fn allocate(&mut self) -> Option<RequestId> {
        let found = self
            .slots
            .iter()
            .position(|slot| slot.state == State::Free);
        match found {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.state = State::Idle;
                slot.next = None;
                slot.request = Request::new();
                Some(RequestId(index as u8))
            }
            None => {
                self.allocation_failures = self.allocation_failures.saturating_add(1);
                warn!("REQUEST ALLOC FAILED {}", self.allocation_failures);
                None
            }
        }
    }

    /// Return a request to the pool, yielding its buffer
    pub fn free(&mut self, id: RequestId) -> Result<Option<&'static mut [u8]>, Error> {
        let slot = self.slots.get_mut(id.index()).ok_or(Error::Invalid)?;
        match slot.state {
            State::Free => Err(Error::Invalid),
            State::Queued => Err(Error::Busy),
            State::Idle => {
                slot.state = State::Free;
                Ok(slot.request.buffer.take())
            }
        }
    }

    /// Number of times that `allocate` found the pool empty
    pub fn allocation_failures(&self) -> u32 {
        self.allocation_failures
    }

    /// Indicates if `id` names an allocated request that isn't queued
    pub fn is_idle(&self, id: RequestId) -> bool {
        self.slots
            .get(id.index())
            .map_or(false, |slot| slot.state == State::Idle)
    }

    /// Access an allocated request, queued or not
    pub fn get(&self, id: RequestId) -> Option<&Request> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.state != State::Free)
            .map(|slot| &slot.request)
    }

    /// Mutable access to an allocated request that isn't queued
    pub fn get_idle_mut(&mut self, id: RequestId) -> Option<&mut Request> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.state == State::Idle)
            .map(|slot| &mut slot.request)
    }

    /// Driver access to a request, in any state
    ///
    /// # Panics
    ///
    /// Panics if `id` wasn't produced by this pool.
    pub(crate) fn request_mut(&mut self, id: RequestId) -> &mut Request {
        &mut self.slots[id.index()].request
    }

    /// Prepare an idle request for submission on `endpoint`
    pub(crate) fn start(&mut self, id: RequestId, endpoint: usize) {
        let request = self.request_mut(id);
        request.transferred = 0;
        request.status = RequestStatus::InProgress;
        request.endpoint = endpoint;
    }

    /// Record the outcome of a dequeued request
    ///
    /// The request stays owned by the driver until it's finished.
    pub(crate) fn retire(&mut self, id: RequestId, status: RequestStatus) {
        self.request_mut(id).status = status;
    }

    /// Hand a retired request back to its owner
    pub(crate) fn finish(&mut self, id: RequestId) -> &Request {
        let slot = &mut self.slots[id.index()];
        slot.state = State::Idle;
        slot.next = None;
        &slot.request
    }
}

/// A FIFO of requests pending on one endpoint
///
/// All operations are O(1). Requests leave the queue in the order they
/// entered it.
#[derive(Default)]
pub(crate) struct RequestQueue {
    head: Option<RequestId>,
    tail: Option<RequestId>,
}

impl RequestQueue {
    pub const fn new() -> Self {
        RequestQueue {
            head: None,
            tail: None,
        }
    }

    /// Append a request to the tail of the queue
    pub fn enqueue(&mut self, pool: &mut RequestPool, id: RequestId) {
        let slot = &mut pool.slots[id.index()];
        slot.state = State::Queued;
        slot.next = None;
        match self.tail {
            Some(tail) => pool.slots[tail.index()].next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
    }

    /// Remove and return the request at the head of the queue
    ///
    /// The request remains marked as queued until the caller finishes it.
    pub fn dequeue(&mut self, pool: &mut RequestPool) -> Option<RequestId> {
        let head = self.head?;
        self.head = pool.slots[head.index()].next.take();
        if self.head.is_none() {
            self.tail = None;
        }
        Some(head)
    }

    /// Returns the request at the head of the queue
    pub fn peek(&self) -> Option<RequestId> {
        self.head
    }

    /// Indicates if there are no queued requests
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Move every queued request into a new queue, leaving this one empty
    pub fn take(&mut self) -> RequestQueue {
        core::mem::take(self)
    }
}
