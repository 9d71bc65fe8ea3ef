//! Data transfer engine
//!
//! Moves bytes between the request at the head of an endpoint's queue and
//! the endpoint FIFO, one packet per call. The controller's FIFO events
//! drive the engine; nothing here waits on the hardware.

use crate::{control::Ep0State, hardware::Hardware, request::RequestStatus, Device};
use usb_device::UsbDirection;

impl<H: Hardware> Device<H> {
    /// Indicates if the endpoint refuses the host's traffic
    pub(crate) fn is_refused(&self, index: usize) -> bool {
        let endpoint = &self.endpoints[index];
        if index == 0 {
            self.stalled || endpoint.stalled
        } else {
            endpoint.is_blocked()
        }
    }

    /// Move the next packet for the endpoint, if the FIFO allows it
    pub(crate) fn service(&mut self, index: usize) {
        if index == 0 {
            match self.ep0 {
                Ep0State::DataIn => self.write_request(0),
                Ep0State::DataOut => self.read_request(0),
                _ => {}
            }
            return;
        }
        let endpoint = &self.endpoints[index];
        if !endpoint.enabled {
            return;
        }
        match endpoint.direction() {
            UsbDirection::In => self.write_request(index),
            UsbDirection::Out => self.read_request(index),
        }
    }

    /// Send the next IN packet, or complete the head request once all of its
    /// packets left the FIFO
    ///
    /// A transfer that ends with a full packet is followed by a zero-length
    /// packet. On the control endpoint, the data stage stops at the length
    /// that the host asked for, and then skips the zero-length packet.
    pub(crate) fn write_request(&mut self, index: usize) {
        loop {
            if self.is_refused(index) || !self.hw.tx_ready(index) {
                return;
            }
            let Some(id) = self.endpoints[index].queue.peek() else {
                return;
            };

            let endpoint = &mut self.endpoints[index];
            let request = self.pool.request_mut(id);
            let mut remaining = request.remaining();
            if index == 0 {
                // Never more than the host asked for
                let asked = usize::from(self.ep0_length).saturating_sub(request.transferred());
                remaining = remaining.min(asked);
            }

            if remaining == 0 && !endpoint.null_pending {
                endpoint.queue.dequeue(&mut self.pool);
                if index == 0 && endpoint.queue.is_empty() {
                    self.ep0 = Ep0State::Idle;
                }
                self.retire(id, RequestStatus::Success);
                self.report_completions();
                continue;
            }

            let max_packet = endpoint.max_packet();
            let size = remaining.min(max_packet);
            let mut null_pending = size > 0 && size == max_packet && size == remaining;
            if index == 0 && request.transferred() + size >= usize::from(self.ep0_length) {
                null_pending = false;
            }
            endpoint.null_pending = null_pending;
            let last = size == remaining && !null_pending;

            self.hw
                .write_packet(index, &request.pending_in()[..size], last);
            request.advance(size);
            trace!("EP{} WRITE {} LAST {}", index, size, last);
            return;
        }
    }

    /// Receive the next OUT packet into the head request
    ///
    /// The request completes when it's full, or when the host sends a short
    /// packet. A packet that doesn't fit completes the request with
    /// [`RequestStatus::ProtocolError`]; the excess is dropped.
    pub(crate) fn read_request(&mut self, index: usize) {
        loop {
            if self.is_refused(index) {
                return;
            }
            let Some(id) = self.endpoints[index].queue.peek() else {
                return;
            };

            let endpoint = &mut self.endpoints[index];
            let request = self.pool.request_mut(id);
            let remaining = request.remaining();

            let status = if remaining == 0 {
                RequestStatus::Success
            } else {
                let Some(count) = self.hw.rx_count(index) else {
                    return;
                };
                let read = self.hw.read_packet(index, request.pending_out());
                request.advance(read);
                trace!("EP{} READ {}", index, count);

                let overrun = count > remaining;
                let done = overrun || count < endpoint.max_packet() || request.remaining() == 0;
                if index == 0 {
                    self.hw.ep0_ack(done);
                }
                if !done {
                    continue;
                }
                if overrun {
                    warn!("EP{} OVERRUN {} > {}", index, count, remaining);
                    RequestStatus::ProtocolError
                } else {
                    RequestStatus::Success
                }
            };

            endpoint.queue.dequeue(&mut self.pool);
            if index == 0 {
                self.ep0 = Ep0State::Status;
            }
            self.retire(id, status);
            self.report_completions();
        }
    }

    /// Complete every queued request with `status`
    ///
    /// The queue is empty when this returns. Completion callbacks can't
    /// submit to the endpoint while it drains.
    pub(crate) fn drain(&mut self, index: usize, status: RequestStatus) {
        self.endpoints[index].draining = true;
        self.retire_queue(index, status);
        self.report_completions();
        self.endpoints[index].draining = false;
    }

    /// Drain every endpoint
    ///
    /// No endpoint accepts requests until all completions are reported.
    pub(crate) fn cancel_all(&mut self, status: RequestStatus) {
        for endpoint in self.endpoints.iter_mut() {
            endpoint.draining = true;
        }
        for index in 0..self.endpoints.len() {
            self.retire_queue(index, status);
        }
        self.report_completions();
        for endpoint in self.endpoints.iter_mut() {
            endpoint.draining = false;
        }
    }

    fn retire_queue(&mut self, index: usize, status: RequestStatus) {
        let endpoint = &mut self.endpoints[index];
        let mut queue = endpoint.queue.take();
        endpoint.null_pending = false;
        while let Some(id) = queue.dequeue(&mut self.pool) {
            debug!("EP{} DRAINED", index);
            self.retire(id, status);
        }
    }
}
