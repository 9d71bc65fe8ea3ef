//! Controller interrupt dispatch
//!
//! One call drains every pending condition. Conditions are serviced in a
//! fixed order: bus events first, then the control endpoint, then the data
//! endpoints.

use crate::{
    config::ENDPOINT_COUNT,
    hardware::{Hardware, Interrupts},
    request::RequestStatus,
    Device,
};

/// Upper bound on the passes over the pending conditions in one call.
const MAX_ROUNDS: usize = 8;

/// Bus and control endpoint conditions, highest priority first.
const PRIORITY: [Interrupts; 9] = [
    Interrupts::RESET,
    Interrupts::VBUS_ERROR,
    Interrupts::SESSION_REQUEST,
    Interrupts::DISCONNECT,
    Interrupts::CONNECT,
    Interrupts::SUSPEND,
    Interrupts::RESUME,
    Interrupts::SOF,
    Interrupts::EP0,
];

impl<H: Hardware> Device<H> {
    /// Service the controller interrupt
    ///
    /// Call this from the controller's interrupt handler.
    pub fn on_interrupt(&mut self) {
        for _ in 0..MAX_ROUNDS {
            let pending = self.hw.interrupts();
            if pending.is_empty() {
                return;
            }
            self.dispatch(pending);
        }
        warn!("INTERRUPTS STILL PENDING");
    }

    fn dispatch(&mut self, pending: Interrupts) {
        let mut handled = Interrupts::empty();

        for condition in PRIORITY {
            handled |= condition;
            if pending.contains(condition) {
                self.hw.acknowledge(condition);
                self.handle(condition);
            }
        }

        for index in 1..ENDPOINT_COUNT {
            let fifo = Interrupts::tx(index) | Interrupts::rx(index);
            handled |= fifo;
            if pending.intersects(fifo) {
                self.hw.acknowledge(pending & fifo);
                self.service(index);
            }
        }

        let stray = pending - handled;
        if !stray.is_empty() {
            self.hw.acknowledge(stray);
        }
    }

    fn handle(&mut self, condition: Interrupts) {
        if condition == Interrupts::RESET {
            self.bus_reset();
        } else if condition == Interrupts::VBUS_ERROR {
            warn!("VBUS ERROR");
        } else if condition == Interrupts::SESSION_REQUEST {
            debug!("SESSION REQUEST");
        } else if condition == Interrupts::DISCONNECT {
            self.detach();
        } else if condition == Interrupts::CONNECT {
            debug!("CONNECT");
            if !self.attached {
                self.attach();
            }
        } else if condition == Interrupts::SUSPEND {
            debug!("SUSPEND");
            self.suspended = true;
            self.with_driver(|driver, device| driver.suspend(device));
        } else if condition == Interrupts::RESUME {
            debug!("RESUME");
            self.end_wakeup();
            self.suspended = false;
            self.with_driver(|driver, device| driver.resume(device));
        } else if condition == Interrupts::SOF {
            trace!("SOF {}", self.hw.frame_number());
        } else if condition == Interrupts::EP0 {
            self.ep0_interrupt();
        }
    }

    /// The host reset the bus
    fn bus_reset(&mut self) {
        debug!("RESET");
        self.end_wakeup();
        self.with_driver(|driver, device| driver.disconnect(device));
        self.cancel_all(RequestStatus::Cancelled);
        for endpoint in self.endpoints.iter_mut() {
            endpoint.clear_flags();
        }
        for index in 0..ENDPOINT_COUNT {
            self.hw.reset_endpoint(index);
        }
        self.hw.set_address(0);
        self.reset_control();
    }

    /// The host went away
    fn detach(&mut self) {
        debug!("DETACHED");
        self.attached = false;
        self.end_wakeup();
        self.with_driver(|driver, device| driver.disconnect(device));
        self.cancel_all(RequestStatus::Cancelled);
        self.hw.set_connected(false);
        self.reset_control();
    }

    /// Service the attach / detach line
    ///
    /// Call this from the interrupt handler of the VBUS sense input.
    pub fn on_attach_interrupt(&mut self) {
        let attached = self.hw.is_attached();
        if attached == self.attached {
            return;
        }
        if attached {
            self.attach();
        } else {
            self.detach();
        }
    }

    /// The host came back
    ///
    /// Re-initializes the controller, and restores the endpoint
    /// configuration.
    fn attach(&mut self) {
        debug!("ATTACHED");
        self.attached = true;
        if !self.initialized {
            return;
        }
        self.hw.initialize();
        for endpoint in self.endpoints.iter().skip(1).filter(|ep| ep.enabled) {
            let index = endpoint.index();
            let max_packet = endpoint.max_packet() as u16;
            if self
                .hw
                .configure_endpoint(index, endpoint.address(), endpoint.kind(), max_packet)
                .is_err()
            {
                warn!("EP{} RECONFIGURE FAILED", index);
            }
        }
        self.hw.set_interrupts(true);
        if self.has_driver() {
            self.hw.set_connected(true);
        }
    }
}
