//! Monotonic port allocation for dashboard processes.

use log::{debug, warn};

/// Hands out strictly increasing ports starting at a configured base.
///
/// Freed ports are never handed out again for the lifetime of the allocator,
/// so a port cannot be double-assigned while an earlier holder is still
/// shutting down. The allocator itself is not synchronised: it lives inside
/// the session registry state and is only touched under the registry lock.
#[derive(Debug)]
pub struct PortAllocator {
    next: Option<u16>,
}

impl PortAllocator {
    pub fn new(base_port: u16) -> Self {
        debug!("Port allocator starting at {}", base_port);
        Self {
            next: Some(base_port),
        }
    }

    /// Returns the next port, or `None` once the top of the port range has
    /// been handed out.
    pub fn allocate(&mut self) -> Option<u16> {
        let port = match self.next {
            Some(port) => port,
            None => {
                warn!("Port range exhausted, no further dashboard ports available");
                return None;
            }
        };
        self.next = port.checked_add(1);
        debug!("Allocated port {}", port);
        Some(port)
    }
}
