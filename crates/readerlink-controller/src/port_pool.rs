//! Ephemeral local network ports for connectors.
//!
//! Some drivers open a listening socket per session and ask the controller
//! for a port. Ports come from a fixed range and a released port is blocked
//! for [`PORT_BLOCKED_DELAY_MS`] so the OS has finished tearing down the
//! previous socket before the port is handed out again.
//!
//! ```text
//! slot   0      1      2          99
//!      | Free | Used | Released(t) | ... |
//! port  11000  11001  11002        11099
//! ```

use crate::error::{ControllerError, Result};
use readerlink_core::constants::{MIN_NETWORK_PORT, NETWORK_PORT_COUNT, PORT_BLOCKED_DELAY_MS};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    InUse,
    Released(Instant),
}

/// Fixed pool of network ports starting at [`MIN_NETWORK_PORT`].
///
/// # Examples
///
/// ```
/// use readerlink_controller::PortPool;
///
/// let mut pool = PortPool::new();
/// let port = pool.acquire().unwrap();
/// assert_eq!(port, 11000);
///
/// pool.release(port);
/// // Blocked for a while after release
/// assert_eq!(pool.acquire().unwrap(), 11001);
/// ```
#[derive(Debug, Clone)]
pub struct PortPool {
    slots: Vec<Slot>,
    blocked_delay: Duration,
}

impl Default for PortPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PortPool {
    /// Create a pool where every port is free.
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::Free; NETWORK_PORT_COUNT],
            blocked_delay: Duration::from_millis(PORT_BLOCKED_DELAY_MS),
        }
    }

    /// Reserve the lowest available port.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::PortPoolExhausted`] if every port is in use
    /// or was released less than the blocking delay ago.
    pub fn acquire(&mut self) -> Result<u16> {
        self.acquire_at(Instant::now())
    }

    /// Reserve the lowest port available at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::PortPoolExhausted`] if no port is available.
    pub fn acquire_at(&mut self, now: Instant) -> Result<u16> {
        let blocked_delay = self.blocked_delay;
        let index = self
            .slots
            .iter()
            .position(|slot| match slot {
                Slot::Free => true,
                Slot::InUse => false,
                Slot::Released(at) => now.saturating_duration_since(*at) >= blocked_delay,
            })
            .ok_or(ControllerError::PortPoolExhausted)?;

        self.slots[index] = Slot::InUse;
        Ok(MIN_NETWORK_PORT + index as u16)
    }

    /// Give a port back.
    ///
    /// Returns `false` if `port` is outside the pool.
    pub fn release(&mut self, port: u16) -> bool {
        self.release_at(port, Instant::now())
    }

    /// Give a port back, blocking it until `now` plus the blocking delay.
    pub fn release_at(&mut self, port: u16, now: Instant) -> bool {
        match self.slot_mut(port) {
            Some(slot) => {
                *slot = Slot::Released(now);
                true
            }
            None => false,
        }
    }

    /// Number of ports that could be acquired at `now`.
    pub fn available_at(&self, now: Instant) -> usize {
        self.slots
            .iter()
            .filter(|slot| match slot {
                Slot::Free => true,
                Slot::InUse => false,
                Slot::Released(at) => now.saturating_duration_since(*at) >= self.blocked_delay,
            })
            .count()
    }

    fn slot_mut(&mut self, port: u16) -> Option<&mut Slot> {
        let index = usize::from(port.checked_sub(MIN_NETWORK_PORT)?);
        self.slots.get_mut(index)
    }
}
