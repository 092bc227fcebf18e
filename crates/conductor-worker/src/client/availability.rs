//! Server availability gate
//!
//! Hosts running behind service discovery can stop polling while their server
//! is out of service, without tearing the host down.

use std::sync::atomic::{AtomicBool, Ordering};

/// Reports whether the server should currently be polled
pub trait ServerAvailability: Send + Sync + 'static {
    fn is_available(&self) -> bool;
}

/// Availability toggled by the host application (e.g. from a health check)
#[derive(Debug)]
pub struct AvailabilityFlag {
    available: AtomicBool,
}

impl AvailabilityFlag {
    pub fn new(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
        }
    }

    pub fn set(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Default for AvailabilityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ServerAvailability for AvailabilityFlag {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_toggles() {
        let flag = AvailabilityFlag::default();
        assert!(flag.is_available());

        flag.set(false);
        assert!(!flag.is_available());
    }
}
