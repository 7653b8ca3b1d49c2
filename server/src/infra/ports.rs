//! Host port allocation for project containers

use std::collections::HashSet;
use std::net::TcpListener;

use tracing::debug;

use crate::error::{Error, Result};

/// Hands out host ports from a fixed range
#[derive(Debug, Clone)]
pub struct PortAllocator {
    start: u16,
    end: u16,
}

impl PortAllocator {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Pick the first port in range that is neither reserved nor bound on the host
    pub fn allocate(&self, reserved: &[u16]) -> Result<u16> {
        let reserved: HashSet<u16> = reserved.iter().copied().collect();

        for port in self.start..=self.end {
            if reserved.contains(&port) {
                continue;
            }
            if Self::is_free(port) {
                debug!("Allocated host port {}", port);
                return Ok(port);
            }
        }

        Err(Error::NoFreePort {
            start: self.start,
            end: self.end,
        })
    }

    fn is_free(port: u16) -> bool {
        TcpListener::bind(("0.0.0.0", port)).is_ok()
    }
}
