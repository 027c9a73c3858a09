//! ---
//! kdm_section: "04-deployment-orchestration"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "Monotonic service endpoint allocation."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
use std::net::IpAddr;

use kdm_common::config::ServiceConfig;
use parking_lot::Mutex;
use tracing::debug;

use crate::{HandlerError, HandlerResult};

/// Hands out service access endpoints for replicas.
///
/// Ports are allocated monotonically upward from `base_port` and never
/// recycled, so an endpoint URL observed once always refers to the same
/// replica incarnation.
#[derive(Debug)]
pub struct EndpointAllocator {
    scheme: String,
    host: IpAddr,
    base_port: u16,
    next_offset: Mutex<u32>,
}

impl EndpointAllocator {
    /// Create an allocator from the service configuration.
    #[must_use]
    pub fn new(service: &ServiceConfig) -> Self {
        Self {
            scheme: service.scheme.clone(),
            host: service.host,
            base_port: service.base_port,
            next_offset: Mutex::new(0),
        }
    }

    /// Allocate `count` fresh endpoint URLs.
    pub fn allocate(&self, count: u32) -> HandlerResult<Vec<String>> {
        let mut offset = self.next_offset.lock();
        let end = *offset as u64 + count as u64;
        if self.base_port as u64 + end > u16::MAX as u64 + 1 {
            return Err(HandlerError::InvalidRequest(format!(
                "service port space exhausted at base port {}",
                self.base_port
            )));
        }

        let mut endpoints = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let port = self.base_port + *offset as u16;
            endpoints.push(self.format_endpoint(port));
            *offset += 1;
        }
        debug!(allocated = count, next_offset = *offset, "endpoints allocated");
        Ok(endpoints)
    }

    /// Advance the allocator past ports already present in `endpoints`.
    ///
    /// Called when resuming from persisted deployment records so restarted
    /// handlers never re-issue a port that is still in use.
    pub fn resume_past<'a, I>(&self, endpoints: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut offset = self.next_offset.lock();
        for endpoint in endpoints {
            if let Some(port) = parse_port(endpoint) {
                if port >= self.base_port {
                    let past = u32::from(port - self.base_port) + 1;
                    if past > *offset {
                        *offset = past;
                    }
                }
            }
        }
    }

    fn format_endpoint(&self, port: u16) -> String {
        match self.host {
            IpAddr::V4(host) => format!("{}://{host}:{port}", self.scheme),
            IpAddr::V6(host) => format!("{}://[{host}]:{port}", self.scheme),
        }
    }
}

fn parse_port(endpoint: &str) -> Option<u16> {
    endpoint.rsplit(':').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> EndpointAllocator {
        EndpointAllocator::new(&ServiceConfig::default())
    }

    #[test]
    fn ports_are_monotonic_and_never_recycled() {
        let allocator = allocator();
        let first = allocator.allocate(2).expect("allocate");
        assert_eq!(
            first,
            ["https://127.0.0.1:9443", "https://127.0.0.1:9444"]
        );

        // A later allocation never reuses earlier ports, even after the
        // earlier deployment is gone.
        let second = allocator.allocate(1).expect("allocate");
        assert_eq!(second, ["https://127.0.0.1:9445"]);
    }

    #[test]
    fn resume_continues_past_persisted_endpoints() {
        let allocator = allocator();
        allocator.resume_past(
            ["https://127.0.0.1:9443", "https://127.0.0.1:9447"]
                .iter()
                .copied(),
        );
        let next = allocator.allocate(1).expect("allocate");
        assert_eq!(next, ["https://127.0.0.1:9448"]);
    }

    #[test]
    fn exhausted_port_space_is_an_error() {
        let service = ServiceConfig {
            base_port: u16::MAX - 1,
            ..ServiceConfig::default()
        };
        let allocator = EndpointAllocator::new(&service);
        allocator.allocate(2).expect("last two ports fit");
        assert!(allocator.allocate(1).is_err());
    }
}
