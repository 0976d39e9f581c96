//! Host port allocation
//!
//! Ports are never tracked by a separate counter. The allocator is handed the
//! set of ports currently held by registered tenants (collected by the
//! registry under its global lock) and picks the lowest free ones from the
//! configured range, so a crash can never leave a port allocated but
//! unrecorded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::TenantError;
use crate::types::TenantId;

/// Inclusive range of host ports handed out to tenants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRange {
    /// First port of the range
    pub start: u16,
    /// Last port of the range (inclusive)
    pub end: u16,
    /// Ports inside the range that must never be allocated
    pub reserved: Vec<u16>,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 20000,
            end: 29999,
            reserved: Vec::new(),
        }
    }
}

impl PortRange {
    /// Create a range without reserved ports
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            reserved: Vec::new(),
        }
    }

    /// Whether the range is usable
    pub fn validate(&self) -> Result<(), String> {
        if self.start == 0 {
            return Err("port range must not start at 0".to_string());
        }
        if self.start > self.end {
            return Err(format!(
                "port range start {} is after end {}",
                self.start, self.end
            ));
        }
        Ok(())
    }

    /// Number of ports in the range, reserved ones included
    pub fn len(&self) -> usize {
        if self.start > self.end {
            0
        } else {
            usize::from(self.end - self.start) + 1
        }
    }

    /// Whether the range holds no ports
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `port` falls inside the range
    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

/// Picks free host ports for a tenant
#[derive(Debug, Clone)]
pub struct PortAllocator {
    range: PortRange,
}

impl PortAllocator {
    /// Create an allocator over `range`
    pub fn new(range: PortRange) -> Self {
        Self { range }
    }

    /// The range this allocator draws from
    pub fn range(&self) -> &PortRange {
        &self.range
    }

    /// Allocate `count` ports not present in `held`
    ///
    /// Lowest free ports are returned first, so ports released by a removed
    /// tenant are handed out again.
    pub fn allocate(
        &self,
        tenant: &TenantId,
        count: usize,
        held: &BTreeSet<u16>,
    ) -> Result<Vec<u16>, TenantError> {
        let free: Vec<u16> = (self.range.start..=self.range.end)
            .filter(|p| !held.contains(p) && !self.range.reserved.contains(p))
            .take(count)
            .collect();

        if free.len() < count {
            let available = (self.range.start..=self.range.end)
                .filter(|p| !held.contains(p) && !self.range.reserved.contains(p))
                .count();
            return Err(TenantError::PortExhaustion {
                tenant: tenant.clone(),
                requested: count,
                available,
                start: self.range.start,
                end: self.range.end,
            });
        }

        tracing::debug!("Allocated ports {:?} for tenant {}", free, tenant);
        Ok(free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TenantId {
        TenantId::parse(s).unwrap()
    }

    #[test]
    fn test_allocates_lowest_free_ports() {
        let allocator = PortAllocator::new(PortRange::new(30000, 30010));
        let held: BTreeSet<u16> = [30000, 30002].into_iter().collect();
        let ports = allocator.allocate(&id("acme"), 3, &held).unwrap();
        assert_eq!(ports, vec![30001, 30003, 30004]);
    }

    #[test]
    fn test_skips_reserved_ports() {
        let mut range = PortRange::new(30000, 30010);
        range.reserved = vec![30000, 30001];
        let allocator = PortAllocator::new(range);
        let ports = allocator.allocate(&id("acme"), 2, &BTreeSet::new()).unwrap();
        assert_eq!(ports, vec![30002, 30003]);
    }

    #[test]
    fn test_exhaustion_reports_free_count() {
        let allocator = PortAllocator::new(PortRange::new(30000, 30003));
        let held: BTreeSet<u16> = [30000, 30001].into_iter().collect();
        match allocator.allocate(&id("acme"), 3, &held) {
            Err(TenantError::PortExhaustion {
                requested,
                available,
                ..
            }) => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("expected PortExhaustion, got {:?}", other),
        }
    }

    #[test]
    fn test_range_at_top_of_port_space() {
        let allocator = PortAllocator::new(PortRange::new(65533, 65535));
        let ports = allocator.allocate(&id("acme"), 3, &BTreeSet::new()).unwrap();
        assert_eq!(ports, vec![65533, 65534, 65535]);
    }

    #[test]
    fn test_range_validation() {
        assert!(PortRange::new(0, 10).validate().is_err());
        assert!(PortRange::new(20, 10).validate().is_err());
        assert!(PortRange::new(10, 10).validate().is_ok());
        assert_eq!(PortRange::new(10, 12).len(), 3);
    }
}
