// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv6Addr;

use crate::{DhcpError, DhcpV6Lease};

/// Result of asking the lease applier to install a lease.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum DhcpV6ApplyOutcome {
    Applied,
    /// Duplicate address detection failed for these addresses; the
    /// FSM declines them and goes back to server discovery.
    DadConflict(Vec<Ipv6Addr>),
    IoError(String),
}

/// OS-side lease operations plus the lease cache consulted on
/// reboot. Implemented by the supplicant; `apply()` is expected to
/// block for at most tens of milliseconds.
pub trait DhcpV6LeaseApplier: Send {
    fn apply(
        &mut self,
        iface_index: u32,
        lease: &DhcpV6Lease,
    ) -> DhcpV6ApplyOutcome;

    /// Remove the lease (or, on lease replacement, a synthetic lease
    /// holding only the no-longer-leased addresses) from the OS.
    fn withdraw(&mut self, iface_index: u32, lease: &DhcpV6Lease);

    fn cache_get(&mut self, iface_index: u32) -> Option<DhcpV6Lease>;

    fn cache_put(
        &mut self,
        iface_index: u32,
        lease: &DhcpV6Lease,
    ) -> Result<(), DhcpError>;
}
