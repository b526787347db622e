// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv6Addr;

use crate::DhcpError;

/// Send/receive boundary to the link manager, which owns the UDP/IPv6
/// socket bound to port 546 and joined to ff02::1:2 on the interface.
///
/// A send failure is `ErrorKind::TransientNetwork`: the FSM logs it
/// and leaves the retransmission timer armed, so the message goes out
/// at the next RT.
pub trait DhcpV6Transport: Send + Sync {
    fn send(
        &self,
        iface_index: u32,
        dst: Ipv6Addr,
        payload: &[u8],
    ) -> Result<(), DhcpError>;

    /// Drain one pending datagram, `None` when the socket is dry.
    fn recv(&self) -> Result<Option<(Vec<u8>, Ipv6Addr)>, DhcpError>;
}
