// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv6Addr;

use crate::msg::{DhcpV6Message, DhcpV6MessageType};

/// Outcome of feeding one inbound packet to the device.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DhcpV6PacketDisposition {
    Handled,
    Dropped,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum DhcpV6DropReason {
    Malformed,
    BadSource,
    WrongType,
    /// Reconfigure is not implemented and ignored without noise.
    Reconfigure,
    XidMismatch,
    Unauthenticated,
}

impl std::fmt::Display for DhcpV6DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed"),
            Self::BadSource => write!(f, "bad_source"),
            Self::WrongType => write!(f, "wrong_type"),
            Self::Reconfigure => write!(f, "reconfigure"),
            Self::XidMismatch => write!(f, "xid_mismatch"),
            Self::Unauthenticated => write!(f, "unauthenticated"),
        }
    }
}

/// Per-device drop counters, one per dispatcher rule.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[non_exhaustive]
pub struct DhcpV6Stats {
    pub malformed: u64,
    pub bad_source: u64,
    pub wrong_type: u64,
    pub xid_mismatch: u64,
    pub unauthenticated: u64,
}

impl DhcpV6Stats {
    pub(crate) fn count(&mut self, reason: DhcpV6DropReason) {
        match reason {
            DhcpV6DropReason::Malformed => self.malformed += 1,
            DhcpV6DropReason::BadSource => self.bad_source += 1,
            DhcpV6DropReason::WrongType => self.wrong_type += 1,
            DhcpV6DropReason::Reconfigure
            | DhcpV6DropReason::XidMismatch => self.xid_mismatch += 1,
            DhcpV6DropReason::Unauthenticated => self.unauthenticated += 1,
        }
    }
}

fn is_link_local(ip: &Ipv6Addr) -> bool {
    // fe80::/10
    ip.segments()[0] & 0xffc0 == 0xfe80
}

/// RFC 3315 section 15 message validation, applied before the FSM
/// sees the message. `expected_xid` is the device's current
/// transaction id; `unicast_server` is the lease's unicast endpoint
/// when a unicast Reply is legitimate (Renew to a server that sent
/// the Server Unicast option).
pub(crate) fn screen(
    msg: &DhcpV6Message,
    client_duid: &[u8],
    expected_xid: Option<[u8; 3]>,
    unicast_server: Option<Ipv6Addr>,
) -> Result<(), DhcpV6DropReason> {
    if !is_link_local(&msg.src)
        && !(msg.msg_type == DhcpV6MessageType::Reply
            && unicast_server == Some(msg.src))
    {
        return Err(DhcpV6DropReason::BadSource);
    }
    if !msg.msg_type.is_server_to_client() {
        return Err(DhcpV6DropReason::WrongType);
    }
    if msg.msg_type == DhcpV6MessageType::Reconfigure {
        return Err(DhcpV6DropReason::Reconfigure);
    }
    if expected_xid != Some(msg.xid) {
        return Err(DhcpV6DropReason::XidMismatch);
    }
    match msg.client_duid.as_deref() {
        Some(duid) if duid == client_duid => (),
        _ => return Err(DhcpV6DropReason::Unauthenticated),
    }
    // Advertise and Reply always carry the server identity.
    if msg.server_duid.as_deref().map_or(true, |d| d.is_empty()) {
        return Err(DhcpV6DropReason::Unauthenticated);
    }
    Ok(())
}
