// SPDX-License-Identifier: Apache-2.0

use crate::{
    retrans::DhcpV6Transaction, select::DhcpV6AdvertiseBuffer, DhcpV6Lease,
};

/// The client state machine state.
///
/// Per-state data (the transaction in flight, the Advertise buffer,
/// the candidate lease under validation) lives inside the variant
/// that uses it, so it cannot be observed stale from another state.
#[derive(Debug, PartialEq, Clone, Default)]
#[non_exhaustive]
pub enum DhcpV6State {
    /// Quiescent; nothing in flight. Entered at creation, on link
    /// loss and after lease loss.
    #[default]
    Init,
    /// Solicit sent, collecting server Advertises.
    Selecting {
        trans: DhcpV6Transaction,
        pending: DhcpV6AdvertiseBuffer,
    },
    /// Request sent to the selected server, waiting for Reply.
    Requesting {
        trans: DhcpV6Transaction,
        candidate: DhcpV6Lease,
        pending: DhcpV6AdvertiseBuffer,
    },
    /// Usable Reply accepted, waiting for the lease applier verdict.
    Validating { candidate: DhcpV6Lease },
    /// Lease committed; next action at T1 (or the info refresh time).
    Bound,
    /// T1 passed; Renew addressed to the leasing server.
    Renewing { trans: DhcpV6Transaction },
    /// T2 passed; Rebind multicast to any server.
    Rebinding { trans: DhcpV6Transaction },
    /// Confirm of a cached lease after reboot or link flap.
    Reboot { trans: DhcpV6Transaction },
    /// User asked for an early Renew from BOUND; returns to BOUND
    /// regardless of T1.
    RenewRequested { trans: DhcpV6Transaction },
    /// Terminal. Carries the Release exchange until the server
    /// replies or MRC is spent.
    Released {
        trans: Option<DhcpV6Transaction>,
        released_lease: Option<DhcpV6Lease>,
    },
    /// Information-request sent (info-only profile).
    RequestingInfo { trans: DhcpV6Transaction },
}

impl DhcpV6State {
    /// Stable state name for logs and the management surface.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Selecting { .. } => "SELECTING",
            Self::Requesting { .. } => "REQUESTING",
            Self::Validating { .. } => "VALIDATING",
            Self::Bound => "BOUND",
            Self::Renewing { .. } => "RENEWING",
            Self::Rebinding { .. } => "REBINDING",
            Self::Reboot { .. } => "REBOOT",
            Self::RenewRequested { .. } => "RENEW-REQUESTED",
            Self::Released { .. } => "RELEASED",
            Self::RequestingInfo { .. } => "REQUESTING-INFO",
        }
    }

    /// The transaction id inbound packets must match. RELEASED keeps
    /// matching its Release exchange so the confirming Reply stops
    /// the retransmission early.
    pub fn current_xid(&self) -> Option<[u8; 3]> {
        self.transaction().map(|t| t.xid)
    }

    pub(crate) fn transaction(&self) -> Option<&DhcpV6Transaction> {
        match self {
            Self::Selecting { trans, .. }
            | Self::Requesting { trans, .. }
            | Self::Renewing { trans }
            | Self::Rebinding { trans }
            | Self::Reboot { trans }
            | Self::RenewRequested { trans }
            | Self::RequestingInfo { trans } => Some(trans),
            Self::Released { trans, .. } => trans.as_ref(),
            Self::Init | Self::Validating { .. } | Self::Bound => None,
        }
    }

}

impl std::fmt::Display for DhcpV6State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
