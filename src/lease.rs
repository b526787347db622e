// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use crate::{
    msg::{DhcpV6IaAddress, DhcpV6Message, DhcpV6MessageType},
    DhcpError, ErrorKind,
};

// RFC 8415 21.23. Information Refresh Time Option
const IRT_DEFAULT: u32 = 86400;
const IRT_MINIMUM: u32 = 600;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[non_exhaustive]
pub enum DhcpV6LeaseState {
    /// Accepted from a server Reply, not yet installed.
    #[default]
    Granted,
    /// Committed to the interface by the lease applier.
    Applied,
    Released,
    Failed,
}

impl std::fmt::Display for DhcpV6LeaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Granted => write!(f, "granted"),
            Self::Applied => write!(f, "applied"),
            Self::Released => write!(f, "released"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The currently bound lease of one device: its addresses, renewal
/// timers and the other configuration the server handed out.
///
/// A lease is created from an accepted Reply and replaced wholesale by
/// a successful Renew/Rebind; it is never merged in place.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpV6Lease {
    pub server_duid: Vec<u8>,
    pub server_unicast: Option<Ipv6Addr>,
    pub ia_id: u32,
    pub addrs: Vec<DhcpV6IaAddress>,
    /// Seconds after `acquired_at` at which Renew starts. Derived
    /// when the server left it to the client.
    pub t1: u32,
    /// Seconds after `acquired_at` at which Rebind starts.
    pub t2: u32,
    pub dns_servers: Vec<Ipv6Addr>,
    pub dns_search: Vec<String>,
    pub ntp_servers: Vec<Ipv6Addr>,
    pub sip_servers: Vec<Ipv6Addr>,
    /// RFC 8415 21.23; only meaningful for info-only leases.
    pub info_refresh_time: Option<u32>,
    pub acquired_at: Instant,
    pub preference: u8,
    pub rapid_committed: bool,
    pub state: DhcpV6LeaseState,
}

impl DhcpV6Lease {
    /// Build a candidate lease from a server Advertise or Reply.
    ///
    /// For managed profiles the message must carry a server DUID and
    /// at least one usable IA_NA address; info-only replies only need
    /// the server DUID.
    pub(crate) fn try_from_msg(
        msg: &DhcpV6Message,
        need_addrs: bool,
        now: Instant,
    ) -> Result<Self, DhcpError> {
        let server_duid = msg.server_duid.clone().ok_or_else(|| {
            DhcpError::new(
                ErrorKind::Unauthenticated,
                format!(
                    "Server {} message without server DUID",
                    msg.msg_type
                ),
            )
        })?;
        if need_addrs && !msg.has_usable_ia_na() {
            return Err(DhcpError::new(
                ErrorKind::ProtocolNak,
                format!(
                    "Server {} message without usable IA_NA address",
                    msg.msg_type
                ),
            ));
        }
        let ia = msg.ia_na.clone().unwrap_or_default();
        let rapid_committed =
            msg.msg_type == DhcpV6MessageType::Reply && msg.rapid_commit;
        let mut ret = Self {
            server_duid,
            server_unicast: msg.server_unicast,
            ia_id: ia.iaid,
            addrs: ia
                .addrs
                .into_iter()
                .filter(|a| a.valid_life > 0)
                .collect(),
            t1: ia.t1,
            t2: ia.t2,
            dns_servers: msg.dns_servers.clone(),
            dns_search: msg.dns_search.clone(),
            ntp_servers: msg.ntp_servers.clone(),
            sip_servers: msg.sip_servers.clone(),
            info_refresh_time: msg.info_refresh_time,
            acquired_at: now,
            preference: msg.preference(),
            rapid_committed,
            state: DhcpV6LeaseState::Granted,
        };
        ret.derive_timers();
        Ok(ret)
    }

    /// Compute effective T1/T2.
    ///
    /// Zero values mean "client choice" (RFC 8415 21.4): T1 = 0.5 and
    /// T2 = 0.8 of the longest preferred lifetime. Server values are
    /// sanitized so that t1 <= t2 <= min(valid lifetime) always
    /// holds.
    fn derive_timers(&mut self) {
        if self.addrs.is_empty() {
            self.t1 = 0;
            self.t2 = 0;
            return;
        }
        let longest_preferred = self
            .addrs
            .iter()
            .map(|a| a.preferred_life)
            .max()
            .unwrap_or(0);
        if self.t1 == 0 && self.t2 == 0 {
            self.t1 = longest_preferred / 2;
            self.t2 = longest_preferred / 5 * 4;
        }
        let min_valid = self.min_valid_life();
        if self.t2 == 0 || self.t2 > min_valid {
            self.t2 = min_valid;
        }
        if self.t1 == 0 || self.t1 > self.t2 {
            self.t1 = self.t2;
        }
    }

    pub fn min_valid_life(&self) -> u32 {
        self.addrs
            .iter()
            .map(|a| a.valid_life)
            .min()
            .unwrap_or(0)
    }

    pub(crate) fn t1_deadline(&self) -> Instant {
        self.acquired_at + Duration::from_secs(self.t1.into())
    }

    pub(crate) fn t2_deadline(&self) -> Instant {
        self.acquired_at + Duration::from_secs(self.t2.into())
    }

    /// Earliest valid-lifetime expiry across the leased addresses.
    pub(crate) fn expiry_deadline(&self) -> Instant {
        self.acquired_at
            + Duration::from_secs(self.min_valid_life().into())
    }

    /// The deadline to refresh an info-only lease, from the
    /// Information Refresh Time option with the RFC default and
    /// floor.
    pub(crate) fn info_refresh_deadline(&self) -> Instant {
        let secs =
            self.info_refresh_time.unwrap_or(IRT_DEFAULT).max(IRT_MINIMUM);
        self.acquired_at + Duration::from_secs(secs.into())
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        if self.addrs.is_empty() {
            return false;
        }
        now >= self.expiry_deadline()
    }

    /// Earliest of the T1/T2/valid deadlines still ahead of `now`;
    /// `None` once the lease is fully expired.
    pub fn expires_at(&self, now: Instant) -> Option<Instant> {
        [
            self.t1_deadline(),
            self.t2_deadline(),
            self.expiry_deadline(),
        ]
        .into_iter()
        .filter(|deadline| *deadline > now)
        .min()
    }

    /// Addresses present here but absent from `new`, surfaced to the
    /// lease applier on replacement so the OS can drop them.
    pub(crate) fn removed_addrs(&self, new: &Self) -> Vec<Ipv6Addr> {
        self.addrs
            .iter()
            .map(|a| a.addr)
            .filter(|addr| !new.addrs.iter().any(|n| n.addr == *addr))
            .collect()
    }
}
