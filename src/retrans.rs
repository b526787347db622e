// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use crate::msg::DhcpV6OutboundMessage;

// RFC 8415 section 7.6 Transmission and Retransmission Parameters,
// with the profile overrides this client uses (Solicit and
// Information-request capped at 120s instead of 3600s so a dead
// network is retried at a useful rate).
const SOL_TIMEOUT: Duration = Duration::from_secs(1);
const SOL_MAX_RT: Duration = Duration::from_secs(120);
const REQ_TIMEOUT: Duration = Duration::from_secs(1);
const REQ_MAX_RT: Duration = Duration::from_secs(30);
const REQ_MAX_RC: u32 = 10;
const REQ_MAX_RD: Duration = Duration::from_secs(30);
const CNF_TIMEOUT: Duration = Duration::from_secs(1);
const CNF_MAX_RT: Duration = Duration::from_secs(4);
const CNF_MAX_RD: Duration = Duration::from_secs(10);
const REN_TIMEOUT: Duration = Duration::from_secs(10);
const REN_MAX_RT: Duration = Duration::from_secs(600);
const REB_TIMEOUT: Duration = Duration::from_secs(10);
const REB_MAX_RT: Duration = Duration::from_secs(600);
const REL_TIMEOUT: Duration = Duration::from_secs(1);
const REL_MAX_RC: u32 = 5;
const INF_TIMEOUT: Duration = Duration::from_secs(1);
const INF_MAX_RT: Duration = Duration::from_secs(120);

const ZERO: Duration = Duration::new(0, 0);

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[non_exhaustive]
pub enum DhcpV6TransactionKind {
    Solicit,
    Request,
    Confirm,
    Renew,
    Rebind,
    Release,
    Decline,
    InformationRequest,
}

impl std::fmt::Display for DhcpV6TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Solicit => write!(f, "solicit"),
            Self::Request => write!(f, "request"),
            Self::Confirm => write!(f, "confirm"),
            Self::Renew => write!(f, "renew"),
            Self::Rebind => write!(f, "rebind"),
            Self::Release => write!(f, "release"),
            Self::Decline => write!(f, "decline"),
            Self::InformationRequest => write!(f, "information_request"),
        }
    }
}

/// IRT/MRT/MRC/MRD of one message exchange. Zero MRC and MRD mean
/// unbounded.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct DhcpV6RetransParams {
    pub irt: Duration,
    pub mrt: Duration,
    pub mrc: u32,
    pub mrd: Duration,
}

impl DhcpV6RetransParams {
    pub(crate) fn solicit() -> Self {
        Self {
            irt: SOL_TIMEOUT,
            mrt: SOL_MAX_RT,
            mrc: 0,
            mrd: ZERO,
        }
    }

    pub(crate) fn request() -> Self {
        Self {
            irt: REQ_TIMEOUT,
            mrt: REQ_MAX_RT,
            mrc: REQ_MAX_RC,
            mrd: REQ_MAX_RD,
        }
    }

    pub(crate) fn confirm() -> Self {
        Self {
            irt: CNF_TIMEOUT,
            mrt: CNF_MAX_RT,
            mrc: 0,
            mrd: CNF_MAX_RD,
        }
    }

    /// `mrd` is the remaining time to T2 at the moment Renew starts.
    pub(crate) fn renew(mrd: Duration) -> Self {
        Self {
            irt: REN_TIMEOUT,
            mrt: REN_MAX_RT,
            mrc: 0,
            mrd,
        }
    }

    /// `mrd` is the remaining valid lifetime at the moment Rebind
    /// starts.
    pub(crate) fn rebind(mrd: Duration) -> Self {
        Self {
            irt: REB_TIMEOUT,
            mrt: REB_MAX_RT,
            mrc: 0,
            mrd,
        }
    }

    pub(crate) fn release() -> Self {
        Self {
            irt: REL_TIMEOUT,
            mrt: ZERO,
            mrc: REL_MAX_RC,
            mrd: ZERO,
        }
    }

    pub(crate) fn info_request() -> Self {
        Self {
            irt: INF_TIMEOUT,
            mrt: INF_MAX_RT,
            mrc: 0,
            mrd: ZERO,
        }
    }
}

// RFC 8415 section 15.  Reliability of Client-Initiated Message
// Exchanges
//  RT      Retransmission timeout
//  IRT     Initial retransmission time
//  MRC     Maximum retransmission count
//  MRT     Maximum retransmission time
//  RAND    Randomization factor
fn gen_retransmit_time(rt: Duration, irt: Duration, mrt: Duration) -> Duration {
    let rt = if rt == ZERO {
        Duration::from_millis(
            (irt.as_millis() * rand::random_range(900..1100) / 1000)
                .try_into()
                .unwrap_or(u64::MAX),
        )
    } else {
        Duration::from_millis(
            (rt.as_millis() * rand::random_range(1900..2100) / 1000)
                .try_into()
                .unwrap_or(u64::MAX),
        )
    };

    if mrt != ZERO && rt > mrt {
        Duration::from_millis(
            (mrt.as_millis() * rand::random_range(900..1100) / 1000)
                .try_into()
                .unwrap_or(u64::MAX),
        )
    } else {
        rt
    }
}

pub(crate) fn gen_xid() -> [u8; 3] {
    // In RFC 8415, the `transaction-id` is a 3-octet field
    let mut xid: [u8; 3] = [0; 3];
    xid.copy_from_slice(&rand::random::<u32>().to_le_bytes()[..3]);
    xid
}

/// One client-initiated message exchange: the transaction id, the
/// outbound message template that gets re-emitted on every
/// retransmission, and the retransmission budget state.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DhcpV6Transaction {
    pub kind: DhcpV6TransactionKind,
    pub xid: [u8; 3],
    pub started_at: Instant,
    pub params: DhcpV6RetransParams,
    /// Transmissions so far, including the initial send.
    pub rc: u32,
    /// Current per-try timeout; zero until the first arm.
    pub rt: Duration,
    pub(crate) msg: DhcpV6OutboundMessage,
    pub(crate) dst: Ipv6Addr,
}

impl DhcpV6Transaction {
    pub(crate) fn new(
        kind: DhcpV6TransactionKind,
        msg: DhcpV6OutboundMessage,
        dst: Ipv6Addr,
        params: DhcpV6RetransParams,
        now: Instant,
    ) -> Self {
        Self {
            kind,
            xid: msg.xid,
            started_at: now,
            params,
            rc: 0,
            rt: ZERO,
            msg,
            dst,
        }
    }

    /// RT to wait after the initial transmission. The first Solicit
    /// additionally waits a uniform 0..IRT on top of the randomized
    /// IRT (RFC 8415 18.2.1).
    pub(crate) fn first_timeout(&mut self) -> Duration {
        let mut rt =
            gen_retransmit_time(ZERO, self.params.irt, self.params.mrt);
        if self.kind == DhcpV6TransactionKind::Solicit {
            rt += Duration::from_millis(rand::random_range(
                0..=self.params.irt.as_millis() as u64,
            ));
        }
        self.rc = 1;
        self.rt = rt;
        // No budget spent yet; only MRD shorter than the first RT can
        // clamp here.
        self.clamp_to_mrd(self.started_at)
    }

    /// Whether the retransmission budget is spent at `now`.
    pub(crate) fn budget_exhausted(&self, now: Instant) -> bool {
        if self.params.mrc != 0 && self.rc >= self.params.mrc {
            return true;
        }
        if self.params.mrd != ZERO
            && now.duration_since(self.started_at) >= self.params.mrd
        {
            return true;
        }
        false
    }

    /// Compute the RT for the next retransmission, or `None` once MRC
    /// or MRD is exhausted. The returned wait never overshoots MRD so
    /// the terminal timer fires on the budget boundary.
    pub(crate) fn next_timeout(&mut self, now: Instant) -> Option<Duration> {
        if self.budget_exhausted(now) {
            return None;
        }
        self.rt =
            gen_retransmit_time(self.rt, self.params.irt, self.params.mrt);
        self.rc += 1;
        Some(self.clamp_to_mrd(now))
    }

    fn clamp_to_mrd(&self, now: Instant) -> Duration {
        if self.params.mrd == ZERO {
            return self.rt;
        }
        let spent = now.duration_since(self.started_at);
        let remaining = self.params.mrd.saturating_sub(spent);
        std::cmp::min(self.rt, remaining)
    }

    /// Elapsed Time option value: hundredths of a second since the
    /// first transmission, clamped to 0xFFFF.
    pub(crate) fn elapsed_hundredths(&self, now: Instant) -> u16 {
        u16::try_from(now.duration_since(self.started_at).as_millis() / 10)
            .unwrap_or(u16::MAX)
    }
}
