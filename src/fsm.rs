// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    applier::{DhcpV6ApplyOutcome, DhcpV6LeaseApplier},
    codec::DhcpV6Codec,
    dispatch::{screen, DhcpV6PacketDisposition, DhcpV6Stats},
    event::{DhcpV6Event, DhcpV6LeaseEvent, DhcpV6LeaseLostReason},
    msg::{
        DhcpV6Message, DhcpV6MessageIaNa, DhcpV6MessageType,
        DhcpV6OutboundMessage, DhcpV6StatusCode,
    },
    retrans::{
        gen_xid, DhcpV6RetransParams, DhcpV6Transaction,
        DhcpV6TransactionKind,
    },
    select::DhcpV6AdvertiseBuffer,
    state::DhcpV6State,
    transport::DhcpV6Transport,
    DhcpError, DhcpV6Config, DhcpV6Lease, DhcpV6Mode, ErrorKind,
};
use crate::lease::DhcpV6LeaseState;

const ALL_DHCP_RELAY_AGENTS_AND_SERVERS: Ipv6Addr =
    Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);

/// Per-interface DHCPv6 client: configuration profile, state machine
/// state, the bound lease and the injected codec/transport/applier
/// handles. One instance per interface; instances are independent, so
/// a supervisor may run many of them on one event loop or shard them
/// by interface index.
pub struct DhcpV6Device {
    config: DhcpV6Config,
    state: DhcpV6State,
    lease: Option<DhcpV6Lease>,
    deadline: Option<Instant>,
    link_ready: bool,
    stats: DhcpV6Stats,
    codec: Box<dyn DhcpV6Codec>,
    transport: Arc<dyn DhcpV6Transport>,
    applier: Box<dyn DhcpV6LeaseApplier>,
}

impl std::fmt::Debug for DhcpV6Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhcpV6Device")
            .field("iface", &self.config.iface_name)
            .field("state", &self.state.name())
            .field("lease", &self.lease)
            .finish()
    }
}

impl DhcpV6Device {
    pub fn new(
        config: DhcpV6Config,
        codec: Box<dyn DhcpV6Codec>,
        transport: Arc<dyn DhcpV6Transport>,
        applier: Box<dyn DhcpV6LeaseApplier>,
    ) -> Result<Self, DhcpError> {
        if config.duid.is_empty() {
            return Err(DhcpError::new(
                ErrorKind::Fatal,
                format!(
                    "Cannot start DHCPv6 on {} without a client DUID",
                    config.iface_name
                ),
            ));
        }
        Ok(Self {
            config,
            state: DhcpV6State::Init,
            lease: None,
            deadline: None,
            // Devices are created on the supervisor's link-up signal.
            link_ready: true,
            stats: DhcpV6Stats::default(),
            codec,
            transport,
            applier,
        })
    }

    pub fn state(&self) -> &DhcpV6State {
        &self.state
    }

    /// Stable state name, e.g. for the management surface.
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub fn lease(&self) -> Option<&DhcpV6Lease> {
        self.lease.as_ref()
    }

    pub fn stats(&self) -> &DhcpV6Stats {
        &self.stats
    }

    pub(crate) fn transport_handle(&self) -> Arc<dyn DhcpV6Transport> {
        self.transport.clone()
    }

    /// The single armed deadline, if any. The runner turns this into
    /// its timerfd.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Test injection: force the deadline to fire `milliseconds` from
    /// now.
    pub fn set_timeout(&mut self, milliseconds: u64) {
        self.deadline =
            Some(Instant::now() + Duration::from_millis(milliseconds));
    }

    /// Test injection: force the deadline to fire `seconds` from now.
    pub fn set_timeout_seconds(&mut self, seconds: u32) {
        self.set_timeout(u64::from(seconds) * 1000);
    }

    /// Decode, screen and process one inbound packet from the link
    /// manager. Screening failures drop the packet silently and only
    /// bump a counter.
    pub fn process_client_packet(
        &mut self,
        payload: &[u8],
        src: Ipv6Addr,
        now: Instant,
    ) -> Result<(DhcpV6PacketDisposition, Vec<DhcpV6LeaseEvent>), DhcpError>
    {
        let msg = match self.codec.decode(payload, src) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!(
                    "Dropping malformed packet on {}: {e}",
                    self.config.iface_name
                );
                self.stats.count(crate::dispatch::DhcpV6DropReason::Malformed);
                return Ok((DhcpV6PacketDisposition::Dropped, Vec::new()));
            }
        };
        let unicast_server =
            self.lease.as_ref().and_then(|l| l.server_unicast);
        if let Err(reason) = screen(
            &msg,
            &self.config.duid.to_vec(),
            self.state.current_xid(),
            unicast_server,
        ) {
            log::debug!(
                "Dropping {} packet on {}: {reason}",
                msg.msg_type,
                self.config.iface_name
            );
            self.stats.count(reason);
            return Ok((DhcpV6PacketDisposition::Dropped, Vec::new()));
        }
        let reports = self.process(DhcpV6Event::RxMessage(msg), now)?;
        Ok((DhcpV6PacketDisposition::Handled, reports))
    }

    /// Feed one event through the state machine and collect the lease
    /// events it emits. Events the FSM generates for itself (the
    /// applier outcome) are processed in the same pass, in order.
    pub fn process(
        &mut self,
        event: DhcpV6Event,
        now: Instant,
    ) -> Result<Vec<DhcpV6LeaseEvent>, DhcpError> {
        log::debug!(
            "Processing event {event} in state {} on {}",
            self.state.name(),
            self.config.iface_name
        );
        let mut queue = VecDeque::new();
        queue.push_back(event);
        let mut reports = Vec::new();
        while let Some(event) = queue.pop_front() {
            self.handle_event(event, now, &mut queue, &mut reports)?;
        }
        Ok(reports)
    }

    fn handle_event(
        &mut self,
        event: DhcpV6Event,
        now: Instant,
        queue: &mut VecDeque<DhcpV6Event>,
        reports: &mut Vec<DhcpV6LeaseEvent>,
    ) -> Result<(), DhcpError> {
        match event {
            DhcpV6Event::LinkUp => {
                self.link_ready = true;
                if self.state == DhcpV6State::Init {
                    self.start_mode(self.config.mode, now)?;
                }
                Ok(())
            }
            DhcpV6Event::LinkDown => {
                self.link_ready = false;
                self.park(now)
            }
            DhcpV6Event::Start(mode) => {
                if !self.link_ready {
                    log::info!(
                        "Not starting DHCPv6 on {}: link is down",
                        self.config.iface_name
                    );
                    return Ok(());
                }
                match self.state {
                    DhcpV6State::Init | DhcpV6State::Released { .. } => {
                        self.state = DhcpV6State::Init;
                        self.start_mode(mode, now)
                    }
                    _ => {
                        log::debug!(
                            "Ignoring start in state {}",
                            self.state.name()
                        );
                        Ok(())
                    }
                }
            }
            DhcpV6Event::Stop => self.park(now),
            DhcpV6Event::TimerFired => {
                self.handle_timer(now, reports)
            }
            DhcpV6Event::RxMessage(msg) => {
                self.handle_rx(msg, now, queue)
            }
            DhcpV6Event::UserRenew => self.handle_user_renew(now),
            DhcpV6Event::UserRelease => {
                self.handle_user_release(now, reports)
            }
            DhcpV6Event::LeaseApplied(outcome) => {
                self.handle_lease_applied(outcome, now, reports)
            }
        }
    }

    /// Stop/LinkDown: cancel the deadline, keep the lease as reboot
    /// cache, abandon any exchange in flight.
    fn park(&mut self, _now: Instant) -> Result<(), DhcpError> {
        self.deadline = None;
        if let Some(lease) = self.lease.take() {
            if let Err(e) =
                self.applier.cache_put(self.config.iface_index, &lease)
            {
                log::warn!(
                    "Failed to cache lease for {}: {e}",
                    self.config.iface_name
                );
            }
        }
        self.state = DhcpV6State::Init;
        Ok(())
    }

    fn start_mode(
        &mut self,
        mode: DhcpV6Mode,
        now: Instant,
    ) -> Result<(), DhcpError> {
        if mode != self.config.mode {
            log::warn!(
                "Start mode {mode} overrides profile mode {} on {}",
                self.config.mode,
                self.config.iface_name
            );
        }
        match mode {
            DhcpV6Mode::Managed => {
                match self
                    .applier
                    .cache_get(self.config.iface_index)
                    .filter(|l| !l.addrs.is_empty())
                    .filter(|l| !l.is_expired(now))
                {
                    Some(cached) => self.enter_reboot(cached, now),
                    None => self
                        .enter_selecting(DhcpV6AdvertiseBuffer::new(), now),
                }
            }
            DhcpV6Mode::InfoOnly => self.enter_requesting_info(now),
        }
    }

    fn handle_user_renew(&mut self, now: Instant) -> Result<(), DhcpError> {
        if self.state != DhcpV6State::Bound {
            log::debug!(
                "Ignoring renew request in state {}",
                self.state.name()
            );
            return Ok(());
        }
        match self.config.mode {
            DhcpV6Mode::Managed => {
                if self.lease.is_some() {
                    self.enter_renew_requested(now)
                } else {
                    Err(DhcpError::new(
                        ErrorKind::Bug,
                        "BOUND without lease in handle_user_renew()"
                            .to_string(),
                    ))
                }
            }
            DhcpV6Mode::InfoOnly => self.enter_requesting_info(now),
        }
    }

    fn handle_user_release(
        &mut self,
        now: Instant,
        reports: &mut Vec<DhcpV6LeaseEvent>,
    ) -> Result<(), DhcpError> {
        match self.state {
            DhcpV6State::Bound
            | DhcpV6State::Renewing { .. }
            | DhcpV6State::Rebinding { .. }
            | DhcpV6State::RenewRequested { .. } => {
                self.enter_released(now, reports)
            }
            DhcpV6State::Released { .. } => {
                log::debug!("Already released, ignoring release request");
                Ok(())
            }
            _ => {
                log::debug!(
                    "Ignoring release request in state {}",
                    self.state.name()
                );
                Ok(())
            }
        }
    }

    fn handle_timer(
        &mut self,
        now: Instant,
        reports: &mut Vec<DhcpV6LeaseEvent>,
    ) -> Result<(), DhcpError> {
        match std::mem::take(&mut self.state) {
            DhcpV6State::Selecting {
                mut trans,
                mut pending,
            } => {
                if let Some(candidate) = pending.pick_best() {
                    log::debug!(
                        "First RT elapsed, picked a server, {} other \
                        Advertise(s) left",
                        pending.len()
                    );
                    self.enter_requesting(candidate, pending, now)
                } else {
                    // Nobody answered within RT; Solicit is unbounded.
                    match trans.next_timeout(now) {
                        Some(wait) => {
                            self.send_transaction(&trans, now);
                            self.deadline = Some(now + wait);
                            self.state =
                                DhcpV6State::Selecting { trans, pending };
                            Ok(())
                        }
                        None => Err(DhcpError::new(
                            ErrorKind::Bug,
                            "Unbounded Solicit ran out of budget"
                                .to_string(),
                        )),
                    }
                }
            }
            DhcpV6State::Requesting {
                mut trans,
                candidate,
                pending,
            } => match trans.next_timeout(now) {
                Some(wait) => {
                    self.send_transaction(&trans, now);
                    self.deadline = Some(now + wait);
                    self.state = DhcpV6State::Requesting {
                        trans,
                        candidate,
                        pending,
                    };
                    Ok(())
                }
                None => {
                    log::info!(
                        "No Reply for Request on {}, backing off to \
                        Solicit",
                        self.config.iface_name
                    );
                    self.lease = None;
                    self.enter_selecting(pending, now)
                }
            },
            DhcpV6State::Reboot { mut trans } => {
                match trans.next_timeout(now) {
                    Some(wait) => {
                        self.send_transaction(&trans, now);
                        self.deadline = Some(now + wait);
                        self.state = DhcpV6State::Reboot { trans };
                        Ok(())
                    }
                    None => {
                        log::info!(
                            "No Reply for Confirm on {}, discarding \
                            cached lease",
                            self.config.iface_name
                        );
                        self.lease = None;
                        self.enter_selecting(
                            DhcpV6AdvertiseBuffer::new(),
                            now,
                        )
                    }
                }
            }
            DhcpV6State::Bound => self.handle_bound_timer(now, reports),
            DhcpV6State::Renewing { mut trans } => {
                if self.lease_is_expired(now) {
                    return self.expire_lease(reports);
                }
                match trans.next_timeout(now) {
                    Some(wait) => {
                        self.send_transaction(&trans, now);
                        self.deadline = Some(now + wait);
                        self.state = DhcpV6State::Renewing { trans };
                        Ok(())
                    }
                    // T2 reached without a Reply.
                    None => self.enter_rebinding(now),
                }
            }
            DhcpV6State::Rebinding { mut trans } => {
                if self.lease_is_expired(now) {
                    return self.expire_lease(reports);
                }
                match trans.next_timeout(now) {
                    Some(wait) => {
                        self.send_transaction(&trans, now);
                        self.deadline = Some(now + wait);
                        self.state = DhcpV6State::Rebinding { trans };
                        Ok(())
                    }
                    None => self.expire_lease(reports),
                }
            }
            DhcpV6State::RenewRequested { mut trans } => {
                if self.lease_is_expired(now) {
                    return self.expire_lease(reports);
                }
                match trans.next_timeout(now) {
                    Some(wait) => {
                        self.send_transaction(&trans, now);
                        self.deadline = Some(now + wait);
                        self.state = DhcpV6State::RenewRequested { trans };
                        Ok(())
                    }
                    None => {
                        // The lease is still good; give up on the
                        // early renew and fall back to the T1/T2
                        // schedule.
                        log::info!(
                            "User-requested Renew on {} went \
                            unanswered, returning to BOUND",
                            self.config.iface_name
                        );
                        self.state = DhcpV6State::Bound;
                        self.arm_bound_deadline(now, reports)
                    }
                }
            }
            DhcpV6State::RequestingInfo { mut trans } => {
                match trans.next_timeout(now) {
                    Some(wait) => {
                        self.send_transaction(&trans, now);
                        self.deadline = Some(now + wait);
                        self.state = DhcpV6State::RequestingInfo { trans };
                        Ok(())
                    }
                    None => Err(DhcpError::new(
                        ErrorKind::Bug,
                        "Unbounded Information-request ran out of budget"
                            .to_string(),
                    )),
                }
            }
            DhcpV6State::Released {
                trans: Some(mut trans),
                released_lease,
            } => match trans.next_timeout(now) {
                Some(wait) => {
                    self.send_transaction(&trans, now);
                    self.deadline = Some(now + wait);
                    self.state = DhcpV6State::Released {
                        trans: Some(trans),
                        released_lease,
                    };
                    Ok(())
                }
                None => {
                    log::debug!(
                        "Release on {} retransmitted to MRC, done",
                        self.config.iface_name
                    );
                    self.deadline = None;
                    self.state = DhcpV6State::Released {
                        trans: None,
                        released_lease: None,
                    };
                    Ok(())
                }
            },
            state => {
                // A cancelled timer can still fire once.
                log::debug!(
                    "Spurious timer in state {} on {}",
                    state.name(),
                    self.config.iface_name
                );
                self.state = state;
                self.deadline = None;
                Ok(())
            }
        }
    }

    /// The BOUND deadline re-derives its meaning from monotonic
    /// elapsed time instead of trusting why it was armed, so a wall
    /// clock jump (suspend/resume) cannot renew an already expired
    /// lease.
    fn handle_bound_timer(
        &mut self,
        now: Instant,
        reports: &mut Vec<DhcpV6LeaseEvent>,
    ) -> Result<(), DhcpError> {
        if self.config.mode == DhcpV6Mode::InfoOnly {
            return self.enter_requesting_info(now);
        }
        let lease = match self.lease.as_ref() {
            Some(l) => l,
            None => {
                return Err(DhcpError::new(
                    ErrorKind::Bug,
                    "BOUND without lease in handle_bound_timer()"
                        .to_string(),
                ));
            }
        };
        if lease.is_expired(now) {
            self.expire_lease(reports)
        } else if now >= lease.t2_deadline() {
            self.enter_rebinding(now)
        } else if now >= lease.t1_deadline() {
            self.enter_renewing(now)
        } else {
            // Early fire (test injection); keep waiting for T1.
            self.state = DhcpV6State::Bound;
            self.deadline = Some(lease.t1_deadline());
            Ok(())
        }
    }

    fn handle_rx(
        &mut self,
        msg: DhcpV6Message,
        now: Instant,
        queue: &mut VecDeque<DhcpV6Event>,
    ) -> Result<(), DhcpError> {
        match std::mem::take(&mut self.state) {
            DhcpV6State::Selecting {
                trans,
                mut pending,
            } => match msg.msg_type {
                DhcpV6MessageType::Advertise => {
                    let collected =
                        self.collect_advertise(&msg, &mut pending, now);
                    if collected && msg.preference() == u8::MAX {
                        if let Some(candidate) = pending.pick_best() {
                            // Preference 255 short-circuits the
                            // first-RT wait.
                            return self
                                .enter_requesting(candidate, pending, now);
                        }
                    }
                    self.state = DhcpV6State::Selecting { trans, pending };
                    Ok(())
                }
                DhcpV6MessageType::Reply
                    if msg.rapid_commit && self.config.rapid_commit =>
                {
                    match DhcpV6Lease::try_from_msg(&msg, true, now) {
                        Ok(candidate) => {
                            self.enter_validating(candidate, now, queue)
                        }
                        Err(e) => {
                            log::info!(
                                "Ignoring rapid-commit Reply on {}: {e}",
                                self.config.iface_name
                            );
                            self.state =
                                DhcpV6State::Selecting { trans, pending };
                            Ok(())
                        }
                    }
                }
                _ => {
                    log::debug!(
                        "Ignoring {} while SELECTING",
                        msg.msg_type
                    );
                    self.state = DhcpV6State::Selecting { trans, pending };
                    Ok(())
                }
            },
            DhcpV6State::Requesting {
                trans,
                candidate,
                mut pending,
            } => {
                if msg.msg_type != DhcpV6MessageType::Reply {
                    log::debug!(
                        "Ignoring {} while REQUESTING",
                        msg.msg_type
                    );
                    self.state = DhcpV6State::Requesting {
                        trans,
                        candidate,
                        pending,
                    };
                    return Ok(());
                }
                match msg.effective_status() {
                    DhcpV6StatusCode::Success => {
                        match DhcpV6Lease::try_from_msg(&msg, true, now) {
                            Ok(granted) => {
                                self.enter_validating(granted, now, queue)
                            }
                            Err(e) => {
                                log::info!(
                                    "Ignoring unusable Reply on {}: {e}",
                                    self.config.iface_name
                                );
                                self.state = DhcpV6State::Requesting {
                                    trans,
                                    candidate,
                                    pending,
                                };
                                Ok(())
                            }
                        }
                    }
                    DhcpV6StatusCode::NotOnLink => {
                        log::info!(
                            "Server says NotOnLink on {}, restarting \
                            server discovery",
                            self.config.iface_name
                        );
                        self.lease = None;
                        self.enter_selecting(
                            DhcpV6AdvertiseBuffer::new(),
                            now,
                        )
                    }
                    DhcpV6StatusCode::NoAddrsAvail
                    | DhcpV6StatusCode::NoBinding => {
                        pending.exclude(&candidate.server_duid);
                        match pending.pick_best() {
                            Some(next) => {
                                log::info!(
                                    "Server out of addresses on {}, \
                                    trying next Advertise",
                                    self.config.iface_name
                                );
                                self.enter_requesting(next, pending, now)
                            }
                            None => self.enter_selecting(pending, now),
                        }
                    }
                    DhcpV6StatusCode::UseMulticast => {
                        self.redirect_to_multicast(
                            trans,
                            now,
                            |trans| DhcpV6State::Requesting {
                                trans,
                                candidate,
                                pending,
                            },
                        )
                    }
                    status => {
                        log::info!(
                            "Server replied {status} on {}, waiting for \
                            retransmit",
                            self.config.iface_name
                        );
                        self.state = DhcpV6State::Requesting {
                            trans,
                            candidate,
                            pending,
                        };
                        Ok(())
                    }
                }
            }
            DhcpV6State::Reboot { trans } => {
                if msg.msg_type != DhcpV6MessageType::Reply {
                    self.state = DhcpV6State::Reboot { trans };
                    return Ok(());
                }
                match msg.effective_status() {
                    DhcpV6StatusCode::Success => {
                        let cached = match self.lease.clone() {
                            Some(l) => l,
                            None => {
                                return Err(DhcpError::new(
                                    ErrorKind::Bug,
                                    "REBOOT without cached lease"
                                        .to_string(),
                                ));
                            }
                        };
                        self.enter_validating(cached, now, queue)
                    }
                    status => {
                        log::info!(
                            "Confirm rejected with {status} on {}, \
                            discarding cached lease",
                            self.config.iface_name
                        );
                        self.lease = None;
                        self.enter_selecting(
                            DhcpV6AdvertiseBuffer::new(),
                            now,
                        )
                    }
                }
            }
            DhcpV6State::Renewing { trans } => self.handle_refresh_reply(
                msg,
                trans,
                now,
                queue,
                RefreshKind::Renew,
            ),
            DhcpV6State::RenewRequested { trans } => self
                .handle_refresh_reply(
                    msg,
                    trans,
                    now,
                    queue,
                    RefreshKind::RenewRequested,
                ),
            DhcpV6State::Rebinding { trans } => self.handle_refresh_reply(
                msg,
                trans,
                now,
                queue,
                RefreshKind::Rebind,
            ),
            DhcpV6State::RequestingInfo { trans } => {
                if msg.msg_type != DhcpV6MessageType::Reply {
                    self.state = DhcpV6State::RequestingInfo { trans };
                    return Ok(());
                }
                match msg.effective_status() {
                    DhcpV6StatusCode::Success => {
                        match DhcpV6Lease::try_from_msg(&msg, false, now) {
                            Ok(candidate) => self
                                .enter_validating(candidate, now, queue),
                            Err(e) => {
                                log::info!(
                                    "Ignoring Information-request Reply \
                                    on {}: {e}",
                                    self.config.iface_name
                                );
                                self.state =
                                    DhcpV6State::RequestingInfo { trans };
                                Ok(())
                            }
                        }
                    }
                    status => {
                        log::info!(
                            "Information-request rejected with {status} \
                            on {}, waiting for retransmit",
                            self.config.iface_name
                        );
                        self.state = DhcpV6State::RequestingInfo { trans };
                        Ok(())
                    }
                }
            }
            DhcpV6State::Released {
                trans: Some(trans),
                released_lease,
            } => {
                if msg.msg_type != DhcpV6MessageType::Reply {
                    self.state = DhcpV6State::Released {
                        trans: Some(trans),
                        released_lease,
                    };
                    return Ok(());
                }
                // The matching Reply closes the Release exchange.
                log::debug!(
                    "Release confirmed by server on {}",
                    self.config.iface_name
                );
                self.deadline = None;
                self.state = DhcpV6State::Released {
                    trans: None,
                    released_lease: None,
                };
                Ok(())
            }
            state => {
                log::debug!(
                    "Ignoring {} in state {}",
                    msg.msg_type,
                    state.name()
                );
                self.state = state;
                Ok(())
            }
        }
    }

    /// Common Reply handling for Renew, user-requested Renew and
    /// Rebind.
    fn handle_refresh_reply(
        &mut self,
        msg: DhcpV6Message,
        trans: DhcpV6Transaction,
        now: Instant,
        queue: &mut VecDeque<DhcpV6Event>,
        kind: RefreshKind,
    ) -> Result<(), DhcpError> {
        let restore = move |trans: DhcpV6Transaction| match kind {
            RefreshKind::Renew => DhcpV6State::Renewing { trans },
            RefreshKind::RenewRequested => {
                DhcpV6State::RenewRequested { trans }
            }
            RefreshKind::Rebind => DhcpV6State::Rebinding { trans },
        };
        if msg.msg_type != DhcpV6MessageType::Reply {
            log::debug!("Ignoring {} while refreshing", msg.msg_type);
            self.state = restore(trans);
            return Ok(());
        }
        match msg.effective_status() {
            DhcpV6StatusCode::Success => {
                match DhcpV6Lease::try_from_msg(&msg, true, now) {
                    Ok(granted) => {
                        self.enter_validating(granted, now, queue)
                    }
                    Err(e) => {
                        log::info!(
                            "Ignoring unusable refresh Reply on {}: {e}",
                            self.config.iface_name
                        );
                        self.state = restore(trans);
                        Ok(())
                    }
                }
            }
            DhcpV6StatusCode::NoBinding => {
                // RFC 8415 18.2.10.1: fall back to Request for the
                // same lease.
                let lease = match self.lease.clone() {
                    Some(l) => l,
                    None => {
                        return Err(DhcpError::new(
                            ErrorKind::Bug,
                            "Refreshing without lease".to_string(),
                        ));
                    }
                };
                log::info!(
                    "Server lost our binding on {}, re-requesting lease",
                    self.config.iface_name
                );
                self.enter_requesting(
                    lease,
                    DhcpV6AdvertiseBuffer::new(),
                    now,
                )
            }
            DhcpV6StatusCode::UseMulticast => {
                self.redirect_to_multicast(trans, now, restore)
            }
            status => {
                log::info!(
                    "Refresh rejected with {status} on {}, waiting for \
                    retransmit",
                    self.config.iface_name
                );
                self.state = restore(trans);
                Ok(())
            }
        }
    }

    fn handle_lease_applied(
        &mut self,
        outcome: DhcpV6ApplyOutcome,
        now: Instant,
        reports: &mut Vec<DhcpV6LeaseEvent>,
    ) -> Result<(), DhcpError> {
        let mut candidate = match std::mem::take(&mut self.state) {
            DhcpV6State::Validating { candidate } => candidate,
            state => {
                log::warn!(
                    "Ignoring applier outcome in state {}",
                    state.name()
                );
                self.state = state;
                return Ok(());
            }
        };
        match outcome {
            DhcpV6ApplyOutcome::Applied => {
                candidate.state = DhcpV6LeaseState::Applied;
                if let Some(old) = self.lease.take() {
                    let removed = old.removed_addrs(&candidate);
                    if !removed.is_empty() {
                        // The OS must drop addresses the new lease no
                        // longer carries.
                        let mut gone = old.clone();
                        gone.addrs.retain(|a| removed.contains(&a.addr));
                        self.applier
                            .withdraw(self.config.iface_index, &gone);
                    }
                }
                if let Err(e) = self
                    .applier
                    .cache_put(self.config.iface_index, &candidate)
                {
                    log::warn!(
                        "Failed to cache lease for {}: {e}",
                        self.config.iface_name
                    );
                }
                reports.push(DhcpV6LeaseEvent::LeaseAcquired(
                    candidate.clone(),
                ));
                self.state = DhcpV6State::Bound;
                self.lease = Some(candidate);
                self.arm_bound_deadline(now, reports)
            }
            DhcpV6ApplyOutcome::DadConflict(addrs) => {
                log::warn!(
                    "Duplicate address detection failed on {} for \
                    {addrs:?}, declining",
                    self.config.iface_name
                );
                self.send_decline(&candidate, &addrs, now);
                let mut pending = DhcpV6AdvertiseBuffer::new();
                pending.exclude(&candidate.server_duid);
                self.lease = None;
                self.enter_selecting(pending, now)
            }
            DhcpV6ApplyOutcome::IoError(reason) => {
                log::error!(
                    "Failed to apply lease on {}: {reason}",
                    self.config.iface_name
                );
                self.lease = None;
                self.deadline = None;
                reports.push(DhcpV6LeaseEvent::LeaseLost(
                    DhcpV6LeaseLostReason::ApplyFailure,
                ));
                self.state = DhcpV6State::Init;
                Ok(())
            }
        }
    }

    /// BOUND deadline: T1 for managed leases, the information refresh
    /// time for info-only, whichever lease milestone is still ahead
    /// when re-entering late.
    fn arm_bound_deadline(
        &mut self,
        now: Instant,
        reports: &mut Vec<DhcpV6LeaseEvent>,
    ) -> Result<(), DhcpError> {
        let lease = match self.lease.as_ref() {
            Some(l) => l,
            None => {
                return Err(DhcpError::new(
                    ErrorKind::Bug,
                    "BOUND without lease in arm_bound_deadline()"
                        .to_string(),
                ));
            }
        };
        if self.config.mode == DhcpV6Mode::InfoOnly
            || lease.addrs.is_empty()
        {
            self.deadline = Some(lease.info_refresh_deadline());
            return Ok(());
        }
        match lease.expires_at(now) {
            Some(deadline) => {
                self.deadline = Some(deadline);
                Ok(())
            }
            None => self.expire_lease(reports),
        }
    }

    fn lease_is_expired(&self, now: Instant) -> bool {
        self.lease.as_ref().map_or(false, |l| l.is_expired(now))
    }

    fn expire_lease(
        &mut self,
        reports: &mut Vec<DhcpV6LeaseEvent>,
    ) -> Result<(), DhcpError> {
        if let Some(lease) = self.lease.take() {
            log::info!(
                "Lease on {} expired, withdrawing {} address(es)",
                self.config.iface_name,
                lease.addrs.len()
            );
            self.applier.withdraw(self.config.iface_index, &lease);
            reports.push(DhcpV6LeaseEvent::LeaseLost(
                DhcpV6LeaseLostReason::Expired,
            ));
        }
        self.deadline = None;
        self.state = DhcpV6State::Init;
        Ok(())
    }

    fn enter_selecting(
        &mut self,
        pending: DhcpV6AdvertiseBuffer,
        now: Instant,
    ) -> Result<(), DhcpError> {
        self.lease = None;
        let msg = self.build_outbound(
            DhcpV6MessageType::Solicit,
            None,
            Some(self.empty_ia()),
        );
        let mut trans = DhcpV6Transaction::new(
            DhcpV6TransactionKind::Solicit,
            msg,
            ALL_DHCP_RELAY_AGENTS_AND_SERVERS,
            DhcpV6RetransParams::solicit(),
            now,
        );
        log::info!(
            "Starting DHCPv6 server discovery on {}",
            self.config.iface_name
        );
        self.send_transaction(&trans, now);
        self.deadline = Some(now + trans.first_timeout());
        self.state = DhcpV6State::Selecting { trans, pending };
        Ok(())
    }

    fn enter_requesting(
        &mut self,
        candidate: DhcpV6Lease,
        pending: DhcpV6AdvertiseBuffer,
        now: Instant,
    ) -> Result<(), DhcpError> {
        let msg = self.build_outbound(
            DhcpV6MessageType::Request,
            Some(candidate.server_duid.clone()),
            Some(self.lease_ia(&candidate)),
        );
        let mut trans = DhcpV6Transaction::new(
            DhcpV6TransactionKind::Request,
            msg,
            ALL_DHCP_RELAY_AGENTS_AND_SERVERS,
            DhcpV6RetransParams::request(),
            now,
        );
        log::info!(
            "Requesting lease on {} from server {:?}",
            self.config.iface_name,
            candidate.server_duid
        );
        self.send_transaction(&trans, now);
        self.deadline = Some(now + trans.first_timeout());
        self.state = DhcpV6State::Requesting {
            trans,
            candidate,
            pending,
        };
        Ok(())
    }

    fn enter_reboot(
        &mut self,
        cached: DhcpV6Lease,
        now: Instant,
    ) -> Result<(), DhcpError> {
        let msg = self.build_outbound(
            DhcpV6MessageType::Confirm,
            None,
            Some(self.lease_ia(&cached)),
        );
        let mut trans = DhcpV6Transaction::new(
            DhcpV6TransactionKind::Confirm,
            msg,
            ALL_DHCP_RELAY_AGENTS_AND_SERVERS,
            DhcpV6RetransParams::confirm(),
            now,
        );
        log::info!(
            "Confirming cached lease on {}",
            self.config.iface_name
        );
        self.send_transaction(&trans, now);
        self.deadline = Some(now + trans.first_timeout());
        self.lease = Some(cached);
        self.state = DhcpV6State::Reboot { trans };
        Ok(())
    }

    fn enter_renewing(&mut self, now: Instant) -> Result<(), DhcpError> {
        let (mut trans, unicast) = self.new_refresh_transaction(
            DhcpV6TransactionKind::Renew,
            now,
        )?;
        log::info!(
            "Renewing lease on {} ({})",
            self.config.iface_name,
            if unicast { "unicast" } else { "multicast" }
        );
        self.send_transaction(&trans, now);
        self.deadline = Some(now + trans.first_timeout());
        self.state = DhcpV6State::Renewing { trans };
        Ok(())
    }

    fn enter_renew_requested(
        &mut self,
        now: Instant,
    ) -> Result<(), DhcpError> {
        let (mut trans, _) = self.new_refresh_transaction(
            DhcpV6TransactionKind::Renew,
            now,
        )?;
        log::info!(
            "User requested early renew on {}",
            self.config.iface_name
        );
        self.send_transaction(&trans, now);
        self.deadline = Some(now + trans.first_timeout());
        self.state = DhcpV6State::RenewRequested { trans };
        Ok(())
    }

    fn enter_rebinding(&mut self, now: Instant) -> Result<(), DhcpError> {
        let (mut trans, _) = self.new_refresh_transaction(
            DhcpV6TransactionKind::Rebind,
            now,
        )?;
        log::info!(
            "Rebinding lease on {} with any server",
            self.config.iface_name
        );
        self.send_transaction(&trans, now);
        self.deadline = Some(now + trans.first_timeout());
        self.state = DhcpV6State::Rebinding { trans };
        Ok(())
    }

    /// Build the Renew or Rebind exchange for the current lease.
    /// Renew goes to the leasing server (unicast when the server
    /// offered it), Rebind to any server; MRD is whatever remains
    /// until T2 respectively the valid-lifetime expiry.
    fn new_refresh_transaction(
        &mut self,
        kind: DhcpV6TransactionKind,
        now: Instant,
    ) -> Result<(DhcpV6Transaction, bool), DhcpError> {
        let lease = match self.lease.as_ref() {
            Some(l) => l,
            None => {
                return Err(DhcpError::new(
                    ErrorKind::Bug,
                    format!("No lease for {kind} transaction"),
                ));
            }
        };
        let (msg_type, server_duid, mrd_end, dst) = match kind {
            DhcpV6TransactionKind::Renew => (
                DhcpV6MessageType::Renew,
                Some(lease.server_duid.clone()),
                lease.t2_deadline(),
                lease.server_unicast,
            ),
            _ => (
                DhcpV6MessageType::Rebind,
                None,
                lease.expiry_deadline(),
                None,
            ),
        };
        let mrd = mrd_end.saturating_duration_since(now);
        let params = match kind {
            DhcpV6TransactionKind::Renew => DhcpV6RetransParams::renew(mrd),
            _ => DhcpV6RetransParams::rebind(mrd),
        };
        let ia = self.lease_ia(lease);
        let msg = self.build_outbound(msg_type, server_duid, Some(ia));
        let unicast = dst.is_some();
        let trans = DhcpV6Transaction::new(
            kind,
            msg,
            dst.unwrap_or(ALL_DHCP_RELAY_AGENTS_AND_SERVERS),
            params,
            now,
        );
        Ok((trans, unicast))
    }

    fn enter_released(
        &mut self,
        now: Instant,
        reports: &mut Vec<DhcpV6LeaseEvent>,
    ) -> Result<(), DhcpError> {
        let mut lease = match self.lease.take() {
            Some(l) => l,
            None => {
                return Err(DhcpError::new(
                    ErrorKind::Bug,
                    "No lease in enter_released()".to_string(),
                ));
            }
        };
        self.applier.withdraw(self.config.iface_index, &lease);
        lease.state = DhcpV6LeaseState::Released;
        let msg = self.build_outbound(
            DhcpV6MessageType::Release,
            Some(lease.server_duid.clone()),
            Some(self.lease_ia(&lease)),
        );
        let mut trans = DhcpV6Transaction::new(
            DhcpV6TransactionKind::Release,
            msg,
            lease
                .server_unicast
                .unwrap_or(ALL_DHCP_RELAY_AGENTS_AND_SERVERS),
            DhcpV6RetransParams::release(),
            now,
        );
        log::info!("Releasing lease on {}", self.config.iface_name);
        self.send_transaction(&trans, now);
        self.deadline = Some(now + trans.first_timeout());
        reports.push(DhcpV6LeaseEvent::LeaseReleased);
        self.state = DhcpV6State::Released {
            trans: Some(trans),
            released_lease: Some(lease),
        };
        Ok(())
    }

    fn enter_requesting_info(
        &mut self,
        now: Instant,
    ) -> Result<(), DhcpError> {
        let msg = self.build_outbound(
            DhcpV6MessageType::InformationRequest,
            None,
            None,
        );
        let mut trans = DhcpV6Transaction::new(
            DhcpV6TransactionKind::InformationRequest,
            msg,
            ALL_DHCP_RELAY_AGENTS_AND_SERVERS,
            DhcpV6RetransParams::info_request(),
            now,
        );
        log::info!(
            "Requesting stateless configuration on {}",
            self.config.iface_name
        );
        self.send_transaction(&trans, now);
        self.deadline = Some(now + trans.first_timeout());
        self.state = DhcpV6State::RequestingInfo { trans };
        Ok(())
    }

    fn enter_validating(
        &mut self,
        candidate: DhcpV6Lease,
        _now: Instant,
        queue: &mut VecDeque<DhcpV6Event>,
    ) -> Result<(), DhcpError> {
        self.deadline = None;
        let outcome =
            self.applier.apply(self.config.iface_index, &candidate);
        self.state = DhcpV6State::Validating { candidate };
        // The applier is synchronous; route its verdict through the
        // regular event path so a deferred applier behaves
        // identically.
        queue.push_back(DhcpV6Event::LeaseApplied(outcome));
        Ok(())
    }

    /// Re-send the transaction over multicast after a UseMulticast
    /// status, keeping xid and budget.
    fn redirect_to_multicast<F>(
        &mut self,
        mut trans: DhcpV6Transaction,
        now: Instant,
        restore: F,
    ) -> Result<(), DhcpError>
    where
        F: FnOnce(DhcpV6Transaction) -> DhcpV6State,
    {
        log::info!(
            "Server demands multicast on {}, switching",
            self.config.iface_name
        );
        trans.dst = ALL_DHCP_RELAY_AGENTS_AND_SERVERS;
        self.send_transaction(&trans, now);
        self.state = restore(trans);
        Ok(())
    }

    fn collect_advertise(
        &mut self,
        msg: &DhcpV6Message,
        pending: &mut DhcpV6AdvertiseBuffer,
        now: Instant,
    ) -> bool {
        if msg.effective_status() != DhcpV6StatusCode::Success {
            log::debug!(
                "Ignoring Advertise with status {} on {}",
                msg.effective_status(),
                self.config.iface_name
            );
            return false;
        }
        match DhcpV6Lease::try_from_msg(msg, true, now) {
            Ok(candidate) => {
                log::debug!(
                    "Collected Advertise preference {} from {:?}",
                    candidate.preference,
                    candidate.server_duid
                );
                let barred = pending.is_excluded(&candidate.server_duid);
                pending.insert(candidate);
                !barred
            }
            Err(e) => {
                log::debug!(
                    "Ignoring unusable Advertise on {}: {e}",
                    self.config.iface_name
                );
                false
            }
        }
    }

    /// Fire-and-forget Decline of addresses that failed duplicate
    /// address detection. RFC 8415 allows terminating the Decline
    /// retransmission early; one transmission is enough to mark the
    /// addresses at the server before discovery restarts.
    fn send_decline(
        &mut self,
        candidate: &DhcpV6Lease,
        conflict_addrs: &[Ipv6Addr],
        now: Instant,
    ) {
        let mut ia = self.lease_ia(candidate);
        ia.addrs.retain(|a| conflict_addrs.contains(&a.addr));
        let msg = self.build_outbound(
            DhcpV6MessageType::Decline,
            Some(candidate.server_duid.clone()),
            Some(ia),
        );
        let trans = DhcpV6Transaction::new(
            DhcpV6TransactionKind::Decline,
            msg,
            ALL_DHCP_RELAY_AGENTS_AND_SERVERS,
            DhcpV6RetransParams::release(),
            now,
        );
        self.send_transaction(&trans, now);
    }

    fn empty_ia(&self) -> DhcpV6MessageIaNa {
        DhcpV6MessageIaNa {
            iaid: self.config.ia_id,
            t1: 0,
            t2: 0,
            addrs: Vec::new(),
            status: None,
        }
    }

    fn lease_ia(&self, lease: &DhcpV6Lease) -> DhcpV6MessageIaNa {
        DhcpV6MessageIaNa {
            iaid: lease.ia_id,
            t1: 0,
            t2: 0,
            addrs: lease.addrs.clone(),
            status: None,
        }
    }

    fn build_outbound(
        &self,
        msg_type: DhcpV6MessageType,
        server_duid: Option<Vec<u8>>,
        ia_na: Option<DhcpV6MessageIaNa>,
    ) -> DhcpV6OutboundMessage {
        let oro = match msg_type {
            DhcpV6MessageType::Release
            | DhcpV6MessageType::Decline
            | DhcpV6MessageType::Confirm => Vec::new(),
            _ => self.config.request_opts.clone(),
        };
        DhcpV6OutboundMessage {
            msg_type,
            xid: gen_xid(),
            elapsed_time: 0,
            client_duid: self.config.duid.to_vec(),
            server_duid,
            ia_na,
            oro,
            rapid_commit: msg_type == DhcpV6MessageType::Solicit
                && self.config.rapid_commit,
            user_class: self.config.user_class.clone(),
            vendor_class: self.config.vendor_class.clone(),
            fqdn: self.config.hostname.clone(),
        }
    }

    /// Encode and hand the current transaction message to the link
    /// manager. Elapsed Time reflects the age of the transaction; a
    /// send failure is transient and the armed RT covers the retry.
    fn send_transaction(&self, trans: &DhcpV6Transaction, now: Instant) {
        let mut msg = trans.msg.clone();
        msg.elapsed_time = if trans.rc == 0 {
            0
        } else {
            trans.elapsed_hundredths(now)
        };
        let payload = match self.codec.encode(&msg) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!(
                    "Failed to encode {} on {}: {e}",
                    msg.msg_type,
                    self.config.iface_name
                );
                return;
            }
        };
        if let Err(e) =
            self.transport
                .send(self.config.iface_index, trans.dst, &payload)
        {
            log::warn!(
                "Failed to send {} on {}: {e}, will retry at next RT",
                msg.msg_type,
                self.config.iface_name
            );
        }
    }
}

/// Which refresh exchange a Reply belongs to; they only differ in the
/// state they fall back to.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum RefreshKind {
    Renew,
    RenewRequested,
    Rebind,
}
