// SPDX-License-Identifier: Apache-2.0

use std::os::fd::BorrowedFd;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};

use crate::{
    applier::DhcpV6ApplyOutcome, msg::DhcpV6Message, time::DhcpTimerFd,
    DhcpError, DhcpV6Lease, DhcpV6Mode, ErrorKind,
};

/// Everything the FSM consumes. The supervisor feeds link and user
/// events; the runner feeds timer fires and inbound messages; the
/// applier outcome loops back in as `LeaseApplied`.
#[derive(Debug, PartialEq, Clone)]
#[non_exhaustive]
pub enum DhcpV6Event {
    LinkUp,
    LinkDown,
    Start(DhcpV6Mode),
    Stop,
    TimerFired,
    RxMessage(DhcpV6Message),
    UserRenew,
    UserRelease,
    LeaseApplied(DhcpV6ApplyOutcome),
}

impl std::fmt::Display for DhcpV6Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LinkUp => write!(f, "link_up"),
            Self::LinkDown => write!(f, "link_down"),
            Self::Start(mode) => write!(f, "start({mode})"),
            Self::Stop => write!(f, "stop"),
            Self::TimerFired => write!(f, "timer_fired"),
            Self::RxMessage(msg) => {
                write!(f, "rx_message({})", msg.msg_type)
            }
            Self::UserRenew => write!(f, "user_renew"),
            Self::UserRelease => write!(f, "user_release"),
            Self::LeaseApplied(outcome) => {
                write!(f, "lease_applied({outcome:?})")
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[non_exhaustive]
pub enum DhcpV6LeaseLostReason {
    /// Retransmission budget ran out without a server answering.
    Timeout,
    /// All valid lifetimes elapsed.
    Expired,
    /// The lease applier failed to install the lease.
    ApplyFailure,
}

impl std::fmt::Display for DhcpV6LeaseLostReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Expired => write!(f, "expired"),
            Self::ApplyFailure => write!(f, "apply"),
        }
    }
}

/// Lease lifecycle notifications surfaced to the supervisor. Leases
/// in events are immutable snapshots; the device keeps the one
/// mutable copy.
#[derive(Debug, PartialEq, Clone)]
#[non_exhaustive]
pub enum DhcpV6LeaseEvent {
    LeaseAcquired(DhcpV6Lease),
    LeaseReleased,
    LeaseLost(DhcpV6LeaseLostReason),
}

impl std::fmt::Display for DhcpV6LeaseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LeaseAcquired(_) => write!(f, "lease_acquired"),
            Self::LeaseReleased => write!(f, "lease_released"),
            Self::LeaseLost(reason) => {
                write!(f, "lease_lost({reason})")
            }
        }
    }
}

/// What the runner's poll loop can wake up for.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum DhcpV6IoEvent {
    UdpPackageIn,
    TimerFired,
}

/// Per-device poll multiplexer: the link-manager socket plus the
/// single one-shot deadline timerfd behind one epoll fd.
///
/// Each registered fd doubles as its own epoll token; with at most
/// two of them there is nothing more to demultiplex.
#[derive(Debug)]
pub(crate) struct DhcpEventPool {
    deadline_fd: Option<DhcpTimerFd>,
    socket_fd: Option<RawFd>,
    epoll: Epoll,
}

impl AsRawFd for DhcpEventPool {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll.0.as_raw_fd()
    }
}

impl Drop for DhcpEventPool {
    fn drop(&mut self) {
        self.remove_all_event();
    }
}

impl DhcpEventPool {
    pub(crate) fn new() -> Result<Self, DhcpError> {
        let epoll = Epoll::new(EpollCreateFlags::empty()).map_err(|e| {
            let e = DhcpError::new(
                ErrorKind::Bug,
                format!("Failed to create epoll: {e}"),
            );
            log::error!("{e}");
            e
        })?;
        Ok(Self {
            deadline_fd: None,
            socket_fd: None,
            epoll,
        })
    }

    pub(crate) fn remove_all_event(&mut self) {
        if let Some(timer_fd) = self.deadline_fd.take() {
            self.unwatch(timer_fd.as_raw_fd());
        }
        if let Some(fd) = self.socket_fd.take() {
            self.unwatch(fd);
        }
    }

    pub(crate) fn add_socket(&mut self, fd: RawFd) -> Result<(), DhcpError> {
        log::debug!("Watching link manager socket {fd}");
        self.watch(fd)?;
        self.socket_fd = Some(fd);
        Ok(())
    }

    /// (Re)arm the single deadline. Any previous deadline is
    /// cancelled first.
    pub(crate) fn arm_deadline(
        &mut self,
        timeout: Duration,
    ) -> Result<(), DhcpError> {
        self.cancel_deadline();
        log::debug!(
            "Arming deadline in {} milliseconds",
            timeout.as_millis()
        );
        let timer_fd = DhcpTimerFd::new(timeout)?;
        self.watch(timer_fd.as_raw_fd())?;
        self.deadline_fd = Some(timer_fd);
        Ok(())
    }

    pub(crate) fn cancel_deadline(&mut self) {
        if let Some(timer_fd) = self.deadline_fd.take() {
            self.unwatch(timer_fd.as_raw_fd());
        }
    }

    /// Block until the socket or the deadline is ready, at most
    /// `wait_time` seconds per call (capped at u16::MAX milliseconds;
    /// runners poll in a loop anyway).
    pub(crate) fn poll(
        &self,
        wait_time: u32,
    ) -> Result<Vec<DhcpV6IoEvent>, DhcpError> {
        let timeout_ms = u16::try_from(wait_time.saturating_mul(1000))
            .unwrap_or(u16::MAX);
        // One slot per registered fd.
        let mut ready = [EpollEvent::empty(); 2];
        let count = loop {
            match self.epoll.wait(&mut ready, timeout_ms) {
                Ok(count) => break count,
                // Signals just restart the wait.
                Err(nix::errno::Errno::EINTR) => (),
                Err(e) => {
                    return Err(DhcpError::new(
                        ErrorKind::Bug,
                        format!("epoll_wait() failed: {e}"),
                    ));
                }
            }
        };
        ready[..count]
            .iter()
            .map(|event| self.classify(event.data()))
            .collect()
    }

    fn classify(&self, token: u64) -> Result<DhcpV6IoEvent, DhcpError> {
        if self.socket_fd.map(|fd| fd as u64) == Some(token) {
            Ok(DhcpV6IoEvent::UdpPackageIn)
        } else if self
            .deadline_fd
            .as_ref()
            .map(|timer_fd| timer_fd.as_raw_fd() as u64)
            == Some(token)
        {
            Ok(DhcpV6IoEvent::TimerFired)
        } else {
            Err(DhcpError::new(
                ErrorKind::Bug,
                format!("Unknown epoll token {token}"),
            ))
        }
    }

    fn watch(&self, fd: RawFd) -> Result<(), DhcpError> {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let event = EpollEvent::new(EpollFlags::EPOLLIN, fd as u64);
        self.epoll.add(borrowed, event).map_err(|e| {
            let e = DhcpError::new(
                ErrorKind::Bug,
                format!("Failed to add fd {fd} to epoll: {e}"),
            );
            log::error!("{e}");
            e
        })
    }

    fn unwatch(&self, fd: RawFd) {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        if let Err(e) = self.epoll.delete(borrowed) {
            log::warn!("Failed to remove fd {fd} from epoll: {e}");
        }
    }
}
