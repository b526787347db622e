// SPDX-License-Identifier: Apache-2.0

use std::os::fd::RawFd;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Instant;

use crate::{
    event::DhcpEventPool, DhcpError, DhcpV6Device, DhcpV6Event,
    DhcpV6IoEvent, DhcpV6LeaseEvent, DhcpV6Mode, DhcpV6Transport,
};

/// Blocking runner for one device: multiplexes the link-manager
/// socket and the device deadline over epoll, and feeds the device
/// one event at a time. Timer fires that race event processing are
/// simply picked up at the next poll.
///
/// ```no_run
/// # fn run(mut cli: mirid::DhcpV6Client) -> Result<(), mirid::DhcpError> {
/// loop {
///     for event in cli.poll(5)? {
///         for report in cli.process(event)? {
///             println!("lease event: {report}");
///         }
///     }
/// }
/// # }
/// ```
pub struct DhcpV6Client {
    device: DhcpV6Device,
    event_pool: DhcpEventPool,
    transport: Arc<dyn DhcpV6Transport>,
    armed_deadline: Option<Instant>,
}

impl std::fmt::Debug for DhcpV6Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhcpV6Client")
            .field("device", &self.device)
            .field("armed_deadline", &self.armed_deadline)
            .finish()
    }
}

impl AsRawFd for DhcpV6Client {
    fn as_raw_fd(&self) -> RawFd {
        self.event_pool.as_raw_fd()
    }
}

impl DhcpV6Client {
    /// `socket_fd` is the fd of the link-manager socket behind the
    /// device's transport; it is polled for readability only and
    /// stays owned by the link manager.
    pub fn init(
        device: DhcpV6Device,
        socket_fd: RawFd,
    ) -> Result<Self, DhcpError> {
        let mut event_pool = DhcpEventPool::new()?;
        event_pool.add_socket(socket_fd)?;
        let transport = device.transport_handle();
        let mut ret = Self {
            device,
            event_pool,
            transport,
            armed_deadline: None,
        };
        ret.resync_deadline(Instant::now())?;
        Ok(ret)
    }

    pub fn device(&self) -> &DhcpV6Device {
        &self.device
    }

    /// Wait up to `wait_time` seconds for I/O or timer events.
    pub fn poll(
        &self,
        wait_time: u32,
    ) -> Result<Vec<DhcpV6IoEvent>, DhcpError> {
        self.event_pool.poll(wait_time)
    }

    pub fn process(
        &mut self,
        event: DhcpV6IoEvent,
    ) -> Result<Vec<DhcpV6LeaseEvent>, DhcpError> {
        log::debug!("Processing event {:?}", event);
        let now = Instant::now();
        let mut reports = Vec::new();
        match event {
            DhcpV6IoEvent::UdpPackageIn => {
                while let Some((payload, src)) = self.transport.recv()? {
                    let (_, mut events) = self
                        .device
                        .process_client_packet(&payload, src, now)?;
                    reports.append(&mut events);
                }
            }
            DhcpV6IoEvent::TimerFired => {
                self.armed_deadline = None;
                reports.append(
                    &mut self
                        .device
                        .process(DhcpV6Event::TimerFired, now)?,
                );
            }
        }
        self.resync_deadline(now)?;
        Ok(reports)
    }

    pub fn start(
        &mut self,
        mode: DhcpV6Mode,
    ) -> Result<Vec<DhcpV6LeaseEvent>, DhcpError> {
        self.feed(DhcpV6Event::Start(mode))
    }

    pub fn stop(&mut self) -> Result<Vec<DhcpV6LeaseEvent>, DhcpError> {
        self.feed(DhcpV6Event::Stop)
    }

    pub fn renew(&mut self) -> Result<Vec<DhcpV6LeaseEvent>, DhcpError> {
        self.feed(DhcpV6Event::UserRenew)
    }

    pub fn release(&mut self) -> Result<Vec<DhcpV6LeaseEvent>, DhcpError> {
        self.feed(DhcpV6Event::UserRelease)
    }

    pub fn link_event(
        &mut self,
        up: bool,
    ) -> Result<Vec<DhcpV6LeaseEvent>, DhcpError> {
        self.feed(if up {
            DhcpV6Event::LinkUp
        } else {
            DhcpV6Event::LinkDown
        })
    }

    fn feed(
        &mut self,
        event: DhcpV6Event,
    ) -> Result<Vec<DhcpV6LeaseEvent>, DhcpError> {
        let now = Instant::now();
        let reports = self.device.process(event, now)?;
        self.resync_deadline(now)?;
        Ok(reports)
    }

    /// Mirror the device's single deadline into the timerfd. Only
    /// rearms when the deadline moved.
    fn resync_deadline(&mut self, now: Instant) -> Result<(), DhcpError> {
        let deadline = self.device.deadline();
        if deadline == self.armed_deadline {
            return Ok(());
        }
        match deadline {
            Some(deadline) => {
                self.event_pool
                    .arm_deadline(deadline.saturating_duration_since(now))?;
            }
            None => self.event_pool.cancel_deadline(),
        }
        self.armed_deadline = deadline;
        Ok(())
    }
}
