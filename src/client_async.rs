// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::os::fd::BorrowedFd;
use std::os::unix::io::{AsRawFd, RawFd};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::{
    task::{Context, Poll, Waker},
    Stream,
};
use nix::poll::{PollFd, PollFlags};

use crate::{DhcpError, DhcpV6Client, DhcpV6LeaseEvent};

// How often the notifier thread re-checks its stop flag while the
// epoll fd is quiet, in milliseconds.
const NOTIFY_TICK: u16 = 250;

/// Async facade over [DhcpV6Client]: a stream of lease events. A
/// notifier thread watches the client's epoll fd and wakes the
/// registered task; all protocol work stays on the polling task.
pub struct DhcpV6ClientAsync {
    // Declared before `client` so the notifier thread is joined
    // before the epoll fd it watches is closed.
    notifier: WakeNotifier,
    client: DhcpV6Client,
    queued: VecDeque<DhcpV6LeaseEvent>,
}

impl std::fmt::Debug for DhcpV6ClientAsync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhcpV6ClientAsync")
            .field("client", &self.client)
            .field("queued", &self.queued.len())
            .finish()
    }
}

impl Stream for DhcpV6ClientAsync {
    type Item = Result<DhcpV6LeaseEvent, DhcpError>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        if let Some(report) = self.queued.pop_front() {
            return Poll::Ready(Some(Ok(report)));
        }
        // Drain whatever is already pending without blocking.
        match self.client.poll(0) {
            Ok(events) => {
                for event in events {
                    match self.client.process(event) {
                        Ok(reports) => self.queued.extend(reports),
                        Err(e) => return Poll::Ready(Some(Err(e))),
                    }
                }
            }
            Err(e) => {
                log::error!("DHCP client poll error: {e}");
                return Poll::Ready(Some(Err(e)));
            }
        }
        if let Some(report) = self.queued.pop_front() {
            return Poll::Ready(Some(Ok(report)));
        }
        // Register after draining: anything that raced us keeps the
        // epoll fd readable, so the notifier still fires.
        self.notifier.register(cx.waker());
        Poll::Pending
    }
}

impl DhcpV6ClientAsync {
    pub fn init(client: DhcpV6Client) -> Self {
        let notifier = WakeNotifier::spawn(client.as_raw_fd());
        Self {
            notifier,
            client,
            queued: VecDeque::new(),
        }
    }

    pub fn client_mut(&mut self) -> &mut DhcpV6Client {
        &mut self.client
    }
}

/// Watches one fd from a helper thread and wakes the registered task
/// whenever the fd turns readable. The thread is stopped and joined
/// on drop.
struct WakeNotifier {
    waker: Arc<Mutex<Option<Waker>>>,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl WakeNotifier {
    fn spawn(fd: RawFd) -> Self {
        let waker: Arc<Mutex<Option<Waker>>> = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));
        let thread = std::thread::spawn({
            let waker = waker.clone();
            let stop = stop.clone();
            move || watch_fd(fd, &waker, &stop)
        });
        Self {
            waker,
            stop,
            thread: Some(thread),
        }
    }

    fn register(&self, waker: &Waker) {
        match self.waker.lock() {
            Ok(mut slot) => *slot = Some(waker.clone()),
            Err(e) => {
                log::error!("Wake notifier lock poisoned: {e}");
            }
        }
    }
}

impl Drop for WakeNotifier {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

fn watch_fd(fd: RawFd, waker: &Mutex<Option<Waker>>, stop: &AtomicBool) {
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    while !stop.load(Ordering::Relaxed) {
        let mut poll_fds = [PollFd::new(fd, PollFlags::POLLIN)];
        match nix::poll::poll(&mut poll_fds, NOTIFY_TICK) {
            // Quiet tick; only the stop flag to re-check.
            Ok(0) => (),
            Ok(_) => {
                let woke = match waker.lock() {
                    Ok(mut slot) => {
                        slot.take().map(|waker| waker.wake()).is_some()
                    }
                    Err(_) => return,
                };
                if !woke {
                    // No task registered while the fd stays readable;
                    // back off instead of spinning until the next
                    // poll_next() consumes it.
                    std::thread::sleep(std::time::Duration::from_millis(
                        NOTIFY_TICK.into(),
                    ));
                }
            }
            Err(nix::errno::Errno::EINTR) => (),
            Err(e) => {
                log::error!("Wake notifier cannot poll fd: {e}");
                return;
            }
        }
    }
}
