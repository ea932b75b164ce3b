use std::collections::VecDeque;
use std::os::fd::{AsRawFd, OwnedFd};

use tracing::{debug, warn};

/// Capacity of the received-descriptor queue.
pub const MAX_PENDING_FDS: usize = 5;

/// Bounded FIFO of descriptors received out-of-band and not yet claimed.
///
/// Descriptors are owned by the queue; anything still queued is closed when
/// the queue is cleared or dropped.
#[derive(Debug, Default)]
pub struct DescriptorQueue {
    fds: VecDeque<OwnedFd>,
}

impl DescriptorQueue {
    pub fn new() -> Self {
        Self {
            fds: VecDeque::with_capacity(MAX_PENDING_FDS),
        }
    }

    /// Queue a newly received descriptor.
    ///
    /// When the queue is already full the new descriptor is closed at once
    /// and `false` is returned.
    pub fn push(&mut self, fd: OwnedFd) -> bool {
        if self.fds.len() >= MAX_PENDING_FDS {
            warn!(fd = fd.as_raw_fd(), "too many pending descriptors; closing");
            drop(fd);
            return false;
        }
        debug!(fd = fd.as_raw_fd(), queued = self.fds.len() + 1, "descriptor received");
        self.fds.push_back(fd);
        true
    }

    /// Take the oldest unclaimed descriptor.
    pub fn pop(&mut self) -> Option<OwnedFd> {
        self.fds.pop_front()
    }

    /// Close every unclaimed descriptor.
    pub fn clear(&mut self) {
        for fd in self.fds.drain(..) {
            debug!(fd = fd.as_raw_fd(), "closing unclaimed descriptor");
        }
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }
}
