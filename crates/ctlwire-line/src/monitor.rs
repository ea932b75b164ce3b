//! Observer hook invoked for every line read or written.

use std::ops::BitOr;

/// Which way a line is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Flags an observer returns for a line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorFlags(u8);

impl MonitorFlags {
    pub const NONE: Self = Self(0);
    /// Do not log this line.
    pub const NOLOG: Self = Self(1);
    /// Drop this line: inbound lines read as empty, outbound lines are not sent.
    pub const IGNORE: Self = Self(2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MonitorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Sees each line before it is returned to the caller or sent to the peer.
pub trait LineObserver {
    fn observe(&mut self, direction: Direction, line: &[u8]) -> MonitorFlags;
}

impl<F> LineObserver for F
where
    F: FnMut(Direction, &[u8]) -> MonitorFlags,
{
    fn observe(&mut self, direction: Direction, line: &[u8]) -> MonitorFlags {
        self(direction, line)
    }
}

/// An observer that lets every line through.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unobserved;

impl LineObserver for Unobserved {
    fn observe(&mut self, _direction: Direction, _line: &[u8]) -> MonitorFlags {
        MonitorFlags::NONE
    }
}
