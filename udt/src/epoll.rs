//! Readiness multiplexing over transport and system sockets.

use std::{os::fd::AsRawFd, time::Duration};

use crate::{
  engine::{EpollId, ReadySlots, Slots, SocketId, SysSocket},
  error::{Error, Result},
  runtime::Udt,
  socket::Socket,
};

/// Interest flags, also used for reported readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Events {
  bits: i32,
}

impl Events {
  pub const NONE: Self = Self { bits: 0 };
  pub const IN: Self = Self { bits: 0x1 };
  pub const OUT: Self = Self { bits: 0x4 };
  pub const ERR: Self = Self { bits: 0x8 };
  pub const ALL: Self = Self { bits: 0x1 | 0x4 | 0x8 };

  pub const fn bits(self) -> i32 {
    self.bits
  }

  /// Unknown bits are dropped.
  pub const fn from_bits(bits: i32) -> Self {
    Self { bits: bits & Self::ALL.bits }
  }

  pub const fn is_readable(self) -> bool {
    self.bits & Self::IN.bits != 0
  }

  pub const fn is_writable(self) -> bool {
    self.bits & Self::OUT.bits != 0
  }

  pub const fn is_error(self) -> bool {
    self.bits & Self::ERR.bits != 0
  }

  pub const fn is_none(self) -> bool {
    self.bits == 0
  }

  pub const fn or(self, other: Self) -> Self {
    Self { bits: self.bits | other.bits }
  }

  pub const fn contains(self, other: Self) -> bool {
    (self.bits & other.bits) == other.bits
  }
}

impl std::ops::BitOr for Events {
  type Output = Self;

  fn bitor(self, rhs: Self) -> Self::Output {
    self.or(rhs)
  }
}

impl std::ops::BitOrAssign for Events {
  fn bitor_assign(&mut self, rhs: Self) {
    *self = self.or(rhs);
  }
}

/// Which registry of a group a socket lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
  /// A transport socket.
  Udt,
  /// An ordinary OS socket.
  System,
}

/// Result buffer sizes for [`Epoll::wait`], one per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCapacity {
  pub udt_read: usize,
  pub udt_write: usize,
  pub sys_read: usize,
  pub sys_write: usize,
}

impl WaitCapacity {
  pub const fn uniform(n: usize) -> Self {
    Self { udt_read: n, udt_write: n, sys_read: n, sys_write: n }
  }

  fn slots(self) -> ReadySlots {
    ReadySlots {
      udt_read: Slots::with_capacity(self.udt_read),
      udt_write: Slots::with_capacity(self.udt_write),
      sys_read: Slots::with_capacity(self.sys_read),
      sys_write: Slots::with_capacity(self.sys_write),
    }
  }
}

impl Default for WaitCapacity {
  fn default() -> Self {
    Self::uniform(64)
  }
}

/// What one wait found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ready {
  pub udt_readable: Vec<SocketId>,
  pub udt_writable: Vec<SocketId>,
  pub sys_readable: Vec<SysSocket>,
  pub sys_writable: Vec<SysSocket>,
  /// Ready entries across all categories, including any that did not fit
  /// in the requested capacity.
  pub total: usize,
}

impl Ready {
  /// Entries actually returned.
  pub fn len(&self) -> usize {
    self.udt_readable.len()
      + self.udt_writable.len()
      + self.sys_readable.len()
      + self.sys_writable.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_truncated(&self) -> bool {
    self.total > self.len()
  }
}

/// A polling group.
///
/// Registration may change from one thread while another blocks in
/// [`Epoll::wait`]. Dropping the group does not release it; call
/// [`Epoll::release`].
#[derive(Debug)]
pub struct Epoll {
  udt: Udt,
  id: EpollId,
}

impl Udt {
  pub fn epoll(&self) -> Result<Epoll> {
    let id = self.engine()?.epoll_create().map_err(Error::EpollCreateFailed)?;
    tracing::debug!(eid = id, "epoll group created");
    Ok(Epoll { udt: self.clone(), id })
  }
}

impl Epoll {
  pub fn id(&self) -> EpollId {
    self.id
  }

  /// Registers `socket`, or updates its interest if already registered.
  pub fn add_socket(&self, socket: &Socket, events: Events) -> Result<()> {
    self
      .udt
      .engine()?
      .epoll_add_usock(self.id, socket.id(), events)
      .map_err(|source| Error::EpollAddFailed { kind: SocketKind::Udt, source })
  }

  pub fn add_sys_socket(
    &self,
    socket: &impl AsRawFd,
    events: Events,
  ) -> Result<()> {
    self
      .udt
      .engine()?
      .epoll_add_ssock(self.id, socket.as_raw_fd(), events)
      .map_err(|source| Error::EpollAddFailed {
        kind: SocketKind::System,
        source,
      })
  }

  pub fn remove_socket(&self, socket: &Socket) -> Result<()> {
    self.udt.engine()?.epoll_remove_usock(self.id, socket.id()).map_err(
      |source| Error::EpollRemoveFailed { kind: SocketKind::Udt, source },
    )
  }

  pub fn remove_sys_socket(&self, socket: &impl AsRawFd) -> Result<()> {
    self
      .udt
      .engine()?
      .epoll_remove_ssock(self.id, socket.as_raw_fd())
      .map_err(|source| Error::EpollRemoveFailed {
        kind: SocketKind::System,
        source,
      })
  }

  /// Blocks until a registered socket is ready or `timeout` elapses. `None`
  /// waits indefinitely, a zero timeout polls.
  ///
  /// Expiry is not an error: it yields an empty [`Ready`]. Each category is
  /// cut to its capacity in `capacity`.
  pub fn wait(
    &self,
    timeout: Option<Duration>,
    capacity: WaitCapacity,
  ) -> Result<Ready> {
    let engine = self.udt.engine()?;
    let timeout_ms = match timeout {
      None => -1,
      Some(t) => i64::try_from(t.as_millis()).unwrap_or(i64::MAX),
    };

    let mut slots = capacity.slots();
    let total = match engine.epoll_wait(self.id, &mut slots, timeout_ms) {
      Ok(total) => total,
      Err(err) if err.is_timeout() => {
        tracing::trace!(eid = self.id, timeout_ms, "epoll wait expired");
        return Ok(Ready::default());
      }
      Err(err) => return Err(Error::EpollWaitFailed(err)),
    };

    let ready = Ready {
      udt_readable: slots.udt_read.into_vec(),
      udt_writable: slots.udt_write.into_vec(),
      sys_readable: slots.sys_read.into_vec(),
      sys_writable: slots.sys_write.into_vec(),
      total,
    };
    if ready.is_truncated() {
      tracing::warn!(
        eid = self.id,
        total,
        returned = ready.len(),
        "epoll wait result truncated by capacity"
      );
    } else {
      tracing::trace!(eid = self.id, total, "epoll wait");
    }
    Ok(ready)
  }

  /// Invalidates the group.
  pub fn release(self) -> Result<()> {
    self
      .udt
      .engine()?
      .epoll_release(self.id)
      .map_err(Error::EpollReleaseFailed)?;
    tracing::debug!(eid = self.id, "epoll group released");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn event_bits() {
    let interest = Events::IN | Events::ERR;
    assert_eq!(interest.bits(), 0x9);
    assert!(interest.is_readable());
    assert!(!interest.is_writable());
    assert!(interest.contains(Events::ERR));
    assert_eq!(Events::from_bits(0xff), Events::ALL);
    assert!(Events::NONE.is_none());
  }

  #[test]
  fn ready_counts() {
    let ready = Ready {
      udt_readable: vec![1],
      sys_writable: vec![3, 4],
      total: 5,
      ..Default::default()
    };
    assert_eq!(ready.len(), 3);
    assert!(ready.is_truncated());
    assert!(Ready::default().is_empty());
  }
}
