//! The native transport engine boundary.
//!
//! [`Engine`] has one method per call of the C wrapper. Failures carry the
//! engine's last error verbatim; nothing above this layer inspects engine
//! state except through these methods.

use std::{os::fd::RawFd, path::Path};

use crate::{
  addr::RawSockaddr, epoll::Events, error::NativeError, perf::TraceInfo,
};

mod loopback;
pub use loopback::Loopback;

#[cfg(feature = "native")]
mod native;
#[cfg(feature = "native")]
pub use native::Native;

pub type SocketId = i32;
pub type SysSocket = RawFd;
pub type EpollId = i32;

pub type EngineResult<T> = Result<T, NativeError>;

/// Raw `UDTSTATUS` values.
pub mod status {
  pub const INIT: i32 = 1;
  pub const OPENED: i32 = 2;
  pub const LISTENING: i32 = 3;
  pub const CONNECTING: i32 = 4;
  pub const CONNECTED: i32 = 5;
  pub const BROKEN: i32 = 6;
  pub const CLOSING: i32 = 7;
  pub const CLOSED: i32 = 8;
  pub const NONEXIST: i32 = 9;
}

/// A fixed-capacity result buffer for one category of [`Engine::epoll_wait`].
///
/// The capacity is chosen by the caller up front. Entries beyond it are
/// dropped by the engine.
#[derive(Debug, Clone)]
pub struct Slots {
  buf: Vec<i32>,
  filled: usize,
}

impl Slots {
  pub fn with_capacity(capacity: usize) -> Self {
    Self { buf: vec![0; capacity], filled: 0 }
  }

  pub fn capacity(&self) -> usize {
    self.buf.len()
  }

  pub fn len(&self) -> usize {
    self.filled
  }

  pub fn is_empty(&self) -> bool {
    self.filled == 0
  }

  /// Appends `value`, returning `false` when full.
  pub fn push(&mut self, value: i32) -> bool {
    if self.filled == self.buf.len() {
      return false;
    }
    self.buf[self.filled] = value;
    self.filled += 1;
    true
  }

  pub fn clear(&mut self) {
    self.filled = 0;
  }

  pub fn as_slice(&self) -> &[i32] {
    &self.buf[..self.filled]
  }

  pub fn into_vec(mut self) -> Vec<i32> {
    self.buf.truncate(self.filled);
    self.buf
  }

  /// Whole buffer, for engines that write in place and report a count.
  #[cfg_attr(not(feature = "native"), allow(dead_code))]
  pub(crate) fn spare_mut(&mut self) -> &mut [i32] {
    &mut self.buf
  }

  #[cfg_attr(not(feature = "native"), allow(dead_code))]
  pub(crate) fn set_filled(&mut self, n: usize) {
    self.filled = n.min(self.buf.len());
  }
}

/// The four result categories of one wait.
#[derive(Debug, Clone)]
pub struct ReadySlots {
  pub udt_read: Slots,
  pub udt_write: Slots,
  pub sys_read: Slots,
  pub sys_write: Slots,
}

impl ReadySlots {
  pub fn clear(&mut self) {
    self.udt_read.clear();
    self.udt_write.clear();
    self.sys_read.clear();
    self.sys_write.clear();
  }
}

pub trait Engine: Send + Sync + 'static {
  fn startup(&self) -> EngineResult<()>;
  fn cleanup(&self) -> EngineResult<()>;

  /// `family` and `ty` are the raw `AF_*` and `SOCK_*` values.
  fn socket(&self, family: i32, ty: i32) -> EngineResult<SocketId>;
  fn bind(&self, sock: SocketId, addr: &RawSockaddr) -> EngineResult<()>;
  fn listen(&self, sock: SocketId, backlog: i32) -> EngineResult<()>;
  fn accept(&self, sock: SocketId) -> EngineResult<(SocketId, RawSockaddr)>;
  fn connect(&self, sock: SocketId, addr: &RawSockaddr) -> EngineResult<()>;
  fn close(&self, sock: SocketId) -> EngineResult<()>;

  /// Raw `UDTSTATUS` value.
  fn sock_state(&self, sock: SocketId) -> EngineResult<i32>;
  fn sock_name(&self, sock: SocketId) -> EngineResult<RawSockaddr>;
  fn peer_name(&self, sock: SocketId) -> EngineResult<RawSockaddr>;

  /// Writes the option into `buf` and returns the number of bytes written.
  fn get_opt(
    &self,
    sock: SocketId,
    opt: i32,
    buf: &mut [u8],
  ) -> EngineResult<usize>;
  fn set_opt(&self, sock: SocketId, opt: i32, value: &[u8])
  -> EngineResult<()>;

  fn send(&self, sock: SocketId, buf: &[u8]) -> EngineResult<usize>;
  fn recv(&self, sock: SocketId, buf: &mut [u8]) -> EngineResult<usize>;
  /// `ttl_ms` of -1 means the message never expires.
  fn send_msg(
    &self,
    sock: SocketId,
    buf: &[u8],
    ttl_ms: i32,
    in_order: bool,
  ) -> EngineResult<usize>;
  fn recv_msg(&self, sock: SocketId, buf: &mut [u8]) -> EngineResult<usize>;

  /// Sends `size` bytes of `path` starting at `*offset`, in chunks of
  /// `block`. `*offset` advances past every byte handed over, also when
  /// the call fails part way.
  fn send_file(
    &self,
    sock: SocketId,
    path: &Path,
    offset: &mut i64,
    size: i64,
    block: i32,
  ) -> EngineResult<i64>;
  /// Receive side of [`Engine::send_file`].
  fn recv_file(
    &self,
    sock: SocketId,
    path: &Path,
    offset: &mut i64,
    size: i64,
    block: i32,
  ) -> EngineResult<i64>;

  fn perfmon(&self, sock: SocketId, clear: bool) -> EngineResult<TraceInfo>;

  fn epoll_create(&self) -> EngineResult<EpollId>;
  fn epoll_add_usock(
    &self,
    eid: EpollId,
    sock: SocketId,
    events: Events,
  ) -> EngineResult<()>;
  fn epoll_add_ssock(
    &self,
    eid: EpollId,
    fd: SysSocket,
    events: Events,
  ) -> EngineResult<()>;
  fn epoll_remove_usock(&self, eid: EpollId, sock: SocketId)
  -> EngineResult<()>;
  fn epoll_remove_ssock(&self, eid: EpollId, fd: SysSocket)
  -> EngineResult<()>;
  /// Fills `ready` up to each category's capacity and returns the total
  /// number of ready entries, including those that did not fit. A negative
  /// `timeout_ms` blocks indefinitely.
  fn epoll_wait(
    &self,
    eid: EpollId,
    ready: &mut ReadySlots,
    timeout_ms: i64,
  ) -> EngineResult<usize>;
  fn epoll_release(&self, eid: EpollId) -> EngineResult<()>;

  fn last_error(&self) -> NativeError;
  fn clear_last_error(&self);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn slots_drop_overflow() {
    let mut slots = Slots::with_capacity(2);
    assert!(slots.push(7));
    assert!(slots.push(8));
    assert!(!slots.push(9));
    assert_eq!(slots.as_slice(), &[7, 8]);
    slots.clear();
    assert!(slots.is_empty());
    assert_eq!(slots.capacity(), 2);
  }

  #[test]
  fn set_filled_is_clamped() {
    let mut slots = Slots::with_capacity(3);
    slots.spare_mut()[0] = 4;
    slots.set_filled(10);
    assert_eq!(slots.len(), 3);
    assert_eq!(slots.into_vec(), vec![4, 0, 0]);
  }
}
