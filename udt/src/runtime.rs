use std::{
  fmt,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use crate::{
  config::Config,
  engine::{Engine, Loopback},
  error::{Error, NativeError, Result},
};

/// The started engine.
///
/// One value per process, created by [`Udt::startup`] (or one of its
/// variants) and torn down by [`Udt::cleanup`]. Clones share the same
/// lifecycle; every socket and epoll group keeps one. Once cleaned up,
/// every operation through any clone fails with [`Error::NotStarted`]
/// without reaching the engine.
#[derive(Clone)]
pub struct Udt {
  inner: Arc<Inner>,
}

struct Inner {
  engine: Arc<dyn Engine>,
  config: Config,
  active: AtomicBool,
}

impl Udt {
  /// Starts the in-process engine with default configuration.
  pub fn startup() -> Result<Self> {
    Self::loopback(Config::default())
  }

  pub fn loopback(config: Config) -> Result<Self> {
    let engine =
      Loopback::new().with_rendezvous_timeout(config.rendezvous_timeout());
    Self::startup_with(Arc::new(engine), config)
  }

  /// Starts the UDT library.
  #[cfg(feature = "native")]
  pub fn native(config: Config) -> Result<Self> {
    Self::startup_with(Arc::new(crate::engine::Native::new()), config)
  }

  pub fn startup_with<E: Engine>(
    engine: Arc<E>,
    config: Config,
  ) -> Result<Self> {
    engine.startup().map_err(Error::StartupFailed)?;
    tracing::debug!(?config, "udt started");
    Ok(Self {
      inner: Arc::new(Inner {
        engine,
        config,
        active: AtomicBool::new(true),
      }),
    })
  }

  /// Tears the engine down. A second call fails with
  /// [`Error::NotStarted`]. If the engine refuses, the handle stays active
  /// and cleanup can be retried.
  pub fn cleanup(&self) -> Result<()> {
    if !self.inner.active.swap(false, Ordering::AcqRel) {
      return Err(Error::NotStarted);
    }
    if let Err(err) = self.inner.engine.cleanup() {
      self.inner.active.store(true, Ordering::Release);
      return Err(Error::CleanupFailed(err));
    }
    tracing::debug!("udt cleaned up");
    Ok(())
  }

  pub fn is_active(&self) -> bool {
    self.inner.active.load(Ordering::Acquire)
  }

  pub fn config(&self) -> &Config {
    &self.inner.config
  }

  /// The engine's most recent error on this thread.
  pub fn last_error(&self) -> Result<NativeError> {
    Ok(self.engine()?.last_error())
  }

  pub fn clear_last_error(&self) -> Result<()> {
    self.engine()?.clear_last_error();
    Ok(())
  }

  pub(crate) fn engine(&self) -> Result<&dyn Engine> {
    if !self.is_active() {
      return Err(Error::NotStarted);
    }
    Ok(&*self.inner.engine)
  }
}

impl fmt::Debug for Udt {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Udt")
      .field("active", &self.is_active())
      .field("config", &self.inner.config)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    addr::{Family, RawSockaddr, SocketType},
    engine::{EngineResult, EpollId, ReadySlots, SocketId, SysSocket},
    epoll::Events,
    error::code,
    perf::TraceInfo,
  };
  use std::{path::Path, sync::atomic::AtomicU32};

  /// Loopback whose cleanup fails a set number of times.
  struct Refusing {
    inner: Loopback,
    refusals: AtomicU32,
  }

  impl Engine for Refusing {
    fn startup(&self) -> EngineResult<()> {
      self.inner.startup()
    }
    fn cleanup(&self) -> EngineResult<()> {
      let left = self.refusals.load(Ordering::Acquire);
      if left > 0 {
        self.refusals.store(left - 1, Ordering::Release);
        return Err(NativeError::from_code(code::ETHREAD));
      }
      self.inner.cleanup()
    }
    fn socket(&self, family: i32, ty: i32) -> EngineResult<SocketId> {
      self.inner.socket(family, ty)
    }
    fn bind(&self, sock: SocketId, addr: &RawSockaddr) -> EngineResult<()> {
      self.inner.bind(sock, addr)
    }
    fn listen(&self, sock: SocketId, backlog: i32) -> EngineResult<()> {
      self.inner.listen(sock, backlog)
    }
    fn accept(&self, sock: SocketId) -> EngineResult<(SocketId, RawSockaddr)> {
      self.inner.accept(sock)
    }
    fn connect(&self, sock: SocketId, addr: &RawSockaddr) -> EngineResult<()> {
      self.inner.connect(sock, addr)
    }
    fn close(&self, sock: SocketId) -> EngineResult<()> {
      self.inner.close(sock)
    }
    fn sock_state(&self, sock: SocketId) -> EngineResult<i32> {
      self.inner.sock_state(sock)
    }
    fn sock_name(&self, sock: SocketId) -> EngineResult<RawSockaddr> {
      self.inner.sock_name(sock)
    }
    fn peer_name(&self, sock: SocketId) -> EngineResult<RawSockaddr> {
      self.inner.peer_name(sock)
    }
    fn get_opt(
      &self,
      sock: SocketId,
      opt: i32,
      buf: &mut [u8],
    ) -> EngineResult<usize> {
      self.inner.get_opt(sock, opt, buf)
    }
    fn set_opt(
      &self,
      sock: SocketId,
      opt: i32,
      value: &[u8],
    ) -> EngineResult<()> {
      self.inner.set_opt(sock, opt, value)
    }
    fn send(&self, sock: SocketId, buf: &[u8]) -> EngineResult<usize> {
      self.inner.send(sock, buf)
    }
    fn recv(&self, sock: SocketId, buf: &mut [u8]) -> EngineResult<usize> {
      self.inner.recv(sock, buf)
    }
    fn send_msg(
      &self,
      sock: SocketId,
      buf: &[u8],
      ttl_ms: i32,
      in_order: bool,
    ) -> EngineResult<usize> {
      self.inner.send_msg(sock, buf, ttl_ms, in_order)
    }
    fn recv_msg(&self, sock: SocketId, buf: &mut [u8]) -> EngineResult<usize> {
      self.inner.recv_msg(sock, buf)
    }
    fn send_file(
      &self,
      sock: SocketId,
      path: &Path,
      offset: &mut i64,
      size: i64,
      block: i32,
    ) -> EngineResult<i64> {
      self.inner.send_file(sock, path, offset, size, block)
    }
    fn recv_file(
      &self,
      sock: SocketId,
      path: &Path,
      offset: &mut i64,
      size: i64,
      block: i32,
    ) -> EngineResult<i64> {
      self.inner.recv_file(sock, path, offset, size, block)
    }
    fn perfmon(&self, sock: SocketId, clear: bool) -> EngineResult<TraceInfo> {
      self.inner.perfmon(sock, clear)
    }
    fn epoll_create(&self) -> EngineResult<EpollId> {
      self.inner.epoll_create()
    }
    fn epoll_add_usock(
      &self,
      eid: EpollId,
      sock: SocketId,
      events: Events,
    ) -> EngineResult<()> {
      self.inner.epoll_add_usock(eid, sock, events)
    }
    fn epoll_add_ssock(
      &self,
      eid: EpollId,
      fd: SysSocket,
      events: Events,
    ) -> EngineResult<()> {
      self.inner.epoll_add_ssock(eid, fd, events)
    }
    fn epoll_remove_usock(
      &self,
      eid: EpollId,
      sock: SocketId,
    ) -> EngineResult<()> {
      self.inner.epoll_remove_usock(eid, sock)
    }
    fn epoll_remove_ssock(
      &self,
      eid: EpollId,
      fd: SysSocket,
    ) -> EngineResult<()> {
      self.inner.epoll_remove_ssock(eid, fd)
    }
    fn epoll_wait(
      &self,
      eid: EpollId,
      ready: &mut ReadySlots,
      timeout_ms: i64,
    ) -> EngineResult<usize> {
      self.inner.epoll_wait(eid, ready, timeout_ms)
    }
    fn epoll_release(&self, eid: EpollId) -> EngineResult<()> {
      self.inner.epoll_release(eid)
    }
    fn last_error(&self) -> NativeError {
      self.inner.last_error()
    }
    fn clear_last_error(&self) {
      self.inner.clear_last_error()
    }
  }

  #[test]
  fn refused_cleanup_can_be_retried() {
    let engine = Refusing { inner: Loopback::new(), refusals: AtomicU32::new(1) };
    let udt = Udt::startup_with(Arc::new(engine), Config::default()).unwrap();

    let err = udt.cleanup().unwrap_err();
    assert!(matches!(err, Error::CleanupFailed(_)));
    assert_eq!(err.code(), Some(code::ETHREAD));
    assert!(udt.is_active());
    assert!(udt.last_error().is_ok());
    udt.socket(Family::V4, SocketType::Stream).unwrap();

    udt.cleanup().unwrap();
    assert!(!udt.is_active());
  }

  #[test]
  fn cleanup_twice_is_an_error() {
    let udt = Udt::startup().unwrap();
    udt.cleanup().unwrap();
    assert!(matches!(udt.cleanup(), Err(Error::NotStarted)));
  }

  #[test]
  fn clones_share_lifecycle() {
    let udt = Udt::startup().unwrap();
    let other = udt.clone();
    udt.cleanup().unwrap();
    assert!(!other.is_active());
    assert!(matches!(other.last_error(), Err(Error::NotStarted)));
  }
}
