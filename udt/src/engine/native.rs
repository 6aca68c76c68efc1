//! Engine backed by the UDT C library.

use std::{
  ffi::{CStr, CString},
  mem,
  os::unix::ffi::OsStrExt,
  path::Path,
  ptr,
};

use libc::{c_int, c_void, sockaddr, sockaddr_storage};
use udt_sys as sys;

use super::{Engine, EngineResult, EpollId, ReadySlots, SocketId, SysSocket};
use crate::{
  addr::RawSockaddr,
  epoll::Events,
  error::{NativeError, code},
  perf::TraceInfo,
};

/// Calls a `udt_*` function and turns its error sentinel into the last
/// engine error.
macro_rules! udt_call {
  ($fn: ident ( $($arg: expr),* $(,)* ) ) => {
    udt_call!($fn($($arg),*) != sys::UDT_ERROR)
  };
  ($fn: ident ( $($arg: expr),* $(,)* ) != $bad: expr) => {{
    // SAFETY: arguments are valid for the duration of the call.
    let res = unsafe { sys::$fn($($arg, )*) };
    if res == $bad {
      Err(last_error())
    } else {
      Ok(res)
    }
  }};
}

fn last_error() -> NativeError {
  // SAFETY: no arguments; both calls read thread-local engine state.
  let code = unsafe { sys::udt_getlasterror_code() };
  // SAFETY: the engine returns a NUL-terminated string or null.
  let desc = unsafe { sys::udt_getlasterror_desc() };
  if desc.is_null() {
    return NativeError::from_code(code);
  }
  // SAFETY: checked non-null above.
  let desc = unsafe { CStr::from_ptr(desc) };
  NativeError::new(code, desc.to_string_lossy())
}

fn into_storage(addr: &RawSockaddr) -> (sockaddr_storage, c_int) {
  // SAFETY: all-zero is a valid sockaddr_storage.
  let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
  let len = match addr.family {
    libc::AF_INET => {
      // SAFETY: sockaddr_storage is large and aligned enough for sockaddr_in.
      let sin = unsafe {
        &mut *(&mut storage as *mut sockaddr_storage).cast::<libc::sockaddr_in>()
      };
      sin.sin_family = libc::AF_INET as libc::sa_family_t;
      sin.sin_port = addr.port.to_be();
      let mut octets = [0u8; 4];
      octets.copy_from_slice(&addr.addr[..4]);
      sin.sin_addr = libc::in_addr { s_addr: u32::from_ne_bytes(octets) };
      mem::size_of::<libc::sockaddr_in>()
    }
    _ => {
      // SAFETY: sockaddr_storage is large and aligned enough for sockaddr_in6.
      let sin6 = unsafe {
        &mut *(&mut storage as *mut sockaddr_storage)
          .cast::<libc::sockaddr_in6>()
      };
      sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
      sin6.sin6_port = addr.port.to_be();
      sin6.sin6_addr = libc::in6_addr { s6_addr: addr.addr };
      mem::size_of::<libc::sockaddr_in6>()
    }
  };
  (storage, len as c_int)
}

fn from_storage(storage: &sockaddr_storage) -> RawSockaddr {
  let family = c_int::from(storage.ss_family);
  match family {
    libc::AF_INET => {
      // SAFETY: ss_family says the storage holds a sockaddr_in.
      let sin = unsafe {
        &*(storage as *const sockaddr_storage).cast::<libc::sockaddr_in>()
      };
      let mut addr = [0u8; 16];
      addr[..4].copy_from_slice(&sin.sin_addr.s_addr.to_ne_bytes());
      RawSockaddr { family, port: u16::from_be(sin.sin_port), addr }
    }
    libc::AF_INET6 => {
      // SAFETY: ss_family says the storage holds a sockaddr_in6.
      let sin6 = unsafe {
        &*(storage as *const sockaddr_storage).cast::<libc::sockaddr_in6>()
      };
      RawSockaddr {
        family,
        port: u16::from_be(sin6.sin6_port),
        addr: sin6.sin6_addr.s6_addr,
      }
    }
    _ => RawSockaddr { family, port: 0, addr: [0; 16] },
  }
}

fn c_path(path: &Path) -> EngineResult<CString> {
  CString::new(path.as_os_str().as_bytes())
    .map_err(|_| NativeError::from_code(code::EINVPARAM))
}

fn c_len(len: usize) -> c_int {
  c_int::try_from(len).unwrap_or(c_int::MAX)
}

/// The UDT library, reached through its C wrapper.
#[derive(Debug, Default, Clone, Copy)]
pub struct Native;

impl Native {
  pub fn new() -> Self {
    Self
  }

  fn name_query(
    &self,
    sock: SocketId,
    query: unsafe extern "C" fn(sys::UDTSOCKET, *mut sockaddr, *mut c_int) -> c_int,
  ) -> EngineResult<RawSockaddr> {
    // SAFETY: all-zero is a valid sockaddr_storage.
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as c_int;
    // SAFETY: storage and len outlive the call; len holds the capacity.
    let res = unsafe {
      query(sock, (&mut storage as *mut sockaddr_storage).cast(), &mut len)
    };
    if res == sys::UDT_ERROR {
      return Err(last_error());
    }
    Ok(from_storage(&storage))
  }
}

impl Engine for Native {
  fn startup(&self) -> EngineResult<()> {
    udt_call!(udt_startup()).map(drop)
  }

  fn cleanup(&self) -> EngineResult<()> {
    udt_call!(udt_cleanup()).map(drop)
  }

  fn socket(&self, family: i32, ty: i32) -> EngineResult<SocketId> {
    udt_call!(udt_socket(family, ty, 0) != sys::UDT_INVALID_SOCK)
  }

  fn bind(&self, sock: SocketId, addr: &RawSockaddr) -> EngineResult<()> {
    let (storage, len) = into_storage(addr);
    udt_call!(udt_bind(
      sock,
      (&storage as *const sockaddr_storage).cast::<sockaddr>(),
      len
    ))
    .map(drop)
  }

  fn listen(&self, sock: SocketId, backlog: i32) -> EngineResult<()> {
    udt_call!(udt_listen(sock, backlog)).map(drop)
  }

  fn accept(&self, sock: SocketId) -> EngineResult<(SocketId, RawSockaddr)> {
    // SAFETY: all-zero is a valid sockaddr_storage.
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as c_int;
    let id = udt_call!(udt_accept(
      sock,
      (&mut storage as *mut sockaddr_storage).cast::<sockaddr>(),
      &mut len
    ) != sys::UDT_INVALID_SOCK)?;
    Ok((id, from_storage(&storage)))
  }

  fn connect(&self, sock: SocketId, addr: &RawSockaddr) -> EngineResult<()> {
    let (storage, len) = into_storage(addr);
    udt_call!(udt_connect(
      sock,
      (&storage as *const sockaddr_storage).cast::<sockaddr>(),
      len
    ))
    .map(drop)
  }

  fn close(&self, sock: SocketId) -> EngineResult<()> {
    udt_call!(udt_close(sock)).map(drop)
  }

  fn sock_state(&self, sock: SocketId) -> EngineResult<i32> {
    // SAFETY: plain integer argument.
    Ok(unsafe { sys::udt_getsockstate(sock) })
  }

  fn sock_name(&self, sock: SocketId) -> EngineResult<RawSockaddr> {
    self.name_query(sock, sys::udt_getsockname)
  }

  fn peer_name(&self, sock: SocketId) -> EngineResult<RawSockaddr> {
    self.name_query(sock, sys::udt_getpeername)
  }

  fn get_opt(
    &self,
    sock: SocketId,
    opt: i32,
    buf: &mut [u8],
  ) -> EngineResult<usize> {
    let mut len = c_len(buf.len());
    udt_call!(udt_getsockopt(
      sock,
      0,
      opt,
      buf.as_mut_ptr().cast::<c_void>(),
      &mut len
    ))?;
    Ok(usize::try_from(len).unwrap_or(0))
  }

  fn set_opt(
    &self,
    sock: SocketId,
    opt: i32,
    value: &[u8],
  ) -> EngineResult<()> {
    udt_call!(udt_setsockopt(
      sock,
      0,
      opt,
      value.as_ptr().cast::<c_void>(),
      c_len(value.len())
    ))
    .map(drop)
  }

  fn send(&self, sock: SocketId, buf: &[u8]) -> EngineResult<usize> {
    udt_call!(udt_send(sock, buf.as_ptr().cast(), c_len(buf.len()), 0))
      .map(|n| n as usize)
  }

  fn recv(&self, sock: SocketId, buf: &mut [u8]) -> EngineResult<usize> {
    udt_call!(udt_recv(sock, buf.as_mut_ptr().cast(), c_len(buf.len()), 0))
      .map(|n| n as usize)
  }

  fn send_msg(
    &self,
    sock: SocketId,
    buf: &[u8],
    ttl_ms: i32,
    in_order: bool,
  ) -> EngineResult<usize> {
    udt_call!(udt_sendmsg(
      sock,
      buf.as_ptr().cast(),
      c_len(buf.len()),
      ttl_ms,
      c_int::from(in_order)
    ))
    .map(|n| n as usize)
  }

  fn recv_msg(&self, sock: SocketId, buf: &mut [u8]) -> EngineResult<usize> {
    udt_call!(udt_recvmsg(sock, buf.as_mut_ptr().cast(), c_len(buf.len())))
      .map(|n| n as usize)
  }

  fn send_file(
    &self,
    sock: SocketId,
    path: &Path,
    offset: &mut i64,
    size: i64,
    block: i32,
  ) -> EngineResult<i64> {
    let path = c_path(path)?;
    udt_call!(udt_sendfile2(sock, path.as_ptr(), offset, size, block) != -1)
  }

  fn recv_file(
    &self,
    sock: SocketId,
    path: &Path,
    offset: &mut i64,
    size: i64,
    block: i32,
  ) -> EngineResult<i64> {
    let path = c_path(path)?;
    udt_call!(udt_recvfile2(sock, path.as_ptr(), offset, size, block) != -1)
  }

  fn perfmon(&self, sock: SocketId, clear: bool) -> EngineResult<TraceInfo> {
    let mut raw = sys::UDT_TRACEINFO::default();
    udt_call!(udt_perfmon(sock, &mut raw, c_int::from(clear)))?;
    Ok(TraceInfo {
      ms_timestamp: raw.msTimeStamp,
      pkt_sent_total: raw.pktSentTotal,
      pkt_recv_total: raw.pktRecvTotal,
      pkt_snd_loss_total: raw.pktSndLossTotal,
      pkt_rcv_loss_total: raw.pktRcvLossTotal,
      pkt_retrans_total: raw.pktRetransTotal,
      pkt_sent_ack_total: raw.pktSentACKTotal,
      pkt_recv_ack_total: raw.pktRecvACKTotal,
      pkt_sent_nak_total: raw.pktSentNAKTotal,
      pkt_recv_nak_total: raw.pktRecvNAKTotal,
      us_snd_duration_total: raw.usSndDurationTotal,
      pkt_sent: raw.pktSent,
      pkt_recv: raw.pktRecv,
      pkt_snd_loss: raw.pktSndLoss,
      pkt_rcv_loss: raw.pktRcvLoss,
      pkt_retrans: raw.pktRetrans,
      pkt_sent_ack: raw.pktSentACK,
      pkt_recv_ack: raw.pktRecvACK,
      pkt_sent_nak: raw.pktSentNAK,
      pkt_recv_nak: raw.pktRecvNAK,
      mbps_send_rate: raw.mbpsSendRate,
      mbps_recv_rate: raw.mbpsRecvRate,
      us_snd_duration: raw.usSndDuration,
      us_pkt_snd_period: raw.usPktSndPeriod,
      pkt_flow_window: raw.pktFlowWindow,
      pkt_congestion_window: raw.pktCongestionWindow,
      pkt_flight_size: raw.pktFlightSize,
      ms_rtt: raw.msRTT,
      mbps_bandwidth: raw.mbpsBandwidth,
      byte_avail_snd_buf: raw.byteAvailSndBuf,
      byte_avail_rcv_buf: raw.byteAvailRcvBuf,
    })
  }

  fn epoll_create(&self) -> EngineResult<EpollId> {
    udt_call!(udt_epoll_create())
  }

  fn epoll_add_usock(
    &self,
    eid: EpollId,
    sock: SocketId,
    events: Events,
  ) -> EngineResult<()> {
    let bits = events.bits();
    udt_call!(udt_epoll_add_usock(eid, sock, &bits)).map(drop)
  }

  fn epoll_add_ssock(
    &self,
    eid: EpollId,
    fd: SysSocket,
    events: Events,
  ) -> EngineResult<()> {
    let bits = events.bits();
    udt_call!(udt_epoll_add_ssock(eid, fd, &bits)).map(drop)
  }

  fn epoll_remove_usock(
    &self,
    eid: EpollId,
    sock: SocketId,
  ) -> EngineResult<()> {
    udt_call!(udt_epoll_remove_usock(eid, sock)).map(drop)
  }

  fn epoll_remove_ssock(
    &self,
    eid: EpollId,
    fd: SysSocket,
  ) -> EngineResult<()> {
    udt_call!(udt_epoll_remove_ssock(eid, fd)).map(drop)
  }

  fn epoll_wait(
    &self,
    eid: EpollId,
    ready: &mut ReadySlots,
    timeout_ms: i64,
  ) -> EngineResult<usize> {
    let ReadySlots { udt_read, udt_write, sys_read, sys_write } = ready;
    let mut rnum = c_len(udt_read.capacity());
    let mut wnum = c_len(udt_write.capacity());
    let mut lrnum = c_len(sys_read.capacity());
    let mut lwnum = c_len(sys_write.capacity());

    let ptr_of = |slots: &mut super::Slots| {
      if slots.capacity() == 0 {
        ptr::null_mut()
      } else {
        slots.spare_mut().as_mut_ptr()
      }
    };
    let (r, w) = (ptr_of(&mut *udt_read), ptr_of(&mut *udt_write));
    let (lr, lw) = (ptr_of(&mut *sys_read), ptr_of(&mut *sys_write));

    let total = udt_call!(udt_epoll_wait2(
      eid, r, &mut rnum, w, &mut wnum, timeout_ms, lr, &mut lrnum, lw,
      &mut lwnum
    ))?;

    for (slots, n) in [
      (udt_read, rnum),
      (udt_write, wnum),
      (sys_read, lrnum),
      (sys_write, lwnum),
    ] {
      slots.set_filled(usize::try_from(n).unwrap_or(0));
    }
    Ok(usize::try_from(total).unwrap_or(0))
  }

  fn epoll_release(&self, eid: EpollId) -> EngineResult<()> {
    udt_call!(udt_epoll_release(eid)).map(drop)
  }

  fn last_error(&self) -> NativeError {
    last_error()
  }

  fn clear_last_error(&self) {
    // SAFETY: no arguments.
    unsafe { sys::udt_clearlasterror() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::{Ipv4Addr, Ipv6Addr};

  #[test]
  fn sockaddr_conversion() {
    for raw in [
      RawSockaddr::v4(Ipv4Addr::new(10, 1, 2, 3), 9000),
      RawSockaddr::v6(Ipv6Addr::LOCALHOST, 443),
    ] {
      let (storage, _) = into_storage(&raw);
      assert_eq!(from_storage(&storage), raw);
    }
  }

  #[test]
  fn nul_in_path_is_rejected() {
    let err = c_path(Path::new("bad\0path")).unwrap_err();
    assert_eq!(err.code, code::EINVPARAM);
  }
}
