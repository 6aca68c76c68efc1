//! Raw declarations for the C wrapper (`udtc.h`) around the UDT library.
//!
//! Everything here mirrors the C header one to one. Safe wrappers live in the
//! `udt` crate; nothing in this crate allocates or validates.
//!
//! The link directive for `libudt` is only emitted with the `link` feature.
#![allow(non_camel_case_types, non_snake_case, non_upper_case_globals)]

use libc::{c_char, c_int, c_void, sockaddr};

pub type UDTSOCKET = c_int;
pub type SYSSOCKET = c_int;

pub const UDT_INVALID_SOCK: UDTSOCKET = -1;
pub const UDT_ERROR: c_int = -1;

// UDTSTATUS
pub const UDT_INIT: c_int = 1;
pub const UDT_OPENED: c_int = 2;
pub const UDT_LISTENING: c_int = 3;
pub const UDT_CONNECTING: c_int = 4;
pub const UDT_CONNECTED: c_int = 5;
pub const UDT_BROKEN: c_int = 6;
pub const UDT_CLOSING: c_int = 7;
pub const UDT_CLOSED: c_int = 8;
pub const UDT_NONEXIST: c_int = 9;

// UDT_EPOLL_OPT
pub const UDT_EPOLL_IN: c_int = 0x1;
pub const UDT_EPOLL_OUT: c_int = 0x4;
pub const UDT_EPOLL_ERR: c_int = 0x8;

// UDTOpt
pub const UDT_UDT_MSS: c_int = 0;
pub const UDT_UDT_SNDSYN: c_int = 1;
pub const UDT_UDT_RCVSYN: c_int = 2;
pub const UDT_UDT_CC: c_int = 3;
pub const UDT_UDT_FC: c_int = 4;
pub const UDT_UDT_SNDBUF: c_int = 5;
pub const UDT_UDT_RCVBUF: c_int = 6;
pub const UDT_UDT_LINGER: c_int = 7;
pub const UDT_UDP_SNDBUF: c_int = 8;
pub const UDT_UDP_RCVBUF: c_int = 9;
pub const UDT_UDT_MAXMSG: c_int = 10;
pub const UDT_UDT_MSGTTL: c_int = 11;
pub const UDT_UDT_RENDEZVOUS: c_int = 12;
pub const UDT_UDT_SNDTIMEO: c_int = 13;
pub const UDT_UDT_RCVTIMEO: c_int = 14;
pub const UDT_UDT_REUSEADDR: c_int = 15;
pub const UDT_UDT_MAXBW: c_int = 16;
pub const UDT_UDT_STATE: c_int = 17;
pub const UDT_UDT_EVENT: c_int = 18;
pub const UDT_UDT_SNDDATA: c_int = 19;
pub const UDT_UDT_RCVDATA: c_int = 20;

/// `UDT_TRACEINFO`, the performance monitor record.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct UDT_TRACEINFO {
  // global measurements
  pub msTimeStamp: i64,
  pub pktSentTotal: i64,
  pub pktRecvTotal: i64,
  pub pktSndLossTotal: c_int,
  pub pktRcvLossTotal: c_int,
  pub pktRetransTotal: c_int,
  pub pktSentACKTotal: c_int,
  pub pktRecvACKTotal: c_int,
  pub pktSentNAKTotal: c_int,
  pub pktRecvNAKTotal: c_int,
  pub usSndDurationTotal: i64,

  // local measurements
  pub pktSent: i64,
  pub pktRecv: i64,
  pub pktSndLoss: c_int,
  pub pktRcvLoss: c_int,
  pub pktRetrans: c_int,
  pub pktSentACK: c_int,
  pub pktRecvACK: c_int,
  pub pktSentNAK: c_int,
  pub pktRecvNAK: c_int,
  pub mbpsSendRate: f64,
  pub mbpsRecvRate: f64,
  pub usSndDuration: i64,

  // instant measurements
  pub usPktSndPeriod: f64,
  pub pktFlowWindow: c_int,
  pub pktCongestionWindow: c_int,
  pub pktFlightSize: c_int,
  pub msRTT: f64,
  pub mbpsBandwidth: f64,
  pub byteAvailSndBuf: c_int,
  pub byteAvailRcvBuf: c_int,
}

unsafe extern "C" {
  pub fn udt_startup() -> c_int;
  pub fn udt_cleanup() -> c_int;

  pub fn udt_socket(af: c_int, ty: c_int, protocol: c_int) -> UDTSOCKET;
  pub fn udt_bind(u: UDTSOCKET, name: *const sockaddr, namelen: c_int) -> c_int;
  pub fn udt_listen(u: UDTSOCKET, backlog: c_int) -> c_int;
  pub fn udt_accept(
    u: UDTSOCKET,
    addr: *mut sockaddr,
    addrlen: *mut c_int,
  ) -> UDTSOCKET;
  pub fn udt_connect(
    u: UDTSOCKET,
    name: *const sockaddr,
    namelen: c_int,
  ) -> c_int;
  pub fn udt_close(u: UDTSOCKET) -> c_int;
  pub fn udt_getpeername(
    u: UDTSOCKET,
    name: *mut sockaddr,
    namelen: *mut c_int,
  ) -> c_int;
  pub fn udt_getsockname(
    u: UDTSOCKET,
    name: *mut sockaddr,
    namelen: *mut c_int,
  ) -> c_int;
  pub fn udt_getsockopt(
    u: UDTSOCKET,
    level: c_int,
    optname: c_int,
    optval: *mut c_void,
    optlen: *mut c_int,
  ) -> c_int;
  pub fn udt_setsockopt(
    u: UDTSOCKET,
    level: c_int,
    optname: c_int,
    optval: *const c_void,
    optlen: c_int,
  ) -> c_int;
  pub fn udt_getsockstate(u: UDTSOCKET) -> c_int;

  pub fn udt_send(
    u: UDTSOCKET,
    buf: *const c_char,
    len: c_int,
    flags: c_int,
  ) -> c_int;
  pub fn udt_recv(
    u: UDTSOCKET,
    buf: *mut c_char,
    len: c_int,
    flags: c_int,
  ) -> c_int;
  pub fn udt_sendmsg(
    u: UDTSOCKET,
    buf: *const c_char,
    len: c_int,
    ttl: c_int,
    inorder: c_int,
  ) -> c_int;
  pub fn udt_recvmsg(u: UDTSOCKET, buf: *mut c_char, len: c_int) -> c_int;
  pub fn udt_sendfile2(
    u: UDTSOCKET,
    path: *const c_char,
    offset: *mut i64,
    size: i64,
    block: c_int,
  ) -> i64;
  pub fn udt_recvfile2(
    u: UDTSOCKET,
    path: *const c_char,
    offset: *mut i64,
    size: i64,
    block: c_int,
  ) -> i64;

  pub fn udt_epoll_create() -> c_int;
  pub fn udt_epoll_add_usock(
    eid: c_int,
    u: UDTSOCKET,
    events: *const c_int,
  ) -> c_int;
  pub fn udt_epoll_add_ssock(
    eid: c_int,
    s: SYSSOCKET,
    events: *const c_int,
  ) -> c_int;
  pub fn udt_epoll_remove_usock(eid: c_int, u: UDTSOCKET) -> c_int;
  pub fn udt_epoll_remove_ssock(eid: c_int, s: SYSSOCKET) -> c_int;
  pub fn udt_epoll_wait2(
    eid: c_int,
    readfds: *mut UDTSOCKET,
    rnum: *mut c_int,
    writefds: *mut UDTSOCKET,
    wnum: *mut c_int,
    msTimeOut: i64,
    lrfds: *mut SYSSOCKET,
    lrnum: *mut c_int,
    lwfds: *mut SYSSOCKET,
    lwnum: *mut c_int,
  ) -> c_int;
  pub fn udt_epoll_release(eid: c_int) -> c_int;

  pub fn udt_getlasterror_code() -> c_int;
  pub fn udt_getlasterror_desc() -> *const c_char;
  pub fn udt_clearlasterror();

  pub fn udt_perfmon(
    u: UDTSOCKET,
    perf: *mut UDT_TRACEINFO,
    clear: c_int,
  ) -> c_int;
}
