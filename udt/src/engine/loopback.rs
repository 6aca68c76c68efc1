//! An in-process engine.
//!
//! Sockets live in one registry guarded by a mutex; a connection is a pair
//! of registry entries that deliver straight into each other's receive
//! queue. Blocking calls park on a condition variable that every state
//! change notifies. There is no wire and nothing is ever lost, so loss,
//! retransmission and RTT counters stay at zero.
//!
//! Numbering of sockets, groups and error codes follows the native engine.

use std::{
  cell::RefCell,
  collections::{BTreeMap, HashMap, VecDeque},
  fs::{File, OpenOptions},
  io::{Read, Seek, SeekFrom, Write},
  path::Path,
  sync::atomic::{AtomicU64, Ordering},
  time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

use super::{
  Engine, EngineResult, EpollId, ReadySlots, SocketId, SysSocket,
  status::*,
};
use crate::{
  addr::{Family, RawSockaddr},
  config::DEFAULT_RENDEZVOUS_TIMEOUT_MS,
  epoll::Events,
  error::{NativeError, code},
  option::{self, Linger, OptionValue, SocketOption},
  perf::TraceInfo,
  sync::{Condvar, Mutex, MutexGuard},
};

const FIRST_SOCKET_ID: SocketId = 0x1000;
const FIRST_EPHEMERAL_PORT: u16 = 49152;
/// UDT header plus IP/UDP headers.
const PACKET_OVERHEAD: usize = 44;
const MIN_MSS: u32 = 64;
const MIN_FLOW_WINDOW: u32 = 32;
const CONGESTION_WINDOW: i32 = 16;
/// Re-poll interval for system sockets while blocked in a wait.
const SYS_POLL_SLICE: Duration = Duration::from_millis(10);

thread_local! {
  static LAST_ERROR: RefCell<NativeError> =
    RefCell::new(NativeError::from_code(code::SUCCESS));
}

/// Outcome of one attempt at a blocking operation. `Ok(None)` means not
/// ready yet.
type Attempt<T> = Result<Option<T>, i32>;

#[derive(Debug, Clone, Copy)]
enum Deadline {
  Never,
  /// Give up at the instant with the given error code.
  At(Instant, i32),
}

impl Deadline {
  fn for_call(blocking: bool, timeout_ms: i64, would_block: i32) -> Self {
    if !blocking {
      Deadline::At(Instant::now(), would_block)
    } else if timeout_ms < 0 {
      Deadline::Never
    } else {
      let timeout = Duration::from_millis(timeout_ms as u64);
      Deadline::At(Instant::now() + timeout, code::ETIMEOUT)
    }
  }
}

#[derive(Debug, Clone)]
struct Opts(HashMap<SocketOption, OptionValue>);

impl Opts {
  fn defaults() -> Self {
    use OptionValue as V;
    use SocketOption as O;
    Self(HashMap::from([
      (O::Mss, V::U16(1500)),
      (O::SndSyn, V::Bool(true)),
      (O::RcvSyn, V::Bool(true)),
      (O::Fc, V::U32(25_600)),
      (O::SndBuf, V::U32(12_288_000)),
      (O::RcvBuf, V::U32(12_288_000)),
      (O::UdpSndBuf, V::U32(65_536)),
      (O::UdpRcvBuf, V::U32(65_536)),
      (O::Rendezvous, V::Bool(false)),
      (O::SndTimeo, V::I32(-1)),
      (O::RcvTimeo, V::I32(-1)),
      (O::ReuseAddr, V::Bool(true)),
      (O::Linger, V::Linger(Linger::new(true, 180))),
      (O::MaxBw, V::U64(u64::MAX)),
    ]))
  }

  fn get(&self, opt: SocketOption) -> Option<OptionValue> {
    self.0.get(&opt).copied()
  }

  fn flag(&self, opt: SocketOption) -> bool {
    matches!(self.get(opt), Some(OptionValue::Bool(true)))
  }

  fn int(&self, opt: SocketOption) -> i64 {
    match self.get(opt) {
      Some(OptionValue::Bool(v)) => i64::from(v),
      Some(OptionValue::U16(v)) => i64::from(v),
      Some(OptionValue::U32(v)) => i64::from(v),
      Some(OptionValue::I32(v)) => i64::from(v),
      Some(OptionValue::U64(v)) => v as i64,
      Some(OptionValue::Linger(l)) => i64::from(l.seconds),
      None => 0,
    }
  }

  fn bytes(&self, opt: SocketOption) -> usize {
    self.int(opt).max(0) as usize
  }
}

#[derive(Debug)]
struct Stats {
  pkt_sent_total: i64,
  pkt_recv_total: i64,
  pkt_sent: i64,
  pkt_recv: i64,
  bytes_sent: u64,
  bytes_recv: u64,
  since: Instant,
}

impl Stats {
  fn new() -> Self {
    Self {
      pkt_sent_total: 0,
      pkt_recv_total: 0,
      pkt_sent: 0,
      pkt_recv: 0,
      bytes_sent: 0,
      bytes_recv: 0,
      since: Instant::now(),
    }
  }

  fn sent(&mut self, packets: i64, bytes: usize) {
    self.pkt_sent_total += packets;
    self.pkt_sent += packets;
    self.bytes_sent += bytes as u64;
  }

  fn received(&mut self, packets: i64, bytes: usize) {
    self.pkt_recv_total += packets;
    self.pkt_recv += packets;
    self.bytes_recv += bytes as u64;
  }

  fn clear_local(&mut self) {
    self.pkt_sent = 0;
    self.pkt_recv = 0;
    self.bytes_sent = 0;
    self.bytes_recv = 0;
    self.since = Instant::now();
  }
}

#[derive(Debug)]
struct Listener {
  tx: Sender<SocketId>,
  rx: Receiver<SocketId>,
}

#[derive(Debug)]
struct Entry {
  family: Family,
  ty: i32,
  state: i32,
  closed: bool,
  opts: Opts,
  local: Option<RawSockaddr>,
  peer: Option<RawSockaddr>,
  peer_id: Option<SocketId>,
  listener: Option<Listener>,
  rendezvous_target: Option<RawSockaddr>,
  stream: BytesMut,
  messages: VecDeque<Bytes>,
  /// Bytes waiting in `stream` or `messages`.
  queued: usize,
  stats: Stats,
  created: Instant,
}

impl Entry {
  fn new(family: Family, ty: i32, opts: Opts) -> Self {
    Self {
      family,
      ty,
      state: INIT,
      closed: false,
      opts,
      local: None,
      peer: None,
      peer_id: None,
      listener: None,
      rendezvous_target: None,
      stream: BytesMut::new(),
      messages: VecDeque::new(),
      queued: 0,
      stats: Stats::new(),
      created: Instant::now(),
    }
  }

  fn is_stream(&self) -> bool {
    self.ty == libc::SOCK_STREAM
  }

  fn is_broken(&self) -> bool {
    self.closed || self.state == BROKEN
  }

  fn free_space(&self) -> usize {
    self.opts.bytes(SocketOption::RcvBuf).saturating_sub(self.queued)
  }

  fn packets(&self, bytes: usize) -> i64 {
    let payload =
      self.opts.bytes(SocketOption::Mss).saturating_sub(PACKET_OVERHEAD);
    bytes.div_ceil(payload.max(1)) as i64
  }

  /// Fails unless the entry can move data right now.
  fn ensure_connected(&self) -> Result<SocketId, i32> {
    if self.is_broken() {
      return Err(code::ECONNLOST);
    }
    match (self.state, self.peer_id) {
      (CONNECTED, Some(peer)) => Ok(peer),
      _ => Err(code::ENOCONN),
    }
  }
}

#[derive(Debug, Default)]
struct Group {
  usocks: BTreeMap<SocketId, Events>,
  ssocks: BTreeMap<SysSocket, Events>,
}

#[derive(Debug, Default)]
struct Found {
  udt_read: Vec<SocketId>,
  udt_write: Vec<SocketId>,
  sys_read: Vec<SysSocket>,
  sys_write: Vec<SysSocket>,
}

impl Found {
  fn total(&self) -> usize {
    self.udt_read.len()
      + self.udt_write.len()
      + self.sys_read.len()
      + self.sys_write.len()
  }

  fn fill(self, ready: &mut ReadySlots) {
    for (found, slots) in [
      (self.udt_read, &mut ready.udt_read),
      (self.udt_write, &mut ready.udt_write),
      (self.sys_read, &mut ready.sys_read),
      (self.sys_write, &mut ready.sys_write),
    ] {
      for id in found {
        if !slots.push(id) {
          break;
        }
      }
    }
  }
}

#[derive(Debug)]
struct Registry {
  next_id: SocketId,
  next_eid: EpollId,
  next_port: u16,
  sockets: HashMap<SocketId, Entry>,
  bound: HashMap<(Family, u16), Vec<SocketId>>,
  groups: HashMap<EpollId, Group>,
}

impl Registry {
  fn new() -> Self {
    Self {
      next_id: FIRST_SOCKET_ID,
      next_eid: 1,
      next_port: FIRST_EPHEMERAL_PORT,
      sockets: HashMap::new(),
      bound: HashMap::new(),
      groups: HashMap::new(),
    }
  }

  fn alloc_id(&mut self) -> SocketId {
    let id = self.next_id;
    self.next_id += 1;
    id
  }

  fn live(&self, sock: SocketId) -> Result<&Entry, i32> {
    match self.sockets.get(&sock) {
      Some(entry) if !entry.closed => Ok(entry),
      _ => Err(code::EINVSOCK),
    }
  }

  fn live_mut(&mut self, sock: SocketId) -> Result<&mut Entry, i32> {
    match self.sockets.get_mut(&sock) {
      Some(entry) if !entry.closed => Ok(entry),
      _ => Err(code::EINVSOCK),
    }
  }

  fn port_in_use(&self, family: Family, port: u16) -> bool {
    self.bound.get(&(family, port)).is_some_and(|ids| !ids.is_empty())
  }

  fn ephemeral_port(&mut self, family: Family) -> Result<u16, i32> {
    let span = usize::from(u16::MAX - FIRST_EPHEMERAL_PORT) + 1;
    for _ in 0..span {
      let port = self.next_port;
      self.next_port = if port == u16::MAX {
        FIRST_EPHEMERAL_PORT
      } else {
        port + 1
      };
      if !self.port_in_use(family, port) {
        return Ok(port);
      }
    }
    Err(code::ESOCKFAIL)
  }

  fn bind(&mut self, sock: SocketId, addr: &RawSockaddr) -> Result<(), i32> {
    let entry = self.live(sock)?;
    if entry.state != INIT {
      return Err(code::EINVOP);
    }
    let family = entry.family;
    if addr.family != family.as_raw() {
      return Err(code::EINVPARAM);
    }
    let ip = addr.to_std().map_err(|_| code::EINVPARAM)?.ip();
    if !(ip.is_loopback() || ip.is_unspecified()) {
      return Err(code::ESOCKFAIL);
    }

    let reuse = entry.opts.flag(SocketOption::ReuseAddr);
    let port = if addr.port == 0 {
      self.ephemeral_port(family)?
    } else {
      let holders = self.bound.get(&(family, addr.port));
      let conflict = holders.into_iter().flatten().any(|id| {
        self
          .sockets
          .get(id)
          .is_some_and(|e| !reuse || !e.opts.flag(SocketOption::ReuseAddr))
      });
      if conflict {
        return Err(code::ESOCKFAIL);
      }
      addr.port
    };

    self.bound.entry((family, port)).or_default().push(sock);
    let entry = self.live_mut(sock)?;
    entry.local = Some(RawSockaddr { port, ..*addr });
    entry.state = OPENED;
    Ok(())
  }

  fn unbind(
    &mut self,
    sock: SocketId,
    family: Family,
    local: Option<RawSockaddr>,
  ) {
    let Some(local) = local else { return };
    if let Some(ids) = self.bound.get_mut(&(family, local.port)) {
      ids.retain(|id| *id != sock);
      if ids.is_empty() {
        self.bound.remove(&(family, local.port));
      }
    }
  }

  fn listener_on(&self, family: Family, port: u16) -> Option<SocketId> {
    self.bound.get(&(family, port))?.iter().copied().find(|id| {
      self
        .sockets
        .get(id)
        .is_some_and(|e| !e.closed && e.listener.is_some())
    })
  }

  fn close(&mut self, sock: SocketId) -> Result<(), i32> {
    let entry = self.live_mut(sock)?;
    entry.closed = true;
    entry.state = BROKEN;
    entry.stream.clear();
    entry.messages.clear();
    entry.queued = 0;
    entry.rendezvous_target = None;
    let family = entry.family;
    let local = entry.local;
    let peer = entry.peer_id.take();
    let listener = entry.listener.take();

    self.unbind(sock, family, local);

    if let Some(peer) = peer.and_then(|p| self.sockets.get_mut(&p)) {
      if !peer.closed {
        peer.state = BROKEN;
      }
    }

    if let Some(Listener { tx, rx }) = listener {
      drop(tx);
      let pending: Vec<SocketId> = rx.try_iter().collect();
      for id in pending {
        let _ = self.close(id);
      }
    }
    Ok(())
  }

  fn readiness(&self, entry: &Entry) -> Events {
    if let Some(listener) = &entry.listener {
      return if listener.rx.is_empty() { Events::NONE } else { Events::IN };
    }

    let mut events = Events::NONE;
    if entry.queued > 0 {
      events |= Events::IN;
    }
    if entry.is_broken() {
      return events | Events::ERR;
    }
    if entry.state == CONNECTED {
      let peer = entry.peer_id.and_then(|p| self.sockets.get(&p));
      if peer.is_some_and(|p| p.free_space() > 0) {
        events |= Events::OUT;
      }
    }
    events
  }

  fn push_stream(&mut self, sock: SocketId, data: &[u8]) -> Attempt<usize> {
    if data.is_empty() {
      return Ok(Some(0));
    }
    let entry = self.live(sock)?;
    let peer_id = entry.ensure_connected()?;
    let packets_for = |n| entry.packets(n);

    let peer = match self.sockets.get(&peer_id) {
      Some(peer) if !peer.closed => peer,
      _ => return Err(code::ECONNLOST),
    };
    let n = peer.free_space().min(data.len());
    if n == 0 {
      return Ok(None);
    }
    let packets = packets_for(n);

    if let Some(peer) = self.sockets.get_mut(&peer_id) {
      peer.stream.extend_from_slice(&data[..n]);
      peer.queued += n;
      peer.stats.received(packets, n);
    }
    if let Some(entry) = self.sockets.get_mut(&sock) {
      entry.stats.sent(packets, n);
    }
    Ok(Some(n))
  }

  fn pull_stream(&mut self, sock: SocketId, buf: &mut [u8]) -> Attempt<usize> {
    let entry = self.live_mut(sock)?;
    if buf.is_empty() {
      return Ok(Some(0));
    }
    if entry.queued > 0 {
      let n = entry.queued.min(buf.len());
      let chunk = entry.stream.split_to(n);
      buf[..n].copy_from_slice(&chunk);
      entry.queued -= n;
      return Ok(Some(n));
    }
    entry.ensure_connected()?;
    Ok(None)
  }

  fn push_message(&mut self, sock: SocketId, data: &[u8]) -> Attempt<usize> {
    let entry = self.live(sock)?;
    let peer_id = entry.ensure_connected()?;
    let packets = entry.packets(data.len()).max(1);

    let peer = match self.sockets.get_mut(&peer_id) {
      Some(peer) if !peer.closed => peer,
      _ => return Err(code::ECONNLOST),
    };
    // An oversized message still goes out once the queue is drained.
    if peer.free_space() < data.len() && peer.queued > 0 {
      return Ok(None);
    }
    peer.messages.push_back(Bytes::copy_from_slice(data));
    peer.queued += data.len();
    peer.stats.received(packets, data.len());

    if let Some(entry) = self.sockets.get_mut(&sock) {
      entry.stats.sent(packets, data.len());
    }
    Ok(Some(data.len()))
  }

  fn pull_message(&mut self, sock: SocketId, buf: &mut [u8]) -> Attempt<usize> {
    let entry = self.live_mut(sock)?;
    if let Some(msg) = entry.messages.pop_front() {
      entry.queued -= msg.len();
      // The tail of a message that does not fit is discarded.
      let n = msg.len().min(buf.len());
      buf[..n].copy_from_slice(&msg[..n]);
      return Ok(Some(n));
    }
    entry.ensure_connected()?;
    Ok(None)
  }
}

/// Engine that runs entirely inside the process.
///
/// ```
/// use std::sync::Arc;
/// use udt::{Config, Udt, engine::Loopback};
///
/// let engine = Arc::new(Loopback::new());
/// let udt = Udt::startup_with(engine.clone(), Config::default()).unwrap();
/// assert!(engine.native_calls() > 0);
/// udt.cleanup().unwrap();
/// ```
pub struct Loopback {
  registry: Mutex<Registry>,
  cond: Condvar,
  calls: AtomicU64,
  rendezvous_timeout: Duration,
}

impl std::fmt::Debug for Loopback {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Loopback")
      .field("calls", &self.native_calls())
      .field("rendezvous_timeout", &self.rendezvous_timeout)
      .finish_non_exhaustive()
  }
}

impl Default for Loopback {
  fn default() -> Self {
    Self::new()
  }
}

impl Loopback {
  pub fn new() -> Self {
    Self {
      registry: Mutex::new(Registry::new()),
      cond: Condvar::new(),
      calls: AtomicU64::new(0),
      rendezvous_timeout: Duration::from_millis(DEFAULT_RENDEZVOUS_TIMEOUT_MS),
    }
  }

  /// How long a rendezvous connect waits for its counterpart.
  pub fn with_rendezvous_timeout(mut self, timeout: Duration) -> Self {
    self.rendezvous_timeout = timeout;
    self
  }

  /// Number of engine calls made so far.
  pub fn native_calls(&self) -> u64 {
    self.calls.load(Ordering::Relaxed)
  }

  fn call<T>(&self, f: impl FnOnce() -> Result<T, i32>) -> EngineResult<T> {
    self.calls.fetch_add(1, Ordering::Relaxed);
    f().map_err(|code| {
      let err = NativeError::from_code(code);
      LAST_ERROR.with(|last| *last.borrow_mut() = err.clone());
      err
    })
  }

  fn lock(&self) -> MutexGuard<'_, Registry> {
    self.registry.lock()
  }

  /// Retries `attempt` under the registry lock until it produces a value,
  /// fails, or `deadline` passes.
  fn block_on<T>(
    &self,
    deadline: Deadline,
    mut attempt: impl FnMut(&mut Registry) -> Attempt<T>,
  ) -> Result<T, i32> {
    let mut reg = self.lock();
    loop {
      if let Some(value) = attempt(&mut *reg)? {
        self.cond.notify_all();
        return Ok(value);
      }
      reg = match deadline {
        Deadline::Never => self.cond.wait(reg),
        Deadline::At(at, expired) => {
          let now = Instant::now();
          if now >= at {
            return Err(expired);
          }
          self.cond.wait_timeout(reg, at - now).0
        }
      };
    }
  }

  fn send_deadline(&self, sock: SocketId) -> Result<Deadline, i32> {
    let reg = self.lock();
    let entry = reg.live(sock)?;
    Ok(Deadline::for_call(
      entry.opts.flag(SocketOption::SndSyn),
      entry.opts.int(SocketOption::SndTimeo),
      code::EASYNCSND,
    ))
  }

  fn recv_deadline(&self, sock: SocketId) -> Result<Deadline, i32> {
    let reg = self.lock();
    let entry = reg.live(sock)?;
    Ok(Deadline::for_call(
      entry.opts.flag(SocketOption::RcvSyn),
      entry.opts.int(SocketOption::RcvTimeo),
      code::EASYNCRCV,
    ))
  }

  fn check_type(&self, sock: SocketId, stream: bool) -> Result<(), i32> {
    let reg = self.lock();
    match reg.live(sock)?.is_stream() {
      true if !stream => Err(code::ESTREAMILL),
      false if stream => Err(code::EDGRAMILL),
      _ => Ok(()),
    }
  }

  fn do_connect(&self, sock: SocketId, addr: &RawSockaddr) -> Result<(), i32> {
    let family = Family::from_raw(addr.family).map_err(|_| code::EINVPARAM)?;
    let ip = addr.to_std().map_err(|_| code::EINVPARAM)?.ip();

    let mut reg = self.lock();
    let entry = reg.live(sock)?;
    if entry.family != family {
      return Err(code::EINVPARAM);
    }
    if entry.state != INIT && entry.state != OPENED {
      return Err(code::ECONNSOCK);
    }
    let rendezvous = entry.opts.flag(SocketOption::Rendezvous);
    if rendezvous && entry.state == INIT {
      return Err(code::ERDVUNBOUND);
    }
    if !(ip.is_loopback() || ip.is_unspecified()) {
      return Err(code::ENOSERVER);
    }
    if entry.state == INIT {
      reg.bind(sock, &RawSockaddr::unspecified(family, 0))?;
    }
    if rendezvous {
      return self.rendezvous(reg, sock, family, addr);
    }

    let listener_id =
      reg.listener_on(family, addr.port).ok_or(code::ENOSERVER)?;
    let client = reg.live(sock)?;
    let client_ty = client.ty;
    let client_port = client.local.map_or(0, |l| l.port);
    let listener = reg.live(listener_id)?;
    if listener.ty != client_ty {
      return Err(code::ECONNREJ);
    }
    let opts = listener.opts.clone();
    let tx = match &listener.listener {
      Some(l) => l.tx.clone(),
      None => return Err(code::ENOSERVER),
    };

    let client_local = RawSockaddr { port: client_port, ..*addr };
    let server_id = reg.alloc_id();
    let mut server = Entry::new(family, client_ty, opts);
    server.state = CONNECTED;
    server.local = Some(*addr);
    server.peer = Some(client_local);
    server.peer_id = Some(sock);
    reg.sockets.insert(server_id, server);

    match tx.try_send(server_id) {
      Ok(()) => {}
      Err(err) => {
        reg.sockets.remove(&server_id);
        return Err(match err {
          TrySendError::Full(_) => code::ECONNREJ,
          TrySendError::Disconnected(_) => code::ENOSERVER,
        });
      }
    }

    let client = reg.live_mut(sock)?;
    client.state = CONNECTED;
    client.local = Some(client_local);
    client.peer = Some(*addr);
    client.peer_id = Some(server_id);
    self.cond.notify_all();
    Ok(())
  }

  fn rendezvous(
    &self,
    mut reg: MutexGuard<'_, Registry>,
    sock: SocketId,
    family: Family,
    addr: &RawSockaddr,
  ) -> Result<(), i32> {
    let my_port = reg.live(sock)?.local.map_or(0, |l| l.port);

    let counterpart = reg
      .bound
      .get(&(family, addr.port))
      .into_iter()
      .flatten()
      .copied()
      .find(|id| {
        reg.sockets.get(id).is_some_and(|e| {
          !e.closed
            && e.state == CONNECTING
            && e.rendezvous_target.is_some_and(|t| t.port == my_port)
        })
      });

    if let Some(other_id) = counterpart {
      if let Some(other) = reg.sockets.get_mut(&other_id) {
        other.state = CONNECTED;
        other.peer = Some(RawSockaddr { port: my_port, ..*addr });
        other.peer_id = Some(sock);
        other.rendezvous_target = None;
      }
      let me = reg.live_mut(sock)?;
      me.state = CONNECTED;
      me.peer = Some(*addr);
      me.peer_id = Some(other_id);
      self.cond.notify_all();
      return Ok(());
    }

    let me = reg.live_mut(sock)?;
    me.state = CONNECTING;
    me.rendezvous_target = Some(*addr);
    let deadline = Instant::now() + self.rendezvous_timeout;
    loop {
      if reg.live(sock)?.state == CONNECTED {
        return Ok(());
      }
      let now = Instant::now();
      if now >= deadline {
        let me = reg.live_mut(sock)?;
        me.state = OPENED;
        me.rendezvous_target = None;
        return Err(code::ENOSERVER);
      }
      reg = self.cond.wait_timeout(reg, deadline - now).0;
    }
  }

  fn do_accept(&self, sock: SocketId) -> Result<(SocketId, RawSockaddr), i32> {
    let (rx, blocking) = {
      let reg = self.lock();
      let entry = reg.live(sock)?;
      if entry.opts.flag(SocketOption::Rendezvous) {
        return Err(code::ERDVNOSERV);
      }
      let Some(listener) = &entry.listener else {
        return Err(code::ENOLISTEN);
      };
      (listener.rx.clone(), entry.opts.flag(SocketOption::RcvSyn))
    };

    // The queue is drained outside the registry lock so connects proceed.
    let id = if blocking {
      rx.recv().map_err(|_| code::EINVSOCK)?
    } else {
      match rx.try_recv() {
        Ok(id) => id,
        Err(TryRecvError::Empty) => return Err(code::EASYNCRCV),
        Err(TryRecvError::Disconnected) => return Err(code::EINVSOCK),
      }
    };

    let reg = self.lock();
    let accepted = reg.sockets.get(&id).ok_or(code::EINVSOCK)?;
    let peer = accepted.peer.ok_or(code::ECONNLOST)?;
    Ok((id, peer))
  }

  fn do_listen(&self, sock: SocketId, backlog: i32) -> Result<(), i32> {
    let mut reg = self.lock();
    let entry = reg.live(sock)?;
    match entry.state {
      LISTENING => return Ok(()),
      INIT => return Err(code::EUNBOUNDSOCK),
      OPENED => {}
      _ => return Err(code::ECONNSOCK),
    }
    if entry.opts.flag(SocketOption::Rendezvous) {
      return Err(code::ERDVNOSERV);
    }
    if backlog <= 0 {
      return Err(code::EINVPARAM);
    }
    let family = entry.family;
    let port = entry.local.map_or(0, |l| l.port);
    if reg.listener_on(family, port).is_some() {
      return Err(code::EDUPLISTEN);
    }

    let (tx, rx) = crossbeam_channel::bounded(backlog as usize);
    let entry = reg.live_mut(sock)?;
    entry.listener = Some(Listener { tx, rx });
    entry.state = LISTENING;
    Ok(())
  }

  fn do_get_opt(
    &self,
    sock: SocketId,
    opt: i32,
    buf: &mut [u8],
  ) -> Result<usize, i32> {
    let reg = self.lock();
    let entry = reg.live(sock)?;
    let option = SocketOption::from_code(opt).ok_or(code::EINVOP)?;
    let value = match option {
      SocketOption::Cc => return Err(code::EINVOP),
      SocketOption::State => OptionValue::I32(entry.state),
      SocketOption::Event => OptionValue::I32(reg.readiness(entry).bits()),
      SocketOption::SndData => OptionValue::I32(0),
      SocketOption::RcvData => {
        OptionValue::I32(i32::try_from(entry.queued).unwrap_or(i32::MAX))
      }
      other => entry.opts.get(other).ok_or(code::EINVOP)?,
    };

    let bytes = option::to_engine_bytes(&value);
    let out = buf.get_mut(..bytes.len()).ok_or(code::EINVPARAM)?;
    out.copy_from_slice(&bytes);
    Ok(bytes.len())
  }

  fn do_set_opt(
    &self,
    sock: SocketId,
    opt: i32,
    raw: &[u8],
  ) -> Result<(), i32> {
    let mut reg = self.lock();
    let entry = reg.live_mut(sock)?;
    let option = SocketOption::from_code(opt).ok_or(code::EINVOP)?;
    if option == SocketOption::Cc || !option.is_writable() {
      return Err(code::EINVOP);
    }
    let mut value = option::decode(option, raw).map_err(|_| code::EINVPARAM)?;

    match (option, value) {
      (SocketOption::Mss, OptionValue::U16(mss)) => {
        if entry.state != INIT {
          return Err(code::EBOUNDSOCK);
        }
        if u32::from(mss) < MIN_MSS {
          return Err(code::EINVPARAM);
        }
      }
      (
        SocketOption::SndBuf
        | SocketOption::RcvBuf
        | SocketOption::UdpSndBuf
        | SocketOption::UdpRcvBuf,
        OptionValue::U32(size),
      ) => {
        if entry.state != INIT {
          return Err(code::EBOUNDSOCK);
        }
        if size == 0 {
          return Err(code::EINVPARAM);
        }
      }
      (SocketOption::ReuseAddr, _) if entry.state != INIT => {
        return Err(code::EBOUNDSOCK);
      }
      (SocketOption::Rendezvous, _) if entry.state > OPENED => {
        return Err(code::ECONNSOCK);
      }
      (SocketOption::Fc, OptionValue::U32(window)) => {
        if window == 0 {
          return Err(code::EINVPARAM);
        }
        value = OptionValue::U32(window.max(MIN_FLOW_WINDOW));
      }
      _ => {}
    }

    entry.opts.0.insert(option, value);
    self.cond.notify_all();
    Ok(())
  }

  fn do_send_file(
    &self,
    sock: SocketId,
    path: &Path,
    offset: &mut i64,
    size: i64,
    block: i32,
  ) -> Result<i64, i32> {
    if block <= 0 || size < 0 || *offset < 0 {
      return Err(code::EINVPARAM);
    }
    self.check_type(sock, true)?;
    self.lock().live(sock)?.ensure_connected()?;

    let mut file = File::open(path).map_err(|_| code::EFILE)?;
    file
      .seek(SeekFrom::Start(*offset as u64))
      .map_err(|_| code::EINVRDOFF)?;

    let block = i64::from(block);
    let mut chunk = vec![0u8; block.min(size) as usize];
    let mut sent = 0i64;
    while sent < size {
      let want = (size - sent).min(block) as usize;
      file.read_exact(&mut chunk[..want]).map_err(|_| code::ERDPERM)?;

      let mut done = 0;
      while done < want {
        let n = self.block_on(Deadline::Never, |reg| {
          reg.push_stream(sock, &chunk[done..want])
        })?;
        done += n;
        sent += n as i64;
        *offset += n as i64;
      }
      tracing::trace!(sock, sent, size, "loopback file chunk sent");
    }
    Ok(sent)
  }

  fn do_recv_file(
    &self,
    sock: SocketId,
    path: &Path,
    offset: &mut i64,
    size: i64,
    block: i32,
  ) -> Result<i64, i32> {
    if block <= 0 || size < 0 || *offset < 0 {
      return Err(code::EINVPARAM);
    }
    self.check_type(sock, true)?;

    let mut file = OpenOptions::new()
      .write(true)
      .create(true)
      .truncate(false)
      .open(path)
      .map_err(|_| code::EFILE)?;
    file
      .seek(SeekFrom::Start(*offset as u64))
      .map_err(|_| code::EINVWROFF)?;

    let block = i64::from(block);
    let mut chunk = vec![0u8; block.min(size) as usize];
    let mut received = 0i64;
    while received < size {
      let want = (size - received).min(block) as usize;
      let mut got = 0;
      while got < want {
        let n = self.block_on(Deadline::Never, |reg| {
          reg.pull_stream(sock, &mut chunk[got..want])
        })?;
        file.write_all(&chunk[got..got + n]).map_err(|_| code::EWRPERM)?;
        got += n;
        received += n as i64;
        *offset += n as i64;
      }
      tracing::trace!(sock, received, size, "loopback file chunk received");
    }
    file.flush().map_err(|_| code::EWRPERM)?;
    Ok(received)
  }

  fn do_perfmon(&self, sock: SocketId, clear: bool) -> Result<TraceInfo, i32> {
    let mut reg = self.lock();
    let entry = reg.live_mut(sock)?;
    if entry.state != CONNECTED && entry.state != BROKEN {
      return Err(code::ENOCONN);
    }

    let elapsed_us = entry.stats.since.elapsed().as_secs_f64() * 1e6;
    let rate = |bytes: u64| {
      if elapsed_us > 0.0 { bytes as f64 * 8.0 / elapsed_us } else { 0.0 }
    };
    let clamp = |n: usize| i32::try_from(n).unwrap_or(i32::MAX);
    let stats = &entry.stats;

    let info = TraceInfo {
      ms_timestamp: entry.created.elapsed().as_millis() as i64,
      pkt_sent_total: stats.pkt_sent_total,
      pkt_recv_total: stats.pkt_recv_total,
      us_snd_duration_total: 0,
      pkt_sent: stats.pkt_sent,
      pkt_recv: stats.pkt_recv,
      mbps_send_rate: rate(stats.bytes_sent),
      mbps_recv_rate: rate(stats.bytes_recv),
      us_pkt_snd_period: 1.0,
      pkt_flow_window: clamp(entry.opts.bytes(SocketOption::Fc)),
      pkt_congestion_window: CONGESTION_WINDOW,
      ms_rtt: 0.0,
      byte_avail_snd_buf: clamp(entry.opts.bytes(SocketOption::SndBuf)),
      byte_avail_rcv_buf: clamp(entry.free_space()),
      ..TraceInfo::default()
    };

    if clear {
      entry.stats.clear_local();
    }
    Ok(info)
  }

  fn do_epoll_wait(
    &self,
    eid: EpollId,
    ready: &mut ReadySlots,
    timeout_ms: i64,
  ) -> Result<usize, i32> {
    ready.clear();
    let deadline = u64::try_from(timeout_ms)
      .ok()
      .map(|ms| Instant::now() + Duration::from_millis(ms));

    let mut reg = self.lock();
    loop {
      let group = reg.groups.get(&eid).ok_or(code::EINVPOLLID)?;
      if deadline.is_none() && group.usocks.is_empty() && group.ssocks.is_empty()
      {
        return Err(code::EINVPARAM);
      }

      let mut found = Found::default();
      for (&sock, &want) in &group.usocks {
        let Some(entry) = reg.sockets.get(&sock) else { continue };
        let events = reg.readiness(entry);
        let failed = events.is_error();
        if (want.is_readable() && events.is_readable())
          || (failed && (want.is_readable() || want.is_error()))
        {
          found.udt_read.push(sock);
        }
        if (want.is_writable() && events.is_writable())
          || (failed && (want.is_writable() || want.is_error()))
        {
          found.udt_write.push(sock);
        }
      }
      poll_system(&group.ssocks, &mut found);

      let total = found.total();
      if total > 0 {
        found.fill(ready);
        return Ok(total);
      }

      let has_sys = !group.ssocks.is_empty();
      reg = match deadline {
        None if has_sys => self.cond.wait_timeout(reg, SYS_POLL_SLICE).0,
        None => self.cond.wait(reg),
        Some(at) => {
          let now = Instant::now();
          if now >= at {
            return Err(code::ETIMEOUT);
          }
          let mut slice = at - now;
          if has_sys {
            slice = slice.min(SYS_POLL_SLICE);
          }
          self.cond.wait_timeout(reg, slice).0
        }
      };
    }
  }

  fn with_group(
    &self,
    eid: EpollId,
    f: impl FnOnce(&mut Group),
  ) -> Result<(), i32> {
    let mut reg = self.lock();
    let group = reg.groups.get_mut(&eid).ok_or(code::EINVPOLLID)?;
    f(group);
    self.cond.notify_all();
    Ok(())
  }
}

/// Checks system sockets without blocking.
fn poll_system(ssocks: &BTreeMap<SysSocket, Events>, found: &mut Found) {
  if ssocks.is_empty() {
    return;
  }
  let mut fds: Vec<libc::pollfd> = ssocks
    .iter()
    .map(|(&fd, &want)| {
      let mut events = 0;
      if want.is_readable() {
        events |= libc::POLLIN;
      }
      if want.is_writable() {
        events |= libc::POLLOUT;
      }
      libc::pollfd { fd, events, revents: 0 }
    })
    .collect();

  if syscall!(poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, 0)).is_err() {
    return;
  }

  for (pfd, (&fd, &want)) in fds.iter().zip(ssocks) {
    let failed = pfd.revents & (libc::POLLERR | libc::POLLHUP) != 0;
    if (want.is_readable() && pfd.revents & libc::POLLIN != 0)
      || (failed && (want.is_readable() || want.is_error()))
    {
      found.sys_read.push(fd);
    }
    if (want.is_writable() && pfd.revents & libc::POLLOUT != 0)
      || (failed && (want.is_writable() || want.is_error()))
    {
      found.sys_write.push(fd);
    }
  }
}

impl Engine for Loopback {
  fn startup(&self) -> EngineResult<()> {
    self.call(|| Ok(()))
  }

  fn cleanup(&self) -> EngineResult<()> {
    self.call(|| {
      let mut reg = self.lock();
      let ids: Vec<SocketId> = reg.sockets.keys().copied().collect();
      for id in ids {
        let _ = reg.close(id);
      }
      reg.sockets.clear();
      reg.bound.clear();
      reg.groups.clear();
      self.cond.notify_all();
      Ok(())
    })
  }

  fn socket(&self, family: i32, ty: i32) -> EngineResult<SocketId> {
    self.call(|| {
      let family = Family::from_raw(family).map_err(|_| code::EINVPARAM)?;
      if ty != libc::SOCK_STREAM && ty != libc::SOCK_DGRAM {
        return Err(code::EINVPARAM);
      }
      let mut reg = self.lock();
      let id = reg.alloc_id();
      reg.sockets.insert(id, Entry::new(family, ty, Opts::defaults()));
      Ok(id)
    })
  }

  fn bind(&self, sock: SocketId, addr: &RawSockaddr) -> EngineResult<()> {
    self.call(|| self.lock().bind(sock, addr))
  }

  fn listen(&self, sock: SocketId, backlog: i32) -> EngineResult<()> {
    self.call(|| self.do_listen(sock, backlog))
  }

  fn accept(&self, sock: SocketId) -> EngineResult<(SocketId, RawSockaddr)> {
    self.call(|| self.do_accept(sock))
  }

  fn connect(&self, sock: SocketId, addr: &RawSockaddr) -> EngineResult<()> {
    self.call(|| self.do_connect(sock, addr))
  }

  fn close(&self, sock: SocketId) -> EngineResult<()> {
    self.call(|| {
      self.lock().close(sock)?;
      self.cond.notify_all();
      Ok(())
    })
  }

  fn sock_state(&self, sock: SocketId) -> EngineResult<i32> {
    self.call(|| {
      Ok(match self.lock().sockets.get(&sock) {
        None => NONEXIST,
        Some(entry) if entry.closed => BROKEN,
        Some(entry) => entry.state,
      })
    })
  }

  fn sock_name(&self, sock: SocketId) -> EngineResult<RawSockaddr> {
    self.call(|| self.lock().live(sock)?.local.ok_or(code::ENOCONN))
  }

  fn peer_name(&self, sock: SocketId) -> EngineResult<RawSockaddr> {
    self.call(|| {
      let reg = self.lock();
      let entry = reg.live(sock)?;
      if entry.state != CONNECTED {
        return Err(code::ENOCONN);
      }
      entry.peer.ok_or(code::ENOCONN)
    })
  }

  fn get_opt(
    &self,
    sock: SocketId,
    opt: i32,
    buf: &mut [u8],
  ) -> EngineResult<usize> {
    self.call(|| self.do_get_opt(sock, opt, buf))
  }

  fn set_opt(
    &self,
    sock: SocketId,
    opt: i32,
    value: &[u8],
  ) -> EngineResult<()> {
    self.call(|| self.do_set_opt(sock, opt, value))
  }

  fn send(&self, sock: SocketId, buf: &[u8]) -> EngineResult<usize> {
    self.call(|| {
      self.check_type(sock, true)?;
      let deadline = self.send_deadline(sock)?;
      self.block_on(deadline, |reg| reg.push_stream(sock, buf))
    })
  }

  fn recv(&self, sock: SocketId, buf: &mut [u8]) -> EngineResult<usize> {
    self.call(|| {
      self.check_type(sock, true)?;
      let deadline = self.recv_deadline(sock)?;
      self.block_on(deadline, |reg| reg.pull_stream(sock, buf))
    })
  }

  fn send_msg(
    &self,
    sock: SocketId,
    buf: &[u8],
    _ttl_ms: i32,
    _in_order: bool,
  ) -> EngineResult<usize> {
    self.call(|| {
      self.check_type(sock, false)?;
      {
        let reg = self.lock();
        let limit = reg.live(sock)?.opts.bytes(SocketOption::SndBuf);
        if buf.len() > limit {
          return Err(code::ELARGEMSG);
        }
      }
      let deadline = self.send_deadline(sock)?;
      self.block_on(deadline, |reg| reg.push_message(sock, buf))
    })
  }

  fn recv_msg(&self, sock: SocketId, buf: &mut [u8]) -> EngineResult<usize> {
    self.call(|| {
      self.check_type(sock, false)?;
      let deadline = self.recv_deadline(sock)?;
      self.block_on(deadline, |reg| reg.pull_message(sock, buf))
    })
  }

  fn send_file(
    &self,
    sock: SocketId,
    path: &Path,
    offset: &mut i64,
    size: i64,
    block: i32,
  ) -> EngineResult<i64> {
    self.call(|| self.do_send_file(sock, path, offset, size, block))
  }

  fn recv_file(
    &self,
    sock: SocketId,
    path: &Path,
    offset: &mut i64,
    size: i64,
    block: i32,
  ) -> EngineResult<i64> {
    self.call(|| self.do_recv_file(sock, path, offset, size, block))
  }

  fn perfmon(&self, sock: SocketId, clear: bool) -> EngineResult<TraceInfo> {
    self.call(|| self.do_perfmon(sock, clear))
  }

  fn epoll_create(&self) -> EngineResult<EpollId> {
    self.call(|| {
      let mut reg = self.lock();
      let eid = reg.next_eid;
      reg.next_eid += 1;
      reg.groups.insert(eid, Group::default());
      Ok(eid)
    })
  }

  fn epoll_add_usock(
    &self,
    eid: EpollId,
    sock: SocketId,
    events: Events,
  ) -> EngineResult<()> {
    self.call(|| {
      self.lock().live(sock)?;
      self.with_group(eid, |g| {
        g.usocks.insert(sock, events);
      })
    })
  }

  fn epoll_add_ssock(
    &self,
    eid: EpollId,
    fd: SysSocket,
    events: Events,
  ) -> EngineResult<()> {
    self.call(|| {
      self.with_group(eid, |g| {
        g.ssocks.insert(fd, events);
      })
    })
  }

  fn epoll_remove_usock(
    &self,
    eid: EpollId,
    sock: SocketId,
  ) -> EngineResult<()> {
    self.call(|| {
      self.with_group(eid, |g| {
        g.usocks.remove(&sock);
      })
    })
  }

  fn epoll_remove_ssock(
    &self,
    eid: EpollId,
    fd: SysSocket,
  ) -> EngineResult<()> {
    self.call(|| {
      self.with_group(eid, |g| {
        g.ssocks.remove(&fd);
      })
    })
  }

  fn epoll_wait(
    &self,
    eid: EpollId,
    ready: &mut ReadySlots,
    timeout_ms: i64,
  ) -> EngineResult<usize> {
    self.call(|| self.do_epoll_wait(eid, ready, timeout_ms))
  }

  fn epoll_release(&self, eid: EpollId) -> EngineResult<()> {
    self.call(|| {
      self.lock().groups.remove(&eid).ok_or(code::EINVPOLLID)?;
      self.cond.notify_all();
      Ok(())
    })
  }

  fn last_error(&self) -> NativeError {
    LAST_ERROR.with(|last| last.borrow().clone())
  }

  fn clear_last_error(&self) {
    LAST_ERROR.with(|last| {
      *last.borrow_mut() = NativeError::from_code(code::SUCCESS);
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::Ipv4Addr;

  fn localhost(port: u16) -> RawSockaddr {
    RawSockaddr::v4(Ipv4Addr::LOCALHOST, port)
  }

  fn listener(engine: &Loopback) -> (SocketId, u16) {
    let sock = engine.socket(libc::AF_INET, libc::SOCK_STREAM).unwrap();
    engine.bind(sock, &RawSockaddr::v4(Ipv4Addr::UNSPECIFIED, 0)).unwrap();
    engine.listen(sock, 4).unwrap();
    let port = engine.sock_name(sock).unwrap().port;
    (sock, port)
  }

  #[test]
  fn failures_set_last_error() {
    let engine = Loopback::new();
    let err = engine.close(42).unwrap_err();
    assert_eq!(err.code, code::EINVSOCK);
    assert_eq!(engine.last_error(), err);
    engine.clear_last_error();
    assert_eq!(engine.last_error().code, code::SUCCESS);
  }

  #[test]
  fn ephemeral_ports_are_distinct() {
    let engine = Loopback::new();
    let (_, a) = listener(&engine);
    let (_, b) = listener(&engine);
    assert_ne!(a, b);
    assert!(a >= FIRST_EPHEMERAL_PORT);
  }

  #[test]
  fn second_listener_on_port_is_rejected() {
    let engine = Loopback::new();
    let (_, port) = listener(&engine);
    let other = engine.socket(libc::AF_INET, libc::SOCK_STREAM).unwrap();
    engine.bind(other, &localhost(port)).unwrap();
    assert_eq!(engine.listen(other, 1).unwrap_err().code, code::EDUPLISTEN);
  }

  #[test]
  fn exclusive_bind_conflicts() {
    let engine = Loopback::new();
    let (_, port) = listener(&engine);
    let other = engine.socket(libc::AF_INET, libc::SOCK_STREAM).unwrap();
    engine
      .set_opt(other, SocketOption::ReuseAddr.code(), &[0])
      .unwrap();
    assert_eq!(
      engine.bind(other, &localhost(port)).unwrap_err().code,
      code::ESOCKFAIL
    );
  }

  #[test]
  fn full_backlog_rejects() {
    let engine = Loopback::new();
    let sock = engine.socket(libc::AF_INET, libc::SOCK_STREAM).unwrap();
    engine.bind(sock, &localhost(0)).unwrap();
    engine.listen(sock, 1).unwrap();
    let port = engine.sock_name(sock).unwrap().port;

    let first = engine.socket(libc::AF_INET, libc::SOCK_STREAM).unwrap();
    engine.connect(first, &localhost(port)).unwrap();
    let second = engine.socket(libc::AF_INET, libc::SOCK_STREAM).unwrap();
    assert_eq!(
      engine.connect(second, &localhost(port)).unwrap_err().code,
      code::ECONNREJ
    );
  }

  #[test]
  fn connect_without_listener_fails() {
    let engine = Loopback::new();
    let sock = engine.socket(libc::AF_INET, libc::SOCK_STREAM).unwrap();
    assert_eq!(
      engine.connect(sock, &localhost(1)).unwrap_err().code,
      code::ENOSERVER
    );
  }

  #[test]
  fn non_blocking_accept_would_block() {
    let engine = Loopback::new();
    let (sock, _) = listener(&engine);
    engine.set_opt(sock, SocketOption::RcvSyn.code(), &[0]).unwrap();
    assert_eq!(engine.accept(sock).unwrap_err().code, code::EASYNCRCV);
  }

  #[test]
  fn mss_after_bind_is_rejected() {
    let engine = Loopback::new();
    let (sock, _) = listener(&engine);
    let raw = 1000i32.to_le_bytes();
    assert_eq!(
      engine.set_opt(sock, SocketOption::Mss.code(), &raw).unwrap_err().code,
      code::EBOUNDSOCK
    );
  }

  #[test]
  fn flow_window_is_clamped() {
    let engine = Loopback::new();
    let sock = engine.socket(libc::AF_INET, libc::SOCK_STREAM).unwrap();
    engine
      .set_opt(sock, SocketOption::Fc.code(), &4i32.to_le_bytes())
      .unwrap();
    let mut buf = [0u8; 8];
    let n = engine.get_opt(sock, SocketOption::Fc.code(), &mut buf).unwrap();
    assert_eq!(&buf[..n], &32i32.to_le_bytes());
  }

  #[test]
  fn rendezvous_pairs_both_sides() {
    let engine = std::sync::Arc::new(Loopback::new());
    let mut socks = Vec::new();
    for _ in 0..2 {
      let sock = engine.socket(libc::AF_INET, libc::SOCK_STREAM).unwrap();
      engine.set_opt(sock, SocketOption::Rendezvous.code(), &[1]).unwrap();
      engine.bind(sock, &localhost(0)).unwrap();
      socks.push((sock, engine.sock_name(sock).unwrap().port));
    }
    let (a, a_port) = socks[0];
    let (b, b_port) = socks[1];

    let waiter = {
      let engine = engine.clone();
      std::thread::spawn(move || engine.connect(a, &localhost(b_port)))
    };
    // Keep retrying until `a` is waiting for its counterpart.
    loop {
      if engine.sock_state(a).unwrap() == CONNECTING {
        break;
      }
      std::thread::yield_now();
    }
    engine.connect(b, &localhost(a_port)).unwrap();
    waiter.join().unwrap().unwrap();

    assert_eq!(engine.sock_state(a).unwrap(), CONNECTED);
    assert_eq!(engine.sock_state(b).unwrap(), CONNECTED);
    assert_eq!(engine.send(a, b"hi").unwrap(), 2);
    let mut buf = [0u8; 2];
    assert_eq!(engine.recv(b, &mut buf).unwrap(), 2);
  }

  #[test]
  fn rendezvous_times_out() {
    let engine =
      Loopback::new().with_rendezvous_timeout(Duration::from_millis(20));
    let sock = engine.socket(libc::AF_INET, libc::SOCK_STREAM).unwrap();
    engine.set_opt(sock, SocketOption::Rendezvous.code(), &[1]).unwrap();
    engine.bind(sock, &localhost(0)).unwrap();
    assert_eq!(
      engine.connect(sock, &localhost(1)).unwrap_err().code,
      code::ENOSERVER
    );
    assert_eq!(engine.sock_state(sock).unwrap(), OPENED);
  }

  #[test]
  fn closing_listener_drops_pending_connections() {
    let engine = Loopback::new();
    let (sock, port) = listener(&engine);
    let client = engine.socket(libc::AF_INET, libc::SOCK_STREAM).unwrap();
    engine.connect(client, &localhost(port)).unwrap();
    engine.close(sock).unwrap();
    assert_eq!(engine.sock_state(client).unwrap(), BROKEN);
  }
}
