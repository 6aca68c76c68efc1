//! Transport socket handles.

use std::{
  fmt, io,
  net::{SocketAddr, ToSocketAddrs},
};

use crate::{
  addr::{self, Family, RawSockaddr, SockAddr, SocketType},
  engine::{SocketId, status},
  error::{Error, NativeError, Result, code},
  option::{self, OptionValue, SocketOption},
  runtime::Udt,
};

/// Scratch space for option reads. Larger than any option's width.
const OPTION_SCRATCH: usize = 64;

/// Engine-side socket state. Always queried, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
  Init,
  Opened,
  Listening,
  Connecting,
  Connected,
  Broken,
  Closing,
  Closed,
  NonExist,
}

impl SocketState {
  pub const fn from_raw(raw: i32) -> Option<Self> {
    Some(match raw {
      status::INIT => Self::Init,
      status::OPENED => Self::Opened,
      status::LISTENING => Self::Listening,
      status::CONNECTING => Self::Connecting,
      status::CONNECTED => Self::Connected,
      status::BROKEN => Self::Broken,
      status::CLOSING => Self::Closing,
      status::CLOSED => Self::Closed,
      status::NONEXIST => Self::NonExist,
      _ => return None,
    })
  }

  pub const fn as_raw(self) -> i32 {
    match self {
      Self::Init => status::INIT,
      Self::Opened => status::OPENED,
      Self::Listening => status::LISTENING,
      Self::Connecting => status::CONNECTING,
      Self::Connected => status::CONNECTED,
      Self::Broken => status::BROKEN,
      Self::Closing => status::CLOSING,
      Self::Closed => status::CLOSED,
      Self::NonExist => status::NONEXIST,
    }
  }

  /// No transition leaves these states.
  pub const fn is_terminal(self) -> bool {
    matches!(self, Self::Broken | Self::Closing | Self::Closed | Self::NonExist)
  }
}

impl fmt::Display for SocketState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Init => "INIT",
      Self::Opened => "OPENED",
      Self::Listening => "LISTENING",
      Self::Connecting => "CONNECTING",
      Self::Connected => "CONNECTED",
      Self::Broken => "BROKEN",
      Self::Closing => "CLOSING",
      Self::Closed => "CLOSED",
      Self::NonExist => "NONEXIST",
    })
  }
}

/// One transport socket.
///
/// Dropping a `Socket` does not close it; call [`Socket::close`]. A closed
/// socket's id is never touched again by this crate, but calls made through
/// the handle still reach the engine, which rejects them.
pub struct Socket {
  udt: Udt,
  id: SocketId,
  family: Option<Family>,
}

impl Udt {
  pub fn socket(&self, family: Family, ty: SocketType) -> Result<Socket> {
    let id = self
      .engine()?
      .socket(family.as_raw(), ty.as_raw())
      .map_err(Error::CreationFailed)?;
    tracing::debug!(sock = id, %family, ?ty, "socket created");
    Ok(Socket { udt: self.clone(), id, family: Some(family) })
  }

  /// Creates a socket from a network name (`"ip4"` or `"ip6"`) and a
  /// stream flag.
  pub fn create_socket(&self, network: &str, is_stream: bool) -> Result<Socket> {
    let family: Family = network.parse()?;
    self.socket(family, SocketType::from_stream(is_stream))
  }
}

impl Socket {
  /// Wraps an engine id obtained elsewhere.
  pub fn from_raw(udt: &Udt, id: SocketId, family: Option<Family>) -> Self {
    Self { udt: udt.clone(), id, family }
  }

  pub fn id(&self) -> SocketId {
    self.id
  }

  /// `None` for accepted sockets.
  pub fn family(&self) -> Option<Family> {
    self.family
  }

  pub(crate) fn udt(&self) -> &Udt {
    &self.udt
  }

  /// Binds to `port` on every local interface.
  pub fn bind(&self, port: u16) -> Result<()> {
    let family = self.family.ok_or(Error::FamilyUnknown)?;
    let engine = self.udt.engine()?;
    engine
      .bind(self.id, &RawSockaddr::unspecified(family, port))
      .map_err(Error::BindFailed)?;
    tracing::debug!(sock = self.id, port, "socket bound");
    Ok(())
  }

  pub fn listen(&self, backlog: u32) -> Result<()> {
    let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
    self
      .udt
      .engine()?
      .listen(self.id, backlog)
      .map_err(Error::ListenFailed)?;
    tracing::debug!(sock = self.id, backlog, "socket listening");
    Ok(())
  }

  /// Listens with the configured default backlog.
  pub fn listen_default(&self) -> Result<()> {
    self.listen(self.udt.config().listen_backlog)
  }

  /// Blocks until a connection is pending and returns it.
  pub fn accept(&self) -> Result<Socket> {
    let (id, peer) =
      self.udt.engine()?.accept(self.id).map_err(Error::AcceptFailed)?;
    let peer = addr::decode(&peer).map(|a| a.to_string()).unwrap_or_default();
    tracing::debug!(sock = self.id, accepted = id, %peer, "connection accepted");
    Ok(Socket { udt: self.udt.clone(), id, family: None })
  }

  /// Resolves `host` and connects to the first resolved address of the
  /// socket's family, skipping entries of the other family even when they
  /// come first. Later entries of the same family are not tried.
  pub fn connect(&self, host: &str, port: u16) -> Result<()> {
    let family = self.family.ok_or(Error::FamilyUnknown)?;
    let engine = self.udt.engine()?;

    let resolved = (host, port).to_socket_addrs().map_err(|source| {
      Error::ResolutionFailed { host: host.to_owned(), source }
    })?;
    let target = first_of_family(family, resolved).ok_or_else(|| {
      Error::ResolutionFailed {
        host: host.to_owned(),
        source: io::Error::new(
          io::ErrorKind::AddrNotAvailable,
          format!("no {family} address"),
        ),
      }
    })?;

    engine
      .connect(self.id, &RawSockaddr::from_std(target))
      .map_err(Error::ConnectFailed)?;
    tracing::debug!(sock = self.id, %target, "socket connected");
    Ok(())
  }

  pub fn state(&self) -> Result<SocketState> {
    let raw =
      self.udt.engine()?.sock_state(self.id).map_err(Error::StateFailed)?;
    SocketState::from_raw(raw).ok_or_else(|| {
      Error::StateFailed(NativeError::new(
        code::EUNKNOWN,
        format!("unknown socket state {raw}"),
      ))
    })
  }

  pub fn local_addr(&self) -> Result<SockAddr> {
    let raw =
      self.udt.engine()?.sock_name(self.id).map_err(Error::SockNameFailed)?;
    addr::decode(&raw)
  }

  pub fn peer_addr(&self) -> Result<SockAddr> {
    let raw =
      self.udt.engine()?.peer_name(self.id).map_err(Error::PeerNameFailed)?;
    addr::decode(&raw)
  }

  /// Closes the socket. Closing twice fails.
  pub fn close(&self) -> Result<()> {
    self.udt.engine()?.close(self.id).map_err(Error::CloseFailed)?;
    tracing::debug!(sock = self.id, "socket closed");
    Ok(())
  }

  pub fn get_option(&self, option: SocketOption) -> Result<OptionValue> {
    option::kind_of(option)?;
    let engine = self.udt.engine()?;
    let mut scratch = [0u8; OPTION_SCRATCH];
    let n = engine
      .get_opt(self.id, option.code(), &mut scratch)
      .map_err(Error::GetOptionFailed)?;
    option::decode(option, &scratch[..n.min(OPTION_SCRATCH)])
  }

  /// Sets `option`. The value must have the option's host type; a mismatch
  /// is reported without calling the engine.
  pub fn set_option(
    &self,
    option: SocketOption,
    value: impl Into<OptionValue>,
  ) -> Result<()> {
    let bytes = option::encode(option, &value.into())?;
    self
      .udt
      .engine()?
      .set_opt(self.id, option.code(), &bytes)
      .map_err(Error::SetOptionFailed)
  }

  /// [`Socket::get_option`] by canonical name, e.g. `"UDT_MSS"`.
  pub fn get_option_by_name(&self, name: &str) -> Result<OptionValue> {
    self.get_option(name.parse::<SocketOption>()?)
  }

  pub fn set_option_by_name(
    &self,
    name: &str,
    value: impl Into<OptionValue>,
  ) -> Result<()> {
    self.set_option(name.parse::<SocketOption>()?, value)
  }
}

fn first_of_family(
  family: Family,
  addrs: impl IntoIterator<Item = SocketAddr>,
) -> Option<SocketAddr> {
  addrs.into_iter().find(|a| family.matches(&a.ip()))
}

impl fmt::Debug for Socket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Socket")
      .field("id", &self.id)
      .field("family", &self.family)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn state_numbering() {
    for raw in 1..=9 {
      let state = SocketState::from_raw(raw).unwrap();
      assert_eq!(state.as_raw(), raw);
    }
    assert_eq!(SocketState::from_raw(0), None);
    assert!(SocketState::Broken.is_terminal());
    assert!(!SocketState::Listening.is_terminal());
  }

  #[test]
  fn invalid_network_name() {
    let udt = Udt::startup().unwrap();
    let err = udt.create_socket("ip5", true).unwrap_err();
    assert!(matches!(err, Error::InvalidFamily(_)));
  }

  #[test]
  fn accepted_socket_cannot_bind() {
    let udt = Udt::startup().unwrap();
    let sock = Socket::from_raw(&udt, 1, None);
    assert!(matches!(sock.bind(0), Err(Error::FamilyUnknown)));
  }

  #[test]
  fn connect_target_skips_other_family() {
    let addrs: Vec<SocketAddr> = ["[::1]:80", "127.0.0.1:80", "127.0.0.2:80"]
      .iter()
      .map(|a| a.parse().unwrap())
      .collect();
    assert_eq!(
      first_of_family(Family::V4, addrs.clone()),
      Some("127.0.0.1:80".parse().unwrap())
    );
    assert_eq!(
      first_of_family(Family::V6, addrs),
      Some("[::1]:80".parse().unwrap())
    );

    let only_v6: Vec<SocketAddr> = vec!["[::1]:80".parse().unwrap()];
    assert_eq!(first_of_family(Family::V4, only_v6), None);
  }
}
