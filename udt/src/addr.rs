//! Address families and textual rendering of engine addresses.

use std::{
  fmt::{self, Write as _},
  net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
  str::FromStr,
};

use crate::error::{Error, Result};

/// Text returned for an empty address.
pub const NIL: &str = "<nil>";

/// Address family of a transport socket, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
  V4,
  V6,
}

impl Family {
  pub const fn as_raw(self) -> libc::c_int {
    match self {
      Family::V4 => libc::AF_INET,
      Family::V6 => libc::AF_INET6,
    }
  }

  pub fn from_raw(raw: libc::c_int) -> Result<Self> {
    match raw {
      libc::AF_INET => Ok(Family::V4),
      libc::AF_INET6 => Ok(Family::V6),
      other => Err(Error::UnsupportedFamily(other)),
    }
  }

  /// The network name accepted by [`FromStr`].
  pub const fn network(self) -> &'static str {
    match self {
      Family::V4 => "ip4",
      Family::V6 => "ip6",
    }
  }

  pub(crate) fn matches(self, ip: &IpAddr) -> bool {
    matches!(
      (self, ip),
      (Family::V4, IpAddr::V4(_)) | (Family::V6, IpAddr::V6(_))
    )
  }
}

impl FromStr for Family {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "ip4" => Ok(Family::V4),
      "ip6" => Ok(Family::V6),
      other => Err(Error::InvalidFamily(other.to_owned())),
    }
  }
}

impl fmt::Display for Family {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.network())
  }
}

/// Transport mode selected at socket creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
  /// Byte stream.
  Stream,
  /// Boundary-preserving messages.
  Datagram,
}

impl SocketType {
  pub const fn as_raw(self) -> libc::c_int {
    match self {
      SocketType::Stream => libc::SOCK_STREAM,
      SocketType::Datagram => libc::SOCK_DGRAM,
    }
  }

  pub const fn from_stream(is_stream: bool) -> Self {
    if is_stream { SocketType::Stream } else { SocketType::Datagram }
  }
}

/// Engine-level socket address: a raw family tag, a host-order port and
/// the address bytes (first 4 used for IPv4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSockaddr {
  pub family: libc::c_int,
  pub port: u16,
  pub addr: [u8; 16],
}

impl RawSockaddr {
  pub fn v4(ip: Ipv4Addr, port: u16) -> Self {
    let mut addr = [0u8; 16];
    addr[..4].copy_from_slice(&ip.octets());
    Self { family: libc::AF_INET, port, addr }
  }

  pub fn v6(ip: Ipv6Addr, port: u16) -> Self {
    Self { family: libc::AF_INET6, port, addr: ip.octets() }
  }

  /// The wildcard address of `family`.
  pub fn unspecified(family: Family, port: u16) -> Self {
    match family {
      Family::V4 => Self::v4(Ipv4Addr::UNSPECIFIED, port),
      Family::V6 => Self::v6(Ipv6Addr::UNSPECIFIED, port),
    }
  }

  pub fn from_std(addr: SocketAddr) -> Self {
    match addr {
      SocketAddr::V4(v4) => Self::v4(*v4.ip(), v4.port()),
      SocketAddr::V6(v6) => Self::v6(*v6.ip(), v6.port()),
    }
  }

  pub fn to_std(&self) -> Result<SocketAddr> {
    match Family::from_raw(self.family)? {
      Family::V4 => {
        let [a, b, c, d, ..] = self.addr;
        Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(a, b, c, d)), self.port))
      }
      Family::V6 => {
        Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(self.addr)), self.port))
      }
    }
  }

  /// Address bytes sized by family; empty for an unknown family.
  pub fn octets(&self) -> &[u8] {
    match self.family {
      libc::AF_INET => &self.addr[..4],
      libc::AF_INET6 => &self.addr[..],
      _ => &[],
    }
  }
}

/// Decoded address: family, canonical host text and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SockAddr {
  pub family: Family,
  pub host: String,
  pub port: u16,
}

impl fmt::Display for SockAddr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.family {
      Family::V4 => write!(f, "{}:{}", self.host, self.port),
      Family::V6 => write!(f, "[{}]:{}", self.host, self.port),
    }
  }
}

/// Dispatches on the address family to the matching formatter.
pub fn decode(raw: &RawSockaddr) -> Result<SockAddr> {
  let family = Family::from_raw(raw.family)?;
  let host = match family {
    Family::V4 => format_ipv4(raw.octets()),
    Family::V6 => format_ipv6(raw.octets()),
  };
  Ok(SockAddr { family, host, port: raw.port })
}

/// Dotted decimal. Empty input renders as [`NIL`].
pub fn format_ipv4(ip: &[u8]) -> String {
  match ip.len() {
    0 => NIL.to_owned(),
    4 => format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]),
    _ => malformed(ip),
  }
}

/// RFC 5952 text: lowercase hex groups, longest run (first on ties) of two
/// or more zero groups elided as `::`. Empty input renders as [`NIL`].
pub fn format_ipv6(ip: &[u8]) -> String {
  match ip.len() {
    0 => return NIL.to_owned(),
    16 => {}
    _ => return malformed(ip),
  }

  let mut groups = [0u16; 8];
  for (group, pair) in groups.iter_mut().zip(ip.chunks_exact(2)) {
    *group = u16::from_be_bytes([pair[0], pair[1]]);
  }

  let (start, len) = longest_zero_run(&groups);

  let mut out = String::with_capacity(39);
  let mut i = 0;
  while i < groups.len() {
    if len >= 2 && i == start {
      out.push_str("::");
      i += len;
      continue;
    }
    if i > 0 && !out.ends_with(':') {
      out.push(':');
    }
    let _ = write!(out, "{:x}", groups[i]);
    i += 1;
  }
  out
}

fn longest_zero_run(groups: &[u16; 8]) -> (usize, usize) {
  let (mut best_start, mut best_len) = (0, 0);
  let mut i = 0;
  while i < groups.len() {
    if groups[i] != 0 {
      i += 1;
      continue;
    }
    let start = i;
    while i < groups.len() && groups[i] == 0 {
      i += 1;
    }
    if i - start > best_len {
      best_start = start;
      best_len = i - start;
    }
  }
  (best_start, best_len)
}

fn malformed(ip: &[u8]) -> String {
  let mut out = String::with_capacity(1 + ip.len() * 2);
  out.push('?');
  for byte in ip {
    let _ = write!(out, "{byte:02x}");
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn v6(s: &str) -> String {
    format_ipv6(&s.parse::<Ipv6Addr>().unwrap().octets())
  }

  #[test]
  fn family_from_network_name() {
    assert_eq!("ip4".parse::<Family>().unwrap(), Family::V4);
    assert_eq!("ip6".parse::<Family>().unwrap(), Family::V6);
    let err = "tcp".parse::<Family>().unwrap_err();
    assert!(matches!(err, Error::InvalidFamily(ref s) if s == "tcp"));
    assert!(err.is_usage());
  }

  #[test]
  fn ipv4_text() {
    assert_eq!(format_ipv4(&[127, 0, 0, 1]), "127.0.0.1");
    assert_eq!(format_ipv4(&[0, 0, 0, 0]), "0.0.0.0");
    assert_eq!(format_ipv4(&[]), NIL);
    assert_eq!(format_ipv4(&[1, 2, 3]), "?010203");
  }

  #[test]
  fn ipv6_all_zero_is_double_colon() {
    assert_eq!(format_ipv6(&[0; 16]), "::");
  }

  #[test]
  fn ipv6_elides_longest_run() {
    assert_eq!(v6("fe80:0:0:0:0:0:0:1"), "fe80::1");
    assert_eq!(v6("::1"), "::1");
    assert_eq!(v6("1::"), "1::");
    assert_eq!(v6("1:0:0:2:0:0:0:3"), "1:0:0:2::3");
  }

  #[test]
  fn ipv6_ties_take_first_run() {
    assert_eq!(v6("1:0:0:2:3:0:0:4"), "1::2:3:0:0:4");
  }

  #[test]
  fn ipv6_single_zero_group_is_kept() {
    assert_eq!(v6("1:2:3:0:5:6:7:8"), "1:2:3:0:5:6:7:8");
  }

  #[test]
  fn ipv6_groups_are_lowercase_and_unpadded() {
    assert_eq!(v6("2001:DB8:00AB::0F"), "2001:db8:ab::f");
  }

  #[test]
  fn ipv6_empty_and_malformed() {
    assert_eq!(format_ipv6(&[]), NIL);
    assert_eq!(format_ipv6(&[0xab, 0xcd]), "?abcd");
  }

  #[test]
  fn decode_dispatches_on_family() {
    let raw = RawSockaddr::v4(Ipv4Addr::LOCALHOST, 9000);
    let addr = decode(&raw).unwrap();
    assert_eq!(addr.family, Family::V4);
    assert_eq!(addr.host, "127.0.0.1");
    assert_eq!(addr.to_string(), "127.0.0.1:9000");

    let raw = RawSockaddr::v6(Ipv6Addr::LOCALHOST, 9000);
    assert_eq!(decode(&raw).unwrap().to_string(), "[::1]:9000");

    let raw = RawSockaddr { family: libc::AF_UNIX, port: 0, addr: [0; 16] };
    assert!(matches!(
      decode(&raw),
      Err(Error::UnsupportedFamily(f)) if f == libc::AF_UNIX
    ));
  }

  #[test]
  fn raw_sockaddr_std_conversion() {
    let std: SocketAddr = "[fe80::1]:443".parse().unwrap();
    assert_eq!(RawSockaddr::from_std(std).to_std().unwrap(), std);
  }

  proptest! {
    // std renders v4-mapped and v4-compatible forms in dotted notation.
    #[test]
    fn ipv6_matches_std(segments in prop::array::uniform8(prop_oneof![Just(0u16), any::<u16>()])) {
      prop_assume!(segments[..5].iter().any(|s| *s != 0));
      let ip = Ipv6Addr::from(segments);
      prop_assert_eq!(format_ipv6(&ip.octets()), ip.to_string());
    }
  }
}
