//! Socket option names and their marshaling to engine byte buffers.
//!
//! Every option has one fixed host type and one fixed engine width. Values
//! are written little-endian at the engine width for set calls, and a get
//! that reports any other width is treated as corrupt data rather than
//! reinterpreted.

use std::{fmt, str::FromStr};

use crate::error::{Error, Result};

/// The option vocabulary exposed by the binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketOption {
  /// Maximum packet size.
  Mss,
  /// Blocking sends.
  SndSyn,
  /// Blocking receives.
  RcvSyn,
  /// Congestion control selector. Not supported.
  Cc,
  /// Flow control window, in packets.
  Fc,
  SndBuf,
  RcvBuf,
  UdpSndBuf,
  UdpRcvBuf,
  Rendezvous,
  /// Send timeout in milliseconds, -1 for infinite.
  SndTimeo,
  /// Receive timeout in milliseconds, -1 for infinite.
  RcvTimeo,
  ReuseAddr,
  Linger,
  /// Maximum bandwidth in bytes per second.
  MaxBw,
  State,
  Event,
  SndData,
  RcvData,
}

impl SocketOption {
  pub const ALL: [SocketOption; 19] = [
    Self::Mss,
    Self::SndSyn,
    Self::RcvSyn,
    Self::Cc,
    Self::Fc,
    Self::SndBuf,
    Self::RcvBuf,
    Self::UdpSndBuf,
    Self::UdpRcvBuf,
    Self::Rendezvous,
    Self::SndTimeo,
    Self::RcvTimeo,
    Self::ReuseAddr,
    Self::Linger,
    Self::MaxBw,
    Self::State,
    Self::Event,
    Self::SndData,
    Self::RcvData,
  ];

  pub const fn name(self) -> &'static str {
    match self {
      Self::Mss => "UDT_MSS",
      Self::SndSyn => "UDT_SNDSYN",
      Self::RcvSyn => "UDT_RCVSYN",
      Self::Cc => "UDT_CC",
      Self::Fc => "UDT_FC",
      Self::SndBuf => "UDT_SNDBUF",
      Self::RcvBuf => "UDT_RCVBUF",
      Self::UdpSndBuf => "UDP_SNDBUF",
      Self::UdpRcvBuf => "UDP_RCVBUF",
      Self::Rendezvous => "UDT_RENDEZVOUS",
      Self::SndTimeo => "UDT_SNDTIMEO",
      Self::RcvTimeo => "UDT_RCVTIMEO",
      Self::ReuseAddr => "UDT_REUSEADDR",
      Self::Linger => "UDT_LINGER",
      Self::MaxBw => "UDT_MAXBW",
      Self::State => "UDT_STATE",
      Self::Event => "UDT_EVENT",
      Self::SndData => "UDT_SNDDATA",
      Self::RcvData => "UDT_RCVDATA",
    }
  }

  /// The engine's `UDTOpt` number.
  pub const fn code(self) -> i32 {
    match self {
      Self::Mss => 0,
      Self::SndSyn => 1,
      Self::RcvSyn => 2,
      Self::Cc => 3,
      Self::Fc => 4,
      Self::SndBuf => 5,
      Self::RcvBuf => 6,
      Self::Linger => 7,
      Self::UdpSndBuf => 8,
      Self::UdpRcvBuf => 9,
      Self::Rendezvous => 12,
      Self::SndTimeo => 13,
      Self::RcvTimeo => 14,
      Self::ReuseAddr => 15,
      Self::MaxBw => 16,
      Self::State => 17,
      Self::Event => 18,
      Self::SndData => 19,
      Self::RcvData => 20,
    }
  }

  pub fn from_code(code: i32) -> Option<Self> {
    Self::ALL.into_iter().find(|opt| opt.code() == code)
  }

  /// Host type of the option. `None` for [`SocketOption::Cc`].
  pub const fn value_kind(self) -> Option<ValueKind> {
    match self {
      Self::Mss => Some(ValueKind::U16),
      Self::SndSyn | Self::RcvSyn | Self::Rendezvous | Self::ReuseAddr => {
        Some(ValueKind::Bool)
      }
      Self::Fc
      | Self::SndBuf
      | Self::RcvBuf
      | Self::UdpSndBuf
      | Self::UdpRcvBuf => Some(ValueKind::U32),
      Self::SndTimeo
      | Self::RcvTimeo
      | Self::State
      | Self::Event
      | Self::SndData
      | Self::RcvData => Some(ValueKind::I32),
      Self::MaxBw => Some(ValueKind::U64),
      Self::Linger => Some(ValueKind::Linger),
      Self::Cc => None,
    }
  }

  /// `false` for the engine's read-only counters.
  pub const fn is_writable(self) -> bool {
    !matches!(self, Self::State | Self::Event | Self::SndData | Self::RcvData)
  }
}

impl FromStr for SocketOption {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|opt| opt.name() == s)
      .ok_or_else(|| Error::UnsupportedOption(s.to_owned()))
  }
}

impl fmt::Display for SocketOption {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Host-side type tag of an option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
  Bool,
  U16,
  U32,
  I32,
  U64,
  Linger,
}

impl ValueKind {
  /// Bytes the engine reads and writes for this kind.
  pub const fn engine_width(self) -> usize {
    match self {
      Self::Bool => 1,
      Self::U16 | Self::U32 | Self::I32 => 4,
      Self::U64 | Self::Linger => 8,
    }
  }
}

impl fmt::Display for ValueKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Bool => "bool",
      Self::U16 => "u16",
      Self::U32 => "u32",
      Self::I32 => "i32",
      Self::U64 => "u64",
      Self::Linger => "linger",
    })
  }
}

/// Close behaviour: whether to wait for unsent data, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Linger {
  pub enabled: bool,
  pub seconds: i32,
}

impl Linger {
  pub const fn new(enabled: bool, seconds: i32) -> Self {
    Self { enabled, seconds }
  }

  pub const fn disabled() -> Self {
    Self { enabled: false, seconds: 0 }
  }
}

/// A typed option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue {
  Bool(bool),
  U16(u16),
  U32(u32),
  I32(i32),
  U64(u64),
  Linger(Linger),
}

impl OptionValue {
  pub const fn kind(&self) -> ValueKind {
    match self {
      Self::Bool(_) => ValueKind::Bool,
      Self::U16(_) => ValueKind::U16,
      Self::U32(_) => ValueKind::U32,
      Self::I32(_) => ValueKind::I32,
      Self::U64(_) => ValueKind::U64,
      Self::Linger(_) => ValueKind::Linger,
    }
  }

  pub const fn as_bool(&self) -> Option<bool> {
    match *self {
      Self::Bool(v) => Some(v),
      _ => None,
    }
  }

  pub const fn as_u16(&self) -> Option<u16> {
    match *self {
      Self::U16(v) => Some(v),
      _ => None,
    }
  }

  pub const fn as_u32(&self) -> Option<u32> {
    match *self {
      Self::U32(v) => Some(v),
      _ => None,
    }
  }

  pub const fn as_i32(&self) -> Option<i32> {
    match *self {
      Self::I32(v) => Some(v),
      _ => None,
    }
  }

  pub const fn as_u64(&self) -> Option<u64> {
    match *self {
      Self::U64(v) => Some(v),
      _ => None,
    }
  }

  pub const fn as_linger(&self) -> Option<Linger> {
    match *self {
      Self::Linger(v) => Some(v),
      _ => None,
    }
  }
}

macro_rules! impl_from {
  ($($ty:ty => $variant:ident),* $(,)?) => {
    $(
      impl From<$ty> for OptionValue {
        fn from(value: $ty) -> Self {
          Self::$variant(value)
        }
      }
    )*
  };
}

impl_from! {
  bool => Bool,
  u16 => U16,
  u32 => U32,
  i32 => I32,
  u64 => U64,
  Linger => Linger,
}

/// Host type of `option`, or `NotImplemented` for the unsupported selector.
pub fn kind_of(option: SocketOption) -> Result<ValueKind> {
  option.value_kind().ok_or(Error::NotImplemented(option))
}

/// Serializes `value` for a set call on `option`.
///
/// Fails before any engine call if the option is unsupported or read-only,
/// or if the value's type is not the option's host type.
pub fn encode(option: SocketOption, value: &OptionValue) -> Result<Vec<u8>> {
  let expected = kind_of(option)?;
  if !option.is_writable() {
    return Err(Error::UnsupportedOption(option.name().to_owned()));
  }
  if value.kind() != expected {
    return Err(Error::TypeMismatch { option, expected, found: value.kind() });
  }

  if let OptionValue::U32(v) = *value {
    if i32::try_from(v).is_err() {
      return Err(Error::OptionRange { option, value: i64::from(v) });
    }
  }
  let out = to_engine_bytes(value);
  debug_assert_eq!(out.len(), expected.engine_width());
  Ok(out)
}

/// Little-endian engine representation of `value`, without validation.
pub(crate) fn to_engine_bytes(value: &OptionValue) -> Vec<u8> {
  match *value {
    OptionValue::Bool(v) => vec![v as u8],
    OptionValue::U16(v) => i32::from(v).to_le_bytes().to_vec(),
    OptionValue::U32(v) => (v as i32).to_le_bytes().to_vec(),
    OptionValue::I32(v) => v.to_le_bytes().to_vec(),
    OptionValue::U64(v) => v.to_le_bytes().to_vec(),
    OptionValue::Linger(l) => {
      let mut buf = Vec::with_capacity(8);
      buf.extend_from_slice(&i32::from(l.enabled).to_le_bytes());
      buf.extend_from_slice(&l.seconds.to_le_bytes());
      buf
    }
  }
}

/// Interprets the bytes a get call on `option` produced.
pub fn decode(option: SocketOption, bytes: &[u8]) -> Result<OptionValue> {
  let kind = kind_of(option)?;
  let expected = kind.engine_width();
  if bytes.len() != expected {
    return Err(Error::OptionWidth { option, expected, actual: bytes.len() });
  }

  let int = |at: usize| {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
  };

  Ok(match kind {
    ValueKind::Bool => OptionValue::Bool(bytes[0] != 0),
    ValueKind::U16 => {
      let raw = int(0);
      let v = u16::try_from(raw)
        .map_err(|_| Error::OptionRange { option, value: i64::from(raw) })?;
      OptionValue::U16(v)
    }
    ValueKind::U32 => {
      let raw = int(0);
      let v = u32::try_from(raw)
        .map_err(|_| Error::OptionRange { option, value: i64::from(raw) })?;
      OptionValue::U32(v)
    }
    ValueKind::I32 => OptionValue::I32(int(0)),
    ValueKind::U64 => {
      let mut raw = [0u8; 8];
      raw.copy_from_slice(bytes);
      OptionValue::U64(u64::from_le_bytes(raw))
    }
    ValueKind::Linger => {
      OptionValue::Linger(Linger { enabled: int(0) != 0, seconds: int(4) })
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn names_round_trip() {
    for opt in SocketOption::ALL {
      assert_eq!(opt.name().parse::<SocketOption>().unwrap(), opt);
      assert_eq!(SocketOption::from_code(opt.code()), Some(opt));
    }
  }

  #[test]
  fn unknown_name_is_unsupported() {
    let err = "UDT_BOGUS".parse::<SocketOption>().unwrap_err();
    assert!(matches!(err, Error::UnsupportedOption(ref n) if n == "UDT_BOGUS"));
  }

  #[test]
  fn mss_is_u16_at_engine_width_four() {
    let bytes = encode(SocketOption::Mss, &500u16.into()).unwrap();
    assert_eq!(bytes, vec![0xf4, 0x01, 0, 0]);
    assert_eq!(
      decode(SocketOption::Mss, &bytes).unwrap(),
      OptionValue::U16(500)
    );
  }

  #[test]
  fn bool_is_one_byte() {
    assert_eq!(encode(SocketOption::Rendezvous, &true.into()).unwrap(), [1]);
    assert_eq!(
      decode(SocketOption::ReuseAddr, &[0]).unwrap(),
      OptionValue::Bool(false)
    );
  }

  #[test]
  fn maxbw_is_u64() {
    let bytes = encode(SocketOption::MaxBw, &u64::MAX.into()).unwrap();
    assert_eq!(bytes, [0xff; 8]);
    assert_eq!(
      decode(SocketOption::MaxBw, &(-1i64).to_le_bytes()).unwrap(),
      OptionValue::U64(u64::MAX)
    );
  }

  #[test]
  fn linger_is_two_ints() {
    let linger = Linger::new(true, 180);
    let bytes = encode(SocketOption::Linger, &linger.into()).unwrap();
    assert_eq!(bytes, [1, 0, 0, 0, 180, 0, 0, 0]);
    assert_eq!(
      decode(SocketOption::Linger, &bytes).unwrap().as_linger(),
      Some(linger)
    );
  }

  #[test]
  fn type_mismatch_is_usage_error() {
    let err = encode(SocketOption::MaxBw, &7u32.into()).unwrap_err();
    assert!(matches!(
      err,
      Error::TypeMismatch {
        option: SocketOption::MaxBw,
        expected: ValueKind::U64,
        found: ValueKind::U32
      }
    ));
    assert!(err.is_usage());
  }

  #[test]
  fn congestion_control_is_not_implemented() {
    assert!(matches!(
      encode(SocketOption::Cc, &0i32.into()),
      Err(Error::NotImplemented(SocketOption::Cc))
    ));
    assert!(matches!(
      decode(SocketOption::Cc, &[0; 4]),
      Err(Error::NotImplemented(SocketOption::Cc))
    ));
  }

  #[test]
  fn read_only_options_reject_set() {
    for opt in [
      SocketOption::State,
      SocketOption::Event,
      SocketOption::SndData,
      SocketOption::RcvData,
    ] {
      assert!(matches!(
        encode(opt, &0i32.into()),
        Err(Error::UnsupportedOption(_))
      ));
    }
  }

  #[test]
  fn width_mismatch_is_integrity_error() {
    let err = decode(SocketOption::Mss, &[1, 0]).unwrap_err();
    assert!(matches!(
      err,
      Error::OptionWidth { option: SocketOption::Mss, expected: 4, actual: 2 }
    ));
  }

  #[test]
  fn negative_buffer_size_is_out_of_range() {
    let err = decode(SocketOption::SndBuf, &(-5i32).to_le_bytes()).unwrap_err();
    assert!(matches!(err, Error::OptionRange { value: -5, .. }));
    assert!(matches!(
      encode(SocketOption::SndBuf, &u32::MAX.into()),
      Err(Error::OptionRange { .. })
    ));
  }
}
