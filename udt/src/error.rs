//! Error types.
//!
//! Failures fall in two groups. Usage errors ([`Error::is_usage`]) are
//! detected locally and never reach the engine. Everything else wraps the
//! [`NativeError`] the engine reported through its last-error facility,
//! verbatim.

use std::{fmt, io};

use crate::{
  epoll::SocketKind,
  option::{SocketOption, ValueKind},
};

/// Numeric error codes of the engine's last-error facility.
pub mod code {
  pub const SUCCESS: i32 = 0;
  pub const ECONNSETUP: i32 = 1000;
  pub const ENOSERVER: i32 = 1001;
  pub const ECONNREJ: i32 = 1002;
  pub const ESOCKFAIL: i32 = 1003;
  pub const ESECFAIL: i32 = 1004;
  pub const ECONNFAIL: i32 = 2000;
  pub const ECONNLOST: i32 = 2001;
  pub const ENOCONN: i32 = 2002;
  pub const ERESOURCE: i32 = 3000;
  pub const ETHREAD: i32 = 3001;
  pub const ENOBUF: i32 = 3002;
  pub const EFILE: i32 = 4000;
  pub const EINVRDOFF: i32 = 4001;
  pub const ERDPERM: i32 = 4002;
  pub const EINVWROFF: i32 = 4003;
  pub const EWRPERM: i32 = 4004;
  pub const EINVOP: i32 = 5000;
  pub const EBOUNDSOCK: i32 = 5001;
  pub const ECONNSOCK: i32 = 5002;
  pub const EINVPARAM: i32 = 5003;
  pub const EINVSOCK: i32 = 5004;
  pub const EUNBOUNDSOCK: i32 = 5005;
  pub const ENOLISTEN: i32 = 5006;
  pub const ERDVNOSERV: i32 = 5007;
  pub const ERDVUNBOUND: i32 = 5008;
  pub const ESTREAMILL: i32 = 5009;
  pub const EDGRAMILL: i32 = 5010;
  pub const EDUPLISTEN: i32 = 5011;
  pub const ELARGEMSG: i32 = 5012;
  pub const EINVPOLLID: i32 = 5013;
  pub const EASYNCFAIL: i32 = 6000;
  pub const EASYNCSND: i32 = 6001;
  pub const EASYNCRCV: i32 = 6002;
  pub const ETIMEOUT: i32 = 6003;
  pub const EPEERERR: i32 = 7000;
  pub const EUNKNOWN: i32 = -1;

  /// Default description for a code, as the engine words it.
  pub fn describe(code: i32) -> &'static str {
    match code {
      SUCCESS => "Success.",
      ECONNSETUP => "Connection setup failure.",
      ENOSERVER => "Connection setup failure: connection time out.",
      ECONNREJ => "Connection setup failure: connection rejected.",
      ESOCKFAIL => {
        "Connection setup failure: unable to create/configure UDP socket."
      }
      ESECFAIL => "Connection setup failure: abort for security reasons.",
      ECONNFAIL => "Connection failure.",
      ECONNLOST => "Connection was broken.",
      ENOCONN => "Connection does not exist.",
      ERESOURCE => "System resource failure.",
      ETHREAD => "System resource failure: unable to create new threads.",
      ENOBUF => "System resource failure: unable to allocate buffers.",
      EFILE => "File system failure.",
      EINVRDOFF => "File system failure: cannot seek read position.",
      ERDPERM => "File system failure: failure in read.",
      EINVWROFF => "File system failure: cannot seek write position.",
      EWRPERM => "File system failure: failure in write.",
      EINVOP => "Operation not supported.",
      EBOUNDSOCK => {
        "Operation not supported: Cannot do this operation on a BOUND socket."
      }
      ECONNSOCK => {
        "Operation not supported: Cannot do this operation on a CONNECTED socket."
      }
      EINVPARAM => "Operation not supported: Bad parameters.",
      EINVSOCK => "Operation not supported: Invalid socket ID.",
      EUNBOUNDSOCK => {
        "Operation not supported: Cannot do this operation on an UNBOUND socket."
      }
      ENOLISTEN => "Operation not supported: Socket is not in listening state.",
      ERDVNOSERV => {
        "Operation not supported: Listen/accept is not supported in rendezous connection setup."
      }
      ERDVUNBOUND => {
        "Operation not supported: Cannot call connect on UNBOUND socket in rendezvous connection setup."
      }
      ESTREAMILL => {
        "Operation not supported: This operation is not supported in SOCK_STREAM mode."
      }
      EDGRAMILL => {
        "Operation not supported: This operation is not supported in SOCK_DGRAM mode."
      }
      EDUPLISTEN => {
        "Operation not supported: Another socket is already listening on the same port."
      }
      ELARGEMSG => {
        "Operation not supported: Message is too large to send (it must be less than the UDT send buffer size)."
      }
      EINVPOLLID => "Operation not supported: Invalid epoll ID.",
      EASYNCFAIL => "Non-blocking call failure.",
      EASYNCSND => {
        "Non-blocking call failure: no buffer available for sending."
      }
      EASYNCRCV => {
        "Non-blocking call failure: no data available for reading."
      }
      ETIMEOUT => "Non-blocking call failure: transmission timed out.",
      EPEERERR => "The peer side has signalled an error.",
      _ => "Unknown error.",
    }
  }
}

/// An error reported by the engine: its numeric code and description.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("UDT error {code}: {description}")]
pub struct NativeError {
  pub code: i32,
  pub description: String,
}

impl NativeError {
  pub fn new(code: i32, description: impl Into<String>) -> Self {
    Self { code, description: description.into() }
  }

  /// Builds the error with the engine's stock description for `code`.
  pub fn from_code(code: i32) -> Self {
    Self::new(code, code::describe(code))
  }

  pub fn is_timeout(&self) -> bool {
    self.code == code::ETIMEOUT
  }
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("network must be either ip4 or ip6, got {0:?}")]
  InvalidFamily(String),

  #[error("address family {0} is not supported")]
  UnsupportedFamily(i32),

  #[error("socket has no known address family")]
  FamilyUnknown,

  #[error("invalid option {0}")]
  UnsupportedOption(String),

  #[error("option {option} requires a {expected} value, got {found}")]
  TypeMismatch { option: SocketOption, expected: ValueKind, found: ValueKind },

  #[error("{0} is not implemented")]
  NotImplemented(SocketOption),

  #[error("option {option} came back with {actual} bytes, expected {expected}")]
  OptionWidth { option: SocketOption, expected: usize, actual: usize },

  #[error("value {value} is out of range for option {option}")]
  OptionRange { option: SocketOption, value: i64 },

  #[error("UDT runtime is not started")]
  NotStarted,

  #[error("unable to resolve {host}: {source}")]
  ResolutionFailed {
    host: String,
    #[source]
    source: io::Error,
  },

  #[error("unable to start up UDT library: {0}")]
  StartupFailed(#[source] NativeError),

  #[error("unable to execute cleanup: {0}")]
  CleanupFailed(#[source] NativeError),

  #[error("invalid socket: {0}")]
  CreationFailed(#[source] NativeError),

  #[error("unable to bind socket: {0}")]
  BindFailed(#[source] NativeError),

  #[error("unable to listen: {0}")]
  ListenFailed(#[source] NativeError),

  #[error("unable to accept on socket: {0}")]
  AcceptFailed(#[source] NativeError),

  #[error("unable to connect to the socket: {0}")]
  ConnectFailed(#[source] NativeError),

  #[error("unable to get socket status: {0}")]
  StateFailed(#[source] NativeError),

  #[error("unable to get socket name: {0}")]
  SockNameFailed(#[source] NativeError),

  #[error("unable to get socket peer name: {0}")]
  PeerNameFailed(#[source] NativeError),

  #[error("unable to close socket: {0}")]
  CloseFailed(#[source] NativeError),

  #[error("unable to get option: {0}")]
  GetOptionFailed(#[source] NativeError),

  #[error("unable to set option: {0}")]
  SetOptionFailed(#[source] NativeError),

  #[error("unable to send data: {0}")]
  SendFailed(#[source] NativeError),

  #[error("unable to receive data: {0}")]
  RecvFailed(#[source] NativeError),

  #[error("unable to send message: {0}")]
  SendMsgFailed(#[source] NativeError),

  #[error("unable to receive message: {0}")]
  RecvMsgFailed(#[source] NativeError),

  #[error("unable to send file after {transferred} bytes: {source}")]
  SendFileFailed {
    transferred: u64,
    #[source]
    source: NativeError,
  },

  #[error("unable to receive file after {transferred} bytes: {source}")]
  RecvFileFailed {
    transferred: u64,
    #[source]
    source: NativeError,
  },

  #[error("unable to get trace info: {0}")]
  PerfmonFailed(#[source] NativeError),

  #[error("unable to create new epoll ID: {0}")]
  EpollCreateFailed(#[source] NativeError),

  #[error("unable to add {kind} socket for epoll: {source}")]
  EpollAddFailed {
    kind: SocketKind,
    #[source]
    source: NativeError,
  },

  #[error("unable to remove {kind} socket from epoll: {source}")]
  EpollRemoveFailed {
    kind: SocketKind,
    #[source]
    source: NativeError,
  },

  #[error("unable to epoll wait: {0}")]
  EpollWaitFailed(#[source] NativeError),

  #[error("unable to release epoll: {0}")]
  EpollReleaseFailed(#[source] NativeError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  /// `true` for caller mistakes caught before any engine call.
  pub fn is_usage(&self) -> bool {
    matches!(
      self,
      Self::InvalidFamily(_)
        | Self::UnsupportedFamily(_)
        | Self::FamilyUnknown
        | Self::UnsupportedOption(_)
        | Self::TypeMismatch { .. }
        | Self::NotImplemented(_)
        | Self::NotStarted
    )
  }

  /// The engine error behind this failure, if the engine was involved.
  pub fn native(&self) -> Option<&NativeError> {
    match self {
      Self::StartupFailed(e)
      | Self::CleanupFailed(e)
      | Self::CreationFailed(e)
      | Self::BindFailed(e)
      | Self::ListenFailed(e)
      | Self::AcceptFailed(e)
      | Self::ConnectFailed(e)
      | Self::StateFailed(e)
      | Self::SockNameFailed(e)
      | Self::PeerNameFailed(e)
      | Self::CloseFailed(e)
      | Self::GetOptionFailed(e)
      | Self::SetOptionFailed(e)
      | Self::SendFailed(e)
      | Self::RecvFailed(e)
      | Self::SendMsgFailed(e)
      | Self::RecvMsgFailed(e)
      | Self::PerfmonFailed(e)
      | Self::EpollCreateFailed(e)
      | Self::EpollWaitFailed(e)
      | Self::EpollReleaseFailed(e) => Some(e),
      Self::SendFileFailed { source, .. }
      | Self::RecvFileFailed { source, .. }
      | Self::EpollAddFailed { source, .. }
      | Self::EpollRemoveFailed { source, .. } => Some(source),
      _ => None,
    }
  }

  /// Shorthand for the engine's numeric error code.
  pub fn code(&self) -> Option<i32> {
    self.native().map(|e| e.code)
  }

  /// Bytes moved before a file transfer failed.
  pub fn transferred(&self) -> Option<u64> {
    match self {
      Self::SendFileFailed { transferred, .. }
      | Self::RecvFileFailed { transferred, .. } => Some(*transferred),
      _ => None,
    }
  }
}

impl fmt::Display for SocketKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Udt => f.write_str("UDT"),
      Self::System => f.write_str("system"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn native_error_keeps_code_and_description() {
    let err = NativeError::from_code(code::EINVSOCK);
    assert_eq!(err.code, 5004);
    assert_eq!(
      err.to_string(),
      "UDT error 5004: Operation not supported: Invalid socket ID."
    );
  }

  #[test]
  fn classification() {
    let usage = Error::InvalidFamily("ip5".into());
    assert!(usage.is_usage());
    assert_eq!(usage.code(), None);

    let native = Error::CloseFailed(NativeError::from_code(code::EINVSOCK));
    assert!(!native.is_usage());
    assert_eq!(native.code(), Some(code::EINVSOCK));

    let partial = Error::SendFileFailed {
      transferred: 42,
      source: NativeError::from_code(code::ECONNLOST),
    };
    assert_eq!(partial.transferred(), Some(42));
    assert_eq!(partial.code(), Some(code::ECONNLOST));
  }

  #[test]
  fn unknown_code_has_generic_description() {
    assert_eq!(code::describe(12345), "Unknown error.");
  }
}
