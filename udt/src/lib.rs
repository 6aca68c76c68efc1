#![cfg_attr(docsrs, feature(doc_cfg))]

//! # udt - bindings for the UDT reliable UDP transport
//!
//! Sockets, options, mixed-socket epoll and chunked file transfer on top of
//! a transport [`engine`]. The engine is either the native UDT library
//! (feature `native`) or [`engine::Loopback`], an in-process implementation
//! of the same state machine used by default and in tests.
//!
//! ## Quick Start
//!
//! ```rust
//! use udt::{Family, SocketType, Udt};
//!
//! # fn main() -> udt::Result<()> {
//! let udt = Udt::startup()?;
//!
//! let server = udt.socket(Family::V4, SocketType::Stream)?;
//! server.bind(0)?;
//! server.listen_default()?;
//! let port = server.local_addr()?.port;
//!
//! let client = udt.socket(Family::V4, SocketType::Stream)?;
//! client.connect("127.0.0.1", port)?;
//! let peer = server.accept()?;
//!
//! client.send_all(b"hello")?;
//! let mut buf = [0u8; 5];
//! let n = peer.recv(&mut buf)?;
//! assert_eq!(&buf[..n], b"hello");
//!
//! udt.cleanup()?;
//! # Ok(())
//! # }
//! ```
//!
//! Every operation returns [`Result`]. Usage errors ([`Error::is_usage`])
//! are detected before the engine is called; all other errors carry the
//! engine's [`NativeError`] verbatim.
//!
//! Sockets are not closed on drop.

#[macro_use]
mod macros;
mod sync;

pub mod addr;
pub mod config;
pub mod engine;
pub mod epoll;
pub mod error;
pub mod option;
pub mod perf;
pub mod runtime;
pub mod socket;
pub mod transfer;

pub use addr::{Family, SockAddr, SocketType};
pub use config::Config;
pub use epoll::{Epoll, Events, Ready, SocketKind, WaitCapacity};
pub use error::{Error, NativeError, Result};
pub use option::{Linger, OptionValue, SocketOption, ValueKind};
pub use perf::TraceInfo;
pub use runtime::Udt;
pub use socket::{Socket, SocketState};
pub use transfer::FileHeader;
