//! Stream, message and file transfer on a connected [`Socket`].

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
  error::{Error, Result},
  socket::Socket,
};

impl Socket {
  /// Writes some of `buf` to the stream and returns how much was accepted.
  pub fn send(&self, buf: &[u8]) -> Result<usize> {
    let n =
      self.udt().engine()?.send(self.id(), buf).map_err(Error::SendFailed)?;
    tracing::trace!(sock = self.id(), bytes = n, "send");
    Ok(n)
  }

  /// Calls [`Socket::send`] until all of `buf` is accepted.
  pub fn send_all(&self, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
      let n = self.send(buf)?;
      buf = &buf[n..];
    }
    Ok(())
  }

  pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
    let n =
      self.udt().engine()?.recv(self.id(), buf).map_err(Error::RecvFailed)?;
    tracing::trace!(sock = self.id(), bytes = n, "recv");
    Ok(n)
  }

  /// Sends `buf` as one message. A `ttl` of `None` never expires.
  pub fn send_msg(
    &self,
    buf: &[u8],
    ttl: Option<Duration>,
    in_order: bool,
  ) -> Result<usize> {
    let ttl_ms = match ttl {
      Some(ttl) => i32::try_from(ttl.as_millis()).unwrap_or(i32::MAX),
      None => -1,
    };
    let n = self
      .udt()
      .engine()?
      .send_msg(self.id(), buf, ttl_ms, in_order)
      .map_err(Error::SendMsgFailed)?;
    tracing::trace!(sock = self.id(), bytes = n, ttl_ms, in_order, "send_msg");
    Ok(n)
  }

  /// Receives one message. A message longer than `buf` is truncated.
  pub fn recv_msg(&self, buf: &mut [u8]) -> Result<usize> {
    let n = self
      .udt()
      .engine()?
      .recv_msg(self.id(), buf)
      .map_err(Error::RecvMsgFailed)?;
    tracing::trace!(sock = self.id(), bytes = n, "recv_msg");
    Ok(n)
  }

  /// Sends `size` bytes of the file at `path`, starting at `*offset`, in
  /// chunks of the configured send block.
  ///
  /// `*offset` advances past everything sent, also when the call fails;
  /// the error then reports the partial count.
  pub fn send_file(
    &self,
    path: impl AsRef<Path>,
    offset: &mut u64,
    size: u64,
  ) -> Result<u64> {
    let block = self.udt().config().send_file_block;
    self.send_file_with_block(path, offset, size, block)
  }

  pub fn send_file_with_block(
    &self,
    path: impl AsRef<Path>,
    offset: &mut u64,
    size: u64,
    block: u32,
  ) -> Result<u64> {
    let path = path.as_ref();
    let engine = self.udt().engine()?;
    let mut cursor = to_engine_offset(*offset);
    let start = cursor;
    let res = engine.send_file(
      self.id(),
      path,
      &mut cursor,
      to_engine_offset(size),
      to_block(block),
    );
    *offset = u64::try_from(cursor).unwrap_or(*offset);
    let transferred = u64::try_from(cursor - start).unwrap_or(0);

    match res {
      Ok(n) => {
        tracing::trace!(
          sock = self.id(),
          path = %path.display(),
          bytes = n,
          "file sent"
        );
        Ok(u64::try_from(n).unwrap_or(transferred))
      }
      Err(source) => Err(Error::SendFileFailed { transferred, source }),
    }
  }

  /// Receives `size` bytes into the file at `path`, writing from `*offset`.
  /// The file is created if missing and never truncated.
  pub fn recv_file(
    &self,
    path: impl AsRef<Path>,
    offset: &mut u64,
    size: u64,
  ) -> Result<u64> {
    let block = self.udt().config().recv_file_block;
    self.recv_file_with_block(path, offset, size, block)
  }

  pub fn recv_file_with_block(
    &self,
    path: impl AsRef<Path>,
    offset: &mut u64,
    size: u64,
    block: u32,
  ) -> Result<u64> {
    let path = path.as_ref();
    let engine = self.udt().engine()?;
    let mut cursor = to_engine_offset(*offset);
    let start = cursor;
    let res = engine.recv_file(
      self.id(),
      path,
      &mut cursor,
      to_engine_offset(size),
      to_block(block),
    );
    *offset = u64::try_from(cursor).unwrap_or(*offset);
    let transferred = u64::try_from(cursor - start).unwrap_or(0);

    match res {
      Ok(n) => {
        tracing::trace!(
          sock = self.id(),
          path = %path.display(),
          bytes = n,
          "file received"
        );
        Ok(u64::try_from(n).unwrap_or(transferred))
      }
      Err(source) => Err(Error::RecvFileFailed { transferred, source }),
    }
  }
}

fn to_engine_offset(v: u64) -> i64 {
  i64::try_from(v).unwrap_or(i64::MAX)
}

fn to_block(block: u32) -> i32 {
  i32::try_from(block.max(1)).unwrap_or(i32::MAX)
}

/// Announces a file before its bytes: `{"fileName": .., "fileSize": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHeader {
  pub file_name: String,
  pub file_size: u64,
}

impl FileHeader {
  pub fn new(file_name: impl Into<String>, file_size: u64) -> Self {
    Self { file_name: file_name.into(), file_size }
  }

  pub fn to_json(&self) -> serde_json::Result<String> {
    serde_json::to_string(self)
  }

  /// Parses a header received into a fixed buffer; trailing NUL padding
  /// and whitespace are ignored.
  pub fn from_json(text: &str) -> serde_json::Result<Self> {
    serde_json::from_str(text.trim_end_matches('\0').trim())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn header_wire_names() {
    let header = FileHeader::new("movie.mkv", 1024);
    let json = header.to_json().unwrap();
    assert_eq!(json, r#"{"fileName":"movie.mkv","fileSize":1024}"#);
  }

  #[test]
  fn header_ignores_padding() {
    let mut padded = String::from(r#"{"fileName":"a","fileSize":3}"#);
    padded.push_str(&"\0".repeat(16));
    assert_eq!(FileHeader::from_json(&padded).unwrap(), FileHeader::new("a", 3));
  }

  #[test]
  fn block_is_never_zero() {
    assert_eq!(to_block(0), 1);
    assert_eq!(to_block(u32::MAX), i32::MAX);
  }
}
