#![allow(dead_code)]

use udt::{Family, Socket, SocketType, Udt};

pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

pub fn start() -> Udt {
  init_tracing();
  Udt::startup().unwrap()
}

pub fn listener(udt: &Udt, ty: SocketType) -> (Socket, u16) {
  let server = udt.socket(Family::V4, ty).unwrap();
  server.bind(0).unwrap();
  server.listen(8).unwrap();
  let port = server.local_addr().unwrap().port;
  (server, port)
}

/// Returns `(listener, client, accepted)`, all open.
pub fn connected(udt: &Udt, ty: SocketType) -> (Socket, Socket, Socket) {
  let (server, port) = listener(udt, ty);
  let client = udt.socket(Family::V4, ty).unwrap();
  client.connect("127.0.0.1", port).unwrap();
  let accepted = server.accept().unwrap();
  (server, client, accepted)
}
