mod common;

use std::{net::UdpSocket, os::fd::AsRawFd, thread, time::Duration};

use udt::{Error, Events, Family, SocketType, WaitCapacity, error::code};

const POLL: Option<Duration> = Some(Duration::ZERO);

#[test]
fn test_connected_socket_is_writable() {
  let udt = common::start();
  let (_server, client, _accepted) = common::connected(&udt, SocketType::Stream);
  let epoll = udt.epoll().unwrap();
  epoll.add_socket(&client, Events::IN | Events::OUT).unwrap();

  let ready = epoll.wait(POLL, WaitCapacity::default()).unwrap();
  assert_eq!(ready.udt_writable, vec![client.id()]);
  assert!(ready.udt_readable.is_empty());
  assert_eq!(ready.total, 1);
  epoll.release().unwrap();
}

#[test]
fn test_expiry_is_an_empty_result() {
  let udt = common::start();
  let (_server, _client, accepted) = common::connected(&udt, SocketType::Stream);
  let epoll = udt.epoll().unwrap();
  epoll.add_socket(&accepted, Events::IN).unwrap();

  let ready = epoll
    .wait(Some(Duration::from_millis(20)), WaitCapacity::default())
    .unwrap();
  assert!(ready.is_empty());
  assert_eq!(ready.total, 0);
}

#[test]
fn test_wait_wakes_on_data() {
  let udt = common::start();
  let (_server, client, accepted) = common::connected(&udt, SocketType::Stream);
  let epoll = udt.epoll().unwrap();
  epoll.add_socket(&accepted, Events::IN).unwrap();

  thread::scope(|s| {
    s.spawn(|| {
      thread::sleep(Duration::from_millis(30));
      client.send_all(b"wake").unwrap();
    });
    let ready = epoll.wait(None, WaitCapacity::default()).unwrap();
    assert_eq!(ready.udt_readable, vec![accepted.id()]);
  });
}

#[test]
fn test_pending_connection_makes_listener_readable() {
  let udt = common::start();
  let (server, port) = common::listener(&udt, SocketType::Stream);
  let epoll = udt.epoll().unwrap();
  epoll.add_socket(&server, Events::IN).unwrap();
  assert!(epoll.wait(POLL, WaitCapacity::default()).unwrap().is_empty());

  let client = udt.socket(Family::V4, SocketType::Stream).unwrap();
  client.connect("127.0.0.1", port).unwrap();
  let ready = epoll.wait(POLL, WaitCapacity::default()).unwrap();
  assert_eq!(ready.udt_readable, vec![server.id()]);

  server.accept().unwrap();
  assert!(epoll.wait(POLL, WaitCapacity::default()).unwrap().is_empty());
}

#[test]
fn test_broken_peer_is_reported() {
  let udt = common::start();
  let (_server, client, accepted) = common::connected(&udt, SocketType::Stream);
  let epoll = udt.epoll().unwrap();
  epoll.add_socket(&accepted, Events::IN).unwrap();
  client.close().unwrap();

  let ready = epoll.wait(POLL, WaitCapacity::default()).unwrap();
  assert_eq!(ready.udt_readable, vec![accepted.id()]);
}

#[test]
fn test_system_sockets() {
  let udt = common::start();
  let sys = UdpSocket::bind("127.0.0.1:0").unwrap();
  let epoll = udt.epoll().unwrap();
  epoll.add_sys_socket(&sys, Events::IN).unwrap();
  assert!(epoll.wait(POLL, WaitCapacity::default()).unwrap().is_empty());

  let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
  sender.send_to(b"datagram", sys.local_addr().unwrap()).unwrap();
  let ready = epoll
    .wait(Some(Duration::from_secs(5)), WaitCapacity::default())
    .unwrap();
  assert_eq!(ready.sys_readable, vec![sys.as_raw_fd()]);
  assert!(ready.udt_readable.is_empty());

  epoll.remove_sys_socket(&sys).unwrap();
  epoll.add_sys_socket(&sender, Events::OUT).unwrap();
  let ready = epoll.wait(POLL, WaitCapacity::default()).unwrap();
  assert_eq!(ready.sys_writable, vec![sender.as_raw_fd()]);
  assert!(ready.sys_readable.is_empty());
}

#[test]
fn test_mixed_kinds_in_one_wait() {
  let udt = common::start();
  let (_server, client, _accepted) = common::connected(&udt, SocketType::Stream);
  let sys = UdpSocket::bind("127.0.0.1:0").unwrap();

  let epoll = udt.epoll().unwrap();
  epoll.add_socket(&client, Events::OUT).unwrap();
  epoll.add_sys_socket(&sys, Events::OUT).unwrap();

  let ready = epoll.wait(POLL, WaitCapacity::default()).unwrap();
  assert_eq!(ready.udt_writable, vec![client.id()]);
  assert_eq!(ready.sys_writable, vec![sys.as_raw_fd()]);
  assert_eq!(ready.total, 2);
}

#[test]
fn test_capacity_truncates() {
  let udt = common::start();
  let (_s1, a, _) = common::connected(&udt, SocketType::Stream);
  let (_s2, b, _) = common::connected(&udt, SocketType::Stream);
  let epoll = udt.epoll().unwrap();
  epoll.add_socket(&a, Events::OUT).unwrap();
  epoll.add_socket(&b, Events::OUT).unwrap();

  let ready = epoll.wait(POLL, WaitCapacity::uniform(1)).unwrap();
  assert_eq!(ready.udt_writable.len(), 1);
  assert_eq!(ready.total, 2);
  assert!(ready.is_truncated());
}

#[test]
fn test_removed_socket_is_not_reported() {
  let udt = common::start();
  let (_server, client, _accepted) = common::connected(&udt, SocketType::Stream);
  let epoll = udt.epoll().unwrap();
  epoll.add_socket(&client, Events::OUT).unwrap();
  epoll.remove_socket(&client).unwrap();
  assert!(epoll.wait(POLL, WaitCapacity::default()).unwrap().is_empty());
}

#[test]
fn test_reregister_replaces_interest() {
  let udt = common::start();
  let (_server, client, _accepted) = common::connected(&udt, SocketType::Stream);
  let epoll = udt.epoll().unwrap();
  epoll.add_socket(&client, Events::OUT).unwrap();
  epoll.add_socket(&client, Events::IN).unwrap();

  let ready = epoll.wait(POLL, WaitCapacity::default()).unwrap();
  assert!(ready.is_empty());
  assert_eq!(ready.total, 0);
}

#[test]
fn test_writable_with_indefinite_wait() {
  let udt = common::start();
  let (_server, client, _accepted) = common::connected(&udt, SocketType::Stream);
  let epoll = udt.epoll().unwrap();
  epoll.add_socket(&client, Events::OUT).unwrap();

  let ready = epoll.wait(None, WaitCapacity::default()).unwrap();
  assert_eq!(ready.udt_writable, vec![client.id()]);
  assert_eq!(ready.total, 1);
  epoll.release().unwrap();
}

#[test]
fn test_registration_during_wait() {
  let udt = common::start();
  let (_server, client, accepted) = common::connected(&udt, SocketType::Stream);
  let epoll = udt.epoll().unwrap();
  epoll.add_socket(&accepted, Events::IN).unwrap();

  thread::scope(|s| {
    s.spawn(|| {
      thread::sleep(Duration::from_millis(30));
      epoll.add_socket(&client, Events::OUT).unwrap();
    });
    let ready = epoll
      .wait(Some(Duration::from_secs(5)), WaitCapacity::default())
      .unwrap();
    assert_eq!(ready.udt_writable, vec![client.id()]);
  });
}

#[test]
fn test_indefinite_wait_on_empty_group_fails() {
  let udt = common::start();
  let epoll = udt.epoll().unwrap();
  let err = epoll.wait(None, WaitCapacity::default()).unwrap_err();
  assert!(matches!(err, Error::EpollWaitFailed(_)));
  assert_eq!(err.code(), Some(code::EINVPARAM));
}

#[test]
fn test_closed_socket_cannot_be_added() {
  let udt = common::start();
  let sock = udt.socket(Family::V4, SocketType::Stream).unwrap();
  sock.close().unwrap();
  let epoll = udt.epoll().unwrap();
  let err = epoll.add_socket(&sock, Events::IN).unwrap_err();
  assert!(matches!(
    err,
    Error::EpollAddFailed { kind: udt::SocketKind::Udt, .. }
  ));
  assert_eq!(err.code(), Some(code::EINVSOCK));
}
