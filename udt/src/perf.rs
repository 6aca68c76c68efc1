//! Performance monitor snapshots.

use crate::{
  error::{Error, Result},
  socket::Socket,
};

/// A point-in-time copy of a socket's transfer statistics.
///
/// `*_total` counters are cumulative since the connection was set up. The
/// local counters cover the period since the last clearing snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TraceInfo {
  /// Milliseconds since the socket was created.
  pub ms_timestamp: i64,
  pub pkt_sent_total: i64,
  pub pkt_recv_total: i64,
  pub pkt_snd_loss_total: i32,
  pub pkt_rcv_loss_total: i32,
  pub pkt_retrans_total: i32,
  pub pkt_sent_ack_total: i32,
  pub pkt_recv_ack_total: i32,
  pub pkt_sent_nak_total: i32,
  pub pkt_recv_nak_total: i32,
  pub us_snd_duration_total: i64,

  pub pkt_sent: i64,
  pub pkt_recv: i64,
  pub pkt_snd_loss: i32,
  pub pkt_rcv_loss: i32,
  pub pkt_retrans: i32,
  pub pkt_sent_ack: i32,
  pub pkt_recv_ack: i32,
  pub pkt_sent_nak: i32,
  pub pkt_recv_nak: i32,
  pub mbps_send_rate: f64,
  pub mbps_recv_rate: f64,
  pub us_snd_duration: i64,

  pub us_pkt_snd_period: f64,
  pub pkt_flow_window: i32,
  pub pkt_congestion_window: i32,
  pub pkt_flight_size: i32,
  pub ms_rtt: f64,
  pub mbps_bandwidth: f64,
  pub byte_avail_snd_buf: i32,
  pub byte_avail_rcv_buf: i32,
}

impl Socket {
  /// Snapshots the socket's statistics. With `clear` the local counters
  /// restart from zero afterwards.
  pub fn perfmon(&self, clear: bool) -> Result<TraceInfo> {
    self.udt().engine()?.perfmon(self.id(), clear).map_err(Error::PerfmonFailed)
  }
}
