use std::time::Duration;

use serde::Serialize;

/// Point-in-time statistics snapshot for one synchronization source.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct SourceStatistics {
    pub ssrc: u32,
    pub is_sender: bool,
    pub cname: String,
    pub packets: u32,
    pub octets: u64,
    /// Estimated unrecovered missing packets. `None` for RTX-role sources,
    /// which never report loss.
    pub packets_lost: Option<u32>,
    pub max_consecutive_lost: u32,
    pub packets_out_of_order: u32,
    pub late_out_of_order: u32,
    pub retransmissions: u32,
    pub duplicate_retransmissions: u32,
    pub nacks: u32,
    /// Current interarrival jitter in timestamp units.
    pub jitter: u32,
    pub maximum_jitter: u32,
    /// Min/avg/max wall-clock spacing over the last statistics interval.
    pub minimum_packet_interval: Option<Duration>,
    pub average_packet_interval: Option<Duration>,
    pub maximum_packet_interval: Option<Duration>,
    pub round_trip_time: Option<Duration>,
}

/// Aggregate view over a whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct SessionStatistics {
    pub session_id: u32,
    pub label: String,
    pub round_trip_time: Option<Duration>,
    pub senders: Vec<SourceStatistics>,
    pub receivers: Vec<SourceStatistics>,
}
