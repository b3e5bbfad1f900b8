#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! RTP/RTCP session engine: multiplexes logical media streams over a media
//! and a control subchannel, tracks per-SSRC sequencing and timing state,
//! recovers from loss and reordering, and assembles/interprets RTCP compound
//! reports.

pub mod config;
pub mod congestion;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod stats;
pub mod transport;

use std::time::Duration;

pub use config::{FeedbackFlags, MediaKind, SessionConfig};
pub use session::RtpSession;
pub use stats::{SessionStatistics, SourceStatistics};
pub use transport::{CryptoContext, MediaTransport, SubChannel};

/// The role of a synchronization source within this session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Sender,
    Receiver,
}

/// Three-way outcome of every processing step.
///
/// `Ignore` drops the current packet or report without affecting session
/// health; `Abort` means the transport itself is unusable and the media leg
/// should be torn down.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Process,
    Ignore,
    Abort,
}

/// Feedback and lifecycle events surfaced to the application, drained with
/// [RtpSession::poll_event].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Peer requested a picture refresh (PLI or FIR).
    IntraFrameRequest { ssrc: u32, full: bool },
    /// Peer sent a bitrate cap (TMMBR or REMB), in bits per second.
    FlowControl { bitrate: u64, notification: bool },
    /// Peer requested a temporal/spatial quality trade-off.
    TemporalSpatialTradeOff { ssrc: u32, index: u8 },
    /// Peer said goodbye for the given source.
    ByeReceived { ssrc: u32, reason: String },
    /// A new round-trip-time estimate is available.
    RoundTripTime { rtt: Duration },
    /// Transport-wide congestion feedback arrived: (sequence, delay) pairs
    /// relative to the first packet in the batch.
    CongestionFeedback {
        packets: Vec<(u32, Duration)>,
        lost: Vec<u32>,
    },
}
