use std::time::Duration;

/// Signed 16-bit band below the expected sequence number treated as a
/// duplicate or retransmission rather than loss.
pub(crate) const SEQ_REORDER_THRESHOLD: u16 = ((1u32 << 16) - 100) as u16;

/// Forward jump at or beyond this is a suspected numbering restart.
pub(crate) const SEQ_RESTART_THRESHOLD: u16 = 3000;

/// Consecutive suspected-restart packets before snapping to the new stream.
pub(crate) const SEQ_RESTART_COUNT: u32 = 10;

/// A suspected-restart run must stay consecutive within this window.
pub(crate) const SEQ_RESTART_PERIOD: Duration = Duration::from_secs(1);

/// Rounding guard bits of the fixed-point jitter accumulator (RFC 3550 §A.8).
pub(crate) const JITTER_GUARD_BITS: u32 = 4;

/// Late out-of-order arrivals tolerated within [LATE_OOO_PERIOD] before the
/// wait time is boosted.
pub(crate) const LATE_OOO_ADAPT_MAX: u32 = 2;
pub(crate) const LATE_OOO_PERIOD: Duration = Duration::from_secs(1);
pub(crate) const LATE_OOO_WAIT_BOOST: Duration = Duration::from_millis(10);

/// How often queued congestion receive records are drained into feedback.
pub(crate) const CONGESTION_FEEDBACK_INTERVAL: Duration = Duration::from_millis(100);

/// The media category of a session, which fixes timestamp scaling and the
/// default timing tolerances.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MediaKind {
    #[default]
    Audio,
    Video,
    Other,
}

impl MediaKind {
    /// RTP timestamp units per millisecond.
    pub fn time_units(&self) -> u32 {
        match self {
            MediaKind::Audio => 8,
            MediaKind::Video => 90,
            MediaKind::Other => 1,
        }
    }

    /// How long to hold out-of-order packets before giving up on reordering.
    pub fn default_out_of_order_wait(&self) -> Duration {
        match self {
            MediaKind::Video => Duration::from_millis(100),
            _ => Duration::from_millis(40),
        }
    }
}

/// Which RTCP feedback mechanisms were negotiated for this session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FeedbackFlags {
    pub nack: bool,
    pub pli: bool,
    pub fir: bool,
    pub tsto: bool,
    pub tmmbr: bool,
    pub remb: bool,
}

/// Session-level configuration, normally filled in from the negotiated media
/// format via [crate::RtpSession::update_media_format].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_id: u32,
    pub kind: MediaKind,
    pub label: String,
    /// Canonical name carried in SDES chunks.
    pub cname: String,
    pub tool: String,
    /// Accept data from SSRCs that were never negotiated.
    pub any_ssrc_allowed: bool,
    /// Resequence out-of-order arrivals here. Disabled when a downstream
    /// jitter buffer already absorbs reordering.
    pub resequence_out_of_order: bool,
    pub max_out_of_order_packets: usize,
    /// Initial out-of-order wait. Repeated late arrivals ratchet this up by
    /// [LATE_OOO_WAIT_BOOST] with no decay; that matches the original
    /// behavior and is intentional.
    pub out_of_order_wait_time: Duration,
    /// A receiver with no data and no sender report for this long is purged.
    pub stale_receiver_timeout: Duration,
    pub report_interval: Duration,
    /// Interval statistics are folded up every this many qualifying packets.
    pub tx_statistics_interval: u32,
    pub rx_statistics_interval: u32,
    pub feedback: FeedbackFlags,
    /// Negotiated header-extension id for absolute send time.
    pub abs_send_time_id: Option<u8>,
    /// Negotiated header-extension id for the transport-wide sequence number.
    pub transport_wide_seq_id: Option<u8>,
    /// Both media and control share one subchannel (rtcp-mux).
    pub single_port: bool,
    /// Append receiver-reference-time XR blocks to reports.
    pub extended_reports: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let kind = MediaKind::Audio;
        SessionConfig {
            session_id: 1,
            kind,
            label: String::new(),
            cname: String::new(),
            tool: String::from("avp"),
            any_ssrc_allowed: true,
            resequence_out_of_order: true,
            max_out_of_order_packets: 20,
            out_of_order_wait_time: kind.default_out_of_order_wait(),
            stale_receiver_timeout: Duration::from_secs(60),
            report_interval: Duration::from_secs(4),
            tx_statistics_interval: 100,
            rx_statistics_interval: 100,
            feedback: FeedbackFlags::default(),
            abs_send_time_id: None,
            transport_wide_seq_id: None,
            single_port: false,
            extended_reports: false,
        }
    }
}

impl SessionConfig {
    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = kind;
        self.out_of_order_wait_time = kind.default_out_of_order_wait();
        self
    }

    pub fn with_session_id(mut self, session_id: u32) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_cname(mut self, cname: impl Into<String>) -> Self {
        self.cname = cname.into();
        self
    }

    pub fn with_feedback(mut self, feedback: FeedbackFlags) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }
}
