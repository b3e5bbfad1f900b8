use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// Seconds between the unix epoch (1970) and the NTP epoch (1900).
const NTP_EPOCH_OFFSET: u64 = 0x83AA_7E80;

/// Pairs a monotonic [Instant] with the wall clock observed at the same
/// moment, so later instants can be converted to NTP timestamps without
/// touching the system clock again.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemInstant {
    instant: Instant,
    since_unix_epoch: Duration,
}

impl SystemInstant {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            since_unix_epoch: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_secs(0)),
        }
    }

    /// Wall-clock duration since the unix epoch corresponding to `now`.
    pub fn unix(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.instant) + self.since_unix_epoch
    }

    /// Full 64-bit NTP timestamp corresponding to `now`.
    pub fn ntp(&self, now: Instant) -> u64 {
        unix2ntp(self.unix(now))
    }

    /// Monotonic instant corresponding to the given unix wall-clock time.
    pub fn instant(&self, since_unix_epoch: Duration) -> Instant {
        self.instant + since_unix_epoch - self.since_unix_epoch
    }
}

pub fn unix2ntp(since_unix_epoch: Duration) -> u64 {
    let u = since_unix_epoch.as_nanos() as u64;
    let s = (u / 1_000_000_000 + NTP_EPOCH_OFFSET) << 32;
    let f = ((u % 1_000_000_000) << 32) / 1_000_000_000;
    s | f
}

pub fn ntp2unix(ntp: u64) -> Duration {
    let s = (ntp >> 32) - NTP_EPOCH_OFFSET;
    let f = ((ntp & 0xFFFF_FFFF) * 1_000_000_000) >> 32;
    Duration::new(s, f as u32)
}

/// Middle 32 bits of a 64-bit NTP timestamp, as carried in the LSR field of
/// a reception report.
pub fn ntp_middle32(ntp: u64) -> u32 {
    ((ntp >> 16) & 0xFFFF_FFFF) as u32
}

/// Encodes a duration in the 1/65536-second units used by the DLSR field.
pub fn duration_to_dlsr(d: Duration) -> u32 {
    let units = (d.as_secs_f64() * 65536.0) as u64;
    units.min(u32::MAX as u64) as u32
}

/// Decodes a DLSR field back into a duration.
pub fn dlsr_to_duration(dlsr: u32) -> Duration {
    Duration::from_secs_f64(dlsr as f64 / 65536.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ntp_round_trip() {
        let unix = Duration::new(1_700_000_000, 123_456_789);
        let ntp = unix2ntp(unix);
        let back = ntp2unix(ntp);
        assert_eq!(back.as_secs(), unix.as_secs());
        // Fractional part loses precision below ~233 ps.
        assert!(back.subsec_nanos().abs_diff(unix.subsec_nanos()) < 2);
    }

    #[test]
    fn test_ntp_middle32() {
        let ntp = 0xDA8B_D1FC_DDDD_A05Au64;
        assert_eq!(ntp_middle32(ntp), 0xD1FC_DDDD);
    }

    #[test]
    fn test_dlsr_units() {
        assert_eq!(duration_to_dlsr(Duration::from_secs(1)), 65536);
        assert_eq!(duration_to_dlsr(Duration::from_millis(500)), 32768);
        assert_eq!(dlsr_to_duration(65536), Duration::from_secs(1));
    }

    #[test]
    fn test_system_instant_monotonic() {
        let base = SystemInstant::now();
        let now = Instant::now();
        let later = now + Duration::from_secs(2);
        assert!(base.ntp(later) > base.ntp(now));
    }
}
