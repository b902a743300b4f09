use std::time::{Duration, SystemTime};

/// Seconds between the NTP era origin (1900-01-01) and the UNIX epoch.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Returns the given time as 32-bit seconds since the NTP era origin.
///
/// Timestamps past 2036-02-07 roll over into NTP era 1, see RFC 4330 section 3.
#[inline]
pub fn ntp_seconds(time: SystemTime) -> u32 {
    let unix = time
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    (unix + NTP_UNIX_OFFSET) as u32
}

/// Returns the current time as 32-bit seconds since the NTP era origin.
#[inline]
pub fn ntp_now() -> u32 {
    ntp_seconds(SystemTime::now())
}

/// Converts 32-bit NTP seconds back into a [`SystemTime`].
///
/// Values with the most significant bit cleared are interpreted as NTP era 1.
pub fn system_time_from_ntp(seconds: u32) -> SystemTime {
    let seconds = u64::from(seconds);
    let absolute = if seconds & 0x8000_0000 == 0 { seconds + (1 << 32) } else { seconds };

    SystemTime::UNIX_EPOCH + Duration::from_secs(absolute.saturating_sub(NTP_UNIX_OFFSET))
}

pub mod constants {
    /// The registered PFCP UDP port.
    pub const PFCP_PORT: u16 = 8805;
    /// The largest 24-bit sequence number.
    pub const MAX_SEQUENCE: u32 = 0x00ff_ffff;
}
