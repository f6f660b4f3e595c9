//! Timestamp codec.
//!
//! Converts between host floating-point Unix time and the fixed-point
//! register words a device exposes for its clock. Seconds are carried as a
//! 32-bit value split into two big-endian words; milliseconds either fill
//! one word ([`TimestampLayout::ThreeWord`]) or a 32-bit split pair
//! ([`TimestampLayout::FourWord`]).
//!
//! All functions here are pure.

use timesync_common::{SyncError, SyncResult, TimestampLayout};

/// Milliseconds in one second.
pub const MILLIS_PER_SECOND: u16 = 1000;

/// Timestamp in device wire format, exactly [`TimestampLayout::word_count`] long.
pub type RegisterWords = Vec<u16>;

/// Host timestamp split into whole seconds and milliseconds.
///
/// `milliseconds` is always in `0..=999`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HostTimestamp {
    /// Whole seconds since the Unix epoch.
    pub seconds: u32,
    /// Sub-second part, in milliseconds.
    pub milliseconds: u16,
}

impl HostTimestamp {
    /// Create a timestamp, carrying excess milliseconds into seconds.
    pub fn new(seconds: u32, milliseconds: u16) -> Self {
        Self {
            seconds: seconds.saturating_add(u32::from(milliseconds / MILLIS_PER_SECOND)),
            milliseconds: milliseconds % MILLIS_PER_SECOND,
        }
    }

    /// Split a fractional Unix time into seconds and rounded milliseconds.
    ///
    /// A fraction that rounds up to a full second carries into `seconds`.
    /// Inputs are expected to be finite and in `0.0..2^32`; anything else
    /// saturates rather than failing.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_secs_f64(t: f64) -> Self {
        let whole = t.floor();
        let millis = ((t - whole) * f64::from(MILLIS_PER_SECOND)).round() as u16;
        let seconds = whole as u32;
        if millis >= MILLIS_PER_SECOND {
            Self {
                seconds: seconds.saturating_add(1),
                milliseconds: 0,
            }
        } else {
            Self {
                seconds,
                milliseconds: millis,
            }
        }
    }

    /// Fractional seconds represented by this timestamp.
    pub fn as_secs_f64(self) -> f64 {
        f64::from(self.seconds) + f64::from(self.milliseconds) / f64::from(MILLIS_PER_SECOND)
    }

    /// Encode into register words for the given layout.
    pub fn to_words(self, layout: TimestampLayout) -> RegisterWords {
        let [seconds_high, seconds_low] = split_u32(self.seconds);
        match layout {
            TimestampLayout::ThreeWord => vec![self.milliseconds, seconds_high, seconds_low],
            TimestampLayout::FourWord => {
                let [millis_high, millis_low] = split_u32(u32::from(self.milliseconds));
                vec![seconds_high, seconds_low, millis_high, millis_low]
            }
        }
    }
}

/// Pack a host Unix time into register words.
pub fn pack_timestamp(t: f64, layout: TimestampLayout) -> RegisterWords {
    HostTimestamp::from_secs_f64(t).to_words(layout)
}

/// Decode register words into fractional seconds since the device epoch.
///
/// Three-word payloads are read in the same order they are written,
/// `[milliseconds, seconds_high, seconds_low]`, so `words[1]` holds the
/// high half of the seconds and decoding inverts [`pack_timestamp`].
///
/// # Errors
///
/// Returns [`SyncError::DeviceCommunication`] if the number of words does
/// not match the layout, which indicates a truncated or mismatched response.
pub fn unpack_timestamp(words: &[u16], layout: TimestampLayout) -> SyncResult<f64> {
    let expected = usize::from(layout.word_count());
    if words.len() != expected {
        return Err(SyncError::DeviceCommunication(format!(
            "{layout} timestamp needs {expected} registers, got {}",
            words.len()
        )));
    }

    let (seconds, millis) = match layout {
        TimestampLayout::ThreeWord => (join_u32(words[1], words[2]), u32::from(words[0])),
        TimestampLayout::FourWord => (join_u32(words[0], words[1]), join_u32(words[2], words[3])),
    };

    Ok(f64::from(seconds) + f64::from(millis) / f64::from(MILLIS_PER_SECOND))
}

#[allow(clippy::cast_possible_truncation)]
fn split_u32(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, (value & 0xFFFF) as u16]
}

fn join_u32(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}
