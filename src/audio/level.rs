//! Peak level detection
//!
//! Measures the instantaneous peak of one channel of a block and converts it
//! to decibels. Runs on the audio thread: no allocation, O(frames).

/// Lowest level ever reported, in dB. Silence maps here instead of -inf.
pub const MIN_DB: f32 = -100.0;

/// Largest absolute sample value in the slice (0.0 for an empty slice)
#[inline]
pub fn peak_magnitude(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
}

/// Convert a linear gain to dB, clamped to [`MIN_DB`]
///
/// Zero, negative and NaN gains all map to the floor.
#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    if gain > 0.0 {
        (20.0 * gain.log10()).max(MIN_DB)
    } else {
        MIN_DB
    }
}

/// Instantaneous peak level of a channel in dB
#[inline]
pub fn detect_level(channel: &[f32]) -> f32 {
    gain_to_db(peak_magnitude(channel))
}
