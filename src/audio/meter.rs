//! Meter ballistics and the two level meter variants
//!
//! The displayed value rises instantly to a louder reading and falls back at
//! a bounded rate, giving the usual "falling" meter look. The caller owns the
//! displayed value and steps it once per display tick, not per audio block.

/// Compute the next displayed level
///
/// - a louder reading is shown immediately when `instant_attack` is set
///   (otherwise it rises by at most `max_fall_per_step`)
/// - a quieter reading more than `max_fall_per_step` away decays by exactly
///   that amount
/// - anything closer snaps to the reading
#[inline]
pub fn step(previous: f32, instantaneous: f32, instant_attack: bool, max_fall_per_step: f32) -> f32 {
    if instantaneous > previous {
        if instant_attack || instantaneous - previous <= max_fall_per_step {
            instantaneous
        } else {
            previous + max_fall_per_step
        }
    } else if previous - instantaneous > max_fall_per_step {
        previous - max_fall_per_step
    } else {
        instantaneous
    }
}

/// Attack/release parameters for one meter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ballistics {
    pub max_fall_per_step: f32,
    pub instant_attack: bool,
}

impl Ballistics {
    pub const fn new(max_fall_per_step: f32) -> Self {
        Self {
            max_fall_per_step,
            instant_attack: true,
        }
    }

    #[inline]
    pub fn step(&self, previous: f32, instantaneous: f32) -> f32 {
        step(previous, instantaneous, self.instant_attack, self.max_fall_per_step)
    }
}

/// The two meter variants of the main window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterStyle {
    /// Coarse/fast meter: -60..+6 dB, falls 1.5 dB per tick, grows upwards
    Vertical,
    /// Fine/slow status-bar meter: -30..0 dB, falls 0.5 dB per tick, grows rightwards
    Horizontal,
}

impl MeterStyle {
    pub fn ballistics(self) -> Ballistics {
        match self {
            Self::Vertical => Ballistics::new(1.5),
            Self::Horizontal => Ballistics::new(0.5),
        }
    }

    /// dB span mapped onto the meter's extent, `(bottom, top)`
    pub fn range_db(self) -> (f32, f32) {
        match self {
            Self::Vertical => (-60.0, 6.0),
            Self::Horizontal => (-30.0, 0.0),
        }
    }
}

/// Display-side meter model: owns the ballistics-filtered level
#[derive(Debug, Clone)]
pub struct LevelMeter {
    style: MeterStyle,
    ballistics: Ballistics,
    displayed: f32,
}

impl LevelMeter {
    pub fn new(style: MeterStyle) -> Self {
        let (bottom, _) = style.range_db();
        Self {
            style,
            ballistics: style.ballistics(),
            displayed: bottom,
        }
    }

    /// Feed the latest instantaneous reading (once per display tick)
    pub fn set_level(&mut self, instantaneous: f32) -> f32 {
        self.displayed = self.ballistics.step(self.displayed, instantaneous);
        self.displayed
    }

    pub fn displayed(&self) -> f32 {
        self.displayed
    }

    pub fn style(&self) -> MeterStyle {
        self.style
    }

    /// Length of the filled part of a meter `length` pixels long
    pub fn extent(&self, length: f32) -> f32 {
        let (bottom, top) = self.style.range_db();
        map_range(self.displayed, bottom, top, 0.0, length).clamp(0.0, length.max(0.0))
    }
}

/// Linear map of `value` from `[src_min, src_max]` onto `[dst_min, dst_max]`
#[inline]
fn map_range(value: f32, src_min: f32, src_max: f32, dst_min: f32, dst_max: f32) -> f32 {
    dst_min + (dst_max - dst_min) * (value - src_min) / (src_max - src_min)
}
