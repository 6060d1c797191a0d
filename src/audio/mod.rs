//! Real-time audio pipeline
//!
//! Input flows from the duplex stream into the [`engine`], which routes it
//! through the active processing unit (or straight through) and publishes
//! the peak level for the meter. The control domain owns the unit
//! [`lifecycle`] and reads levels through the [`level_channel`].

pub mod buffer;
pub mod device;
pub mod engine;
pub mod level;
pub mod level_channel;
pub mod lifecycle;
pub mod meter;
pub mod plugin;
pub mod scan;
pub mod stream;
pub mod unit;
