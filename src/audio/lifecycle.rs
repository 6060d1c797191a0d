//! Processing unit lifecycle
//!
//! `Absent -> Preparing -> Active -> (Released -> Absent)`
//!
//! All transitions run in the control domain. The audio thread sees exactly
//! one thing: the pointer in [`UnitSlot`], which is non-null only while a
//! fully prepared unit is active. Publishing and retracting the pointer are
//! single atomic operations; retracting additionally waits for any callback
//! still holding the unit, so a unit is never released under the audio
//! thread's feet.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;

use super::buffer::UnitBuffer;
use super::unit::{ChannelLayout, ProcessingUnit, ScanResult};
use crate::error::{UnitError, UnitResult};

/// A unit whose resources are allocated, plus its scratch buffer
pub struct PreparedUnit {
    pub unit: Box<dyn ProcessingUnit>,
    pub buffer: UnitBuffer,
    pub layout: ChannelLayout,
}

/// The single synchronization point between lifecycle and audio thread
pub struct UnitSlot {
    active: AtomicPtr<PreparedUnit>,
    in_use: AtomicBool,
}

impl UnitSlot {
    pub fn new() -> Self {
        Self {
            active: AtomicPtr::new(ptr::null_mut()),
            in_use: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.active.load(Ordering::Acquire).is_null()
    }

    /// Snapshot the active unit for one callback (audio thread)
    ///
    /// Returns `None` when no unit is active, or when another reader already
    /// holds it. Never blocks.
    #[inline]
    pub fn acquire(&self) -> Option<SlotGuard<'_>> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        let unit = self.active.load(Ordering::SeqCst);
        if unit.is_null() {
            self.in_use.store(false, Ordering::Release);
            return None;
        }

        Some(SlotGuard { slot: self, unit })
    }

    /// Make a prepared unit visible to the audio thread
    fn publish(&self, unit: Box<PreparedUnit>) -> Option<Box<PreparedUnit>> {
        let previous = self.active.swap(Box::into_raw(unit), Ordering::SeqCst);
        if previous.is_null() {
            None
        } else {
            self.wait_idle();
            // SAFETY: the pointer came from Box::into_raw in an earlier publish,
            // has just been swapped out, and no guard holds it any more
            Some(unsafe { Box::from_raw(previous) })
        }
    }

    /// Take the active unit back (control domain, may wait)
    fn retract(&self) -> Option<Box<PreparedUnit>> {
        let previous = self.active.swap(ptr::null_mut(), Ordering::SeqCst);
        if previous.is_null() {
            return None;
        }
        self.wait_idle();
        // SAFETY: see publish
        Some(unsafe { Box::from_raw(previous) })
    }

    fn wait_idle(&self) {
        let mut spins = 0u32;
        while self.in_use.load(Ordering::SeqCst) {
            spins = spins.wrapping_add(1);
            if spins < 64 {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }
}

impl Default for UnitSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UnitSlot {
    fn drop(&mut self) {
        if let Some(mut prepared) = self.retract() {
            prepared.unit.release();
        }
    }
}

/// Exclusive access to the active unit for the duration of one callback
pub struct SlotGuard<'a> {
    slot: &'a UnitSlot,
    unit: *mut PreparedUnit,
}

impl std::ops::Deref for SlotGuard<'_> {
    type Target = PreparedUnit;

    fn deref(&self) -> &PreparedUnit {
        // SAFETY: the pointer is non-null and cannot be freed while in_use is held
        unsafe { &*self.unit }
    }
}

impl std::ops::DerefMut for SlotGuard<'_> {
    fn deref_mut(&mut self) -> &mut PreparedUnit {
        // SAFETY: in_use grants a single guard at a time, so this is the only reference
        unsafe { &mut *self.unit }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.in_use.store(false, Ordering::SeqCst);
    }
}

/// Lifecycle state as seen by the control domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Absent,
    Preparing,
    Active,
    Released,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Preparing => "preparing",
            Self::Active => "active",
            Self::Released => "released",
        }
    }
}

/// Receives lifecycle notifications (log, UI)
pub trait LifecycleObserver: Send + Sync {
    fn unit_failed(&self, error: &UnitError);

    fn unit_activated(&self, _name: &str) {}

    fn unit_released(&self, _name: &str) {}
}

/// Observer that writes to the application log
pub struct LogObserver;

impl LifecycleObserver for LogObserver {
    fn unit_failed(&self, error: &UnitError) {
        log::warn!("Processing unit unavailable, using passthrough: {}", error);
    }

    fn unit_activated(&self, name: &str) {
        log::info!("Processing unit active: {}", name);
    }

    fn unit_released(&self, name: &str) {
        log::info!("Processing unit released: {}", name);
    }
}

/// Drives a unit through its states (control domain only)
pub struct UnitLifecycle {
    slot: Arc<UnitSlot>,
    state: LifecycleState,
    pending: Option<Box<PreparedUnit>>,
    unit_name: Option<String>,
    observer: Arc<dyn LifecycleObserver>,
}

impl UnitLifecycle {
    pub fn new(slot: Arc<UnitSlot>, observer: Arc<dyn LifecycleObserver>) -> Self {
        Self {
            slot,
            state: LifecycleState::Absent,
            pending: None,
            unit_name: None,
            observer,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }

    pub fn unit_name(&self) -> Option<&str> {
        self.unit_name.as_deref()
    }

    /// `Absent -> Preparing`
    ///
    /// Lets the unit allocate and declare its layout, then sizes the scratch
    /// buffer. Any failure releases the unit and leaves the state `Absent`.
    pub fn prepare(
        &mut self,
        mut unit: Box<dyn ProcessingUnit>,
        sample_rate: f64,
        block_size: usize,
    ) -> UnitResult<()> {
        if self.state != LifecycleState::Absent {
            unit.release();
            return Err(UnitError::InvalidTransition {
                from: self.state.as_str(),
                action: "prepare a unit",
            });
        }

        let name = unit.name().to_string();
        log::info!(
            "Preparing processing unit '{}' at {} Hz, {} frames",
            name,
            sample_rate,
            block_size
        );

        let layout = match unit.prepare(sample_rate, block_size) {
            Ok(layout) => layout,
            Err(e) => {
                unit.release();
                return Err(e);
            }
        };

        if !layout.is_stereo() {
            unit.release();
            return Err(UnitError::LayoutUnsupported {
                inputs: layout.inputs,
                outputs: layout.outputs,
            });
        }

        let buffer = UnitBuffer::new(layout.buffer_channels(), block_size);
        self.pending = Some(Box::new(PreparedUnit { unit, buffer, layout }));
        self.unit_name = Some(name);
        self.state = LifecycleState::Preparing;
        Ok(())
    }

    /// `Preparing -> Active`: the one write the audio thread observes
    pub fn activate(&mut self) -> UnitResult<()> {
        let prepared = match (self.state, self.pending.take()) {
            (LifecycleState::Preparing, Some(prepared)) => prepared,
            _ => {
                return Err(UnitError::InvalidTransition {
                    from: self.state.as_str(),
                    action: "activate",
                })
            }
        };

        if let Some(mut stale) = self.slot.publish(prepared) {
            // Only reachable if the slot was shared with another lifecycle
            log::warn!("Replaced a unit that was still published; releasing it");
            stale.unit.release();
        }
        self.state = LifecycleState::Active;

        if let Some(name) = &self.unit_name {
            self.observer.unit_activated(name);
        }
        Ok(())
    }

    /// `Active | Preparing -> Released -> Absent`
    ///
    /// Call after the audio stream has stopped. Safe from any state and a
    /// no-op when there is nothing to release.
    pub fn teardown(&mut self) {
        let prepared = match self.state {
            LifecycleState::Absent | LifecycleState::Released => None,
            LifecycleState::Preparing => self.pending.take(),
            LifecycleState::Active => self.slot.retract(),
        };

        let Some(mut prepared) = prepared else {
            self.state = LifecycleState::Absent;
            return;
        };

        prepared.unit.release();
        self.state = LifecycleState::Released;
        drop(prepared);

        if let Some(name) = self.unit_name.take() {
            self.observer.unit_released(&name);
        }
        self.state = LifecycleState::Absent;
    }

    /// Consume a scan result: prepare and activate a ready unit, report
    /// anything else. The state is `Absent` afterwards unless a unit is active.
    pub fn apply_scan_result(
        &mut self,
        result: ScanResult,
        sample_rate: f64,
        block_size: usize,
    ) -> UnitResult<()> {
        let outcome = match result {
            ScanResult::NotFound { searched } => Err(UnitError::NotFound { searched }),
            ScanResult::InstantiationFailed(e) => Err(e),
            ScanResult::Ready(unit) => self
                .prepare(unit, sample_rate, block_size)
                .and_then(|()| self.activate()),
        };

        if let Err(e) = &outcome {
            if self.state == LifecycleState::Preparing {
                self.teardown();
            }
            self.observer.unit_failed(e);
        }
        outcome
    }
}

impl Drop for UnitLifecycle {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::unit::test_units::{BrokenUnit, GainUnit};
    use crate::error::UnitErrorKind;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingObserver {
        failures: Mutex<Vec<UnitErrorKind>>,
        activated: AtomicUsize,
        released: AtomicUsize,
    }

    impl LifecycleObserver for RecordingObserver {
        fn unit_failed(&self, error: &UnitError) {
            self.failures.lock().push(error.kind());
        }

        fn unit_activated(&self, _name: &str) {
            self.activated.fetch_add(1, Ordering::SeqCst);
        }

        fn unit_released(&self, _name: &str) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn lifecycle() -> (UnitLifecycle, Arc<UnitSlot>, Arc<RecordingObserver>) {
        let slot = Arc::new(UnitSlot::new());
        let observer = Arc::new(RecordingObserver::default());
        let lifecycle = UnitLifecycle::new(Arc::clone(&slot), observer.clone());
        (lifecycle, slot, observer)
    }

    #[test]
    fn test_full_lifecycle() {
        let (mut lifecycle, slot, observer) = lifecycle();
        assert_eq!(lifecycle.state(), LifecycleState::Absent);
        assert!(slot.acquire().is_none());

        let unit = GainUnit::new(0.5);
        let releases = Arc::clone(&unit.releases);
        lifecycle.prepare(Box::new(unit), 44100.0, 256).unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Preparing);
        // Prepared but not yet visible to the audio thread
        assert!(!slot.is_active());

        lifecycle.activate().unwrap();
        assert!(lifecycle.is_active());
        {
            let guard = slot.acquire().expect("unit should be active");
            assert_eq!(guard.buffer.num_channels(), 2);
            assert_eq!(guard.buffer.capacity(), 256);
            // A second reader is refused while the first holds the unit
            assert!(slot.acquire().is_none());
        }
        assert_eq!(observer.activated.load(Ordering::SeqCst), 1);

        lifecycle.teardown();
        assert_eq!(lifecycle.state(), LifecycleState::Absent);
        assert!(slot.acquire().is_none());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(observer.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let (mut lifecycle, _slot, observer) = lifecycle();
        let unit = GainUnit::new(1.0);
        let releases = Arc::clone(&unit.releases);
        lifecycle.prepare(Box::new(unit), 48000.0, 128).unwrap();
        lifecycle.activate().unwrap();

        lifecycle.teardown();
        lifecycle.teardown();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(observer.released.load(Ordering::SeqCst), 1);

        // Teardown with nothing ever prepared
        let (mut empty, _, _) = self::lifecycle();
        empty.teardown();
        assert_eq!(empty.state(), LifecycleState::Absent);
    }

    #[test]
    fn test_teardown_from_preparing() {
        let (mut lifecycle, slot, _) = lifecycle();
        let unit = GainUnit::new(1.0);
        let releases = Arc::clone(&unit.releases);
        lifecycle.prepare(Box::new(unit), 44100.0, 256).unwrap();

        lifecycle.teardown();
        assert_eq!(lifecycle.state(), LifecycleState::Absent);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(!slot.is_active());
    }

    #[test]
    fn test_layout_rejected() {
        let (mut lifecycle, slot, observer) = lifecycle();
        let unit = GainUnit::new(1.0).with_layout(ChannelLayout::new(1, 1));
        let releases = Arc::clone(&unit.releases);

        let err = lifecycle
            .apply_scan_result(ScanResult::Ready(Box::new(unit)), 44100.0, 256)
            .unwrap_err();
        assert_eq!(err.kind(), UnitErrorKind::LayoutUnsupported);
        assert_eq!(lifecycle.state(), LifecycleState::Absent);
        assert!(!slot.is_active());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(*observer.failures.lock(), vec![UnitErrorKind::LayoutUnsupported]);
    }

    #[test]
    fn test_scan_failures_stay_absent() {
        let (mut lifecycle, _slot, observer) = lifecycle();

        assert!(lifecycle
            .apply_scan_result(ScanResult::NotFound { searched: 3 }, 44100.0, 256)
            .is_err());
        assert!(lifecycle
            .apply_scan_result(
                ScanResult::InstantiationFailed(UnitError::InstantiationFailed {
                    name: "x".to_string(),
                    reason: "no factory".to_string(),
                }),
                44100.0,
                256,
            )
            .is_err());
        assert!(lifecycle
            .apply_scan_result(ScanResult::Ready(Box::new(BrokenUnit)), 44100.0, 256)
            .is_err());

        assert_eq!(lifecycle.state(), LifecycleState::Absent);
        assert_eq!(
            *observer.failures.lock(),
            vec![
                UnitErrorKind::NotFound,
                UnitErrorKind::InstantiationFailed,
                UnitErrorKind::Resource
            ]
        );
    }

    #[test]
    fn test_invalid_transitions() {
        let (mut lifecycle, _slot, _) = lifecycle();
        assert!(lifecycle.activate().is_err());

        lifecycle.prepare(Box::new(GainUnit::new(1.0)), 44100.0, 64).unwrap();
        let second = GainUnit::new(1.0);
        let releases = Arc::clone(&second.releases);
        let err = lifecycle.prepare(Box::new(second), 44100.0, 64).unwrap_err();
        assert_eq!(err.kind(), UnitErrorKind::Lifecycle);
        // The rejected unit is still released
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.state(), LifecycleState::Preparing);
    }

    #[test]
    fn test_never_observed_half_initialized() {
        const BLOCK: usize = 64;
        const CYCLES: usize = 500;

        let slot = Arc::new(UnitSlot::new());
        let done = Arc::new(AtomicBool::new(false));

        let reader_slot = Arc::clone(&slot);
        let reader_done = Arc::clone(&done);
        let reader = std::thread::spawn(move || {
            let mut observed = 0usize;
            while !reader_done.load(Ordering::SeqCst) {
                if let Some(mut guard) = reader_slot.acquire() {
                    assert_eq!(guard.buffer.num_channels(), 2);
                    assert_eq!(guard.buffer.capacity(), BLOCK);
                    let prepared = &mut *guard;
                    prepared.buffer.set_frames(BLOCK);
                    prepared.buffer.copy_from(0, &[0.5; BLOCK]);
                    // GainUnit asserts it has not been released
                    prepared.unit.process(&mut prepared.buffer);
                    observed += 1;
                }
            }
            observed
        });

        let mut lifecycle = UnitLifecycle::new(Arc::clone(&slot), Arc::new(LogObserver));
        for _ in 0..CYCLES {
            lifecycle.prepare(Box::new(GainUnit::new(0.5)), 44100.0, BLOCK).unwrap();
            lifecycle.activate().unwrap();
            std::thread::yield_now();
            lifecycle.teardown();
        }
        done.store(true, Ordering::SeqCst);

        // Reader panics (and join fails) on any use of a released unit
        let observed = reader.join().expect("reader thread panicked");
        assert_eq!(lifecycle.state(), LifecycleState::Absent);
        log::debug!("reader observed an active unit {} times", observed);
    }
}
