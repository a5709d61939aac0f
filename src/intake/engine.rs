//! Intake inference engine
//!
//! Owns the running daily total. Every mutation (telemetry, user action, midnight reset) goes
//! through one async mutex, is written to the snapshot store, and is announced on the event
//! bus once the lock has been released.

use crate::intake::detection::{DeltaClass, DetectionConfig, IntakeDetectionStrategy, ThresholdDetector};
use crate::intake::history::{IntakeEntry, IntakeHistory, IntakeSource};
use crate::storage::{KeyValueStore, RestoredIntake, SnapshotStore};
use crate::system::events::{EventBus, TrackerEvent};
use crate::types::{IntakeSnapshot, GLASS_STEP, ML_PER_GLASS};
use chrono::{DateTime, Local, Timelike};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use log::{error, info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum IntakeError {
    InvalidAmount(f64),
}

impl std::fmt::Display for IntakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            IntakeError::InvalidAmount(amount) => write!(f, "Invalid intake amount: {}", amount),
        }
    }
}

impl std::error::Error for IntakeError {}

/// What a single scale reading did to the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleOutcome {
    Consumption { amount_ml: f64 },
    RefillAlert { added_ml: f64 },
    Noise,
    /// Refill mode is on; the delta was not classified.
    Suppressed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct IntakeState {
    previous_volume: f64,
    current_volume: f64,
    total_intake: f64,
    refill_amount: f64,
    is_refill_mode: bool,
}

impl IntakeState {
    fn restored(restored: RestoredIntake) -> Self {
        Self {
            previous_volume: restored.current_volume_ml,
            current_volume: restored.current_volume_ml,
            total_intake: restored.total_intake_ml,
            refill_amount: restored.refill_amount_ml,
            is_refill_mode: false,
        }
    }

    fn snapshot(&self) -> IntakeSnapshot {
        IntakeSnapshot {
            total_intake_ml: self.total_intake,
            current_volume_ml: self.current_volume,
            refill_amount_ml: self.refill_amount,
            is_refill_mode: self.is_refill_mode,
        }
    }
}

struct EngineInner<S: KeyValueStore> {
    state: IntakeState,
    store: SnapshotStore<S>,
    detector: Box<dyn IntakeDetectionStrategy + Send>,
    history: IntakeHistory,
}

impl<S: KeyValueStore> EngineInner<S> {
    fn persist(&mut self, now: DateTime<Local>) {
        if let Err(e) = self.store.save_at(&self.state.snapshot(), now) {
            error!("Failed to persist intake snapshot: {}", e);
        }
    }

    fn restore(&mut self, now: DateTime<Local>) {
        match self.store.load_at(now) {
            Ok(restored) => {
                let refill_mode = self.state.is_refill_mode;
                self.state = IntakeState::restored(restored);
                self.state.is_refill_mode = refill_mode;
                if restored.rolled_over {
                    self.history.clear();
                    self.detector.reset();
                }
                info!(
                    "📂 Restored intake: total={:.1} mL, refill={:.1} mL, current={:.1} mL",
                    restored.total_intake_ml, restored.refill_amount_ml, restored.current_volume_ml
                );
            }
            Err(e) => error!("Failed to load intake snapshot: {} - keeping current state", e),
        }
    }

    fn record_intake(&mut self, amount_ml: f64, source: IntakeSource, now: DateTime<Local>) {
        self.state.total_intake += amount_ml;
        self.history.record(IntakeEntry::new(now, amount_ml, source));
        self.persist(now);
    }
}

pub struct IntakeEngine<S: KeyValueStore> {
    inner: Mutex<CriticalSectionRawMutex, EngineInner<S>>,
    events: Arc<EventBus>,
    ml_per_glass: f64,
    clock: fn() -> DateTime<Local>,
}

impl<S: KeyValueStore> IntakeEngine<S> {
    /// Build the engine from whatever the store holds. A store that cannot be read starts
    /// the engine from zero.
    pub fn new(store: S, detection: DetectionConfig, events: Arc<EventBus>) -> Self {
        Self::with_detector(store, Box::new(ThresholdDetector::new(detection)), events)
    }

    pub fn with_detector(
        store: S,
        detector: Box<dyn IntakeDetectionStrategy + Send>,
        events: Arc<EventBus>,
    ) -> Self {
        Self::build(store, detector, events, Local::now)
    }

    fn build(
        store: S,
        detector: Box<dyn IntakeDetectionStrategy + Send>,
        events: Arc<EventBus>,
        clock: fn() -> DateTime<Local>,
    ) -> Self {
        let mut inner = EngineInner {
            state: IntakeState::default(),
            store: SnapshotStore::new(store),
            detector,
            history: IntakeHistory::new(),
        };
        inner.restore(clock());

        Self {
            inner: Mutex::new(inner),
            events,
            ml_per_glass: ML_PER_GLASS,
            clock,
        }
    }

    pub fn with_ml_per_glass(mut self, ml_per_glass: f64) -> Self {
        if ml_per_glass.is_finite() && ml_per_glass > 0.0 {
            self.ml_per_glass = ml_per_glass;
        } else {
            warn!("Ignoring invalid glass size {} - keeping {:.0} mL", ml_per_glass, self.ml_per_glass);
        }
        self
    }

    pub fn ml_per_glass(&self) -> f64 {
        self.ml_per_glass
    }

    pub async fn on_scale_reading(&self, volume_ml: f64) -> ScaleOutcome {
        if !volume_ml.is_finite() {
            warn!("Ignoring non-finite scale reading");
            return ScaleOutcome::Noise;
        }

        let now = (self.clock)();
        let (outcome, snapshot) = {
            let mut inner = self.inner.lock().await;
            inner.state.current_volume = volume_ml;
            let previous = inner.state.previous_volume;

            let outcome = if inner.state.is_refill_mode {
                ScaleOutcome::Suppressed
            } else {
                match inner.detector.classify(previous, volume_ml) {
                    DeltaClass::Consumption { amount_ml } => {
                        inner.record_intake(amount_ml, IntakeSource::Sensor, now);
                        ScaleOutcome::Consumption { amount_ml }
                    }
                    DeltaClass::RefillCandidate { added_ml } => ScaleOutcome::RefillAlert { added_ml },
                    DeltaClass::Noise => ScaleOutcome::Noise,
                }
            };

            inner.state.previous_volume = volume_ml;
            (outcome, inner.state.snapshot())
        };

        match outcome {
            ScaleOutcome::Consumption { .. } => {
                self.events.publish(TrackerEvent::IntakeOccurred { hour: now.hour() });
            }
            ScaleOutcome::RefillAlert { .. } => self.events.publish(TrackerEvent::RefillAlert),
            ScaleOutcome::Noise | ScaleOutcome::Suppressed => {}
        }
        self.events.publish(TrackerEvent::IntakeChanged(snapshot));

        outcome
    }

    /// Flip refill mode. Leaving it adopts the current volume as the new refill amount.
    pub async fn toggle_refill_mode(&self) -> bool {
        let now = (self.clock)();
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.state.is_refill_mode = !inner.state.is_refill_mode;
            if inner.state.is_refill_mode {
                info!("🚰 Refill mode ON - volume increases will not count");
            } else {
                inner.state.refill_amount = inner.state.current_volume;
                info!("🚰 Refill mode OFF - refill amount set to {:.1} mL", inner.state.refill_amount);
                inner.persist(now);
            }
            inner.state.snapshot()
        };

        self.events.publish(TrackerEvent::IntakeChanged(snapshot));
        snapshot.is_refill_mode
    }

    pub async fn add_manual(&self, volume_ml: f64) -> Result<f64, IntakeError> {
        if !volume_ml.is_finite() || volume_ml < 0.0 {
            warn!("Rejecting manual intake of {}", volume_ml);
            return Err(IntakeError::InvalidAmount(volume_ml));
        }

        let now = (self.clock)();
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.record_intake(volume_ml, IntakeSource::Manual, now);
            inner.state.snapshot()
        };
        info!("✍️ Manual intake of {:.1} mL - total {:.1} mL", volume_ml, snapshot.total_intake_ml);

        self.events.publish(TrackerEvent::IntakeOccurred { hour: now.hour() });
        self.events.publish(TrackerEvent::IntakeChanged(snapshot));
        Ok(snapshot.total_intake_ml)
    }

    /// Glasses come in half-glass steps.
    pub async fn add_glasses(&self, glasses: f64) -> Result<f64, IntakeError> {
        if !glasses.is_finite() || glasses < 0.0 || (glasses / GLASS_STEP).fract() != 0.0 {
            warn!("Rejecting {} glasses", glasses);
            return Err(IntakeError::InvalidAmount(glasses));
        }
        self.add_manual(glasses * self.ml_per_glass).await
    }

    pub async fn reset_daily(&self) {
        let now = (self.clock)();
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.state.total_intake = 0.0;
            inner.history.clear();
            inner.detector.reset();
            inner.persist(now);
            inner.state.snapshot()
        };
        info!("🌙 Daily intake reset");

        self.events.publish(TrackerEvent::IntakeChanged(snapshot));
    }

    /// Accept a refill alert: the current volume becomes the new refill amount.
    pub async fn confirm_refill(&self) {
        let now = (self.clock)();
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.state.refill_amount = inner.state.current_volume;
            inner.persist(now);
            inner.state.snapshot()
        };
        info!("🚰 Refill confirmed at {:.1} mL", snapshot.refill_amount_ml);

        self.events.publish(TrackerEvent::IntakeChanged(snapshot));
    }

    /// Re-apply the stored snapshot, rolling the total over if the day changed.
    pub async fn reload(&self) {
        let now = (self.clock)();
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.restore(now);
            inner.state.snapshot()
        };

        self.events.publish(TrackerEvent::IntakeChanged(snapshot));
    }

    pub async fn persist(&self) {
        let now = (self.clock)();
        self.inner.lock().await.persist(now);
    }

    pub async fn snapshot(&self) -> IntakeSnapshot {
        self.inner.lock().await.state.snapshot()
    }

    pub async fn recent_entries(&self, limit: usize) -> Vec<IntakeEntry> {
        self.inner.lock().await.history.recent(limit)
    }

    pub async fn hourly_totals(&self) -> Vec<(u32, f64)> {
        self.inner.lock().await.history.hourly_totals()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;
    use embassy_futures::{block_on, join::join};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn fixed_clock() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 3, 14, 30, 0).earliest().unwrap()
    }

    fn engine() -> (IntakeEngine<MemoryStore>, Arc<EventBus>) {
        let events = Arc::new(EventBus::new());
        let engine = IntakeEngine::build(
            MemoryStore::new(),
            Box::new(ThresholdDetector::default()),
            Arc::clone(&events),
            fixed_clock,
        );
        (engine, events)
    }

    fn seeded(volume: f64) -> (IntakeEngine<MemoryStore>, Arc<EventBus>) {
        let (engine, events) = engine();
        block_on(engine.on_scale_reading(volume));
        (engine, events)
    }

    #[test]
    fn test_consumption_adds_absolute_delta() {
        let (engine, events) = seeded(500.0);
        let mut subscriber = events.subscriber().unwrap();

        let outcome = block_on(engine.on_scale_reading(480.0));
        assert_eq!(outcome, ScaleOutcome::Consumption { amount_ml: 20.0 });

        let snapshot = block_on(engine.snapshot());
        assert_eq!(snapshot.total_intake_ml, 20.0);
        assert_eq!(snapshot.current_volume_ml, 480.0);

        let published = subscriber.drain();
        assert_eq!(published[0], TrackerEvent::IntakeOccurred { hour: 14 });
        assert!(matches!(published[1], TrackerEvent::IntakeChanged(s) if s.total_intake_ml == 20.0));

        // previous volume is now 480, so the same reading again is not consumption
        assert_eq!(block_on(engine.on_scale_reading(480.0)), ScaleOutcome::Noise);
    }

    #[test]
    fn test_refill_jump_alerts_without_counting() {
        let (engine, events) = seeded(200.0);
        let mut subscriber = events.subscriber().unwrap();

        let outcome = block_on(engine.on_scale_reading(900.0));
        assert_eq!(outcome, ScaleOutcome::RefillAlert { added_ml: 700.0 });
        assert_eq!(block_on(engine.snapshot()).total_intake_ml, 0.0);
        assert_eq!(subscriber.drain()[0], TrackerEvent::RefillAlert);

        // previous advanced to 900
        assert_eq!(
            block_on(engine.on_scale_reading(880.0)),
            ScaleOutcome::Consumption { amount_ml: 20.0 }
        );
    }

    #[test]
    fn test_noise_band_is_ignored() {
        let (engine, _events) = seeded(500.0);
        for volume in [497.0, 501.0, 560.0, 560.0, 555.5] {
            assert_eq!(block_on(engine.on_scale_reading(volume)), ScaleOutcome::Noise);
        }
        assert_eq!(block_on(engine.snapshot()).total_intake_ml, 0.0);
    }

    #[test]
    fn test_refill_mode_suppresses_all_deltas() {
        let (engine, _events) = seeded(600.0);
        assert!(block_on(engine.toggle_refill_mode()));

        for volume in [100.0, 900.0, 450.0] {
            assert_eq!(block_on(engine.on_scale_reading(volume)), ScaleOutcome::Suppressed);
        }
        assert_eq!(block_on(engine.snapshot()).total_intake_ml, 0.0);

        assert!(!block_on(engine.toggle_refill_mode()));
        let snapshot = block_on(engine.snapshot());
        assert_eq!(snapshot.refill_amount_ml, 450.0);
        assert!(!snapshot.is_refill_mode);
    }

    #[test]
    fn test_entering_refill_mode_keeps_refill_amount() {
        let (engine, _events) = seeded(300.0);
        block_on(engine.confirm_refill());
        block_on(engine.on_scale_reading(100.0));

        block_on(engine.toggle_refill_mode());
        assert_eq!(block_on(engine.snapshot()).refill_amount_ml, 300.0);
    }

    #[test]
    fn test_manual_and_glasses() {
        let (engine, _events) = engine();
        assert_eq!(block_on(engine.add_manual(250.0)), Ok(250.0));
        assert_eq!(block_on(engine.add_glasses(1.5)), Ok(610.0));
        assert_eq!(
            block_on(engine.add_manual(-10.0)),
            Err(IntakeError::InvalidAmount(-10.0))
        );
        assert!(block_on(engine.add_manual(f64::NAN)).is_err());
        assert_eq!(block_on(engine.add_glasses(0.3)), Err(IntakeError::InvalidAmount(0.3)));
        assert_eq!(block_on(engine.snapshot()).total_intake_ml, 610.0);

        let recent = block_on(engine.recent_entries(10));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].volume_ml, 360.0);
        assert_eq!(recent[0].source, IntakeSource::Manual);
        assert_eq!(block_on(engine.hourly_totals()), vec![(14, 610.0)]);
    }

    #[test]
    fn test_reset_clears_total_and_history() {
        let (engine, _events) = engine();
        block_on(engine.add_manual(400.0)).unwrap();
        block_on(engine.reset_daily());

        assert_eq!(block_on(engine.snapshot()).total_intake_ml, 0.0);
        assert!(block_on(engine.recent_entries(5)).is_empty());
    }

    #[test]
    fn test_state_survives_restart_through_store() {
        let events = Arc::new(EventBus::new());
        let engine = IntakeEngine::build(
            MemoryStore::new(),
            Box::new(ThresholdDetector::default()),
            Arc::clone(&events),
            fixed_clock,
        );
        block_on(engine.on_scale_reading(700.0));
        block_on(engine.on_scale_reading(640.0));
        block_on(engine.persist());

        let store = block_on(engine.inner.lock()).store.inner().clone();
        let restarted = IntakeEngine::build(
            store,
            Box::new(ThresholdDetector::default()),
            events,
            fixed_clock,
        );
        let snapshot = block_on(restarted.snapshot());
        assert_eq!(snapshot.total_intake_ml, 60.0);
        assert_eq!(snapshot.current_volume_ml, 640.0);

        // previous volume was restored from the current volume
        assert_eq!(block_on(restarted.on_scale_reading(640.0)), ScaleOutcome::Noise);
    }

    #[test]
    fn test_leaving_refill_mode_replaces_prior_refill_amount() {
        let (engine, _events) = seeded(300.0);
        block_on(engine.confirm_refill());
        block_on(engine.on_scale_reading(250.0));
        assert_eq!(block_on(engine.snapshot()).refill_amount_ml, 300.0);

        block_on(engine.toggle_refill_mode());
        block_on(engine.on_scale_reading(820.0));
        block_on(engine.toggle_refill_mode());

        let snapshot = block_on(engine.snapshot());
        assert_eq!(snapshot.refill_amount_ml, 820.0);
        assert_eq!(snapshot.total_intake_ml, 50.0);
    }

    #[test]
    fn test_glasses_are_exact_alongside_telemetry() {
        let (engine, _events) = seeded(500.0);

        let telemetry = async {
            for volume in [502.0, 498.5, 501.0, 499.0] {
                engine.on_scale_reading(volume).await;
            }
        };
        let (total, ()) = block_on(join(engine.add_glasses(1.5), telemetry));

        assert_eq!(total, Ok(360.0));
        assert_eq!(block_on(engine.snapshot()).total_intake_ml, 360.0);
        assert_eq!(block_on(engine.inner.lock()).state.previous_volume, 499.0);
    }

    static PAST_MIDNIGHT: AtomicBool = AtomicBool::new(false);

    fn overnight_clock() -> DateTime<Local> {
        if PAST_MIDNIGHT.load(Ordering::SeqCst) {
            Local.with_ymd_and_hms(2024, 6, 4, 7, 15, 0).earliest().unwrap()
        } else {
            fixed_clock()
        }
    }

    #[test]
    fn test_reload_after_midnight_rolls_total_over() {
        let events = Arc::new(EventBus::new());
        let engine = IntakeEngine::build(
            MemoryStore::new(),
            Box::new(ThresholdDetector::default()),
            events,
            overnight_clock,
        );
        block_on(engine.on_scale_reading(600.0));
        block_on(engine.on_scale_reading(550.0));
        assert!(block_on(engine.toggle_refill_mode()));
        // suppressed and never persisted
        block_on(engine.on_scale_reading(700.0));

        PAST_MIDNIGHT.store(true, Ordering::SeqCst);
        block_on(engine.reload());

        let snapshot = block_on(engine.snapshot());
        assert_eq!(snapshot.total_intake_ml, 0.0);
        assert!(snapshot.is_refill_mode);
        assert_eq!(snapshot.current_volume_ml, 550.0);
        assert_eq!(block_on(engine.inner.lock()).state.previous_volume, 550.0);
        assert!(block_on(engine.recent_entries(10)).is_empty());
    }

    struct CountingDetector {
        inner: ThresholdDetector,
        resets: Arc<AtomicUsize>,
    }

    impl IntakeDetectionStrategy for CountingDetector {
        fn classify(&mut self, previous_ml: f64, current_ml: f64) -> DeltaClass {
            self.inner.classify(previous_ml, current_ml)
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_daily_reset_resets_detector() {
        let resets = Arc::new(AtomicUsize::new(0));
        let detector = CountingDetector {
            inner: ThresholdDetector::default(),
            resets: Arc::clone(&resets),
        };
        let engine = IntakeEngine::build(
            MemoryStore::new(),
            Box::new(detector),
            Arc::new(EventBus::new()),
            fixed_clock,
        );
        let before = resets.load(Ordering::SeqCst);

        block_on(engine.reset_daily());
        assert_eq!(resets.load(Ordering::SeqCst), before + 1);
    }
}
