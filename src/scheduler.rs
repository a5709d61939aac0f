//! Local-midnight reset timer.

use crate::intake::engine::IntakeEngine;
use crate::storage::KeyValueStore;
use chrono::{DateTime, Local, LocalResult, NaiveDateTime, TimeZone};
use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::{Duration, Timer};
use log::{debug, info, warn};

// Floor on the wait so a clock sitting exactly on midnight cannot spin
const MIN_WAIT_MS: u64 = 1;

fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(at) => Some(at),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => None,
    }
}

/// Start of the next local calendar day. When midnight itself falls in a DST gap, the first
/// valid instant of that day is used instead.
pub fn next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let tomorrow = now.date_naive().succ_opt()?;
    let midnight = tomorrow.and_hms_opt(0, 0, 0)?;
    let tz = now.timezone();

    (0..=24 * 4)
        .map(|quarter| midnight + chrono::Duration::minutes(quarter * 15))
        .find_map(|local| resolve_local(&tz, local))
}

pub fn duration_until_next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> Option<chrono::Duration> {
    next_midnight(now).map(|midnight| midnight.signed_duration_since(now.clone()))
}

pub struct MidnightScheduler {
    cancel: Signal<CriticalSectionRawMutex, ()>,
}

impl Default for MidnightScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl MidnightScheduler {
    pub fn new() -> Self {
        Self {
            cancel: Signal::new(),
        }
    }

    /// Stop the scheduler. A run in progress returns without resetting; later runs return
    /// immediately.
    pub fn cancel(&self) {
        self.cancel.signal(());
    }

    pub async fn run<S: KeyValueStore>(&self, engine: &IntakeEngine<S>) {
        self.run_with_clock(engine, Local::now).await
    }

    async fn run_with_clock<S: KeyValueStore>(&self, engine: &IntakeEngine<S>, clock: fn() -> DateTime<Local>) {
        loop {
            let now = clock();
            let wait_ms = match duration_until_next_midnight(&now) {
                Some(wait) => wait.num_milliseconds().max(MIN_WAIT_MS as i64) as u64,
                None => {
                    warn!("Could not resolve next local midnight after {} - midnight reset disabled", now);
                    return;
                }
            };
            debug!("🌙 Next daily reset in {} s", wait_ms / 1000);

            match select(Timer::after(Duration::from_millis(wait_ms)), self.cancel.wait()).await {
                Either::First(()) => {
                    info!("🌙 Local midnight reached - resetting daily intake");
                    engine.reset_daily().await;
                }
                Either::Second(()) => {
                    info!("Midnight scheduler cancelled");
                    self.cancel.signal(());
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::detection::DetectionConfig;
    use crate::storage::MemoryStore;
    use crate::system::events::EventBus;
    use chrono::{FixedOffset, NaiveDate, Timelike};
    use embassy_futures::block_on;
    use std::sync::Arc;

    fn at(offset_hours: i32, h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
        let tz = FixedOffset::east_opt(offset_hours * 3600).unwrap();
        tz.from_local_datetime(
            &NaiveDate::from_ymd_opt(2024, 3, 9)
                .unwrap()
                .and_hms_opt(h, m, s)
                .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_duration_until_midnight() {
        assert_eq!(
            duration_until_next_midnight(&at(0, 23, 59, 30)),
            Some(chrono::Duration::seconds(30))
        );
        assert_eq!(
            duration_until_next_midnight(&at(-5, 18, 0, 0)),
            Some(chrono::Duration::hours(6))
        );
        // exactly midnight waits a full day
        assert_eq!(
            duration_until_next_midnight(&at(2, 0, 0, 0)),
            Some(chrono::Duration::hours(24))
        );
    }

    #[test]
    fn test_next_midnight_is_local() {
        let midnight = next_midnight(&at(9, 13, 45, 0)).unwrap();
        assert_eq!(midnight.hour(), 0);
        assert_eq!(midnight.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert!(duration_until_next_midnight(&Local::now()).unwrap() > chrono::Duration::zero());
    }

    fn engine() -> IntakeEngine<MemoryStore> {
        IntakeEngine::new(MemoryStore::new(), DetectionConfig::default(), Arc::new(EventBus::new()))
    }

    #[test]
    fn test_cancelled_scheduler_never_resets() {
        let engine = engine();
        block_on(engine.add_manual(300.0)).unwrap();

        let scheduler = MidnightScheduler::new();
        scheduler.cancel();
        block_on(scheduler.run(&engine));
        block_on(scheduler.run(&engine));

        assert_eq!(block_on(engine.snapshot()).total_intake_ml, 300.0);
    }

    fn just_before_midnight() -> DateTime<Local> {
        let now = Local::now();
        let midnight = next_midnight(&now).unwrap();
        midnight - chrono::Duration::milliseconds(20)
    }

    #[test]
    fn test_reset_fires_at_midnight() {
        let engine = engine();
        block_on(engine.add_manual(300.0)).unwrap();

        let scheduler = MidnightScheduler::new();
        block_on(select(
            scheduler.run_with_clock(&engine, just_before_midnight),
            Timer::after(Duration::from_millis(200)),
        ));

        assert_eq!(block_on(engine.snapshot()).total_intake_ml, 0.0);
    }
}
