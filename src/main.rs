use anyhow::{bail, Context};
use embassy_executor::Spawner;
use embassy_futures::join::join;
use embassy_time::{Duration, Timer};
use log::{error, info, warn};
use sipwise_rs::ble::PeripheralEventChannel;
use sipwise_rs::controller::WaterTracker;
use sipwise_rs::goal::DailyGoal;
use sipwise_rs::sim::{parse_replay, ReplayStep, SimulatedBottle};
use sipwise_rs::storage::JsonFileStore;
use sipwise_rs::system::config::AppConfig;
use std::path::PathBuf;
use std::sync::Arc;

// Gap between capture lines so the tracker drains each step before the next
const STEP_DELAY_MS: u64 = 20;
const CONNECT_SETTLE_MS: u64 = 100;

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Starting water tracker replay");

    if let Err(e) = run().await {
        error!("Replay failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(capture_path) = args.next().map(PathBuf::from) else {
        bail!("usage: sipwise-rs <capture-file> [config.json]");
    };
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sipwise.json"));

    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let capture = std::fs::read_to_string(&capture_path)
        .with_context(|| format!("Failed to read capture {}", capture_path.display()))?;
    let steps = parse_replay(&capture).context("Malformed capture")?;
    let store = JsonFileStore::open(&config.store_path)
        .with_context(|| format!("Failed to open store {}", config.store_path.display()))?;

    let peripheral_events: Arc<PeripheralEventChannel> = Arc::new(embassy_sync::channel::Channel::new());
    let bottle = Arc::new(SimulatedBottle::new(Arc::clone(&peripheral_events)));
    let mut tracker = WaterTracker::new(Arc::clone(&bottle), peripheral_events, store, &config);

    let commands = tracker.user_commands();
    let shutdown = tracker.shutdown_handle();
    let engine = tracker.engine();

    let replay = async {
        bottle.power_on();
        Timer::after(Duration::from_millis(CONNECT_SETTLE_MS)).await;
        if !bottle.is_connected() {
            warn!("Simulated bottle did not connect - telemetry will be dropped");
        }

        info!("▶️ Replaying {} steps from {}", steps.len(), capture_path.display());
        for step in &steps {
            match step {
                ReplayStep::Notify(channel, payload) => bottle.notify(*channel, payload),
                ReplayStep::DropLink => bottle.drop_link(),
                ReplayStep::Command(command) => commands.send(command.clone()).await,
                ReplayStep::WaitMs(ms) => Timer::after(Duration::from_millis(*ms)).await,
            }
            Timer::after(Duration::from_millis(STEP_DELAY_MS)).await;
        }

        shutdown.signal(());
    };

    join(tracker.run(), replay).await;

    let snapshot = engine.snapshot().await;
    let mut goal = DailyGoal::new();
    if let Some(profile) = config.profile {
        goal.update_from_health(profile.weight_kg, profile.exercise_min);
    }
    if let Some(today) = config.daily_goal_ml {
        goal.set_today(today);
    }

    info!(
        "📊 Total intake {:.1} mL, bottle at {:.1} mL ({:.0}% full), goal {} mL ({:.0}% reached)",
        snapshot.total_intake_ml,
        snapshot.current_volume_ml,
        snapshot.fill_fraction() * 100.0,
        goal.effective_ml(),
        goal.progress(snapshot.total_intake_ml) * 100.0
    );
    for (hour, volume) in engine.hourly_totals().await {
        info!("  {:02}:00  {:>7.1} mL", hour, volume);
    }
    for entry in engine.recent_entries(config.recent_entries).await {
        info!("  {}  {:>7.1} mL  {:?}", entry.at.format("%H:%M:%S"), entry.volume_ml, entry.source);
    }

    Ok(())
}
