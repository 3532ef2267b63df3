use anyhow::{Context, Result};
use std::thread;
use std::time::Duration;

use accompanist::{
    AccompanistConfig, AccompanistCore, AccompanistHandle, LoggingSink, RandomWalkModel, SystemClock,
    ThresholdOracle,
};

// (key, length in quarters) of a short phrase; key 0 is a rest
const PHRASE: [(u8, u32); 8] = [(72, 1), (74, 1), (76, 2), (0, 1), (79, 1), (77, 1), (76, 2), (74, 2)];
const MELODY_CHANNEL: u8 = 1;
const MELODY_VELOCITY: u8 = 96;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("[MAIN] Starting accompanist demo");

    let path = AccompanistConfig::default_path()?;
    let config = AccompanistConfig::load_or_default(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    log::info!("[MAIN] {} voices at {} bpm", config.voices, config.bpm);

    let oracle = ThresholdOracle::new(
        RandomWalkModel::new(config.voices, 2017),
        config.voices,
        config.strike_threshold,
    );
    let core = AccompanistCore::new(&config, oracle, LoggingSink)?
        .on_failure(|err| log::error!("[MAIN] accompaniment stopped: {}", err));
    let handle = AccompanistHandle::spawn(core, SystemClock::new())?;

    let quarter = Duration::from_millis(60_000 / u64::from(config.bpm));
    for (key, quarters) in PHRASE {
        let length = quarter * quarters;
        if key == 0 {
            thread::sleep(length);
            continue;
        }
        handle.melody_on(MELODY_CHANNEL, key, MELODY_VELOCITY)?;
        // release slightly early so consecutive notes are detached
        thread::sleep(length.saturating_sub(Duration::from_millis(20)));
        handle.melody_off(MELODY_CHANNEL, key, MELODY_VELOCITY)?;
        thread::sleep(Duration::from_millis(20));
    }

    // let the last quarter finish before stopping
    thread::sleep(quarter);
    let snapshot = handle.stop()?;
    log::info!(
        "[MAIN] played {} ticks with {} oracle calls",
        snapshot.ticks_played,
        snapshot.oracle_calls
    );
    Ok(())
}
