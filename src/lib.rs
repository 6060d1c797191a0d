pub mod audio;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;

use std::io::Write;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

use audio::device::{log_devices, Direction};
use audio::lifecycle::LogObserver;
use audio::meter::LevelMeter;
use audio::plugin::ClapProvider;
use config::SessionConfig;
use session::Session;

/// Width of the terminal meter in characters
const METER_WIDTH: usize = 40;

pub fn run() {
    logging::init_logging();

    let config = match SessionConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{}; using default config", e);
            SessionConfig::default()
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start runtime: {}", e);
            return;
        }
    };

    runtime.block_on(run_session(config));
}

async fn run_session(config: SessionConfig) {
    log_devices(Direction::Input, config.input_device.as_deref());
    log_devices(Direction::Output, config.output_device.as_deref());

    let provider = Arc::new(ClapProvider::from_config(&config));
    let mut session = Session::new(config, provider, Arc::new(LogObserver));

    if let Err(e) = session.start_audio() {
        log::error!("{}", e);
        return;
    }

    log::info!(
        "Scanning for plugins in {} ms...",
        session.config().scan_delay_ms
    );
    let mut scan = Some(session.begin_scan());

    let mut ticker = tokio::time::interval(session.config().meter_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if let Some(result) = scan.as_mut().and_then(|pending| pending.try_take()) {
                    scan = None;
                    // Failures are reported by the observer
                    let _ = session.apply_scan_result(result);
                }

                session.meter_tick();
                session.drain_diagnostics();
                draw_meter(session.meters().0);
            }
        }
    }

    println!();
    log::info!("Shutting down");
    session.stop_audio();

    if let Err(e) = session.config().save() {
        log::warn!("Failed to save config: {}", e);
    }
}

fn draw_meter(meter: &LevelMeter) {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "\r{}", meter_bar(meter, METER_WIDTH));
    let _ = stdout.flush();
}

/// Text rendering of a meter: filled extent, then the displayed level
fn meter_bar(meter: &LevelMeter, width: usize) -> String {
    let filled = (meter.extent(width as f32).round() as usize).min(width);
    format!(
        "[{}{}] {:>6.1} dB",
        "#".repeat(filled),
        " ".repeat(width - filled),
        meter.displayed()
    )
}
