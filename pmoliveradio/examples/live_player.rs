//! Example: drive the live radio player from the terminal
//!
//! Run with: cargo run -p pmoliveradio --example live_player
//! With sound: cargo run -p pmoliveradio --features cpal --example live_player
//!
//! Commands (one per line):
//!   p  play/pause
//!   +  volume up
//!   -  volume down
//!   s  print the state as JSON
//!   q  quit

use pmoconfig::get_config;
use pmoliveradio::{
    HttpStreamBackend, HttpStreamProber, LiveRadioConfigExt, PcmSink, PlaybackState,
    ProgramSchedule, RadioPlayer,
};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const VOLUME_STEP: f32 = 0.1;

fn init_tracing(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}

#[cfg(feature = "cpal")]
fn open_sink() -> Arc<dyn PcmSink> {
    match pmoliveradio::CpalSink::open() {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            tracing::warn!("No audio output ({}), playing silently", e);
            Arc::new(pmoliveradio::NullSink)
        }
    }
}

#[cfg(not(feature = "cpal"))]
fn open_sink() -> Arc<dyn PcmSink> {
    Arc::new(pmoliveradio::NullSink)
}

fn describe(state: &PlaybackState) -> String {
    let status = match (state.is_playing, state.is_loading) {
        (false, _) => "stopped",
        (true, true) => "loading",
        (true, false) => "on air",
    };
    format!(
        "[{}] {} - volume {:.0}%",
        state.active_endpoint.indicator(),
        status,
        state.volume * 100.0
    )
}

fn print_on_air(schedule: &ProgramSchedule, tz: Tz) {
    if schedule.is_empty() {
        return;
    }
    let on_air = schedule.on_air(tz);
    if let Some(current) = &on_air.current {
        println!(
            "Now: {} ({}:00 - {}:00h)",
            current.name, current.start_hour, current.end_hour
        );
    } else if let Some(next) = &on_air.next_broadcast {
        let day = if next.is_today {
            "today".to_string()
        } else {
            next.weekday.to_string()
        };
        println!(
            "Next broadcast: {} {} ({}:00 - {}:00h)",
            next.program.name, day, next.program.start_hour, next.program.end_hour
        );
    }
    for program in &on_air.up_next {
        println!("  later: {} at {}:00", program.name, program.start_hour);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = get_config();
    init_tracing(&config.get_log_min_level()?);

    let endpoints = config.get_liveradio_endpoints()?;
    let settings = config.get_liveradio_failover_settings()?;
    let schedule = config.get_liveradio_schedule()?;
    let timezone = config.get_liveradio_timezone()?;

    let backend = HttpStreamBackend::builder(open_sink())
        .stall_timeout(Duration::from_secs(config.get_liveradio_stall_timeout_secs()?))
        .read_timeout(Duration::from_secs(config.get_liveradio_read_timeout_secs()?))
        .build()?;
    let prober = HttpStreamProber::builder()
        .timeout(settings.probe_timeout)
        .build()?;

    println!("Primary:  {}", endpoints.primary().url);
    println!("Fallback: {}", endpoints.fallback().url);
    print_on_air(&schedule, timezone);
    println!("Commands: p (play/pause), + / - (volume), s (state), q (quit)\n");

    let player = RadioPlayer::spawn(backend, endpoints, Arc::new(prober), settings);

    let mut updates = player.subscribe();
    let printer = tokio::spawn(async move {
        let mut last = None;
        while updates.changed().await.is_ok() {
            let line = describe(&updates.borrow_and_update());
            if last.as_ref() != Some(&line) {
                println!("{}", line);
                last = Some(line);
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "p" => {
                player.toggle_play().await;
            }
            "+" => {
                let volume = player.state().volume + VOLUME_STEP;
                player.set_volume(volume).await;
            }
            "-" => {
                let volume = player.state().volume - VOLUME_STEP;
                player.set_volume(volume).await;
            }
            "s" => println!("{}", serde_json::to_string_pretty(&player.state())?),
            "q" => break,
            "" => {}
            other => println!("Unknown command: {}", other),
        }
    }

    player.shutdown().await;
    printer.abort();
    Ok(())
}
