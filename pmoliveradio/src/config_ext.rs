//! Extension to keep the player settings in pmoconfig
//!
//! Settings live under `sources.liveradio`. Getters persist their default
//! value when the key is missing or invalid, so a fresh `config.yaml` lists
//! every setting the player reads.
//!
//! ```no_run
//! use pmoconfig::get_config;
//! use pmoliveradio::LiveRadioConfigExt;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = get_config();
//! let endpoints = config.get_liveradio_endpoints()?;
//! println!("primary: {}", endpoints.primary().url);
//! config.set_liveradio_recovery_interval_secs(60)?;
//! # Ok(())
//! # }
//! ```

use crate::backend::http::{DEFAULT_READ_TIMEOUT_SECS, DEFAULT_STALL_TIMEOUT_SECS};
use crate::controller::FailoverSettings;
use crate::endpoint::{
    StreamEndpoints, DEFAULT_BASE_URL, DEFAULT_FALLBACK_URL, DEFAULT_PRIMARY_PATH,
};
use crate::engine::DEFAULT_VOLUME;
use crate::prober::DEFAULT_PROBE_TIMEOUT_SECS;
use crate::recovery::DEFAULT_RECOVERY_INTERVAL_SECS;
use crate::schedule::{ProgramSchedule, DEFAULT_TIMEZONE};
use anyhow::{anyhow, Result};
use chrono_tz::Tz;
use pmoconfig::Config;
use serde_yaml::{Number, Value};
use std::time::Duration;

const SECTION: [&str; 2] = ["sources", "liveradio"];

fn key(name: &str) -> [&str; 3] {
    [SECTION[0], SECTION[1], name]
}

/// Live radio settings on top of `pmoconfig::Config`
pub trait LiveRadioConfigExt {
    /// Base URL the relative primary path is resolved against
    fn get_liveradio_base_url(&self) -> Result<String>;
    fn set_liveradio_base_url(&self, url: &str) -> Result<()>;

    /// Primary stream, relative to the base URL or absolute
    fn get_liveradio_primary_path(&self) -> Result<String>;
    fn set_liveradio_primary_path(&self, path: &str) -> Result<()>;

    fn get_liveradio_fallback_url(&self) -> Result<String>;
    fn set_liveradio_fallback_url(&self, url: &str) -> Result<()>;

    fn get_liveradio_probe_timeout_secs(&self) -> Result<u64>;
    fn set_liveradio_probe_timeout_secs(&self, secs: u64) -> Result<()>;

    fn get_liveradio_recovery_interval_secs(&self) -> Result<u64>;
    fn set_liveradio_recovery_interval_secs(&self, secs: u64) -> Result<()>;

    /// Volume applied when the player starts, in [0, 1]
    fn get_liveradio_initial_volume(&self) -> Result<f32>;
    fn set_liveradio_initial_volume(&self, volume: f32) -> Result<()>;

    fn get_liveradio_stall_timeout_secs(&self) -> Result<u64>;
    fn set_liveradio_stall_timeout_secs(&self, secs: u64) -> Result<()>;

    fn get_liveradio_read_timeout_secs(&self) -> Result<u64>;
    fn set_liveradio_read_timeout_secs(&self, secs: u64) -> Result<()>;

    /// Time zone the program hours are written in (IANA name)
    fn get_liveradio_timezone(&self) -> Result<Tz>;
    fn set_liveradio_timezone(&self, tz: Tz) -> Result<()>;

    /// Weekly program grid (empty when not configured)
    fn get_liveradio_schedule(&self) -> Result<ProgramSchedule>;
    fn set_liveradio_schedule(&self, schedule: &ProgramSchedule) -> Result<()>;

    /// Both endpoints, resolved
    fn get_liveradio_endpoints(&self) -> Result<StreamEndpoints>;

    /// Failover timings and initial volume
    fn get_liveradio_failover_settings(&self) -> Result<FailoverSettings>;
}

impl LiveRadioConfigExt for Config {
    fn get_liveradio_base_url(&self) -> Result<String> {
        string_or_default(self, "base_url", DEFAULT_BASE_URL)
    }

    fn set_liveradio_base_url(&self, url: &str) -> Result<()> {
        self.set_value(&key("base_url"), Value::String(url.to_string()))
    }

    fn get_liveradio_primary_path(&self) -> Result<String> {
        string_or_default(self, "primary_path", DEFAULT_PRIMARY_PATH)
    }

    fn set_liveradio_primary_path(&self, path: &str) -> Result<()> {
        self.set_value(&key("primary_path"), Value::String(path.to_string()))
    }

    fn get_liveradio_fallback_url(&self) -> Result<String> {
        string_or_default(self, "fallback_url", DEFAULT_FALLBACK_URL)
    }

    fn set_liveradio_fallback_url(&self, url: &str) -> Result<()> {
        self.set_value(&key("fallback_url"), Value::String(url.to_string()))
    }

    fn get_liveradio_probe_timeout_secs(&self) -> Result<u64> {
        secs_or_default(self, "probe_timeout_secs", DEFAULT_PROBE_TIMEOUT_SECS)
    }

    fn set_liveradio_probe_timeout_secs(&self, secs: u64) -> Result<()> {
        set_secs(self, "probe_timeout_secs", secs)
    }

    fn get_liveradio_recovery_interval_secs(&self) -> Result<u64> {
        secs_or_default(self, "recovery_interval_secs", DEFAULT_RECOVERY_INTERVAL_SECS)
    }

    fn set_liveradio_recovery_interval_secs(&self, secs: u64) -> Result<()> {
        set_secs(self, "recovery_interval_secs", secs)
    }

    fn get_liveradio_initial_volume(&self) -> Result<f32> {
        match self.get_value(&key("initial_volume")) {
            Ok(Value::Number(n)) if n.as_f64().is_some_and(|v| (0.0..=1.0).contains(&v)) => {
                Ok(n.as_f64().unwrap_or(DEFAULT_VOLUME as f64) as f32)
            }
            _ => {
                self.set_liveradio_initial_volume(DEFAULT_VOLUME)?;
                Ok(DEFAULT_VOLUME)
            }
        }
    }

    fn set_liveradio_initial_volume(&self, volume: f32) -> Result<()> {
        let volume = volume.clamp(0.0, 1.0) as f64;
        // Rounded so 0.8f32 is stored as 0.8, not 0.800000011920929.
        let volume = (volume * 1000.0).round() / 1000.0;
        self.set_value(&key("initial_volume"), Value::Number(Number::from(volume)))
    }

    fn get_liveradio_stall_timeout_secs(&self) -> Result<u64> {
        secs_or_default(self, "stall_timeout_secs", DEFAULT_STALL_TIMEOUT_SECS)
    }

    fn set_liveradio_stall_timeout_secs(&self, secs: u64) -> Result<()> {
        set_secs(self, "stall_timeout_secs", secs)
    }

    fn get_liveradio_read_timeout_secs(&self) -> Result<u64> {
        secs_or_default(self, "read_timeout_secs", DEFAULT_READ_TIMEOUT_SECS)
    }

    fn set_liveradio_read_timeout_secs(&self, secs: u64) -> Result<()> {
        set_secs(self, "read_timeout_secs", secs)
    }

    fn get_liveradio_timezone(&self) -> Result<Tz> {
        match self.get_value(&key("timezone")) {
            Ok(Value::String(name)) => match name.trim().parse::<Tz>() {
                Ok(tz) => Ok(tz),
                Err(_) => {
                    tracing::warn!(timezone = %name, "Unknown time zone, using {}", DEFAULT_TIMEZONE.name());
                    self.set_liveradio_timezone(DEFAULT_TIMEZONE)?;
                    Ok(DEFAULT_TIMEZONE)
                }
            },
            _ => {
                self.set_liveradio_timezone(DEFAULT_TIMEZONE)?;
                Ok(DEFAULT_TIMEZONE)
            }
        }
    }

    fn set_liveradio_timezone(&self, tz: Tz) -> Result<()> {
        self.set_value(&key("timezone"), Value::String(tz.name().to_string()))
    }

    fn get_liveradio_schedule(&self) -> Result<ProgramSchedule> {
        match self.get_value(&key("schedule")) {
            Ok(Value::Null) => Ok(ProgramSchedule::default()),
            Ok(value) => serde_yaml::from_value(value)
                .map_err(|e| anyhow!("Invalid sources.liveradio.schedule: {}", e)),
            Err(_) => {
                let schedule = ProgramSchedule::default();
                self.set_liveradio_schedule(&schedule)?;
                Ok(schedule)
            }
        }
    }

    fn set_liveradio_schedule(&self, schedule: &ProgramSchedule) -> Result<()> {
        self.set_value(&key("schedule"), serde_yaml::to_value(schedule)?)
    }

    fn get_liveradio_endpoints(&self) -> Result<StreamEndpoints> {
        let endpoints = StreamEndpoints::resolve(
            &self.get_liveradio_base_url()?,
            &self.get_liveradio_primary_path()?,
            &self.get_liveradio_fallback_url()?,
        )?;
        Ok(endpoints)
    }

    fn get_liveradio_failover_settings(&self) -> Result<FailoverSettings> {
        Ok(FailoverSettings {
            probe_timeout: Duration::from_secs(self.get_liveradio_probe_timeout_secs()?),
            recovery_interval: Duration::from_secs(self.get_liveradio_recovery_interval_secs()?),
            initial_volume: self.get_liveradio_initial_volume()?,
        })
    }
}

fn string_or_default(config: &Config, name: &str, default: &str) -> Result<String> {
    match config.get_value(&key(name)) {
        Ok(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        _ => {
            config.set_value(&key(name), Value::String(default.to_string()))?;
            Ok(default.to_string())
        }
    }
}

/// Durations must be at least one second
fn secs_or_default(config: &Config, name: &str, default: u64) -> Result<u64> {
    match config.get_value(&key(name)) {
        Ok(Value::Number(n)) if n.as_u64().is_some_and(|v| v > 0) => Ok(n.as_u64().unwrap_or(default)),
        _ => {
            set_secs(config, name, default)?;
            Ok(default)
        }
    }
}

fn set_secs(config: &Config, name: &str, secs: u64) -> Result<()> {
    config.set_value(&key(name), Value::Number(Number::from(secs)))
}
