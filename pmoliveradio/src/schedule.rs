//! Weekly program schedule and "on air" lookup
//!
//! The schedule is a flat list of [`ProgramSlot`]s, each airing on some
//! weekdays between two whole hours. Slots flagged `coming_soon` are listed
//! but never considered on air. Hours are wall-clock hours in the station's
//! time zone, whatever zone the host runs in.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Time zone the program grid is written in
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Madrid;

/// Number of upcoming programs reported for today
pub const UP_NEXT_LIMIT: usize = 3;

/// One program of the weekly grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSlot {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Days the program airs (`mon`, `tue`, ...)
    pub days: Vec<Weekday>,
    /// First hour on air, inclusive
    pub start_hour: u32,
    /// Hour the program ends, exclusive
    pub end_hour: u32,
    #[serde(default)]
    pub coming_soon: bool,
}

impl ProgramSlot {
    fn airs_on(&self, day: Weekday) -> bool {
        !self.coming_soon && self.days.contains(&day)
    }
}

/// Next program to air when nothing is on now
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextBroadcast {
    pub program: ProgramSlot,
    pub weekday: Weekday,
    pub is_today: bool,
}

/// What is on air at a given time
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct OnAir {
    pub current: Option<ProgramSlot>,
    /// Up to [`UP_NEXT_LIMIT`] programs later today, by start hour
    pub up_next: Vec<ProgramSlot>,
    /// Set only when `current` is `None`
    pub next_broadcast: Option<NextBroadcast>,
}

/// The weekly program grid
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramSchedule {
    slots: Vec<ProgramSlot>,
}

impl ProgramSchedule {
    pub fn new(slots: Vec<ProgramSlot>) -> Self {
        Self { slots }
    }

    pub fn slots(&self) -> &[ProgramSlot] {
        &self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// What is on air now, program hours read in `tz`
    pub fn on_air(&self, tz: Tz) -> OnAir {
        self.on_air_at_instant(Utc::now(), tz)
    }

    /// What is on air at `instant`, program hours read in `tz`
    pub fn on_air_at_instant(&self, instant: DateTime<Utc>, tz: Tz) -> OnAir {
        self.on_air_at(instant.with_timezone(&tz).naive_local())
    }

    /// What is on air at the station wall-clock time `now`
    pub fn on_air_at(&self, now: NaiveDateTime) -> OnAir {
        let today = now.weekday();
        let hour = now.hour();

        let current = self
            .slots
            .iter()
            .find(|p| p.airs_on(today) && p.start_hour <= hour && hour < p.end_hour)
            .cloned();

        let mut up_next: Vec<ProgramSlot> = self
            .slots
            .iter()
            .filter(|p| p.airs_on(today) && p.start_hour > hour)
            .cloned()
            .collect();
        up_next.sort_by_key(|p| p.start_hour);
        up_next.truncate(UP_NEXT_LIMIT);

        let next_broadcast = if current.is_some() {
            None
        } else if let Some(first) = up_next.first() {
            Some(NextBroadcast {
                program: first.clone(),
                weekday: today,
                is_today: true,
            })
        } else {
            self.first_after(today)
        };

        OnAir {
            current,
            up_next,
            next_broadcast,
        }
    }

    /// Earliest program of the first following day that has one, up to a
    /// week ahead (today's weekday included, a week later)
    fn first_after(&self, today: Weekday) -> Option<NextBroadcast> {
        let mut day = today;
        for _ in 0..7 {
            day = day.succ();
            let first = self
                .slots
                .iter()
                .filter(|p| p.airs_on(day))
                .min_by_key(|p| p.start_hour);
            if let Some(program) = first {
                return Some(NextBroadcast {
                    program: program.clone(),
                    weekday: day,
                    is_today: false,
                });
            }
        }
        None
    }
}
