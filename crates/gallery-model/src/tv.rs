use anyhow::{Context, Result, ensure};
use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, LocalResult, NaiveDate, NaiveDateTime,
    NaiveTime, TimeZone,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TvPower {
    On,
    Off,
}

/// One weekly on/off window for the television.
///
/// `days` uses 0 = Monday .. 6 = Sunday. An `off_time` earlier than `on_time`
/// keeps the TV on past midnight into the following day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TvSchedule {
    #[serde(default)]
    pub id: String,
    pub on_time: String,
    pub off_time: String,
    pub days: Vec<u8>,
    #[serde(default = "TvSchedule::default_enabled")]
    pub enabled: bool,
}

impl TvSchedule {
    const fn default_enabled() -> bool {
        true
    }

    pub fn validate(&self, index: usize) -> Result<()> {
        let on = parse_time(&self.on_time)
            .with_context(|| format!("schedules[{index}].on_time is invalid"))?;
        let off = parse_time(&self.off_time)
            .with_context(|| format!("schedules[{index}].off_time is invalid"))?;
        ensure!(
            on != off,
            "schedules[{index}] on_time and off_time must differ"
        );
        ensure!(
            !self.days.is_empty(),
            "schedules[{index}].days must list at least one day"
        );
        ensure!(
            self.days.iter().all(|day| *day <= 6),
            "schedules[{index}].days must be between 0 (Monday) and 6 (Sunday)"
        );
        Ok(())
    }

    fn applies_on(&self, date: NaiveDate) -> bool {
        let weekday = date.weekday().num_days_from_monday();
        self.days.iter().any(|day| u32::from(*day) == weekday)
    }

    fn window_starting_on(&self, tz: Tz, date: NaiveDate) -> Option<OnWindow> {
        if !self.enabled || !self.applies_on(date) {
            return None;
        }
        let on = parse_time(&self.on_time).ok()?;
        let off = parse_time(&self.off_time).ok()?;
        let off_date = if off > on {
            date
        } else {
            date.succ_opt()?
        };
        let start = resolve_local_datetime(tz, date, on, Boundary::Start);
        let end = resolve_local_datetime(tz, off_date, off, Boundary::End);
        (end > start).then_some(OnWindow { start, end })
    }
}

fn parse_time(value: &str) -> Result<NaiveTime> {
    let trimmed = value.trim();
    for format in ["%H:%M", "%H:%M:%S"] {
        if let Ok(parsed) = NaiveTime::parse_from_str(trimmed, format) {
            return Ok(parsed);
        }
    }
    anyhow::bail!("invalid time literal '{value}', expected HH:MM")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TvScheduleSet {
    #[serde(default)]
    pub schedules: Vec<TvSchedule>,
}

impl TvScheduleSet {
    pub fn validate(&self) -> Result<()> {
        for (index, schedule) in self.schedules.iter().enumerate() {
            schedule.validate(index)?;
        }
        Ok(())
    }

    /// Gives every schedule without an id a fresh one from `next_id`.
    pub fn assign_ids(&mut self, mut next_id: impl FnMut() -> String) {
        for schedule in &mut self.schedules {
            if schedule.id.trim().is_empty() {
                schedule.id = next_id();
            }
        }
    }

    pub fn is_managed(&self) -> bool {
        self.schedules.iter().any(|schedule| schedule.enabled)
    }

    /// Desired TV power at `instant`, or `None` when no enabled schedule
    /// exists and power is left alone.
    pub fn power_at(&self, instant: DateTime<Tz>) -> Option<TvPower> {
        if !self.is_managed() {
            return None;
        }
        let tz = instant.timezone();
        let date = instant.date_naive();
        let on = [date.pred_opt(), Some(date)]
            .into_iter()
            .flatten()
            .flat_map(|day| self.windows_starting_on(tz, day))
            .any(|window| window.contains(instant));
        Some(if on { TvPower::On } else { TvPower::Off })
    }

    /// Next instant after `from` at which the desired power changes.
    pub fn next_transition_after(&self, from: DateTime<Tz>) -> Option<(DateTime<Tz>, TvPower)> {
        let current = self.power_at(from)?;
        let tz = from.timezone();
        let start_date = from.date_naive().pred_opt()?;
        let mut candidates: Vec<DateTime<Tz>> = (0..=8)
            .filter_map(|offset| start_date.checked_add_signed(ChronoDuration::days(offset)))
            .flat_map(|day| self.windows_starting_on(tz, day))
            .flat_map(|window| [window.start, window.end])
            .filter(|instant| *instant > from)
            .collect();
        candidates.sort();
        candidates.dedup();
        candidates.into_iter().find_map(|instant| {
            let power = self.power_at(instant)?;
            (power != current).then_some((instant, power))
        })
    }

    fn windows_starting_on(&self, tz: Tz, date: NaiveDate) -> Vec<OnWindow> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.window_starting_on(tz, date))
            .collect()
    }
}

#[derive(Debug, Clone)]
struct OnWindow {
    start: DateTime<Tz>,
    end: DateTime<Tz>,
}

impl OnWindow {
    fn contains(&self, instant: DateTime<Tz>) -> bool {
        instant >= self.start && instant < self.end
    }
}

#[derive(Debug, Clone, Copy)]
enum Boundary {
    Start,
    End,
}

fn resolve_local_datetime(
    tz: Tz,
    date: NaiveDate,
    time: NaiveTime,
    boundary: Boundary,
) -> DateTime<Tz> {
    let mut candidate = NaiveDateTime::new(date, time);
    for _ in 0..=180 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return dt,
            LocalResult::Ambiguous(earliest, latest) => {
                return match boundary {
                    Boundary::Start => earliest,
                    Boundary::End => latest,
                };
            }
            LocalResult::None => {
                candidate += ChronoDuration::minutes(1);
            }
        }
    }
    // No zone has a gap longer than three hours; fall back to the UTC reading.
    tz.from_utc_datetime(&candidate)
}
