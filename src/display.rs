//! Shared "where is the show" state for every display client.
//!
//! There is no ticking timer: auto-advance is computed lazily whenever a
//! client reads the state, so the index only moves while somebody is
//! watching. Every read and write runs under one mutex so concurrent polls
//! and controls never lose an update.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Next,
    Prev,
    Pause,
    Play,
}

impl ControlAction {
    const NAMES: &'static [&'static str] = &["next", "prev", "pause", "play"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Prev => "prev",
            Self::Pause => "pause",
            Self::Play => "play",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlAction {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "next" => Ok(Self::Next),
            "prev" => Ok(Self::Prev),
            "pause" => Ok(Self::Pause),
            "play" => Ok(Self::Play),
            other => Err(Error::InvalidArgument(format!(
                "Invalid action '{other}', expected one of: {}",
                Self::NAMES.join(", ")
            ))),
        }
    }
}

/// What a display client sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisplayStatus {
    pub index: usize,
    pub paused: bool,
    pub total: usize,
}

#[derive(Debug, Clone, Copy)]
struct DisplayState {
    index: usize,
    paused: bool,
    last_advanced_at: Instant,
}

impl DisplayState {
    /// Forces the index into `[0, total)`, or 0 for an empty show.
    fn clamp(&mut self, total: usize) {
        if total == 0 {
            self.index = 0;
        } else if self.index >= total {
            self.index = total - 1;
        }
    }

    /// Advances by whole elapsed intervals. `last_advanced_at` moves by the
    /// same number of intervals rather than to `now`, so timing does not drift.
    fn catch_up(&mut self, total: usize, interval: Duration, now: Instant) {
        if self.paused || total == 0 || interval.is_zero() {
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_advanced_at);
        let steps = elapsed.as_nanos() / interval.as_nanos();
        if steps == 0 {
            return;
        }
        let hop = (steps % total as u128) as usize;
        self.index = (self.index + hop) % total;
        let consumed = interval.as_nanos() * steps;
        self.last_advanced_at += Duration::from_nanos(u64::try_from(consumed).unwrap_or(u64::MAX));
        debug!(steps, index = self.index, total, "auto-advanced slideshow");
    }

    fn status(&self, total: usize) -> DisplayStatus {
        DisplayStatus {
            index: self.index,
            paused: self.paused,
            total,
        }
    }
}

/// Owner of the one display position shared by all clients.
#[derive(Debug)]
pub struct DisplayController {
    state: Mutex<DisplayState>,
}

impl Default for DisplayController {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayController {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// A fresh show at slide 0, playing, with its first interval starting at `now`.
    pub fn starting_at(now: Instant) -> Self {
        Self {
            state: Mutex::new(DisplayState {
                index: 0,
                paused: false,
                last_advanced_at: now,
            }),
        }
    }

    pub fn poll(&self, total: usize, interval: Duration) -> DisplayStatus {
        self.poll_at(total, interval, Instant::now())
    }

    pub fn poll_at(&self, total: usize, interval: Duration, now: Instant) -> DisplayStatus {
        let mut state = self.state.lock();
        state.clamp(total);
        state.catch_up(total, interval, now);
        state.status(total)
    }

    pub fn control(
        &self,
        action: ControlAction,
        total: usize,
        interval: Duration,
    ) -> DisplayStatus {
        self.control_at(action, total, interval, Instant::now())
    }

    /// Applies `action` after settling any auto-advance that was already due,
    /// so a `next` always moves one slide past what viewers currently see.
    pub fn control_at(
        &self,
        action: ControlAction,
        total: usize,
        interval: Duration,
        now: Instant,
    ) -> DisplayStatus {
        let mut state = self.state.lock();
        state.clamp(total);
        state.catch_up(total, interval, now);
        match action {
            ControlAction::Next => {
                state.index = if total == 0 { 0 } else { (state.index + 1) % total };
                state.last_advanced_at = now;
            }
            ControlAction::Prev => {
                state.index = if total == 0 {
                    0
                } else {
                    (state.index + total - 1) % total
                };
                state.last_advanced_at = now;
            }
            ControlAction::Pause => {
                state.paused = true;
            }
            ControlAction::Play => {
                state.paused = false;
                state.last_advanced_at = now;
            }
        }
        info!(
            action = %action,
            index = state.index,
            paused = state.paused,
            total,
            "display control applied"
        );
        state.status(total)
    }
}
