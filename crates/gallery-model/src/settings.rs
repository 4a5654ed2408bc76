use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Global display configuration shared by every display client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mat_color: String,
    pub mat_finish: String,
    pub bevel_width: u32,
    /// Seconds each slide stays on screen.
    pub slideshow_interval: f64,
    /// Seconds spent cross-fading between slides.
    pub transition_duration: f64,
    pub fit_mode: FitMode,
    pub shuffle: bool,
    pub image_order: Vec<String>,
    pub target_aspect_ratio: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    #[default]
    Contain,
    Cover,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mat_color: "#2c2c2c".to_string(),
            mat_finish: "flat".to_string(),
            bevel_width: 4,
            slideshow_interval: Self::DEFAULT_INTERVAL_SECS,
            transition_duration: 1.0,
            fit_mode: FitMode::Contain,
            shuffle: false,
            image_order: Vec::new(),
            target_aspect_ratio: "16:9".to_string(),
        }
    }
}

impl Settings {
    const DEFAULT_INTERVAL_SECS: f64 = 10.0;
    pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

    /// Auto-advance interval. Falls back to the default when the stored value
    /// is unusable so a hand-edited file cannot stall or spin the show.
    pub fn interval(&self) -> Duration {
        Some(self.slideshow_interval)
            .filter(|value| *value > 0.0 && *value <= Self::MAX_INTERVAL_SECS)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(Duration::from_secs_f64(Self::DEFAULT_INTERVAL_SECS))
    }

    pub fn aspect_ratio(&self) -> Result<(u32, u32)> {
        let raw = self.target_aspect_ratio.trim();
        let (w, h) = raw
            .split_once(':')
            .with_context(|| format!("target_aspect_ratio '{raw}' must look like W:H"))?;
        let w: u32 = w
            .trim()
            .parse()
            .with_context(|| format!("invalid aspect ratio width in '{raw}'"))?;
        let h: u32 = h
            .trim()
            .parse()
            .with_context(|| format!("invalid aspect ratio height in '{raw}'"))?;
        ensure!(w > 0 && h > 0, "target_aspect_ratio parts must be positive");
        Ok((w, h))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.slideshow_interval > 0.0 && self.slideshow_interval <= Self::MAX_INTERVAL_SECS,
            "slideshow_interval must be between 0 and {} seconds",
            Self::MAX_INTERVAL_SECS
        );
        ensure!(
            self.transition_duration.is_finite() && self.transition_duration >= 0.0,
            "transition_duration must be non-negative"
        );
        ensure!(
            !self.mat_color.trim().is_empty(),
            "mat_color must not be blank"
        );
        self.aspect_ratio()?;
        Ok(())
    }

    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(value) = patch.mat_color {
            self.mat_color = value;
        }
        if let Some(value) = patch.mat_finish {
            self.mat_finish = value;
        }
        if let Some(value) = patch.bevel_width {
            self.bevel_width = value;
        }
        if let Some(value) = patch.slideshow_interval {
            self.slideshow_interval = value;
        }
        if let Some(value) = patch.transition_duration {
            self.transition_duration = value;
        }
        if let Some(value) = patch.fit_mode {
            self.fit_mode = value;
        }
        if let Some(value) = patch.shuffle {
            self.shuffle = value;
        }
        if let Some(value) = patch.image_order {
            self.image_order = value;
        }
        if let Some(value) = patch.target_aspect_ratio {
            self.target_aspect_ratio = value;
        }
    }
}

/// Fields a settings update may touch; anything else in the request is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    pub mat_color: Option<String>,
    pub mat_finish: Option<String>,
    pub bevel_width: Option<u32>,
    pub slideshow_interval: Option<f64>,
    pub transition_duration: Option<f64>,
    pub fit_mode: Option<FitMode>,
    pub shuffle: Option<bool>,
    pub image_order: Option<Vec<String>>,
    pub target_aspect_ratio: Option<String>,
}
