use std::sync::Arc;

use gallery_model::Settings;
use serde::Serialize;

use crate::display::{ControlAction, DisplayController, DisplayStatus};
use crate::error::Result;
use crate::gallery::Gallery;
use crate::slides::{Slide, compose_slides};

/// Everything a display needs to render the show.
#[derive(Debug, Clone, Serialize)]
pub struct SlidesView {
    /// Every enabled filename in filename order, including members of a
    /// group that is currently suppressed.
    pub images: Vec<String>,
    pub slides: Vec<Slide>,
    pub settings: Settings,
}

/// Ties the gallery store to the display position. The slide list is
/// recomposed from a fresh snapshot on every call, so `total` always reflects
/// the gallery as it is right now.
#[derive(Debug)]
pub struct Slideshow {
    gallery: Arc<Gallery>,
    display: DisplayController,
    shuffle_seed: u64,
}

impl Slideshow {
    pub fn new(gallery: Arc<Gallery>, shuffle_seed: u64) -> Self {
        Self::with_controller(gallery, DisplayController::new(), shuffle_seed)
    }

    pub fn with_controller(
        gallery: Arc<Gallery>,
        display: DisplayController,
        shuffle_seed: u64,
    ) -> Self {
        Self {
            gallery,
            display,
            shuffle_seed,
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn slides(&self) -> SlidesView {
        let snapshot = self.gallery.snapshot();
        let slides = compose_slides(
            &snapshot.images,
            &snapshot.groups,
            &snapshot.settings,
            self.shuffle_seed,
        );
        let images = snapshot
            .images
            .iter()
            .filter(|(_, record)| record.enabled)
            .map(|(name, _)| name.clone())
            .collect();
        SlidesView {
            images,
            slides,
            settings: snapshot.settings,
        }
    }

    /// Current position, auto-advanced for any intervals that elapsed.
    pub fn state(&self) -> DisplayStatus {
        let (total, settings) = self.current_total();
        self.display.poll(total, settings.interval())
    }

    /// Parses and applies a control action. An unknown action is rejected
    /// before the display state is touched.
    pub fn control(&self, action: &str) -> Result<DisplayStatus> {
        let action: ControlAction = action.parse()?;
        Ok(self.apply(action))
    }

    pub fn apply(&self, action: ControlAction) -> DisplayStatus {
        let (total, settings) = self.current_total();
        self.display.control(action, total, settings.interval())
    }

    fn current_total(&self) -> (usize, Settings) {
        let snapshot = self.gallery.snapshot();
        let total = compose_slides(
            &snapshot.images,
            &snapshot.groups,
            &snapshot.settings,
            self.shuffle_seed,
        )
        .len();
        (total, snapshot.settings)
    }
}
