//! Slideshow server: composes slides from the photo gallery and keeps every
//! connected display on the same slide.

pub mod config;
pub mod display;
pub mod error;
pub mod gallery;
pub mod library;
pub mod logging;
pub mod slides;
pub mod slideshow;
pub mod web;

pub use display::{ControlAction, DisplayController, DisplayStatus};
pub use error::{Error, Result};
pub use slides::{Slide, SlideImage, compose_slides};
pub use slideshow::{Slideshow, SlidesView};
