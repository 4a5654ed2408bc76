//! Shared data model for the slideshow: gallery metadata, display settings and
//! TV power schedules, in the shape they are stored on disk and served as JSON.

mod gallery;
mod settings;
mod tv;

pub use gallery::{
    CropRect, GalleryDocument, Group, GroupMap, GroupPatch, ImagePatch, ImageRecord,
};
pub use settings::{FitMode, Settings, SettingsPatch};
pub use tv::{TvPower, TvSchedule, TvScheduleSet};

use serde::{Deserialize, Deserializer};

/// Number of differing bits between two hex-encoded perceptual hashes.
///
/// Returns `None` when either hash is malformed or the lengths differ, since
/// hashes of different widths are not comparable.
pub fn hamming_distance(a: &str, b: &str) -> Option<u32> {
    let a = a.trim();
    let b = b.trim();
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    a.chars().zip(b.chars()).try_fold(0u32, |acc, (x, y)| {
        let x = x.to_digit(16)?;
        let y = y.to_digit(16)?;
        Some(acc + (x ^ y).count_ones())
    })
}

/// Distinguishes an explicit `null` (clear the override) from an absent field.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
