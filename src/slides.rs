//! Turns per-image metadata and groups into the ordered list of slides a
//! display walks through.
//!
//! Composition is a pure function of the gallery snapshot: group slides come
//! first in stored group order, then ungrouped enabled images in filename
//! order. `image_order` and `shuffle` from [`Settings`] are applied last.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use gallery_model::{CropRect, Group, GroupMap, ImageRecord, Settings};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;

/// One image as a display renders it, overrides already resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlideImage {
    pub filename: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub mat_color: Option<String>,
    pub mat_finish: Option<String>,
    pub bevel_width: Option<u32>,
    pub border_effect: Option<String>,
    pub scale: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropRect>,
}

impl SlideImage {
    fn new(filename: &str, record: &ImageRecord, scale: f64) -> Self {
        Self {
            filename: filename.to_string(),
            width: record.width,
            height: record.height,
            mat_color: record.mat_color.clone(),
            mat_finish: record.mat_finish.clone(),
            bevel_width: record.bevel_width,
            border_effect: record.border_effect.clone(),
            scale,
            crop: record.crop,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Slide {
    Single {
        image: SlideImage,
        mat_color: Option<String>,
    },
    Group {
        group_id: String,
        images: Vec<SlideImage>,
        mat_color: Option<String>,
        mat_finish: Option<String>,
        bevel_width: Option<u32>,
        border_effect: Option<String>,
    },
}

impl Slide {
    pub fn filenames(&self) -> Vec<&str> {
        match self {
            Slide::Single { image, .. } => vec![image.filename.as_str()],
            Slide::Group { images, .. } => images.iter().map(|i| i.filename.as_str()).collect(),
        }
    }

    pub fn group_id(&self) -> Option<&str> {
        match self {
            Slide::Single { .. } => None,
            Slide::Group { group_id, .. } => Some(group_id),
        }
    }

    fn group(id: &str, group: &Group, images: Vec<SlideImage>) -> Self {
        Slide::Group {
            group_id: id.to_string(),
            images,
            mat_color: group.mat_color.clone(),
            mat_finish: group.mat_finish.clone(),
            bevel_width: group.bevel_width,
            border_effect: group.border_effect.clone(),
        }
    }
}

/// Builds the slide list for the current gallery.
///
/// A group slide is emitted only while every member is enabled. While any
/// member is disabled the group is suppressed and its enabled members are not
/// shown as singles either; they reappear with the group once it is complete
/// again. A stored group with fewer than two members is not a group at all
/// and its members render as singles.
pub fn compose_slides(
    images: &BTreeMap<String, ImageRecord>,
    groups: &GroupMap,
    settings: &Settings,
    shuffle_seed: u64,
) -> Vec<Slide> {
    let enabled: BTreeMap<&str, &ImageRecord> = images
        .iter()
        .filter(|(_, record)| record.enabled)
        .map(|(name, record)| (name.as_str(), record))
        .collect();

    let renderable = || {
        groups
            .iter()
            .filter(|(_, group)| group.images.len() >= Group::MIN_MEMBERS)
    };
    let grouped: BTreeSet<&str> = renderable()
        .flat_map(|(_, group)| group.images.iter().map(String::as_str))
        .collect();

    let mut slides = Vec::with_capacity(enabled.len());
    for (id, group) in renderable() {
        let members: Option<Vec<SlideImage>> = group
            .images
            .iter()
            .map(|name| {
                enabled
                    .get(name.as_str())
                    .map(|record| SlideImage::new(name, record, group.scale_for(name)))
            })
            .collect();
        if let Some(members) = members {
            slides.push(Slide::group(id, group, members));
        }
    }

    for (name, record) in &enabled {
        if grouped.contains(name) {
            continue;
        }
        slides.push(Slide::Single {
            image: SlideImage::new(name, record, record.effective_scale()),
            mat_color: record.mat_color.clone(),
        });
    }

    apply_image_order(&mut slides, &settings.image_order);
    if settings.shuffle {
        let mut rng = StdRng::seed_from_u64(shuffle_seed);
        slides.shuffle(&mut rng);
    }
    slides
}

/// Stable sort by the earliest position any member holds in `order`; slides
/// with no listed member keep their relative order after the listed ones.
fn apply_image_order(slides: &mut [Slide], order: &[String]) {
    if order.is_empty() {
        return;
    }
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(order.len());
    for (pos, name) in order.iter().enumerate() {
        positions.entry(name.as_str()).or_insert(pos);
    }
    slides.sort_by_cached_key(|slide| {
        slide
            .filenames()
            .into_iter()
            .filter_map(|name| positions.get(name).copied())
            .min()
            .unwrap_or(usize::MAX)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slide_single(name: &str) -> Slide {
        Slide::Single {
            image: SlideImage::new(name, &ImageRecord::default(), 1.0),
            mat_color: None,
        }
    }

    #[test]
    fn image_order_ranks_listed_slides_first() {
        let mut slides = vec![
            slide_single("a.png"),
            slide_single("b.png"),
            slide_single("c.png"),
            slide_single("d.png"),
        ];
        apply_image_order(&mut slides, &["c.png".into(), "a.png".into()]);
        let names: Vec<&str> = slides.iter().flat_map(|s| s.filenames()).collect();
        assert_eq!(names, vec!["c.png", "a.png", "b.png", "d.png"]);
    }

    #[test]
    fn slide_serializes_with_type_tag() {
        let json = serde_json::to_value(slide_single("a.png")).expect("serialize");
        assert_eq!(json["type"], "single");
        assert_eq!(json["image"]["filename"], "a.png");
        assert_eq!(json["image"]["scale"], 1.0);
    }
}
