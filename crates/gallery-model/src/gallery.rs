use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::{Result, ensure};
use chrono::{DateTime, Utc};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::nullable;

const MAX_SCALE: f64 = 4.0;

/// Metadata for one uploaded photo, keyed by its filename in [`GalleryDocument`].
///
/// `width`/`height` are recorded after EXIF orientation has been applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageRecord {
    pub enabled: bool,
    pub title: String,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub uploaded_by: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub mat_color: Option<String>,
    pub mat_finish: Option<String>,
    pub bevel_width: Option<u32>,
    pub border_effect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropRect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phash: Option<String>,
}

impl Default for ImageRecord {
    fn default() -> Self {
        Self {
            enabled: true,
            title: String::new(),
            uploaded_at: None,
            uploaded_by: None,
            width: None,
            height: None,
            mat_color: None,
            mat_finish: None,
            bevel_width: None,
            border_effect: None,
            scale: None,
            crop: None,
            phash: None,
        }
    }
}

impl ImageRecord {
    pub fn effective_scale(&self) -> f64 {
        self.scale.unwrap_or(1.0)
    }

    pub fn apply(&mut self, patch: ImagePatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(color) = patch.mat_color {
            self.mat_color = color;
        }
        if let Some(finish) = patch.mat_finish {
            self.mat_finish = finish;
        }
        if let Some(bevel) = patch.bevel_width {
            self.bevel_width = bevel;
        }
        if let Some(effect) = patch.border_effect {
            self.border_effect = effect;
        }
        if let Some(scale) = patch.scale {
            self.scale = scale;
        }
        if let Some(crop) = patch.crop {
            self.crop = crop;
        }
    }
}

/// Crop window expressed as fractions of the oriented image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropRect {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("x", self.x),
            ("y", self.y),
            ("width", self.width),
            ("height", self.height),
        ] {
            ensure!(
                value.is_finite() && (0.0..=1.0).contains(&value),
                "crop.{name} must be between 0 and 1"
            );
        }
        ensure!(
            self.width > 0.0 && self.height > 0.0,
            "crop must have a non-zero area"
        );
        ensure!(
            self.x + self.width <= 1.0 + f64::EPSILON && self.y + self.height <= 1.0 + f64::EPSILON,
            "crop must stay inside the image"
        );
        Ok(())
    }
}

/// Partial update of an [`ImageRecord`]. `null` clears an override, an absent
/// field leaves it untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImagePatch {
    pub enabled: Option<bool>,
    pub title: Option<String>,
    #[serde(deserialize_with = "nullable")]
    pub mat_color: Option<Option<String>>,
    #[serde(deserialize_with = "nullable")]
    pub mat_finish: Option<Option<String>>,
    #[serde(deserialize_with = "nullable")]
    pub bevel_width: Option<Option<u32>>,
    #[serde(deserialize_with = "nullable")]
    pub border_effect: Option<Option<String>>,
    #[serde(deserialize_with = "nullable")]
    pub scale: Option<Option<f64>>,
    #[serde(deserialize_with = "nullable")]
    pub crop: Option<Option<CropRect>>,
}

impl ImagePatch {
    pub fn validate(&self) -> Result<()> {
        if let Some(Some(scale)) = self.scale {
            validate_scale(scale, "scale")?;
        }
        if let Some(Some(crop)) = &self.crop {
            crop.validate()?;
        }
        Ok(())
    }
}

fn validate_scale(scale: f64, label: &str) -> Result<()> {
    ensure!(
        scale.is_finite() && scale > 0.0 && scale <= MAX_SCALE,
        "{label} must be greater than 0 and at most {MAX_SCALE}"
    );
    Ok(())
}

/// Two or more images shown together as one slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub images: Vec<String>,
    #[serde(default)]
    pub mat_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mat_finish: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bevel_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_effect: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scales: BTreeMap<String, f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Group {
    pub const MIN_MEMBERS: usize = 2;

    pub fn new(
        images: Vec<String>,
        mat_color: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        validate_members(&images)?;
        Ok(Self {
            images,
            mat_color,
            mat_finish: None,
            bevel_width: None,
            border_effect: None,
            scales: BTreeMap::new(),
            created_at: Some(created_at),
        })
    }

    pub fn scale_for(&self, filename: &str) -> f64 {
        self.scales.get(filename).copied().unwrap_or(1.0)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.images.iter().any(|name| name == filename)
    }

    /// Validates the whole patch before touching the group.
    pub fn apply(&mut self, patch: GroupPatch) -> Result<()> {
        if let Some(images) = &patch.images {
            validate_members(images)?;
        }
        if let Some(scales) = &patch.scales {
            for (name, scale) in scales {
                validate_scale(*scale, &format!("scales.{name}"))?;
            }
        }
        if let Some(images) = patch.images {
            self.images = images;
        }
        if let Some(color) = patch.mat_color {
            self.mat_color = color;
        }
        if let Some(finish) = patch.mat_finish {
            self.mat_finish = finish;
        }
        if let Some(bevel) = patch.bevel_width {
            self.bevel_width = bevel;
        }
        if let Some(effect) = patch.border_effect {
            self.border_effect = effect;
        }
        if let Some(scales) = patch.scales {
            self.scales = scales;
        }
        Ok(())
    }
}

fn validate_members(images: &[String]) -> Result<()> {
    ensure!(
        images.len() >= Group::MIN_MEMBERS,
        "A group needs at least {} images",
        Group::MIN_MEMBERS
    );
    let unique: BTreeSet<&str> = images.iter().map(String::as_str).collect();
    ensure!(
        unique.len() == images.len(),
        "a group must not list the same image twice"
    );
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GroupPatch {
    pub images: Option<Vec<String>>,
    #[serde(deserialize_with = "nullable")]
    pub mat_color: Option<Option<String>>,
    #[serde(deserialize_with = "nullable")]
    pub mat_finish: Option<Option<String>>,
    #[serde(deserialize_with = "nullable")]
    pub bevel_width: Option<Option<u32>>,
    #[serde(deserialize_with = "nullable")]
    pub border_effect: Option<Option<String>>,
    pub scales: Option<BTreeMap<String, f64>>,
}

/// Groups keyed by id, kept in insertion order.
///
/// Serialized as a JSON object; key order is preserved in both directions so
/// the slide order of groups survives a reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupMap {
    entries: Vec<(String, Group)>,
}

impl GroupMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Group)> {
        self.entries.iter().map(|(id, group)| (id.as_str(), group))
    }

    pub fn get(&self, id: &str) -> Option<&Group> {
        self.entries
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, group)| group)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Group> {
        self.entries
            .iter_mut()
            .find(|(key, _)| key == id)
            .map(|(_, group)| group)
    }

    pub fn contains_key(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Replaces an existing group in place, otherwise appends.
    pub fn insert(&mut self, id: impl Into<String>, group: Group) -> Option<Group> {
        let id = id.into();
        match self.get_mut(&id) {
            Some(existing) => Some(std::mem::replace(existing, group)),
            None => {
                self.entries.push((id, group));
                None
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Group> {
        let pos = self.entries.iter().position(|(key, _)| key == id)?;
        Some(self.entries.remove(pos).1)
    }
}

impl FromIterator<(String, Group)> for GroupMap {
    fn from_iter<I: IntoIterator<Item = (String, Group)>>(iter: I) -> Self {
        let mut map = GroupMap::default();
        for (id, group) in iter {
            map.insert(id, group);
        }
        map
    }
}

impl Serialize for GroupMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, group) in &self.entries {
            map.serialize_entry(id, group)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for GroupMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(GroupMapVisitor)
    }
}

struct GroupMapVisitor;

impl<'de> Visitor<'de> for GroupMapVisitor {
    type Value = GroupMap;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of group ids to groups")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut map = GroupMap::default();
        while let Some((id, group)) = access.next_entry::<String, Group>()? {
            map.insert(id, group);
        }
        Ok(map)
    }
}

/// The persisted gallery: per-image metadata plus groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryDocument {
    pub images: BTreeMap<String, ImageRecord>,
    pub groups: GroupMap,
}

impl GalleryDocument {
    pub fn group_of(&self, filename: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|(_, group)| group.contains(filename))
            .map(|(id, _)| id)
    }

    /// Drops `filename` from every group and deletes groups left with fewer
    /// than two members. Returns the ids of the deleted groups.
    pub fn remove_from_groups(&mut self, filename: &str) -> Vec<String> {
        let mut emptied = Vec::new();
        for (id, group) in self.groups.entries.iter_mut() {
            if group.contains(filename) {
                group.images.retain(|name| name != filename);
                group.scales.remove(filename);
                if group.images.len() < Group::MIN_MEMBERS {
                    emptied.push(id.clone());
                }
            }
        }
        for id in &emptied {
            self.groups.remove(id);
        }
        emptied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(images: &[&str]) -> Group {
        Group::new(
            images.iter().map(|s| s.to_string()).collect(),
            None,
            Utc::now(),
        )
        .expect("valid group")
    }

    #[test]
    fn group_map_preserves_insertion_order_through_json() {
        let json = r#"{"groups": {"group_b": {"images": ["1.png", "2.png"]},
                                  "group_a": {"images": ["3.png", "4.png"]}}}"#;
        let doc: GalleryDocument = serde_json::from_str(json).expect("parse gallery");
        let ids: Vec<&str> = doc.groups.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["group_b", "group_a"]);

        let written = serde_json::to_string(&doc).expect("serialize");
        let b = written.find("group_b").expect("group_b present");
        let a = written.find("group_a").expect("group_a present");
        assert!(b < a, "serialized order changed: {written}");
    }

    #[test]
    fn image_record_defaults_to_enabled() {
        let record: ImageRecord = serde_json::from_str("{}").expect("parse record");
        assert!(record.enabled);
        assert!((record.effective_scale() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn image_patch_distinguishes_null_from_absent() {
        let mut record = ImageRecord {
            mat_color: Some("#fff".into()),
            mat_finish: Some("linen".into()),
            ..ImageRecord::default()
        };
        let patch: ImagePatch =
            serde_json::from_str(r#"{"mat_color": null, "enabled": false}"#).expect("parse");
        record.apply(patch);
        assert_eq!(record.mat_color, None);
        assert_eq!(record.mat_finish.as_deref(), Some("linen"));
        assert!(!record.enabled);
    }

    #[test]
    fn image_patch_rejects_bad_scale_and_crop() {
        let patch: ImagePatch = serde_json::from_str(r#"{"scale": 0}"#).expect("parse");
        assert!(patch.validate().is_err());
        let patch: ImagePatch = serde_json::from_str(
            r#"{"crop": {"x": 0.5, "y": 0.0, "width": 0.6, "height": 0.5}}"#,
        )
        .expect("parse");
        assert!(patch.validate().is_err());
        let patch: ImagePatch = serde_json::from_str(
            r#"{"scale": 1.5, "crop": {"x": 0.1, "y": 0.1, "width": 0.5, "height": 0.5}}"#,
        )
        .expect("parse");
        assert!(patch.validate().is_ok());
    }

    #[test]
    fn group_requires_two_distinct_members() {
        assert!(Group::new(vec!["a.png".into()], None, Utc::now()).is_err());
        assert!(Group::new(vec!["a.png".into(), "a.png".into()], None, Utc::now()).is_err());
        let mut g = group(&["a.png", "b.png"]);
        let patch = GroupPatch {
            images: Some(vec!["a.png".into()]),
            mat_color: Some(Some("#000".into())),
            ..GroupPatch::default()
        };
        assert!(g.apply(patch).is_err());
        assert_eq!(g.mat_color, None, "failed patch must not partially apply");
    }

    #[test]
    fn removing_member_cascades_to_small_groups() {
        let mut doc = GalleryDocument::default();
        doc.groups.insert("pair", group(&["a.png", "b.png"]));
        doc.groups.insert("trio", group(&["a.png", "c.png", "d.png"]));

        let deleted = doc.remove_from_groups("a.png");
        assert_eq!(deleted, vec!["pair".to_string()]);
        assert!(!doc.groups.contains_key("pair"));
        let trio = doc.groups.get("trio").expect("trio survives");
        assert_eq!(trio.images, vec!["c.png".to_string(), "d.png".to_string()]);
    }

    #[test]
    fn group_scale_defaults_to_one() {
        let mut g = group(&["a.png", "b.png"]);
        g.scales.insert("a.png".into(), 1.5);
        assert!((g.scale_for("a.png") - 1.5).abs() < f64::EPSILON);
        assert!((g.scale_for("b.png") - 1.0).abs() < f64::EPSILON);
    }
}
