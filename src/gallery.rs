//! Gallery, settings and TV schedule store backed by JSON files.
//!
//! All state lives in memory behind one lock and each mutation rewrites the
//! affected document before the lock is released, so readers always get a
//! consistent snapshot and two writers never interleave.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use gallery_model::{
    GalleryDocument, Group, GroupMap, GroupPatch, ImagePatch, ImageRecord, Settings,
    SettingsPatch, TvScheduleSet, hamming_distance,
};
use parking_lot::RwLock;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::library;

const GALLERY_FILE: &str = "gallery.json";
const SETTINGS_FILE: &str = "settings.json";
const SCHEDULES_FILE: &str = "tv_schedules.json";

pub const DEFAULT_DUPLICATE_THRESHOLD: u32 = 10;

/// Consistent read-only view of the gallery taken under one lock.
#[derive(Debug, Clone)]
pub struct GallerySnapshot {
    pub images: BTreeMap<String, ImageRecord>,
    pub groups: GroupMap,
    pub settings: Settings,
}

/// One row of the management listing.
#[derive(Debug, Clone, Serialize)]
pub struct GalleryEntry {
    pub filename: String,
    pub group_id: Option<String>,
    #[serde(flatten)]
    pub record: ImageRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct GalleryListing {
    pub images: Vec<GalleryEntry>,
    pub groups: GroupMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RescanReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateMatch {
    pub filename: String,
    pub distance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum BulkAction {
    Enable,
    Disable,
    Delete,
}

impl FromStr for BulkAction {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidArgument(format!("Invalid action '{other}'"))),
        }
    }
}

impl TryFrom<String> for BulkAction {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

#[derive(Debug)]
struct StorePaths {
    gallery: PathBuf,
    settings: PathBuf,
    schedules: PathBuf,
    uploads: PathBuf,
}

#[derive(Debug)]
struct StoreState {
    doc: GalleryDocument,
    settings: Settings,
    schedules: TvScheduleSet,
}

#[derive(Debug)]
pub struct Gallery {
    paths: StorePaths,
    state: RwLock<StoreState>,
}

impl Gallery {
    /// Loads the documents under `data_dir`, creating both directories if
    /// needed. Missing documents start empty.
    pub fn open(data_dir: &Path, uploads_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        fs::create_dir_all(uploads_dir)?;
        let paths = StorePaths {
            gallery: data_dir.join(GALLERY_FILE),
            settings: data_dir.join(SETTINGS_FILE),
            schedules: data_dir.join(SCHEDULES_FILE),
            uploads: uploads_dir.to_path_buf(),
        };
        let doc: GalleryDocument = read_json_optional(&paths.gallery)?.unwrap_or_default();
        let settings: Settings = read_json_optional(&paths.settings)?.unwrap_or_default();
        if let Err(err) = settings.validate() {
            warn!(error = %err, "stored settings are invalid; falling back where needed");
        }
        let schedules: TvScheduleSet = read_json_optional(&paths.schedules)?.unwrap_or_default();
        info!(
            images = doc.images.len(),
            groups = doc.groups.len(),
            schedules = schedules.schedules.len(),
            "gallery loaded"
        );
        Ok(Self {
            paths,
            state: RwLock::new(StoreState {
                doc,
                settings,
                schedules,
            }),
        })
    }

    pub fn snapshot(&self) -> GallerySnapshot {
        let state = self.state.read();
        GallerySnapshot {
            images: state.doc.images.clone(),
            groups: state.doc.groups.clone(),
            settings: state.settings.clone(),
        }
    }

    pub fn listing(&self) -> GalleryListing {
        let state = self.state.read();
        let images = state
            .doc
            .images
            .iter()
            .map(|(name, record)| GalleryEntry {
                filename: name.clone(),
                group_id: state.doc.group_of(name).map(str::to_string),
                record: record.clone(),
            })
            .collect();
        GalleryListing {
            images,
            groups: state.doc.groups.clone(),
        }
    }

    /// Applies `change` to a copy of the gallery document and swaps the copy
    /// in only once it is on disk. A failed write leaves memory untouched.
    fn commit<T>(&self, change: impl FnOnce(&mut GalleryDocument) -> Result<T>) -> Result<T> {
        let mut state = self.state.write();
        let mut next = state.doc.clone();
        let out = change(&mut next)?;
        if next != state.doc {
            write_json(&self.paths.gallery, &next)?;
            state.doc = next;
        }
        Ok(out)
    }

    /// Reconciles metadata with the uploads directory: new files are
    /// registered with their oriented dimensions and perceptual hash, records
    /// whose file is gone are dropped along with their group memberships.
    pub fn rescan(&self) -> Result<RescanReport> {
        let on_disk = library::scan_uploads(&self.paths.uploads)?;
        let untracked: Vec<PathBuf> = {
            let state = self.state.read();
            on_disk
                .iter()
                .filter(|path| {
                    file_name(path).is_some_and(|name| !state.doc.images.contains_key(name))
                })
                .cloned()
                .collect()
        };
        let described: Vec<(String, ImageRecord)> = untracked
            .iter()
            .filter_map(|path| Some((file_name(path)?.to_string(), describe_upload(path))))
            .collect();
        let present: Vec<&str> = on_disk.iter().filter_map(|p| file_name(p)).collect();

        let report = self.commit(|doc| {
            let mut report = RescanReport::default();
            for (name, record) in described {
                if !doc.images.contains_key(&name) {
                    doc.images.insert(name.clone(), record);
                    report.added.push(name);
                }
            }
            let vanished: Vec<String> = doc
                .images
                .keys()
                .filter(|name| !present.contains(&name.as_str()))
                .cloned()
                .collect();
            for name in vanished {
                doc.images.remove(&name);
                let dropped = doc.remove_from_groups(&name);
                if !dropped.is_empty() {
                    info!(file = %name, groups = ?dropped, "deleted groups left with too few images");
                }
                report.removed.push(name);
            }
            Ok(report)
        })?;
        if !report.added.is_empty() || !report.removed.is_empty() {
            info!(
                added = report.added.len(),
                removed = report.removed.len(),
                "uploads rescanned"
            );
        }
        Ok(report)
    }

    /// Computes the perceptual hash of every tracked image that lacks one.
    /// Images that cannot be decoded are counted as failed and left alone.
    pub fn backfill_hashes(&self) -> Result<BackfillReport> {
        let missing: Vec<String> = self
            .state
            .read()
            .doc
            .images
            .iter()
            .filter(|(_, record)| record.phash.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        let mut hashes = Vec::with_capacity(missing.len());
        let mut failed = 0;
        for name in missing {
            let path = self.upload_path_unchecked(&name)?;
            match library::perceptual_hash(&path) {
                Ok(hash) => hashes.push((name, hash)),
                Err(err) => {
                    warn!(file = %name, error = %err, "could not hash image");
                    failed += 1;
                }
            }
        }
        let updated = self.commit(|doc| {
            let mut updated = 0;
            for (name, hash) in hashes {
                match doc.images.get_mut(&name) {
                    Some(record) if record.phash.is_none() => {
                        record.phash = Some(hash);
                        updated += 1;
                    }
                    _ => {}
                }
            }
            Ok(updated)
        })?;
        info!(updated, failed, "perceptual hashes backfilled");
        Ok(BackfillReport { updated, failed })
    }

    pub fn update_image(&self, filename: &str, patch: ImagePatch) -> Result<ImageRecord> {
        patch.validate().map_err(Error::invalid)?;
        let updated = self.commit(|doc| {
            let record = doc
                .images
                .get_mut(filename)
                .ok_or_else(|| Error::NotFound(format!("image {filename}")))?;
            record.apply(patch);
            Ok(record.clone())
        })?;
        debug!(file = filename, enabled = updated.enabled, "image metadata updated");
        Ok(updated)
    }

    /// Deletes the metadata and then the file; groups left with fewer than
    /// two members are deleted too.
    pub fn delete_image(&self, filename: &str) -> Result<()> {
        validate_filename(filename)?;
        let dropped = self.commit(|doc| remove_record(doc, filename))?;
        info!(file = filename, groups_deleted = ?dropped, "image deleted");
        self.remove_upload(filename)
    }

    fn remove_upload(&self, filename: &str) -> Result<()> {
        let path = self.upload_path_unchecked(filename)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                warn!(file = %path.display(), error = %err, "metadata removed but file could not be deleted");
                Err(err.into())
            }
        }
    }

    /// Applies `action` to every known filename in the selection and returns
    /// how many images it touched.
    pub fn bulk(&self, action: BulkAction, filenames: &[String]) -> Result<usize> {
        if filenames.is_empty() {
            return Err(Error::InvalidArgument("No images selected".into()));
        }
        let (touched, removed) = self.commit(|doc| {
            let mut touched = 0;
            let mut removed = Vec::new();
            for name in filenames {
                match action {
                    BulkAction::Enable | BulkAction::Disable => {
                        if let Some(record) = doc.images.get_mut(name) {
                            record.enabled = action == BulkAction::Enable;
                            touched += 1;
                        }
                    }
                    BulkAction::Delete => match remove_record(doc, name) {
                        Ok(_) => {
                            touched += 1;
                            removed.push(name.as_str());
                        }
                        Err(Error::NotFound(_)) => {}
                        Err(err) => return Err(err),
                    },
                }
            }
            Ok((touched, removed))
        })?;
        info!(?action, requested = filenames.len(), touched, "bulk action applied");
        for name in removed {
            self.remove_upload(name)?;
        }
        Ok(touched)
    }

    pub fn create_group(&self, images: Vec<String>, mat_color: Option<String>) -> Result<String> {
        let group = Group::new(images, mat_color, Utc::now()).map_err(Error::invalid)?;
        let id = self.commit(|doc| {
            check_members(doc, &group.images, None)?;
            let id = loop {
                let candidate = format!("group_{:08x}", rand::rng().random::<u32>());
                if !doc.groups.contains_key(&candidate) {
                    break candidate;
                }
            };
            doc.groups.insert(id.clone(), group);
            Ok(id)
        })?;
        info!(group = %id, "group created");
        Ok(id)
    }

    pub fn update_group(&self, id: &str, patch: GroupPatch) -> Result<Group> {
        let updated = self.commit(|doc| {
            if !doc.groups.contains_key(id) {
                return Err(Error::NotFound(format!("group {id}")));
            }
            if let Some(images) = &patch.images {
                check_members(doc, images, Some(id))?;
            }
            let group = doc
                .groups
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("group {id}")))?;
            group.apply(patch).map_err(Error::invalid)?;
            Ok(group.clone())
        })?;
        debug!(group = id, members = updated.images.len(), "group updated");
        Ok(updated)
    }

    /// Removes the group; its images go back to being shown as singles.
    pub fn delete_group(&self, id: &str) -> Result<()> {
        self.commit(|doc| {
            doc.groups
                .remove(id)
                .ok_or_else(|| Error::NotFound(format!("group {id}")))
        })?;
        info!(group = id, "group deleted");
        Ok(())
    }

    pub fn settings(&self) -> Settings {
        self.state.read().settings.clone()
    }

    pub fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        let mut state = self.state.write();
        let mut next = state.settings.clone();
        next.apply(patch);
        next.validate().map_err(Error::invalid)?;
        write_json(&self.paths.settings, &next)?;
        state.settings = next.clone();
        info!(
            interval_secs = next.slideshow_interval,
            shuffle = next.shuffle,
            "settings updated"
        );
        Ok(next)
    }

    pub fn reorder(&self, order: Vec<String>) -> Result<()> {
        self.update_settings(SettingsPatch {
            image_order: Some(order),
            ..SettingsPatch::default()
        })
        .map(|_| ())
    }

    pub fn tv_schedules(&self) -> TvScheduleSet {
        self.state.read().schedules.clone()
    }

    pub fn replace_tv_schedules(&self, mut schedules: TvScheduleSet) -> Result<TvScheduleSet> {
        schedules.validate().map_err(Error::invalid)?;
        schedules.assign_ids(|| format!("sched_{:08x}", rand::rng().random::<u32>()));
        let mut state = self.state.write();
        write_json(&self.paths.schedules, &schedules)?;
        state.schedules = schedules.clone();
        info!(count = schedules.schedules.len(), "tv schedules saved");
        Ok(schedules)
    }

    /// Images whose stored perceptual hash lies within `threshold` bits of
    /// `hash`, closest first.
    pub fn near_duplicates(&self, hash: &str, threshold: u32) -> Result<Vec<DuplicateMatch>> {
        let hash = hash.trim();
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidArgument(
                "hash must be a non-empty hex string".into(),
            ));
        }
        let state = self.state.read();
        let mut matches: Vec<DuplicateMatch> = state
            .doc
            .images
            .iter()
            .filter_map(|(name, record)| {
                let distance = hamming_distance(hash, record.phash.as_deref()?)?;
                (distance <= threshold).then(|| DuplicateMatch {
                    filename: name.clone(),
                    distance,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            a.distance
                .cmp(&b.distance)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(matches)
    }

    /// Path of a tracked upload, or `None` for anything the gallery does not know.
    pub fn upload_path(&self, filename: &str) -> Option<PathBuf> {
        let path = self.upload_path_unchecked(filename).ok()?;
        self.state
            .read()
            .doc
            .images
            .contains_key(filename)
            .then_some(path)
    }

    fn upload_path_unchecked(&self, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.paths.uploads.join(filename))
    }
}

/// Drops one record and its group memberships, returning the ids of groups
/// that were dissolved.
fn remove_record(doc: &mut GalleryDocument, filename: &str) -> Result<Vec<String>> {
    if doc.images.remove(filename).is_none() {
        return Err(Error::NotFound(format!("image {filename}")));
    }
    Ok(doc.remove_from_groups(filename))
}

fn describe_upload(path: &Path) -> ImageRecord {
    let mut record = ImageRecord {
        uploaded_at: modified_at(path),
        ..ImageRecord::default()
    };
    match library::probe_dimensions(path) {
        Ok(dims) => {
            record.width = Some(dims.width);
            record.height = Some(dims.height);
        }
        Err(err) => warn!(file = %path.display(), error = %err, "could not read image dimensions"),
    }
    match library::perceptual_hash(path) {
        Ok(hash) => record.phash = Some(hash),
        Err(err) => warn!(file = %path.display(), error = %err, "could not hash image"),
    }
    record
}

/// Members must be known images and may not already belong to another group.
fn check_members(doc: &GalleryDocument, images: &[String], editing: Option<&str>) -> Result<()> {
    for name in images {
        if !doc.images.contains_key(name) {
            return Err(Error::NotFound(format!("image {name}")));
        }
        match doc.group_of(name) {
            Some(owner) if Some(owner) != editing => {
                return Err(Error::InvalidArgument(format!(
                    "{name} already belongs to {owner}"
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_filename(filename: &str) -> Result<()> {
    let ok = !filename.is_empty()
        && filename != "."
        && filename != ".."
        && !filename.starts_with('.')
        && !filename.contains(['/', '\\', '\0']);
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "'{filename}' is not a valid image name"
        )))
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Writes through a sibling temp file and renames it into place, so a crash
/// mid-write leaves the previous document intact.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(value) => value,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_slice::<T>(&data)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_with_path_parts_are_rejected() {
        assert!(validate_filename("ab12cd34_photo.jpg").is_ok());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("a/b.png").is_err());
        assert!(validate_filename(".hidden.png").is_err());
        assert!(validate_filename("").is_err());
    }

    #[test]
    fn bulk_action_parses_from_json() {
        let action: BulkAction = serde_json::from_str(r#""disable""#).expect("parse");
        assert_eq!(action, BulkAction::Disable);
        assert!(serde_json::from_str::<BulkAction>(r#""explode""#).is_err());
    }
}
