//! Discovery of uploaded image files and their oriented dimensions.

use std::f64::consts::PI;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use image::imageops::FilterType;
use walkdir::{DirEntry, WalkDir};

use crate::error::Result;

pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Return `true` if `path` has an extension the slideshow accepts.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.iter().any(|e| *e == ext)
        })
}

/// Files directly inside `dir` with a supported extension, sorted by name.
///
/// A missing directory is treated as empty.
pub fn scan_uploads(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(dir)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry.map_err(|err| {
            err.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"))
        })?;
        let path = entry.path();
        if entry.file_type().is_file() && is_supported_image(path) {
            out.push(path.to_path_buf());
        }
    }
    Ok(out)
}

fn is_hidden(entry: &DirEntry) -> bool {
    // Never skip the root; tempfile roots can be dot-dirs.
    if entry.depth() == 0 {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .is_some_and(|n| n.starts_with('.'))
}

/// Width and height as the image should be displayed, after EXIF rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub orientation: u16,
}

/// Reads only the header for dimensions, then the EXIF orientation tag.
pub fn probe_dimensions(path: &Path) -> Result<Dimensions> {
    let (raw_w, raw_h) = image::image_dimensions(path)?;
    let orientation = read_exif_orientation(path).unwrap_or(1);
    let swap = matches!(orientation, 5..=8);
    let (width, height) = if swap { (raw_h, raw_w) } else { (raw_w, raw_h) };
    Ok(Dimensions {
        width,
        height,
        orientation,
    })
}

fn read_exif_orientation(path: &Path) -> Option<u16> {
    let f = fs::File::open(path).ok()?;
    let mut buf = BufReader::new(f);
    let reader = exif::Reader::new().read_from_container(&mut buf).ok()?;
    use exif::{In, Tag, Value};
    let field = reader.get_field(Tag::Orientation, In::PRIMARY)?;
    match &field.value {
        Value::Short(arr) if !arr.is_empty() => Some(arr[0]),
        Value::Long(arr) if !arr.is_empty() => u16::try_from(arr[0]).ok(),
        _ => Some(1),
    }
}

const HASH_SAMPLE: usize = 32;
const HASH_SIDE: usize = 8;

/// 64-bit DCT perceptual hash as 16 hex digits.
///
/// The image is reduced to a 32x32 grayscale grid; each bit of the hash
/// records whether one of the 8x8 lowest-frequency DCT coefficients lies
/// above their median. Visually similar images differ in few bits.
pub fn perceptual_hash(path: &Path) -> Result<String> {
    let img = image::open(path)?;
    Ok(dct_hash(&img))
}

pub fn dct_hash(img: &DynamicImage) -> String {
    let size = HASH_SAMPLE as u32;
    let gray = img.resize_exact(size, size, FilterType::Triangle).to_luma8();
    let pixels: Vec<f64> = gray.pixels().map(|p| f64::from(p.0[0])).collect();

    let basis: Vec<f64> = (0..HASH_SIDE)
        .flat_map(|k| {
            (0..HASH_SAMPLE).map(move |n| {
                (PI * k as f64 * (2 * n + 1) as f64 / (2 * HASH_SAMPLE) as f64).cos()
            })
        })
        .collect();
    let coeff = |k: usize, n: usize| basis[k * HASH_SAMPLE + n];

    // Row transform, keeping only the low frequencies.
    let mut rows = vec![0.0; HASH_SAMPLE * HASH_SIDE];
    for y in 0..HASH_SAMPLE {
        for k in 0..HASH_SIDE {
            rows[y * HASH_SIDE + k] = (0..HASH_SAMPLE)
                .map(|x| pixels[y * HASH_SAMPLE + x] * coeff(k, x))
                .sum();
        }
    }
    let mut low = [0.0f64; HASH_SIDE * HASH_SIDE];
    for ky in 0..HASH_SIDE {
        for kx in 0..HASH_SIDE {
            low[ky * HASH_SIDE + kx] = (0..HASH_SAMPLE)
                .map(|y| rows[y * HASH_SIDE + kx] * coeff(ky, y))
                .sum();
        }
    }

    let mut sorted = low;
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let median = (sorted[mid - 1] + sorted[mid]) / 2.0;
    let bits = low
        .iter()
        .fold(0u64, |acc, value| (acc << 1) | u64::from(*value > median));
    format!("{bits:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(is_supported_image(Path::new("a.JPG")));
        assert!(is_supported_image(Path::new("b.webp")));
        assert!(!is_supported_image(Path::new("notes.txt")));
        assert!(!is_supported_image(Path::new("noext")));
    }

    /// A smooth non-separable pattern defined on normalised coordinates, so
    /// every resolution renders the same picture.
    fn landscape(width: u32, height: u32, phase: f64) -> DynamicImage {
        DynamicImage::ImageLuma8(image::GrayImage::from_fn(width, height, |x, y| {
            let u = f64::from(x) / f64::from(width);
            let v = f64::from(y) / f64::from(height);
            let tau = 2.0 * PI;
            let value = 128.0
                + 50.0 * (tau * (1.3 * u + phase)).cos()
                + 40.0 * (tau * (0.7 * v + 1.1 * u + 2.0 * phase)).cos()
                + 30.0 * (tau * (2.1 * u * v - phase)).sin();
            image::Luma([value.clamp(0.0, 255.0) as u8])
        }))
    }

    #[test]
    fn hash_is_stable_across_resizes() {
        let small = dct_hash(&landscape(128, 128, 0.1));
        let large = dct_hash(&landscape(512, 512, 0.1));
        assert_eq!(small.len(), 16);
        let distance = gallery_model::hamming_distance(&small, &large).expect("comparable");
        assert!(distance <= 8, "distance {distance}");
    }

    #[test]
    fn hash_separates_different_images() {
        let a = dct_hash(&landscape(128, 128, 0.1));
        let b = dct_hash(&landscape(128, 128, 0.45));
        let distance = gallery_model::hamming_distance(&a, &b).expect("comparable");
        assert!(distance > 10, "distance {distance}");
    }

    #[test]
    fn missing_directory_scans_empty() {
        let found = scan_uploads(Path::new("/definitely/not/here/slideshow")).expect("scan");
        assert!(found.is_empty());
    }
}
