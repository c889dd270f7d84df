use std::fmt::Display;

use image::imageops::FilterType;
use image::DynamicImage;
use image_hasher::{HashAlg, Hasher, HasherConfig};
use serde::Serialize;

use crate::{Error, Result};

/// Supported frame comparison algorithms.
#[derive(clap::ValueEnum, Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareType {
    /// DCT-based perceptual hash. Good general choice.
    Phash,
    /// Difference (gradient) hash. Fast, good for video.
    Dhash,
    /// Average hash. Fastest, but less robust.
    Ahash,
    /// Haar wavelet hash. Most robust, but slowest.
    Whash,
    /// Sum of absolute differences over a small grayscale digest.
    Sad,
}

impl CompareType {
    pub fn name(&self) -> &'static str {
        match self {
            CompareType::Phash => "phash",
            CompareType::Dhash => "dhash",
            CompareType::Ahash => "ahash",
            CompareType::Whash => "whash",
            CompareType::Sad => "sad",
        }
    }

    /// Returns true if this type produces bit-vector fingerprints.
    pub fn is_hash(&self) -> bool {
        !matches!(self, CompareType::Sad)
    }
}

impl Display for CompareType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-size representation of a single frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Fingerprint {
    /// Packed bit vector produced by a perceptual hash.
    Hash(Box<[u8]>),
    /// 8-bit grayscale pixel digest.
    Pixels(Box<[u8]>),
}

impl Fingerprint {
    fn describe(&self) -> String {
        match self {
            Fingerprint::Hash(bits) => format!("hash({} bits)", bits.len() * 8),
            Fingerprint::Pixels(pixels) => format!("pixels({} entries)", pixels.len()),
        }
    }
}

/// Non-negative dissimilarity between two fingerprints of the same kind.
///
/// Implementations must be symmetric and return zero for identical inputs.
pub trait Distance {
    fn distance(&self, other: &Self) -> Result<u64>;
}

impl Distance for Fingerprint {
    fn distance(&self, other: &Self) -> Result<u64> {
        match (self, other) {
            // Hamming distance.
            (Fingerprint::Hash(a), Fingerprint::Hash(b)) if a.len() == b.len() => Ok(a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| u64::from((x ^ y).count_ones()))
                .sum()),
            // Sum of absolute differences.
            (Fingerprint::Pixels(a), Fingerprint::Pixels(b)) if a.len() == b.len() => Ok(a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| u64::from(x.abs_diff(*y)))
                .sum()),
            _ => Err(Error::IncompatibleFingerprint {
                left: self.describe(),
                right: other.describe(),
            }),
        }
    }
}

/// Fingerprint kind and size parameter for a run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FingerprintConfig {
    pub compare_type: CompareType,
    pub hash_size: u32,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            compare_type: super::DEFAULT_COMPARE_TYPE,
            hash_size: super::DEFAULT_HASH_SIZE,
        }
    }
}

/// Computes [Fingerprint]s for decoded frames.
///
/// Build once per extraction and share across worker threads.
pub struct Fingerprinter {
    config: FingerprintConfig,
    hasher: Option<Hasher>,
}

impl Fingerprinter {
    pub fn new(config: FingerprintConfig) -> Result<Self> {
        let FingerprintConfig {
            compare_type,
            hash_size,
        } = config;

        let invalid = || Error::InvalidHashSize {
            size: hash_size,
            compare_type,
        };
        if compare_type.is_hash() && hash_size < 2 {
            return Err(invalid());
        }
        if compare_type == CompareType::Whash && !hash_size.is_power_of_two() {
            return Err(invalid());
        }

        let hasher = match compare_type {
            CompareType::Phash => Some(
                HasherConfig::new()
                    .hash_alg(HashAlg::Mean)
                    .preproc_dct()
                    .hash_size(hash_size, hash_size)
                    .to_hasher(),
            ),
            CompareType::Dhash => Some(
                HasherConfig::new()
                    .hash_alg(HashAlg::Gradient)
                    .hash_size(hash_size, hash_size)
                    .to_hasher(),
            ),
            CompareType::Ahash => Some(
                HasherConfig::new()
                    .hash_alg(HashAlg::Mean)
                    .hash_size(hash_size, hash_size)
                    .to_hasher(),
            ),
            CompareType::Whash | CompareType::Sad => None,
        };

        Ok(Self { config, hasher })
    }

    pub fn fingerprint(&self, frame: &DynamicImage) -> Fingerprint {
        if let Some(hasher) = &self.hasher {
            return Fingerprint::Hash(hasher.hash_image(frame).as_bytes().into());
        }
        match self.config.compare_type {
            CompareType::Whash => wavelet_hash(frame, self.config.hash_size),
            _ => pixel_digest(frame),
        }
    }
}

// Resizes the frame to a small grayscale square and returns the raw pixels.
fn pixel_digest(frame: &DynamicImage) -> Fingerprint {
    let size = super::SAD_DIGEST_SIZE;
    let gray = frame
        .resize_exact(size, size, FilterType::Lanczos3)
        .into_luma8();
    Fingerprint::Pixels(gray.into_raw().into_boxed_slice())
}

// Haar wavelet hash.
//
// The frame is resized to the largest power-of-two square that fits, then the LL band is
// taken repeatedly until it is `hash_size` wide. Each bit is set if its coefficient is above
// the median.
fn wavelet_hash(frame: &DynamicImage, hash_size: u32) -> Fingerprint {
    let min_dim = frame.width().min(frame.height()).max(1);
    let image_scale = (1u32 << (31 - min_dim.leading_zeros())).max(hash_size);
    let gray = frame
        .resize_exact(image_scale, image_scale, FilterType::Lanczos3)
        .into_luma8();

    let mut band: Vec<f32> = gray.pixels().map(|p| f32::from(p.0[0]) / 255.0).collect();
    let mut size = image_scale as usize;
    while size > hash_size as usize {
        band = haar_approximation(&band, size);
        size /= 2;
    }

    let median = median(&band);
    Fingerprint::Hash(pack_bits(band.iter().map(|c| *c > median)))
}

// One level of the 2D Haar transform, keeping only the approximation coefficients.
fn haar_approximation(band: &[f32], size: usize) -> Vec<f32> {
    let half = size / 2;
    let mut out = Vec::with_capacity(half * half);
    for y in 0..half {
        for x in 0..half {
            let i = 2 * y * size + 2 * x;
            out.push((band[i] + band[i + 1] + band[i + size] + band[i + size + 1]) / 2.0);
        }
    }
    out
}

fn median(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.is_empty() {
        0.0
    } else if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

// Packs bits MSB-first into bytes. Trailing bits of the last byte are zero.
fn pack_bits(bits: impl Iterator<Item = bool>) -> Box<[u8]> {
    let mut bytes = Vec::new();
    for (i, bit) in bits.enumerate() {
        if i % 8 == 0 {
            bytes.push(0u8);
        }
        if bit {
            let last = bytes.len() - 1;
            bytes[last] |= 0x80 >> (i % 8);
        }
    }
    bytes.into_boxed_slice()
}

#[cfg(test)]
mod test {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid_image(v: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(64, 48, |_, _| Rgb([v, v, v])))
    }

    fn gradient_image(reversed: bool) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(64, 48, |x, y| {
            let x = if reversed { 63 - x } else { x };
            let v = (x * 4) as u8;
            Rgb([v, v, (y * 5) as u8])
        }))
    }

    fn fingerprinter(compare_type: CompareType, hash_size: u32) -> Fingerprinter {
        Fingerprinter::new(FingerprintConfig {
            compare_type,
            hash_size,
        })
        .unwrap()
    }

    #[test]
    fn test_hash_distance_counts_differing_bits() {
        let a = Fingerprint::Hash(vec![0b1010_0000, 0xFF].into_boxed_slice());
        let b = Fingerprint::Hash(vec![0b0110_0000, 0x0F].into_boxed_slice());
        assert_eq!(a.distance(&b).unwrap(), 6);
    }

    #[test]
    fn test_pixel_distance_sums_absolute_differences() {
        let a = Fingerprint::Pixels(vec![0, 10, 255].into_boxed_slice());
        let b = Fingerprint::Pixels(vec![5, 4, 0].into_boxed_slice());
        assert_eq!(a.distance(&b).unwrap(), 5 + 6 + 255);
    }

    #[test]
    fn test_distance_symmetry_and_identity() {
        let pairs = [
            (
                Fingerprint::Hash(vec![0x12, 0x34].into_boxed_slice()),
                Fingerprint::Hash(vec![0xF0, 0x0F].into_boxed_slice()),
            ),
            (
                Fingerprint::Pixels(vec![1, 200, 30].into_boxed_slice()),
                Fingerprint::Pixels(vec![90, 2, 30].into_boxed_slice()),
            ),
        ];
        for (a, b) in &pairs {
            assert_eq!(a.distance(b).unwrap(), b.distance(a).unwrap());
            assert_eq!(a.distance(a).unwrap(), 0);
            assert_eq!(b.distance(b).unwrap(), 0);
        }
    }

    #[test]
    fn test_incompatible_fingerprints() {
        let hash = Fingerprint::Hash(vec![0; 4].into_boxed_slice());
        let short_hash = Fingerprint::Hash(vec![0; 2].into_boxed_slice());
        let pixels = Fingerprint::Pixels(vec![0; 4].into_boxed_slice());

        assert!(matches!(
            hash.distance(&pixels),
            Err(Error::IncompatibleFingerprint { .. })
        ));
        let err = hash.distance(&short_hash).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"incompatible fingerprints: hash(32 bits) vs hash(16 bits)");
    }

    #[test]
    fn test_pack_bits() {
        let bits = [true, false, false, false, false, false, false, true, true];
        assert_eq!(&*pack_bits(bits.into_iter()), &[0x81, 0x80]);
    }

    #[test]
    fn test_hash_sizes() {
        let img = gradient_image(false);
        for compare_type in [CompareType::Phash, CompareType::Dhash, CompareType::Ahash] {
            let f = fingerprinter(compare_type, 8).fingerprint(&img);
            match f {
                Fingerprint::Hash(bits) => assert_eq!(bits.len(), 8, "{}", compare_type),
                _ => panic!("expected a hash for {}", compare_type),
            }
        }
        match fingerprinter(CompareType::Whash, 16).fingerprint(&img) {
            Fingerprint::Hash(bits) => assert_eq!(bits.len(), 32),
            _ => panic!("expected a hash"),
        }
        match fingerprinter(CompareType::Sad, 16).fingerprint(&img) {
            Fingerprint::Pixels(pixels) => assert_eq!(pixels.len(), 64 * 64),
            _ => panic!("expected a pixel digest"),
        }
    }

    #[test]
    fn test_identical_frames_have_zero_distance() {
        let img = gradient_image(false);
        for compare_type in [
            CompareType::Phash,
            CompareType::Dhash,
            CompareType::Ahash,
            CompareType::Whash,
            CompareType::Sad,
        ] {
            let f = fingerprinter(compare_type, 8);
            let (a, b) = (f.fingerprint(&img), f.fingerprint(&img.clone()));
            assert_eq!(a.distance(&b).unwrap(), 0, "{}", compare_type);
        }
    }

    #[test]
    fn test_different_frames_have_nonzero_distance() {
        let (a, b) = (gradient_image(false), gradient_image(true));
        for compare_type in [CompareType::Dhash, CompareType::Whash, CompareType::Sad] {
            let f = fingerprinter(compare_type, 8);
            let d = f.fingerprint(&a).distance(&f.fingerprint(&b)).unwrap();
            assert!(d > 0, "{} distance should be non-zero", compare_type);
        }

        let f = fingerprinter(CompareType::Sad, 8);
        let d = f
            .fingerprint(&solid_image(0))
            .distance(&f.fingerprint(&solid_image(255)))
            .unwrap();
        assert!(d >= 254 * 64 * 64);
    }

    #[test]
    fn test_invalid_hash_sizes() {
        let config = |compare_type, hash_size| FingerprintConfig {
            compare_type,
            hash_size,
        };
        assert!(Fingerprinter::new(config(CompareType::Phash, 1)).is_err());
        assert!(Fingerprinter::new(config(CompareType::Whash, 12)).is_err());
        assert!(Fingerprinter::new(config(CompareType::Sad, 0)).is_ok());
    }
}
