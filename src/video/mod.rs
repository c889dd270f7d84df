mod analyzer;
mod comparator;
mod data;
mod finder;
mod fingerprint;
mod util;

pub use analyzer::{Analyzer, SignatureExtractor};
pub use comparator::{cross_correlate, CorrelationResult};
pub use data::{FrameSignature, SignatureSequence, StreamRole, TimeWindow, VideoInfo};
pub use finder::{OffsetFinder, OffsetResult, SearchPass};
pub use fingerprint::{CompareType, Distance, Fingerprint, FingerprintConfig, Fingerprinter};

/// Default comparison algorithm.
pub const DEFAULT_COMPARE_TYPE: CompareType = CompareType::Phash;

/// Default hash size.
///
/// Hash fingerprints are `hash_size * hash_size` bits long. Ignored by [CompareType::Sad].
pub const DEFAULT_HASH_SIZE: u32 = 16;

/// Default coarse pass sampling rate (frames per second).
pub const DEFAULT_COARSE_FPS: f64 = 1.0;

/// Default fine pass sampling rate (frames per second).
///
/// The fine pass is skipped if this is not higher than the coarse rate.
pub const DEFAULT_FINE_FPS: f64 = 10.0;

/// Default refine window (seconds).
///
/// The fine pass resamples within this many seconds on either side of the coarse estimate.
pub const DEFAULT_REFINE_WINDOW: f64 = 2.0;

/// Half-width of the frame-accurate pass window (seconds).
pub const FRAME_ACCURATE_WINDOW: f64 = 0.5;

/// Width and height of the grayscale digest used by [CompareType::Sad].
pub const SAD_DIGEST_SIZE: u32 = 64;

/// Frame rate assumed when a stream reports neither an average nor a base rate.
pub const FALLBACK_FPS: f64 = 25.0;
