use std::path::PathBuf;

pub mod util;
pub mod video;

use video::{CompareType, StreamRole, TimeWindow};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0} signature sequence is empty")]
    EmptySequence(StreamRole),
    #[error("incompatible fingerprints: {left} vs {right}")]
    IncompatibleFingerprint { left: String, right: String },
    #[error("no {role} signatures extracted from {path:?} in window {window}; the configured bounds exclude every frame")]
    NoCoarseSignatures {
        role: StreamRole,
        path: PathBuf,
        window: TimeWindow,
    },
    #[error("hash size {size} is not supported by {compare_type}")]
    InvalidHashSize { size: u32, compare_type: CompareType },
    #[error("invalid sampling rate: {0}")]
    InvalidFrameRate(f64),
    #[error("no video stream found in: {0:?}")]
    NoVideoStream(PathBuf),
    #[error("FFmpeg error: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),
    #[error("serde_json error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
