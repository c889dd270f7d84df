extern crate ffmpeg_next;
#[cfg(feature = "rayon")]
extern crate rayon;

use std::path::Path;

use image::{DynamicImage, RgbImage};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::data::{FrameSignature, SignatureSequence, TimeWindow, VideoInfo};
use super::fingerprint::{FingerprintConfig, Fingerprinter};
use super::util;
use crate::{Error, Result};

/// Maximum width of frames handed to the fingerprinter. Frames are downscaled by FFmpeg
/// before conversion to keep batches small.
const ANALYSIS_WIDTH: u32 = 320;

/// Number of frames fingerprinted per batch.
const BATCH_SIZE: usize = 64;

/// Only seek when the window starts at least this far in. Seeks land this far before the
/// window start to account for keyframe spacing.
const SEEK_MARGIN: f64 = 0.5;

/// Tolerance used when comparing frame and slot timestamps.
const SLOT_EPSILON: f64 = 1e-6;

/// Produces frame signatures for a video at a given rate and time window.
///
/// The hierarchical search only depends on this trait, which makes it possible to drive
/// it with pre-computed or synthetic signatures.
pub trait SignatureExtractor {
    /// Returns basic metadata for the video at `path`.
    fn probe(&self, path: &Path) -> Result<VideoInfo>;

    /// Samples the video at `path` at `fps` within `window` and fingerprints each sample.
    ///
    /// Signatures must be returned in strictly increasing timestamp order. An unreadable
    /// path must fail rather than return an empty sequence.
    fn extract_signatures(
        &self,
        path: &Path,
        fps: f64,
        window: TimeWindow,
        fingerprint: FingerprintConfig,
    ) -> Result<SignatureSequence>;
}

/// Thin wrapper around the native `FFmpeg` video decoder.
struct Decoder {
    decoder: ffmpeg_next::codec::decoder::Video,
}

impl Decoder {
    fn build_threading_config() -> ffmpeg_next::codec::threading::Config {
        let mut config = ffmpeg_next::codec::threading::Config::default();
        config.count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        config.kind = ffmpeg_next::codec::threading::Type::Frame;
        config
    }

    fn from_stream(stream: ffmpeg_next::format::stream::Stream, threaded: bool) -> Result<Self> {
        let ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let mut decoder = ctx.decoder();

        if threaded {
            decoder.set_threading(Self::build_threading_config());
        }

        let decoder = decoder.video()?;

        Ok(Self { decoder })
    }

    fn send_packet(&mut self, packet: &ffmpeg_next::packet::Packet) -> Result<()> {
        Ok(self.decoder.send_packet(packet)?)
    }

    fn send_eof(&mut self) -> Result<()> {
        Ok(self.decoder.send_eof()?)
    }

    fn receive_frame(&mut self, frame: &mut ffmpeg_next::frame::Video) -> Result<()> {
        Ok(self.decoder.receive_frame(frame)?)
    }
}

/// Resamples a decoded stream to a fixed rate.
///
/// Slot `n` sits at `window.start + n / fps`. Each slot is filled by the first frame at or
/// after it, so a frame may fill several slots when the target rate exceeds the source rate.
/// Slots past the window end are never filled.
#[derive(Debug)]
struct FrameSampler {
    window: TimeWindow,
    period: f64,
    next_slot: u64,
}

impl FrameSampler {
    fn new(window: TimeWindow, fps: f64) -> Self {
        Self {
            window,
            period: 1.0 / fps,
            next_slot: 0,
        }
    }

    fn slot_time(&self, n: u64) -> f64 {
        self.window.start + n as f64 * self.period
    }

    fn can_fill(&self, slot: f64, t: f64) -> bool {
        slot <= t + SLOT_EPSILON && self.window.end.map_or(true, |e| slot <= e + SLOT_EPSILON)
    }

    // A frame at `t` would fill at least one slot.
    fn is_due(&self, t: f64) -> bool {
        self.can_fill(self.slot_time(self.next_slot), t)
    }

    // Claims every pending slot at or before `t` and returns their timestamps.
    fn claim(&mut self, t: f64) -> Vec<f64> {
        let mut slots = Vec::new();
        while self.is_due(t) {
            slots.push(self.slot_time(self.next_slot));
            self.next_slot += 1;
        }
        slots
    }

    // No slot can be filled by a frame at or after `t`.
    fn is_finished(&self, t: f64) -> bool {
        self.window.end.map_or(false, |e| t + SLOT_EPSILON >= e)
    }
}

// Copies a packed RGB24 frame into an image, dropping any row padding.
fn frame_to_image(frame: &ffmpeg_next::frame::Video) -> Option<DynamicImage> {
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let stride = frame.stride(0);
    let row_len = width * 3;
    if stride < row_len {
        return None;
    }

    let mut buf = Vec::with_capacity(row_len * height);
    for row in frame.data(0).chunks(stride).take(height) {
        buf.extend_from_slice(row.get(..row_len)?);
    }
    RgbImage::from_raw(width as u32, height as u32, buf).map(DynamicImage::ImageRgb8)
}

/// Converts decoded frames into downscaled RGB images.
struct FrameConverter {
    scaler: Option<ffmpeg_next::software::scaling::Context>,
    input: (ffmpeg_next::format::Pixel, u32, u32),
}

impl FrameConverter {
    fn new() -> Self {
        Self {
            scaler: None,
            input: (ffmpeg_next::format::Pixel::None, 0, 0),
        }
    }

    fn convert(&mut self, frame: &ffmpeg_next::frame::Video) -> Result<Option<DynamicImage>> {
        let input = (frame.format(), frame.width(), frame.height());

        // The scaler is rebuilt if the stream changes format or size mid-way.
        if self.scaler.is_none() || self.input != input {
            let (format, width, height) = input;
            let out_width = width.min(ANALYSIS_WIDTH).max(1);
            let out_height = ((u64::from(height) * u64::from(out_width)) / u64::from(width.max(1)))
                .max(1) as u32;
            self.scaler = Some(ffmpeg_next::software::scaling::Context::get(
                format,
                width,
                height,
                ffmpeg_next::format::Pixel::RGB24,
                out_width,
                out_height,
                ffmpeg_next::software::scaling::Flags::AREA,
            )?);
            self.input = input;
        }

        let mut rgb = ffmpeg_next::frame::Video::empty();
        if let Some(scaler) = &mut self.scaler {
            scaler.run(frame, &mut rgb)?;
        }
        Ok(frame_to_image(&rgb))
    }
}

/// Extracts frame signatures from video files using FFmpeg.
///
/// If `threaded_decoding` is set to `true`, FFmpeg will decode using multiple threads. If
/// `threading` is set (the default) and the `rayon` feature is enabled, frames are fingerprinted
/// in parallel batches.
///
/// At a high-level, the analyzer does the following for a given video:
///
/// 1. Opens the most suitable video stream and seeks close to the start of the window
/// 2. Decodes frames and resamples them to the requested rate
/// 3. Downscales each sampled frame and computes its [Fingerprint](super::Fingerprint)
/// 4. Returns the signatures in timestamp order
#[derive(Debug)]
pub struct Analyzer {
    threaded_decoding: bool,
    threading: bool,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self {
            threaded_decoding: false,
            threading: true,
        }
    }
}

impl Analyzer {
    /// Returns a new [Analyzer] with `threaded_decoding` set to the provided value.
    pub fn with_threaded_decoding(mut self, threaded_decoding: bool) -> Self {
        self.threaded_decoding = threaded_decoding;
        self
    }

    /// Returns a new [Analyzer] with `threading` set to the provided value.
    pub fn with_threading(mut self, threading: bool) -> Self {
        self.threading = threading;
        self
    }

    fn fingerprint_batch(
        &self,
        fingerprinter: &Fingerprinter,
        batch: &mut Vec<(Vec<f64>, DynamicImage)>,
        signatures: &mut Vec<FrameSignature>,
    ) {
        let frames = std::mem::take(batch);
        let mut fingerprints = Vec::new();

        if cfg!(feature = "rayon") && self.threading {
            #[cfg(feature = "rayon")]
            {
                fingerprints = frames
                    .into_par_iter()
                    .map(|(slots, image)| (slots, fingerprinter.fingerprint(&image)))
                    .collect::<Vec<_>>();
            }
        } else {
            fingerprints.extend(
                frames
                    .into_iter()
                    .map(|(slots, image)| (slots, fingerprinter.fingerprint(&image))),
            );
        }

        for (slots, fingerprint) in fingerprints {
            for t in slots {
                signatures.push(FrameSignature::new(t, fingerprint.clone()));
            }
        }
    }
}

impl SignatureExtractor for Analyzer {
    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        let ctx = ffmpeg_next::format::input(&path)?;
        let stream = util::find_best_video_stream(&ctx, path)?;

        let fps = util::stream_fps(&stream);
        let duration = util::stream_duration(&ctx, &stream);
        let frame_count = if stream.frames() > 0 {
            stream.frames() as u64
        } else {
            (duration * fps).round() as u64
        };

        let decoder = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?
            .decoder()
            .video()?;

        let info = VideoInfo {
            path: path.to_owned(),
            fps,
            duration,
            frame_count,
            width: decoder.width(),
            height: decoder.height(),
        };

        tracing::debug!(
            width = info.width,
            height = info.height,
            fps = info.fps,
            duration = info.duration,
            "probed {}",
            path.display()
        );

        Ok(info)
    }

    fn extract_signatures(
        &self,
        path: &Path,
        fps: f64,
        window: TimeWindow,
        fingerprint: FingerprintConfig,
    ) -> Result<SignatureSequence> {
        let span = tracing::span!(tracing::Level::TRACE, "extract_signatures", fps);
        let _enter = span.enter();

        if !(fps.is_finite() && fps > 0.0) {
            return Err(Error::InvalidFrameRate(fps));
        }

        let fingerprinter = Fingerprinter::new(fingerprint)?;

        if window.is_empty() {
            tracing::debug!("window {} is empty for {}", window, path.display());
            return Ok(SignatureSequence::new(Vec::new()));
        }

        let mut ctx = ffmpeg_next::format::input(&path)?;
        let (stream_idx, time_base, origin, mut decoder) = {
            let stream = util::find_best_video_stream(&ctx, path)?;
            let stream_idx = stream.index();
            let time_base = stream.time_base();
            let origin = util::stream_origin(&stream);
            let decoder = Decoder::from_stream(stream, self.threaded_decoding)?;
            (stream_idx, time_base, origin, decoder)
        };

        // If required, seek close to the start of the window.
        if window.start > SEEK_MARGIN {
            let origin_secs = util::to_seconds(time_base, origin);
            util::seek_to_seconds(&mut ctx, origin_secs + window.start - SEEK_MARGIN)?;
        }

        tracing::debug!(
            "starting signature extraction for {} in {}",
            path.display(),
            window
        );

        let mut sampler = FrameSampler::new(window, fps);
        let mut converter = FrameConverter::new();
        let mut frame = ffmpeg_next::frame::Video::empty();
        let mut batch = Vec::with_capacity(BATCH_SIZE);
        let mut signatures = Vec::new();
        let mut finished = false;

        // Pulls every available frame out of the decoder and samples it. Returns true once
        // the end of the window has been reached.
        let mut drain = |decoder: &mut Decoder,
                         batch: &mut Vec<(Vec<f64>, DynamicImage)>,
                         signatures: &mut Vec<FrameSignature>|
         -> Result<bool> {
            while decoder.receive_frame(&mut frame).is_ok() {
                let pts = match frame.timestamp().or_else(|| frame.pts()) {
                    Some(pts) => pts,
                    None => continue,
                };
                let t = util::to_seconds(time_base, pts - origin);
                if t + SLOT_EPSILON < window.start {
                    continue;
                }

                // Slots are only claimed once the frame converts, so a frame that cannot be
                // read leaves its slots to the next one.
                if sampler.is_due(t) {
                    match converter.convert(&frame)? {
                        Some(image) => batch.push((sampler.claim(t), image)),
                        None => tracing::warn!(t, "skipping unreadable frame"),
                    }
                    if batch.len() >= BATCH_SIZE {
                        self.fingerprint_batch(&fingerprinter, batch, signatures);
                    }
                }

                if sampler.is_finished(t) {
                    return Ok(true);
                }
            }
            Ok(false)
        };

        let packets = ctx
            .packets()
            .filter(|(s, _)| s.index() == stream_idx)
            .map(|(_, p)| p);

        for p in packets {
            decoder.send_packet(&p)?;
            if drain(&mut decoder, &mut batch, &mut signatures)? {
                finished = true;
                break;
            }
        }

        if !finished {
            decoder.send_eof()?;
            drain(&mut decoder, &mut batch, &mut signatures)?;
        }

        self.fingerprint_batch(&fingerprinter, &mut batch, &mut signatures);

        tracing::debug!(
            num_signatures = signatures.len(),
            "completed signature extraction for {}",
            path.display()
        );

        Ok(SignatureSequence::new(signatures))
    }
}
