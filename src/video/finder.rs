use std::fmt::Display;
use std::path::Path;

use serde::Serialize;

use super::analyzer::SignatureExtractor;
use super::comparator::cross_correlate;
use super::data::{SignatureSequence, StreamRole, TimeWindow, VideoInfo};
use super::fingerprint::{CompareType, FingerprintConfig};
use crate::util;
use crate::{Error, Result};

/// Stages of the hierarchical search, in the order they run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPass {
    Coarse,
    Fine,
    FrameAccurate,
}

impl SearchPass {
    pub fn name(&self) -> &'static str {
        match self {
            SearchPass::Coarse => "coarse",
            SearchPass::Fine => "fine",
            SearchPass::FrameAccurate => "frame_accurate",
        }
    }
}

impl Display for SearchPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Final result of an offset search. This is output by [OffsetFinder::find_offset].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OffsetResult {
    /// Offset expressed in frames at `fps_used`.
    pub offset_frames: i64,
    /// Time in the reference stream at which the distorted stream starts.
    pub offset_seconds: f64,
    /// `offset_seconds` as "HH:MM:SS.mmm".
    pub offset_timestamp: String,
    /// Mean fingerprint distance at the chosen offset. Lower is better.
    pub confidence: f64,
    pub fps_used: f64,
    pub method: String,
}

/// Estimate carried from one pass to the next. Only time crosses pass boundaries; frame
/// indices are local to the pass that produced them.
#[derive(Copy, Clone, Debug, PartialEq)]
struct PassEstimate {
    pass: SearchPass,
    offset_seconds: f64,
    confidence: f64,
    fps: f64,
}

/// Windows for one refinement pass.
#[derive(Copy, Clone, Debug, PartialEq)]
struct PassWindows {
    reference: TimeWindow,
    distorted: TimeWindow,
}

impl PassWindows {
    // Converts a pass-local frame offset into seconds, adding back each window's start time.
    fn offset_seconds(&self, best_offset: i64, fps: f64) -> f64 {
        best_offset as f64 / fps + self.reference.start - self.distorted.start
    }
}

// Computes the windows for a refinement pass around the estimate `center`.
//
// The distorted window spans `span` seconds starting where its content first lines up with
// the reference (zero unless the distorted stream runs ahead). The reference window covers
// that span plus `half_width` on both sides.
fn refine_windows(
    center: f64,
    half_width: f64,
    span: f64,
    reference_duration: f64,
    distorted_duration: f64,
) -> PassWindows {
    let dist_start = (-center).max(0.0);
    let anchor = center + dist_start;
    PassWindows {
        reference: TimeWindow::new(anchor - half_width, Some(anchor + span + half_width))
            .clamp_to(reference_duration),
        distorted: TimeWindow::new(dist_start, Some(dist_start + span))
            .clamp_to(distorted_duration),
    }
}

struct StreamInput<'a> {
    path: &'a Path,
    info: VideoInfo,
}

/// Finds the temporal offset between a reference and a distorted video using a three pass,
/// coarse-to-fine search.
///
/// 1. **Coarse**: both videos are sampled at `coarse_fps` over the configured bounds and
///    cross-correlated.
/// 2. **Fine**: both videos are resampled at `fine_fps` within `refine_window` seconds of the
///    coarse estimate. Skipped unless `fine_fps > coarse_fps`.
/// 3. **Frame-accurate**: both videos are resampled at the higher of their native frame
///    rates within half a second of the previous estimate. Skipped if disabled or if the
///    native rate is not higher than the previous pass rate.
///
/// If a fine or frame-accurate pass cannot produce an estimate (too few frames in the window,
/// or an extraction failure), the previous estimate is kept and reported under that pass's
/// name. A coarse pass failure fails the whole run.
#[derive(Debug)]
pub struct OffsetFinder<E: SignatureExtractor> {
    extractor: E,
    compare_type: CompareType,
    hash_size: u32,
    coarse_fps: f64,
    fine_fps: f64,
    start_offset: f64,
    max_search_offset: Option<f64>,
    max_duration: Option<f64>,
    refine_window: f64,
    frame_accurate: bool,
}

impl<E: SignatureExtractor> OffsetFinder<E> {
    /// Constructs an [OffsetFinder] with default settings that pulls signatures from `extractor`.
    pub fn new(extractor: E) -> Self {
        Self {
            extractor,
            compare_type: super::DEFAULT_COMPARE_TYPE,
            hash_size: super::DEFAULT_HASH_SIZE,
            coarse_fps: super::DEFAULT_COARSE_FPS,
            fine_fps: super::DEFAULT_FINE_FPS,
            start_offset: 0.0,
            max_search_offset: None,
            max_duration: None,
            refine_window: super::DEFAULT_REFINE_WINDOW,
            frame_accurate: true,
        }
    }

    /// Returns a new [OffsetFinder] with the provided `compare_type`.
    pub fn with_compare_type(mut self, compare_type: CompareType) -> Self {
        self.compare_type = compare_type;
        self
    }

    /// Returns a new [OffsetFinder] with the provided `hash_size`.
    pub fn with_hash_size(mut self, hash_size: u32) -> Self {
        self.hash_size = hash_size;
        self
    }

    /// Returns a new [OffsetFinder] with the provided `coarse_fps`.
    pub fn with_coarse_fps(mut self, coarse_fps: f64) -> Self {
        self.coarse_fps = coarse_fps;
        self
    }

    /// Returns a new [OffsetFinder] with the provided `fine_fps`.
    pub fn with_fine_fps(mut self, fine_fps: f64) -> Self {
        self.fine_fps = fine_fps;
        self
    }

    /// Returns a new [OffsetFinder] with the provided `start_offset`.
    ///
    /// This is a known minimum offset (seconds): the reference is only sampled from this point.
    pub fn with_start_offset(mut self, start_offset: f64) -> Self {
        self.start_offset = start_offset;
        self
    }

    /// Returns a new [OffsetFinder] with the provided `max_search_offset`.
    pub fn with_max_search_offset(mut self, max_search_offset: Option<f64>) -> Self {
        self.max_search_offset = max_search_offset;
        self
    }

    /// Returns a new [OffsetFinder] with the provided `max_duration`.
    pub fn with_max_duration(mut self, max_duration: Option<f64>) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Returns a new [OffsetFinder] with the provided `refine_window`.
    pub fn with_refine_window(mut self, refine_window: f64) -> Self {
        self.refine_window = refine_window;
        self
    }

    /// Returns a new [OffsetFinder] with `frame_accurate` set to the provided value.
    pub fn with_frame_accurate(mut self, frame_accurate: bool) -> Self {
        self.frame_accurate = frame_accurate;
        self
    }

    /// Returns the extractor used by this finder.
    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    fn fingerprint_config(&self) -> FingerprintConfig {
        FingerprintConfig {
            compare_type: self.compare_type,
            hash_size: self.hash_size,
        }
    }

    fn extract_pair(
        &self,
        reference: &StreamInput,
        distorted: &StreamInput,
        fps: f64,
        windows: PassWindows,
    ) -> Result<(SignatureSequence, SignatureSequence)> {
        let fingerprint = self.fingerprint_config();
        let ref_sigs =
            self.extractor
                .extract_signatures(reference.path, fps, windows.reference, fingerprint)?;
        let dist_sigs =
            self.extractor
                .extract_signatures(distorted.path, fps, windows.distorted, fingerprint)?;
        Ok((ref_sigs, dist_sigs))
    }

    fn coarse_pass(
        &self,
        reference: &StreamInput,
        distorted: &StreamInput,
    ) -> Result<PassEstimate> {
        let span = tracing::span!(tracing::Level::DEBUG, "coarse_pass");
        let _enter = span.enter();

        let fps = self.coarse_fps;
        tracing::debug!("coarse search at {} fps", fps);

        // The reference has to cover the search range plus the analyzed part of the distorted
        // video. If the distorted length is unknown, the reference is read to the end.
        let ref_span = match self.max_search_offset {
            Some(max_search_offset) => self
                .max_duration
                .or_else(|| distorted.info.known_duration())
                .map(|d| max_search_offset + d),
            None => self.max_duration,
        };
        let windows = PassWindows {
            reference: TimeWindow::spanning(self.start_offset, ref_span)
                .clamp_to(reference.info.duration),
            distorted: TimeWindow::spanning(0.0, self.max_duration)
                .clamp_to(distorted.info.duration),
        };

        let (ref_sigs, dist_sigs) = self.extract_pair(reference, distorted, fps, windows)?;

        for (role, input, window, sigs) in [
            (StreamRole::Reference, reference, windows.reference, &ref_sigs),
            (StreamRole::Distorted, distorted, windows.distorted, &dist_sigs),
        ] {
            if sigs.is_empty() {
                return Err(Error::NoCoarseSignatures {
                    role,
                    path: input.path.to_owned(),
                    window,
                });
            }
        }

        let result = cross_correlate(&ref_sigs, &dist_sigs)?;
        let estimate = PassEstimate {
            pass: SearchPass::Coarse,
            offset_seconds: windows.offset_seconds(result.best_offset, fps),
            confidence: result.confidence,
            fps,
        };

        tracing::debug!(
            offset_frames = result.best_offset,
            offset_seconds = estimate.offset_seconds,
            confidence = estimate.confidence,
            "coarse result"
        );

        Ok(estimate)
    }

    // Runs a refinement pass around `previous`. Returns `Ok(None)` if the window holds too
    // few frames to refine.
    #[allow(clippy::too_many_arguments)]
    fn refine_pass(
        &self,
        pass: SearchPass,
        reference: &StreamInput,
        distorted: &StreamInput,
        previous: &PassEstimate,
        fps: f64,
        half_width: f64,
        span: f64,
    ) -> Result<Option<PassEstimate>> {
        let span_guard = tracing::span!(tracing::Level::DEBUG, "refine_pass", pass = pass.name());
        let _enter = span_guard.enter();

        let windows = refine_windows(
            previous.offset_seconds,
            half_width,
            span,
            reference.info.duration,
            distorted.info.duration,
        );
        tracing::debug!(
            "{} search at {:.3} fps, reference {}, distorted {}",
            pass,
            fps,
            windows.reference,
            windows.distorted
        );

        let (ref_sigs, dist_sigs) = self.extract_pair(reference, distorted, fps, windows)?;
        if ref_sigs.len() < 2 || dist_sigs.len() < 2 {
            tracing::warn!(
                reference_frames = ref_sigs.len(),
                distorted_frames = dist_sigs.len(),
                "{} window too small to refine; keeping {} estimate",
                pass,
                previous.pass
            );
            return Ok(None);
        }

        let result = cross_correlate(&ref_sigs, &dist_sigs)?;
        let estimate = PassEstimate {
            pass,
            offset_seconds: windows.offset_seconds(result.best_offset, fps),
            confidence: result.confidence,
            fps,
        };

        tracing::debug!(
            offset_frames = result.best_offset,
            offset_seconds = estimate.offset_seconds,
            confidence = estimate.confidence,
            "{} result",
            pass
        );

        Ok(Some(estimate))
    }

    // Applies the degradation rule: a refinement that fails keeps the previous estimate.
    // Mismatched fingerprints point to a configuration bug and are always fatal.
    fn refine_or_keep(
        previous: PassEstimate,
        refined: Result<Option<PassEstimate>>,
    ) -> Result<PassEstimate> {
        match refined {
            Ok(Some(estimate)) => Ok(estimate),
            Ok(None) => Ok(previous),
            Err(e @ Error::IncompatibleFingerprint { .. }) => Err(e),
            Err(e) => {
                tracing::warn!("refinement failed, keeping {} estimate: {}", previous.pass, e);
                Ok(previous)
            }
        }
    }

    fn to_result(&self, estimate: PassEstimate) -> OffsetResult {
        OffsetResult {
            offset_frames: (estimate.offset_seconds * estimate.fps).round() as i64,
            offset_seconds: estimate.offset_seconds,
            offset_timestamp: util::format_timestamp(estimate.offset_seconds),
            confidence: estimate.confidence,
            fps_used: estimate.fps,
            method: format!("{}_{}", estimate.pass, self.compare_type),
        }
    }

    /// Runs the search and returns the offset of `distorted` relative to `reference`.
    ///
    /// A positive offset means the distorted video starts that many seconds into the
    /// reference.
    pub fn find_offset(
        &self,
        reference: impl AsRef<Path>,
        distorted: impl AsRef<Path>,
    ) -> Result<OffsetResult> {
        let span = tracing::span!(tracing::Level::TRACE, "find_offset");
        let _enter = span.enter();

        for fps in [self.coarse_fps, self.fine_fps] {
            if !(fps.is_finite() && fps > 0.0) {
                return Err(Error::InvalidFrameRate(fps));
            }
        }

        let (ref_path, dist_path) = (reference.as_ref(), distorted.as_ref());
        let reference = StreamInput {
            path: ref_path,
            info: self.extractor.probe(ref_path)?,
        };
        let distorted = StreamInput {
            path: dist_path,
            info: self.extractor.probe(dist_path)?,
        };

        tracing::debug!(
            "reference: {}x{} @ {:.2} fps, {:.2}s",
            reference.info.width,
            reference.info.height,
            reference.info.fps,
            reference.info.duration
        );
        tracing::debug!(
            "distorted: {}x{} @ {:.2} fps, {:.2}s",
            distorted.info.width,
            distorted.info.height,
            distorted.info.fps,
            distorted.info.duration
        );

        let mut estimate = self.coarse_pass(&reference, &distorted)?;

        if self.fine_fps > estimate.fps {
            let span = self
                .max_duration
                .or_else(|| distorted.info.known_duration())
                .map_or(self.refine_window * 2.0, |d| d.min(self.refine_window * 2.0));
            let refined = self.refine_pass(
                SearchPass::Fine,
                &reference,
                &distorted,
                &estimate,
                self.fine_fps,
                self.refine_window,
                span,
            );
            estimate = Self::refine_or_keep(estimate, refined)?;
        }

        let native_fps = reference.info.fps.max(distorted.info.fps);
        if self.frame_accurate && native_fps > estimate.fps {
            let span = distorted
                .info
                .known_duration()
                .map_or(super::FRAME_ACCURATE_WINDOW * 2.0, |d| {
                    d.min(super::FRAME_ACCURATE_WINDOW * 2.0)
                });
            let refined = self.refine_pass(
                SearchPass::FrameAccurate,
                &reference,
                &distorted,
                &estimate,
                native_fps,
                super::FRAME_ACCURATE_WINDOW,
                span,
            );
            estimate = Self::refine_or_keep(estimate, refined)?;
        }

        let result = self.to_result(estimate);

        tracing::info!(
            offset_seconds = result.offset_seconds,
            offset_frames = result.offset_frames,
            confidence = result.confidence,
            method = %result.method,
            "found offset"
        );

        Ok(result)
    }
}
