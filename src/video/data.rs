use std::fmt::Display;
use std::path::PathBuf;

use serde::Serialize;

use super::fingerprint::Fingerprint;

/// Identifies which of the two compared streams a value belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamRole {
    Reference,
    Distorted,
}

impl Display for StreamRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamRole::Reference => write!(f, "reference"),
            StreamRole::Distorted => write!(f, "distorted"),
        }
    }
}

/// Basic video stream metadata.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub fps: f64,
    /// Stream duration in seconds. Zero if the container does not report one.
    pub duration: f64,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
}

impl VideoInfo {
    /// Returns the duration, or `None` if the container did not report one.
    pub fn known_duration(&self) -> Option<f64> {
        (self.duration > 0.0).then_some(self.duration)
    }
}

/// A time range in seconds, relative to the start of a stream.
///
/// An `end` of `None` means "to the end of the stream".
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TimeWindow {
    pub start: f64,
    pub end: Option<f64>,
}

impl TimeWindow {
    pub fn new(start: f64, end: Option<f64>) -> Self {
        Self { start, end }
    }

    /// The whole stream.
    pub fn full() -> Self {
        Self::new(0.0, None)
    }

    /// Returns a window starting at `start` that spans `span` seconds, if provided.
    pub fn spanning(start: f64, span: Option<f64>) -> Self {
        Self::new(start, span.map(|s| start + s))
    }

    /// Clamps this window to `[0, duration]`.
    ///
    /// A non-positive `duration` is treated as unknown and only the lower bound is clamped. A
    /// window that starts past `duration` stays empty.
    pub fn clamp_to(self, duration: f64) -> Self {
        let start = self.start.max(0.0);
        if duration <= 0.0 {
            return Self::new(start, self.end);
        }
        let end = self.end.map_or(duration, |e| e.min(duration));
        Self::new(start, Some(end))
    }

    /// Returns true if no timestamp can fall within this window.
    pub fn is_empty(&self) -> bool {
        self.end.map_or(false, |e| e < self.start)
    }
}

impl Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{:.3}s, {:.3}s]", self.start, end),
            None => write!(f, "[{:.3}s, end]", self.start),
        }
    }
}

/// A single sampled frame: its timestamp (seconds from stream start) and fingerprint.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameSignature<F = Fingerprint> {
    pub timestamp: f64,
    pub fingerprint: F,
}

impl<F> FrameSignature<F> {
    pub fn new(timestamp: f64, fingerprint: F) -> Self {
        Self {
            timestamp,
            fingerprint,
        }
    }
}

/// Ordered frame signatures for one stream and one pass.
///
/// Index `i` is the frame position at the pass's sampling rate. Sequences are built once per
/// extraction and never mutated afterwards.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignatureSequence<F = Fingerprint> {
    signatures: Vec<FrameSignature<F>>,
}

impl<F> SignatureSequence<F> {
    /// Builds a sequence, restoring timestamp order if signatures were computed out of order.
    pub fn new(mut signatures: Vec<FrameSignature<F>>) -> Self {
        signatures.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Self { signatures }
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn as_slice(&self) -> &[FrameSignature<F>] {
        &self.signatures
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameSignature<F>> {
        self.signatures.iter()
    }
}

impl<F> FromIterator<FrameSignature<F>> for SignatureSequence<F> {
    fn from_iter<I: IntoIterator<Item = FrameSignature<F>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sequence_restores_timestamp_order() {
        let seq: SignatureSequence<u64> = vec![
            FrameSignature::new(0.2, 2),
            FrameSignature::new(0.0, 0),
            FrameSignature::new(0.1, 1),
        ]
        .into_iter()
        .collect();
        let values: Vec<u64> = seq.iter().map(|s| s.fingerprint).collect();
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[test]
    fn test_window_clamp() {
        let w = TimeWindow::new(-1.5, Some(12.0)).clamp_to(10.0);
        assert_eq!(w, TimeWindow::new(0.0, Some(10.0)));

        let w = TimeWindow::new(2.0, None).clamp_to(10.0);
        assert_eq!(w, TimeWindow::new(2.0, Some(10.0)));

        // Unknown duration leaves the upper bound alone.
        let w = TimeWindow::new(-3.0, None).clamp_to(0.0);
        assert_eq!(w, TimeWindow::full());

        let w = TimeWindow::new(20.0, None).clamp_to(10.0);
        assert!(w.is_empty());
        assert!(!TimeWindow::new(0.0, Some(10.0)).clamp_to(10.0).is_empty());
    }

    #[test]
    fn test_window_display() {
        insta::assert_snapshot!(TimeWindow::spanning(3.0, Some(8.0)).to_string(), @"[3.000s, 11.000s]");
        insta::assert_snapshot!(TimeWindow::full().to_string(), @"[0.000s, end]");
    }
}
