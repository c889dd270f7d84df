use super::data::{SignatureSequence, StreamRole};
use super::fingerprint::Distance;
use crate::{Error, Result};

/// Best alignment found between two [SignatureSequence]s.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CorrelationResult {
    /// Reference index that distorted frame 0 aligns with. Positive means the distorted stream
    /// is delayed relative to the reference.
    pub best_offset: i64,
    /// Mean distance over the overlap at `best_offset`. Lower is better; 0 is an exact match.
    pub confidence: f64,
}

/// Finds the offset that minimizes mean fingerprint distance between `reference` and
/// `distorted`.
///
/// Every offset `k` in `[-(n_dist - 1), n_ref - 1]` is tried. At offset `k`, reference index
/// `i` is paired with distorted index `i - k` wherever both exist, and the distances over that
/// overlap are averaged. This is O(n_ref * n_dist), so later passes are expected to run on
/// narrowed windows.
///
/// Ties are broken in favor of the smallest `k`: offsets are visited in ascending order and a
/// candidate only replaces the current best if its mean is strictly lower.
pub fn cross_correlate<F: Distance>(
    reference: &SignatureSequence<F>,
    distorted: &SignatureSequence<F>,
) -> Result<CorrelationResult> {
    let _g = tracing::span!(tracing::Level::TRACE, "cross_correlate").entered();

    if reference.is_empty() {
        return Err(Error::EmptySequence(StreamRole::Reference));
    }
    if distorted.is_empty() {
        return Err(Error::EmptySequence(StreamRole::Distorted));
    }

    let (reference, distorted) = (reference.as_slice(), distorted.as_slice());
    let n_ref = reference.len() as i64;
    let n_dist = distorted.len() as i64;

    let mut best: Option<CorrelationResult> = None;

    for k in -(n_dist - 1)..n_ref {
        let ref_start = k.max(0);
        let ref_end = n_ref.min(k + n_dist);
        if ref_end <= ref_start {
            continue;
        }

        let mut total = 0u64;
        for i in ref_start..ref_end {
            let (r, d) = (&reference[i as usize], &distorted[(i - k) as usize]);
            total += r.fingerprint.distance(&d.fingerprint)?;
        }
        let mean = total as f64 / (ref_end - ref_start) as f64;

        if best.map_or(true, |b| mean < b.confidence) {
            best = Some(CorrelationResult {
                best_offset: k,
                confidence: mean,
            });
        }
    }

    // Both sequences are non-empty, so k = 0 always overlaps.
    let best = best.ok_or(Error::EmptySequence(StreamRole::Reference))?;

    tracing::trace!(
        n_ref,
        n_dist,
        best_offset = best.best_offset,
        confidence = best.confidence,
        "finished cross-correlation"
    );

    Ok(best)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::video::{Fingerprint, FrameSignature};

    fn hash(value: u64) -> Fingerprint {
        Fingerprint::Hash(value.to_le_bytes().to_vec().into_boxed_slice())
    }

    fn sequence(values: &[u64]) -> SignatureSequence {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| FrameSignature::new(i as f64, hash(*v)))
            .collect()
    }

    #[test]
    fn test_identity() {
        let values: Vec<u64> = (0..50).map(|i| i * 7919).collect();
        let result = cross_correlate(&sequence(&values), &sequence(&values)).unwrap();
        assert_eq!(result.best_offset, 0);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_shift() {
        let values: Vec<u64> = (0..40).map(|i| i * 104729).collect();
        for m in [1, 5, 17] {
            let reference = sequence(&values);
            let distorted = sequence(&values[m..]);
            let result = cross_correlate(&reference, &distorted).unwrap();
            assert_eq!(result.best_offset, m as i64);
            assert_eq!(result.confidence, 0.0);

            // Swapping roles flips the sign.
            let result = cross_correlate(&distorted, &reference).unwrap();
            assert_eq!(result.best_offset, -(m as i64));
        }
    }

    #[test]
    fn test_sub_range() {
        let values: Vec<u64> = (0..100).collect();
        let reference = sequence(&values);
        let distorted = sequence(&values[20..40]);
        let result = cross_correlate(&reference, &distorted).unwrap();
        assert_eq!(result.best_offset, 20);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_offset_within_search_range() {
        let reference = sequence(&[3, 9, 27, 81, 243]);
        let distorted = sequence(&[1000, 2000, 4000]);
        let result = cross_correlate(&reference, &distorted).unwrap();
        assert!(result.best_offset >= -2 && result.best_offset <= 4);
        assert!(result.confidence >= 0.0);
    }

    #[test]
    fn test_tie_break_prefers_smallest_offset() {
        // A constant stream matches at every offset.
        let reference = sequence(&[5; 6]);
        let distorted = sequence(&[5; 3]);
        for _ in 0..3 {
            let result = cross_correlate(&reference, &distorted).unwrap();
            assert_eq!(result.best_offset, -2);
            assert_eq!(result.confidence, 0.0);
        }

        // Offsets 0 and 2 both match exactly.
        let reference = sequence(&[0xA, 0xB0, 0xA, 0xB0]);
        let distorted = sequence(&[0xA, 0xB0]);
        let result = cross_correlate(&reference, &distorted).unwrap();
        assert_eq!(result.best_offset, 0);
    }

    #[test]
    fn test_confidence_is_mean_distance() {
        // Single frames: the only offset is 0 and the mean is the raw distance.
        let reference = sequence(&[0b1111]);
        let distorted = sequence(&[0b0001]);
        let result = cross_correlate(&reference, &distorted).unwrap();
        assert_eq!(result.best_offset, 0);
        assert_eq!(result.confidence, 3.0);
    }

    #[test]
    fn test_empty_sequences() {
        let empty = sequence(&[]);
        let full = sequence(&[1, 2, 3]);
        assert!(matches!(
            cross_correlate(&empty, &full),
            Err(Error::EmptySequence(StreamRole::Reference))
        ));
        assert!(matches!(
            cross_correlate(&full, &empty),
            Err(Error::EmptySequence(StreamRole::Distorted))
        ));
    }

    #[test]
    fn test_mixed_fingerprints() {
        let reference = sequence(&[1, 2, 3]);
        let distorted: SignatureSequence = vec![FrameSignature::new(
            0.0,
            Fingerprint::Pixels(vec![0; 8].into_boxed_slice()),
        )]
        .into_iter()
        .collect();
        assert!(matches!(
            cross_correlate(&reference, &distorted),
            Err(Error::IncompatibleFingerprint { .. })
        ));
    }
}
