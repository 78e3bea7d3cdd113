/// Multiplier applied to the score for every batch without a detection.
pub const DECAY_FACTOR: f64 = 0.95;

/// Rolling confidence score, 0..=100.
///
/// A batch with a detection replaces the score with `100 * max confidence`;
/// a batch without one decays it by [`DECAY_FACTOR`]. The score starts at
/// zero and is never reset while a stream is being processed.
#[derive(Debug, Clone, Default)]
pub struct ScoreTracker {
    current: f64,
}

impl ScoreTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `max_confidence` is the strongest detection of the batch, or `None`
    /// when nothing was detected. A maximum of exactly zero counts as nothing.
    pub fn on_batch_result(&mut self, max_confidence: Option<f64>) {
        match max_confidence {
            Some(confidence) if confidence > 0.0 => self.current = confidence * 100.0,
            _ => self.current *= DECAY_FACTOR,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }
}

/// Strongest score across every frame of a batch.
pub fn max_confidence(results: &[Vec<f64>]) -> Option<f64> {
    results
        .iter()
        .flatten()
        .copied()
        .fold(None, |max, score| match max {
            Some(m) if m >= score => Some(m),
            _ => Some(score),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_sets_score() {
        let mut tracker = ScoreTracker::new();
        tracker.on_batch_result(Some(0.8));
        assert_eq!(tracker.current(), 80.0);
        tracker.on_batch_result(Some(0.35));
        assert_eq!(tracker.current(), 100.0 * 0.35);
    }

    #[test]
    fn empty_batch_decays() {
        let mut tracker = ScoreTracker::new();
        tracker.on_batch_result(Some(0.8));
        tracker.on_batch_result(None);
        assert_eq!(tracker.current(), 76.0);
        tracker.on_batch_result(None);
        assert_eq!(tracker.current(), 72.2);
    }

    #[test]
    fn decay_approaches_but_never_reaches_zero() {
        let mut tracker = ScoreTracker::new();
        tracker.on_batch_result(Some(0.5));
        let mut previous = tracker.current();
        for _ in 0..200 {
            tracker.on_batch_result(None);
            assert_eq!(tracker.current(), previous * DECAY_FACTOR);
            assert!(tracker.current() < previous);
            assert!(tracker.current() > 0.0);
            previous = tracker.current();
        }
    }

    #[test]
    fn zero_confidence_counts_as_no_detection() {
        let mut tracker = ScoreTracker::new();
        tracker.on_batch_result(Some(0.6));
        tracker.on_batch_result(Some(0.0));
        assert_eq!(tracker.current(), 60.0 * DECAY_FACTOR);
    }

    #[test]
    fn starts_at_zero_and_stays_there_without_detections() {
        let mut tracker = ScoreTracker::new();
        tracker.on_batch_result(None);
        assert_eq!(tracker.current(), 0.0);
    }

    #[test]
    fn max_takes_strongest_single_detection() {
        let results = vec![vec![0.2, 0.3], vec![], vec![0.91], vec![0.1, 0.1, 0.1]];
        assert_eq!(max_confidence(&results), Some(0.91));
    }

    #[test]
    fn max_of_empty_batch_is_none() {
        assert_eq!(max_confidence(&[vec![], vec![]]), None);
        assert_eq!(max_confidence(&[]), None);
    }
}
