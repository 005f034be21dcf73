use crate::types::{Embedding, GalleryEntry};

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Best gallery entry was within tolerance.
    Match {
        student_id: String,
        embedding_id: String,
        distance: f32,
    },
    /// No entry within tolerance. `best_distance` is `None` only for an
    /// empty gallery — callers can tell "nobody enrolled" from "nobody
    /// close enough".
    NoMatch { best_distance: Option<f32> },
}

impl MatchOutcome {
    pub fn matched_student(&self) -> Option<&str> {
        match self {
            MatchOutcome::Match { student_id, .. } => Some(student_id),
            MatchOutcome::NoMatch { .. } => None,
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery of
/// enrolled faces. Implementations must be deterministic for a given
/// gallery order so a swap-in index cannot change which of two
/// equidistant students gets marked.
pub trait Matcher: Send + Sync {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &[GalleryEntry],
        tolerance: f32,
    ) -> MatchOutcome;
}

/// Brute-force Euclidean nearest-neighbor matcher.
///
/// O(N·D) per probe; fine at classroom scale. Scans every entry and
/// keeps the first of any equidistant minimum (enrollment order), so
/// repeated probes always resolve the same way.
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &[GalleryEntry],
        tolerance: f32,
    ) -> MatchOutcome {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;
        let mut tied = false;

        for (i, entry) in gallery.iter().enumerate() {
            // A truncated probe would under-count distance over the
            // shared prefix and could match the wrong student.
            if entry.embedding.values.len() != probe.values.len() {
                tracing::warn!(
                    embedding_id = %entry.embedding_id,
                    probe_dims = probe.values.len(),
                    entry_dims = entry.embedding.values.len(),
                    "skipping gallery entry with mismatched dimensions"
                );
                continue;
            }
            let dist = probe.euclidean_distance(&entry.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
                tied = false;
            } else if dist == best_dist {
                tied = true;
            }
        }

        match best_idx {
            Some(idx) if best_dist <= tolerance => {
                let entry = &gallery[idx];
                if tied {
                    tracing::warn!(
                        student_id = %entry.student_id,
                        distance = best_dist,
                        "ambiguous match: multiple gallery entries at minimum distance"
                    );
                }
                MatchOutcome::Match {
                    student_id: entry.student_id.clone(),
                    embedding_id: entry.embedding_id.clone(),
                    distance: best_dist,
                }
            }
            Some(_) => MatchOutcome::NoMatch {
                best_distance: Some(best_dist),
            },
            None => MatchOutcome::NoMatch {
                best_distance: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(embedding_id: &str, student_id: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            embedding_id: embedding_id.into(),
            student_id: student_id.into(),
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn empty_gallery_is_no_match() {
        let probe = Embedding::new(vec![1.0, 2.0]);
        let result = NearestMatcher.best_match(&probe, &[], 0.55);
        assert_eq!(
            result,
            MatchOutcome::NoMatch {
                best_distance: None
            }
        );
    }

    #[test]
    fn picks_global_minimum_within_tolerance() {
        // Classroom scenario: A at the origin, B far away.
        let gallery = vec![
            entry("e1", "A", vec![0.0, 0.0, 0.0, 0.0]),
            entry("e2", "B", vec![10.0, 10.0, 10.0, 10.0]),
        ];
        let probe = Embedding::new(vec![0.1, 0.0, 0.0, 0.0]);
        match NearestMatcher.best_match(&probe, &gallery, 0.55) {
            MatchOutcome::Match {
                student_id,
                distance,
                ..
            } => {
                assert_eq!(student_id, "A");
                assert!((distance - 0.1).abs() < 1e-6);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn equidistant_probe_is_no_match() {
        let gallery = vec![
            entry("e1", "A", vec![0.0, 0.0, 0.0, 0.0]),
            entry("e2", "B", vec![10.0, 10.0, 10.0, 10.0]),
        ];
        let probe = Embedding::new(vec![5.0, 5.0, 5.0, 5.0]);
        match NearestMatcher.best_match(&probe, &gallery, 0.55) {
            MatchOutcome::NoMatch {
                best_distance: Some(d),
            } => assert!(d > 0.55),
            other => panic!("expected no match, got {other:?}"),
        }
    }

    #[test]
    fn best_match_can_be_last_entry() {
        // All entries are scanned; a late entry can still win.
        let gallery = vec![
            entry("e1", "A", vec![0.0, 1.0]),
            entry("e2", "B", vec![1.0, 0.0]),
            entry("e3", "C", vec![0.9, 0.0]),
        ];
        let probe = Embedding::new(vec![0.9, 0.0]);
        let result = NearestMatcher.best_match(&probe, &gallery, 0.5);
        assert_eq!(result.matched_student(), Some("C"));
    }

    #[test]
    fn tie_breaks_to_enrollment_order() {
        // Two students enrolled identical vectors; the earlier one wins.
        let gallery = vec![
            entry("e1", "A", vec![1.0, 1.0]),
            entry("e2", "B", vec![1.0, 1.0]),
        ];
        let probe = Embedding::new(vec![1.0, 1.0]);
        let result = NearestMatcher.best_match(&probe, &gallery, 0.55);
        assert_eq!(result.matched_student(), Some("A"));
    }

    #[test]
    fn mismatched_dimensions_never_match() {
        // A truncated probe is close to A over the shared prefix but
        // must not count as A.
        let gallery = vec![entry("e1", "A", vec![0.0, 0.0, 9.0, 9.0])];
        let probe = Embedding::new(vec![0.1, 0.0]);
        let result = NearestMatcher.best_match(&probe, &gallery, 0.55);
        assert_eq!(
            result,
            MatchOutcome::NoMatch {
                best_distance: None
            }
        );
    }

    #[test]
    fn above_tolerance_reports_best_distance() {
        let gallery = vec![entry("e1", "A", vec![3.0, 4.0])];
        let probe = Embedding::new(vec![0.0, 0.0]);
        match NearestMatcher.best_match(&probe, &gallery, 1.0) {
            MatchOutcome::NoMatch {
                best_distance: Some(d),
            } => assert!((d - 5.0).abs() < 1e-6),
            other => panic!("expected no match, got {other:?}"),
        }
    }
}
