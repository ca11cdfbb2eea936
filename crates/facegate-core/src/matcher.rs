//! Descriptor comparison and template search.
//!
//! Similarity is `max(0, 1 - normalized euclidean distance)` by default,
//! where the distance is divided by `sqrt(len)` so it stays comparable across
//! descriptor lengths. Template search always scores every template.

use crate::types::FaceTemplate;
use serde::{Deserialize, Serialize};

/// Default similarity a comparison must exceed to count as a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Euclidean,
    Cosine,
}

impl Metric {
    pub fn matcher(&self) -> &'static dyn Matcher {
        match self {
            Self::Euclidean => &EuclideanMatcher,
            Self::Cosine => &CosineMatcher,
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" => Ok(Self::Euclidean),
            "cosine" => Ok(Self::Cosine),
            other => Err(format!("unknown match metric: {other}")),
        }
    }
}

/// Similarity in [0, 1] between two descriptors. Mismatched lengths score 0.
pub trait Matcher: Send + Sync {
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32;
}

pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match normalized_euclidean_distance(a, b) {
            Some(dist) => (1.0 - dist).max(0.0),
            None => 0.0,
        }
    }
}

/// Cosine similarity with negative values clamped to 0.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }
        if a.is_empty() {
            return 1.0;
        }
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;
        for (x, y) in a.iter().zip(b) {
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        let sim = if denom > 0.0 { dot / denom } else { 0.0 };
        sim.clamp(0.0, 1.0)
    }
}

/// `sqrt(sum((a-b)^2)) / sqrt(len)`, or `None` when lengths differ.
pub fn normalized_euclidean_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    if a.is_empty() {
        return Some(0.0);
    }
    let sum: f32 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    Some(sum.sqrt() / (a.len() as f32).sqrt())
}

/// Outcome of comparing two descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub similarity: f32,
    pub is_match: bool,
}

pub fn compare_faces(a: &[f32], b: &[f32], threshold: f32) -> Comparison {
    compare_with(&EuclideanMatcher, a, b, threshold)
}

pub fn compare_with(matcher: &dyn Matcher, a: &[f32], b: &[f32], threshold: f32) -> Comparison {
    let similarity = matcher.similarity(a, b);
    Comparison {
        similarity,
        is_match: similarity > threshold,
    }
}

/// Best template for a query, with every template's similarity in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub best_similarity: f32,
    /// `None` when there were no templates.
    pub matched_index: Option<usize>,
    pub all_similarities: Vec<f32>,
}

impl MatchResult {
    /// Index of the best template if its similarity exceeds `threshold`.
    pub fn accepted(&self, threshold: f32) -> Option<usize> {
        self.matched_index.filter(|_| self.best_similarity > threshold)
    }
}

pub fn find_best_match(query: &[f32], templates: &[FaceTemplate]) -> MatchResult {
    find_best_match_with(&EuclideanMatcher, query, templates)
}

pub fn find_best_match_with(matcher: &dyn Matcher, query: &[f32], templates: &[FaceTemplate]) -> MatchResult {
    let all_similarities: Vec<f32> = templates
        .iter()
        .map(|t| matcher.similarity(query, &t.descriptor))
        .collect();

    // First maximum wins on ties.
    let mut best: Option<(usize, f32)> = None;
    for (i, &sim) in all_similarities.iter().enumerate() {
        if best.map_or(true, |(_, b)| sim > b) {
            best = Some((i, sim));
        }
    }

    MatchResult {
        best_similarity: best.map_or(0.0, |(_, s)| s),
        matched_index: best.map(|(i, _)| i),
        all_similarities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(owner: &str, descriptor: Vec<f32>) -> FaceTemplate {
        FaceTemplate::new(owner, descriptor)
    }

    #[test]
    fn test_identical_descriptors_similarity_one() {
        let e: Vec<f32> = (0..128).map(|i| (i as f32 * 0.37).sin()).collect();
        let c = compare_faces(&e, &e, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(c.similarity, 1.0);
        assert!(c.is_match);
        assert!((CosineMatcher.similarity(&e, &e) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_constant_offset_similarity() {
        let a: Vec<f32> = (0..128).map(|i| i as f32 / 128.0).collect();
        for eps in [0.01f32, 0.03, 0.049] {
            let b: Vec<f32> = a.iter().map(|v| v + eps).collect();
            let c = compare_faces(&a, &b, DEFAULT_MATCH_THRESHOLD);
            assert!(c.similarity > 0.9, "eps {eps} -> {}", c.similarity);
            assert!((c.similarity - (1.0 - eps)).abs() < 1e-4);
        }
    }

    #[test]
    fn test_similarity_never_negative() {
        let a = vec![0.0; 16];
        let b = vec![5.0; 16];
        assert_eq!(compare_faces(&a, &b, 0.6).similarity, 0.0);
        assert_eq!(CosineMatcher.similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_length_mismatch_scores_zero() {
        let c = compare_faces(&[0.1, 0.2], &[0.1, 0.2, 0.3], 0.6);
        assert_eq!(c.similarity, 0.0);
        assert!(!c.is_match);
        assert_eq!(CosineMatcher.similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        // distance 0.5 -> similarity 0.5, not above a 0.5 threshold.
        let a = vec![0.0; 4];
        let b = vec![0.5; 4];
        let c = compare_faces(&a, &b, 0.5);
        assert!((c.similarity - 0.5).abs() < 1e-6);
        assert!(!c.is_match);
    }

    #[test]
    fn test_find_best_match_empty() {
        let result = find_best_match(&[0.5; 8], &[]);
        assert_eq!(result.best_similarity, 0.0);
        assert_eq!(result.matched_index, None);
        assert!(result.all_similarities.is_empty());
        assert_eq!(result.accepted(0.0), None);
    }

    #[test]
    fn test_find_best_match_picks_maximum() {
        // Offsets chosen so similarities are 0.3, 0.75, 0.55.
        let query = vec![0.0f32; 4];
        let templates = vec![
            template("a", vec![0.7; 4]),
            template("b", vec![0.25; 4]),
            template("c", vec![0.45; 4]),
        ];
        let result = find_best_match(&query, &templates);
        assert_eq!(result.all_similarities.len(), 3);
        assert!((result.all_similarities[0] - 0.3).abs() < 1e-5);
        assert!((result.all_similarities[1] - 0.75).abs() < 1e-5);
        assert!((result.all_similarities[2] - 0.55).abs() < 1e-5);
        assert_eq!(result.matched_index, Some(1));
        assert!((result.best_similarity - 0.75).abs() < 1e-5);
        assert_eq!(result.accepted(0.6), Some(1));
        assert_eq!(result.accepted(0.8), None);
    }

    #[test]
    fn test_find_best_match_scores_every_template() {
        // Best match last: every template still appears in the similarity list.
        let query = vec![1.0, 0.0, 0.0];
        let templates = vec![
            template("x", vec![0.0, 1.0, 0.0]),
            template("y", vec![0.0, 0.0, 1.0]),
            template("z", vec![1.0, 0.0, 0.0]),
        ];
        let result = find_best_match_with(&CosineMatcher, &query, &templates);
        assert_eq!(result.all_similarities.len(), 3);
        assert_eq!(result.matched_index, Some(2));
        assert!((result.best_similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("Cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert_eq!("euclidean".parse::<Metric>().unwrap(), Metric::Euclidean);
        assert!("manhattan".parse::<Metric>().is_err());
    }
}
