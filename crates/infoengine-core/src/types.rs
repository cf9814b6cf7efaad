use serde::{Deserialize, Serialize};

/// A detected face in photo pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Eyes, nose tip and mouth corners, in that order.
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Name of the recognition model, when known.
    pub model_version: Option<String>,
}

/// How two embeddings are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cosine similarity`, in [0, 2].
    #[default]
    Cosine,
    /// Plain L2 distance.
    Euclidean,
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    /// Cosine of the angle between the two vectors, 0 if either is zero.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let (dot, self_sq, other_sq) = self
            .values
            .iter()
            .zip(&other.values)
            .fold((0.0f32, 0.0f32, 0.0f32), |(d, s, o), (x, y)| (d + x * y, s + x * x, o + y * y));

        let norms = (self_sq * other_sq).sqrt();
        if norms == 0.0 {
            return 0.0;
        }
        dot / norms
    }

    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        let sum_sq: f32 = self.values.iter().zip(&other.values).map(|(x, y)| (x - y) * (x - y)).sum();
        sum_sq.sqrt()
    }

    /// Distance under `metric`. Lower = more similar.
    ///
    /// Vectors of different length (or empty ones) are not comparable and
    /// come back as infinitely far apart, so they never pass a threshold.
    pub fn distance(&self, other: &Embedding, metric: DistanceMetric) -> f32 {
        if self.values.is_empty() || self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        match metric {
            DistanceMetric::Cosine => 1.0 - self.similarity(other),
            DistanceMetric::Euclidean => self.euclidean_distance(other),
        }
    }
}

/// One stored embedding, keyed by the owning person's id.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub id: i64,
    pub embedding: Embedding,
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the selected entry, or `f32::INFINITY` for an empty gallery.
    pub distance: f32,
    /// ID of the matched entry (if any).
    pub entry_id: Option<i64>,
}

impl MatchResult {
    fn no_match(distance: f32) -> Self {
        Self { matched: false, distance, entry_id: None }
    }
}

/// Strategy for comparing a query embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, query: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult;
}

/// Which entry wins when several fall under the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// First entry in gallery order whose distance is under the threshold.
    #[default]
    First,
    /// Entry with the smallest distance, if under the threshold.
    Closest,
}

impl MatchPolicy {
    pub fn matcher(self, metric: DistanceMetric) -> Box<dyn Matcher> {
        match self {
            MatchPolicy::First => Box::new(FirstMatcher { metric }),
            MatchPolicy::Closest => Box::new(ClosestMatcher { metric }),
        }
    }
}

impl std::str::FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "closest" => Ok(Self::Closest),
            other => Err(format!("unknown match policy: {other}")),
        }
    }
}

/// Linear scan that stops at the first entry under the threshold.
///
/// A later entry that is closer never replaces an earlier hit.
pub struct FirstMatcher {
    pub metric: DistanceMetric,
}

impl Matcher for FirstMatcher {
    fn compare(&self, query: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult {
        let mut best = f32::INFINITY;

        for entry in gallery {
            let dist = query.distance(&entry.embedding, self.metric);
            if dist < threshold {
                return MatchResult {
                    matched: true,
                    distance: dist,
                    entry_id: Some(entry.id),
                };
            }
            best = best.min(dist);
        }

        MatchResult::no_match(best)
    }
}

/// Full scan returning the closest entry.
pub struct ClosestMatcher {
    pub metric: DistanceMetric,
}

impl Matcher for ClosestMatcher {
    fn compare(&self, query: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult {
        // `min_by` keeps the earliest of equal distances.
        let closest = gallery
            .iter()
            .map(|entry| (entry.id, query.distance(&entry.embedding, self.metric)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match closest {
            Some((id, distance)) if distance < threshold => MatchResult {
                matched: true,
                distance,
                entry_id: Some(id),
            },
            Some((_, distance)) => MatchResult::no_match(distance),
            None => MatchResult::no_match(f32::INFINITY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry { id, embedding: Embedding::new(values) }
    }

    #[test]
    fn test_cosine_same_direction() {
        let a = Embedding::new(vec![0.5, 0.0, 0.5]);
        let b = Embedding::new(vec![2.0, 0.0, 2.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
        assert!(a.distance(&b, DistanceMetric::Cosine).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_perpendicular() {
        let a = Embedding::new(vec![3.0, 0.0]);
        let b = Embedding::new(vec![0.0, -2.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
        assert!((a.distance(&b, DistanceMetric::Cosine) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_with_zero_vector_is_zero() {
        let zero = Embedding::new(vec![0.0, 0.0]);
        let unit = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(zero.similarity(&unit), 0.0);
        assert_eq!(zero.distance(&unit, DistanceMetric::Cosine), 1.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.distance(&b, DistanceMetric::Euclidean) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_metric_and_policy_parse() {
        assert_eq!("Cosine".parse::<DistanceMetric>(), Ok(DistanceMetric::Cosine));
        assert_eq!("euclidean".parse::<DistanceMetric>(), Ok(DistanceMetric::Euclidean));
        assert!("manhattan".parse::<DistanceMetric>().is_err());
        assert_eq!(" closest ".parse::<MatchPolicy>(), Ok(MatchPolicy::Closest));
        assert!("best".parse::<MatchPolicy>().is_err());
    }

    #[test]
    fn test_first_matcher_prefers_earlier_hit() {
        // Entry 1 is under the threshold but entry 2 is an exact match.
        let query = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![
            entry(7, vec![0.0, 1.0]),
            entry(1, vec![1.0, 0.3]),
            entry(2, vec![1.0, 0.0]),
        ];

        let result = FirstMatcher { metric: DistanceMetric::Cosine }.compare(&query, &gallery, 0.6);
        assert!(result.matched);
        assert_eq!(result.entry_id, Some(1));
        assert!(result.distance > 0.0);
    }

    #[test]
    fn test_closest_matcher_scans_everything() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![
            entry(7, vec![0.0, 1.0]),
            entry(1, vec![1.0, 0.3]),
            entry(2, vec![1.0, 0.0]),
        ];

        let result = ClosestMatcher { metric: DistanceMetric::Cosine }.compare(&query, &gallery, 0.6);
        assert!(result.matched);
        assert_eq!(result.entry_id, Some(2));
        assert!(result.distance.abs() < 1e-6);
    }

    #[test]
    fn test_threshold_is_strict() {
        let query = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![entry(1, vec![3.0, 4.0])];

        for policy in [MatchPolicy::First, MatchPolicy::Closest] {
            let matcher = policy.matcher(DistanceMetric::Euclidean);
            assert!(!matcher.compare(&query, &gallery, 5.0).matched);
            assert!(matcher.compare(&query, &gallery, 5.01).matched);
        }
    }

    #[test]
    fn test_no_match_reports_best_distance() {
        let query = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![entry(1, vec![0.0, 1.0, 0.0]), entry(2, vec![-1.0, 0.0, 0.0])];

        let result = FirstMatcher { metric: DistanceMetric::Cosine }.compare(&query, &gallery, 0.6);
        assert!(!result.matched);
        assert_eq!(result.entry_id, None);
        assert!((result.distance - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_lengths_never_match() {
        // A prefix of the stored vector would be an exact cosine hit if zipped.
        let query = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![entry(1, vec![1.0, 0.0, 0.0]), entry(2, vec![])];

        for metric in [DistanceMetric::Cosine, DistanceMetric::Euclidean] {
            assert_eq!(query.distance(&gallery[0].embedding, metric), f32::INFINITY);
            assert_eq!(Embedding::new(vec![]).distance(&Embedding::new(vec![]), metric), f32::INFINITY);
            for policy in [MatchPolicy::First, MatchPolicy::Closest] {
                let result = policy.matcher(metric).compare(&query, &gallery, 10.0);
                assert!(!result.matched);
                assert_eq!(result.entry_id, None);
            }
        }
    }

    #[test]
    fn test_empty_gallery() {
        let query = Embedding::new(vec![1.0, 0.0]);
        for policy in [MatchPolicy::First, MatchPolicy::Closest] {
            let result = policy.matcher(DistanceMetric::Cosine).compare(&query, &[], 0.6);
            assert!(!result.matched);
            assert_eq!(result.distance, f32::INFINITY);
        }
    }
}
