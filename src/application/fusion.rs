use std::collections::HashMap;

use crate::domain::Hit;

/// Smoothing constant for Reciprocal Rank Fusion. Higher values reduce the
/// weight difference between high and low-ranked items.
pub const RRF_K: f32 = 60.0;

/// Merge ranked backend lists with weighted Reciprocal Rank Fusion.
///
/// Each document (keyed by relative path) receives
/// `weight / (k + rank)` from every list it appears in; scores are summed
/// and the top `limit` documents are returned. The representative hit for a
/// document comes from the heaviest-weighted list that produced it.
pub fn rrf_fuse(lists: Vec<(Vec<Hit>, f32)>, k: f32, limit: usize) -> Vec<Hit> {
    // path → (representative hit, fused score, weight of its source list)
    let mut fused: HashMap<String, (Hit, f32, f32)> = HashMap::new();

    for (hits, weight) in lists {
        for (rank, hit) in hits.into_iter().enumerate() {
            let contribution = weight / (k + (rank + 1) as f32);
            let key = hit.relative_path.clone();
            match fused.get_mut(&key) {
                Some((representative, score, rep_weight)) => {
                    *score += contribution;
                    if weight > *rep_weight {
                        *representative = hit;
                        *rep_weight = weight;
                    }
                }
                None => {
                    fused.insert(key, (hit, contribution, weight));
                }
            }
        }
    }

    let mut merged: Vec<(Hit, f32)> = fused
        .into_values()
        .map(|(hit, score, _)| (hit, score))
        .collect();
    merged.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.relative_path.cmp(&b.0.relative_path))
    });

    merged
        .into_iter()
        .take(limit)
        .map(|(mut hit, score)| {
            hit.score = score;
            hit
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HitSource;

    fn hit(path: &str, source: HitSource) -> Hit {
        Hit::new(path, 1, 1, "snippet", 1.0, source)
    }

    #[test]
    fn test_document_in_both_lists_wins() {
        let bm25 = vec![hit("a.rs", HitSource::FtsCode), hit("b.rs", HitSource::FtsCode)];
        let vector = vec![hit("b.rs", HitSource::Vector), hit("c.rs", HitSource::Vector)];

        let fused = rrf_fuse(vec![(bm25, 0.4), (vector, 0.6)], RRF_K, 10);
        assert_eq!(fused[0].relative_path, "b.rs");
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_representative_comes_from_heavier_list() {
        let bm25 = vec![hit("a.rs", HitSource::FtsCode)];
        let vector = vec![hit("a.rs", HitSource::Vector)];

        let fused = rrf_fuse(vec![(bm25, 0.4), (vector, 0.6)], RRF_K, 10);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].source, HitSource::Vector);
    }

    #[test]
    fn test_limit_and_determinism() {
        let bm25: Vec<Hit> = (0..5)
            .map(|i| hit(&format!("{}.rs", i), HitSource::FtsCode))
            .collect();
        let fused_a = rrf_fuse(vec![(bm25.clone(), 1.0)], RRF_K, 3);
        let fused_b = rrf_fuse(vec![(bm25, 1.0)], RRF_K, 3);

        assert_eq!(fused_a.len(), 3);
        let paths_a: Vec<_> = fused_a.iter().map(|h| h.relative_path.clone()).collect();
        let paths_b: Vec<_> = fused_b.iter().map(|h| h.relative_path.clone()).collect();
        assert_eq!(paths_a, paths_b);
    }

    #[test]
    fn test_scores_are_fused_sums() {
        let bm25 = vec![hit("a.rs", HitSource::FtsCode)];
        let vector = vec![hit("a.rs", HitSource::Vector)];
        let fused = rrf_fuse(vec![(bm25, 0.4), (vector, 0.6)], RRF_K, 10);

        let expected = 0.4 / (RRF_K + 1.0) + 0.6 / (RRF_K + 1.0);
        assert!((fused[0].score - expected).abs() < 1e-6);
    }
}
