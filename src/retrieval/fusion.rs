//! Weighted Reciprocal Rank Fusion for combining ranked id lists

use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid weight configuration: weights must be non-negative and not both zero")]
    InvalidWeights,
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f32,

    /// Weight for semantic results
    pub semantic_weight: f32,

    /// Weight for keyword results
    pub keyword_weight: f32,
}

impl FusionConfig {
    pub fn new(rrf_k: f32, semantic_weight: f32, keyword_weight: f32) -> Result<Self, FusionError> {
        if semantic_weight < 0.0
            || keyword_weight < 0.0
            || semantic_weight + keyword_weight <= 0.0
        {
            return Err(FusionError::InvalidWeights);
        }

        Ok(Self {
            rrf_k,
            semantic_weight,
            keyword_weight,
        })
    }
}

/// Fuse two ranked id lists.
///
/// score(id) = sum over lists of: weight / (k + rank), rank starting at 1.
/// Ids present in both lists appear once with their contributions summed.
/// Ties keep first-seen order (semantic list first), so output is
/// deterministic for identical inputs.
pub fn reciprocal_rank_fusion(
    semantic_ids: &[String],
    keyword_ids: &[String],
    config: &FusionConfig,
) -> Vec<(String, f32)> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut fused: Vec<(String, f32)> = Vec::new();

    let weighted = [
        (semantic_ids, config.semantic_weight),
        (keyword_ids, config.keyword_weight),
    ];

    for (ids, weight) in weighted {
        for (rank, id) in ids.iter().enumerate() {
            let contribution = weight / (config.rrf_k + (rank as f32) + 1.0);
            match positions.get(id.as_str()) {
                Some(&position) => fused[position].1 += contribution,
                None => {
                    positions.insert(id.as_str(), fused.len());
                    fused.push((id.clone(), contribution));
                }
            }
        }
    }

    // Stable sort preserves first-seen order on ties
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_rrf_basic() {
        let semantic = ids(&["a", "b", "c"]);
        let keyword = ids(&["b", "a", "d"]);

        let config = FusionConfig::new(60.0, 1.0, 1.0).unwrap();
        let fused = reciprocal_rank_fusion(&semantic, &keyword, &config);

        // Union, deduplicated
        assert_eq!(fused.len(), 4);

        // Ids in both lists rank higher
        assert!(fused[0].0 == "a" || fused[0].0 == "b");
        assert!(fused[1].0 == "a" || fused[1].0 == "b");
    }

    #[test]
    fn test_rrf_weighted() {
        let config = FusionConfig::new(60.0, 0.7, 0.3).unwrap();
        let fused = reciprocal_rank_fusion(&ids(&["a"]), &ids(&["b"]), &config);

        assert_eq!(fused[0].0, "a");
        assert!((fused[0].1 - 0.7 / 61.0).abs() < 1e-6);
        assert!((fused[1].1 - 0.3 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        let config = FusionConfig::new(60.0, 0.5, 0.5).unwrap();
        let fused = reciprocal_rank_fusion(&ids(&["x"]), &ids(&["y"]), &config);
        assert_eq!(fused[0].0, "x");
        assert_eq!(fused[1].0, "y");
    }

    #[test]
    fn test_invalid_weights() {
        assert!(FusionConfig::new(60.0, -0.1, 1.0).is_err());
        assert!(FusionConfig::new(60.0, 0.0, 0.0).is_err());
        assert!(FusionConfig::new(60.0, 1.0, 0.0).is_ok());
    }
}
