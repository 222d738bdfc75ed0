//! Similarity ranking and vector utilities.
//!
//! [`rank`] is the one ranking routine every backend delegates to: the
//! local store runs it over its in-memory vector array, and the remote
//! store fetches its embeddings collection and applies it client-side.
//! Keeping it backend-agnostic guarantees identical ordering for
//! identical candidate sets, which the cross-backend tests rely on.
//!
//! Also provides the blob codec used by the local store's persisted
//! vector file:
//! - [`vec_to_blob`] — encode a `&[f32]` as little-endian bytes
//! - [`blob_to_vec`] — decode the bytes back into a `Vec<f32>`

/// Rank candidate vectors against a query by cosine similarity.
///
/// Returns `(candidate_index, score)` pairs:
/// - candidates scoring below `threshold` are excluded,
/// - remaining candidates are sorted by score descending; ties keep the
///   candidates' original relative order (stable sort),
/// - the result is truncated to `top_k`.
///
/// Brute force over the full candidate set — the accepted algorithm at
/// the target data scale (see the crate docs); no approximate index.
pub fn rank(
    query: &[f32],
    candidates: &[Vec<f32>],
    top_k: usize,
    threshold: f32,
) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(i, v)| (i, cosine_similarity(query, v)))
        .filter(|(_, score)| *score >= threshold)
        .collect();

    // Vec::sort_by is stable: equal scores keep insertion order.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or
/// when either operand has zero norm (rather than dividing by zero).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Encode a float vector as a blob (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a blob of `vec.len() × 4` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a blob back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_norm() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&b, &a), 0.0);
    }

    #[test]
    fn test_cosine_different_lengths() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_rank_threshold_filters() {
        // Unit query along x: candidate similarities 0.9, 0.5, 0.2 by
        // construction (x component of each unit candidate).
        let query = vec![1.0, 0.0];
        let candidates = vec![
            vec![0.9, (1.0f32 - 0.81).sqrt()],
            vec![0.5, (1.0f32 - 0.25).sqrt()],
            vec![0.2, (1.0f32 - 0.04).sqrt()],
        ];
        let result = rank(&query, &candidates, 5, 0.6);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].0, 0);
        assert!((result[0].1 - 0.9).abs() < 1e-5);
    }

    #[test]
    fn test_rank_orders_descending() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            vec![0.2, (1.0f32 - 0.04).sqrt()],
            vec![0.9, (1.0f32 - 0.81).sqrt()],
            vec![0.5, (1.0f32 - 0.25).sqrt()],
        ];
        let result = rank(&query, &candidates, 5, 0.0);
        let order: Vec<usize> = result.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_rank_ties_keep_original_order() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            vec![1.0, 0.0],
            vec![2.0, 0.0],
            vec![3.0, 0.0],
        ];
        let result = rank(&query, &candidates, 5, 0.0);
        let order: Vec<usize> = result.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_rank_truncates_to_top_k() {
        let query = vec![1.0, 0.0];
        let candidates = vec![vec![1.0, 0.0]; 10];
        let result = rank(&query, &candidates, 3, 0.0);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_rank_empty_candidates() {
        let query = vec![1.0, 0.0];
        assert!(rank(&query, &[], 5, 0.0).is_empty());
    }

    #[test]
    fn test_rank_deterministic_across_calls() {
        let query = vec![0.3, -0.7, 0.2];
        let candidates = vec![
            vec![0.1, 0.2, 0.3],
            vec![-0.3, 0.7, -0.2],
            vec![0.3, -0.7, 0.2],
            vec![0.0, 0.0, 0.0],
        ];
        let a = rank(&query, &candidates, 10, -1.0);
        let b = rank(&query, &candidates, 10, -1.0);
        assert_eq!(a, b);
    }
}
