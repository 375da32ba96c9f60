//! Exact cosine scoring over a row-major matrix of stored vectors.


/// Euclidean length of a vector.
///
/// Accumulated in f64 so large finite components do not overflow.
#[inline]
pub fn l2_norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|&v| f64::from(v) * f64::from(v))
        .sum::<f64>()
        .sqrt()
}

/// Cosine similarity between `query` and every `dimension`-wide row of
/// `matrix`.
///
/// The query is normalized once; each row is divided by its own norm. A zero
/// norm on either side scores 0.0, as does any score that is not finite.
/// Scores are clamped to [-1, 1].
#[inline]
pub fn cosine_similarities(query: &[f32], matrix: &[f32], dimension: usize) -> Vec<f32> {
    debug_assert_eq!(query.len(), dimension);
    let rows = matrix.len() / dimension;

    let query_norm = l2_norm(query);
    if query_norm == 0.0 || !query_norm.is_finite() {
        return vec![0.0; rows];
    }
    let normalized_query: Vec<f64> = query.iter().map(|&v| f64::from(v) / query_norm).collect();

    matrix
        .chunks_exact(dimension)
        .map(|row| {
            let row_norm = l2_norm(row);
            if row_norm == 0.0 || !row_norm.is_finite() {
                return 0.0;
            }
            let dot: f64 = row
                .iter()
                .zip(&normalized_query)
                .map(|(&a, &b)| f64::from(a) * b)
                .sum();
            let score = (dot / row_norm).clamp(-1.0, 1.0) as f32;
            // -0.0 would sort below 0.0 under total ordering
            if score == 0.0 || !score.is_finite() {
                0.0
            } else {
                score
            }
        })
        .collect()
}

/// Order row indices by descending score, keep those at or above
/// `threshold`, and return at most `top_k` of them.
///
/// The sort is stable, so equal scores keep insertion order. NaN scores
/// never pass the threshold, wherever they sort.
#[inline]
pub fn rank(scores: &[f32], top_k: usize, threshold: f32) -> Vec<(usize, f32)> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    order
        .into_iter()
        .map(|idx| (idx, scores[idx]))
        .filter(|&(_, score)| score >= threshold)
        .take(top_k)
        .collect()
}
