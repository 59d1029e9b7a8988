//! Cosine similarity ranking.

/// A candidate with its similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored<T> {
    pub item: T,
    pub score: f32,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot_product / (norm_a * norm_b)
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Score every candidate against `query`, keep those strictly above
/// `threshold`, best first, at most `limit`.
///
/// Candidates whose vector has a different length score 0.
pub fn rank<'a, T, I>(query: &[f32], candidates: I, threshold: f32, limit: usize) -> Vec<Scored<T>>
where
    I: IntoIterator<Item = (T, &'a [f32])>,
{
    let mut results: Vec<Scored<T>> = candidates
        .into_iter()
        .filter_map(|(item, embedding)| {
            let score = cosine_similarity(query, embedding);
            (score > threshold).then_some(Scored { item, score })
        })
        .collect();

    // stable sort keeps store order among equal scores
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(limit);
    results
}
