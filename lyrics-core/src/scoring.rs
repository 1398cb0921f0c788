//! Weighted string-similarity scoring used to rank upstream search
//! results against the caller's query. Self-contained per the exact
//! formula in the design doc; no corpus example implements this
//! directly.

const SONG_WEIGHT: f64 = 0.50;
const ARTIST_WEIGHT: f64 = 0.375;
const ALBUM_WEIGHT: f64 = 0.125;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub song_id: String,
    pub song_name: String,
    pub artist_name: String,
    pub album_name: String,
    pub duration_millis: i64,
}

#[derive(Debug, Clone)]
pub struct Query {
    pub song: String,
    pub artist: String,
    pub album: String,
    pub target_duration_millis: i64,
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn char_overlap(a: &str, b: &str) -> f64 {
    let mut counts_a = std::collections::HashMap::new();
    for c in a.chars() {
        *counts_a.entry(c).or_insert(0usize) += 1;
    }
    let mut overlap = 0usize;
    let mut counts_b = std::collections::HashMap::new();
    for c in b.chars() {
        *counts_b.entry(c).or_insert(0usize) += 1;
    }
    for (c, count_a) in &counts_a {
        let count_b = counts_b.get(c).copied().unwrap_or(0);
        overlap += (*count_a).min(count_b);
    }
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        0.0
    } else {
        2.0 * overlap as f64 / total as f64
    }
}

fn field_similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    if a.contains(&b) || b.contains(&a) {
        let (shorter, longer) = if a.len() <= b.len() { (a.len(), b.len()) } else { (b.len(), a.len()) };
        return 0.7 + 0.3 * (shorter as f64 / longer as f64);
    }
    char_overlap(&a, &b)
}

fn weighted_score(query: &Query, candidate: &Candidate) -> f64 {
    field_similarity(&query.song, &candidate.song_name) * SONG_WEIGHT
        + field_similarity(&query.artist, &candidate.artist_name) * ARTIST_WEIGHT
        + field_similarity(&query.album, &candidate.album_name) * ALBUM_WEIGHT
}

/// Filters candidates by duration delta, scores the survivors, and
/// returns the best match if it clears `min_score`.
pub fn best_match<'a>(
    query: &Query,
    candidates: &'a [Candidate],
    duration_delta_ms: i64,
    min_score: f64,
) -> Option<&'a Candidate> {
    candidates
        .iter()
        .filter(|c| (c.duration_millis - query.target_duration_millis).abs() <= duration_delta_ms)
        .map(|c| (c, weighted_score(query, c)))
        .filter(|(_, score)| *score >= min_score)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(song: &str, artist: &str, album: &str, duration: i64) -> Candidate {
        Candidate {
            song_id: "1".into(),
            song_name: song.into(),
            artist_name: artist.into(),
            album_name: album.into(),
            duration_millis: duration,
        }
    }

    #[test]
    fn exact_match_scores_one() {
        let query = Query {
            song: "Yesterday".into(),
            artist: "The Beatles".into(),
            album: "Help!".into(),
            target_duration_millis: 125000,
        };
        let candidates = vec![candidate("Yesterday", "The Beatles", "Help!", 125000)];
        let result = best_match(&query, &candidates, 2000, 0.5).unwrap();
        assert_eq!(result.song_id, "1");
    }

    #[test]
    fn duration_mismatch_excludes_candidate() {
        let query = Query {
            song: "Yesterday".into(),
            artist: "The Beatles".into(),
            album: "Help!".into(),
            target_duration_millis: 125000,
        };
        let candidates = vec![candidate("Yesterday", "The Beatles", "Help!", 200000)];
        assert!(best_match(&query, &candidates, 2000, 0.5).is_none());
    }

    #[test]
    fn low_similarity_is_rejected() {
        let query = Query {
            song: "Completely Unrelated Title".into(),
            artist: "Nobody".into(),
            album: "Nothing".into(),
            target_duration_millis: 100000,
        };
        let candidates = vec![candidate("Yesterday", "The Beatles", "Help!", 100500)];
        assert!(best_match(&query, &candidates, 2000, 0.5).is_none());
    }

    #[test]
    fn best_of_several_candidates_wins() {
        let query = Query {
            song: "Yesterday".into(),
            artist: "The Beatles".into(),
            album: "Help!".into(),
            target_duration_millis: 125000,
        };
        let candidates = vec![
            candidate("Yesterday (Live)", "The Beatles Tribute", "Covers", 125000),
            candidate("Yesterday", "The Beatles", "Help!", 125500),
        ];
        let result = best_match(&query, &candidates, 2000, 0.3).unwrap();
        assert_eq!(result.artist_name, "The Beatles");
    }
}
