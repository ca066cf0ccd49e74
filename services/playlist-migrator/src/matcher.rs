//!
//! src/matcher.rs
//!
//! Turns a source track into a search query, scores every candidate the
//! catalog returns and keeps the best one. Similarity is a token overlap
//! heuristic, not an edit distance
//!

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;

use crate::catalog::TrackSearch;
use crate::config::ScoringConfig;
use crate::errors::MigrateError;
use crate::types::{CandidateTrack, MatchResult, SourceTrack};

/// Upload decorations that only hurt the search
static NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(\s*official\s+(?:music\s+)?(?:video|audio)\s*\)|\(\s*lyrics\s*\)|\[[^\]]*\]")
        .expect("noise pattern compiles")
});

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn build_query(track: &SourceTrack) -> String {
    let raw = if track.has_known_artist() {
        format!("{} {}", track.artist, track.title)
    } else {
        track.title.clone()
    };
    collapse_whitespace(&NOISE.replace_all(&raw, " "))
}

/// Keeps alphanumerics and whitespace, collapses runs of whitespace, lowercases
pub fn normalize(s: &str) -> String {
    let kept: String = s.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    collapse_whitespace(&kept).to_lowercase()
}

pub fn string_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let (na, nb) = (normalize(a), normalize(b));
    if na == nb {
        return 0.95;
    }
    // an empty side would "contain" in every string
    if !na.is_empty() && !nb.is_empty() && (na.contains(&nb) || nb.contains(&na)) {
        return 0.9;
    }

    let wa: HashSet<&str> = na.split_whitespace().collect();
    let wb: HashSet<&str> = nb.split_whitespace().collect();
    let total = wa.len() + wb.len();
    if total == 0 {
        return 0.0;
    }
    let shared = wa.intersection(&wb).count();
    (2 * shared) as f64 / total as f64
}

pub fn duration_similarity(a_secs: u32, b_secs: u32, scoring: &ScoringConfig) -> f64 {
    let delta = a_secs.abs_diff(b_secs);
    if delta < scoring.duration_close_secs {
        1.0
    } else if delta < scoring.duration_near_secs {
        0.8
    } else {
        0.5
    }
}

/// Confidence in 0..=100 that `candidate` is the same recording as `source`
pub fn score_candidate(
    source: &SourceTrack,
    candidate: &CandidateTrack,
    scoring: &ScoringConfig
) -> u8 {
    let title = string_similarity(
        &source.title.to_lowercase(), &candidate.title.to_lowercase());
    let artist = string_similarity(
        &source.artist.to_lowercase(), &candidate.artist_line().to_lowercase());

    let blended = match source.duration_seconds {
        Some(secs) => {
            let duration = duration_similarity(secs, candidate.duration_seconds, scoring);
            title * scoring.title_weight
                + artist * scoring.artist_weight
                + duration * scoring.duration_weight
        }
        None => {
            title * (scoring.title_weight + scoring.duration_weight)
                + artist * scoring.artist_weight
        }
    };

    (blended * 100.0).round().clamp(0.0, 100.0) as u8
}

/// First candidate with the highest confidence, in retrieval order
pub fn best_candidate(
    source: &SourceTrack,
    candidates: Vec<CandidateTrack>,
    scoring: &ScoringConfig
) -> Option<(CandidateTrack, u8)> {
    let mut best: Option<(CandidateTrack, u8)> = None;
    for candidate in candidates {
        let confidence = score_candidate(source, &candidate, scoring);
        match &best {
            Some((_, top)) if confidence <= *top => {}
            _ => best = Some((candidate, confidence)),
        }
    }
    best
}

pub struct Matcher {
    search: Arc<dyn TrackSearch>,
    scoring: ScoringConfig,
}

impl Matcher {
    pub fn new(search: Arc<dyn TrackSearch>, scoring: ScoringConfig) -> Self {
        Self { search, scoring }
    }

    /// `None` means no candidates came back, which callers skip silently
    pub async fn match_one(&self, source: &SourceTrack) ->
        Result<Option<MatchResult>, MigrateError> {
        let query = build_query(source);
        let candidates = self.search.search(&query).await?;
        if candidates.is_empty() {
            debug!(track = %source.id, query = %query, "match.no_candidates");
            return Ok(None);
        }

        let Some((candidate, confidence)) = best_candidate(source, candidates, &self.scoring)
        else {
            return Ok(None);
        };
        let result = MatchResult::new(source.clone(), candidate, confidence);
        debug!(
            track = %source.id, candidate = %result.candidate.id,
            confidence, tier = result.tier.as_str(), "match.scored"
        );
        Ok(Some(result))
    }
}
