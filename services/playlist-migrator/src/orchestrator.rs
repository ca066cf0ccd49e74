//!
//! src/orchestrator.rs
//!
//! Drives the matcher over a whole playlist. Each batch fans out on its own
//! JoinSet; batches run one after another with a pacing delay in between
//!

use std::sync::Arc;

use tokio::{task::JoinSet, time::sleep};
use tracing::{debug, info, warn};

use crate::config::MatchingConfig;
use crate::matcher::Matcher;
use crate::types::{MatchResult, SourceTrack};

pub struct BatchOrchestrator {
    matcher: Arc<Matcher>,
    cfg: MatchingConfig,
}

impl BatchOrchestrator {
    pub fn new(matcher: Arc<Matcher>, cfg: MatchingConfig) -> Self {
        Self { matcher, cfg }
    }

    /// Never fails: tracks that error, panic or find nothing are left out
    pub async fn match_all(&self, tracks: &[SourceTrack]) -> Vec<MatchResult> {
        let batch_size = self.cfg.batch_size.max(1);
        let batches = tracks.len().div_ceil(batch_size);
        info!(tracks = tracks.len(), batches, batch_size, "match.start");

        let mut matches = Vec::with_capacity(tracks.len());
        for (index, batch) in tracks.chunks(batch_size).enumerate() {
            if index > 0 && !self.cfg.batch_delay.is_zero() {
                sleep(self.cfg.batch_delay).await;
            }
            debug!(batch = index, size = batch.len(), "match.batch.start");

            let mut set = JoinSet::new();
            for track in batch.iter().cloned() {
                let matcher = self.matcher.clone();
                set.spawn(async move {
                    let outcome = matcher.match_one(&track).await;
                    (track, outcome)
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((_, Ok(Some(found)))) => matches.push(found),
                    Ok((track, Ok(None))) => {
                        debug!(track = %track.id, title = %track.title, "match.unmatched");
                    }
                    Ok((track, Err(e))) => {
                        warn!(track = %track.id, title = %track.title, error = %e, "match.failed");
                    }
                    Err(e) => {
                        warn!(error = %e, "match.task.aborted");
                    }
                }
            }
        }

        info!(matched = matches.len(), total = tracks.len(), "match.done");
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TrackSearch;
    use crate::config::ScoringConfig;
    use crate::errors::MigrateError;
    use crate::types::CandidateTrack;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn track(n: usize) -> SourceTrack {
        SourceTrack {
            id: format!("yt{n}"),
            title: format!("Song {n}"),
            artist: "Artist".into(),
            duration_seconds: Some(200),
            thumbnail: None,
        }
    }

    /// Echoes the query back as a candidate; queries containing a listed
    /// marker fail, return nothing, or panic
    struct ScriptedSearch {
        fail: Vec<&'static str>,
        empty: Vec<&'static str>,
        panic: Vec<&'static str>,
        inflight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedSearch {
        fn new() -> Self {
            Self {
                fail: vec![], empty: vec![], panic: vec![],
                inflight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TrackSearch for ScriptedSearch {
        async fn search(&self, query: &str) -> Result<Vec<CandidateTrack>, MigrateError> {
            let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.inflight.fetch_sub(1, Ordering::SeqCst);

            let hit = |list: &[&str]| list.iter().any(|m| query.ends_with(m));
            if hit(&self.panic) {
                panic!("scripted panic for {query}");
            }
            if hit(&self.fail) {
                return Err(MigrateError::Http("connection reset".into()));
            }
            if hit(&self.empty) {
                return Ok(vec![]);
            }
            Ok(vec![CandidateTrack {
                id: format!("sp-{}", query.replace(' ', "-")),
                title: query.trim_start_matches("Artist ").to_string(),
                artists: vec!["Artist".into()],
                album: None,
                duration_seconds: 200,
                uri: "spotify:track:x".into(),
                thumbnail: None,
            }])
        }
    }

    fn orchestrator(search: Arc<ScriptedSearch>, batch_size: usize, delay_ms: u64) ->
        BatchOrchestrator {
        let matcher = Arc::new(Matcher::new(search, ScoringConfig::default()));
        BatchOrchestrator::new(matcher, MatchingConfig {
            batch_size,
            batch_delay: Duration::from_millis(delay_ms),
            scoring: ScoringConfig::default(),
        })
    }

    #[tokio::test]
    async fn failing_track_is_dropped_not_fatal() {
        let mut search = ScriptedSearch::new();
        search.fail.push("Song 3");
        let tracks: Vec<_> = (1..=5).map(track).collect();

        let matches = orchestrator(Arc::new(search), 5, 0).match_all(&tracks).await;
        assert_eq!(matches.len(), 4);
        assert!(matches.iter().all(|m| m.source.id != "yt3"));
    }

    #[tokio::test]
    async fn unmatched_track_shrinks_output_by_one() {
        let mut search = ScriptedSearch::new();
        search.empty.push("Song 2");
        let tracks: Vec<_> = (1..=7).map(track).collect();

        let matches = orchestrator(Arc::new(search), 3, 0).match_all(&tracks).await;
        assert_eq!(matches.len(), tracks.len() - 1);
    }

    #[tokio::test]
    async fn panicking_track_is_isolated() {
        let mut search = ScriptedSearch::new();
        search.panic.push("Song 1");
        let tracks: Vec<_> = (1..=3).map(track).collect();

        let matches = orchestrator(Arc::new(search), 3, 0).match_all(&tracks).await;
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_batch_size() {
        let search = Arc::new(ScriptedSearch::new());
        let tracks: Vec<_> = (1..=12).map(track).collect();

        let matches = orchestrator(search.clone(), 4, 0).match_all(&tracks).await;
        assert_eq!(matches.len(), 12);
        assert!(search.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn results_are_grouped_by_batch() {
        let search = Arc::new(ScriptedSearch::new());
        let tracks: Vec<_> = (1..=6).map(track).collect();

        let matches = orchestrator(search, 3, 0).match_all(&tracks).await;
        let first: Vec<_> = matches[..3].iter().map(|m| m.source.id.as_str()).collect();
        for id in ["yt1", "yt2", "yt3"] {
            assert!(first.contains(&id));
        }
    }

    #[tokio::test]
    async fn pacing_delay_runs_between_batches_only() {
        let search = Arc::new(ScriptedSearch::new());
        let tracks: Vec<_> = (1..=6).map(track).collect();

        let start = Instant::now();
        orchestrator(search, 2, 40).match_all(&tracks).await;
        // three batches -> two pauses
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn empty_input_returns_empty() {
        let matches = orchestrator(Arc::new(ScriptedSearch::new()), 5, 1000)
            .match_all(&[])
            .await;
        assert!(matches.is_empty());
    }
}
