use serde::{Deserialize, Serialize};

/// Artist placeholder for source items whose title carries no artist
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

pub const TIER_HIGH: u8 = 90;
pub const TIER_MEDIUM: u8 = 70;

/// A video pulled from the source playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTrack {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub duration_seconds: Option<u32>,
    pub thumbnail: Option<String>,
}

impl SourceTrack {
    pub fn has_known_artist(&self) -> bool {
        self.artist != UNKNOWN_ARTIST
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePlaylist {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub item_count: u32,
    pub creator: String,
    pub tracks: Vec<SourceTrack>,
}

/// A track returned by a target catalog search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTrack {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration_seconds: u32,
    pub uri: String,
    pub thumbnail: Option<String>,
}

impl CandidateTrack {
    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    High,
    Medium,
    Low,
}

impl Tier {
    pub fn from_confidence(confidence: u8) -> Self {
        if confidence >= TIER_HIGH {
            Tier::High
        } else if confidence >= TIER_MEDIUM {
            Tier::Medium
        } else {
            Tier::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::High   => "high",
            Tier::Medium => "medium",
            Tier::Low    => "low",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub id: String,
    pub source: SourceTrack,
    pub candidate: CandidateTrack,
    pub confidence: u8,
    pub tier: Tier,
}

impl MatchResult {
    pub fn new(source: SourceTrack, candidate: CandidateTrack, confidence: u8) -> Self {
        let confidence = confidence.min(100);
        Self {
            id: format!("{}-{}", source.id, candidate.id),
            tier: Tier::from_confidence(confidence),
            source,
            candidate,
            confidence,
        }
    }
}

/// OAuth credential for the target service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at_ms: i64,
}

impl Credential {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    pub playlist_id: String,
    pub title: String,
    pub track_count: usize,
    pub average_confidence: u8,
    pub tiers: TierCounts,
    pub url: String,
}
