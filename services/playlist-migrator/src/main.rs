//!
//! src/main.rs
//!
//! Command line front end for the migrator. Session state lives in a local
//! sqlite file so `login`, `callback` and `migrate` can run as separate calls
//!

use std::sync::Arc;

use clap::{Parser, Subcommand};

use playlist_migrator::config;
use playlist_migrator::logging;
use playlist_migrator::persistent::{Session, SqliteStore};
use playlist_migrator::types::MatchResult;
use playlist_migrator::{MigrateError, Migrator};

#[derive(Parser, Debug)]
#[command(name = "playlist-migrator")]
#[command(about = "Copy a YouTube playlist into a new private Spotify playlist.")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the Spotify authorization url to open in a browser
    Login,

    /// Finish authorization with the redirect the browser landed on
    Callback(CallbackArgs),

    /// Report whether a usable session exists
    Status,

    /// Fetch a YouTube playlist and list its tracks
    Inspect {
        /// YouTube playlist url
        url: String,
    },

    /// Fetch, match and write a playlist in one go
    Migrate(MigrateArgs),

    /// Forget the stored session
    Logout,
}

#[derive(Parser, Debug)]
struct CallbackArgs {
    /// Full redirect url, including code and state
    #[arg(long, conflicts_with_all = ["code", "state"], required_unless_present = "code")]
    url: Option<String>,

    /// Authorization code from the redirect
    #[arg(long, requires = "state")]
    code: Option<String>,

    /// State nonce from the redirect
    #[arg(long, requires = "code")]
    state: Option<String>,
}

#[derive(Parser, Debug)]
struct MigrateArgs {
    /// YouTube playlist url
    url: String,

    /// Name of the new playlist (default: the YouTube playlist title)
    #[arg(long)]
    title: Option<String>,

    /// Description of the new playlist
    #[arg(long)]
    description: Option<String>,

    /// List the matches and stop before anything is written to Spotify
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), MigrateError> {
    let cli  = Cli::parse();
    let cfgs = config::load_config()?;
    let _guard = logging::init_logging(&cfgs.logging)?;

    tracing::info!(
        service = "playlist-migrator",
        version = %env!("CARGO_PKG_VERSION"),
        "starting"
    );

    let store    = SqliteStore::init(&cfgs.persistence.db_url).await?;
    let migrator = Migrator::new(&cfgs, Session::new(Arc::new(store)))?;

    match cli.cmd {
        Command::Login => {
            let url = migrator.build_authorization_url().await?;
            println!("Open this url to authorize:\n{url}");
        }
        Command::Callback(args) => {
            let done = match (args.url, args.code, args.state) {
                (Some(url), _, _) => migrator.complete_authorization_from_redirect(&url).await?,
                (None, Some(code), Some(state)) =>
                    migrator.complete_authorization(&code, &state).await,
                _ => return Err(MigrateError::InvalidInput(
                    "pass --url or both --code and --state".into()
                )),
            };
            if !done {
                eprintln!("Authorization failed. Run `login` again.");
                return Err(MigrateError::Unauthenticated);
            }
            println!("Authorized.");
        }
        Command::Status => {
            if migrator.is_authenticated().await {
                println!("Logged in.");
            } else {
                println!("Not logged in.");
            }
        }
        Command::Inspect { url } => {
            let id = migrator.extract_playlist_id(&url)
                .ok_or_else(|| MigrateError::InvalidInput(format!("not a playlist url: {url}")))?;
            let playlist = migrator.fetch_playlist(&id).await?;
            println!("{} by {} ({} tracks)", playlist.title, playlist.creator, playlist.tracks.len());
            for (n, track) in playlist.tracks.iter().enumerate() {
                let duration = track.duration_seconds
                    .map(|s| format!("{}:{:02}", s / 60, s % 60))
                    .unwrap_or_else(|| "-:--".to_string());
                println!("{:>4}. {} - {} [{duration}]", n + 1, track.artist, track.title);
            }
        }
        Command::Migrate(args) => {
            let plan = migrator.plan(&args.url).await?;
            for m in &plan.matches {
                println!("{}", match_line(m));
            }
            if args.dry_run {
                println!(
                    "{} of {} tracks would be matched (dry run, nothing written)",
                    plan.matches.len(), plan.playlist.tracks.len()
                );
                return Ok(());
            }

            let report = migrator.execute(
                &plan,
                args.title.as_deref(),
                args.description.as_deref()
            ).await?;
            let result = &report.result;
            println!("{} of {} tracks matched", result.track_count, report.source_tracks);
            println!(
                "high: {}  medium: {}  low: {}",
                result.tiers.high, result.tiers.medium, result.tiers.low
            );
            println!("average confidence: {}%", result.average_confidence);
            println!("{}", result.url);
        }
        Command::Logout => {
            migrator.logout().await?;
            println!("Logged out.");
        }
    }

    Ok(())
}

fn match_line(m: &MatchResult) -> String {
    format!(
        "{:>3}% {:<6} {} - {}  ->  {} - {}",
        m.confidence, m.tier.as_str(),
        m.source.artist, m.source.title,
        m.candidate.artist_line(), m.candidate.title
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_accepts_url_or_code_and_state() {
        let cli = Cli::try_parse_from(
            ["playlist-migrator", "callback", "--url", "http://127.0.0.1:8888/callback?code=a&state=b"]
        ).unwrap();
        assert!(matches!(cli.cmd, Command::Callback(CallbackArgs { url: Some(_), .. })));

        let cli = Cli::try_parse_from(
            ["playlist-migrator", "callback", "--code", "a", "--state", "b"]
        ).unwrap();
        assert!(matches!(cli.cmd, Command::Callback(CallbackArgs { code: Some(_), state: Some(_), .. })));
    }

    #[test]
    fn callback_rejects_partial_arguments() {
        assert!(Cli::try_parse_from(["playlist-migrator", "callback"]).is_err());
        assert!(Cli::try_parse_from(["playlist-migrator", "callback", "--code", "a"]).is_err());
    }

    #[test]
    fn migrate_takes_optional_title() {
        let cli = Cli::try_parse_from(
            ["playlist-migrator", "migrate", "https://youtu.be/x?list=PL1", "--title", "Mix"]
        ).unwrap();
        match cli.cmd {
            Command::Migrate(args) => {
                assert_eq!(args.title.as_deref(), Some("Mix"));
                assert!(args.description.is_none());
                assert!(!args.dry_run);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn migrate_dry_run_flag() {
        let cli = Cli::try_parse_from(
            ["playlist-migrator", "migrate", "https://youtu.be/x?list=PL1", "--dry-run"]
        ).unwrap();
        assert!(matches!(cli.cmd, Command::Migrate(MigrateArgs { dry_run: true, .. })));
    }

    #[test]
    fn match_line_shows_confidence_tier_and_both_sides() {
        use playlist_migrator::types::{CandidateTrack, SourceTrack};

        let m = MatchResult::new(
            SourceTrack {
                id: "v1".into(),
                title: "Bohemian Rhapsody".into(),
                artist: "Queen".into(),
                duration_seconds: Some(355),
                thumbnail: None,
            },
            CandidateTrack {
                id: "br".into(),
                title: "Bohemian Rhapsody".into(),
                artists: vec!["Queen".into()],
                album: None,
                duration_seconds: 355,
                uri: "spotify:track:br".into(),
                thumbnail: None,
            },
            94,
        );
        assert_eq!(
            match_line(&m),
            " 94% high   Queen - Bohemian Rhapsody  ->  Queen - Bohemian Rhapsody"
        );
    }
}
