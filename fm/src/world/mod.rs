//! World status parsing
//!
//! Turns the console output of [`STATUS_COMMAND`] into a [`WorldStatus`]. The
//! shard log interleaves our response with everything else the server prints,
//! so every pattern takes its last match.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::domain::{ErrorRecord, Player, WorldStatus};

/// Console command that makes the shard print season, day, phase and players
pub const STATUS_COMMAND: &str = concat!(
    "c_dumpseasons(); ",
    r#"print("Current day: " .. (TheWorld.components.worldstate.data.cycles + 1)); "#,
    r#"print("Current phase: " .. TheWorld.components.worldstate.data.phase); "#,
    "c_listallplayers()"
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldParseError {
    #[error("no world status found in console output")]
    NoWorldStatus,
}

impl WorldParseError {
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::transient(self.to_string())
    }
}

static SEASON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\[Season\] Season:\s*|:\s*)(\w+)\s*(\d+)\s*(?:,\s*Remaining:|\s*->)\s*(\d+)\s*days?")
        .expect("valid season regex")
});
static DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(Current day:|\[World State\] day:)\s*(\d+)").expect("valid day regex"));
static PHASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:Current phase:|\[World State\] phase:)\s*(\w+)").expect("valid phase regex"));
static PLAYER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d+\]\s+\((KU_[\w-]+)\)\s+(.*?)\s+<(.*?)>").expect("valid player regex"));

fn capitalize(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Parse the console response to [`STATUS_COMMAND`]
///
/// Fails only when neither a season nor a day could be found.
pub fn parse_world_status(text: &str, captured_at: DateTime<Utc>) -> Result<WorldStatus, WorldParseError> {
    debug!(len = text.len(), "parse_world_status: called");

    let mut season = None;
    let mut day = None;
    let mut days_left = None;

    if let Some(c) = SEASON.captures_iter(text).last() {
        season = Some(capitalize(&c[1]));
        day = c[2].parse::<u32>().ok().and_then(|elapsed| elapsed.checked_add(1));
        days_left = c[3].parse::<u32>().ok();
    }

    // "Current day" is already one-based; the world state log counts from zero
    if let Some(c) = DAY.captures_iter(text).last() {
        if let Ok(n) = c[2].parse::<u32>() {
            let one_based = if c[1].starts_with("Current") { Some(n) } else { n.checked_add(1) };
            if one_based.is_some() {
                day = one_based;
            }
        }
    }

    let phase = PHASE.captures_iter(text).last().map(|c| capitalize(&c[1]));

    if season.is_none() && day.is_none() {
        return Err(WorldParseError::NoWorldStatus);
    }

    // Only the most recent player dump counts; a player listed twice keeps
    // their first position and latest details
    let last_dump = text.rsplit("All players:").next().unwrap_or(text);
    let mut players: Vec<Player> = Vec::new();
    for c in PLAYER.captures_iter(last_dump) {
        let player = Player {
            id: c[1].to_string(),
            name: c[2].to_string(),
            character: c[3].to_string(),
        };
        match players.iter_mut().find(|p| p.id == player.id) {
            Some(existing) => *existing = player,
            None => players.push(player),
        }
    }

    Ok(WorldStatus {
        season: season.unwrap_or_else(|| "Unknown".to_string()),
        day: day.unwrap_or(0),
        days_left,
        phase,
        player_count: players.len(),
        players,
        captured_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "\
[00:12:01]: autumn 4 -> 16 days (20 %) cycle
[00:12:01]: Current day: 5
[00:12:01]: Current phase: dusk
[00:12:01]: All players:
[00:12:01]: [1] (KU_abc123) Alice <wilson>
[00:12:01]: [2] (KU_x-y_9) Bob the Builder <wendy>
";

    #[test]
    fn test_parse_full_response() {
        let now = Utc::now();
        let status = parse_world_status(RESPONSE, now).unwrap();
        assert_eq!(status.season, "Autumn");
        assert_eq!(status.day, 5);
        assert_eq!(status.days_left, Some(16));
        assert_eq!(status.phase.as_deref(), Some("Dusk"));
        assert_eq!(status.player_count, 2);
        assert_eq!(status.players[1].name, "Bob the Builder");
        assert_eq!(status.players[1].character, "wendy");
        assert_eq!(status.captured_at, now);
    }

    #[test]
    fn test_world_state_day_is_zero_based() {
        let text = "[Season] Season: winter 2, Remaining: 13 days\n[World State] day: 20\n";
        let status = parse_world_status(text, Utc::now()).unwrap();
        assert_eq!(status.season, "Winter");
        assert_eq!(status.day, 21);
        assert_eq!(status.days_left, Some(13));
        assert_eq!(status.phase, None);
        assert_eq!(status.player_count, 0);
    }

    #[test]
    fn test_only_latest_player_dump_counts() {
        let text = "\
Current day: 3
All players:
[1] (KU_old) Gone <wx78>
All players:
[1] (KU_new) Here <willow>
[2] (KU_new) Here <willow>
";
        let status = parse_world_status(text, Utc::now()).unwrap();
        assert_eq!(status.season, "Unknown");
        assert_eq!(status.players.len(), 1);
        assert_eq!(status.players[0].id, "KU_new");
    }

    #[test]
    fn test_latest_match_wins() {
        let text = "Current day: 3\nCurrent phase: day\nCurrent day: 4\nCurrent phase: night\n";
        let status = parse_world_status(text, Utc::now()).unwrap();
        assert_eq!(status.day, 4);
        assert_eq!(status.phase.as_deref(), Some("Night"));
    }

    #[test]
    fn test_day_at_counter_limit_does_not_overflow() {
        let text = "[Season] Season: summer 4294967295, Remaining: 3 days\n";
        let status = parse_world_status(text, Utc::now()).unwrap();
        assert_eq!(status.season, "Summer");
        assert_eq!(status.day, 0);
        assert_eq!(status.days_left, Some(3));

        let text = "[Season] Season: autumn 2, Remaining: 5 days\n[World State] day: 4294967295\n";
        let status = parse_world_status(text, Utc::now()).unwrap();
        assert_eq!(status.day, 3);
    }

    #[test]
    fn test_unrelated_output_is_an_error() {
        let err = parse_world_status("[00:00:01]: Sim paused\n", Utc::now()).unwrap_err();
        assert_eq!(err, WorldParseError::NoWorldStatus);
        assert!(!err.to_record().is_permanent());
    }

    #[test]
    fn test_status_command_runs_all_dumps() {
        assert!(STATUS_COMMAND.starts_with("c_dumpseasons()"));
        assert!(STATUS_COMMAND.ends_with("c_listallplayers()"));
    }
}
