//! Post-game critic review.
//!
//! One extra model call after a game asks for a short JSON review. The review
//! is decoration: any failure (timeout, network, unparseable answer) yields a
//! fixed fallback and never affects the outcome.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::game::{Faction, GameOutcome, OutcomeKind};
use crate::inference::{CompletionRequest, ModelClient};

/// Short review of one game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticReview {
    /// Catchy title
    pub title: String,
    /// Review body
    pub content: String,
    /// Dramatic one-sentence summary
    #[serde(default = "default_one_liner")]
    pub one_liner: String,
}

fn default_one_liner() -> String {
    "A game that defies simple description!".to_string()
}

impl CriticReview {
    /// Review used when the critic could not be reached
    pub fn unavailable() -> Self {
        Self {
            title: "Game Review Unavailable".to_string(),
            content: "The critic was unable to review this game due to technical difficulties.".to_string(),
            one_liner: "Technical issues prevented our critic from delivering judgment.".to_string(),
        }
    }
}

lazy_static! {
    static ref JSON_OBJECT: Option<Regex> = Regex::new(r"(?s)\{.*\}").ok();
}

/// Build the critic prompt
pub fn prompt(transcript: &[String], outcome: &GameOutcome) -> String {
    let winner = match (outcome.kind, outcome.winner) {
        (OutcomeKind::Decided, Some(Faction::Mafia)) => "Mafia",
        (OutcomeKind::Decided, Some(Faction::Town)) => "Town",
        _ => "Nobody (round limit reached)",
    };
    let roster: Vec<String> = outcome
        .survivors
        .iter()
        .map(|s| match s.eliminated_in {
            Some(round) => format!("{} ({}, eliminated in round {round})", s.name, s.role),
            None => format!("{} ({}, survived)", s.name, s.role),
        })
        .collect();
    let tail = transcript.len().saturating_sub(20);

    format!(
        "You are a professional game critic reviewing a Mafia game played by AI language models.\n\n\
         Game summary:\n\
         - Winner: {winner}\n\
         - Number of rounds: {}\n\
         - Players: {}\n\n\
         Final moments of the discussion:\n{}\n\n\
         Write a short, entertaining review: a catchy title (max 50 characters), a concise review \
         (max 200 words) about pacing, strategic moves and blunders, and a dramatic one-sentence \
         summary (max 100 characters).\n\
         Format: JSON object with \"title\", \"content\" and \"one_liner\" fields\n",
        outcome.rounds,
        roster.join("; "),
        transcript[tail..].join("\n"),
    )
}

/// Decode the critic's answer, falling back to a plain-text review
pub fn parse_review(raw: &str) -> CriticReview {
    let found = JSON_OBJECT
        .as_ref()
        .and_then(|re| re.find(raw))
        .map(|m| m.as_str());

    if let Some(json) = found {
        if let Ok(review) = serde_json::from_str::<CriticReview>(json) {
            return review;
        }
    }

    CriticReview {
        title: "AI Mafia Game Review".to_string(),
        content: raw.chars().take(300).collect(),
        one_liner: "A game that left our critic speechless!".to_string(),
    }
}

/// Ask `model` for a review of a finished game
pub async fn review_game(
    client: &dyn ModelClient,
    model: &str,
    timeout: Duration,
    transcript: &[String],
    outcome: &GameOutcome,
) -> CriticReview {
    let request = CompletionRequest::new(model, prompt(transcript, outcome));
    match tokio::time::timeout(timeout, client.complete(&request)).await {
        Ok(Ok(raw)) => parse_review(&raw),
        Ok(Err(e)) => {
            tracing::warn!(game_id = %outcome.game_id, error = %e, "critic review failed");
            CriticReview::unavailable()
        },
        Err(_) => {
            tracing::warn!(game_id = %outcome.game_id, "critic review timed out");
            CriticReview::unavailable()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{PlayerId, Role, SurvivalRecord};
    use crate::inference::ScriptedClient;
    use uuid::Uuid;

    fn outcome() -> GameOutcome {
        GameOutcome {
            game_id: Uuid::nil(),
            kind: OutcomeKind::Decided,
            winner: Some(Faction::Town),
            rounds: 2,
            seed: 1,
            survivors: vec![SurvivalRecord {
                player: PlayerId(0),
                name: "Alex".to_string(),
                role: Role::Mafia,
                model: "m".to_string(),
                survived: false,
                eliminated_in: Some(2),
            }],
        }
    }

    #[test]
    fn test_parse_embedded_json() {
        let raw = "Sure! {\"title\": \"Quiet Town\", \"content\": \"Short and sharp.\"} Enjoy.";
        let review = parse_review(raw);
        assert_eq!(review.title, "Quiet Town");
        assert_eq!(review.one_liner, default_one_liner());
    }

    #[test]
    fn test_parse_plain_text_fallback() {
        let review = parse_review("What a game.");
        assert_eq!(review.title, "AI Mafia Game Review");
        assert_eq!(review.content, "What a game.");
    }

    #[test]
    fn test_prompt_mentions_winner_and_roles() {
        let text = prompt(&["Alex: hello".to_string()], &outcome());
        assert!(text.contains("Winner: Town"));
        assert!(text.contains("Alex (Mafia, eliminated in round 2)"));
        assert!(text.contains("Alex: hello"));
    }

    #[tokio::test]
    async fn test_review_with_heuristic_client() {
        let client = ScriptedClient::heuristic(0);
        let review = review_game(&client, "critic", Duration::from_secs(1), &[], &outcome()).await;
        assert_eq!(review.title, "A Game of Whispers");
    }

    #[tokio::test]
    async fn test_review_failure_is_not_fatal() {
        let client = ScriptedClient::queue(Vec::<String>::new());
        let review = review_game(&client, "critic", Duration::from_secs(1), &[], &outcome()).await;
        assert_eq!(review, CriticReview::unavailable());
    }
}
