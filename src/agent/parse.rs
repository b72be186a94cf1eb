//! Cleaning and decoding of raw model output.
//!
//! Raw text goes through [`strip_think`] and [`sanitize`] before anything is
//! recorded; decisions are then read from marker lines (`VOTE:`,
//! `ACTION: Kill`, `ACCUSE:` ...) and resolved against the legal targets.

use lazy_static::lazy_static;
use regex::Regex;

use crate::game::PlayerId;

/// A player that may be named in a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Seat
    pub id: PlayerId,
    /// Visible name
    pub name: String,
}

impl Target {
    /// Create a target
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    Think,
    UnclosedThink,
    YourResponse,
    MarkerLine,
    BlankRun,
    Vote,
    Kill,
    Protect,
    Accuse,
    Defend,
    Disagree,
    Agree,
    Refuse,
}

const PATTERNS: &[(Pattern, &str)] = &[
    (Pattern::Think, r"(?is)<think>.*?</think>"),
    (Pattern::UnclosedThink, r"(?is)<think>.*$"),
    (Pattern::YourResponse, r"(?im)^.*your response.*$\n?"),
    (Pattern::MarkerLine, r"(?im)^.*\b(?:VOTE|ACTION)\s*:.*$\n?"),
    (Pattern::BlankRun, r"\n\s*\n"),
    (Pattern::Vote, r"(?i)\bVOTE\s*:\s*\**\s*([^\n]+)"),
    (Pattern::Kill, r"(?i)\bACTION\s*:\s*\**\s*kill\s+([^\n]+)"),
    (Pattern::Protect, r"(?i)\bACTION\s*:\s*\**\s*protect\s+([^\n]+)"),
    (Pattern::Accuse, r"(?i)\bACCUSE\s*:\s*\**\s*([^\n]+)"),
    (Pattern::Defend, r"(?i)\bDEFEND\s*:\s*\**\s*([^\n]+)"),
    (Pattern::Disagree, r"(?i)\b(?:disagree|disapprove)\b"),
    (Pattern::Agree, r"(?i)\b(?:agree|yes|confirm|approve)\b"),
    (Pattern::Refuse, r"(?i)\b(?:no|reject)\b"),
];

lazy_static! {
    static ref COMPILED: Vec<(Pattern, Regex)> = PATTERNS
        .iter()
        .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (*kind, re)))
        .collect();
}

fn regex(kind: Pattern) -> Option<&'static Regex> {
    COMPILED.iter().find(|(k, _)| *k == kind).map(|(_, re)| re)
}

fn replace_all(text: &str, kind: Pattern, with: &str) -> String {
    match regex(kind) {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_string(),
    }
}

/// Remove private `<think>` blocks, including an unterminated trailing one
pub fn strip_think(text: &str) -> String {
    let closed = replace_all(text, Pattern::Think, "");
    let open = replace_all(&closed, Pattern::UnclosedThink, "");
    replace_all(&open, Pattern::BlankRun, "\n\n").trim().to_string()
}

/// Clean a response before it is shown to other players.
///
/// Cuts everything from the first line where the model starts speaking as
/// another player (`Name:` at line start), drops echoed "Your response"
/// scaffolding and, when `strip_markers` is set, removes `VOTE:`/`ACTION:`
/// lines so that discussion does not leak votes or night actions.
pub fn sanitize(text: &str, speaker: &str, others: &[String], strip_markers: bool) -> String {
    let prefixes: Vec<String> = others
        .iter()
        .filter(|name| name.as_str() != speaker)
        .map(|name| format!("{}:", name.to_lowercase()))
        .collect();

    let mut kept = Vec::new();
    for line in text.lines() {
        let lowered = line.trim_start().to_lowercase();
        if prefixes.iter().any(|p| lowered.starts_with(p.as_str())) {
            break;
        }
        kept.push(line);
    }
    let mut cleaned = replace_all(&kept.join("\n"), Pattern::YourResponse, "");
    if strip_markers {
        cleaned = replace_all(&cleaned, Pattern::MarkerLine, "");
    }

    cleaned
        .lines()
        .skip_while(|l| l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Match a raw name against the legal targets.
///
/// Accepts surrounding brackets, quotes, markdown emphasis and trailing
/// punctuation; falls back to the first word when the full string does not
/// match ("Bailey because they lied" resolves to Bailey).
pub fn resolve_name(raw: &str, targets: &[Target]) -> Option<PlayerId> {
    let trim = |s: &str| -> String {
        s.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
    };

    let full = trim(raw);
    if let Some(t) = targets.iter().find(|t| t.name.to_lowercase() == full) {
        return Some(t.id);
    }

    let first = raw.split_whitespace().next().map(trim)?;
    targets
        .iter()
        .find(|t| t.name.to_lowercase() == first)
        .map(|t| t.id)
}

fn last_capture<'t>(kind: Pattern, text: &'t str) -> Option<&'t str> {
    regex(kind)?
        .captures_iter(text)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn all_captures(kind: Pattern, text: &str) -> Vec<&str> {
    match regex(kind) {
        Some(re) => re
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect(),
        None => Vec::new(),
    }
}

/// Outcome of reading one marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// Marker present and naming a legal target
    Target(PlayerId),
    /// Marker present but the name is not a legal target
    Illegal(String),
    /// No marker at all
    Missing,
}

fn read_marker(kind: Pattern, text: &str, targets: &[Target]) -> Parsed {
    match last_capture(kind, text) {
        Some(raw) => match resolve_name(raw, targets) {
            Some(id) => Parsed::Target(id),
            None => Parsed::Illegal(raw.trim().to_string()),
        },
        None => Parsed::Missing,
    }
}

/// Last `VOTE: <name>` in the text
pub fn parse_vote(text: &str, targets: &[Target]) -> Parsed {
    read_marker(Pattern::Vote, text, targets)
}

/// Last `ACTION: Kill <name>` in the text
pub fn parse_kill(text: &str, targets: &[Target]) -> Parsed {
    read_marker(Pattern::Kill, text, targets)
}

/// Last `ACTION: Protect <name>` in the text
pub fn parse_protect(text: &str, targets: &[Target]) -> Parsed {
    read_marker(Pattern::Protect, text, targets)
}

/// Every legal `ACCUSE:` and `DEFEND:` target, in order and deduplicated
pub fn parse_stances(text: &str, targets: &[Target]) -> (Vec<PlayerId>, Vec<PlayerId>) {
    let collect = |kind| {
        let mut ids: Vec<PlayerId> = Vec::new();
        for raw in all_captures(kind, text) {
            if let Some(id) = resolve_name(raw, targets) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    };
    (collect(Pattern::Accuse), collect(Pattern::Defend))
}

/// `Some(true)` for agreement, `Some(false)` for refusal, `None` if unclear
pub fn parse_confirmation(text: &str) -> Option<bool> {
    let found = |kind| regex(kind).is_some_and(|re| re.is_match(text));
    if found(Pattern::Disagree) {
        Some(false)
    } else if found(Pattern::Agree) {
        Some(true)
    } else if found(Pattern::Refuse) {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["Alex".to_string(), "Bailey".to_string(), "Casey".to_string()]
    }

    fn targets() -> Vec<Target> {
        vec![
            Target::new(PlayerId(0), "Alex"),
            Target::new(PlayerId(1), "Bailey"),
            Target::new(PlayerId(2), "Casey"),
        ]
    }

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(COMPILED.len(), PATTERNS.len());
    }

    #[test]
    fn test_strip_think() {
        let raw = "<think>Bailey is mafia, I should hide it</think>\n\nI trust everyone.";
        assert_eq!(strip_think(raw), "I trust everyone.");
        assert_eq!(strip_think("Hello <think>never closed"), "Hello");
    }

    #[test]
    fn test_sanitize_cuts_impersonation() {
        let raw = "I think Casey is quiet.\nBailey: I agree with Alex!\nCasey: no way";
        let clean = sanitize(raw, "Alex", &names(), true);
        assert_eq!(clean, "I think Casey is quiet.");
    }

    #[test]
    fn test_sanitize_keeps_own_name_prefix() {
        let raw = "Alex: my read is that Bailey is lying.";
        assert_eq!(sanitize(raw, "Alex", &names(), true), raw);
    }

    #[test]
    fn test_sanitize_strips_markers_in_discussion() {
        let raw = "Your response:\nBailey dodged my question.\nVOTE: Bailey\nACCUSE: Bailey";
        let clean = sanitize(raw, "Alex", &names(), true);
        assert_eq!(clean, "Bailey dodged my question.\nACCUSE: Bailey");

        let kept = sanitize("Bailey dodged.\nVOTE: Bailey", "Alex", &names(), false);
        assert!(kept.contains("VOTE: Bailey"));
    }

    #[test]
    fn test_resolve_name_variants() {
        let t = targets();
        assert_eq!(resolve_name("bailey", &t), Some(PlayerId(1)));
        assert_eq!(resolve_name("[Casey].", &t), Some(PlayerId(2)));
        assert_eq!(resolve_name("**Alex**", &t), Some(PlayerId(0)));
        assert_eq!(resolve_name("Bailey because they lied", &t), Some(PlayerId(1)));
        assert_eq!(resolve_name("Dana", &t), None);
    }

    #[test]
    fn test_vote_takes_last_marker() {
        let t = targets();
        let text = "Earlier I said VOTE: Alex but now\nVOTE: Casey";
        assert_eq!(parse_vote(text, &t), Parsed::Target(PlayerId(2)));
        assert_eq!(parse_vote("**VOTE:** Bailey", &t), Parsed::Target(PlayerId(1)));
        assert_eq!(parse_vote("VOTE: Dana", &t), Parsed::Illegal("Dana".to_string()));
        assert_eq!(parse_vote("I am unsure.", &t), Parsed::Missing);
    }

    #[test]
    fn test_night_actions() {
        let t = targets();
        assert_eq!(parse_kill("ACTION: Kill Bailey", &t), Parsed::Target(PlayerId(1)));
        assert_eq!(parse_protect("action: protect casey.", &t), Parsed::Target(PlayerId(2)));
        assert_eq!(parse_kill("ACTION: Protect Casey", &t), Parsed::Missing);
    }

    #[test]
    fn test_stances() {
        let t = targets();
        let text = "ACCUSE: Bailey\nDEFEND: Casey\nACCUSE: bailey\nACCUSE: Nobody";
        let (accused, defended) = parse_stances(text, &t);
        assert_eq!(accused, vec![PlayerId(1)]);
        assert_eq!(defended, vec![PlayerId(2)]);
    }

    #[test]
    fn test_confirmation() {
        assert_eq!(parse_confirmation("AGREE - they were evasive"), Some(true));
        assert_eq!(parse_confirmation("I DISAGREE with this"), Some(false));
        assert_eq!(parse_confirmation("No, wrong person"), Some(false));
        assert_eq!(parse_confirmation("hmm"), None);
    }
}
