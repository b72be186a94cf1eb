//! Prompt text.
//!
//! Every decision prompt ends with the same machine-readable footer:
//!
//! ```text
//! Valid targets: Alex, Bailey
//! Format: VOTE: <name>
//!
//! Your response:
//! ```

use super::session::{DecisionRequest, Task};
use crate::game::Role;

/// Rules shown to every player
pub const GAME_RULES: &str = "GAME RULES:
- The game alternates between day and night phases
- During the day: all players discuss, then vote to eliminate one suspected Mafia member
- During the night: Mafia members secretly choose a player to kill, the Doctor can protect one player
- Mafia wins when they equal or outnumber the rest of the town
- The town wins when all Mafia members are eliminated";

const THINKING: &str = "You can use <think>your private thoughts here</think> tags to reason privately. \
Other players will NOT see anything inside these tags.";

fn role_intro(request: &DecisionRequest) -> String {
    match request.role {
        Role::Mafia => format!(
            "You are {}, playing a Mafia game as a Mafia member. Your PRIMARY goal is to WIN the game.",
            request.name
        ),
        Role::Doctor => format!(
            "You are {}, playing a Mafia game as the Doctor. Your PRIMARY goal is to help the town WIN the game.",
            request.name
        ),
        Role::Villager => format!(
            "You are {}, playing a Mafia game as a Villager. Your PRIMARY goal is to WIN the game.",
            request.name
        ),
    }
}

fn role_guidance(role: Role) -> &'static str {
    match role {
        Role::Mafia => "- During the day, act like a villager and never reveal that you are Mafia\n\
                        - Never write \"ACTION: Kill\" during the day",
        Role::Doctor => "- Protect the players you believe the Mafia will target\n\
                         - Never reveal a protection during the day unless it helps the town",
        Role::Villager => "- Work out who the Mafia members are from what people say and how they vote",
    }
}

fn instruction(request: &DecisionRequest) -> (String, &'static str) {
    match &request.task {
        Task::Discuss => (
            format!(
                "It is the DAY DISCUSSION of round {}. Share your thoughts with the town in a few sentences. \
                 Do not vote yet. Add a line \"ACCUSE: <name>\" for each player you suspect and \
                 \"DEFEND: <name>\" for each player you trust.",
                request.round
            ),
            "ACCUSE: <name> / DEFEND: <name> (optional)",
        ),
        Task::Vote => (
            "It is the DAY VOTING phase. Explain your choice briefly, then end your message with your vote."
                .to_string(),
            "VOTE: <name>",
        ),
        Task::NightKill => (
            "It is NIGHT. Choose a non-Mafia player for the Mafia to kill.".to_string(),
            "ACTION: Kill <name>",
        ),
        Task::NightProtect => (
            "It is NIGHT. Choose exactly one player to protect from the Mafia.".to_string(),
            "ACTION: Protect <name>",
        ),
        Task::Confirm { candidate } => (
            format!(
                "The town has voted to eliminate {candidate}. Before the elimination is carried out, \
                 a confirmation vote is needed. If the majority agrees, {candidate} will be eliminated; \
                 otherwise no one is eliminated this round. Do you agree with eliminating {candidate}? \
                 Answer AGREE or DISAGREE with a brief reason."
            ),
            "AGREE or DISAGREE",
        ),
        Task::LastWords => (
            "The town has voted you out. Say your last words to the remaining players in one or two sentences."
                .to_string(),
            "free text",
        ),
    }
}

fn footer(request: &DecisionRequest, format: &str) -> String {
    let mut out = String::new();
    if request.task.needs_target() || request.task == Task::Discuss {
        let names: Vec<&str> = request.targets.iter().map(|t| t.name.as_str()).collect();
        out.push_str(&format!("Valid targets: {}\n", names.join(", ")));
    }
    out.push_str(&format!("Format: {format}\n"));
    out
}

/// Full prompt for one decision
pub fn build(request: &DecisionRequest, max_tokens: u32) -> String {
    let mut prompt = String::new();
    prompt.push_str(&role_intro(request));
    prompt.push_str("\n\n");
    prompt.push_str(GAME_RULES);
    prompt.push_str("\n\n");

    if request.role == Role::Mafia {
        let team = if request.teammates.is_empty() {
            "None (you are the only Mafia left)".to_string()
        } else {
            request.teammates.join(", ")
        };
        prompt.push_str(&format!("Other Mafia members: {team}\n"));
    }
    prompt.push_str(&format!("Players still alive: {}\n", request.alive.join(", ")));
    prompt.push_str(&format!("Current game state: {}\n\n", request.game_state));

    if let Some(graph) = &request.graph {
        prompt.push_str("Observed relationships between players (positive = hostile, negative = supportive):\n");
        prompt.push_str(graph);
        prompt.push_str("\n\n");
    }

    prompt.push_str(THINKING);
    prompt.push_str(&format!(
        "\nYour response is limited to {max_tokens} tokens. Be concise and focused.\n\n"
    ));
    prompt.push_str("IMPORTANT INSTRUCTIONS:\n");
    prompt.push_str(role_guidance(request.role));
    prompt.push_str("\n\n");

    prompt.push_str("Previous discussion:\n");
    if request.discussion.is_empty() {
        prompt.push_str("(nothing has been said yet)\n");
    } else {
        for line in &request.discussion {
            prompt.push_str(line);
            prompt.push('\n');
        }
    }
    prompt.push('\n');

    let (text, format) = instruction(request);
    prompt.push_str(&text);
    prompt.push('\n');
    prompt.push_str(&footer(request, format));
    prompt.push_str("\nYour response:\n");
    prompt
}

/// Instruction appended to the prompt when the first answer was unusable
pub fn corrective(request: &DecisionRequest, reason: &str) -> String {
    let (_, format) = instruction(request);
    format!(
        "\nYour previous answer could not be used: {reason}.\n\
         Answer again and follow the format exactly.\n{}",
        footer(request, format)
    )
}
