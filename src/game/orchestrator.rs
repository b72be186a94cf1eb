//! Game state machine.
//!
//! ```text
//! Setup ─> Discussion ─> Voting ─> NightAction ─> Resolution ─┬─> Discussion
//!                           │                                  └─> Terminated
//!                           └─ win after day elimination ─> Resolution
//! ```
//!
//! A [`Round`] is only committed (graph snapshot appended, record emitted)
//! once its resolution is reached. If the game is cancelled mid-round the
//! partial round is dropped and never recorded.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::names::draw_names;
use super::types::{
    ActionKind, ConfirmationTally, Elimination, EliminationCause, Faction, GameOutcome,
    OutcomeKind, Phase, Player, PlayerId, Role, Round, SurvivalRecord, TieBreak,
};
use crate::agent::{AgentSession, Decision, DecisionRequest, DecodingFailure, Target, Task};
use crate::batch::CancelToken;
use crate::config::{Config, GameConfig, GraphConfig, InferenceConfig, ReviewConfig};
use crate::error::{GameError, Result};
use crate::graph::{GraphHistory, GraphMode, GraphSerializer, RelationGraphBuilder};
use crate::inference::ModelClient;
use crate::review::{self, CriticReview};
use crate::store::{RecordKind, ResultSink, StoreRecord};

/// How model identities are handed out to seats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelAssignment {
    /// Every seat plays the same model
    Single(String),
    /// Each seat draws a model from the pool
    Pool(Vec<String>),
}

impl ModelAssignment {
    fn draw(&self, rng: &mut StdRng) -> Result<String> {
        match self {
            ModelAssignment::Single(model) => Ok(model.clone()),
            ModelAssignment::Pool(models) => models
                .choose(rng)
                .cloned()
                .ok_or_else(|| GameError::InvalidSetup("model pool is empty".to_string())),
        }
    }
}

/// Everything a game needs besides its collaborators
#[derive(Debug, Clone)]
pub struct GameSettings {
    /// Rules
    pub rules: GameConfig,
    /// Graph weights and budget
    pub graph: GraphConfig,
    /// Graph view injected into prompts
    pub mode: GraphMode,
    /// Endpoint sampling settings and timeouts
    pub inference: InferenceConfig,
    /// Seat-to-model assignment
    pub models: ModelAssignment,
    /// Post-game review
    pub review: ReviewConfig,
}

impl GameSettings {
    /// Settings from a configuration, drawing seat models from `inference.models`
    pub fn from_config(config: &Config) -> Self {
        Self {
            rules: config.game.clone(),
            graph: config.graph.clone(),
            mode: config.graph.mode,
            inference: config.inference.clone(),
            models: ModelAssignment::Pool(config.inference.models.clone()),
            review: config.review.clone(),
        }
    }

    /// Play every seat with `model`
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.models = ModelAssignment::Single(model.into());
        self
    }

    /// Inject `mode` into prompts
    pub fn with_mode(mut self, mode: GraphMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Everything a finished game produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameReport {
    /// Final outcome
    pub outcome: GameOutcome,
    /// Seats with final status
    pub players: Vec<Player>,
    /// Committed rounds in order
    pub rounds: Vec<Round>,
    /// Graph snapshots per committed round
    pub history: GraphHistory,
    /// Recoverable decoding failures across the game
    pub failures: Vec<DecodingFailure>,
    /// Critic review, when enabled
    pub review: Option<CriticReview>,
}

/// One game session
pub struct Game {
    id: Uuid,
    index: usize,
    batch_id: Uuid,
    seed: u64,
    rng: StdRng,
    settings: GameSettings,
    client: Arc<dyn ModelClient>,
    sink: Arc<dyn ResultSink>,
    cancel: CancelToken,
    players: Vec<Player>,
    sessions: HashMap<String, AgentSession>,
    serializers: HashMap<String, GraphSerializer>,
    builder: RelationGraphBuilder,
    history: GraphHistory,
    rounds: Vec<Round>,
    transcript: Vec<String>,
    failures: Vec<DecodingFailure>,
    eliminated_in: HashMap<PlayerId, u32>,
}

impl std::fmt::Debug for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("seed", &self.seed)
            .field("mode", &self.settings.mode)
            .field("rounds", &self.rounds.len())
            .finish()
    }
}

impl Game {
    /// Set up a game: draw names, shuffle roles and assign models.
    ///
    /// Everything random in the game flows from `seed`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        batch_id: Uuid,
        seed: u64,
        settings: GameSettings,
        client: Arc<dyn ModelClient>,
        sink: Arc<dyn ResultSink>,
        cancel: CancelToken,
    ) -> Result<Self> {
        check_setup(&settings.rules)?;

        let mut rng = StdRng::seed_from_u64(seed);
        let id = uuid::Builder::from_random_bytes(rng.gen()).into_uuid();

        let rules = &settings.rules;
        let names = draw_names(rules.players, &mut rng);
        let mut roles: Vec<Role> = std::iter::repeat(Role::Mafia)
            .take(rules.mafia)
            .chain(std::iter::repeat(Role::Doctor).take(rules.doctors))
            .chain(std::iter::repeat(Role::Villager).take(rules.villagers()))
            .collect();
        roles.shuffle(&mut rng);

        let mut players = Vec::with_capacity(rules.players);
        for (seat, (name, role)) in names.into_iter().zip(roles).enumerate() {
            let model = settings.models.draw(&mut rng)?;
            players.push(Player::new(PlayerId(seat), name, role, model));
        }

        let display: HashMap<PlayerId, String> =
            players.iter().map(|p| (p.id, p.name.clone())).collect();
        let mut sessions = HashMap::new();
        let mut serializers = HashMap::new();
        for player in &players {
            sessions.entry(player.model.clone()).or_insert_with(|| {
                AgentSession::from_config(client.clone(), &player.model, &settings.inference)
            });
            serializers.entry(player.model.clone()).or_insert_with(|| {
                GraphSerializer::new(settings.graph.budget_for(&player.model), display.clone())
            });
        }

        let builder = RelationGraphBuilder::new(settings.graph.weights, &players);
        let history = GraphHistory::new(players.iter().map(|p| p.id));

        Ok(Self {
            id,
            index,
            batch_id,
            seed,
            rng,
            settings,
            client,
            sink,
            cancel,
            players,
            sessions,
            serializers,
            builder,
            history,
            rounds: Vec::new(),
            transcript: Vec::new(),
            failures: Vec::new(),
            eliminated_in: HashMap::new(),
        })
    }

    /// Game identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Seats
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Play until a faction wins or the round limit is reached
    pub async fn run(mut self) -> Result<GameReport> {
        self.record(RecordKind::GameStarted, json!({
            "seed": self.seed,
            "mode": self.settings.mode,
            "players": self.players,
        }))?;
        tracing::info!(
            game_id = %self.id,
            players = self.players.len(),
            mode = %self.settings.mode,
            "game started"
        );

        let max_rounds = self.settings.rules.max_rounds;
        let mut winner = None;
        let mut played = 0;

        while played < max_rounds && winner.is_none() {
            played += 1;
            let mut round = Round::open(played);

            self.discussion(&mut round).await?;
            round.advance(Phase::Voting)?;
            self.voting(&mut round).await?;

            winner = self.winner();
            if winner.is_none() {
                round.advance(Phase::NightAction)?;
                self.night(&mut round).await?;
                winner = self.winner();
            }

            self.commit(round)?;
        }

        let kind = if winner.is_some() {
            OutcomeKind::Decided
        } else {
            tracing::info!(game_id = %self.id, rounds = played, "round limit reached");
            OutcomeKind::Timeout
        };
        let outcome = GameOutcome {
            game_id: self.id,
            kind,
            winner,
            rounds: played,
            seed: self.seed,
            survivors: self.survivors(),
        };

        let review = if self.settings.review.enabled {
            let model = self
                .settings
                .review
                .model
                .clone()
                .or_else(|| self.settings.inference.default_model().map(str::to_string))
                .unwrap_or_else(|| self.players[0].model.clone());
            let timeout = self.settings.inference.timeout_for(&model);
            Some(review::review_game(self.client.as_ref(), &model, timeout, &self.transcript, &outcome).await)
        } else {
            None
        };

        self.record(RecordKind::GameFinished, json!({
            "outcome": outcome,
            "decoding_failures": self.failures.len(),
            "review": review,
        }))?;
        tracing::info!(
            game_id = %self.id,
            winner = ?outcome.winner,
            rounds = outcome.rounds,
            "game finished"
        );

        Ok(GameReport {
            outcome,
            players: self.players,
            rounds: self.rounds,
            history: self.history,
            failures: self.failures,
            review,
        })
    }

    async fn discussion(&mut self, round: &mut Round) -> Result<()> {
        let mut order = self.alive_ids();
        if self.settings.rules.shuffle_turn_order {
            order.shuffle(&mut self.rng);
        }

        for pid in order {
            let decision = self.ask(pid, Task::Discuss, round).await?;
            self.speak(round, pid, &decision.text)?;
            for target in decision.accusations {
                round.record_action(pid, target, ActionKind::Accuse)?;
            }
            for target in decision.defenses {
                round.record_action(pid, target, ActionKind::Defend)?;
            }
        }
        Ok(())
    }

    async fn voting(&mut self, round: &mut Round) -> Result<()> {
        for pid in self.alive_ids() {
            let decision = self.ask(pid, Task::Vote, round).await?;
            self.speak(round, pid, &decision.text)?;
            if let Some(target) = decision.target {
                round.record_action(pid, target, ActionKind::Eliminate)?;
            }
        }

        let mut tally: BTreeMap<PlayerId, usize> = BTreeMap::new();
        for vote in round.actions(ActionKind::Eliminate) {
            *tally.entry(vote.target).or_default() += 1;
        }
        let Some(top) = tally.values().copied().max() else {
            round.outcome.push_str("Nobody voted. ");
            return Ok(());
        };
        let leaders: Vec<PlayerId> = tally
            .iter()
            .filter(|(_, count)| **count == top)
            .map(|(pid, _)| *pid)
            .collect();

        let candidate = match (leaders.as_slice(), self.settings.rules.tie_break) {
            ([single], _) => *single,
            (_, TieBreak::Random) => match leaders.choose(&mut self.rng) {
                Some(pid) => *pid,
                None => return Ok(()),
            },
            (_, TieBreak::NoElimination) => {
                round.outcome.push_str("The vote was tied; nobody was eliminated. ");
                return Ok(());
            },
        };

        if self.settings.rules.confirmation_vote {
            let tally = self.confirm(candidate, round).await?;
            let confirmed = tally.confirmed();
            round.confirmation = Some(tally);
            if !confirmed {
                let name = self.name(candidate);
                round
                    .outcome
                    .push_str(&format!("The town declined to eliminate {name}. "));
                return Ok(());
            }
        }

        self.eliminate(round, candidate, EliminationCause::Vote);
        if self.settings.rules.last_words {
            let decision = self.ask(candidate, Task::LastWords, round).await?;
            self.speak(round, candidate, &decision.text)?;
        }
        Ok(())
    }

    async fn confirm(&mut self, candidate: PlayerId, round: &mut Round) -> Result<ConfirmationTally> {
        let task = Task::Confirm {
            candidate: self.name(candidate),
        };
        let mut tally = ConfirmationTally {
            candidate: Some(candidate),
            ..ConfirmationTally::default()
        };
        for pid in self.alive_ids().into_iter().filter(|p| *p != candidate) {
            let decision = self.ask(pid, task.clone(), round).await?;
            if decision.agree {
                tally.agree.push(pid);
            } else {
                tally.disagree.push(pid);
            }
        }
        Ok(tally)
    }

    async fn night(&mut self, round: &mut Round) -> Result<()> {
        let mut kills: BTreeMap<PlayerId, usize> = BTreeMap::new();
        for pid in self.alive_with(Role::Mafia) {
            let decision = self.ask(pid, Task::NightKill, round).await?;
            if !decision.text.is_empty() {
                round.record_utterance(pid, decision.text)?;
            }
            if let Some(target) = decision.target {
                round.record_action(pid, target, ActionKind::NightKill)?;
                *kills.entry(target).or_default() += 1;
            }
        }

        for pid in self.alive_with(Role::Doctor) {
            let decision = self.ask(pid, Task::NightProtect, round).await?;
            if let Some(target) = decision.target {
                round.record_action(pid, target, ActionKind::NightProtect)?;
                round.protected.push(target);
            }
        }

        // Most mafia votes wins; ties go to the lowest seat
        let mut target = None;
        let mut best = 0;
        for (pid, count) in &kills {
            if *count > best {
                best = *count;
                target = Some(*pid);
            }
        }
        round.night_target = target;

        match target {
            Some(victim) if round.protected.contains(&victim) => {
                tracing::debug!(game_id = %self.id, victim = %victim, "night kill prevented");
                round.outcome.push_str("Nobody died during the night. ");
            },
            Some(victim) => self.eliminate(round, victim, EliminationCause::NightKill),
            None => round.outcome.push_str("The night passed quietly. "),
        }
        Ok(())
    }

    fn commit(&mut self, mut round: Round) -> Result<()> {
        round.close();
        let snapshot = self.builder.round_graph(round.events());
        self.history.push(snapshot.clone());

        self.record(RecordKind::RoundCommitted, json!({
            "round": round,
            "graph": snapshot,
            "cumulative": self.history.cumulative(),
        }))?;
        tracing::info!(
            game_id = %self.id,
            round = round.index,
            events = round.events().len(),
            edges = snapshot.edge_count(),
            eliminated = round.eliminations.len(),
            "round committed"
        );
        self.rounds.push(round);
        Ok(())
    }

    async fn ask(&mut self, pid: PlayerId, task: Task, round: &Round) -> Result<Decision> {
        if self.cancel.is_cancelled() {
            tracing::debug!(game_id = %self.id, round = round.index, "cancelled, dropping round");
            return Err(GameError::Cancelled);
        }

        let request = self.request(pid, task, round)?;
        let session = self
            .sessions
            .get(&self.player(pid)?.model)
            .cloned()
            .ok_or_else(|| GameError::Internal(format!("no session for {pid}")))?;

        let decision = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                tracing::debug!(game_id = %self.id, round = round.index, "cancelled mid-call, dropping round");
                return Err(GameError::Cancelled);
            },
            decision = session.decide(&request, &mut self.rng) => decision,
        };
        self.failures.extend(decision.failures.iter().cloned());
        Ok(decision)
    }

    fn request(&self, pid: PlayerId, task: Task, round: &Round) -> Result<DecisionRequest> {
        let me = self.player(pid)?;
        let alive: Vec<&Player> = self.players.iter().filter(|p| p.alive).collect();

        let targets = match task {
            Task::Discuss | Task::Vote => alive
                .iter()
                .filter(|p| p.id != pid)
                .map(|p| Target::new(p.id, p.name.clone()))
                .collect(),
            Task::NightKill => alive
                .iter()
                .filter(|p| p.role != Role::Mafia)
                .map(|p| Target::new(p.id, p.name.clone()))
                .collect(),
            Task::NightProtect => alive.iter().map(|p| Target::new(p.id, p.name.clone())).collect(),
            Task::Confirm { .. } | Task::LastWords => Vec::new(),
        };

        let teammates = if me.role == Role::Mafia {
            alive
                .iter()
                .filter(|p| p.role == Role::Mafia && p.id != pid)
                .map(|p| p.name.clone())
                .collect()
        } else {
            Vec::new()
        };

        let limit = self.settings.rules.discussion_history_limit;
        let skip = self.transcript.len().saturating_sub(limit);
        let graph = match self.settings.mode {
            GraphMode::None => None,
            mode => self.serializers.get(&me.model).and_then(|serializer| {
                let live = self.builder.round_graph(round.events());
                serializer.render_mode(mode, &live, &self.history)
            }),
        };

        Ok(DecisionRequest {
            round: round.index,
            task,
            player: pid,
            name: me.name.clone(),
            role: me.role,
            teammates,
            alive: alive.iter().map(|p| p.name.clone()).collect(),
            targets,
            game_state: self.game_state(round),
            discussion: self.transcript[skip..].to_vec(),
            graph,
        })
    }

    fn game_state(&self, round: &Round) -> String {
        let alive = self.players.iter().filter(|p| p.alive).count();
        let mut state = format!("Round {}. {alive} players alive.", round.index);

        let mut gone: Vec<(u32, String)> = self
            .eliminated_in
            .iter()
            .map(|(pid, r)| (*r, format!("{} (round {r})", self.name(*pid))))
            .collect();
        gone.sort();
        if !gone.is_empty() {
            let names: Vec<String> = gone.into_iter().map(|(_, s)| s).collect();
            state.push_str(&format!(" Eliminated: {}.", names.join(", ")));
        }
        for previous in &self.rounds {
            if !previous.outcome.is_empty() {
                state.push_str(&format!(" Round {}: {}", previous.index, previous.outcome.trim_end()));
            }
        }
        state
    }

    fn speak(&mut self, round: &mut Round, pid: PlayerId, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        round.record_utterance(pid, text)?;
        let line = format!("{}: {text}", self.name(pid));
        self.transcript.push(line);
        Ok(())
    }

    fn eliminate(&mut self, round: &mut Round, pid: PlayerId, cause: EliminationCause) {
        if let Some(player) = self.players.iter_mut().find(|p| p.id == pid) {
            player.alive = false;
        }
        self.eliminated_in.insert(pid, round.index);
        round.eliminations.push(Elimination { player: pid, cause });

        let name = self.name(pid);
        let text = match cause {
            EliminationCause::Vote => format!("{name} was voted out. "),
            EliminationCause::NightKill => format!("{name} was killed during the night. "),
        };
        round.outcome.push_str(&text);
        tracing::debug!(game_id = %self.id, player = %name, ?cause, "player eliminated");
    }

    /// Town wins with no mafia left; mafia wins at parity
    fn winner(&self) -> Option<Faction> {
        let mafia = self.alive_with(Role::Mafia).len();
        let town = self
            .players
            .iter()
            .filter(|p| p.alive && p.role.faction() == Faction::Town)
            .count();
        if mafia == 0 {
            Some(Faction::Town)
        } else if mafia >= town {
            Some(Faction::Mafia)
        } else {
            None
        }
    }

    fn survivors(&self) -> Vec<SurvivalRecord> {
        self.players
            .iter()
            .map(|p| SurvivalRecord {
                player: p.id,
                name: p.name.clone(),
                role: p.role,
                model: p.model.clone(),
                survived: p.alive,
                eliminated_in: self.eliminated_in.get(&p.id).copied(),
            })
            .collect()
    }

    fn record(&self, kind: RecordKind, payload: serde_json::Value) -> Result<()> {
        let record = StoreRecord::new(kind, self.batch_id, payload).for_game(self.id, self.index);
        self.sink.append(record).map_err(|e| {
            tracing::error!(game_id = %self.id, ?kind, error = %e, "results sink rejected record");
            e
        })
    }

    fn alive_ids(&self) -> Vec<PlayerId> {
        self.players.iter().filter(|p| p.alive).map(|p| p.id).collect()
    }

    fn alive_with(&self, role: Role) -> Vec<PlayerId> {
        self.players
            .iter()
            .filter(|p| p.alive && p.role == role)
            .map(|p| p.id)
            .collect()
    }

    fn player(&self, pid: PlayerId) -> Result<&Player> {
        self.players
            .get(pid.0)
            .ok_or_else(|| GameError::Internal(format!("unknown player {pid}")))
    }

    fn name(&self, pid: PlayerId) -> String {
        self.players
            .get(pid.0)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| pid.to_string())
    }
}

fn check_setup(rules: &GameConfig) -> Result<()> {
    if rules.players < 3 {
        return Err(GameError::InvalidSetup(format!(
            "need at least 3 players, got {}",
            rules.players
        )));
    }
    if rules.mafia == 0 || rules.mafia + rules.doctors > rules.players {
        return Err(GameError::InvalidSetup(format!(
            "cannot seat {} mafia and {} doctors among {} players",
            rules.mafia, rules.doctors, rules.players
        )));
    }
    if rules.mafia * 2 >= rules.players {
        return Err(GameError::InvalidSetup("mafia must start outnumbered".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::batch::CancelHandle;
    use crate::game::RoundEvent;
    use crate::inference::ScriptedClient;
    use crate::store::MemorySink;

    fn settings(players: usize, mafia: usize) -> GameSettings {
        let mut config = Config::default();
        config.game.players = players;
        config.game.mafia = mafia;
        config.game.max_rounds = 10;
        GameSettings::from_config(&config).with_model("scripted")
    }

    fn game(settings: GameSettings, client: ScriptedClient, seed: u64) -> (Game, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let game = Game::new(
            0,
            Uuid::nil(),
            seed,
            settings,
            Arc::new(client),
            sink.clone(),
            CancelToken::never(),
        )
        .unwrap();
        (game, sink)
    }

    fn prompt_line<'a>(prompt: &'a str, prefix: &str) -> &'a str {
        prompt
            .lines()
            .rev()
            .find_map(|line| line.strip_prefix(prefix))
            .map(str::trim)
            .unwrap_or_default()
    }

    fn speaker(prompt: &str) -> &str {
        prompt
            .strip_prefix("You are ")
            .and_then(|rest| rest.split(',').next())
            .unwrap_or_default()
    }

    /// Player sitting after `me` among the living
    fn next_seat(prompt: &str, me: &str) -> String {
        let alive: Vec<&str> = prompt_line(prompt, "Players still alive:").split(", ").collect();
        let seat = alive.iter().position(|name| *name == me).unwrap_or(0);
        alive[(seat + 1) % alive.len()].to_string()
    }

    /// Fixed answers per task, keyed on the prompt's `Format:` line
    #[derive(Debug, Clone, Default)]
    struct Script {
        /// Everyone votes this player; unset means a full tie round the table
        vote_for: Option<String>,
        kill: Option<String>,
        protect: Option<String>,
        agree: bool,
    }

    impl Script {
        fn client(self) -> ScriptedClient {
            ScriptedClient::new(move |request, _| {
                let prompt = &request.prompt;
                let me = speaker(prompt);
                let first = prompt_line(prompt, "Valid targets:")
                    .split(", ")
                    .next()
                    .unwrap_or_default()
                    .to_string();
                let format = prompt_line(prompt, "Format:");

                let answer = if format.starts_with("VOTE") {
                    let choice = match &self.vote_for {
                        Some(name) if name != me => name.clone(),
                        Some(_) => first,
                        None => next_seat(prompt, me),
                    };
                    format!("VOTE: {choice}")
                } else if format.starts_with("ACTION: Kill") {
                    format!("ACTION: Kill {}", self.kill.clone().unwrap_or(first))
                } else if format.starts_with("ACTION: Protect") {
                    format!("ACTION: Protect {}", self.protect.clone().unwrap_or(first))
                } else if format.starts_with("AGREE") {
                    if self.agree { "AGREE" } else { "DISAGREE" }.to_string()
                } else if format == "free text" {
                    "I was never the one you should fear. Farewell.".to_string()
                } else {
                    "I am listening carefully to everyone.".to_string()
                };
                Ok(answer)
            })
        }
    }

    /// Seats a game would get for `seed`
    fn seating(settings: &GameSettings, seed: u64) -> Vec<Player> {
        let (seated, _) = game(settings.clone(), ScriptedClient::heuristic(0), seed);
        seated.players().to_vec()
    }

    fn one_round(tie_break: TieBreak) -> GameSettings {
        let mut s = settings(5, 1);
        s.rules.max_rounds = 1;
        s.rules.tie_break = tie_break;
        s
    }

    fn first_villager(players: &[Player]) -> Player {
        players
            .iter()
            .find(|p| p.role == Role::Villager)
            .cloned()
            .unwrap()
    }

    fn voted_out(round: &Round) -> Vec<PlayerId> {
        round
            .eliminations
            .iter()
            .filter(|e| e.cause == EliminationCause::Vote)
            .map(|e| e.player)
            .collect()
    }

    #[tokio::test]
    async fn test_tied_vote_eliminates_nobody() {
        let (game, _) = game(one_round(TieBreak::NoElimination), Script::default().client(), 21);
        let report = game.run().await.unwrap();

        let round = &report.rounds[0];
        assert_eq!(round.actions(ActionKind::Eliminate).count(), 5);
        assert!(round.outcome.contains("The vote was tied; nobody was eliminated."));
        assert!(voted_out(round).is_empty());
        assert!(round.confirmation.is_none());
    }

    #[tokio::test]
    async fn test_random_tie_break_follows_seed() {
        let mut s = one_round(TieBreak::Random);
        s.rules.confirmation_vote = false;
        s.rules.last_words = false;

        let mut picks = Vec::new();
        for _ in 0..2 {
            let (game, _) = game(s.clone(), Script::default().client(), 33);
            let report = game.run().await.unwrap();
            let out = voted_out(&report.rounds[0]);
            assert_eq!(out.len(), 1);
            picks.push(out[0]);
        }
        assert_eq!(picks[0], picks[1]);
    }

    #[tokio::test]
    async fn test_doctor_protection_prevents_kill() {
        let s = one_round(TieBreak::NoElimination);
        let target = first_villager(&seating(&s, 8));
        let script = Script {
            kill: Some(target.name.clone()),
            protect: Some(target.name.clone()),
            ..Script::default()
        };

        let (game, _) = game(s, script.client(), 8);
        let report = game.run().await.unwrap();

        let round = &report.rounds[0];
        assert_eq!(round.night_target, Some(target.id));
        assert!(round.protected.contains(&target.id));
        assert!(round.eliminations.is_empty());
        assert!(round.outcome.contains("Nobody died during the night."));
        assert!(report.players[target.id.0].alive);
    }

    #[tokio::test]
    async fn test_rejected_confirmation_keeps_candidate() {
        let s = one_round(TieBreak::NoElimination);
        let candidate = first_villager(&seating(&s, 14));
        let script = Script {
            vote_for: Some(candidate.name.clone()),
            kill: None,
            protect: Some(candidate.name.clone()),
            agree: false,
        };

        let (game, _) = game(s, script.client(), 14);
        let report = game.run().await.unwrap();

        let round = &report.rounds[0];
        let tally = round.confirmation.as_ref().unwrap();
        assert_eq!(tally.candidate, Some(candidate.id));
        assert!(tally.agree.is_empty());
        assert_eq!(tally.disagree.len(), 4);
        assert!(!tally.confirmed());
        assert!(voted_out(round).is_empty());
        assert!(round
            .outcome
            .contains(&format!("The town declined to eliminate {}.", candidate.name)));
        assert!(report.players[candidate.id.0].alive);
    }

    #[tokio::test]
    async fn test_last_words_belong_to_eliminated_player() {
        let s = one_round(TieBreak::NoElimination);
        let candidate = first_villager(&seating(&s, 5));
        let script = Script {
            vote_for: Some(candidate.name.clone()),
            agree: true,
            ..Script::default()
        };

        let (game, _) = game(s, script.client(), 5);
        let report = game.run().await.unwrap();

        let round = &report.rounds[0];
        assert_eq!(voted_out(round), vec![candidate.id]);
        let farewells: Vec<PlayerId> = round
            .events()
            .iter()
            .filter_map(|event| match event {
                RoundEvent::Utterance(u) if u.content.contains("Farewell") => Some(u.speaker),
                _ => None,
            })
            .collect();
        assert_eq!(farewells, vec![candidate.id]);
        assert!(!report.players[candidate.id.0].alive);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_call() {
        let handle = CancelHandle::new();
        let sink = Arc::new(MemorySink::new());
        let client = ScriptedClient::heuristic(2).with_delay(Duration::from_secs(30));
        let game = Game::new(
            0,
            Uuid::nil(),
            4,
            settings(6, 1),
            Arc::new(client),
            sink.clone(),
            handle.token(),
        )
        .unwrap();

        let running = tokio::spawn(game.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("game stops without waiting for the model")
            .unwrap();
        assert!(matches!(result, Err(GameError::Cancelled)));
        assert!(sink.of_kind(RecordKind::RoundCommitted).is_empty());
    }

    #[test]
    fn test_setup_assigns_roles() {
        let (game, _) = game(settings(8, 2), ScriptedClient::heuristic(0), 11);
        let roles: Vec<Role> = game.players().iter().map(|p| p.role).collect();
        assert_eq!(roles.iter().filter(|r| **r == Role::Mafia).count(), 2);
        assert_eq!(roles.iter().filter(|r| **r == Role::Doctor).count(), 1);
        assert_eq!(roles.iter().filter(|r| **r == Role::Villager).count(), 5);
        assert!(game.players().iter().all(|p| p.alive && p.model == "scripted"));
    }

    #[test]
    fn test_invalid_setup_rejected() {
        let sink = Arc::new(MemorySink::new());
        let result = Game::new(
            0,
            Uuid::nil(),
            1,
            settings(4, 2),
            Arc::new(ScriptedClient::heuristic(0)),
            sink,
            CancelToken::never(),
        );
        assert!(matches!(result, Err(GameError::InvalidSetup(_))));
    }

    #[tokio::test]
    async fn test_heuristic_game_terminates_and_commits_rounds() {
        let (game, sink) = game(settings(6, 1), ScriptedClient::heuristic(5), 42);
        let report = game.run().await.unwrap();

        assert!(report.outcome.rounds >= 1 && report.outcome.rounds <= 10);
        assert_eq!(report.rounds.len() as u32, report.outcome.rounds);
        assert_eq!(report.history.len(), report.rounds.len());
        assert_eq!(
            sink.of_kind(RecordKind::RoundCommitted).len(),
            report.rounds.len()
        );
        assert_eq!(sink.of_kind(RecordKind::GameStarted).len(), 1);
        assert_eq!(sink.of_kind(RecordKind::GameFinished).len(), 1);
        if report.outcome.kind == OutcomeKind::Decided {
            assert!(report.outcome.winner.is_some());
        }
    }

    #[tokio::test]
    async fn test_round_limit_gives_timeout() {
        // Every confirmation is refused, so only night kills remove players
        let mut s = settings(6, 1);
        s.rules.max_rounds = 3;
        let (game, _) = game(s, ScriptedClient::repeat("I have no opinion."), 9);
        let report = game.run().await.unwrap();
        assert_eq!(report.outcome.kind, OutcomeKind::Timeout);
        assert_eq!(report.outcome.winner, None);
        assert_eq!(report.outcome.rounds, 3);
        assert!(report
            .outcome
            .survivors
            .iter()
            .filter(|s| s.role == Role::Mafia)
            .all(|s| s.survived));
        assert!(report.failures.iter().any(|f| f.task == "vote"));
    }

    #[tokio::test]
    async fn test_cancelled_game_commits_nothing() {
        let handle = crate::batch::CancelHandle::new();
        handle.cancel();
        let sink = Arc::new(MemorySink::new());
        let game = Game::new(
            0,
            Uuid::nil(),
            3,
            settings(6, 1),
            Arc::new(ScriptedClient::heuristic(1)),
            sink.clone(),
            handle.token(),
        )
        .unwrap();
        let result = game.run().await;
        assert!(matches!(result, Err(GameError::Cancelled)));
        assert!(sink.of_kind(RecordKind::RoundCommitted).is_empty());
    }

    #[test]
    fn test_winner_rules() {
        let (mut game, _) = game(settings(6, 1), ScriptedClient::heuristic(0), 1);
        assert_eq!(game.winner(), None);

        let mafia = game.alive_with(Role::Mafia)[0];
        game.players[mafia.0].alive = false;
        assert_eq!(game.winner(), Some(Faction::Town));

        game.players[mafia.0].alive = true;
        let town: Vec<PlayerId> = game
            .players
            .iter()
            .filter(|p| p.role != Role::Mafia)
            .map(|p| p.id)
            .collect();
        for pid in &town[..4] {
            game.players[pid.0].alive = false;
        }
        assert_eq!(game.winner(), Some(Faction::Mafia));
    }
}
