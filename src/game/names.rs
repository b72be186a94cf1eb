//! Display names handed out to players.
//!
//! Players only ever see each other by these names; model identities stay
//! hidden so that agents cannot condition on who is behind a seat.

use rand::seq::SliceRandom;
use rand::Rng;

/// Gender-neutral name pool
pub const PLAYER_NAMES: &[&str] = &[
    "Alex", "Bailey", "Casey", "Dana", "Ellis", "Finley", "Gray", "Harper", "Indigo", "Jordan",
    "Kennedy", "Logan", "Morgan", "Nico", "Parker", "Quinn", "Riley", "Sage", "Taylor", "Avery",
    "Blake", "Cameron", "Drew", "Emerson", "Frankie", "Hayden", "Jamie", "Kai", "Leighton",
    "Marley", "Noel", "Oakley", "Peyton", "Reese", "Skyler", "Tatum", "Val", "Winter", "Zion",
];

/// Draw `count` distinct names; falls back to `Player_N` once the pool runs dry
pub fn draw_names(count: usize, rng: &mut impl Rng) -> Vec<String> {
    let mut pool: Vec<&str> = PLAYER_NAMES.to_vec();
    pool.shuffle(rng);

    (0..count)
        .map(|i| match pool.get(i) {
            Some(name) => (*name).to_string(),
            None => format!("Player_{}", i + 1),
        })
        .collect()
}
