//! Per-connection player entity and its physics step

use shared::PlayerRecord;

/// Columns a player scrolls forward every tick
pub const FORWARD_SPEED: u32 = 1;
/// Downward acceleration per tick while the jetpack is off (rows grow downward)
pub const GRAVITY: f32 = 0.5;
/// Upward acceleration per tick while the jetpack is on
pub const JET_ACCELERATION: f32 = -0.5;
/// Vertical speed limit in rows per tick, both directions
pub const MAX_VELOCITY: f32 = 1.0;

/// One simulated player
///
/// Positions are tile coordinates. `x` only ever grows; `y` is left
/// unclamped by [`PlayerAgent::step`] and kept inside the map by the
/// session after every step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerAgent {
    pub player_number: u8,
    pub x: u32,
    pub y: i32,
    pub velocity: f32,
    pub score: u16,
    pub jetpack_active: bool,
}

impl PlayerAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places the player at the start of a round
    pub fn spawn(&mut self, player_number: u8, row: i32) {
        self.player_number = player_number;
        self.x = 0;
        self.y = row;
        self.velocity = 0.0;
        self.score = 0;
    }

    /// Advances the player by one tick
    pub fn step(&mut self) {
        self.x = self.x.saturating_add(FORWARD_SPEED);

        self.velocity += if self.jetpack_active {
            JET_ACCELERATION
        } else {
            GRAVITY
        };
        self.velocity = self.velocity.clamp(-MAX_VELOCITY, MAX_VELOCITY);

        // Whole rows only; fractional velocity accumulates over ticks
        self.y += self.velocity.trunc() as i32;
    }

    pub fn add_score(&mut self) {
        self.score = self.score.saturating_add(1);
    }

    /// Wire representation used in GameState broadcasts
    pub fn record(&self) -> PlayerRecord {
        PlayerRecord {
            player_number: self.player_number,
            x: u16::try_from(self.x).unwrap_or(u16::MAX),
            y: u16::try_from(self.y.max(0)).unwrap_or(u16::MAX),
            score: self.score,
            jetpack_active: self.jetpack_active,
        }
    }
}
