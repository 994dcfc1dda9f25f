use crate::player::PlayerAgent;
use crate::registry::ConnectionId;
use log::{debug, info};
use shared::{Collision, CollisionKind, LevelMap, PlayerRecord, Tile};
use std::collections::BTreeMap;

/// Players needed before a round can start
pub const MIN_PLAYERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Waiting,
    Started,
    /// Round over; the server broadcasts GameEnd and then calls [`Session::finish`]
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    ReachedEnd,
    Hazard,
    /// Every opponent disconnected
    Forfeit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundResult {
    pub winner: Option<u8>,
    pub reason: EndReason,
}

/// Everything one simulation tick produced, in broadcast order
#[derive(Debug, Default)]
pub struct TickReport {
    pub collisions: Vec<Collision>,
    pub state: Vec<PlayerRecord>,
    pub result: Option<RoundResult>,
}

/// The single game room: level, players and round lifecycle
///
/// Players are keyed by connection id. Ids are handed out in increasing
/// order, so iterating the map visits players in join order.
#[derive(Debug)]
pub struct Session {
    map: LevelMap,
    phase: SessionPhase,
    players: BTreeMap<ConnectionId, PlayerAgent>,
    winner: Option<u8>,
    round: u32,
    tick: u32,
}

impl Session {
    pub fn new(map: LevelMap) -> Self {
        Self {
            map,
            phase: SessionPhase::Waiting,
            players: BTreeMap::new(),
            winner: None,
            round: 0,
            tick: 0,
        }
    }

    pub fn map(&self) -> &LevelMap {
        &self.map
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Winner of the most recent round
    pub fn winner(&self) -> Option<u8> {
        self.winner
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn tick_count(&self) -> u32 {
        self.tick
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player(&self, id: ConnectionId) -> Option<&PlayerAgent> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = (&ConnectionId, &PlayerAgent)> {
        self.players.iter()
    }

    /// Row every player starts a round on
    pub fn spawn_row(&self) -> i32 {
        self.map.height().saturating_sub(3) as i32
    }

    pub fn add_player(&mut self, id: ConnectionId) {
        self.players.insert(id, PlayerAgent::new());
        debug!("Added player for connection {}", id);
    }

    /// Removes a player and applies the disconnection rules
    ///
    /// During a round, a single survivor wins by forfeit and the returned
    /// result must be announced. With nobody left the round is dropped
    /// silently and the session goes back to waiting.
    pub fn remove_player(&mut self, id: ConnectionId) -> Option<RoundResult> {
        let removed = self.players.remove(&id)?;
        debug!(
            "Removed player {} (connection {})",
            removed.player_number, id
        );

        if self.phase != SessionPhase::Started {
            return None;
        }

        match self.players.len() {
            0 => {
                info!("All players left, round {} abandoned", self.round);
                self.phase = SessionPhase::Waiting;
                self.winner = None;
                None
            }
            1 => {
                let winner = self.players.values().next().map(|p| p.player_number);
                Some(self.end_round(winner, EndReason::Forfeit))
            }
            _ => None,
        }
    }

    /// Records the latest jetpack state sent by a connection
    pub fn set_jetpack(&mut self, id: ConnectionId, active: bool) -> bool {
        match self.players.get_mut(&id) {
            Some(player) => {
                player.jetpack_active = active;
                true
            }
            None => false,
        }
    }

    /// Starts a round if the session is waiting and enough players are present
    ///
    /// Player numbers are assigned 0..N-1 in join order.
    pub fn try_start(&mut self) -> bool {
        if self.phase != SessionPhase::Waiting || self.players.len() < MIN_PLAYERS {
            return false;
        }

        let row = self.spawn_row();
        for (number, player) in self.players.values_mut().enumerate() {
            player.spawn(number as u8, row);
        }

        self.phase = SessionPhase::Started;
        self.winner = None;
        self.round += 1;
        self.tick = 0;

        info!(
            "Round {} started with {} players",
            self.round,
            self.players.len()
        );
        true
    }

    /// Runs one simulation tick
    ///
    /// Players are advanced in join order. The first round-ending event stops
    /// the tick, so later players are not advanced; the state snapshot still
    /// covers every player.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        if self.phase != SessionPhase::Started {
            return report;
        }
        self.tick += 1;

        let max_row = self.map.height() as i32 - 1;
        let width = self.map.width() as u32;
        let mut ended_by: Option<(ConnectionId, EndReason)> = None;

        for (&id, player) in self.players.iter_mut() {
            player.step();
            player.y = player.y.clamp(0, max_row);

            let (x, y) = (player.x, player.y);
            match self.map.tile(x as usize, y as usize) {
                Tile::Coin => {
                    player.add_score();
                    report.collisions.push(collision(CollisionKind::Coin, x, y));
                }
                Tile::Hazard => {
                    report.collisions.push(collision(CollisionKind::Hazard, x, y));
                    ended_by = Some((id, EndReason::Hazard));
                    break;
                }
                Tile::Empty => {}
            }

            if x >= width {
                ended_by = Some((id, EndReason::ReachedEnd));
                break;
            }
        }

        report.state = self.snapshot();

        if let Some((id, reason)) = ended_by {
            let winner = match reason {
                EndReason::Hazard => self
                    .players
                    .iter()
                    .find(|(other, _)| **other != id)
                    .map(|(_, p)| p.player_number),
                _ => self.players.get(&id).map(|p| p.player_number),
            };
            report.result = Some(self.end_round(winner, reason));
        }

        report
    }

    /// Returns an ended session to waiting once GameEnd has been sent
    pub fn finish(&mut self) {
        if self.phase == SessionPhase::Ended {
            self.phase = SessionPhase::Waiting;
        }
    }

    /// Current wire records for every player, in join order
    pub fn snapshot(&self) -> Vec<PlayerRecord> {
        self.players.values().map(PlayerAgent::record).collect()
    }

    fn end_round(&mut self, winner: Option<u8>, reason: EndReason) -> RoundResult {
        self.phase = SessionPhase::Ended;
        self.winner = winner;

        match winner {
            Some(number) => info!(
                "Round {} over after {} ticks ({:?}), winner: player {}",
                self.round, self.tick, reason, number
            ),
            None => info!(
                "Round {} over after {} ticks ({:?}), no winner",
                self.round, self.tick, reason
            ),
        }

        RoundResult { winner, reason }
    }
}

fn collision(kind: CollisionKind, x: u32, y: i32) -> Collision {
    Collision {
        kind,
        x: u16::try_from(x).unwrap_or(u16::MAX),
        y: u16::try_from(y).unwrap_or(u16::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(source: &str) -> LevelMap {
        LevelMap::load_from_bytes(source.as_bytes()).unwrap()
    }

    fn session_with_players(source: &str, count: u32) -> Session {
        let mut session = Session::new(map(source));
        for id in 1..=count {
            session.add_player(id);
        }
        session
    }

    #[test]
    fn test_session_creation() {
        let session = Session::new(map("....\n"));
        assert_eq!(session.phase(), SessionPhase::Waiting);
        assert_eq!(session.player_count(), 0);
        assert_eq!(session.winner(), None);
    }

    #[test]
    fn test_single_player_does_not_start() {
        let mut session = session_with_players("....\n", 1);
        assert!(!session.try_start());
        assert_eq!(session.phase(), SessionPhase::Waiting);
    }

    #[test]
    fn test_start_assigns_join_order_numbers() {
        let mut session = Session::new(map("......\n......\n......\n......\n"));
        for id in [4, 9, 12] {
            session.add_player(id);
        }

        assert!(session.try_start());
        assert_eq!(session.phase(), SessionPhase::Started);

        let numbers: Vec<u8> = session.players().map(|(_, p)| p.player_number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);

        for (_, player) in session.players() {
            assert_eq!(player.x, 0);
            assert_eq!(player.y, 1);
        }
    }

    #[test]
    fn test_spawn_row_for_short_maps() {
        assert_eq!(Session::new(map("..\n")).spawn_row(), 0);
        assert_eq!(Session::new(map("..\n..\n..\n")).spawn_row(), 0);
        assert_eq!(Session::new(map("..\n..\n..\n..\n..\n")).spawn_row(), 2);
    }

    #[test]
    fn test_start_only_from_waiting() {
        let mut session = session_with_players("....\n", 2);
        assert!(session.try_start());
        assert!(!session.try_start());
    }

    #[test]
    fn test_tick_does_nothing_while_waiting() {
        let mut session = session_with_players("....\n", 2);
        let report = session.tick();

        assert!(report.state.is_empty());
        assert!(report.result.is_none());
        assert_eq!(session.tick_count(), 0);
    }

    #[test]
    fn test_coin_collection() {
        let mut session = session_with_players("..c..\n", 2);
        session.try_start();

        let first = session.tick();
        assert!(first.collisions.is_empty());

        let second = session.tick();
        assert_eq!(
            second.collisions,
            vec![
                Collision {
                    kind: CollisionKind::Coin,
                    x: 2,
                    y: 0
                };
                2
            ]
        );
        for record in &second.state {
            assert_eq!(record.score, 1);
        }

        let third = session.tick();
        assert!(third.collisions.is_empty());
        for record in &third.state {
            assert_eq!(record.score, 1);
        }
    }

    #[test]
    fn test_reaching_end_wins() {
        let mut session = session_with_players("...\n", 2);
        session.try_start();

        session.tick();
        session.tick();
        let report = session.tick();

        let result = report.result.unwrap();
        assert_eq!(result.reason, EndReason::ReachedEnd);
        assert_eq!(result.winner, Some(0));
        assert_eq!(session.phase(), SessionPhase::Ended);
        assert_eq!(session.winner(), Some(0));

        // Player 1 was not advanced on the final tick
        assert_eq!(report.state[0].x, 3);
        assert_eq!(report.state[1].x, 2);
    }

    #[test]
    fn test_hazard_hands_win_to_other_player() {
        let mut session = session_with_players(".e...\n", 2);
        session.try_start();

        let report = session.tick();

        assert_eq!(
            report.collisions,
            vec![Collision {
                kind: CollisionKind::Hazard,
                x: 1,
                y: 0
            }]
        );
        let result = report.result.unwrap();
        assert_eq!(result.reason, EndReason::Hazard);
        assert_eq!(result.winner, Some(1));
        assert_eq!(report.state.len(), 2);
    }

    #[test]
    fn test_hazard_winner_is_first_other_in_join_order() {
        let mut session = session_with_players(".e...\n", 3);
        session.try_start();

        let report = session.tick();
        assert_eq!(report.result.unwrap().winner, Some(1));
    }

    #[test]
    fn test_vertical_position_clamped_to_map() {
        let mut session = session_with_players("..........\n..........\n", 2);
        session.try_start();
        session.set_jetpack(1, true);

        for _ in 0..5 {
            session.tick();
        }

        let rows: Vec<i32> = session.players().map(|(_, p)| p.y).collect();
        assert_eq!(rows, vec![0, 1]);
    }

    #[test]
    fn test_set_jetpack_unknown_connection() {
        let mut session = session_with_players("....\n", 1);
        assert!(session.set_jetpack(1, true));
        assert!(!session.set_jetpack(99, true));
    }

    #[test]
    fn test_disconnect_leaves_single_winner() {
        let mut session = session_with_players("..........\n", 2);
        session.try_start();

        let result = session.remove_player(1).unwrap();
        assert_eq!(result.reason, EndReason::Forfeit);
        assert_eq!(result.winner, Some(1));
        assert_eq!(session.phase(), SessionPhase::Ended);

        session.finish();
        assert_eq!(session.phase(), SessionPhase::Waiting);
    }

    #[test]
    fn test_players_leaving_one_by_one() {
        let mut session = session_with_players("..........\n", 2);
        session.try_start();

        assert!(session.remove_player(1).is_some());
        session.finish();
        session.add_player(3);
        session.try_start();

        assert!(session.remove_player(2).is_some());
        session.finish();
        assert!(session.remove_player(3).is_none());
        assert_eq!(session.phase(), SessionPhase::Waiting);
    }

    #[test]
    fn test_disconnect_with_players_left_keeps_playing() {
        let mut session = session_with_players("..........\n", 3);
        session.try_start();

        assert!(session.remove_player(2).is_none());
        assert_eq!(session.phase(), SessionPhase::Started);
        assert_eq!(session.player_count(), 2);
    }

    #[test]
    fn test_disconnect_while_waiting() {
        let mut session = session_with_players("....\n", 1);
        assert!(session.remove_player(1).is_none());
        assert!(session.remove_player(1).is_none());
        assert_eq!(session.phase(), SessionPhase::Waiting);
    }

    #[test]
    fn test_new_round_after_finish() {
        let mut session = session_with_players("..\n", 2);
        session.try_start();
        session.tick();
        let report = session.tick();
        assert!(report.result.is_some());

        session.finish();
        assert!(session.try_start());
        assert_eq!(session.round(), 2);
        for (_, player) in session.players() {
            assert_eq!(player.x, 0);
            assert_eq!(player.score, 0);
        }
    }
}
