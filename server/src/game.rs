//! Authoritative match state and the per-tick simulation.

use crate::geometry::{head_perimeter, perimeters_touch, quick_reject, segment_perimeter, Point};
use crate::session::PlayerSession;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    Action, Direction, MessageType, PlayerId, Position, ProtocolMessage, INITIAL_TAIL_COUNTDOWN,
    INITIAL_TRAIL_LENGTH, MAX_PLAYERS, PLAYER_SIZE, TAIL_GROWTH_MAX, TAIL_GROWTH_MIN,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("match is full, cannot register player {0}")]
    MatchFull(PlayerId),
    #[error("player {0} is already registered")]
    DuplicatePlayer(PlayerId),
}

/// What happened during one call to [`GameState::tick`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    /// Players killed this tick, in roster order
    pub deaths: Vec<PlayerId>,
    pub trail_grew: bool,
    /// At most one player is still alive
    pub ended: bool,
}

/// Starting anchor and heading for a registration slot.
///
/// Slots go center-top, left-mid, right-mid, center-bottom.
pub fn starting_slot(slot: usize, field_size: i32) -> Option<(Point, Direction)> {
    let half = field_size / 2;
    let offset = PLAYER_SIZE / 2;
    match slot {
        0 => Some((Point::new(half + offset, 0), Direction::Up)),
        1 => Some((Point::new(PLAYER_SIZE, half - offset), Direction::Right)),
        2 => Some((
            Point::new(field_size - PLAYER_SIZE, half - offset),
            Direction::Left,
        )),
        3 => Some((Point::new(half + offset, field_size), Direction::Down)),
        _ => None,
    }
}

pub struct GameState {
    /// Ticks simulated so far
    tick_count: u32,
    field_size: i32,
    /// Roster in registration order
    sessions: Vec<PlayerSession>,
    /// Shared trail length, every living session follows it
    trail_length: u32,
    /// Ticks until the trail grows again
    tail_countdown: u32,
    rng: StdRng,
}

impl GameState {
    pub fn new(field_size: i32) -> Self {
        Self::with_rng(field_size, StdRng::from_entropy())
    }

    /// Deterministic tail-growth schedule for a given seed.
    pub fn with_seed(field_size: i32, seed: u64) -> Self {
        Self::with_rng(field_size, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(field_size: i32, rng: StdRng) -> Self {
        Self {
            tick_count: 0,
            field_size,
            sessions: Vec::with_capacity(MAX_PLAYERS),
            trail_length: INITIAL_TRAIL_LENGTH,
            tail_countdown: INITIAL_TAIL_COUNTDOWN,
            rng,
        }
    }

    pub fn field_size(&self) -> i32 {
        self.field_size
    }

    pub fn tick_count(&self) -> u32 {
        self.tick_count
    }

    pub fn trail_length(&self) -> u32 {
        self.trail_length
    }

    pub fn tail_countdown(&self) -> u32 {
        self.tail_countdown
    }

    pub fn sessions(&self) -> &[PlayerSession] {
        &self.sessions
    }

    pub fn session(&self, id: PlayerId) -> Option<&PlayerSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn session_mut(&mut self, id: PlayerId) -> Option<&mut PlayerSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn player_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn living_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.alive).count()
    }

    pub fn is_over(&self) -> bool {
        self.living_count() <= 1
    }

    /// Places a new player in the next free starting slot.
    pub fn register_player(&mut self, id: PlayerId) -> Result<Position, GameError> {
        if self.session(id).is_some() {
            return Err(GameError::DuplicatePlayer(id));
        }
        let (head, direction) = starting_slot(self.sessions.len(), self.field_size)
            .ok_or(GameError::MatchFull(id))?;

        let session = PlayerSession::new(id, head, direction);
        let position = session.position();
        info!(
            "Registered player {} at ({}, {}) facing {:?}",
            id, head.x, head.y, direction
        );
        self.sessions.push(session);
        Ok(position)
    }

    /// Applies a client action. Unknown players are ignored.
    pub fn process_command(&mut self, id: PlayerId, action: Action) -> bool {
        match self.session_mut(id) {
            Some(session) => session.apply_action(action),
            None => {
                debug!("Ignoring {:?} from unknown player {}", action, id);
                false
            }
        }
    }

    /// Advances the simulation by one tick: move, collide, grow, end check.
    pub fn tick(&mut self) -> TickOutcome {
        self.tick_count += 1;

        for session in &mut self.sessions {
            session.advance(self.field_size);
        }

        let deaths = self.detect_collisions();
        for session in &mut self.sessions {
            if deaths.contains(&session.id) {
                session.alive = false;
                info!("Player {} died on tick {}", session.id, self.tick_count);
            }
        }

        let trail_grew = self.grow_tails();

        TickOutcome {
            deaths,
            trail_grew,
            ended: self.is_over(),
        }
    }

    /// Collects every player killed by the current positions.
    ///
    /// Liveness is read once before any death is applied, so the order of
    /// the pairwise checks never changes the result.
    fn detect_collisions(&self) -> Vec<PlayerId> {
        let heads: Vec<Vec<Point>> = self
            .sessions
            .iter()
            .map(|s| head_perimeter(s.head))
            .collect();
        let mut doomed = vec![false; self.sessions.len()];

        // Head on head: both die.
        for a in 0..self.sessions.len() {
            for b in (a + 1)..self.sessions.len() {
                let (sa, sb) = (&self.sessions[a], &self.sessions[b]);
                if !sa.alive || !sb.alive || sa.is_invulnerable() || sb.is_invulnerable() {
                    continue;
                }
                if quick_reject(sa.head, sb.head, PLAYER_SIZE) {
                    continue;
                }
                if perimeters_touch(&heads[a], &heads[b]) {
                    doomed[a] = true;
                    doomed[b] = true;
                }
            }
        }

        // Head on tail: only the moving head dies.
        for (a, mover) in self.sessions.iter().enumerate() {
            if !mover.alive || mover.is_invulnerable() || doomed[a] {
                continue;
            }
            'owners: for (b, owner) in self.sessions.iter().enumerate() {
                if a == b || owner.trail_length <= PLAYER_SIZE as u32 {
                    continue;
                }
                for &segment in &owner.trail {
                    if quick_reject(mover.head, segment, PLAYER_SIZE) {
                        continue;
                    }
                    if perimeters_touch(&heads[a], &segment_perimeter(segment)) {
                        doomed[a] = true;
                        break 'owners;
                    }
                }
            }
        }

        self.sessions
            .iter()
            .zip(doomed)
            .filter(|(_, dead)| *dead)
            .map(|(s, _)| s.id)
            .collect()
    }

    fn grow_tails(&mut self) -> bool {
        self.tail_countdown = self.tail_countdown.saturating_sub(1);
        if self.tail_countdown > 0 {
            return false;
        }

        self.tail_countdown = self.rng.gen_range(TAIL_GROWTH_MIN..=TAIL_GROWTH_MAX);
        self.trail_length += 1;
        for session in self.sessions.iter_mut().filter(|s| s.alive) {
            session.trail_length = self.trail_length;
        }
        debug!(
            "Trail length now {}, next growth in {} ticks",
            self.trail_length, self.tail_countdown
        );
        true
    }

    /// The last player standing, or after a simultaneous wipe-out the one
    /// with the longest trail (earliest registered on ties).
    ///
    /// `None` while more than one player is alive or the roster is empty.
    pub fn winner(&self) -> Option<PlayerId> {
        let mut living = self.sessions.iter().filter(|s| s.alive);
        match (living.next(), living.next()) {
            (Some(last), None) => Some(last.id),
            (Some(_), Some(_)) => None,
            (None, _) => {
                let mut best: Option<&PlayerSession> = None;
                for session in &self.sessions {
                    if best.map_or(true, |b| session.trail_length > b.trail_length) {
                        best = Some(session);
                    }
                }
                best.map(|s| s.id)
            }
        }
    }

    /// Full roster view, dead players included.
    pub fn snapshot(&self, kind: MessageType) -> ProtocolMessage {
        ProtocolMessage::snapshot(
            kind,
            self.trail_length,
            self.sessions.iter().map(PlayerSession::view).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::JUMP_LENGTH;

    const FIELD: i32 = 500;

    fn game_with_players(count: u32) -> GameState {
        let mut game = GameState::with_seed(FIELD, 7);
        for id in 1..=count {
            game.register_player(id).unwrap();
        }
        game
    }

    fn place(game: &mut GameState, id: PlayerId, x: i32, y: i32, direction: Direction) {
        let session = game.session_mut(id).unwrap();
        session.head = Point::new(x, y);
        session.direction = direction;
    }

    /// Vertical wall of trail segments at `x`, spaced like real movement.
    fn wall(x: i32, from_y: i32, count: i32) -> std::collections::VecDeque<Point> {
        (0..count).map(|k| Point::new(x, from_y + 3 * k)).collect()
    }

    #[test]
    fn test_starting_slots() {
        let game = game_with_players(4);
        let s = game.sessions();

        assert_eq!(s[0].head, Point::new(255, 0));
        assert_eq!(s[0].direction, Direction::Up);
        assert_eq!(s[1].head, Point::new(10, 245));
        assert_eq!(s[1].direction, Direction::Right);
        assert_eq!(s[2].head, Point::new(490, 245));
        assert_eq!(s[2].direction, Direction::Left);
        assert_eq!(s[3].head, Point::new(255, 500));
        assert_eq!(s[3].direction, Direction::Down);
    }

    #[test]
    fn test_slots_follow_registration_index_not_id() {
        let mut game = GameState::with_seed(FIELD, 1);
        let first = game.register_player(42).unwrap();
        let second = game.register_player(7).unwrap();

        assert_eq!((first.x, first.y), (255, 0));
        assert_eq!((second.x, second.y), (10, 245));
    }

    #[test]
    fn test_fifth_registration_is_refused() {
        let mut game = game_with_players(4);
        assert_eq!(game.register_player(5), Err(GameError::MatchFull(5)));
        assert_eq!(game.player_count(), 4);
    }

    #[test]
    fn test_duplicate_registration_is_refused() {
        let mut game = game_with_players(2);
        assert_eq!(game.register_player(2), Err(GameError::DuplicatePlayer(2)));
    }

    #[test]
    fn test_tick_count_advances_once_per_tick() {
        let mut game = game_with_players(2);
        assert_eq!(game.tick_count(), 0);

        game.tick();
        game.tick();

        assert_eq!(game.tick_count(), 2);
    }

    #[test]
    fn test_unknown_player_command_is_ignored() {
        let mut game = game_with_players(2);
        assert!(!game.process_command(99, Action::MoveDown));
        assert_eq!(game.session(1).unwrap().direction, Direction::Up);
    }

    #[test]
    fn test_opposite_command_rejected_same_direction_harmless() {
        let mut game = game_with_players(3);
        // Player 3 starts facing Left.
        assert!(game.process_command(3, Action::MoveLeft));
        assert!(game.process_command(3, Action::MoveLeft));
        assert_eq!(game.session(3).unwrap().direction, Direction::Left);

        assert!(!game.process_command(3, Action::MoveRight));
        assert_eq!(game.session(3).unwrap().direction, Direction::Left);
    }

    #[test]
    fn test_head_on_head_kills_both() {
        for order in [[1, 2], [2, 1]] {
            let mut game = GameState::with_seed(FIELD, 3);
            for id in order {
                game.register_player(id).unwrap();
            }
            place(&mut game, 1, 100, 100, Direction::Right);
            place(&mut game, 2, 112, 100, Direction::Left);

            let outcome = game.tick();

            assert_eq!(outcome.deaths.len(), 2);
            assert!(!game.session(1).unwrap().alive);
            assert!(!game.session(2).unwrap().alive);
            assert!(outcome.ended);
        }
    }

    #[test]
    fn test_head_on_head_skipped_when_one_is_jumping() {
        let mut game = game_with_players(2);
        place(&mut game, 1, 100, 100, Direction::Right);
        place(&mut game, 2, 112, 100, Direction::Left);
        game.process_command(2, Action::Jump);

        let outcome = game.tick();

        assert!(outcome.deaths.is_empty());
        assert_eq!(game.living_count(), 2);
    }

    #[test]
    fn test_head_on_tail_kills_only_the_mover() {
        let mut game = game_with_players(2);
        place(&mut game, 1, 195, 150, Direction::Down);
        place(&mut game, 2, 400, 400, Direction::Down);
        {
            let owner = game.session_mut(2).unwrap();
            owner.trail_length = 100;
            owner.trail = wall(200, 0, 99);
        }

        let outcome = game.tick();

        assert_eq!(outcome.deaths, vec![1]);
        assert!(!game.session(1).unwrap().alive);
        assert!(game.session(2).unwrap().alive);
    }

    #[test]
    fn test_short_tails_are_harmless() {
        let mut game = game_with_players(2);
        place(&mut game, 1, 195, 150, Direction::Down);
        place(&mut game, 2, 400, 400, Direction::Down);
        {
            let owner = game.session_mut(2).unwrap();
            owner.trail_length = PLAYER_SIZE as u32;
            owner.trail = wall(200, 140, 10);
        }

        assert!(game.tick().deaths.is_empty());
    }

    #[test]
    fn test_dead_players_tail_still_kills() {
        let mut game = game_with_players(3);
        place(&mut game, 1, 195, 150, Direction::Down);
        place(&mut game, 2, 400, 400, Direction::Down);
        {
            let owner = game.session_mut(2).unwrap();
            owner.alive = false;
            owner.trail_length = 100;
            owner.trail = wall(200, 0, 99);
        }

        let outcome = game.tick();

        assert_eq!(outcome.deaths, vec![1]);
        assert_eq!(game.winner(), Some(3));
    }

    #[test]
    fn test_jump_survives_then_same_geometry_kills() {
        let mut game = game_with_players(3);
        place(&mut game, 1, 195, 150, Direction::Down);
        place(&mut game, 2, 400, 400, Direction::Down);
        {
            let owner = game.session_mut(2).unwrap();
            owner.alive = false;
            owner.trail_length = 200;
            owner.trail = wall(200, 0, 166);
        }

        assert!(game.process_command(1, Action::Jump));

        for tick in 1..JUMP_LENGTH {
            let outcome = game.tick();
            assert!(outcome.deaths.is_empty(), "died early on tick {}", tick);
            assert!(game.session(1).unwrap().position().jumping);
        }

        let outcome = game.tick();
        assert_eq!(outcome.deaths, vec![1]);
        assert_eq!(game.session(1).unwrap().jump_countdown, 0);
    }

    #[test]
    fn test_trail_grows_on_seeded_schedule() {
        let seed = 42;
        let mut game = game_with_players(2);
        game.rng = StdRng::seed_from_u64(seed);

        let mut replica = StdRng::seed_from_u64(seed);
        let mut expected = Vec::new();
        let mut next = INITIAL_TAIL_COUNTDOWN;
        while next <= 60 {
            expected.push(next);
            next += replica.gen_range(TAIL_GROWTH_MIN..=TAIL_GROWTH_MAX);
        }

        let mut grown_at = Vec::new();
        for _ in 0..60 {
            let before = game.trail_length();
            let outcome = game.tick();
            assert!(outcome.deaths.is_empty());

            if outcome.trail_grew {
                assert_eq!(game.trail_length(), before + 1);
                assert!((TAIL_GROWTH_MIN..=TAIL_GROWTH_MAX).contains(&game.tail_countdown()));
                grown_at.push(game.tick_count());
            } else {
                assert_eq!(game.trail_length(), before);
            }
            for session in game.sessions() {
                assert_eq!(session.trail_length, game.trail_length());
                assert!(session.trail.len() <= session.trail_length as usize);
            }
        }

        assert_eq!(grown_at, expected);
    }

    #[test]
    fn test_dead_sessions_stop_growing() {
        let mut game = game_with_players(3);
        game.session_mut(2).unwrap().alive = false;
        game.tail_countdown = 1;

        assert!(game.tick().trail_grew);
        assert_eq!(game.session(1).unwrap().trail_length, INITIAL_TRAIL_LENGTH + 1);
        assert_eq!(game.session(2).unwrap().trail_length, INITIAL_TRAIL_LENGTH);
    }

    #[test]
    fn test_winner_last_player_standing() {
        let mut game = game_with_players(3);
        assert_eq!(game.winner(), None);

        game.session_mut(1).unwrap().alive = false;
        game.session_mut(3).unwrap().alive = false;

        assert!(game.is_over());
        assert_eq!(game.winner(), Some(2));
    }

    #[test]
    fn test_winner_after_wipe_out_prefers_longest_then_roster_order() {
        let mut game = game_with_players(4);
        let lengths = [(1, 5), (2, 9), (3, 9), (4, 2)];
        for (id, length) in lengths {
            let session = game.session_mut(id).unwrap();
            session.alive = false;
            session.trail_length = length;
        }

        assert_eq!(game.winner(), Some(2));
    }

    #[test]
    fn test_empty_roster_has_no_winner() {
        let game = GameState::with_seed(FIELD, 0);
        assert!(game.is_over());
        assert_eq!(game.winner(), None);
    }

    #[test]
    fn test_snapshot_includes_dead_players() {
        let mut game = game_with_players(2);
        game.session_mut(2).unwrap().alive = false;
        game.process_command(1, Action::Jump);

        let snapshot = game.snapshot(MessageType::Update);

        assert_eq!(snapshot.kind, MessageType::Update);
        assert_eq!(snapshot.length, INITIAL_TRAIL_LENGTH);
        assert_eq!(snapshot.players.len(), 2);
        assert!(snapshot.players[0].position.jumping);
        assert!(!snapshot.players[1].alive);
    }

    #[test]
    fn test_dead_player_is_frozen_through_ticks() {
        let mut game = game_with_players(3);
        game.session_mut(2).unwrap().alive = false;
        let frozen = game.session(2).unwrap().head;

        for _ in 0..5 {
            game.tick();
        }

        assert_eq!(game.session(2).unwrap().head, frozen);
        assert!(!game.process_command(2, Action::MoveUp));
    }
}
