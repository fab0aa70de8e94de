//! Per-player simulation state owned by the game state.

use crate::geometry::Point;
use shared::{
    Action, Direction, PlayerId, PlayerView, Position, INITIAL_TRAIL_LENGTH, JUMP_LENGTH,
    MOVE_SPEED,
};
use std::collections::VecDeque;

/// Live state of one player for the current match
///
/// Dead sessions stay in the roster for scoring and snapshots but are never
/// mutated again.
#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub id: PlayerId,
    /// Top-left anchor of the player's footprint
    pub head: Point,
    pub direction: Direction,
    pub alive: bool,
    /// Maximum number of trail segments kept behind the head
    pub trail_length: u32,
    /// Previous head anchors, oldest first
    pub trail: VecDeque<Point>,
    /// Ticks of invulnerability left
    pub jump_countdown: u32,
}

impl PlayerSession {
    pub fn new(id: PlayerId, head: Point, direction: Direction) -> Self {
        Self {
            id,
            head,
            direction,
            alive: true,
            trail_length: INITIAL_TRAIL_LENGTH,
            trail: VecDeque::new(),
            jump_countdown: 0,
        }
    }

    pub fn is_invulnerable(&self) -> bool {
        self.jump_countdown > 0
    }

    /// Applies one client action. Returns true if the session changed.
    ///
    /// Reversing straight into the opposite direction is refused, and a jump
    /// only arms when the previous one has fully run out.
    pub fn apply_action(&mut self, action: Action) -> bool {
        if !self.alive {
            return false;
        }

        match action.direction() {
            Some(direction) => {
                if direction == self.direction.opposite() {
                    return false;
                }
                self.direction = direction;
                true
            }
            None => {
                if self.jump_countdown != 0 {
                    return false;
                }
                self.jump_countdown = JUMP_LENGTH;
                true
            }
        }
    }

    /// Moves one step along the current direction, wrapping at the field edge.
    pub fn advance(&mut self, field_size: i32) {
        if !self.alive {
            return;
        }

        self.trail.push_back(self.head);

        let (dx, dy) = self.direction.delta();
        self.head = Point::new(
            wrap(self.head.x + dx * MOVE_SPEED, field_size),
            wrap(self.head.y + dy * MOVE_SPEED, field_size),
        );

        while self.trail.len() > self.trail_length as usize {
            self.trail.pop_front();
        }

        if self.jump_countdown > 0 {
            self.jump_countdown -= 1;
        }
    }

    pub fn position(&self) -> Position {
        Position {
            x: self.head.x,
            y: self.head.y,
            jumping: self.is_invulnerable(),
        }
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            id: self.id,
            position: self.position(),
            direction: self.direction,
            alive: self.alive,
        }
    }
}

/// Toroidal wraparound: leaving one edge re-enters at the opposite one.
fn wrap(coordinate: i32, field_size: i32) -> i32 {
    if coordinate < 0 {
        field_size
    } else if coordinate > field_size {
        0
    } else {
        coordinate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_at(x: i32, y: i32, direction: Direction) -> PlayerSession {
        PlayerSession::new(1, Point::new(x, y), direction)
    }

    #[test]
    fn test_session_creation() {
        let session = session_at(10, 20, Direction::Up);

        assert!(session.alive);
        assert_eq!(session.trail_length, INITIAL_TRAIL_LENGTH);
        assert!(session.trail.is_empty());
        assert_eq!(session.jump_countdown, 0);
        assert!(!session.position().jumping);
    }

    #[test]
    fn test_reversal_is_rejected() {
        let mut session = session_at(0, 0, Direction::Left);

        assert!(!session.apply_action(Action::MoveRight));
        assert_eq!(session.direction, Direction::Left);

        assert!(session.apply_action(Action::MoveLeft));
        assert_eq!(session.direction, Direction::Left);

        assert!(session.apply_action(Action::MoveUp));
        assert_eq!(session.direction, Direction::Up);
    }

    #[test]
    fn test_every_direction_pair() {
        let all = [
            Direction::Up,
            Direction::Down,
            Direction::Left,
            Direction::Right,
        ];
        let action_for = |d: Direction| match d {
            Direction::Up => Action::MoveUp,
            Direction::Down => Action::MoveDown,
            Direction::Left => Action::MoveLeft,
            Direction::Right => Action::MoveRight,
        };

        for current in all {
            for requested in all {
                let mut session = session_at(0, 0, current);
                session.apply_action(action_for(requested));

                let expected = if requested == current.opposite() {
                    current
                } else {
                    requested
                };
                assert_eq!(session.direction, expected, "{:?} -> {:?}", current, requested);
            }
        }
    }

    #[test]
    fn test_jump_arms_only_when_idle() {
        let mut session = session_at(50, 50, Direction::Right);

        assert!(session.apply_action(Action::Jump));
        assert_eq!(session.jump_countdown, JUMP_LENGTH);
        assert!(session.position().jumping);

        session.advance(500);
        assert_eq!(session.jump_countdown, JUMP_LENGTH - 1);
        assert!(!session.apply_action(Action::Jump));
        assert_eq!(session.jump_countdown, JUMP_LENGTH - 1);
    }

    #[test]
    fn test_jump_countdown_never_negative() {
        let mut session = session_at(50, 50, Direction::Right);
        session.apply_action(Action::Jump);

        for _ in 0..(JUMP_LENGTH + 5) {
            session.advance(500);
        }

        assert_eq!(session.jump_countdown, 0);
        assert!(!session.is_invulnerable());
        assert!(session.apply_action(Action::Jump));
    }

    #[test]
    fn test_advance_moves_by_speed() {
        let mut session = session_at(100, 100, Direction::Up);
        session.advance(500);

        assert_eq!(session.head, Point::new(100, 100 - MOVE_SPEED));
        assert_eq!(session.trail.back(), Some(&Point::new(100, 100)));
    }

    #[test]
    fn test_trail_is_trimmed_to_length() {
        let mut session = session_at(100, 100, Direction::Right);
        session.trail_length = 3;

        for _ in 0..10 {
            session.advance(500);
        }

        assert_eq!(session.trail.len(), 3);
        assert_eq!(
            session.trail.front(),
            Some(&Point::new(100 + 7 * MOVE_SPEED, 100))
        );
    }

    #[test]
    fn test_wraparound_stays_in_field() {
        let field = 500;
        for direction in [
            Direction::Up,
            Direction::Down,
            Direction::Left,
            Direction::Right,
        ] {
            let mut session = session_at(1, 499, direction);
            for _ in 0..400 {
                session.advance(field);
                assert!((0..=field).contains(&session.head.x));
                assert!((0..=field).contains(&session.head.y));
            }
        }
    }

    #[test]
    fn test_wrap_edges() {
        assert_eq!(wrap(-1, 500), 500);
        assert_eq!(wrap(501, 500), 0);
        assert_eq!(wrap(0, 500), 0);
        assert_eq!(wrap(500, 500), 500);
    }

    #[test]
    fn test_dead_session_is_frozen() {
        let mut session = session_at(100, 100, Direction::Right);
        session.alive = false;

        session.advance(500);
        assert!(!session.apply_action(Action::MoveUp));
        assert!(!session.apply_action(Action::Jump));

        assert_eq!(session.head, Point::new(100, 100));
        assert!(session.trail.is_empty());
        assert_eq!(session.direction, Direction::Right);
    }
}
