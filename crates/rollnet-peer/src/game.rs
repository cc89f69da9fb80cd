//! A tiny deterministic game: every player walks a dot around a torus.

use rand::{Rng, SeedableRng, rngs::StdRng};
use rollnet::{Frame, GameState, SessionCallbacks, SessionEvent};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const INPUT_SIZE: usize = 1;

const ARENA_WIDTH: i32 = 320;
const ARENA_HEIGHT: i32 = 240;

pub const INPUT_UP: u8 = 1 << 0;
pub const INPUT_DOWN: u8 = 1 << 1;
pub const INPUT_LEFT: u8 = 1 << 2;
pub const INPUT_RIGHT: u8 = 1 << 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

/// Simulation state. This is exactly what gets saved and restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arena {
    pub frame: Frame,
    pub players: Vec<Position>,
}

impl Arena {
    pub fn new(num_players: usize) -> Self {
        let players = (0..num_players)
            .map(|i| Position {
                x: ARENA_WIDTH * (i as i32 + 1) / (num_players as i32 + 1),
                y: ARENA_HEIGHT / 2,
            })
            .collect();
        Self { frame: 0, players }
    }

    pub fn step(&mut self, inputs: &[u8], disconnect_flags: u32) {
        for (i, pos) in self.players.iter_mut().enumerate() {
            if disconnect_flags & (1 << i) != 0 {
                continue;
            }
            let Some(&buttons) = inputs.get(i * INPUT_SIZE) else {
                continue;
            };
            if buttons & INPUT_UP != 0 {
                pos.y -= 1;
            }
            if buttons & INPUT_DOWN != 0 {
                pos.y += 1;
            }
            if buttons & INPUT_LEFT != 0 {
                pos.x -= 1;
            }
            if buttons & INPUT_RIGHT != 0 {
                pos.x += 1;
            }
            pos.x = pos.x.rem_euclid(ARENA_WIDTH);
            pos.y = pos.y.rem_euclid(ARENA_HEIGHT);
        }
        self.frame += 1;
    }
}

/// Fletcher-32 over little-endian 16-bit words; an odd trailing byte is
/// zero-padded.
pub fn fletcher32(data: &[u8]) -> u32 {
    let mut c0: u32 = 0;
    let mut c1: u32 = 0;
    // 360 words keep both sums below 2^32 before the modulo.
    for block in data.chunks(360 * 2) {
        for word in block.chunks(2) {
            let lo = word[0] as u32;
            let hi = word.get(1).copied().unwrap_or(0) as u32;
            c0 += lo | (hi << 8);
            c1 += c0;
        }
        c0 %= 65535;
        c1 %= 65535;
    }
    (c1 << 16) | c0
}

/// Host side of the session: owns the arena and reacts to session events.
pub struct PeerGame {
    pub arena: Arena,
    /// Frames the host should skip to let slower peers catch up.
    pub stall_frames: i32,
    /// Player numbers of peers that dropped out.
    pub disconnected: Vec<usize>,
}

impl PeerGame {
    pub fn new(num_players: usize) -> Self {
        Self {
            arena: Arena::new(num_players),
            stall_frames: 0,
            disconnected: Vec::new(),
        }
    }

    pub fn checksum(&self) -> u32 {
        match postcard::to_allocvec(&self.arena) {
            Ok(bytes) => fletcher32(&bytes),
            Err(_) => 0,
        }
    }
}

impl SessionCallbacks for PeerGame {
    fn begin_game(&mut self, name: &str) {
        info!(name, players = self.arena.players.len(), "game started");
    }

    fn save_game_state(&mut self, frame: Frame) -> GameState {
        match postcard::to_allocvec(&self.arena) {
            Ok(data) => {
                let checksum = fletcher32(&data);
                GameState { data, checksum }
            }
            Err(err) => {
                warn!(frame, %err, "failed to serialize arena");
                GameState::default()
            }
        }
    }

    fn load_game_state(&mut self, state: &GameState) {
        match postcard::from_bytes::<Arena>(&state.data) {
            Ok(arena) => self.arena = arena,
            Err(err) => warn!(%err, "failed to restore arena"),
        }
    }

    fn advance_frame(&mut self, inputs: &[u8], disconnect_flags: u32) {
        self.arena.step(inputs, disconnect_flags);
    }

    fn log_game_state(&mut self, label: &str, state: &GameState) {
        match postcard::from_bytes::<Arena>(&state.data) {
            Ok(arena) => info!(label, checksum = state.checksum, ?arena, "game state"),
            Err(err) => warn!(label, %err, "unreadable game state"),
        }
    }

    fn on_event(&mut self, event: &SessionEvent) {
        match *event {
            SessionEvent::ConnectedToPeer { player } => info!(%player, "connected"),
            SessionEvent::SynchronizingWithPeer {
                player,
                count,
                total,
            } => debug!(%player, count, total, "synchronizing"),
            SessionEvent::SynchronizedWithPeer { player } => info!(%player, "synchronized"),
            SessionEvent::Running => info!("all peers synchronized, running"),
            SessionEvent::DisconnectedFromPeer { player } => {
                warn!(%player, "peer disconnected");
                self.disconnected.push(player.0);
            }
            SessionEvent::TimeSync { frames_ahead } => {
                debug!(frames_ahead, "stalling to let peers catch up");
                self.stall_frames = frames_ahead;
            }
            SessionEvent::ConnectionInterrupted {
                player,
                disconnect_timeout_ms,
            } => warn!(%player, disconnect_timeout_ms, "connection interrupted"),
            SessionEvent::ConnectionResumed { player } => info!(%player, "connection resumed"),
        }
    }
}

/// Input generator that holds a random direction for a while, like a
/// restless player.
pub struct Bot {
    rng: StdRng,
    buttons: u8,
    hold: u32,
}

impl Bot {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            buttons: 0,
            hold: 0,
        }
    }

    pub fn next_input(&mut self) -> u8 {
        if self.hold == 0 {
            self.buttons =
                self.rng.random::<u8>() & (INPUT_UP | INPUT_DOWN | INPUT_LEFT | INPUT_RIGHT);
            self.hold = self.rng.random_range(4..30);
        }
        self.hold -= 1;
        self.buttons
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fletcher32_known_vectors() {
        assert_eq!(fletcher32(b""), 0);
        assert_eq!(fletcher32(b"abcde"), 0xF04F_C729);
        assert_eq!(fletcher32(b"abcdef"), 0x5650_2D2A);
        assert_eq!(fletcher32(b"abcdefgh"), 0xEBE1_9591);
    }

    #[test]
    fn fletcher32_handles_long_input() {
        let data = vec![0xFFu8; 10_000];
        let a = fletcher32(&data);
        let mut other = data.clone();
        other[5_000] = 0;
        assert_ne!(a, fletcher32(&other));
    }

    #[test]
    fn arena_wraps_around_edges() {
        let mut arena = Arena::new(1);
        arena.players[0] = Position { x: 0, y: 0 };
        arena.step(&[INPUT_UP | INPUT_LEFT], 0);
        assert_eq!(
            arena.players[0],
            Position {
                x: ARENA_WIDTH - 1,
                y: ARENA_HEIGHT - 1
            }
        );
        assert_eq!(arena.frame, 1);
    }

    #[test]
    fn disconnected_players_do_not_move() {
        let mut arena = Arena::new(2);
        let before = arena.players.clone();
        arena.step(&[INPUT_RIGHT, INPUT_RIGHT], 0b10);
        assert_eq!(arena.players[0].x, before[0].x + 1);
        assert_eq!(arena.players[1], before[1]);
    }

    #[test]
    fn save_and_load_restore_the_arena() {
        let mut game = PeerGame::new(2);
        let saved = game.save_game_state(0);
        assert_eq!(saved.checksum, game.checksum());

        game.advance_frame(&[INPUT_DOWN, INPUT_LEFT], 0);
        assert_ne!(game.checksum(), saved.checksum);

        game.load_game_state(&saved);
        assert_eq!(game.arena.frame, 0);
        assert_eq!(game.checksum(), saved.checksum);
    }

    #[test]
    fn time_sync_event_sets_stall() {
        let mut game = PeerGame::new(2);
        game.on_event(&SessionEvent::TimeSync { frames_ahead: 3 });
        assert_eq!(game.stall_frames, 3);
    }

    #[test]
    fn bot_inputs_stay_within_direction_bits() {
        let mut bot = Bot::new(7);
        for _ in 0..500 {
            assert_eq!(bot.next_input() & 0xF0, 0);
        }
    }
}
