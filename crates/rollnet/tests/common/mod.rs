#![allow(dead_code)]

use rollnet::{
    Frame, GameState, ManualClock, MemoryAddr, MemoryNetwork, MemorySocket, P2PSession,
    PlayerHandle, PlayerType, RollnetError, Session, SessionCallbacks, SessionConfig,
    SessionEvent,
};

pub type TestSession = P2PSession<MemorySocket, ManualClock>;

pub const FRAME_MS: u32 = 16;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Folds every input byte into a running total; any divergence in inputs or
/// replay order shows up in `total`.
#[derive(Debug, Default)]
pub struct TestGame {
    pub total: u32,
    pub frame: Frame,
    pub advances: usize,
    pub saved: usize,
    pub freed: usize,
    pub events: Vec<SessionEvent>,
}

impl TestGame {
    pub fn count(&self, pred: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl SessionCallbacks for TestGame {
    fn save_game_state(&mut self, frame: Frame) -> GameState {
        assert_eq!(frame, self.frame, "saving a frame the game is not on");
        self.saved += 1;
        let mut data = self.total.to_le_bytes().to_vec();
        data.extend_from_slice(&self.frame.to_le_bytes());
        GameState {
            data,
            checksum: self.total,
        }
    }

    fn load_game_state(&mut self, state: &GameState) {
        self.total = u32::from_le_bytes(state.data[0..4].try_into().unwrap());
        self.frame = i32::from_le_bytes(state.data[4..8].try_into().unwrap());
    }

    fn free_buffer(&mut self, _state: GameState) {
        self.freed += 1;
    }

    fn advance_frame(&mut self, inputs: &[u8], _disconnect_flags: u32) {
        self.total = self
            .total
            .wrapping_mul(31)
            .wrapping_add(inputs.iter().map(|&b| b as u32).sum::<u32>());
        self.frame += 1;
        self.advances += 1;
    }

    fn on_event(&mut self, event: &SessionEvent) {
        self.events.push(*event);
    }
}

/// Scripted input of `player` (0-based) at `frame`. Changes every frame so
/// every late input is a misprediction.
pub fn scripted_input(player: usize, frame: Frame) -> u8 {
    ((frame as usize * 7 + player * 3) % 5) as u8
}

/// Total a single machine reaches by simulating `frames` frames of scripted
/// input for `players` players.
pub fn reference_total(players: usize, frames: Frame) -> u32 {
    let mut game = TestGame::default();
    for f in 0..frames {
        let inputs: Vec<u8> = (0..players).map(|p| scripted_input(p, f)).collect();
        game.advance_frame(&inputs, 0);
    }
    game.total
}

pub struct Peer {
    pub session: TestSession,
    pub game: TestGame,
    pub local: PlayerHandle,
    pub addr: MemoryAddr,
}

impl Peer {
    pub fn poll(&mut self) {
        self.session.poll(&mut self.game, 0).unwrap();
    }

    /// One host tick with scripted input. Returns `false` when the session
    /// asked the host to wait.
    pub fn step(&mut self) -> bool {
        self.poll();
        let queue = self.local.0 - 1;
        let frame = self.session.frame_count();
        let input = [scripted_input(queue, frame)];
        match self.session.add_local_input(&mut self.game, self.local, &input) {
            Ok(()) => {}
            Err(RollnetError::PredictionThreshold) => return false,
            Err(err) => panic!("add_local_input failed: {err}"),
        }
        let mut buf = vec![0u8; self.session.config().num_players];
        let flags = self
            .session
            .synchronize_input(&mut self.game, &mut buf)
            .unwrap();
        self.game.advance_frame(&buf, flags);
        self.session.advance_frame(&mut self.game).unwrap();
        true
    }
}

/// Builds a fully connected mesh of `n` peers on `net`, peer `i` bound to
/// `MemoryAddr(i + 1)` and owning player `i + 1`.
pub fn mesh(net: &MemoryNetwork, clock: &ManualClock, config: &SessionConfig) -> Vec<Peer> {
    let n = config.num_players;
    (0..n)
        .map(|i| {
            let addr = MemoryAddr(i as u16 + 1);
            let mut game = TestGame::default();
            let mut session = P2PSession::new(
                "test",
                config.clone(),
                net.bind(addr),
                clock.clone(),
                &mut game,
            )
            .unwrap();
            let mut local = PlayerHandle(0);
            for j in 0..n {
                let player_type = if i == j {
                    PlayerType::Local
                } else {
                    PlayerType::Remote(MemoryAddr(j as u16 + 1))
                };
                let handle = session.add_player(player_type, j + 1).unwrap();
                if i == j {
                    local = handle;
                }
            }
            Peer {
                session,
                game,
                local,
                addr,
            }
        })
        .collect()
}

/// Polls every peer until all sessions are running.
pub fn synchronize(peers: &mut [Peer], clock: &ManualClock) {
    for _ in 0..200 {
        for peer in peers.iter_mut() {
            peer.poll();
        }
        if peers.iter().all(|p| p.session.is_running()) {
            return;
        }
        clock.advance(1);
    }
    panic!("peers did not synchronize");
}

/// Steps every peer until all have simulated `frames` frames, then keeps
/// polling so the last inputs arrive and late predictions are corrected.
pub fn run_frames(peers: &mut [Peer], clock: &ManualClock, frames: Frame) {
    for _ in 0..frames * 20 {
        if peers.iter().all(|p| p.session.frame_count() >= frames) {
            break;
        }
        for peer in peers.iter_mut() {
            if peer.session.frame_count() < frames {
                peer.step();
            } else {
                peer.poll();
            }
        }
        clock.advance(FRAME_MS);
    }
    assert!(
        peers.iter().all(|p| p.session.frame_count() == frames),
        "peers did not reach frame {frames}"
    );
    settle(peers, clock);
}

pub fn settle(peers: &mut [Peer], clock: &ManualClock) {
    for _ in 0..100 {
        for peer in peers.iter_mut() {
            peer.poll();
        }
        clock.advance(FRAME_MS);
    }
}
