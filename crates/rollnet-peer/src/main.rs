mod game;

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use rollnet::{
    Frame, NetworkConditions, P2PSession, PlayerHandle, PlayerType, RollnetError, Session,
    SessionCallbacks, SessionConfig, SyncTestConfig, SyncTestSession, SystemClock,
    UdpNonBlockingSocket,
};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::game::{Bot, INPUT_SIZE, PeerGame};

const GAME_NAME: &str = "rollnet-peer";
const FRAME_DURATION: Duration = Duration::from_micros(16_667);
const STATS_INTERVAL: Frame = 120;

/// Rollback netplay demo peer
#[derive(Parser, Debug)]
#[command(name = "rollnet-peer")]
#[command(about = "Headless peer driving a rollback session over UDP", long_about = None)]
struct Args {
    /// UDP port to bind
    #[arg(long, default_value = "7000")]
    local_port: u16,

    /// Player number of this peer (1-based)
    #[arg(short, long, default_value = "1")]
    player: usize,

    /// Remote peer addresses, in player order, skipping the local player
    #[arg(short, long)]
    remote: Vec<SocketAddr>,

    /// Spectator addresses to stream confirmed inputs to
    #[arg(long)]
    spectator: Vec<SocketAddr>,

    /// Number of frames to run
    #[arg(short, long, default_value = "600")]
    frames: u32,

    /// Input delay in frames for the local player
    #[arg(long, default_value = "0")]
    frame_delay: i32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    /// Run a single-process sync test instead of a network session
    #[arg(long)]
    sync_test: bool,

    /// Number of players simulated by the sync test
    #[arg(long, default_value = "2")]
    players: usize,

    /// Frames between sync-test rollbacks
    #[arg(long, default_value = "8")]
    check_distance: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if args.sync_test {
        run_sync_test(&args)
    } else {
        run_p2p(&args)
    }
}

fn run_p2p(args: &Args) -> anyhow::Result<()> {
    let num_players = args.remote.len() + 1;
    anyhow::ensure!(
        (1..=num_players).contains(&args.player),
        "player must be within 1..={num_players}"
    );

    let mut config = SessionConfig::new(num_players, INPUT_SIZE);
    config.network = NetworkConditions::from_env();
    if !config.network.is_ideal() {
        info!(
            latency_ms = config.network.send_latency_ms,
            out_of_order = config.network.out_of_order_percent,
            "simulating network conditions"
        );
    }

    let socket = UdpNonBlockingSocket::bind_to_port(args.local_port)?;
    let local_addr = socket.local_addr()?;
    info!(addr = %local_addr, "bound");

    let mut game = PeerGame::new(num_players);
    let mut session = P2PSession::new(GAME_NAME, config, socket, SystemClock::new(), &mut game)?;

    let local = session.add_player(PlayerType::Local, args.player)?;
    let mut remotes = Vec::with_capacity(args.remote.len());
    let remote_numbers = (1..=num_players).filter(|&n| n != args.player);
    for (number, addr) in remote_numbers.zip(&args.remote) {
        remotes.push(session.add_player(PlayerType::Remote(*addr), number)?);
    }
    for addr in &args.spectator {
        let handle = session.add_player(PlayerType::Spectator(*addr), 0)?;
        info!(%handle, %addr, "spectator added");
    }
    if args.frame_delay > 0 {
        session.set_frame_delay(local, args.frame_delay)?;
    }

    let mut bot = Bot::new(args.player as u64);
    let mut inputs = vec![0u8; num_players * INPUT_SIZE];
    let mut next_frame = Instant::now();
    let target = args.frames as Frame;

    while game.arena.frame < target {
        session.poll(&mut game, 0)?;

        let now = Instant::now();
        if now < next_frame {
            thread::sleep((next_frame - now).min(Duration::from_millis(1)));
            continue;
        }
        if !session.is_running() {
            next_frame = now + FRAME_DURATION;
            continue;
        }
        next_frame += FRAME_DURATION;

        if game.stall_frames > 0 {
            game.stall_frames -= 1;
            continue;
        }

        match session.add_local_input(&mut game, local, &[bot.next_input()]) {
            Ok(()) => {}
            Err(RollnetError::PredictionThreshold) => {
                debug!(frame = game.arena.frame, "waiting on remote inputs");
                continue;
            }
            Err(err) => return Err(err.into()),
        }
        let flags = session.synchronize_input(&mut game, &mut inputs)?;
        game.advance_frame(&inputs, flags);
        session.advance_frame(&mut game)?;

        if game.arena.frame % STATS_INTERVAL == 0 {
            log_stats(&session, &remotes, game.arena.frame);
        }
    }

    info!(
        frames = game.arena.frame,
        confirmed = session.last_confirmed_frame(),
        disconnected = ?game.disconnected,
        checksum = format_args!("{:#010x}", game.checksum()),
        "finished"
    );
    // Keep acknowledging for a moment so peers can confirm our last frames.
    let linger = Instant::now() + Duration::from_millis(500);
    while Instant::now() < linger {
        session.poll(&mut game, 1)?;
    }
    session.close(&mut game)?;
    Ok(())
}

fn log_stats(
    session: &P2PSession<UdpNonBlockingSocket, SystemClock>,
    remotes: &[PlayerHandle],
    frame: Frame,
) {
    for &player in remotes {
        match session.network_stats(player) {
            Ok(stats) => info!(
                frame,
                %player,
                ping = stats.ping,
                kbps = stats.kbps_sent,
                queue = stats.send_queue_len,
                local_behind = stats.local_frames_behind,
                remote_behind = stats.remote_frames_behind,
                "network stats"
            ),
            Err(err) => debug!(%player, %err, "no stats"),
        }
    }
}

fn run_sync_test(args: &Args) -> anyhow::Result<()> {
    let config = SyncTestConfig {
        num_players: args.players,
        input_size: INPUT_SIZE,
        check_distance: args.check_distance,
        ..SyncTestConfig::default()
    };

    let mut game = PeerGame::new(args.players);
    let mut session = SyncTestSession::new(GAME_NAME, config, &mut game)?;
    session.poll(&mut game, 0)?;

    let mut bots: Vec<Bot> = (1..=args.players).map(|n| Bot::new(n as u64)).collect();
    let mut inputs = vec![0u8; args.players * INPUT_SIZE];
    for _ in 0..args.frames {
        for (queue, bot) in bots.iter_mut().enumerate() {
            session.add_local_input(&mut game, PlayerHandle(queue + 1), &[bot.next_input()])?;
        }
        let flags = session.synchronize_input(&mut game, &mut inputs)?;
        game.advance_frame(&inputs, flags);
        session.advance_frame(&mut game)?;
    }

    let report = session.report().clone();
    session.close(&mut game)?;

    info!(
        frames = game.arena.frame,
        verified = report.frames_verified,
        checksum = format_args!("{:#010x}", game.checksum()),
        "sync test finished"
    );
    for mismatch in &report.mismatches {
        warn!(
            frame = mismatch.frame,
            original = format_args!("{:#010x}", mismatch.original.checksum),
            replayed = format_args!("{:#010x}", mismatch.replayed.checksum),
            "desync"
        );
    }
    anyhow::ensure!(
        report.is_clean(),
        "{} frames diverged on replay",
        report.mismatches.len()
    );
    Ok(())
}
