//! Peer-to-peer rollback session.

use std::{thread, time::Duration};

use rollnet_proto::{ConnectStatus, constants::MAX_PLAYERS};
use tracing::{debug, info, trace, warn};

use super::Session;
use crate::{
    callbacks::SessionCallbacks,
    clock::Clock,
    config::SessionConfig,
    error::{Result, RollnetError},
    event::SessionEvent,
    input::{Frame, GameInput, NULL_FRAME},
    player::{PlayerHandle, PlayerType},
    protocol::{PeerProtocol, ProtocolEvent},
    stats::NetworkStats,
    sync::{SyncConfig, SyncEngine},
    transport::NonBlockingSocket,
};

/// Session between players on different machines.
///
/// Owns one [`PeerProtocol`] per remote player and spectator, the
/// [`SyncEngine`], and the connect-status table mirrored to every peer.
pub struct P2PSession<S: NonBlockingSocket, C: Clock> {
    config: SessionConfig,
    socket: S,
    clock: C,
    sync: SyncEngine,
    /// Indexed by queue; `None` for local players and unassigned slots.
    endpoints: Vec<Option<PeerProtocol<S::Address>>>,
    spectators: Vec<PeerProtocol<S::Address>>,
    local_players: Vec<usize>,
    local_connect_status: [ConnectStatus; MAX_PLAYERS],
    synchronizing: bool,
    next_recommended_sleep: Frame,
    next_spectator_frame: Frame,
    closed: bool,
}

impl<S: NonBlockingSocket, C: Clock> P2PSession<S, C> {
    /// Starts a session and calls [`SessionCallbacks::begin_game`].
    pub fn new(
        game_name: &str,
        config: SessionConfig,
        socket: S,
        clock: C,
        callbacks: &mut impl SessionCallbacks,
    ) -> Result<Self> {
        config.validate()?;
        let sync = SyncEngine::new(SyncConfig {
            num_players: config.num_players,
            input_size: config.input_size,
            max_prediction_frames: config.max_prediction_frames,
        });
        info!(
            game_name,
            num_players = config.num_players,
            input_size = config.input_size,
            "starting p2p session"
        );
        callbacks.begin_game(game_name);

        Ok(Self {
            endpoints: (0..config.num_players).map(|_| None).collect(),
            spectators: Vec::new(),
            local_players: Vec::new(),
            local_connect_status: [ConnectStatus::default(); MAX_PLAYERS],
            synchronizing: true,
            next_recommended_sleep: 0,
            next_spectator_frame: 0,
            closed: false,
            config,
            socket,
            clock,
            sync,
        })
    }

    /// Registers a participant.
    ///
    /// `player_num` is 1-based and ignored for spectators, which are numbered
    /// in the order they are added.
    pub fn add_player(
        &mut self,
        player_type: PlayerType<S::Address>,
        player_num: usize,
    ) -> Result<PlayerHandle> {
        self.ensure_open()?;
        let now = self.clock.now_ms();

        let remote_addr = match player_type {
            PlayerType::Spectator(addr) => return self.add_spectator(addr, now),
            PlayerType::Local => None,
            PlayerType::Remote(addr) => Some(addr),
        };

        let queue = player_num
            .checked_sub(1)
            .filter(|&q| q < self.config.num_players)
            .ok_or(RollnetError::PlayerOutOfRange(player_num))?;
        if self.local_players.contains(&queue) || self.endpoints[queue].is_some() {
            return Err(RollnetError::InvalidRequest(format!(
                "player {player_num} already added"
            )));
        }

        let handle = PlayerHandle::from_queue(queue);
        match remote_addr {
            None => {
                debug!(player = %handle, "adding local player");
                self.local_players.push(queue);
            }
            Some(addr) => {
                debug!(player = %handle, ?addr, "adding remote player");
                let mut endpoint = self.new_endpoint(handle, addr);
                endpoint.synchronize(now);
                self.endpoints[queue] = Some(endpoint);
            }
        }
        Ok(handle)
    }

    pub fn frame_count(&self) -> Frame {
        self.sync.frame_count()
    }

    pub fn last_confirmed_frame(&self) -> Frame {
        self.sync.last_confirmed_frame()
    }

    /// True once every peer has completed the handshake.
    pub fn is_running(&self) -> bool {
        !self.synchronizing && !self.closed
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Connect status of the player behind `player`, as this session sees it.
    pub fn connect_status(&self, player: PlayerHandle) -> Result<ConnectStatus> {
        let queue = self.player_queue(player)?;
        Ok(self.local_connect_status[queue])
    }

    fn add_spectator(&mut self, addr: S::Address, now: u32) -> Result<PlayerHandle> {
        if self.spectators.len() >= self.config.max_spectators {
            return Err(RollnetError::TooManySpectators);
        }
        // Spectators only receive frames confirmed after they join, so they
        // must be added before the session starts running.
        if !self.synchronizing {
            return Err(RollnetError::InvalidRequest(
                "spectators must be added before the session is running".into(),
            ));
        }
        let handle = PlayerHandle::from_spectator(self.spectators.len());
        debug!(player = %handle, ?addr, "adding spectator");
        let mut endpoint = self.new_endpoint(handle, addr);
        endpoint.synchronize(now);
        self.spectators.push(endpoint);
        Ok(handle)
    }

    fn new_endpoint(&self, handle: PlayerHandle, addr: S::Address) -> PeerProtocol<S::Address> {
        let mut endpoint = PeerProtocol::new(handle, addr, self.config.network);
        endpoint.set_disconnect_timeout(self.config.disconnect_timeout_ms);
        endpoint.set_disconnect_notify_start(self.config.disconnect_notify_start_ms);
        endpoint
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(RollnetError::InvalidSession)
        } else {
            Ok(())
        }
    }

    fn player_queue(&self, player: PlayerHandle) -> Result<usize> {
        player
            .0
            .checked_sub(1)
            .filter(|&q| q < self.config.num_players)
            .ok_or(RollnetError::InvalidPlayerHandle(player.0))
    }

    fn do_poll(&mut self, callbacks: &mut impl SessionCallbacks, timeout_ms: u32) {
        if self.sync.in_rollback() {
            return;
        }
        let now = self.clock.now_ms();
        self.pump_network(now);
        self.poll_protocol_events(callbacks);

        if self.synchronizing {
            return;
        }

        self.sync
            .check_simulation(&self.local_connect_status, callbacks);

        let current_frame = self.sync.frame_count();
        for endpoint in self.endpoints.iter_mut().flatten() {
            endpoint.set_local_frame_number(current_frame);
        }

        let total_min_confirmed = self.poll_n_players(callbacks);
        if total_min_confirmed >= 0 && total_min_confirmed != Frame::MAX {
            self.send_confirmed_to_spectators(callbacks, total_min_confirmed, now);
            trace!(frame = total_min_confirmed, "setting last confirmed frame");
            self.sync.set_last_confirmed_frame(total_min_confirmed);
        }

        if current_frame > self.next_recommended_sleep {
            let interval = self
                .endpoints
                .iter()
                .flatten()
                .map(PeerProtocol::recommend_frame_delay)
                .max()
                .unwrap_or(0);
            if interval > 0 {
                debug!(frames_ahead = interval, "recommending time sync");
                callbacks.on_event(&SessionEvent::TimeSync {
                    frames_ahead: interval,
                });
                self.next_recommended_sleep = current_frame + self.config.recommendation_interval;
            }
        }

        if timeout_ms > 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Drains the socket, routes datagrams, runs protocol timers and flushes
    /// outgoing queues.
    fn pump_network(&mut self, now: u32) {
        for (from, msg) in self.socket.receive_all_messages() {
            let endpoint = self
                .endpoints
                .iter_mut()
                .flatten()
                .chain(self.spectators.iter_mut())
                .find(|e| e.handles_msg(&from));
            match endpoint {
                Some(endpoint) => endpoint.on_msg(&msg, now),
                None => trace!(?from, msg_type = ?msg.msg_type(), "datagram from unknown sender"),
            }
        }

        for endpoint in self
            .endpoints
            .iter_mut()
            .flatten()
            .chain(self.spectators.iter_mut())
        {
            endpoint.poll(&self.local_connect_status, now);
            endpoint.pump_send_queue(&mut self.socket, now);
        }
    }

    fn flush_endpoints(&mut self, now: u32) {
        for endpoint in self
            .endpoints
            .iter_mut()
            .flatten()
            .chain(self.spectators.iter_mut())
        {
            endpoint.pump_send_queue(&mut self.socket, now);
        }
    }

    fn poll_protocol_events(&mut self, callbacks: &mut impl SessionCallbacks) {
        for queue in 0..self.endpoints.len() {
            let events: Vec<ProtocolEvent> = match self.endpoints[queue].as_mut() {
                Some(endpoint) => std::iter::from_fn(|| endpoint.poll_event()).collect(),
                None => continue,
            };
            for event in events {
                self.on_player_event(callbacks, queue, event);
            }
        }

        for index in 0..self.spectators.len() {
            let endpoint = &mut self.spectators[index];
            let events: Vec<ProtocolEvent> = std::iter::from_fn(|| endpoint.poll_event()).collect();
            for event in events {
                self.on_spectator_event(callbacks, index, event);
            }
        }
    }

    /// Events every endpoint kind reports the same way. Returns `false` for
    /// events the caller must handle.
    fn on_common_event(
        &mut self,
        callbacks: &mut impl SessionCallbacks,
        player: PlayerHandle,
        event: &ProtocolEvent,
    ) -> bool {
        match *event {
            ProtocolEvent::Connected => {
                callbacks.on_event(&SessionEvent::ConnectedToPeer { player });
            }
            ProtocolEvent::Synchronizing { count, total } => {
                callbacks.on_event(&SessionEvent::SynchronizingWithPeer {
                    player,
                    count,
                    total,
                });
            }
            ProtocolEvent::Synchronized => {
                callbacks.on_event(&SessionEvent::SynchronizedWithPeer { player });
                self.check_initial_sync(callbacks);
            }
            ProtocolEvent::NetworkInterrupted {
                disconnect_timeout_ms,
            } => {
                callbacks.on_event(&SessionEvent::ConnectionInterrupted {
                    player,
                    disconnect_timeout_ms,
                });
            }
            ProtocolEvent::NetworkResumed => {
                callbacks.on_event(&SessionEvent::ConnectionResumed { player });
            }
            ProtocolEvent::Input(_) | ProtocolEvent::Disconnected => return false,
        }
        true
    }

    fn on_player_event(
        &mut self,
        callbacks: &mut impl SessionCallbacks,
        queue: usize,
        event: ProtocolEvent,
    ) {
        let player = PlayerHandle::from_queue(queue);
        if self.on_common_event(callbacks, player, &event) {
            return;
        }
        match event {
            ProtocolEvent::Input(input) => {
                let status = &mut self.local_connect_status[queue];
                if status.disconnected {
                    return;
                }
                if input.size() != self.config.input_size {
                    warn!(queue, size = input.size(), "dropping remote input of wrong size");
                    return;
                }
                trace!(queue, frame = input.frame, "remote input");
                status.last_frame = input.frame;
                self.sync.add_remote_input(queue, input);
            }
            ProtocolEvent::Disconnected => {
                if let Err(err) = self.disconnect_player(callbacks, player) {
                    trace!(player = %player, %err, "peer already disconnected");
                }
            }
            _ => {}
        }
    }

    fn on_spectator_event(
        &mut self,
        callbacks: &mut impl SessionCallbacks,
        index: usize,
        event: ProtocolEvent,
    ) {
        let player = PlayerHandle::from_spectator(index);
        if self.on_common_event(callbacks, player, &event) {
            return;
        }
        if event == ProtocolEvent::Disconnected {
            let now = self.clock.now_ms();
            self.disconnect_spectator(callbacks, index, now);
        }
    }

    /// Minimum frame confirmed by every player, disconnecting players that
    /// some peer reports as gone.
    fn poll_n_players(&mut self, callbacks: &mut impl SessionCallbacks) -> Frame {
        let mut total_min_confirmed = Frame::MAX;
        for queue in 0..self.config.num_players {
            let mut queue_connected = true;
            let mut queue_min_confirmed = Frame::MAX;
            for endpoint in self.endpoints.iter().flatten().filter(|e| e.is_running()) {
                let (connected, last_received) = endpoint.peer_connect_status(queue);
                queue_connected &= connected;
                queue_min_confirmed = queue_min_confirmed.min(last_received);
            }

            let local = self.local_connect_status[queue];
            if !local.disconnected {
                queue_min_confirmed = queue_min_confirmed.min(local.last_frame);
            }

            if queue_connected {
                total_min_confirmed = total_min_confirmed.min(queue_min_confirmed);
            } else if !local.disconnected || local.last_frame > queue_min_confirmed {
                // A peer saw this player drop earlier than we did.
                debug!(queue, frame = queue_min_confirmed, "disconnecting queue by peer report");
                self.disconnect_player_queue(callbacks, queue, queue_min_confirmed);
            }
        }
        total_min_confirmed
    }

    fn send_confirmed_to_spectators(
        &mut self,
        callbacks: &mut impl SessionCallbacks,
        total_min_confirmed: Frame,
        now: u32,
    ) {
        if self.spectators.is_empty() {
            return;
        }
        while self.next_spectator_frame <= total_min_confirmed {
            let frame = self.next_spectator_frame;
            let Some((input, _)) = self
                .sync
                .confirmed_inputs(frame, &self.local_connect_status)
            else {
                warn!(frame, "confirmed input missing, spectators fall behind");
                break;
            };
            trace!(frame, "sending confirmed frame to spectators");
            for index in 0..self.spectators.len() {
                let spectator = &mut self.spectators[index];
                if !spectator.is_initialized() {
                    continue;
                }
                if spectator.is_running() && spectator.is_send_queue_full() {
                    warn!(
                        player = %spectator.handle(),
                        frame,
                        "spectator stopped acknowledging input"
                    );
                    self.disconnect_spectator(callbacks, index, now);
                    continue;
                }
                spectator.send_input(&input, &self.local_connect_status, now);
            }
            self.next_spectator_frame += 1;
        }
    }

    fn disconnect_spectator(
        &mut self,
        callbacks: &mut impl SessionCallbacks,
        index: usize,
        now: u32,
    ) {
        let spectator = &mut self.spectators[index];
        if spectator.is_disconnected() {
            return;
        }
        spectator.disconnect(now);
        callbacks.on_event(&SessionEvent::DisconnectedFromPeer {
            player: PlayerHandle::from_spectator(index),
        });
    }

    fn disconnect_player_queue(
        &mut self,
        callbacks: &mut impl SessionCallbacks,
        queue: usize,
        syncto: Frame,
    ) {
        let now = self.clock.now_ms();
        let framecount = self.sync.frame_count();
        let player = PlayerHandle::from_queue(queue);

        if let Some(endpoint) = self.endpoints[queue].as_mut()
            && !endpoint.is_disconnected()
        {
            endpoint.disconnect(now);
        }

        let was_disconnected = self.local_connect_status[queue].disconnected;
        info!(%player, syncto, framecount, "player disconnected");
        self.local_connect_status[queue] = ConnectStatus {
            disconnected: true,
            last_frame: syncto,
        };

        if (0..framecount).contains(&syncto) {
            let seek_to = self
                .sync
                .first_incorrect_frame()
                .map_or(syncto, |f| f.min(syncto));
            debug!(queue, seek_to, "replaying without disconnected player");
            self.sync
                .adjust_simulation(seek_to, &self.local_connect_status, callbacks);
        }

        if !was_disconnected {
            callbacks.on_event(&SessionEvent::DisconnectedFromPeer { player });
        }
        self.check_initial_sync(callbacks);
    }

    fn check_initial_sync(&mut self, callbacks: &mut impl SessionCallbacks) {
        if !self.synchronizing {
            return;
        }
        let players_ready = self.endpoints.iter().enumerate().all(|(queue, endpoint)| {
            endpoint.as_ref().is_none_or(|e| {
                !e.is_initialized() || e.is_synchronized() || self.local_connect_status[queue].disconnected
            })
        });
        let spectators_ready = self
            .spectators
            .iter()
            .all(|s| !s.is_initialized() || s.is_synchronized());
        if players_ready && spectators_ready {
            info!("all peers synchronized, session running");
            callbacks.on_event(&SessionEvent::Running);
            self.synchronizing = false;
        }
    }
}

impl<S: NonBlockingSocket, C: Clock> Session for P2PSession<S, C> {
    fn add_local_input<CB: SessionCallbacks>(
        &mut self,
        callbacks: &mut CB,
        player: PlayerHandle,
        input: &[u8],
    ) -> Result<()> {
        self.ensure_open()?;
        if self.sync.in_rollback() {
            return Err(RollnetError::InRollback);
        }
        if self.synchronizing {
            return Err(RollnetError::NotSynchronized);
        }
        let queue = self.player_queue(player)?;
        if !self.local_players.contains(&queue) {
            return Err(RollnetError::InvalidPlayerHandle(player.0));
        }
        if input.len() != self.config.input_size {
            return Err(RollnetError::InvalidRequest(format!(
                "input is {} bytes, expected {}",
                input.len(),
                self.config.input_size
            )));
        }

        let input = GameInput::new(NULL_FRAME, Some(input), self.config.input_size);
        let stored = self.sync.add_local_input(queue, input, callbacks)?;
        let Some(last) = stored.last() else {
            trace!(queue, "local input absorbed by frame delay change");
            return Ok(());
        };

        // The frame is confirmed locally as soon as it is queued.
        self.local_connect_status[queue].last_frame = last.frame;
        let now = self.clock.now_ms();
        for endpoint in self
            .endpoints
            .iter_mut()
            .flatten()
            .filter(|e| e.is_initialized())
        {
            for input in &stored {
                endpoint.send_input(input, &self.local_connect_status, now);
            }
        }
        self.flush_endpoints(now);
        Ok(())
    }

    fn synchronize_input<CB: SessionCallbacks>(
        &mut self,
        callbacks: &mut CB,
        out: &mut [u8],
    ) -> Result<u32> {
        self.ensure_open()?;
        if self.synchronizing {
            return Err(RollnetError::NotSynchronized);
        }
        if out.len() < self.sync.combined_input_size() {
            return Err(RollnetError::InvalidRequest(format!(
                "input buffer is {} bytes, need {}",
                out.len(),
                self.sync.combined_input_size()
            )));
        }
        self.sync.save_initial_frame(callbacks);
        let size = self.sync.combined_input_size();
        Ok(self
            .sync
            .synchronize_inputs(&self.local_connect_status, &mut out[..size]))
    }

    fn advance_frame<CB: SessionCallbacks>(&mut self, callbacks: &mut CB) -> Result<()> {
        self.ensure_open()?;
        trace!(frame = self.sync.frame_count(), "end of frame");
        self.sync.increment_frame(callbacks);
        self.do_poll(callbacks, 0);
        Ok(())
    }

    fn poll<CB: SessionCallbacks>(&mut self, callbacks: &mut CB, timeout_ms: u32) -> Result<()> {
        self.ensure_open()?;
        self.do_poll(callbacks, timeout_ms);
        Ok(())
    }

    fn disconnect_player<CB: SessionCallbacks>(
        &mut self,
        callbacks: &mut CB,
        player: PlayerHandle,
    ) -> Result<()> {
        self.ensure_open()?;
        let queue = self.player_queue(player)?;
        if self.local_connect_status[queue].disconnected {
            return Err(RollnetError::PlayerDisconnected);
        }

        if self.endpoints[queue].is_none() {
            // Disconnecting a local player drops us from every remote.
            let current_frame = self.sync.frame_count();
            info!(%player, current_frame, "disconnecting local player");
            let remotes: Vec<usize> = self
                .endpoints
                .iter()
                .enumerate()
                .filter(|(_, e)| e.as_ref().is_some_and(|e| e.is_initialized()))
                .map(|(q, _)| q)
                .collect();
            for remote in remotes {
                self.disconnect_player_queue(callbacks, remote, current_frame);
            }
        } else {
            let last_frame = self.local_connect_status[queue].last_frame;
            info!(%player, last_frame, "disconnecting remote player");
            self.disconnect_player_queue(callbacks, queue, last_frame);
        }
        Ok(())
    }

    fn network_stats(&self, player: PlayerHandle) -> Result<NetworkStats> {
        self.ensure_open()?;
        let endpoint = if player.is_spectator() {
            self.spectators
                .get(player.0 - PlayerHandle::FIRST_SPECTATOR)
                .ok_or(RollnetError::InvalidPlayerHandle(player.0))?
        } else {
            let queue = self.player_queue(player)?;
            self.endpoints[queue]
                .as_ref()
                .ok_or_else(|| RollnetError::InvalidRequest(format!("player {player} is local")))?
        };
        Ok(endpoint.network_stats())
    }

    fn set_frame_delay(&mut self, player: PlayerHandle, delay: i32) -> Result<()> {
        self.ensure_open()?;
        let queue = self.player_queue(player)?;
        if delay < 0 {
            return Err(RollnetError::InvalidRequest(format!(
                "frame delay must not be negative, got {delay}"
            )));
        }
        self.sync.set_frame_delay(queue, delay);
        Ok(())
    }

    fn set_disconnect_timeout(&mut self, timeout_ms: u32) -> Result<()> {
        self.ensure_open()?;
        self.config.disconnect_timeout_ms = timeout_ms;
        for endpoint in self
            .endpoints
            .iter_mut()
            .flatten()
            .chain(self.spectators.iter_mut())
        {
            endpoint.set_disconnect_timeout(timeout_ms);
        }
        Ok(())
    }

    fn set_disconnect_notify_start(&mut self, timeout_ms: u32) -> Result<()> {
        self.ensure_open()?;
        self.config.disconnect_notify_start_ms = timeout_ms;
        for endpoint in self
            .endpoints
            .iter_mut()
            .flatten()
            .chain(self.spectators.iter_mut())
        {
            endpoint.set_disconnect_notify_start(timeout_ms);
        }
        Ok(())
    }

    fn close<CB: SessionCallbacks>(&mut self, callbacks: &mut CB) -> Result<()> {
        self.ensure_open()?;
        info!(frame = self.sync.frame_count(), "closing p2p session");
        self.sync.free_snapshots(callbacks);
        self.closed = true;
        Ok(())
    }
}
