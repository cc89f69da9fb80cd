//! Session configuration.

use rollnet_proto::constants::{MAX_INPUT_BYTES, MAX_PLAYERS};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RollnetError};

pub const DEFAULT_MAX_PREDICTION_FRAMES: usize = 8;
pub const DEFAULT_DISCONNECT_TIMEOUT_MS: u32 = 5000;
pub const DEFAULT_DISCONNECT_NOTIFY_START_MS: u32 = 750;
pub const DEFAULT_RECOMMENDATION_INTERVAL: i32 = 240;
pub const DEFAULT_MAX_SPECTATORS: usize = 32;
pub const DEFAULT_CHECK_DISTANCE: usize = 8;

/// Environment variable holding the simulated send latency in milliseconds.
pub const NETWORK_DELAY_ENV: &str = "ROLLNET_NETWORK_DELAY";
/// Environment variable holding the out-of-order send percentage.
pub const OOP_PERCENT_ENV: &str = "ROLLNET_OOP_PERCENT";

/// Simulated network conditions applied to outgoing datagrams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConditions {
    /// Base send latency; each datagram is delayed by up to 1/3 more.
    pub send_latency_ms: u32,
    /// Chance (0..=100) of holding one datagram back to send it out of order.
    pub out_of_order_percent: u32,
}

impl NetworkConditions {
    /// Reads conditions from [`NETWORK_DELAY_ENV`] and [`OOP_PERCENT_ENV`].
    ///
    /// Missing or unparsable values count as zero.
    pub fn from_env() -> Self {
        fn read(key: &str) -> u32 {
            std::env::var(key)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0)
        }
        Self {
            send_latency_ms: read(NETWORK_DELAY_ENV),
            out_of_order_percent: read(OOP_PERCENT_ENV).min(100),
        }
    }

    pub fn is_ideal(&self) -> bool {
        self.send_latency_ms == 0 && self.out_of_order_percent == 0
    }
}

/// Configuration of a peer-to-peer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub num_players: usize,
    /// Bytes of input per player per frame.
    pub input_size: usize,
    pub max_prediction_frames: usize,
    pub disconnect_timeout_ms: u32,
    pub disconnect_notify_start_ms: u32,
    /// Frames between time-sync recommendations.
    pub recommendation_interval: i32,
    pub max_spectators: usize,
    pub network: NetworkConditions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            num_players: 2,
            input_size: 1,
            max_prediction_frames: DEFAULT_MAX_PREDICTION_FRAMES,
            disconnect_timeout_ms: DEFAULT_DISCONNECT_TIMEOUT_MS,
            disconnect_notify_start_ms: DEFAULT_DISCONNECT_NOTIFY_START_MS,
            recommendation_interval: DEFAULT_RECOMMENDATION_INTERVAL,
            max_spectators: DEFAULT_MAX_SPECTATORS,
            network: NetworkConditions::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(num_players: usize, input_size: usize) -> Self {
        Self {
            num_players,
            input_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_shape(self.num_players, self.input_size)?;
        if self.max_prediction_frames == 0 {
            return Err(RollnetError::InvalidRequest(
                "max_prediction_frames must be positive".into(),
            ));
        }
        if self.recommendation_interval <= 0 {
            return Err(RollnetError::InvalidRequest(
                "recommendation_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of a single-process sync-test session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTestConfig {
    pub num_players: usize,
    pub input_size: usize,
    /// Frames between rollback verifications.
    pub check_distance: usize,
    pub max_prediction_frames: usize,
}

impl Default for SyncTestConfig {
    fn default() -> Self {
        Self {
            num_players: 2,
            input_size: 1,
            check_distance: DEFAULT_CHECK_DISTANCE,
            max_prediction_frames: DEFAULT_MAX_PREDICTION_FRAMES,
        }
    }
}

impl SyncTestConfig {
    pub fn validate(&self) -> Result<()> {
        validate_shape(self.num_players, self.input_size)?;
        if self.check_distance == 0 || self.check_distance > self.max_prediction_frames {
            return Err(RollnetError::InvalidRequest(format!(
                "check_distance must be within 1..={}",
                self.max_prediction_frames
            )));
        }
        Ok(())
    }
}

fn validate_shape(num_players: usize, input_size: usize) -> Result<()> {
    if num_players == 0 || num_players > MAX_PLAYERS {
        return Err(RollnetError::InvalidRequest(format!(
            "num_players must be within 1..={MAX_PLAYERS}"
        )));
    }
    if input_size == 0 || input_size > MAX_INPUT_BYTES {
        return Err(RollnetError::InvalidRequest(format!(
            "input_size must be within 1..={MAX_INPUT_BYTES}"
        )));
    }
    Ok(())
}
