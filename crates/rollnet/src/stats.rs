use serde::{Deserialize, Serialize};

/// Connection statistics for one remote player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Inputs sent but not yet acknowledged.
    pub send_queue_len: usize,
    /// Round-trip time in milliseconds.
    pub ping: u32,
    pub kbps_sent: u32,
    /// Frames the local simulation is ahead of the remote one.
    pub local_frames_behind: i32,
    /// Frames the remote simulation reports being ahead.
    pub remote_frames_behind: i32,
}
