/// Maximum number of players in one session.
pub const MAX_PLAYERS: usize = 4;

/// Maximum number of input bytes contributed by one player per frame.
pub const MAX_INPUT_BYTES: usize = 9;

/// Capacity of a single framed input buffer (all players combined).
pub const MAX_INPUT_BUFFER: usize = MAX_INPUT_BYTES * MAX_PLAYERS;

/// Fixed header length in bytes (wire format).
pub const HEADER_LEN: usize = 5;

/// Size of one serialized connect-status entry: `disconnected:u8, last_frame:i32`.
pub const CONNECT_STATUS_LEN: usize = 5;

/// Estimated UDP/IP overhead per datagram, used for bandwidth statistics.
pub const UDP_HEADER_SIZE: usize = 28;

/// Largest datagram the receive path will accept.
pub const MAX_UDP_PACKET_SIZE: usize = 4096;
