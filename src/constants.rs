//! Application-wide constants

// =============================================================================
// Network
// =============================================================================

/// Default TCP port the gateway listens on for the EPOS
pub const DEFAULT_LISTEN_PORT: u16 = 3000;

/// Default payment terminal port
pub const DEFAULT_TERMINAL_PORT: u16 = 5189;

/// Default terminal link timeout (seconds)
pub const DEFAULT_TERMINAL_TIMEOUT_SECS: u64 = 30;

/// Socket read buffer size
pub const READ_BUFFER_SIZE: usize = 1024;

/// Outbound writer channel capacity
pub const CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Framing
// =============================================================================

/// Upper bound on one frame body; anything larger is rejected as malformed
pub const MAX_FRAME_SIZE: usize = 16384;

// =============================================================================
// Device
// =============================================================================

/// Receipt line width requested from the printout handlers
pub const PRINTOUT_LINE_LENGTH: usize = 40;

/// Attempts of the recovery check-status/act cycle before giving up
pub const RECOVERY_MAX_ATTEMPTS: u32 = 3;

/// Backoff between recovery attempts (milliseconds)
pub const RECOVERY_BACKOFF_MS: u64 = 250;
