/// Envelope version written by this implementation.
pub const PROTOCOL_VERSION: u16 = 1;

/// Capacity of the join and broadcast status windows.
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

/// Base seconds between group-announce attempts.
pub const DEFAULT_BROADCAST_DELAY_SECS: f64 = 1.0;

/// Floor and ceiling for the adaptive broadcast delay.
pub const DEFAULT_MIN_BROADCAST_DELAY_SECS: f64 = 0.25;
pub const DEFAULT_MAX_BROADCAST_DELAY_SECS: f64 = 60.0;

/// Age after which any peer may execute a pending task.
pub const DEFAULT_STALENESS_THRESHOLD_SECS: f64 = 30.0;

/// Extra random delay added to every workload round.
pub const DEFAULT_WORKLOAD_JITTER_MIN_SECS: f64 = 0.5;
pub const DEFAULT_WORKLOAD_JITTER_MAX_SECS: f64 = 1.0;

/// Number of resolved task keys each peer remembers.
pub const DEFAULT_RESOLVED_MEMORY: usize = 1024;

/// Depth of a peer's inbound frame queue.
pub const DEFAULT_INBOUND_BUFFER: usize = 1024;

/// Number of window entries a single novel join contributes when joins
/// are weighted: one tenth of the window.
pub const fn default_new_peer_damage(window_capacity: usize) -> usize {
    let damage = window_capacity / 10;
    if damage == 0 {
        1
    } else {
        damage
    }
}
