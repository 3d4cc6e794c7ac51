//! Metric name and label definitions.
//!
//! Every metric recorded by tether is named here so the set of exported
//! series can be read in one place.

/// Transport metrics
pub mod transport {
    /// Total number of connection attempts
    pub const CONNECTION_ATTEMPTS_TOTAL: &str = "tether_transport_connection_attempts_total";
    /// Total number of inbound frames received
    pub const FRAMES_RECEIVED_TOTAL: &str = "tether_transport_frames_received_total";
    /// Total number of payloads sent back to the peer
    pub const PAYLOADS_SENT_TOTAL: &str = "tether_transport_payloads_sent_total";
}

/// Fragment buffer metrics
pub mod buffer {
    /// Total number of fragments held back awaiting completion
    pub const FRAGMENTS_BUFFERED_TOTAL: &str = "tether_buffer_fragments_buffered_total";
    /// Total number of logical messages released, by how they completed
    pub const MESSAGES_RELEASED_TOTAL: &str = "tether_buffer_messages_released_total";
    /// Total number of messages force-completed by the staleness window
    pub const STALE_EVICTIONS_TOTAL: &str = "tether_buffer_stale_evictions_total";
    /// Total number of duplicate fragments dropped
    pub const DUPLICATES_DROPPED_TOTAL: &str = "tether_buffer_duplicates_dropped_total";
}

/// Inference turn metrics
pub mod turns {
    /// Total number of turns, by outcome
    pub const TURNS_TOTAL: &str = "tether_turns_total";
    /// Duration of inference requests in seconds
    pub const INFERENCE_DURATION_SECONDS: &str = "tether_inference_duration_seconds";
}

/// Common label keys
pub mod labels {
    pub const OUTCOME: &str = "outcome";
    pub const COMPLETION: &str = "completion";
    pub const MODE: &str = "mode";
}
