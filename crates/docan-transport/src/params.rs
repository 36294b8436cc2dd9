//! Connection parameters for the transport layer

use serde::{Deserialize, Serialize};

/// Timing and pacing parameters shared by all connections of one bus
///
/// The millisecond timeouts are converted to the microsecond timer domain
/// when a timer is armed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportParameters {
    /// Back-off between transport message allocation attempts
    pub wait_allocate_timeout_ms: u16,
    /// N_Cr: inter-consecutive-frame reception timeout
    pub wait_rx_timeout_ms: u16,
    /// N_Bs: flow control reception timeout on the transmit side
    pub wait_flow_control_timeout_ms: u16,
    /// Bound on allocation retries for a segmented transfer
    pub max_allocate_retry_count: u8,
    /// Bound on WAIT flow control frames accepted from a peer
    pub max_flow_control_wait_count: u8,
    /// Bound on data link send retries for a single frame
    pub max_frame_send_retry_count: u8,
    /// BS we advertise in emitted flow control frames; 0 = no flow control
    pub max_block_size: u8,
    /// STmin we advertise in emitted flow control frames (encoded)
    pub encoded_min_separation_time: u8,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            wait_allocate_timeout_ms: 100,
            wait_rx_timeout_ms: 1000,
            wait_flow_control_timeout_ms: 1000,
            max_allocate_retry_count: 15,
            max_flow_control_wait_count: 15,
            max_frame_send_retry_count: 3,
            max_block_size: 0,
            encoded_min_separation_time: 0,
        }
    }
}
