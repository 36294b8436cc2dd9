//! Semantic integer types of the data link layer
//!
//! The protocol core is written against these aliases rather than bare
//! integers; the frame codec carries all remaining per-preset variability
//! (frame lengths, padding).

/// Address of a frame on the data link layer (a CAN identifier)
pub type DataLinkAddress = u32;

/// Size of a reassembled transport message in bytes
pub type MessageSize = u16;

/// Index of a frame within a segmented transfer
pub type FrameIndex = u16;

/// Size of a single frame's payload in bytes
pub type FrameSize = u8;

/// Reserved data link address marking "no transmission address"
///
/// Functional-broadcast routing entries carry this as their transmission
/// address; only single-frame transfers are legal on such connections.
pub const INVALID_ADDRESS: DataLinkAddress = DataLinkAddress::MAX;
