//! Interfaces towards the data link layer

use crate::codec::FlowStatus;
use crate::connection::Connection;
use crate::types::{DataLinkAddress, FrameIndex, FrameSize, MessageSize};

/// Sink for encoded frames on their way to the CAN hardware
///
/// `send_frame` reports whether the frame was accepted by the driver; the
/// protocol core retries rejected frames within its configured bounds.
pub trait FrameTransmitter {
    fn send_frame(&mut self, address: DataLinkAddress, payload: &[u8]) -> bool;
}

/// Receiver of decoded frames, implemented by the transport layer facade
///
/// Interrupt handlers deliver frames through this interface; every entry
/// point takes the current microsecond time so that timers can be armed
/// from ISR context.
pub trait FrameReceiver {
    /// A single frame or the first frame of a segmented transfer arrived
    fn first_data_frame_received(
        &mut self,
        connection: Connection,
        message_size: MessageSize,
        frame_count: FrameIndex,
        consecutive_frame_data_size: FrameSize,
        data: &[u8],
        now_us: u32,
    );

    /// A consecutive frame arrived
    fn consecutive_data_frame_received(
        &mut self,
        reception_address: DataLinkAddress,
        sequence_number: u8,
        data: &[u8],
        now_us: u32,
    );

    /// A flow control frame arrived
    fn flow_control_frame_received(
        &mut self,
        reception_address: DataLinkAddress,
        status: FlowStatus,
        block_size: u8,
        encoded_min_separation_time: u8,
        now_us: u32,
    );
}
