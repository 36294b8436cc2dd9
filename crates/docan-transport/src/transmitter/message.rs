//! State and data for transmission of a single transport message

use crate::codec::{FrameCodec, decode_min_separation_time_us};
use crate::connection::Connection;
use crate::message::TransportMessage;
use crate::timer;
use crate::transmitter::protocol::{TransmitProtocolHandler, TransmitResult, TransmitState};
use crate::types::{DataLinkAddress, FrameIndex};

/// One in-flight outbound message
#[derive(Debug)]
pub struct MessageTransmitter {
    handler: TransmitProtocolHandler,
    connection: Connection,
    message: Option<TransportMessage>,
    /// STmin adopted from the peer's last CTS
    encoded_min_separation_time: u8,
    timer: u32,
    timer_set: bool,
}

impl MessageTransmitter {
    pub fn new(connection: Connection, message: TransportMessage, frame_count: FrameIndex) -> Self {
        Self {
            handler: TransmitProtocolHandler::new(frame_count),
            connection,
            message: Some(message),
            encoded_min_separation_time: 0,
            timer: 0,
            timer_set: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn handler(&self) -> &TransmitProtocolHandler {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut TransmitProtocolHandler {
        &mut self.handler
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> TransmitState {
        self.handler.state()
    }

    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Where this transmitter's flow control frames arrive
    #[inline]
    #[must_use]
    pub fn reception_address(&self) -> DataLinkAddress {
        self.connection.reception_address()
    }

    #[inline]
    #[must_use]
    pub fn transmission_address(&self) -> DataLinkAddress {
        self.connection.transmission_address()
    }

    /// STmin to wait out between consecutive frames, in microseconds
    #[inline]
    #[must_use]
    pub fn min_separation_time_us(&self) -> u32 {
        decode_min_separation_time_us(self.encoded_min_separation_time)
    }

    /// Adopt the pacing from a received CTS
    pub fn adopt_flow_control(&mut self, encoded_min_separation_time: u8) {
        self.encoded_min_separation_time = encoded_min_separation_time;
    }

    /// Encode the next due frame into `buffer`
    ///
    /// Frame 0 is the single/first frame; every later frame is a
    /// consecutive frame whose sequence number is the low nibble of its
    /// index.
    pub fn encode_next_frame(&self, buffer: &mut [u8]) -> eyre::Result<usize> {
        let Some(message) = &self.message else {
            eyre::bail!("no message attached");
        };
        let codec: &FrameCodec = self.connection.codec();
        let payload = message.payload();
        let frame_index = self.handler.frame_index();
        if frame_index == 0 {
            if self.handler.frame_count() == 1 {
                return codec.encode_single_frame(payload, buffer);
            }
            let first = &payload[..usize::from(codec.first_frame_payload_size())];
            return codec.encode_first_frame(payload.len() as u16, first, buffer);
        }
        let first_size = usize::from(codec.first_frame_payload_size());
        let consecutive_size = usize::from(codec.consecutive_frame_payload_size());
        let start = first_size + (usize::from(frame_index) - 1) * consecutive_size;
        let end = usize::min(start + consecutive_size, payload.len());
        let sequence_number = (frame_index & 0x0F) as u8;
        codec.encode_consecutive_frame(sequence_number, &payload[start..end], buffer)
    }

    /// Detach the message on teardown
    pub fn release(&mut self) -> Option<TransportMessage> {
        self.message.take()
    }

    #[inline]
    #[must_use]
    pub fn timer_expired(&self, now_us: u32) -> bool {
        timer::expired(self.timer, now_us)
    }

    pub fn set_timer(&mut self, next_expiry_us: u32) {
        self.timer = next_expiry_us;
        self.timer_set = true;
    }

    /// Clear and report the timer if it has expired
    pub fn update_timer(&mut self, now_us: u32) -> bool {
        if !self.timer_set {
            return false;
        }
        if self.timer_expired(now_us) {
            self.timer_set = false;
            return true;
        }
        false
    }

    /// Ordering for the timer wheel: set timers first, earliest first
    #[must_use]
    pub fn sorts_before(&self, other: &Self) -> bool {
        if !self.timer_set {
            return false;
        }
        if !other.timer_set {
            return true;
        }
        timer::less(self.timer, other.timer)
    }

    /// The result of one event, applied to the embedded handler
    pub fn flow_control_received(
        &mut self,
        status: crate::codec::FlowStatus,
        block_size: u8,
        encoded_min_separation_time: u8,
        max_wait_count: u8,
    ) -> TransmitResult {
        if status == crate::codec::FlowStatus::ClearToSend {
            self.adopt_flow_control(encoded_min_separation_time);
        }
        self.handler
            .flow_control_received(status, block_size, max_wait_count)
    }
}
