//! State and data for reception of a single transport message

use crate::codec::FrameCodec;
use crate::connection::Connection;
use crate::message::TransportMessage;
use crate::receiver::protocol::{ReceiveProtocolHandler, ReceiveResult, ReceiveState};
use crate::timer;
use crate::types::{DataLinkAddress, FrameIndex, FrameSize, MessageSize};

/// One in-flight inbound message
///
/// Lives in a pool block; the copy of the first frame payload lives in the
/// block's trailing bytes and is passed back in by the multiplexer where
/// needed.
#[derive(Debug)]
pub struct MessageReceiver {
    handler: ReceiveProtocolHandler,
    connection: Connection,
    message: Option<TransportMessage>,
    message_size: MessageSize,
    consecutive_frame_data_size: FrameSize,
    max_block_size: u8,
    encoded_min_separation_time: u8,
    timer: u32,
    timer_set: bool,
    blocked: bool,
}

impl MessageReceiver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connection: Connection,
        message_size: MessageSize,
        frame_count: FrameIndex,
        consecutive_frame_data_size: FrameSize,
        max_block_size: u8,
        encoded_min_separation_time: u8,
        blocked: bool,
    ) -> Self {
        Self {
            handler: ReceiveProtocolHandler::new(frame_count),
            connection,
            message: None,
            message_size,
            consecutive_frame_data_size,
            max_block_size,
            encoded_min_separation_time,
            timer: 0,
            timer_set: false,
            blocked,
        }
    }

    #[inline]
    #[must_use]
    pub fn handler(&self) -> &ReceiveProtocolHandler {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut ReceiveProtocolHandler {
        &mut self.handler
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> ReceiveState {
        self.handler.state()
    }

    #[inline]
    #[must_use]
    pub fn codec(&self) -> &FrameCodec {
        self.connection.codec()
    }

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

    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    #[inline]
    #[must_use]
    pub fn message_size(&self) -> MessageSize {
        self.message_size
    }

    #[inline]
    #[must_use]
    pub fn max_block_size(&self) -> u8 {
        self.max_block_size
    }

    #[inline]
    #[must_use]
    pub fn encoded_min_separation_time(&self) -> u8 {
        self.encoded_min_separation_time
    }

    #[inline]
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn set_blocked(&mut self, blocked: bool) {
        self.blocked = blocked;
    }

    /// The result of an allocation try; appends the first frame copy into a
    /// successfully allocated message
    pub fn allocated(
        &mut self,
        message: Option<TransportMessage>,
        max_retry_count: u8,
        first_frame_data: &[u8],
    ) -> ReceiveResult {
        let success = message.is_some();
        let result = self.handler.allocated(success, max_retry_count);
        if !self.handler.is_allocating()
            && let Some(mut message) = message
        {
            message.append(first_frame_data);
            self.message = Some(message);
        }
        result
    }

    /// Whether a consecutive frame is expected for this receiver
    #[inline]
    #[must_use]
    pub fn is_consecutive_frame_expected(&self) -> bool {
        self.message.is_some()
    }

    /// Expected payload length of the next consecutive frame
    ///
    /// The final frame of a transfer carries only the remainder.
    #[must_use]
    pub fn expected_consecutive_frame_data_size(&self) -> FrameSize {
        let Some(message) = &self.message else {
            return 0;
        };
        let remaining = usize::from(self.message_size) - message.valid_bytes();
        if usize::from(self.consecutive_frame_data_size) <= remaining {
            self.consecutive_frame_data_size
        } else {
            remaining as FrameSize
        }
    }

    /// A consecutive frame arrived; appends its payload unless the handler
    /// terminated the reception
    pub fn consecutive_frame_received(
        &mut self,
        sequence_number: u8,
        expected_size: FrameSize,
        data: &[u8],
    ) -> ReceiveResult {
        let result = self
            .handler
            .consecutive_frame_received(sequence_number, self.max_block_size);
        if self.handler.state() != ReceiveState::Done
            && let Some(message) = &mut self.message
        {
            message.append(&data[..usize::from(expected_size)]);
        }
        result
    }

    /// Detach the transport message for processing
    pub fn detach_message(&mut self) -> Option<TransportMessage> {
        self.message.take()
    }

    /// Release the transport message on teardown
    pub fn release(&mut self) -> Option<TransportMessage> {
        self.detach_message()
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
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::address::{DataLinkAddressPair, TransportAddressPair};

    fn receiver(message_size: MessageSize, frame_count: FrameIndex) -> MessageReceiver {
        let connection = Connection::new(
            FrameCodec::OPTIMIZED_CLASSICAL,
            DataLinkAddressPair::new(0x700, 0x708),
            TransportAddressPair::new(0xF1, 0x10),
        );
        MessageReceiver::new(connection, message_size, frame_count, 7, 0, 0, false)
    }

    fn message(capacity: usize, payload_length: usize) -> TransportMessage {
        let mut message = TransportMessage::new(capacity);
        message.set_payload_length(payload_length);
        message
    }

    #[test]
    fn test_reassembly_appends_first_frame_and_consecutive_frames() {
        let mut cut = receiver(10, 2);
        assert!(!cut.is_consecutive_frame_expected());

        let first_frame = [0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6];
        cut.allocated(Some(message(16, 10)), 1, &first_frame);
        assert!(cut.is_consecutive_frame_expected());
        assert_eq!(cut.expected_consecutive_frame_data_size(), 4);

        cut.handler_mut().frame_sent(true);
        let frame = [0xA7, 0xA8, 0xA9, 0xAA, 0x00, 0x00, 0x00];
        cut.consecutive_frame_received(1, 4, &frame);

        let reassembled = cut.detach_message().unwrap();
        assert_eq!(
            reassembled.payload(),
            &[0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, 0xA9, 0xAA]
        );
    }

    #[test]
    fn test_full_consecutive_frames_expect_the_codec_size() {
        let mut cut = receiver(20, 3);
        cut.allocated(Some(message(20, 20)), 1, &[0u8; 6]);
        assert_eq!(cut.expected_consecutive_frame_data_size(), 7);

        cut.handler_mut().frame_sent(true);
        cut.consecutive_frame_received(1, 7, &[0u8; 7]);
        assert_eq!(cut.expected_consecutive_frame_data_size(), 7);
        cut.consecutive_frame_received(2, 7, &[0u8; 7]);
        // 13 of 20 bytes received, the final frame carries the remainder
        assert!(cut.is_consecutive_frame_expected());
        assert_eq!(cut.state(), ReceiveState::Processing);
    }

    #[test]
    fn test_no_append_after_bad_sequence_number() {
        let mut cut = receiver(10, 2);
        cut.allocated(Some(message(16, 10)), 1, &[0u8; 6]);
        cut.handler_mut().frame_sent(true);

        cut.consecutive_frame_received(2, 4, &[0xA7, 0xA8, 0xA9, 0xAA]);
        assert_eq!(cut.state(), ReceiveState::Done);
        let message = cut.release().unwrap();
        assert_eq!(message.valid_bytes(), 6);
    }

    #[test]
    fn test_timer_update_and_ordering() {
        let mut early = receiver(10, 2);
        let mut late = receiver(10, 2);
        let unset = receiver(10, 2);

        early.set_timer(1000);
        late.set_timer(2000);
        assert!(early.sorts_before(&late));
        assert!(!late.sorts_before(&early));
        assert!(early.sorts_before(&unset));
        assert!(!unset.sorts_before(&early));

        assert!(!early.update_timer(999));
        assert!(early.update_timer(1000));
        // expired timers are cleared
        assert!(!early.update_timer(5000));
    }
}
