//! Multiplexed transmission of transport messages
//!
//! The transmitter owns a pool of per-message state machines, consumes
//! flow control frames addressed to them, paces consecutive frames by the
//! peer's STmin through the high-frequency `tick` callback, and drives the
//! flow control timeout from the cyclic task. Deferred destruction follows
//! the same remove-lock pattern as the receiver.

pub mod message;
pub mod protocol;

use std::cmp::Ordering;

use docan_util::pool::{BlockIndex, BlockPool};

pub use crate::transmitter::message::MessageTransmitter;
pub use crate::transmitter::protocol::{
    TransmitMessage, TransmitProtocolHandler, TransmitResult, TransmitState, TransmitTimeout,
};

use crate::codec::FlowStatus;
use crate::connection::Connection;
use crate::datalink::FrameTransmitter;
use crate::interrupts;
use crate::message::{ProcessingResult, TransportMessage, TransportMessageProcessedListener};
use crate::params::TransportParameters;
use crate::types::{DataLinkAddress, MessageSize};

/// Why a message was not accepted for transmission
#[derive(Debug)]
pub enum SendError {
    /// The source and target transport addresses are equal
    InvalidAddressPair(TransportMessage),
    /// There is no route for the transport address pair
    NoRoute(TransportMessage),
    /// The route has no transmission address (functional entry)
    NoTransmissionAddress(TransportMessage),
    /// The payload is empty or exceeds the first frame length field
    MessageTooLarge(TransportMessage),
    /// All message transmitters are in use
    NoCapacity(TransportMessage),
}

impl SendError {
    /// Get the rejected message back
    pub fn into_message(self) -> TransportMessage {
        match self {
            SendError::InvalidAddressPair(message)
            | SendError::NoRoute(message)
            | SendError::NoTransmissionAddress(message)
            | SendError::MessageTooLarge(message)
            | SendError::NoCapacity(message) => message,
        }
    }
}

/// Parallel transmission of transport messages on one bus
pub struct Transmitter<L, F>
where
    L: TransportMessageProcessedListener,
    F: FrameTransmitter,
{
    listener: L,
    frame_transmitter: F,
    pool: BlockPool<MessageTransmitter>,
    order: Vec<BlockIndex>,
    parameters: TransportParameters,
    remove_lock_count: u8,
    released_transmitter_count: u8,
    timers_updated: bool,
}

impl<L, F> Transmitter<L, F>
where
    L: TransportMessageProcessedListener,
    F: FrameTransmitter,
{
    pub fn new(
        listener: L,
        frame_transmitter: F,
        parameters: TransportParameters,
        capacity: usize,
    ) -> Self {
        Self {
            listener,
            frame_transmitter,
            pool: BlockPool::new(capacity, 0),
            order: Vec::with_capacity(capacity),
            parameters,
            remove_lock_count: 0,
            released_transmitter_count: 0,
            timers_updated: false,
        }
    }

    /// Check integration invariants
    pub fn init(&self) {
        assert!(self.pool.capacity() > 0);
    }

    /// Cancel every active transmission
    pub fn shutdown(&mut self, now_us: u32) {
        self.with_remove_guard(|transmitter| {
            for position in 0..transmitter.order.len() {
                let index = transmitter.order[position];
                let _lock = interrupts::suspend();
                if let Some(result) = transmitter
                    .pool
                    .get_mut(index)
                    .map(|m| m.handler_mut().shutdown())
                {
                    transmitter.handle_transitions(index, result, "shutdown", now_us);
                }
            }
        });
    }

    #[inline]
    #[must_use]
    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    /// Number of transmitters currently hosted
    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.order.len()
    }

    /// Whether consecutive frames remain to be sent
    ///
    /// The integrator keeps the high-frequency tick source running while
    /// this is true.
    #[must_use]
    pub fn is_sending_consecutive_frames(&self) -> bool {
        self.order.iter().any(|&index| {
            matches!(
                self.pool.get(index).map(|m| m.state()),
                Some(TransmitState::Send) | Some(TransmitState::WaitSeparation)
            )
        })
    }

    /// Accept a message for transmission on `connection`
    pub fn send(
        &mut self,
        connection: Connection,
        message: TransportMessage,
        now_us: u32,
    ) -> Result<(), SendError> {
        if !connection.transport().is_valid() {
            return Err(SendError::InvalidAddressPair(message));
        }
        if !connection.data_link().has_transmission_address() {
            return Err(SendError::NoTransmissionAddress(message));
        }
        let payload_length = message.payload().len();
        let codec = connection.codec();
        if payload_length == 0 || payload_length > usize::from(codec.max_message_size()) {
            return Err(SendError::MessageTooLarge(message));
        }
        let (frame_count, _) = codec.frame_count(payload_length as MessageSize);

        self.with_remove_guard(|transmitter| {
            let index = {
                let _lock = interrupts::suspend();
                if transmitter.pool.is_full() {
                    return Err(SendError::NoCapacity(message));
                }
                let message_transmitter = MessageTransmitter::new(connection, message, frame_count);
                match transmitter.pool.allocate(message_transmitter, &[]) {
                    Ok(index) => {
                        transmitter.order.push(index);
                        index
                    }
                    Err(mut message_transmitter) => {
                        let message = message_transmitter
                            .release()
                            .unwrap_or_else(|| TransportMessage::new(0));
                        return Err(SendError::NoCapacity(message));
                    }
                }
            };
            let result = transmitter.handle_transition(index, now_us);
            transmitter.handle_transitions(index, result, "send", now_us);
            Ok(())
        })
    }

    /// A flow control frame arrived on `reception_address`
    pub fn flow_control_frame_received(
        &mut self,
        reception_address: DataLinkAddress,
        status: FlowStatus,
        block_size: u8,
        encoded_min_separation_time: u8,
        now_us: u32,
    ) {
        let Some(index) = self.find_message_transmitter(reception_address) else {
            tracing::warn!("unexpected FC on {reception_address:#X} dropped");
            return;
        };
        let max_wait_count = self.parameters.max_flow_control_wait_count;
        self.with_remove_guard(|transmitter| {
            let _lock = interrupts::suspend();
            if let Some(result) = transmitter.pool.get_mut(index).map(|m| {
                m.flow_control_received(status, block_size, encoded_min_separation_time, max_wait_count)
            }) {
                transmitter.handle_transitions(index, result, "flow_control_frame_received", now_us);
            }
        });
    }

    /// Expire due timers and retry pending sends
    pub fn cyclic_task(&mut self, now_us: u32) {
        self.with_remove_guard(|transmitter| {
            let mut position = 0;
            while position < transmitter.order.len() {
                let index = transmitter.order[position];
                let expired = transmitter
                    .pool
                    .get_mut(index)
                    .map(|m| m.update_timer(now_us))
                    .unwrap_or(false);
                if !expired {
                    break;
                }
                let _lock = interrupts::suspend();
                if let Some(result) = transmitter
                    .pool
                    .get_mut(index)
                    .map(|m| m.handler_mut().expired())
                {
                    transmitter.handle_transitions(index, result, "cyclic_task", now_us);
                }
                position += 1;
            }
            transmitter.attempt_pending_sends(now_us, "cyclic_task");
        });
        if self.timers_updated {
            let _lock = interrupts::suspend();
            self.sort_transmitters();
            self.timers_updated = false;
        }
    }

    /// High-frequency pacing callback
    ///
    /// Releases every consecutive frame whose separation time has elapsed
    /// and reports whether consecutive frames remain so the integrator can
    /// keep the tick source running.
    pub fn tick(&mut self, now_us: u32) -> bool {
        self.with_remove_guard(|transmitter| {
            for position in 0..transmitter.order.len() {
                let index = transmitter.order[position];
                let expired = transmitter
                    .pool
                    .get_mut(index)
                    .map(|m| {
                        m.state() == TransmitState::WaitSeparation && m.update_timer(now_us)
                    })
                    .unwrap_or(false);
                if !expired {
                    continue;
                }
                let _lock = interrupts::suspend();
                if let Some(result) = transmitter
                    .pool
                    .get_mut(index)
                    .map(|m| m.handler_mut().expired())
                {
                    transmitter.handle_transitions(index, result, "tick", now_us);
                }
            }
            transmitter.attempt_pending_sends(now_us, "tick");
        });
        self.is_sending_consecutive_frames()
    }

    /// Retry frames that the data link layer rejected earlier
    fn attempt_pending_sends(&mut self, now_us: u32, function_name: &str) {
        for position in 0..self.order.len() {
            let index = self.order[position];
            if self.pool.get(index).map(|m| m.state()) == Some(TransmitState::Send) {
                let result = self.handle_transition(index, now_us);
                self.handle_transitions(index, result, function_name, now_us);
            }
        }
    }

    fn handle_transitions(
        &mut self,
        index: BlockIndex,
        mut result: TransmitResult,
        function_name: &str,
        now_us: u32,
    ) {
        while result.has_transition() {
            self.handle_result(index, result, function_name, now_us);
            result = self.handle_transition(index, now_us);
        }
    }

    fn handle_result(
        &mut self,
        index: BlockIndex,
        result: TransmitResult,
        function_name: &str,
        now_us: u32,
    ) {
        if result.has_transition() {
            self.reset_timer(index, now_us);
            if self.pool.get(index).map(|m| m.state()) != Some(TransmitState::Done) {
                self.timers_updated = true;
            }
        }
        if result.message() == TransmitMessage::None {
            return;
        }
        let address = self
            .pool
            .get(index)
            .map(|m| m.transmission_address())
            .unwrap_or_default();
        match result.message() {
            TransmitMessage::IllegalState => {
                tracing::warn!(
                    "{function_name}({address:#X}): illegal state {:#X}",
                    result.param()
                );
            }
            TransmitMessage::FlowControlTimeoutExpired => {
                tracing::warn!("{function_name}({address:#X}): flow control timeout");
            }
            TransmitMessage::FlowControlOverflow => {
                tracing::warn!("{function_name}({address:#X}): peer reported buffer overflow");
            }
            TransmitMessage::FlowControlWaitCountExceeded => {
                tracing::warn!("{function_name}({address:#X}): flow control wait count exceeded");
            }
            TransmitMessage::FrameSendRetryCountExceeded => {
                tracing::warn!("{function_name}({address:#X}): frame send retry count exceeded");
            }
            TransmitMessage::None => {}
        }
    }

    fn handle_transition(&mut self, index: BlockIndex, now_us: u32) -> TransmitResult {
        let _ = now_us;
        match self.pool.get(index).map(|m| m.state()) {
            Some(TransmitState::Send) => self.send_data_frame(index),
            Some(TransmitState::Done) => self.release_transmitter(index),
            _ => TransmitResult::new(false),
        }
    }

    fn send_data_frame(&mut self, index: BlockIndex) -> TransmitResult {
        let max_retry_count = self.parameters.max_frame_send_retry_count;
        let Self {
            pool,
            frame_transmitter,
            ..
        } = self;
        let Some(transmitter) = pool.get_mut(index) else {
            return TransmitResult::new(false);
        };
        let mut buffer = [0u8; 64];
        let success = match transmitter.encode_next_frame(&mut buffer) {
            Ok(length) => {
                frame_transmitter.send_frame(transmitter.transmission_address(), &buffer[..length])
            }
            Err(error) => {
                tracing::warn!(
                    "frame on {:#X} not encodable: {error}",
                    transmitter.transmission_address()
                );
                return transmitter.handler_mut().cancel(TransmitMessage::None);
            }
        };
        transmitter.handler_mut().frame_sent(success, max_retry_count)
    }

    fn release_transmitter(&mut self, index: BlockIndex) -> TransmitResult {
        let Self {
            pool,
            listener,
            released_transmitter_count,
            ..
        } = self;
        let Some(transmitter) = pool.get_mut(index) else {
            return TransmitResult::new(false);
        };
        let success = transmitter.handler().all_frames_sent();
        if let Some(message) = transmitter.release() {
            listener.transport_message_processed(
                message,
                if success {
                    ProcessingResult::Processed
                } else {
                    ProcessingResult::Failed
                },
            );
        }
        assert!(*released_transmitter_count != u8::MAX);
        *released_transmitter_count += 1;
        TransmitResult::new(false)
    }

    fn reset_timer(&mut self, index: BlockIndex, now_us: u32) {
        let wait_flow_control_us = u32::from(self.parameters.wait_flow_control_timeout_ms) * 1000;
        let Some(transmitter) = self.pool.get_mut(index) else {
            return;
        };
        match transmitter.handler().timeout() {
            TransmitTimeout::FlowControl => {
                transmitter.set_timer(now_us.wrapping_add(wait_flow_control_us));
            }
            TransmitTimeout::Separation => {
                let separation_us = transmitter.min_separation_time_us();
                transmitter.set_timer(now_us.wrapping_add(separation_us));
            }
            TransmitTimeout::None => transmitter.set_timer(now_us),
        }
    }

    fn find_message_transmitter(&self, reception_address: DataLinkAddress) -> Option<BlockIndex> {
        self.order.iter().copied().find(|&index| {
            self.pool
                .get(index)
                .map(|m| m.reception_address() == reception_address)
                .unwrap_or(false)
        })
    }

    fn with_remove_guard<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.set_remove_lock();
        let result = f(self);
        self.release_remove_lock();
        result
    }

    fn set_remove_lock(&mut self) {
        assert!(self.remove_lock_count != u8::MAX);
        let _lock = interrupts::suspend();
        self.remove_lock_count += 1;
    }

    fn release_remove_lock(&mut self) {
        assert!(self.remove_lock_count != 0);
        let _lock = interrupts::suspend();
        self.remove_lock_count -= 1;
        if self.remove_lock_count == 0 && self.released_transmitter_count > 0 {
            let Self {
                pool,
                order,
                released_transmitter_count,
                ..
            } = self;
            order.retain(|&index| {
                if *released_transmitter_count == 0 {
                    return true;
                }
                let done = pool
                    .get(index)
                    .map(|m| m.state() == TransmitState::Done)
                    .unwrap_or(false);
                if done {
                    pool.release(index);
                    *released_transmitter_count -= 1;
                    false
                } else {
                    true
                }
            });
        }
    }

    fn sort_transmitters(&mut self) {
        let Self { pool, order, .. } = self;
        order.sort_by(|&a, &b| match (pool.get(a), pool.get(b)) {
            (Some(first), Some(second)) => {
                if first.sorts_before(second) {
                    Ordering::Less
                } else if second.sorts_before(first) {
                    Ordering::Greater
                } else {
                    Ordering::Equal
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::address::{DataLinkAddressPair, TransportAddressPair};
    use crate::codec::FrameCodec;

    #[derive(Default)]
    struct ProcessedRecorder {
        completed: Vec<(Vec<u8>, ProcessingResult)>,
    }

    impl TransportMessageProcessedListener for ProcessedRecorder {
        fn transport_message_processed(
            &mut self,
            message: TransportMessage,
            result: ProcessingResult,
        ) {
            self.completed.push((message.payload().to_vec(), result));
        }
    }

    #[derive(Clone, Default)]
    struct FrameRecorder {
        frames: Rc<RefCell<Vec<(DataLinkAddress, Vec<u8>)>>>,
        reject: Rc<RefCell<bool>>,
    }

    impl FrameRecorder {
        fn frames(&self) -> Vec<(DataLinkAddress, Vec<u8>)> {
            self.frames.borrow().clone()
        }
    }

    impl FrameTransmitter for FrameRecorder {
        fn send_frame(&mut self, address: DataLinkAddress, payload: &[u8]) -> bool {
            if *self.reject.borrow() {
                return false;
            }
            self.frames.borrow_mut().push((address, payload.to_vec()));
            true
        }
    }

    fn connection() -> Connection {
        Connection::new(
            FrameCodec::OPTIMIZED_CLASSICAL,
            DataLinkAddressPair::new(0x700, 0x708),
            TransportAddressPair::new(0x10, 0xF1),
        )
    }

    fn transmitter(recorder: FrameRecorder) -> Transmitter<ProcessedRecorder, FrameRecorder> {
        let cut = Transmitter::new(
            ProcessedRecorder::default(),
            recorder,
            TransportParameters::default(),
            4,
        );
        cut.init();
        cut
    }

    #[test]
    fn test_single_frame_transmission() {
        let recorder = FrameRecorder::default();
        let mut cut = transmitter(recorder.clone());

        let message = TransportMessage::with_payload(0x10, 0xF1, &[0x50, 0x03]);
        cut.send(connection(), message, 0).unwrap();

        assert_eq!(recorder.frames(), vec![(0x708, vec![0x02, 0x50, 0x03])]);
        assert_eq!(
            cut.listener().completed,
            vec![(vec![0x50, 0x03], ProcessingResult::Processed)]
        );
        assert_eq!(cut.active_count(), 0);
    }

    #[test]
    fn test_segmented_transmission_with_immediate_cts() {
        let recorder = FrameRecorder::default();
        let mut cut = transmitter(recorder.clone());

        let payload: Vec<u8> = (0..10).collect();
        let message = TransportMessage::with_payload(0x10, 0xF1, &payload);
        cut.send(connection(), message, 0).unwrap();

        // only the first frame until the peer clears us to send
        assert_eq!(recorder.frames(), vec![(0x708, vec![0x10, 0x0A, 0, 1, 2, 3, 4, 5])]);
        assert_eq!(cut.active_count(), 1);
        assert!(cut.is_sending_consecutive_frames() == false);

        cut.flow_control_frame_received(0x700, FlowStatus::ClearToSend, 0, 0, 10);
        assert_eq!(
            recorder.frames(),
            vec![
                (0x708, vec![0x10, 0x0A, 0, 1, 2, 3, 4, 5]),
                (0x708, vec![0x21, 6, 7, 8, 9]),
            ]
        );
        assert_eq!(
            cut.listener().completed,
            vec![(payload, ProcessingResult::Processed)]
        );
        assert_eq!(cut.active_count(), 0);
    }

    #[test]
    fn test_separation_time_paces_consecutive_frames() {
        let recorder = FrameRecorder::default();
        let mut cut = transmitter(recorder.clone());

        // 20 bytes: FF + 2 CFs
        let payload: Vec<u8> = (0..20).collect();
        cut.send(connection(), TransportMessage::with_payload(0x10, 0xF1, &payload), 0)
            .unwrap();
        // CTS with STmin = 10 ms
        cut.flow_control_frame_received(0x700, FlowStatus::ClearToSend, 0, 0x0A, 100);

        // first CF of the block goes out immediately
        assert_eq!(recorder.frames().len(), 2);
        assert!(cut.is_sending_consecutive_frames());

        assert!(cut.tick(9_000));
        assert_eq!(recorder.frames().len(), 2);

        // separation time elapsed at 100 + 10_000
        assert!(!cut.tick(10_100));
        assert_eq!(recorder.frames().len(), 3);
        assert_eq!(cut.listener().completed.len(), 1);
        assert_eq!(cut.active_count(), 0);
    }

    #[test]
    fn test_block_size_waits_for_next_flow_control() {
        let recorder = FrameRecorder::default();
        let mut cut = transmitter(recorder.clone());

        // 20 bytes: FF + 2 CFs, block size 1
        let payload: Vec<u8> = (0..20).collect();
        cut.send(connection(), TransportMessage::with_payload(0x10, 0xF1, &payload), 0)
            .unwrap();
        cut.flow_control_frame_received(0x700, FlowStatus::ClearToSend, 1, 0, 0);
        assert_eq!(recorder.frames().len(), 2);
        // block exhausted, nothing more until the next CTS
        assert!(!cut.tick(1_000_000));
        assert_eq!(recorder.frames().len(), 2);

        cut.flow_control_frame_received(0x700, FlowStatus::ClearToSend, 1, 0, 1_000_001);
        assert_eq!(recorder.frames().len(), 3);
        assert_eq!(
            cut.listener().completed,
            vec![(payload, ProcessingResult::Processed)]
        );
    }

    #[test]
    fn test_wait_flow_control_keeps_transmitter_alive() {
        let recorder = FrameRecorder::default();
        let mut cut = transmitter(recorder.clone());

        let payload: Vec<u8> = (0..10).collect();
        cut.send(connection(), TransportMessage::with_payload(0x10, 0xF1, &payload), 0)
            .unwrap();
        cut.flow_control_frame_received(0x700, FlowStatus::Wait, 0, 0, 500_000);
        assert_eq!(cut.active_count(), 1);

        // the WAIT restarted the N_Bs timeout: not expired at the original deadline
        cut.cyclic_task(1_000_000);
        assert_eq!(cut.active_count(), 1);

        cut.flow_control_frame_received(0x700, FlowStatus::ClearToSend, 0, 0, 1_100_000);
        assert_eq!(cut.listener().completed.len(), 1);
    }

    #[test]
    fn test_overflow_fails_the_transmission() {
        let recorder = FrameRecorder::default();
        let mut cut = transmitter(recorder.clone());

        let payload: Vec<u8> = (0..10).collect();
        cut.send(connection(), TransportMessage::with_payload(0x10, 0xF1, &payload), 0)
            .unwrap();
        cut.flow_control_frame_received(0x700, FlowStatus::Overflow, 0, 0, 1);

        assert_eq!(
            cut.listener().completed,
            vec![(payload, ProcessingResult::Failed)]
        );
        assert_eq!(cut.active_count(), 0);
    }

    #[test]
    fn test_flow_control_timeout_fails_the_transmission() {
        let recorder = FrameRecorder::default();
        let mut cut = transmitter(recorder.clone());

        let payload: Vec<u8> = (0..10).collect();
        cut.send(connection(), TransportMessage::with_payload(0x10, 0xF1, &payload), 0)
            .unwrap();

        cut.cyclic_task(999_999);
        assert_eq!(cut.active_count(), 1);
        cut.cyclic_task(1_000_000);
        assert_eq!(
            cut.listener().completed,
            vec![(payload, ProcessingResult::Failed)]
        );
        assert_eq!(cut.active_count(), 0);
    }

    #[test]
    fn test_rejected_frames_are_retried_within_bounds() {
        let recorder = FrameRecorder::default();
        let mut cut = transmitter(recorder.clone());

        *recorder.reject.borrow_mut() = true;
        let payload: Vec<u8> = (0..10).collect();
        cut.send(connection(), TransportMessage::with_payload(0x10, 0xF1, &payload), 0)
            .unwrap();
        assert_eq!(recorder.frames(), vec![]);
        assert_eq!(cut.active_count(), 1);

        *recorder.reject.borrow_mut() = false;
        cut.tick(100);
        assert_eq!(recorder.frames().len(), 1);
    }

    #[test]
    fn test_send_retry_count_exceeded_fails_the_transmission() {
        let recorder = FrameRecorder::default();
        let mut cut = transmitter(recorder.clone());

        *recorder.reject.borrow_mut() = true;
        let payload: Vec<u8> = (0..10).collect();
        // max_frame_send_retry_count is 3: attempts at send + 3 ticks
        cut.send(connection(), TransportMessage::with_payload(0x10, 0xF1, &payload), 0)
            .unwrap();
        cut.tick(1);
        cut.tick(2);
        assert_eq!(cut.active_count(), 1);
        cut.tick(3);
        assert_eq!(
            cut.listener().completed,
            vec![(payload, ProcessingResult::Failed)]
        );
        assert_eq!(cut.active_count(), 0);
    }

    #[test]
    fn test_send_validation_errors() {
        let recorder = FrameRecorder::default();
        let mut cut = transmitter(recorder);

        let invalid_pair = Connection::new(
            FrameCodec::OPTIMIZED_CLASSICAL,
            DataLinkAddressPair::new(0x700, 0x708),
            TransportAddressPair::new(0x10, 0x10),
        );
        let message = TransportMessage::with_payload(0x10, 0x10, &[1]);
        assert!(matches!(
            cut.send(invalid_pair, message, 0),
            Err(SendError::InvalidAddressPair(_))
        ));

        let functional = Connection::new(
            FrameCodec::OPTIMIZED_CLASSICAL,
            DataLinkAddressPair::functional(0x7DF),
            TransportAddressPair::new(0x10, 0xDF),
        );
        let message = TransportMessage::with_payload(0x10, 0xDF, &[1]);
        assert!(matches!(
            cut.send(functional, message, 0),
            Err(SendError::NoTransmissionAddress(_))
        ));

        let message = TransportMessage::with_payload(0x10, 0xF1, &[]);
        assert!(matches!(
            cut.send(connection(), message, 0),
            Err(SendError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn test_pool_exhaustion_rejects_sends() {
        let recorder = FrameRecorder::default();
        let mut cut = Transmitter::new(
            ProcessedRecorder::default(),
            recorder,
            TransportParameters::default(),
            1,
        );

        let payload: Vec<u8> = (0..10).collect();
        cut.send(connection(), TransportMessage::with_payload(0x10, 0xF1, &payload), 0)
            .unwrap();

        let other = Connection::new(
            FrameCodec::OPTIMIZED_CLASSICAL,
            DataLinkAddressPair::new(0x710, 0x718),
            TransportAddressPair::new(0x10, 0xF2),
        );
        let message = TransportMessage::with_payload(0x10, 0xF2, &payload);
        let error = cut.send(other, message, 0).unwrap_err();
        let message = error.into_message();
        assert_eq!(message.payload(), payload.as_slice());
    }

    #[test]
    fn test_shutdown_fails_active_transmissions() {
        let recorder = FrameRecorder::default();
        let mut cut = transmitter(recorder);

        let payload: Vec<u8> = (0..10).collect();
        cut.send(connection(), TransportMessage::with_payload(0x10, 0xF1, &payload), 0)
            .unwrap();
        assert_eq!(cut.active_count(), 1);

        cut.shutdown(0);
        assert_eq!(
            cut.listener().completed,
            vec![(payload, ProcessingResult::Failed)]
        );
        assert_eq!(cut.active_count(), 0);
    }
}
