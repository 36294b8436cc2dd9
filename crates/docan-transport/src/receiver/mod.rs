//! Multiplexed reception of transport messages
//!
//! The receiver owns a pool of per-message state machines, routes inbound
//! first/consecutive frames to them, pumps every state machine to a fixed
//! point after each event, and drives timeouts from the cyclic task.
//!
//! Receivers that reach `Done` while an entry point is iterating the list
//! are not removed immediately: each outer entry point takes a remove lock,
//! releases only mark the receiver, and the outermost release drains every
//! finished receiver. This keeps iteration positions valid across reentrant
//! pumping.

pub mod message;
pub mod protocol;

use std::cmp::Ordering;

use docan_util::pool::{BlockIndex, BlockPool};

pub use crate::receiver::message::MessageReceiver;
pub use crate::receiver::protocol::{
    ReceiveMessage, ReceiveProtocolHandler, ReceiveResult, ReceiveState, ReceiveTimeout,
};

use crate::codec::FlowStatus;
use crate::connection::Connection;
use crate::datalink::FrameTransmitter;
use crate::interrupts;
use crate::message::{ProviderError, TransportMessageListener, TransportMessageProvider};
use crate::params::TransportParameters;
use crate::types::{DataLinkAddress, FrameIndex, FrameSize, MessageSize};

/// Parallel reception of transport messages on one bus
pub struct Receiver<P, F>
where
    P: TransportMessageProvider + TransportMessageListener,
    F: FrameTransmitter,
{
    provider: P,
    frame_transmitter: F,
    pool: BlockPool<MessageReceiver>,
    order: Vec<BlockIndex>,
    parameters: TransportParameters,
    remove_lock_count: u8,
    released_receiver_count: u8,
    timers_updated: bool,
}

impl<P, F> Receiver<P, F>
where
    P: TransportMessageProvider + TransportMessageListener,
    F: FrameTransmitter,
{
    /// Create a receiver hosting up to `capacity` concurrent receptions
    ///
    /// `max_first_frame_data_size` bounds the first frame payload copied
    /// into each pool block.
    pub fn new(
        provider: P,
        frame_transmitter: F,
        parameters: TransportParameters,
        capacity: usize,
        max_first_frame_data_size: FrameSize,
    ) -> Self {
        Self {
            provider,
            frame_transmitter,
            pool: BlockPool::new(capacity, usize::from(max_first_frame_data_size)),
            order: Vec::with_capacity(capacity),
            parameters,
            remove_lock_count: 0,
            released_receiver_count: 0,
            timers_updated: false,
        }
    }

    /// Check integration invariants
    ///
    /// Performed here instead of the constructor so a misconfiguration
    /// cannot fire during static construction.
    pub fn init(&self) {
        assert!(self.pool.capacity() > 0);
        assert!(self.pool.trailing_capacity() < usize::from(FrameSize::MAX));
    }

    /// Cancel every active reception
    pub fn shutdown(&mut self, now_us: u32) {
        self.with_remove_guard(|receiver| {
            for position in 0..receiver.order.len() {
                let index = receiver.order[position];
                let _lock = interrupts::suspend();
                if let Some(result) = receiver
                    .pool
                    .get_mut(index)
                    .map(|m| m.handler_mut().shutdown())
                {
                    receiver.handle_transitions(index, result, "shutdown", now_us);
                }
            }
        });
    }

    #[inline]
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    /// Number of receivers currently hosted (including finished ones whose
    /// removal is still pending)
    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.order.len()
    }

    /// A single frame or the first frame of a segmented message arrived
    pub fn first_data_frame_received(
        &mut self,
        connection: Connection,
        message_size: MessageSize,
        frame_count: FrameIndex,
        consecutive_frame_data_size: FrameSize,
        data: &[u8],
        now_us: u32,
    ) {
        // functional routing entries have no transmission address; flow
        // control cannot be sent, so only single frames are legal
        if frame_count > 1 && !connection.data_link().has_transmission_address() {
            tracing::warn!(
                "FF on {:#X} dropped: functional first frames are not allowed",
                connection.reception_address()
            );
            return;
        }
        if self.pool.is_full() {
            tracing::warn!(
                "FF on {:#X} dropped: no free message receiver",
                connection.reception_address()
            );
            return;
        }
        if data.len() > self.pool.trailing_capacity() {
            tracing::error!(
                "FF on {:#X} dropped: {} payload bytes, expected at most {}",
                connection.reception_address(),
                data.len(),
                self.pool.trailing_capacity()
            );
            return;
        }

        self.with_remove_guard(|receiver| {
            let index = {
                let _lock = interrupts::suspend();
                let blocked = receiver
                    .handle_pending_message_receivers(connection.reception_address(), now_us);
                let message_receiver = MessageReceiver::new(
                    connection,
                    message_size,
                    frame_count,
                    consecutive_frame_data_size,
                    receiver.parameters.max_block_size,
                    receiver.parameters.encoded_min_separation_time,
                    blocked,
                );
                let Ok(index) = receiver.pool.allocate(message_receiver, data) else {
                    tracing::warn!(
                        "FF on {:#X} dropped: no free message receiver",
                        connection.reception_address()
                    );
                    return;
                };
                receiver.order.push(index);
                index
            };
            let result = receiver.handle_transition(index, now_us);
            receiver.handle_transitions(index, result, "first_data_frame_received", now_us);
        });
    }

    /// A consecutive frame arrived on `reception_address`
    pub fn consecutive_data_frame_received(
        &mut self,
        reception_address: DataLinkAddress,
        sequence_number: u8,
        data: &[u8],
        now_us: u32,
    ) {
        let found = self
            .find_message_receiver(reception_address)
            .and_then(|index| self.pool.get(index).map(|m| (index, m)));
        let Some((index, receiver)) = found else {
            tracing::warn!("unexpected CF on {reception_address:#X} dropped");
            return;
        };
        if !receiver.is_consecutive_frame_expected() {
            tracing::warn!("unexpected CF on {reception_address:#X} dropped");
            return;
        }
        let expected_size = receiver.expected_consecutive_frame_data_size();
        if data.len() < usize::from(expected_size) {
            tracing::warn!(
                "CF on {reception_address:#X} dropped: {} bytes shorter than expected {}",
                data.len(),
                expected_size
            );
            return;
        }

        self.with_remove_guard(|receiver| {
            let _lock = interrupts::suspend();
            if let Some(result) = receiver
                .pool
                .get_mut(index)
                .map(|m| m.consecutive_frame_received(sequence_number, expected_size, data))
            {
                receiver.handle_transitions(index, result, "consecutive_data_frame_received", now_us);
            }
        });
    }

    /// Expire due timers and retry pending flow control sends
    ///
    /// The receiver list is kept sorted by timer, so expiry processing stops
    /// at the first receiver that is not due yet.
    pub fn cyclic_task(&mut self, now_us: u32) {
        self.with_remove_guard(|receiver| {
            let mut position = 0;
            while position < receiver.order.len() {
                let index = receiver.order[position];
                let expired = receiver
                    .pool
                    .get_mut(index)
                    .map(|m| m.update_timer(now_us))
                    .unwrap_or(false);
                if !expired {
                    break;
                }
                let _lock = interrupts::suspend();
                if let Some(result) = receiver
                    .pool
                    .get_mut(index)
                    .map(|m| m.handler_mut().expired())
                {
                    receiver.handle_transitions(index, result, "cyclic_task", now_us);
                }
                position += 1;
            }
            // flow control frames rejected by the driver are retried here
            for position in 0..receiver.order.len() {
                let index = receiver.order[position];
                if receiver.pool.get(index).map(|m| m.state()) == Some(ReceiveState::Send) {
                    let result = receiver.handle_transition(index, now_us);
                    receiver.handle_transitions(index, result, "cyclic_task", now_us);
                }
            }
        });
        // sort after removal
        if self.timers_updated {
            let _lock = interrupts::suspend();
            self.sort_receivers();
            self.timers_updated = false;
        }
    }

    fn handle_pending_message_receivers(
        &mut self,
        reception_address: DataLinkAddress,
        now_us: u32,
    ) -> bool {
        let mut blocked = false;
        for position in 0..self.order.len() {
            let index = self.order[position];
            let Some(receiver) = self.pool.get(index) else {
                continue;
            };
            if receiver.reception_address() != reception_address
                || receiver.state() == ReceiveState::Done
            {
                continue;
            }
            if receiver.handler().frame_count() > 1 {
                tracing::info!(
                    "segmented transfer on {reception_address:#X} cancelled by new first frame"
                );
                if let Some(result) = self
                    .pool
                    .get_mut(index)
                    .map(|m| m.handler_mut().cancel(ReceiveMessage::None))
                {
                    self.handle_transitions(index, result, "handle_pending_message_receivers", now_us);
                }
            } else {
                blocked = true;
            }
        }
        blocked
    }

    /// Pump one receiver to a stable state
    fn handle_transitions(
        &mut self,
        index: BlockIndex,
        mut result: ReceiveResult,
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
        result: ReceiveResult,
        function_name: &str,
        now_us: u32,
    ) {
        if result.has_transition() {
            self.reset_timer(index, now_us);
            if self.pool.get(index).map(|m| m.state()) != Some(ReceiveState::Done) {
                self.timers_updated = true;
            }
        }
        if result.message() == ReceiveMessage::None {
            return;
        }
        let address = self
            .pool
            .get(index)
            .map(|m| m.reception_address())
            .unwrap_or_default();
        match result.message() {
            ReceiveMessage::IllegalState => {
                tracing::warn!(
                    "{function_name}({address:#X}): illegal state {:#X}",
                    result.param()
                );
            }
            ReceiveMessage::AllocationRetryCountExceeded => {
                tracing::warn!("{function_name}({address:#X}): allocation retry count exceeded");
            }
            ReceiveMessage::RxTimeoutExpired => {
                tracing::warn!("{function_name}({address:#X}): rx timeout");
            }
            ReceiveMessage::BadSequenceNumber => {
                tracing::warn!(
                    "{function_name}({address:#X}): frame with bad sequence number {} received",
                    result.param()
                );
            }
            ReceiveMessage::ProcessingFailed => {
                tracing::warn!("{function_name}({address:#X}): processing failed");
            }
            ReceiveMessage::None => {}
        }
    }

    /// Derive the next driving event from the state entered by the last
    /// transition
    fn handle_transition(&mut self, index: BlockIndex, now_us: u32) -> ReceiveResult {
        let _ = now_us;
        match self.pool.get(index).map(|m| m.state()) {
            Some(ReceiveState::Allocate) => self.allocate_transport_message(index),
            Some(ReceiveState::Send) => self.send_flow_control_frame(index),
            Some(ReceiveState::Processing) => self.start_processing_transport_message(index),
            Some(ReceiveState::Done) => self.release_receiver(index),
            _ => ReceiveResult::new(false),
        }
    }

    fn allocate_transport_message(&mut self, index: BlockIndex) -> ReceiveResult {
        let max_retry_count = self.parameters.max_allocate_retry_count;
        let Self {
            pool, provider, ..
        } = self;
        let Some((receiver, first_frame)) = pool.get_mut_with_trailing(index) else {
            return ReceiveResult::new(false);
        };
        let mut message = None;
        if !receiver.is_blocked() {
            let transport = *receiver.connection().transport();
            match provider.get_transport_message(
                transport.source_id(),
                transport.target_id(),
                receiver.message_size(),
                first_frame,
            ) {
                Ok(mut allocated) => {
                    allocated.reset_valid_bytes();
                    allocated.set_source_id(transport.source_id());
                    allocated.set_target_id(transport.target_id());
                    allocated.set_payload_length(usize::from(receiver.message_size()));
                    message = Some(allocated);
                }
                Err(ProviderError::NoMessageAvailable) => {}
                Err(error) => {
                    tracing::warn!(
                        "no transport message for {:#X} ({error:?}), message discarded",
                        receiver.reception_address()
                    );
                    return receiver.handler_mut().cancel(ReceiveMessage::None);
                }
            }
        }
        receiver.allocated(message, max_retry_count, first_frame)
    }

    fn send_flow_control_frame(&mut self, index: BlockIndex) -> ReceiveResult {
        let Self {
            pool,
            frame_transmitter,
            ..
        } = self;
        let Some(receiver) = pool.get_mut(index) else {
            return ReceiveResult::new(false);
        };
        let mut buffer = [0u8; 64];
        let codec = *receiver.codec();
        let encoded = if receiver.handler().is_flow_control_wait() {
            codec.encode_flow_control(FlowStatus::Wait, 0, 0, &mut buffer)
        } else {
            codec.encode_flow_control(
                FlowStatus::ClearToSend,
                receiver.max_block_size(),
                receiver.encoded_min_separation_time(),
                &mut buffer,
            )
        };
        let success = match encoded {
            Ok(length) => {
                frame_transmitter.send_frame(receiver.transmission_address(), &buffer[..length])
            }
            Err(error) => {
                tracing::warn!("flow control frame not encodable: {error}");
                false
            }
        };
        receiver.handler_mut().frame_sent(success)
    }

    fn start_processing_transport_message(&mut self, index: BlockIndex) -> ReceiveResult {
        let Self {
            pool, provider, ..
        } = self;
        let Some(receiver) = pool.get_mut(index) else {
            return ReceiveResult::new(false);
        };
        let Some(message) = receiver.detach_message() else {
            return receiver.handler_mut().processed(false);
        };
        let success = match provider.message_received(message) {
            Ok(()) => true,
            Err(message) => {
                provider.release_transport_message(message);
                false
            }
        };
        receiver.handler_mut().processed(success)
    }

    fn release_receiver(&mut self, index: BlockIndex) -> ReceiveResult {
        let Self {
            pool,
            provider,
            order,
            released_receiver_count,
            ..
        } = self;
        let Some(receiver) = pool.get_mut(index) else {
            return ReceiveResult::new(false);
        };
        let reception_address = receiver.reception_address();
        if let Some(message) = receiver.release() {
            provider.release_transport_message(message);
        }
        for &other in order.iter() {
            if let Some(other_receiver) = pool.get_mut(other)
                && other_receiver.is_blocked()
                && other_receiver.reception_address() == reception_address
            {
                other_receiver.set_blocked(false);
                break;
            }
        }
        assert!(*released_receiver_count != u8::MAX);
        *released_receiver_count += 1;
        ReceiveResult::new(false)
    }

    fn reset_timer(&mut self, index: BlockIndex, now_us: u32) {
        let wait_allocate_us = u32::from(self.parameters.wait_allocate_timeout_ms) * 1000;
        let wait_rx_us = u32::from(self.parameters.wait_rx_timeout_ms) * 1000;
        let Some(receiver) = self.pool.get_mut(index) else {
            return;
        };
        match receiver.handler().timeout() {
            ReceiveTimeout::Allocate => receiver.set_timer(now_us.wrapping_add(wait_allocate_us)),
            ReceiveTimeout::Rx => receiver.set_timer(now_us.wrapping_add(wait_rx_us)),
            ReceiveTimeout::None => receiver.set_timer(now_us),
        }
    }

    fn find_message_receiver(&self, reception_address: DataLinkAddress) -> Option<BlockIndex> {
        self.order
            .iter()
            .copied()
            .find(|&index| {
                self.pool
                    .get(index)
                    .map(|m| m.reception_address() == reception_address)
                    .unwrap_or(false)
            })
    }

    fn with_remove_guard(&mut self, f: impl FnOnce(&mut Self)) {
        self.set_remove_lock();
        f(self);
        self.release_remove_lock();
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
        if self.remove_lock_count == 0 && self.released_receiver_count > 0 {
            let Self {
                pool,
                order,
                released_receiver_count,
                ..
            } = self;
            order.retain(|&index| {
                if *released_receiver_count == 0 {
                    return true;
                }
                let done = pool
                    .get(index)
                    .map(|m| m.state() == ReceiveState::Done)
                    .unwrap_or(false);
                if done {
                    pool.release(index);
                    *released_receiver_count -= 1;
                    false
                } else {
                    true
                }
            });
        }
    }

    fn sort_receivers(&mut self) {
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
