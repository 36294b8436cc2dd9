//! Protocol handling for reception of a single segmented message
//!
//! The handler is a pure state machine: every event handler returns a
//! [ReceiveResult] whose `transition` flag tells the multiplexer to
//! recompute timers and derive the next driving event from the new state.

use crate::types::FrameIndex;

/// State of a message reception
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveState {
    /// A transport message should be allocated
    Allocate,
    /// Waiting for a frame or for the next allocation try
    Wait,
    /// A flow control frame should be sent
    Send,
    /// The received message should be processed
    Processing,
    /// The reception of the message has ended
    Done,
}

/// Timeout to arm for the current state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveTimeout {
    None,
    /// Reception of the next consecutive frame
    Rx,
    /// Next allocation attempt
    Allocate,
}

/// Observed event emitted alongside a state transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveMessage {
    None,
    /// An event occurred in an unexpected state
    IllegalState,
    /// The maximum number of allocation retries was exceeded
    AllocationRetryCountExceeded,
    /// The timeout for frame reception expired
    RxTimeoutExpired,
    /// A frame with an unexpected sequence number was received
    BadSequenceNumber,
    /// Processing of the message was not successful
    ProcessingFailed,
}

/// Result of handling one event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceiveResult {
    transition: bool,
    message: ReceiveMessage,
    param: u8,
}

impl ReceiveResult {
    pub fn new(transition: bool) -> Self {
        Self {
            transition,
            message: ReceiveMessage::None,
            param: 0,
        }
    }

    pub fn with_message(mut self, message: ReceiveMessage) -> Self {
        self.message = message;
        self.param = 0;
        self
    }

    pub fn with_message_param(mut self, message: ReceiveMessage, param: u8) -> Self {
        self.message = message;
        self.param = param;
        self
    }

    /// A transition indicates that timeouts should be reset
    #[inline]
    #[must_use]
    pub fn has_transition(&self) -> bool {
        self.transition
    }

    #[inline]
    #[must_use]
    pub fn message(&self) -> ReceiveMessage {
        self.message
    }

    #[inline]
    #[must_use]
    pub fn param(&self) -> u8 {
        self.param
    }
}

#[derive(Debug)]
pub struct ReceiveProtocolHandler {
    frame_index: FrameIndex,
    frame_count: FrameIndex,
    state: ReceiveState,
    timeout: ReceiveTimeout,
    block_frame_index: u8,
    allocate_retry_count: u8,
    allocating: bool,
}

impl ReceiveProtocolHandler {
    pub fn new(frame_count: FrameIndex) -> Self {
        Self {
            frame_index: 1,
            frame_count,
            state: ReceiveState::Allocate,
            timeout: ReceiveTimeout::None,
            block_frame_index: 0,
            allocate_retry_count: 0,
            allocating: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> ReceiveState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn timeout(&self) -> ReceiveTimeout {
        self.timeout
    }

    /// Index of the next expected frame
    #[inline]
    #[must_use]
    pub fn frame_index(&self) -> FrameIndex {
        self.frame_index
    }

    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> FrameIndex {
        self.frame_count
    }

    /// Whether the next flow control frame must carry WAIT instead of CTS
    ///
    /// Only meaningful while the state is [ReceiveState::Send].
    #[inline]
    #[must_use]
    pub fn is_flow_control_wait(&self) -> bool {
        self.allocate_retry_count > 0 && self.frame_count > 1
    }

    /// Whether message allocation is still required (spans several states)
    #[inline]
    #[must_use]
    pub fn is_allocating(&self) -> bool {
        self.allocating
    }

    /// Cancel the reception and go to [ReceiveState::Done]
    pub fn cancel(&mut self, message: ReceiveMessage) -> ReceiveResult {
        self.set_done(message, 0)
    }

    /// Shutdown request; in-flight processing is allowed to finish
    pub fn shutdown(&mut self) -> ReceiveResult {
        if self.state == ReceiveState::Processing {
            ReceiveResult::new(false)
        } else {
            self.cancel(ReceiveMessage::None)
        }
    }

    /// The result of a message allocation try
    pub fn allocated(&mut self, success: bool, max_retry_count: u8) -> ReceiveResult {
        if !self.allocating {
            return ReceiveResult::new(true)
                .with_message_param(ReceiveMessage::IllegalState, self.state as u8);
        }

        if success {
            self.allocating = false;
            self.allocate_retry_count = 0;
            return self.set_state(
                if self.frame_count == 1 {
                    ReceiveState::Processing
                } else {
                    ReceiveState::Send
                },
                ReceiveTimeout::None,
            );
        }

        if self.frame_count == 1 {
            self.allocate_retry_count += 1;
            if self.allocate_retry_count > 1 {
                return self.set_done(ReceiveMessage::AllocationRetryCountExceeded, 0);
            }
            return self.set_state(ReceiveState::Wait, ReceiveTimeout::Allocate);
        }

        self.allocate_retry_count += 1;
        if self.allocate_retry_count > max_retry_count {
            return self.set_done(ReceiveMessage::AllocationRetryCountExceeded, 0);
        }
        // the flow control emitted next will carry WAIT
        self.set_state(ReceiveState::Send, ReceiveTimeout::None)
    }

    /// The result of sending a flow control frame
    pub fn frame_sent(&mut self, success: bool) -> ReceiveResult {
        if self.state != ReceiveState::Send {
            return ReceiveResult::new(true)
                .with_message_param(ReceiveMessage::IllegalState, self.state as u8);
        }
        if success {
            return self.set_state(
                ReceiveState::Wait,
                if self.is_flow_control_wait() {
                    ReceiveTimeout::Allocate
                } else {
                    ReceiveTimeout::Rx
                },
            );
        }
        // no transition, the multiplexer retries the send
        ReceiveResult::new(false)
    }

    /// A consecutive frame with the given sequence number was received
    pub fn consecutive_frame_received(
        &mut self,
        sequence_number: u8,
        max_block_size: u8,
    ) -> ReceiveResult {
        if self.state != ReceiveState::Wait || self.timeout != ReceiveTimeout::Rx {
            return ReceiveResult::new(false);
        }

        if (self.frame_index & 0x0F) as u8 != sequence_number {
            return self.set_done(ReceiveMessage::BadSequenceNumber, sequence_number);
        }

        self.frame_index += 1;
        if self.frame_index == self.frame_count {
            return self.set_state(ReceiveState::Processing, ReceiveTimeout::None);
        }
        if max_block_size > 0 {
            self.block_frame_index += 1;
            if self.block_frame_index == max_block_size {
                self.block_frame_index = 0;
                return self.set_state(ReceiveState::Send, ReceiveTimeout::None);
            }
        }
        self.set_state(ReceiveState::Wait, ReceiveTimeout::Rx)
    }

    /// The result of message processing
    pub fn processed(&mut self, success: bool) -> ReceiveResult {
        self.set_done(
            if success {
                ReceiveMessage::None
            } else {
                ReceiveMessage::ProcessingFailed
            },
            0,
        )
    }

    /// The current timeout expired
    pub fn expired(&mut self) -> ReceiveResult {
        match self.timeout {
            ReceiveTimeout::Rx => self.set_done(ReceiveMessage::RxTimeoutExpired, 0),
            ReceiveTimeout::Allocate => self.set_state(ReceiveState::Allocate, ReceiveTimeout::None),
            ReceiveTimeout::None => ReceiveResult::new(false),
        }
    }

    fn set_state(&mut self, state: ReceiveState, timeout: ReceiveTimeout) -> ReceiveResult {
        self.state = state;
        self.timeout = timeout;
        ReceiveResult::new(true)
    }

    fn set_done(&mut self, message: ReceiveMessage, param: u8) -> ReceiveResult {
        self.state = ReceiveState::Done;
        self.timeout = ReceiveTimeout::None;
        self.allocating = false;
        ReceiveResult::new(true).with_message_param(message, param)
    }
}
