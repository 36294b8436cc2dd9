//! Protocol handling for transmission of a single segmented message
//!
//! Mirror of the receive protocol handler: pure state, event handlers
//! returning a [TransmitResult] whose `transition` flag drives the
//! multiplexer's pump loop.

use crate::codec::FlowStatus;
use crate::types::FrameIndex;

/// State of a message transmission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransmitState {
    /// The next frame should be sent
    Send,
    /// Waiting for the peer's CTS/WAIT/OVFLW
    WaitFlowControl,
    /// Waiting out the minimum separation time before the next frame
    WaitSeparation,
    /// The transmission has ended
    Done,
}

/// Timeout to arm for the current state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransmitTimeout {
    None,
    /// N_Bs: reception of a flow control frame
    FlowControl,
    /// STmin pacing until the next consecutive frame
    Separation,
}

/// Observed event emitted alongside a state transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransmitMessage {
    None,
    /// An event occurred in an unexpected state
    IllegalState,
    /// No flow control frame arrived in time
    FlowControlTimeoutExpired,
    /// The peer reported a receive buffer overflow
    FlowControlOverflow,
    /// The peer kept sending WAIT beyond the configured bound
    FlowControlWaitCountExceeded,
    /// The data link layer kept rejecting a frame beyond the bound
    FrameSendRetryCountExceeded,
}

/// Result of handling one event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransmitResult {
    transition: bool,
    message: TransmitMessage,
    param: u8,
}

impl TransmitResult {
    pub fn new(transition: bool) -> Self {
        Self {
            transition,
            message: TransmitMessage::None,
            param: 0,
        }
    }

    pub fn with_message(mut self, message: TransmitMessage) -> Self {
        self.message = message;
        self.param = 0;
        self
    }

    pub fn with_message_param(mut self, message: TransmitMessage, param: u8) -> Self {
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
    pub fn message(&self) -> TransmitMessage {
        self.message
    }

    #[inline]
    #[must_use]
    pub fn param(&self) -> u8 {
        self.param
    }
}

#[derive(Debug)]
pub struct TransmitProtocolHandler {
    /// Index of the next frame to send; 0 is the single/first frame
    frame_index: FrameIndex,
    frame_count: FrameIndex,
    state: TransmitState,
    timeout: TransmitTimeout,
    /// Frame index at which the current block ends; 0 = unlimited
    block_end: FrameIndex,
    flow_control_wait_count: u8,
    send_retry_count: u8,
}

impl TransmitProtocolHandler {
    pub fn new(frame_count: FrameIndex) -> Self {
        Self {
            frame_index: 0,
            frame_count,
            state: TransmitState::Send,
            timeout: TransmitTimeout::None,
            block_end: 0,
            flow_control_wait_count: 0,
            send_retry_count: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> TransmitState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn timeout(&self) -> TransmitTimeout {
        self.timeout
    }

    /// Index of the next frame to send
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

    /// Whether all frames of the message have left
    #[inline]
    #[must_use]
    pub fn all_frames_sent(&self) -> bool {
        self.frame_index == self.frame_count
    }

    /// Cancel the transmission and go to [TransmitState::Done]
    pub fn cancel(&mut self, message: TransmitMessage) -> TransmitResult {
        self.set_done(message, 0)
    }

    /// Shutdown request
    pub fn shutdown(&mut self) -> TransmitResult {
        self.cancel(TransmitMessage::None)
    }

    /// The result of handing the next frame to the data link layer
    pub fn frame_sent(&mut self, success: bool, max_retry_count: u8) -> TransmitResult {
        if self.state != TransmitState::Send {
            return TransmitResult::new(true)
                .with_message_param(TransmitMessage::IllegalState, self.state as u8);
        }
        if !success {
            self.send_retry_count += 1;
            if self.send_retry_count > max_retry_count {
                return self.set_done(TransmitMessage::FrameSendRetryCountExceeded, 0);
            }
            // no transition, the multiplexer retries the send
            return TransmitResult::new(false);
        }

        self.send_retry_count = 0;
        self.frame_index += 1;
        if self.all_frames_sent() {
            return self.set_done(TransmitMessage::None, 0);
        }
        if self.frame_index == 1 || (self.block_end != 0 && self.frame_index == self.block_end) {
            // first frame sent, or block exhausted: the peer paces us
            return self.set_state(TransmitState::WaitFlowControl, TransmitTimeout::FlowControl);
        }
        self.set_state(TransmitState::WaitSeparation, TransmitTimeout::Separation)
    }

    /// A flow control frame arrived
    ///
    /// Frames outside [TransmitState::WaitFlowControl] are ignored.
    pub fn flow_control_received(
        &mut self,
        status: FlowStatus,
        block_size: u8,
        max_wait_count: u8,
    ) -> TransmitResult {
        if self.state != TransmitState::WaitFlowControl {
            return TransmitResult::new(false);
        }
        match status {
            FlowStatus::ClearToSend => {
                self.flow_control_wait_count = 0;
                self.block_end = if block_size == 0 {
                    0
                } else {
                    self.frame_index + FrameIndex::from(block_size)
                };
                self.set_state(TransmitState::Send, TransmitTimeout::None)
            }
            FlowStatus::Wait => {
                self.flow_control_wait_count += 1;
                if self.flow_control_wait_count > max_wait_count {
                    return self.set_done(TransmitMessage::FlowControlWaitCountExceeded, 0);
                }
                // restart the flow control timeout
                self.set_state(TransmitState::WaitFlowControl, TransmitTimeout::FlowControl)
            }
            FlowStatus::Overflow => self.set_done(TransmitMessage::FlowControlOverflow, 0),
        }
    }

    /// The current timeout expired
    pub fn expired(&mut self) -> TransmitResult {
        match self.timeout {
            TransmitTimeout::FlowControl => {
                self.set_done(TransmitMessage::FlowControlTimeoutExpired, 0)
            }
            TransmitTimeout::Separation => self.set_state(TransmitState::Send, TransmitTimeout::None),
            TransmitTimeout::None => TransmitResult::new(false),
        }
    }

    fn set_state(&mut self, state: TransmitState, timeout: TransmitTimeout) -> TransmitResult {
        self.state = state;
        self.timeout = timeout;
        TransmitResult::new(true)
    }

    fn set_done(&mut self, message: TransmitMessage, param: u8) -> TransmitResult {
        self.state = TransmitState::Done;
        self.timeout = TransmitTimeout::None;
        TransmitResult::new(true).with_message_param(message, param)
    }
}
