//! Binding between the transport layer and the dispatcher
//!
//! The transport receiver borrows request buffers from a provider and
//! hands reassembled messages to a listener; [TransportRequestQueue] plays
//! both roles with a fixed set of buffers allocated at construction. The
//! diag context drains the queue into a [DiagDispatcher] from its cyclic
//! execution, which returns each buffer to the pool once dispatch copied
//! the request out.

use std::collections::VecDeque;

use docan_transport::message::{
    ProviderError, TransportMessage, TransportMessageListener, TransportMessageProvider,
};
use docan_transport::types::MessageSize;

use crate::dispatcher::{DiagDispatcher, ResponseChannel};
use crate::job::UdsLifecycleConnector;

pub struct TransportRequestQueue {
    buffers: Vec<TransportMessage>,
    pending: VecDeque<TransportMessage>,
}

impl TransportRequestQueue {
    /// Allocate `buffer_count` request buffers of `buffer_capacity` bytes
    pub fn new(buffer_count: usize, buffer_capacity: usize) -> Self {
        let mut buffers = Vec::with_capacity(buffer_count);
        for _ in 0..buffer_count {
            buffers.push(TransportMessage::new(buffer_capacity));
        }
        Self {
            buffers,
            pending: VecDeque::with_capacity(buffer_count),
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Dispatch every queued request; returns how many were dispatched
    pub fn drain_into<R, L>(
        &mut self,
        dispatcher: &mut DiagDispatcher<R, L>,
        now_ms: u32,
    ) -> usize
    where
        R: ResponseChannel,
        L: UdsLifecycleConnector,
    {
        let mut dispatched = 0;
        while let Some(message) = self.pending.pop_front() {
            dispatcher.message_received(
                message.source_id(),
                message.target_id(),
                message.payload(),
                now_ms,
            );
            self.buffers.push(message);
            dispatched += 1;
        }
        dispatched
    }
}

impl TransportMessageProvider for TransportRequestQueue {
    fn get_transport_message(
        &mut self,
        _source_id: u16,
        _target_id: u16,
        payload_length: MessageSize,
        _first_frame_data: &[u8],
    ) -> Result<TransportMessage, ProviderError> {
        let fits = |message: &TransportMessage| message.capacity() >= usize::from(payload_length);
        match self.buffers.iter().position(fits) {
            Some(position) => Ok(self.buffers.remove(position)),
            None => Err(ProviderError::NoMessageAvailable),
        }
    }

    fn release_transport_message(&mut self, message: TransportMessage) {
        self.buffers.push(message);
    }
}

impl TransportMessageListener for TransportRequestQueue {
    fn message_received(&mut self, message: TransportMessage) -> Result<(), TransportMessage> {
        self.pending.push_back(message);
        Ok(())
    }
}
