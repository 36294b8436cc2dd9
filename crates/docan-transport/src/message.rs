//! Transport messages and the interfaces that loan them out
//!
//! Message buffers are allocated by an external provider at initialization
//! time and loaned to the transport layer for the lifetime of one transfer.
//! The receiver appends into the buffer frame by frame; the transmitter
//! reads the payload back out. On completion or cancellation the buffer
//! returns to the provider.

use crate::types::MessageSize;

/// A byte buffer with transport addressing attached
#[derive(Debug)]
pub struct TransportMessage {
    buffer: Box<[u8]>,
    source_id: u16,
    target_id: u16,
    payload_length: usize,
    valid_bytes: usize,
}

impl TransportMessage {
    /// Create a message with a zeroed buffer of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            source_id: 0,
            target_id: 0,
            payload_length: 0,
            valid_bytes: 0,
        }
    }

    /// Create a message carrying `payload`, sized to fit
    pub fn with_payload(source_id: u16, target_id: u16, payload: &[u8]) -> Self {
        let mut message = Self::new(payload.len());
        message.buffer.copy_from_slice(payload);
        message.source_id = source_id;
        message.target_id = target_id;
        message.payload_length = payload.len();
        message.valid_bytes = payload.len();
        message
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    #[must_use]
    pub fn source_id(&self) -> u16 {
        self.source_id
    }

    pub fn set_source_id(&mut self, source_id: u16) {
        self.source_id = source_id;
    }

    #[inline]
    #[must_use]
    pub fn target_id(&self) -> u16 {
        self.target_id
    }

    pub fn set_target_id(&mut self, target_id: u16) {
        self.target_id = target_id;
    }

    /// Expected total payload length of the (possibly still incomplete)
    /// message
    #[inline]
    #[must_use]
    pub fn payload_length(&self) -> usize {
        self.payload_length
    }

    pub fn set_payload_length(&mut self, payload_length: usize) {
        self.payload_length = usize::min(payload_length, self.buffer.len());
    }

    /// Number of payload bytes received/written so far
    #[inline]
    #[must_use]
    pub fn valid_bytes(&self) -> usize {
        self.valid_bytes
    }

    pub fn reset_valid_bytes(&mut self) {
        self.valid_bytes = 0;
    }

    pub fn set_valid_bytes(&mut self, valid_bytes: usize) {
        self.valid_bytes = usize::min(valid_bytes, self.buffer.len());
    }

    /// Append payload bytes; `false` if they don't fit the expected length
    pub fn append(&mut self, data: &[u8]) -> bool {
        if self.valid_bytes + data.len() > self.payload_length {
            return false;
        }
        self.buffer[self.valid_bytes..self.valid_bytes + data.len()].copy_from_slice(data);
        self.valid_bytes += data.len();
        true
    }

    /// The valid payload received/written so far
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buffer[..self.valid_bytes]
    }

    /// The whole backing buffer, for callers building a payload in place
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

/// Why the provider could not hand out a message buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderError {
    /// All buffers are in use; the caller may retry later
    NoMessageAvailable,
    /// The source id is not acceptable to the upper layer
    InvalidSourceId,
    /// The target id is not acceptable to the upper layer
    InvalidTargetId,
}

/// Loans out transport message buffers
pub trait TransportMessageProvider {
    /// Try to borrow a buffer for a message of `payload_length` bytes
    ///
    /// `first_frame_data` lets the provider inspect the message head (e.g.
    /// the service id) when deciding which buffer to hand out.
    fn get_transport_message(
        &mut self,
        source_id: u16,
        target_id: u16,
        payload_length: MessageSize,
        first_frame_data: &[u8],
    ) -> Result<TransportMessage, ProviderError>;

    /// Return a previously borrowed buffer
    fn release_transport_message(&mut self, message: TransportMessage);
}

/// Consumer of fully reassembled messages
pub trait TransportMessageListener {
    /// Hand a reassembled message up the stack
    ///
    /// Buffer ownership transfers on success. On failure the message comes
    /// back so the caller can release it to the provider.
    fn message_received(&mut self, message: TransportMessage) -> Result<(), TransportMessage>;
}

/// Result of a terminated transmission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingResult {
    Processed,
    Failed,
}

/// Notified when a submitted message leaves the transmitter
pub trait TransportMessageProcessedListener {
    fn transport_message_processed(&mut self, message: TransportMessage, result: ProcessingResult);
}
