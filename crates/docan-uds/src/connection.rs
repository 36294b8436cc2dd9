//! A diagnosis connection representing one incoming request
//!
//! The connection owns the response buffer and the response lifecycle: the
//! positive-response writer, identifier echo bytes, the "response pending"
//! keep-alive pump and the global termination deadline. Jobs queue the
//! response here; the dispatcher flushes it to the wire and terminates the
//! connection once every outstanding send has been confirmed.

use byteorder::{BigEndian, ByteOrder};
use docan_transport::timer;

use crate::code::DiagReturnCode;
use crate::job::JobId;

/// Delay before the first "response pending" keep-alive
pub const INITIAL_PENDING_TIMEOUT_MS: u32 = 40;
/// Period of subsequent keep-alives; jitterable per connection
pub const DEFAULT_PENDING_TIMEOUT_MS: u32 = 4500;
/// Hard bound on the lifetime of a connection
pub const GLOBAL_PENDING_TIMEOUT_MS: u32 = 190_000;
/// Bound on identifier echo bytes per response
pub const MAXIMUM_NUMBER_OF_IDENTIFIERS: usize = 6;

/// Writer over the connection's response buffer
///
/// Appends fail (returning `false`) once the buffer is full; the response
/// keeps its valid prefix.
#[derive(Debug)]
pub struct PositiveResponse {
    buffer: Box<[u8]>,
    length: usize,
}

impl PositiveResponse {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            length: 0,
        }
    }

    fn reset(&mut self) {
        self.length = 0;
    }

    /// Remaining space in the response buffer
    #[inline]
    #[must_use]
    pub fn maximum_length(&self) -> usize {
        self.buffer.len() - self.length
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.length]
    }

    pub fn append_u8(&mut self, value: u8) -> bool {
        self.append_slice(&[value])
    }

    pub fn append_u16(&mut self, value: u16) -> bool {
        let mut bytes = [0u8; 2];
        BigEndian::write_u16(&mut bytes, value);
        self.append_slice(&bytes)
    }

    pub fn append_slice(&mut self, data: &[u8]) -> bool {
        if self.length + data.len() > self.buffer.len() {
            return false;
        }
        self.buffer[self.length..self.length + data.len()].copy_from_slice(data);
        self.length += data.len();
        true
    }

    /// Roll the response back to an earlier length
    pub fn truncate(&mut self, length: usize) {
        self.length = usize::min(self.length, length);
    }
}

/// Response queued by a job, flushed by the dispatcher
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueuedResponse {
    Positive,
    Negative(DiagReturnCode),
}

/// Due timer events reported by [IncomingDiagConnection::cyclic]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingEvents {
    /// A `7F <sid> 78` keep-alive is due
    pub send_response_pending: bool,
    /// The global deadline passed; the connection must be terminated
    pub global_timeout: bool,
}

#[derive(Debug)]
pub struct IncomingDiagConnection {
    open: bool,
    source_id: u16,
    target_id: u16,
    service_id: u8,
    functional: bool,
    suppress_positive_response: bool,
    request_released: bool,
    identifiers: Vec<u8>,
    positive_response: PositiveResponse,
    queued: Option<QueuedResponse>,
    sender: Option<JobId>,
    nested: bool,
    nested_step_sent: bool,
    pending_activated: bool,
    pending_timeout_ms: u32,
    response_pending_deadline: Option<u32>,
    global_deadline: Option<u32>,
    outstanding_sends: u8,
    termination_pending: bool,
}

impl IncomingDiagConnection {
    pub fn new(response_capacity: usize) -> Self {
        Self {
            open: false,
            source_id: 0xFF,
            target_id: 0xFF,
            service_id: 0xFF,
            functional: false,
            suppress_positive_response: false,
            request_released: false,
            identifiers: Vec::with_capacity(MAXIMUM_NUMBER_OF_IDENTIFIERS),
            positive_response: PositiveResponse::new(response_capacity),
            queued: None,
            sender: None,
            nested: false,
            nested_step_sent: false,
            pending_activated: true,
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
            response_pending_deadline: None,
            global_deadline: None,
            outstanding_sends: 0,
            termination_pending: false,
        }
    }

    /// Bind the connection to a new request and arm its timers
    pub fn open(
        &mut self,
        source_id: u16,
        target_id: u16,
        service_id: u8,
        functional: bool,
        now_ms: u32,
    ) {
        self.open = true;
        self.source_id = source_id;
        self.target_id = target_id;
        self.service_id = service_id;
        self.functional = functional;
        self.suppress_positive_response = false;
        self.request_released = false;
        self.identifiers.clear();
        self.positive_response.reset();
        self.queued = None;
        self.sender = None;
        self.nested = false;
        self.nested_step_sent = false;
        self.pending_timeout_ms = DEFAULT_PENDING_TIMEOUT_MS;
        self.response_pending_deadline = self
            .pending_activated
            .then(|| now_ms.wrapping_add(INITIAL_PENDING_TIMEOUT_MS));
        self.global_deadline = Some(now_ms.wrapping_add(GLOBAL_PENDING_TIMEOUT_MS));
        self.outstanding_sends = 0;
        self.termination_pending = false;
    }

    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[inline]
    #[must_use]
    pub fn source_id(&self) -> u16 {
        self.source_id
    }

    #[inline]
    #[must_use]
    pub fn target_id(&self) -> u16 {
        self.target_id
    }

    #[inline]
    #[must_use]
    pub fn service_id(&self) -> u8 {
        self.service_id
    }

    #[inline]
    #[must_use]
    pub fn is_functional(&self) -> bool {
        self.functional
    }

    /// Disable sending of the positive response (SPRMIB)
    pub fn suppress_positive_response(&mut self) {
        self.suppress_positive_response = true;
    }

    #[inline]
    #[must_use]
    pub fn is_positive_response_suppressed(&self) -> bool {
        self.suppress_positive_response
    }

    /// Echo a request byte in front of the positive response payload
    pub fn add_identifier(&mut self, byte: u8) -> bool {
        if self.identifiers.len() >= MAXIMUM_NUMBER_OF_IDENTIFIERS {
            return false;
        }
        self.identifiers.push(byte);
        true
    }

    #[inline]
    #[must_use]
    pub fn identifiers(&self) -> &[u8] {
        &self.identifiers
    }

    /// Release the request buffer and switch to response building
    pub fn release_request_get_response(&mut self) -> &mut PositiveResponse {
        self.request_released = true;
        &mut self.positive_response
    }

    #[inline]
    #[must_use]
    pub fn response(&self) -> &PositiveResponse {
        &self.positive_response
    }

    /// Queue the positive response for the dispatcher to flush
    ///
    /// Inside a nested request this only marks the step as answered; the
    /// accumulated response leaves once the whole nested request is done.
    pub fn send_positive_response(&mut self) {
        if self.nested {
            self.nested_step_sent = true;
            return;
        }
        self.queued = Some(QueuedResponse::Positive);
    }

    /// Queue a negative response for the dispatcher to flush
    pub fn send_negative_response(&mut self, code: DiagReturnCode) {
        if self.nested {
            self.nested_step_sent = true;
            return;
        }
        self.queued = Some(QueuedResponse::Negative(code));
    }

    pub fn take_queued_response(&mut self) -> Option<QueuedResponse> {
        self.queued.take()
    }

    #[must_use]
    pub fn has_queued_response(&self) -> bool {
        self.queued.is_some()
    }

    pub fn begin_nested(&mut self) {
        self.nested = true;
        self.nested_step_sent = false;
    }

    pub fn end_nested(&mut self) {
        self.nested = false;
    }

    #[inline]
    #[must_use]
    pub fn is_nested_request(&self) -> bool {
        self.nested
    }

    pub fn set_sender(&mut self, sender: JobId) {
        self.sender = Some(sender);
    }

    #[inline]
    #[must_use]
    pub fn sender(&self) -> Option<JobId> {
        self.sender
    }

    /// Change how fast keep-alives are sent; the delta is added to the
    /// default period and the computed value is used verbatim
    pub fn change_resp_pending_timer(&mut self, diff_time_ms: i32) {
        self.pending_timeout_ms = (DEFAULT_PENDING_TIMEOUT_MS as i32).wrapping_add(diff_time_ms) as u32;
    }

    /// Disable the "response pending" keep-alive for this request
    pub fn disable_response_timeout(&mut self) {
        self.response_pending_deadline = None;
    }

    /// Let the connection live past [GLOBAL_PENDING_TIMEOUT_MS]
    pub fn disable_global_timeout(&mut self) {
        self.global_deadline = None;
    }

    /// Report due timers; re-arms the keep-alive period
    pub fn cyclic(&mut self, now_ms: u32) -> PendingEvents {
        let mut events = PendingEvents::default();
        if !self.open {
            return events;
        }
        if let Some(deadline) = self.global_deadline
            && timer::expired(deadline, now_ms)
        {
            self.global_deadline = None;
            events.global_timeout = true;
            return events;
        }
        if let Some(deadline) = self.response_pending_deadline
            && timer::expired(deadline, now_ms)
        {
            self.response_pending_deadline = Some(now_ms.wrapping_add(self.pending_timeout_ms));
            events.send_response_pending = true;
        }
        events
    }

    /// Account an outbound submission to the data link layer
    pub fn note_send_started(&mut self) {
        self.outstanding_sends += 1;
    }

    /// A submission completed; finishes a pending termination
    pub fn note_send_processed(&mut self) {
        self.outstanding_sends = self.outstanding_sends.saturating_sub(1);
        if self.outstanding_sends == 0 && self.termination_pending {
            self.close();
        }
    }

    /// Terminate the connection; deferred while sends are outstanding
    pub fn terminate(&mut self) {
        if self.outstanding_sends > 0 {
            self.termination_pending = true;
            return;
        }
        self.close();
    }

    fn close(&mut self) {
        self.open = false;
        self.termination_pending = false;
        self.response_pending_deadline = None;
        self.global_deadline = None;
        self.queued = None;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_positive_response_writer() {
        let mut connection = IncomingDiagConnection::new(4);
        connection.open(0xF1, 0x10, 0x22, false, 0);
        let response = connection.release_request_get_response();
        assert_eq!(response.maximum_length(), 4);
        assert!(response.append_u16(0xF190));
        assert!(response.append_u8(0x01));
        assert!(!response.append_u16(0x0203));
        assert_eq!(response.data(), &[0xF1, 0x90, 0x01]);
    }

    #[test]
    fn test_response_pending_pump() {
        let mut connection = IncomingDiagConnection::new(8);
        connection.open(0xF1, 0x10, 0x31, false, 0);

        assert_eq!(connection.cyclic(39), PendingEvents::default());
        let events = connection.cyclic(40);
        assert!(events.send_response_pending);

        // next keep-alives follow the default period
        assert_eq!(connection.cyclic(4000), PendingEvents::default());
        assert!(connection.cyclic(40 + 4500).send_response_pending);
    }

    #[test]
    fn test_change_resp_pending_timer() {
        let mut connection = IncomingDiagConnection::new(8);
        connection.open(0xF1, 0x10, 0x31, false, 0);
        connection.change_resp_pending_timer(-4000);

        assert!(connection.cyclic(40).send_response_pending);
        // period is now 500 ms
        assert!(connection.cyclic(540).send_response_pending);
    }

    #[test]
    fn test_global_timeout_wins() {
        let mut connection = IncomingDiagConnection::new(8);
        connection.open(0xF1, 0x10, 0x31, false, 0);
        connection.disable_response_timeout();

        assert_eq!(connection.cyclic(100_000), PendingEvents::default());
        let events = connection.cyclic(190_000);
        assert!(events.global_timeout);
        assert!(!events.send_response_pending);
    }

    #[test]
    fn test_nested_sends_do_not_queue() {
        let mut connection = IncomingDiagConnection::new(8);
        connection.open(0xF1, 0x10, 0x22, false, 0);
        connection.begin_nested();
        connection.send_positive_response();
        assert!(!connection.has_queued_response());
        connection.end_nested();
        connection.send_positive_response();
        assert_eq!(connection.take_queued_response(), Some(QueuedResponse::Positive));
    }

    #[test]
    fn test_termination_waits_for_outstanding_sends() {
        let mut connection = IncomingDiagConnection::new(8);
        connection.open(0xF1, 0x10, 0x3E, false, 0);
        connection.note_send_started();
        connection.terminate();
        assert!(connection.is_open());
        connection.note_send_processed();
        assert!(!connection.is_open());
    }
}
