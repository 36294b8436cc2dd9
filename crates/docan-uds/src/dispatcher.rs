//! Request dispatch: transport message in, response out
//!
//! The dispatcher copies the incoming request into its own buffer (so the
//! transport buffer can return to its provider immediately), runs the job
//! tree, flushes the queued response to the response channel, and drives
//! the pending/global/S3 timers from the cyclic task.

use serde::{Deserialize, Serialize};

use crate::code::{DiagReturnCode, NEGATIVE_RESPONSE_SID, POSITIVE_RESPONSE_OFFSET, RESPONSE_PENDING_NRC};
use crate::connection::{IncomingDiagConnection, MAXIMUM_NUMBER_OF_IDENTIFIERS, QueuedResponse};
use crate::job::{JobTree, ResponseSendResult, UdsLifecycleConnector, UdsServices};
use crate::session_manager::DiagSessionManager;

const TESTER_PRESENT_SERVICE_ID: u8 = 0x3E;

/// Sink for response PDUs on their way to the transport layer
pub trait ResponseChannel {
    /// Submit a response; `false` if the transport refused it
    fn send_response(&mut self, source_id: u16, target_id: u16, payload: &[u8]) -> bool;
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Our physical transport address, the source of every response
    pub source_id: u16,
    /// Target address of functionally addressed requests
    pub functional_address: u16,
    /// Largest accepted request
    pub request_buffer_size: usize,
    /// Response payload bound (service id and echo bytes excluded)
    pub response_buffer_size: usize,
}

pub struct DiagDispatcher<R, L>
where
    R: ResponseChannel,
    L: UdsLifecycleConnector,
{
    tree: JobTree,
    session_manager: DiagSessionManager,
    lifecycle: L,
    channel: R,
    connection: IncomingDiagConnection,
    request_scratch: Box<[u8]>,
    response_scratch: Box<[u8]>,
    source_id: u16,
    functional_address: u16,
    enabled: bool,
}

impl<R, L> DiagDispatcher<R, L>
where
    R: ResponseChannel,
    L: UdsLifecycleConnector,
{
    pub fn new(
        tree: JobTree,
        session_manager: DiagSessionManager,
        lifecycle: L,
        channel: R,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            tree,
            session_manager,
            lifecycle,
            channel,
            connection: IncomingDiagConnection::new(config.response_buffer_size),
            request_scratch: vec![0u8; config.request_buffer_size].into_boxed_slice(),
            response_scratch: vec![
                0u8;
                1 + MAXIMUM_NUMBER_OF_IDENTIFIERS + config.response_buffer_size
            ]
            .into_boxed_slice(),
            source_id: config.source_id,
            functional_address: config.functional_address,
            enabled: true,
        }
    }

    pub fn init(&mut self) -> eyre::Result<()> {
        self.tree.check_consistency()?;
        self.session_manager.init();
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn tree(&self) -> &JobTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut JobTree {
        &mut self.tree
    }

    #[inline]
    #[must_use]
    pub fn session_manager(&self) -> &DiagSessionManager {
        &self.session_manager
    }

    pub fn session_manager_mut(&mut self) -> &mut DiagSessionManager {
        &mut self.session_manager
    }

    #[inline]
    #[must_use]
    pub fn lifecycle(&self) -> &L {
        &self.lifecycle
    }

    #[inline]
    #[must_use]
    pub fn channel(&self) -> &R {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut R {
        &mut self.channel
    }

    #[inline]
    #[must_use]
    pub fn connection(&self) -> &IncomingDiagConnection {
        &self.connection
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stop accepting requests (pending reset)
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Dispatch a reassembled request message
    pub fn message_received(
        &mut self,
        source_id: u16,
        target_id: u16,
        payload: &[u8],
        now_ms: u32,
    ) {
        let Some(&service_id) = payload.first() else {
            return;
        };
        if !self.enabled {
            tracing::warn!("request {service_id:#04X} dropped: dispatcher disabled");
            return;
        }
        if self.connection.is_open() {
            tracing::warn!("request {service_id:#04X} rejected: connection busy");
            let busy = DiagReturnCode::BusyRepeatRequest.nrc().unwrap_or_default();
            let pdu = [NEGATIVE_RESPONSE_SID, service_id, busy];
            self.channel.send_response(self.source_id, source_id, &pdu);
            return;
        }
        if payload.len() > self.request_scratch.len() {
            tracing::warn!(
                "request {service_id:#04X} dropped: {} bytes exceed the request buffer",
                payload.len()
            );
            return;
        }
        let functional = target_id == self.functional_address;
        // functionally addressed keep-alives with the suppress bit set are
        // consumed without a trace while no session timeout is armed
        if functional
            && payload.len() == 2
            && service_id == TESTER_PRESENT_SERVICE_ID
            && payload[1] & 0x80 != 0
            && !self.session_manager.is_session_timeout_active()
        {
            tracing::trace!("functional TesterPresent consumed");
            return;
        }

        self.request_scratch[..payload.len()].copy_from_slice(payload);
        self.connection
            .open(source_id, target_id, service_id, functional, now_ms);
        let code = {
            let Self {
                tree,
                session_manager,
                lifecycle,
                enabled,
                connection,
                request_scratch,
                ..
            } = self;
            let mut services = UdsServices {
                session_manager,
                lifecycle,
                dispatcher_enabled: enabled,
                now_ms,
            };
            tree.execute(&mut services, connection, &mut request_scratch[..payload.len()])
        };
        self.finish_dispatch(code, now_ms);
    }

    /// Drive the S3, response-pending and global timers
    pub fn cyclic_task(&mut self, now_ms: u32) {
        self.session_manager.cyclic(now_ms);
        if !self.connection.is_open() {
            return;
        }
        let events = self.connection.cyclic(now_ms);
        if events.global_timeout {
            tracing::warn!("global pending timeout, terminating connection");
            self.connection.terminate();
            return;
        }
        if events.send_response_pending {
            let pdu = [
                NEGATIVE_RESPONSE_SID,
                self.connection.service_id(),
                RESPONSE_PENDING_NRC,
            ];
            self.channel
                .send_response(self.source_id, self.connection.source_id(), &pdu);
            self.session_manager
                .response_sent(DiagReturnCode::ResponsePending, now_ms);
        }
    }

    fn finish_dispatch(&mut self, code: DiagReturnCode, now_ms: u32) {
        if !self.connection.is_open() {
            return;
        }
        match code {
            DiagReturnCode::Ok => match self.connection.take_queued_response() {
                Some(QueuedResponse::Positive) => self.flush_positive(now_ms),
                Some(QueuedResponse::Negative(negative)) => self.flush_negative(negative, now_ms),
                // the job answers later; the pending pump keeps the tester
                // patient in the meantime
                None => {}
            },
            DiagReturnCode::NotResponsible => {
                self.flush_negative(DiagReturnCode::ServiceNotSupported, now_ms);
            }
            negative => self.flush_negative(negative, now_ms),
        }
    }

    fn flush_positive(&mut self, now_ms: u32) {
        let suppressed = self.connection.is_positive_response_suppressed();
        let mut sent_ok = true;
        if !suppressed {
            let length = {
                let Self {
                    connection,
                    response_scratch,
                    ..
                } = self;
                let identifiers = connection.identifiers();
                let data = connection.response().data();
                response_scratch[0] = connection.service_id().wrapping_add(POSITIVE_RESPONSE_OFFSET);
                response_scratch[1..1 + identifiers.len()].copy_from_slice(identifiers);
                response_scratch[1 + identifiers.len()..1 + identifiers.len() + data.len()]
                    .copy_from_slice(data);
                1 + identifiers.len() + data.len()
            };
            self.connection.note_send_started();
            let target = self.connection.source_id();
            let scratch = &self.response_scratch[..length];
            sent_ok = self.channel.send_response(self.source_id, target, scratch);
        }
        self.after_response(DiagReturnCode::Ok, sent_ok, suppressed, now_ms);
    }

    fn flush_negative(&mut self, code: DiagReturnCode, now_ms: u32) {
        let Some(nrc) = code.nrc() else {
            self.connection.terminate();
            return;
        };
        let pdu = [NEGATIVE_RESPONSE_SID, self.connection.service_id(), nrc];
        self.connection.note_send_started();
        let target = self.connection.source_id();
        let sent_ok = self.channel.send_response(self.source_id, target, &pdu);
        self.after_response(code, sent_ok, false, now_ms);
    }

    fn after_response(&mut self, code: DiagReturnCode, sent_ok: bool, suppressed: bool, now_ms: u32) {
        self.session_manager.response_sent(code, now_ms);
        if let Some(sender) = self.connection.sender() {
            let Self {
                tree,
                session_manager,
                lifecycle,
                enabled,
                connection,
                ..
            } = self;
            let mut services = UdsServices {
                session_manager,
                lifecycle,
                dispatcher_enabled: enabled,
                now_ms,
            };
            let result = if sent_ok {
                ResponseSendResult::Ok
            } else {
                ResponseSendResult::Failed
            };
            tree.response_sent(sender, &mut services, connection, result);
        } else {
            self.connection.terminate();
        }
        if !suppressed {
            self.connection.note_send_processed();
        }
    }
}
