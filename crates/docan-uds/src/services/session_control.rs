//! DiagnosticSessionControl (0x10)

use crate::code::DiagReturnCode;
use crate::connection::IncomingDiagConnection;
use crate::job::{DiagJob, JobOutcome, ResponseSendResult, UdsServices};
use crate::session::SessionType;

/// P2_server_max in milliseconds, reported in every session response
pub const DEFAULT_P2_MS: u16 = 0x0032;
/// P2*_server_max in 10 ms units for the default and extended sessions
pub const DEFAULT_P2_STAR_10MS: u16 = 0x01F4;
/// P2*_server_max in 10 ms units when entering the programming session
pub const PROGRAMMING_P2_STAR_10MS: u16 = 0x1388;

/// Switches sessions and reports the P2/P2* timings
///
/// A switch to the programming session is deferred: the session byte is
/// persisted and a hard reset is requested only after the response left.
#[derive(Default)]
pub struct SessionControl {
    requested_programming: bool,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagJob for SessionControl {
    fn implemented_request(&self) -> &[u8] {
        &[0x10]
    }

    fn minimum_request_length(&self) -> usize {
        2
    }

    fn suppress_positive_response_allowed(&self) -> bool {
        true
    }

    fn process(
        &mut self,
        services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        request: &[u8],
    ) -> JobOutcome {
        if request.len() != 2 {
            return JobOutcome::Done(DiagReturnCode::InvalidFormat);
        }
        let target_byte = request[1];
        let session = services.session_manager.active_session();
        let transition = session.is_transition_possible(target_byte);
        if transition != DiagReturnCode::Ok {
            return JobOutcome::Done(transition);
        }
        tracing::debug!(
            "session transition {:#04X} -> {target_byte:#04X}",
            session.session_byte()
        );

        connection.add_identifier(target_byte);
        let response = connection.release_request_get_response();
        if response.maximum_length() < 4 {
            return JobOutcome::Done(DiagReturnCode::ResponseTooLong);
        }
        let pending_10ms = if target_byte == SessionType::Programming.session_byte() {
            PROGRAMMING_P2_STAR_10MS
        } else {
            DEFAULT_P2_STAR_10MS
        };
        response.append_u16(DEFAULT_P2_MS);
        response.append_u16(pending_10ms);

        match SessionType::from_session_byte(target_byte) {
            Some(SessionType::Programming) => {
                // handled in response_sent, after the response left
                self.requested_programming = true;
                *services.dispatcher_enabled = false;
            }
            Some(target) => {
                let now_ms = services.now_ms;
                services.session_manager.switch_session(target, now_ms);
            }
            None => {}
        }

        connection.send_positive_response();
        JobOutcome::Done(DiagReturnCode::Ok)
    }

    fn response_sent(
        &mut self,
        services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        _result: ResponseSendResult,
    ) {
        connection.terminate();
        if self.requested_programming {
            self.requested_programming = false;
            services
                .session_manager
                .persist_and_request_reset(services.lifecycle);
        }
    }
}
