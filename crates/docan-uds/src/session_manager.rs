//! Process-wide session state, the S3 inactivity timeout and session
//! persistence

use docan_transport::timer;

use crate::code::DiagReturnCode;
use crate::connection::IncomingDiagConnection;
use crate::job::{ShutdownKind, UdsLifecycleConnector};
use crate::session::SessionType;

/// Delay granted to the reset requested when entering the programming
/// session
pub const RESET_DELAY_MS: u32 = 100;

/// Single-byte persistence of the active session across a hard reset
pub trait SessionPersistence {
    /// The session byte stored before the last reset, if any
    fn read_session(&mut self) -> Option<u8>;

    /// Store the session byte; `false` if the write failed
    fn write_session(&mut self, session_byte: u8) -> bool;
}

/// Persistence that never remembers anything
pub struct NoSessionPersistence;

impl SessionPersistence for NoSessionPersistence {
    fn read_session(&mut self) -> Option<u8> {
        None
    }

    fn write_session(&mut self, _session_byte: u8) -> bool {
        true
    }
}

/// Notified on session changes and on responses leaving
pub trait DiagSessionChangedListener {
    fn diag_session_changed(&mut self, session: SessionType);

    fn diag_session_response_sent(&mut self, response_code: u8) {
        let _ = response_code;
    }
}

/// Holds the active session and drives the S3 timeout
pub struct DiagSessionManager {
    current: SessionType,
    tester_present_timeout_ms: u32,
    s3_deadline: Option<u32>,
    tester_present_received: bool,
    persistence: Box<dyn SessionPersistence>,
    listeners: Vec<Box<dyn DiagSessionChangedListener>>,
}

impl DiagSessionManager {
    pub fn new(persistence: Box<dyn SessionPersistence>, tester_present_timeout_ms: u32) -> Self {
        Self {
            current: SessionType::Default,
            tester_present_timeout_ms,
            s3_deadline: None,
            tester_present_received: false,
            persistence,
            listeners: Vec::new(),
        }
    }

    /// Restore persisted state; the application session always starts out
    /// in Default
    pub fn init(&mut self) {
        if let Some(session_byte) = self.persistence.read_session() {
            tracing::debug!("starting up with persisted session {session_byte:#04X}");
        }
        self.current = SessionType::Default;
        self.s3_deadline = None;
    }

    #[inline]
    #[must_use]
    pub fn active_session(&self) -> SessionType {
        self.current
    }

    pub fn add_session_listener(&mut self, listener: Box<dyn DiagSessionChangedListener>) {
        self.listeners.push(listener);
    }

    /// A job was accepted for the incoming request
    ///
    /// Freezes the S3 timeout for the duration of the request.
    pub fn accepted_job(
        &mut self,
        _connection: &IncomingDiagConnection,
        request: &[u8],
    ) -> DiagReturnCode {
        self.tester_present_received = request.first() == Some(&0x3E);
        self.stop_session_timeout();
        DiagReturnCode::Ok
    }

    /// A response left the ECU
    ///
    /// Restarts the S3 timeout for every response except the "response
    /// pending" keep-alive.
    pub fn response_sent(&mut self, code: DiagReturnCode, now_ms: u32) {
        if code != DiagReturnCode::ResponsePending {
            self.start_session_timeout(now_ms);
        }
        if self.tester_present_received {
            self.tester_present_received = false;
        } else {
            let response_code = code.nrc().unwrap_or(0);
            for listener in &mut self.listeners {
                listener.diag_session_response_sent(response_code);
            }
        }
    }

    /// Arm the S3 timeout in the sessions that revert on inactivity
    pub fn start_session_timeout(&mut self, now_ms: u32) {
        if matches!(self.current, SessionType::Extended | SessionType::Programming) {
            self.s3_deadline = Some(now_ms.wrapping_add(self.tester_present_timeout_ms));
        }
    }

    pub fn stop_session_timeout(&mut self) {
        self.s3_deadline = None;
    }

    #[inline]
    #[must_use]
    pub fn is_session_timeout_active(&self) -> bool {
        self.s3_deadline.is_some()
    }

    /// Expire the S3 timeout
    pub fn cyclic(&mut self, now_ms: u32) {
        let Some(deadline) = self.s3_deadline else {
            return;
        };
        if !timer::expired(deadline, now_ms) {
            return;
        }
        self.s3_deadline = None;
        tracing::warn!(
            "session timeout in session {:#04X}",
            self.current.session_byte()
        );
        if self.current == SessionType::Extended {
            self.switch_session(SessionType::Default, now_ms);
        } else {
            tracing::error!(
                "session timeout in session {:#04X} is not allowed",
                self.current.session_byte()
            );
        }
    }

    /// Immediately enter `target` (Default or Extended)
    ///
    /// Entering the programming session instead goes through
    /// [DiagSessionManager::persist_and_request_reset] after the response
    /// left.
    pub fn switch_session(&mut self, target: SessionType, now_ms: u32) {
        let old = self.current;
        match target {
            SessionType::Default => {
                self.current = SessionType::Default;
                self.stop_session_timeout();
            }
            SessionType::Extended => {
                self.current = SessionType::Extended;
                self.s3_deadline = Some(now_ms.wrapping_add(self.tester_present_timeout_ms));
            }
            SessionType::Programming => {
                // the device reboots into the programming session
                return;
            }
        }
        tracing::debug!(
            "switching from session {:#04X} to {:#04X}",
            old.session_byte(),
            self.current.session_byte()
        );
        for listener in &mut self.listeners {
            listener.diag_session_changed(self.current);
        }
    }

    /// Persist the programming session byte and request the hard reset
    /// that boots into it
    pub fn persist_and_request_reset(&mut self, lifecycle: &mut dyn UdsLifecycleConnector) {
        if self
            .persistence
            .write_session(SessionType::Programming.session_byte())
        {
            let _ = lifecycle.request_shutdown(ShutdownKind::HardReset, RESET_DELAY_MS);
        } else {
            tracing::error!("persisting the programming session failed");
        }
    }

    pub fn reset_to_default_session(&mut self, now_ms: u32) {
        self.switch_session(SessionType::Default, now_ms);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn manager() -> DiagSessionManager {
        DiagSessionManager::new(Box::new(NoSessionPersistence), 5000)
    }

    #[test]
    fn test_s3_reverts_extended_to_default() {
        let mut cut = manager();
        cut.switch_session(SessionType::Extended, 0);
        assert_eq!(cut.active_session(), SessionType::Extended);
        assert!(cut.is_session_timeout_active());

        cut.cyclic(4999);
        assert_eq!(cut.active_session(), SessionType::Extended);
        cut.cyclic(5000);
        assert_eq!(cut.active_session(), SessionType::Default);
        assert!(!cut.is_session_timeout_active());
    }

    #[test]
    fn test_accepted_job_freezes_the_timeout() {
        let mut cut = manager();
        cut.switch_session(SessionType::Extended, 0);
        let connection = IncomingDiagConnection::new(8);

        assert_eq!(
            cut.accepted_job(&connection, &[0x22, 0xF1, 0x90]),
            DiagReturnCode::Ok
        );
        assert!(!cut.is_session_timeout_active());
        // well past the original deadline, the session survives
        cut.cyclic(60_000);
        assert_eq!(cut.active_session(), SessionType::Extended);

        cut.response_sent(DiagReturnCode::Ok, 60_000);
        assert!(cut.is_session_timeout_active());
    }

    #[test]
    fn test_response_pending_does_not_restart_the_timeout() {
        let mut cut = manager();
        cut.switch_session(SessionType::Extended, 0);
        cut.stop_session_timeout();
        cut.response_sent(DiagReturnCode::ResponsePending, 100);
        assert!(!cut.is_session_timeout_active());
    }

    #[test]
    fn test_no_timeout_in_default_session() {
        let mut cut = manager();
        cut.start_session_timeout(0);
        assert!(!cut.is_session_timeout_active());
    }
}
