//! ECUReset (0x11) subfunctions

use crate::code::DiagReturnCode;
use crate::connection::IncomingDiagConnection;
use crate::job::{DiagJob, JobOutcome, ResponseSendResult, ShutdownKind, UdsServices};
use crate::session::{DiagSessionMask, SessionType};

/// Delay granted to the ECU before a requested reset fires
pub const RESET_DELAY_MS: u32 = 100;
/// Shutdown time reported by EnableRapidPowerShutdown, in seconds
pub const RAPID_SHUTDOWN_TIME_S: u8 = 10;

/// ECUReset hardReset (`11 01`)
pub struct HardReset;

impl DiagJob for HardReset {
    fn implemented_request(&self) -> &[u8] {
        &[0x11, 0x01]
    }

    fn process(
        &mut self,
        services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        _request: &[u8],
    ) -> JobOutcome {
        if !services.lifecycle.is_mode_change_possible() {
            return JobOutcome::Done(DiagReturnCode::ConditionsNotCorrect);
        }
        *services.dispatcher_enabled = false;
        connection.add_identifier(0x01);
        connection.release_request_get_response();
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
        if !services
            .lifecycle
            .request_shutdown(ShutdownKind::HardReset, RESET_DELAY_MS)
        {
            *services.dispatcher_enabled = true;
        }
    }
}

/// ECUReset softReset (`11 03`)
pub struct SoftReset;

impl DiagJob for SoftReset {
    fn implemented_request(&self) -> &[u8] {
        &[0x11, 0x03]
    }

    fn process(
        &mut self,
        services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        _request: &[u8],
    ) -> JobOutcome {
        if !services.lifecycle.is_mode_change_possible() {
            return JobOutcome::Done(DiagReturnCode::ConditionsNotCorrect);
        }
        connection.add_identifier(0x03);
        connection.release_request_get_response();
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
        let _ = services
            .lifecycle
            .request_shutdown(ShutdownKind::SoftReset, RESET_DELAY_MS);
    }
}

/// ECUReset enableRapidPowerShutdown (`11 04`)
///
/// The positive response appends the shutdown time in seconds.
pub struct EnableRapidPowerShutdown;

impl DiagJob for EnableRapidPowerShutdown {
    fn implemented_request(&self) -> &[u8] {
        &[0x11, 0x04]
    }

    fn allowed_sessions(&self) -> DiagSessionMask {
        DiagSessionMask::empty()
            .with(SessionType::Default)
            .with(SessionType::Extended)
    }

    fn process(
        &mut self,
        _services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        _request: &[u8],
    ) -> JobOutcome {
        connection.add_identifier(0x04);
        let response = connection.release_request_get_response();
        response.append_u8(RAPID_SHUTDOWN_TIME_S);
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
        let _ = services
            .lifecycle
            .request_power_down(true, RAPID_SHUTDOWN_TIME_S);
    }
}

/// ECUReset powerDown (`11 41`)
pub struct PowerDown;

impl DiagJob for PowerDown {
    fn implemented_request(&self) -> &[u8] {
        &[0x11, 0x41]
    }

    fn process(
        &mut self,
        _services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        _request: &[u8],
    ) -> JobOutcome {
        connection.add_identifier(0x41);
        connection.release_request_get_response();
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
        let _ = services.lifecycle.request_power_down(false, 0);
    }
}
