//! ControlDTCSetting (0x85)

use crate::code::DiagReturnCode;
use crate::connection::IncomingDiagConnection;
use crate::job::{DiagJob, JobOutcome, UdsServices};
use crate::session::{DiagSessionMask, SessionType};

const DTC_SETTING_ON: u8 = 0x01;
const DTC_SETTING_OFF: u8 = 0x02;

/// Enables or disables the creation of new DTCs
pub struct ControlDtcSetting {
    setting_enabled: bool,
}

impl Default for ControlDtcSetting {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlDtcSetting {
    pub fn new() -> Self {
        Self {
            setting_enabled: true,
        }
    }

    /// Whether DTC creation is currently allowed
    #[must_use]
    pub fn is_setting_enabled(&self) -> bool {
        self.setting_enabled
    }
}

impl DiagJob for ControlDtcSetting {
    fn implemented_request(&self) -> &[u8] {
        &[0x85]
    }

    fn minimum_request_length(&self) -> usize {
        2
    }

    fn allowed_sessions(&self) -> DiagSessionMask {
        DiagSessionMask::empty().with(SessionType::Extended)
    }

    fn suppress_positive_response_allowed(&self) -> bool {
        true
    }

    fn process(
        &mut self,
        _services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        request: &[u8],
    ) -> JobOutcome {
        let setting_type = request[1];
        match setting_type {
            DTC_SETTING_ON => self.setting_enabled = true,
            DTC_SETTING_OFF => self.setting_enabled = false,
            _ => return JobOutcome::Done(DiagReturnCode::SubfunctionNotSupported),
        }
        tracing::debug!("DTC setting {setting_type}");
        connection.add_identifier(setting_type);
        connection.release_request_get_response();
        connection.send_positive_response();
        JobOutcome::Done(DiagReturnCode::Ok)
    }
}
