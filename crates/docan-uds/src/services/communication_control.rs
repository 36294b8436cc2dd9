//! CommunicationControl (0x28)

use byteorder::{BigEndian, ByteOrder};

use crate::code::DiagReturnCode;
use crate::connection::IncomingDiagConnection;
use crate::job::{DiagJob, JobOutcome, UdsServices};
use crate::session::{DiagSessionMask, SessionType};

/// Control types of ISO 14229-1 CommunicationControl
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlType {
    EnableRxAndTx = 0,
    EnableRxDisableTx = 1,
    DisableRxEnableTx = 2,
    DisableRxAndTx = 3,
    /// Carries an enhanced-address node id
    EnableRxDisableTxEnhanced = 4,
    /// Carries an enhanced-address node id
    EnableRxAndTxEnhanced = 5,
}

impl ControlType {
    fn from_byte(byte: u8) -> Option<ControlType> {
        match byte {
            0 => Some(ControlType::EnableRxAndTx),
            1 => Some(ControlType::EnableRxDisableTx),
            2 => Some(ControlType::DisableRxEnableTx),
            3 => Some(ControlType::DisableRxAndTx),
            4 => Some(ControlType::EnableRxDisableTxEnhanced),
            5 => Some(ControlType::EnableRxAndTxEnhanced),
            _ => None,
        }
    }

    fn carries_node_id(self) -> bool {
        matches!(
            self,
            ControlType::EnableRxDisableTxEnhanced | ControlType::EnableRxAndTxEnhanced
        )
    }
}

/// Notified when the communication state changes
pub trait CommunicationStateListener {
    fn communication_state_changed(&mut self, control_type: ControlType, communication_type: u8);
}

/// Enables/disables normal and network-management transmission
pub struct CommunicationControl {
    control_type: ControlType,
    communication_type: u8,
    enhanced_node_id: Option<u16>,
    listeners: Vec<Box<dyn CommunicationStateListener>>,
}

impl CommunicationControl {
    pub fn new() -> Self {
        Self {
            control_type: ControlType::EnableRxAndTx,
            communication_type: 0,
            enhanced_node_id: None,
            listeners: Vec::new(),
        }
    }

    pub fn add_communication_state_listener(
        &mut self,
        listener: Box<dyn CommunicationStateListener>,
    ) {
        self.listeners.push(listener);
    }

    #[must_use]
    pub fn control_type(&self) -> ControlType {
        self.control_type
    }

    #[must_use]
    pub fn enhanced_node_id(&self) -> Option<u16> {
        self.enhanced_node_id
    }
}

impl Default for CommunicationControl {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagJob for CommunicationControl {
    fn implemented_request(&self) -> &[u8] {
        &[0x28]
    }

    fn minimum_request_length(&self) -> usize {
        3
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
        let Some(control_type) = ControlType::from_byte(request[1]) else {
            return JobOutcome::Done(DiagReturnCode::SubfunctionNotSupported);
        };
        let expected_length = if control_type.carries_node_id() { 5 } else { 3 };
        if request.len() != expected_length {
            return JobOutcome::Done(DiagReturnCode::InvalidFormat);
        }
        self.control_type = control_type;
        self.communication_type = request[2] & 0x0F;
        self.enhanced_node_id = control_type
            .carries_node_id()
            .then(|| BigEndian::read_u16(&request[3..5]));
        tracing::debug!(
            "communication control {control_type:?} type {:#04X}",
            self.communication_type
        );
        for listener in &mut self.listeners {
            listener.communication_state_changed(control_type, self.communication_type);
        }

        connection.add_identifier(request[1]);
        connection.release_request_get_response();
        connection.send_positive_response();
        JobOutcome::Done(DiagReturnCode::Ok)
    }
}
