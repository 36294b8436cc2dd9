//! RoutineControl (0x31)
//!
//! The service and its three subfunctions are plain branch nodes; the
//! application registers its routines as children of the subfunction
//! nodes, keyed by the two routine-id bytes.

use crate::code::DiagReturnCode;
use crate::job::ServiceNode;
use crate::session::{DiagSessionMask, SessionType};

const MINIMUM_REQUEST_LENGTH: usize = 4;

fn sessions() -> DiagSessionMask {
    DiagSessionMask::empty().with(SessionType::Extended)
}

/// The RoutineControl service branch
pub fn routine_control() -> ServiceNode {
    ServiceNode::service(0x31, MINIMUM_REQUEST_LENGTH, sessions())
}

/// RoutineControl startRoutine (`31 01`)
pub fn start_routine() -> ServiceNode {
    ServiceNode::subfunction([0x31, 0x01], MINIMUM_REQUEST_LENGTH, sessions())
        .with_default_code(DiagReturnCode::RequestOutOfRange)
}

/// RoutineControl stopRoutine (`31 02`)
pub fn stop_routine() -> ServiceNode {
    ServiceNode::subfunction([0x31, 0x02], MINIMUM_REQUEST_LENGTH, sessions())
        .with_default_code(DiagReturnCode::RequestOutOfRange)
}

/// RoutineControl requestRoutineResults (`31 03`)
pub fn request_routine_results() -> ServiceNode {
    ServiceNode::subfunction([0x31, 0x03], MINIMUM_REQUEST_LENGTH, sessions())
        .with_default_code(DiagReturnCode::RequestOutOfRange)
}
