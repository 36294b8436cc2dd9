//! TesterPresent (0x3E)

use crate::code::DiagReturnCode;
use crate::connection::IncomingDiagConnection;
use crate::job::{DiagJob, JobOutcome, UdsServices};

const TESTER_PRESENT_ANSWER: u8 = 0x00;

/// Keeps non-default sessions alive
///
/// Subfunction `0x80` sets the suppress bit, so the frequent keep-alive
/// requests produce no bus traffic in response.
pub struct TesterPresent;

impl DiagJob for TesterPresent {
    fn implemented_request(&self) -> &[u8] {
        &[0x3E]
    }

    fn minimum_request_length(&self) -> usize {
        2
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
        if request.len() != 2 {
            return JobOutcome::Done(DiagReturnCode::InvalidFormat);
        }
        if request[1] != TESTER_PRESENT_ANSWER {
            return JobOutcome::Done(DiagReturnCode::SubfunctionNotSupported);
        }
        connection.add_identifier(TESTER_PRESENT_ANSWER);
        connection.release_request_get_response();
        connection.send_positive_response();
        JobOutcome::Done(DiagReturnCode::Ok)
    }
}
