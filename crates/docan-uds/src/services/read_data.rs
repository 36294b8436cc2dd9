//! ReadDataByIdentifier (0x22) and its multi-DID variant

use byteorder::{BigEndian, ByteOrder};

use crate::code::DiagReturnCode;
use crate::connection::{IncomingDiagConnection, PositiveResponse};
use crate::job::{DiagJob, JobOutcome, UdsServices};
use crate::session::{DiagSessionMask, SessionType};

/// Single-DID ReadDataByIdentifier dispatch
///
/// The data identifier jobs are registered as children.
pub struct ReadDataByIdentifier;

impl DiagJob for ReadDataByIdentifier {
    fn implemented_request(&self) -> &[u8] {
        &[0x22]
    }

    fn minimum_request_length(&self) -> usize {
        3
    }

    fn default_code(&self) -> DiagReturnCode {
        DiagReturnCode::RequestOutOfRange
    }
}

/// ReadDataByIdentifier sweeping several DIDs in one request
///
/// Consumes the request two bytes at a time and issues a single-DID
/// request against the children for each; unknown identifiers are
/// tolerated, their absence simply leaves no data in the response.
pub struct MultipleReadDataByIdentifier;

impl DiagJob for MultipleReadDataByIdentifier {
    fn implemented_request(&self) -> &[u8] {
        &[0x22]
    }

    fn minimum_request_length(&self) -> usize {
        3
    }

    fn default_code(&self) -> DiagReturnCode {
        DiagReturnCode::RequestOutOfRange
    }

    fn verify(&self, request: &[u8], _session: SessionType) -> DiagReturnCode {
        if request.first() != Some(&0x22) {
            return DiagReturnCode::NotResponsible;
        }
        if request.len() >= 3 && (request.len() - 1) % 2 == 0 {
            DiagReturnCode::Ok
        } else {
            DiagReturnCode::InvalidFormat
        }
    }

    fn process(
        &mut self,
        _services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        request: &[u8],
    ) -> JobOutcome {
        let _ = connection;
        if request.len() == 3 {
            JobOutcome::Children
        } else {
            JobOutcome::NestedIdentifiers
        }
    }
}

/// A readable data identifier
///
/// The read callback appends the record data; the DID echo in front of it
/// is handled here and rolled back if the read fails.
pub struct DataIdentifierJob {
    prefix: [u8; 3],
    sessions: DiagSessionMask,
    read: Box<dyn FnMut(&mut PositiveResponse) -> DiagReturnCode>,
}

impl DataIdentifierJob {
    pub fn new(
        did: u16,
        sessions: DiagSessionMask,
        read: Box<dyn FnMut(&mut PositiveResponse) -> DiagReturnCode>,
    ) -> Self {
        let mut prefix = [0x22, 0, 0];
        BigEndian::write_u16(&mut prefix[1..], did);
        Self {
            prefix,
            sessions,
            read,
        }
    }

    #[must_use]
    pub fn did(&self) -> u16 {
        BigEndian::read_u16(&self.prefix[1..])
    }
}

impl DiagJob for DataIdentifierJob {
    fn implemented_request(&self) -> &[u8] {
        &self.prefix
    }

    fn allowed_sessions(&self) -> DiagSessionMask {
        self.sessions
    }

    fn process(
        &mut self,
        _services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        _request: &[u8],
    ) -> JobOutcome {
        let did_echo = [self.prefix[1], self.prefix[2]];
        let response = connection.release_request_get_response();
        let rollback_length = response.len();
        if !response.append_slice(&did_echo) {
            return JobOutcome::Done(DiagReturnCode::ResponseTooLong);
        }
        let code = (self.read)(response);
        if code == DiagReturnCode::Ok {
            connection.send_positive_response();
        } else {
            connection
                .release_request_get_response()
                .truncate(rollback_length);
        }
        JobOutcome::Done(code)
    }
}
