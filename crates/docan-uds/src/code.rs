//! Diagnostic return codes
//!
//! ISO 14229 negative response codes plus [DiagReturnCode::NotResponsible],
//! an internal dispatch signal that lets the job-tree walk continue with
//! the next sibling.

/// Result of verifying or processing a diagnostic request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagReturnCode {
    Ok,
    /// Internal: this job does not handle the request, try the next one
    NotResponsible,
    GeneralReject,
    ServiceNotSupported,
    SubfunctionNotSupported,
    InvalidFormat,
    ResponseTooLong,
    BusyRepeatRequest,
    ConditionsNotCorrect,
    RequestSequenceError,
    RequestOutOfRange,
    SecurityAccessDenied,
    InvalidKey,
    ExceededNumberOfAttempts,
    RequiredTimeDelayNotExpired,
    GeneralProgrammingFailure,
    /// `requestCorrectlyReceived-ResponsePending`, the keep-alive NRC
    ResponsePending,
    SubfunctionNotSupportedInActiveSession,
    ServiceNotSupportedInActiveSession,
}

/// The NRC byte of the response-pending keep-alive
pub const RESPONSE_PENDING_NRC: u8 = 0x78;

/// Service id bit set in positive responses
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// First byte of a negative response PDU (`7F <sid> <nrc>`)
pub const NEGATIVE_RESPONSE_SID: u8 = 0x7F;

impl DiagReturnCode {
    /// The negative response code byte; `None` for OK and the internal
    /// dispatch signal
    #[must_use]
    pub fn nrc(&self) -> Option<u8> {
        match self {
            DiagReturnCode::Ok | DiagReturnCode::NotResponsible => None,
            DiagReturnCode::GeneralReject => Some(0x10),
            DiagReturnCode::ServiceNotSupported => Some(0x11),
            DiagReturnCode::SubfunctionNotSupported => Some(0x12),
            DiagReturnCode::InvalidFormat => Some(0x13),
            DiagReturnCode::ResponseTooLong => Some(0x14),
            DiagReturnCode::BusyRepeatRequest => Some(0x21),
            DiagReturnCode::ConditionsNotCorrect => Some(0x22),
            DiagReturnCode::RequestSequenceError => Some(0x24),
            DiagReturnCode::RequestOutOfRange => Some(0x31),
            DiagReturnCode::SecurityAccessDenied => Some(0x33),
            DiagReturnCode::InvalidKey => Some(0x35),
            DiagReturnCode::ExceededNumberOfAttempts => Some(0x36),
            DiagReturnCode::RequiredTimeDelayNotExpired => Some(0x37),
            DiagReturnCode::GeneralProgrammingFailure => Some(0x72),
            DiagReturnCode::ResponsePending => Some(RESPONSE_PENDING_NRC),
            DiagReturnCode::SubfunctionNotSupportedInActiveSession => Some(0x7E),
            DiagReturnCode::ServiceNotSupportedInActiveSession => Some(0x7F),
        }
    }

    /// Preference rank when the dispatch walk merges negative codes
    ///
    /// Higher values describe the request more precisely and win.
    #[must_use]
    pub fn dispatch_rank(&self) -> u8 {
        match self {
            DiagReturnCode::NotResponsible => 0,
            DiagReturnCode::SubfunctionNotSupported => 1,
            DiagReturnCode::SubfunctionNotSupportedInActiveSession => 2,
            DiagReturnCode::ServiceNotSupported => 3,
            DiagReturnCode::InvalidFormat => 4,
            DiagReturnCode::RequestOutOfRange => 5,
            _ => 6,
        }
    }

    /// The more precise of two codes under [DiagReturnCode::dispatch_rank]
    #[must_use]
    pub fn prefer(self, other: DiagReturnCode) -> DiagReturnCode {
        if other.dispatch_rank() > self.dispatch_rank() {
            other
        } else {
            self
        }
    }
}
