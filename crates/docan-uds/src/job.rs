//! Diagnostic jobs and the hierarchical dispatch tree
//!
//! Jobs form a tree keyed by successively longer byte prefixes of the
//! request: services at depth one, subfunctions at depth two, data
//! identifiers at depth three. Dispatch walks the children of a node until
//! one claims the request; [DiagReturnCode::NotResponsible] lets the walk
//! continue, every other code ends it.

use crate::code::DiagReturnCode;
use crate::connection::IncomingDiagConnection;
use crate::session::{DiagSessionMask, SessionType};
use crate::session_manager::DiagSessionManager;

/// Index of a job inside a [JobTree]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobId(pub(crate) usize);

/// Result of sending a job's response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseSendResult {
    Ok,
    Failed,
}

/// Collaborators handed to jobs while they process a request
pub struct UdsServices<'a> {
    pub session_manager: &'a mut DiagSessionManager,
    pub lifecycle: &'a mut dyn UdsLifecycleConnector,
    /// Cleared by jobs that must stop further request dispatch (resets)
    pub dispatcher_enabled: &'a mut bool,
    /// Millisecond time of the current dispatch, for timers jobs arm
    pub now_ms: u32,
}

/// Kind of shutdown requested through the lifecycle connector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownKind {
    HardReset,
    SoftReset,
    PowerDown,
}

/// Hooks into the surrounding ECU lifecycle
pub trait UdsLifecycleConnector {
    /// Whether a reset/shutdown may be initiated right now
    fn is_mode_change_possible(&self) -> bool {
        true
    }

    /// Request an ECU shutdown after `delay_ms`; `false` if refused
    fn request_shutdown(&mut self, kind: ShutdownKind, delay_ms: u32) -> bool;

    /// Request a power down; `rapid` selects rapid power shutdown
    fn request_power_down(&mut self, rapid: bool, shutdown_time_s: u8) -> bool;
}

/// What a job did with a request
pub enum JobOutcome {
    /// The job handled (or rejected) the request itself
    Done(DiagReturnCode),
    /// Dispatch to this node's children
    Children,
    /// Split the request into two-byte identifiers and run each against
    /// this node's children, combining the responses
    NestedIdentifiers,
}

/// One node of the diagnostic dispatch tree
pub trait DiagJob {
    /// The byte prefix this job claims (empty for the root)
    fn implemented_request(&self) -> &[u8];

    fn allowed_sessions(&self) -> DiagSessionMask {
        DiagSessionMask::ALL
    }

    /// Minimum total request length, prefix included
    fn minimum_request_length(&self) -> usize {
        self.implemented_request().len()
    }

    /// Code returned when no child claims the request
    fn default_code(&self) -> DiagReturnCode {
        DiagReturnCode::SubfunctionNotSupported
    }

    /// Whether the suppress-positive-response bit of the subfunction byte
    /// is honored (and stripped) for this job
    fn suppress_positive_response_allowed(&self) -> bool {
        false
    }

    /// Match the request against this job's prefix, length and session
    fn verify(&self, request: &[u8], session: SessionType) -> DiagReturnCode {
        let prefix = self.implemented_request();
        if request.len() < prefix.len() {
            return DiagReturnCode::InvalidFormat;
        }
        if request[..prefix.len()] != *prefix {
            return DiagReturnCode::NotResponsible;
        }
        if request.len() < self.minimum_request_length() {
            return DiagReturnCode::InvalidFormat;
        }
        if !self.allowed_sessions().contains(session) {
            return if prefix.len() >= 2 {
                DiagReturnCode::SubfunctionNotSupportedInActiveSession
            } else {
                DiagReturnCode::ServiceNotSupportedInActiveSession
            };
        }
        DiagReturnCode::Ok
    }

    /// The job's semantic action; the default dispatches to children
    fn process(
        &mut self,
        services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        request: &[u8],
    ) -> JobOutcome {
        let _ = (services, connection, request);
        JobOutcome::Children
    }

    /// Merge one nested step's code into the running combined code
    ///
    /// Returns whether the nested loop proceeds to the next identifier.
    /// The default tolerates identifiers nobody answers for
    /// (`NotResponsible`/`RequestOutOfRange`), adopts every other code,
    /// and keeps going only on OK.
    fn combine_nested_response(
        &mut self,
        code: DiagReturnCode,
        combined: &mut DiagReturnCode,
    ) -> bool {
        if matches!(
            code,
            DiagReturnCode::NotResponsible | DiagReturnCode::RequestOutOfRange
        ) {
            return true;
        }
        *combined = code;
        code == DiagReturnCode::Ok
    }

    /// Post-hook after the response left (side effects like resets)
    fn response_sent(
        &mut self,
        services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        result: ResponseSendResult,
    ) {
        let _ = (services, result);
        connection.terminate();
    }
}

struct JobNode {
    job: Box<dyn DiagJob>,
    first_child: Option<usize>,
    next_sibling: Option<usize>,
}

/// Arena-backed tree of diagnostic jobs
pub struct JobTree {
    nodes: Vec<JobNode>,
}

impl JobTree {
    /// Create a tree with [DiagJobRoot] at the top
    pub fn new() -> Self {
        Self {
            nodes: vec![JobNode {
                job: Box::new(DiagJobRoot),
                first_child: None,
                next_sibling: None,
            }],
        }
    }

    #[must_use]
    pub fn root(&self) -> JobId {
        JobId(0)
    }

    /// Append `job` to `parent`'s child list
    pub fn add_job(&mut self, parent: JobId, job: Box<dyn DiagJob>) -> JobId {
        let id = self.nodes.len();
        self.nodes.push(JobNode {
            job,
            first_child: None,
            next_sibling: None,
        });
        match self.nodes[parent.0].first_child {
            None => self.nodes[parent.0].first_child = Some(id),
            Some(mut last) => {
                while let Some(next) = self.nodes[last].next_sibling {
                    last = next;
                }
                self.nodes[last].next_sibling = Some(id);
            }
        }
        JobId(id)
    }

    #[must_use]
    pub fn job(&self, id: JobId) -> &dyn DiagJob {
        self.nodes[id.0].job.as_ref()
    }

    pub fn job_mut(&mut self, id: JobId) -> &mut dyn DiagJob {
        self.nodes[id.0].job.as_mut()
    }

    /// Check the tree for sibling jobs claiming the same prefix
    ///
    /// A duplicate prefix would shadow every job registered after it.
    pub fn check_consistency(&self) -> eyre::Result<()> {
        for (index, node) in self.nodes.iter().enumerate() {
            let mut first = node.first_child;
            while let Some(first_index) = first {
                let prefix = self.nodes[first_index].job.implemented_request();
                let mut second = self.nodes[first_index].next_sibling;
                while let Some(second_index) = second {
                    if self.nodes[second_index].job.implemented_request() == prefix {
                        eyre::bail!(
                            "jobs {first_index} and {second_index} under node {index} both claim \
                             prefix {}",
                            hex::encode_upper(prefix)
                        );
                    }
                    second = self.nodes[second_index].next_sibling;
                }
                first = self.nodes[first_index].next_sibling;
            }
        }
        Ok(())
    }

    /// Dispatch a request from the root
    pub fn execute(
        &mut self,
        services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        request: &mut [u8],
    ) -> DiagReturnCode {
        self.execute_node(0, services, connection, request)
    }

    /// Notify the sending job that its response left
    pub fn response_sent(
        &mut self,
        id: JobId,
        services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        result: ResponseSendResult,
    ) {
        self.nodes[id.0].job.response_sent(services, connection, result);
    }

    fn execute_node(
        &mut self,
        index: usize,
        services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        request: &mut [u8],
    ) -> DiagReturnCode {
        let session = services.session_manager.active_session();
        let verify_code = self.nodes[index].job.verify(request, session);
        if verify_code != DiagReturnCode::Ok {
            return verify_code;
        }
        if self.nodes[index].job.suppress_positive_response_allowed()
            && request.len() >= 2
            && request[1] & 0x80 != 0
        {
            request[1] &= 0x7F;
            connection.suppress_positive_response();
        }
        let has_children = self.nodes[index].first_child.is_some();
        if !has_children {
            let gate = services.session_manager.accepted_job(connection, request);
            if gate != DiagReturnCode::Ok {
                return gate;
            }
        }
        connection.set_sender(JobId(index));
        let outcome = self.nodes[index]
            .job
            .process(services, connection, request);
        match outcome {
            JobOutcome::Done(code) => code,
            JobOutcome::Children => {
                if !has_children {
                    return self.nodes[index].job.default_code();
                }
                self.execute_children(index, services, connection, request)
            }
            JobOutcome::NestedIdentifiers => {
                self.execute_nested_identifiers(index, services, connection, request)
            }
        }
    }

    fn execute_children(
        &mut self,
        index: usize,
        services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        request: &mut [u8],
    ) -> DiagReturnCode {
        let mut best = self.nodes[index].job.default_code();
        let mut child = self.nodes[index].first_child;
        while let Some(child_index) = child {
            let code = self.execute_node(child_index, services, connection, request);
            match code {
                DiagReturnCode::Ok => return DiagReturnCode::Ok,
                DiagReturnCode::NotResponsible => {
                    best = best.prefer(DiagReturnCode::NotResponsible);
                }
                halting => return halting,
            }
            child = self.nodes[child_index].next_sibling;
        }
        best
    }

    /// Nested multi-identifier dispatch (multi-DID read)
    ///
    /// Consumes the request two bytes at a time, runs a single-identifier
    /// request against the children, and combines the outcomes: ignored
    /// identifiers (`NotResponsible`/`RequestOutOfRange`) are tolerated,
    /// any other negative code takes over, OK carries through.
    fn execute_nested_identifiers(
        &mut self,
        index: usize,
        services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        request: &mut [u8],
    ) -> DiagReturnCode {
        let service_byte = request[0];
        let mut combined = DiagReturnCode::RequestOutOfRange;
        connection.begin_nested();
        let mut offset = 1;
        while offset + 2 <= request.len() {
            let mut sub_request = [service_byte, request[offset], request[offset + 1]];
            let code = self.execute_children(index, services, connection, &mut sub_request);
            let proceed = self.nodes[index]
                .job
                .combine_nested_response(code, &mut combined);
            if !proceed {
                break;
            }
            offset += 2;
        }
        connection.end_nested();
        connection.set_sender(JobId(index));
        if combined == DiagReturnCode::Ok {
            connection.send_positive_response();
        }
        combined
    }
}

impl Default for JobTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Root of the dispatch tree: global admission, service children
pub struct DiagJobRoot;

impl DiagJob for DiagJobRoot {
    fn implemented_request(&self) -> &[u8] {
        &[]
    }

    fn minimum_request_length(&self) -> usize {
        1
    }

    fn default_code(&self) -> DiagReturnCode {
        DiagReturnCode::ServiceNotSupported
    }
}

/// A plain branch node claiming one service id
pub struct ServiceNode {
    prefix: Vec<u8>,
    minimum_request_length: usize,
    sessions: DiagSessionMask,
    suppress_positive_response: bool,
    default_code: DiagReturnCode,
}

impl ServiceNode {
    /// A service branch: one prefix byte, subfunction children
    pub fn service(service_id: u8, minimum_request_length: usize, sessions: DiagSessionMask) -> Self {
        Self {
            prefix: vec![service_id],
            minimum_request_length,
            sessions,
            suppress_positive_response: false,
            default_code: DiagReturnCode::SubfunctionNotSupported,
        }
    }

    /// A subfunction branch: two prefix bytes, deeper children
    pub fn subfunction(
        prefix: [u8; 2],
        minimum_request_length: usize,
        sessions: DiagSessionMask,
    ) -> Self {
        Self {
            prefix: prefix.to_vec(),
            minimum_request_length,
            sessions,
            suppress_positive_response: false,
            default_code: DiagReturnCode::RequestOutOfRange,
        }
    }

    pub fn with_suppress_positive_response(mut self) -> Self {
        self.suppress_positive_response = true;
        self
    }

    pub fn with_default_code(mut self, code: DiagReturnCode) -> Self {
        self.default_code = code;
        self
    }
}

impl DiagJob for ServiceNode {
    fn implemented_request(&self) -> &[u8] {
        &self.prefix
    }

    fn allowed_sessions(&self) -> DiagSessionMask {
        self.sessions
    }

    fn minimum_request_length(&self) -> usize {
        self.minimum_request_length
    }

    fn default_code(&self) -> DiagReturnCode {
        self.default_code
    }

    fn suppress_positive_response_allowed(&self) -> bool {
        self.suppress_positive_response
    }
}
