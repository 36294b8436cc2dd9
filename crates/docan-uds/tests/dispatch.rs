//! Dispatch tests: a fully assembled job tree driven by literal requests

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;

use docan_uds::code::DiagReturnCode;
use docan_uds::connection::IncomingDiagConnection;
use docan_uds::dispatcher::{DiagDispatcher, DispatcherConfig, ResponseChannel};
use docan_uds::job::{
    DiagJob, JobOutcome, JobTree, ServiceNode, ShutdownKind, UdsLifecycleConnector, UdsServices,
};
use docan_uds::services::control_dtc_setting::ControlDtcSetting;
use docan_uds::services::communication_control::CommunicationControl;
use docan_uds::services::ecu_reset::{
    EnableRapidPowerShutdown, HardReset, PowerDown, SoftReset,
};
use docan_uds::services::read_data::{DataIdentifierJob, MultipleReadDataByIdentifier};
use docan_uds::services::routine_control::{
    request_routine_results, routine_control, start_routine, stop_routine,
};
use docan_uds::services::security_access::security_access;
use docan_uds::services::session_control::SessionControl;
use docan_uds::services::tester_present::TesterPresent;
use docan_uds::session::{DiagSessionMask, SessionType};
use docan_uds::session_manager::{DiagSessionManager, SessionPersistence};

#[ctor::ctor]
fn setup_test_logging() {
    docan_test::init_test_logging();
}

const ECU_ADDRESS: u16 = 0x10;
const TESTER_ADDRESS: u16 = 0xF1;
const FUNCTIONAL_ADDRESS: u16 = 0xDF;

#[derive(Default)]
struct Channel {
    sent: Vec<(u16, u16, Vec<u8>)>,
}

impl ResponseChannel for Channel {
    fn send_response(&mut self, source_id: u16, target_id: u16, payload: &[u8]) -> bool {
        self.sent.push((source_id, target_id, payload.to_vec()));
        true
    }
}

#[derive(Default)]
struct Lifecycle {
    shutdowns: Vec<(ShutdownKind, u32)>,
    power_downs: Vec<(bool, u8)>,
    refuse_mode_change: bool,
}

impl UdsLifecycleConnector for Lifecycle {
    fn is_mode_change_possible(&self) -> bool {
        !self.refuse_mode_change
    }

    fn request_shutdown(&mut self, kind: ShutdownKind, delay_ms: u32) -> bool {
        self.shutdowns.push((kind, delay_ms));
        true
    }

    fn request_power_down(&mut self, rapid: bool, shutdown_time_s: u8) -> bool {
        self.power_downs.push((rapid, shutdown_time_s));
        true
    }
}

#[derive(Clone, Default)]
struct Persistence {
    written: Rc<RefCell<Vec<u8>>>,
}

impl SessionPersistence for Persistence {
    fn read_session(&mut self) -> Option<u8> {
        None
    }

    fn write_session(&mut self, session_byte: u8) -> bool {
        self.written.borrow_mut().push(session_byte);
        true
    }
}

/// A routine with id 0x1234 that reports one status byte
struct TestRoutine;

impl DiagJob for TestRoutine {
    fn implemented_request(&self) -> &[u8] {
        &[0x31, 0x01, 0x12, 0x34]
    }

    fn process(
        &mut self,
        _services: &mut UdsServices,
        connection: &mut IncomingDiagConnection,
        request: &[u8],
    ) -> JobOutcome {
        for &byte in &request[1..4] {
            connection.add_identifier(byte);
        }
        let response = connection.release_request_get_response();
        response.append_u8(0x00);
        connection.send_positive_response();
        JobOutcome::Done(DiagReturnCode::Ok)
    }
}

/// A job that accepts the request but never answers
struct NeverAnswers;

impl DiagJob for NeverAnswers {
    fn implemented_request(&self) -> &[u8] {
        &[0x2E]
    }

    fn minimum_request_length(&self) -> usize {
        2
    }

    fn process(
        &mut self,
        _services: &mut UdsServices,
        _connection: &mut IncomingDiagConnection,
        _request: &[u8],
    ) -> JobOutcome {
        JobOutcome::Done(DiagReturnCode::Ok)
    }
}

fn dispatcher(persistence: Persistence) -> DiagDispatcher<Channel, Lifecycle> {
    let mut tree = JobTree::new();
    let root = tree.root();

    tree.add_job(root, Box::new(SessionControl::new()));

    let ecu_reset = tree.add_job(
        root,
        Box::new(ServiceNode::service(0x11, 2, DiagSessionMask::ALL)),
    );
    tree.add_job(ecu_reset, Box::new(HardReset));
    tree.add_job(ecu_reset, Box::new(SoftReset));
    tree.add_job(ecu_reset, Box::new(EnableRapidPowerShutdown));
    tree.add_job(ecu_reset, Box::new(PowerDown));

    let read_data = tree.add_job(root, Box::new(MultipleReadDataByIdentifier));
    tree.add_job(
        read_data,
        Box::new(DataIdentifierJob::new(
            0xF190,
            DiagSessionMask::ALL,
            Box::new(|response| {
                response.append_slice(&[0x01, 0x02, 0x03]);
                DiagReturnCode::Ok
            }),
        )),
    );

    tree.add_job(root, Box::new(TesterPresent));
    tree.add_job(root, Box::new(ControlDtcSetting::new()));
    tree.add_job(root, Box::new(CommunicationControl::new()));
    tree.add_job(root, Box::new(NeverAnswers));

    let routines = tree.add_job(root, Box::new(routine_control()));
    let start = tree.add_job(routines, Box::new(start_routine()));
    tree.add_job(start, Box::new(TestRoutine));
    tree.add_job(routines, Box::new(stop_routine()));
    tree.add_job(routines, Box::new(request_routine_results()));

    tree.add_job(root, Box::new(security_access()));

    let session_manager = DiagSessionManager::new(Box::new(persistence), 5000);
    let mut dispatcher = DiagDispatcher::new(
        tree,
        session_manager,
        Lifecycle::default(),
        Channel::default(),
        DispatcherConfig {
            source_id: ECU_ADDRESS,
            functional_address: FUNCTIONAL_ADDRESS,
            request_buffer_size: 64,
            response_buffer_size: 64,
        },
    );
    dispatcher.init().unwrap();
    dispatcher
}

fn request(dispatcher: &mut DiagDispatcher<Channel, Lifecycle>, payload: &[u8], now_ms: u32) {
    dispatcher.message_received(TESTER_ADDRESS, ECU_ADDRESS, payload, now_ms);
}

fn enter_extended(dispatcher: &mut DiagDispatcher<Channel, Lifecycle>, now_ms: u32) {
    request(dispatcher, &[0x10, 0x03], now_ms);
    assert_eq!(
        dispatcher.session_manager().active_session(),
        SessionType::Extended
    );
}

#[test]
fn test_session_control_to_extended() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x10, 0x03], 0);

    // P2 and P2* after the echoed subfunction, big-endian
    assert_eq!(
        cut.channel().sent,
        vec![(
            ECU_ADDRESS,
            TESTER_ADDRESS,
            vec![0x50, 0x03, 0x00, 0x32, 0x01, 0xF4]
        )]
    );
    assert_eq!(
        cut.session_manager().active_session(),
        SessionType::Extended
    );
    assert!(cut.session_manager().is_session_timeout_active());
}

#[test]
fn test_session_control_suppressed_response() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x10, 0x83], 0);

    assert_eq!(cut.channel().sent, vec![]);
    assert_eq!(
        cut.session_manager().active_session(),
        SessionType::Extended
    );
    assert!(!cut.connection().is_open());
}

#[test]
fn test_programming_session_persists_and_resets() {
    let persistence = Persistence::default();
    let mut cut = dispatcher(persistence.clone());

    enter_extended(&mut cut, 0);
    request(&mut cut, &[0x10, 0x02], 100);

    assert_eq!(
        cut.channel().sent[1],
        (
            ECU_ADDRESS,
            TESTER_ADDRESS,
            vec![0x50, 0x02, 0x00, 0x32, 0x13, 0x88]
        )
    );
    assert_eq!(persistence.written.borrow().as_slice(), &[0x02]);
    assert_eq!(
        cut.lifecycle().shutdowns,
        vec![(ShutdownKind::HardReset, 100)]
    );
    assert!(!cut.is_enabled());
}

#[test]
fn test_programming_session_is_refused_from_default() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x10, 0x02], 0);

    assert_eq!(
        cut.channel().sent,
        vec![(ECU_ADDRESS, TESTER_ADDRESS, vec![0x7F, 0x10, 0x7E])]
    );
    assert_eq!(cut.session_manager().active_session(), SessionType::Default);
}

#[test]
fn test_unknown_service() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0xAA, 0x01], 0);

    assert_eq!(
        cut.channel().sent,
        vec![(ECU_ADDRESS, TESTER_ADDRESS, vec![0x7F, 0xAA, 0x11])]
    );
}

#[test]
fn test_dispatch_is_deterministic() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x22, 0xF1, 0x90], 0);
    request(&mut cut, &[0x22, 0xF1, 0x90], 10);

    assert_eq!(cut.channel().sent.len(), 2);
    assert_eq!(cut.channel().sent[0].2, cut.channel().sent[1].2);
}

#[test]
fn test_read_single_data_identifier() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x22, 0xF1, 0x90], 0);

    assert_eq!(
        cut.channel().sent,
        vec![(
            ECU_ADDRESS,
            TESTER_ADDRESS,
            vec![0x62, 0xF1, 0x90, 0x01, 0x02, 0x03]
        )]
    );
}

#[test]
fn test_read_unknown_data_identifier() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x22, 0xF1, 0x8C], 0);

    assert_eq!(
        cut.channel().sent,
        vec![(ECU_ADDRESS, TESTER_ADDRESS, vec![0x7F, 0x22, 0x31])]
    );
}

#[test]
fn test_multi_did_read_tolerates_unknown_identifier() {
    let mut cut = dispatcher(Persistence::default());

    // first DID known, second unknown: the response carries only the first
    request(&mut cut, &[0x22, 0xF1, 0x90, 0xF1, 0x8C], 0);

    assert_eq!(
        cut.channel().sent,
        vec![(
            ECU_ADDRESS,
            TESTER_ADDRESS,
            vec![0x62, 0xF1, 0x90, 0x01, 0x02, 0x03]
        )]
    );
}

#[test]
fn test_multi_did_read_with_all_unknown_identifiers() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x22, 0xF1, 0x8C, 0xF1, 0x8D], 0);

    assert_eq!(
        cut.channel().sent,
        vec![(ECU_ADDRESS, TESTER_ADDRESS, vec![0x7F, 0x22, 0x31])]
    );
}

#[test]
fn test_multi_did_read_with_odd_length() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x22, 0xF1, 0x90, 0xF1], 0);

    assert_eq!(
        cut.channel().sent,
        vec![(ECU_ADDRESS, TESTER_ADDRESS, vec![0x7F, 0x22, 0x13])]
    );
}

#[test]
fn test_tester_present_answers() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x3E, 0x00], 0);

    assert_eq!(
        cut.channel().sent,
        vec![(ECU_ADDRESS, TESTER_ADDRESS, vec![0x7E, 0x00])]
    );
}

#[test]
fn test_tester_present_suppressed() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x3E, 0x80], 0);

    assert_eq!(cut.channel().sent, vec![]);
    assert!(!cut.connection().is_open());
}

#[test]
fn test_functional_tester_present_is_silently_consumed() {
    let mut cut = dispatcher(Persistence::default());

    cut.message_received(TESTER_ADDRESS, FUNCTIONAL_ADDRESS, &[0x3E, 0x80], 0);

    assert_eq!(cut.channel().sent, vec![]);
    assert!(!cut.connection().is_open());
    assert!(!cut.session_manager().is_session_timeout_active());
}

#[test]
fn test_functional_tester_present_keeps_extended_session_alive() {
    let mut cut = dispatcher(Persistence::default());
    enter_extended(&mut cut, 0);

    // with the S3 timeout armed the keep-alive is dispatched normally
    cut.message_received(TESTER_ADDRESS, FUNCTIONAL_ADDRESS, &[0x3E, 0x80], 4000);
    cut.cyclic_task(8000);
    assert_eq!(
        cut.session_manager().active_session(),
        SessionType::Extended
    );

    // without keep-alives the session falls back to default
    cut.cyclic_task(9001);
    assert_eq!(cut.session_manager().active_session(), SessionType::Default);
}

#[test]
fn test_hard_reset() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x11, 0x01], 0);

    assert_eq!(
        cut.channel().sent,
        vec![(ECU_ADDRESS, TESTER_ADDRESS, vec![0x51, 0x01])]
    );
    assert_eq!(
        cut.lifecycle().shutdowns,
        vec![(ShutdownKind::HardReset, 100)]
    );
    assert!(!cut.is_enabled());

    // no further requests are accepted
    request(&mut cut, &[0x3E, 0x00], 10);
    assert_eq!(cut.channel().sent.len(), 1);
}

#[test]
fn test_unknown_reset_subfunction() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x11, 0x05], 0);

    assert_eq!(
        cut.channel().sent,
        vec![(ECU_ADDRESS, TESTER_ADDRESS, vec![0x7F, 0x11, 0x12])]
    );
}

#[test]
fn test_enable_rapid_power_shutdown() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x11, 0x04], 0);

    // the response appends the shutdown time
    assert_eq!(
        cut.channel().sent,
        vec![(ECU_ADDRESS, TESTER_ADDRESS, vec![0x51, 0x04, 0x0A])]
    );
    assert_eq!(cut.lifecycle().power_downs, vec![(true, 0x0A)]);
}

#[test]
fn test_control_dtc_setting_gated_in_default_session() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x85, 0x01], 0);

    assert_eq!(
        cut.channel().sent,
        vec![(ECU_ADDRESS, TESTER_ADDRESS, vec![0x7F, 0x85, 0x7F])]
    );
}

#[test]
fn test_control_dtc_setting_in_extended_session() {
    let mut cut = dispatcher(Persistence::default());
    enter_extended(&mut cut, 0);

    request(&mut cut, &[0x85, 0x02], 10);

    let last = cut.channel().sent.last().unwrap().clone();
    assert_eq!(last.2, vec![0xC5, 0x02]);
}

#[test]
fn test_communication_control_lengths() {
    let mut cut = dispatcher(Persistence::default());
    enter_extended(&mut cut, 0);

    request(&mut cut, &[0x28, 0x01, 0x01], 10);
    assert_eq!(cut.channel().sent.last().unwrap().2, vec![0x68, 0x01]);

    // enhanced address control types carry a node id
    request(&mut cut, &[0x28, 0x04, 0x01], 20);
    assert_eq!(cut.channel().sent.last().unwrap().2, vec![0x7F, 0x28, 0x13]);

    request(&mut cut, &[0x28, 0x04, 0x01, 0xAB, 0xCD], 30);
    assert_eq!(cut.channel().sent.last().unwrap().2, vec![0x68, 0x04]);

    request(&mut cut, &[0x28, 0x06, 0x01], 40);
    assert_eq!(cut.channel().sent.last().unwrap().2, vec![0x7F, 0x28, 0x12]);
}

#[test]
fn test_routine_control() {
    let mut cut = dispatcher(Persistence::default());
    enter_extended(&mut cut, 0);

    request(&mut cut, &[0x31, 0x01, 0x12, 0x34], 10);
    assert_eq!(
        cut.channel().sent.last().unwrap().2,
        vec![0x71, 0x01, 0x12, 0x34, 0x00]
    );

    request(&mut cut, &[0x31, 0x01, 0x99, 0x99], 20);
    assert_eq!(cut.channel().sent.last().unwrap().2, vec![0x7F, 0x31, 0x31]);

    request(&mut cut, &[0x31, 0x01], 30);
    assert_eq!(cut.channel().sent.last().unwrap().2, vec![0x7F, 0x31, 0x13]);
}

#[test]
fn test_routine_control_gated_in_default_session() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x31, 0x01, 0x12, 0x34], 0);

    assert_eq!(cut.channel().sent.last().unwrap().2, vec![0x7F, 0x31, 0x7F]);
}

#[test]
fn test_security_access_stub() {
    let mut cut = dispatcher(Persistence::default());
    enter_extended(&mut cut, 0);

    // no seed/key jobs registered: every subfunction is unsupported
    request(&mut cut, &[0x27, 0x01], 10);
    assert_eq!(cut.channel().sent.last().unwrap().2, vec![0x7F, 0x27, 0x12]);
}

#[test]
fn test_pending_pump_and_busy_rejection() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x2E, 0x01, 0x02], 0);
    assert_eq!(cut.channel().sent, vec![]);
    assert!(cut.connection().is_open());

    // a second request is rejected while the first is in flight
    request(&mut cut, &[0x22, 0xF1, 0x90], 10);
    assert_eq!(
        cut.channel().sent,
        vec![(ECU_ADDRESS, TESTER_ADDRESS, vec![0x7F, 0x22, 0x21])]
    );

    // the keep-alive fires at the initial deadline, then periodically
    cut.cyclic_task(40);
    assert_eq!(
        cut.channel().sent.last().unwrap().2,
        vec![0x7F, 0x2E, 0x78]
    );
    cut.cyclic_task(4000);
    assert_eq!(cut.channel().sent.len(), 2);
    cut.cyclic_task(40 + 4500);
    assert_eq!(cut.channel().sent.len(), 3);
    assert_eq!(
        cut.channel().sent.last().unwrap().2,
        vec![0x7F, 0x2E, 0x78]
    );
}

#[test]
fn test_global_timeout_terminates_the_connection() {
    let mut cut = dispatcher(Persistence::default());

    request(&mut cut, &[0x2E, 0x01, 0x02], 0);
    assert!(cut.connection().is_open());

    cut.cyclic_task(190_000);
    assert!(!cut.connection().is_open());

    // new requests are accepted again
    request(&mut cut, &[0x22, 0xF1, 0x90], 190_010);
    assert_eq!(
        cut.channel().sent.last().unwrap().2,
        vec![0x62, 0xF1, 0x90, 0x01, 0x02, 0x03]
    );
}
