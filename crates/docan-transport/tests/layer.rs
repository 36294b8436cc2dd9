//! End-to-end tests of the transport layer facade against literal frames

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;

use docan_test::frame_bytes;
use docan_transport::address::{
    DataLinkAddressPair, MapAddressConverter, RoutingEntry, TransportAddressPair,
};
use docan_transport::codec::FrameCodec;
use docan_transport::layer::{TransportLayer, TransportLayerConfig};
use docan_transport::message::{
    ProcessingResult, ProviderError, TransportMessage, TransportMessageListener,
    TransportMessageProcessedListener, TransportMessageProvider,
};
use docan_transport::params::TransportParameters;
use docan_transport::datalink::FrameTransmitter;
use docan_transport::types::{DataLinkAddress, MessageSize};

#[ctor::ctor]
fn setup_test_logging() {
    docan_test::init_test_logging();
}

#[derive(Default)]
struct Harness {
    buffers: Vec<TransportMessage>,
    received: Vec<(u16, u16, Vec<u8>)>,
}

impl Harness {
    fn with_buffers(count: usize) -> Self {
        let mut harness = Self::default();
        for _ in 0..count {
            harness.buffers.push(TransportMessage::new(256));
        }
        harness
    }
}

impl TransportMessageProvider for Harness {
    fn get_transport_message(
        &mut self,
        _source_id: u16,
        _target_id: u16,
        payload_length: MessageSize,
        _first_frame_data: &[u8],
    ) -> Result<TransportMessage, ProviderError> {
        let fits = |message: &TransportMessage| message.capacity() >= usize::from(payload_length);
        match self.buffers.iter().position(fits) {
            Some(position) => Ok(self.buffers.remove(position)),
            None => Err(ProviderError::NoMessageAvailable),
        }
    }

    fn release_transport_message(&mut self, message: TransportMessage) {
        self.buffers.push(message);
    }
}

impl TransportMessageListener for Harness {
    fn message_received(&mut self, message: TransportMessage) -> Result<(), TransportMessage> {
        self.received.push((
            message.source_id(),
            message.target_id(),
            message.payload().to_vec(),
        ));
        self.buffers.push(message);
        Ok(())
    }
}

#[derive(Default)]
struct ProcessedRecorder {
    completed: Vec<(Vec<u8>, ProcessingResult)>,
}

impl TransportMessageProcessedListener for ProcessedRecorder {
    fn transport_message_processed(&mut self, message: TransportMessage, result: ProcessingResult) {
        self.completed.push((message.payload().to_vec(), result));
    }
}

#[derive(Clone, Default)]
struct FrameRecorder {
    frames: Rc<RefCell<Vec<(DataLinkAddress, Vec<u8>)>>>,
}

impl FrameRecorder {
    fn take(&self) -> Vec<(DataLinkAddress, Vec<u8>)> {
        self.frames.borrow_mut().drain(..).collect()
    }
}

impl FrameTransmitter for FrameRecorder {
    fn send_frame(&mut self, address: DataLinkAddress, payload: &[u8]) -> bool {
        self.frames.borrow_mut().push((address, payload.to_vec()));
        true
    }
}

type Layer = TransportLayer<MapAddressConverter, Harness, ProcessedRecorder, FrameRecorder>;

fn server_converter() -> MapAddressConverter {
    MapAddressConverter::new(vec![
        RoutingEntry {
            transport: TransportAddressPair::new(0xF1, 0x10),
            data_link: DataLinkAddressPair::new(0x700, 0x708),
            codec: FrameCodec::OPTIMIZED_CLASSICAL,
        },
        RoutingEntry {
            transport: TransportAddressPair::new(0xF1, 0xDF),
            data_link: DataLinkAddressPair::functional(0x7DF),
            codec: FrameCodec::OPTIMIZED_CLASSICAL,
        },
    ])
    .unwrap()
}

fn server(recorder: FrameRecorder, parameters: TransportParameters) -> Layer {
    let layer = TransportLayer::new(
        server_converter(),
        Harness::with_buffers(2),
        ProcessedRecorder::default(),
        recorder,
        parameters,
        TransportLayerConfig::default(),
    );
    layer.init();
    layer
}

#[test]
fn test_functional_single_frame_tester_present() {
    let recorder = FrameRecorder::default();
    let mut layer = server(recorder.clone(), TransportParameters::default());

    layer.frame_received(0x7DF, &frame_bytes("02 3E 80 00 00 00 00 00"), 0);

    assert_eq!(
        layer.receiver().provider().received,
        vec![(0xF1, 0xDF, vec![0x3E, 0x80])]
    );
    // nothing emitted, no receiver remains in the list
    assert_eq!(recorder.take(), vec![]);
    assert_eq!(layer.receiver().active_count(), 0);
}

#[test]
fn test_segmented_receive_of_ten_bytes() {
    let recorder = FrameRecorder::default();
    let mut layer = server(recorder.clone(), TransportParameters::default());

    layer.frame_received(0x700, &frame_bytes("10 0A A1 A2 A3 A4 A5 A6"), 0);
    // one CTS between the first and the consecutive frame
    assert_eq!(recorder.take(), vec![(0x708, frame_bytes("30 00 00"))]);

    layer.frame_received(0x700, &frame_bytes("21 A7 A8 A9 AA 00 00 00"), 10);

    assert_eq!(
        layer.receiver().provider().received,
        vec![(0xF1, 0x10, frame_bytes("A1 A2 A3 A4 A5 A6 A7 A8 A9 AA"))]
    );
    assert_eq!(layer.receiver().active_count(), 0);
}

#[test]
fn test_frames_for_other_addresses_are_ignored() {
    let recorder = FrameRecorder::default();
    let mut layer = server(recorder.clone(), TransportParameters::default());

    layer.frame_received(0x123, &frame_bytes("02 3E 80"), 0);
    layer.frame_received(0x700, &frame_bytes("4F 00"), 0);

    assert_eq!(layer.receiver().provider().received, vec![]);
    assert_eq!(recorder.take(), vec![]);
}

#[test]
fn test_send_without_route_is_rejected() {
    let recorder = FrameRecorder::default();
    let mut layer = server(recorder, TransportParameters::default());

    let message = TransportMessage::with_payload(0x10, 0x55, &[0x50, 0x01]);
    assert!(layer.send(message, 0).is_err());
}

#[test]
fn test_round_trip_through_two_layers() {
    let client_recorder = FrameRecorder::default();
    let server_recorder = FrameRecorder::default();

    // the client talks 0x10 -> 0xF1 inverted: data frames out on 0x700,
    // flow control back on 0x708
    let client_converter = MapAddressConverter::new(vec![RoutingEntry {
        transport: TransportAddressPair::new(0x10, 0xF1),
        data_link: DataLinkAddressPair::new(0x708, 0x700),
        codec: FrameCodec::OPTIMIZED_CLASSICAL,
    }])
    .unwrap();
    let mut client: Layer = TransportLayer::new(
        client_converter,
        Harness::with_buffers(1),
        ProcessedRecorder::default(),
        client_recorder.clone(),
        TransportParameters::default(),
        TransportLayerConfig::default(),
    );
    client.init();

    let server_parameters = TransportParameters {
        max_block_size: 2,
        ..TransportParameters::default()
    };
    let mut server = server(server_recorder.clone(), server_parameters);

    let payload: Vec<u8> = (0..40).map(|i| i as u8).collect();
    client
        .send(TransportMessage::with_payload(0xF1, 0x10, &payload), 0)
        .unwrap();

    let mut now = 0u32;
    for _ in 0..100 {
        for (address, frame) in client_recorder.take() {
            server.frame_received(address, &frame, now);
        }
        for (address, frame) in server_recorder.take() {
            client.frame_received(address, &frame, now);
        }
        now += 100;
        client.tick(now);
        server.cyclic_task(now);
    }

    assert_eq!(
        server.receiver().provider().received,
        vec![(0xF1, 0x10, payload.clone())]
    );
    assert_eq!(
        client.transmitter().listener().completed,
        vec![(payload, ProcessingResult::Processed)]
    );
    assert_eq!(client.transmitter().active_count(), 0);
    assert_eq!(server.receiver().active_count(), 0);
}
