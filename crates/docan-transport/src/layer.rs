//! Transport layer facade
//!
//! Wires the receiver and transmitter to the data link layer: resolves
//! addresses, decodes raw frames into first/consecutive/flow-control
//! events, and forwards lifecycle calls.

use serde::{Deserialize, Serialize};

use crate::address::{AddressConverter, DataLinkAddressPair, TransportAddressPair};
use crate::codec::{DecodedFrame, FlowStatus};
use crate::connection::Connection;
use crate::datalink::{FrameReceiver, FrameTransmitter};
use crate::message::{
    TransportMessage, TransportMessageListener, TransportMessageProcessedListener,
    TransportMessageProvider,
};
use crate::params::TransportParameters;
use crate::receiver::Receiver;
use crate::transmitter::{SendError, Transmitter};
use crate::types::{DataLinkAddress, FrameIndex, FrameSize, MessageSize};

/// Pool dimensions of a transport layer
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TransportLayerConfig {
    /// Concurrent inbound messages
    pub receiver_capacity: usize,
    /// Concurrent outbound messages
    pub transmitter_capacity: usize,
    /// First frame payload bound, sizes the receiver pool blocks
    pub max_first_frame_data_size: FrameSize,
}

impl Default for TransportLayerConfig {
    fn default() -> Self {
        Self {
            receiver_capacity: 8,
            transmitter_capacity: 8,
            // a padded FD first frame carries up to 62 payload bytes
            max_first_frame_data_size: 62,
        }
    }
}

/// DoCAN transport layer for one bus
pub struct TransportLayer<A, P, L, F>
where
    A: AddressConverter,
    P: TransportMessageProvider + TransportMessageListener,
    L: TransportMessageProcessedListener,
    F: FrameTransmitter + Clone,
{
    converter: A,
    receiver: Receiver<P, F>,
    transmitter: Transmitter<L, F>,
}

impl<A, P, L, F> TransportLayer<A, P, L, F>
where
    A: AddressConverter,
    P: TransportMessageProvider + TransportMessageListener,
    L: TransportMessageProcessedListener,
    F: FrameTransmitter + Clone,
{
    pub fn new(
        converter: A,
        provider: P,
        processed_listener: L,
        frame_transmitter: F,
        parameters: TransportParameters,
        config: TransportLayerConfig,
    ) -> Self {
        Self {
            converter,
            receiver: Receiver::new(
                provider,
                frame_transmitter.clone(),
                parameters,
                config.receiver_capacity,
                config.max_first_frame_data_size,
            ),
            transmitter: Transmitter::new(
                processed_listener,
                frame_transmitter,
                parameters,
                config.transmitter_capacity,
            ),
        }
    }

    /// Check integration invariants; must be called before frames flow
    pub fn init(&self) {
        self.receiver.init();
        self.transmitter.init();
    }

    /// Cease all active communication
    pub fn shutdown(&mut self, now_us: u32) {
        self.transmitter.shutdown(now_us);
        self.receiver.shutdown(now_us);
    }

    #[inline]
    #[must_use]
    pub fn receiver(&self) -> &Receiver<P, F> {
        &self.receiver
    }

    pub fn receiver_mut(&mut self) -> &mut Receiver<P, F> {
        &mut self.receiver
    }

    #[inline]
    #[must_use]
    pub fn transmitter(&self) -> &Transmitter<L, F> {
        &self.transmitter
    }

    pub fn transmitter_mut(&mut self) -> &mut Transmitter<L, F> {
        &mut self.transmitter
    }

    /// Submit a transport message for transmission
    ///
    /// The message's source/target ids select the route.
    pub fn send(&mut self, message: TransportMessage, now_us: u32) -> Result<(), SendError> {
        let transport = TransportAddressPair::new(message.source_id(), message.target_id());
        if !transport.is_valid() {
            return Err(SendError::InvalidAddressPair(message));
        }
        let Some((codec, data_link)) = self.converter.transmission_parameters(transport) else {
            tracing::warn!(
                "no route for {:#X} -> {:#X}",
                transport.source_id(),
                transport.target_id()
            );
            return Err(SendError::NoRoute(message));
        };
        let connection = Connection::new(codec, data_link, transport);
        self.transmitter.send(connection, message, now_us)
    }

    /// Dispatch a raw frame received from the CAN hardware
    pub fn frame_received(
        &mut self,
        reception_address: DataLinkAddress,
        payload: &[u8],
        now_us: u32,
    ) {
        let Some(params) = self.converter.reception_parameters(reception_address) else {
            tracing::trace!("frame on {reception_address:#X} is not for us");
            return;
        };
        let decoded = match params.codec.decode_frame(payload) {
            Ok(decoded) => decoded,
            Err(error) => {
                tracing::warn!(
                    "undecodable frame on {reception_address:#X} ({}): {error}",
                    hex::encode_upper(payload)
                );
                return;
            }
        };
        let connection = Connection::new(
            params.codec,
            DataLinkAddressPair::new(reception_address, params.transmission_address),
            params.transport,
        );
        match decoded {
            DecodedFrame::Single { data } => {
                let (_, consecutive_size) = params.codec.frame_count(data.len() as MessageSize);
                self.first_data_frame_received(
                    connection,
                    data.len() as MessageSize,
                    1,
                    consecutive_size,
                    data,
                    now_us,
                );
            }
            DecodedFrame::First { message_size, data } => {
                let (frame_count, consecutive_size) = params.codec.frame_count(message_size);
                self.first_data_frame_received(
                    connection,
                    message_size,
                    frame_count,
                    consecutive_size,
                    data,
                    now_us,
                );
            }
            DecodedFrame::Consecutive {
                sequence_number,
                data,
            } => {
                self.consecutive_data_frame_received(reception_address, sequence_number, data, now_us);
            }
            DecodedFrame::FlowControl {
                status,
                block_size,
                encoded_min_separation_time,
            } => {
                self.flow_control_frame_received(
                    reception_address,
                    status,
                    block_size,
                    encoded_min_separation_time,
                    now_us,
                );
            }
        }
    }

    /// Drive timeouts on both sides
    pub fn cyclic_task(&mut self, now_us: u32) {
        self.transmitter.cyclic_task(now_us);
        self.receiver.cyclic_task(now_us);
    }

    /// Drive separation-time pacing; `true` while consecutive frames remain
    pub fn tick(&mut self, now_us: u32) -> bool {
        self.transmitter.tick(now_us)
    }
}

impl<A, P, L, F> FrameReceiver for TransportLayer<A, P, L, F>
where
    A: AddressConverter,
    P: TransportMessageProvider + TransportMessageListener,
    L: TransportMessageProcessedListener,
    F: FrameTransmitter + Clone,
{
    fn first_data_frame_received(
        &mut self,
        connection: Connection,
        message_size: MessageSize,
        frame_count: FrameIndex,
        consecutive_frame_data_size: FrameSize,
        data: &[u8],
        now_us: u32,
    ) {
        self.receiver.first_data_frame_received(
            connection,
            message_size,
            frame_count,
            consecutive_frame_data_size,
            data,
            now_us,
        );
    }

    fn consecutive_data_frame_received(
        &mut self,
        reception_address: DataLinkAddress,
        sequence_number: u8,
        data: &[u8],
        now_us: u32,
    ) {
        self.receiver
            .consecutive_data_frame_received(reception_address, sequence_number, data, now_us);
    }

    fn flow_control_frame_received(
        &mut self,
        reception_address: DataLinkAddress,
        status: FlowStatus,
        block_size: u8,
        encoded_min_separation_time: u8,
        now_us: u32,
    ) {
        self.transmitter.flow_control_frame_received(
            reception_address,
            status,
            block_size,
            encoded_min_separation_time,
            now_us,
        );
    }
}
