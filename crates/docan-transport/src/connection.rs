//! A logical transport connection between two devices

use crate::address::{DataLinkAddressPair, TransportAddressPair};
use crate::codec::FrameCodec;
use crate::types::DataLinkAddress;

/// How to encode/decode frames on one logical link and which transport
/// addresses to attach to reassembled messages
///
/// Copied by value into each message state machine. Equality is structural.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Connection {
    codec: FrameCodec,
    data_link: DataLinkAddressPair,
    transport: TransportAddressPair,
}

impl Connection {
    pub fn new(
        codec: FrameCodec,
        data_link: DataLinkAddressPair,
        transport: TransportAddressPair,
    ) -> Self {
        Self {
            codec,
            data_link,
            transport,
        }
    }

    #[inline]
    #[must_use]
    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    #[inline]
    #[must_use]
    pub fn data_link(&self) -> &DataLinkAddressPair {
        &self.data_link
    }

    #[inline]
    #[must_use]
    pub fn transport(&self) -> &TransportAddressPair {
        &self.transport
    }

    #[inline]
    #[must_use]
    pub fn reception_address(&self) -> DataLinkAddress {
        self.data_link.reception_address()
    }

    #[inline]
    #[must_use]
    pub fn transmission_address(&self) -> DataLinkAddress {
        self.data_link.transmission_address()
    }
}
