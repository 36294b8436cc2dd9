//! Transport and data link addressing
//!
//! A routing table maps between 16-bit transport address pairs (who is
//! talking to whom) and data link address pairs (which CAN identifiers the
//! conversation happens on), and selects the frame codec per connection.

use std::fmt::Write;

use crate::codec::FrameCodec;
use crate::types::{DataLinkAddress, INVALID_ADDRESS};

/// A `(source, target)` pair of 16-bit transport addresses
///
/// Valid iff source and target differ. Immutable after construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportAddressPair {
    source_id: u16,
    target_id: u16,
}

impl TransportAddressPair {
    pub fn new(source_id: u16, target_id: u16) -> Self {
        Self {
            source_id,
            target_id,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.source_id != self.target_id
    }

    #[inline]
    #[must_use]
    pub fn source_id(&self) -> u16 {
        self.source_id
    }

    #[inline]
    #[must_use]
    pub fn target_id(&self) -> u16 {
        self.target_id
    }

    #[inline]
    #[must_use]
    pub fn invert(&self) -> Self {
        Self {
            source_id: self.target_id,
            target_id: self.source_id,
        }
    }
}

/// A `(reception, transmission)` pair of data link addresses
///
/// [INVALID_ADDRESS] as transmission address marks a functional-broadcast
/// routing entry: there is nowhere to send flow control to, so only
/// single-frame transfers are legal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataLinkAddressPair {
    reception_address: DataLinkAddress,
    transmission_address: DataLinkAddress,
}

impl DataLinkAddressPair {
    pub fn new(reception_address: DataLinkAddress, transmission_address: DataLinkAddress) -> Self {
        Self {
            reception_address,
            transmission_address,
        }
    }

    /// A pair with no transmission address (functional routing)
    pub fn functional(reception_address: DataLinkAddress) -> Self {
        Self::new(reception_address, INVALID_ADDRESS)
    }

    #[inline]
    #[must_use]
    pub fn reception_address(&self) -> DataLinkAddress {
        self.reception_address
    }

    #[inline]
    #[must_use]
    pub fn transmission_address(&self) -> DataLinkAddress {
        self.transmission_address
    }

    #[inline]
    #[must_use]
    pub fn has_transmission_address(&self) -> bool {
        self.transmission_address != INVALID_ADDRESS
    }
}

/// Everything needed to handle frames arriving on one reception address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceptionParameters {
    pub codec: FrameCodec,
    /// Source/target as seen by the reassembled message
    pub transport: TransportAddressPair,
    /// Where to send flow control frames ([INVALID_ADDRESS] for functional)
    pub transmission_address: DataLinkAddress,
}

/// Bidirectional mapping between transport and data link addresses
pub trait AddressConverter {
    /// Resolve the codec and data link addresses for an outbound message
    ///
    /// `None` means there is no route for this transport address pair.
    fn transmission_parameters(
        &self,
        transport: TransportAddressPair,
    ) -> Option<(FrameCodec, DataLinkAddressPair)>;

    /// Resolve who an inbound frame is from, who it is for, and where to
    /// acknowledge with flow control frames
    ///
    /// `None` means frames on this reception address are not ours.
    fn reception_parameters(
        &self,
        reception_address: DataLinkAddress,
    ) -> Option<ReceptionParameters>;
}

/// Format a data link address into `buffer` for logging, without allocating
///
/// Returns the formatted prefix of `buffer`; an empty string if the buffer
/// is too small.
pub fn format_data_link_address(address: DataLinkAddress, buffer: &mut [u8]) -> &str {
    struct SliceWriter<'a> {
        buffer: &'a mut [u8],
        written: usize,
    }
    impl Write for SliceWriter<'_> {
        fn write_str(&mut self, s: &str) -> std::fmt::Result {
            let remaining = &mut self.buffer[self.written..];
            if s.len() > remaining.len() {
                return Err(std::fmt::Error);
            }
            remaining[..s.len()].copy_from_slice(s.as_bytes());
            self.written += s.len();
            Ok(())
        }
    }

    let mut writer = SliceWriter { buffer, written: 0 };
    let written = match write!(writer, "{address:#X}") {
        Ok(()) => writer.written,
        Err(_) => 0,
    };
    // the writer only ever copies in str bytes
    std::str::from_utf8(&buffer[..written]).unwrap_or("")
}

/// One connection in a [MapAddressConverter]
///
/// The transport pair is given in reception direction: `source` is the
/// remote peer, `target` the local entity. Outbound lookups match the
/// inverted pair.
#[derive(Clone, Copy, Debug)]
pub struct RoutingEntry {
    pub transport: TransportAddressPair,
    pub data_link: DataLinkAddressPair,
    pub codec: FrameCodec,
}

/// Table-backed [AddressConverter]
pub struct MapAddressConverter {
    entries: Vec<RoutingEntry>,
}

impl MapAddressConverter {
    pub fn new(entries: Vec<RoutingEntry>) -> eyre::Result<Self> {
        for (index, entry) in entries.iter().enumerate() {
            if !entry.transport.is_valid() {
                eyre::bail!(
                    "routing entry {index}: source and target transport ids are both {:#X}",
                    entry.transport.source_id()
                );
            }
            if entry.data_link.reception_address() == INVALID_ADDRESS {
                eyre::bail!("routing entry {index}: reception address is the invalid address");
            }
            let duplicate = entries[..index]
                .iter()
                .any(|e| e.data_link.reception_address() == entry.data_link.reception_address());
            if duplicate {
                eyre::bail!(
                    "routing entry {index}: duplicate reception address {:#X}",
                    entry.data_link.reception_address()
                );
            }
        }
        Ok(Self { entries })
    }
}

impl AddressConverter for MapAddressConverter {
    fn transmission_parameters(
        &self,
        transport: TransportAddressPair,
    ) -> Option<(FrameCodec, DataLinkAddressPair)> {
        self.entries
            .iter()
            .find(|entry| entry.transport.invert() == transport)
            .map(|entry| (entry.codec, entry.data_link))
    }

    fn reception_parameters(
        &self,
        reception_address: DataLinkAddress,
    ) -> Option<ReceptionParameters> {
        self.entries
            .iter()
            .find(|entry| entry.data_link.reception_address() == reception_address)
            .map(|entry| ReceptionParameters {
                codec: entry.codec,
                transport: entry.transport,
                transmission_address: entry.data_link.transmission_address(),
            })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn converter() -> MapAddressConverter {
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

    #[test]
    fn test_transport_address_pair() {
        let pair = TransportAddressPair::new(0xF1, 0x10);
        assert!(pair.is_valid());
        assert_eq!(pair.invert(), TransportAddressPair::new(0x10, 0xF1));
        assert_eq!(pair.invert().invert(), pair);
        assert!(!TransportAddressPair::new(0x10, 0x10).is_valid());
    }

    #[test]
    fn test_reception_lookup() {
        let converter = converter();
        let params = converter.reception_parameters(0x700).unwrap();
        assert_eq!(params.transport, TransportAddressPair::new(0xF1, 0x10));
        assert_eq!(params.transmission_address, 0x708);
        assert_eq!(converter.reception_parameters(0x123), None);

        let functional = converter.reception_parameters(0x7DF).unwrap();
        assert_eq!(functional.transmission_address, INVALID_ADDRESS);
    }

    #[test]
    fn test_transmission_lookup_matches_inverted_pair() {
        let converter = converter();
        let (_, data_link) = converter
            .transmission_parameters(TransportAddressPair::new(0x10, 0xF1))
            .unwrap();
        assert_eq!(data_link, DataLinkAddressPair::new(0x700, 0x708));
        assert_eq!(
            converter.transmission_parameters(TransportAddressPair::new(0xF1, 0x10)),
            None
        );
    }

    #[test]
    fn test_invalid_tables_are_rejected() {
        let invalid_pair = MapAddressConverter::new(vec![RoutingEntry {
            transport: TransportAddressPair::new(0x10, 0x10),
            data_link: DataLinkAddressPair::new(0x700, 0x708),
            codec: FrameCodec::OPTIMIZED_CLASSICAL,
        }]);
        assert!(invalid_pair.is_err());

        let duplicate = MapAddressConverter::new(vec![
            RoutingEntry {
                transport: TransportAddressPair::new(0xF1, 0x10),
                data_link: DataLinkAddressPair::new(0x700, 0x708),
                codec: FrameCodec::OPTIMIZED_CLASSICAL,
            },
            RoutingEntry {
                transport: TransportAddressPair::new(0xF2, 0x10),
                data_link: DataLinkAddressPair::new(0x700, 0x710),
                codec: FrameCodec::OPTIMIZED_CLASSICAL,
            },
        ]);
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_format_data_link_address() {
        let mut buffer = [0u8; 32];
        assert_eq!(format_data_link_address(0x700, &mut buffer), "0x700");
        assert_eq!(format_data_link_address(0, &mut buffer), "0x0");

        let mut tiny = [0u8; 2];
        assert_eq!(format_data_link_address(0x12345678, &mut tiny), "");
    }
}
