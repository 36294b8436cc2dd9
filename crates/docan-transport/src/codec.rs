//! Frame codec for the ISO 15765-2 PCI layout
//!
//! The codec is a plain value copied into every [Connection]; the two
//! shipped presets differ only in their [CodecConfig]:
//!
//! | Preset | Frame length | Padding |
//! |--------|--------------|---------|
//! | [FrameCodec::OPTIMIZED_CLASSICAL] | 8 | none |
//! | [FrameCodec::PADDED_FD] | 64 | `0xCC` |
//!
//! PCI layouts (first payload byte, high nibble = frame type):
//!
//! | Frame | Layout |
//! |-------|--------|
//! | Single | `0L data…` (`00 LL data…` escaped above 7 bytes on FD) |
//! | First | `1L LL data…` (12-bit message size) |
//! | Consecutive | `2N data…` (N = sequence number) |
//! | Flow control | `3S BS STmin` (S: 0 = CTS, 1 = WAIT, 2 = OVFLW) |
//!
//! [Connection]: crate::connection::Connection

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use crate::types::{FrameIndex, FrameSize, MessageSize};

/// Fill byte for padded frame formats
pub const PADDING_BYTE: u8 = 0xCC;

/// Status nibble of a flow control frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowStatus {
    ClearToSend = 0,
    Wait = 1,
    Overflow = 2,
}

/// A frame decoded from raw data link payload bytes
///
/// Payload slices borrow from the raw frame and are already trimmed to the
/// length announced by the PCI (a first frame's payload is additionally
/// capped to the announced message size).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodedFrame<'a> {
    Single {
        data: &'a [u8],
    },
    First {
        message_size: MessageSize,
        data: &'a [u8],
    },
    Consecutive {
        sequence_number: u8,
        data: &'a [u8],
    },
    FlowControl {
        status: FlowStatus,
        block_size: u8,
        encoded_min_separation_time: u8,
    },
}

/// Byte-level layout parameters of a codec
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Total frame length in bytes (8 classical, 64 FD)
    pub max_frame_length: FrameSize,
    /// Pad every encoded frame to `max_frame_length` with [PADDING_BYTE]
    pub padded: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCodec {
    config: CodecConfig,
}

impl FrameCodec {
    /// Classical CAN, 8 byte frames, frames cut after the last payload byte
    pub const OPTIMIZED_CLASSICAL: FrameCodec = FrameCodec {
        config: CodecConfig {
            max_frame_length: 8,
            padded: false,
        },
    };

    /// CAN FD, 64 byte frames padded with [PADDING_BYTE]
    pub const PADDED_FD: FrameCodec = FrameCodec {
        config: CodecConfig {
            max_frame_length: 64,
            padded: true,
        },
    };

    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use]
    pub fn max_frame_length(&self) -> FrameSize {
        self.config.max_frame_length
    }

    /// Largest payload that still fits a single frame
    #[inline]
    #[must_use]
    pub fn single_frame_payload_capacity(&self) -> FrameSize {
        if self.config.max_frame_length > 8 {
            // two-byte escaped PCI
            self.config.max_frame_length - 2
        } else {
            self.config.max_frame_length - 1
        }
    }

    /// Payload bytes carried by a first frame
    #[inline]
    #[must_use]
    pub fn first_frame_payload_size(&self) -> FrameSize {
        self.config.max_frame_length - 2
    }

    /// Payload bytes carried by a regular (non-final) consecutive frame
    #[inline]
    #[must_use]
    pub fn consecutive_frame_payload_size(&self) -> FrameSize {
        self.config.max_frame_length - 1
    }

    /// Largest message size expressible in a first frame (12-bit length)
    #[inline]
    #[must_use]
    pub fn max_message_size(&self) -> MessageSize {
        0x0FFF
    }

    /// Number of frames a message of `message_size` bytes requires, plus the
    /// regular consecutive frame payload size
    #[must_use]
    pub fn frame_count(&self, message_size: MessageSize) -> (FrameIndex, FrameSize) {
        let consecutive = self.consecutive_frame_payload_size();
        if message_size <= MessageSize::from(self.single_frame_payload_capacity()) {
            return (1, consecutive);
        }
        let remaining = message_size - MessageSize::from(self.first_frame_payload_size());
        let count = 1 + remaining.div_ceil(MessageSize::from(consecutive));
        (count, consecutive)
    }

    pub fn encode_single_frame(&self, data: &[u8], buffer: &mut [u8]) -> eyre::Result<usize> {
        if data.is_empty() || data.len() > usize::from(self.single_frame_payload_capacity()) {
            eyre::bail!(
                "{} bytes don't fit a single frame (max {})",
                data.len(),
                self.single_frame_payload_capacity()
            );
        }
        let header = if data.len() <= 7 {
            buffer[0] = data.len() as u8;
            1
        } else {
            buffer[0] = 0x00;
            buffer[1] = data.len() as u8;
            2
        };
        buffer[header..header + data.len()].copy_from_slice(data);
        Ok(self.padded_length(header + data.len(), buffer))
    }

    pub fn encode_first_frame(
        &self,
        message_size: MessageSize,
        data: &[u8],
        buffer: &mut [u8],
    ) -> eyre::Result<usize> {
        if message_size > self.max_message_size() {
            eyre::bail!("message size {message_size} exceeds the 12-bit first frame length");
        }
        if data.len() != usize::from(self.first_frame_payload_size()) {
            eyre::bail!(
                "first frame payload must be exactly {} bytes, got {}",
                self.first_frame_payload_size(),
                data.len()
            );
        }
        BigEndian::write_u16(&mut buffer[0..2], 0x1000 | message_size);
        buffer[2..2 + data.len()].copy_from_slice(data);
        Ok(2 + data.len())
    }

    pub fn encode_consecutive_frame(
        &self,
        sequence_number: u8,
        data: &[u8],
        buffer: &mut [u8],
    ) -> eyre::Result<usize> {
        if data.is_empty() || data.len() > usize::from(self.consecutive_frame_payload_size()) {
            eyre::bail!(
                "{} bytes don't fit a consecutive frame (max {})",
                data.len(),
                self.consecutive_frame_payload_size()
            );
        }
        buffer[0] = 0x20 | (sequence_number & 0x0F);
        buffer[1..1 + data.len()].copy_from_slice(data);
        Ok(self.padded_length(1 + data.len(), buffer))
    }

    pub fn encode_flow_control(
        &self,
        status: FlowStatus,
        block_size: u8,
        encoded_min_separation_time: u8,
        buffer: &mut [u8],
    ) -> eyre::Result<usize> {
        if buffer.len() < 3 {
            eyre::bail!("flow control frames take 3 bytes, buffer has {}", buffer.len());
        }
        buffer[0] = 0x30 | status as u8;
        buffer[1] = block_size;
        buffer[2] = encoded_min_separation_time;
        Ok(self.padded_length(3, buffer))
    }

    /// Decode a raw frame payload
    ///
    /// Frames with a reserved PCI type or reserved flow status are decode
    /// errors; the caller logs and drops them.
    pub fn decode_frame<'a>(&self, data: &'a [u8]) -> eyre::Result<DecodedFrame<'a>> {
        let Some(&pci) = data.first() else {
            eyre::bail!("empty frame");
        };
        match pci >> 4 {
            0x0 => {
                let short_length = usize::from(pci & 0x0F);
                let (offset, length) = if short_length == 0 {
                    if self.config.max_frame_length <= 8 {
                        eyre::bail!("escaped single frame PCI on a classical frame");
                    }
                    let Some(&escaped) = data.get(1) else {
                        eyre::bail!("truncated escaped single frame");
                    };
                    (2usize, usize::from(escaped))
                } else {
                    (1usize, short_length)
                };
                if length == 0 || data.len() < offset + length {
                    eyre::bail!(
                        "single frame announces {length} payload bytes, {} available",
                        data.len().saturating_sub(offset)
                    );
                }
                Ok(DecodedFrame::Single {
                    data: &data[offset..offset + length],
                })
            }
            0x1 => {
                if data.len() < 3 {
                    eyre::bail!("truncated first frame");
                }
                let message_size = BigEndian::read_u16(&data[0..2]) & 0x0FFF;
                if message_size == 0 {
                    eyre::bail!("32-bit first frame length escape is not supported");
                }
                let end = usize::min(data.len(), 2 + usize::from(message_size));
                Ok(DecodedFrame::First {
                    message_size,
                    data: &data[2..end],
                })
            }
            0x2 => {
                if data.len() < 2 {
                    eyre::bail!("consecutive frame without payload");
                }
                Ok(DecodedFrame::Consecutive {
                    sequence_number: pci & 0x0F,
                    data: &data[1..],
                })
            }
            0x3 => {
                if data.len() < 3 {
                    eyre::bail!("truncated flow control frame");
                }
                let status = match pci & 0x0F {
                    0 => FlowStatus::ClearToSend,
                    1 => FlowStatus::Wait,
                    2 => FlowStatus::Overflow,
                    reserved => eyre::bail!("reserved flow status {reserved:#X}"),
                };
                Ok(DecodedFrame::FlowControl {
                    status,
                    block_size: data[1],
                    encoded_min_separation_time: data[2],
                })
            }
            reserved => eyre::bail!("reserved PCI frame type {reserved:#X}"),
        }
    }

    fn padded_length(&self, length: usize, buffer: &mut [u8]) -> usize {
        if !self.config.padded {
            return length;
        }
        let padded = usize::from(self.config.max_frame_length);
        buffer[length..padded].fill(PADDING_BYTE);
        padded
    }
}

/// Decode an STmin byte into microseconds
///
/// `0x00..=0x7F` encode whole milliseconds, `0xF1..=0xF9` encode
/// 100..900 µs. All reserved values map to the maximum of 127 ms as
/// required by ISO 15765-2.
#[must_use]
pub fn decode_min_separation_time_us(encoded: u8) -> u32 {
    match encoded {
        0x00..=0x7F => u32::from(encoded) * 1000,
        0xF1..=0xF9 => u32::from(encoded - 0xF0) * 100,
        _ => 127_000,
    }
}
