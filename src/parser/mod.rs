//! E1.31 (streaming ACN) data frame parser.
//!
//! Only the parts of the frame needed to route DMX data are checked: the
//! overall length and the ACN packet identifier. Vectors, CID, priority,
//! sequence number and the start code are read as-is and never validated.

use std::io::{self, Write};

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use thiserror::Error;

use crate::fixture::UNIVERSE_SIZE;

/// The well-known E1.31 port.
pub const E131_PORT: u16 = 5568;

/// The fixed 12-byte ACN packet identifier at offset 4.
pub const ACN_PACKET_IDENTIFIER: [u8; 12] = *b"ASC-E1.17\0\0\0";

/// Header size up to and including the DMX start code.
pub const MIN_FRAME_SIZE: usize = 126;

const IDENTIFIER_OFFSET: usize = 4;
const SOURCE_NAME_OFFSET: usize = 44;
const SOURCE_NAME_SIZE: usize = 64;
const PRIORITY_OFFSET: usize = 108;
const SEQUENCE_OFFSET: usize = 111;
const UNIVERSE_OFFSET: usize = 113;
const DMX_DATA_OFFSET: usize = 126;

const VECTOR_ROOT_E131_DATA: u32 = 0x0000_0004;
const VECTOR_E131_DATA_PACKET: u32 = 0x0000_0002;
const VECTOR_DMP_SET_PROPERTY: u8 = 0x02;

const SOURCE_NAME: &str = "propserver";
const DEFAULT_PRIORITY: u8 = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("bad ACN packet identifier")]
    BadIdentifier,
}

/// A decoded data frame. Borrows the channel data from the datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub universe: u16,
    /// DMX channel 1 is at index 0. At most 512 bytes; may be shorter.
    pub channels: &'a [u8],
    pub priority: u8,
    pub sequence: u8,
    pub source_name: String,
}

/// Parse a raw UDP payload.
pub fn decode(data: &[u8]) -> Result<Frame<'_>, DecodeError> {
    if data.len() < MIN_FRAME_SIZE {
        return Err(DecodeError::TooShort(data.len()));
    }
    if data[IDENTIFIER_OFFSET..IDENTIFIER_OFFSET + 12] != ACN_PACKET_IDENTIFIER {
        return Err(DecodeError::BadIdentifier);
    }

    let universe = BigEndian::read_u16(&data[UNIVERSE_OFFSET..UNIVERSE_OFFSET + 2]);
    let end = data.len().min(DMX_DATA_OFFSET + UNIVERSE_SIZE);

    Ok(Frame {
        universe,
        channels: &data[DMX_DATA_OFFSET..end],
        priority: data[PRIORITY_OFFSET],
        sequence: data[SEQUENCE_OFFSET],
        source_name: read_source_name(
            &data[SOURCE_NAME_OFFSET..SOURCE_NAME_OFFSET + SOURCE_NAME_SIZE],
        ),
    })
}

fn read_source_name(bytes: &[u8]) -> String {
    // Let's just tolerate bad UTF-8 like everywhere else.
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

/// Build a data frame carrying `channels` (at most 512 are used).
pub fn encode(universe: u16, sequence: u8, channels: &[u8]) -> Vec<u8> {
    let channels = &channels[..channels.len().min(UNIVERSE_SIZE)];
    let mut buf = Vec::with_capacity(DMX_DATA_OFFSET + channels.len());
    // Writing into a Vec cannot fail.
    let _ = write_frame(&mut buf, universe, sequence, channels);
    buf
}

fn write_frame(buf: &mut Vec<u8>, universe: u16, sequence: u8, channels: &[u8]) -> io::Result<()> {
    let total = (DMX_DATA_OFFSET + channels.len()) as u16;
    let flags_and_length = |from: u16| 0x7000 | (total - from);

    // Root layer
    buf.write_u16::<BigEndian>(0x0010)?; // preamble size
    buf.write_u16::<BigEndian>(0x0000)?; // postamble size
    buf.write_all(&ACN_PACKET_IDENTIFIER)?;
    buf.write_u16::<BigEndian>(flags_and_length(16))?;
    buf.write_u32::<BigEndian>(VECTOR_ROOT_E131_DATA)?;
    buf.write_all(&[0; 16])?; // CID

    // Framing layer
    buf.write_u16::<BigEndian>(flags_and_length(38))?;
    buf.write_u32::<BigEndian>(VECTOR_E131_DATA_PACKET)?;
    let mut name = [0u8; SOURCE_NAME_SIZE];
    name[..SOURCE_NAME.len()].copy_from_slice(SOURCE_NAME.as_bytes());
    buf.write_all(&name)?;
    buf.write_u8(DEFAULT_PRIORITY)?;
    buf.write_u16::<BigEndian>(0)?; // sync address
    buf.write_u8(sequence)?;
    buf.write_u8(0)?; // options
    buf.write_u16::<BigEndian>(universe)?;

    // DMP layer
    buf.write_u16::<BigEndian>(flags_and_length(115))?;
    buf.write_u8(VECTOR_DMP_SET_PROPERTY)?;
    buf.write_u8(0xa1)?; // address & data type
    buf.write_u16::<BigEndian>(0x0000)?; // first property address
    buf.write_u16::<BigEndian>(0x0001)?; // address increment
    buf.write_u16::<BigEndian>(channels.len() as u16 + 1)?;
    buf.write_u8(0x00)?; // start code
    buf.write_all(channels)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_recovers_universe_and_channels() {
        let channels: Vec<u8> = (0..=255u8).chain(0..=255u8).collect();
        let frame = encode(0x1234, 7, &channels);
        assert_eq!(frame.len(), 638);

        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.universe, 0x1234);
        assert_eq!(decoded.channels, channels.as_slice());
        assert_eq!(decoded.sequence, 7);
        assert_eq!(decoded.priority, DEFAULT_PRIORITY);
        assert_eq!(decoded.source_name, "propserver");
    }

    #[test]
    fn decode_recovers_any_universe_and_length() {
        for &universe in &[1u16, 2, 255, 256, 0x1234, 63999, u16::MAX] {
            for &len in &[0usize, 1, 3, 50, 511, 512] {
                let channels: Vec<u8> = (0..len)
                    .map(|i| (i * 7 + universe as usize) as u8)
                    .collect();
                let frame = encode(universe, len as u8, &channels);
                assert_eq!(frame.len(), MIN_FRAME_SIZE + len);

                let decoded = decode(&frame).unwrap();
                assert_eq!(decoded.universe, universe, "universe {} len {}", universe, len);
                assert_eq!(decoded.channels, channels.as_slice());
            }
        }
    }

    #[test]
    fn encoded_layout_matches_wire_offsets() {
        let frame = encode(1, 0, &[255, 0, 0]);
        assert_eq!(&frame[4..16], b"ASC-E1.17\0\0\0");
        assert_eq!(&frame[113..115], &[0x00, 0x01]);
        assert_eq!(frame[125], 0x00);
        assert_eq!(&frame[126..], &[255, 0, 0]);
        // Property value count includes the start code.
        assert_eq!(&frame[123..125], &[0x00, 0x04]);
    }

    #[test]
    fn short_frame_carries_fewer_channels() {
        let frame = encode(3, 0, &[1, 2, 3, 4, 5]);
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.channels, &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn header_only_frame_has_no_channels() {
        let frame = encode(9, 0, &[]);
        assert_eq!(frame.len(), MIN_FRAME_SIZE);
        assert!(decode(&frame).unwrap().channels.is_empty());
    }

    #[test]
    fn rejects_short_datagram() {
        assert_eq!(decode(&[0u8; 100]), Err(DecodeError::TooShort(100)));
    }

    #[test]
    fn rejects_bad_identifier() {
        let mut frame = encode(1, 0, &[0, 0, 0, 0]);
        assert_eq!(frame.len(), 130);
        frame[6] = b'X';
        assert_eq!(decode(&frame), Err(DecodeError::BadIdentifier));
    }

    #[test]
    fn ignores_malformed_vectors() {
        let mut frame = encode(5, 0, &[10, 20, 30]);
        // Root vector and DMP vector garbage is not our problem.
        frame[21] = 0xff;
        frame[117] = 0xff;
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.universe, 5);
        assert_eq!(decoded.channels, &[10, 20, 30]);
    }

    #[test]
    fn caps_channel_data_at_universe_size() {
        let mut frame = encode(1, 0, &[7u8; 512]);
        frame.extend_from_slice(&[9, 9, 9]);
        assert_eq!(decode(&frame).unwrap().channels.len(), 512);
    }
}
