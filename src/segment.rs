//! Wire-format definitions for bTCP segments.
//!
//! Every datagram exchanged between peers is a [`Segment`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Segment`] into a fixed-size byte buffer, padding the
//!   payload with zeroes.
//! - Deserialising a raw byte slice back into a [`Segment`], returning
//!   errors for malformed input.
//! - Computing and verifying the internet checksum (RFC 1071).
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Sequence Number        |     Acknowledgement Number    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Flags     |    Window     |         Payload Length        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            Checksum           |          Payload ...          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Header: [`HEADER_LEN`] = 10 bytes.
//! seq(2) + ack(2) + flags(1) + window(1) + length(2) + checksum(2)
//!
//! Every segment on the wire is exactly [`SEGMENT_LEN`] bytes long: the
//! payload is zero-padded up to [`PAYLOAD_SIZE`] and the `length` field says
//! how many of those bytes are meaningful.

/// Bit-flag constants for the `flags` header field.
///
/// Only the three low bits are used; bits 7..3 are always zero on the wire.
pub mod flags {
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u8 = 0b100;
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 0b010;
    /// Finish — sender has no more data to send.
    pub const FIN: u8 = 0b001;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 10;

/// Number of payload bytes carried by every segment (zero-padded past
/// `length`).
pub const PAYLOAD_SIZE: usize = 1008;

/// Total on-wire size of every segment.  Constant regardless of how much
/// actual data the segment carries; also always even, which the checksum
/// arithmetic relies on.
pub const SEGMENT_LEN: usize = HEADER_LEN + PAYLOAD_SIZE;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 2;
const OFF_FLAGS: usize = 4;
const OFF_WINDOW: usize = 5;
const OFF_LENGTH: usize = 6;
const OFF_CHECKSUM: usize = 8;

/// Fixed-size bTCP header.
///
/// Fields are in host byte order; [`Segment::encode`] converts to big-endian
/// on the wire and [`Segment::decode`] converts back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sequence number of the first payload byte in this segment (for SYN
    /// and FIN, the control sequence number the flag consumes).
    pub seq: u16,
    /// Acknowledgement number (next expected sequence number from the peer).
    pub ack: u16,
    /// `true` when the SYN flag is set.
    pub syn: bool,
    /// `true` when the ACK flag is set (`ack` field is valid).
    pub ack_flag: bool,
    /// `true` when the FIN flag is set.
    pub fin: bool,
    /// Advertised receive window, in segments.
    pub window: u8,
    /// Number of meaningful payload bytes (≤ [`PAYLOAD_SIZE`]).
    pub length: u16,
    /// Internet checksum over the entire serialised segment.
    ///
    /// On encode this is computed and written last.  On decode this holds
    /// the value as received; verification happens separately via
    /// [`verify_checksum`].
    pub checksum: u16,
}

impl Header {
    /// Pack the three flag booleans into the wire byte.
    fn flag_byte(&self) -> u8 {
        let mut b = 0u8;
        if self.syn {
            b |= flags::SYN;
        }
        if self.ack_flag {
            b |= flags::ACK;
        }
        if self.fin {
            b |= flags::FIN;
        }
        b
    }

    /// Serialise this header into its fixed 10-byte wire form.
    ///
    /// All fields, including `checksum`, are written as stored; callers that
    /// need a correct checksum zero the field first, compute, and re-encode
    /// (or use [`Segment::encode`], which does this for the whole segment).
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[OFF_SEQ..OFF_SEQ + 2].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 2].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_FLAGS] = self.flag_byte();
        buf[OFF_WINDOW] = self.window;
        buf[OFF_LENGTH..OFF_LENGTH + 2].copy_from_slice(&self.length.to_be_bytes());
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    /// Parse a [`Header`] from the first [`HEADER_LEN`] bytes of `buf`.
    ///
    /// The flag byte is always read as a fixed 3-bit field: each flag is
    /// tested by its bit mask, so decoding never depends on which flags
    /// happen to be set.
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < HEADER_LEN {
            return Err(FormatError::TooShort {
                got: buf.len(),
                need: HEADER_LEN,
            });
        }
        let flag_byte = buf[OFF_FLAGS];
        Ok(Header {
            seq: u16::from_be_bytes([buf[OFF_SEQ], buf[OFF_SEQ + 1]]),
            ack: u16::from_be_bytes([buf[OFF_ACK], buf[OFF_ACK + 1]]),
            syn: flag_byte & flags::SYN != 0,
            ack_flag: flag_byte & flags::ACK != 0,
            fin: flag_byte & flags::FIN != 0,
            window: buf[OFF_WINDOW],
            length: u16::from_be_bytes([buf[OFF_LENGTH], buf[OFF_LENGTH + 1]]),
            checksum: u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]),
        })
    }
}

/// A complete bTCP segment: header plus up to [`PAYLOAD_SIZE`] payload bytes.
///
/// `payload` holds only the meaningful bytes; padding exists on the wire
/// only.  `header.length` is derived from `payload.len()` on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Serialise this segment into its fixed [`SEGMENT_LEN`]-byte wire form.
    ///
    /// `header.length` and `header.checksum` are computed from the actual
    /// payload; any values already stored in those fields are ignored.
    /// The payload is zero-padded to [`PAYLOAD_SIZE`].
    pub fn encode(&self) -> Result<Vec<u8>, FormatError> {
        if self.payload.len() > PAYLOAD_SIZE {
            return Err(FormatError::PayloadTooLarge {
                got: self.payload.len(),
            });
        }

        let mut header = self.header;
        header.length = self.payload.len() as u16;
        header.checksum = 0;

        let mut buf = vec![0u8; SEGMENT_LEN];
        buf[..HEADER_LEN].copy_from_slice(&header.encode());
        buf[HEADER_LEN..HEADER_LEN + self.payload.len()].copy_from_slice(&self.payload);

        let csum = compute_checksum(&buf)?;
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
        Ok(buf)
    }

    /// Parse a [`Segment`] from a raw datagram.
    ///
    /// Structural validation only: the buffer must be exactly
    /// [`SEGMENT_LEN`] bytes and `length` must fit in [`PAYLOAD_SIZE`].
    /// The checksum is *not* checked here — callers run
    /// [`verify_checksum`] on the raw bytes first and drop corrupt
    /// segments silently.
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() != SEGMENT_LEN {
            return Err(FormatError::WrongSegmentLength { got: buf.len() });
        }
        let header = Header::decode(buf)?;
        if header.length as usize > PAYLOAD_SIZE {
            return Err(FormatError::PayloadTooLarge {
                got: header.length as usize,
            });
        }
        let payload = buf[HEADER_LEN..HEADER_LEN + header.length as usize].to_vec();
        Ok(Segment { header, payload })
    }
}

/// Errors for malformed segment input.
///
/// These indicate a local programming or integrity error, never ordinary
/// network loss: corrupt segments fail checksum verification instead, and
/// the wire size is fixed so well-behaved peers cannot provoke these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// Buffer shorter than the structure being decoded.
    TooShort { got: usize, need: usize },
    /// Datagram is not exactly [`SEGMENT_LEN`] bytes.
    WrongSegmentLength { got: usize },
    /// Payload (or `length` field) exceeds [`PAYLOAD_SIZE`].
    PayloadTooLarge { got: usize },
    /// Checksum input had an odd number of bytes.
    OddChecksumInput { got: usize },
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::TooShort { got, need } => {
                write!(f, "buffer too short: {got} bytes, need {need}")
            }
            FormatError::WrongSegmentLength { got } => {
                write!(f, "segment must be exactly {SEGMENT_LEN} bytes, got {got}")
            }
            FormatError::PayloadTooLarge { got } => {
                write!(f, "payload of {got} bytes exceeds maximum of {PAYLOAD_SIZE}")
            }
            FormatError::OddChecksumInput { got } => {
                write!(f, "checksum input must have an even length, got {got} bytes")
            }
        }
    }
}

impl std::error::Error for FormatError {}

/// Compute the internet checksum (RFC 1071) over `data`.
///
/// Sum consecutive 16-bit big-endian words with end-around carry and return
/// the one's-complement of the folded sum.  The caller must zero the
/// checksum field within `data` before calling.
///
/// bTCP segments always have an even length; an odd-length input is a
/// caller error, not a recoverable condition.
pub fn compute_checksum(data: &[u8]) -> Result<u16, FormatError> {
    Ok(!ones_complement_sum(data)?)
}

/// Verify the checksum of a segment as received off the wire.
///
/// The stored checksum field participates in the sum: for an uncorrupted
/// segment the folded one's-complement sum over all words comes out as
/// all-ones (`0xFFFF`).
pub fn verify_checksum(segment: &[u8]) -> bool {
    matches!(ones_complement_sum(segment), Ok(0xFFFF))
}

/// Fold `data` into a 16-bit one's-complement sum (end-around carry).
fn ones_complement_sum(data: &[u8]) -> Result<u16, FormatError> {
    if data.len() % 2 != 0 {
        return Err(FormatError::OddChecksumInput { got: data.len() });
    }
    let mut sum: u32 = 0;
    for word in data.chunks_exact(2) {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    Ok(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header(seq: u16, ack: u16, syn: bool, ack_flag: bool, fin: bool) -> Header {
        Header {
            seq,
            ack,
            syn,
            ack_flag,
            fin,
            window: 4,
            length: 0,
            checksum: 0,
        }
    }

    fn make_segment(seq: u16, payload: &[u8]) -> Segment {
        Segment {
            header: make_header(seq, 0, false, true, false),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn header_roundtrip() {
        let h = Header {
            seq: 0x0102,
            ack: 0x0304,
            syn: true,
            ack_flag: false,
            fin: true,
            window: 9,
            length: 512,
            checksum: 0xBEEF,
        };
        let decoded = Header::decode(&h.encode()).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn header_is_big_endian_on_wire() {
        let bytes = make_header(0x0102, 0x0304, false, false, false).encode();
        assert_eq!(&bytes[0..2], &[0x01, 0x02]);
        assert_eq!(&bytes[2..4], &[0x03, 0x04]);
    }

    #[test]
    fn flag_bits_occupy_fixed_positions() {
        let syn_only = make_header(0, 0, true, false, false).encode();
        let ack_only = make_header(0, 0, false, true, false).encode();
        let fin_only = make_header(0, 0, false, false, true).encode();
        assert_eq!(syn_only[4], 0b100);
        assert_eq!(ack_only[4], 0b010);
        assert_eq!(fin_only[4], 0b001);
    }

    /// Each flag decodes independently of whether the higher bits are set:
    /// the field is a fixed 3-bit mask, never a variable-width bit string.
    #[test]
    fn flag_decoding_ignores_leading_zeros() {
        for (syn, ack_flag, fin) in [
            (false, false, true),
            (false, true, false),
            (true, false, false),
            (true, true, true),
        ] {
            let h = make_header(0, 0, syn, ack_flag, fin);
            let decoded = Header::decode(&h.encode()).unwrap();
            assert_eq!((decoded.syn, decoded.ack_flag, decoded.fin), (syn, ack_flag, fin));
        }
    }

    #[test]
    fn upper_flag_bits_are_zero_on_wire() {
        let bytes = make_header(0, 0, true, true, true).encode();
        assert_eq!(bytes[4] & 0b1111_1000, 0);
    }

    #[test]
    fn header_decode_too_short() {
        assert_eq!(
            Header::decode(&[0u8; HEADER_LEN - 1]),
            Err(FormatError::TooShort {
                got: HEADER_LEN - 1,
                need: HEADER_LEN
            })
        );
    }

    #[test]
    fn segment_encode_is_fixed_size() {
        for payload in [&b""[..], b"x", b"hello world"] {
            let bytes = make_segment(0, payload).encode().unwrap();
            assert_eq!(bytes.len(), SEGMENT_LEN);
        }
    }

    #[test]
    fn segment_encode_sets_length_and_pads_with_zeros() {
        let bytes = make_segment(7, b"abc").encode().unwrap();
        let length = u16::from_be_bytes([bytes[6], bytes[7]]);
        assert_eq!(length, 3);
        assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + 3], b"abc");
        assert!(bytes[HEADER_LEN + 3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn segment_roundtrip() {
        let seg = make_segment(42, b"payload bytes");
        let decoded = Segment::decode(&seg.encode().unwrap()).unwrap();
        assert_eq!(decoded.header.seq, 42);
        assert_eq!(decoded.header.length, 13);
        assert_eq!(decoded.payload, b"payload bytes");
    }

    #[test]
    fn segment_decode_rejects_wrong_size() {
        assert_eq!(
            Segment::decode(&[0u8; SEGMENT_LEN - 1]),
            Err(FormatError::WrongSegmentLength {
                got: SEGMENT_LEN - 1
            })
        );
        assert_eq!(
            Segment::decode(&[0u8; SEGMENT_LEN + 1]),
            Err(FormatError::WrongSegmentLength {
                got: SEGMENT_LEN + 1
            })
        );
    }

    #[test]
    fn segment_decode_rejects_oversized_length_field() {
        let mut bytes = make_segment(0, b"").encode().unwrap();
        bytes[6..8].copy_from_slice(&((PAYLOAD_SIZE as u16) + 1).to_be_bytes());
        assert!(matches!(
            Segment::decode(&bytes),
            Err(FormatError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let seg = make_segment(0, &vec![0u8; PAYLOAD_SIZE + 1]);
        assert!(matches!(
            seg.encode(),
            Err(FormatError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn checksum_of_known_words() {
        // 0x0001 + 0x0203 = 0x0204; complement = 0xFDFB.
        let csum = compute_checksum(&[0x00, 0x01, 0x02, 0x03]).unwrap();
        assert_eq!(csum, 0xFDFB);
    }

    #[test]
    fn checksum_end_around_carry() {
        // 0xFFFF + 0x0001 wraps: sum folds to 0x0001, complement 0xFFFE.
        let csum = compute_checksum(&[0xFF, 0xFF, 0x00, 0x01]).unwrap();
        assert_eq!(csum, 0xFFFE);
    }

    #[test]
    fn checksum_rejects_odd_input() {
        assert_eq!(
            compute_checksum(&[0x00, 0x01, 0x02]),
            Err(FormatError::OddChecksumInput { got: 3 })
        );
    }

    #[test]
    fn encoded_segment_verifies() {
        let bytes = make_segment(1, b"some data").encode().unwrap();
        assert!(verify_checksum(&bytes));
    }

    /// Flipping any single bit must break verification.  Caveat: the
    /// internet checksum cannot distinguish 0x0000 from 0xFFFF in a word,
    /// so a non-trivial payload is used to stay away from that collision.
    #[test]
    fn single_bit_flip_fails_verification() {
        let bytes = make_segment(0x1234, b"checksum test vector").encode().unwrap();
        for byte_idx in 0..bytes.len() {
            for bit in 0..8 {
                let mut corrupt = bytes.clone();
                corrupt[byte_idx] ^= 1 << bit;
                assert!(
                    !verify_checksum(&corrupt),
                    "bit {bit} of byte {byte_idx} flipped undetected"
                );
            }
        }
    }

    #[test]
    fn verify_rejects_odd_input() {
        assert!(!verify_checksum(&[0xFF; 3]));
    }

    #[test]
    fn constants_are_consistent() {
        // seq(2) + ack(2) + flags(1) + window(1) + length(2) + checksum(2)
        assert_eq!(HEADER_LEN, 10);
        assert_eq!(SEGMENT_LEN, HEADER_LEN + PAYLOAD_SIZE);
        assert_eq!(SEGMENT_LEN % 2, 0);
    }
}
