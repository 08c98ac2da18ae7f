use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

use super::{Error, Result};
use crate::seq::SeqNum;

mod field {
    pub type Field = ::core::ops::Range<usize>;

    pub const HEADER: Field = 0..4;
    pub const FIRST: Field = 4..8;
    pub const LAST: Field = 8..12;
}

/// Length in octets of a single-block SACK option, including the two
/// leading NOPs that pad it to a word boundary.
pub const BUFFER_LEN: usize = field::LAST.end;

/// NOP, NOP, SACK (kind 5), length 10.
const OPTION_HEADER: [u8; 4] = [0x01, 0x01, 0x05, 0x0a];

/// A high-level representation of a single-block selective acknowledgement.
///
/// Describes the contiguous out-of-order run `[first, last)` that the
/// receiver has buffered ahead of its read head.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub first: SeqNum,
    pub last: SeqNum,
}

impl Repr {
    /// Length of the buffer required to emit this option.
    pub const BUFFER_LEN: usize = BUFFER_LEN;

    /// Parse a single-block SACK option.
    pub fn parse(buffer: &[u8]) -> Result<Repr> {
        if buffer.len() < BUFFER_LEN {
            return Err(Error);
        }
        if buffer[field::HEADER] != OPTION_HEADER {
            return Err(Error);
        }
        Ok(Repr {
            first: SeqNum(NetworkEndian::read_u32(&buffer[field::FIRST])),
            last: SeqNum(NetworkEndian::read_u32(&buffer[field::LAST])),
        })
    }

    /// Emit the option into a buffer of at least [`BUFFER_LEN`] octets.
    pub fn emit(&self, buffer: &mut [u8]) {
        buffer[field::HEADER].copy_from_slice(&OPTION_HEADER);
        NetworkEndian::write_u32(&mut buffer[field::FIRST], self.first.0);
        NetworkEndian::write_u32(&mut buffer[field::LAST], self.last.0);
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SACK [{}, {})", self.first, self.last)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static REPR_BYTES: [u8; 12] = [
        0x01, 0x01, 0x05, 0x0a, 0x00, 0x00, 0x05, 0xdc, 0x00, 0x00, 0x07, 0xd0,
    ];

    #[test]
    fn emit() {
        let repr = Repr {
            first: SeqNum(1500),
            last: SeqNum(2000),
        };
        let mut buffer = [0u8; BUFFER_LEN];
        repr.emit(&mut buffer);
        assert_eq!(buffer, REPR_BYTES);
    }

    #[test]
    fn parse() {
        let repr = Repr::parse(&REPR_BYTES).unwrap();
        assert_eq!(repr.first, SeqNum(1500));
        assert_eq!(repr.last, SeqNum(2000));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(Repr::parse(&REPR_BYTES[..8]), Err(Error));

        let mut bad = REPR_BYTES;
        bad[2] = 0x08;
        assert_eq!(Repr::parse(&bad), Err(Error));
    }
}
