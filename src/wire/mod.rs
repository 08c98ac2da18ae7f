/*! Low-level option access and construction.

The `wire` module deals with the *representation* of the TCP options the
engine produces and consumes. The `Repr` family of structs provides a
compact, high-level view of an option that can be parsed from and emitted
into a sequence of octets; the engine itself only ever hands the driver a
finished byte string.

When parsing untrusted input it is necessary to check the result of
`Repr::parse()`; so long as it returned `Ok`, the representation is
internally consistent. `Repr::emit()` never panics as long as the underlying
buffer is at least `Repr::BUFFER_LEN` octets long.
*/

use core::fmt;

mod sack;
pub use self::sack::{Repr as SackRepr, BUFFER_LEN as SACK_BUFFER_LEN};

/// Parsing an option failed.
///
/// Either it is malformed, or it is not a single-block selective
/// acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire::Error")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
