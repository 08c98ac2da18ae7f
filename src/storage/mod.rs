mod list;
mod pool;

pub(crate) use self::list::{Link, LinkSlot, ListTag, SegId, SegList};
pub use self::pool::SegmentPool;

/// A trait for setting a value to a known state.
///
/// In-place analog of Default.
pub trait Resettable {
    fn reset(&mut self);
}
