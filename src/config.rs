/// Number of segment descriptors in the shared pool.
///
/// All connections borrow descriptors from one pool; when the engine keeps
/// running out of segments, raise this value.
pub const SEGMENT_POOL_COUNT: usize = 64;
