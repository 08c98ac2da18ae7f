//! Segment descriptors.

use crate::seq::SeqNum;
use crate::storage::{Link, LinkSlot, Resettable};
use crate::time::TxTimer;

/// Metadata about one contiguous range of stream bytes.
///
/// A descriptor never holds the payload itself. On the transmit side it
/// points into the caller's circular stream buffer; on the receive side it
/// only records which range has been buffered ahead of the read head.
///
/// The two link slots let one descriptor live in a side list (the free list,
/// or a window's segment list) and in one of the transmission queues at the
/// same time.
#[derive(Debug, Default, Clone)]
pub struct Segment {
    /// Starting sequence number of the range.
    pub(crate) seq: SeqNum,
    /// Current amount of data in the range, in bytes.
    pub(crate) len: u32,
    /// Capacity: the MSS for transmit segments, the arriving length for
    /// receive segments.
    pub(crate) max_len: u32,
    /// Index into the caller's circular transmit buffer where the bytes
    /// start. Transmit side only.
    pub(crate) stream_pos: usize,
    /// Stamped every time the segment leaves the sender.
    pub(crate) timer: TxTimer,
    pub(crate) is_rx: bool,
    /// Sent and awaiting an acknowledgement.
    pub(crate) outstanding: bool,
    /// Range confirmed by the peer but not yet retireable.
    pub(crate) acked: bool,
    pub(crate) transmit_count: u8,
    pub(crate) dup_ack_count: u8,
    /// Membership in the free list or a window's segment list.
    pub(crate) segment_link: Link,
    /// Membership in one of the priority/wait/transmit queues.
    pub(crate) queue_link: Link,
}

impl Segment {
    pub fn new() -> Segment {
        Segment::default()
    }

    pub(crate) fn link(&self, slot: LinkSlot) -> &Link {
        match slot {
            LinkSlot::Segment => &self.segment_link,
            LinkSlot::Queue => &self.queue_link,
        }
    }

    pub(crate) fn link_mut(&mut self, slot: LinkSlot) -> &mut Link {
        match slot {
            LinkSlot::Segment => &mut self.segment_link,
            LinkSlot::Queue => &mut self.queue_link,
        }
    }
}

impl Resettable for Segment {
    fn reset(&mut self) {
        // The links stay untouched: list membership is managed by the lists
        // themselves.
        self.seq = SeqNum::default();
        self.len = 0;
        self.max_len = 0;
        self.stream_pos = 0;
        self.timer = TxTimer::default();
        self.is_rx = false;
        self.outstanding = false;
        self.acked = false;
        self.transmit_count = 0;
        self.dup_ack_count = 0;
    }
}
