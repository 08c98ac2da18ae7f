//! The TCP sliding-window engine.
//!
//! [`TcpWindow`] is the bookkeeping core that sits between a connection's
//! state machine and the byte streams exchanged with a peer. It decides
//! which outgoing bytes may be placed on the wire right now, which incoming
//! bytes may be delivered to the application, which segments must be
//! retransmitted and when, and how the smoothed round-trip estimate evolves.
//! It owns no sockets, no timers beyond per-segment age marks, and no
//! payload buffers: it tracks metadata about byte ranges.
//!
//! All entry points are serialized by the driver; the engine performs no
//! locking and never blocks. Segment descriptors come from a shared
//! [`SegmentPool`] that is passed into every operation that can allocate or
//! free.

use crate::seq::SeqNum;
use crate::storage::{ListTag, SegId, SegList, SegmentPool};
use crate::time::Clock;
use crate::wire::{SackRepr, SACK_BUFFER_LEN};

mod rx;
mod tx;

pub use self::rx::RxCheck;
pub use self::tx::TxData;

/// Initial smoothed round-trip estimate, in milliseconds.
const SRTT_INITIAL_MS: u32 = 1000;
/// Lower bound of the smoothed round-trip estimate, in milliseconds.
const SRTT_CAP_MS: u32 = 50;

/* Weights of the SRTT filter. The estimate rises faster than it falls, so
 * the retransmission timeout grows quickly under congestion and decays
 * slowly when conditions improve. */
const SRTT_RISE_NEW: u32 = 2;
const SRTT_RISE_CURRENT: u32 = 6;
const SRTT_FALL_NEW: u32 = 1;
const SRTT_FALL_CURRENT: u32 = 7;

/// When this many packets with a higher sequence number have been
/// acknowledged by the peer, it is very unlikely the current packet will
/// ever arrive; it is retransmitted far before the RTO.
const DUP_ACKS_FOR_FAST_RETRANSMIT: u8 = 3;

/// After this many transmissions of one segment, the transmit window is
/// shrunk to at most twice the MSS.
const MAX_TRANSMITS_WITH_LARGE_WINDOW: u8 = 4;

/// Upper bound on the exponent of the retransmission backoff, so the shift
/// stays defined no matter how often a segment has been sent.
const BACKOFF_SHIFT_CAP: u8 = 10;

/// One side of the sliding window: the sequence numbers delimiting it.
#[derive(Debug, Clone, Copy)]
struct WindowSide {
    /// The initial sequence number; only used to log relative numbers.
    first: SeqNum,
    /// RX: the next byte deliverable in order. TX: the leftmost byte sent
    /// but not yet acknowledged.
    current: SeqNum,
    /// RX: the right edge of the data seen so far. TX: the right edge of
    /// the data handed to the link layer.
    highest: SeqNum,
}

impl WindowSide {
    fn new(isn: SeqNum) -> WindowSide {
        WindowSide {
            first: isn,
            current: isn,
            highest: isn,
        }
    }
}

/// Per-connection sliding-window state.
#[derive(Debug)]
pub struct TcpWindow {
    rx: WindowSide,
    tx: WindowSide,
    /// The sequence number given to the next byte the application appends.
    next_tx: SeqNum,
    /// The sequence number the driver should place in the next outgoing
    /// header. Updated by [`TcpWindow::tx_get`].
    our_seq: SeqNum,
    /// Advertised receive window, rounded to a whole number of segments.
    rx_window_len: u32,
    /// Self-imposed cap on the amount of outstanding data; shrinks after
    /// repeated loss.
    tx_window_len: u32,
    mss: u32,
    mss_init: u32,
    /// Smoothed round-trip estimate in milliseconds.
    srtt_ms: u32,
    /// The front transmit segment still being filled by `tx_add`, if any.
    head_segment: Option<SegId>,
    /// Scratch for the outbound single-block SACK option.
    options: heapless::Vec<u8, SACK_BUFFER_LEN>,
    /// Bytes that became in-order-deliverable beyond the arriving segment
    /// during the last `rx_check`.
    user_data_length: u32,
    /// Only hand out completely filled segments from the transmit queue.
    send_full_size: bool,

    /// All transmit descriptors, in strict ascending sequence order.
    tx_segments: SegList,
    /// Buffered out-of-order receive descriptors.
    rx_segments: SegList,
    /// Segments promoted for immediate retransmission.
    priority_queue: SegList,
    /// Outstanding segments, waiting for an ACK or their RTO.
    wait_queue: SegList,
    /// Segments never sent before.
    tx_queue: SegList,

    clock: Clock,
}

impl TcpWindow {
    /// Create a window.
    ///
    /// `peer_isn` seeds the receive side (the first sequence number we will
    /// acknowledge), `our_isn` the transmit side.
    pub fn new(
        clock: Clock,
        rx_window_len: u32,
        tx_window_len: u32,
        peer_isn: SeqNum,
        our_isn: SeqNum,
        mss: u32,
    ) -> TcpWindow {
        net_debug!(
            "window: create, rx/tx window length {}/{}",
            rx_window_len,
            tx_window_len
        );

        let mut window = TcpWindow {
            rx: WindowSide::new(peer_isn),
            tx: WindowSide::new(our_isn),
            next_tx: our_isn,
            our_seq: our_isn,
            rx_window_len,
            tx_window_len,
            mss: 0,
            mss_init: mss,
            srtt_ms: SRTT_INITIAL_MS,
            head_segment: None,
            options: heapless::Vec::new(),
            user_data_length: 0,
            send_full_size: false,
            tx_segments: SegList::new(ListTag::TxSegments),
            rx_segments: SegList::new(ListTag::RxSegments),
            priority_queue: SegList::new(ListTag::Priority),
            wait_queue: SegList::new(ListTag::Wait),
            tx_queue: SegList::new(ListTag::Transmit),
            clock,
        };
        window.init(peer_isn, our_isn, mss);
        window
    }

    /// Re-initialize the window for a fresh connection.
    ///
    /// The descriptor lists must be empty, i.e. [`TcpWindow::destroy`] must
    /// have run first when the window was in use. When a smaller MSS is
    /// negotiated, the receive window is rounded down to a whole number of
    /// segments.
    pub fn init(&mut self, peer_isn: SeqNum, our_isn: SeqNum, mss: u32) {
        if mss != 0 && (self.mss == 0 || mss < self.mss) {
            self.rx_window_len = (self.rx_window_len / mss) * mss;
            self.mss = mss;
        }

        self.srtt_ms = SRTT_INITIAL_MS;

        self.rx = WindowSide::new(peer_isn);
        self.tx = WindowSide::new(our_isn);
        self.next_tx = our_isn;
        self.our_seq = our_isn;

        self.head_segment = None;
        self.options.clear();
        self.user_data_length = 0;
    }

    /// Return every owned descriptor to the pool.
    ///
    /// Must be called before the window is dropped or re-initialized; the
    /// pool outlives the window and would otherwise leak the descriptors.
    pub fn destroy(&mut self, pool: &mut SegmentPool) {
        while let Some(id) = self.tx_segments.front() {
            self.free_segment(pool, id);
        }
        while let Some(id) = self.rx_segments.front() {
            self.free_segment(pool, id);
        }
        self.head_segment = None;
    }

    /// The next byte deliverable to the application, in order.
    pub fn rx_current(&self) -> SeqNum {
        self.rx.current
    }

    /// The right edge of the receive data seen so far.
    pub fn rx_highest(&self) -> SeqNum {
        self.rx.highest
    }

    /// The leftmost byte sent but not yet acknowledged.
    pub fn tx_current(&self) -> SeqNum {
        self.tx.current
    }

    /// The right edge of the data handed to the link layer.
    pub fn tx_highest(&self) -> SeqNum {
        self.tx.highest
    }

    /// The sequence number the next appended byte will get.
    pub fn next_tx(&self) -> SeqNum {
        self.next_tx
    }

    /// The sequence number for the next outgoing header.
    pub fn our_sequence_number(&self) -> SeqNum {
        self.our_seq
    }

    pub fn mss(&self) -> u32 {
        self.mss
    }

    /// The MSS the connection was created with, before any renegotiation.
    pub fn mss_init(&self) -> u32 {
        self.mss_init
    }

    pub fn srtt_ms(&self) -> u32 {
        self.srtt_ms
    }

    pub fn rx_window_length(&self) -> u32 {
        self.rx_window_len
    }

    pub fn tx_window_length(&self) -> u32 {
        self.tx_window_len
    }

    /// The option bytes to append to the next outgoing ACK; empty when the
    /// last `rx_check` produced no SACK.
    pub fn options(&self) -> &[u8] {
        &self.options
    }

    /// Bytes that became in-order-deliverable beyond the arriving segment
    /// during the last `rx_check`.
    pub fn user_data_length(&self) -> u32 {
        self.user_data_length
    }

    /// Only hand out completely filled segments from the transmit queue.
    pub fn set_send_full_size(&mut self, enabled: bool) {
        self.send_full_size = enabled;
    }

    /// Allocate a descriptor and attach it to this window's receive or
    /// transmit segment list.
    fn new_segment(
        &mut self,
        pool: &mut SegmentPool,
        seq: SeqNum,
        count: u32,
        for_rx: bool,
    ) -> Option<SegId> {
        let Some(id) = pool.take() else {
            // When this keeps happening, the pool is undersized.
            net_debug!(
                "window: no free segment for {}",
                if for_rx { "rx" } else { "tx" }
            );
            return None;
        };

        if for_rx {
            self.rx_segments.push_back(pool.segments_mut(), id);
        } else {
            self.tx_segments.push_back(pool.segments_mut(), id);
        }

        let clock = self.clock;
        let seg = pool.seg_mut(id);
        seg.timer.set(&clock);
        seg.is_rx = for_rx;
        seg.seq = seq;
        seg.len = count;
        seg.max_len = count;
        Some(id)
    }

    /// Detach a descriptor from this window's lists and return it to the
    /// pool.
    fn free_segment(&mut self, pool: &mut SegmentPool, id: SegId) {
        if let Some(tag) = pool.seg(id).queue_link.owner() {
            self.queue_list_mut(tag).unlink(pool.segments_mut(), id);
        }
        match pool.seg(id).segment_link.owner() {
            Some(ListTag::TxSegments) => self.tx_segments.unlink(pool.segments_mut(), id),
            Some(ListTag::RxSegments) => self.rx_segments.unlink(pool.segments_mut(), id),
            other => debug_assert!(false, "segment owned by {:?}, not this window", other),
        }
        pool.release(id);
    }

    fn queue_list_mut(&mut self, tag: ListTag) -> &mut SegList {
        match tag {
            ListTag::Priority => &mut self.priority_queue,
            ListTag::Wait => &mut self.wait_queue,
            ListTag::Transmit => &mut self.tx_queue,
            _ => unreachable!("not a transmission queue"),
        }
    }

    /// Fold a fresh round-trip measurement into the smoothed estimate.
    fn update_srtt(&mut self, measured_ms: u32) {
        if self.srtt_ms >= measured_ms {
            self.srtt_ms = (SRTT_FALL_NEW * measured_ms + SRTT_FALL_CURRENT * self.srtt_ms)
                / (SRTT_FALL_NEW + SRTT_FALL_CURRENT);
        } else {
            self.srtt_ms = (SRTT_RISE_NEW * measured_ms + SRTT_RISE_CURRENT * self.srtt_ms)
                / (SRTT_RISE_NEW + SRTT_RISE_CURRENT);
        }
        self.srtt_ms = self.srtt_ms.max(SRTT_CAP_MS);
    }

    /// The retransmission timeout after `transmit_count` transmissions:
    /// `2^transmit_count * SRTT`, with the exponent capped.
    fn rto_ms(&self, transmit_count: u8) -> u32 {
        (1u32 << transmit_count.min(BACKOFF_SHIFT_CAP)) * self.srtt_ms
    }

    /// Record a single-block SACK for `[first, last)` in the option scratch.
    fn set_sack_option(&mut self, first: SeqNum, last: SeqNum) {
        let mut buffer = [0u8; SACK_BUFFER_LEN];
        SackRepr { first, last }.emit(&mut buffer);
        // Cannot fail: capacity equals BUFFER_LEN.
        self.options = heapless::Vec::from_slice(&buffer).unwrap();
    }

    /// `seq` relative to the receive ISN, for logging.
    fn rel_rx(&self, seq: SeqNum) -> u32 {
        self.rx.first.offset_to(seq)
    }

    /// `seq` relative to the transmit ISN, for logging.
    fn rel_tx(&self, seq: SeqNum) -> u32 {
        self.tx.first.offset_to(seq)
    }

    #[cfg(test)]
    fn owned_segments(&self) -> usize {
        self.tx_segments.len() + self.rx_segments.len()
    }
}
