//! Receive-side reassembly.
//!
//! Incoming segments either line up with the read head and are delivered
//! immediately, or they are buffered out of order. Buffering only records
//! the range in a descriptor; the payload bytes go straight into the
//! caller's stream buffer at the offset this module reports. Whenever an
//! out-of-order segment is seen, a single-block SACK describing the
//! contiguous run it belongs to is prepared for the next outgoing ACK.

use super::TcpWindow;
use crate::seq::SeqNum;
use crate::storage::{SegId, SegmentPool};

/// The verdict of [`TcpWindow::rx_check`] on an incoming segment.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxCheck {
    /// The segment is the next expected one; copy its bytes to offset 0 of
    /// the stream buffer and deliver them.
    Expected,
    /// The segment is ahead of the read head but within the window; it has
    /// been buffered and its bytes belong at this offset from the head.
    OutOfOrder(u32),
    /// The segment was refused: an old duplicate, a keep-alive probe, too
    /// far ahead, already buffered, or no descriptor was left. The driver
    /// should still acknowledge (and send along any prepared SACK).
    Refused,
}

impl RxCheck {
    /// The stream-buffer offset at which to store the segment, if it was
    /// accepted.
    pub fn offset(&self) -> Option<u32> {
        match *self {
            RxCheck::Expected => Some(0),
            RxCheck::OutOfOrder(offset) => Some(offset),
            RxCheck::Refused => None,
        }
    }
}

impl TcpWindow {
    /// Decide what to do with an incoming segment `[seq, seq + len)` given
    /// `space` free bytes in the caller's stream buffer.
    ///
    /// As a side effect, [`TcpWindow::user_data_length`] reports how many
    /// bytes beyond the arriving segment became deliverable (non-zero when
    /// the segment plugs a hole in front of buffered data), and
    /// [`TcpWindow::options`] holds a SACK option whenever an out-of-order
    /// segment within the window was seen.
    pub fn rx_check(
        &mut self,
        pool: &mut SegmentPool,
        seq: SeqNum,
        len: u32,
        space: u32,
    ) -> RxCheck {
        let current = self.rx.current;

        self.options.clear();
        self.user_data_length = 0;

        if current == seq {
            // The segment we have been waiting for: it can be passed
            // straight to the stream.
            if len > space {
                net_debug!("rx_check: refuse {} bytes, {} available", len, space);
                return RxCheck::Refused;
            }
            self.rx_expected(pool, len);
            let last = seq + len;
            if last.after(self.rx.highest) {
                self.rx.highest = last;
            }
            return RxCheck::Expected;
        }

        if current == seq + 1 {
            // A keep-alive probe. Store nothing, just let the driver reply
            // to it.
            return RxCheck::Refused;
        }

        // Not the segment we expected; see if it falls within the receive
        // window so it can be stored.
        let last = seq + len;
        let distance = current.offset_to(last) as i32;

        if distance <= 0 {
            // Ends at or before the read head: a retransmission of data
            // that was delivered already. No SACK needed.
            RxCheck::Refused
        } else if distance > space as i32 {
            net_debug!(
                "rx_check: refuse {}+{} bytes, {} available",
                distance,
                len,
                space
            );
            RxCheck::Refused
        } else {
            self.rx_unexpected(pool, seq, len)
        }
    }

    /// Whether everything the peer sent has been delivered in order.
    ///
    /// The driver checks this before honoring a close request: a FIN is
    /// only acceptable once no buffered segments remain and the highest
    /// sequence number seen has been acknowledged.
    pub fn rx_empty(&self) -> bool {
        if !self.rx_segments.is_empty() {
            // Rx data has been stored while earlier segments were missing.
            return false;
        }
        if self.rx.current.after_eq(self.rx.highest) {
            true
        } else {
            net_debug!(
                "rx_empty: cur {} highest {}",
                self.rel_rx(self.rx.current),
                self.rel_rx(self.rx.highest)
            );
            false
        }
    }

    /// The expected segment of `len` bytes has arrived at the read head.
    /// Absorb any buffered segments its range duplicates, then any that
    /// line up behind it, and advance the read head past all of them.
    fn rx_expected(&mut self, pool: &mut SegmentPool, len: u32) {
        let seq = self.rx.current;
        let mut current = seq + len;

        if !self.rx_segments.is_empty() {
            let saved = current;

            // A sender in retransmission may concatenate segments, so the
            // ranges between seq and seq + len need not line up with what
            // was buffered. Sweep out everything the arriving range covers,
            // lowest sequence number first.
            while let Some(id) = self.rx_confirm(pool, seq, len) {
                self.free_segment(pool, id);
            }

            // Buffered segments that start exactly at the new read head are
            // delivered along with this one.
            while let Some(id) = self.rx_find(pool, current) {
                current += pool.seg(id).len;
                self.free_segment(pool, id);
            }

            if saved != current {
                // More data than the arriving segment can be popped.
                self.user_data_length = saved.offset_to(current);
                net_trace!(
                    "rx_check: found {} extra bytes at {} ({} still buffered)",
                    self.user_data_length,
                    self.rel_rx(saved),
                    self.rx_segments.len()
                );
            }
        }

        self.rx.current = current;
    }

    /// An out-of-order segment within the window. Prepare a SACK for the
    /// contiguous run it starts and buffer it unless it is already stored.
    fn rx_unexpected(&mut self, pool: &mut SegmentPool, seq: SeqNum, len: u32) -> RxCheck {
        let current = self.rx.current;
        let mut last = seq + len;

        // Let the SACK describe the whole contiguous block, including
        // segments buffered earlier.
        while let Some(id) = self.rx_find(pool, last) {
            last += pool.seg(id).len;
        }

        net_trace!(
            "rx_check: seq {} expected {} (dist {}) sack to {}",
            self.rel_rx(seq),
            self.rel_rx(current),
            current.offset_to(seq) as i32,
            self.rel_rx(last)
        );

        self.set_sack_option(seq, last);

        if self.rx_find(pool, seq).is_some() {
            // Received for a second time. It is already stored, but do send
            // the SACK again.
            return RxCheck::Refused;
        }

        if self.new_segment(pool, seq, len, true).is_none() {
            // Cannot store the segment, so the SACK must not promise it.
            self.options.clear();
            return RxCheck::Refused;
        }

        if (seq + len).after(self.rx.highest) {
            self.rx.highest = seq + len;
        }

        net_trace!(
            "rx_check: stored seq {} ({} buffered)",
            self.rel_rx(seq),
            self.rx_segments.len()
        );

        // Accepted and stored, but an earlier segment is still missing.
        RxCheck::OutOfOrder(current.offset_to(seq))
    }

    /// Find the buffered segment starting exactly at `seq`.
    fn rx_find(&self, pool: &SegmentPool, seq: SeqNum) -> Option<SegId> {
        let mut cursor = self.rx_segments.front();
        while let Some(id) = cursor {
            let seg = pool.seg(id);
            debug_assert!(seg.is_rx);
            if seg.seq == seq {
                return Some(id);
            }
            cursor = self.rx_segments.next(pool.segments(), id);
        }
        None
    }

    /// Find the lowest-sequence buffered segment starting inside
    /// `[seq, seq + len)`.
    ///
    /// Normally there is none: the next buffered segment should start at
    /// `seq + len` exactly. Anything inside the range is a duplicate of
    /// data that is about to be delivered.
    fn rx_confirm(&self, pool: &SegmentPool, seq: SeqNum, len: u32) -> Option<SegId> {
        let last = seq + len;
        let mut best: Option<SegId> = None;

        let mut cursor = self.rx_segments.front();
        while let Some(id) = cursor {
            let candidate = pool.seg(id).seq;
            if candidate.after_eq(seq)
                && candidate.before(last)
                && best.map_or(true, |best| candidate.before(pool.seg(best).seq))
            {
                best = Some(id);
            }
            cursor = self.rx_segments.next(pool.segments(), id);
        }

        if let Some(id) = best {
            let seg = pool.seg(id);
            if seg.seq != seq || seg.len != len {
                net_debug!(
                    "rx_confirm: search {} (+{}) found {} (+{})",
                    self.rel_rx(seq),
                    len,
                    self.rel_rx(seg.seq),
                    seg.len
                );
            }
        }

        best
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::segment::Segment;
    use crate::time::Clock;

    fn zero_ticks() -> u32 {
        0
    }

    fn fixture() -> (SegmentPool<'static>, TcpWindow) {
        let pool = SegmentPool::new(vec![Segment::new(); 16]);
        let window = TcpWindow::new(
            Clock::new(zero_ticks, 1),
            10000,
            65536,
            SeqNum(1000),
            SeqNum(2000),
            1460,
        );
        (pool, window)
    }

    #[test]
    fn in_order_stream() {
        let (mut pool, mut win) = fixture();

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1000), 500, 10000),
            RxCheck::Expected
        );
        assert_eq!(win.rx_current(), SeqNum(1500));
        assert_eq!(win.user_data_length(), 0);

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1500), 500, 10000),
            RxCheck::Expected
        );
        assert_eq!(win.rx_current(), SeqNum(2000));
        assert_eq!(win.rx_highest(), SeqNum(2000));
        assert_eq!(pool.free_count(), 16);
    }

    #[test]
    fn out_of_order_then_plug() {
        let (mut pool, mut win) = fixture();

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1500), 500, 10000),
            RxCheck::OutOfOrder(500)
        );
        let sack = crate::wire::SackRepr::parse(win.options()).unwrap();
        assert_eq!(sack.first, SeqNum(1500));
        assert_eq!(sack.last, SeqNum(2000));
        assert_eq!(win.rx_current(), SeqNum(1000));
        assert_eq!(win.rx_highest(), SeqNum(2000));
        assert_eq!(pool.free_count(), 15);

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1000), 500, 10000),
            RxCheck::Expected
        );
        assert_eq!(win.user_data_length(), 500);
        assert_eq!(win.rx_current(), SeqNum(2000));
        assert!(win.rx_segments.is_empty());
        assert_eq!(pool.free_count(), 16);
    }

    #[test]
    fn old_duplicate_is_refused() {
        let (mut pool, mut win) = fixture();

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1000), 500, 10000),
            RxCheck::Expected
        );
        // Re-delivery of delivered data changes nothing.
        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1000), 500, 10000),
            RxCheck::Refused
        );
        assert_eq!(win.rx_current(), SeqNum(1500));
        assert!(win.options().is_empty());
        assert_eq!(win.user_data_length(), 0);
    }

    #[test]
    fn absorbed_segment_is_refused_on_redelivery() {
        let (mut pool, mut win) = fixture();

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1500), 500, 10000),
            RxCheck::OutOfOrder(500)
        );
        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1000), 500, 10000),
            RxCheck::Expected
        );

        // The buffered copy is gone; a late retransmission is just an old
        // duplicate now.
        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1500), 500, 10000),
            RxCheck::Refused
        );
        assert_eq!(win.rx_current(), SeqNum(2000));
        assert!(win.options().is_empty());
    }

    #[test]
    fn keep_alive_probe() {
        let (mut pool, mut win) = fixture();

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1000), 500, 10000),
            RxCheck::Expected
        );
        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1499), 1, 10000),
            RxCheck::Refused
        );
        assert_eq!(win.rx_current(), SeqNum(1500));
        assert!(win.options().is_empty());
    }

    #[test]
    fn refuses_when_stream_buffer_is_full() {
        let (mut pool, mut win) = fixture();

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1000), 500, 100),
            RxCheck::Refused
        );
        assert_eq!(win.rx_current(), SeqNum(1000));
    }

    #[test]
    fn refuses_too_far_ahead() {
        let (mut pool, mut win) = fixture();

        // Ends 11000 bytes past the read head but only 10000 fit.
        assert_eq!(
            win.rx_check(&mut pool, SeqNum(10500), 1500, 10000),
            RxCheck::Refused
        );
        assert!(win.options().is_empty());
        assert_eq!(pool.free_count(), 16);
    }

    #[test]
    fn duplicate_out_of_order_keeps_sack() {
        let (mut pool, mut win) = fixture();

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1500), 500, 10000),
            RxCheck::OutOfOrder(500)
        );
        // Stored already, but the peer is nudged with the same SACK again.
        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1500), 500, 10000),
            RxCheck::Refused
        );
        let sack = crate::wire::SackRepr::parse(win.options()).unwrap();
        assert_eq!(sack.first, SeqNum(1500));
        assert_eq!(sack.last, SeqNum(2000));
        assert_eq!(pool.free_count(), 15);
    }

    #[test]
    fn sack_covers_contiguous_buffered_run() {
        let (mut pool, mut win) = fixture();

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(2000), 500, 10000),
            RxCheck::OutOfOrder(1000)
        );
        // The new segment at 1500 joins up with [2000, 2500): one SACK
        // block covers both.
        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1500), 500, 10000),
            RxCheck::OutOfOrder(500)
        );
        let sack = crate::wire::SackRepr::parse(win.options()).unwrap();
        assert_eq!(sack.first, SeqNum(1500));
        assert_eq!(sack.last, SeqNum(2500));
    }

    #[test]
    fn plug_delivers_whole_buffered_chain() {
        let (mut pool, mut win) = fixture();

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1500), 500, 10000),
            RxCheck::OutOfOrder(500)
        );
        assert_eq!(
            win.rx_check(&mut pool, SeqNum(2000), 700, 10000),
            RxCheck::OutOfOrder(1000)
        );
        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1000), 500, 10000),
            RxCheck::Expected
        );
        assert_eq!(win.user_data_length(), 1200);
        assert_eq!(win.rx_current(), SeqNum(2700));
        assert!(win.rx_segments.is_empty());
        assert_eq!(pool.free_count(), 16);
    }

    #[test]
    fn overlapping_retransmission_sweeps_buffered_duplicates() {
        let (mut pool, mut win) = fixture();

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1500), 500, 10000),
            RxCheck::OutOfOrder(500)
        );
        // The peer retransmits a concatenated block covering the buffered
        // segment entirely.
        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1000), 1000, 10000),
            RxCheck::Expected
        );
        assert_eq!(win.rx_current(), SeqNum(2000));
        assert_eq!(win.user_data_length(), 0);
        assert!(win.rx_segments.is_empty());
        assert_eq!(pool.free_count(), 16);
    }

    #[test]
    fn pool_exhaustion_drops_segment_and_sack() {
        let mut pool = SegmentPool::new(vec![Segment::new(); 1]);
        let mut win = TcpWindow::new(
            Clock::new(zero_ticks, 1),
            10000,
            65536,
            SeqNum(1000),
            SeqNum(2000),
            1460,
        );

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1500), 500, 10000),
            RxCheck::OutOfOrder(500)
        );
        assert_eq!(pool.free_count(), 0);

        // No descriptor left for a second disjoint range: refuse it and
        // withdraw the SACK, since it could not promise the data.
        assert_eq!(
            win.rx_check(&mut pool, SeqNum(2500), 500, 10000),
            RxCheck::Refused
        );
        assert!(win.options().is_empty());
    }

    #[test]
    fn rx_empty_tracks_delivery() {
        let (mut pool, mut win) = fixture();
        assert!(win.rx_empty());

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1500), 500, 10000),
            RxCheck::OutOfOrder(500)
        );
        assert!(!win.rx_empty());

        assert_eq!(
            win.rx_check(&mut pool, SeqNum(1000), 500, 10000),
            RxCheck::Expected
        );
        assert!(win.rx_empty());
    }

    #[test]
    fn current_never_decreases() {
        use rand::Rng;

        let (mut pool, mut win) = fixture();
        let mut rng = rand::thread_rng();
        let mut delivered = win.rx_current();

        for _ in 0..1000 {
            let seq = SeqNum(1000 + rng.gen_range(0..8) * 250);
            let len = 250 * rng.gen_range(1..4);
            let _ = win.rx_check(&mut pool, seq, len, 10000);

            assert!(win.rx_current().after_eq(delivered));
            delivered = win.rx_current();
            assert_eq!(
                pool.free_count() + win.owned_segments(),
                pool.capacity()
            );
        }
    }
}
