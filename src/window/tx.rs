//! Transmit-side queueing, acknowledgement processing and fast retransmit.
//!
//! A transmit segment passes through three queues. It is born on the
//! transmit queue when `tx_add` appends application bytes, moves to the
//! wait queue once `tx_get` hands it to the link layer, and is freed when a
//! cumulative ACK covers it. A segment that the peer's SACKs show to be
//! lost is promoted to the priority queue, from where the next `tx_get`
//! emits it unconditionally.

use super::{TcpWindow, DUP_ACKS_FOR_FAST_RETRANSMIT, MAX_TRANSMITS_WITH_LARGE_WINDOW};
use crate::seq::SeqNum;
use crate::storage::{SegId, SegmentPool};

/// A segment released for transmission by [`TcpWindow::tx_get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxData {
    /// Number of bytes to send.
    pub len: u32,
    /// Index of the first byte within the caller's circular stream buffer.
    pub stream_pos: usize,
}

/// Advance an index in a circular buffer of `capacity` bytes.
fn increment_tx_position(position: usize, capacity: usize, count: usize) -> usize {
    let mut position = position + count;
    if position >= capacity {
        position -= capacity;
    }
    position
}

impl TcpWindow {
    /// Append `length` bytes of already-buffered application data to the
    /// transmit window.
    ///
    /// `position` is the caller's cursor into its circular stream buffer of
    /// `capacity` bytes. Returns the number of bytes actually accepted,
    /// which is smaller than `length` when the segment pool runs dry.
    pub fn tx_add(
        &mut self,
        pool: &mut SegmentPool,
        length: usize,
        position: usize,
        capacity: usize,
    ) -> usize {
        let mut remaining = length;
        let mut position = position;
        let mut done = 0;

        // Top up the front segment first, if it is still open: not yet
        // handed to the link layer, holding data, and short of its MSS.
        if let Some(id) = self.head_segment {
            let seg = pool.seg(id);
            if seg.len < seg.max_len && !seg.outstanding && seg.len != 0 {
                let filled = self.tx_fill_front(pool, id, remaining);
                remaining -= filled;
                done += filled;
                position = increment_tx_position(position, capacity, filled);
            }
        }

        while remaining > 0 {
            let mss = self.mss;
            let Some(id) = self.new_segment(pool, self.next_tx, mss, false) else {
                // Out of segments: no more data can be queued right now.
                if done != 0 {
                    net_debug!("tx_add: all buffers full, {} bytes cancelled", remaining);
                }
                break;
            };

            let to_write = remaining.min(mss as usize);
            let full = {
                let seg = pool.seg_mut(id);
                seg.len = to_write as u32;
                seg.stream_pos = position;
                seg.len >= seg.max_len
            };

            remaining -= to_write;
            done += to_write;
            position = increment_tx_position(position, capacity, to_write);
            self.next_tx += to_write as u32;

            self.tx_queue.push_back(pool.segments_mut(), id);
            self.head_segment = if full { None } else { Some(id) };

            net_trace!(
                "tx_add: {} bytes for seq {} (nxt {})",
                to_write,
                self.rel_tx(pool.seg(id).seq),
                self.rel_tx(self.next_tx)
            );
        }

        done
    }

    /// Add bytes to the front segment, up to its MSS.
    fn tx_fill_front(&mut self, pool: &mut SegmentPool, id: SegId, bytes_left: usize) -> usize {
        let (to_write, full) = {
            let seg = pool.seg_mut(id);
            let to_write = bytes_left.min((seg.max_len - seg.len) as usize);
            seg.len += to_write as u32;
            (to_write, seg.len >= seg.max_len)
        };
        if full {
            // This segment is full, don't add more bytes.
            self.head_segment = None;
        }
        self.next_tx += to_write as u32;

        net_trace!(
            "tx_add: topped up front segment by {} (nxt {})",
            to_write,
            self.rel_tx(self.next_tx)
        );
        to_write
    }

    /// Fetch the segment to be sent out now, if any.
    ///
    /// Selection order: the priority queue unconditionally, then the wait
    /// queue when its head's retransmission timeout has elapsed, then the
    /// transmit queue when the peer has room. The returned descriptor moves
    /// to the tail of the wait queue; [`TcpWindow::our_sequence_number`] is
    /// updated to the sequence number the driver must put on the wire.
    pub fn tx_get(&mut self, pool: &mut SegmentPool, peer_window: u32) -> Option<TxData> {
        self.our_seq = self.tx.highest;

        let id = if let Some(id) = self.priority_queue.pop_front(pool.segments_mut()) {
            // A fast retransmission: no checking for space or timeouts.
            net_trace!(
                "tx_get: priority queue {} bytes for seq {}",
                pool.seg(id).len,
                self.rel_tx(pool.seg(id).seq)
            );
            Some(id)
        } else if let Some(id) = self.tx_get_wait_queue(pool) {
            Some(id)
        } else {
            self.tx_get_transmit_queue(pool, peer_window)
        };
        let id = id?;

        debug_assert!(pool.seg(id).queue_link.owner().is_none());

        // The segment is about to be transmitted: it goes to the tail of
        // the waiting queue until the peer acknowledges it.
        self.wait_queue.push_back(pool.segments_mut(), id);

        let clock = self.clock;
        let two_mss = 2 * self.mss;
        let seg = pool.seg_mut(id);
        seg.outstanding = true;
        seg.transmit_count = seg.transmit_count.saturating_add(1);
        seg.timer.set(&clock);

        let transmit_count = seg.transmit_count;
        let data = TxData {
            len: seg.len,
            stream_pos: seg.stream_pos,
        };
        self.our_seq = seg.seq;

        if transmit_count == MAX_TRANSMITS_WITH_LARGE_WINDOW && self.tx_window_len > two_mss {
            // Repeated loss of the same segment: stop keeping much data in
            // flight.
            net_debug!(
                "tx_get: change tx window {} -> {}",
                self.tx_window_len,
                two_mss
            );
            self.tx_window_len = two_mss;
        }

        Some(data)
    }

    /// The head of the wait queue, popped when its timeout has expired.
    ///
    /// After a segment has been sent for the first time it waits
    /// `1 * SRTT` ms for an ACK, the second time `2 * SRTT` ms, doubling on
    /// every transmission.
    fn tx_get_wait_queue(&mut self, pool: &mut SegmentPool) -> Option<SegId> {
        let id = self.wait_queue.front()?;
        let seg = pool.seg(id);

        if seg.timer.age_ms(&self.clock) <= self.rto_ms(seg.transmit_count) {
            return None;
        }

        // A normal (non-fast) retransmission.
        let id = self.wait_queue.pop_front(pool.segments_mut())?;
        pool.seg_mut(id).dup_ack_count = 0;

        net_trace!(
            "tx_get: wait queue {} bytes for seq {}",
            pool.seg(id).len,
            self.rel_tx(pool.seg(id).seq)
        );
        Some(id)
    }

    /// The head of the transmit queue, popped when the peer can take it.
    /// These data are sent for the first time.
    fn tx_get_transmit_queue(&mut self, pool: &mut SegmentPool, peer_window: u32) -> Option<SegId> {
        let id = self.tx_queue.front()?;

        {
            let seg = pool.seg(id);
            if self.send_full_size && seg.len < seg.max_len {
                // The driver only wants completely filled segments.
                return None;
            }
        }
        if !self.tx_has_space(pool, peer_window) {
            return None;
        }

        let id = self.tx_queue.pop_front(pool.segments_mut())?;

        // No more data may be added to this segment now.
        if self.head_segment == Some(id) {
            self.head_segment = None;
        }

        let seg = pool.seg(id);
        self.tx.highest = seg.seq + seg.len;

        net_trace!(
            "tx_get: transmit queue {} bytes for seq {} (ws {})",
            seg.len,
            self.rel_tx(seg.seq),
            peer_window
        );
        Some(id)
    }

    /// Whether the peer can receive the head of the transmit queue.
    fn tx_has_space(&self, pool: &SegmentPool, peer_window: u32) -> bool {
        let Some(id) = self.tx_queue.front() else {
            return false;
        };
        let seg_len = pool.seg(id).len;

        // How much data has been sent but not yet acknowledged?
        let outstanding = if self.tx.highest.after_eq(self.tx.current) {
            self.tx.current.offset_to(self.tx.highest)
        } else {
            0
        };

        let nett = peer_window - peer_window.min(outstanding);
        let mut has_space = nett >= seg_len;

        // The self-imposed transmission window also caps the amount in
        // flight; it may have shrunk after repeated resends.
        if outstanding != 0 && self.tx_window_len < outstanding + seg_len {
            has_space = false;
        }

        has_space
    }

    /// Whether there is anything to send, and when.
    ///
    /// `Some(0)` means a segment can go out immediately; `Some(ms)` means
    /// the head of the wait queue becomes due for retransmission after that
    /// many milliseconds; `None` means there is nothing to do.
    pub fn tx_has_data(&self, pool: &SegmentPool, peer_window: u32) -> Option<u32> {
        if !self.priority_queue.is_empty() {
            // Priority segments go out regardless of timers or windows.
            return Some(0);
        }

        if let Some(id) = self.wait_queue.front() {
            let seg = pool.seg(id);
            let age = seg.timer.age_ms(&self.clock);
            return Some(self.rto_ms(seg.transmit_count).saturating_sub(age));
        }

        let id = self.tx_queue.front()?;
        if !self.tx_has_space(pool, peer_window) {
            // Too many outstanding messages.
            return None;
        }
        let seg = pool.seg(id);
        if self.send_full_size && seg.len < seg.max_len {
            return None;
        }
        Some(0)
    }

    /// Whether the sender has nothing outstanding nor pending.
    pub fn tx_done(&self) -> bool {
        self.tx_segments.is_empty()
    }

    /// Process a cumulative acknowledgement up to `seq`.
    ///
    /// Returns the number of bytes by which the tail of the caller's stream
    /// buffer may be advanced.
    pub fn tx_ack(&mut self, pool: &mut SegmentPool, seq: SeqNum) -> u32 {
        let first = self.tx.current;
        if seq.before_eq(first) {
            // Stale or duplicate acknowledgement.
            return 0;
        }
        self.check_ack(pool, first, seq)
    }

    /// Process a selective acknowledgement of `[first, last)`.
    ///
    /// The retired count is still relative to the left edge of the window,
    /// so a SACK of a hole yields 0. Segments in the wait queue below
    /// `first` collect duplicate-ACK marks and are promoted for fast
    /// retransmission on the third one.
    pub fn tx_sack(&mut self, pool: &mut SegmentPool, first: SeqNum, last: SeqNum) -> u32 {
        let current = self.tx.current;
        let acked = self.check_ack(pool, first, last);
        let _ = self.fast_retransmit(pool, first);

        if first.after(current) {
            net_trace!(
                "tx_sack: [{}, {}) (ack {})",
                self.rel_tx(first),
                self.rel_tx(last),
                self.rel_tx(self.tx.current)
            );
        }
        acked
    }

    /// Mark every segment fully inside `[first, last)` as acknowledged and
    /// retire the leftmost ones.
    ///
    /// `tx_segments` is kept in strict ascending sequence order, so a
    /// single walk with a running cursor covers the range. Acknowledged
    /// segments that are not at the left edge of the window stay in
    /// `tx_segments` until a later cumulative ACK retires them.
    fn check_ack(&mut self, pool: &mut SegmentPool, first: SeqNum, last: SeqNum) -> u32 {
        let mut confirmed = 0;
        let mut cursor = first;

        let mut iter = self.tx_segments.front();
        while let Some(id) = iter {
            if !cursor.before(last) {
                break;
            }
            // The current segment may be freed below.
            iter = self.tx_segments.next(pool.segments(), id);

            let (seg_seq, seg_len) = {
                let seg = pool.seg(id);
                (seg.seq, seg.len)
            };

            if cursor.after(seg_seq) {
                // Acknowledged earlier; it waits for a cumulative ACK.
                continue;
            }
            if cursor != seg_seq {
                // A gap: nothing beyond it is covered by this range.
                break;
            }

            let mut do_unlink = false;
            if !pool.seg(id).acked {
                if (seg_seq + seg_len).after(last) {
                    // Only part of this segment was acknowledged, probably
                    // due to window limits. Leave it be.
                    net_debug!(
                        "check_ack: [{}, {}) partial of seq {} (+{})",
                        self.rel_tx(first),
                        self.rel_tx(last),
                        self.rel_tx(seg_seq),
                        seg_len
                    );
                    break;
                }

                pool.seg_mut(id).acked = true;

                // Measure the round trip only on the last segment of a
                // range that was sent exactly once: retransmitted segments
                // give ambiguous timings.
                if pool.seg(id).transmit_count == 1 && seg_seq + seg_len == last {
                    let age = pool.seg(id).timer.age_ms(&self.clock);
                    self.update_srtt(age);
                }

                do_unlink = true;
            }

            if seg_seq == self.tx.current {
                // At the left edge of the window: the descriptor can be
                // retired and the edge advanced.
                net_trace!(
                    "check_ack: [{}, {}) retire seq {}",
                    self.rel_tx(first),
                    self.rel_tx(last),
                    self.rel_tx(seg_seq)
                );
                self.tx.current += seg_len;
                confirmed += seg_len;
                self.free_segment(pool, id);
                do_unlink = false;
            }

            if do_unlink {
                if let Some(tag) = pool.seg(id).queue_link.owner() {
                    self.queue_list_mut(tag).unlink(pool.segments_mut(), id);
                }
            }

            cursor += seg_len;
        }

        confirmed
    }

    /// A block above `first` has been acknowledged: count a duplicate ACK
    /// against every unacknowledged outstanding segment below it, and
    /// promote those that reach three to the priority queue.
    fn fast_retransmit(&mut self, pool: &mut SegmentPool, first: SeqNum) -> usize {
        let mut promoted = 0;

        let mut iter = self.wait_queue.front();
        while let Some(id) = iter {
            // The current segment may move queues below.
            iter = self.wait_queue.next(pool.segments(), id);

            {
                let seg = pool.seg(id);
                if seg.acked || !seg.seq.before(first) {
                    continue;
                }
            }

            let seg = pool.seg_mut(id);
            seg.dup_ack_count = seg.dup_ack_count.saturating_add(1);
            if seg.dup_ack_count != DUP_ACKS_FOR_FAST_RETRANSMIT {
                continue;
            }

            // It is very unlikely this segment will still arrive; resend it
            // far before its RTO. 'dup_ack_count' is kept: more SACKs might
            // justify a second fast retransmission.
            seg.transmit_count = 0;
            let seg_seq = seg.seq;

            self.wait_queue.unlink(pool.segments_mut(), id);
            self.priority_queue.push_back(pool.segments_mut(), id);
            promoted += 1;

            net_debug!(
                "fast_retransmit: requeue seq {} < {}",
                self.rel_tx(seg_seq),
                self.rel_tx(first)
            );
        }

        promoted
    }
}
