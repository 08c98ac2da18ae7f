//! Intrusive FIFO lists over the segment arena.
//!
//! Descriptors are never moved: a list is a pair of indices into the pool
//! plus per-segment link slots. Each segment carries two independent slots,
//! so it can sit in a side list (free, or a window's segment list) and in one
//! of the transmission queues at the same time. Every link records the tag of
//! its owning list, which makes membership checks and double-unlink
//! detection O(1).

use crate::segment::Segment;

/// Index of a descriptor in the segment pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SegId(usize);

impl SegId {
    pub(crate) fn new(index: usize) -> SegId {
        SegId(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// Identifies the list a link belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListTag {
    /// The pool's free list.
    Free,
    /// A window's list of all transmit descriptors, in ascending sequence order.
    TxSegments,
    /// A window's list of buffered out-of-order receive descriptors.
    RxSegments,
    /// Segments promoted for immediate (fast) retransmission.
    Priority,
    /// Outstanding segments awaiting an acknowledgement.
    Wait,
    /// Segments never sent before.
    Transmit,
}

impl ListTag {
    fn slot(self) -> LinkSlot {
        match self {
            ListTag::Free | ListTag::TxSegments | ListTag::RxSegments => LinkSlot::Segment,
            ListTag::Priority | ListTag::Wait | ListTag::Transmit => LinkSlot::Queue,
        }
    }
}

/// Selects one of a segment's two link slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkSlot {
    Segment,
    Queue,
}

/// One linkage slot of a segment descriptor.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Link {
    next: Option<SegId>,
    prev: Option<SegId>,
    owner: Option<ListTag>,
}

impl Link {
    /// The list this link currently belongs to, if any.
    pub(crate) fn owner(&self) -> Option<ListTag> {
        self.owner
    }
}

/// A FIFO doubly-linked list of segments, identified by its tag.
#[derive(Debug)]
pub(crate) struct SegList {
    tag: ListTag,
    head: Option<SegId>,
    tail: Option<SegId>,
    len: usize,
}

impl SegList {
    pub(crate) fn new(tag: ListTag) -> SegList {
        SegList {
            tag,
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// The head of the list, without detaching it.
    pub(crate) fn front(&self) -> Option<SegId> {
        self.head
    }

    /// The successor of `id` in this list.
    ///
    /// Walks fetch the successor before unlinking the current node, so the
    /// cursor stays valid while the list is being edited.
    pub(crate) fn next(&self, segments: &[Segment], id: SegId) -> Option<SegId> {
        let link = segments[id.index()].link(self.tag.slot());
        debug_assert_eq!(link.owner, Some(self.tag));
        link.next
    }

    /// Append `id` just before the end of the list.
    pub(crate) fn push_back(&mut self, segments: &mut [Segment], id: SegId) {
        let slot = self.tag.slot();
        debug_assert!(
            segments[id.index()].link(slot).owner.is_none(),
            "segment is already in a list"
        );

        *segments[id.index()].link_mut(slot) = Link {
            next: None,
            prev: self.tail,
            owner: Some(self.tag),
        };
        match self.tail {
            Some(tail) => segments[tail.index()].link_mut(slot).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    /// Detach and return the head of the list.
    pub(crate) fn pop_front(&mut self, segments: &mut [Segment]) -> Option<SegId> {
        let id = self.head?;
        self.unlink(segments, id);
        Some(id)
    }

    /// Detach `id` from anywhere in the list.
    pub(crate) fn unlink(&mut self, segments: &mut [Segment], id: SegId) {
        let slot = self.tag.slot();
        let link = *segments[id.index()].link(slot);
        debug_assert_eq!(
            link.owner,
            Some(self.tag),
            "segment is not in this list"
        );

        match link.prev {
            Some(prev) => segments[prev.index()].link_mut(slot).next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => segments[next.index()].link_mut(slot).prev = link.prev,
            None => self.tail = link.prev,
        }
        *segments[id.index()].link_mut(slot) = Link::default();
        self.len -= 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn arena(count: usize) -> Vec<Segment> {
        (0..count).map(|_| Segment::new()).collect()
    }

    #[test]
    fn fifo_order() {
        let mut segments = arena(4);
        let mut list = SegList::new(ListTag::Transmit);

        for index in 0..4 {
            list.push_back(&mut segments, SegId::new(index));
        }
        assert_eq!(list.len(), 4);

        for index in 0..4 {
            assert_eq!(list.pop_front(&mut segments), Some(SegId::new(index)));
        }
        assert!(list.is_empty());
        assert_eq!(list.pop_front(&mut segments), None);
    }

    #[test]
    fn unlink_middle() {
        let mut segments = arena(3);
        let mut list = SegList::new(ListTag::Wait);

        for index in 0..3 {
            list.push_back(&mut segments, SegId::new(index));
        }
        list.unlink(&mut segments, SegId::new(1));
        assert_eq!(segments[1].queue_link.owner(), None);

        assert_eq!(list.pop_front(&mut segments), Some(SegId::new(0)));
        assert_eq!(list.pop_front(&mut segments), Some(SegId::new(2)));
        assert!(list.is_empty());
    }

    #[test]
    fn walk_follows_insertion() {
        let mut segments = arena(3);
        let mut list = SegList::new(ListTag::RxSegments);

        for index in [2, 0, 1] {
            list.push_back(&mut segments, SegId::new(index));
        }

        let mut order = Vec::new();
        let mut cursor = list.front();
        while let Some(id) = cursor {
            order.push(id.index());
            cursor = list.next(&segments, id);
        }
        assert_eq!(order, [2, 0, 1]);
    }

    #[test]
    fn dual_membership() {
        let mut segments = arena(1);
        let mut side = SegList::new(ListTag::TxSegments);
        let mut queue = SegList::new(ListTag::Priority);
        let id = SegId::new(0);

        side.push_back(&mut segments, id);
        queue.push_back(&mut segments, id);
        assert_eq!(segments[0].segment_link.owner(), Some(ListTag::TxSegments));
        assert_eq!(segments[0].queue_link.owner(), Some(ListTag::Priority));

        queue.unlink(&mut segments, id);
        assert_eq!(segments[0].segment_link.owner(), Some(ListTag::TxSegments));
        assert_eq!(segments[0].queue_link.owner(), None);
    }
}
