use crate::Edit;
use rope::Bias;
use smallvec::SmallVec;

/// Handle to a position tracked by a [`Document`](crate::Document).
///
/// The handle stays valid across edits. It does not keep any text alive;
/// using a handle after [`remove`](AnchorTable::remove) is reported as an
/// error rather than resurrecting an unrelated anchor, because slots carry a
/// generation counter that is bumped on reuse.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Anchor {
    ix: u32,
    generation: u32,
}

/// A pair of anchors delimiting a range that tracks edits, such as the span
/// a completion popup will replace.
///
/// The start anchor stays before insertions at its offset and the end anchor
/// moves with them, so the range absorbs text typed at either boundary and
/// `start <= end` holds without re-sorting. Both anchors survive deletions by
/// collapsing to the deletion boundary.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    pub start: Anchor,
    pub end: Anchor,
}

#[derive(Clone, Debug)]
pub(crate) struct AnchorState {
    pub offset: usize,
    pub bias: Bias,
    pub survive_deletion: bool,
    pub deleted: bool,
}

struct Slot {
    generation: u32,
    state: Option<AnchorState>,
}

/// Arena of live anchors, updated as one unit per edit.
#[derive(Default)]
pub(crate) struct AnchorTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl AnchorTable {
    pub fn insert(&mut self, offset: usize, bias: Bias) -> Anchor {
        let state = AnchorState {
            offset,
            bias,
            survive_deletion: false,
            deleted: false,
        };
        if let Some(ix) = self.free.pop() {
            let slot = &mut self.slots[ix as usize];
            slot.state = Some(state);
            Anchor {
                ix,
                generation: slot.generation,
            }
        } else {
            let ix = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                state: Some(state),
            });
            Anchor { ix, generation: 0 }
        }
    }

    pub fn state(&self, anchor: Anchor) -> Option<&AnchorState> {
        let slot = self.slots.get(anchor.ix as usize)?;
        if slot.generation == anchor.generation {
            slot.state.as_ref()
        } else {
            None
        }
    }

    pub fn state_mut(&mut self, anchor: Anchor) -> Option<&mut AnchorState> {
        let slot = self.slots.get_mut(anchor.ix as usize)?;
        if slot.generation == anchor.generation {
            slot.state.as_mut()
        } else {
            None
        }
    }

    pub fn remove(&mut self, anchor: Anchor) -> bool {
        if let Some(slot) = self.slots.get_mut(anchor.ix as usize) {
            if slot.generation == anchor.generation && slot.state.is_some() {
                slot.state = None;
                slot.generation += 1;
                self.free.push(anchor.ix);
                return true;
            }
        }
        false
    }

    /// Shifts every live anchor to account for `edit` and returns the handles
    /// of anchors whose position was deleted by it. Either all anchors
    /// reflect the edit or none do; this never observes a partial update.
    pub fn apply(&mut self, edit: &Edit) -> SmallVec<[Anchor; 4]> {
        let old_len = edit.old_len();
        let new_len = edit.new_len();
        let mut deleted = SmallVec::new();
        for (ix, slot) in self.slots.iter_mut().enumerate() {
            let Some(state) = slot.state.as_mut() else {
                continue;
            };
            if state.deleted || state.offset < edit.old.start {
                continue;
            }
            if old_len == 0 {
                // Pure insertion. An anchor exactly at the insertion point
                // moves only if it is right-biased.
                if state.offset > edit.old.start || state.bias == Bias::Right {
                    state.offset += new_len;
                }
            } else if state.offset >= edit.old.end {
                state.offset = state.offset - old_len + new_len;
            } else if state.survive_deletion {
                state.offset = edit.old.start;
            } else {
                state.deleted = true;
                deleted.push(Anchor {
                    ix: ix as u32,
                    generation: slot.generation,
                });
            }
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(old: std::ops::Range<usize>, new_len: usize) -> Edit {
        Edit {
            new: old.start..old.start + new_len,
            old,
        }
    }

    #[test]
    fn test_insertion_at_anchor_respects_bias() {
        let mut table = AnchorTable::default();
        let left = table.insert(5, Bias::Left);
        let right = table.insert(5, Bias::Right);
        assert!(table.apply(&edit(5..5, 1)).is_empty());
        assert_eq!(table.state(left).unwrap().offset, 5);
        assert_eq!(table.state(right).unwrap().offset, 6);
    }

    #[test]
    fn test_deletion_containing_anchor() {
        let mut table = AnchorTable::default();
        let before = table.insert(1, Bias::Left);
        let at_start = table.insert(3, Bias::Left);
        let inside = table.insert(4, Bias::Left);
        let after = table.insert(8, Bias::Left);

        let deleted = table.apply(&edit(3..6, 0));
        assert_eq!(deleted.as_slice(), &[at_start, inside]);
        assert_eq!(table.state(before).unwrap().offset, 1);
        assert!(table.state(at_start).unwrap().deleted);
        assert!(table.state(inside).unwrap().deleted);
        assert_eq!(table.state(after).unwrap().offset, 5);
    }

    #[test]
    fn test_surviving_anchor_collapses_to_deletion_start() {
        let mut table = AnchorTable::default();
        let anchor = table.insert(4, Bias::Left);
        table.state_mut(anchor).unwrap().survive_deletion = true;
        assert!(table.apply(&edit(3..6, 2)).is_empty());
        let state = table.state(anchor).unwrap();
        assert!(!state.deleted);
        assert_eq!(state.offset, 3);
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut table = AnchorTable::default();
        let first = table.insert(0, Bias::Left);
        assert!(table.remove(first));
        let second = table.insert(7, Bias::Left);
        assert!(table.state(first).is_none());
        assert_eq!(table.state(second).unwrap().offset, 7);
        assert!(!table.remove(first));
    }
}
