mod anchor;
mod history;
mod subscription;

#[cfg(test)]
mod tests;

pub use anchor::{Anchor, Segment};
pub use rope::{Bias, Point, Rope};
pub use subscription::Subscription;

use anchor::AnchorTable;
use history::{History, HistoryEntry};
use std::fmt;
use std::mem;
use std::ops::Range;
use std::thread::{self, ThreadId};
use subscription::Topic;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("range {start}..{end} is out of bounds for a document of length {len}")]
    OutOfRange { start: usize, end: usize, len: usize },
    #[error("offset {offset} is not a char boundary")]
    NotCharBoundary { offset: usize },
    #[error("row {row} is out of bounds for a document with {line_count} lines")]
    InvalidRow { row: u32, line_count: u32 },
    #[error("the anchor's position was deleted")]
    AnchorDeleted,
    #[error("the anchor handle is stale")]
    InvalidAnchor,
    #[error("the document cannot be mutated from within a change notification")]
    Reentrancy,
    #[error("no transaction is open")]
    NoOpenTransaction,
    #[error("the history cannot be replayed while a transaction is open")]
    TransactionOpen,
    #[error("the document was accessed from a thread other than its owner")]
    ConcurrencyViolation,
}

/// One mutation, described as the byte range it replaced and the byte range
/// the new text occupies. `old.start == new.start` always; the lengths carry
/// the removed and inserted sizes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Edit {
    pub old: Range<usize>,
    pub new: Range<usize>,
}

impl Edit {
    pub fn old_len(&self) -> usize {
        self.old.end - self.old.start
    }

    pub fn new_len(&self) -> usize {
        self.new.end - self.new.start
    }
}

type ChangeObserver = Box<dyn FnMut(&mut Document, &Edit) + Send>;
type AnchorObserver = Box<dyn FnMut(Anchor) + Send>;

/// An editable text buffer with offset/line mapping, edit-tracking anchors,
/// undo history, and synchronous change notifications.
///
/// All coordinates are UTF-8 byte offsets; rows are zero-based. Mutations are
/// atomic: the text, line mapping, and every anchor reflect an edit before
/// any notification fires, and a failed mutation leaves the document
/// unchanged. The document belongs to the thread that created it (or that
/// last called [`take_ownership`](Self::take_ownership)); access from any
/// other thread fails with [`Error::ConcurrencyViolation`].
pub struct Document {
    rope: Rope,
    anchors: AnchorTable,
    history: History,
    edits: Topic,
    change_observers: Vec<ChangeObserver>,
    anchor_observers: Vec<AnchorObserver>,
    owner: ThreadId,
    editing: bool,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            rope: Rope::new(),
            anchors: AnchorTable::default(),
            history: History::default(),
            edits: Topic::default(),
            change_observers: Vec::new(),
            anchor_observers: Vec::new(),
            owner: thread::current().id(),
            editing: false,
        }
    }

    /// Makes the current thread the document's owner. Call this after moving
    /// the document to another thread.
    pub fn take_ownership(&mut self) {
        self.owner = thread::current().id();
    }

    pub fn len(&self) -> usize {
        self.rope.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rope.is_empty()
    }

    pub fn text(&self) -> String {
        self.rope.to_string()
    }

    pub fn text_for_range(&self, range: Range<usize>) -> Result<String> {
        self.check_access()?;
        self.validate_range(&range)?;
        Ok(self.rope.text_for_range(range))
    }

    pub fn char_at(&self, offset: usize) -> Result<char> {
        self.check_access()?;
        if offset >= self.rope.len() {
            return Err(Error::OutOfRange {
                start: offset,
                end: offset,
                len: self.rope.len(),
            });
        }
        if !self.rope.is_char_boundary(offset) {
            return Err(Error::NotCharBoundary { offset });
        }
        Ok(self.rope.char_at(offset).unwrap())
    }

    /// Snaps an arbitrary offset to the nearest valid position in the
    /// direction of `bias`.
    pub fn clip_offset(&self, offset: usize, bias: Bias) -> usize {
        self.rope.clip_offset(offset, bias)
    }

    pub fn line_count(&self) -> u32 {
        self.rope.max_point().row + 1
    }

    /// Returns the zero-based row containing `offset`.
    pub fn line_for_offset(&self, offset: usize) -> Result<u32> {
        Ok(self.offset_to_point(offset)?.row)
    }

    pub fn line_start_offset(&self, row: u32) -> Result<usize> {
        self.check_access()?;
        self.validate_row(row)?;
        Ok(self.rope.point_to_offset(Point::new(row, 0)))
    }

    /// Returns the offset one past the last character of the line, excluding
    /// its terminator.
    pub fn line_end_offset(&self, row: u32) -> Result<usize> {
        self.check_access()?;
        self.validate_row(row)?;
        if row + 1 == self.line_count() {
            Ok(self.rope.len())
        } else {
            Ok(self.rope.point_to_offset(Point::new(row + 1, 0)) - 1)
        }
    }

    pub fn line_text(&self, row: u32) -> Result<String> {
        let start = self.line_start_offset(row)?;
        let end = self.line_end_offset(row)?;
        Ok(self.rope.text_for_range(start..end))
    }

    pub fn offset_to_point(&self, offset: usize) -> Result<Point> {
        self.check_access()?;
        if offset > self.rope.len() {
            return Err(Error::OutOfRange {
                start: offset,
                end: offset,
                len: self.rope.len(),
            });
        }
        if !self.rope.is_char_boundary(offset) {
            return Err(Error::NotCharBoundary { offset });
        }
        Ok(self.rope.offset_to_point(offset))
    }

    pub fn point_to_offset(&self, point: Point) -> Result<usize> {
        let start = self.line_start_offset(point.row)?;
        let end = self.line_end_offset(point.row)?;
        let offset = start + point.column as usize;
        if offset > end {
            return Err(Error::OutOfRange {
                start: offset,
                end: offset,
                len: self.rope.len(),
            });
        }
        if !self.rope.is_char_boundary(offset) {
            return Err(Error::NotCharBoundary { offset });
        }
        Ok(offset)
    }

    pub fn insert(&mut self, offset: usize, text: &str) -> Result<()> {
        self.replace(offset..offset, text)
    }

    pub fn delete(&mut self, range: Range<usize>) -> Result<()> {
        self.replace(range, "")
    }

    /// Replaces `range` with `new_text` as a single atomic edit.
    pub fn replace(&mut self, range: Range<usize>, new_text: &str) -> Result<()> {
        self.check_access()?;
        if self.editing {
            return Err(Error::Reentrancy);
        }
        self.apply_edit(range, new_text, true)
    }

    /// Registers a callback invoked after each edit, once the text, line
    /// mapping, and anchors are all consistent. Mutating the document from
    /// within the callback fails with [`Error::Reentrancy`].
    pub fn observe(&mut self, observer: impl FnMut(&mut Document, &Edit) + Send + 'static) {
        self.change_observers.push(Box::new(observer));
    }

    /// Registers a callback invoked once for each anchor removed by a
    /// deletion.
    pub fn observe_anchor_deletions(&mut self, observer: impl FnMut(Anchor) + Send + 'static) {
        self.anchor_observers.push(Box::new(observer));
    }

    /// Returns a subscription that accumulates the change records of every
    /// subsequent edit until consumed.
    pub fn subscribe(&self) -> Subscription {
        self.edits.subscribe()
    }

    pub fn create_anchor(&mut self, offset: usize, bias: Bias) -> Result<Anchor> {
        self.check_access()?;
        self.validate_offset(offset)?;
        Ok(self.anchors.insert(offset, bias))
    }

    pub fn anchor_offset(&self, anchor: Anchor) -> Result<usize> {
        self.check_access()?;
        let state = self.anchors.state(anchor).ok_or(Error::InvalidAnchor)?;
        if state.deleted {
            Err(Error::AnchorDeleted)
        } else {
            Ok(state.offset)
        }
    }

    pub fn is_anchor_deleted(&self, anchor: Anchor) -> Result<bool> {
        self.check_access()?;
        let state = self.anchors.state(anchor).ok_or(Error::InvalidAnchor)?;
        Ok(state.deleted)
    }

    /// When enabled, a deletion covering the anchor collapses it to the
    /// deletion boundary instead of marking it deleted.
    pub fn set_survive_deletion(&mut self, anchor: Anchor, survive: bool) -> Result<()> {
        self.check_access()?;
        let state = self.anchors.state_mut(anchor).ok_or(Error::InvalidAnchor)?;
        state.survive_deletion = survive;
        Ok(())
    }

    pub fn remove_anchor(&mut self, anchor: Anchor) -> Result<()> {
        self.check_access()?;
        if self.anchors.remove(anchor) {
            Ok(())
        } else {
            Err(Error::InvalidAnchor)
        }
    }

    pub fn create_segment(&mut self, range: Range<usize>) -> Result<Segment> {
        self.check_access()?;
        self.validate_range(&range)?;
        let start = self.anchors.insert(range.start, Bias::Left);
        let end = self.anchors.insert(range.end, Bias::Right);
        self.anchors.state_mut(start).unwrap().survive_deletion = true;
        self.anchors.state_mut(end).unwrap().survive_deletion = true;
        Ok(Segment { start, end })
    }

    pub fn segment_range(&self, segment: Segment) -> Result<Range<usize>> {
        let start = self.anchor_offset(segment.start)?;
        let end = self.anchor_offset(segment.end)?;
        debug_assert!(start <= end);
        Ok(start..end)
    }

    pub fn segment_text(&self, segment: Segment) -> Result<String> {
        let range = self.segment_range(segment)?;
        Ok(self.rope.text_for_range(range))
    }

    pub fn remove_segment(&mut self, segment: Segment) -> Result<()> {
        self.remove_anchor(segment.start)?;
        self.remove_anchor(segment.end)
    }

    /// Groups subsequent edits into one undo step until the matching
    /// [`end_transaction`](Self::end_transaction). Nested pairs fold into the
    /// outermost transaction.
    pub fn start_transaction(&mut self) -> Result<()> {
        self.check_access()?;
        if self.editing {
            return Err(Error::Reentrancy);
        }
        self.history.start_transaction();
        Ok(())
    }

    /// Closes one level of transaction. Returns true when this was the
    /// outermost level and it committed an undo step. Fails with
    /// [`Error::NoOpenTransaction`] when no transaction is open.
    pub fn end_transaction(&mut self) -> Result<bool> {
        self.check_access()?;
        if self.editing {
            return Err(Error::Reentrancy);
        }
        if self.history.transaction_depth() == 0 {
            return Err(Error::NoOpenTransaction);
        }
        Ok(self.history.end_transaction())
    }

    /// Reverts the most recent undo step. Returns false when there is nothing
    /// to undo. Fails with [`Error::TransactionOpen`] while a transaction is
    /// open.
    pub fn undo(&mut self) -> Result<bool> {
        self.check_access()?;
        if self.editing {
            return Err(Error::Reentrancy);
        }
        if self.history.transaction_depth() > 0 {
            return Err(Error::TransactionOpen);
        }
        let Some(transaction) = self.history.pop_undo() else {
            return Ok(false);
        };
        for entry in transaction.entries.iter().rev() {
            let range = entry.offset..entry.offset + entry.new_text.len();
            self.apply_edit(range, &entry.old_text, false)?;
        }
        self.history.push_redo(transaction);
        Ok(true)
    }

    /// Re-applies the most recently undone step. Returns false when there is
    /// nothing to redo. Fails with [`Error::TransactionOpen`] while a
    /// transaction is open.
    pub fn redo(&mut self) -> Result<bool> {
        self.check_access()?;
        if self.editing {
            return Err(Error::Reentrancy);
        }
        if self.history.transaction_depth() > 0 {
            return Err(Error::TransactionOpen);
        }
        let Some(transaction) = self.history.pop_redo() else {
            return Ok(false);
        };
        for entry in &transaction.entries {
            let range = entry.offset..entry.offset + entry.old_text.len();
            self.apply_edit(range, &entry.new_text, false)?;
        }
        self.history.push_undone(transaction);
        Ok(true)
    }

    fn apply_edit(&mut self, range: Range<usize>, new_text: &str, record: bool) -> Result<()> {
        self.validate_range(&range)?;

        let old_text = if record {
            self.rope.text_for_range(range.clone())
        } else {
            String::new()
        };
        let edit = Edit {
            old: range.clone(),
            new: range.start..range.start + new_text.len(),
        };

        self.rope.replace(range, new_text);
        let deleted_anchors = self.anchors.apply(&edit);
        if record {
            self.history.push(HistoryEntry {
                offset: edit.old.start,
                old_text,
                new_text: new_text.to_string(),
            });
        }
        log::trace!(
            "edit at {}: removed {} bytes, inserted {} bytes",
            edit.old.start,
            edit.old_len(),
            edit.new_len(),
        );
        self.edits.publish(&edit);

        self.editing = true;
        if !deleted_anchors.is_empty() {
            log::debug!("edit deleted {} anchors", deleted_anchors.len());
            let mut observers = mem::take(&mut self.anchor_observers);
            for observer in &mut observers {
                for anchor in &deleted_anchors {
                    observer(*anchor);
                }
            }
            self.anchor_observers = observers;
        }
        let mut observers = mem::take(&mut self.change_observers);
        for observer in &mut observers {
            observer(self, &edit);
        }
        // Handlers may have registered new observers while theirs were
        // detached; keep both sets.
        let added = mem::replace(&mut self.change_observers, observers);
        self.change_observers.extend(added);
        self.editing = false;
        Ok(())
    }

    fn check_access(&self) -> Result<()> {
        if thread::current().id() == self.owner {
            Ok(())
        } else {
            Err(Error::ConcurrencyViolation)
        }
    }

    fn validate_row(&self, row: u32) -> Result<()> {
        if row < self.line_count() {
            Ok(())
        } else {
            Err(Error::InvalidRow {
                row,
                line_count: self.line_count(),
            })
        }
    }

    fn validate_offset(&self, offset: usize) -> Result<()> {
        self.validate_range(&(offset..offset))
    }

    fn validate_range(&self, range: &Range<usize>) -> Result<()> {
        let len = self.rope.len();
        if range.start > range.end || range.end > len {
            return Err(Error::OutOfRange {
                start: range.start,
                end: range.end,
                len,
            });
        }
        for offset in [range.start, range.end] {
            if !self.rope.is_char_boundary(offset) {
                return Err(Error::NotCharBoundary { offset });
            }
        }
        Ok(())
    }
}

impl<'a> From<&'a str> for Document {
    fn from(text: &'a str) -> Self {
        let mut document = Self::new();
        document.rope.push(text);
        document
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.rope, f)
    }
}
