use crate::{Bias, Dimension, End, Item, Node, SeekTarget, SummaryTree, TREE_BASE};
use arrayvec::ArrayVec;
use std::cmp::Ordering;

#[derive(Clone)]
struct StackEntry<'a, T: Item> {
    tree: &'a SummaryTree<T>,
    index: usize,
}

/// A stateful position within a [`SummaryTree`], addressed by a dimension `D`
/// of the tree's summary. Cursors only move forward.
pub struct Cursor<'a, T: Item, D> {
    tree: &'a SummaryTree<T>,
    stack: ArrayVec<StackEntry<'a, T>, 16>,
    position: D,
    did_seek: bool,
    at_end: bool,
}

impl<'a, T, D> Cursor<'a, T, D>
where
    T: Item,
    D: Dimension<T::Summary>,
{
    pub(crate) fn new(tree: &'a SummaryTree<T>) -> Self {
        Self {
            tree,
            stack: ArrayVec::new(),
            position: D::default(),
            did_seek: false,
            at_end: false,
        }
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.position = D::default();
        self.did_seek = false;
        self.at_end = false;
    }

    /// The sum of the summaries of all items before the current item.
    pub fn start(&self) -> &D {
        &self.position
    }

    /// The position just past the current item.
    pub fn end(&self) -> D {
        let mut end = self.position.clone();
        if let Some(summary) = self.item_summary() {
            end.add_summary(summary);
        }
        end
    }

    pub fn item(&self) -> Option<&'a T> {
        self.assert_did_seek();
        if let Some(entry) = self.stack.last() {
            match entry.tree.node() {
                Node::Leaf { items, .. } => items.get(entry.index),
                Node::Internal { .. } => unreachable!("cursor stack must end in a leaf"),
            }
        } else {
            None
        }
    }

    fn item_summary(&self) -> Option<&'a T::Summary> {
        self.assert_did_seek();
        if let Some(entry) = self.stack.last() {
            match entry.tree.node() {
                Node::Leaf { item_summaries, .. } => item_summaries.get(entry.index),
                Node::Internal { .. } => unreachable!("cursor stack must end in a leaf"),
            }
        } else {
            None
        }
    }

    /// Advances to the next item. The first call positions the cursor at the
    /// first item in the tree.
    pub fn next(&mut self) {
        if !self.did_seek {
            self.did_seek = true;
            self.stack.push(StackEntry {
                tree: self.tree,
                index: 0,
            });
            self.descend_to_first_item();
            self.at_end = self.item_is_missing();
            return;
        }

        if self.at_end {
            return;
        }

        while let Some(entry) = self.stack.last_mut() {
            let tree = entry.tree;
            match tree.node() {
                Node::Leaf {
                    items,
                    item_summaries,
                    ..
                } => {
                    if entry.index < items.len() {
                        self.position.add_summary(&item_summaries[entry.index]);
                        entry.index += 1;
                        if entry.index < items.len() {
                            return;
                        }
                    }
                    self.stack.pop();
                }
                Node::Internal { child_trees, .. } => {
                    entry.index += 1;
                    if entry.index < child_trees.len() {
                        let subtree = &child_trees[entry.index];
                        self.stack.push(StackEntry {
                            tree: subtree,
                            index: 0,
                        });
                        self.descend_to_first_item();
                        return;
                    }
                    self.stack.pop();
                }
            }
        }

        self.at_end = true;
    }

    fn descend_to_first_item(&mut self) {
        loop {
            let tree = self.stack.last().unwrap().tree;
            match tree.node() {
                Node::Internal { child_trees, .. } => {
                    self.stack.push(StackEntry {
                        tree: &child_trees[0],
                        index: 0,
                    });
                }
                Node::Leaf { .. } => break,
            }
        }
    }

    fn item_is_missing(&self) -> bool {
        match self.stack.last() {
            Some(entry) => match entry.tree.node() {
                Node::Leaf { items, .. } => entry.index >= items.len(),
                Node::Internal { .. } => unreachable!(),
            },
            None => true,
        }
    }

    /// Seeks from the start of the tree. Returns whether the target position
    /// was an exact item boundary.
    pub fn seek(&mut self, target: &impl SeekTarget<T::Summary, D>, bias: Bias) -> bool {
        self.reset();
        self.seek_internal(target, bias, &mut NoAggregate)
    }

    /// Seeks forward from the current position.
    pub fn seek_forward(&mut self, target: &impl SeekTarget<T::Summary, D>, bias: Bias) -> bool {
        self.seek_internal(target, bias, &mut NoAggregate)
    }

    /// Advances to `end`, returning all whole items between the previous
    /// position and `end` as a new tree.
    pub fn slice(&mut self, end: &impl SeekTarget<T::Summary, D>, bias: Bias) -> SummaryTree<T> {
        let mut slice = SliceAggregate {
            tree: SummaryTree::new(),
            leaf_items: ArrayVec::new(),
            leaf_item_summaries: ArrayVec::new(),
        };
        self.seek_internal(end, bias, &mut slice);
        slice.flush();
        slice.tree
    }

    /// The rest of the tree, starting at the current item.
    pub fn suffix(&mut self) -> SummaryTree<T> {
        self.slice(&End, Bias::Right)
    }

    /// Advances to `end`, accumulating the traversed summaries into another
    /// dimension `D2`.
    pub fn summary<Target, D2>(&mut self, end: &Target, bias: Bias) -> D2
    where
        Target: SeekTarget<T::Summary, D>,
        D2: Dimension<T::Summary>,
    {
        let mut aggregate = SummaryAggregate(D2::default());
        self.seek_internal(end, bias, &mut aggregate);
        aggregate.0
    }

    fn seek_internal(
        &mut self,
        target: &impl SeekTarget<T::Summary, D>,
        bias: Bias,
        aggregate: &mut dyn SeekAggregate<T>,
    ) -> bool {
        debug_assert!(
            target.cmp(&self.position) >= Ordering::Equal,
            "cannot seek backward",
        );

        if !self.did_seek {
            self.did_seek = true;
            self.stack.push(StackEntry {
                tree: self.tree,
                index: 0,
            });
        }

        let mut ascending = false;
        'outer: while let Some(entry) = self.stack.last_mut() {
            let tree = entry.tree;
            match tree.node() {
                Node::Internal {
                    child_summaries,
                    child_trees,
                    ..
                } => {
                    if ascending {
                        entry.index += 1;
                        ascending = false;
                    }

                    for (child_tree, child_summary) in child_trees[entry.index..]
                        .iter()
                        .zip(&child_summaries[entry.index..])
                    {
                        let mut child_end = self.position.clone();
                        child_end.add_summary(child_summary);

                        let comparison = target.cmp(&child_end);
                        if comparison == Ordering::Greater
                            || (comparison == Ordering::Equal && bias == Bias::Right)
                        {
                            self.position = child_end;
                            aggregate.push_tree(child_tree, child_summary);
                            entry.index += 1;
                        } else {
                            self.stack.push(StackEntry {
                                tree: child_tree,
                                index: 0,
                            });
                            continue 'outer;
                        }
                    }
                }
                Node::Leaf {
                    items,
                    item_summaries,
                    ..
                } => {
                    ascending = false;
                    for (item, item_summary) in items[entry.index..]
                        .iter()
                        .zip(&item_summaries[entry.index..])
                    {
                        let mut item_end = self.position.clone();
                        item_end.add_summary(item_summary);

                        let comparison = target.cmp(&item_end);
                        if comparison == Ordering::Greater
                            || (comparison == Ordering::Equal && bias == Bias::Right)
                        {
                            self.position = item_end;
                            aggregate.push_item(item, item_summary);
                            entry.index += 1;
                        } else {
                            break 'outer;
                        }
                    }
                }
            }

            self.stack.pop();
            ascending = true;
        }

        self.at_end = self.stack.is_empty();
        debug_assert!(
            self.stack.is_empty()
                || matches!(self.stack.last().unwrap().tree.node(), Node::Leaf { .. })
        );

        let mut end = self.position.clone();
        if bias == Bias::Left {
            if let Some(summary) = self.item_summary() {
                end.add_summary(summary);
            }
        }
        target.cmp(&end) == Ordering::Equal
    }

    #[track_caller]
    fn assert_did_seek(&self) {
        assert!(
            self.did_seek,
            "cursor must be advanced with next() or seek() before reading",
        );
    }
}

trait SeekAggregate<T: Item> {
    fn push_item(&mut self, item: &T, summary: &T::Summary);
    fn push_tree(&mut self, tree: &SummaryTree<T>, summary: &T::Summary);
}

struct NoAggregate;

impl<T: Item> SeekAggregate<T> for NoAggregate {
    fn push_item(&mut self, _: &T, _: &T::Summary) {}
    fn push_tree(&mut self, _: &SummaryTree<T>, _: &T::Summary) {}
}

struct SliceAggregate<T: Item> {
    tree: SummaryTree<T>,
    leaf_items: ArrayVec<T, { 2 * TREE_BASE }>,
    leaf_item_summaries: ArrayVec<T::Summary, { 2 * TREE_BASE }>,
}

impl<T: Item> SliceAggregate<T> {
    fn flush(&mut self) {
        if !self.leaf_items.is_empty() {
            let items = std::mem::take(&mut self.leaf_items);
            let item_summaries = std::mem::take(&mut self.leaf_item_summaries);
            self.tree.append(SummaryTree::leaf(items, item_summaries));
        }
    }
}

impl<T: Item> SeekAggregate<T> for SliceAggregate<T> {
    fn push_item(&mut self, item: &T, summary: &T::Summary) {
        if self.leaf_items.is_full() {
            self.flush();
        }
        self.leaf_items.push(item.clone());
        self.leaf_item_summaries.push(summary.clone());
    }

    fn push_tree(&mut self, tree: &SummaryTree<T>, _: &T::Summary) {
        self.flush();
        self.tree.append(tree.clone());
    }
}

struct SummaryAggregate<D>(D);

impl<T: Item, D: Dimension<T::Summary>> SeekAggregate<T> for SummaryAggregate<D> {
    fn push_item(&mut self, _: &T, summary: &T::Summary) {
        self.0.add_summary(summary);
    }

    fn push_tree(&mut self, _: &SummaryTree<T>, summary: &T::Summary) {
        self.0.add_summary(summary);
    }
}
