mod cursor;

use arrayvec::ArrayVec;
use std::{cmp::Ordering, fmt, sync::Arc};

pub use cursor::Cursor;

#[cfg(test)]
pub const TREE_BASE: usize = 2;
#[cfg(not(test))]
pub const TREE_BASE: usize = 6;

/// An item that can be stored in a [`SummaryTree`].
///
/// Each item has a summary; the tree maintains the sum of the summaries of all
/// items below each node, which lets cursors seek by any [`Dimension`] of the
/// summary in logarithmic time.
pub trait Item: Clone + fmt::Debug {
    type Summary: Summary;

    fn summary(&self) -> Self::Summary;
}

pub trait Summary: Clone + fmt::Debug + Default {
    fn add_summary(&mut self, other: &Self);
}

/// An accumulating projection of a summary, used as a coordinate space when
/// seeking. `usize` byte offsets and line/column points are both dimensions of
/// a text summary, for example.
pub trait Dimension<S: Summary>: Clone + Default {
    fn add_summary(&mut self, summary: &S);

    fn from_summary(summary: &S) -> Self {
        let mut dimension = Self::default();
        dimension.add_summary(summary);
        dimension
    }
}

impl<S: Summary> Dimension<S> for () {
    fn add_summary(&mut self, _: &S) {}
}

impl<S: Summary, D1: Dimension<S>, D2: Dimension<S>> Dimension<S> for (D1, D2) {
    fn add_summary(&mut self, summary: &S) {
        self.0.add_summary(summary);
        self.1.add_summary(summary);
    }
}

pub trait SeekTarget<S: Summary, D: Dimension<S>>: fmt::Debug {
    fn cmp(&self, cursor_location: &D) -> Ordering;
}

impl<S: Summary, D: Dimension<S> + Ord + fmt::Debug> SeekTarget<S, D> for D {
    fn cmp(&self, cursor_location: &D) -> Ordering {
        Ord::cmp(self, cursor_location)
    }
}

impl<S, D1, D2> SeekTarget<S, (D1, D2)> for D1
where
    S: Summary,
    D1: SeekTarget<S, D1> + Dimension<S>,
    D2: Dimension<S>,
{
    fn cmp(&self, cursor_location: &(D1, D2)) -> Ordering {
        self.cmp(&cursor_location.0)
    }
}

/// A seek target lying past the last item of any tree.
#[derive(Debug)]
pub struct End;

impl<S: Summary, D: Dimension<S>> SeekTarget<S, D> for End {
    fn cmp(&self, _: &D) -> Ordering {
        Ordering::Greater
    }
}

/// Which side of an ambiguous position a seek should land on. Also serves as
/// the anchor movement policy vocabulary: a `Left`-biased anchor stays before
/// text inserted exactly at its position, while a `Right`-biased anchor moves
/// after it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Bias {
    #[default]
    Left,
    Right,
}

/// A B+ tree in which each node caches the sum of the summaries of all items
/// in its subtree. Nodes are reference counted, so cloning the tree or slicing
/// off a subtree is cheap.
#[derive(Clone, Debug)]
pub struct SummaryTree<T: Item>(Arc<Node<T>>);

#[derive(Clone, Debug)]
enum Node<T: Item> {
    Internal {
        height: u8,
        summary: T::Summary,
        child_summaries: ArrayVec<T::Summary, { 2 * TREE_BASE }>,
        child_trees: ArrayVec<SummaryTree<T>, { 2 * TREE_BASE }>,
    },
    Leaf {
        summary: T::Summary,
        items: ArrayVec<T, { 2 * TREE_BASE }>,
        item_summaries: ArrayVec<T::Summary, { 2 * TREE_BASE }>,
    },
}

impl<T: Item> SummaryTree<T> {
    pub fn new() -> Self {
        SummaryTree(Arc::new(Node::Leaf {
            summary: T::Summary::default(),
            items: ArrayVec::new(),
            item_summaries: ArrayVec::new(),
        }))
    }

    pub fn is_empty(&self) -> bool {
        match self.0.as_ref() {
            Node::Internal { .. } => false,
            Node::Leaf { items, .. } => items.is_empty(),
        }
    }

    pub fn summary(&self) -> &T::Summary {
        self.0.summary()
    }

    pub fn extent<D: Dimension<T::Summary>>(&self) -> D {
        D::from_summary(self.summary())
    }

    pub fn first(&self) -> Option<&T> {
        let mut node = self.0.as_ref();
        loop {
            match node {
                Node::Internal { child_trees, .. } => node = child_trees.first()?.0.as_ref(),
                Node::Leaf { items, .. } => return items.first(),
            }
        }
    }

    pub fn last(&self) -> Option<&T> {
        let mut node = self.0.as_ref();
        loop {
            match node {
                Node::Internal { child_trees, .. } => node = child_trees.last()?.0.as_ref(),
                Node::Leaf { items, .. } => return items.last(),
            }
        }
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            stack: vec![(self.0.as_ref(), 0)],
        }
    }

    pub fn items(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    pub fn cursor<D: Dimension<T::Summary>>(&self) -> Cursor<'_, T, D> {
        Cursor::new(self)
    }

    pub fn push(&mut self, item: T) {
        let summary = item.summary();
        let mut items = ArrayVec::new();
        items.push(item);
        let mut item_summaries = ArrayVec::new();
        item_summaries.push(summary.clone());
        self.append(SummaryTree(Arc::new(Node::Leaf {
            summary,
            items,
            item_summaries,
        })));
    }

    pub fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.append(Self::from_iter(iter));
    }

    pub fn append(&mut self, other: Self) {
        if self.is_empty() {
            *self = other;
        } else if !other.0.is_leaf() || !other.0.items().is_empty() {
            if self.0.height() < other.0.height() {
                for tree in other.0.child_trees() {
                    self.append(tree.clone());
                }
            } else if let Some(split_tree) = self.push_tree_recursive(other) {
                *self = Self::from_child_trees(self.clone(), split_tree);
            }
        }
    }

    fn push_tree_recursive(&mut self, other: SummaryTree<T>) -> Option<SummaryTree<T>> {
        match Arc::make_mut(&mut self.0) {
            Node::Internal {
                height,
                summary,
                child_summaries,
                child_trees,
            } => {
                let other_node = other.0.clone();
                summary.add_summary(other_node.summary());

                let height_delta = *height - other_node.height();
                let mut summaries_to_append = ArrayVec::<T::Summary, { 2 * TREE_BASE }>::new();
                let mut trees_to_append = ArrayVec::<SummaryTree<T>, { 2 * TREE_BASE }>::new();
                if height_delta == 0 {
                    summaries_to_append.extend(other_node.child_summaries().iter().cloned());
                    trees_to_append.extend(other_node.child_trees().iter().cloned());
                } else if height_delta == 1 && !other_node.is_underflowing() {
                    summaries_to_append.push(other_node.summary().clone());
                    trees_to_append.push(other);
                } else {
                    let tree_to_append = child_trees
                        .last_mut()
                        .unwrap()
                        .push_tree_recursive(other);
                    *child_summaries.last_mut().unwrap() =
                        child_trees.last().unwrap().summary().clone();

                    if let Some(split_tree) = tree_to_append {
                        summaries_to_append.push(split_tree.summary().clone());
                        trees_to_append.push(split_tree);
                    }
                }

                let child_count = child_trees.len() + trees_to_append.len();
                if child_count > 2 * TREE_BASE {
                    let midpoint = (child_count + child_count % 2) / 2;
                    let (left_summaries, right_summaries): (
                        ArrayVec<_, { 2 * TREE_BASE }>,
                        ArrayVec<_, { 2 * TREE_BASE }>,
                    ) = {
                        let mut all_summaries = child_summaries
                            .iter()
                            .chain(summaries_to_append.iter())
                            .cloned();
                        let left = all_summaries.by_ref().take(midpoint).collect();
                        (left, all_summaries.collect())
                    };
                    let (left_trees, right_trees): (
                        ArrayVec<_, { 2 * TREE_BASE }>,
                        ArrayVec<_, { 2 * TREE_BASE }>,
                    ) = {
                        let mut all_trees =
                            child_trees.iter().chain(trees_to_append.iter()).cloned();
                        let left = all_trees.by_ref().take(midpoint).collect();
                        (left, all_trees.collect())
                    };

                    *summary = sum(left_summaries.iter());
                    *child_summaries = left_summaries;
                    *child_trees = left_trees;

                    Some(SummaryTree(Arc::new(Node::Internal {
                        height: *height,
                        summary: sum(right_summaries.iter()),
                        child_summaries: right_summaries,
                        child_trees: right_trees,
                    })))
                } else {
                    child_summaries.extend(summaries_to_append);
                    child_trees.extend(trees_to_append);
                    None
                }
            }
            Node::Leaf {
                summary,
                items,
                item_summaries,
            } => {
                let other_node = other.0;
                let child_count = items.len() + other_node.items().len();
                if child_count > 2 * TREE_BASE {
                    let midpoint = (child_count + child_count % 2) / 2;
                    let (left_items, right_items): (
                        ArrayVec<T, { 2 * TREE_BASE }>,
                        ArrayVec<T, { 2 * TREE_BASE }>,
                    ) = {
                        let mut all_items = items.iter().chain(other_node.items().iter()).cloned();
                        let left = all_items.by_ref().take(midpoint).collect();
                        (left, all_items.collect())
                    };
                    let (left_summaries, right_summaries): (
                        ArrayVec<T::Summary, { 2 * TREE_BASE }>,
                        ArrayVec<T::Summary, { 2 * TREE_BASE }>,
                    ) = {
                        let mut all_summaries = item_summaries
                            .iter()
                            .chain(other_node.item_summaries().iter())
                            .cloned();
                        let left = all_summaries.by_ref().take(midpoint).collect();
                        (left, all_summaries.collect())
                    };

                    *summary = sum(left_summaries.iter());
                    *items = left_items;
                    *item_summaries = left_summaries;

                    Some(SummaryTree(Arc::new(Node::Leaf {
                        summary: sum(right_summaries.iter()),
                        items: right_items,
                        item_summaries: right_summaries,
                    })))
                } else {
                    summary.add_summary(other_node.summary());
                    items.extend(other_node.items().iter().cloned());
                    item_summaries.extend(other_node.item_summaries().iter().cloned());
                    None
                }
            }
        }
    }

    fn from_child_trees(left: SummaryTree<T>, right: SummaryTree<T>) -> Self {
        let height = left.0.height() + 1;
        let mut child_summaries = ArrayVec::new();
        child_summaries.push(left.0.summary().clone());
        child_summaries.push(right.0.summary().clone());
        let mut child_trees = ArrayVec::new();
        child_trees.push(left);
        child_trees.push(right);
        SummaryTree(Arc::new(Node::Internal {
            height,
            summary: sum(child_summaries.iter()),
            child_summaries,
            child_trees,
        }))
    }

    fn leaf(
        items: ArrayVec<T, { 2 * TREE_BASE }>,
        item_summaries: ArrayVec<T::Summary, { 2 * TREE_BASE }>,
    ) -> Self {
        SummaryTree(Arc::new(Node::Leaf {
            summary: sum(item_summaries.iter()),
            items,
            item_summaries,
        }))
    }

    fn node(&self) -> &Node<T> {
        self.0.as_ref()
    }
}

impl<T: Item> Default for SummaryTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> FromIterator<T> for SummaryTree<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut nodes = Vec::new();
        let mut iter = iter.into_iter().fuse().peekable();
        while iter.peek().is_some() {
            let items: ArrayVec<T, { 2 * TREE_BASE }> =
                iter.by_ref().take(2 * TREE_BASE).collect();
            let item_summaries: ArrayVec<T::Summary, { 2 * TREE_BASE }> =
                items.iter().map(|item| item.summary()).collect();
            nodes.push(Node::Leaf {
                summary: sum(item_summaries.iter()),
                items,
                item_summaries,
            });
        }

        let mut parent_nodes = Vec::new();
        let mut height = 0;
        while nodes.len() > 1 {
            height += 1;
            let mut current_parent_node: Option<Node<T>> = None;
            for child_node in nodes.drain(..) {
                let parent_node = current_parent_node.get_or_insert_with(|| Node::Internal {
                    height,
                    summary: T::Summary::default(),
                    child_summaries: ArrayVec::new(),
                    child_trees: ArrayVec::new(),
                });
                let Node::Internal {
                    summary,
                    child_summaries,
                    child_trees,
                    ..
                } = parent_node
                else {
                    unreachable!()
                };
                let child_summary = child_node.summary().clone();
                summary.add_summary(&child_summary);
                child_summaries.push(child_summary);
                child_trees.push(SummaryTree(Arc::new(child_node)));

                if child_trees.len() == 2 * TREE_BASE {
                    parent_nodes.extend(current_parent_node.take());
                }
            }
            parent_nodes.extend(current_parent_node.take());
            std::mem::swap(&mut nodes, &mut parent_nodes);
        }

        if let Some(node) = nodes.pop() {
            SummaryTree(Arc::new(node))
        } else {
            Self::new()
        }
    }
}

impl<T: Item> Node<T> {
    fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    fn height(&self) -> u8 {
        match self {
            Node::Internal { height, .. } => *height,
            Node::Leaf { .. } => 0,
        }
    }

    fn summary(&self) -> &T::Summary {
        match self {
            Node::Internal { summary, .. } => summary,
            Node::Leaf { summary, .. } => summary,
        }
    }

    fn child_summaries(&self) -> &[T::Summary] {
        match self {
            Node::Internal {
                child_summaries, ..
            } => child_summaries.as_slice(),
            Node::Leaf { item_summaries, .. } => item_summaries.as_slice(),
        }
    }

    fn child_trees(&self) -> &ArrayVec<SummaryTree<T>, { 2 * TREE_BASE }> {
        match self {
            Node::Internal { child_trees, .. } => child_trees,
            Node::Leaf { .. } => panic!("leaf nodes have no child trees"),
        }
    }

    fn items(&self) -> &ArrayVec<T, { 2 * TREE_BASE }> {
        match self {
            Node::Leaf { items, .. } => items,
            Node::Internal { .. } => panic!("internal nodes have no items"),
        }
    }

    fn item_summaries(&self) -> &[T::Summary] {
        match self {
            Node::Leaf { item_summaries, .. } => item_summaries.as_slice(),
            Node::Internal { .. } => panic!("internal nodes have no item summaries"),
        }
    }

    fn is_underflowing(&self) -> bool {
        match self {
            Node::Internal { child_trees, .. } => child_trees.len() < TREE_BASE,
            Node::Leaf { items, .. } => items.len() < TREE_BASE,
        }
    }
}

pub struct Iter<'a, T: Item> {
    stack: Vec<(&'a Node<T>, usize)>,
}

impl<'a, T: Item> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        while let Some(entry) = self.stack.last_mut() {
            let (node, index) = (entry.0, entry.1);
            match node {
                Node::Leaf { items, .. } => {
                    if index < items.len() {
                        entry.1 += 1;
                        return Some(&items[index]);
                    }
                    self.stack.pop();
                }
                Node::Internal { child_trees, .. } => {
                    if index < child_trees.len() {
                        entry.1 += 1;
                        self.stack.push((child_trees[index].0.as_ref(), 0));
                    } else {
                        self.stack.pop();
                    }
                }
            }
        }
        None
    }
}

fn sum<'a, S: Summary + 'a>(iter: impl Iterator<Item = &'a S>) -> S {
    let mut sum = S::default();
    for value in iter {
        sum.add_summary(value);
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[derive(Clone, Debug, Eq, PartialEq)]
    struct IntItem(u8);

    #[derive(Clone, Debug, Default, Eq, PartialEq)]
    struct IntSummary {
        count: usize,
        sum: usize,
    }

    impl Item for IntItem {
        type Summary = IntSummary;

        fn summary(&self) -> IntSummary {
            IntSummary {
                count: 1,
                sum: self.0 as usize,
            }
        }
    }

    impl Summary for IntSummary {
        fn add_summary(&mut self, other: &Self) {
            self.count += other.count;
            self.sum += other.sum;
        }
    }

    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord)]
    struct Count(usize);

    impl Dimension<IntSummary> for Count {
        fn add_summary(&mut self, summary: &IntSummary) {
            self.0 += summary.count;
        }
    }

    impl Dimension<IntSummary> for usize {
        fn add_summary(&mut self, summary: &IntSummary) {
            *self += summary.sum;
        }
    }

    fn check_invariants(tree: &SummaryTree<IntItem>, expected: &[IntItem]) {
        assert_eq!(tree.items(), expected);
        assert_eq!(
            tree.summary(),
            &IntSummary {
                count: expected.len(),
                sum: expected.iter().map(|item| item.0 as usize).sum(),
            }
        );
        assert_eq!(tree.first(), expected.first());
        assert_eq!(tree.last(), expected.last());
    }

    #[test]
    fn test_extend_and_push() {
        let mut tree = SummaryTree::new();
        let mut expected = Vec::new();
        for value in 0..100u8 {
            tree.push(IntItem(value));
            expected.push(IntItem(value));
        }
        check_invariants(&tree, &expected);

        let from_iter = SummaryTree::from_iter(expected.iter().cloned());
        check_invariants(&from_iter, &expected);
    }

    #[test]
    fn test_append_random_trees() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let left_len = rng.gen_range(0..60);
            let right_len = rng.gen_range(0..60);
            let left_items: Vec<IntItem> =
                (0..left_len).map(|_| IntItem(rng.gen_range(0..10))).collect();
            let right_items: Vec<IntItem> =
                (0..right_len).map(|_| IntItem(rng.gen_range(0..10))).collect();

            let mut tree = SummaryTree::from_iter(left_items.iter().cloned());
            tree.append(SummaryTree::from_iter(right_items.iter().cloned()));

            let mut expected = left_items;
            expected.extend(right_items);
            check_invariants(&tree, &expected);
        }
    }

    #[test]
    fn test_cursor_seek_and_slice() {
        let items: Vec<IntItem> = (0..50).map(|ix| IntItem(ix as u8)).collect();
        let tree = SummaryTree::from_iter(items.iter().cloned());

        for ix in 0..=items.len() {
            let mut cursor = tree.cursor::<Count>();
            let prefix = cursor.slice(&Count(ix), Bias::Right);
            assert_eq!(prefix.items(), &items[..ix], "prefix up to {}", ix);
            assert_eq!(cursor.start(), &Count(ix));
            assert_eq!(cursor.item(), items.get(ix));
            let suffix = cursor.suffix();
            assert_eq!(suffix.items(), &items[ix..], "suffix from {}", ix);
        }
    }

    #[test]
    fn test_cursor_next() {
        let items: Vec<IntItem> = (0..17).map(|ix| IntItem(ix as u8)).collect();
        let tree = SummaryTree::from_iter(items.iter().cloned());

        let mut cursor = tree.cursor::<Count>();
        cursor.next();
        let mut visited = Vec::new();
        while let Some(item) = cursor.item() {
            visited.push(item.clone());
            cursor.next();
        }
        assert_eq!(visited, items);
        assert_eq!(cursor.start(), &Count(items.len()));
    }

    #[test]
    fn test_cursor_seek_forward_and_summary() {
        let items: Vec<IntItem> = (1..=30).map(|ix| IntItem(ix as u8)).collect();
        let tree = SummaryTree::from_iter(items.iter().cloned());

        let mut cursor = tree.cursor::<Count>();
        cursor.seek(&Count(10), Bias::Right);
        let expected_sum: usize = items[10..20].iter().map(|item| item.0 as usize).sum();
        let sum: usize = cursor.summary(&Count(20), Bias::Right);
        assert_eq!(sum, expected_sum);
        assert_eq!(cursor.start(), &Count(20));

        cursor.seek_forward(&Count(25), Bias::Right);
        assert_eq!(cursor.item(), Some(&items[25]));
    }

    #[test]
    fn test_empty_tree() {
        let tree = SummaryTree::<IntItem>::new();
        assert!(tree.is_empty());
        assert_eq!(tree.first(), None);
        assert_eq!(tree.last(), None);
        let mut cursor = tree.cursor::<Count>();
        cursor.next();
        assert_eq!(cursor.item(), None);
    }
}
