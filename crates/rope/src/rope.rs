mod chunk;
mod point;

use chunk::{Chunk, CHUNK_BASE};
use smallvec::SmallVec;
use std::{cmp, fmt, ops::Range, str};
use summary_tree::{Dimension, SummaryTree, Summary};

pub use point::Point;
pub use summary_tree::Bias;

/// A UTF-8 string stored as a balanced tree of small chunks.
///
/// Cloning is cheap because chunks are shared between clones, and every
/// operation that maps between byte offsets and `Point` coordinates runs in
/// time logarithmic in the length of the text.
#[derive(Clone, Default, Debug)]
pub struct Rope {
    chunks: SummaryTree<Chunk>,
}

impl Rope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.extent::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> &TextSummary {
        self.chunks.summary()
    }

    pub fn max_point(&self) -> Point {
        self.chunks.extent::<Point>()
    }

    /// Appends `text`, merging it into the trailing chunk when that chunk is
    /// below the minimum size so adjacent pushes never accumulate runts.
    pub fn push(&mut self, text: &str) {
        let mut text = text;
        let mut merged = String::new();
        if self.chunks.last().map_or(false, |c| c.0.len() < CHUNK_BASE) {
            let last_len = self.chunks.last().unwrap().0.len();
            let prefix_end = self.len() - last_len;
            let prefix = {
                let mut cursor = self.chunks.cursor::<usize>();
                let prefix = cursor.slice(&prefix_end, Bias::Right);
                merged.push_str(&cursor.item().unwrap().0);
                prefix
            };
            merged.push_str(text);
            self.chunks = prefix;
            text = &merged;
        }

        let mut new_chunks = SmallVec::<[Chunk; 16]>::new();
        while !text.is_empty() {
            let mut split_ix = cmp::min(2 * CHUNK_BASE, text.len());
            while !text.is_char_boundary(split_ix) {
                split_ix -= 1;
            }
            let (chunk, remainder) = text.split_at(split_ix);
            new_chunks.push(Chunk::new(chunk));
            text = remainder;
        }
        self.chunks.extend(new_chunks);
        self.check_invariants();
    }

    pub fn append(&mut self, rope: Rope) {
        let mut chunks = rope.chunks.cursor::<()>();
        chunks.next();
        if let Some(chunk) = chunks.item() {
            if self.chunks.last().map_or(false, |c| c.0.len() < CHUNK_BASE)
                || chunk.0.len() < CHUNK_BASE
            {
                self.push(&chunk.0);
                chunks.next();
            }
        }
        self.chunks.append(chunks.suffix());
        self.check_invariants();
    }

    /// Replaces the text in `range` with `new_text`. The range must lie on
    /// char boundaries.
    pub fn replace(&mut self, range: Range<usize>, new_text: &str) {
        let mut new_rope = Rope::new();
        let mut cursor = self.cursor(0);
        new_rope.append(cursor.slice(range.start));
        cursor.seek_forward(range.end);
        new_rope.push(new_text);
        new_rope.append(cursor.suffix());
        *self = new_rope;
    }

    pub fn slice(&self, range: Range<usize>) -> Rope {
        let mut cursor = self.cursor(range.start);
        cursor.slice(range.end)
    }

    pub fn cursor(&self, offset: usize) -> Cursor {
        Cursor::new(self, offset)
    }

    pub fn chunks(&self) -> Chunks {
        self.chunks_in_range(0..self.len())
    }

    pub fn chunks_in_range(&self, range: Range<usize>) -> Chunks {
        Chunks::new(self, range)
    }

    pub fn text_for_range(&self, range: Range<usize>) -> String {
        let mut text = String::with_capacity(range.len());
        for chunk in self.chunks_in_range(range) {
            text.push_str(chunk);
        }
        text
    }

    pub fn chars_at(&self, offset: usize) -> impl Iterator<Item = char> + '_ {
        self.chunks_in_range(offset..self.len()).flat_map(str::chars)
    }

    pub fn char_at(&self, offset: usize) -> Option<char> {
        self.chars_at(offset).next()
    }

    pub fn offset_to_point(&self, offset: usize) -> Point {
        assert!(offset <= self.len(), "offset {} out of range", offset);
        let mut cursor = self.chunks.cursor::<(usize, Point)>();
        cursor.seek(&offset, Bias::Left);
        let overshoot = offset - cursor.start().0;
        cursor.start().1
            + cursor
                .item()
                .map_or(Point::zero(), |chunk| chunk.offset_to_point(overshoot))
    }

    pub fn point_to_offset(&self, point: Point) -> usize {
        assert!(point <= self.max_point(), "point {:?} out of range", point);
        let mut cursor = self.chunks.cursor::<(Point, usize)>();
        cursor.seek(&point, Bias::Left);
        let overshoot = point - cursor.start().0;
        cursor.start().1
            + cursor
                .item()
                .map_or(0, |chunk| chunk.point_to_offset(overshoot))
    }

    /// Snaps `offset` to the nearest char boundary in the direction of `bias`.
    pub fn clip_offset(&self, offset: usize, bias: Bias) -> usize {
        if offset >= self.len() {
            return self.len();
        }
        let mut cursor = self.chunks.cursor::<usize>();
        cursor.seek(&offset, Bias::Left);
        if let Some(chunk) = cursor.item() {
            let mut ix = offset - cursor.start();
            let text = chunk.0.as_str();
            match bias {
                Bias::Left => {
                    while !text.is_char_boundary(ix) {
                        ix -= 1;
                    }
                }
                Bias::Right => {
                    while !text.is_char_boundary(ix) {
                        ix += 1;
                    }
                }
            }
            cursor.start() + ix
        } else {
            self.len()
        }
    }

    pub fn is_char_boundary(&self, offset: usize) -> bool {
        if offset == 0 || offset == self.len() {
            return true;
        }
        if offset > self.len() {
            return false;
        }
        let mut cursor = self.chunks.cursor::<usize>();
        cursor.seek(&offset, Bias::Left);
        cursor.item().map_or(true, |chunk| {
            chunk.0.is_char_boundary(offset - cursor.start())
        })
    }

    fn check_invariants(&self) {
        #[cfg(test)]
        {
            let chunks = self.chunks.items();
            for chunk in &chunks {
                assert!(!chunk.0.is_empty());
            }
            // Adjacent chunks must not both be runts, or pushes would
            // fragment the tree over time.
            for window in chunks.windows(2) {
                assert!(window[0].0.len() + window[1].0.len() > CHUNK_BASE);
            }
        }
    }
}

impl<'a> From<&'a str> for Rope {
    fn from(text: &'a str) -> Self {
        let mut rope = Self::new();
        rope.push(text);
        rope
    }
}

impl fmt::Display for Rope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for chunk in self.chunks() {
            write!(f, "{}", chunk)?;
        }
        Ok(())
    }
}

/// A cursor over a [`Rope`] that can extract slices and summaries while
/// advancing strictly forward by byte offset.
pub struct Cursor<'a> {
    rope: &'a Rope,
    chunks: summary_tree::Cursor<'a, Chunk, usize>,
    offset: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(rope: &'a Rope, offset: usize) -> Self {
        let mut chunks = rope.chunks.cursor();
        chunks.seek(&offset, Bias::Right);
        Self {
            rope,
            chunks,
            offset,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn seek_forward(&mut self, end_offset: usize) {
        debug_assert!(end_offset >= self.offset);
        self.chunks.seek_forward(&end_offset, Bias::Right);
        self.offset = end_offset;
    }

    pub fn slice(&mut self, end_offset: usize) -> Rope {
        debug_assert!(end_offset >= self.offset);
        let mut slice = Rope::new();
        if let Some(start_chunk) = self.chunks.item() {
            let start_ix = self.offset - self.chunks.start();
            let end_ix = cmp::min(end_offset, self.chunks.end()) - self.chunks.start();
            slice.push(&start_chunk.0[start_ix..end_ix]);
        }
        if end_offset > self.chunks.end() {
            self.chunks.next();
            slice.append(Rope {
                chunks: self.chunks.slice(&end_offset, Bias::Right),
            });
            if let Some(end_chunk) = self.chunks.item() {
                let end_ix = end_offset - self.chunks.start();
                slice.push(&end_chunk.0[..end_ix]);
            }
        }
        self.offset = end_offset;
        slice
    }

    pub fn summary<D: TextDimension>(&mut self, end_offset: usize) -> D {
        debug_assert!(end_offset >= self.offset);
        let mut summary = D::default();
        if let Some(start_chunk) = self.chunks.item() {
            let start_ix = self.offset - self.chunks.start();
            let end_ix = cmp::min(end_offset, self.chunks.end()) - self.chunks.start();
            summary.add_assign(&D::from_text_summary(&TextSummary::from(
                &start_chunk.0[start_ix..end_ix],
            )));
        }
        if end_offset > self.chunks.end() {
            self.chunks.next();
            summary.add_assign(&self.chunks.summary::<_, D>(&end_offset, Bias::Right));
            if let Some(end_chunk) = self.chunks.item() {
                let end_ix = end_offset - self.chunks.start();
                summary.add_assign(&D::from_text_summary(&TextSummary::from(
                    &end_chunk.0[..end_ix],
                )));
            }
        }
        self.offset = end_offset;
        summary
    }

    pub fn suffix(mut self) -> Rope {
        self.slice(self.rope.len())
    }
}

/// Iterator over the chunk slices within a byte range.
pub struct Chunks<'a> {
    chunks: summary_tree::Cursor<'a, Chunk, usize>,
    range: Range<usize>,
    offset: usize,
}

impl<'a> Chunks<'a> {
    fn new(rope: &'a Rope, range: Range<usize>) -> Self {
        let mut chunks = rope.chunks.cursor();
        chunks.seek(&range.start, Bias::Right);
        let offset = range.start;
        Self {
            chunks,
            range,
            offset,
        }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.range.end {
            return None;
        }
        let chunk = self.chunks.item()?;
        let chunk_start = *self.chunks.start();
        let start_ix = self.offset - chunk_start;
        let end_ix = cmp::min(self.range.end, chunk_start + chunk.0.len()) - chunk_start;
        self.offset = chunk_start + end_ix;
        if self.offset == chunk_start + chunk.0.len() {
            self.chunks.next();
        }
        if start_ix == end_ix {
            None
        } else {
            Some(&chunk.0[start_ix..end_ix])
        }
    }
}

/// The length and line shape of a span of text, summed up the chunk tree.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TextSummary {
    /// Length in UTF-8 bytes.
    pub len: usize,
    /// Position of the last character relative to the start of the span.
    pub lines: Point,
}

impl<'a> From<&'a str> for TextSummary {
    fn from(text: &'a str) -> Self {
        let mut lines = Point::zero();
        for ch in text.chars() {
            if ch == '\n' {
                lines.row += 1;
                lines.column = 0;
            } else {
                lines.column += ch.len_utf8() as u32;
            }
        }
        TextSummary {
            len: text.len(),
            lines,
        }
    }
}

impl Summary for TextSummary {
    fn add_summary(&mut self, other: &Self) {
        self.len += other.len;
        self.lines += other.lines;
    }
}

impl std::ops::Add<Self> for TextSummary {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        Summary::add_summary(&mut self, &other);
        self
    }
}

impl Dimension<TextSummary> for TextSummary {
    fn add_summary(&mut self, summary: &TextSummary) {
        Summary::add_summary(self, summary);
    }
}

impl Dimension<TextSummary> for usize {
    fn add_summary(&mut self, summary: &TextSummary) {
        *self += summary.len;
    }
}

impl Dimension<TextSummary> for Point {
    fn add_summary(&mut self, summary: &TextSummary) {
        *self += summary.lines;
    }
}

/// A measure that can be extracted from a [`TextSummary`] and accumulated
/// across spans, such as a byte offset, a [`Point`], or both at once.
pub trait TextDimension: Dimension<TextSummary> {
    fn from_text_summary(summary: &TextSummary) -> Self;
    fn add_assign(&mut self, other: &Self);
}

impl TextDimension for usize {
    fn from_text_summary(summary: &TextSummary) -> Self {
        summary.len
    }

    fn add_assign(&mut self, other: &Self) {
        *self += other;
    }
}

impl TextDimension for Point {
    fn from_text_summary(summary: &TextSummary) -> Self {
        summary.lines
    }

    fn add_assign(&mut self, other: &Self) {
        *self += *other;
    }
}

impl TextDimension for TextSummary {
    fn from_text_summary(summary: &TextSummary) -> Self {
        *summary
    }

    fn add_assign(&mut self, other: &Self) {
        Summary::add_summary(self, other);
    }
}

impl<D1: TextDimension, D2: TextDimension> TextDimension for (D1, D2) {
    fn from_text_summary(summary: &TextSummary) -> Self {
        (
            D1::from_text_summary(summary),
            D2::from_text_summary(summary),
        )
    }

    fn add_assign(&mut self, other: &Self) {
        self.0.add_assign(&other.0);
        self.1.add_assign(&other.1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    #[test]
    fn test_push_and_display() {
        let mut rope = Rope::new();
        rope.push("abc");
        rope.push("def");
        rope.push("ghi");
        assert_eq!(rope.to_string(), "abcdefghi");
        assert_eq!(rope.len(), 9);
    }

    #[test]
    fn test_replace() {
        let mut rope = Rope::from("hello world");
        rope.replace(6..11, "there");
        assert_eq!(rope.to_string(), "hello there");
        rope.replace(5..5, ",");
        assert_eq!(rope.to_string(), "hello, there");
        rope.replace(0..12, "");
        assert_eq!(rope.to_string(), "");
    }

    #[test]
    fn test_multibyte_boundaries() {
        let rope = Rope::from("aé😀b");
        assert!(rope.is_char_boundary(0));
        assert!(rope.is_char_boundary(1));
        assert!(!rope.is_char_boundary(2));
        assert!(rope.is_char_boundary(3));
        assert!(!rope.is_char_boundary(5));
        assert!(rope.is_char_boundary(7));
        assert_eq!(rope.clip_offset(2, Bias::Left), 1);
        assert_eq!(rope.clip_offset(2, Bias::Right), 3);
        assert_eq!(rope.clip_offset(4, Bias::Left), 3);
        assert_eq!(rope.clip_offset(4, Bias::Right), 7);
        assert_eq!(rope.clip_offset(100, Bias::Right), rope.len());
        assert_eq!(rope.char_at(3), Some('😀'));
    }

    #[test]
    fn test_offset_and_point_conversion() {
        let text = "abc\ndefg\n\nhij";
        let rope = Rope::from(text);
        for (offset, point) in point_reference(text) {
            assert_eq!(rope.offset_to_point(offset), point, "offset {}", offset);
            assert_eq!(rope.point_to_offset(point), offset, "point {:?}", point);
        }
        assert_eq!(rope.max_point(), Point::new(3, 3));
    }

    #[test]
    fn test_random_edits() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..100 {
            let mut rope = Rope::new();
            let mut reference = String::new();
            for _ in 0..30 {
                let len = reference.len();
                let start = clip_boundary(&reference, rng.gen_range(0..=len));
                let end = clip_boundary(&reference, rng.gen_range(start..=len));
                let new_text = random_text(&mut rng);

                rope.replace(start..end, &new_text);
                reference.replace_range(start..end, &new_text);

                assert_eq!(rope.to_string(), reference);
                assert_eq!(rope.len(), reference.len());

                let slice_start = clip_boundary(&reference, rng.gen_range(0..=reference.len()));
                let slice_end =
                    clip_boundary(&reference, rng.gen_range(slice_start..=reference.len()));
                assert_eq!(
                    rope.text_for_range(slice_start..slice_end),
                    reference[slice_start..slice_end]
                );
                assert_eq!(
                    rope.slice(slice_start..slice_end).to_string(),
                    reference[slice_start..slice_end]
                );

                for (offset, point) in point_reference(&reference) {
                    assert_eq!(rope.offset_to_point(offset), point);
                    assert_eq!(rope.point_to_offset(point), offset);
                }
            }
        }
    }

    #[test]
    fn test_cursor_summary() {
        let text = "one\ntwo\nthree\nfour";
        let rope = Rope::from(text);
        let mut cursor = rope.cursor(0);
        let summary: TextSummary = cursor.summary(8);
        assert_eq!(summary, TextSummary::from("one\ntwo\n"));
        let point: Point = cursor.summary(13);
        assert_eq!(point, Point::new(0, 5));
        assert_eq!(cursor.suffix().to_string(), "\nfour");
    }

    fn point_reference(text: &str) -> Vec<(usize, Point)> {
        let mut result = Vec::new();
        let mut point = Point::zero();
        for (offset, ch) in text.char_indices() {
            result.push((offset, point));
            if ch == '\n' {
                point.row += 1;
                point.column = 0;
            } else {
                point.column += ch.len_utf8() as u32;
            }
        }
        result.push((text.len(), point));
        result
    }

    fn clip_boundary(text: &str, mut offset: usize) -> usize {
        while !text.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }

    fn random_text(rng: &mut StdRng) -> String {
        let len = rng.gen_range(0..10);
        (0..len)
            .map(|_| *['a', 'b', 'é', '😀', '\n'].choose(rng).unwrap())
            .collect()
    }
}
