use crate::{Point, TextSummary};
use arrayvec::ArrayString;
use summary_tree::Item;

#[cfg(test)]
pub(crate) const CHUNK_BASE: usize = 6;
#[cfg(not(test))]
pub(crate) const CHUNK_BASE: usize = 64;

/// A run of text no longer than `2 * CHUNK_BASE` bytes, always split on char
/// boundaries.
#[derive(Clone, Debug, Default)]
pub(crate) struct Chunk(pub ArrayString<{ 2 * CHUNK_BASE }>);

impl Chunk {
    pub fn new(text: &str) -> Self {
        Chunk(ArrayString::from(text).unwrap())
    }

    pub fn offset_to_point(&self, offset: usize) -> Point {
        TextSummary::from(&self.0[..offset]).lines
    }

    pub fn point_to_offset(&self, target: Point) -> usize {
        let mut point = Point::zero();
        for (offset, ch) in self.0.char_indices() {
            if point >= target {
                assert_eq!(point, target, "point {:?} is not a valid position", target);
                return offset;
            }
            if ch == '\n' {
                point.row += 1;
                point.column = 0;
                assert!(
                    point.row <= target.row,
                    "point {:?} is beyond the end of its line",
                    target,
                );
            } else {
                point.column += ch.len_utf8() as u32;
            }
        }
        assert_eq!(point, target, "point {:?} is not a valid position", target);
        self.0.len()
    }
}

impl Item for Chunk {
    type Summary = TextSummary;

    fn summary(&self) -> TextSummary {
        TextSummary::from(self.0.as_str())
    }
}
