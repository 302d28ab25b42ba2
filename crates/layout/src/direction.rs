//! Neighbor directions and opposite-direction matching.
//!
//! A direction is a non-zero offset with components in {-1, 0, 1}. Its
//! category is the number of non-zero components: faces (1), edges (2) and
//! vertices (3). Halo exchange walks the categories in that order.
//!
//! The table orders directions by category, then by the set of non-zero
//! axes, then by sign pattern, where bit `j` of the pattern is set when the
//! `j`-th non-zero axis points in the positive direction. Under that order
//! the antipodal direction of local index `i` in a group of `2^k` patterns
//! is `2^k - 1 - i`, which for three dimensions gives the classic matching
//! arrays below.

use std::fmt;
use std::ops::Range;

use crate::MAX_DIM;

/// Opposite face for each of the 6 faces of a 3D box.
pub const MATCH_FACE: [usize; 6] = [1, 0, 3, 2, 5, 4];

/// Opposite edge for each of the 12 edges of a 3D box.
pub const MATCH_EDGE: [usize; 12] = [3, 2, 1, 0, 7, 6, 5, 4, 11, 10, 9, 8];

/// Opposite vertex for each of the 8 vertices of a 3D box.
pub const MATCH_VERTEX: [usize; 8] = [7, 6, 5, 4, 3, 2, 1, 0];

/// Direction category by number of non-zero offset components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// One non-zero component.
    Face,
    /// Two non-zero components.
    Edge,
    /// Three non-zero components.
    Vertex,
}

impl Category {
    /// Exchange order.
    pub const ALL: [Category; 3] = [Category::Face, Category::Edge, Category::Vertex];

    /// Number of non-zero offset components.
    pub fn codim(self) -> usize {
        match self {
            Category::Face => 1,
            Category::Edge => 2,
            Category::Vertex => 3,
        }
    }

    /// Category for a count of non-zero components.
    pub fn from_codim(codim: usize) -> Option<Self> {
        match codim {
            1 => Some(Category::Face),
            2 => Some(Category::Edge),
            3 => Some(Category::Vertex),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Face => "face",
            Category::Edge => "edge",
            Category::Vertex => "vertex",
        };
        f.write_str(name)
    }
}

/// Non-zero offset vector with components in {-1, 0, 1}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Direction<const D: usize> {
    offset: [i8; D],
}

impl<const D: usize> Direction<D> {
    /// Create a direction, or `None` for the zero vector, components outside
    /// {-1, 0, 1}, or unsupported dimensionality.
    pub fn new(offset: [i8; D]) -> Option<Self> {
        if D == 0 || D > MAX_DIM {
            return None;
        }
        if offset.iter().any(|c| !(-1..=1).contains(c)) || offset.iter().all(|&c| c == 0) {
            return None;
        }
        Some(Self { offset })
    }

    /// Offset components.
    pub fn offset(&self) -> [i8; D] {
        self.offset
    }

    /// Number of non-zero components.
    pub fn codim(&self) -> usize {
        self.offset.iter().filter(|&&c| c != 0).count()
    }

    /// Face, edge or vertex.
    pub fn category(&self) -> Category {
        match self.codim() {
            1 => Category::Face,
            2 => Category::Edge,
            _ => Category::Vertex,
        }
    }

    /// The antipodal direction.
    pub fn opposite(&self) -> Self {
        Self {
            offset: self.offset.map(|c| -c),
        }
    }
}

/// Every direction of a D-dimensional box with its matched opposite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionTable<const D: usize> {
    directions: Vec<Direction<D>>,
    matched: Vec<usize>,
    /// `starts[k - 1]..starts[k]` holds the directions with `k` non-zero components.
    starts: [usize; MAX_DIM + 1],
}

impl<const D: usize> DirectionTable<D> {
    /// Build the table. Empty for unsupported dimensionalities.
    pub fn new() -> Self {
        let mut directions = Vec::new();
        let mut matched = Vec::new();
        let mut starts = [0usize; MAX_DIM + 1];

        if D >= 1 && D <= MAX_DIM {
            for codim in 1..=D {
                starts[codim - 1] = directions.len();
                for mask in 1u32..(1 << D) {
                    if mask.count_ones() as usize != codim {
                        continue;
                    }
                    let axes: Vec<usize> = (0..D).filter(|&d| mask & (1 << d) != 0).collect();
                    let group_base = directions.len();
                    let patterns = 1usize << codim;
                    for pattern in 0..patterns {
                        let mut offset = [0i8; D];
                        for (j, &axis) in axes.iter().enumerate() {
                            offset[axis] = if pattern & (1 << j) != 0 { 1 } else { -1 };
                        }
                        directions.push(Direction { offset });
                        matched.push(group_base + (patterns - 1 - pattern));
                    }
                }
            }
            for start in starts.iter_mut().skip(D) {
                *start = directions.len();
            }
        }

        let table = Self {
            directions,
            matched,
            starts,
        };
        if D == 3 {
            debug_assert_eq!(table.local_matched(Category::Face), MATCH_FACE);
            debug_assert_eq!(table.local_matched(Category::Edge), MATCH_EDGE);
            debug_assert_eq!(table.local_matched(Category::Vertex), MATCH_VERTEX);
        }
        table
    }

    /// Number of directions (3^D - 1).
    pub fn len(&self) -> usize {
        self.directions.len()
    }

    /// True only for unsupported dimensionalities.
    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }

    /// Direction at table index `i`.
    pub fn get(&self, i: usize) -> Direction<D> {
        self.directions[i]
    }

    /// All directions in exchange order.
    pub fn iter(&self) -> impl Iterator<Item = &Direction<D>> {
        self.directions.iter()
    }

    /// Table index of the direction opposite to index `i`.
    pub fn matched(&self, i: usize) -> usize {
        self.matched[i]
    }

    /// Table indices belonging to `category`.
    pub fn category_range(&self, category: Category) -> Range<usize> {
        let k = category.codim();
        if k > D {
            return 0..0;
        }
        self.starts[k - 1]..self.starts[k]
    }

    /// Matching restricted to one category, expressed as category-local indices.
    pub fn local_matched(&self, category: Category) -> Vec<usize> {
        let range = self.category_range(category);
        let base = range.start;
        range.map(|i| self.matched[i] - base).collect()
    }
}

impl<const D: usize> Default for DirectionTable<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of periodic images considered around a box (3^D).
pub fn image_count<const D: usize>() -> usize {
    3usize.pow(D as u32)
}

/// Base-3 encoding of a periodic image given by per-dimension wrap signs.
pub fn image_index<const D: usize>(signs: &[i8; D]) -> usize {
    signs
        .iter()
        .rev()
        .fold(0usize, |acc, &s| acc * 3 + (s + 1) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_counts() {
        assert_eq!(DirectionTable::<1>::new().len(), 2);
        assert_eq!(DirectionTable::<2>::new().len(), 8);
        let t3 = DirectionTable::<3>::new();
        assert_eq!(t3.len(), 26);
        assert_eq!(t3.category_range(Category::Face).len(), 6);
        assert_eq!(t3.category_range(Category::Edge).len(), 12);
        assert_eq!(t3.category_range(Category::Vertex).len(), 8);
    }

    #[test]
    fn three_dimensional_matching_reproduces_constant_tables() {
        let t = DirectionTable::<3>::new();
        assert_eq!(t.local_matched(Category::Face), MATCH_FACE);
        assert_eq!(t.local_matched(Category::Edge), MATCH_EDGE);
        assert_eq!(t.local_matched(Category::Vertex), MATCH_VERTEX);
    }

    #[test]
    fn matched_is_the_antipode_in_every_dimension() {
        fn check<const D: usize>() {
            let t = DirectionTable::<D>::new();
            for i in 0..t.len() {
                let m = t.matched(i);
                assert_eq!(t.get(m), t.get(i).opposite());
                assert_eq!(t.matched(m), i);
                assert_eq!(t.get(m).category(), t.get(i).category());
            }
        }
        check::<1>();
        check::<2>();
        check::<3>();
    }

    #[test]
    fn faces_come_low_then_high_per_axis() {
        let t = DirectionTable::<3>::new();
        assert_eq!(t.get(0).offset(), [-1, 0, 0]);
        assert_eq!(t.get(1).offset(), [1, 0, 0]);
        assert_eq!(t.get(4).offset(), [0, 0, -1]);
        assert_eq!(t.get(25).offset(), [1, 1, 1]);
    }

    #[test]
    fn two_dimensional_corners_are_edges() {
        let t = DirectionTable::<2>::new();
        assert_eq!(t.category_range(Category::Edge).len(), 4);
        assert!(t.category_range(Category::Vertex).is_empty());
    }

    #[test]
    fn rejects_zero_and_out_of_range_offsets() {
        assert!(Direction::new([0, 0]).is_none());
        assert!(Direction::new([2, 0]).is_none());
        assert!(Direction::new([0, 0, 0, 1]).is_none());
    }

    #[test]
    fn image_indices_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for a in -1i8..=1 {
            for b in -1i8..=1 {
                assert!(seen.insert(image_index(&[a, b])));
            }
        }
        assert_eq!(seen.len(), image_count::<2>());
        assert_eq!(image_index(&[0i8, 0]), 4);
    }
}
