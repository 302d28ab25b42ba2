//! Inclusive multi-dimensional index boxes.
//!
//! `NdIndex` is used for the global domain, every subdomain, every ghost
//! slab and every overlap region. A box always satisfies `lo <= hi` along
//! every dimension; operations that could produce an empty box return
//! `Option` instead.

use std::array;
use std::fmt;

/// Inclusive box `[lo, hi]` in D-dimensional integer index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NdIndex<const D: usize> {
    lo: [i64; D],
    hi: [i64; D],
}

impl<const D: usize> NdIndex<D> {
    /// Create a box, or `None` if `lo > hi` along any dimension.
    pub fn new(lo: [i64; D], hi: [i64; D]) -> Option<Self> {
        (0..D).all(|d| lo[d] <= hi[d]).then_some(Self { lo, hi })
    }

    /// Box `[0, extent - 1]` per dimension, or `None` if any extent is zero.
    pub fn from_extents(extents: [usize; D]) -> Option<Self> {
        if extents.iter().any(|&n| n == 0) {
            return None;
        }
        Some(Self {
            lo: [0; D],
            hi: array::from_fn(|d| extents[d] as i64 - 1),
        })
    }

    /// Lower corner (inclusive).
    pub fn lo(&self) -> [i64; D] {
        self.lo
    }

    /// Upper corner (inclusive).
    pub fn hi(&self) -> [i64; D] {
        self.hi
    }

    /// Number of indices along `dim`.
    pub fn extent(&self, dim: usize) -> usize {
        (self.hi[dim] - self.lo[dim] + 1) as usize
    }

    /// Number of indices along every dimension.
    pub fn extents(&self) -> [usize; D] {
        array::from_fn(|d| self.extent(d))
    }

    /// Total number of indices in the box.
    pub fn volume(&self) -> usize {
        (0..D).map(|d| self.extent(d)).product()
    }

    /// Whether `p` lies inside the box.
    pub fn contains(&self, p: &[i64; D]) -> bool {
        (0..D).all(|d| self.lo[d] <= p[d] && p[d] <= self.hi[d])
    }

    /// Whether `other` lies entirely inside the box.
    pub fn contains_box(&self, other: &Self) -> bool {
        (0..D).all(|d| self.lo[d] <= other.lo[d] && other.hi[d] <= self.hi[d])
    }

    /// Overlap of two boxes.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        Self::new(
            array::from_fn(|d| self.lo[d].max(other.lo[d])),
            array::from_fn(|d| self.hi[d].min(other.hi[d])),
        )
    }

    /// Box extended by `width` indices on both sides of every dimension.
    pub fn grow(&self, width: usize) -> Self {
        let w = width as i64;
        Self {
            lo: array::from_fn(|d| self.lo[d] - w),
            hi: array::from_fn(|d| self.hi[d] + w),
        }
    }

    /// Box moved by `offset`.
    pub fn translate(&self, offset: [i64; D]) -> Self {
        Self {
            lo: array::from_fn(|d| self.lo[d] + offset[d]),
            hi: array::from_fn(|d| self.hi[d] + offset[d]),
        }
    }

    /// Split along `dim` into `[lo, at - 1]` and `[at, hi]`.
    ///
    /// Returns `None` unless both halves are non-empty.
    pub fn split(&self, dim: usize, at: i64) -> Option<(Self, Self)> {
        if at <= self.lo[dim] || at > self.hi[dim] {
            return None;
        }
        let mut left = *self;
        left.hi[dim] = at - 1;
        let mut right = *self;
        right.lo[dim] = at;
        Some((left, right))
    }

    /// The slab of thickness `width` adjacent to this box in direction `offset`.
    ///
    /// Along a dimension with offset -1 the slab is `[lo - width, lo - 1]`,
    /// with +1 it is `[hi + 1, hi + width]`, with 0 it spans `[lo, hi]`.
    pub fn slab(&self, offset: &[i8; D], width: usize) -> Option<Self> {
        let w = width as i64;
        let mut lo = self.lo;
        let mut hi = self.hi;
        for d in 0..D {
            match offset[d] {
                -1 => {
                    lo[d] = self.lo[d] - w;
                    hi[d] = self.lo[d] - 1;
                }
                1 => {
                    lo[d] = self.hi[d] + 1;
                    hi[d] = self.hi[d] + w;
                }
                _ => {}
            }
        }
        Self::new(lo, hi)
    }

    /// Linear offset of `p` within the box, dimension 0 fastest.
    pub fn offset_of(&self, p: &[i64; D]) -> usize {
        debug_assert!(self.contains(p), "{p:?} outside {self}");
        let mut offset = 0usize;
        let mut stride = 1usize;
        for d in 0..D {
            offset += (p[d] - self.lo[d]) as usize * stride;
            stride *= self.extent(d);
        }
        offset
    }

    /// Iterate every index in the box, dimension 0 fastest.
    pub fn iter(&self) -> NdIndexIter<D> {
        NdIndexIter {
            lo: self.lo,
            hi: self.hi,
            next: Some(self.lo),
        }
    }

    /// Iterate the first index of every contiguous dimension-0 row.
    pub fn rows(&self) -> NdIndexIter<D> {
        let mut hi = self.hi;
        hi[0] = self.lo[0];
        NdIndexIter {
            lo: self.lo,
            hi,
            next: Some(self.lo),
        }
    }
}

impl<const D: usize> fmt::Display for NdIndex<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for d in 0..D {
            if d > 0 {
                write!(f, ",")?;
            }
            write!(f, "[{}:{}]", self.lo[d], self.hi[d])?;
        }
        write!(f, "}}")
    }
}

/// Iterator over the indices of an `NdIndex`, dimension 0 fastest.
#[derive(Debug, Clone)]
pub struct NdIndexIter<const D: usize> {
    lo: [i64; D],
    hi: [i64; D],
    next: Option<[i64; D]>,
}

impl<const D: usize> Iterator for NdIndexIter<D> {
    type Item = [i64; D];

    fn next(&mut self) -> Option<[i64; D]> {
        let current = self.next?;
        let mut succ = current;
        self.next = None;
        for d in 0..D {
            if succ[d] < self.hi[d] {
                succ[d] += 1;
                self.next = Some(succ);
                break;
            }
            succ[d] = self.lo[d];
        }
        Some(current)
    }
}
