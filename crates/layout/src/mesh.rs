//! Uniform Cartesian mesh mapping physical positions to cells.
//!
//! Cells are half-open: cell `i` along a dimension covers
//! `[origin + i * h, origin + (i + 1) * h)`. A position lying exactly on a
//! cell face therefore belongs to the cell above it, which makes ownership of
//! seam particles deterministic.

use std::array;

use crate::error::{LayoutError, Result};
use crate::index::NdIndex;

/// Origin and spacing of a uniform mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mesh<const D: usize> {
    origin: [f64; D],
    spacing: [f64; D],
}

impl<const D: usize> Mesh<D> {
    /// Create a mesh. Spacing must be positive and finite along every dimension.
    pub fn new(origin: [f64; D], spacing: [f64; D]) -> Result<Self> {
        for d in 0..D {
            if !(spacing[d].is_finite() && spacing[d] > 0.0) {
                return Err(LayoutError::InvalidMesh(format!(
                    "spacing {} along dimension {d} must be positive",
                    spacing[d]
                )));
            }
            if !origin[d].is_finite() {
                return Err(LayoutError::InvalidMesh(format!(
                    "origin {} along dimension {d} is not finite",
                    origin[d]
                )));
            }
        }
        Ok(Self { origin, spacing })
    }

    /// Mesh that divides `[min, max]` into `cells` equal cells per dimension.
    pub fn from_bounds(min: [f64; D], max: [f64; D], cells: [usize; D]) -> Result<Self> {
        for d in 0..D {
            if cells[d] == 0 || !(max[d] > min[d]) {
                return Err(LayoutError::InvalidMesh(format!(
                    "dimension {d}: bounds [{}, {}] with {} cells",
                    min[d], max[d], cells[d]
                )));
            }
        }
        Self::new(min, array::from_fn(|d| (max[d] - min[d]) / cells[d] as f64))
    }

    /// Position of the low corner of cell 0.
    pub fn origin(&self) -> [f64; D] {
        self.origin
    }

    /// Cell width per dimension.
    pub fn spacing(&self) -> [f64; D] {
        self.spacing
    }

    /// Cell containing `x`. Not clamped to any box.
    pub fn cell_of(&self, x: &[f64; D]) -> [i64; D] {
        array::from_fn(|d| ((x[d] - self.origin[d]) / self.spacing[d]).floor() as i64)
    }

    /// Cell containing `x`, clamped into `bounds`.
    ///
    /// Positions outside a non-periodic boundary map to the nearest boundary cell.
    pub fn clamped_cell(&self, bounds: &NdIndex<D>, x: &[f64; D]) -> [i64; D] {
        let cell = self.cell_of(x);
        let lo = bounds.lo();
        let hi = bounds.hi();
        array::from_fn(|d| cell[d].clamp(lo[d], hi[d]))
    }

    /// Center of `cell`.
    pub fn cell_center(&self, cell: &[i64; D]) -> [f64; D] {
        array::from_fn(|d| self.origin[d] + (cell[d] as f64 + 0.5) * self.spacing[d])
    }

    /// Physical region `[lower, upper)` covered by the cells of `range`.
    pub fn region(&self, range: &NdIndex<D>) -> ([f64; D], [f64; D]) {
        let lo = range.lo();
        let hi = range.hi();
        (
            array::from_fn(|d| self.origin[d] + lo[d] as f64 * self.spacing[d]),
            array::from_fn(|d| self.origin[d] + (hi[d] + 1) as f64 * self.spacing[d]),
        )
    }

    /// Whether `x` falls in a cell of `range`.
    pub fn owns(&self, range: &NdIndex<D>, x: &[f64; D]) -> bool {
        range.contains(&self.cell_of(x))
    }

    /// Wrap `x` into the physical region of `global` along periodic dimensions.
    pub fn wrap(&self, global: &NdIndex<D>, periodic: &[bool; D], x: &mut [f64; D]) {
        let (lower, upper) = self.region(global);
        for d in 0..D {
            if !periodic[d] {
                continue;
            }
            let len = upper[d] - lower[d];
            let mut r = (x[d] - lower[d]).rem_euclid(len);
            // rem_euclid can round up to len for tiny negative inputs
            if r >= len {
                r = 0.0;
            }
            x[d] = lower[d] + r;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_mesh() -> Mesh<2> {
        Mesh::from_bounds([0.0, 0.0], [1.0, 2.0], [4, 8]).unwrap()
    }

    #[test]
    fn test_rejects_bad_spacing() {
        assert!(Mesh::<1>::new([0.0], [0.0]).is_err());
        assert!(Mesh::<1>::new([0.0], [f64::NAN]).is_err());
        assert!(Mesh::<2>::from_bounds([0.0, 1.0], [1.0, 1.0], [4, 4]).is_err());
    }

    #[test]
    fn test_cell_faces_belong_to_upper_cell() {
        let m = unit_mesh();
        assert_eq!(m.cell_of(&[0.25, 0.0]), [1, 0]);
        assert_eq!(m.cell_of(&[0.2499, 0.26]), [0, 1]);
        assert_eq!(m.cell_of(&[-0.01, 0.0]), [-1, 0]);
    }

    #[test]
    fn test_region_is_half_open_cover() {
        let m = unit_mesh();
        let r = NdIndex::new([1, 2], [2, 3]).unwrap();
        let (lo, hi) = m.region(&r);
        assert_eq!(lo, [0.25, 0.5]);
        assert_eq!(hi, [0.75, 1.0]);
        assert!(m.owns(&r, &lo));
        assert!(!m.owns(&r, &hi));
    }

    #[test]
    fn test_wrap_only_periodic_dimensions() {
        let m = unit_mesh();
        let global = NdIndex::from_extents([4, 8]).unwrap();
        let mut x = [1.25, -0.5];
        m.wrap(&global, &[true, false], &mut x);
        assert!((x[0] - 0.25).abs() < 1e-12, "x wrapped to {}", x[0]);
        assert_eq!(x[1], -0.5);

        let mut y = [-1e-18, 1.0];
        m.wrap(&global, &[true, true], &mut y);
        assert!(y[0] >= 0.0 && y[0] < 1.0);
        assert!(global.contains(&m.cell_of(&y)));
    }

    #[test]
    fn test_clamped_cell_stays_in_bounds() {
        let m = unit_mesh();
        let global = NdIndex::from_extents([4, 8]).unwrap();
        assert_eq!(m.clamped_cell(&global, &[-3.0, 2.5]), [0, 7]);
        assert_eq!(m.clamped_cell(&global, &[0.6, 0.3]), [2, 1]);
    }

    #[test]
    fn test_cell_center_round_trips() {
        let m = unit_mesh();
        let c = [3, 5];
        assert_eq!(m.cell_of(&m.cell_center(&c)), c);
    }
}
