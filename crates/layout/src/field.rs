//! Ghost-padded field storage.
//!
//! A `Field` holds one `f64` per cell of its owned box grown by the ghost
//! width `g`. Callers address it with global indices; halo exchange and
//! migration address it with local view coordinates, where the padded box
//! starts at 0 and the owned box at `g`. Both map to the same dense storage,
//! dimension 0 fastest.

use std::array;

use crate::error::{LayoutError, Result};
use crate::index::NdIndex;

const VALUE_BYTES: usize = std::mem::size_of::<f64>();

/// How unpacked values combine with the values already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackOp {
    /// Overwrite
    Assign,
    /// Add into
    Add,
}

impl UnpackOp {
    #[inline]
    fn apply(self, slot: &mut f64, value: f64) {
        match self {
            UnpackOp::Assign => *slot = value,
            UnpackOp::Add => *slot += value,
        }
    }
}

/// Dense field over an owned box plus `g` ghost layers.
#[derive(Debug, Clone, PartialEq)]
pub struct Field<const D: usize> {
    owned: NdIndex<D>,
    ghost_width: usize,
    /// Padded box in local view coordinates, starting at zero.
    view: NdIndex<D>,
    data: Vec<f64>,
}

impl<const D: usize> Field<D> {
    /// Zero-filled field over `owned` with `ghost_width` ghost layers.
    pub fn new(owned: NdIndex<D>, ghost_width: usize) -> Self {
        let padded = owned.grow(ghost_width);
        let view = padded.translate(padded.lo().map(|l| -l));
        Self {
            owned,
            ghost_width,
            view,
            data: vec![0.0; view.volume()],
        }
    }

    /// Owned box in global coordinates.
    pub fn owned(&self) -> &NdIndex<D> {
        &self.owned
    }

    /// Ghost width.
    pub fn ghost_width(&self) -> usize {
        self.ghost_width
    }

    /// Owned box grown by the ghost width, in global coordinates.
    pub fn padded(&self) -> NdIndex<D> {
        self.owned.grow(self.ghost_width)
    }

    /// Owned box in local view coordinates.
    pub fn local_owned(&self) -> NdIndex<D> {
        self.to_local(&self.owned)
    }

    /// Global box to local view coordinates.
    pub fn to_local(&self, range: &NdIndex<D>) -> NdIndex<D> {
        let g = self.ghost_width as i64;
        let lo = self.owned.lo();
        range.translate(array::from_fn(|d| g - lo[d]))
    }

    /// Raw storage, dimension 0 fastest over the padded box.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    fn local_point(&self, global: &[i64; D]) -> [i64; D] {
        let g = self.ghost_width as i64;
        let lo = self.owned.lo();
        array::from_fn(|d| global[d] - lo[d] + g)
    }

    fn out_of_range(global: &[i64; D], region: &NdIndex<D>) -> LayoutError {
        LayoutError::OutOfRange {
            index: global.to_vec(),
            region: region.to_string(),
        }
    }

    /// Value at a global index of the padded box.
    pub fn get(&self, global: &[i64; D]) -> Option<f64> {
        let p = self.local_point(global);
        self.view
            .contains(&p)
            .then(|| self.data[self.view.offset_of(&p)])
    }

    /// Overwrite an owned cell. Ghost cells are only written by exchange.
    pub fn set(&mut self, global: &[i64; D], value: f64) -> Result<()> {
        if !self.owned.contains(global) {
            return Err(Self::out_of_range(global, &self.owned));
        }
        let i = self.view.offset_of(&self.local_point(global));
        self.data[i] = value;
        Ok(())
    }

    /// Add a contribution anywhere in the padded box.
    ///
    /// Contributions landing in ghost cells are summed into their owners by
    /// `accumulate_halo`.
    pub fn deposit(&mut self, global: &[i64; D], value: f64) -> Result<()> {
        let p = self.local_point(global);
        if !self.view.contains(&p) {
            return Err(Self::out_of_range(global, &self.padded()));
        }
        let i = self.view.offset_of(&p);
        self.data[i] += value;
        Ok(())
    }

    /// Set every owned cell from its global index.
    pub fn init_owned(&mut self, f: impl Fn([i64; D]) -> f64) {
        let g = self.ghost_width as i64;
        let lo = self.owned.lo();
        for p in self.owned.iter() {
            let local = array::from_fn(|d| p[d] - lo[d] + g);
            let i = self.view.offset_of(&local);
            self.data[i] = f(p);
        }
    }

    /// Global index and value of every owned cell.
    pub fn owned_values(&self) -> impl Iterator<Item = ([i64; D], f64)> + '_ {
        self.owned.iter().map(move |p| {
            let i = self.view.offset_of(&self.local_point(&p));
            (p, self.data[i])
        })
    }

    /// Sum over owned cells.
    pub fn owned_sum(&self) -> f64 {
        self.owned_values().map(|(_, v)| v).sum()
    }

    /// Sum over the whole padded box, ghosts included.
    pub fn padded_sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Zero every ghost cell.
    pub fn clear_ghosts(&mut self) {
        let interior = self.local_owned();
        for p in self.view.iter() {
            if !interior.contains(&p) {
                let i = self.view.offset_of(&p);
                self.data[i] = 0.0;
            }
        }
    }

    fn check_local(&self, range: &NdIndex<D>) -> Result<()> {
        if self.view.contains_box(range) {
            Ok(())
        } else {
            Err(LayoutError::OutOfRange {
                index: range.lo().to_vec(),
                region: self.view.to_string(),
            })
        }
    }

    /// Append the values of `range` (local coordinates) to `buf` as raw bytes.
    pub fn pack(&self, range: &NdIndex<D>, buf: &mut Vec<u8>) -> Result<()> {
        self.check_local(range)?;
        let row = range.extent(0);
        for start in range.rows() {
            let i = self.view.offset_of(&start);
            buf.extend_from_slice(bytemuck::cast_slice(&self.data[i..i + row]));
        }
        Ok(())
    }

    /// Combine raw bytes produced by [`Field::pack`] into `range`.
    ///
    /// The byte length must match the region exactly.
    pub fn unpack(&mut self, range: &NdIndex<D>, bytes: &[u8], op: UnpackOp) -> Result<()> {
        self.check_local(range)?;
        let expected = range.volume() * VALUE_BYTES;
        if bytes.len() != expected {
            return Err(LayoutError::SizeMismatch {
                expected,
                received: bytes.len(),
            });
        }
        let row = range.extent(0);
        let mut values = bytes
            .chunks_exact(VALUE_BYTES)
            .map(bytemuck::pod_read_unaligned::<f64>);
        for start in range.rows() {
            let i = self.view.offset_of(&start);
            for (slot, value) in self.data[i..i + row].iter_mut().zip(values.by_ref()) {
                op.apply(slot, value);
            }
        }
        Ok(())
    }

    /// Combine the values of local box `src` into local box `dst` of the same shape.
    pub fn copy_region(&mut self, src: &NdIndex<D>, dst: &NdIndex<D>, op: UnpackOp) -> Result<()> {
        self.check_local(src)?;
        self.check_local(dst)?;
        if src.extents() != dst.extents() {
            return Err(LayoutError::SizeMismatch {
                expected: dst.volume() * VALUE_BYTES,
                received: src.volume() * VALUE_BYTES,
            });
        }
        let row = src.extent(0);
        for (s, t) in src.rows().zip(dst.rows()) {
            let si = self.view.offset_of(&s);
            let ti = self.view.offset_of(&t);
            match op {
                UnpackOp::Assign => self.data.copy_within(si..si + row, ti),
                UnpackOp::Add => {
                    for k in 0..row {
                        let v = self.data[si + k];
                        self.data[ti + k] += v;
                    }
                }
            }
        }
        Ok(())
    }
}
