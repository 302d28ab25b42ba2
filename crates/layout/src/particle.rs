//! Particle storage using a struct-of-arrays layout.
//!
//! Ids, positions and every attribute are parallel arrays: slot `i` across
//! all of them is the same particle. Attributes are named `f64` arrays with a
//! fixed per-particle width (1 for scalars, D for vectors, ...). The schema is
//! the same on every rank so records can be shipped as flat byte buffers.

use crate::error::{LayoutError, Result};

const WORD: usize = 8;

/// One named per-particle attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Attribute name, unique within a container
    pub name: String,
    /// Values per particle
    pub width: usize,
    /// `width` values per particle, particle-major
    pub values: Vec<f64>,
}

impl Attribute {
    /// Values of particle `i`.
    pub fn get(&self, i: usize) -> &[f64] {
        &self.values[i * self.width..(i + 1) * self.width]
    }

    /// Mutable values of particle `i`.
    pub fn get_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.values[i * self.width..(i + 1) * self.width]
    }

    fn swap_remove(&mut self, i: usize) {
        let w = self.width;
        if w == 0 {
            return;
        }
        let last = self.values.len() / w - 1;
        if i != last {
            self.values.copy_within(last * w..(last + 1) * w, i * w);
        }
        self.values.truncate(last * w);
    }
}

/// Struct-of-arrays particle storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleArrays<const D: usize> {
    /// Global particle ids
    pub ids: Vec<u64>,
    /// Positions in physical units
    pub positions: Vec<[f64; D]>,
    attributes: Vec<Attribute>,
}

impl<const D: usize> ParticleArrays<D> {
    /// Create an empty container with no attributes.
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            positions: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Create an empty container with the given `(name, width)` schema.
    pub fn with_attributes(schema: &[(&str, usize)]) -> Self {
        let mut pa = Self::new();
        for &(name, width) in schema {
            pa.add_attribute(name, width);
        }
        pa
    }

    /// Add an attribute, zero-filled for particles already stored.
    ///
    /// Re-adding an existing name leaves the container unchanged.
    pub fn add_attribute(&mut self, name: &str, width: usize) {
        if self.attributes.iter().any(|a| a.name == name) {
            return;
        }
        self.attributes.push(Attribute {
            name: name.to_string(),
            width,
            values: vec![0.0; width * self.len()],
        });
    }

    /// Return the number of particles currently stored.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Return `true` if there are no particles.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Append one particle. `values` holds every attribute in schema order.
    pub fn push(&mut self, id: u64, position: [f64; D], values: &[f64]) -> Result<()> {
        let expected = self.record_width();
        if values.len() != expected {
            return Err(LayoutError::RecordWidth {
                expected,
                got: values.len(),
            });
        }
        self.ids.push(id);
        self.positions.push(position);
        let mut rest = values;
        for attr in &mut self.attributes {
            let (mine, tail) = rest.split_at(attr.width);
            attr.values.extend_from_slice(mine);
            rest = tail;
        }
        Ok(())
    }

    /// All attributes in schema order.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Attribute by name.
    pub fn attribute(&self, name: &str) -> Result<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| LayoutError::UnknownAttribute(name.to_string()))
    }

    /// `(name, width)` of every attribute.
    pub fn schema(&self) -> Vec<(String, usize)> {
        self.attributes
            .iter()
            .map(|a| (a.name.clone(), a.width))
            .collect()
    }

    /// Attribute values per particle.
    pub fn record_width(&self) -> usize {
        self.attributes.iter().map(|a| a.width).sum()
    }

    /// Bytes one particle occupies in a transfer buffer.
    pub fn record_bytes(&self) -> usize {
        WORD * (1 + D + self.record_width())
    }

    /// Every attribute value of particle `i`, in schema order.
    pub fn values(&self, i: usize) -> Vec<f64> {
        self.attributes
            .iter()
            .flat_map(|a| a.get(i).iter().copied())
            .collect()
    }

    /// Append the records at `slots` to `buf`.
    ///
    /// The layout is section-major: all ids, then all positions, then each
    /// attribute in schema order.
    pub fn pack_records(&self, slots: &[usize], buf: &mut Vec<u8>) {
        buf.reserve(slots.len() * self.record_bytes());
        for &i in slots {
            buf.extend_from_slice(bytemuck::bytes_of(&self.ids[i]));
        }
        for &i in slots {
            buf.extend_from_slice(bytemuck::cast_slice(&self.positions[i][..]));
        }
        for attr in &self.attributes {
            for &i in slots {
                buf.extend_from_slice(bytemuck::cast_slice(attr.get(i)));
            }
        }
    }

    /// Append `count` records packed by [`ParticleArrays::pack_records`].
    pub fn unpack_records(&mut self, bytes: &[u8], count: usize) -> Result<()> {
        let expected = count * self.record_bytes();
        if bytes.len() != expected {
            return Err(LayoutError::SizeMismatch {
                expected,
                received: bytes.len(),
            });
        }
        let mut words = bytes.chunks_exact(WORD);

        self.ids.reserve(count);
        for chunk in words.by_ref().take(count) {
            self.ids.push(bytemuck::pod_read_unaligned::<u64>(chunk));
        }
        self.positions.reserve(count);
        for _ in 0..count {
            let mut p = [0.0; D];
            for (x, chunk) in p.iter_mut().zip(words.by_ref()) {
                *x = bytemuck::pod_read_unaligned::<f64>(chunk);
            }
            self.positions.push(p);
        }
        for attr in &mut self.attributes {
            let n = count * attr.width;
            attr.values.reserve(n);
            for chunk in words.by_ref().take(n) {
                attr.values.push(bytemuck::pod_read_unaligned::<f64>(chunk));
            }
        }
        Ok(())
    }

    /// Remove the particles at `slots` (ascending, distinct).
    ///
    /// Slots are removed from the highest down with swap-remove, so the
    /// order of the surviving particles is not preserved.
    pub fn remove(&mut self, slots: &[usize]) {
        debug_assert!(slots.windows(2).all(|w| w[0] < w[1]), "slots must be ascending");
        for &i in slots.iter().rev() {
            self.ids.swap_remove(i);
            self.positions.swap_remove(i);
            for attr in &mut self.attributes {
                attr.swap_remove(i);
            }
        }
    }
}

impl<const D: usize> Default for ParticleArrays<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParticleArrays<2> {
        let mut pa = ParticleArrays::with_attributes(&[("charge", 1), ("velocity", 2)]);
        for i in 0..5u64 {
            let f = i as f64;
            pa.push(i, [f, -f], &[f * 0.1, f, f + 0.5]).unwrap();
        }
        pa
    }

    #[test]
    fn empty_particle_arrays() {
        let pa = ParticleArrays::<3>::new();
        assert_eq!(pa.len(), 0);
        assert!(pa.is_empty());
        assert_eq!(pa.record_bytes(), 32);
    }

    #[test]
    fn push_checks_record_width() {
        let mut pa = sample();
        assert_eq!(
            pa.push(9, [0.0, 0.0], &[1.0]).unwrap_err(),
            LayoutError::RecordWidth { expected: 3, got: 1 }
        );
        assert_eq!(pa.len(), 5);
        assert_eq!(pa.attribute("velocity").unwrap().get(3), &[3.0, 3.5]);
        assert!(pa.attribute("mass").is_err());
    }

    #[test]
    fn late_attribute_is_zero_filled() {
        let mut pa = sample();
        pa.add_attribute("weight", 1);
        assert_eq!(pa.attribute("weight").unwrap().values, vec![0.0; 5]);
        assert_eq!(pa.record_width(), 4);
    }

    #[test]
    fn records_survive_transfer() {
        let pa = sample();
        let mut buf = Vec::new();
        pa.pack_records(&[1, 4], &mut buf);
        assert_eq!(buf.len(), 2 * pa.record_bytes());

        let mut other = ParticleArrays::with_attributes(&[("charge", 1), ("velocity", 2)]);
        other.unpack_records(&buf, 2).unwrap();
        assert_eq!(other.ids, vec![1, 4]);
        assert_eq!(other.positions[1], [4.0, -4.0]);
        assert_eq!(other.values(0), pa.values(1));
        assert_eq!(other.values(1), pa.values(4));
    }

    #[test]
    fn unpack_rejects_short_buffer() {
        let mut pa = sample();
        let err = pa.unpack_records(&[0u8; 40], 1).unwrap_err();
        assert_eq!(err, LayoutError::SizeMismatch { expected: 48, received: 40 });
        assert_eq!(pa.len(), 5);
    }

    #[test]
    fn remove_keeps_attributes_co_indexed() {
        let mut pa = sample();
        pa.remove(&[0, 2, 4]);
        assert_eq!(pa.len(), 2);
        let mut ids = pa.ids.clone();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 3]);
        for i in 0..pa.len() {
            let f = pa.ids[i] as f64;
            assert_eq!(pa.positions[i], [f, -f]);
            assert_eq!(pa.values(i), vec![f * 0.1, f, f + 0.5]);
        }
    }
}
