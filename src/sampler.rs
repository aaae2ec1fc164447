//! Weighted random draws from the maps of a [ParticleMapStore]: a map is
//! selected proportionally to its total weight, then a pixel proportionally
//! to its weight within the map, then a direction uniformly inside the
//! pixel.

use rand::{
  distributions::{Distribution, WeightedIndex},
  Rng,
};

use crate::{error::Error, ring::RingPixelization, store::ParticleMapStore, Direction};

/// A batch of drawn particles, in parallel arrays (angles in radians,
/// energies are bin center energies).
#[derive(Debug, Clone, Default)]
pub struct RandomParticles {
  pub ids: Vec<i64>,
  pub energies: Vec<f64>,
  pub lons: Vec<f64>,
  pub lats: Vec<f64>,
}

impl RandomParticles {
  fn with_capacity(n: usize) -> Self {
    Self {
      ids: Vec::with_capacity(n),
      energies: Vec::with_capacity(n),
      lons: Vec::with_capacity(n),
      lats: Vec::with_capacity(n),
    }
  }

  pub fn len(&self) -> usize {
    self.ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ids.is_empty()
  }
}

struct SamplerEntry {
  id: i64,
  energy: f64,
  pixels: WeightedIndex<f64>,
}

/// Immutable snapshot of a store's maps with precomputed cumulative weight
/// tables. Draws from it reflect the store content at construction time,
/// whatever is inserted afterwards; [ParticleMapStore::random_particles]
/// rebuilds it lazily when the store changed.
pub struct ParticleSampler {
  pixelization: RingPixelization,
  entries: Vec<SamplerEntry>,
  by_total: WeightedIndex<f64>,
}

impl ParticleSampler {
  /// Snapshots the given store. Fails with [Error::EmptyStore] if the store
  /// holds no weight.
  pub fn from_store(store: &ParticleMapStore) -> Result<Self, Error> {
    let binner = *store.binner();
    let snapshot = store.snapshot();
    let mut entries = Vec::with_capacity(snapshot.len());
    let mut totals = Vec::with_capacity(snapshot.len());
    for map in snapshot {
      if map.total > 0.0 {
        entries.push(SamplerEntry {
          id: map.id,
          energy: binner.center_energy(map.bin),
          pixels: WeightedIndex::new(map.weights).map_err(|_| Error::EmptyStore)?,
        });
        totals.push(map.total);
      }
    }
    if entries.is_empty() {
      return Err(Error::EmptyStore);
    }
    Ok(Self {
      pixelization: *store.pixelization(),
      entries,
      by_total: WeightedIndex::new(totals).map_err(|_| Error::EmptyStore)?,
    })
  }

  /// Draws one particle: `(id, bin center energy, direction)`.
  pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> (i64, f64, Direction) {
    let entry = &self.entries[self.by_total.sample(rng)];
    let pix = entry.pixels.sample(rng) as u64;
    let dir = self.pixelization.random_in_cell_unchecked(pix, rng);
    (entry.id, entry.energy, dir)
  }

  /// Draws `n` particles into parallel arrays.
  pub fn sample_n<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> RandomParticles {
    let mut drawn = RandomParticles::with_capacity(n);
    for _ in 0..n {
      let (id, energy, dir) = self.sample(rng);
      drawn.ids.push(id);
      drawn.energies.push(energy);
      drawn.lons.push(dir.lon());
      drawn.lats.push(dir.lat());
    }
    drawn
  }
}
