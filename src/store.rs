//! Weighted accumulation of particle detections into per-`(id, energy bin)`
//! sky maps. Each map is a histogram over the pixels of a fixed internal
//! [RingPixelization]; maps are created lazily on the first detection of a
//! given `(id, bin)` pair and can be accumulated into concurrently.

use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, RwLock,
  },
};

use itertools::Itertools;
use log::{debug, trace};
use rand::Rng;
use rayon::prelude::*;

use crate::{
  energy::EnergyBinner,
  error::Error,
  ring::RingPixelization,
  sampler::{ParticleSampler, RandomParticles},
  Direction,
};

/// Resolution order of the internal pixelization (`nside` = 64, 49152
/// pixels).
pub const DEFAULT_ORDER: u8 = 6;

mod sealed {
  pub trait Sealed {}
  impl Sealed for i32 {}
  impl Sealed for i64 {}
}

/// Integer types accepted as particle ids in bulk insertion.
/// Sealed: ids are exact integers by construction, and floating point values
/// must be converted explicitly through [particle_id_from_f64].
pub trait ExactParticleId: sealed::Sealed + Copy + Sync {
  fn widen(self) -> i64;
}

impl ExactParticleId for i32 {
  #[inline]
  fn widen(self) -> i64 {
    self as i64
  }
}

impl ExactParticleId for i64 {
  #[inline]
  fn widen(self) -> i64 {
    self
  }
}

/// Converts a floating point particle id into an exact integer one.
/// Fails with [Error::NonIntegerId] unless `value` is finite, has no
/// fractional part and fits in an `i64`.
///
/// ```rust
/// use skypix::store::particle_id_from_f64;
///
/// assert_eq!(particle_id_from_f64(12.0).unwrap(), 12);
/// assert!(particle_id_from_f64(12.2).is_err());
/// assert!(particle_id_from_f64(f64::NAN).is_err());
/// ```
pub fn particle_id_from_f64(value: f64) -> Result<i64, Error> {
  if value.is_finite() && value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64
  {
    Ok(value as i64)
  } else {
    Err(Error::NonIntegerId { value })
  }
}

/// A weight histogram over the pixels of the internal pixelization, plus its
/// running total.
struct PixelHistogram {
  weights: Box<[f64]>,
  total: f64,
}

impl PixelHistogram {
  fn new(n_pixels: usize) -> Self {
    Self {
      weights: vec![0.0; n_pixels].into_boxed_slice(),
      total: 0.0,
    }
  }

  fn add(&mut self, pix: u64, weight: f64) {
    self.weights[pix as usize] += weight;
    self.total += weight;
  }
}

/// Snapshot of one `(id, bin)` map, taken under the store read lock.
pub(crate) struct MapSnapshot {
  pub(crate) id: i64,
  pub(crate) bin: i32,
  pub(crate) weights: Vec<f64>,
  pub(crate) total: f64,
}

/// Thread-safe store of weighted particle sky maps, keyed by
/// `(particle id, energy bin)`.
///
/// Insertions on distinct keys proceed in parallel (each map sits behind its
/// own lock); insertions on the same key are serialized. Sampling snapshots
/// the maps, and the snapshot is cached until the next mutation.
///
/// ```rust
/// use skypix::{store::ParticleMapStore, Direction};
///
/// let store = ParticleMapStore::default();
/// store.add_particle_weighted(12, 1e18, Direction::new(0.2, -0.4).unwrap(), 2.5).unwrap();
/// store.add_particle(12, 2e18, Direction::new(0.2, -0.4).unwrap()).unwrap();
/// assert_eq!(store.particle_ids(), vec![12]);
/// assert_eq!(store.energies(12).unwrap().len(), 2);
/// assert_eq!(store.total_weight(), 3.5);
/// ```
pub struct ParticleMapStore {
  pixelization: RingPixelization,
  binner: EnergyBinner,
  maps: RwLock<HashMap<(i64, i32), Mutex<PixelHistogram>>>,
  /// Bumped on every successful insertion; the sampler cache below is keyed
  /// on it so a cached sampler is reused only while the store is unchanged.
  generation: AtomicU64,
  sampler_cache: Mutex<Option<(u64, Arc<ParticleSampler>)>>,
}

impl Default for ParticleMapStore {
  /// Store at order [DEFAULT_ORDER] with the default [EnergyBinner].
  fn default() -> Self {
    Self::with_pixelization(RingPixelization::new_unchecked(DEFAULT_ORDER), EnergyBinner::default())
  }
}

impl ParticleMapStore {
  /// Builds an empty store with the given pixelization order and binning.
  pub fn new(order: u8, binner: EnergyBinner) -> Result<Self, Error> {
    Ok(Self::with_pixelization(RingPixelization::new(order)?, binner))
  }

  fn with_pixelization(pixelization: RingPixelization, binner: EnergyBinner) -> Self {
    Self {
      pixelization,
      binner,
      maps: RwLock::new(HashMap::new()),
      generation: AtomicU64::new(0),
      sampler_cache: Mutex::new(None),
    }
  }

  /// The internal pixelization shared by all maps.
  #[inline]
  pub fn pixelization(&self) -> &RingPixelization {
    &self.pixelization
  }

  /// The energy binning shared by all maps.
  #[inline]
  pub fn binner(&self) -> &EnergyBinner {
    &self.binner
  }

  /// Adds a single detection of weight 1.
  pub fn add_particle(&self, id: i64, energy: f64, dir: Direction) -> Result<(), Error> {
    self.add_particle_weighted(id, energy, dir, 1.0)
  }

  /// Adds a single detection with the given statistical weight
  /// (finite, strictly positive).
  pub fn add_particle_weighted(
    &self,
    id: i64,
    energy: f64,
    dir: Direction,
    weight: f64,
  ) -> Result<(), Error> {
    let weight = check_weight(weight)?;
    let bin = self.binner.bin(energy)?;
    let pix = self.pixelization.hash(dir);
    self.accumulate(id, bin, pix, weight);
    Ok(())
  }

  /// Bulk insertion from parallel arrays (`energies`, `lons`, `lats` and
  /// `weights` must all have the length of `ids`; angles in radians).
  ///
  /// All entries are validated before any of them is applied: either the
  /// whole batch is accumulated, or the store is left untouched and the
  /// first error is returned. Validation and pixel hashing run in parallel.
  pub fn add_particles<I: ExactParticleId>(
    &self,
    ids: &[I],
    energies: &[f64],
    lons: &[f64],
    lats: &[f64],
    weights: &[f64],
  ) -> Result<(), Error> {
    check_len("energies", ids.len(), energies.len())?;
    check_len("lons", ids.len(), lons.len())?;
    check_len("lats", ids.len(), lats.len())?;
    check_len("weights", ids.len(), weights.len())?;
    debug!("accumulating batch of {} particles", ids.len());
    let prepared = (0..ids.len())
      .into_par_iter()
      .map(|k| {
        let weight = check_weight(weights[k])?;
        let bin = self.binner.bin(energies[k])?;
        let dir = Direction::new(lons[k], lats[k])?;
        Ok((ids[k].widen(), bin, self.pixelization.hash(dir), weight))
      })
      .collect::<Result<Vec<_>, Error>>()?;
    for (id, bin, pix, weight) in prepared {
      self.accumulate(id, bin, pix, weight);
    }
    Ok(())
  }

  fn accumulate(&self, id: i64, bin: i32, pix: u64, weight: f64) {
    {
      let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
      if let Some(map) = maps.get(&(id, bin)) {
        map.lock().unwrap_or_else(|e| e.into_inner()).add(pix, weight);
      } else {
        drop(maps);
        trace!("new map for particle id {} in energy bin {}", id, bin);
        let n_pixels = self.pixelization.n_pixels() as usize;
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        maps
          .entry((id, bin))
          .or_insert_with(|| Mutex::new(PixelHistogram::new(n_pixels)))
          .lock()
          .unwrap_or_else(|e| e.into_inner())
          .add(pix, weight);
      }
    }
    // Monotonic counter: the sampler cache only compares values for equality.
    self.generation.fetch_add(1, Ordering::Relaxed);
  }

  /// The distinct particle ids present in the store, in increasing order.
  pub fn particle_ids(&self) -> Vec<i64> {
    let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
    maps.keys().map(|&(id, _)| id).sorted().dedup().collect()
  }

  /// The bin-center energies of the maps recorded for the given id, in
  /// increasing order. Fails with [Error::UnknownParticleId] if the id has
  /// no map at all.
  pub fn energies(&self, id: i64) -> Result<Vec<f64>, Error> {
    let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
    let energies: Vec<f64> = maps
      .keys()
      .filter(|&&(map_id, _)| map_id == id)
      .map(|&(_, bin)| bin)
      .sorted()
      .map(|bin| self.binner.center_energy(bin))
      .collect();
    if energies.is_empty() {
      Err(Error::UnknownParticleId { id })
    } else {
      Ok(energies)
    }
  }

  /// The sky map recorded for `(id, bin(energy))`, normalized so its pixel
  /// values sum to 1.
  pub fn map(&self, id: i64, energy: f64) -> Result<Vec<f64>, Error> {
    let (mut weights, total) = self.raw_map_and_total(id, energy)?;
    for w in weights.iter_mut() {
      *w /= total;
    }
    Ok(weights)
  }

  /// The sky map recorded for `(id, bin(energy))`, as accumulated (pixel
  /// values sum to the total inserted weight of the map).
  pub fn raw_map(&self, id: i64, energy: f64) -> Result<Vec<f64>, Error> {
    self.raw_map_and_total(id, energy).map(|(weights, _)| weights)
  }

  fn raw_map_and_total(&self, id: i64, energy: f64) -> Result<(Vec<f64>, f64), Error> {
    let bin = self.binner.bin(energy)?;
    let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
    match maps.get(&(id, bin)) {
      Some(map) => {
        let map = map.lock().unwrap_or_else(|e| e.into_inner());
        Ok((map.weights.to_vec(), map.total))
      }
      None => {
        if maps.keys().any(|&(map_id, _)| map_id == id) {
          Err(Error::UnknownEnergy { id, energy, bin })
        } else {
          Err(Error::UnknownParticleId { id })
        }
      }
    }
  }

  /// Sum of all inserted weights, over all maps.
  pub fn total_weight(&self) -> f64 {
    let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
    maps
      .values()
      .map(|map| map.lock().unwrap_or_else(|e| e.into_inner()).total)
      .sum()
  }

  /// Snapshot of all maps, ordered by `(id, bin)` so downstream weighted
  /// draws are reproducible under a seeded generator.
  pub(crate) fn snapshot(&self) -> Vec<MapSnapshot> {
    let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
    let mut entries: Vec<MapSnapshot> = maps
      .iter()
      .map(|(&(id, bin), map)| {
        let map = map.lock().unwrap_or_else(|e| e.into_inner());
        MapSnapshot {
          id,
          bin,
          weights: map.weights.to_vec(),
          total: map.total,
        }
      })
      .collect();
    entries.sort_unstable_by_key(|e| (e.id, e.bin));
    entries
  }

  /// The sampler for the current content of the store, rebuilt only if the
  /// store changed since the last call. Fails with [Error::EmptyStore] if no
  /// weight has been inserted yet.
  pub fn sampler(&self) -> Result<Arc<ParticleSampler>, Error> {
    let generation = self.generation.load(Ordering::Relaxed);
    let mut cache = self.sampler_cache.lock().unwrap_or_else(|e| e.into_inner());
    if let Some((cached_generation, sampler)) = cache.as_ref() {
      if *cached_generation == generation {
        return Ok(Arc::clone(sampler));
      }
    }
    debug!("rebuilding the particle sampler (store generation {})", generation);
    let sampler = Arc::new(ParticleSampler::from_store(self)?);
    *cache = Some((generation, Arc::clone(&sampler)));
    Ok(sampler)
  }

  /// Draws `n` particles, each one an `(id, energy, direction)` triple:
  /// maps are selected proportionally to their total weight, a pixel is then
  /// selected proportionally to its weight within the map, and the direction
  /// is drawn uniformly inside that pixel. The returned energy is the bin
  /// center energy of the selected map.
  pub fn random_particles<R: Rng + ?Sized>(
    &self,
    n: usize,
    rng: &mut R,
  ) -> Result<RandomParticles, Error> {
    Ok(self.sampler()?.sample_n(n, rng))
  }
}

fn check_weight(weight: f64) -> Result<f64, Error> {
  if weight.is_finite() && weight > 0.0 {
    Ok(weight)
  } else {
    Err(Error::InvalidWeight { weight })
  }
}

fn check_len(array: &'static str, expected: usize, actual: usize) -> Result<(), Error> {
  if expected == actual {
    Ok(())
  } else {
    Err(Error::LengthMismatch {
      array,
      expected,
      actual,
    })
  }
}
