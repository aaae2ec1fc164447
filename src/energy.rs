//! Logarithmic energy binning: a fixed number of bins per decade between a
//! minimum and a maximum energy, with a configurable policy for energies
//! falling outside the covered range.

use crate::error::Error;

/// What to do with a finite, positive energy falling outside the covered
/// range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfRange {
  /// Assign the closest bin (the first or the last one).
  Clamp,
  /// Fail with [Error::EnergyOutOfRange].
  Reject,
}

/// Maps energies to logarithmically spaced bin indices.
///
/// The default covers `10^17.5` to `10^21.5` eV with 50 bins per decade
/// (200 bins of width 0.02 in `log10(E)`), clamping out-of-range energies.
///
/// ```rust
/// use skypix::energy::EnergyBinner;
///
/// let binner = EnergyBinner::default();
/// assert_eq!(binner.n_bins(), 200);
/// assert_eq!(binner.bin(1e18).unwrap(), 25);
/// let center = binner.center_energy(25);
/// assert_eq!(binner.bin(center).unwrap(), 25);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyBinner {
  /// `log10` of the lower edge of bin 0.
  log10_min: f64,
  bins_per_decade: u32,
  n_bins: i32,
  policy: OutOfRange,
}

impl Default for EnergyBinner {
  fn default() -> Self {
    Self {
      log10_min: 17.5,
      bins_per_decade: 50,
      n_bins: 200,
      policy: OutOfRange::Clamp,
    }
  }
}

impl EnergyBinner {
  /// Builds a binner covering `[min_energy, max_energy)` with
  /// `bins_per_decade` bins per factor of ten. The number of bins is the
  /// smallest count covering the range, so the upper edge of the last bin
  /// may exceed `max_energy`.
  pub fn new(
    min_energy: f64,
    max_energy: f64,
    bins_per_decade: u32,
    policy: OutOfRange,
  ) -> Result<Self, Error> {
    if !(min_energy.is_finite() && min_energy > 0.0) {
      return Err(Error::InvalidBinning {
        msg: format!("min energy must be finite and > 0, got {}", min_energy),
      });
    }
    if !(max_energy.is_finite() && max_energy > min_energy) {
      return Err(Error::InvalidBinning {
        msg: format!(
          "max energy must be finite and > min energy ({}), got {}",
          min_energy, max_energy
        ),
      });
    }
    if bins_per_decade == 0 {
      return Err(Error::InvalidBinning {
        msg: String::from("bins per decade must be > 0"),
      });
    }
    let log10_min = min_energy.log10();
    let n_bins = ((max_energy.log10() - log10_min) * bins_per_decade as f64).ceil() as i32;
    let n_bins = n_bins.max(1);
    Ok(Self {
      log10_min,
      bins_per_decade,
      n_bins,
      policy,
    })
  }

  /// Number of bins; valid bin indices are `0..n_bins()`.
  #[inline]
  pub fn n_bins(&self) -> i32 {
    self.n_bins
  }

  /// Lower edge of bin 0.
  #[inline]
  pub fn min_energy(&self) -> f64 {
    10_f64.powf(self.log10_min)
  }

  /// Upper edge of the last bin.
  #[inline]
  pub fn max_energy(&self) -> f64 {
    10_f64.powf(self.log10_min + self.n_bins as f64 / self.bins_per_decade as f64)
  }

  /// Returns the index of the bin containing `energy`.
  /// Non-finite or non-positive energies are always rejected; finite,
  /// positive energies outside the covered range follow the [OutOfRange]
  /// policy the binner was built with.
  pub fn bin(&self, energy: f64) -> Result<i32, Error> {
    if !(energy.is_finite() && energy > 0.0) {
      return Err(Error::InvalidEnergy { energy });
    }
    let bin = ((energy.log10() - self.log10_min) * self.bins_per_decade as f64).floor() as i32;
    if (0..self.n_bins).contains(&bin) {
      Ok(bin)
    } else {
      match self.policy {
        OutOfRange::Clamp => Ok(bin.clamp(0, self.n_bins - 1)),
        OutOfRange::Reject => Err(Error::EnergyOutOfRange {
          energy,
          min: self.min_energy(),
          max: self.max_energy(),
        }),
      }
    }
  }

  /// Energy at the (logarithmic) center of the given bin.
  /// The index is not checked: out-of-range indices extrapolate the grid.
  pub fn center_energy(&self, bin: i32) -> f64 {
    10_f64.powf(self.log10_min + (bin as f64 + 0.5) / self.bins_per_decade as f64)
  }
}
