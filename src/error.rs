use thiserror::Error;

/// Coarse classification of [Error] variants, mostly useful for callers that
/// only care about retry/report decisions, not about the exact failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// The input violates a documented precondition.
  InvalidArgument,
  /// The queried id or (id, energy) pair was never inserted.
  NotFound,
  /// The store holds no accumulated weight, there is nothing to sample from.
  EmptyStore,
}

#[derive(Error, Debug)]
pub enum Error {
  #[error("Invalid pixelization order. Max expected: {max:}. Actual: {order:}.")]
  InvalidOrder { order: u8, max: u8 },
  #[error("Pixel index out of range. Expected in [0, {n_pix:}). Actual: {pix:}.")]
  PixelOutOfRange { pix: u64, n_pix: u64 },
  #[error("Wrong latitude. Expected finite value in [-pi/2, pi/2]. Actual: {lat:}.")]
  InvalidLatitude { lat: f64 },
  #[error("Wrong longitude. Expected finite value. Actual: {lon:}.")]
  InvalidLongitude { lon: f64 },
  #[error("Direction vector has zero (or non-finite) norm.")]
  ZeroNormVector,
  #[error("Particle id is not an exact integer: {value:}.")]
  NonIntegerId { value: f64 },
  #[error("Batch array length mismatch for '{array:}'. Expected: {expected:}. Actual: {actual:}.")]
  LengthMismatch {
    array: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("Invalid energy binning: {msg:}.")]
  InvalidBinning { msg: String },
  #[error("Energy must be positive and finite. Actual: {energy:}.")]
  InvalidEnergy { energy: f64 },
  #[error("Energy {energy:} out of the configured range [{min:}, {max:}).")]
  EnergyOutOfRange { energy: f64, min: f64, max: f64 },
  #[error("Weight must be positive and finite. Actual: {weight:}.")]
  InvalidWeight { weight: f64 },
  #[error("No particles recorded for id {id:}.")]
  UnknownParticleId { id: i64 },
  #[error("No map recorded for id {id:} in energy bin {bin:} (queried energy: {energy:}).")]
  UnknownEnergy { id: i64, energy: f64, bin: i32 },
  #[error("The store contains no accumulated weight.")]
  EmptyStore,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::UnknownParticleId { .. } | Error::UnknownEnergy { .. } => ErrorKind::NotFound,
      Error::EmptyStore => ErrorKind::EmptyStore,
      _ => ErrorKind::InvalidArgument,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn testok_kinds() {
    assert_eq!(
      Error::InvalidOrder { order: 30, max: 29 }.kind(),
      ErrorKind::InvalidArgument
    );
    assert_eq!(
      Error::UnknownParticleId { id: 12 }.kind(),
      ErrorKind::NotFound
    );
    assert_eq!(Error::EmptyStore.kind(), ErrorKind::EmptyStore);
  }
}
