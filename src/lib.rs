//! Equal-area discretization of the celestial sphere (HEALPix compatible,
//! RING scheme) together with weighted particle sky-map histograms and
//! weighted resampling, as used in cosmic-ray arrival-direction analysis.
//! See:
//! * Gorski2005: "HEALPix: A Framework for High-Resolution Discretization and Fast Analysis of Data
//!               Distributed on the Sphere", Gorski, K. M. et al., 2005; 2005ApJ...622..759G.
//! * Calabretta2007: "Mapping on the HEALPix grid", Calabretta, M. R. et Roukema, B. F., 2007; 2007MNRAS.381..865C
//!
//! The crate is organized bottom up:
//! * [ring]: direction to pixel mapping and back, plus uniform in-pixel draws;
//! * [energy]: logarithmic energy binning;
//! * [store]: weighted accumulation of detections into per-(id, energy bin) pixel maps;
//! * [sampler]: weighted random (id, energy, direction) draws from the accumulated maps.
//!
//! ```rust
//! use rand::SeedableRng;
//! use skypix::{store::ParticleMapStore, Direction};
//!
//! let store = ParticleMapStore::default();
//! store.add_particle(12, 1e18, Direction::new(0.0, 0.0).unwrap()).unwrap();
//! assert_eq!(store.particle_ids(), vec![12]);
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(1);
//! let drawn = store.random_particles(10, &mut rng).unwrap();
//! assert_eq!(drawn.ids, vec![12; 10]);
//! ```

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

pub mod energy;
pub mod error;
pub mod ring;
pub mod sampler;
pub mod store;

pub use crate::error::{Error, ErrorKind};

/// Constant = sqrt(6), used by the Collignon (polar caps) projection.
pub const SQRT6: f64 = 2.449_489_742_783_178_f64;
const ONE_OVER_SQRT6: f64 = 0.408_248_290_463_863_f64;
const HALF: f64 = 0.5_f64;

/// Upper limit on sqrt(3(1-|z|)) to consider that we are not near from the poles.
const EPS_POLE: f64 = 1e-13_f64;

/// Constant = 2 * pi.
pub const TWICE_PI: f64 = 2.0 * PI;

/// Constant = 4 / pi.
pub const FOUR_OVER_PI: f64 = 4_f64 / PI;

/// Largest supported pixelization order: the RING pixel index of any order in
/// `[0, 29]` fits in an `u64` (and the in-ring arithmetic in an `i64`).
pub const ORDER_MAX: u8 = 29;

/// Limit on the latitude (in radians) between the equatorial region and the
/// polar caps, i.e. asin(2/3).
pub const TRANSITION_LATITUDE: f64 = 0.729_727_656_226_966_3_f64;
/// Limit on |z|=|sin(lat)| between the equatorial region and the polar caps,
/// see Eq. (1) in Gorski2005.
pub const TRANSITION_Z: f64 = 2_f64 / 3_f64;
/// Inverse of [TRANSITION_Z], i.e. 1.5.
pub const ONE_OVER_TRANSITION_Z: f64 = 1.5_f64;

/// Mask to keep only the f64 sign.
const F64_SIGN_BIT_MASK: u64 = 0x8000000000000000;
/// Equals !F64_SIGN_BIT_MASK (the inverse of the f64 sign mask).
const F64_BUT_SIGN_BIT_MASK: u64 = 0x7FFFFFFFFFFFFFFF;

/// Returns `nside` = 2^`order`, the number of cells along both axes of a
/// base-resolution cell.
///
/// ```rust
/// use skypix::nside;
/// assert_eq!(1, nside(0));
/// assert_eq!(64, nside(6));
/// assert_eq!(536870912, nside(29));
/// ```
#[inline]
pub const fn nside(order: u8) -> u32 {
  1_u32 << order
}

/// Returns the number of pixels the unit sphere is divided in at the given
/// order, i.e. `12 * nside^2`.
///
/// ```rust
/// use skypix::n_pix;
/// assert_eq!(12, n_pix(0));
/// assert_eq!(49152, n_pix(6));
/// ```
#[inline]
pub const fn n_pix(order: u8) -> u64 {
  12_u64 << (order << 1)
}

/// A point on the unit sphere: longitude in `(-pi, pi]` and latitude in
/// `[-pi/2, pi/2]`, both in radians. Immutable value type; construction
/// wraps the longitude and validates the latitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Direction {
  lon: f64,
  lat: f64,
}

impl Direction {
  /// Builds a direction from `(lon, lat)` in radians.
  /// The longitude is wrapped into `(-pi, pi]` (so both `-pi` and `pi`
  /// denote the same, single direction); the latitude must be a finite
  /// value in `[-pi/2, pi/2]`.
  pub fn new(lon: f64, lat: f64) -> Result<Self, Error> {
    if !lon.is_finite() {
      return Err(Error::InvalidLongitude { lon });
    }
    check_lat_res(lat)?;
    let mut lon = lon.rem_euclid(TWICE_PI);
    if lon > PI {
      lon -= TWICE_PI;
    }
    Ok(Self { lon, lat })
  }

  /// Wraps the longitude without validating the inputs; for internal use on
  /// values known to be finite with an in-range latitude.
  pub(crate) fn wrap_unchecked(lon: f64, lat: f64) -> Self {
    let mut lon = lon.rem_euclid(TWICE_PI);
    if lon > PI {
      lon -= TWICE_PI;
    }
    Self { lon, lat }
  }

  /// Builds a direction from a (not necessarily normalized) 3D vector.
  pub fn from_vect(x: f64, y: f64, z: f64) -> Result<Self, Error> {
    let norm = (x * x + y * y + z * z).sqrt();
    if !norm.is_finite() || norm == 0.0 {
      return Err(Error::ZeroNormVector);
    }
    Self::new(y.atan2(x), (z / norm).clamp(-1.0, 1.0).asin())
  }

  /// Longitude in `(-pi, pi]` radians.
  #[inline]
  pub fn lon(&self) -> f64 {
    self.lon
  }

  /// Latitude in `[-pi/2, pi/2]` radians.
  #[inline]
  pub fn lat(&self) -> f64 {
    self.lat
  }

  /// The corresponding unit vector `[x, y, z]`.
  pub fn unit_vect(&self) -> [f64; 3] {
    let (sin_lon, cos_lon) = self.lon.sin_cos();
    let (sin_lat, cos_lat) = self.lat.sin_cos();
    [cos_lat * cos_lon, cos_lat * sin_lon, sin_lat]
  }
}

/// Performs the HEALPix projection: `(x, y) = proj(lon, lat)`.
/// The chosen scale is such that base cell vertices and center coordinates
/// are integers and the distance from a cell center to its vertices equals
/// one: `lon` in `[0, 2pi]` leads to `x` in `[0, 8]` (`lon` in `[-2pi, 0]` to
/// `x` in `[-8, 0]`) and `y` is in `[-2, 2]`.
/// The projection is equal-area: uniform densities on the sphere map to
/// uniform densities on the plane (the property in-pixel sampling relies on).
///
/// # Panics
/// If `lat` **not in** `[-pi/2, pi/2]`.
///
/// ```rust
/// use skypix::{proj, TRANSITION_LATITUDE};
/// use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
///
/// assert_eq!((0.0, 0.0), proj(0.0, 0.0));
/// let (x, y) = proj(FRAC_PI_2, TRANSITION_LATITUDE);
/// assert!((x - 2.0).abs() < 1e-15 && (y - 1.0).abs() < 1e-15);
/// let (x, y) = proj(FRAC_PI_4, FRAC_PI_2);
/// assert!((x - 1.0).abs() < 1e-15 && (y - 2.0).abs() < 1e-15);
/// ```
#[inline]
pub fn proj(lon: f64, lat: f64) -> (f64, f64) {
  check_lat(lat);
  let lon = abs_sign_decompose(lon);
  let lat = abs_sign_decompose(lat);
  let x = pm1_offset_decompose(lon.abs * FOUR_OVER_PI);
  let mut xy = (x.pm1, lat.abs);
  if is_in_equatorial_region(lat.abs) {
    proj_cea(&mut xy);
  } else {
    proj_collignon(&mut xy);
  }
  apply_offset_and_signs(&mut xy, x.offset, lon.sign, lat.sign);
  xy
}

/// Unprojects the given HEALPix projected point: `x` in `[0, 8]` leads to
/// `lon` in `[0, 2pi]` (`x` in `[-8, 0]` to `lon` in `[-2pi, 0]`), `lat` is
/// always in `[-pi/2, pi/2]`.
///
/// # Panics
/// If `y` **not in** `[-2, 2]`.
///
/// ```rust
/// use skypix::{proj, unproj};
///
/// for &(lon, lat) in &[(0.1, 0.2), (2.8, -1.4), (5.2, 0.8), (3.1, -0.2)] {
///   let (x, y) = proj(lon, lat);
///   let (lon2, lat2) = unproj(x, y);
///   assert!((lon - lon2).abs() < 1e-13 && (lat - lat2).abs() < 1e-14);
/// }
/// ```
#[inline]
pub fn unproj(x: f64, y: f64) -> (f64, f64) {
  check_y(y);
  let x = abs_sign_decompose(x);
  let y = abs_sign_decompose(y);
  let lon = pm1_offset_decompose(x.abs);
  let mut lonlat = (lon.pm1, y.abs);
  if is_in_projected_equatorial_region(y.abs) {
    deproj_cea(&mut lonlat);
  } else {
    deproj_collignon(&mut lonlat);
  }
  apply_offset_and_signs(&mut lonlat, lon.offset, x.sign, y.sign);
  lonlat.0 *= FRAC_PI_4;
  lonlat
}

/// Verify that the latitude is in [-PI/2, PI/2], panics if not.
#[inline]
fn check_lat(lat: f64) {
  assert!((-FRAC_PI_2..=FRAC_PI_2).contains(&lat));
}

/// Same as [check_lat], reporting an [Error] instead of panicking.
#[inline]
pub(crate) fn check_lat_res(lat: f64) -> Result<(), Error> {
  if (-FRAC_PI_2..=FRAC_PI_2).contains(&lat) {
    Ok(())
  } else {
    Err(Error::InvalidLatitude { lat })
  }
}

/// Verify that the projected y coordinate is in [-2, 2], panics if not.
#[inline]
fn check_y(y: f64) {
  assert!((-2_f64..=2_f64).contains(&y));
}

/// Returns `true` if the point of given (absolute value of) latitude is in
/// the equatorial region, `false` if it is in one of the two polar caps.
#[inline]
fn is_in_equatorial_region(abs_lat: f64) -> bool {
  abs_lat <= TRANSITION_LATITUDE
}

/// Same as [is_in_equatorial_region] for the (absolute value of the)
/// projected y coordinate.
#[inline]
fn is_in_projected_equatorial_region(abs_y: f64) -> bool {
  abs_y <= 1.0
}

// Returns the absolute value of the given double together with its bit of sign
struct AbsAndSign {
  abs: f64,
  sign: u64,
}

#[inline]
fn abs_sign_decompose(x: f64) -> AbsAndSign {
  let bits = f64::to_bits(x);
  AbsAndSign {
    abs: f64::from_bits(bits & F64_BUT_SIGN_BIT_MASK),
    sign: bits & F64_SIGN_BIT_MASK,
  }
}

// Decompose the given positive real value in
// --* an integer offset in [1, 3, 5, 7] (*PI/4) and
// --* a real value in [-1.0, 1.0] (*PI/4)
struct OffsetAndPM1 {
  offset: u8, // = 1, 3, 5 or 7
  pm1: f64,   // in [-1.0, 1.0]
}

#[inline]
fn pm1_offset_decompose(x: f64) -> OffsetAndPM1 {
  let floor: u8 = x as u8;
  let odd_floor: u8 = floor | 1u8;
  OffsetAndPM1 {
    offset: odd_floor & 7u8, // value modulo 8
    pm1: x - (odd_floor as f64),
  }
}

// Cylindrical Equal Area projection
#[inline]
fn proj_cea(xy: &mut (f64, f64)) {
  let (_, ref mut y) = *xy;
  *y = f64::sin(*y) * ONE_OVER_TRANSITION_Z;
}

#[inline]
fn deproj_cea(lonlat: &mut (f64, f64)) {
  let (_, ref mut lat) = *lonlat;
  // Using asin is OK here since |lat*TRANSITION_Z| < 2/3, so not near from 1.
  *lat = f64::asin((*lat) * TRANSITION_Z);
}

// Collignon projection
#[inline]
fn proj_collignon(xy: &mut (f64, f64)) {
  let (ref mut x, ref mut y) = *xy;
  *y = SQRT6 * f64::cos(HALF * *y + FRAC_PI_4);
  *x *= *y;
  *y = 2.0 - *y;
}

#[inline]
fn deproj_collignon(lonlat: &mut (f64, f64)) {
  let (ref mut lon, ref mut lat) = *lonlat;
  *lat = 2.0 - *lat;
  if is_not_near_from_pole(*lat) {
    // Rare, so few risks of branch miss-prediction
    *lon /= *lat;
    deal_with_numerical_approx_in_edges(lon);
  } // in case of pole, lon = lat = 0 (we avoid NaN due to division by lat=0)
  *lat *= ONE_OVER_SQRT6;
  // Using acos is OK here since lat < 1/sqrt(6), so not near from 1.
  *lat = 2.0 * f64::acos(*lat) - FRAC_PI_2;
}

#[inline]
fn is_not_near_from_pole(sqrt_of_three_time_one_minus_sin_of: f64) -> bool {
  // In case of pole: x = y = 0
  sqrt_of_three_time_one_minus_sin_of > EPS_POLE
}

#[inline]
fn deal_with_numerical_approx_in_edges(lon: &mut f64) {
  if *lon > 1.0 {
    *lon = 1.0;
  } else if *lon < -1.0 {
    *lon = -1.0;
  }
}

// Shift x by the given offset and apply lon and lat signs to x and y respectively
#[inline]
fn apply_offset_and_signs(ab: &mut (f64, f64), off: u8, a_sign: u64, b_sign: u64) {
  let (ref mut a, ref mut b) = *ab;
  *a += off as f64;
  *a = f64::from_bits(f64::to_bits(*a) | a_sign);
  *b = f64::from_bits(f64::to_bits(*b) | b_sign);
}

#[cfg(test)]
mod tests {
  use super::*;

  fn dist(p1: (f64, f64), p2: (f64, f64)) -> f64 {
    f64::sqrt((p2.0 - p1.0) * (p2.0 - p1.0) + (p2.1 - p1.1) * (p2.1 - p1.1))
  }

  #[test]
  fn testok_proj_remarkable_points() {
    assert!(dist((0.0, 0.0), proj(0.0, 0.0)) < 1e-15);
    for q in 0..4 {
      let lon = (q as f64) * FRAC_PI_2;
      assert!(dist((2.0 * q as f64, 1.0), proj(lon, TRANSITION_LATITUDE)) < 1e-15);
      assert!(dist((2.0 * q as f64, -1.0), proj(lon, -TRANSITION_LATITUDE)) < 1e-15);
      assert!(dist((2.0 * q as f64 + 1.0, 2.0), proj(lon + FRAC_PI_4, FRAC_PI_2)) < 1e-15);
      assert!(dist((2.0 * q as f64 + 1.0, -2.0), proj(lon + FRAC_PI_4, -FRAC_PI_2)) < 1e-15);
    }
  }

  #[test]
  fn testok_proj_unproj_roundtrip() {
    for i in 0..64 {
      for j in 1..32 {
        let lon = (i as f64 / 64.0) * TWICE_PI;
        let lat = (j as f64 / 32.0) * PI - FRAC_PI_2;
        let (x, y) = proj(lon, lat);
        let (lon2, lat2) = unproj(x, y);
        let dlon = (lon - lon2).rem_euclid(TWICE_PI);
        assert!((lat - lat2).abs() < 1e-14);
        assert!(dlon.min(TWICE_PI - dlon) < 1e-13);
      }
    }
  }

  #[test]
  #[should_panic]
  fn testpanic_proj_lat_out_of_range() {
    proj(0.0, -1.58);
  }

  #[test]
  fn testok_direction_lon_wrapping() {
    let d = Direction::new(-PI, 0.3).unwrap();
    assert_eq!(d.lon(), PI);
    let d = Direction::new(PI, 0.3).unwrap();
    assert_eq!(d.lon(), PI);
    let d = Direction::new(TWICE_PI + 0.25, 0.0).unwrap();
    assert!((d.lon() - 0.25).abs() < 1e-15);
    assert!(Direction::new(f64::NAN, 0.0).is_err());
    assert!(Direction::new(0.0, 1.6).is_err());
  }

  #[test]
  fn testok_direction_vect_roundtrip() {
    for &(lon, lat) in &[(0.0, 0.0), (2.5, 1.2), (-2.5, -1.2), (3.0, 0.1)] {
      let d = Direction::new(lon, lat).unwrap();
      let [x, y, z] = d.unit_vect();
      assert!(((x * x + y * y + z * z).sqrt() - 1.0).abs() < 1e-15);
      let d2 = Direction::from_vect(x, y, z).unwrap();
      assert!((d.lon() - d2.lon()).abs() < 1e-14);
      assert!((d.lat() - d2.lat()).abs() < 1e-14);
    }
    assert!(Direction::from_vect(0.0, 0.0, 0.0).is_err());
  }
}
