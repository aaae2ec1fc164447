//! Equal-area, iso-latitude pixelization of the sphere in the RING scheme:
//! pixels are organized in latitude rings whose pixel count varies so that
//! every pixel covers the same solid angle, and are numbered from the north
//! pole, ring by ring, west to east. At `nside = 2^order` the indices agree
//! with the standard HEALPix RING convention (healpy's `ang2pix`/`pix2ang`).

use rand::Rng;

use crate::{
  error::Error, n_pix, nside, unproj, Direction, FOUR_OVER_PI, ORDER_MAX, TRANSITION_Z, TWICE_PI,
};

/// RING-scheme pixelization at a fixed resolution order (`nside = 2^order`,
/// `12 * nside^2` pixels). All constants derived from the order are
/// precomputed at construction; the struct is cheap to copy.
///
/// ```rust
/// use skypix::{ring::RingPixelization, Direction};
///
/// let pix = RingPixelization::new(4).unwrap();
/// assert_eq!(pix.n_pixels(), 3072);
/// let p = pix.hash(Direction::new(0.0, 0.0).unwrap());
/// let center = pix.center(p).unwrap();
/// assert_eq!(pix.hash(center), p);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RingPixelization {
  order: u8,
  nside: u64,
  nside_f: f64,
  n_pix: u64,
  /// Number of pixels in the rings strictly inside a polar cap, i.e.
  /// `2 * nside * (nside - 1)` (four times the `(nside-1)`th triangular number).
  n_cap: u64,
  four_nside: u64,
  /// `1 / nside`; a power of two, so exactly representable.
  one_over_nside: f64,
}

impl RingPixelization {
  /// Builds the pixelization of the given order; fails if `order` exceeds
  /// [ORDER_MAX].
  pub fn new(order: u8) -> Result<Self, Error> {
    if order > ORDER_MAX {
      Err(Error::InvalidOrder {
        order,
        max: ORDER_MAX,
      })
    } else {
      Ok(Self::new_unchecked(order))
    }
  }

  pub(crate) fn new_unchecked(order: u8) -> Self {
    let ns = nside(order) as u64;
    Self {
      order,
      nside: ns,
      nside_f: ns as f64,
      n_pix: n_pix(order),
      n_cap: (ns * (ns - 1)) << 1,
      four_nside: ns << 2,
      one_over_nside: 1.0 / ns as f64,
    }
  }

  /// The resolution order this pixelization was built with.
  #[inline]
  pub fn order(&self) -> u8 {
    self.order
  }

  /// `nside` = 2^order.
  #[inline]
  pub fn nside(&self) -> u64 {
    self.nside
  }

  /// Total number of pixels, i.e. `12 * nside^2`.
  #[inline]
  pub fn n_pixels(&self) -> u64 {
    self.n_pix
  }

  /// Returns the RING index of the pixel containing the given direction.
  /// Longitudes `-pi` and `pi` wrap to the same pixel ([Direction] already
  /// normalizes them to a single value) and the poles deterministically
  /// fall in the ring closest to them, in the slot given by the longitude
  /// quarter.
  pub fn hash(&self, dir: Direction) -> u64 {
    self.hash_lonlat(dir.lon(), dir.lat())
  }

  /// `lon` must be finite, `lat` in `[-pi/2, pi/2]`.
  pub(crate) fn hash_lonlat(&self, lon: f64, lat: f64) -> u64 {
    let z = lat.sin();
    let za = z.abs();
    // Longitude, in units of half a quarter of circle, in [0, 4].
    let tt = lon.rem_euclid(TWICE_PI) * (0.5 * FOUR_OVER_PI);
    if za <= TRANSITION_Z {
      // Equatorial region: ring and in-ring slot from the two families of
      // diagonal edge lines (ascending/descending), Eq. (27-29) of Gorski2005.
      let nside = self.nside as i64;
      let temp1 = self.nside_f * (0.5 + tt);
      let temp2 = self.nside_f * (z * 0.75);
      let jp = (temp1 - temp2) as i64; // index of the ascending edge line
      let jm = (temp1 + temp2) as i64; // index of the descending edge line
      let ir = nside + 1 + jp - jm; // ring number counted from z = 2/3, in [1, 2n+1]
      let kshift = 1 - (ir & 1); // 1 if ir even, 0 otherwise
      let ip = ((jp + jm - nside + kshift + 1) / 2).rem_euclid(nside << 2) as u64;
      self.n_cap + (ir as u64 - 1) * self.four_nside + ip
    } else {
      // Polar caps: ring from the radial edge lines, Eq. (19-21) of Gorski2005.
      let tp = tt.fract();
      let tmp = self.nside_f * (3.0 * (1.0 - za)).sqrt();
      let jp = (tp * tmp) as u64; // increasing edge line index
      let jm = ((1.0 - tp) * tmp) as u64; // decreasing edge line index
      let ir = jp + jm + 1; // ring number counted from the closest pole, in [1, nside]
      let ip = ((tt * ir as f64) as u64) % (ir << 2);
      if z > 0.0 {
        ((ir * (ir - 1)) << 1) + ip
      } else {
        self.n_pix - ((ir * (ir + 1)) << 1) + ip
      }
    }
  }

  /// Returns the direction of the center of the given pixel (ring latitude,
  /// ring-slot longitude). Fails if `pix` is not in `[0, n_pixels())`.
  pub fn center(&self, pix: u64) -> Result<Direction, Error> {
    self.check_pix(pix)?;
    Ok(self.center_unchecked(pix))
  }

  pub(crate) fn center_unchecked(&self, pix: u64) -> Direction {
    let (x, y) = self.center_in_proj_plane(pix);
    let (lon, lat) = unproj(x, y);
    Direction::wrap_unchecked(lon, lat)
  }

  /// Returns a direction drawn uniformly (by solid angle) within the given
  /// pixel; the result always hashes back to `pix`.
  /// Fails if `pix` is not in `[0, n_pixels())`.
  pub fn random_in_cell<R: Rng + ?Sized>(&self, pix: u64, rng: &mut R) -> Result<Direction, Error> {
    self.check_pix(pix)?;
    Ok(self.random_in_cell_unchecked(pix, rng))
  }

  /// Draws a uniform point in the pixel's diamond in the projection plane
  /// (the projection is equal-area, so the draw is uniform on the sphere
  /// too) and unprojects it. A draw falling on the wrong side of a cell
  /// border because of floating point rounding is redrawn; the borders have
  /// zero measure so the loop virtually always exits on the first pass.
  pub(crate) fn random_in_cell_unchecked<R: Rng + ?Sized>(&self, pix: u64, rng: &mut R) -> Direction {
    let (xc, yc) = self.center_in_proj_plane(pix);
    loop {
      let a = (rng.gen::<f64>() - 0.5) * self.one_over_nside;
      let b = (rng.gen::<f64>() - 0.5) * self.one_over_nside;
      // Rotate the square [-1/2n, 1/2n]^2 by 45 degrees onto the cell diamond.
      let x = (xc + (a - b)).rem_euclid(8.0);
      let y = yc + (a + b);
      let (lon, lat) = unproj(x, y);
      let dir = Direction::wrap_unchecked(lon, lat);
      if self.hash_lonlat(dir.lon(), dir.lat()) == pix {
        return dir;
      }
    }
  }

  #[inline]
  fn check_pix(&self, pix: u64) -> Result<(), Error> {
    if pix < self.n_pix {
      Ok(())
    } else {
      Err(Error::PixelOutOfRange {
        pix,
        n_pix: self.n_pix,
      })
    }
  }

  /// Exact projection-plane coordinates of the pixel center: `x` in `[0, 8)`
  /// and `y` in `[-2, 2]`, both on the grid of step `1/nside` (so the values
  /// are exact, `1/nside` being a power of two).
  fn center_in_proj_plane(&self, pix: u64) -> (f64, f64) {
    let (i_ring, i_in_ring) = self.ring_and_pos(pix);
    let y = 2.0 - (i_ring as f64) * self.one_over_nside;
    let x = if (self.nside..=3 * self.nside).contains(&i_ring) {
      // Iso-latitude ring of 4*nside pixels; consecutive rings are staggered
      // by half a pixel width.
      let s = 1 - ((i_ring + self.nside) & 1);
      ((2 * i_in_ring + s) as f64) * self.one_over_nside
    } else {
      // Polar cap ring of 4*i pixels, i pixels per base cell.
      let i = if i_ring < self.nside {
        i_ring
      } else {
        (self.nside << 2) - i_ring
      };
      let q = i_in_ring / i;
      let j = i_in_ring % i;
      (2 * q + 1) as f64 + ((2 * j + 1) as i64 - i as i64) as f64 * self.one_over_nside
    };
    (x, y)
  }

  /// Decomposes a pixel index into its ring index (counted from the north
  /// pole, in `[1, 4*nside - 1]`) and its 0-based position within the ring.
  fn ring_and_pos(&self, pix: u64) -> (u64, u64) {
    debug_assert!(pix < self.n_pix);
    if pix < self.n_cap {
      // North polar cap
      let i = (1 + isqrt(1 + (pix << 1))) >> 1;
      (i, pix - ((i * (i - 1)) << 1))
    } else if pix < self.n_pix - self.n_cap {
      // Equatorial region
      let p = pix - self.n_cap;
      (self.nside + p / self.four_nside, p % self.four_nside)
    } else {
      // South polar cap
      let p = self.n_pix - pix; // in [1, n_cap]
      let i = (1 + isqrt((p << 1) - 1)) >> 1;
      (
        (self.nside << 2) - i,
        (i << 2) - (p - ((i * (i - 1)) << 1)),
      )
    }
  }
}

/// Integer square root. `(n as f64).sqrt()` being correctly rounded, the
/// truncated result is off by at most one for the large inputs (> 2^52) an
/// order-29 south cap can produce, hence the two corrections.
fn isqrt(n: u64) -> u64 {
  let mut r = (n as f64).sqrt() as u64;
  if r * r > n {
    r -= 1;
  } else if (r + 1) * (r + 1) <= n {
    r += 1;
  }
  r
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::proj;
  use rand::{rngs::StdRng, SeedableRng};
  use std::f64::consts::{FRAC_PI_2, PI};

  #[test]
  fn testok_n_pixels() {
    assert_eq!(RingPixelization::new(0).unwrap().n_pixels(), 12);
    assert_eq!(RingPixelization::new(4).unwrap().n_pixels(), 3072);
    assert_eq!(RingPixelization::new(6).unwrap().n_pixels(), 49152);
  }

  #[test]
  fn testok_invalid_order() {
    assert!(RingPixelization::new(ORDER_MAX).is_ok());
    assert!(RingPixelization::new(ORDER_MAX + 1).is_err());
  }

  #[test]
  fn testok_center_roundtrip_all_pixels() {
    for order in 0..=4 {
      let pixelization = RingPixelization::new(order).unwrap();
      for pix in 0..pixelization.n_pixels() {
        let center = pixelization.center(pix).unwrap();
        assert_eq!(
          pixelization.hash(center),
          pix,
          "order: {}; pix: {}; center: {:?}",
          order,
          pix,
          center
        );
      }
    }
    // Store internal order, sub-sampled.
    let pixelization = RingPixelization::new(6).unwrap();
    for pix in (0..pixelization.n_pixels()).step_by(11) {
      let center = pixelization.center(pix).unwrap();
      assert_eq!(pixelization.hash(center), pix);
    }
  }

  #[test]
  fn testok_random_in_cell_closure() {
    let mut rng = StdRng::seed_from_u64(42);
    let pixelization = RingPixelization::new(4).unwrap();
    for pix in 0..pixelization.n_pixels() {
      for _ in 0..100 {
        let dir = pixelization.random_in_cell(pix, &mut rng).unwrap();
        assert_eq!(pixelization.hash(dir), pix, "pix: {}; dir: {:?}", pix, dir);
      }
    }
    let pixelization = RingPixelization::new(6).unwrap();
    for pix in (0..pixelization.n_pixels()).step_by(97) {
      for _ in 0..20 {
        let dir = pixelization.random_in_cell(pix, &mut rng).unwrap();
        assert_eq!(pixelization.hash(dir), pix);
      }
    }
  }

  /// Independent RING reference: brute-force nearest cell center in the
  /// equal-area projection plane under the L1 metric (with wrap along x).
  /// The HEALPix cells are the L1 Voronoi cells of the center grid, so this
  /// must agree with the closed-form ring arithmetic of `hash`.
  fn reference_hash(pixelization: &RingPixelization, centers: &[(f64, f64)], dir: Direction) -> u64 {
    let (x, y) = proj(dir.lon().rem_euclid(TWICE_PI), dir.lat());
    let mut best = 0_u64;
    let mut best_dist = f64::INFINITY;
    for (pix, &(xc, yc)) in centers.iter().enumerate() {
      let dx = (x - xc).abs();
      let dist = dx.min(8.0 - dx) + (y - yc).abs();
      if dist < best_dist {
        best_dist = dist;
        best = pix as u64;
      }
    }
    debug_assert!(best < pixelization.n_pixels());
    best
  }

  #[test]
  fn testok_consistency_with_ring_reference() {
    let pixelization = RingPixelization::new(4).unwrap();
    let centers: Vec<(f64, f64)> = (0..pixelization.n_pixels())
      .map(|pix| pixelization.center_in_proj_plane(pix))
      .collect();
    // Offsets keep the samples away from cell borders, where the reference
    // tie-breaking is arbitrary.
    for i in 0..50 {
      for j in 0..50 {
        let theta = (i as f64 + 0.517) * (PI / 50.0);
        let phi = -PI + (j as f64 + 0.503) * (TWICE_PI / 50.0);
        let dir = Direction::new(phi, FRAC_PI_2 - theta).unwrap();
        assert_eq!(
          pixelization.hash(dir),
          reference_hash(&pixelization, &centers, dir),
          "theta: {}; phi: {}",
          theta,
          phi
        );
      }
    }
  }

  /// Hard-coded healpy values at nside = 16 (`healpy.ang2pix(16, theta, phi)`
  /// and `healpy.pix2ang(16, pix)`, RING scheme), sampled on the grid
  /// `theta = i * pi / 49`, `phi = -pi + j * 2 * pi / 49`.
  #[test]
  fn testok_consistency_with_healpy_values() {
    const ANG2PIX: [(u8, u8, u64); 64] = [
      (0, 0, 2), (0, 7, 2), (0, 14, 3), (0, 21, 3), (0, 28, 0), (0, 35, 0), (0, 42, 1), (0, 49, 2),
      (7, 0, 162), (7, 7, 132), (7, 14, 172), (7, 21, 177), (7, 28, 146), (7, 35, 151), (7, 42, 123), (7, 49, 162),
      (14, 0, 576), (14, 7, 585), (14, 14, 594), (14, 21, 603), (14, 28, 549), (14, 35, 558), (14, 42, 567), (14, 49, 576),
      (21, 0, 1216), (21, 7, 1225), (21, 14, 1234), (21, 21, 1179), (21, 28, 1124), (21, 35, 1198), (21, 42, 1207), (21, 49, 1216),
      (28, 0, 1856), (28, 7, 1865), (28, 14, 1874), (28, 21, 1947), (28, 28, 1892), (28, 35, 1838), (28, 42, 1847), (28, 49, 1856),
      (35, 0, 2496), (35, 7, 2505), (35, 14, 2514), (35, 21, 2523), (35, 28, 2469), (35, 35, 2478), (35, 42, 2487), (35, 49, 2496),
      (42, 0, 2910), (42, 7, 2948), (42, 14, 2920), (42, 21, 2925), (42, 28, 2894), (42, 35, 2899), (42, 42, 2939), (42, 49, 2910),
      (49, 0, 3070), (49, 7, 3070), (49, 14, 3071), (49, 21, 3071), (49, 28, 3068), (49, 35, 3068), (49, 42, 3069), (49, 49, 3070),
    ];
    const PIX2ANG: [(u64, f64, f64); 14] = [
      (0, 0.051036575152667102, 0.78539816339744828),
      (3, 0.051036575152667102, 5.497787143782138),
      (42, 0.25585245340993734, 0.78539816339744828),
      (479, 0.78550497492169824, 6.2308254296197561),
      (480, 0.84106867056793033, 0.049087385212340517),
      (1000, 1.2309594173407747, 0.83448554860978885),
      (1535, 1.5707963267948966, 3.0925052683774528),
      (1536, 1.5707963267948966, 3.1906800388021335),
      (2000, 1.8667651301538279, 4.7123889803846897),
      (2591, 2.3005239830218631, 6.2340979219672459),
      (2592, 2.3560876786680951, 0.052359877559829883),
      (3000, 2.8341976025052897, 3.2724923474893681),
      (3068, 3.090556078437126, 0.78539816339744828),
      (3071, 3.090556078437126, 5.497787143782138),
    ];
    let pixelization = RingPixelization::new(4).unwrap();
    for &(i, j, pix) in ANG2PIX.iter() {
      let theta = i as f64 * PI / 49.0;
      let phi = -PI + j as f64 * TWICE_PI / 49.0;
      let dir = Direction::new(phi, FRAC_PI_2 - theta).unwrap();
      assert_eq!(pixelization.hash(dir), pix, "i: {}; j: {}", i, j);
    }
    for &(pix, theta, phi) in PIX2ANG.iter() {
      let center = pixelization.center(pix).unwrap();
      let lon = if phi > PI { phi - TWICE_PI } else { phi };
      assert!((center.lat() - (FRAC_PI_2 - theta)).abs() < 1e-12, "pix: {}", pix);
      assert!((center.lon() - lon).abs() < 1e-12, "pix: {}", pix);
    }
  }

  #[test]
  fn testok_longitude_wrap_and_poles() {
    let pixelization = RingPixelization::new(4).unwrap();
    for &lat in &[-1.2, -0.3, 0.0, 0.4, 1.3] {
      assert_eq!(
        pixelization.hash(Direction::new(-PI, lat).unwrap()),
        pixelization.hash(Direction::new(PI, lat).unwrap())
      );
    }
    // Poles resolve deterministically in the ring closest to them.
    assert_eq!(pixelization.hash(Direction::new(0.0, FRAC_PI_2).unwrap()), 0);
    assert_eq!(
      pixelization.hash(Direction::new(0.0, -FRAC_PI_2).unwrap()),
      pixelization.n_pixels() - 4
    );
  }

  #[test]
  fn testok_pixel_out_of_range() {
    let pixelization = RingPixelization::new(2).unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    assert!(pixelization.center(191).is_ok());
    assert!(matches!(
      pixelization.center(192),
      Err(Error::PixelOutOfRange { pix: 192, n_pix: 192 })
    ));
    assert!(pixelization.random_in_cell(192, &mut rng).is_err());
  }

  #[test]
  fn testok_centers_of_first_rings() {
    // nside = 2: ring 1 holds pixels 0-3, centered at lon = (k + 1/2) * pi/2.
    let pixelization = RingPixelization::new(1).unwrap();
    for k in 0..4 {
      let center = pixelization.center(k).unwrap();
      let expected = (k as f64 + 0.5) * FRAC_PI_2;
      let expected = if expected > PI { expected - TWICE_PI } else { expected };
      assert!((center.lon() - expected).abs() < 1e-15);
    }
    // The equator ring (20-27) starts at lon = pi/8.
    let center = pixelization.center(20).unwrap();
    assert!((center.lon() - PI / 8.0).abs() < 1e-15);
    assert!(center.lat().abs() < 1e-15);
  }
}
