//! Random affine transforms on `(H, W, 3)` tensors.
//!
//! Coordinates are `(row, col)`. The composed matrix maps each output pixel
//! back to an input position about the image center; the input is sampled
//! with nearest-neighbour lookup and out-of-range positions are clamped to the
//! nearest edge pixel.

use nalgebra::{Matrix3, Point2, Vector2};
use ndarray::{Array3, Axis};
use rand::Rng;

use crate::config::AugmentConfig;

/// One draw of affine transform parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    /// Rotation in degrees.
    pub theta: f64,
    /// Row shift in pixels.
    pub tx: f64,
    /// Column shift in pixels.
    pub ty: f64,
    /// Shear in degrees.
    pub shear: f64,
    /// Row zoom factor.
    pub zx: f64,
    /// Column zoom factor.
    pub zy: f64,
}

impl Default for AffineParams {
    fn default() -> Self {
        Self {
            theta: 0.0,
            tx: 0.0,
            ty: 0.0,
            shear: 0.0,
            zx: 1.0,
            zy: 1.0,
        }
    }
}

impl AffineParams {
    /// Draw parameters for an image of `height x width` pixels.
    ///
    /// Each parameter is uniform over its configured range; a zero range
    /// draws nothing and leaves the identity value.
    pub fn sample<R: Rng + ?Sized>(config: &AugmentConfig, height: usize, width: usize, rng: &mut R) -> Self {
        let mut uniform = |range: f32| {
            let r = f64::from(range);
            if r > 0.0 {
                rng.gen_range(-r..r)
            } else {
                0.0
            }
        };

        let theta = uniform(config.rotation_range);
        let tx = uniform(config.height_shift_range) * height as f64;
        let ty = uniform(config.width_shift_range) * width as f64;
        let shear = uniform(config.shear_range);

        let [low, high] = config.zoom_range.map(f64::from);
        let (zx, zy) = if low == 1.0 && high == 1.0 {
            (1.0, 1.0)
        } else {
            (rng.gen_range(low..=high), rng.gen_range(low..=high))
        };

        Self {
            theta,
            tx,
            ty,
            shear,
            zx,
            zy,
        }
    }

    /// Whether the parameters leave every pixel in place.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Output-to-input matrix for an image of `height x width` pixels, in
    /// homogeneous `(row, col, 1)` coordinates.
    #[must_use]
    pub fn matrix(&self, height: usize, width: usize) -> Matrix3<f64> {
        let shear = self.shear.to_radians();

        let rotation = Matrix3::new_rotation(self.theta.to_radians());
        let shift = Matrix3::new_translation(&Vector2::new(self.tx, self.ty));
        #[rustfmt::skip]
        let shear = Matrix3::new(
            1.0, -shear.sin(), 0.0,
            0.0, shear.cos(), 0.0,
            0.0, 0.0, 1.0,
        );
        let zoom = Matrix3::new_nonuniform_scaling(&Vector2::new(self.zx, self.zy));

        let center = Vector2::new(height as f64 / 2.0 - 0.5, width as f64 / 2.0 - 0.5);
        Matrix3::new_translation(&center) * rotation * shift * shear * zoom * Matrix3::new_translation(&-center)
    }
}

/// Resample `x` through the affine transform described by `params`.
#[must_use]
pub fn apply_affine(x: &Array3<f32>, params: &AffineParams) -> Array3<f32> {
    if params.is_identity() {
        return x.clone();
    }
    let (h, w, c) = x.dim();
    let m = params.matrix(h, w);
    let clamp = |v: f64, n: usize| v.round().clamp(0.0, (n - 1) as f64) as usize;

    let mut out = Array3::<f32>::zeros((h, w, c));
    for r in 0..h {
        for col in 0..w {
            let src = m.transform_point(&Point2::new(r as f64, col as f64));
            let (src_r, src_c) = (clamp(src.x, h), clamp(src.y, w));
            for ch in 0..c {
                out[[r, col, ch]] = x[[src_r, src_c, ch]];
            }
        }
    }
    out
}

/// Apply a random affine transform, then random flips, per `config`.
pub fn random_transform<R: Rng + ?Sized>(x: Array3<f32>, config: &AugmentConfig, rng: &mut R) -> Array3<f32> {
    let (h, w, _) = x.dim();
    let params = AffineParams::sample(config, h, w, rng);
    let mut x = apply_affine(&x, &params);

    if config.horizontal_flip && rng.gen::<f64>() < 0.5 {
        x.invert_axis(Axis(1));
    }
    if config.vertical_flip && rng.gen::<f64>() < 0.5 {
        x.invert_axis(Axis(0));
    }
    x
}
