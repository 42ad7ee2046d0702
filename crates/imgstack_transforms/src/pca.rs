//! PCA color jitter.
//!
//! The principal components of an image's pixel colors are computed from the
//! 3x3 sample covariance. Each eigenvalue is scaled by a small Gaussian draw and
//! the resulting color offset is added to every pixel.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use ndarray::{Array3, ArrayView3, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use imgstack_core::{CoreError, Result, CHANNELS};

/// Standard deviation of the eigenvalue scale factors.
pub const ALPHA_STD: f64 = 0.01;

/// Sample covariance of the pixel colors of an `(H, W, 3)` tensor.
///
/// # Errors
///
/// Returns an error for tensors with fewer than two pixels.
pub fn color_covariance(x: ArrayView3<'_, f32>) -> Result<Matrix3<f64>> {
    let (h, w, _) = x.dim();
    let n = h * w;
    if n < 2 {
        return Err(CoreError::Value(format!(
            "PCA jitter needs at least 2 pixels, got {n}"
        )));
    }

    let mut mean = Vector3::<f64>::zeros();
    for px in x.lanes(Axis(2)) {
        for c in 0..CHANNELS {
            mean[c] += f64::from(px[c]);
        }
    }
    mean /= n as f64;

    let mut cov = Matrix3::<f64>::zeros();
    for px in x.lanes(Axis(2)) {
        let d = Vector3::new(
            f64::from(px[0]) - mean[0],
            f64::from(px[1]) - mean[1],
            f64::from(px[2]) - mean[2],
        );
        cov += d * d.transpose();
    }
    Ok(cov / (n - 1) as f64)
}

/// Draw the color offset `P * (alpha * lambda)`.
///
/// `P` holds the eigenvectors of the color covariance as columns, `lambda`
/// the eigenvalues, and each `alpha_i` is drawn from `N(0, 0.01)`.
pub fn pca_offset<R: Rng + ?Sized>(x: ArrayView3<'_, f32>, rng: &mut R) -> Result<[f32; CHANNELS]> {
    let cov = color_covariance(x)?;
    let eigen = SymmetricEigen::new(cov);

    let normal = Normal::new(0.0, ALPHA_STD).map_err(|e| CoreError::Value(e.to_string()))?;
    let scaled = Vector3::from_fn(|i, _| normal.sample(rng) * eigen.eigenvalues[i]);
    let offset = eigen.eigenvectors * scaled;

    Ok([offset[0] as f32, offset[1] as f32, offset[2] as f32])
}

/// Add a PCA color offset to every pixel of `x`.
pub fn pca_jitter<R: Rng + ?Sized>(x: &mut Array3<f32>, rng: &mut R) -> Result<()> {
    let offset = pca_offset(x.view(), rng)?;
    for (c, mut channel) in x.axis_iter_mut(Axis(2)).enumerate() {
        let add = offset[c];
        channel.mapv_inplace(|v| v + add);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use imgstack_core::Seed;

    fn noisy(seed: u64) -> Array3<f32> {
        let mut rng = Seed::new(seed).to_rng();
        Array3::from_shape_fn((6, 5, 3), |(_, _, c)| rng.gen::<f32>() * 50.0 + c as f32)
    }

    #[test]
    fn test_covariance_of_known_colors() {
        // two pixels: (0, 0, 0) and (2, 4, 0)
        let mut x = Array3::<f32>::zeros((1, 2, 3));
        x[[0, 1, 0]] = 2.0;
        x[[0, 1, 1]] = 4.0;
        let cov = color_covariance(x.view()).unwrap();
        assert_relative_eq!(cov[(0, 0)], 2.0);
        assert_relative_eq!(cov[(1, 1)], 8.0);
        assert_relative_eq!(cov[(0, 1)], 4.0);
        assert_relative_eq!(cov[(2, 2)], 0.0);
    }

    #[test]
    fn test_jitter_is_constant_offset() {
        let original = noisy(1);
        let mut x = original.clone();
        pca_jitter(&mut x, &mut Seed::new(2).to_rng()).unwrap();

        let diff = &x - &original;
        for c in 0..CHANNELS {
            let first = diff[[0, 0, c]];
            for v in diff.index_axis(Axis(2), c).iter() {
                assert_relative_eq!(*v, first, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_flat_image_unchanged() {
        let mut x = Array3::from_elem((4, 4, 3), 7.0f32);
        pca_jitter(&mut x, &mut Seed::new(0).to_rng()).unwrap();
        for v in &x {
            assert_relative_eq!(*v, 7.0);
        }
    }

    #[test]
    fn test_seeded_offset_repeats() {
        let x = noisy(3);
        let a = pca_offset(x.view(), &mut Seed::new(9).to_rng()).unwrap();
        let b = pca_offset(x.view(), &mut Seed::new(9).to_rng()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_pixel_rejected() {
        let x = Array3::<f32>::zeros((1, 1, 3));
        assert!(pca_offset(x.view(), &mut Seed::new(0).to_rng()).is_err());
    }
}
