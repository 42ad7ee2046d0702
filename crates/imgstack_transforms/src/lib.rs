//! # imgstack_transforms
//!
//! Per-image augmentations for the imgstack batch iterator.
//!
//! This crate provides:
//! - [`AugmentConfig`], the serde-loadable set of augmentation options
//! - Real-transform cropping and random flips ([`crop`])
//! - Random affine transforms about the image center ([`geometric`])
//! - Rescaling and sample/feature-wise standardization ([`standardize`])
//! - PCA color jitter ([`pca`])
//! - [`ImageAugmenter`], which chains all of the above behind the
//!   [`imgstack_core::Augmenter`] trait
//!
//! ## Example
//!
//! ```rust
//! use imgstack_core::{Augmenter, ChannelStats, Seed, TargetSize};
//! use imgstack_transforms::{AugmentConfig, ImageAugmenter};
//!
//! let config = AugmentConfig::default()
//!     .with_target_size(TargetSize::square(32))
//!     .with_horizontal_flip(true)
//!     .with_featurewise(true)
//!     .with_pca_jitter(true);
//! let stats = ChannelStats::new([120.0, 110.0, 100.0], [40.0, 40.0, 40.0]);
//!
//! let augmenter = ImageAugmenter::new(config, Some(stats)).unwrap();
//! let image = image::RgbImage::from_pixel(48, 40, image::Rgb([200, 100, 50]));
//! let x = augmenter.augment(image, &mut Seed::new(42).to_rng()).unwrap();
//! assert_eq!(x.dim(), (32, 32, 3));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod augment;
mod config;
pub mod crop;
pub mod geometric;
pub mod pca;
pub mod standardize;

pub use augment::ImageAugmenter;
pub use config::AugmentConfig;
pub use crop::{random_flips, real_crop};
pub use geometric::{apply_affine, random_transform, AffineParams};
pub use pca::{pca_jitter, pca_offset};
pub use standardize::standardize;
