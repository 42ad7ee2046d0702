//! # imgstack_core
//!
//! Core types shared by the imgstack image pipeline crates.
//!
//! This crate provides:
//! - [`Seed`] for deterministic random number generation
//! - [`Mode`] selecting whether batches carry labels
//! - [`TargetSize`] for the spatial size images are resized to
//! - [`ChannelStats`] holding the global per-channel mean/std
//! - [`Augmenter`], the per-image transformation seam used by the batch iterator
//! - [`RunContext`] carrying per-run counters
//! - Error types and common utilities
//!
//! ## Layout Convention
//!
//! Image tensors follow the `(H, W, C)` convention with `C = 3` in RGB order.
//! Batches stack them as `(B, H, W, C)`.
//!
//! ## Example
//!
//! ```rust
//! use imgstack_core::{Mode, Seed, TargetSize};
//!
//! let seed = Seed::new(42);
//! let size = TargetSize::square(256);
//! let mode: Mode = "fit".parse().unwrap();
//! assert!(mode.has_labels());
//! assert_eq!(size.height(), 256);
//! # let _ = seed;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod augment;
mod context;
mod error;
mod mode;
mod seed;
mod size;
mod stats;

pub use augment::{resize_exact, rgb_to_array, Augmenter, Passthrough};
pub use context::RunContext;
pub use error::{CoreError, Result};
pub use mode::Mode;
pub use seed::Seed;
pub use size::TargetSize;
pub use stats::ChannelStats;

/// Number of color channels every pipeline stage works with.
pub const CHANNELS: usize = 3;
