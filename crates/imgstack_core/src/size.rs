//! Target spatial size for resized images.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Height and width every image of one iterator is resized to.
///
/// # Example
///
/// ```rust
/// use imgstack_core::TargetSize;
///
/// let size = TargetSize::new(224, 256).unwrap();
/// assert_eq!(size.shape(), (224, 256, 3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetSize {
    height: u32,
    width: u32,
}

impl TargetSize {
    /// Create a target size.
    ///
    /// # Errors
    ///
    /// Returns an error if either side is zero.
    pub fn new(height: u32, width: u32) -> Result<Self> {
        if height == 0 || width == 0 {
            return Err(CoreError::Value(format!(
                "target size must be positive, got {height}x{width}"
            )));
        }
        Ok(Self { height, width })
    }

    /// A square target size. Panics in debug builds if `side` is zero.
    #[must_use]
    pub const fn square(side: u32) -> Self {
        debug_assert!(side > 0);
        Self {
            height: side,
            width: side,
        }
    }

    /// Target height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Target width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// `(H, W, C)` shape of one image tensor.
    #[must_use]
    pub const fn shape(&self) -> (usize, usize, usize) {
        (self.height as usize, self.width as usize, crate::CHANNELS)
    }
}

impl Default for TargetSize {
    fn default() -> Self {
        Self::square(256)
    }
}

impl std::fmt::Display for TargetSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_size_rejects_zero() {
        assert!(TargetSize::new(0, 10).is_err());
        assert!(TargetSize::new(10, 0).is_err());
    }

    #[test]
    fn test_target_size_default() {
        let size = TargetSize::default();
        assert_eq!(size.shape(), (256, 256, 3));
        assert_eq!(size.to_string(), "256x256");
    }
}
