//! Iterator output mode.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// What a batch iterator yields.
///
/// In [`Mode::Fit`] every batch pairs images with their label rows; in
/// [`Mode::Predict`] only the images are produced.
///
/// # Example
///
/// ```rust
/// use imgstack_core::Mode;
///
/// assert_eq!("predict".parse::<Mode>().unwrap(), Mode::Predict);
/// assert!("train".parse::<Mode>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Images and labels.
    #[default]
    Fit,
    /// Images only.
    Predict,
}

impl Mode {
    /// Whether batches produced in this mode carry labels.
    #[must_use]
    pub const fn has_labels(&self) -> bool {
        matches!(self, Mode::Fit)
    }
}

impl FromStr for Mode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fit" => Ok(Mode::Fit),
            "predict" => Ok(Mode::Predict),
            other => Err(CoreError::Value(format!(
                "mode should be either 'fit' or 'predict', got '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Fit => write!(f, "fit"),
            Mode::Predict => write!(f, "predict"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("fit".parse::<Mode>().unwrap(), Mode::Fit);
        assert_eq!("predict".parse::<Mode>().unwrap(), Mode::Predict);
    }

    #[test]
    fn test_mode_parse_rejects_unknown() {
        let err = "evaluate".parse::<Mode>().unwrap_err();
        assert!(matches!(err, CoreError::Value(_)));
        assert!(err.to_string().contains("evaluate"));
    }

    #[test]
    fn test_mode_labels() {
        assert!(Mode::Fit.has_labels());
        assert!(!Mode::Predict.has_labels());
    }

    #[test]
    fn test_mode_display_roundtrip() {
        for mode in [Mode::Fit, Mode::Predict] {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
    }
}
