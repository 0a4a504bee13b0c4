//! Inlier-count confidence classification.

use serde::{Deserialize, Serialize};

use crate::config::ConfidenceConfig;

/// How much to trust a fitted transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    None,
    Low,
    High,
}

impl Confidence {
    /// Classify an inlier count: below `none_below` is [`Confidence::None`],
    /// above `high_above` is [`Confidence::High`], anything between is
    /// [`Confidence::Low`]. Both cutoffs are exclusive.
    pub fn from_inlier_count(count: usize, config: &ConfidenceConfig) -> Self {
        if count < config.none_below {
            Self::None
        } else if count > config.high_above {
            Self::High
        } else {
            Self::Low
        }
    }

    /// The token written to and read from report files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "CONFIDENCE_NONE",
            Self::Low => "CONFIDENCE_LOW",
            Self::High => "CONFIDENCE_HIGH",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIDENCE_NONE" => Ok(Self::None),
            "CONFIDENCE_LOW" => Ok(Self::Low),
            "CONFIDENCE_HIGH" => Ok(Self::High),
            other => Err(format!("unknown confidence token: {:?}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_boundaries() {
        let cfg = ConfidenceConfig::default();
        assert_eq!(Confidence::from_inlier_count(0, &cfg), Confidence::None);
        assert_eq!(Confidence::from_inlier_count(4, &cfg), Confidence::None);
        assert_eq!(Confidence::from_inlier_count(5, &cfg), Confidence::Low);
        assert_eq!(Confidence::from_inlier_count(25, &cfg), Confidence::Low);
        assert_eq!(Confidence::from_inlier_count(26, &cfg), Confidence::High);
        assert_eq!(Confidence::from_inlier_count(1000, &cfg), Confidence::High);
    }

    #[test]
    fn token_roundtrip() {
        for c in [Confidence::None, Confidence::Low, Confidence::High] {
            assert_eq!(c.as_str().parse::<Confidence>(), Ok(c));
        }
        assert!("CONFIDENCE_MAYBE".parse::<Confidence>().is_err());
    }
}
