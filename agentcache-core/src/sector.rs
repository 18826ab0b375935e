//! Industry sectors and their cache/admission profiles

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const DAY: u64 = 24 * 3600;

/// Deployment sector of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sector {
    #[default]
    General,
    Healthcare,
    Finance,
    Legal,
    Education,
    Ecommerce,
    Enterprise,
    Developer,
    DataScience,
    Government,
}

/// Thresholds a sector applies to caching and admission
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectorProfile {
    /// Minimum L2 similarity, within [0.80, 0.95]
    pub semantic_threshold: f64,
    /// Minimum admission score
    pub admission_threshold: f64,
    /// Episodic decay half-life
    pub half_life: Duration,
    /// Regulated sectors get the strict thresholds
    pub regulated: bool,
}

impl Sector {
    pub const ALL: [Sector; 10] = [
        Sector::General,
        Sector::Healthcare,
        Sector::Finance,
        Sector::Legal,
        Sector::Education,
        Sector::Ecommerce,
        Sector::Enterprise,
        Sector::Developer,
        Sector::DataScience,
        Sector::Government,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sector::General => "general",
            Sector::Healthcare => "healthcare",
            Sector::Finance => "finance",
            Sector::Legal => "legal",
            Sector::Education => "education",
            Sector::Ecommerce => "ecommerce",
            Sector::Enterprise => "enterprise",
            Sector::Developer => "developer",
            Sector::DataScience => "datascience",
            Sector::Government => "government",
        }
    }

    pub fn is_regulated(&self) -> bool {
        matches!(
            self,
            Sector::Healthcare | Sector::Finance | Sector::Legal | Sector::Government
        )
    }

    pub fn profile(&self) -> SectorProfile {
        if self.is_regulated() {
            let half_life_days = match self {
                Sector::Finance => 1,
                Sector::Healthcare => 3,
                Sector::Government => 14,
                _ => 30,
            };
            return SectorProfile {
                semantic_threshold: 0.95,
                admission_threshold: 0.9,
                half_life: Duration::from_secs(half_life_days * DAY),
                regulated: true,
            };
        }

        let (semantic_threshold, admission_threshold, half_life_days) = match self {
            Sector::Education => (0.88, 0.6, 14),
            Sector::Ecommerce => (0.85, 0.5, 2),
            Sector::Enterprise => (0.90, 0.7, 7),
            Sector::Developer | Sector::DataScience => (0.88, 0.5, 7),
            _ => (0.85, 0.5, 7),
        };
        SectorProfile {
            semantic_threshold,
            admission_threshold,
            half_life: Duration::from_secs(half_life_days * DAY),
            regulated: false,
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sector {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace(['_', '-', ' '], "");
        Sector::ALL
            .iter()
            .copied()
            .find(|sector| sector.as_str() == wanted)
            .ok_or_else(|| CacheError::Config(format!("unknown sector: {}", s)))
    }
}
