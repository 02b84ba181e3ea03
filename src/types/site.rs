//! Site identity: (network, facility)

use serde::{Deserialize, Serialize};

/// Key selecting a site's sector set.
///
/// Normalised on construction: network lower-case, facility upper-case,
/// surrounding whitespace removed. `SiteKey::new("SGP", " e14")` and
/// `SiteKey::new("sgp", "E14")` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteKey {
    network: String,
    facility: String,
}

impl SiteKey {
    pub fn new(network: &str, facility: &str) -> Self {
        Self {
            network: network.trim().to_lowercase(),
            facility: facility.trim().to_uppercase(),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn facility(&self) -> &str {
        &self.facility
    }
}

impl std::fmt::Display for SiteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.facility)
    }
}
