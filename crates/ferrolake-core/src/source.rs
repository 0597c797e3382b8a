use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Providers a pipeline run can extract from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Exchange market data (24h ticker, order book, recent trades).
    Binance,
    /// Video platform channel uploads and statistics.
    Youtube,
    /// Code index repository search.
    Github,
}

impl ProviderId {
    pub const ALL: [Self; 3] = [Self::Binance, Self::Youtube, Self::Github];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Youtube => "youtube",
            Self::Github => "github",
        }
    }

    /// Raw warehouse table receiving this provider's snapshots.
    pub fn raw_table(self) -> String {
        format!("raw_{}", self.as_str())
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "youtube" => Ok(Self::Youtube),
            "github" => Ok(Self::Github),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}
