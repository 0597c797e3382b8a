use serde::Serialize;

use crate::{ProviderId, ValidationError};

/// Longest GitHub creation window accepted, in days.
pub const MAX_CREATED_WITHIN_DAYS: u32 = 36_500;

/// What one pipeline run extracts. Built once per run and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ExtractionRequest {
    Binance {
        symbols: Vec<String>,
    },
    Youtube {
        channel_ids: Vec<String>,
    },
    Github {
        languages: Vec<String>,
        created_within_days: u32,
        min_stars: u32,
    },
}

impl ExtractionRequest {
    /// Trading pairs such as `BTCUSDT`; normalized to uppercase.
    pub fn binance<I, S>(symbols: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = normalize_scopes(ProviderId::Binance, symbols, |value| {
            value.to_ascii_uppercase()
        })?;
        if let Some(bad) = symbols
            .iter()
            .find(|symbol| !symbol.chars().all(|ch| ch.is_ascii_alphanumeric()))
        {
            return Err(ValidationError::InvalidScope {
                provider: ProviderId::Binance,
                value: bad.clone(),
            });
        }
        Ok(Self::Binance { symbols })
    }

    pub fn youtube<I, S>(channel_ids: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let channel_ids = normalize_scopes(ProviderId::Youtube, channel_ids, str::to_owned)?;
        Ok(Self::Youtube { channel_ids })
    }

    /// Repositories per language created in the last `created_within_days`
    /// days with more than `min_stars` stars.
    pub fn github<I, S>(
        languages: I,
        created_within_days: u32,
        min_stars: u32,
    ) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if created_within_days == 0 || created_within_days > MAX_CREATED_WITHIN_DAYS {
            return Err(ValidationError::InvalidWindow {
                days: created_within_days,
            });
        }
        let languages = normalize_scopes(ProviderId::Github, languages, |value| {
            value.to_ascii_lowercase()
        })?;
        Ok(Self::Github {
            languages,
            created_within_days,
            min_stars,
        })
    }

    pub const fn provider(&self) -> ProviderId {
        match self {
            Self::Binance { .. } => ProviderId::Binance,
            Self::Youtube { .. } => ProviderId::Youtube,
            Self::Github { .. } => ProviderId::Github,
        }
    }

    /// Independent units of work; each may fail without failing the others.
    pub fn sub_scopes(&self) -> &[String] {
        match self {
            Self::Binance { symbols } => symbols,
            Self::Youtube { channel_ids } => channel_ids,
            Self::Github { languages, .. } => languages,
        }
    }
}

fn normalize_scopes<I, S>(
    provider: ProviderId,
    values: I,
    normalize: impl Fn(&str) -> String,
) -> Result<Vec<String>, ValidationError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut scopes: Vec<String> = Vec::new();
    for value in values {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        let normalized = normalize(trimmed);
        if !scopes.contains(&normalized) {
            scopes.push(normalized);
        }
    }

    if scopes.is_empty() {
        return Err(ValidationError::EmptyScope {
            provider,
            scope: scope_label(provider),
        });
    }
    Ok(scopes)
}

const fn scope_label(provider: ProviderId) -> &'static str {
    match provider {
        ProviderId::Binance => "symbol",
        ProviderId::Youtube => "channel id",
        ProviderId::Github => "language",
    }
}
