//! Source hierarchy: normative ranking of evidence sources.
//!
//! Every evidence collection belongs to one of three tiers:
//!
//! - **A**: normative / primary legal text
//! - **B**: political and procedural signal
//! - **C**: contextual and research material
//!
//! Lower ordinal means higher priority. The order is fixed at compile time.
//!
//! # Totality
//! [`TierRegistry::tier_of`] never fails. An identifier the registry does
//! not know (a collection indexed before the registry was updated) is
//! ranked as tier C.
//!
//! # Stability
//! [`TierRegistry::rank`] is a stable sort. Items sharing a tier keep the
//! relative order they arrived in, which preserves retrieval-score order
//! within a tier.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::types::EvidenceRecord;

/// Errors raised while loading a tier registry.
///
/// These only occur at startup; lookups are infallible.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read registry file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse registry YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Unknown tier '{0}', expected A, B or C")]
    UnknownTier(String),

    #[error("Source '{source_id}' registered as both {first} and {second}")]
    ConflictingTier {
        source_id: String,
        first: SourceTier,
        second: SourceTier,
    },

    #[error("Invalid source pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Priority tier of an evidence source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceTier {
    /// Normative / primary legal text
    A,
    /// Political / procedural signal
    B,
    /// Contextual / research material
    C,
}

impl SourceTier {
    /// All tiers in priority order.
    pub const ALL: [SourceTier; 3] = [SourceTier::A, SourceTier::B, SourceTier::C];

    /// Lowest-priority tier, used for unregistered sources.
    pub const LOWEST: SourceTier = SourceTier::C;

    /// Sort key. Lower is higher priority.
    pub fn ordinal(&self) -> u8 {
        match self {
            SourceTier::A => 0,
            SourceTier::B => 1,
            SourceTier::C => 2,
        }
    }

    /// Single-letter label.
    pub fn label(&self) -> &'static str {
        match self {
            SourceTier::A => "A",
            SourceTier::B => "B",
            SourceTier::C => "C",
        }
    }
}

impl fmt::Display for SourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SourceTier {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(SourceTier::A),
            "B" | "b" => Ok(SourceTier::B),
            "C" | "c" => Ok(SourceTier::C),
            other => Err(RegistryError::UnknownTier(other.to_string())),
        }
    }
}

/// Anything that carries an evidence-source identifier.
pub trait Sourced {
    /// The source (collection) identifier.
    fn source_id(&self) -> &str;
}

impl Sourced for EvidenceRecord {
    fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl<T: Sourced + ?Sized> Sourced for &T {
    fn source_id(&self) -> &str {
        (**self).source_id()
    }
}

/// On-disk registry format.
#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    tiers: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    patterns: Vec<PatternRule>,
}

#[derive(Debug, Deserialize)]
struct PatternRule {
    pattern: String,
    tier: String,
}

/// Immutable mapping from source identifier to tier.
///
/// Built once at process start and shared read-only (typically behind an
/// `Arc`) by every request handler.
#[derive(Debug, Clone)]
pub struct TierRegistry {
    exact: HashMap<String, SourceTier>,
    patterns: Vec<(Regex, SourceTier)>,
}

impl TierRegistry {
    /// Start building a registry.
    pub fn builder() -> TierRegistryBuilder {
        TierRegistryBuilder::default()
    }

    /// A registry with no entries. Every source ranks as tier C.
    pub fn empty() -> Self {
        Self {
            exact: HashMap::new(),
            patterns: Vec::new(),
        }
    }

    /// Reference mapping for Swedish legal collections.
    pub fn legal_default() -> Self {
        let registry = Self::builder()
            .tier(SourceTier::A, ["sfs", "grundlag", "praxis_hd", "praxis_hfd"])
            .tier(
                SourceTier::B,
                ["proposition", "betankande", "riksdagsprotokoll", "motion"],
            )
            .tier(SourceTier::C, ["sou", "ds", "doktrin", "myndighet", "forskning"])
            .pattern(r"^sfs[_-]", SourceTier::A)
            .pattern(r"^(prop|bet)[_-]", SourceTier::B)
            .build();

        // Built-in patterns are constants and covered by tests.
        registry.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Built-in tier registry failed to compile");
            Self::empty()
        })
    }

    /// Parse a registry from YAML.
    ///
    /// ```yaml
    /// tiers:
    ///   A: [sfs]
    ///   B: [proposition, betankande]
    /// patterns:
    ///   - pattern: "^sou_"
    ///     tier: C
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile = serde_yaml::from_str(yaml)?;

        let mut builder = Self::builder();
        for (tier, ids) in file.tiers {
            let tier: SourceTier = tier.parse()?;
            builder = builder.tier(tier, ids);
        }
        for rule in file.patterns {
            let tier: SourceTier = rule.tier.parse()?;
            builder = builder.pattern(rule.pattern, tier);
        }
        builder.build()
    }

    /// Load a registry from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Tier of a source identifier.
    ///
    /// Exact entries win over patterns; patterns are tried in declaration
    /// order; anything else is tier C.
    pub fn tier_of(&self, source_id: &str) -> SourceTier {
        if let Some(tier) = self.exact.get(source_id) {
            return *tier;
        }

        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(source_id))
            .map(|(_, tier)| *tier)
            .unwrap_or(SourceTier::LOWEST)
    }

    /// Stable sort of sourced items by tier.
    pub fn rank<T: Sourced>(&self, items: Vec<T>) -> Vec<T> {
        self.rank_by(items, |item| item.source_id())
    }

    /// Stable sort by tier, with the source identifier extracted by `source_of`.
    pub fn rank_by<T, F>(&self, mut items: Vec<T>, source_of: F) -> Vec<T>
    where
        F: Fn(&T) -> &str,
    {
        // slice::sort_by_key is stable
        items.sort_by_key(|item| self.tier_of(source_of(item)).ordinal());
        items
    }

    /// Number of rules: exact entries plus patterns.
    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    /// Whether the registry has neither exact entries nor patterns.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }
}

impl Default for TierRegistry {
    fn default() -> Self {
        Self::legal_default()
    }
}

/// Builder for [`TierRegistry`].
///
/// Conflicts and bad patterns are collected and reported by [`build`](Self::build).
#[derive(Debug, Default)]
pub struct TierRegistryBuilder {
    exact: HashMap<String, SourceTier>,
    patterns: Vec<(String, SourceTier)>,
    conflict: Option<RegistryError>,
}

impl TierRegistryBuilder {
    /// Register identifiers under a tier.
    pub fn tier<I, S>(mut self, tier: SourceTier, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            let id = id.into();
            match self.exact.get(&id) {
                Some(existing) if *existing != tier => {
                    if self.conflict.is_none() {
                        self.conflict = Some(RegistryError::ConflictingTier {
                            source_id: id,
                            first: *existing,
                            second: tier,
                        });
                    }
                }
                _ => {
                    self.exact.insert(id, tier);
                }
            }
        }
        self
    }

    /// Register a regex rule, consulted after exact entries.
    pub fn pattern(mut self, pattern: impl Into<String>, tier: SourceTier) -> Self {
        self.patterns.push((pattern.into(), tier));
        self
    }

    /// Compile the registry.
    pub fn build(self) -> Result<TierRegistry, RegistryError> {
        if let Some(conflict) = self.conflict {
            return Err(conflict);
        }

        let patterns = self
            .patterns
            .into_iter()
            .map(|(pattern, tier)| {
                Regex::new(&pattern)
                    .map(|re| (re, tier))
                    .map_err(|e| RegistryError::InvalidPattern {
                        pattern,
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            exact = self.exact.len(),
            patterns = patterns.len(),
            "Tier registry built"
        );

        Ok(TierRegistry {
            exact: self.exact,
            patterns,
        })
    }
}
