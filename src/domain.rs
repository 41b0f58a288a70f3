use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Numeric identifier of a panel in the remote catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PanelId(u32);

impl PanelId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PanelId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        trimmed
            .parse::<u32>()
            .map(Self)
            .map_err(|_| SyncError::InvalidPanelId(value.to_string()))
    }
}

/// Confidence tiers used downstream. Tier 1 exists in the source data but is
/// never selected into genelists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfidenceTier {
    Amber,
    Green,
}

impl ConfidenceTier {
    pub fn name(&self) -> &'static str {
        match self {
            ConfidenceTier::Amber => "Amber",
            ConfidenceTier::Green => "Green",
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            ConfidenceTier::Amber => 2,
            ConfidenceTier::Green => 3,
        }
    }

    /// Matches the `confidence_level` column value of a gene row.
    pub fn matches_level(&self, level: &str) -> bool {
        match self {
            ConfidenceTier::Amber => level.trim() == "2",
            ConfidenceTier::Green => level.trim() == "3",
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Label format used in derived genelists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LabelMode {
    /// `<namespace>:<panel_id>.<TierName>`, e.g. `Paus:137.Green`.
    Namespaced,
    /// `<panel_id>_<tier_number>`, e.g. `4375_3`.
    Numeric,
}

/// Entity kinds a panel can carry. Only genes are populated today; `strs`
/// and `regions` are recognized and skipped by the merge stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Genes,
    Strs,
    Regions,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Genes => "genes",
            EntityKind::Strs => "strs",
            EntityKind::Regions => "regions",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed ISO-8601 timestamp used for all staleness comparisons.
///
/// The raw string is kept so markers sourced from the remote API round-trip
/// byte-for-byte; ordering and equality always go through the parsed instant.
#[derive(Debug, Clone)]
pub struct VersionStamp {
    raw: String,
    instant: DateTime<Utc>,
}

impl VersionStamp {
    pub fn now() -> Self {
        let instant = Utc::now();
        Self {
            raw: instant.to_rfc3339(),
            instant,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for VersionStamp {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(SyncError::InvalidTimestamp(value.to_string()));
        }
        let instant = DateTime::parse_from_rfc3339(trimmed)
            .map(|parsed| parsed.with_timezone(&Utc))
            .or_else(|_| {
                NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|naive| naive.and_utc())
            })
            .map_err(|_| SyncError::InvalidTimestamp(value.to_string()))?;
        Ok(Self {
            raw: trimmed.to_string(),
            instant,
        })
    }
}

impl PartialEq for VersionStamp {
    fn eq(&self, other: &Self) -> bool {
        self.instant == other.instant
    }
}

impl Eq for VersionStamp {}

impl PartialOrd for VersionStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.instant.cmp(&other.instant)
    }
}

/// One catalog entry: a panel's identity, version and declared entity counts.
#[derive(Debug, Clone)]
pub struct PanelInfo {
    pub id: PanelId,
    pub name: String,
    pub version: String,
    pub version_created: VersionStamp,
    pub number_of_genes: u64,
    pub number_of_strs: u64,
    pub number_of_regions: u64,
}

/// Column projection of a per-panel gene table, in output order.
pub const GENE_COLUMNS: [&str; 8] = [
    "symbol",
    "ensembl_id",
    "confidence_level",
    "penetrance",
    "mode_of_pathogenicity",
    "publications",
    "mode_of_inheritance",
    "tags",
];

/// One projected gene row. Absent source fields are empty strings, never an
/// error; list fields arrive comma-joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneRecord {
    pub symbol: String,
    pub ensembl_id: String,
    pub confidence_level: String,
    pub penetrance: String,
    pub mode_of_pathogenicity: String,
    pub publications: String,
    pub mode_of_inheritance: String,
    pub tags: String,
}

impl GeneRecord {
    pub fn header() -> String {
        GENE_COLUMNS.join("\t")
    }

    pub fn to_row(&self) -> String {
        [
            self.symbol.as_str(),
            self.ensembl_id.as_str(),
            self.confidence_level.as_str(),
            self.penetrance.as_str(),
            self.mode_of_pathogenicity.as_str(),
            self.publications.as_str(),
            self.mode_of_inheritance.as_str(),
            self.tags.as_str(),
        ]
        .join("\t")
    }
}
