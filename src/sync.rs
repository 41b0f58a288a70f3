use std::fs;

use camino::Utf8Path;

use crate::domain::VersionStamp;
use crate::error::SyncError;
use crate::store::Store;

/// What a marker file on disk holds. Unparsable content is classified here,
/// at the single read boundary, so the "unparsable means stale" rule is not
/// scattered across stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerState {
    Missing,
    Unreadable,
    Recorded(VersionStamp),
}

impl MarkerState {
    pub fn recorded(&self) -> Option<&VersionStamp> {
        match self {
            MarkerState::Recorded(stamp) => Some(stamp),
            _ => None,
        }
    }
}

pub fn read_marker(path: &Utf8Path) -> MarkerState {
    if !path.as_std_path().exists() {
        return MarkerState::Missing;
    }
    let Ok(content) = fs::read_to_string(path.as_std_path()) else {
        return MarkerState::Unreadable;
    };
    match content.parse::<VersionStamp>() {
        Ok(stamp) => MarkerState::Recorded(stamp),
        Err(_) => MarkerState::Unreadable,
    }
}

pub fn write_marker(path: &Utf8Path, stamp: &VersionStamp) -> Result<(), SyncError> {
    Store::write_text_atomic(path, stamp.as_str())
}

/// Why an operation was judged stale. Ordered to match the rule set: the
/// first applicable reason wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    Forced,
    ArtifactMissing,
    MarkerMissing,
    MarkerUnreadable,
    SourceNewer,
    ExtractionMissing,
    ExtractionUnreadable,
    ExtractionOlder,
}

impl StaleReason {
    pub fn describe(&self) -> &'static str {
        match self {
            StaleReason::Forced => "forced regeneration",
            StaleReason::ArtifactMissing => "downstream artifact absent or empty",
            StaleReason::MarkerMissing => "version marker absent",
            StaleReason::MarkerUnreadable => "version marker unreadable",
            StaleReason::SourceNewer => "source version newer than marker",
            StaleReason::ExtractionMissing => "extraction marker absent",
            StaleReason::ExtractionUnreadable => "extraction marker unreadable",
            StaleReason::ExtractionOlder => "extraction marker older than source version",
        }
    }
}

/// Core staleness predicate, reused at every stage boundary. Returns the
/// first matching stale reason, or `None` when the artifact is up to date.
pub fn needs_regeneration(
    force: bool,
    artifact: &Utf8Path,
    marker: &MarkerState,
    current: &VersionStamp,
) -> Option<StaleReason> {
    if force {
        return Some(StaleReason::Forced);
    }
    if !artifact_usable(artifact) {
        return Some(StaleReason::ArtifactMissing);
    }
    match marker {
        MarkerState::Missing => Some(StaleReason::MarkerMissing),
        MarkerState::Unreadable => Some(StaleReason::MarkerUnreadable),
        MarkerState::Recorded(recorded) => {
            if current > recorded {
                Some(StaleReason::SourceNewer)
            } else {
                None
            }
        }
    }
}

/// Refetch variant: in addition to the core predicate, the extraction marker
/// must exist and be at least as new as the source version. This catches a
/// panel updated after its genes were last pulled but before the extraction
/// marker was touched.
pub fn needs_refetch(
    force: bool,
    artifact: &Utf8Path,
    marker: &MarkerState,
    extraction: &MarkerState,
    current: &VersionStamp,
) -> Option<StaleReason> {
    if let Some(reason) = needs_regeneration(force, artifact, marker, current) {
        return Some(reason);
    }
    match extraction {
        MarkerState::Missing => Some(StaleReason::ExtractionMissing),
        MarkerState::Unreadable => Some(StaleReason::ExtractionUnreadable),
        MarkerState::Recorded(extracted) => {
            if extracted < current {
                Some(StaleReason::ExtractionOlder)
            } else {
                None
            }
        }
    }
}

/// A usable artifact is a non-empty file or a directory with at least one
/// entry. Anything unreadable counts as absent.
pub fn artifact_usable(path: &Utf8Path) -> bool {
    let std_path = path.as_std_path();
    let Ok(metadata) = fs::metadata(std_path) else {
        return false;
    };
    if metadata.is_dir() {
        match fs::read_dir(std_path) {
            Ok(mut entries) => entries.next().is_some(),
            Err(_) => false,
        }
    } else {
        metadata.len() > 0
    }
}
