//! Package lifecycle states and quarantine reason codes.
//!
//! Every package moves through a fixed sequence of stages, one state per
//! completed stage. The two terminal states are `Complete` and
//! `Quarantined`; once a package reaches either, no further transition is
//! accepted. Quarantine is reachable from every non-terminal state, so a
//! failure at any stage has somewhere to go.

use std::fmt;

use thiserror::Error;

/// Why a package was diverted to quarantine.
///
/// The string form names the subdirectory under `errors/` the package is
/// moved into, so these values must stay filesystem-safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    /// A descriptive report could not be fetched from the catalog.
    MetadataFetch,
    /// A report or catalog record did not have the expected structure.
    Schema,
    /// A WARC payload could not be downloaded.
    WarcFetch,
    /// A digest disagreed with the catalog's checksum, or could not be taken.
    Fixity,
    /// Payload decompression failed.
    Normalize,
    /// Assembling or finalizing the package directory failed.
    Layout,
}

impl ReasonCode {
    /// All reason codes, in stage order.
    pub const ALL: [ReasonCode; 6] = [
        ReasonCode::MetadataFetch,
        ReasonCode::Schema,
        ReasonCode::WarcFetch,
        ReasonCode::Fixity,
        ReasonCode::Normalize,
        ReasonCode::Layout,
    ];

    /// Returns the quarantine subdirectory name for this reason.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MetadataFetch => "metadata-fetch",
            Self::Schema => "schema",
            Self::WarcFetch => "warc-fetch",
            Self::Fixity => "fixity",
            Self::Normalize => "normalize",
            Self::Layout => "layout",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a transition is attempted out of a terminal state.
#[derive(Debug, Error)]
#[error("package already reached terminal state '{state}'")]
pub struct TerminalStateError {
    state: String,
}

/// Lifecycle state of one package build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    /// Identifier assigned, nothing fetched yet.
    Started,
    /// All descriptive reports are on disk.
    MetadataFetched,
    /// Credential columns scrubbed from the seed report.
    MetadataRedacted,
    /// All WARC payloads are on disk, sizes and transfer digests checked.
    WarcsFetched,
    /// At-rest digests match the catalog's checksums.
    FixityVerified,
    /// Payloads decompressed, compressed originals removed.
    Normalized,
    /// Package moved into the completed tree. Terminal.
    Complete,
    /// Package moved under `errors/<reason>/`. Terminal.
    Quarantined { reason: ReasonCode },
}

impl PackageState {
    /// Returns true for the two states that end a package's lifecycle.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Quarantined { .. })
    }

    /// Moves to the next state on the success path.
    ///
    /// # Errors
    ///
    /// Returns [`TerminalStateError`] if the package is already `Complete`
    /// or `Quarantined`.
    pub fn advance(self) -> Result<Self, TerminalStateError> {
        match self {
            Self::Started => Ok(Self::MetadataFetched),
            Self::MetadataFetched => Ok(Self::MetadataRedacted),
            Self::MetadataRedacted => Ok(Self::WarcsFetched),
            Self::WarcsFetched => Ok(Self::FixityVerified),
            Self::FixityVerified => Ok(Self::Normalized),
            Self::Normalized => Ok(Self::Complete),
            Self::Complete | Self::Quarantined { .. } => Err(TerminalStateError {
                state: self.to_string(),
            }),
        }
    }

    /// Diverts a non-terminal package to quarantine.
    ///
    /// # Errors
    ///
    /// Returns [`TerminalStateError`] if the package is already `Complete`
    /// or `Quarantined`; a finished package can never be re-routed.
    pub fn quarantine(self, reason: ReasonCode) -> Result<Self, TerminalStateError> {
        if self.is_terminal() {
            return Err(TerminalStateError {
                state: self.to_string(),
            });
        }
        Ok(Self::Quarantined { reason })
    }
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::MetadataFetched => write!(f, "metadata_fetched"),
            Self::MetadataRedacted => write!(f, "metadata_redacted"),
            Self::WarcsFetched => write!(f, "warcs_fetched"),
            Self::FixityVerified => write!(f, "fixity_verified"),
            Self::Normalized => write!(f, "normalized"),
            Self::Complete => write!(f, "complete"),
            Self::Quarantined { reason } => write!(f, "quarantined({reason})"),
        }
    }
}
