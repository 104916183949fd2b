use std::fmt;

/// Machine-readable error codes for scripted callers and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    AlreadyInitialized,
    ConfigParseError,
    MalformedRecord,
    DuplicateRecords,
    MissingStore,
    ManifestMismatch,
    StoreWriteFailed,
    PendingPoolUnreadable,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::AlreadyInitialized => "E1003",
            Self::ConfigParseError => "E1002",
            Self::MalformedRecord => "E2001",
            Self::DuplicateRecords => "E2002",
            Self::MissingStore => "E3001",
            Self::ManifestMismatch => "E3002",
            Self::StoreWriteFailed => "E5001",
            Self::PendingPoolUnreadable => "E5002",
            Self::LockContention => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Project not initialized",
            Self::AlreadyInitialized => "Project already initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::MalformedRecord => "Malformed record row",
            Self::DuplicateRecords => "Source overlaps records already in the store",
            Self::MissingStore => "Canonical record store missing",
            Self::ManifestMismatch => "Store manifest mismatch",
            Self::StoreWriteFailed => "Record store write failed",
            Self::PendingPoolUnreadable => "Pending pool unreadable",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `tally init` to initialize this directory."),
            Self::AlreadyInitialized => {
                Some("Use `tally init --force` to rewrite the config; stored records are kept.")
            }
            Self::ConfigParseError => Some("Fix syntax in .tally/config.toml and retry."),
            Self::MalformedRecord => {
                Some("Correct the reported row in the pending source and rerun `tally consolidate`.")
            }
            Self::DuplicateRecords => {
                Some("Remove rows already consolidated from the pending source, then retry.")
            }
            Self::MissingStore => {
                Some("Restore .tally/records.csv from backup or run `tally init --force`.")
            }
            Self::ManifestMismatch => {
                Some("The store was edited outside tally; inspect it before consolidating.")
            }
            Self::StoreWriteFailed => Some("Check disk space and write permissions."),
            Self::PendingPoolUnreadable => Some("Check that the pending directory exists and is readable."),
            Self::LockContention => Some("Retry after the other `tally` process releases its lock."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
