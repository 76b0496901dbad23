use std::fmt;

/// Classification used by per-item reporting; kinds, not type names (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthMissing,
    UrlMalformed,
    IndexCorrupt,
    InvariantViolation,
    RemoteTransient,
    RemoteFatal,
    MergeConflict,
    IoError,
}

impl ErrorKind {
    /// Kinds that abort the whole command rather than being collected per-item.
    pub fn is_fatal_to_command(self) -> bool {
        matches!(self, ErrorKind::AuthMissing | ErrorKind::IndexCorrupt)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AuthMissing => "AuthMissing",
            ErrorKind::UrlMalformed => "UrlMalformed",
            ErrorKind::IndexCorrupt => "IndexCorrupt",
            ErrorKind::InvariantViolation => "InvariantViolation",
            ErrorKind::RemoteTransient => "RemoteTransient",
            ErrorKind::RemoteFatal => "RemoteFatal",
            ErrorKind::MergeConflict => "MergeConflict",
            ErrorKind::IoError => "IoError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error tied to a single local path or remote page, as opposed to a
/// command-fatal `anyhow::Error`.
#[derive(Debug)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub item: String,
    pub source: anyhow::Error,
}

impl ItemError {
    pub fn fatal(kind: ErrorKind, item: impl Into<String>, source: impl Into<anyhow::Error>) -> anyhow::Error {
        anyhow::Error::new(ItemError {
            kind,
            item: item.into(),
            source: source.into(),
        })
    }

    pub fn new(kind: ErrorKind, item: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self {
            kind,
            item: item.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.kind, self.item, self.source)
    }
}

impl std::error::Error for ItemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

/// Outcome of one item (file or page) processed by an engine run.
#[derive(Debug, Clone)]
pub enum ItemStatus {
    Created,
    Updated,
    Skipped,
    Conflict,
    Failed(ErrorKind),
}

impl ItemStatus {
    fn label(&self) -> &'static str {
        match self {
            ItemStatus::Created => "created",
            ItemStatus::Updated => "updated",
            ItemStatus::Skipped => "skipped",
            ItemStatus::Conflict => "conflict",
            ItemStatus::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub item: String,
    pub url: Option<String>,
    pub status: ItemStatus,
    pub reason: Option<String>,
}

/// Collected outcomes for one command run; printed as a summary table,
/// then used to compute the process exit code.
#[derive(Debug, Default)]
pub struct Report {
    pub outcomes: Vec<ItemOutcome>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: impl Into<String>, url: Option<String>, status: ItemStatus, reason: Option<String>) {
        self.outcomes.push(ItemOutcome {
            item: item.into(),
            url,
            status,
            reason,
        });
    }

    pub fn has_fatal(&self) -> bool {
        self.outcomes.iter().any(|o| {
            matches!(
                o.status,
                ItemStatus::Failed(k) if matches!(k, ErrorKind::RemoteFatal | ErrorKind::IoError | ErrorKind::UrlMalformed | ErrorKind::InvariantViolation)
            )
        })
    }

    pub fn conflict_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ItemStatus::Conflict))
            .count()
    }

    pub fn exit_code(&self) -> i32 {
        if self.has_fatal() {
            1
        } else {
            0
        }
    }

    pub fn print_table(&self) {
        println!("{:<40} {:<10} {:<40} REASON", "ITEM", "STATUS", "URL");
        for outcome in &self.outcomes {
            println!(
                "{:<40} {:<10} {:<40} {}",
                outcome.item,
                outcome.status.label(),
                outcome.url.as_deref().unwrap_or("-"),
                outcome.reason.as_deref().unwrap_or("-"),
            );
        }
    }
}
