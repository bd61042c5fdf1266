use std::fmt;

/// Kind of installable unit a backend knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolvableKind {
    Package,
    SrcPackage,
    Pattern,
    Patch,
    Product,
    /// Anything the backend reports that is not one of the above.
    Unknown,
}

impl ResolvableKind {
    /// Maps the backend's free-form kind string. Unrecognised kinds become
    /// [`ResolvableKind::Unknown`].
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "package" | "pkg" => Self::Package,
            "srcpackage" | "srcpkg" | "source" => Self::SrcPackage,
            "pattern" => Self::Pattern,
            "patch" => Self::Patch,
            "product" => Self::Product,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::SrcPackage => "srcpackage",
            Self::Pattern => "pattern",
            Self::Patch => "patch",
            Self::Product => "product",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ResolvableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the resolvable an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvableRef {
    pub kind: ResolvableKind,
    pub name: String,
    pub version: String,
    pub arch: String,
}

impl ResolvableRef {
    pub fn new(
        kind: ResolvableKind,
        name: impl Into<String>,
        version: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            version: version.into(),
            arch: arch.into(),
        }
    }
}

impl fmt::Display for ResolvableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.name, self.version, self.arch)
    }
}

/// A progress value that always lies in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Percent(u8);

impl Percent {
    pub const ZERO: Percent = Percent(0);
    pub const FULL: Percent = Percent(100);

    /// Clamps any backend-reported value into range.
    pub fn clamped(raw: i64) -> Self {
        Self(raw.clamp(0, 100) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Per-resolvable operation an event stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Download,
    Install,
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Download => "download",
            Self::Install => "install",
            Self::Remove => "remove",
        })
    }
}

/// Progress notifications of one commit transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitEvent {
    DownloadStart {
        resolvable: ResolvableRef,
    },
    DownloadProgress {
        resolvable: ResolvableRef,
        percent: Percent,
    },
    DownloadEnd {
        resolvable: ResolvableRef,
    },
    /// The package was already in the backend's cache; no download happened.
    DownloadCached {
        resolvable: ResolvableRef,
    },
    DownloadError {
        resolvable: ResolvableRef,
        message: String,
    },
    InstallStart {
        resolvable: ResolvableRef,
    },
    InstallProgress {
        resolvable: ResolvableRef,
        percent: Percent,
    },
    InstallEnd {
        resolvable: ResolvableRef,
    },
    InstallError {
        resolvable: ResolvableRef,
        message: String,
    },
    RemoveStart {
        resolvable: ResolvableRef,
    },
    RemoveProgress {
        resolvable: ResolvableRef,
        percent: Percent,
    },
    RemoveEnd {
        resolvable: ResolvableRef,
    },
    RemoveError {
        resolvable: ResolvableRef,
        message: String,
    },
    ConflictCheckStart,
    ConflictCheckProgress {
        percent: Percent,
    },
    /// File conflicts found by the check; empty when there are none.
    ConflictCheckResult {
        conflicts: Vec<String>,
    },
}

/// Fieldless mirror of [`CommitEvent`], handy for filtering and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitEventKind {
    DownloadStart,
    DownloadProgress,
    DownloadEnd,
    DownloadCached,
    DownloadError,
    InstallStart,
    InstallProgress,
    InstallEnd,
    InstallError,
    RemoveStart,
    RemoveProgress,
    RemoveEnd,
    RemoveError,
    ConflictCheckStart,
    ConflictCheckProgress,
    ConflictCheckResult,
}

impl CommitEventKind {
    pub const ALL: [CommitEventKind; 16] = [
        Self::DownloadStart,
        Self::DownloadProgress,
        Self::DownloadEnd,
        Self::DownloadCached,
        Self::DownloadError,
        Self::InstallStart,
        Self::InstallProgress,
        Self::InstallEnd,
        Self::InstallError,
        Self::RemoveStart,
        Self::RemoveProgress,
        Self::RemoveEnd,
        Self::RemoveError,
        Self::ConflictCheckStart,
        Self::ConflictCheckProgress,
        Self::ConflictCheckResult,
    ];

    pub fn operation(self) -> Option<Operation> {
        match self {
            Self::DownloadStart
            | Self::DownloadProgress
            | Self::DownloadEnd
            | Self::DownloadCached
            | Self::DownloadError => Some(Operation::Download),
            Self::InstallStart | Self::InstallProgress | Self::InstallEnd | Self::InstallError => {
                Some(Operation::Install)
            }
            Self::RemoveStart | Self::RemoveProgress | Self::RemoveEnd | Self::RemoveError => {
                Some(Operation::Remove)
            }
            Self::ConflictCheckStart | Self::ConflictCheckProgress | Self::ConflictCheckResult => {
                None
            }
        }
    }

    pub fn is_start(self) -> bool {
        matches!(
            self,
            Self::DownloadStart | Self::InstallStart | Self::RemoveStart
        )
    }

    /// Whether this kind closes a per-resolvable stream.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::DownloadEnd
                | Self::DownloadCached
                | Self::DownloadError
                | Self::InstallEnd
                | Self::InstallError
                | Self::RemoveEnd
                | Self::RemoveError
        )
    }
}

impl CommitEvent {
    pub fn kind(&self) -> CommitEventKind {
        match self {
            Self::DownloadStart { .. } => CommitEventKind::DownloadStart,
            Self::DownloadProgress { .. } => CommitEventKind::DownloadProgress,
            Self::DownloadEnd { .. } => CommitEventKind::DownloadEnd,
            Self::DownloadCached { .. } => CommitEventKind::DownloadCached,
            Self::DownloadError { .. } => CommitEventKind::DownloadError,
            Self::InstallStart { .. } => CommitEventKind::InstallStart,
            Self::InstallProgress { .. } => CommitEventKind::InstallProgress,
            Self::InstallEnd { .. } => CommitEventKind::InstallEnd,
            Self::InstallError { .. } => CommitEventKind::InstallError,
            Self::RemoveStart { .. } => CommitEventKind::RemoveStart,
            Self::RemoveProgress { .. } => CommitEventKind::RemoveProgress,
            Self::RemoveEnd { .. } => CommitEventKind::RemoveEnd,
            Self::RemoveError { .. } => CommitEventKind::RemoveError,
            Self::ConflictCheckStart => CommitEventKind::ConflictCheckStart,
            Self::ConflictCheckProgress { .. } => CommitEventKind::ConflictCheckProgress,
            Self::ConflictCheckResult { .. } => CommitEventKind::ConflictCheckResult,
        }
    }

    pub fn operation(&self) -> Option<Operation> {
        self.kind().operation()
    }

    pub fn resolvable(&self) -> Option<&ResolvableRef> {
        match self {
            Self::DownloadStart { resolvable }
            | Self::DownloadProgress { resolvable, .. }
            | Self::DownloadEnd { resolvable }
            | Self::DownloadCached { resolvable }
            | Self::DownloadError { resolvable, .. }
            | Self::InstallStart { resolvable }
            | Self::InstallProgress { resolvable, .. }
            | Self::InstallEnd { resolvable }
            | Self::InstallError { resolvable, .. }
            | Self::RemoveStart { resolvable }
            | Self::RemoveProgress { resolvable, .. }
            | Self::RemoveEnd { resolvable }
            | Self::RemoveError { resolvable, .. } => Some(resolvable),
            Self::ConflictCheckStart
            | Self::ConflictCheckProgress { .. }
            | Self::ConflictCheckResult { .. } => None,
        }
    }

    pub fn percent(&self) -> Option<Percent> {
        match self {
            Self::DownloadProgress { percent, .. }
            | Self::InstallProgress { percent, .. }
            | Self::RemoveProgress { percent, .. }
            | Self::ConflictCheckProgress { percent } => Some(*percent),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::DownloadError { message, .. }
            | Self::InstallError { message, .. }
            | Self::RemoveError { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn conflicts(&self) -> Option<&[String]> {
        match self {
            Self::ConflictCheckResult { conflicts } => Some(conflicts),
            _ => None,
        }
    }

    /// Builds the Start event of `operation` for `resolvable`.
    pub fn start(operation: Operation, resolvable: ResolvableRef) -> Self {
        match operation {
            Operation::Download => Self::DownloadStart { resolvable },
            Operation::Install => Self::InstallStart { resolvable },
            Operation::Remove => Self::RemoveStart { resolvable },
        }
    }

    pub fn progress(operation: Operation, resolvable: ResolvableRef, percent: Percent) -> Self {
        match operation {
            Operation::Download => Self::DownloadProgress { resolvable, percent },
            Operation::Install => Self::InstallProgress { resolvable, percent },
            Operation::Remove => Self::RemoveProgress { resolvable, percent },
        }
    }

    pub fn end(operation: Operation, resolvable: ResolvableRef) -> Self {
        match operation {
            Operation::Download => Self::DownloadEnd { resolvable },
            Operation::Install => Self::InstallEnd { resolvable },
            Operation::Remove => Self::RemoveEnd { resolvable },
        }
    }

    pub fn error(operation: Operation, resolvable: ResolvableRef, message: String) -> Self {
        match operation {
            Operation::Download => Self::DownloadError { resolvable, message },
            Operation::Install => Self::InstallError { resolvable, message },
            Operation::Remove => Self::RemoveError { resolvable, message },
        }
    }
}

/// Repository identity carried by catalog events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub alias: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(alias: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.alias == self.name {
            f.write_str(&self.alias)
        } else {
            write!(f, "{} ({})", self.name, self.alias)
        }
    }
}

/// Repository lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoEvent {
    /// An enabled repository was discovered.
    Found { repo: RepoRef },
    RefreshStart { repo: RepoRef },
    RefreshDone { repo: RepoRef },
    RefreshError { repo: RepoRef, reason: String },
    /// Refresh was not attempted; cached metadata is used.
    RefreshSkipped { repo: RepoRef, reason: String },
    LoadError { repo: RepoRef, reason: String },
}

impl RepoEvent {
    pub fn repo(&self) -> &RepoRef {
        match self {
            Self::Found { repo }
            | Self::RefreshStart { repo }
            | Self::RefreshDone { repo }
            | Self::RefreshError { repo, .. }
            | Self::RefreshSkipped { repo, .. }
            | Self::LoadError { repo, .. } => repo,
        }
    }
}

/// Everything delivered through an [`EventSink`](crate::EventSink).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Repo(RepoEvent),
    Commit(CommitEvent),
}

impl From<RepoEvent> for Event {
    fn from(event: RepoEvent) -> Self {
        Self::Repo(event)
    }
}

impl From<CommitEvent> for Event {
    fn from(event: CommitEvent) -> Self {
        Self::Commit(event)
    }
}

impl Event {
    pub fn as_commit(&self) -> Option<&CommitEvent> {
        match self {
            Self::Commit(event) => Some(event),
            Self::Repo(_) => None,
        }
    }

    pub fn as_repo(&self) -> Option<&RepoEvent> {
        match self {
            Self::Repo(event) => Some(event),
            Self::Commit(_) => None,
        }
    }
}
