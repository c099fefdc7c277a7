// src/interrupt/cause.rs

use std::fmt;
use std::io::{self, Write};

/// Coarse category of an interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CauseKind {
    /// A named user asked for the abort.
    User,
    /// The process or node is shutting down.
    Shutdown,
    /// Some other piece of code interrupted the execution.
    Programmatic,
}

/// Immutable description of why an execution was cancelled.
///
/// Two causes are the same cause when kind and detail are equal; that is
/// what [`CauseSet`] deduplicates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterruptionCause {
    kind: CauseKind,
    detail: Option<String>,
}

impl InterruptionCause {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: CauseKind::User,
            detail: Some(name.into()),
        }
    }

    pub fn shutdown() -> Self {
        Self {
            kind: CauseKind::Shutdown,
            detail: None,
        }
    }

    pub fn programmatic(detail: Option<String>) -> Self {
        Self {
            kind: CauseKind::Programmatic,
            detail,
        }
    }

    pub fn kind(&self) -> CauseKind {
        self.kind
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// One-line, human-readable description.
    pub fn short_description(&self) -> String {
        match (self.kind, self.detail.as_deref()) {
            (CauseKind::User, Some(user)) => format!("Aborted by {user}"),
            (CauseKind::User, None) => "Aborted by an unknown user".to_string(),
            (CauseKind::Shutdown, _) => "Aborted for shutdown".to_string(),
            (CauseKind::Programmatic, Some(detail)) => format!("Aborted: {detail}"),
            (CauseKind::Programmatic, None) => "Aborted".to_string(),
        }
    }

    /// Report this cause to a build listener.
    pub fn print(&self, listener: &mut dyn Write) -> io::Result<()> {
        writeln!(listener, "{}", self.short_description())
    }
}

impl fmt::Display for InterruptionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_description())
    }
}

/// Insertion-ordered set of causes, deduplicated by value.
///
/// Interrupt sets are tiny (usually one or two entries), so a `Vec` with a
/// linear `contains` is all that is needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CauseSet {
    causes: Vec<InterruptionCause>,
}

impl CauseSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cause; returns `false` if an equal cause was already present.
    pub fn insert(&mut self, cause: InterruptionCause) -> bool {
        if self.causes.contains(&cause) {
            return false;
        }
        self.causes.push(cause);
        true
    }

    pub fn len(&self) -> usize {
        self.causes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterruptionCause> {
        self.causes.iter()
    }

    /// Remove and return every cause, leaving the set empty.
    pub fn take(&mut self) -> Vec<InterruptionCause> {
        std::mem::take(&mut self.causes)
    }

    pub fn to_vec(&self) -> Vec<InterruptionCause> {
        self.causes.clone()
    }
}

impl Extend<InterruptionCause> for CauseSet {
    fn extend<I: IntoIterator<Item = InterruptionCause>>(&mut self, iter: I) {
        for cause in iter {
            self.insert(cause);
        }
    }
}

impl FromIterator<InterruptionCause> for CauseSet {
    fn from_iter<I: IntoIterator<Item = InterruptionCause>>(iter: I) -> Self {
        let mut set = CauseSet::new();
        set.extend(iter);
        set
    }
}
