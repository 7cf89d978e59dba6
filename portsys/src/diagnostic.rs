//! Collected parse and validation diagnostics.
//!
//! Parsers in this crate report problems by pushing records into a
//! [`Diagnostics`] sink instead of failing on the first one, so a single
//! run over a manifest or a version database can surface every problem in
//! the file. A sink converts into one `anyhow::Error` at the command
//! boundary.

use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// One reported problem. `origin` names the file or source being parsed;
/// `line`/`col` are one-based when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub origin: Option<String>,
    pub line: Option<usize>,
    pub col: Option<usize>,
    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(origin) = &self.origin {
            write!(f, "{}:", origin)?;
            if let Some(line) = self.line {
                write!(f, "{}:", line)?;
                if let Some(col) = self.col {
                    write!(f, "{}:", col)?;
                }
            }
            write!(f, " ")?;
        }
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// An ordered collection of diagnostics for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    records: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, origin: impl Into<Origin>, message: impl Into<String>) {
        self.push(Severity::Error, origin.into(), message.into());
    }

    pub fn warning(&mut self, origin: impl Into<Origin>, message: impl Into<String>) {
        self.push(Severity::Warning, origin.into(), message.into());
    }

    fn push(&mut self, severity: Severity, origin: Origin, message: String) {
        self.records.push(Diagnostic {
            severity,
            origin: origin.name,
            line: origin.line,
            col: origin.col,
            message,
        });
    }

    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.severity == Severity::Error)
    }

    /// Move every record in `other` into this sink.
    pub fn absorb(&mut self, mut other: Diagnostics) {
        self.records.append(&mut other.records);
    }

    /// Move records from `other`, downgrading errors to warnings. Used
    /// where a subsystem wants to continue despite partial failure.
    pub fn absorb_as_warnings(&mut self, other: Diagnostics) {
        for mut record in other.records {
            record.severity = Severity::Warning;
            self.records.push(record);
        }
    }

    /// Log warnings, then either return `value` or an error joining every
    /// error-severity record.
    pub fn into_result<T>(self, value: T) -> anyhow::Result<T> {
        let mut errors = Vec::new();
        for record in self.records {
            match record.severity {
                Severity::Warning => log::warn!("{}", record),
                Severity::Error => errors.push(record.to_string()),
            }
        }
        if errors.is_empty() {
            Ok(value)
        } else {
            Err(anyhow::anyhow!("{}", errors.join("\n")))
        }
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, record) in self.records.iter().enumerate() {
            if i != 0 {
                writeln!(f)?;
            }
            write!(f, "{}", record)?;
        }
        Ok(())
    }
}

/// Where a diagnostic points. Built from a bare origin name or from an
/// `(origin, line, col)` triple.
#[derive(Debug, Clone, Default)]
pub struct Origin {
    pub name: Option<String>,
    pub line: Option<usize>,
    pub col: Option<usize>,
}

impl From<&str> for Origin {
    fn from(name: &str) -> Self {
        Origin {
            name: Some(name.to_string()),
            line: None,
            col: None,
        }
    }
}

impl From<String> for Origin {
    fn from(name: String) -> Self {
        Origin {
            name: Some(name),
            line: None,
            col: None,
        }
    }
}

impl From<&std::path::Path> for Origin {
    fn from(path: &std::path::Path) -> Self {
        Origin {
            name: Some(path.display().to_string()),
            line: None,
            col: None,
        }
    }
}

impl From<(&str, usize, usize)> for Origin {
    fn from((name, line, col): (&str, usize, usize)) -> Self {
        Origin {
            name: Some(name.to_string()),
            line: Some(line),
            col: Some(col),
        }
    }
}

impl From<(String, usize, usize)> for Origin {
    fn from((name, line, col): (String, usize, usize)) -> Self {
        Origin {
            name: Some(name),
            line: Some(line),
            col: Some(col),
        }
    }
}
