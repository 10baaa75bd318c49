//! Bug reports and their diagnostic text format.

use crate::prelude::*;
use crate::solver::SmtStatus;

/// A single reported bug.
///
/// Rendered as a block of the diagnostic stream:
///
/// ```text
/// ---
/// bug: umul overflow on size passed to __kmalloc
/// taint: syscall
/// status: sat
/// stack:
///  - drivers/net/dev.c:1024:17
/// ```
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct BugReport {
    /// A free-form description of the bug.
    pub message: String,
    /// The comma-joined taint descriptor list of the sink. May be empty.
    pub taint: String,
    /// The solver's verdict for the query.
    pub status: SmtStatus,
    /// `path:line:column` entries of the source scope chain, innermost first.
    pub stack: Vec<String>,
}

impl std::fmt::Display for BugReport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(formatter, "---")?;
        writeln!(formatter, "bug: {}", self.message)?;
        writeln!(formatter, "taint: {}", self.taint)?;
        writeln!(formatter, "status: {}", self.status)?;
        writeln!(formatter, "stack: ")?;
        for entry in &self.stack {
            writeln!(formatter, " - {entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_format() {
        let report = BugReport {
            message: "umul overflow on size passed to __kmalloc".to_string(),
            taint: "syscall".to_string(),
            status: SmtStatus::Sat,
            stack: vec!["net/core/dev.c:12:3".to_string()],
        };
        let rendered = format!("{report}");
        assert!(rendered.starts_with("---\n"));
        assert!(rendered.contains("bug: umul overflow on size passed to __kmalloc\n"));
        assert!(rendered.contains("taint: syscall\n"));
        assert!(rendered.contains("status: sat\n"));
        assert!(rendered.contains(" - net/core/dev.c:12:3\n"));
    }
}
