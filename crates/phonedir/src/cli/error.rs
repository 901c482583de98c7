//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use phonedir::{ErrorKind, StoreError};
use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
    /// Store error category, when the failure came from the store
    pub kind: Option<ErrorKind>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
            kind: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions
            .extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    /// No configuration and no `--root`
    pub fn no_root(config_path: &Path) -> Self {
        Self::new("No directory root configured")
            .with_context(format!("Config file: {}", config_path.display()))
            .with_suggestions([
                "TRY: Pass the root explicitly: phonedir --root /srv/phonedir <command>".to_string(),
                "TRY: Save it once: phonedir --root /srv/phonedir config --save".to_string(),
            ])
    }

    pub fn file_not_found(path: &Path) -> Self {
        Self::new(format!("File not found: {}", path.display()))
            .with_context("The specified file does not exist")
            .with_suggestion(format!("TRY: Check if the file exists: ls -la {}", path.display()))
    }

    pub fn csv_parse_error(path: &Path, line: usize, details: &str) -> Self {
        Self::new(format!("CSV parse error at line {}: {}", line, details))
            .with_context(format!("Failed to parse CSV file: {}", path.display()))
            .with_suggestions([
                "TRY: Verify the CSV file is well-formed".to_string(),
                format!("TRY: Inspect the raw file: head -n {} {}", line + 5, path.display()),
            ])
    }

    /// Wrap a store failure with a hint matching its category.
    pub fn from_store(action: &str, err: StoreError) -> Self {
        let kind = err.kind();
        let base = Self::new(format!("{} failed: {}", action, err));
        let helped = match &err {
            StoreError::NotFound(_) => base
                .with_suggestion("TRY: List what exists: phonedir zones, phonedir zone show <id>"),
            StoreError::Validation(_) => base
                .with_context("Numbers are digits only; departments may not contain ' - '"),
            StoreError::Conflict(_) => {
                base.with_suggestion("TRY: Look for the existing entry: phonedir ext find <number>")
            }
            StoreError::Parse { path, .. } => base
                .with_context(format!("Malformed record file: {}", path.display()))
                .with_suggestion("TRY: Run phonedir verify to list every damaged file"),
            StoreError::Io { path, .. } => base
                .with_context(format!("File: {}", path.display()))
                .with_suggestion("TRY: Check permissions on the directory root"),
            StoreError::Lock(_) => base
                .with_context("Another writer is holding the record")
                .with_suggestion("TRY: Retry, or raise lock_timeout_ms in the config"),
            StoreError::PartialFailure(_) => base
                .with_context("Some steps completed; the rest were left in place")
                .with_suggestion("TRY: Fix the failed step and run the command again"),
        };
        Self {
            kind: Some(kind),
            ..helped
        }
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Print an error as a JSON object on stdout.
pub fn print_json_error(err: &anyhow::Error) {
    let value = match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => serde_json::json!({
            "success": false,
            "error": helpful.message,
            "kind": helpful.kind,
            "context": helpful.context,
            "suggestions": helpful.suggestions,
        }),
        None => serde_json::json!({
            "success": false,
            "error": format!("{:#}", err),
        }),
    };
    println!("{}", value);
}
