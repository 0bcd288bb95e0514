//! Source adaptation models

use serde::{Deserialize, Serialize};

/// Address pattern families the code adapter understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// `host="127.0.0.1"` style bind arguments
    BindAddress,

    /// `http://localhost:5000` style URLs
    LocalUrl,

    /// Bare `localhost:5000` host and port pairs
    HostPort,
}

/// One edit, applied or found already in place
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationEdit {
    /// Path relative to the repository root
    pub file: String,

    /// 1-based line of the match
    pub line: usize,

    pub pattern: PatternKind,

    pub original: String,

    pub replacement: String,
}

impl AdaptationEdit {
    /// True when the text was already in its adapted form
    pub fn is_zero_effect(&self) -> bool {
        self.original == self.replacement
    }
}

/// A file that could not be read or rewritten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationFailure {
    pub file: String,
    pub reason: String,
}

/// Outcome of one adaptation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationResult {
    #[serde(default)]
    pub edits: Vec<AdaptationEdit>,

    #[serde(default)]
    pub failures: Vec<AdaptationFailure>,
}

impl AdaptationResult {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Edits that changed a file
    pub fn effective_edits(&self) -> impl Iterator<Item = &AdaptationEdit> {
        self.edits.iter().filter(|e| !e.is_zero_effect())
    }

    /// Files changed by this pass, sorted and deduplicated
    pub fn modified_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.effective_edits().map(|e| e.file.clone()).collect();
        files.sort();
        files.dedup();
        files
    }
}
