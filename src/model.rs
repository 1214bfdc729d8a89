//! Payload types of the mutation server methods.
//!
//! Field names follow the engine's camelCase JSON.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::protocol::ProgressToken;

/// Parameters of `instrument`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentParams {
    /// Files to instrument; all files when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob_patterns: Option<Vec<String>>,
}

/// Parameters of `mutate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutateParams {
    /// Files to mutate; all files when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob_patterns: Option<Vec<String>>,
    /// Token the engine tags this run's progress notifications with.
    pub partial_result_token: ProgressToken,
}

impl MutateParams {
    /// Mutate everything, reporting progress under `token`.
    pub fn new(token: impl Into<ProgressToken>) -> Self {
        Self {
            glob_patterns: None,
            partial_result_token: token.into(),
        }
    }

    /// Restrict the run to the given glob patterns.
    pub fn with_glob_patterns(mut self, patterns: Vec<String>) -> Self {
        self.glob_patterns = Some(patterns);
        self
    }
}

/// Value carried by each `progress` notification of a `mutate` run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutatePartialResult {
    /// Mutants that finished since the previous notification.
    #[serde(default)]
    pub mutants: Vec<MutantResult>,
}

/// A position in a source file (1-based line, 1-based column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// A source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// First character of the range.
    pub start: Position,
    /// Position just past the range.
    pub end: Position,
}

/// Outcome of a mutant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutantStatus {
    Killed,
    Survived,
    NoCoverage,
    CompileError,
    RuntimeError,
    Timeout,
    Ignored,
    Pending,
    /// A status this client does not know; kept verbatim.
    Other(String),
}

impl MutantStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &str {
        match self {
            MutantStatus::Killed => "Killed",
            MutantStatus::Survived => "Survived",
            MutantStatus::NoCoverage => "NoCoverage",
            MutantStatus::CompileError => "CompileError",
            MutantStatus::RuntimeError => "RuntimeError",
            MutantStatus::Timeout => "Timeout",
            MutantStatus::Ignored => "Ignored",
            MutantStatus::Pending => "Pending",
            MutantStatus::Other(other) => other,
        }
    }

    /// Whether the mutant has a final verdict.
    pub fn is_final(&self) -> bool {
        !matches!(self, MutantStatus::Pending)
    }
}

impl From<&str> for MutantStatus {
    fn from(value: &str) -> Self {
        match value {
            "Killed" => MutantStatus::Killed,
            "Survived" => MutantStatus::Survived,
            "NoCoverage" => MutantStatus::NoCoverage,
            "CompileError" => MutantStatus::CompileError,
            "RuntimeError" => MutantStatus::RuntimeError,
            "Timeout" => MutantStatus::Timeout,
            "Ignored" => MutantStatus::Ignored,
            "Pending" => MutantStatus::Pending,
            other => MutantStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MutantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MutantStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MutantStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(MutantStatus::from(raw.as_str()))
    }
}

/// A single mutant as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutantResult {
    /// Engine-assigned id, unique within a run.
    pub id: String,
    /// Mutator that produced the mutant, e.g. `EqualityOperator`.
    pub mutator_name: String,
    /// Replacement source text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    /// File the mutant lives in.
    pub file_name: String,
    /// Mutated range.
    pub location: Location,
    /// Outcome.
    pub status: MutantStatus,
    /// Engine's explanation of the status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ids of the tests that cover the mutant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covered_by: Option<Vec<String>>,
    /// Ids of the tests that killed the mutant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub killed_by: Option<Vec<String>>,
    /// Tests run against the mutant. A JSON number on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_completed: Option<f64>,
    /// Milliseconds spent testing this mutant. Often fractional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Whether the mutant is in static code.
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub is_static: Option<bool>,
}
