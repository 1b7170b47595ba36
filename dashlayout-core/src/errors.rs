//! Typed compilation error model.
//!
//! Every failed compilation maps to one `CompileError` variant:
//!
//! ```text
//! validate / preflight → MalformedLayout | UnknownTable | UnknownColumn
//! create widgets       → CollaboratorFailure { step: create_widget }
//! drain deferred links → DanglingLinkTarget
//! apply bundle         → CollaboratorFailure { step: apply_mutations }
//! ```
//!
//! Everything before widget creation is side-effect free. Failures after it
//! carry the widgets already created so the caller can retry with
//! `LayoutNode::with_created_sections`.

use crate::authoring::dto::LinkTarget;
use crate::authoring::validate::ValidationError;
use crate::native::MutationKind;
use crate::types::{SectionId, TableRef, ViewRef, WidgetInfo};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "error_kind", rename_all = "snake_case")]
pub enum CompileError {
    /// Structural problems, all of them.
    #[error("Malformed layout:\n{}", join_issues(.issues))]
    MalformedLayout { issues: Vec<ValidationError> },

    #[error("Unknown table '{table}' in {pane}; known tables: {}", .known.join(", "))]
    UnknownTable {
        table: String,
        pane: String,
        known: Vec<String>,
    },

    #[error("Unknown column '{col_id}' on table {table} in {link}; known columns: {}", .known.join(", "))]
    UnknownColumn {
        table: String,
        col_id: String,
        link: String,
        known: Vec<String>,
    },

    /// Links whose target never received a real section id.
    #[error("Dangling link target: {}", join_dangling(.links))]
    DanglingLinkTarget {
        links: Vec<DanglingLink>,
        /// Independent panes created before the check. Not rolled back.
        #[serde(default)]
        created: Vec<WidgetInfo>,
    },

    #[error("Collaborator failure during {step}: {message}")]
    CollaboratorFailure {
        step: FailedStep,
        message: String,
        /// Widgets created before the failure. Not rolled back.
        created: Vec<WidgetInfo>,
    },
}

impl CompileError {
    /// Single-issue `MalformedLayout`.
    pub fn malformed(rule: &str, message: impl Into<String>) -> Self {
        CompileError::MalformedLayout {
            issues: vec![ValidationError::new(rule, message)],
        }
    }

    /// Widgets created before this error was raised.
    pub fn created(&self) -> &[WidgetInfo] {
        match self {
            CompileError::CollaboratorFailure { created, .. }
            | CompileError::DanglingLinkTarget { created, .. } => created,
            _ => &[],
        }
    }

    /// Attach the widgets created so far, for errors that can carry them.
    pub fn with_created(mut self, widgets: &[WidgetInfo]) -> Self {
        if let CompileError::CollaboratorFailure { created, .. }
        | CompileError::DanglingLinkTarget { created, .. } = &mut self
        {
            *created = widgets.to_vec();
        }
        self
    }

    /// Rule codes of a `MalformedLayout`, empty otherwise.
    pub fn rules(&self) -> Vec<&str> {
        match self {
            CompileError::MalformedLayout { issues } => {
                issues.iter().map(|i| i.rule.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            CompileError::MalformedLayout { .. } => "malformed_layout",
            CompileError::UnknownTable { .. } => "unknown_table",
            CompileError::UnknownColumn { .. } => "unknown_column",
            CompileError::DanglingLinkTarget { .. } => "dangling_link_target",
            CompileError::CollaboratorFailure { .. } => "collaborator_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanglingLink {
    /// Label of the pane that owns the link.
    pub owner: String,
    pub target: LinkTarget,
}

impl fmt::Display for DanglingLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.owner, self.target)
    }
}

/// The collaborator call that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum FailedStep {
    CreateWidget {
        pane_index: usize,
        table: TableRef,
    },
    ApplyMutations {
        /// Bundle index of the rejected mutation, when the collaborator said.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mutation: Option<MutationKind>,
    },
    FetchWidget {
        section: SectionId,
    },
    LoadSchema {
        table: TableRef,
    },
    LoadLayout {
        view: ViewRef,
    },
}

impl fmt::Display for FailedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailedStep::CreateWidget { pane_index, table } => {
                write!(f, "create_widget (pane {}, table {})", pane_index, table)
            }
            FailedStep::ApplyMutations {
                index: Some(i),
                mutation: Some(kind),
            } => write!(f, "apply_mutations ({} at index {})", kind, i),
            FailedStep::ApplyMutations { index: Some(i), .. } => {
                write!(f, "apply_mutations (index {})", i)
            }
            FailedStep::ApplyMutations { .. } => f.write_str("apply_mutations"),
            FailedStep::FetchWidget { section } => write!(f, "fetch_widget ({})", section),
            FailedStep::LoadSchema { table } => write!(f, "list_columns ({})", table),
            FailedStep::LoadLayout { view } => write!(f, "load_layout ({})", view),
        }
    }
}

fn join_issues(issues: &[ValidationError]) -> String {
    issues
        .iter()
        .map(|i| format!("  - {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

fn join_dangling(links: &[DanglingLink]) -> String {
    links
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
