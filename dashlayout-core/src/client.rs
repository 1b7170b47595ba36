use crate::native::{Mutation, NativeNode};
use crate::types::{ColumnInfo, SectionId, TableRef, ViewRef, WidgetInfo, WidgetType};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of one widget creation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedWidget {
    pub section_id: SectionId,
    pub view_ref: ViewRef,
}

/// Raised by `apply_mutations` when one mutation of the bundle is refused.
/// Mutations before `index` may already be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Mutation {index} rejected: {reason}")]
pub struct MutationRejected {
    pub index: usize,
    pub reason: String,
}

/// The document engine, as far as the compiler needs it.
#[async_trait]
pub trait DocumentClient: Send + Sync {
    // ── Writes ──

    /// Create a widget on `view`, or on a new page when `view` is `None`.
    async fn create_widget(
        &self,
        table: TableRef,
        widget_type: WidgetType,
        view: Option<ViewRef>,
    ) -> Result<CreatedWidget>;

    /// Apply a mutation bundle in order. A refused mutation should surface as
    /// a `MutationRejected` so the failing index can be reported.
    async fn apply_mutations(&self, mutations: &[Mutation]) -> Result<()>;

    // ── Reads ──

    async fn fetch_widget(&self, section: SectionId) -> Result<Option<WidgetInfo>>;

    async fn load_layout(&self, view: ViewRef) -> Result<Option<NativeNode>>;

    /// Columns of `table`, without the row-id pseudo-column.
    async fn list_columns(&self, table: TableRef) -> Result<Vec<ColumnInfo>>;

    /// The table `table` summarises, if it is a summary table.
    async fn summary_source(&self, table: TableRef) -> Result<Option<TableRef>>;
}
