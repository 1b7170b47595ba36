use crate::client::{CreatedWidget, DocumentClient, MutationRejected};
use crate::native::{Mutation, NativeNode};
use crate::types::{
    ColumnInfo, ColumnRef, SectionId, TableMap, TableRef, ViewRef, WidgetInfo, WidgetType,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockWriteGuard};

// ── Fixture format ──

/// JSON description of a document, loaded by tests and the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentFixture {
    #[serde(default)]
    pub tables: Vec<TableFixture>,
    #[serde(default)]
    pub pages: Vec<PageFixture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableFixture {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnFixture>,
    /// Name of the table this one summarises.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_of: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnFixture {
    pub id: String,
    #[serde(rename = "type", default = "default_col_type")]
    pub col_type: String,
}

fn default_col_type() -> String {
    "Text".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageFixture {
    pub view: ViewRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<NativeNode>,
    #[serde(default)]
    pub widgets: Vec<WidgetInfo>,
}

// ── MemoryDocument ──

#[derive(Debug, Clone)]
struct TableState {
    name: String,
    columns: Vec<ColumnInfo>,
    summary_of: Option<TableRef>,
}

#[derive(Debug, Default)]
struct DocumentState {
    tables: BTreeMap<TableRef, TableState>,
    widgets: BTreeMap<SectionId, WidgetInfo>,
    widget_views: BTreeMap<SectionId, ViewRef>,
    layouts: BTreeMap<ViewRef, Option<NativeNode>>,
    next_table: u32,
    next_column: u32,
    next_section: u32,
    next_view: u32,
    fail_create_at: Option<usize>,
    reject_mutation_at: Option<usize>,
    create_calls: usize,
    apply_calls: usize,
    column_calls: usize,
}

impl DocumentState {
    fn table_by_name(&self, name: &str) -> Option<TableRef> {
        self.tables
            .iter()
            .find(|(_, t)| t.name == name)
            .map(|(r, _)| *r)
    }

    fn add_table(&mut self, name: &str, columns: &[(&str, &str)], summary_of: Option<TableRef>) {
        self.next_table += 1;
        let table = TableRef::new(self.next_table);
        let columns = columns
            .iter()
            .map(|(id, ty)| {
                self.next_column += 1;
                ColumnInfo::new(ColumnRef::new(self.next_column), *id, *ty)
            })
            .collect();
        self.tables.insert(
            table,
            TableState {
                name: name.to_string(),
                columns,
                summary_of,
            },
        );
    }

    fn add_widget(&mut self, view: ViewRef, info: WidgetInfo) {
        self.next_section = self.next_section.max(info.section_id.get());
        self.next_view = self.next_view.max(view.get());
        self.layouts.entry(view).or_insert(None);
        self.widget_views.insert(info.section_id, view);
        self.widgets.insert(info.section_id, info);
    }

    fn apply_one(&mut self, mutation: &Mutation) -> std::result::Result<(), String> {
        match mutation {
            Mutation::SetLayout { view, layout } => {
                if !self.layouts.contains_key(view) {
                    return Err(format!("Unknown view {}", view));
                }
                for section in layout.leaves() {
                    if self.widget_views.get(section) != Some(view) {
                        return Err(format!("Section {} is not on view {}", section, view));
                    }
                }
                self.layouts.insert(*view, Some(layout.clone()));
            }
            Mutation::SetLink { section, link } => {
                if !self.widgets.contains_key(&link.src_section) {
                    return Err(format!("Unknown link source {}", link.src_section));
                }
                let widget = self
                    .widgets
                    .get(section)
                    .ok_or_else(|| format!("Unknown section {}", section))?;
                let updated = widget.with_link(Some(*link));
                self.widgets.insert(*section, updated);
            }
            Mutation::SetSectionInfo {
                section,
                title,
                description,
            } => {
                let widget = self
                    .widgets
                    .get(section)
                    .ok_or_else(|| format!("Unknown section {}", section))?;
                let updated = widget.with_section_info(title.as_deref(), description.as_deref());
                self.widgets.insert(*section, updated);
            }
        }
        Ok(())
    }
}

/// In-memory document engine for tests and the CLI.
///
/// Table refs are assigned from 1 in insertion order; column refs increase
/// across the whole document starting at 1. Failures can be injected for one
/// creation call or one bundle mutation.
pub struct MemoryDocument {
    inner: RwLock<DocumentState>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(DocumentState::default()),
        }
    }

    pub fn from_fixture(fixture: &DocumentFixture) -> Result<Self> {
        let mut doc = Self::new();
        {
            let state = doc.state_mut();
            for table in &fixture.tables {
                let summary_of = match &table.summary_of {
                    Some(source) => Some(state.table_by_name(source).ok_or_else(|| {
                        anyhow!(
                            "Table '{}' summarises unknown table '{}' (list sources first)",
                            table.name,
                            source
                        )
                    })?),
                    None => None,
                };
                let columns: Vec<(&str, &str)> = table
                    .columns
                    .iter()
                    .map(|c| (c.id.as_str(), c.col_type.as_str()))
                    .collect();
                state.add_table(&table.name, &columns, summary_of);
            }
            for page in &fixture.pages {
                state.next_view = state.next_view.max(page.view.get());
                state.layouts.insert(page.view, page.layout.clone());
                for widget in &page.widgets {
                    if !state.tables.contains_key(&widget.table_ref) {
                        return Err(anyhow!(
                            "Widget {} uses unknown table {}",
                            widget.section_id,
                            widget.table_ref
                        ));
                    }
                    state.add_widget(page.view, widget.clone());
                }
            }
        }
        Ok(doc)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let fixture: DocumentFixture =
            serde_json::from_str(json).context("Failed to parse document fixture")?;
        Self::from_fixture(&fixture)
    }

    fn state_mut(&mut self) -> &mut DocumentState {
        self.inner.get_mut().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, DocumentState>> {
        self.inner.write().map_err(|e| anyhow!("Lock: {}", e))
    }

    // ── Builder ──

    pub fn with_table(mut self, name: &str, columns: &[(&str, &str)]) -> Self {
        self.state_mut().add_table(name, columns, None);
        self
    }

    /// Add a summary table of `source`, which must already exist.
    pub fn with_summary_table(mut self, name: &str, source: &str, columns: &[(&str, &str)]) -> Self {
        let state = self.state_mut();
        let source = state.table_by_name(source);
        state.add_table(name, columns, source);
        self
    }

    /// Place an existing widget on `view`.
    pub fn with_widget(mut self, view: ViewRef, info: WidgetInfo) -> Self {
        self.state_mut().add_widget(view, info);
        self
    }

    pub fn with_layout(mut self, view: ViewRef, layout: NativeNode) -> Self {
        let state = self.state_mut();
        state.next_view = state.next_view.max(view.get());
        state.layouts.insert(view, Some(layout));
        self
    }

    /// Fail the `n`th creation call (0-based, counted over the document's life).
    pub fn fail_create_at(mut self, n: usize) -> Self {
        self.state_mut().fail_create_at = Some(n);
        self
    }

    /// Reject the mutation at bundle index `index` in the next bundle.
    pub fn reject_mutation_at(mut self, index: usize) -> Self {
        self.state_mut().reject_mutation_at = Some(index);
        self
    }

    // ── Inspection ──

    pub fn table_ref(&self, name: &str) -> Option<TableRef> {
        self.inner.read().ok()?.table_by_name(name)
    }

    /// Name → ref map of every table, as a caller would pass it in.
    pub fn table_map(&self) -> TableMap {
        match self.inner.read() {
            Ok(state) => state
                .tables
                .iter()
                .map(|(r, t)| (t.name.clone(), *r))
                .collect(),
            Err(_) => TableMap::new(),
        }
    }

    pub fn column_ref(&self, table: &str, col_id: &str) -> Option<ColumnRef> {
        let state = self.inner.read().ok()?;
        let table = state.table_by_name(table)?;
        state.tables[&table]
            .columns
            .iter()
            .find(|c| c.col_id == col_id)
            .map(|c| c.col_ref)
    }

    pub fn widget(&self, section: SectionId) -> Option<WidgetInfo> {
        self.inner.read().ok()?.widgets.get(&section).cloned()
    }

    pub fn layout(&self, view: ViewRef) -> Option<NativeNode> {
        self.inner.read().ok()?.layouts.get(&view).cloned().flatten()
    }

    pub fn widget_count(&self) -> usize {
        self.inner.read().map(|s| s.widgets.len()).unwrap_or(0)
    }

    pub fn create_calls(&self) -> usize {
        self.inner.read().map(|s| s.create_calls).unwrap_or(0)
    }

    pub fn apply_calls(&self) -> usize {
        self.inner.read().map(|s| s.apply_calls).unwrap_or(0)
    }

    pub fn column_calls(&self) -> usize {
        self.inner.read().map(|s| s.column_calls).unwrap_or(0)
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentClient for MemoryDocument {
    async fn create_widget(
        &self,
        table: TableRef,
        widget_type: WidgetType,
        view: Option<ViewRef>,
    ) -> Result<CreatedWidget> {
        let mut state = self.write()?;
        let call = state.create_calls;
        state.create_calls += 1;

        if state.fail_create_at == Some(call) {
            return Err(anyhow!("Injected failure creating {} widget on {}", widget_type, table));
        }
        if !state.tables.contains_key(&table) {
            return Err(anyhow!("Unknown table {}", table));
        }

        let view = match view {
            Some(v) if state.layouts.contains_key(&v) => v,
            Some(v) => return Err(anyhow!("Unknown view {}", v)),
            None => {
                state.next_view += 1;
                ViewRef::new(state.next_view)
            }
        };
        state.next_section += 1;
        let section_id = SectionId::new(state.next_section);
        state.add_widget(view, WidgetInfo::new(section_id, table, widget_type));

        // A fresh page shows its first widget until a layout is set.
        let layout = state.layouts.entry(view).or_insert(None);
        if layout.is_none() {
            *layout = Some(NativeNode::leaf(section_id));
        }

        Ok(CreatedWidget {
            section_id,
            view_ref: view,
        })
    }

    async fn apply_mutations(&self, mutations: &[Mutation]) -> Result<()> {
        let mut state = self.write()?;
        state.apply_calls += 1;
        let reject_at = state.reject_mutation_at.take();

        for (index, mutation) in mutations.iter().enumerate() {
            if reject_at == Some(index) {
                return Err(MutationRejected {
                    index,
                    reason: "Injected rejection".to_string(),
                }
                .into());
            }
            state
                .apply_one(mutation)
                .map_err(|reason| MutationRejected { index, reason })?;
        }
        Ok(())
    }

    async fn fetch_widget(&self, section: SectionId) -> Result<Option<WidgetInfo>> {
        let state = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(state.widgets.get(&section).cloned())
    }

    async fn load_layout(&self, view: ViewRef) -> Result<Option<NativeNode>> {
        let state = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(state.layouts.get(&view).cloned().flatten())
    }

    async fn list_columns(&self, table: TableRef) -> Result<Vec<ColumnInfo>> {
        let mut state = self.write()?;
        state.column_calls += 1;
        state
            .tables
            .get(&table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| anyhow!("Unknown table {}", table))
    }

    async fn summary_source(&self, table: TableRef) -> Result<Option<TableRef>> {
        let state = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        state
            .tables
            .get(&table)
            .map(|t| t.summary_of)
            .ok_or_else(|| anyhow!("Unknown table {}", table))
    }
}
