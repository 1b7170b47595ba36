//! Native split tree + widget metadata → declarative tree.
//!
//! The native link tuple is lossy: `(s, 0, 0)` may be `ChildOf`, `SyncedWith`
//! or `BreakdownOf`, and `(s, c, 0)` may be `FilteredBy` or `ListedIn`. The
//! recovered link is a best guess; the raw tuple and the other candidates
//! are returned next to it.

use crate::authoring::dto::{LayoutNode, Link, LinkKind, LinkTarget};
use crate::native::{NativeNode, SplitAxis};
use crate::types::{
    ColumnInfo, ColumnRef, LinkTuple, SectionId, TableMap, TableRef, WidgetInfo, WidgetType,
    ROW_ID_COLUMN,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

const RATIO_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompileOptions {
    /// Emit `ExistingPane{link}` for linked widgets instead of bare leaves.
    pub reconstruct_links: bool,
    /// Fold same-axis chains back into one N-way split.
    pub flatten_chains: bool,
    /// Use column types and summary lineage to refine ambiguous links.
    pub schema_hints: bool,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            reconstruct_links: true,
            flatten_chains: false,
            schema_hints: false,
        }
    }
}

/// What the reverse transform knows about the document.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    pub tables: TableMap,
    pub columns: BTreeMap<TableRef, Vec<ColumnInfo>>,
    /// Summary table → the table it summarises.
    pub summary_of: BTreeMap<TableRef, TableRef>,
    /// Tables of link sources that are not on the page itself.
    pub section_tables: BTreeMap<SectionId, TableRef>,
}

impl SchemaSnapshot {
    fn column(&self, table: TableRef, col: ColumnRef) -> Option<&ColumnInfo> {
        self.columns
            .get(&table)
            .and_then(|cols| cols.iter().find(|c| c.col_ref == col))
    }

    /// Column id for `col` on `table`, `#<ref>` when the schema lacks it.
    fn column_name(&self, table: Option<TableRef>, col: ColumnRef) -> String {
        if !col.is_set() {
            return ROW_ID_COLUMN.to_string();
        }
        match table.and_then(|t| self.column(t, col)) {
            Some(info) => info.col_id.clone(),
            None => {
                warn!(col_ref = col.get(), ?table, "Column ref missing from schema");
                format!("#{}", col.get())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetSummary {
    pub section_id: SectionId,
    pub table: String,
    pub widget_type: WidgetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveredLink {
    /// Section that owns the link.
    pub section: SectionId,
    pub raw: LinkTuple,
    pub guess: Link,
    /// Other variants encoded by the same tuple.
    pub alternatives: Vec<LinkKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decompiled {
    pub layout: LayoutNode,
    pub widgets: Vec<WidgetSummary>,
    pub links: Vec<RecoveredLink>,
}

impl Decompiled {
    /// Rendered area share of every leaf, in traversal order.
    pub fn leaf_areas(&self) -> Vec<f64> {
        self.layout.pane_areas()
    }
}

pub fn decompile(
    native: &NativeNode,
    widgets: &BTreeMap<SectionId, WidgetInfo>,
    schema: &SchemaSnapshot,
    options: &DecompileOptions,
) -> Decompiled {
    let mut walker = Decompiler {
        widgets,
        schema,
        options,
        summaries: Vec::new(),
        links: Vec::new(),
    };
    let layout = walker.node(native);
    Decompiled {
        layout,
        widgets: walker.summaries,
        links: walker.links,
    }
}

struct Decompiler<'a> {
    widgets: &'a BTreeMap<SectionId, WidgetInfo>,
    schema: &'a SchemaSnapshot,
    options: &'a DecompileOptions,
    summaries: Vec<WidgetSummary>,
    links: Vec<RecoveredLink>,
}

impl Decompiler<'_> {
    fn node(&mut self, native: &NativeNode) -> LayoutNode {
        match native {
            NativeNode::Leaf { section } => self.leaf(*section),
            NativeNode::Split {
                axis,
                ratio,
                first,
                second,
            } => {
                let first = self.node(first);
                let second = self.node(second);
                self.split(*axis, *ratio, first, second)
            }
        }
    }

    fn split(&self, axis: SplitAxis, ratio: f64, first: LayoutNode, second: LayoutNode) -> LayoutNode {
        let same_axis = matches!(
            (axis, &second),
            (SplitAxis::Horizontal, LayoutNode::ColSplit { .. })
                | (SplitAxis::Vertical, LayoutNode::RowSplit { .. })
        );

        let (children, weights) = if self.options.flatten_chains && same_axis {
            let tail_weights = second.normalized_weights();
            let mut children = vec![first];
            children.extend(second.children().iter().cloned());
            let mut weights = vec![ratio];
            weights.extend(tail_weights.iter().map(|w| w * (1.0 - ratio)));
            (children, weights)
        } else {
            (vec![first, second], vec![ratio, 1.0 - ratio])
        };

        let weights = compress_weights(weights);
        match axis {
            SplitAxis::Horizontal => LayoutNode::ColSplit { children, weights },
            SplitAxis::Vertical => LayoutNode::RowSplit { children, weights },
        }
    }

    fn leaf(&mut self, section: SectionId) -> LayoutNode {
        let widgets = self.widgets;
        let Some(info) = widgets.get(&section) else {
            warn!(%section, "No widget metadata for leaf");
            return LayoutNode::leaf(section);
        };

        self.summaries.push(WidgetSummary {
            section_id: section,
            table: self.schema.tables.display_name(info.table_ref),
            widget_type: info.widget_type,
            title: info.title.clone(),
        });

        let recovered = info.link().map(|raw| self.recover_link(info, raw));
        match recovered {
            Some(link) if self.options.reconstruct_links => {
                let guess = link.guess.clone();
                self.links.push(link);
                LayoutNode::ExistingPane {
                    section,
                    name: None,
                    title: info.title.clone(),
                    description: info.description.clone(),
                    link: Some(guess),
                }
            }
            Some(link) => {
                self.links.push(link);
                LayoutNode::leaf(section)
            }
            None => LayoutNode::leaf(section),
        }
    }

    fn source_table(&self, section: SectionId) -> Option<TableRef> {
        self.widgets
            .get(&section)
            .map(|w| w.table_ref)
            .or_else(|| self.schema.section_tables.get(&section).copied())
    }

    fn recover_link(&self, owner: &WidgetInfo, raw: LinkTuple) -> RecoveredLink {
        let from = LinkTarget::Section(raw.src_section);
        let source_table = self.source_table(raw.src_section);
        let hints = self.options.schema_hints;

        let (guess, alternatives) = match (raw.src_col.is_set(), raw.target_col.is_set()) {
            (false, false) => {
                let summarises = source_table.is_some()
                    && self.schema.summary_of.get(&owner.table_ref).copied() == source_table;
                if hints && summarises {
                    (
                        Link::BreakdownOf { from },
                        vec![LinkKind::SyncedWith, LinkKind::ChildOf],
                    )
                } else {
                    (
                        Link::SyncedWith { from },
                        vec![LinkKind::ChildOf, LinkKind::BreakdownOf],
                    )
                }
            }
            (true, false) => {
                let col = self.schema.column_name(source_table, raw.src_col);
                let list_valued = source_table
                    .and_then(|t| self.schema.column(t, raw.src_col))
                    .is_some_and(ColumnInfo::is_list_valued);
                if hints && list_valued {
                    (Link::ListedIn { from, col }, vec![LinkKind::FilteredBy])
                } else {
                    (Link::FilteredBy { from, col }, vec![LinkKind::ListedIn])
                }
            }
            (_, true) => (
                Link::MatchedBy {
                    from,
                    col: self.schema.column_name(source_table, raw.src_col),
                    to: self.schema.column_name(Some(owner.table_ref), raw.target_col),
                },
                Vec::new(),
            ),
        };

        RecoveredLink {
            section: owner.section_id,
            raw,
            guess,
            alternatives,
        }
    }
}

/// Drop weights that describe an even split.
fn compress_weights(weights: Vec<f64>) -> Option<Vec<f64>> {
    let even = 1.0 / weights.len().max(1) as f64;
    if weights.iter().all(|w| (w - even).abs() < RATIO_EPSILON) {
        None
    } else {
        Some(weights)
    }
}
