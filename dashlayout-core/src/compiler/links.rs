//! Link descriptors → native link tuples.
//!
//! `col` resolves on the source (`from`) table, `to` on the owning pane's
//! table. Column lists and summary lineage are fetched at most once per
//! table per compilation.

use crate::authoring::dto::Link;
use crate::client::DocumentClient;
use crate::config::CompilerConfig;
use crate::errors::{CompileError, FailedStep};
use crate::types::{ColumnInfo, ColumnRef, LinkTuple, SectionId, TableMap, TableRef, ROW_ID_COLUMN};
use std::collections::HashMap;
use tracing::debug;

/// Tables on both ends of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEnds {
    pub owner_table: TableRef,
    pub source_table: TableRef,
}

pub struct LinkResolver<'a> {
    client: &'a dyn DocumentClient,
    tables: &'a TableMap,
    check_column_kinds: bool,
    check_breakdown_lineage: bool,
    columns: HashMap<TableRef, Vec<ColumnInfo>>,
    lineage: HashMap<TableRef, Option<TableRef>>,
}

impl<'a> LinkResolver<'a> {
    pub fn new(client: &'a dyn DocumentClient, tables: &'a TableMap, config: &CompilerConfig) -> Self {
        Self {
            client,
            tables,
            check_column_kinds: config.check_column_kinds,
            check_breakdown_lineage: config.check_breakdown_lineage,
            columns: HashMap::new(),
            lineage: HashMap::new(),
        }
    }

    async fn columns(&mut self, table: TableRef) -> Result<&[ColumnInfo], CompileError> {
        if !self.columns.contains_key(&table) {
            let cols = self.client.list_columns(table).await.map_err(|e| {
                CompileError::CollaboratorFailure {
                    step: FailedStep::LoadSchema { table },
                    message: e.to_string(),
                    created: Vec::new(),
                }
            })?;
            debug!(%table, count = cols.len(), "Loaded columns");
            self.columns.insert(table, cols);
        }
        Ok(self.columns.get(&table).map(Vec::as_slice).unwrap_or(&[]))
    }

    async fn summary_source(&mut self, table: TableRef) -> Result<Option<TableRef>, CompileError> {
        if let Some(known) = self.lineage.get(&table) {
            return Ok(*known);
        }
        let source = self.client.summary_source(table).await.map_err(|e| {
            CompileError::CollaboratorFailure {
                step: FailedStep::LoadSchema { table },
                message: e.to_string(),
                created: Vec::new(),
            }
        })?;
        self.lineage.insert(table, source);
        Ok(source)
    }

    /// Look up `col_id` on `table`. `id` is the row-id pseudo-column.
    pub async fn resolve_column_ref(
        &mut self,
        table: TableRef,
        col_id: &str,
        link_label: &str,
    ) -> Result<ColumnInfo, CompileError> {
        if col_id == ROW_ID_COLUMN {
            return Ok(ColumnInfo::row_id());
        }
        let table_name = self.tables.display_name(table);
        let cols = self.columns(table).await?;
        match cols.iter().find(|c| c.col_id == col_id) {
            Some(col) => Ok(col.clone()),
            None => {
                let mut known: Vec<String> = cols.iter().map(|c| c.col_id.clone()).collect();
                known.push(ROW_ID_COLUMN.to_string());
                known.sort();
                Err(CompileError::UnknownColumn {
                    table: table_name,
                    col_id: col_id.to_string(),
                    link: link_label.to_string(),
                    known,
                })
            }
        }
    }

    /// Resolve and check the columns of `link` without building a tuple.
    /// Returns `(src_col, target_col)`.
    pub async fn check(
        &mut self,
        link: &Link,
        ends: LinkEnds,
        label: &str,
    ) -> Result<(ColumnRef, ColumnRef), CompileError> {
        let link_label = format!("{} on {}", link, label);

        let src_col = match link.source_col() {
            Some(col_id) => {
                let col = self
                    .resolve_column_ref(ends.source_table, col_id, &link_label)
                    .await?;
                if self.check_column_kinds {
                    check_column_kind(link, &col, &link_label)?;
                }
                col.col_ref
            }
            None => ColumnRef::UNSET,
        };

        let target_col = match link.target_col() {
            Some(col_id) => {
                self.resolve_column_ref(ends.owner_table, col_id, &link_label)
                    .await?
                    .col_ref
            }
            None => ColumnRef::UNSET,
        };

        if self.check_breakdown_lineage && matches!(link, Link::BreakdownOf { .. }) {
            let source = self.summary_source(ends.owner_table).await?;
            if source != Some(ends.source_table) {
                return Err(CompileError::malformed(
                    "L10",
                    format!(
                        "{}: table {} is not a summary of {}",
                        link_label,
                        self.tables.display_name(ends.owner_table),
                        self.tables.display_name(ends.source_table)
                    ),
                ));
            }
        }

        Ok((src_col, target_col))
    }

    /// Build the native tuple for `link` whose target resolved to `source`.
    pub async fn resolve(
        &mut self,
        link: &Link,
        source: SectionId,
        ends: LinkEnds,
        label: &str,
    ) -> Result<LinkTuple, CompileError> {
        let (src_col, target_col) = self.check(link, ends, label).await?;
        Ok(LinkTuple {
            src_section: source,
            src_col,
            target_col,
        })
    }
}

fn check_column_kind(link: &Link, col: &ColumnInfo, link_label: &str) -> Result<(), CompileError> {
    match link {
        Link::ListedIn { .. } if !col.is_list_valued() => Err(CompileError::malformed(
            "L9",
            format!(
                "{}: ListedIn needs a list-valued column, '{}' is {}",
                link_label, col.col_id, col.col_type
            ),
        )),
        Link::FilteredBy { .. } if col.is_list_valued() => Err(CompileError::malformed(
            "L9",
            format!(
                "{}: '{}' is list-valued ({}); use ListedIn",
                link_label, col.col_id, col.col_type
            ),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authoring::dto::LinkTarget;
    use crate::memory::MemoryDocument;

    fn doc() -> MemoryDocument {
        MemoryDocument::new()
            .with_table("Orders", &[("Customer", "Ref:Customers"), ("Tags", "RefList:Tags")])
            .with_table("Customers", &[("Name", "Text"), ("Region", "Text")])
            .with_summary_table("Orders_summary_Customer", "Orders", &[("count", "Int")])
    }

    fn ends(doc: &MemoryDocument, owner: &str, source: &str) -> LinkEnds {
        LinkEnds {
            owner_table: doc.table_ref(owner).unwrap(),
            source_table: doc.table_ref(source).unwrap(),
        }
    }

    fn from() -> LinkTarget {
        LinkTarget::Section(SectionId::new(1))
    }

    #[tokio::test]
    async fn test_cursor_links_have_no_columns() {
        let doc = doc();
        let tables = doc.table_map();
        let config = CompilerConfig::default();
        let mut resolver = LinkResolver::new(&doc, &tables, &config);

        for link in [Link::ChildOf { from: from() }, Link::SyncedWith { from: from() }] {
            let tuple = resolver
                .resolve(&link, SectionId::new(1), ends(&doc, "Customers", "Orders"), "pane 1")
                .await
                .unwrap();
            assert_eq!(tuple, LinkTuple::cursor(SectionId::new(1)));
        }
        assert_eq!(doc.column_calls(), 0);
    }

    #[tokio::test]
    async fn test_matched_by_resolves_both_sides() {
        let doc = doc();
        let tables = doc.table_map();
        let config = CompilerConfig::default();
        let mut resolver = LinkResolver::new(&doc, &tables, &config);

        let link = Link::MatchedBy {
            from: from(),
            col: "Customer".into(),
            to: "Region".into(),
        };
        let tuple = resolver
            .resolve(&link, SectionId::new(5), ends(&doc, "Customers", "Orders"), "pane 1")
            .await
            .unwrap();
        assert_eq!(tuple.src_section, SectionId::new(5));
        assert_eq!(tuple.src_col, doc.column_ref("Orders", "Customer").unwrap());
        assert_eq!(tuple.target_col, doc.column_ref("Customers", "Region").unwrap());
    }

    #[tokio::test]
    async fn test_row_id_column_is_zero() {
        let doc = doc();
        let tables = doc.table_map();
        let config = CompilerConfig::default();
        let mut resolver = LinkResolver::new(&doc, &tables, &config);

        let link = Link::MatchedBy {
            from: from(),
            col: "id".into(),
            to: "Customer".into(),
        };
        let tuple = resolver
            .resolve(&link, SectionId::new(2), ends(&doc, "Orders", "Customers"), "pane 1")
            .await
            .unwrap();
        assert_eq!(tuple.src_col, ColumnRef::UNSET);
        assert_eq!(tuple.target_col, doc.column_ref("Orders", "Customer").unwrap());
    }

    #[tokio::test]
    async fn test_unknown_column_lists_known() {
        let doc = doc();
        let tables = doc.table_map();
        let config = CompilerConfig::default();
        let mut resolver = LinkResolver::new(&doc, &tables, &config);

        let link = Link::FilteredBy {
            from: from(),
            col: "Nope".into(),
        };
        let err = resolver
            .check(&link, ends(&doc, "Customers", "Orders"), "pane 1")
            .await
            .unwrap_err();
        match err {
            CompileError::UnknownColumn {
                table,
                col_id,
                known,
                ..
            } => {
                assert_eq!(table, "Orders");
                assert_eq!(col_id, "Nope");
                assert_eq!(known, vec!["Customer", "Tags", "id"]);
            }
            other => panic!("Expected UnknownColumn, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_column_kind_checks() {
        let doc = doc();
        let tables = doc.table_map();
        let config = CompilerConfig::default();
        let mut resolver = LinkResolver::new(&doc, &tables, &config);
        let e = ends(&doc, "Customers", "Orders");

        let listed_scalar = Link::ListedIn {
            from: from(),
            col: "Customer".into(),
        };
        let err = resolver.check(&listed_scalar, e, "pane 1").await.unwrap_err();
        assert_eq!(err.rules(), vec!["L9"]);

        let filtered_list = Link::FilteredBy {
            from: from(),
            col: "Tags".into(),
        };
        let err = resolver.check(&filtered_list, e, "pane 1").await.unwrap_err();
        assert_eq!(err.rules(), vec!["L9"]);

        let listed = Link::ListedIn {
            from: from(),
            col: "Tags".into(),
        };
        let (src, target) = resolver.check(&listed, e, "pane 1").await.unwrap();
        assert_eq!(src, doc.column_ref("Orders", "Tags").unwrap());
        assert_eq!(target, ColumnRef::UNSET);

        // Columns of Orders were fetched once.
        assert_eq!(doc.column_calls(), 1);
    }

    #[tokio::test]
    async fn test_column_kind_check_can_be_disabled() {
        let doc = doc();
        let tables = doc.table_map();
        let config = CompilerConfig {
            check_column_kinds: false,
            ..CompilerConfig::default()
        };
        let mut resolver = LinkResolver::new(&doc, &tables, &config);
        let link = Link::FilteredBy {
            from: from(),
            col: "Tags".into(),
        };
        assert!(resolver
            .check(&link, ends(&doc, "Customers", "Orders"), "pane 1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_breakdown_lineage() {
        let doc = doc();
        let tables = doc.table_map();
        let config = CompilerConfig::default();
        let mut resolver = LinkResolver::new(&doc, &tables, &config);
        let link = Link::BreakdownOf { from: from() };

        let ok = resolver
            .resolve(
                &link,
                SectionId::new(1),
                ends(&doc, "Orders_summary_Customer", "Orders"),
                "pane 1",
            )
            .await
            .unwrap();
        assert_eq!(ok, LinkTuple::cursor(SectionId::new(1)));

        let err = resolver
            .check(&link, ends(&doc, "Customers", "Orders"), "pane 1")
            .await
            .unwrap_err();
        assert_eq!(err.rules(), vec!["L10"]);
    }
}
