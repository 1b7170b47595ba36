//! Runs one compilation against a document.
//!
//! ```text
//! plan (validate, lower, register)      no side effects
//! preflight (fetch, columns, lineage)   read-only
//! create widgets in traversal order     drain deferred links after each
//! dangling check                        nothing applied if any remain
//! apply layout + links + section info   one bundle, no rollback
//! ```

use crate::authoring::dto::{LayoutRequest, LinkTarget};
use crate::authoring::validate::ValidationError;
use crate::client::{DocumentClient, MutationRejected};
use crate::compiler::forward::{self, CompilePlan};
use crate::compiler::links::{LinkEnds, LinkResolver};
use crate::compiler::registry::{PaneRef, PendingLink, WidgetRegistry};
use crate::compiler::reverse::{decompile, Decompiled, SchemaSnapshot};
use crate::config::CompilerConfig;
use crate::errors::{CompileError, DanglingLink, FailedStep};
use crate::native::{Mutation, NativeNode};
use crate::types::{LinkTuple, SectionId, TableMap, TableRef, ViewRef, WidgetInfo};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Result of a successful compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileOutcome {
    pub compilation_id: Uuid,
    pub view: ViewRef,
    pub layout: NativeNode,
    /// The bundle as applied.
    pub mutations: Vec<Mutation>,
    /// Post-mutation state of every pane, in traversal order.
    pub widgets: Vec<WidgetInfo>,
    /// Sections created by this run, in traversal order.
    pub created: Vec<SectionId>,
    /// SHA-256 of the JSON-encoded bundle.
    pub fingerprint: String,
}

pub struct LayoutCompiler {
    client: Arc<dyn DocumentClient>,
    config: CompilerConfig,
}

/// What preflight learned about existing widgets.
struct Preflight {
    /// Table of every pane, in traversal order.
    pane_tables: Vec<Option<TableRef>>,
    widgets: BTreeMap<SectionId, WidgetInfo>,
}

impl Preflight {
    fn ends(&self, registry: &WidgetRegistry, link: &PendingLink) -> Option<LinkEnds> {
        let owner_table = self.pane_tables.get(link.owner_index).copied().flatten()?;
        let source_table = match registry.target_pane_index(&link.target) {
            Some(index) => self.pane_tables.get(index).copied().flatten()?,
            None => match &link.target {
                LinkTarget::Section(section) => self.widgets.get(section)?.table_ref,
                LinkTarget::Pane(_) => return None,
            },
        };
        Some(LinkEnds {
            owner_table,
            source_table,
        })
    }
}

impl LayoutCompiler {
    pub fn new(client: Arc<dyn DocumentClient>) -> Self {
        Self {
            client,
            config: CompilerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Compile `request` and apply it to the document.
    #[instrument(skip(self, request), fields(compilation_id))]
    pub async fn compile(&self, request: &LayoutRequest) -> Result<CompileOutcome, CompileError> {
        let compilation_id = Uuid::now_v7();
        tracing::Span::current().record("compilation_id", compilation_id.to_string());

        let mut plan = forward::plan(request.layout.as_ref(), &request.tables)?;
        if request.view.is_none() && plan.creations.is_empty() {
            return Err(CompileError::malformed(
                "L12",
                "No target view and no new pane to create one",
            ));
        }
        info!(
            panes = plan.panes.len(),
            creations = plan.creations.len(),
            links = plan.links.len(),
            "Compiling layout"
        );

        let client = self.client.as_ref();
        let mut resolver = LinkResolver::new(client, &request.tables, &self.config);
        let preflight = preflight(client, &mut plan, &mut resolver).await?;

        // Links between panes that already exist resolve now.
        let mut resolved: BTreeMap<usize, LinkTuple> = BTreeMap::new();
        for pending in plan.links.clone() {
            if plan.registry.is_resolvable(&pending) {
                let tuple = resolve_pending(&plan, &preflight, &mut resolver, &pending).await?;
                resolved.insert(pending.owner_index, tuple);
            } else {
                debug!(owner = pending.owner_index, target = %pending.target, "Deferring link");
                plan.registry.defer_link(pending);
            }
        }

        let mut view = request.view;
        let mut created: Vec<WidgetInfo> = Vec::new();
        for creation in &plan.creations {
            let widget = client
                .create_widget(creation.table, creation.widget_type, view)
                .await
                .map_err(|e| CompileError::CollaboratorFailure {
                    step: FailedStep::CreateWidget {
                        pane_index: creation.pane_index,
                        table: creation.table,
                    },
                    message: e.to_string(),
                    created: created.clone(),
                })?;
            debug!(
                pane = creation.pane_index,
                placeholder = %creation.placeholder,
                section = %widget.section_id,
                "Created widget"
            );
            if view.is_none() {
                view = Some(widget.view_ref);
            }
            plan.registry.resolve(creation.placeholder, widget.section_id);
            created.push(WidgetInfo::new(
                widget.section_id,
                creation.table,
                creation.widget_type,
            ));

            for pending in plan.registry.drain_resolvable() {
                let tuple = resolve_pending(&plan, &preflight, &mut resolver, &pending)
                    .await
                    .map_err(|e| e.with_created(&created))?;
                debug!(owner = pending.owner_index, link = %tuple, "Resolved deferred link");
                resolved.insert(pending.owner_index, tuple);
            }
        }

        if !plan.registry.pending().is_empty() {
            let links: Vec<DanglingLink> = plan
                .registry
                .pending()
                .iter()
                .map(|p| DanglingLink {
                    owner: plan.panes[p.owner_index].label.clone(),
                    target: p.target.clone(),
                })
                .collect();
            warn!(count = links.len(), "Dangling link targets; nothing applied");
            return Err(CompileError::DanglingLinkTarget { links, created });
        }

        let view = view.ok_or_else(|| CompileError::malformed("L12", "No target view"))?;
        let layout = plan.native_layout()?;
        let mutations = plan.mutations(view, layout.clone(), &resolved)?;

        if let Err(e) = client.apply_mutations(&mutations).await {
            let index = e.downcast_ref::<MutationRejected>().map(|r| r.index);
            warn!(?index, error = %e, "Mutation bundle failed");
            return Err(CompileError::CollaboratorFailure {
                step: FailedStep::ApplyMutations {
                    index,
                    mutation: index.and_then(|i| mutations.get(i)).map(Mutation::kind),
                },
                message: e.to_string(),
                created,
            });
        }

        let widgets = final_widgets(&plan, &preflight, &created, &resolved)?;
        let fingerprint = fingerprint(&mutations);
        info!(
            %view,
            created = created.len(),
            mutations = mutations.len(),
            %fingerprint,
            "Layout applied"
        );

        Ok(CompileOutcome {
            compilation_id,
            view,
            layout,
            mutations,
            widgets,
            created: created.iter().map(|w| w.section_id).collect(),
            fingerprint,
        })
    }

    /// Load `view` and decompile it back to a declarative tree.
    #[instrument(skip(self, tables))]
    pub async fn read_back(&self, view: ViewRef, tables: &TableMap) -> Result<Decompiled, CompileError> {
        let client = self.client.as_ref();
        let load_failed = |message: String| CompileError::CollaboratorFailure {
            step: FailedStep::LoadLayout { view },
            message,
            created: Vec::new(),
        };
        let native = client
            .load_layout(view)
            .await
            .map_err(|e| load_failed(e.to_string()))?
            .ok_or_else(|| load_failed(format!("View {} has no layout", view)))?;

        let mut widgets = BTreeMap::new();
        for section in native.leaves() {
            let info = fetch(client, *section)
                .await?
                .ok_or_else(|| CompileError::CollaboratorFailure {
                    step: FailedStep::FetchWidget { section: *section },
                    message: format!("Section {} not found", section),
                    created: Vec::new(),
                })?;
            widgets.insert(*section, info);
        }

        let mut schema = SchemaSnapshot {
            tables: tables.clone(),
            ..SchemaSnapshot::default()
        };
        for info in widgets.values() {
            let Some(link) = info.link() else { continue };
            if widgets.contains_key(&link.src_section)
                || schema.section_tables.contains_key(&link.src_section)
            {
                continue;
            }
            match fetch(client, link.src_section).await? {
                Some(source) => {
                    schema.section_tables.insert(link.src_section, source.table_ref);
                }
                None => warn!(section = %link.src_section, "Link source missing from document"),
            }
        }

        let table_refs: BTreeSet<TableRef> = widgets
            .values()
            .map(|w| w.table_ref)
            .chain(schema.section_tables.values().copied())
            .collect();
        for table in table_refs {
            let schema_failed = |e: anyhow::Error| CompileError::CollaboratorFailure {
                step: FailedStep::LoadSchema { table },
                message: e.to_string(),
                created: Vec::new(),
            };
            let columns = client.list_columns(table).await.map_err(schema_failed)?;
            schema.columns.insert(table, columns);
            if let Some(source) = client.summary_source(table).await.map_err(schema_failed)? {
                schema.summary_of.insert(table, source);
            }
        }

        let decompiled = decompile(&native, &widgets, &schema, &self.config.reverse);
        info!(
            widgets = decompiled.widgets.len(),
            links = decompiled.links.len(),
            "Read back layout"
        );
        Ok(decompiled)
    }
}

async fn fetch(
    client: &dyn DocumentClient,
    section: SectionId,
) -> Result<Option<WidgetInfo>, CompileError> {
    client
        .fetch_widget(section)
        .await
        .map_err(|e| CompileError::CollaboratorFailure {
            step: FailedStep::FetchWidget { section },
            message: e.to_string(),
            created: Vec::new(),
        })
}

/// Read-only checks before the first creation call.
async fn preflight(
    client: &dyn DocumentClient,
    plan: &mut CompilePlan,
    resolver: &mut LinkResolver<'_>,
) -> Result<Preflight, CompileError> {
    let mut pane_tables: Vec<Option<TableRef>> = plan.panes.iter().map(|p| p.table).collect();
    let mut widgets = BTreeMap::new();
    let mut missing = Vec::new();

    for pane in &plan.panes {
        let PaneRef::Real(section) = pane.pane_ref else {
            continue;
        };
        match fetch(client, section).await? {
            Some(info) => {
                pane_tables[pane.index] = Some(info.table_ref);
                widgets.insert(section, info);
            }
            None => missing.push(ValidationError::new(
                "L11",
                format!("{}: section {} does not exist", pane.label, section),
            )),
        }
    }
    if !missing.is_empty() {
        return Err(CompileError::MalformedLayout { issues: missing });
    }

    // Numeric link targets outside the tree.
    for link in &plan.links {
        let LinkTarget::Section(section) = &link.target else {
            continue;
        };
        if plan.registry.target_pane_index(&link.target).is_some()
            || widgets.contains_key(section)
        {
            continue;
        }
        match fetch(client, *section).await? {
            Some(info) => {
                plan.registry.mark_known(*section);
                widgets.insert(*section, info);
            }
            None => debug!(%section, "Link source not in document"),
        }
    }

    let preflight = Preflight {
        pane_tables,
        widgets,
    };
    for link in &plan.links {
        if let Some(ends) = preflight.ends(&plan.registry, link) {
            resolver
                .check(&link.link, ends, &plan.panes[link.owner_index].label)
                .await?;
        }
    }
    Ok(preflight)
}

async fn resolve_pending(
    plan: &CompilePlan,
    preflight: &Preflight,
    resolver: &mut LinkResolver<'_>,
    pending: &PendingLink,
) -> Result<LinkTuple, CompileError> {
    let label = &plan.panes[pending.owner_index].label;
    let source = plan.registry.lookup_target(&pending.target).ok_or_else(|| {
        CompileError::malformed("L13", format!("{}: link target {} unresolved", label, pending.target))
    })?;
    let ends = preflight.ends(&plan.registry, pending).ok_or_else(|| {
        CompileError::malformed("L13", format!("{}: link tables unknown", label))
    })?;
    resolver.resolve(&pending.link, source, ends, label).await
}

fn final_widgets(
    plan: &CompilePlan,
    preflight: &Preflight,
    created: &[WidgetInfo],
    resolved: &BTreeMap<usize, LinkTuple>,
) -> Result<Vec<WidgetInfo>, CompileError> {
    let mut out = Vec::with_capacity(plan.panes.len());
    for pane in &plan.panes {
        let section = plan.section_of(pane.index)?;
        let base = created
            .iter()
            .find(|w| w.section_id == section)
            .or_else(|| preflight.widgets.get(&section));
        let Some(base) = base else { continue };

        let mut info = base.clone();
        if let Some(link) = resolved.get(&pane.index) {
            info = info.with_link(Some(*link));
        }
        if pane.title.is_some() || pane.description.is_some() {
            info = info.with_section_info(pane.title.as_deref(), pane.description.as_deref());
        }
        out.push(info);
    }
    Ok(out)
}

fn fingerprint(mutations: &[Mutation]) -> String {
    let payload = serde_json::to_vec(mutations).unwrap_or_default();
    Sha256::digest(&payload)
        .iter()
        .fold(String::new(), |mut acc, b| {
            let _ = write!(acc, "{:02x}", b);
            acc
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::SplitAxis;

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let bundle = vec![Mutation::SetLayout {
            view: ViewRef::new(1),
            layout: NativeNode::split(
                SplitAxis::Vertical,
                0.5,
                NativeNode::leaf(SectionId::new(1)),
                NativeNode::leaf(SectionId::new(2)),
            ),
        }];
        let a = fingerprint(&bundle);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, fingerprint(&bundle.clone()));
        assert_ne!(a, fingerprint(&[]));
    }
}
