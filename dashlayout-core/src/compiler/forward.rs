//! Declarative tree → native split tree plus creation and link intents.
//!
//! Planning is pure: it validates, registers every pane in traversal order
//! and lowers splits, but performs no collaborator call. The executor walks
//! the plan's creations and wires links as real ids arrive.

use super::registry::{PaneRef, PendingLink, PlaceholderId, WidgetRegistry};
use crate::authoring::dto::LayoutNode;
use crate::authoring::validate::validate_layout;
use crate::errors::CompileError;
use crate::native::{Mutation, NativeNode, SplitAxis};
use crate::types::{LinkTuple, SectionId, TableMap, TableRef, ViewRef, WidgetType};
use std::collections::BTreeMap;

/// One widget to create, in traversal order.
#[derive(Debug, Clone, PartialEq)]
pub struct CreationIntent {
    pub pane_index: usize,
    pub placeholder: PlaceholderId,
    pub table: TableRef,
    pub widget_type: WidgetType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanePlan {
    pub index: usize,
    pub pane_ref: PaneRef,
    /// Known up front for new panes; existing panes learn it from preflight.
    pub table: Option<TableRef>,
    pub label: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug)]
pub struct CompilePlan {
    pub panes: Vec<PanePlan>,
    pub creations: Vec<CreationIntent>,
    /// Every link in owner traversal order, not yet resolved.
    pub links: Vec<PendingLink>,
    pub layout: NativeNode<PaneRef>,
    pub registry: WidgetRegistry,
}

/// Validate `layout` and plan its compilation.
pub fn plan(layout: Option<&LayoutNode>, tables: &TableMap) -> Result<CompilePlan, CompileError> {
    let issues = validate_layout(layout);
    if !issues.is_empty() {
        return Err(CompileError::MalformedLayout { issues });
    }
    let root = layout.ok_or_else(|| CompileError::malformed("L0", "Layout is empty"))?;

    let mut builder = PlanBuilder {
        tables,
        registry: WidgetRegistry::new(),
        panes: Vec::new(),
        creations: Vec::new(),
        links: Vec::new(),
    };
    let native = builder.lower(root)?;

    Ok(CompilePlan {
        panes: builder.panes,
        creations: builder.creations,
        links: builder.links,
        layout: native,
        registry: builder.registry,
    })
}

struct PlanBuilder<'a> {
    tables: &'a TableMap,
    registry: WidgetRegistry,
    panes: Vec<PanePlan>,
    creations: Vec<CreationIntent>,
    links: Vec<PendingLink>,
}

impl PlanBuilder<'_> {
    fn lower(&mut self, node: &LayoutNode) -> Result<NativeNode<PaneRef>, CompileError> {
        match node {
            LayoutNode::ColSplit { .. } => self.lower_split(SplitAxis::Horizontal, node),
            LayoutNode::RowSplit { .. } => self.lower_split(SplitAxis::Vertical, node),
            pane => self.lower_pane(pane),
        }
    }

    fn lower_split(
        &mut self,
        axis: SplitAxis,
        node: &LayoutNode,
    ) -> Result<NativeNode<PaneRef>, CompileError> {
        let weights = node.normalized_weights();
        let children = node
            .children()
            .iter()
            .map(|child| self.lower(child))
            .collect::<Result<Vec<_>, _>>()?;
        lower_chain(axis, children, &weights).ok_or_else(|| {
            CompileError::malformed("L2", format!("{} has no children", node.label()))
        })
    }

    fn lower_pane(&mut self, pane: &LayoutNode) -> Result<NativeNode<PaneRef>, CompileError> {
        let index = self.panes.len();
        let table = match pane {
            LayoutNode::NewPane { table, .. } => {
                Some(self.tables.get(table).ok_or_else(|| CompileError::UnknownTable {
                    table: table.clone(),
                    pane: pane.label(),
                    known: self.tables.names(),
                })?)
            }
            _ => None,
        };

        let pane_ref = self.registry.register(pane);
        if let (PaneRef::Placeholder(placeholder), LayoutNode::NewPane { widget_type, .. }, Some(table)) =
            (pane_ref, pane, table)
        {
            self.creations.push(CreationIntent {
                pane_index: index,
                placeholder,
                table,
                widget_type: *widget_type,
            });
        }

        if let Some(link) = pane.link() {
            self.links.push(PendingLink {
                owner_index: index,
                owner: pane_ref,
                target: link.from().clone(),
                link: link.clone(),
            });
        }

        self.panes.push(PanePlan {
            index,
            pane_ref,
            table,
            label: pane.label(),
            title: pane.title().map(str::to_string),
            description: pane.description().map(str::to_string),
        });
        Ok(NativeNode::leaf(pane_ref))
    }
}

/// Lower an N-way split to a right-leaning chain of binary splits.
///
/// Child `i` gets `ratio = w[i] / sum(w[i..])`, so every child keeps its
/// rendered share. Returns `None` for an empty child list.
pub fn lower_chain<Id>(
    axis: SplitAxis,
    children: Vec<NativeNode<Id>>,
    weights: &[f64],
) -> Option<NativeNode<Id>> {
    let mut acc: Option<(NativeNode<Id>, f64)> = None;
    for (node, w) in children.into_iter().zip(weights.iter().copied()).rev() {
        acc = Some(match acc {
            None => (node, w),
            Some((tail, tail_weight)) => {
                let total = w + tail_weight;
                (NativeNode::split(axis, w / total, node, tail), total)
            }
        });
    }
    acc.map(|(node, _)| node)
}

impl CompilePlan {
    /// Real section id of pane `index`.
    pub fn section_of(&self, index: usize) -> Result<SectionId, CompileError> {
        self.panes
            .get(index)
            .and_then(|p| self.registry.lookup(p.pane_ref))
            .ok_or_else(|| {
                CompileError::malformed("L13", format!("Pane {} has no section id", index))
            })
    }

    /// The native tree with every placeholder substituted.
    pub fn native_layout(&self) -> Result<NativeNode, CompileError> {
        self.layout.try_map(&mut |pane| {
            self.registry.lookup(*pane).ok_or_else(|| {
                CompileError::malformed("L13", format!("Placeholder {} was never resolved", pane))
            })
        })
    }

    /// The mutation bundle: layout first, then links in owner traversal
    /// order, then section titles and descriptions.
    pub fn mutations(
        &self,
        view: ViewRef,
        layout: NativeNode,
        links: &BTreeMap<usize, LinkTuple>,
    ) -> Result<Vec<Mutation>, CompileError> {
        let mut out = vec![Mutation::SetLayout { view, layout }];

        for (owner_index, link) in links {
            out.push(Mutation::SetLink {
                section: self.section_of(*owner_index)?,
                link: *link,
            });
        }

        for pane in &self.panes {
            if pane.title.is_none() && pane.description.is_none() {
                continue;
            }
            out.push(Mutation::SetSectionInfo {
                section: self.section_of(pane.index)?,
                title: pane.title.clone(),
                description: pane.description.clone(),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authoring::dto::{Link, LinkTarget};
    use crate::native::MutationKind;

    fn tables() -> TableMap {
        [("Orders", TableRef::new(1)), ("Customers", TableRef::new(2))]
            .into_iter()
            .collect()
    }

    fn orders_customers() -> LayoutNode {
        LayoutNode::rows(vec![
            LayoutNode::new_pane("Orders", WidgetType::Grid),
            LayoutNode::new_pane("Customers", WidgetType::Card).with_link(Link::ChildOf {
                from: LinkTarget::Pane("Orders".to_string()),
            }),
        ])
    }

    fn ratios<Id>(node: &NativeNode<Id>, out: &mut Vec<f64>) {
        if let NativeNode::Split {
            ratio,
            first,
            second,
            ..
        } = node
        {
            out.push(*ratio);
            ratios(first, out);
            ratios(second, out);
        }
    }

    #[test]
    fn test_plan_orders_customers() {
        let tree = orders_customers();
        let plan = plan(Some(&tree), &tables()).unwrap();

        assert_eq!(plan.creations.len(), 2);
        assert_eq!(plan.creations[0].table, TableRef::new(1));
        assert_eq!(plan.creations[1].table, TableRef::new(2));
        assert_eq!(plan.links.len(), 1);
        assert_eq!(plan.links[0].owner_index, 1);

        match &plan.layout {
            NativeNode::Split { axis, ratio, .. } => {
                assert_eq!(*axis, SplitAxis::Vertical);
                assert_eq!(*ratio, 0.5);
            }
            other => panic!("Expected split, got {:?}", other),
        }
        assert_eq!(plan.layout.leaves().len(), 2);
    }

    #[test]
    fn test_col_split_is_horizontal() {
        let tree = LayoutNode::cols(vec![
            LayoutNode::leaf(SectionId::new(1)),
            LayoutNode::leaf(SectionId::new(2)),
        ]);
        let plan = plan(Some(&tree), &TableMap::new()).unwrap();
        assert!(plan.creations.is_empty());
        assert!(matches!(
            plan.native_layout().unwrap(),
            NativeNode::Split {
                axis: SplitAxis::Horizontal,
                ..
            }
        ));
    }

    #[test]
    fn test_three_way_chain_keeps_proportions() {
        let tree = LayoutNode::cols(vec![
            LayoutNode::leaf(SectionId::new(1)),
            LayoutNode::leaf(SectionId::new(2)),
            LayoutNode::leaf(SectionId::new(3)),
        ])
        .with_weights(vec![0.5, 0.25, 0.25]);
        let native = plan(Some(&tree), &TableMap::new())
            .unwrap()
            .native_layout()
            .unwrap();

        let mut rs = Vec::new();
        ratios(&native, &mut rs);
        assert_eq!(rs, vec![0.5, 0.5]);
        assert_eq!(native.depth(), 3);
    }

    #[test]
    fn test_default_weights_lower_evenly() {
        let chain = lower_chain(
            SplitAxis::Vertical,
            vec![NativeNode::leaf(1), NativeNode::leaf(2), NativeNode::leaf(3), NativeNode::leaf(4)],
            &[0.25, 0.25, 0.25, 0.25],
        )
        .unwrap();
        let mut rs = Vec::new();
        ratios(&chain, &mut rs);
        let expected = [0.25, 1.0 / 3.0, 0.5];
        for (got, want) in rs.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "{} vs {}", got, want);
        }
        assert!(lower_chain::<u32>(SplitAxis::Vertical, vec![], &[]).is_none());
    }

    #[test]
    fn test_single_pane_plans_one_creation() {
        let tree = LayoutNode::new_pane("Orders", WidgetType::Grid);
        let plan = plan(Some(&tree), &tables()).unwrap();
        assert_eq!(plan.creations.len(), 1);
        assert!(plan.links.is_empty());
        assert!(matches!(plan.layout, NativeNode::Leaf { .. }));
    }

    #[test]
    fn test_unknown_table_lists_known() {
        let tree = LayoutNode::rows(vec![
            LayoutNode::new_pane("Orders", WidgetType::Grid),
            LayoutNode::new_pane("Invoices", WidgetType::Grid),
        ]);
        match plan(Some(&tree), &tables()).unwrap_err() {
            CompileError::UnknownTable { table, known, .. } => {
                assert_eq!(table, "Invoices");
                assert_eq!(known, vec!["Customers", "Orders"]);
            }
            other => panic!("Expected UnknownTable, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_before_anything_else() {
        let tree = LayoutNode::cols(vec![LayoutNode::new_pane("Invoices", WidgetType::Grid)]);
        let err = plan(Some(&tree), &tables()).unwrap_err();
        assert_eq!(err.rules(), vec!["L2"]);
        assert_eq!(plan(None, &tables()).unwrap_err().rules(), vec!["L0"]);
    }

    #[test]
    fn test_unresolved_placeholder_blocks_substitution() {
        let tree = orders_customers();
        let plan = plan(Some(&tree), &tables()).unwrap();
        assert_eq!(plan.native_layout().unwrap_err().rules(), vec!["L13"]);
    }

    #[test]
    fn test_mutation_order() {
        let tree = LayoutNode::rows(vec![
            LayoutNode::new_pane("Orders", WidgetType::Grid).with_title("All orders"),
            LayoutNode::existing(SectionId::new(8)),
        ]);
        let mut plan = plan(Some(&tree), &tables()).unwrap();
        let placeholder = plan.creations[0].placeholder;
        plan.registry.resolve(placeholder, SectionId::new(20));

        let layout = plan.native_layout().unwrap();
        let mut links = BTreeMap::new();
        links.insert(1, LinkTuple::cursor(SectionId::new(20)));
        let bundle = plan.mutations(ViewRef::new(1), layout, &links).unwrap();

        let kinds: Vec<MutationKind> = bundle.iter().map(Mutation::kind).collect();
        assert_eq!(
            kinds,
            vec![
                MutationKind::SetLayout,
                MutationKind::SetLink,
                MutationKind::SetSectionInfo
            ]
        );
        assert_eq!(
            bundle[1],
            Mutation::SetLink {
                section: SectionId::new(8),
                link: LinkTuple::cursor(SectionId::new(20)),
            }
        );
    }
}
