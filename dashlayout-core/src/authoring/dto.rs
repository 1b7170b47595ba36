use super::names::{NameIndex, NameMatch};
use crate::types::{SectionId, TableMap, ViewRef, WidgetType};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Top-level request ──

/// One page layout request: the declarative tree plus the caller's table map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutRequest {
    /// Page to lay out. `None` creates a new page with the first new pane.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<ViewRef>,
    #[serde(default)]
    pub tables: TableMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutNode>,
}

// ── Link target ──

/// Who a link points at: a concrete section, or a pane named in the same tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkTarget {
    Section(SectionId),
    Pane(String),
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkTarget::Section(id) => write!(f, "{}", id),
            LinkTarget::Pane(name) => write!(f, "'{}'", name),
        }
    }
}

// ── Link ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Link {
    /// Cursor follows the selected row of `from`.
    ChildOf { from: LinkTarget },
    /// Cursor kept in sync with `from`.
    SyncedWith { from: LinkTarget },
    /// Rows filtered by a scalar column of the source.
    FilteredBy { from: LinkTarget, col: String },
    /// Rows filtered by membership in a list-valued column of the source.
    ListedIn { from: LinkTarget, col: String },
    /// Source column `col` must equal target column `to`.
    MatchedBy {
        from: LinkTarget,
        col: String,
        to: String,
    },
    /// Owning table is a summary (group-by) of the source table.
    BreakdownOf { from: LinkTarget },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    ChildOf,
    SyncedWith,
    FilteredBy,
    ListedIn,
    MatchedBy,
    BreakdownOf,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Link {
    pub fn kind(&self) -> LinkKind {
        match self {
            Link::ChildOf { .. } => LinkKind::ChildOf,
            Link::SyncedWith { .. } => LinkKind::SyncedWith,
            Link::FilteredBy { .. } => LinkKind::FilteredBy,
            Link::ListedIn { .. } => LinkKind::ListedIn,
            Link::MatchedBy { .. } => LinkKind::MatchedBy,
            Link::BreakdownOf { .. } => LinkKind::BreakdownOf,
        }
    }

    pub fn from(&self) -> &LinkTarget {
        match self {
            Link::ChildOf { from }
            | Link::SyncedWith { from }
            | Link::FilteredBy { from, .. }
            | Link::ListedIn { from, .. }
            | Link::MatchedBy { from, .. }
            | Link::BreakdownOf { from } => from,
        }
    }

    /// Column on the source table, for column-bearing variants.
    pub fn source_col(&self) -> Option<&str> {
        match self {
            Link::FilteredBy { col, .. } | Link::ListedIn { col, .. } | Link::MatchedBy { col, .. } => {
                Some(col)
            }
            Link::ChildOf { .. } | Link::SyncedWith { .. } | Link::BreakdownOf { .. } => None,
        }
    }

    /// Column on the owning pane's table (`MatchedBy` only).
    pub fn target_col(&self) -> Option<&str> {
        match self {
            Link::MatchedBy { to, .. } => Some(to),
            _ => None,
        }
    }

    pub fn is_column_bearing(&self) -> bool {
        self.source_col().is_some()
    }

    /// The same link pointed at another target.
    pub fn with_from(&self, target: LinkTarget) -> Link {
        let mut link = self.clone();
        match &mut link {
            Link::ChildOf { from }
            | Link::SyncedWith { from }
            | Link::FilteredBy { from, .. }
            | Link::ListedIn { from, .. }
            | Link::MatchedBy { from, .. }
            | Link::BreakdownOf { from } => *from = target,
        }
        link
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::MatchedBy { from, col, to } => {
                write!(f, "MatchedBy {{ from: {}, col: {}, to: {} }}", from, col, to)
            }
            Link::FilteredBy { from, col } | Link::ListedIn { from, col } => {
                write!(f, "{} {{ from: {}, col: {} }}", self.kind(), from, col)
            }
            _ => write!(f, "{} {{ from: {} }}", self.kind(), self.from()),
        }
    }
}

// ── LayoutNode (tagged enum) ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum LayoutNode {
    Leaf {
        section: SectionId,
    },
    NewPane {
        table: String,
        widget_type: WidgetType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link: Option<Link>,
    },
    ExistingPane {
        section: SectionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link: Option<Link>,
    },
    ColSplit {
        children: Vec<LayoutNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weights: Option<Vec<f64>>,
    },
    RowSplit {
        children: Vec<LayoutNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weights: Option<Vec<f64>>,
    },
}

// ── LayoutNode helpers ──

impl LayoutNode {
    pub fn leaf(section: SectionId) -> Self {
        LayoutNode::Leaf { section }
    }

    pub fn new_pane(table: impl Into<String>, widget_type: WidgetType) -> Self {
        LayoutNode::NewPane {
            table: table.into(),
            widget_type,
            name: None,
            title: None,
            description: None,
            link: None,
        }
    }

    pub fn existing(section: SectionId) -> Self {
        LayoutNode::ExistingPane {
            section,
            name: None,
            title: None,
            description: None,
            link: None,
        }
    }

    pub fn cols(children: Vec<LayoutNode>) -> Self {
        LayoutNode::ColSplit {
            children,
            weights: None,
        }
    }

    pub fn rows(children: Vec<LayoutNode>) -> Self {
        LayoutNode::RowSplit {
            children,
            weights: None,
        }
    }

    /// Builder: attach a link to a pane. Splits and bare leaves are returned unchanged.
    pub fn with_link(mut self, new_link: Link) -> Self {
        match &mut self {
            LayoutNode::NewPane { link, .. } | LayoutNode::ExistingPane { link, .. } => {
                *link = Some(new_link)
            }
            _ => {}
        }
        self
    }

    /// Builder: set a pane's title.
    pub fn with_title(mut self, new_title: impl Into<String>) -> Self {
        match &mut self {
            LayoutNode::NewPane { title, .. } | LayoutNode::ExistingPane { title, .. } => {
                *title = Some(new_title.into())
            }
            _ => {}
        }
        self
    }

    /// Builder: set a pane's description.
    pub fn with_description(mut self, new_description: impl Into<String>) -> Self {
        match &mut self {
            LayoutNode::NewPane { description, .. }
            | LayoutNode::ExistingPane { description, .. } => {
                *description = Some(new_description.into())
            }
            _ => {}
        }
        self
    }

    /// Builder: set a pane's symbolic name.
    pub fn with_name(mut self, new_name: impl Into<String>) -> Self {
        match &mut self {
            LayoutNode::NewPane { name, .. } | LayoutNode::ExistingPane { name, .. } => {
                *name = Some(new_name.into())
            }
            _ => {}
        }
        self
    }

    /// Builder: set explicit split weights.
    pub fn with_weights(mut self, new_weights: Vec<f64>) -> Self {
        match &mut self {
            LayoutNode::ColSplit { weights, .. } | LayoutNode::RowSplit { weights, .. } => {
                *weights = Some(new_weights)
            }
            _ => {}
        }
        self
    }

    pub fn is_split(&self) -> bool {
        matches!(self, LayoutNode::ColSplit { .. } | LayoutNode::RowSplit { .. })
    }

    pub fn is_pane(&self) -> bool {
        !self.is_split()
    }

    /// Section id of leaf-like nodes (`Leaf`, `ExistingPane`).
    pub fn section_id(&self) -> Option<SectionId> {
        match self {
            LayoutNode::Leaf { section } | LayoutNode::ExistingPane { section, .. } => {
                Some(*section)
            }
            _ => None,
        }
    }

    pub fn link(&self) -> Option<&Link> {
        match self {
            LayoutNode::NewPane { link, .. } | LayoutNode::ExistingPane { link, .. } => {
                link.as_ref()
            }
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            LayoutNode::NewPane { name, .. } | LayoutNode::ExistingPane { name, .. } => {
                name.as_deref()
            }
            _ => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            LayoutNode::NewPane { title, .. } | LayoutNode::ExistingPane { title, .. } => {
                title.as_deref()
            }
            _ => None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            LayoutNode::NewPane { description, .. }
            | LayoutNode::ExistingPane { description, .. } => description.as_deref(),
            _ => None,
        }
    }

    pub fn children(&self) -> &[LayoutNode] {
        match self {
            LayoutNode::ColSplit { children, .. } | LayoutNode::RowSplit { children, .. } => {
                children
            }
            _ => &[],
        }
    }

    pub fn weights(&self) -> Option<&[f64]> {
        match self {
            LayoutNode::ColSplit { weights, .. } | LayoutNode::RowSplit { weights, .. } => {
                weights.as_deref()
            }
            _ => None,
        }
    }

    /// Normalized share of every child; an even split when no weights are given.
    ///
    /// Weights are scaled by their maximum first so the sum cannot overflow.
    pub fn normalized_weights(&self) -> Vec<f64> {
        let n = self.children().len();
        match self.weights() {
            Some(ws) if ws.len() == n && n > 0 => {
                let max = ws.iter().copied().fold(0.0_f64, f64::max);
                if !(max.is_finite() && max > 0.0) {
                    return vec![1.0 / n as f64; n];
                }
                let scaled: Vec<f64> = ws.iter().map(|w| w / max).collect();
                let total: f64 = scaled.iter().sum();
                scaled.iter().map(|w| w / total).collect()
            }
            _ => vec![1.0 / n.max(1) as f64; n],
        }
    }

    /// Normalized share of child `index`, `None` for panes or out-of-range.
    pub fn weight_of(&self, index: usize) -> Option<f64> {
        self.normalized_weights().get(index).copied()
    }

    /// All panes in left-to-right depth-first order.
    pub fn panes(&self) -> Vec<&LayoutNode> {
        let mut out = Vec::new();
        self.collect_panes(&mut out);
        out
    }

    fn collect_panes<'a>(&'a self, out: &mut Vec<&'a LayoutNode>) {
        if self.is_pane() {
            out.push(self);
        }
        for child in self.children() {
            child.collect_panes(out);
        }
    }

    /// Rendered area share of every pane, in `panes()` order.
    pub fn pane_areas(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.collect_areas(1.0, &mut out);
        out
    }

    fn collect_areas(&self, share: f64, out: &mut Vec<f64>) {
        if self.is_pane() {
            out.push(share);
            return;
        }
        for (child, w) in self.children().iter().zip(self.normalized_weights()) {
            child.collect_areas(share * w, out);
        }
    }

    /// Short human label used in error messages.
    pub fn label(&self) -> String {
        match self {
            LayoutNode::Leaf { section } => format!("Leaf {}", section),
            LayoutNode::NewPane {
                table, name, title, ..
            } => match name.as_deref().or(title.as_deref()) {
                Some(n) => format!("NewPane '{}' on {}", n, table),
                None => format!("NewPane on {}", table),
            },
            LayoutNode::ExistingPane { section, name, .. } => match name {
                Some(n) => format!("ExistingPane '{}' {}", n, section),
                None => format!("ExistingPane {}", section),
            },
            LayoutNode::ColSplit { children, .. } => format!("ColSplit[{}]", children.len()),
            LayoutNode::RowSplit { children, .. } => format!("RowSplit[{}]", children.len()),
        }
    }

    /// Rewrite every `NewPane` as an `ExistingPane` bound to `sections`, in
    /// traversal order. Names, titles, descriptions and links are carried
    /// over; symbolic link targets are pinned to the section they denote.
    ///
    /// Used to re-apply a page whose widgets already exist, e.g. after the
    /// mutation bundle failed.
    pub fn with_created_sections(&self, sections: &[SectionId]) -> Result<LayoutNode> {
        let panes = self.panes();
        let new_panes = panes
            .iter()
            .filter(|p| matches!(p, LayoutNode::NewPane { .. }))
            .count();
        if new_panes != sections.len() {
            return Err(anyhow!(
                "{} section ids supplied for {} new panes",
                sections.len(),
                new_panes
            ));
        }

        let mut fresh = sections.iter().copied();
        let pane_sections: Vec<Option<SectionId>> = panes
            .iter()
            .map(|p| match p {
                LayoutNode::NewPane { .. } => fresh.next(),
                other => other.section_id(),
            })
            .collect();
        let names = NameIndex::build(self);
        let mut cursor = 0;
        self.rewrite_new_panes(&pane_sections, &names, &mut cursor)
    }

    fn rewrite_new_panes(
        &self,
        pane_sections: &[Option<SectionId>],
        names: &NameIndex,
        cursor: &mut usize,
    ) -> Result<LayoutNode> {
        if self.is_split() {
            let children = self
                .children()
                .iter()
                .map(|c| c.rewrite_new_panes(pane_sections, names, cursor))
                .collect::<Result<Vec<_>>>()?;
            let weights = self.weights().map(<[f64]>::to_vec);
            return Ok(match self {
                LayoutNode::ColSplit { .. } => LayoutNode::ColSplit { children, weights },
                _ => LayoutNode::RowSplit { children, weights },
            });
        }

        let index = *cursor;
        *cursor += 1;
        let link = self.link().map(|l| match l.from() {
            LinkTarget::Pane(key) => match names.resolve(key) {
                NameMatch::Unique(i) => match pane_sections.get(i).copied().flatten() {
                    Some(id) => l.with_from(LinkTarget::Section(id)),
                    None => l.clone(),
                },
                _ => l.clone(),
            },
            LinkTarget::Section(_) => l.clone(),
        });

        Ok(match self {
            LayoutNode::Leaf { section } => LayoutNode::Leaf { section: *section },
            _ => LayoutNode::ExistingPane {
                section: pane_sections
                    .get(index)
                    .copied()
                    .flatten()
                    .ok_or_else(|| anyhow!("No section id for {}", self.label()))?,
                name: self.name().map(str::to_string),
                title: self.title().map(str::to_string),
                description: self.description().map(str::to_string),
                link,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders_customers() -> LayoutNode {
        LayoutNode::rows(vec![
            LayoutNode::new_pane("Orders", WidgetType::Grid).with_title("Orders"),
            LayoutNode::new_pane("Customers", WidgetType::Card).with_link(Link::ChildOf {
                from: LinkTarget::Pane("Orders".to_string()),
            }),
        ])
    }

    #[test]
    fn test_panes_in_traversal_order() {
        let tree = LayoutNode::cols(vec![
            LayoutNode::leaf(SectionId::new(3)),
            orders_customers(),
            LayoutNode::existing(SectionId::new(9)),
        ]);
        let labels: Vec<String> = tree.panes().iter().map(|p| p.label()).collect();
        assert_eq!(
            labels,
            vec![
                "Leaf #3",
                "NewPane 'Orders' on Orders",
                "NewPane on Customers",
                "ExistingPane #9"
            ]
        );
    }

    #[test]
    fn test_weights_default_even_per_level() {
        let tree = LayoutNode::cols(vec![
            LayoutNode::leaf(SectionId::new(1)),
            LayoutNode::leaf(SectionId::new(2)),
            LayoutNode::leaf(SectionId::new(3)),
        ]);
        assert!((tree.weight_of(0).unwrap() - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(tree.weight_of(3), None);
        assert_eq!(LayoutNode::leaf(SectionId::new(1)).weight_of(0), None);

        let weighted = tree.with_weights(vec![2.0, 1.0, 1.0]);
        assert_eq!(weighted.normalized_weights(), vec![0.5, 0.25, 0.25]);
    }

    #[test]
    fn test_extreme_weights_normalize_without_overflow() {
        let pair = || {
            LayoutNode::rows(vec![
                LayoutNode::leaf(SectionId::new(1)),
                LayoutNode::leaf(SectionId::new(2)),
            ])
        };
        let huge = pair().with_weights(vec![f64::MAX, f64::MAX / 2.0]);
        let ws = huge.normalized_weights();
        assert!((ws[0] - 2.0 / 3.0).abs() < 1e-12, "{:?}", ws);
        assert!((ws[1] - 1.0 / 3.0).abs() < 1e-12, "{:?}", ws);

        let tiny = pair().with_weights(vec![f64::MIN_POSITIVE, f64::MIN_POSITIVE]);
        assert_eq!(tiny.normalized_weights(), vec![0.5, 0.5]);
        assert!(tiny.pane_areas().iter().all(|a| a.is_finite()));
    }

    #[test]
    fn test_pane_areas_multiply_down_the_tree() {
        let tree = LayoutNode::rows(vec![
            LayoutNode::leaf(SectionId::new(1)),
            LayoutNode::cols(vec![
                LayoutNode::leaf(SectionId::new(2)),
                LayoutNode::leaf(SectionId::new(3)),
            ])
            .with_weights(vec![3.0, 1.0]),
        ]);
        assert_eq!(tree.pane_areas(), vec![0.5, 0.375, 0.125]);
    }

    #[test]
    fn test_link_accessors() {
        let link = Link::MatchedBy {
            from: LinkTarget::Section(SectionId::new(4)),
            col: "Customer".to_string(),
            to: "id".to_string(),
        };
        assert_eq!(link.kind(), LinkKind::MatchedBy);
        assert_eq!(link.from(), &LinkTarget::Section(SectionId::new(4)));
        assert_eq!(link.source_col(), Some("Customer"));
        assert_eq!(link.target_col(), Some("id"));
        assert!(link.is_column_bearing());

        let sync = Link::SyncedWith {
            from: LinkTarget::Pane("Orders".to_string()),
        };
        assert!(!sync.is_column_bearing());
        assert_eq!(sync.to_string(), "SyncedWith { from: 'Orders' }");
    }

    #[test]
    fn test_with_created_sections_rewrites_new_panes() {
        let tree = orders_customers();
        let rewritten = tree
            .with_created_sections(&[SectionId::new(11), SectionId::new(12)])
            .unwrap();

        let panes = rewritten.panes();
        assert_eq!(panes[0].section_id(), Some(SectionId::new(11)));
        assert_eq!(panes[0].title(), Some("Orders"));
        assert_eq!(panes[1].section_id(), Some(SectionId::new(12)));
        assert_eq!(
            panes[1].link(),
            Some(&Link::ChildOf {
                from: LinkTarget::Section(SectionId::new(11))
            })
        );
    }

    #[test]
    fn test_with_created_sections_count_mismatch() {
        let tree = orders_customers();
        assert!(tree.with_created_sections(&[SectionId::new(11)]).is_err());
        assert!(tree
            .with_created_sections(&[SectionId::new(1), SectionId::new(2), SectionId::new(3)])
            .is_err());
    }

    #[test]
    fn test_with_created_sections_keeps_unknown_names() {
        let tree = LayoutNode::cols(vec![
            LayoutNode::leaf(SectionId::new(3)),
            LayoutNode::new_pane("Orders", WidgetType::Grid).with_link(Link::SyncedWith {
                from: LinkTarget::Pane("Ghost".to_string()),
            }),
        ]);
        let rewritten = tree.with_created_sections(&[SectionId::new(8)]).unwrap();
        let panes = rewritten.panes();
        assert_eq!(panes[0], &LayoutNode::leaf(SectionId::new(3)));
        assert_eq!(
            panes[1].link().unwrap().from(),
            &LinkTarget::Pane("Ghost".to_string())
        );
    }
}
