//! Symbolic pane names.
//!
//! A link's `from` may name a pane instead of giving a section id. Keys are
//! looked up in tiers: explicit `name`, then `title`, then `table`. The first
//! tier that knows the key decides; two panes sharing the key in that tier
//! make it ambiguous.

use super::dto::LayoutNode;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMatch {
    /// Pane index in traversal order.
    Unique(usize),
    Ambiguous(Vec<usize>),
    Missing,
}

#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    tiers: [BTreeMap<String, Vec<usize>>; 3],
}

impl NameIndex {
    /// Index every pane of `root`, numbered in left-to-right DFS order.
    pub fn build(root: &LayoutNode) -> Self {
        let mut index = Self::default();
        for (i, pane) in root.panes().into_iter().enumerate() {
            index.add(i, pane);
        }
        index
    }

    /// Index a single pane under `pane_index`.
    pub fn add(&mut self, pane_index: usize, pane: &LayoutNode) {
        let table = match pane {
            LayoutNode::NewPane { table, .. } => Some(table.as_str()),
            _ => None,
        };
        for (tier, key) in [pane.name(), pane.title(), table].into_iter().enumerate() {
            if let Some(key) = key.filter(|k| !k.is_empty()) {
                let slot = self.tiers[tier].entry(key.to_string()).or_default();
                if !slot.contains(&pane_index) {
                    slot.push(pane_index);
                }
            }
        }
    }

    pub fn resolve(&self, key: &str) -> NameMatch {
        for tier in &self.tiers {
            match tier.get(key).map(Vec::as_slice) {
                Some([only]) => return NameMatch::Unique(*only),
                Some(many) if !many.is_empty() => return NameMatch::Ambiguous(many.to_vec()),
                _ => continue,
            }
        }
        NameMatch::Missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SectionId, WidgetType};

    #[test]
    fn test_name_beats_title_beats_table() {
        let tree = LayoutNode::cols(vec![
            LayoutNode::new_pane("Orders", WidgetType::Grid).with_title("Sales"),
            LayoutNode::new_pane("Sales", WidgetType::Chart).with_name("Orders"),
            LayoutNode::existing(SectionId::new(5)).with_title("Totals"),
        ]);
        let index = NameIndex::build(&tree);

        // "Orders" is both a table and an explicit name; the name wins.
        assert_eq!(index.resolve("Orders"), NameMatch::Unique(1));
        // "Sales" is a title and a table; the title wins.
        assert_eq!(index.resolve("Sales"), NameMatch::Unique(0));
        assert_eq!(index.resolve("Totals"), NameMatch::Unique(2));
        assert_eq!(index.resolve("Nope"), NameMatch::Missing);
    }

    #[test]
    fn test_same_table_twice_is_ambiguous() {
        let tree = LayoutNode::rows(vec![
            LayoutNode::new_pane("Orders", WidgetType::Grid),
            LayoutNode::new_pane("Orders", WidgetType::Chart),
        ]);
        let index = NameIndex::build(&tree);
        assert_eq!(index.resolve("Orders"), NameMatch::Ambiguous(vec![0, 1]));
    }

    #[test]
    fn test_name_disambiguates_shared_table() {
        let tree = LayoutNode::rows(vec![
            LayoutNode::new_pane("Orders", WidgetType::Grid).with_name("list"),
            LayoutNode::new_pane("Orders", WidgetType::Chart).with_name("chart"),
        ]);
        let index = NameIndex::build(&tree);
        assert_eq!(index.resolve("chart"), NameMatch::Unique(1));
        assert_eq!(index.resolve("Orders"), NameMatch::Ambiguous(vec![0, 1]));
    }
}
