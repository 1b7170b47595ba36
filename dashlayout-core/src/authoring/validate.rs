use super::dto::*;
use super::names::{NameIndex, NameMatch};
use crate::types::SectionId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(rule: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

/// Validate a layout tree before any external call. Returns all errors found.
pub fn validate_layout(layout: Option<&LayoutNode>) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // L0: Layout must be present
    let Some(root) = layout else {
        errors.push(ValidationError::new("L0", "Layout is empty"));
        return errors;
    };

    // L1 + L5: Section ids unique and non-zero
    let mut seen: HashSet<SectionId> = HashSet::new();
    for pane in root.panes() {
        if let Some(id) = pane.section_id() {
            if !id.is_valid() {
                errors.push(ValidationError::new(
                    "L5",
                    format!("{}: section id 0 is reserved", pane.label()),
                ));
            } else if !seen.insert(id) {
                errors.push(ValidationError::new(
                    "L1",
                    format!("Duplicate section id: {}", id),
                ));
            }
        }
    }

    // L2, L3, L4: Split shape and weights
    validate_splits(root, &mut errors);

    // L5 .. L8: Pane fields and links
    let names = NameIndex::build(root);
    for (index, pane) in root.panes().into_iter().enumerate() {
        if let LayoutNode::NewPane { table, .. } = pane {
            if table.trim().is_empty() {
                errors.push(ValidationError::new(
                    "L6",
                    format!("Pane {} has an empty table name", index),
                ));
            }
        }
        if let Some(link) = pane.link() {
            validate_link(index, pane, link, &names, &mut errors);
        }
    }

    errors
}

fn validate_splits(node: &LayoutNode, errors: &mut Vec<ValidationError>) {
    if !node.is_split() {
        return;
    }
    let children = node.children();
    if children.len() < 2 {
        errors.push(ValidationError::new(
            "L2",
            format!(
                "{} must have at least two children, found {}",
                node.label(),
                children.len()
            ),
        ));
    }
    if let Some(weights) = node.weights() {
        if weights.len() != children.len() {
            errors.push(ValidationError::new(
                "L3",
                format!(
                    "{} has {} weights for {} children; give all weights or none",
                    node.label(),
                    weights.len(),
                    children.len()
                ),
            ));
        }
        for (i, w) in weights.iter().enumerate() {
            if !w.is_finite() || *w <= 0.0 {
                errors.push(ValidationError::new(
                    "L4",
                    format!("{} weight {} is not positive: {}", node.label(), i, w),
                ));
            }
        }
    }
    for child in children {
        validate_splits(child, errors);
    }
}

fn validate_link(
    index: usize,
    pane: &LayoutNode,
    link: &Link,
    names: &NameIndex,
    errors: &mut Vec<ValidationError>,
) {
    let label = pane.label();

    for col in [link.source_col(), link.target_col()].into_iter().flatten() {
        if col.trim().is_empty() {
            errors.push(ValidationError::new(
                "L6",
                format!("{}: {} has an empty column id", label, link.kind()),
            ));
        }
    }

    match link.from() {
        LinkTarget::Section(id) => {
            if !id.is_valid() {
                errors.push(ValidationError::new(
                    "L5",
                    format!("{}: link source section id 0 is reserved", label),
                ));
            } else if pane.section_id() == Some(*id) {
                errors.push(ValidationError::new(
                    "L7",
                    format!("{} links to itself", label),
                ));
            }
        }
        LinkTarget::Pane(key) => match names.resolve(key) {
            NameMatch::Unique(target) if target == index => {
                errors.push(ValidationError::new(
                    "L7",
                    format!("{} links to itself via '{}'", label, key),
                ));
            }
            NameMatch::Ambiguous(candidates) => {
                errors.push(ValidationError::new(
                    "L8",
                    format!(
                        "{}: pane name '{}' matches {} panes ({:?})",
                        label,
                        key,
                        candidates.len(),
                        candidates
                    ),
                ));
            }
            // Missing names surface as dangling targets after creation.
            NameMatch::Unique(_) | NameMatch::Missing => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WidgetType;

    fn rules(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.rule.as_str()).collect()
    }

    #[test]
    fn test_valid_layout_has_no_errors() {
        let tree = LayoutNode::rows(vec![
            LayoutNode::new_pane("Orders", WidgetType::Grid),
            LayoutNode::new_pane("Customers", WidgetType::Card).with_link(Link::ChildOf {
                from: LinkTarget::Pane("Orders".to_string()),
            }),
        ]);
        assert!(validate_layout(Some(&tree)).is_empty());
    }

    #[test]
    fn test_single_pane_is_valid() {
        let tree = LayoutNode::new_pane("Orders", WidgetType::Grid);
        assert!(validate_layout(Some(&tree)).is_empty());
    }

    #[test]
    fn test_absent_layout() {
        assert_eq!(rules(&validate_layout(None)), vec!["L0"]);
    }

    #[test]
    fn test_duplicate_and_zero_sections() {
        let tree = LayoutNode::cols(vec![
            LayoutNode::leaf(SectionId::new(4)),
            LayoutNode::existing(SectionId::new(4)),
            LayoutNode::leaf(SectionId::new(0)),
        ]);
        let errors = validate_layout(Some(&tree));
        assert_eq!(rules(&errors), vec!["L1", "L5"]);
        assert!(errors[0].message.contains("#4"));
    }

    #[test]
    fn test_split_shape_and_weights() {
        let tree = LayoutNode::cols(vec![
            LayoutNode::rows(vec![LayoutNode::leaf(SectionId::new(1))]),
            LayoutNode::leaf(SectionId::new(2)),
            LayoutNode::leaf(SectionId::new(3)),
        ])
        .with_weights(vec![1.0, -2.0]);
        let errors = validate_layout(Some(&tree));
        assert_eq!(rules(&errors), vec!["L3", "L4", "L2"]);
    }

    #[test]
    fn test_non_finite_weight() {
        let tree = LayoutNode::rows(vec![
            LayoutNode::leaf(SectionId::new(1)),
            LayoutNode::leaf(SectionId::new(2)),
        ])
        .with_weights(vec![1.0, f64::NAN]);
        assert_eq!(rules(&validate_layout(Some(&tree))), vec!["L4"]);
    }

    #[test]
    fn test_huge_weights_lower_to_finite_ratio() {
        let tree = LayoutNode::cols(vec![
            LayoutNode::leaf(SectionId::new(1)),
            LayoutNode::leaf(SectionId::new(2)),
        ])
        .with_weights(vec![f64::MAX, f64::MAX]);
        assert!(validate_layout(Some(&tree)).is_empty());

        let native = crate::compiler::forward::plan(Some(&tree), &crate::types::TableMap::new())
            .unwrap()
            .native_layout()
            .unwrap();
        match native {
            crate::native::NativeNode::Split { ratio, .. } => assert_eq!(ratio, 0.5),
            other => panic!("Expected split, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_table_and_column() {
        let tree = LayoutNode::rows(vec![
            LayoutNode::new_pane("", WidgetType::Grid),
            LayoutNode::existing(SectionId::new(2)).with_link(Link::FilteredBy {
                from: LinkTarget::Section(SectionId::new(7)),
                col: " ".to_string(),
            }),
        ]);
        assert_eq!(rules(&validate_layout(Some(&tree))), vec!["L6", "L6"]);
    }

    #[test]
    fn test_self_links() {
        let by_id = LayoutNode::rows(vec![
            LayoutNode::existing(SectionId::new(2)).with_link(Link::SyncedWith {
                from: LinkTarget::Section(SectionId::new(2)),
            }),
            LayoutNode::new_pane("Orders", WidgetType::Grid).with_link(Link::SyncedWith {
                from: LinkTarget::Pane("Orders".to_string()),
            }),
        ]);
        assert_eq!(rules(&validate_layout(Some(&by_id))), vec!["L7", "L7"]);
    }

    #[test]
    fn test_ambiguous_name_and_missing_name() {
        let tree = LayoutNode::rows(vec![
            LayoutNode::new_pane("Orders", WidgetType::Grid),
            LayoutNode::new_pane("Orders", WidgetType::Chart),
            LayoutNode::new_pane("Customers", WidgetType::Card).with_link(Link::ChildOf {
                from: LinkTarget::Pane("Orders".to_string()),
            }),
            LayoutNode::new_pane("Items", WidgetType::Card).with_link(Link::ChildOf {
                from: LinkTarget::Pane("Ghost".to_string()),
            }),
        ]);
        let errors = validate_layout(Some(&tree));
        assert_eq!(rules(&errors), vec!["L8"]);
        assert!(errors[0].to_string().starts_with("[L8]"));
    }
}
