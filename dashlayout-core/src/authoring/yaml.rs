use super::dto::LayoutRequest;
use anyhow::{Context, Result};

/// Parse a YAML layout request. No validation is performed.
pub fn parse_layout_yaml(yaml: &str) -> Result<LayoutRequest> {
    serde_yaml::from_str(yaml).context("Failed to parse layout YAML")
}

/// Parse a JSON layout request. No validation is performed.
pub fn parse_layout_json(json: &str) -> Result<LayoutRequest> {
    serde_json::from_str(json).context("Failed to parse layout JSON")
}

/// Parse either format, picking JSON when the text starts with `{`.
pub fn parse_layout(text: &str) -> Result<LayoutRequest> {
    if text.trim_start().starts_with('{') {
        parse_layout_json(text)
    } else {
        parse_layout_yaml(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authoring::dto::{LayoutNode, Link, LinkTarget};
    use crate::types::{SectionId, TableRef, WidgetType};

    #[test]
    fn test_parse_orders_customers_yaml() {
        let yaml = r#"
tables:
  Orders: 1
  Customers: 2
layout:
  kind: RowSplit
  children:
    - kind: NewPane
      table: Orders
      widget_type: grid
    - kind: NewPane
      table: Customers
      widget_type: card
      link:
        kind: ChildOf
        from: Orders
"#;
        let req = parse_layout_yaml(yaml).unwrap();
        assert_eq!(req.view, None);
        assert_eq!(req.tables.get("Customers"), Some(TableRef::new(2)));

        let layout = req.layout.unwrap();
        let panes = layout.panes();
        assert_eq!(panes.len(), 2);
        assert_eq!(
            panes[1].link(),
            Some(&Link::ChildOf {
                from: LinkTarget::Pane("Orders".to_string())
            })
        );
    }

    #[test]
    fn test_numeric_from_is_a_section() {
        let yaml = r#"
view: 3
layout:
  kind: ExistingPane
  section: 8
  link:
    kind: MatchedBy
    from: 4
    col: Customer
    to: id
"#;
        let req = parse_layout(yaml).unwrap();
        let layout = req.layout.unwrap();
        assert_eq!(layout.section_id(), Some(SectionId::new(8)));
        assert_eq!(
            layout.link().unwrap().from(),
            &LinkTarget::Section(SectionId::new(4))
        );
    }

    #[test]
    fn test_parse_json_and_weights() {
        let json = r#"{
            "tables": {"Orders": 1},
            "layout": {
                "kind": "ColSplit",
                "weights": [2, 1, 1],
                "children": [
                    {"kind": "Leaf", "section": 1},
                    {"kind": "Leaf", "section": 2},
                    {"kind": "NewPane", "table": "Orders", "widget_type": "chart"}
                ]
            }
        }"#;
        let req = parse_layout(json).unwrap();
        let layout = req.layout.unwrap();
        assert_eq!(layout.normalized_weights(), vec![0.5, 0.25, 0.25]);
        assert!(matches!(
            layout.children()[2],
            LayoutNode::NewPane {
                widget_type: WidgetType::Chart,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_does_not_validate() {
        let yaml = "layout:\n  kind: ColSplit\n  children: []\n";
        let req = parse_layout_yaml(yaml).unwrap();
        assert!(req.layout.unwrap().children().is_empty());
    }

    #[test]
    fn test_unknown_kind_is_parse_error() {
        let yaml = "layout:\n  kind: Tabs\n  children: []\n";
        assert!(parse_layout_yaml(yaml).is_err());
    }
}
