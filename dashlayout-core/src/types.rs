use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Identifiers ──

/// Native identifier of one widget instance ("section") on a page.
///
/// `0` is reserved by the document engine to mean "unset". Deserialization
/// accepts it so the layout validator can report it with context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionId(u32);

impl SectionId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Numeric table identity in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableRef(u32);

impl TableRef {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Opaque page (view) reference returned by widget creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewRef(u32);

impl ViewRef {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ViewRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Numeric column reference.
///
/// `UNSET` doubles as the row-id pseudo-column: linking by `id` is stored as 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ColumnRef(u32);

impl ColumnRef {
    pub const UNSET: Self = Self(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_set(self) -> bool {
        self.0 != 0
    }
}

/// Column id of the row-identity pseudo-column.
pub const ROW_ID_COLUMN: &str = "id";

// ── Widget type ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetType {
    Grid,
    Card,
    CardList,
    Chart,
    Form,
    Custom,
}

impl WidgetType {
    /// Section type name as stored by the document engine.
    pub fn native_name(self) -> &'static str {
        match self {
            WidgetType::Grid => "record",
            WidgetType::Card => "single",
            WidgetType::CardList => "detail",
            WidgetType::Chart => "chart",
            WidgetType::Form => "form",
            WidgetType::Custom => "custom",
        }
    }

    pub fn from_native(name: &str) -> Option<Self> {
        match name {
            "record" => Some(WidgetType::Grid),
            "single" => Some(WidgetType::Card),
            "detail" => Some(WidgetType::CardList),
            "chart" => Some(WidgetType::Chart),
            "form" => Some(WidgetType::Form),
            "custom" => Some(WidgetType::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for WidgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.native_name())
    }
}

// ── Columns ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub col_ref: ColumnRef,
    pub col_id: String,
    /// Engine type string, e.g. `Text`, `Ref:Customers`, `RefList:Tags`.
    pub col_type: String,
}

impl ColumnInfo {
    pub fn new(col_ref: ColumnRef, col_id: impl Into<String>, col_type: impl Into<String>) -> Self {
        Self {
            col_ref,
            col_id: col_id.into(),
            col_type: col_type.into(),
        }
    }

    /// The row-id pseudo-column every table carries.
    pub fn row_id() -> Self {
        Self::new(ColumnRef::UNSET, ROW_ID_COLUMN, "Id")
    }

    pub fn is_list_valued(&self) -> bool {
        self.col_type.starts_with("RefList:") || self.col_type == "ChoiceList"
    }
}

// ── Links as stored natively ──

/// The native 3-tuple encoding of a link on the owning section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkTuple {
    pub src_section: SectionId,
    pub src_col: ColumnRef,
    pub target_col: ColumnRef,
}

impl LinkTuple {
    pub const fn cursor(src_section: SectionId) -> Self {
        Self {
            src_section,
            src_col: ColumnRef::UNSET,
            target_col: ColumnRef::UNSET,
        }
    }
}

impl fmt::Display for LinkTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.src_section.get(),
            self.src_col.get(),
            self.target_col.get()
        )
    }
}

// ── WidgetInfo ──

/// A created or observed widget. Values are never edited in place; the
/// `with_*` helpers return a new record describing the post-mutation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetInfo {
    pub section_id: SectionId,
    pub table_ref: TableRef,
    pub widget_type: WidgetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub link_src_section_ref: u32,
    #[serde(default)]
    pub link_src_col_ref: u32,
    #[serde(default)]
    pub link_target_col_ref: u32,
}

impl WidgetInfo {
    pub fn new(section_id: SectionId, table_ref: TableRef, widget_type: WidgetType) -> Self {
        Self {
            section_id,
            table_ref,
            widget_type,
            title: None,
            description: None,
            link_src_section_ref: 0,
            link_src_col_ref: 0,
            link_target_col_ref: 0,
        }
    }

    /// The stored link, if the source section field is set.
    pub fn link(&self) -> Option<LinkTuple> {
        if self.link_src_section_ref == 0 {
            return None;
        }
        Some(LinkTuple {
            src_section: SectionId::new(self.link_src_section_ref),
            src_col: ColumnRef::new(self.link_src_col_ref),
            target_col: ColumnRef::new(self.link_target_col_ref),
        })
    }

    pub fn with_link(&self, link: Option<LinkTuple>) -> Self {
        let (src, src_col, target_col) = match link {
            Some(t) => (t.src_section.get(), t.src_col.get(), t.target_col.get()),
            None => (0, 0, 0),
        };
        Self {
            link_src_section_ref: src,
            link_src_col_ref: src_col,
            link_target_col_ref: target_col,
            ..self.clone()
        }
    }

    /// Apply a section-info update. `None` fields keep their current value.
    pub fn with_section_info(&self, title: Option<&str>, description: Option<&str>) -> Self {
        Self {
            title: title.map(str::to_string).or_else(|| self.title.clone()),
            description: description
                .map(str::to_string)
                .or_else(|| self.description.clone()),
            ..self.clone()
        }
    }
}

// ── Table map ──

/// Caller-supplied table name → table reference map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableMap(BTreeMap<String, TableRef>);

impl TableMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, table: TableRef) {
        self.0.insert(name.into(), table);
    }

    pub fn get(&self, name: &str) -> Option<TableRef> {
        self.0.get(name).copied()
    }

    pub fn name_of(&self, table: TableRef) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, t)| **t == table)
            .map(|(name, _)| name.as_str())
    }

    /// Display name for a table, falling back to its numeric reference.
    pub fn display_name(&self, table: TableRef) -> String {
        self.name_of(table)
            .map(str::to_string)
            .unwrap_or_else(|| table.to_string())
    }

    /// Known table names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<S: Into<String>> FromIterator<(S, TableRef)> for TableMap {
    fn from_iter<I: IntoIterator<Item = (S, TableRef)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widget_type_native_names_round_trip() {
        for wt in [
            WidgetType::Grid,
            WidgetType::Card,
            WidgetType::CardList,
            WidgetType::Chart,
            WidgetType::Form,
            WidgetType::Custom,
        ] {
            assert_eq!(WidgetType::from_native(wt.native_name()), Some(wt));
        }
        assert_eq!(WidgetType::from_native("bogus"), None);
    }

    #[test]
    fn test_list_valued_columns() {
        let reflist = ColumnInfo::new(ColumnRef::new(3), "Tags", "RefList:Tags");
        let choices = ColumnInfo::new(ColumnRef::new(4), "Labels", "ChoiceList");
        let scalar = ColumnInfo::new(ColumnRef::new(5), "Customer", "Ref:Customers");
        assert!(reflist.is_list_valued());
        assert!(choices.is_list_valued());
        assert!(!scalar.is_list_valued());
        assert!(!ColumnInfo::row_id().is_list_valued());
    }

    #[test]
    fn test_widget_info_updates_return_new_values() {
        let base = WidgetInfo::new(SectionId::new(7), TableRef::new(2), WidgetType::Grid);
        let linked = base.with_link(Some(LinkTuple {
            src_section: SectionId::new(3),
            src_col: ColumnRef::new(11),
            target_col: ColumnRef::UNSET,
        }));

        assert_eq!(base.link(), None);
        assert_eq!(linked.link_src_section_ref, 3);
        assert_eq!(linked.link_src_col_ref, 11);
        assert_eq!(linked.link().unwrap().src_section, SectionId::new(3));

        let titled = linked.with_section_info(Some("Orders"), None);
        assert_eq!(titled.title.as_deref(), Some("Orders"));
        assert_eq!(titled.link(), linked.link());
        assert_eq!(base.title, None);
    }

    #[test]
    fn test_table_map_lookup_both_ways() {
        let tables: TableMap = [("Orders", TableRef::new(1)), ("Customers", TableRef::new(2))]
            .into_iter()
            .collect();
        assert_eq!(tables.get("Orders"), Some(TableRef::new(1)));
        assert_eq!(tables.name_of(TableRef::new(2)), Some("Customers"));
        assert_eq!(tables.display_name(TableRef::new(9)), "t9");
        assert_eq!(tables.names(), vec!["Customers", "Orders"]);
    }
}
