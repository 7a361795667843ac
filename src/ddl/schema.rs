//! Canonical schema model.
//!
//! Tables, enums and views live in `BTreeMap`s keyed by lowercase name so
//! iteration and serialization are ordered. Fields are only mutable inside
//! the `ddl` module; the reducer hands out a finalized, read-only value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
            comment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Always set after finalization.
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub ref_table: String,
    /// Empty until resolved against the referenced table's primary key.
    pub ref_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<String>,
}

impl ForeignKey {
    /// Both sides name exactly one column.
    pub fn is_single_column(&self) -> bool {
        self.columns.len() == 1 && self.ref_columns.len() == 1
    }

    fn same_target(&self, other: &ForeignKey) -> bool {
        self.columns == other.columns
            && self.ref_table == other.ref_table
            && self.ref_columns == other.ref_columns
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    /// Column names, or compacted expressions such as `lower(email)`.
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalTable {
    pub name: String,
    /// Declaration order.
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub unique: Vec<Vec<String>>,
    /// Names of explicitly named unique constraints.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unique_names: BTreeMap<String, Vec<String>>,
    /// Insertion order.
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<Index>,
}

impl CanonicalTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            unique: Vec::new(),
            unique_names: BTreeMap::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub(super) fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }

    /// Column alone is unique, through a unique set or a unique index.
    pub fn is_unique(&self, column: &str) -> bool {
        self.unique.iter().any(|set| set.len() == 1 && set[0] == column)
            || self
                .indexes
                .iter()
                .any(|i| i.unique && i.columns.len() == 1 && i.columns[0] == column)
    }

    pub fn is_foreign_key(&self, column: &str) -> bool {
        self.foreign_keys
            .iter()
            .any(|fk| fk.columns.iter().any(|c| c == column))
    }

    /// Add or replace a column, keeping the original position on replace.
    pub(super) fn upsert_column(&mut self, column: Column) {
        match self.column_mut(&column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
    }

    pub(super) fn add_unique(&mut self, name: Option<String>, columns: Vec<String>) {
        if let Some(name) = name {
            self.unique_names.insert(name, columns.clone());
        }
        self.unique.push(columns);
    }

    /// Remove a column and every constraint member that names it.
    pub(super) fn drop_column(&mut self, column: &str) -> bool {
        let before = self.columns.len();
        self.columns.retain(|c| c.name != column);
        if self.columns.len() == before {
            return false;
        }
        self.primary_key.retain(|c| c != column);
        for set in self.unique.iter_mut() {
            set.retain(|c| c != column);
        }
        self.unique.retain(|set| !set.is_empty());
        for set in self.unique_names.values_mut() {
            set.retain(|c| c != column);
        }
        self.unique_names.retain(|_, set| !set.is_empty());
        self.foreign_keys
            .retain(|fk| !fk.columns.iter().any(|c| c == column));
        self.indexes
            .retain(|i| !i.columns.iter().any(|c| c == column));
        true
    }

    /// Rename a column in place and in every local constraint.
    pub(super) fn rename_column(&mut self, from: &str, to: &str) -> bool {
        let Some(column) = self.column_mut(from) else {
            return false;
        };
        column.name = to.to_string();
        let rename = |c: &mut String| {
            if c == from {
                *c = to.to_string();
            }
        };
        self.primary_key.iter_mut().for_each(rename);
        self.unique.iter_mut().flatten().for_each(rename);
        self.unique_names.values_mut().flatten().for_each(rename);
        for fk in self.foreign_keys.iter_mut() {
            fk.columns.iter_mut().for_each(rename);
        }
        for index in self.indexes.iter_mut() {
            index.columns.iter_mut().for_each(rename);
        }
        true
    }

    /// Remove the named foreign key, unique constraint or index.
    pub(super) fn drop_constraint(&mut self, name: &str) -> bool {
        if name == format!("{}_pkey", self.name) && !self.primary_key.is_empty() {
            self.primary_key.clear();
            return true;
        }
        let fks = self.foreign_keys.len();
        self.foreign_keys
            .retain(|fk| fk.name.as_deref() != Some(name));
        if self.foreign_keys.len() != fks {
            return true;
        }
        if let Some(columns) = self.unique_names.remove(name) {
            if let Some(pos) = self.unique.iter().position(|set| *set == columns) {
                self.unique.remove(pos);
            }
            return true;
        }
        let implicit = self
            .unique
            .iter()
            .position(|set| format!("{}_{}_key", self.name, set.join("_")) == name);
        if let Some(pos) = implicit {
            self.unique.remove(pos);
            return true;
        }
        self.drop_index(name)
    }

    pub(super) fn drop_index(&mut self, name: &str) -> bool {
        let before = self.indexes.len();
        self.indexes.retain(|i| i.name != name);
        self.indexes.len() != before
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalSchema {
    pub(in crate::ddl) tables: BTreeMap<String, CanonicalTable>,
    pub(in crate::ddl) enums: BTreeMap<String, Vec<String>>,
    /// View name to its defining statement.
    pub(in crate::ddl) views: BTreeMap<String, String>,
}

impl CanonicalSchema {
    pub fn tables(&self) -> &BTreeMap<String, CanonicalTable> {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&CanonicalTable> {
        self.tables.get(&name.to_lowercase())
    }

    pub fn enums(&self) -> &BTreeMap<String, Vec<String>> {
        &self.enums
    }

    pub fn views(&self) -> &BTreeMap<String, String> {
        &self.views
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Stable pretty-printed JSON; equal schemas serialize to equal bytes.
    pub fn to_canonical_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Normalize the schema and return warnings for unresolved references.
    pub(super) fn finalize(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();
        let primary_keys: BTreeMap<String, Vec<String>> = self
            .tables
            .iter()
            .map(|(name, t)| (name.clone(), dedup_in_order(&t.primary_key)))
            .collect();

        for table in self.tables.values_mut() {
            table.primary_key = dedup_in_order(&table.primary_key);
            for pk in table.primary_key.clone() {
                if let Some(column) = table.column_mut(&pk) {
                    column.nullable = false;
                }
            }

            let mut kept: Vec<ForeignKey> = Vec::with_capacity(table.foreign_keys.len());
            for mut fk in std::mem::take(&mut table.foreign_keys) {
                match primary_keys.get(&fk.ref_table) {
                    Some(ref_pk) => {
                        if fk.ref_columns.is_empty() {
                            fk.ref_columns = ref_pk.clone();
                        }
                    }
                    None => warnings.push(format!(
                        "foreign key on {}({}) references missing table {}",
                        table.name,
                        fk.columns.join(", "),
                        fk.ref_table
                    )),
                }
                if fk.name.is_none() {
                    fk.name = Some(format!("fk_{}_{}", table.name, fk.columns.join("_")));
                }
                if !kept.iter().any(|k| k.same_target(&fk)) {
                    kept.push(fk);
                }
            }
            table.foreign_keys = kept;

            table.unique.sort();
            table.unique.dedup();
            let mut named: Vec<Vec<String>> = Vec::new();
            table.unique_names.retain(|_, cols| {
                if named.contains(cols) {
                    false
                } else {
                    named.push(cols.clone());
                    true
                }
            });

            table.indexes.sort_by(|a, b| a.name.cmp(&b.name));
            table.indexes.dedup_by(|a, b| a.name == b.name);
        }
        warnings
    }
}

fn dedup_in_order(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(cols: &[&str]) -> CanonicalTable {
        let mut t = CanonicalTable::new("t");
        for c in cols {
            t.upsert_column(Column::new(*c, "int"));
        }
        t
    }

    #[test]
    fn drop_column_purges_constraints() {
        let mut t = table_with(&["a", "b", "c"]);
        t.primary_key = vec!["a".into(), "b".into()];
        t.add_unique(Some("t_ab".into()), vec!["a".into(), "b".into()]);
        t.add_unique(None, vec!["a".into()]);
        t.indexes.push(Index {
            name: "idx_t_a".into(),
            columns: vec!["a".into()],
            unique: false,
        });
        assert!(t.drop_column("a"));
        assert_eq!(t.primary_key, vec!["b"]);
        assert_eq!(t.unique, vec![vec!["b".to_string()]]);
        assert_eq!(t.unique_names["t_ab"], vec!["b"]);
        assert!(t.indexes.is_empty());
        assert!(!t.drop_column("zzz"));
    }

    #[test]
    fn finalize_resolves_and_names_foreign_keys() {
        let mut schema = CanonicalSchema::default();
        let mut users = table_with(&["id"]);
        users.name = "users".into();
        users.primary_key = vec!["id".into(), "id".into()];
        let mut orders = table_with(&["user_id", "coupon_id"]);
        orders.name = "orders".into();
        orders.foreign_keys.push(ForeignKey {
            name: None,
            columns: vec!["user_id".into()],
            ref_table: "users".into(),
            ref_columns: vec![],
            on_delete: None,
            on_update: None,
        });
        orders.foreign_keys.push(ForeignKey {
            name: None,
            columns: vec!["coupon_id".into()],
            ref_table: "coupons".into(),
            ref_columns: vec!["id".into()],
            on_delete: None,
            on_update: None,
        });
        schema.tables.insert("users".into(), users);
        schema.tables.insert("orders".into(), orders);

        let warnings = schema.finalize();
        let orders = schema.table("orders").unwrap();
        assert_eq!(orders.foreign_keys[0].ref_columns, vec!["id"]);
        assert_eq!(
            orders.foreign_keys[0].name.as_deref(),
            Some("fk_orders_user_id")
        );
        assert_eq!(orders.foreign_keys.len(), 2);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("coupons"));
        let users = schema.table("users").unwrap();
        assert_eq!(users.primary_key, vec!["id"]);
        assert!(!users.column("id").unwrap().nullable);
    }

    #[test]
    fn drop_constraint_by_default_names() {
        let mut t = table_with(&["a", "b"]);
        t.primary_key = vec!["a".into()];
        t.add_unique(None, vec!["b".into()]);
        assert!(t.drop_constraint("t_b_key"));
        assert!(t.unique.is_empty());
        assert!(t.drop_constraint("t_pkey"));
        assert!(t.primary_key.is_empty());
        assert!(!t.drop_constraint("nope"));
    }
}
