//! Consolidated migration synthesis.
//!
//! Output order: enums, tables in dependency order, foreign keys that could
//! not be declared inline, indexes, views. Reducing the output again yields
//! the same canonical schema.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use super::schema::{CanonicalSchema, CanonicalTable, ForeignKey};

/// Words the reducer treats structurally; identifiers spelled like them are quoted.
const RESERVED: &[&str] = &[
    "add", "after", "alter", "as", "auto_increment", "autoincrement", "check", "collate",
    "column", "comment", "concurrently", "constraint", "create", "default", "drop", "exclude",
    "first", "foreign", "fulltext", "generated", "if", "index", "key", "like", "modify", "not",
    "null", "on", "only", "primary", "references", "rename", "set", "spatial", "table", "to",
    "type", "unique", "using", "view",
];

fn quote_ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain && !RESERVED.contains(&name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn quote_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Table creation order: a table follows the tables it references. When
/// only cycles remain, the lexicographically smallest table goes next.
pub fn creation_order(schema: &CanonicalSchema) -> Vec<&str> {
    let tables = schema.tables();
    let deps: BTreeMap<&str, BTreeSet<&str>> = tables
        .iter()
        .map(|(name, table)| {
            let refs = table
                .foreign_keys
                .iter()
                .map(|fk| fk.ref_table.as_str())
                .filter(|r| *r != name.as_str() && tables.contains_key(*r))
                .collect();
            (name.as_str(), refs)
        })
        .collect();

    let mut remaining: BTreeSet<&str> = tables.keys().map(String::as_str).collect();
    let mut order = Vec::with_capacity(remaining.len());
    while let Some(first) = remaining.first().copied() {
        let ready = remaining
            .iter()
            .copied()
            .find(|t| deps[t].iter().all(|d| !remaining.contains(d)));
        let next = ready.unwrap_or(first);
        remaining.remove(next);
        order.push(next);
    }
    order
}

fn fk_clause(fk: &ForeignKey) -> String {
    let mut clause = String::new();
    if let Some(name) = &fk.name {
        let _ = write!(clause, "CONSTRAINT {} ", quote_ident(name));
    }
    let _ = write!(
        clause,
        "FOREIGN KEY ({}) REFERENCES {}",
        quote_list(&fk.columns),
        quote_ident(&fk.ref_table)
    );
    if !fk.ref_columns.is_empty() {
        let _ = write!(clause, " ({})", quote_list(&fk.ref_columns));
    }
    if let Some(action) = &fk.on_delete {
        let _ = write!(clause, " ON DELETE {}", action.to_uppercase());
    }
    if let Some(action) = &fk.on_update {
        let _ = write!(clause, " ON UPDATE {}", action.to_uppercase());
    }
    clause
}

fn table_items(table: &CanonicalTable, inline_fks: &[&ForeignKey]) -> Vec<String> {
    let mut items = Vec::new();
    for column in &table.columns {
        let mut line = format!("{} {}", quote_ident(&column.name), column.data_type);
        if !column.nullable {
            line.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            let _ = write!(line, " DEFAULT {}", default);
        }
        if let Some(comment) = &column.comment {
            let _ = write!(line, " COMMENT {}", quote_literal(comment));
        }
        items.push(line);
    }
    if !table.primary_key.is_empty() {
        items.push(format!("PRIMARY KEY ({})", quote_list(&table.primary_key)));
    }
    for set in &table.unique {
        let name = table
            .unique_names
            .iter()
            .find(|(_, cols)| *cols == set)
            .map(|(name, _)| name);
        match name {
            Some(name) => items.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                quote_ident(name),
                quote_list(set)
            )),
            None => items.push(format!("UNIQUE ({})", quote_list(set))),
        }
    }
    for fk in inline_fks {
        items.push(fk_clause(fk));
    }
    items
}

/// Render the schema as one migration file.
pub fn synthesize(schema: &CanonicalSchema) -> String {
    let mut out = String::from("-- Consolidated schema\n");

    if !schema.enums().is_empty() {
        out.push('\n');
        for (name, values) in schema.enums() {
            let values: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
            let _ = writeln!(
                out,
                "CREATE TYPE {} AS ENUM ({});",
                quote_ident(name),
                values.join(", ")
            );
        }
    }

    let mut created: BTreeSet<&str> = BTreeSet::new();
    let mut deferred: Vec<(&str, &ForeignKey)> = Vec::new();
    for name in creation_order(schema) {
        let Some(table) = schema.tables().get(name) else {
            continue;
        };
        // Keep insertion order: once one key is deferred, the rest follow it.
        let mut inline = Vec::new();
        let mut deferring = false;
        for fk in &table.foreign_keys {
            let target_ready = fk.ref_table == name
                || created.contains(fk.ref_table.as_str())
                || schema.table(&fk.ref_table).is_none();
            deferring |= !target_ready;
            if deferring {
                deferred.push((name, fk));
            } else {
                inline.push(fk);
            }
        }
        created.insert(name);

        let items = table_items(table, &inline);
        out.push('\n');
        if items.is_empty() {
            let _ = writeln!(out, "CREATE TABLE {} ();", quote_ident(name));
        } else {
            let _ = writeln!(out, "CREATE TABLE {} (", quote_ident(name));
            let _ = writeln!(out, "    {}", items.join(",\n    "));
            out.push_str(");\n");
        }
    }

    if !deferred.is_empty() {
        out.push('\n');
        for (table, fk) in deferred {
            let _ = writeln!(
                out,
                "ALTER TABLE {} ADD {};",
                quote_ident(table),
                fk_clause(fk)
            );
        }
    }

    let indexes: Vec<_> = schema
        .tables()
        .iter()
        .flat_map(|(name, t)| t.indexes.iter().map(move |i| (name, i)))
        .collect();
    if !indexes.is_empty() {
        out.push('\n');
        for (table, index) in indexes {
            let columns: Vec<String> = index
                .columns
                .iter()
                .map(|c| {
                    if c.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
                        quote_ident(c)
                    } else {
                        c.clone()
                    }
                })
                .collect();
            let _ = writeln!(
                out,
                "CREATE {}INDEX {} ON {} ({});",
                if index.unique { "UNIQUE " } else { "" },
                quote_ident(&index.name),
                quote_ident(table),
                columns.join(", ")
            );
        }
    }

    if !schema.views().is_empty() {
        out.push('\n');
        for definition in schema.views().values() {
            let _ = writeln!(out, "{};", definition);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(quote_ident("users"), "users");
        assert_eq!(quote_ident("key"), "\"key\"");
        assert_eq!(quote_ident("2fa"), "\"2fa\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}
