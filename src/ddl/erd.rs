//! Mermaid `erDiagram` rendering of a finalized schema.
//!
//! Tables are emitted in name order with their columns sorted by name.
//! Relationship edges follow table order, then foreign-key insertion order,
//! and exist only for single-column keys whose target table is present.

use std::fmt::Write;

use super::schema::CanonicalSchema;

pub fn render_erd(schema: &CanonicalSchema) -> String {
    let mut out = String::from("erDiagram\n");

    for (name, table) in schema.tables() {
        let _ = writeln!(out, "    {} {{", name);
        let mut columns: Vec<_> = table.columns.iter().collect();
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        for column in columns {
            let mut keys = Vec::new();
            if table.is_primary_key(&column.name) {
                keys.push("PK");
            }
            if table.is_unique(&column.name) {
                keys.push("UK");
            }
            if table.is_foreign_key(&column.name) {
                keys.push("FK");
            }
            let _ = write!(out, "        {} {}", mermaid_type(&column.data_type), column.name);
            if !keys.is_empty() {
                let _ = write!(out, " {}", keys.join(", "));
            }
            if let Some(comment) = &column.comment {
                let _ = write!(out, " \"{}\"", comment.replace('"', "'"));
            }
            out.push('\n');
        }
        out.push_str("    }\n");
    }

    for (name, table) in schema.tables() {
        for fk in &table.foreign_keys {
            if !fk.is_single_column() || schema.table(&fk.ref_table).is_none() {
                continue;
            }
            let _ = writeln!(
                out,
                "    {} ||--o{{ {} : \"{} -> {}.{}\"",
                fk.ref_table, name, fk.columns[0], fk.ref_table, fk.ref_columns[0]
            );
        }
    }
    out
}

/// Mermaid attribute types must be single word tokens.
fn mermaid_type(data_type: &str) -> String {
    let expanded = data_type.replace("[]", "_array");
    let mut out = String::with_capacity(expanded.len());
    for ch in expanded.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_matches('_').to_string();
    if out.is_empty() {
        "unknown".to_string()
    } else {
        out
    }
}
