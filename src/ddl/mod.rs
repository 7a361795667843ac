//! Chronological fold of SQL migrations into a canonical schema.
//!
//! Migrations are applied in `(name, sql)` order; statements inside a
//! migration in textual order. A statement that cannot be parsed or applied
//! becomes a [`DdlWarning`] carrying the migration name and statement index,
//! and the fold continues. After the last migration the schema is
//! finalized (primary keys de-duplicated, foreign keys named and resolved,
//! unique sets and indexes sorted), then rendered as a Mermaid ERD and as a
//! consolidated migration.
//!
//! # Supported statements
//!
//! | Statement | Effect |
//! |-----------|--------|
//! | `CREATE TABLE` | new table; replaces a table of the same name |
//! | `DROP TABLE` | removes the table, no-op when absent |
//! | `ALTER TABLE` | `ADD`/`DROP` columns and constraints, `ALTER COLUMN`, `RENAME` |
//! | `CREATE [UNIQUE] INDEX` | adds an index, no-op on a missing table |
//! | `DROP INDEX` | removes the named index from any table |
//! | `CREATE TYPE … AS ENUM` | stores the values in order |
//! | `CREATE VIEW` / `DROP VIEW` | stores / removes the defining statement |
//!
//! Anything else is skipped with a warning.

mod apply;
mod erd;
mod lexer;
mod schema;
mod synth;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DdlError;

pub use apply::StatementKind;
pub use erd::render_erd;
pub use lexer::split_statements;
pub use schema::{CanonicalSchema, CanonicalTable, Column, ForeignKey, Index};
pub use synth::{creation_order, synthesize};

use apply::SchemaBuilder;

/// One migration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub name: String,
    pub sql: String,
}

impl Migration {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// A statement (or finalization step) that did not apply cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlWarning {
    /// `None` for finalization warnings.
    pub migration: Option<String>,
    pub statement_index: Option<usize>,
    pub message: String,
}

impl fmt::Display for DdlWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.migration, self.statement_index) {
            (Some(m), Some(i)) => write!(f, "{} statement {}: {}", m, i, self.message),
            (Some(m), None) => write!(f, "{}: {}", m, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// Schema size after one migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCheckpoint {
    pub migration: String,
    pub statements: usize,
    pub tables: usize,
    pub enums: usize,
    pub views: usize,
}

/// Everything the fold produced, including an empty schema.
#[derive(Debug, Clone)]
pub struct ReduceOutcome {
    pub schema: CanonicalSchema,
    pub warnings: Vec<DdlWarning>,
    pub checkpoints: Vec<SchemaCheckpoint>,
    pub migrations: usize,
}

/// Schema extraction result attached to an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaReport {
    pub schema: CanonicalSchema,
    pub erd: String,
    pub final_migration: String,
    pub warnings: Vec<DdlWarning>,
}

impl ReduceOutcome {
    /// Render the ERD and consolidated migration. Fails when no table was
    /// extracted.
    pub fn into_report(self) -> Result<SchemaReport, DdlError> {
        if self.schema.is_empty() {
            return Err(DdlError::NoSchemaExtracted {
                migrations: self.migrations,
            });
        }
        Ok(SchemaReport {
            erd: render_erd(&self.schema),
            final_migration: synthesize(&self.schema),
            schema: self.schema,
            warnings: self.warnings,
        })
    }
}

/// Fold migrations into a finalized schema.
pub fn reduce(migrations: impl IntoIterator<Item = Migration>) -> ReduceOutcome {
    let mut migrations: Vec<Migration> = migrations.into_iter().collect();
    migrations.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.sql.cmp(&b.sql)));

    let mut builder = SchemaBuilder::default();
    let mut warnings = Vec::new();
    let mut checkpoints = Vec::with_capacity(migrations.len());

    for migration in &migrations {
        let statements = split_statements(&migration.sql);
        for (index, stmt) in statements.iter().enumerate() {
            let mut notes = Vec::new();
            if let Err(message) = builder.apply(stmt, &mut notes) {
                notes.push(message);
            }
            warnings.extend(notes.into_iter().map(|message| DdlWarning {
                migration: Some(migration.name.clone()),
                statement_index: Some(index),
                message,
            }));
        }
        let schema = &builder.schema;
        checkpoints.push(SchemaCheckpoint {
            migration: migration.name.clone(),
            statements: statements.len(),
            tables: schema.tables.len(),
            enums: schema.enums.len(),
            views: schema.views.len(),
        });
    }

    let mut schema = builder.schema;
    warnings.extend(schema.finalize().into_iter().map(|message| DdlWarning {
        migration: None,
        statement_index: None,
        message,
    }));
    debug!(
        migrations = migrations.len(),
        tables = schema.tables.len(),
        warnings = warnings.len(),
        "ddl reduce finished"
    );

    ReduceOutcome {
        schema,
        warnings,
        checkpoints,
        migrations: migrations.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_carry_migration_and_statement_index() {
        let outcome = reduce(vec![Migration::new(
            "001_init.sql",
            "CREATE TABLE a (id INT);\nGRANT SELECT ON a TO reader;\nCREATE TABLE b (id INT",
        )]);
        assert_eq!(outcome.warnings.len(), 2);
        assert_eq!(outcome.warnings[0].statement_index, Some(1));
        assert_eq!(outcome.warnings[1].statement_index, Some(2));
        assert_eq!(
            outcome.warnings[0].migration.as_deref(),
            Some("001_init.sql")
        );
        assert!(outcome.warnings[0].to_string().starts_with("001_init.sql statement 1"));
        assert_eq!(outcome.schema.tables().len(), 1);
    }

    #[test]
    fn checkpoints_track_each_migration() {
        let outcome = reduce(vec![
            Migration::new("002.sql", "CREATE VIEW v AS SELECT 1"),
            Migration::new("001.sql", "CREATE TABLE t (a INT); CREATE TYPE e AS ENUM ('x')"),
        ]);
        let names: Vec<&str> = outcome
            .checkpoints
            .iter()
            .map(|c| c.migration.as_str())
            .collect();
        assert_eq!(names, ["001.sql", "002.sql"]);
        assert_eq!(outcome.checkpoints[0].statements, 2);
        assert_eq!(outcome.checkpoints[1].views, 1);
    }

    #[test]
    fn empty_schema_is_an_error() {
        let outcome = reduce(vec![Migration::new("001.sql", "SELECT 1;")]);
        assert_eq!(
            outcome.into_report().unwrap_err(),
            DdlError::NoSchemaExtracted { migrations: 1 }
        );
    }
}
