//! Statement appliers.
//!
//! Each statement is tokenized, classified by its leading keywords and
//! applied to the schema under construction. Appliers return `Err` when the
//! statement as a whole cannot be applied; recoverable oddities inside an
//! otherwise valid statement (an unknown column modifier, a CHECK
//! constraint) are pushed to `notes` instead.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::lexer::{span_text, split_commas, tokenize, Cursor, Token, TokenKind};
use super::schema::{CanonicalSchema, CanonicalTable, Column, ForeignKey, Index};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementKind {
    CreateTable,
    DropTable,
    AlterTable,
    CreateIndex,
    DropIndex,
    CreateType,
    CreateView,
    DropView,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::CreateTable => "CREATE_TABLE",
            StatementKind::DropTable => "DROP_TABLE",
            StatementKind::AlterTable => "ALTER_TABLE",
            StatementKind::CreateIndex => "CREATE_INDEX",
            StatementKind::DropIndex => "DROP_INDEX",
            StatementKind::CreateType => "CREATE_TYPE",
            StatementKind::CreateView => "CREATE_VIEW",
            StatementKind::DropView => "DROP_VIEW",
        }
    }
}

/// Words that end a column type or a default expression.
const MODIFIERS: &[&str] = &[
    "NOT",
    "NULL",
    "PRIMARY",
    "UNIQUE",
    "DEFAULT",
    "REFERENCES",
    "CONSTRAINT",
    "CHECK",
    "COLLATE",
    "GENERATED",
    "AUTO_INCREMENT",
    "AUTOINCREMENT",
    "COMMENT",
    "ON",
    "USING",
    "FIRST",
    "AFTER",
];

fn is_modifier(token: &Token) -> bool {
    MODIFIERS.iter().any(|kw| token.is_kw(kw))
}

/// Classify a statement, consuming its prefix keywords.
///
/// For CREATE INDEX the cursor is left on `UNIQUE` or `INDEX`.
pub fn classify(c: &mut Cursor) -> Option<StatementKind> {
    if c.eat_kw("CREATE") {
        c.eat_kws(&["OR", "REPLACE"]);
        if !c.eat_kw("GLOBAL") {
            c.eat_kw("LOCAL");
        }
        if !c.eat_kw("TEMP") && !c.eat_kw("TEMPORARY") {
            c.eat_kw("UNLOGGED");
        }
        if c.eat_kw("TABLE") {
            return Some(StatementKind::CreateTable);
        }
        let unique_index = c.peek_kw("UNIQUE") && c.peek_at(1).is_some_and(|t| t.is_kw("INDEX"));
        if c.peek_kw("INDEX") || unique_index {
            return Some(StatementKind::CreateIndex);
        }
        c.eat_kw("MATERIALIZED");
        if c.eat_kw("VIEW") {
            return Some(StatementKind::CreateView);
        }
        if c.eat_kw("TYPE") {
            return Some(StatementKind::CreateType);
        }
        return None;
    }
    if c.eat_kw("DROP") {
        if c.eat_kw("TABLE") {
            return Some(StatementKind::DropTable);
        }
        if c.eat_kw("INDEX") {
            return Some(StatementKind::DropIndex);
        }
        c.eat_kw("MATERIALIZED");
        if c.eat_kw("VIEW") {
            return Some(StatementKind::DropView);
        }
        return None;
    }
    if c.eat_kws(&["ALTER", "TABLE"]) {
        return Some(StatementKind::AlterTable);
    }
    None
}

/// First words of a statement, for warnings.
pub fn excerpt(stmt: &str) -> String {
    let flat: String = stmt.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 60 {
        format!("{}…", flat.chars().take(60).collect::<String>())
    } else {
        flat
    }
}

/// Mutable schema under construction plus bookkeeping for forward references.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    pub schema: CanonicalSchema,
    /// Tables created implicitly by ALTER TABLE before their CREATE TABLE.
    implicit: BTreeSet<String>,
}

impl SchemaBuilder {
    pub fn apply(&mut self, stmt: &str, notes: &mut Vec<String>) -> Result<StatementKind, String> {
        let tokens = tokenize(stmt)?;
        let mut c = Cursor::new(stmt, &tokens);
        let kind = classify(&mut c)
            .ok_or_else(|| format!("unsupported statement skipped: {}", excerpt(stmt)))?;
        match kind {
            StatementKind::CreateTable => self.create_table(&mut c, notes)?,
            StatementKind::DropTable => self.drop_table(&mut c)?,
            StatementKind::AlterTable => self.alter_table(&mut c, notes)?,
            StatementKind::CreateIndex => self.create_index(&mut c, notes)?,
            StatementKind::DropIndex => self.drop_index(&mut c, notes)?,
            StatementKind::CreateType => self.create_type(&mut c)?,
            StatementKind::CreateView => self.create_view(&mut c, stmt)?,
            StatementKind::DropView => self.drop_view(&mut c)?,
        }
        Ok(kind)
    }

    fn ensure_table(&mut self, name: &str) {
        if !self.schema.tables.contains_key(name) {
            self.schema
                .tables
                .insert(name.to_string(), CanonicalTable::new(name));
            self.implicit.insert(name.to_string());
        }
    }

    fn create_table(&mut self, c: &mut Cursor, notes: &mut Vec<String>) -> Result<(), String> {
        let if_not_exists = c.eat_kws(&["IF", "NOT", "EXISTS"]);
        let name = c.name()?;
        if c.peek_kw("AS") || c.peek_kw("PARTITION") || c.peek_kw("OF") {
            return Err(format!("CREATE TABLE {} without a column list is not supported", name));
        }
        let body = c.group()?;

        let was_implicit = self.implicit.remove(&name);
        let existing = self.schema.tables.remove(&name);
        if let Some(existing) = &existing {
            if !was_implicit {
                if if_not_exists {
                    self.schema.tables.insert(name, existing.clone());
                    return Ok(());
                }
                notes.push(format!("table {} already existed and was replaced", name));
            }
        }

        let mut table = CanonicalTable::new(&name);
        for item in split_commas(body) {
            if let Err(msg) = table_item(&mut table, c.src(), item, notes) {
                notes.push(format!("{}: item skipped: {}", name, msg));
            }
        }

        // Carry over what earlier ALTER TABLE statements recorded.
        if let (true, Some(previous)) = (was_implicit, existing) {
            for column in previous.columns {
                if table.column(&column.name).is_none() {
                    table.columns.push(column);
                }
            }
            if table.primary_key.is_empty() {
                table.primary_key = previous.primary_key;
            }
            table.unique.extend(previous.unique);
            table.unique_names.extend(previous.unique_names);
            table.foreign_keys.extend(previous.foreign_keys);
            table.indexes.extend(previous.indexes);
        }

        self.schema.tables.insert(name, table);
        Ok(())
    }

    fn drop_table(&mut self, c: &mut Cursor) -> Result<(), String> {
        c.eat_kws(&["IF", "EXISTS"]);
        for name in name_list(c)? {
            self.schema.tables.remove(&name);
            self.implicit.remove(&name);
        }
        Ok(())
    }

    fn alter_table(&mut self, c: &mut Cursor, notes: &mut Vec<String>) -> Result<(), String> {
        let if_exists = c.eat_kws(&["IF", "EXISTS"]);
        c.eat_kw("ONLY");
        let name = c.name()?;
        if if_exists && !self.schema.tables.contains_key(&name) {
            return Ok(());
        }
        self.ensure_table(&name);

        if c.peek_kw("RENAME") {
            c.next();
            if c.eat_kw("TO") {
                let to = c.name()?;
                return self.rename_table(&name, &to);
            }
            if c.peek_kw("CONSTRAINT") {
                return Err("RENAME CONSTRAINT is not supported".to_string());
            }
            c.eat_kw("COLUMN");
            let from = c.name()?;
            c.expect_kw("TO")?;
            let to = c.name()?;
            return self.rename_column(&name, &from, &to);
        }

        let actions = split_commas(c.rest());
        if actions.is_empty() {
            return Err(format!("ALTER TABLE {} has no action", name));
        }
        for action in actions {
            let mut ac = Cursor::new(c.src(), action);
            let Some(table) = self.schema.tables.get_mut(&name) else {
                break;
            };
            if let Err(msg) = alter_action(table, &mut ac, notes) {
                notes.push(format!("ALTER TABLE {}: {}", name, msg));
            }
        }
        Ok(())
    }

    fn rename_table(&mut self, from: &str, to: &str) -> Result<(), String> {
        if from == to {
            return Ok(());
        }
        if self.schema.tables.contains_key(to) {
            return Err(format!("cannot rename {} to {}: table exists", from, to));
        }
        let Some(mut table) = self.schema.tables.remove(from) else {
            return Err(format!("table {} does not exist", from));
        };
        table.name = to.to_string();
        self.schema.tables.insert(to.to_string(), table);
        if self.implicit.remove(from) {
            self.implicit.insert(to.to_string());
        }
        for t in self.schema.tables.values_mut() {
            for fk in t.foreign_keys.iter_mut() {
                if fk.ref_table == from {
                    fk.ref_table = to.to_string();
                }
            }
        }
        Ok(())
    }

    fn rename_column(&mut self, table: &str, from: &str, to: &str) -> Result<(), String> {
        let renamed = self
            .schema
            .tables
            .get_mut(table)
            .is_some_and(|t| t.rename_column(from, to));
        if !renamed {
            return Err(format!("column {} does not exist on {}", from, table));
        }
        for t in self.schema.tables.values_mut() {
            for fk in t.foreign_keys.iter_mut().filter(|fk| fk.ref_table == table) {
                for col in fk.ref_columns.iter_mut() {
                    if col == from {
                        *col = to.to_string();
                    }
                }
            }
        }
        Ok(())
    }

    fn create_index(&mut self, c: &mut Cursor, notes: &mut Vec<String>) -> Result<(), String> {
        let unique = c.eat_kw("UNIQUE");
        c.expect_kw("INDEX")?;
        c.eat_kw("CONCURRENTLY");
        let if_not_exists = c.eat_kws(&["IF", "NOT", "EXISTS"]);
        let name = if c.peek_kw("ON") {
            None
        } else {
            Some(c.name()?)
        };
        c.expect_kw("ON")?;
        c.eat_kw("ONLY");
        let table_name = c.name()?;
        if c.eat_kw("USING") {
            c.next();
        }
        let columns = index_columns(c.src(), c.group()?)?;

        let Some(table) = self.schema.tables.get_mut(&table_name) else {
            notes.push(format!("index on missing table {} ignored", table_name));
            return Ok(());
        };
        let name = name.unwrap_or_else(|| default_index_name(&table_name, &columns));
        let index = Index {
            name,
            columns,
            unique,
        };
        match table.indexes.iter_mut().find(|i| i.name == index.name) {
            Some(_) if if_not_exists => {}
            Some(existing) => *existing = index,
            None => table.indexes.push(index),
        }
        Ok(())
    }

    fn drop_index(&mut self, c: &mut Cursor, notes: &mut Vec<String>) -> Result<(), String> {
        c.eat_kw("CONCURRENTLY");
        let if_exists = c.eat_kws(&["IF", "EXISTS"]);
        let names = name_list(c)?;
        let only_table = if c.eat_kw("ON") { Some(c.name()?) } else { None };
        for name in names {
            let mut dropped = false;
            for (table_name, table) in self.schema.tables.iter_mut() {
                if only_table.as_ref().is_some_and(|t| t != table_name) {
                    continue;
                }
                dropped |= table.drop_index(&name);
            }
            if !dropped && !if_exists {
                notes.push(format!("index {} not found", name));
            }
        }
        Ok(())
    }

    fn create_type(&mut self, c: &mut Cursor) -> Result<(), String> {
        let name = c.name()?;
        c.expect_kw("AS")?;
        if !c.eat_kw("ENUM") {
            return Err(format!("type {} is not an enum; only enum types are supported", name));
        }
        let mut values = Vec::new();
        for piece in split_commas(c.group()?) {
            match piece {
                [Token {
                    kind: TokenKind::Literal(value),
                    ..
                }] => values.push(value.clone()),
                _ => {
                    return Err(format!(
                        "enum {} has a non-literal value '{}'",
                        name,
                        span_text(c.src(), piece)
                    ))
                }
            }
        }
        self.schema.enums.insert(name, values);
        Ok(())
    }

    fn create_view(&mut self, c: &mut Cursor, stmt: &str) -> Result<(), String> {
        let if_not_exists = c.eat_kws(&["IF", "NOT", "EXISTS"]);
        let name = c.name()?;
        if if_not_exists && self.schema.views.contains_key(&name) {
            return Ok(());
        }
        self.schema.views.insert(name, stmt.trim().to_string());
        Ok(())
    }

    fn drop_view(&mut self, c: &mut Cursor) -> Result<(), String> {
        c.eat_kws(&["IF", "EXISTS"]);
        for name in name_list(c)? {
            self.schema.views.remove(&name);
        }
        Ok(())
    }
}

/// Comma-separated names, stopping at the first non-name token after a name.
fn name_list(c: &mut Cursor) -> Result<Vec<String>, String> {
    let mut names = vec![c.name()?];
    while c.peek().is_some_and(|t| t.is_symbol(',')) {
        c.next();
        names.push(c.name()?);
    }
    Ok(names)
}

/// One item of a CREATE TABLE body.
fn table_item(
    table: &mut CanonicalTable,
    src: &str,
    item: &[Token],
    notes: &mut Vec<String>,
) -> Result<(), String> {
    let mut c = Cursor::new(src, item);
    if c.eat_kw("CONSTRAINT") {
        let name = c.name()?;
        if table_constraint(table, &mut c, Some(name.clone()), notes)? {
            return Ok(());
        }
        return Err(format!("unsupported constraint {}", name));
    }
    if table_constraint(table, &mut c, None, notes)? {
        return Ok(());
    }
    if c.peek_kw("LIKE") {
        return Err("LIKE clause is not supported".to_string());
    }
    if c.eat_kw("FULLTEXT") || c.eat_kw("SPATIAL") {
        if !c.eat_kw("INDEX") {
            c.eat_kw("KEY");
        }
        return inline_index(table, &mut c, false);
    }
    if is_index_item(&c) {
        c.next();
        return inline_index(table, &mut c, false);
    }
    column_def(table, &mut c, notes)
}

/// `INDEX|KEY [name] (cols)` as opposed to a column called `key`.
fn is_index_item(c: &Cursor) -> bool {
    if !(c.peek_kw("INDEX") || c.peek_kw("KEY")) {
        return false;
    }
    let is_group = |n: usize| c.peek_at(n).is_some_and(|t| t.group().is_some());
    is_group(1) || is_group(2) || c.peek_at(1).is_some_and(|t| t.is_kw("USING"))
}

fn inline_index(table: &mut CanonicalTable, c: &mut Cursor, unique: bool) -> Result<(), String> {
    let name = if c.peek().and_then(Token::group).is_none() && !c.peek_kw("USING") {
        Some(c.name()?)
    } else {
        None
    };
    if c.eat_kw("USING") {
        c.next();
    }
    let columns = index_columns(c.src(), c.group()?)?;
    let name = name.unwrap_or_else(|| default_index_name(&table.name, &columns));
    table.indexes.push(Index {
        name,
        columns,
        unique,
    });
    Ok(())
}

/// PRIMARY KEY, FOREIGN KEY, UNIQUE, CHECK or EXCLUDE. `Ok(false)` when the
/// cursor is not on a table constraint.
fn table_constraint(
    table: &mut CanonicalTable,
    c: &mut Cursor,
    name: Option<String>,
    notes: &mut Vec<String>,
) -> Result<bool, String> {
    if c.eat_kws(&["PRIMARY", "KEY"]) {
        let columns = column_list(c.group()?)?;
        table.primary_key.extend(columns);
        return Ok(true);
    }
    if c.eat_kws(&["FOREIGN", "KEY"]) {
        if c.peek().and_then(Token::group).is_none() {
            c.name()?;
        }
        let columns = column_list(c.group()?)?;
        let fk = references(c, name, columns)?;
        table.foreign_keys.push(fk);
        return Ok(true);
    }
    if c.eat_kw("UNIQUE") {
        if !c.eat_kw("KEY") {
            c.eat_kw("INDEX");
        }
        let mut name = name;
        if c.peek().and_then(Token::group).is_none() && !c.peek_kw("NULLS") {
            name = Some(c.name()?);
        }
        c.eat_kws(&["NULLS", "NOT", "DISTINCT"]);
        let columns = column_list(c.group()?)?;
        table.add_unique(name, columns);
        return Ok(true);
    }
    if c.eat_kw("CHECK") {
        notes.push(format!("CHECK constraint on {} ignored", table.name));
        return Ok(true);
    }
    if c.eat_kw("EXCLUDE") {
        notes.push(format!("EXCLUDE constraint on {} ignored", table.name));
        return Ok(true);
    }
    Ok(false)
}

fn references(
    c: &mut Cursor,
    name: Option<String>,
    columns: Vec<String>,
) -> Result<ForeignKey, String> {
    c.expect_kw("REFERENCES")?;
    let ref_table = c.name()?;
    let ref_columns = match c.peek().and_then(Token::group) {
        Some(group) => {
            c.next();
            column_list(group)?
        }
        None => Vec::new(),
    };
    let mut fk = ForeignKey {
        name,
        columns,
        ref_table,
        ref_columns,
        on_delete: None,
        on_update: None,
    };
    loop {
        if c.eat_kws(&["ON", "DELETE"]) {
            fk.on_delete = Some(ref_action(c)?);
        } else if c.eat_kws(&["ON", "UPDATE"]) {
            fk.on_update = Some(ref_action(c)?);
        } else if c.eat_kw("MATCH") {
            c.next();
        } else if c.eat_kw("DEFERRABLE") || c.eat_kws(&["NOT", "DEFERRABLE"]) {
        } else if c.eat_kw("INITIALLY") {
            c.next();
        } else {
            break;
        }
    }
    Ok(fk)
}

fn ref_action(c: &mut Cursor) -> Result<String, String> {
    for pair in [["SET", "NULL"], ["SET", "DEFAULT"], ["NO", "ACTION"]] {
        if c.eat_kws(&pair) {
            return Ok(pair.join(" ").to_lowercase());
        }
    }
    for single in ["CASCADE", "RESTRICT"] {
        if c.eat_kw(single) {
            return Ok(single.to_lowercase());
        }
    }
    Err(format!("unknown referential action near '{}'", c.near()))
}

fn column_def(
    table: &mut CanonicalTable,
    c: &mut Cursor,
    notes: &mut Vec<String>,
) -> Result<(), String> {
    let name = c
        .next()
        .and_then(Token::ident)
        .ok_or_else(|| format!("expected a column name near '{}'", c.near()))?;
    let data_type = column_type(c);
    if data_type.is_empty() {
        return Err(format!("column {} has no type", name));
    }
    let mut column = Column::new(&name, data_type);
    let mut constraint: Option<String> = None;

    while !c.is_done() {
        if c.eat_kws(&["NOT", "NULL"]) {
            column.nullable = false;
        } else if c.eat_kw("NULL") {
            column.nullable = true;
        } else if c.eat_kws(&["PRIMARY", "KEY"]) {
            table.primary_key.push(name.clone());
            column.nullable = false;
            constraint = None;
        } else if c.eat_kw("UNIQUE") {
            c.eat_kw("KEY");
            table.add_unique(constraint.take(), vec![name.clone()]);
        } else if c.eat_kw("DEFAULT") {
            column.default = Some(expression(c)?);
        } else if c.peek_kw("REFERENCES") {
            let fk = references(c, constraint.take(), vec![name.clone()])?;
            table.foreign_keys.push(fk);
        } else if c.eat_kw("CONSTRAINT") {
            constraint = Some(c.name()?);
        } else if c.eat_kw("CHECK") {
            c.group()?;
            constraint = None;
        } else if c.eat_kw("COLLATE") {
            c.name()?;
        } else if c.eat_kw("GENERATED") {
            generated(c)?;
        } else if c.eat_kw("AUTO_INCREMENT") || c.eat_kw("AUTOINCREMENT") || c.eat_kw("FIRST") {
        } else if c.eat_kw("AFTER") {
            c.name()?;
        } else if c.eat_kw("COMMENT") {
            match c.next().map(|t| &t.kind) {
                Some(TokenKind::Literal(text)) => column.comment = Some(text.clone()),
                _ => return Err(format!("COMMENT on {} needs a string literal", name)),
            }
        } else if c.eat_kws(&["ON", "UPDATE"]) {
            expression(c)?;
        } else {
            let word = c
                .next()
                .map(|t| span_text(c.src(), std::slice::from_ref(t)).to_string())
                .unwrap_or_default();
            notes.push(format!(
                "unrecognised modifier '{}' on {}.{} ignored",
                word, table.name, name
            ));
        }
    }
    table.upsert_column(column);
    Ok(())
}

/// `GENERATED ALWAYS AS (expr) STORED` or `GENERATED … AS IDENTITY [(opts)]`.
fn generated(c: &mut Cursor) -> Result<(), String> {
    if !c.eat_kw("ALWAYS") {
        c.eat_kws(&["BY", "DEFAULT"]);
    }
    c.expect_kw("AS")?;
    if c.eat_kw("IDENTITY") {
        if c.peek().and_then(Token::group).is_some() {
            c.next();
        }
        return Ok(());
    }
    c.group()?;
    if !c.eat_kw("STORED") {
        c.eat_kw("VIRTUAL");
    }
    Ok(())
}

/// Normalized type: lowercase, single spaces, no spaces inside groups.
fn column_type(c: &mut Cursor) -> String {
    let mut out = String::new();
    while let Some(token) = c.peek() {
        if is_modifier(token) {
            break;
        }
        c.next();
        match &token.kind {
            TokenKind::Word(w) | TokenKind::Ident(w) => {
                if !out.is_empty() && !out.ends_with('.') && !out.ends_with('[') {
                    out.push(' ');
                }
                if out.ends_with('.') {
                    // Drop the schema qualifier.
                    out.pop();
                    out.truncate(out.rfind(' ').map(|i| i + 1).unwrap_or(0));
                }
                out.push_str(&w.to_lowercase());
            }
            TokenKind::Group(_) => {
                let text = span_text(c.src(), std::slice::from_ref(token));
                out.extend(text.chars().filter(|ch| !ch.is_whitespace()));
            }
            TokenKind::Symbol(ch) => out.push(*ch),
            TokenKind::Literal(_) => {
                out.push_str(span_text(c.src(), std::slice::from_ref(token)));
            }
        }
    }
    out.to_lowercase()
}

/// Verbatim expression up to the next modifier keyword (at least one token).
fn expression(c: &mut Cursor) -> Result<String, String> {
    let rest = c.rest();
    let mut len = 0;
    while let Some(token) = rest.get(len) {
        if len > 0 && is_modifier(token) {
            break;
        }
        len += 1;
    }
    if len == 0 {
        return Err("expected an expression".to_string());
    }
    for _ in 0..len {
        c.next();
    }
    Ok(span_text(c.src(), &rest[..len]).trim().to_string())
}

/// Plain column names for key constraints; sort order and lengths ignored.
fn column_list(group: &[Token]) -> Result<Vec<String>, String> {
    let columns = split_commas(group)
        .into_iter()
        .map(|piece| {
            piece[0]
                .ident()
                .ok_or_else(|| "expected a column name in column list".to_string())
        })
        .collect::<Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Err("empty column list".to_string());
    }
    Ok(columns)
}

/// Index keys: a column name, or a compacted expression like `lower(email)`.
fn index_columns(src: &str, group: &[Token]) -> Result<Vec<String>, String> {
    let columns: Vec<String> = split_commas(group)
        .into_iter()
        .map(|piece| {
            let plain = piece[0].ident().filter(|_| {
                piece.get(1).map_or(true, |next| next.group().is_none())
            });
            plain.unwrap_or_else(|| {
                span_text(src, piece)
                    .chars()
                    .filter(|ch| !ch.is_whitespace())
                    .collect::<String>()
                    .to_lowercase()
            })
        })
        .collect();
    if columns.is_empty() {
        return Err("empty index column list".to_string());
    }
    Ok(columns)
}

fn default_index_name(table: &str, columns: &[String]) -> String {
    let raw = format!("idx_{}_{}", table, columns.join("_"));
    let mut name = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let ch = if ch.is_ascii_alphanumeric() { ch } else { '_' };
        if !(ch == '_' && name.ends_with('_')) {
            name.push(ch);
        }
    }
    name.trim_end_matches('_').to_string()
}

fn alter_action(
    table: &mut CanonicalTable,
    c: &mut Cursor,
    notes: &mut Vec<String>,
) -> Result<(), String> {
    if c.eat_kw("ADD") {
        if c.eat_kw("CONSTRAINT") {
            let name = c.name()?;
            if table_constraint(table, c, Some(name.clone()), notes)? {
                return Ok(());
            }
            return Err(format!("unsupported constraint {}", name));
        }
        if table_constraint(table, c, None, notes)? {
            return Ok(());
        }
        if is_index_item(c) {
            c.next();
            return inline_index(table, c, false);
        }
        c.eat_kw("COLUMN");
        if c.eat_kws(&["IF", "NOT", "EXISTS"]) {
            let exists = c
                .peek()
                .and_then(Token::ident)
                .is_some_and(|n| table.column(&n).is_some());
            if exists {
                return Ok(());
            }
        }
        return column_def(table, c, notes);
    }

    if c.eat_kw("DROP") {
        if c.eat_kw("CONSTRAINT") {
            let if_exists = c.eat_kws(&["IF", "EXISTS"]);
            let name = c.name()?;
            if !table.drop_constraint(&name) && !if_exists {
                return Err(format!("constraint {} not found", name));
            }
            return Ok(());
        }
        if c.eat_kws(&["PRIMARY", "KEY"]) {
            table.primary_key.clear();
            return Ok(());
        }
        if c.eat_kws(&["FOREIGN", "KEY"]) || c.eat_kw("INDEX") || c.eat_kw("KEY") {
            let name = c.name()?;
            if !table.drop_constraint(&name) {
                return Err(format!("constraint {} not found", name));
            }
            return Ok(());
        }
        c.eat_kw("COLUMN");
        let if_exists = c.eat_kws(&["IF", "EXISTS"]);
        let column = c.name()?;
        if !table.drop_column(&column) && !if_exists {
            return Err(format!("column {} does not exist", column));
        }
        return Ok(());
    }

    if c.eat_kw("ALTER") {
        c.eat_kw("COLUMN");
        let name = c.name()?;
        let column = table
            .column_mut(&name)
            .ok_or_else(|| format!("column {} does not exist", name))?;
        if c.eat_kw("TYPE") || c.eat_kws(&["SET", "DATA", "TYPE"]) {
            let data_type = column_type(c);
            if data_type.is_empty() {
                return Err(format!("ALTER COLUMN {} TYPE needs a type", name));
            }
            column.data_type = data_type;
        } else if c.eat_kws(&["SET", "NOT", "NULL"]) {
            column.nullable = false;
        } else if c.eat_kws(&["DROP", "NOT", "NULL"]) {
            column.nullable = true;
        } else if c.eat_kws(&["SET", "DEFAULT"]) {
            column.default = Some(expression(c)?);
        } else if c.eat_kws(&["DROP", "DEFAULT"]) {
            column.default = None;
        } else {
            return Err(format!("unsupported ALTER COLUMN action near '{}'", c.near()));
        }
        return Ok(());
    }

    if c.eat_kw("MODIFY") {
        c.eat_kw("COLUMN");
        return column_def(table, c, notes);
    }

    Err(format!("unsupported action '{}'", excerpt(span_text(c.src(), c.rest()))))
}
