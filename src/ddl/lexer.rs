//! Statement splitting and tokenizing for the DDL subset.
//!
//! Splitting is string-aware: semicolons and comment markers inside
//! single-quoted literals, double-quoted or back-quoted identifiers and
//! PostgreSQL dollar-quoted bodies are left alone.
//!
//! Tokens keep byte spans into the statement they came from, so callers can
//! recover verbatim source (default expressions, view bodies) while still
//! matching keywords structurally.

/// Split migration text into comment-free statements.
///
/// Line comments (`--`) and block comments (`/* */`, nesting allowed) are
/// removed. Statements are split on `;` outside parentheses and quotes,
/// trimmed, and empty statements are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if next == Some('*') => {
                let mut nesting = 0usize;
                while i < chars.len() {
                    if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
                        nesting += 1;
                        i += 2;
                    } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        nesting -= 1;
                        i += 2;
                        if nesting == 0 {
                            break;
                        }
                    } else {
                        i += 1;
                    }
                }
                current.push(' ');
                continue;
            }
            '\'' | '"' | '`' => {
                let end = quoted_end(&chars, i, c).unwrap_or(chars.len());
                current.extend(&chars[i..end]);
                i = end;
                continue;
            }
            '$' => {
                if let Some(tag_len) = dollar_tag(&chars, i) {
                    let end = dollar_end(&chars, i, tag_len);
                    current.extend(&chars[i..end]);
                    i = end;
                    continue;
                }
                current.push(c);
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ';' if depth == 0 => {
                push_statement(&mut statements, &mut current);
            }
            _ => current.push(c),
        }
        i += 1;
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let stmt = current.trim();
    if !stmt.is_empty() {
        statements.push(stmt.to_string());
    }
    current.clear();
}

/// Index one past the closing quote of a quoted region starting at `start`.
/// A doubled quote character is an escape. `None` when unterminated.
fn quoted_end(chars: &[char], start: usize, quote: char) -> Option<usize> {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

/// Length of a `$tag$` opener at `start`, including both dollars.
fn dollar_tag(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
        i += 1;
    }
    if chars.get(i) != Some(&'$') {
        return None;
    }
    if chars.get(start + 1).is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(i + 1 - start)
}

fn dollar_end(chars: &[char], start: usize, tag_len: usize) -> usize {
    let tag = &chars[start..start + tag_len];
    let mut i = start + tag_len;
    while i + tag_len <= chars.len() {
        if &chars[i..i + tag_len] == tag {
            return i + tag_len;
        }
        i += 1;
    }
    chars.len()
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Bare word or number, original case.
    Word(String),
    /// `"quoted"` or `` `quoted` `` identifier, quotes removed.
    Ident(String),
    /// `'string'` or dollar-quoted literal, unescaped value.
    Literal(String),
    /// Parenthesised group.
    Group(Vec<Token>),
    Symbol(char),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte span in the statement text.
    pub start: usize,
    pub end: usize,
}

impl Token {
    /// Case-insensitive keyword match on a bare word.
    pub fn is_kw(&self, kw: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(w) if w.eq_ignore_ascii_case(kw))
    }

    pub fn is_symbol(&self, c: char) -> bool {
        matches!(self.kind, TokenKind::Symbol(s) if s == c)
    }

    /// Lowercased identifier for words and quoted identifiers.
    pub fn ident(&self) -> Option<String> {
        match &self.kind {
            TokenKind::Word(w) | TokenKind::Ident(w) => Some(w.to_lowercase()),
            _ => None,
        }
    }

    pub fn group(&self) -> Option<&[Token]> {
        match &self.kind {
            TokenKind::Group(children) => Some(children),
            _ => None,
        }
    }
}

/// Tokenize one statement. Fails on unterminated quotes or unbalanced
/// parentheses.
pub fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let plain: Vec<char> = chars.iter().map(|(_, c)| *c).collect();
    let offset = |i: usize| chars.get(i).map(|(b, _)| *b).unwrap_or(src.len());
    let mut frames: Vec<(usize, Vec<Token>)> = vec![(0, Vec::new())];
    let mut i = 0;

    while i < chars.len() {
        let (start, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let token = match c {
            '(' => {
                frames.push((start, Vec::new()));
                i += 1;
                continue;
            }
            ')' => {
                if frames.len() < 2 {
                    return Err("unbalanced ')'".to_string());
                }
                let (open, children) = frames.pop().unwrap_or_default();
                i += 1;
                Token {
                    kind: TokenKind::Group(children),
                    start: open,
                    end: offset(i),
                }
            }
            '\'' | '"' | '`' => {
                let end = quoted_end(&plain, i, c)
                    .ok_or_else(|| format!("unterminated quote starting at byte {}", start))?;
                let doubled: String = [c, c].iter().collect();
                let inner: String = plain[i + 1..end - 1].iter().collect();
                let value = inner.replace(&doubled, &c.to_string());
                i = end;
                let kind = if c == '\'' {
                    TokenKind::Literal(value)
                } else {
                    TokenKind::Ident(value)
                };
                Token {
                    kind,
                    start,
                    end: offset(i),
                }
            }
            '$' => {
                match dollar_tag(&plain, i) {
                    Some(tag_len) => {
                        let end = dollar_end(&plain, i, tag_len);
                        let body_end = end.saturating_sub(tag_len).max(i + tag_len);
                        let body: String = plain[i + tag_len..body_end].iter().collect();
                        i = end;
                        Token {
                            kind: TokenKind::Literal(body),
                            start,
                            end: offset(i),
                        }
                    }
                    None => {
                        i += 1;
                        Token {
                            kind: TokenKind::Symbol('$'),
                            start,
                            end: offset(i),
                        }
                    }
                }
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut word = String::new();
                while i < chars.len() {
                    let ch = chars[i].1;
                    if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                        word.push(ch);
                        i += 1;
                    } else {
                        break;
                    }
                }
                Token {
                    kind: TokenKind::Word(word),
                    start,
                    end: offset(i),
                }
            }
            other => {
                i += 1;
                Token {
                    kind: TokenKind::Symbol(other),
                    start,
                    end: offset(i),
                }
            }
        };
        if let Some((_, tokens)) = frames.last_mut() {
            tokens.push(token);
        }
    }

    if frames.len() != 1 {
        return Err("unbalanced '('".to_string());
    }
    Ok(frames.pop().map(|(_, t)| t).unwrap_or_default())
}

/// Source text covered by a token run.
pub fn span_text<'a>(src: &'a str, tokens: &[Token]) -> &'a str {
    match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => src.get(first.start..last.end).unwrap_or(""),
        _ => "",
    }
}

/// Split a token run on top-level commas, dropping empty pieces.
pub fn split_commas(tokens: &[Token]) -> Vec<&[Token]> {
    tokens
        .split(|t| t.is_symbol(','))
        .filter(|piece| !piece.is_empty())
        .collect()
}

/// Read-only cursor over a token run.
pub struct Cursor<'a> {
    src: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(src: &'a str, tokens: &'a [Token]) -> Self {
        Self {
            src,
            tokens,
            pos: 0,
        }
    }

    pub fn src(&self) -> &'a str {
        self.src
    }

    pub fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    pub fn peek_at(&self, n: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + n)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Tokens not yet consumed.
    pub fn rest(&self) -> &'a [Token] {
        &self.tokens[self.pos.min(self.tokens.len())..]
    }

    pub fn peek_kw(&self, kw: &str) -> bool {
        self.peek().is_some_and(|t| t.is_kw(kw))
    }

    pub fn eat_kw(&mut self, kw: &str) -> bool {
        if self.peek_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume a keyword sequence only when all of it matches.
    pub fn eat_kws(&mut self, kws: &[&str]) -> bool {
        let matched = kws
            .iter()
            .enumerate()
            .all(|(n, kw)| self.peek_at(n).is_some_and(|t| t.is_kw(kw)));
        if matched {
            self.pos += kws.len();
        }
        matched
    }

    pub fn expect_kw(&mut self, kw: &str) -> Result<(), String> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(format!("expected {} near '{}'", kw, self.near()))
        }
    }

    /// A possibly schema-qualified name; returns the last part, lowercased.
    pub fn name(&mut self) -> Result<String, String> {
        let mut name = self
            .next()
            .and_then(Token::ident)
            .ok_or_else(|| format!("expected a name near '{}'", self.near()))?;
        while self.peek().is_some_and(|t| t.is_symbol('.')) {
            self.pos += 1;
            name = self
                .next()
                .and_then(Token::ident)
                .ok_or_else(|| "expected a name after '.'".to_string())?;
        }
        Ok(name)
    }

    pub fn group(&mut self) -> Result<&'a [Token], String> {
        match self.peek().and_then(Token::group) {
            Some(children) => {
                self.pos += 1;
                Ok(children)
            }
            None => Err(format!("expected '(' near '{}'", self.near())),
        }
    }

    /// Short excerpt of the upcoming source for error messages.
    pub fn near(&self) -> String {
        let text = span_text(self.src, self.rest());
        let excerpt: String = text.chars().take(40).collect();
        if excerpt.is_empty() {
            "end of statement".to_string()
        } else {
            excerpt
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_strips_comments() {
        let sql = "-- header\nCREATE TABLE a (x INT); /* block; with semicolon */\nDROP TABLE b;\n\n;";
        let stmts = split_statements(sql);
        assert_eq!(stmts, vec!["CREATE TABLE a (x INT)", "DROP TABLE b"]);
    }

    #[test]
    fn semicolons_inside_quotes_and_bodies_are_kept() {
        let sql = "INSERT INTO t VALUES ('a;b', \"c;d\");\n\
                   CREATE FUNCTION f() RETURNS void AS $body$ BEGIN; END; $body$ LANGUAGE plpgsql;\n\
                   SELECT 'it''s -- not a comment';";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 3);
        assert!(stmts[0].contains("'a;b'"));
        assert!(stmts[1].contains("BEGIN; END;"));
        assert!(stmts[2].contains("-- not a comment"));
    }

    #[test]
    fn nested_block_comment() {
        let stmts = split_statements("/* outer /* inner */ still comment */ DROP VIEW v;");
        assert_eq!(stmts, vec!["DROP VIEW v"]);
    }

    #[test]
    fn tokenizes_groups_literals_and_spans() {
        let src = "price numeric(10, 2) DEFAULT 'it''s'";
        let tokens = tokenize(src).unwrap();
        assert_eq!(tokens.len(), 5);
        assert!(tokens[0].is_kw("PRICE"));
        assert_eq!(tokens[2].group().unwrap().len(), 3);
        assert_eq!(&src[tokens[2].start..tokens[2].end], "(10, 2)");
        assert_eq!(tokens[4].kind, TokenKind::Literal("it's".to_string()));
        assert_eq!(span_text(src, &tokens[3..]), "DEFAULT 'it''s'");
    }

    #[test]
    fn quoted_identifiers_and_qualified_names() {
        let src = "public.\"Users\"";
        let tokens = tokenize(src).unwrap();
        let mut cursor = Cursor::new(src, &tokens);
        assert_eq!(cursor.name().unwrap(), "users");
        assert!(cursor.is_done());
    }

    #[test]
    fn unbalanced_input_is_an_error() {
        assert!(tokenize("CREATE TABLE t (a INT").is_err());
        assert!(tokenize("a)").is_err());
        assert!(tokenize("DEFAULT 'open").is_err());
    }

    #[test]
    fn keyword_sequences() {
        let src = "IF NOT EXISTS users";
        let tokens = tokenize(src).unwrap();
        let mut cursor = Cursor::new(src, &tokens);
        assert!(!cursor.eat_kws(&["IF", "EXISTS"]));
        assert!(cursor.eat_kws(&["if", "not", "exists"]));
        assert_eq!(cursor.name().unwrap(), "users");
    }

    #[test]
    fn split_commas_top_level_only() {
        let src = "a INT, b numeric(1,2), PRIMARY KEY (a, b)";
        let tokens = tokenize(src).unwrap();
        let items = split_commas(&tokens);
        assert_eq!(items.len(), 3);
        assert_eq!(span_text(src, items[1]), "b numeric(1,2)");
    }
}
