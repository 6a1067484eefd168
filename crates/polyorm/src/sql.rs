//! SQL fragments with parameter references, and the lexer for user-written SQL text.
//!
//! The assembler never formats a value into SQL. It builds a [`Sql`] made of raw
//! text and references to parameters by key; the driver adapter turns the
//! references into placeholders and collects the values in occurrence order.

use crate::error::{OrmError, OrmResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlPart {
    Raw(String),
    /// Reference to one parameter value
    Param(String),
    /// Reference to an array parameter expanded into `p1, p2, ...`
    Spread(String),
}

/// A SQL fragment: raw text interleaved with parameter references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use]
pub struct Sql {
    parts: Vec<SqlPart>,
}

impl Sql {
    /// Create a fragment with an initial raw piece.
    pub fn new(initial_sql: impl Into<String>) -> Self {
        let mut sql = Self::empty();
        sql.push(&initial_sql.into());
        sql
    }

    /// Create an empty fragment.
    pub fn empty() -> Self {
        Self { parts: Vec::new() }
    }

    /// Append raw SQL.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        if sql.is_empty() {
            return self;
        }
        match self.parts.last_mut() {
            Some(SqlPart::Raw(last)) => last.push_str(sql),
            _ => self.parts.push(SqlPart::Raw(sql.to_string())),
        }
        self
    }

    /// Append a reference to parameter `key`.
    pub fn push_param(&mut self, key: impl Into<String>) -> &mut Self {
        self.parts.push(SqlPart::Param(key.into()));
        self
    }

    /// Append a spread reference to array parameter `key`.
    pub fn push_spread(&mut self, key: impl Into<String>) -> &mut Self {
        self.parts.push(SqlPart::Spread(key.into()));
        self
    }

    /// Append another fragment, consuming it.
    pub fn push_sql(&mut self, other: Sql) -> &mut Self {
        for part in other.parts {
            match part {
                SqlPart::Raw(s) => {
                    self.push(&s);
                }
                p => self.parts.push(p),
            }
        }
        self
    }

    /// Append fragments separated by `sep`.
    pub fn push_joined(&mut self, items: impl IntoIterator<Item = Sql>, sep: &str) -> &mut Self {
        for (i, item) in items.into_iter().enumerate() {
            if i > 0 {
                self.push(sep);
            }
            self.push_sql(item);
        }
        self
    }

    /// Wrap the fragment in parentheses.
    pub fn parenthesized(self) -> Sql {
        let mut out = Sql::new("(");
        out.push_sql(self);
        out.push(")");
        out
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn parts(&self) -> &[SqlPart] {
        &self.parts
    }

    /// Parameter keys in occurrence order.
    pub fn param_keys(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            SqlPart::Param(k) | SqlPart::Spread(k) => Some(k.as_str()),
            SqlPart::Raw(_) => None,
        })
    }

    /// Render with `:name` / `:...name` placeholders, the form embedded into other
    /// queries' string conditions.
    pub fn to_named_sql(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                SqlPart::Raw(s) => out.push_str(s),
                SqlPart::Param(k) => {
                    out.push(':');
                    out.push_str(k);
                }
                SqlPart::Spread(k) => {
                    out.push_str(":...");
                    out.push_str(k);
                }
            }
        }
        out
    }

    /// Parse user SQL text, turning `:name` / `:...name` into parameter references.
    pub fn parse_named(text: &str) -> Sql {
        let mut sql = Sql::empty();
        for token in tokenize(text) {
            match token {
                Token::Param { name, spread: false } => {
                    sql.push_param(name);
                }
                Token::Param { name, spread: true } => {
                    sql.push_spread(name);
                }
                other => {
                    sql.push(other.text());
                }
            }
        }
        sql
    }
}

impl From<&str> for Sql {
    fn from(s: &str) -> Self {
        Sql::new(s)
    }
}

/// Named parameter keys are restricted so they can round-trip through SQL text.
pub fn is_valid_parameter_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
}

pub(crate) fn validate_parameter_name(name: &str) -> OrmResult<()> {
    if is_valid_parameter_name(name) {
        Ok(())
    } else {
        Err(OrmError::validation(format!(
            "invalid parameter name '{name}': only letters, digits, '_' and '.' are allowed"
        )))
    }
}

/// A lexical piece of user-written SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token<'a> {
    /// Anything that is passed through untouched
    Text(&'a str),
    /// String literal, quoted identifier or comment; never rewritten
    Quoted(&'a str),
    /// Identifier chain such as `p`, `p.author.id`
    Word(&'a str),
    Param { name: &'a str, spread: bool },
}

impl<'a> Token<'a> {
    pub(crate) fn text(&self) -> &'a str {
        match *self {
            Token::Text(s) | Token::Quoted(s) | Token::Word(s) => s,
            Token::Param { name, .. } => name,
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Split SQL text into tokens. String literals, quoted identifiers and comments
/// are opaque so nothing inside them is mistaken for a column or parameter.
pub(crate) fn tokenize(text: &str) -> Vec<Token<'_>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut text_start = 0;

    macro_rules! flush_text {
        ($end:expr) => {
            if text_start < $end {
                tokens.push(Token::Text(&text[text_start..$end]));
            }
        };
    }

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\'' | b'"' | b'`' => {
                flush_text!(i);
                let end = scan_quoted(bytes, i, b);
                tokens.push(Token::Quoted(&text[i..end]));
                i = end;
                text_start = i;
            }
            // `[ident]` quoting, but not `expr[1]` subscripts.
            b'[' if i == 0 || !(is_ident_continue(bytes[i - 1]) || matches!(bytes[i - 1], b')' | b']')) => {
                flush_text!(i);
                let end = bytes[i..]
                    .iter()
                    .position(|&c| c == b']')
                    .map_or(bytes.len(), |p| i + p + 1);
                tokens.push(Token::Quoted(&text[i..end]));
                i = end;
                text_start = i;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                flush_text!(i);
                let end = bytes[i..]
                    .iter()
                    .position(|&c| c == b'\n')
                    .map_or(bytes.len(), |p| i + p);
                tokens.push(Token::Quoted(&text[i..end]));
                i = end;
                text_start = i;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                flush_text!(i);
                let end = text[i + 2..].find("*/").map_or(bytes.len(), |p| i + 2 + p + 2);
                tokens.push(Token::Quoted(&text[i..end]));
                i = end;
                text_start = i;
            }
            b':' => {
                // `::type` casts stay text.
                if bytes.get(i + 1) == Some(&b':') {
                    i += 2;
                    continue;
                }
                let (spread, name_start) = if text[i + 1..].starts_with("...") {
                    (true, i + 4)
                } else {
                    (false, i + 1)
                };
                if name_start < bytes.len() && is_ident_continue(bytes[name_start]) && bytes[name_start] != b'$' {
                    let mut end = name_start;
                    while end < bytes.len() && (is_ident_continue(bytes[end]) || bytes[end] == b'.') && bytes[end] != b'$' {
                        end += 1;
                    }
                    // A trailing dot belongs to the surrounding text.
                    while end > name_start && bytes[end - 1] == b'.' {
                        end -= 1;
                    }
                    flush_text!(i);
                    tokens.push(Token::Param {
                        name: &text[name_start..end],
                        spread,
                    });
                    i = end;
                    text_start = i;
                } else {
                    i += 1;
                }
            }
            _ if is_ident_start(b) && (i == 0 || !(is_ident_continue(bytes[i - 1]) || bytes[i - 1] == b'.')) => {
                flush_text!(i);
                let mut end = i + 1;
                loop {
                    while end < bytes.len() && is_ident_continue(bytes[end]) {
                        end += 1;
                    }
                    if end + 1 < bytes.len() && bytes[end] == b'.' && is_ident_start(bytes[end + 1]) {
                        end += 1;
                        continue;
                    }
                    break;
                }
                tokens.push(Token::Word(&text[i..end]));
                i = end;
                text_start = i;
            }
            _ => {
                i += 1;
            }
        }
    }
    flush_text!(bytes.len());
    tokens
}

fn scan_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            // Doubled quote is an escaped quote.
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Strip leading whitespace, SQL comments (`--` and `/* */`), and parentheses
/// from a SQL string to find the first meaningful keyword.
pub(crate) fn strip_sql_prefix(sql: &str) -> &str {
    let mut s = sql;
    loop {
        let before = s;
        s = s.trim_start();
        if s.starts_with("--") {
            match s.find('\n') {
                Some(pos) => {
                    s = &s[pos + 1..];
                    continue;
                }
                None => return "",
            }
        }
        if s.starts_with("/*") {
            match s.find("*/") {
                Some(pos) => {
                    s = &s[pos + 2..];
                    continue;
                }
                None => return "",
            }
        }
        if let Some(rest) = s.strip_prefix('(') {
            s = rest;
            continue;
        }
        if s == before {
            break;
        }
    }
    s
}

pub(crate) fn starts_with_keyword(s: &str, keyword: &str) -> bool {
    match s.get(0..keyword.len()) {
        Some(prefix) => prefix.eq_ignore_ascii_case(keyword),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_named_extracts_params_outside_literals() {
        let sql = Sql::parse_named("p.title = :title AND p.body <> ':not_a_param' AND p.id::text IN (:...ids)");
        let keys: Vec<_> = sql.param_keys().collect();
        assert_eq!(keys, vec!["title", "ids"]);
        assert_eq!(
            sql.to_named_sql(),
            "p.title = :title AND p.body <> ':not_a_param' AND p.id::text IN (:...ids)"
        );
    }

    #[test]
    fn tokenize_keeps_words_whole() {
        let tokens = tokenize("p.userId = p.id");
        let words: Vec<_> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(*w),
                _ => None,
            })
            .collect();
        assert_eq!(words, vec!["p.userId", "p.id"]);
    }

    #[test]
    fn tokenize_treats_quoted_identifiers_as_opaque() {
        let tokens = tokenize("\"p\".\"id\" = [x].[y] AND arr[1] = 2 -- p.id\n");
        assert!(tokens.contains(&Token::Quoted("\"p\"")));
        assert!(tokens.contains(&Token::Quoted("[x]")));
        assert!(tokens.contains(&Token::Word("arr")));
        assert!(tokens.contains(&Token::Quoted("-- p.id")));
    }

    #[test]
    fn parameter_names_are_validated() {
        assert!(is_valid_parameter_name("where_0_1"));
        assert!(is_valid_parameter_name("post.id"));
        assert!(!is_valid_parameter_name("bad name"));
        assert!(!is_valid_parameter_name(""));
    }

    #[test]
    fn strip_prefix_skips_comments() {
        assert!(starts_with_keyword(strip_sql_prefix("/* c */ -- x\n (SELECT 1)"), "SELECT"));
    }
}
