//! Named placeholder parsing.
//!
//! A template such as
//!
//! ```text
//! SELECT * FROM `users` WHERE `mobile`=?mobile AND `enable`=?enable
//! ```
//!
//! is rewritten into positional SQL the driver understands, together with the
//! ordered list of slot names to bind. `?name:TYPE` declares an OUT/INOUT
//! parameter for stored procedure calls; the `:TYPE` suffix is removed from
//! the rewritten SQL and kept on the slot.
//!
//! Quoted regions (`'…'`, `"…"`, `` `…` `` and `[…]`) and comments
//! (`-- …`, `/* … */`, and `# …` for MySQL) are copied verbatim.

use crate::error::{DbError, DbResult};
use crate::models::DriverKind;
use std::ops::Range;

/// SQL dialect rules that affect scanning and the emitted marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    /// `?` markers, backslash escapes inside string literals.
    MySql,
    /// `$n` markers, `[` is array subscripting rather than an identifier quote.
    Postgres,
    /// `?` markers.
    SQLite,
}

impl SqlDialect {
    fn backslash_escapes(self) -> bool {
        matches!(self, Self::MySql)
    }

    fn hash_comments(self) -> bool {
        matches!(self, Self::MySql)
    }

    fn bracket_identifiers(self) -> bool {
        !matches!(self, Self::Postgres)
    }

    /// Append the positional marker for the 1-based parameter `position`.
    pub(crate) fn push_marker(self, out: &mut String, position: usize) {
        match self {
            Self::MySql | Self::SQLite => out.push('?'),
            Self::Postgres => {
                out.push('$');
                out.push_str(&position.to_string());
            }
        }
    }
}

impl From<DriverKind> for SqlDialect {
    fn from(kind: DriverKind) -> Self {
        match kind {
            DriverKind::MySql => Self::MySql,
            DriverKind::Postgres => Self::Postgres,
            DriverKind::SQLite => Self::SQLite,
        }
    }
}

/// Coarse statement classification from the leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// SELECT, WITH, SHOW, VALUES, EXPLAIN, DESCRIBE, PRAGMA
    Query,
    /// INSERT, REPLACE
    Insert,
    /// UPDATE, DELETE, MERGE, UPSERT
    Mutation,
    /// CALL or the `{CALL ...}` escape
    Call,
    /// DDL, session and transaction control, and anything unrecognized
    Other,
}

impl StatementKind {
    pub fn classify(sql: &str) -> Self {
        let trimmed = sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if trimmed.starts_with('{') {
            return Self::Call;
        }
        let keyword: String = trimmed
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase();
        match keyword.as_str() {
            "SELECT" | "WITH" | "SHOW" | "VALUES" | "EXPLAIN" | "DESCRIBE" | "DESC" | "PRAGMA"
            | "TABLE" => Self::Query,
            "INSERT" | "REPLACE" => Self::Insert,
            "UPDATE" | "DELETE" | "MERGE" | "UPSERT" => Self::Mutation,
            "CALL" => Self::Call,
            _ => Self::Other,
        }
    }

    /// Whether a successful execution exposes a result cursor even when empty.
    pub fn yields_rows(self) -> bool {
        matches!(self, Self::Query | Self::Call)
    }
}

/// One positional parameter: the name it binds from and an optional
/// OUT/INOUT type hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub name: String,
    pub type_hint: Option<String>,
    /// Byte range of this slot's marker in the rewritten SQL.
    pub(crate) marker: Range<usize>,
}

impl Slot {
    /// True for OUT/INOUT parameters (`?name:TYPE`).
    pub fn is_out(&self) -> bool {
        self.type_hint.is_some()
    }
}

/// A parsed named-SQL template. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedSql {
    template: String,
    rewritten_sql: String,
    slots: Vec<Slot>,
    kind: StatementKind,
    dialect: SqlDialect,
}

impl NamedSql {
    /// Parse `template` in a single left-to-right pass.
    pub fn parse(template: &str, dialect: SqlDialect) -> DbResult<Self> {
        let bytes = template.as_bytes();
        let mut rewritten = String::with_capacity(template.len());
        let mut slots: Vec<Slot> = Vec::new();
        let mut copied = 0;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                quote @ (b'\'' | b'"' | b'`') => {
                    let escapes = dialect.backslash_escapes() && quote != b'`';
                    i = skip_quoted(bytes, i, quote, escapes)?;
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_line_comment(bytes, i),
                b'#' if dialect.hash_comments() => i = skip_line_comment(bytes, i),
                b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
                b'[' if dialect.bracket_identifiers() => {
                    i = skip_quoted(bytes, i, b']', false)?;
                }
                b'?' if bytes.get(i + 1).is_some_and(|b| is_ident(*b)) => {
                    rewritten.push_str(&template[copied..i]);

                    let name_end = scan_ident(bytes, i + 1);
                    let name = &template[i + 1..name_end];
                    let mut end = name_end;

                    let mut type_hint = None;
                    if bytes.get(name_end) == Some(&b':')
                        && bytes.get(name_end + 1).is_some_and(|b| is_ident(*b))
                    {
                        let hint_end = scan_ident(bytes, name_end + 1);
                        type_hint = Some(template[name_end + 1..hint_end].to_string());
                        end = hint_end;
                    }

                    let start = rewritten.len();
                    dialect.push_marker(&mut rewritten, slots.len() + 1);
                    slots.push(Slot {
                        name: name.to_string(),
                        type_hint,
                        marker: start..rewritten.len(),
                    });

                    i = end;
                    copied = end;
                }
                _ => i += 1,
            }
        }
        rewritten.push_str(&template[copied..]);

        Ok(Self {
            template: template.to_string(),
            rewritten_sql: rewritten,
            slots,
            kind: StatementKind::classify(template),
            dialect,
        })
    }

    /// The original template text.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// SQL with positional markers only.
    pub fn rewritten_sql(&self) -> &str {
        &self.rewritten_sql
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn marker_count(&self) -> usize {
        self.slots.len()
    }

    /// Distinct slot names in first-appearance order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for slot in &self.slots {
            if !names.contains(&slot.name.as_str()) {
                names.push(&slot.name);
            }
        }
        names
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn is_call(&self) -> bool {
        self.kind == StatementKind::Call
    }

    /// OUT/INOUT slots in declaration order.
    pub fn out_slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| s.is_out())
    }

    /// Build driver SQL for a procedure call.
    ///
    /// The `{...}` call escape is removed and each slot's marker is replaced
    /// with whatever `render` returns for it; `render` receives the slot and
    /// a running 1-based position counting only the slots it chose to keep
    /// positional (signalled by returning `None`).
    pub(crate) fn render_call<F>(&self, mut render: F) -> String
    where
        F: FnMut(&Slot) -> Option<String>,
    {
        let mut sql = String::with_capacity(self.rewritten_sql.len());
        let mut copied = 0;
        let mut position = 0;
        for slot in &self.slots {
            sql.push_str(&self.rewritten_sql[copied..slot.marker.start]);
            match render(slot) {
                Some(replacement) => sql.push_str(&replacement),
                None => {
                    position += 1;
                    self.dialect.push_marker(&mut sql, position);
                }
            }
            copied = slot.marker.end;
        }
        sql.push_str(&self.rewritten_sql[copied..]);
        strip_call_escape(&sql)
    }
}

/// Remove a surrounding `{ ... }` JDBC-style call escape, if present.
fn strip_call_escape(sql: &str) -> String {
    let trimmed = sql.trim();
    match trimmed
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(inner) => inner.trim().to_string(),
        None => sql.to_string(),
    }
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn scan_ident(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && is_ident(bytes[i]) {
        i += 1;
    }
    i
}

/// Skip a quoted region starting at `start` and return the index just past
/// its closing character. A doubled closing character stays inside the region.
fn skip_quoted(bytes: &[u8], start: usize, close: u8, backslash: bool) -> DbResult<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash && b == b'\\' {
            i += 2;
            continue;
        }
        if b == close {
            if bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(DbError::parse(
        start,
        format!("unterminated {} region", describe_quote(bytes[start])),
    ))
}

/// Index just past the newline ending a line comment, or the end of input.
fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|b| *b == b'\n')
        .map_or(bytes.len(), |p| start + p + 1)
}

/// Index just past `*/`. An unclosed block comment runs to the end of input
/// and is left for the server to reject.
fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start + 2..]
        .windows(2)
        .position(|w| w == b"*/")
        .map_or(bytes.len(), |p| start + 2 + p + 2)
}

fn describe_quote(open: u8) -> &'static str {
    match open {
        b'\'' => "string literal",
        b'"' => "double-quoted",
        b'`' => "backtick identifier",
        _ => "bracket identifier",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(sql: &NamedSql) -> Vec<&str> {
        sql.slots().iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_repeated_names_keep_occurrence_order() {
        let sql = NamedSql::parse(
            "SELECT `department` FROM `domains`\nWHERE `company`=?company AND (?parent IS NULL OR `parent`=?parent) AND `department`=?target\n",
            SqlDialect::MySql,
        )
        .unwrap();
        assert_eq!(names(&sql), vec!["company", "parent", "parent", "target"]);
        assert_eq!(
            sql.rewritten_sql(),
            "SELECT `department` FROM `domains`\nWHERE `company`=? AND (? IS NULL OR `parent`=?) AND `department`=?\n"
        );
        assert_eq!(sql.names(), vec!["company", "parent", "target"]);
        assert_eq!(sql.kind(), StatementKind::Query);
    }

    #[test]
    fn test_postgres_markers_are_numbered() {
        let sql = NamedSql::parse(
            "UPDATE users SET name=?name WHERE id=?id OR parent=?id",
            SqlDialect::Postgres,
        )
        .unwrap();
        assert_eq!(
            sql.rewritten_sql(),
            "UPDATE users SET name=$1 WHERE id=$2 OR parent=$3"
        );
        assert_eq!(names(&sql), vec!["name", "id", "id"]);
    }

    #[test]
    fn test_quoted_regions_are_not_scanned() {
        let sql = NamedSql::parse(
            "SELECT '?a', \"?b\", `?c`, [?d] FROM t WHERE x=?e",
            SqlDialect::SQLite,
        )
        .unwrap();
        assert_eq!(names(&sql), vec!["e"]);
        assert_eq!(
            sql.rewritten_sql(),
            "SELECT '?a', \"?b\", `?c`, [?d] FROM t WHERE x=?"
        );
    }

    #[test]
    fn test_doubled_quote_stays_inside_literal() {
        let sql = NamedSql::parse("SELECT 'it''s ?x' WHERE a=?a", SqlDialect::SQLite).unwrap();
        assert_eq!(names(&sql), vec!["a"]);
    }

    #[test]
    fn test_backslash_escape_mysql_only() {
        let sql = NamedSql::parse(r"SELECT 'a\'?x' WHERE a=?a", SqlDialect::MySql).unwrap();
        assert_eq!(names(&sql), vec!["a"]);

        // Without backslash escapes the literal closes after the backslash.
        let sql = NamedSql::parse(r"SELECT 'a\' WHERE a=?a", SqlDialect::SQLite).unwrap();
        assert_eq!(names(&sql), vec!["a"]);
    }

    #[test]
    fn test_line_comment_is_not_scanned() {
        let sql = NamedSql::parse("SELECT 1 -- don't ?skip\n WHERE a=?a", SqlDialect::MySql).unwrap();
        assert_eq!(names(&sql), vec!["a"]);
        assert_eq!(sql.rewritten_sql(), "SELECT 1 -- don't ?skip\n WHERE a=?");

        // Comment on the last line
        let sql = NamedSql::parse("SELECT ?a -- it's ?b", SqlDialect::Postgres).unwrap();
        assert_eq!(sql.rewritten_sql(), "SELECT $1 -- it's ?b");
    }

    #[test]
    fn test_block_comment_is_not_scanned() {
        let sql = NamedSql::parse("SELECT ?a /* ?b 'x */ + ?c", SqlDialect::SQLite).unwrap();
        assert_eq!(names(&sql), vec!["a", "c"]);
        assert_eq!(sql.rewritten_sql(), "SELECT ? /* ?b 'x */ + ?");

        let sql = NamedSql::parse("SELECT ?a /* open", SqlDialect::SQLite).unwrap();
        assert_eq!(names(&sql), vec!["a"]);
    }

    #[test]
    fn test_hash_comment_only_for_mysql() {
        let sql = NamedSql::parse("SELECT ?a # ?b\n", SqlDialect::MySql).unwrap();
        assert_eq!(names(&sql), vec!["a"]);

        // `#` is an operator in PostgreSQL
        let sql = NamedSql::parse("SELECT ?a # ?b", SqlDialect::Postgres).unwrap();
        assert_eq!(sql.rewritten_sql(), "SELECT $1 # $2");
    }

    #[test]
    fn test_single_dash_and_slash_are_plain_text() {
        let sql = NamedSql::parse("SELECT ?a - ?b / ?c", SqlDialect::MySql).unwrap();
        assert_eq!(names(&sql), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_postgres_brackets_are_array_subscripts() {
        let sql = NamedSql::parse("SELECT tags[?idx] FROM t", SqlDialect::Postgres).unwrap();
        assert_eq!(sql.rewritten_sql(), "SELECT tags[$1] FROM t");
    }

    #[test]
    fn test_unterminated_quote_reports_opening_position() {
        let err = NamedSql::parse("SELECT * FROM t WHERE a='open", SqlDialect::MySql).unwrap_err();
        match err {
            DbError::Parse { position, .. } => assert_eq!(position, 24),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_backtick() {
        let err = NamedSql::parse("SELECT `name FROM t", SqlDialect::MySql).unwrap_err();
        assert!(matches!(err, DbError::Parse { position: 7, .. }));
    }

    #[test]
    fn test_type_hint_is_stripped_and_recorded() {
        let sql = NamedSql::parse(
            "{CALL `test`.`enable_users`(?enable,?count:INTEGER)}",
            SqlDialect::MySql,
        )
        .unwrap();
        assert_eq!(
            sql.rewritten_sql(),
            "{CALL `test`.`enable_users`(?,?)}"
        );
        assert_eq!(sql.slots()[0].type_hint, None);
        assert_eq!(sql.slots()[1].name, "count");
        assert_eq!(sql.slots()[1].type_hint.as_deref(), Some("INTEGER"));
        assert!(sql.is_call());
        assert_eq!(sql.out_slots().count(), 1);
    }

    #[test]
    fn test_postgres_cast_is_not_a_type_hint() {
        let sql = NamedSql::parse("SELECT ?id::int", SqlDialect::Postgres).unwrap();
        assert_eq!(sql.rewritten_sql(), "SELECT $1::int");
        assert_eq!(sql.slots()[0].type_hint, None);
    }

    #[test]
    fn test_bare_question_mark_passes_through() {
        let sql = NamedSql::parse("SELECT * FROM t WHERE a=? AND b=?b", SqlDialect::MySql).unwrap();
        assert_eq!(sql.rewritten_sql(), "SELECT * FROM t WHERE a=? AND b=?");
        assert_eq!(names(&sql), vec!["b"]);
    }

    #[test]
    fn test_utf8_text_is_preserved() {
        let sql = NamedSql::parse(
            "INSERT INTO `users` (`name`) VALUES (?name) -- 姓名",
            SqlDialect::MySql,
        )
        .unwrap();
        assert_eq!(
            sql.rewritten_sql(),
            "INSERT INTO `users` (`name`) VALUES (?) -- 姓名"
        );
        assert_eq!(sql.kind(), StatementKind::Insert);
    }

    #[test]
    fn test_render_call_for_session_variables() {
        let sql = NamedSql::parse("{CALL register(?name,?mobile,?id:LONG)}", SqlDialect::MySql)
            .unwrap();
        let rendered = sql.render_call(|slot| slot.is_out().then(|| format!("@{}", slot.name)));
        assert_eq!(rendered, "CALL register(?,?,@id)");
    }

    #[test]
    fn test_render_call_renumbers_postgres_markers() {
        let sql = NamedSql::parse("CALL register(?id:BIGINT, ?name)", SqlDialect::Postgres)
            .unwrap();
        assert_eq!(sql.rewritten_sql(), "CALL register($1, $2)");
        let rendered = sql.render_call(|slot| slot.is_out().then(|| "NULL".to_string()));
        assert_eq!(rendered, "CALL register(NULL, $1)");
    }

    #[test]
    fn test_statement_kind_classification() {
        assert_eq!(StatementKind::classify("  select 1"), StatementKind::Query);
        assert_eq!(StatementKind::classify("(SELECT 1)"), StatementKind::Query);
        assert_eq!(StatementKind::classify("REPLACE INTO t"), StatementKind::Insert);
        assert_eq!(StatementKind::classify("delete from t"), StatementKind::Mutation);
        assert_eq!(StatementKind::classify("{CALL p()}"), StatementKind::Call);
        assert_eq!(StatementKind::classify("CREATE TABLE t"), StatementKind::Other);
        assert!(StatementKind::Call.yields_rows());
        assert!(!StatementKind::Insert.yields_rows());
    }
}
