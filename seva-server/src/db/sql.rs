//! SQL building blocks shared by the data-access base
//!
//! - Dialect differences (placeholders, float casts, key column DDL)
//! - Identifier validation for anything spliced into SQL text
//! - WHERE-clause builder: `Null` → `IS NULL`, lists → `IN (...)`

use std::borrow::Cow;
use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use seva_core::Driver;

use super::error::DbError;
use super::value::{Fields, Value};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// Quoted literals, quoted identifiers, bare words, commas and dots.
static SQL_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"'(?:[^']|'')*'|`([^`]+)`|"([^"]+)"|\[([^\]]+)\]|([A-Za-z_][A-Za-z0-9_$]*)|(,)|(\.)|\S"#)
        .expect("valid regex")
});

/// Keywords followed by a table name (or a comma-separated list of them).
const TABLE_KEYWORDS: &[&str] = &["from", "join", "into", "update", "table", "truncate"];

/// Modifiers that may sit between a table keyword and the name.
const TABLE_MODIFIERS: &[&str] = &[
    "if", "not", "exists", "only", "table", "low_priority", "ignore", "quick", "lateral",
];

/// Words that end a table reference instead of aliasing it.
const CLAUSE_WORDS: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "outer", "cross", "natural", "straight_join",
    "on", "using", "set", "values", "value", "select", "group", "order", "limit", "offset", "having",
    "union", "except", "intersect", "window", "returning", "for", "lock", "partition", "use", "force",
    "ignore", "add", "drop", "alter", "rename", "modify", "change", "cascade", "restrict", "restart",
    "continue", "with", "default",
];

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// SQL flavour spoken by the active connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
}

impl From<Driver> for Dialect {
    fn from(driver: Driver) -> Self {
        match driver {
            Driver::MySql => Self::MySql,
            Driver::Postgres => Self::Postgres,
            Driver::Sqlite => Self::Sqlite,
        }
    }
}

impl Dialect {
    /// Rewrite `?` placeholders to `$1..$n` for PostgreSQL.
    ///
    /// Question marks inside quoted literals or quoted identifiers are left alone.
    pub fn bind_sql<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        if *self != Self::Postgres || !sql.contains('?') {
            return Cow::Borrowed(sql);
        }

        let mut out = String::with_capacity(sql.len() + 8);
        let mut quote: Option<char> = None;
        let mut n = 0;
        for c in sql.chars() {
            match (quote, c) {
                (None, '\'' | '"') => {
                    quote = Some(c);
                    out.push(c);
                }
                (Some(q), c) if c == q => {
                    quote = None;
                    out.push(c);
                }
                (None, '?') => {
                    n += 1;
                    out.push('$');
                    out.push_str(&n.to_string());
                }
                _ => out.push(c),
            }
        }
        Cow::Owned(out)
    }

    /// Cast an aggregate to a float type the driver can decode.
    pub fn float_cast(&self, expr: &str) -> String {
        match self {
            Self::MySql => format!("CAST({} AS DOUBLE)", expr),
            Self::Postgres => format!("CAST({} AS DOUBLE PRECISION)", expr),
            Self::Sqlite => format!("CAST({} AS REAL)", expr),
        }
    }

    /// DDL for an auto-incrementing primary key column named `id`.
    pub fn id_column(&self) -> &'static str {
        match self {
            Self::MySql => "id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY",
            Self::Postgres => "id BIGSERIAL PRIMARY KEY",
            Self::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }

    pub fn float_type(&self) -> &'static str {
        match self {
            Self::MySql => "DOUBLE",
            Self::Postgres => "DOUBLE PRECISION",
            Self::Sqlite => "REAL",
        }
    }

    /// Whether inserted keys come back through `RETURNING` rather than the
    /// driver's last-insert id. The sqlx `Any` driver only reports an insert
    /// id for MySQL.
    pub fn uses_returning(&self) -> bool {
        matches!(self, Self::Postgres | Self::Sqlite)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Reject anything that is not a plain identifier.
pub fn identifier(name: &str) -> Result<&str, DbError> {
    if IDENTIFIER.is_match(name) {
        Ok(name)
    } else {
        Err(DbError::invalid(format!("'{}' is not a valid identifier", name)))
    }
}

/// Collapse whitespace runs and trim, so formatting never splits a fingerprint.
pub fn normalize_sql(sql: &str) -> String {
    WHITESPACE.replace_all(sql.trim(), " ").into_owned()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Comma,
    Dot,
    Other,
}

impl Token {
    fn is_word(&self, words: &[&str]) -> bool {
        matches!(self, Self::Word(w) if words.iter().any(|k| w.eq_ignore_ascii_case(k)))
    }

    fn name(&self) -> Option<&str> {
        match self {
            Self::Word(name) | Self::Quoted(name) => Some(name),
            _ => None,
        }
    }
}

fn tokenize(sql: &str) -> Vec<Token> {
    SQL_TOKEN
        .captures_iter(sql)
        .map(|c| {
            if let Some(quoted) = c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)) {
                Token::Quoted(quoted.as_str().to_string())
            } else if let Some(word) = c.get(4) {
                Token::Word(word.as_str().to_string())
            } else if c.get(5).is_some() {
                Token::Comma
            } else if c.get(6).is_some() {
                Token::Dot
            } else {
                Token::Other
            }
        })
        .collect()
}

/// Lower-cased names of every table a statement reads or writes.
///
/// Covers FROM/JOIN lists (including comma joins), INSERT/REPLACE INTO,
/// UPDATE, DELETE FROM and `TRUNCATE`/`ALTER`/`DROP`/`CREATE TABLE`.
/// Schema-qualified names keep only the table part. Derived-table aliases
/// and CTE names may show up too; a tag nothing writes to is inert.
pub fn referenced_tables(sql: &str) -> BTreeSet<String> {
    let tokens = tokenize(sql);
    let mut tables = BTreeSet::new();
    let mut i = 0;

    while i < tokens.len() {
        if !tokens[i].is_word(TABLE_KEYWORDS) {
            i += 1;
            continue;
        }
        i += 1;
        while i < tokens.len() && tokens[i].is_word(TABLE_MODIFIERS) {
            i += 1;
        }

        // name [. name] [[AS] alias] [, ...]
        loop {
            let Some(mut name) = tokens.get(i).and_then(Token::name) else {
                break;
            };
            if tokens[i].is_word(CLAUSE_WORDS) {
                break;
            }
            i += 1;
            while tokens.get(i) == Some(&Token::Dot) {
                match tokens.get(i + 1).and_then(Token::name) {
                    Some(part) => {
                        name = part;
                        i += 2;
                    }
                    None => break,
                }
            }
            tables.insert(name.to_ascii_lowercase());

            match tokens.get(i) {
                Some(token) if token.is_word(&["as"]) => i += 2,
                Some(Token::Quoted(_)) => i += 1,
                Some(token @ Token::Word(_)) if !token.is_word(CLAUSE_WORDS) => i += 1,
                _ => {}
            }
            if tokens.get(i) == Some(&Token::Comma) {
                i += 1;
            } else {
                break;
            }
        }
    }
    tables
}

/// One predicate on one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `col = ?`, or `col IS NULL` when the value is `Null`.
    Eq(Value),
    /// `col IN (...)`. An empty list matches nothing.
    In(Vec<Value>),
    NotNull,
}

/// Predicates ANDed together, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions(Vec<(String, Condition)>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((column.into(), Condition::Eq(value.into())));
        self
    }

    pub fn any_of<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.0.push((column.into(), Condition::In(values)));
        self
    }

    pub fn is_null(self, column: impl Into<String>) -> Self {
        self.eq(column, Value::Null)
    }

    pub fn not_null(mut self, column: impl Into<String>) -> Self {
        self.0.push((column.into(), Condition::NotNull));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Render as a predicate (without the `WHERE` keyword) plus its bind values.
    pub fn to_sql(&self) -> Result<(String, Vec<Value>), DbError> {
        let mut clauses = Vec::with_capacity(self.0.len());
        let mut params = Vec::new();

        for (column, condition) in &self.0 {
            let column = identifier(column)?;
            match condition {
                Condition::Eq(Value::Null) => clauses.push(format!("{} IS NULL", column)),
                Condition::Eq(value) => {
                    clauses.push(format!("{} = ?", column));
                    params.push(value.clone());
                }
                Condition::In(values) if values.is_empty() => clauses.push("1 = 0".to_string()),
                Condition::In(values) => {
                    let marks = vec!["?"; values.len()].join(", ");
                    clauses.push(format!("{} IN ({})", column, marks));
                    params.extend(values.iter().cloned());
                }
                Condition::NotNull => clauses.push(format!("{} IS NOT NULL", column)),
            }
        }

        Ok((clauses.join(" AND "), params))
    }

    /// ` WHERE ...` or an empty string.
    pub(crate) fn where_clause(&self) -> Result<(String, Vec<Value>), DbError> {
        if self.is_empty() {
            return Ok((String::new(), Vec::new()));
        }
        let (predicate, params) = self.to_sql()?;
        Ok((format!(" WHERE {}", predicate), params))
    }
}

impl From<Fields> for Conditions {
    fn from(fields: Fields) -> Self {
        Self(
            fields
                .into_iter()
                .map(|(k, v)| (k, Condition::Eq(v)))
                .collect(),
        )
    }
}

/// Single-column sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }

    pub(crate) fn to_sql(&self) -> Result<String, DbError> {
        let column = identifier(&self.column)?;
        Ok(format!(
            "{} {}",
            column,
            if self.descending { "DESC" } else { "ASC" }
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_placeholders_are_numbered() {
        let sql = Dialect::Postgres.bind_sql("SELECT * FROM t WHERE a = ? AND b = '?' AND c IN (?, ?)");
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 AND b = '?' AND c IN ($2, $3)");
    }

    #[test]
    fn other_dialects_keep_question_marks() {
        let sql = "SELECT * FROM t WHERE a = ?";
        assert!(matches!(Dialect::MySql.bind_sql(sql), Cow::Borrowed(_)));
        assert_eq!(Dialect::Sqlite.bind_sql(sql), sql);
    }

    #[test]
    fn escaped_quotes_stay_inside_literal() {
        let sql = Dialect::Postgres.bind_sql("SELECT 'it''s ?' , ?");
        assert_eq!(sql, "SELECT 'it''s ?' , $1");
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(identifier("bookings").is_ok());
        assert!(identifier("_tmp1").is_ok());
        assert!(identifier("1st").is_err());
        assert!(identifier("users; DROP TABLE users").is_err());
        assert!(identifier("name`").is_err());
    }

    #[test]
    fn conditions_render_null_and_lists() {
        let (sql, params) = Conditions::new()
            .eq("status", "pending")
            .is_null("deleted_at")
            .any_of("teacher_id", [3_i64, 4])
            .to_sql()
            .unwrap();

        assert_eq!(sql, "status = ? AND deleted_at IS NULL AND teacher_id IN (?, ?)");
        assert_eq!(params, vec![Value::from("pending"), Value::Int(3), Value::Int(4)]);
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let (sql, params) = Conditions::new()
            .any_of("id", Vec::<i64>::new())
            .to_sql()
            .unwrap();
        assert_eq!(sql, "1 = 0");
        assert!(params.is_empty());
    }

    #[test]
    fn condition_columns_are_validated() {
        let err = Conditions::new().eq("id = 1 OR 1", 1).to_sql().unwrap_err();
        assert!(matches!(err, DbError::InvalidOperation(_)));
    }

    #[test]
    fn referenced_tables_found() {
        let tables = referenced_tables(
            "SELECT b.* FROM bookings b JOIN `teachers` t ON t.id = b.teacher_id WHERE 1",
        );
        assert!(tables.contains("bookings"));
        assert!(tables.contains("teachers"));

        let tables = referenced_tables("UPDATE vehicles SET lat = ?");
        assert_eq!(tables.into_iter().collect::<Vec<_>>(), vec!["vehicles".to_string()]);
    }

    fn tables_of(sql: &str) -> Vec<String> {
        referenced_tables(sql).into_iter().collect()
    }

    #[test]
    fn comma_joins_tag_every_table() {
        assert_eq!(
            tables_of("SELECT n.title, t.name FROM notes n, tags AS t, `users` WHERE n.tag_id = t.id"),
            vec!["notes", "tags", "users"]
        );
        assert_eq!(tables_of("SELECT * FROM notes,tags"), vec!["notes", "tags"]);
        assert_eq!(tables_of("UPDATE notes n, tags t SET n.pinned = 1"), vec!["notes", "tags"]);
    }

    #[test]
    fn table_statements_are_tagged() {
        assert_eq!(tables_of("TRUNCATE TABLE notes"), vec!["notes"]);
        assert_eq!(tables_of("truncate notes"), vec!["notes"]);
        assert_eq!(tables_of("DROP TABLE IF EXISTS notes"), vec!["notes"]);
        assert_eq!(tables_of("ALTER TABLE notes ADD COLUMN archived INTEGER"), vec!["notes"]);
        assert_eq!(tables_of("REPLACE INTO notes (id, title) VALUES (?, ?)"), vec!["notes"]);
        assert_eq!(tables_of("CREATE TABLE IF NOT EXISTS notes (id INTEGER)"), vec!["notes"]);
        assert_eq!(tables_of("DELETE FROM notes WHERE id = ?"), vec!["notes"]);
    }

    #[test]
    fn qualified_names_and_subqueries() {
        assert_eq!(tables_of("SELECT * FROM kiit.notes WHERE 1"), vec!["notes"]);
        assert_eq!(tables_of("SELECT * FROM \"public\".\"Notes\""), vec!["notes"]);
        assert_eq!(
            tables_of("SELECT * FROM (SELECT id FROM notes) recent JOIN tags ON tags.id = recent.id"),
            vec!["notes", "tags"]
        );
        assert_eq!(tables_of("INSERT INTO archive SELECT * FROM notes"), vec!["archive", "notes"]);
    }

    #[test]
    fn keywords_inside_literals_are_ignored() {
        assert_eq!(tables_of("SELECT * FROM notes WHERE body = 'copied from secrets'"), vec!["notes"]);
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(
            normalize_sql("  SELECT *\n   FROM  users\tWHERE id = ? "),
            "SELECT * FROM users WHERE id = ?"
        );
    }

    #[test]
    fn order_by_validates_column() {
        assert_eq!(OrderBy::desc("booking_date").to_sql().unwrap(), "booking_date DESC");
        assert!(OrderBy::asc("name; --").to_sql().is_err());
    }
}
