//! Pattern-based extraction of table and column references from SQL text
//!
//! Approximate by nature: it understands enough of a SELECT statement to
//! find the tables in FROM/JOIN, their aliases, and the columns named in the
//! select list and WHERE clause. Everything it cannot classify is skipped
//! rather than reported.

use regex::Regex;
use std::collections::HashSet;

/// Words that end a FROM list or a JOIN target
const TABLE_LIST_END: &[&str] = &[
    "WHERE", "JOIN", "LEFT", "RIGHT", "INNER", "OUTER", "FULL", "CROSS", "NATURAL", "ON",
    "USING", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "FETCH", "UNION", "INTERSECT",
    "EXCEPT", "MINUS", "CONNECT", "START", "WINDOW",
];

/// Words that end a WHERE clause
const WHERE_END: &[&str] = &[
    "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "FETCH", "UNION", "INTERSECT", "EXCEPT",
    "MINUS", "CONNECT", "START", "WINDOW",
];

/// Words that end the select list
const SELECT_END: &[&str] = &[
    "FROM", "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "UNION", "INTERSECT", "EXCEPT", "MINUS",
];

/// Identifiers that are never column names
const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "AS", "ON", "USING", "JOIN", "LEFT", "RIGHT", "INNER", "OUTER",
    "FULL", "CROSS", "NATURAL", "GROUP", "ORDER", "BY", "HAVING", "LIMIT", "OFFSET", "FETCH",
    "UNION", "INTERSECT", "EXCEPT", "MINUS", "CONNECT", "START", "WINDOW", "WITH", "AND", "OR",
    "NOT", "IN", "IS", "NULL", "LIKE", "ILIKE", "GLOB", "REGEXP", "BETWEEN", "EXISTS", "TRUE",
    "FALSE", "CASE", "WHEN", "THEN", "ELSE", "END", "DISTINCT", "ALL", "ANY", "SOME", "ESCAPE",
    "COLLATE", "DATE", "TIME", "TIMESTAMP", "INTERVAL", "YEAR", "MONTH", "DAY", "HOUR", "MINUTE",
    "SECOND", "SYSDATE", "SYSTIMESTAMP", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP",
    "ROWNUM", "ROWID", "LEVEL", "PRIOR", "ASC", "DESC", "NULLS", "FIRST", "LAST", "ROWS", "ONLY",
    "DISTINCT_FROM", "UNKNOWN", "CAST", "INTEGER", "INT", "BIGINT", "SMALLINT", "TEXT", "REAL",
    "NUMERIC", "DECIMAL", "FLOAT", "DOUBLE", "PRECISION", "VARCHAR", "VARCHAR2", "CHAR",
    "NUMBER", "BLOB", "BOOLEAN", "NOCASE", "BINARY", "RTRIM",
];

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| word.eq_ignore_ascii_case(r))
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b == b'#' || b >= 0x80
}

/// Unquoted, upper-cased identifier
pub(crate) fn clean_identifier(raw: &str) -> String {
    raw.trim().trim_matches('"').trim_matches('`').to_uppercase()
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '#')
}

/// Index of the parenthesis closing the one at `open`
fn matching_paren(sql: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, b) in sql.bytes().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// First occurrence of one of `keywords` at the nesting level of `from`.
/// Returns (start, end) of the keyword.
fn find_keyword(sql: &str, from: usize, keywords: &[&str]) -> Option<(usize, usize)> {
    let bytes = sql.as_bytes();
    let mut depth = 0i32;
    let mut i = from;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'(' {
            depth += 1;
        } else if b == b')' {
            depth -= 1;
            if depth < 0 {
                return None;
            }
        } else if is_word_byte(b) && (i == 0 || !is_word_byte(bytes[i - 1])) {
            let mut end = i;
            while end < bytes.len() && is_word_byte(bytes[end]) {
                end += 1;
            }
            if depth == 0 && keywords.iter().any(|k| sql[i..end].eq_ignore_ascii_case(k)) {
                return Some((i, end));
            }
            i = end;
            continue;
        }
        i += 1;
    }
    None
}

/// End of the clause starting at `from`: the next of `keywords` at the
/// same level, the parenthesis closing the enclosing scope, a `;`, or the end
fn clause_end(sql: &str, from: usize, keywords: &[&str]) -> usize {
    let bytes = sql.as_bytes();
    let mut depth = 0i32;
    let mut scope_end = bytes.len();

    for (i, b) in bytes.iter().enumerate().skip(from) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth < 0 {
                    scope_end = i;
                    break;
                }
            }
            b';' if depth == 0 => {
                scope_end = i;
                break;
            }
            _ => {}
        }
    }

    match find_keyword(&sql[..scope_end], from, keywords) {
        Some((start, _)) => start,
        None => scope_end,
    }
}

/// Split on commas that are not nested in parentheses
fn split_top_level(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (i, b) in list.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                parts.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&list[start..]);

    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

/// Table named in FROM or JOIN
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

/// Column reference, optionally qualified by a table name or alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ColumnRef {
    pub qualifier: Option<String>,
    pub column: String,
}

/// Everything the validator checks, extracted from one statement
#[derive(Debug, Default)]
pub(crate) struct SqlReferences {
    pub tables: Vec<TableRef>,
    pub ctes: HashSet<String>,
    pub select_columns: Vec<ColumnRef>,
    pub where_columns: Vec<ColumnRef>,
    /// More than one SELECT, or a WITH clause
    pub has_subquery: bool,
    /// Nothing left after stripping comments and whitespace
    pub is_empty: bool,
}

impl SqlReferences {
    /// Resolve a qualifier (alias or table name) to the table it names
    pub fn resolve(&self, qualifier: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|t| t.alias.as_deref() == Some(qualifier))
            .or_else(|| self.tables.iter().find(|t| t.name == qualifier))
            .map(|t| t.name.as_str())
    }
}

/// Compiled patterns used by the extractor
pub(crate) struct SqlPatterns {
    string_literal: Regex,
    line_comment: Regex,
    block_comment: Regex,
    from_function: Regex,
    from_keyword: Regex,
    distinct_from: Regex,
    table_source: Regex,
    select_keyword: Regex,
    with_clause: Regex,
    cte_name: Regex,
    leading_distinct: Regex,
    alias_suffix: Regex,
    bare_alias: Regex,
    aggregate_call: Regex,
    column_ref: Regex,
    qualified_ref: Regex,
    identifier: Regex,
}

const IDENT: &str = r#""?[A-Za-z_][\w$#]*"?"#;

impl SqlPatterns {
    pub fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            string_literal: Regex::new(r"'(?:[^']|'')*'")?,
            line_comment: Regex::new(r"--[^\n]*")?,
            block_comment: Regex::new(r"(?s)/\*.*?\*/")?,
            from_function: Regex::new(r"(?i)\b(?:EXTRACT|TRIM|SUBSTRING|POSITION|OVERLAY)\s*\(")?,
            from_keyword: Regex::new(r"(?i)\bFROM\b")?,
            distinct_from: Regex::new(r"(?i)\bDISTINCT\s+FROM\b")?,
            table_source: Regex::new(r"(?i)\b(?:FROM|JOIN)\b")?,
            select_keyword: Regex::new(r"(?i)\bSELECT\b")?,
            with_clause: Regex::new(r"(?i)^\s*WITH\b")?,
            cte_name: Regex::new(&format!(
                r"(?i)(?:\bWITH\s+(?:RECURSIVE\s+)?|,\s*)({})(?:\s*\([^)]*\))?\s+AS\s*\(",
                IDENT
            ))?,
            leading_distinct: Regex::new(r"(?is)^(?:DISTINCT|ALL)\b\s*(.+)$")?,
            alias_suffix: Regex::new(&format!(r"(?i)\s+AS\s+{}$", IDENT))?,
            bare_alias: Regex::new(&format!(r#"(?s)^(.*[\w)"*])\s+({})$"#, IDENT))?,
            aggregate_call: Regex::new(r"(?i)^(?:COUNT|SUM|AVG|MAX|MIN)\s*\(")?,
            column_ref: Regex::new(&format!(r"^(?:({})\.)?({}|\*)$", IDENT, IDENT))?,
            qualified_ref: Regex::new(&format!(r"({})\.({}|\*)", IDENT, IDENT))?,
            identifier: Regex::new(IDENT)?,
        })
    }

    /// Strip comments and literals, and hide FROM keywords that belong to
    /// function syntax such as `EXTRACT(YEAR FROM d)`
    fn normalize(&self, sql: &str) -> String {
        let without_literals = self.string_literal.replace_all(sql, "''");
        let without_blocks = self.block_comment.replace_all(&without_literals, " ");
        let without_lines = self.line_comment.replace_all(&without_blocks, " ");
        let text = self
            .distinct_from
            .replace_all(&without_lines, "DISTINCT_FROM")
            .into_owned();

        let mut masked = text.clone();
        for m in self.from_function.find_iter(&text) {
            let open = m.end() - 1;
            let close = matching_paren(&text, open).unwrap_or(text.len());
            let inner = self.from_keyword.replace_all(&text[open..close], "    ");
            masked.replace_range(open..close, &inner);
        }
        masked
    }

    pub fn extract(&self, sql: &str) -> SqlReferences {
        let sql = self.normalize(sql);
        let mut refs = SqlReferences {
            is_empty: sql.trim().trim_matches(';').trim().is_empty(),
            ..Default::default()
        };

        if self.with_clause.is_match(&sql) {
            refs.has_subquery = true;
            for captures in self.cte_name.captures_iter(&sql) {
                refs.ctes.insert(clean_identifier(&captures[1]));
            }
        }
        if self.select_keyword.find_iter(&sql).count() > 1 {
            refs.has_subquery = true;
        }

        self.extract_tables(&sql, &mut refs);

        if let Some((_, select_end)) = find_keyword(&sql, 0, &["SELECT"]) {
            let list_end = clause_end(&sql, select_end, SELECT_END);
            for item in split_top_level(&sql[select_end..list_end]) {
                refs.select_columns.extend(self.select_item_columns(item));
            }
        }

        if let Some((_, where_end)) = find_keyword(&sql, 0, &["WHERE"]) {
            let clause = &sql[where_end..clause_end(&sql, where_end, WHERE_END)];
            refs.where_columns = self.qualified_refs(clause);
            if !refs.has_subquery {
                refs.where_columns.extend(self.unqualified_refs(clause));
            }
        }

        refs
    }

    fn extract_tables(&self, sql: &str, refs: &mut SqlReferences) {
        for m in self.table_source.find_iter(sql) {
            let end = clause_end(sql, m.end(), TABLE_LIST_END);
            let target = &sql[m.end()..end];

            if m.as_str().eq_ignore_ascii_case("FROM") {
                for item in split_top_level(target) {
                    if let Some(table) = parse_table_item(item) {
                        refs.tables.push(table);
                    }
                }
            } else if let Some(table) = parse_table_item(target) {
                refs.tables.push(table);
            }
        }
    }

    fn select_item_columns(&self, item: &str) -> Vec<ColumnRef> {
        let mut expr = item.trim().to_string();

        if let Some(captures) = self.leading_distinct.captures(&expr) {
            expr = captures[1].trim().to_string();
        }

        if let Some(m) = self.alias_suffix.find(&expr) {
            expr.truncate(m.start());
        } else if let Some(captures) = self.bare_alias.captures(&expr) {
            let head = captures[1].trim();
            if !is_reserved(&captures[2]) && !is_reserved(head) {
                expr = head.to_string();
            }
        }

        let inner = self.strip_wrappers(&expr);

        if let Some(captures) = self.column_ref.captures(&inner) {
            let column = clean_identifier(&captures[2]);
            let qualifier = captures.get(1).map(|q| clean_identifier(q.as_str()));
            if qualifier.is_none() && is_reserved(&column) {
                return Vec::new();
            }
            return vec![ColumnRef { qualifier, column }];
        }

        self.qualified_refs(&inner)
    }

    /// Peel aggregate calls, DISTINCT and enclosing parentheses, then drop
    /// trailing punctuation
    fn strip_wrappers(&self, expr: &str) -> String {
        let mut current = expr.trim().to_string();

        loop {
            let before = current.clone();

            if let Some(m) = self.aggregate_call.find(&current) {
                let open = m.end() - 1;
                if matching_paren(&current, open) == Some(current.len() - 1) {
                    current = current[open + 1..current.len() - 1].trim().to_string();
                }
            }

            if let Some(captures) = self.leading_distinct.captures(&current) {
                current = captures[1].trim().to_string();
            }

            if current.starts_with('(') && matching_paren(&current, 0) == Some(current.len() - 1) {
                current = current[1..current.len() - 1].trim().to_string();
            }

            if current == before {
                break;
            }
        }

        current
            .trim_end_matches(|c: char| c == ')' || c == ';' || c == ',' || c.is_whitespace())
            .to_string()
    }

    fn qualified_refs(&self, text: &str) -> Vec<ColumnRef> {
        self.qualified_ref
            .captures_iter(text)
            .map(|captures| ColumnRef {
                qualifier: Some(clean_identifier(&captures[1])),
                column: clean_identifier(&captures[2]),
            })
            .collect()
    }

    /// Bare identifiers that are neither qualified, qualifiers, function
    /// names, bind parameters nor keywords
    fn unqualified_refs(&self, text: &str) -> Vec<ColumnRef> {
        let bytes = text.as_bytes();
        let mut columns = Vec::new();

        for m in self.identifier.find_iter(text) {
            if m.start() > 0 && is_word_byte(bytes[m.start() - 1]) {
                continue;
            }

            let previous = text[..m.start()].trim_end().bytes().last();
            let next = text[m.end()..].trim_start().bytes().next();

            if matches!(previous, Some(b'.') | Some(b':') | Some(b'@'))
                || matches!(next, Some(b'.') | Some(b'('))
                || is_reserved(m.as_str())
            {
                continue;
            }

            columns.push(ColumnRef {
                qualifier: None,
                column: clean_identifier(m.as_str()),
            });
        }

        columns
    }
}

/// `table`, `schema.table`, `table alias` or `table AS alias`; derived
/// tables and table functions yield nothing
fn parse_table_item(item: &str) -> Option<TableRef> {
    let mut tokens = item.split_whitespace();
    let raw_name = tokens.next()?;

    let unqualified = raw_name.rsplit('.').next().unwrap_or(raw_name);
    let name = clean_identifier(unqualified);
    if !is_identifier(&name) {
        return None;
    }

    let mut alias_token = tokens.next();
    if alias_token.is_some_and(|t| t.eq_ignore_ascii_case("AS")) {
        alias_token = tokens.next();
    }

    let alias = alias_token
        .map(clean_identifier)
        .filter(|a| is_identifier(a) && !is_reserved(a));

    Some(TableRef { name, alias })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(sql: &str) -> SqlReferences {
        SqlPatterns::compile().unwrap().extract(sql)
    }

    fn col(qualifier: Option<&str>, column: &str) -> ColumnRef {
        ColumnRef {
            qualifier: qualifier.map(str::to_string),
            column: column.to_string(),
        }
    }

    #[test]
    fn test_tables_and_aliases() {
        let refs = extract(
            "SELECT t.name, u.unit_no FROM tenants t \
             JOIN units AS u ON t.unit_id = u.id LEFT JOIN buildings b ON u.building_id = b.id",
        );

        assert_eq!(
            refs.tables,
            vec![
                TableRef { name: "TENANTS".into(), alias: Some("T".into()) },
                TableRef { name: "UNITS".into(), alias: Some("U".into()) },
                TableRef { name: "BUILDINGS".into(), alias: Some("B".into()) },
            ]
        );
        assert_eq!(refs.resolve("U"), Some("UNITS"));
        assert_eq!(refs.resolve("TENANTS"), Some("TENANTS"));
    }

    #[test]
    fn test_alias_is_not_a_clause_keyword() {
        let refs = extract("SELECT name FROM tenants WHERE id = 1");
        assert_eq!(refs.tables[0].alias, None);

        let refs = extract("SELECT name FROM tenants JOIN units ON 1 = 1");
        assert_eq!(refs.tables[0].alias, None);
        assert_eq!(refs.tables[1].alias, None);
    }

    #[test]
    fn test_comma_join_and_schema_prefix() {
        let refs = extract("SELECT * FROM app.tenants t, \"units\" u WHERE t.unit_id = u.id");
        let names: Vec<_> = refs.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["TENANTS", "UNITS"]);
    }

    #[test]
    fn test_select_items() {
        let refs = extract(
            "SELECT DISTINCT t.name AS tenant_name, COUNT(*) n, SUM(p.amount), \
             MAX(DISTINCT p.paid_at), status FROM tenants t JOIN payments p ON p.tenant_id = t.id",
        );

        assert_eq!(
            refs.select_columns,
            vec![
                col(Some("T"), "NAME"),
                col(None, "*"),
                col(Some("P"), "AMOUNT"),
                col(Some("P"), "PAID_AT"),
                col(None, "STATUS"),
            ]
        );
    }

    #[test]
    fn test_expressions_only_yield_qualified_refs() {
        let refs = extract(
            "SELECT ROUND(AVG(p.amount), 2), CASE WHEN p.late THEN 1 ELSE 0 END flag, 42, \
             UPPER(name) FROM payments p",
        );

        assert_eq!(
            refs.select_columns,
            vec![col(Some("P"), "AMOUNT"), col(Some("P"), "LATE")]
        );
    }

    #[test]
    fn test_from_inside_functions_and_literals() {
        let refs = extract(
            "SELECT EXTRACT(YEAR FROM paid_at) FROM payments \
             WHERE note = 'moved from units' -- from comments\n",
        );

        let names: Vec<_> = refs.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["PAYMENTS"]);
    }

    #[test]
    fn test_where_columns() {
        let refs = extract(
            "SELECT t.name FROM tenants t WHERE t.status = 'ACTIVE' AND move_in >= DATE '2024-01-01' \
             AND LOWER(city) LIKE :city ORDER BY t.name",
        );

        assert_eq!(
            refs.where_columns,
            vec![
                col(Some("T"), "STATUS"),
                col(None, "MOVE_IN"),
                col(None, "CITY"),
            ]
        );
    }

    #[test]
    fn test_cast_types_and_collations_are_not_columns() {
        let refs = extract("SELECT name FROM tenants WHERE CAST(id AS INTEGER) > 1");
        assert_eq!(refs.where_columns, vec![col(None, "ID")]);

        let refs = extract(
            "SELECT name FROM tenants WHERE name = 'kim' COLLATE NOCASE \
             AND CAST(floor AS REAL) < 2.5 AND unit_no = '1' COLLATE RTRIM",
        );
        assert_eq!(
            refs.where_columns,
            vec![col(None, "NAME"), col(None, "FLOOR"), col(None, "UNIT_NO")]
        );
    }

    #[test]
    fn test_subquery_skips_unqualified_where() {
        let refs = extract(
            "SELECT t.name FROM tenants t WHERE unit_id IN (SELECT u.id FROM units u WHERE u.floor > 3)",
        );

        assert!(refs.has_subquery);
        assert_eq!(refs.where_columns, vec![col(Some("U"), "ID"), col(Some("U"), "FLOOR")]);
        let names: Vec<_> = refs.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["TENANTS", "UNITS"]);
    }

    #[test]
    fn test_cte_names_collected() {
        let refs = extract(
            "WITH recent AS (SELECT * FROM payments WHERE paid_at > SYSDATE - 30) \
             SELECT r.amount FROM recent r",
        );

        assert!(refs.ctes.contains("RECENT"));
        assert_eq!(refs.select_columns, vec![col(Some("R"), "AMOUNT")]);
    }

    #[test]
    fn test_derived_table_is_skipped() {
        let refs = extract("SELECT x.n FROM (SELECT COUNT(*) n FROM tenants) x");
        let names: Vec<_> = refs.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["TENANTS"]);
    }

    #[test]
    fn test_empty_statement() {
        assert!(extract("  -- SQL generation failed\n").is_empty);
        assert!(!extract("SELECT 1").is_empty);
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(
            split_top_level("a, f(b, c), d"),
            vec!["a", " f(b, c)", " d"]
        );
    }
}
