//! Table-reference extraction
//!
//! Walks the token stream of a statement and collects the names that follow
//! `FROM`, `JOIN` and `TABLE`, plus every item of a comma-separated `FROM` list.
//! String literal contents are walked the same way, since functions such as
//! `query_to_xml` execute them. Extraction over-reports rather than under-reports:
//! `'shipped from warehouse'` yields `warehouse`.

use regex::Regex;
use sqlparser::tokenizer::Token;

use super::keywords::NON_TABLE_TOKENS;
use super::lexer;

/// A bare or double-quoted identifier
const IDENT: &str = r#"(?:"(?:[^"]|"")+"|[A-Za-z_][A-Za-z0-9_$]*)"#;

/// Literals nested deeper than this are only scanned with the text patterns
const MAX_LITERAL_DEPTH: usize = 3;

/// Functions whose argument syntax uses `FROM` (`EXTRACT(YEAR FROM ts)`)
const FUNCTION_FROM: &[&str] = &["EXTRACT", "TRIM", "SUBSTRING", "OVERLAY"];

/// Keywords that close a `FROM` list
const CLAUSE_END: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "WINDOW", "ORDER", "LIMIT", "OFFSET", "FETCH", "FOR", "UNION",
    "INTERSECT", "EXCEPT", "RETURNING",
];

/// Keywords opening a nested query where a table name could appear
const QUERY_START: &[&str] = &["SELECT", "WITH", "VALUES", "TABLE"];

/// Keywords that may sit between `FROM` and the table
const TABLE_PREFIX: &[&str] = &["ONLY", "LATERAL"];

/// Parenthesis level being walked
#[derive(Debug, Default, Clone, Copy)]
struct Scope {
    /// Arguments of a function in [`FUNCTION_FROM`]
    function_args: bool,

    /// Inside a `FROM` list, where a comma introduces another table
    from_list: bool,
}

/// Extracts normalized table names from a statement
#[derive(Debug, Clone)]
pub struct TableExtractor {
    /// `FROM x` / `JOIN x` / `TABLE x`, used when a statement cannot be tokenized
    reference: Regex,

    /// `, y` following a table (and optional alias) in a `FROM` list
    continuation: Regex,

    /// Parts of a qualified name
    ident: Regex,
}

impl TableExtractor {
    /// Create a new extractor
    pub fn new() -> Self {
        let qualified = format!(r"{}(?:\s*\.\s*{})*", IDENT, IDENT);
        Self {
            reference: Regex::new(&format!(
                r"(?i)\b(?:FROM|JOIN|TABLE)\b\s*(?:ONLY\s+)?({})",
                qualified
            ))
            .expect("table reference pattern"),
            continuation: Regex::new(&format!(
                r"(?i)^\s*(?:(?:AS\s+)?{}\s*)?,\s*(?:ONLY\s+)?({})",
                IDENT, qualified
            ))
            .expect("table list pattern"),
            ident: Regex::new(IDENT).expect("identifier pattern"),
        }
    }

    /// Distinct table names referenced by `sql`, lower-cased, in order of first appearance
    pub fn extract(&self, sql: &str) -> Vec<String> {
        let mut tables = Vec::new();
        self.extract_into(sql, 0, &mut tables);
        tables
    }

    fn extract_into(&self, sql: &str, depth: usize, tables: &mut Vec<String>) {
        match lexer::tokenize(sql) {
            Ok(tokens) => self.walk(&tokens, depth, tables),
            Err(_) => self.scan_text(sql, tables),
        }
    }

    fn walk(&self, tokens: &[Token], depth: usize, tables: &mut Vec<String>) {
        let tokens: Vec<&Token> = tokens
            .iter()
            .filter(|token| !matches!(token, Token::Whitespace(_) | Token::EOF))
            .collect();
        let mut scopes = vec![Scope::default()];
        let mut expect_table = false;
        let mut i = 0;

        while i < tokens.len() {
            let token = tokens[i];

            if let Some(text) = lexer::literal_text(token) {
                if depth < MAX_LITERAL_DEPTH {
                    self.extract_into(text, depth + 1, tables);
                } else {
                    self.scan_text(text, tables);
                }
            }

            if expect_table {
                match token {
                    Token::LParen => {
                        scopes.push(Scope {
                            function_args: false,
                            from_list: true,
                        });
                        i += 1;
                        continue;
                    }
                    _ if is_one_of(token, TABLE_PREFIX) => {
                        i += 1;
                        continue;
                    }
                    Token::Word(_) if !is_one_of(token, QUERY_START) => {
                        let (name, next) = qualified_name(&tokens, i);
                        // `name(...)` is a set-returning function
                        if !matches!(tokens.get(next), Some(Token::LParen)) {
                            self.push(tables, name);
                        }
                        expect_table = false;
                        i = next;
                        continue;
                    }
                    _ => expect_table = false,
                }
            }

            match token {
                Token::LParen => {
                    let function_args = i > 0 && is_one_of(tokens[i - 1], FUNCTION_FROM);
                    scopes.push(Scope {
                        function_args,
                        from_list: false,
                    });
                }
                Token::RParen => {
                    if scopes.len() > 1 {
                        scopes.pop();
                    }
                }
                Token::SemiColon => scopes = vec![Scope::default()],
                Token::Comma => {
                    if scopes.last().is_some_and(|scope| scope.from_list) {
                        expect_table = true;
                    }
                }
                Token::Word(word) if word.quote_style.is_none() => {
                    let keyword = word.value.to_uppercase();
                    let after_distinct = i > 0 && lexer::is_keyword(tokens[i - 1], "DISTINCT");
                    if let Some(scope) = scopes.last_mut() {
                        match keyword.as_str() {
                            "FROM" if scope.function_args || after_distinct => {}
                            "FROM" => {
                                scope.from_list = true;
                                expect_table = true;
                            }
                            "JOIN" | "TABLE" => expect_table = true,
                            other if QUERY_START.contains(&other) || CLAUSE_END.contains(&other) => {
                                scope.from_list = false;
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    /// Pattern-based extraction over raw text
    fn scan_text(&self, text: &str, tables: &mut Vec<String>) {
        for caps in self.reference.captures_iter(text) {
            let Some(first) = caps.get(1) else { continue };
            self.push_qualified(tables, first.as_str());

            let mut rest = &text[first.end()..];
            while let Some(next) = self.continuation.captures(rest).and_then(|c| c.get(1)) {
                self.push_qualified(tables, next.as_str());
                rest = &rest[next.end()..];
            }
        }
    }

    fn push_qualified(&self, tables: &mut Vec<String>, qualified: &str) {
        if let Some(last) = self.ident.find_iter(qualified).last() {
            self.push(tables, unquote(last.as_str()));
        }
    }

    fn push(&self, tables: &mut Vec<String>, name: String) {
        let name = name.to_lowercase();
        if NON_TABLE_TOKENS.contains(&name.as_str()) || tables.contains(&name) {
            return;
        }
        tables.push(name);
    }
}

impl Default for TableExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn is_one_of(token: &Token, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| lexer::is_keyword(token, keyword))
}

/// Last part of the dotted name starting at `start`, and the index just past it
fn qualified_name(tokens: &[&Token], start: usize) -> (String, usize) {
    let mut end = start;
    while let (Some(Token::Period), Some(Token::Word(_))) = (tokens.get(end + 1), tokens.get(end + 2)) {
        end += 2;
    }
    let name = match tokens[end] {
        Token::Word(word) => word.value.clone(),
        _ => String::new(),
    };
    (name, end + 1)
}

fn unquote(ident: &str) -> String {
    if ident.len() >= 2 && ident.starts_with('"') && ident.ends_with('"') {
        ident[1..ident.len() - 1].replace("\"\"", "\"")
    } else {
        ident.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(sql: &str) -> Vec<String> {
        TableExtractor::new().extract(sql)
    }

    #[test]
    fn test_simple_references() {
        assert_eq!(tables("SELECT * FROM users"), vec!["users"]);
        assert_eq!(
            tables("SELECT * FROM orders o JOIN users u ON u.id = o.user_id LEFT JOIN payments p ON p.order_id = o.id"),
            vec!["orders", "users", "payments"]
        );
        assert!(tables("SELECT 1").is_empty());
    }

    #[test]
    fn test_schema_qualified_and_quoted() {
        assert_eq!(tables("SELECT * FROM public.users"), vec!["users"]);
        assert_eq!(tables(r#"SELECT * FROM "public"."Orders""#), vec!["orders"]);
        assert_eq!(tables("SELECT * FROM ONLY audit.events"), vec!["events"]);
    }

    #[test]
    fn test_deduplicates() {
        assert_eq!(
            tables("SELECT * FROM users a JOIN USERS b ON a.id = b.manager_id"),
            vec!["users"]
        );
    }

    #[test]
    fn test_comma_separated_from_list() {
        assert_eq!(
            tables("SELECT * FROM orders o, users AS u, payments WHERE o.user_id = u.id"),
            vec!["orders", "users", "payments"]
        );
        assert_eq!(tables("SELECT a, b FROM t WHERE x IN (1, 2)"), vec!["t"]);
        assert_eq!(tables("SELECT a FROM t GROUP BY a, b ORDER BY a, b"), vec!["t"]);
    }

    #[test]
    fn test_subqueries_and_non_tables() {
        assert_eq!(
            tables("SELECT * FROM (SELECT id FROM orders) sub JOIN LATERAL (SELECT 1) x ON true"),
            vec!["orders"]
        );
        assert_eq!(tables("SELECT * FROM generate_series(1, 10) g"), Vec::<String>::new());
        assert_eq!(
            tables("SELECT * FROM orders o, LATERAL unnest(o.tags) t"),
            vec!["orders"]
        );
    }

    #[test]
    fn test_from_inside_functions_and_literals() {
        assert_eq!(
            tables("SELECT EXTRACT(YEAR FROM created_at), TRIM(BOTH ' ' FROM name) FROM orders"),
            vec!["orders"]
        );
        assert_eq!(
            tables("SELECT * FROM orders WHERE a IS DISTINCT FROM b"),
            vec!["orders"]
        );
        assert_eq!(
            tables("SELECT SUBSTRING(name FROM 2 FOR 3) FROM orders"),
            vec!["orders"]
        );
    }

    #[test]
    fn test_sql_inside_literals_is_walked() {
        assert_eq!(
            tables("SELECT query_to_xml('select * from secrets', true, false, '') FROM users"),
            vec!["secrets", "users"]
        );
        assert_eq!(
            tables("SELECT query_to_xml($$SELECT * FROM secrets$$, true, false, '') FROM users"),
            vec!["secrets", "users"]
        );
        assert_eq!(
            tables("SELECT query_to_xml($q$SELECT * FROM \"Secrets\"$q$, true, false, '') FROM users"),
            vec!["secrets", "users"]
        );
        assert_eq!(
            tables("SELECT query_to_xml('select ''x'' from secrets', true, false, '') FROM users"),
            vec!["secrets", "users"]
        );
        // prose in a literal over-reports
        assert_eq!(
            tables("SELECT * FROM orders WHERE note = 'shipped from warehouse'"),
            vec!["orders", "warehouse"]
        );
    }

    #[test]
    fn test_quoted_table_without_separator() {
        assert_eq!(tables(r#"SELECT * FROM"secrets" LIMIT 5"#), vec!["secrets"]);
        assert_eq!(
            tables(r#"SELECT * FROM users u JOIN"secrets" s ON true LIMIT 5"#),
            vec!["users", "secrets"]
        );
        assert_eq!(tables(r#"SELECT * FROM"public"."secrets""#), vec!["secrets"]);
    }

    #[test]
    fn test_from_list_continues_after_join() {
        assert_eq!(
            tables("SELECT * FROM users u JOIN users v ON true, secrets s"),
            vec!["users", "secrets"]
        );
        assert_eq!(
            tables("SELECT * FROM users u JOIN orders o USING (id), secrets WHERE a IN (1, 2)"),
            vec!["users", "orders", "secrets"]
        );
        assert_eq!(
            tables("SELECT * FROM (users u JOIN secrets s ON true)"),
            vec!["users", "secrets"]
        );
    }

    #[test]
    fn test_table_command_form() {
        assert_eq!(tables("SELECT * FROM users UNION ALL TABLE secrets"), vec!["users", "secrets"]);
        assert_eq!(tables("SELECT * FROM (TABLE secrets) t"), vec!["secrets"]);
    }

    #[test]
    fn test_untokenizable_text_uses_patterns() {
        assert_eq!(tables("SELECT * FROM secrets WHERE a = 'open"), vec!["secrets"]);
        assert_eq!(tables(r#"SELECT 'x FROM"secrets""#), vec!["secrets"]);
    }

    #[test]
    fn test_comments_do_not_hide_tables() {
        assert_eq!(tables("SELECT * FROM/**/secrets"), vec!["secrets"]);
        assert_eq!(tables("SELECT 1 -- it's fine\nFROM secrets WHERE x = 'a'"), vec!["secrets"]);
    }
}
