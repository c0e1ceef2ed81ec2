//! Token-level helpers shared by the guardrail checks
//!
//! Only the tokenizer is used; statements are never parsed into a tree.

use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer, TokenizerError};

/// Split a statement into tokens
pub(crate) fn tokenize(sql: &str) -> Result<Vec<Token>, TokenizerError> {
    let dialect = PostgreSqlDialect {};
    Tokenizer::new(&dialect, sql).tokenize()
}

/// Count `;`-separated segments that contain anything besides whitespace and comments
pub(crate) fn count_statements(tokens: &[Token]) -> usize {
    tokens
        .split(|token| matches!(token, Token::SemiColon))
        .filter(|segment| {
            segment
                .iter()
                .any(|token| !matches!(token, Token::Whitespace(_) | Token::EOF))
        })
        .count()
}

/// Whether `token` is the unquoted keyword `keyword`, ignoring case
pub(crate) fn is_keyword(token: &Token, keyword: &str) -> bool {
    matches!(token, Token::Word(word) if word.quote_style.is_none() && word.value.eq_ignore_ascii_case(keyword))
}

/// Contents of a string literal token
pub(crate) fn literal_text(token: &Token) -> Option<&str> {
    match token {
        Token::SingleQuotedString(text)
        | Token::NationalStringLiteral(text)
        | Token::EscapedStringLiteral(text) => Some(text),
        Token::DollarQuotedString(quoted) => Some(&quoted.value),
        _ => None,
    }
}
