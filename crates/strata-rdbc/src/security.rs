//! SQL text escaping helpers.
//!
//! Generated statements never inline raw names or literals: identifiers go
//! through [`quote_identifier`] (via `Platform::identifier`), and catalog
//! lookups that must embed a schema or table name as a string literal go
//! through [`escape_string_literal`].

/// Escape a string value for a single-quoted SQL literal.
///
/// # Examples
///
/// ```
/// use strata_rdbc::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("users"), "users");
/// assert_eq!(escape_string_literal("don't"), "don''t");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}

/// Wrap `name` in `open`/`close` delimiters, doubling any embedded closing delimiter.
///
/// # Examples
///
/// ```
/// use strata_rdbc::security::quote_identifier;
///
/// assert_eq!(quote_identifier("order", '"', '"'), "\"order\"");
/// assert_eq!(quote_identifier("a]b", '[', ']'), "[a]]b]");
/// ```
pub fn quote_identifier(name: &str, open: char, close: char) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push(open);
    for c in name.chars() {
        if c == close {
            quoted.push(close);
        }
        quoted.push(c);
    }
    quoted.push(close);
    quoted
}
