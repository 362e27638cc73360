//! Extraction of RETURN column names from Cypher text.
//!
//! Apache AGE needs the SQL column list of `cypher(...)` to match the final
//! RETURN clause, and the Neo4j backend reads rows by the same names. The
//! grammar in `cypher.pest` only tokenises the query; projection items of
//! the last RETURN are the only structure it recognises.
//!
//! ```
//! use ontolink::graph::extract_return_columns;
//!
//! let columns = extract_return_columns("MATCH (n) RETURN n.id AS id, n.label").unwrap();
//! assert_eq!(columns, vec!["id", "n.label"]);
//! ```

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "graph/cypher.pest"]
struct CypherParser;

/// Errors that can occur while extracting RETURN columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The query has no RETURN clause (write-only statement).
    NoReturnClause,
    /// `RETURN *` cannot be mapped to named columns.
    ReturnStarNotSupported,
    /// The query could not be tokenised.
    InvalidSyntax(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::NoReturnClause => write!(f, "No RETURN clause found in query"),
            ParseError::ReturnStarNotSupported => {
                write!(f, "RETURN * is not supported - name the columns explicitly")
            }
            ParseError::InvalidSyntax(msg) => write!(f, "Invalid syntax: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

/// Returns the column names produced by the final RETURN clause.
///
/// Aliased items (`expr AS alias`) yield the alias, other items yield the
/// expression text as written.
pub fn extract_return_columns(query: &str) -> Result<Vec<String>, ParseError> {
    let pairs = CypherParser::parse(Rule::Cypher, query)
        .map_err(|e| ParseError::InvalidSyntax(e.to_string()))?;

    let mut columns = None;
    visit(pairs, &mut columns)?;

    match columns {
        Some(columns) if !columns.is_empty() => Ok(columns),
        _ => Err(ParseError::NoReturnClause),
    }
}

fn visit(pairs: Pairs<'_, Rule>, columns: &mut Option<Vec<String>>) -> Result<(), ParseError> {
    for pair in pairs {
        if pair.as_rule() == Rule::Return {
            // later RETURN clauses (UNION) replace earlier ones
            *columns = Some(return_items(pair)?);
        } else {
            visit(pair.into_inner(), columns)?;
        }
    }
    Ok(())
}

fn return_items(ret: Pair<'_, Rule>) -> Result<Vec<String>, ParseError> {
    let items = ret
        .into_inner()
        .find(|p| p.as_rule() == Rule::ProjectionItems)
        .ok_or(ParseError::NoReturnClause)?;

    let mut names = Vec::new();
    for item in items.into_inner() {
        match item.as_rule() {
            Rule::Star => return Err(ParseError::ReturnStarNotSupported),
            Rule::ProjectionItem => names.push(column_name(item)),
            _ => {}
        }
    }
    Ok(names)
}

fn column_name(item: Pair<'_, Rule>) -> String {
    let fallback = item.as_str().trim().to_string();
    let mut expression = None;
    let mut alias = None;

    for inner in item.into_inner() {
        match inner.as_rule() {
            Rule::Expression => expression = Some(inner.as_str().trim().to_string()),
            Rule::Variable => alias = Some(unescape(inner.as_str().trim())),
            _ => {}
        }
    }

    alias.or(expression).unwrap_or(fallback)
}

fn unescape(name: &str) -> String {
    name.strip_prefix('`')
        .and_then(|n| n.strip_suffix('`'))
        .unwrap_or(name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_variable() {
        let cols = extract_return_columns("MATCH (n) RETURN n").unwrap();
        assert_eq!(cols, vec!["n"]);
    }

    #[test]
    fn test_property_with_alias() {
        let cols = extract_return_columns("MATCH (n:IcdDisease) RETURN n.id AS id").unwrap();
        assert_eq!(cols, vec!["id"]);
    }

    #[test]
    fn test_mixed_aliased_and_not() {
        let cols = extract_return_columns("RETURN a, r AS rel, b").unwrap();
        assert_eq!(cols, vec!["a", "rel", "b"]);
    }

    #[test]
    fn test_expression_text_is_kept() {
        let cols = extract_return_columns("RETURN n.depth + 1, count(n)").unwrap();
        assert_eq!(cols, vec!["n.depth + 1", "count(n)"]);
    }

    #[test]
    fn test_count_alias_on_relationship_pattern() {
        let cols = extract_return_columns(
            "MATCH (a:IcdDisease)-[r:UMLS_CROSS_MAP]->(b:HpoPhenotype) RETURN count(r) AS count",
        )
        .unwrap();
        assert_eq!(cols, vec!["count"]);
    }

    #[test]
    fn test_where_clause_and_order_by() {
        let cols = extract_return_columns(
            "MATCH (n:HpoPhenotype)
             WHERE n.embedding IS NULL AND n.label <> ''
             RETURN n.id AS id, n.label AS label
             ORDER BY n.id SKIP 10 LIMIT 5",
        )
        .unwrap();
        assert_eq!(cols, vec!["id", "label"]);
    }

    #[test]
    fn test_distinct_and_string_with_keyword() {
        let cols =
            extract_return_columns("MATCH (n) WHERE n.label = 'RETURN x' RETURN DISTINCT n.id")
                .unwrap();
        assert_eq!(cols, vec!["n.id"]);
    }

    #[test]
    fn test_case_expression_alias() {
        let cols = extract_return_columns(
            "RETURN CASE WHEN n.id IS NULL THEN 'root' ELSE n.id END AS parent",
        )
        .unwrap();
        assert_eq!(cols, vec!["parent"]);
    }

    #[test]
    fn test_escaped_alias() {
        let cols = extract_return_columns("RETURN n.id AS `node id`").unwrap();
        assert_eq!(cols, vec!["node id"]);
    }

    #[test]
    fn test_union_uses_last_return() {
        let cols = extract_return_columns("RETURN 1 AS a UNION RETURN 2 AS b").unwrap();
        assert_eq!(cols, vec!["b"]);
    }

    #[test]
    fn test_with_projection_is_not_a_return() {
        let cols =
            extract_return_columns("MATCH (n) WITH n.id AS id, n RETURN id, n.label AS label")
                .unwrap();
        assert_eq!(cols, vec!["id", "label"]);
    }

    #[test]
    fn test_unwind_merge_has_no_return() {
        let result = extract_return_columns(
            "UNWIND $rows AS row MERGE (n:IcdDisease {id: row.id}) SET n.label = row.label",
        );
        assert_eq!(result, Err(ParseError::NoReturnClause));
    }

    #[test]
    fn test_return_star_is_rejected() {
        let result = extract_return_columns("MATCH (n) RETURN *");
        assert_eq!(result, Err(ParseError::ReturnStarNotSupported));
    }

    #[test]
    fn test_count_star_is_fine() {
        let cols = extract_return_columns("MATCH (n) RETURN count(*) AS total").unwrap();
        assert_eq!(cols, vec!["total"]);
    }

    #[test]
    fn test_unbalanced_parenthesis_is_invalid() {
        let result = extract_return_columns("MATCH (n RETURN n");
        assert!(matches!(result, Err(ParseError::InvalidSyntax(_))));
    }
}
