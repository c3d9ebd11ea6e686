use crate::core::error::{Error, ErrorKind, Result};
use crate::query::ast::{BoolQuery, Query};

/// Query parser for converting string queries to AST
pub struct QueryParser {
    pub default_field: String,
    pub default_operator: BooleanOperator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occur {
    Must,
    Should,
    MustNot,
}

impl QueryParser {
    pub fn new(default_field: &str) -> Self {
        QueryParser {
            default_field: default_field.to_string(),
            default_operator: BooleanOperator::Or,
        }
    }

    pub fn with_operator(mut self, operator: BooleanOperator) -> Self {
        self.default_operator = operator;
        self
    }

    /// Parse a query string into Query AST
    /// Examples:
    /// - "rust programming" -> OR of two terms on the default field
    /// - "rust AND programming", "+rust +programming" -> both required
    /// - "rust NOT draft", "rust -draft" -> exclusion
    /// - "title:rust" -> field query
    /// - "title:\"virtual files\"" -> every analyzed word required
    /// - "chunk*" -> prefix, "ch?nk" -> wildcard
    /// - "rust^2" -> boosted term
    pub fn parse(&self, input: &str) -> Result<Query> {
        let tokens = lex(input)?;
        if tokens.is_empty() {
            return Ok(Query::MatchAll);
        }

        let mut clauses: Vec<(Occur, Query)> = Vec::new();
        let mut pending: Option<&str> = None;

        for token in &tokens {
            match token.as_str() {
                "AND" | "&&" => {
                    if let Some((occur, _)) = clauses.last_mut() {
                        if *occur == Occur::Should {
                            *occur = Occur::Must;
                        }
                    }
                    pending = Some("AND");
                }
                "OR" | "||" => pending = Some("OR"),
                "NOT" | "!" => pending = Some("NOT"),
                word => {
                    let (explicit, word) = match word.as_bytes()[0] {
                        b'+' if word.len() > 1 => (Some(Occur::Must), &word[1..]),
                        b'-' if word.len() > 1 => (Some(Occur::MustNot), &word[1..]),
                        _ => (None, word),
                    };
                    let occur = explicit.unwrap_or(match pending {
                        Some("NOT") => Occur::MustNot,
                        Some("AND") => Occur::Must,
                        Some(_) => Occur::Should,
                        None => match self.default_operator {
                            BooleanOperator::And => Occur::Must,
                            BooleanOperator::Or => Occur::Should,
                        },
                    });
                    clauses.push((occur, self.parse_clause(word)?));
                    pending = None;
                }
            }
        }

        if let Some(operator) = pending {
            return Err(Error::new(ErrorKind::Parse, format!("Dangling operator '{}'", operator)));
        }

        if clauses.len() == 1 && clauses[0].0 != Occur::MustNot {
            if let Some((_, query)) = clauses.pop() {
                return Ok(query);
            }
        }

        let mut bool_query = BoolQuery::new();
        for (occur, query) in clauses {
            match occur {
                Occur::Must => bool_query.must.push(query),
                Occur::Should => bool_query.should.push(query),
                Occur::MustNot => bool_query.must_not.push(query),
            }
        }
        Ok(Query::Bool(bool_query))
    }

    fn parse_clause(&self, word: &str) -> Result<Query> {
        // field:value, unless the colon sits inside a quoted value
        let (field, value) = match word.find(':') {
            Some(pos) if pos > 0 && !word[..pos].contains('"') => (&word[..pos], &word[pos + 1..]),
            _ => (self.default_field.as_str(), word),
        };
        if value.is_empty() {
            return Err(Error::new(ErrorKind::Parse, format!("Missing value for field '{}'", field)));
        }

        let (value, boost) = split_boost(value)?;
        let query = if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            Query::term(field, &value[1..value.len() - 1])
        } else if value == "*" {
            Query::MatchAll
        } else if value.ends_with('*') && !value[..value.len() - 1].contains(['*', '?']) {
            Query::prefix(field, &value[..value.len() - 1])
        } else if value.contains(['*', '?']) {
            Query::wildcard(field, value)
        } else {
            Query::term(field, value)
        };

        Ok(match boost {
            Some(boost) => query.with_boost(boost),
            None => query,
        })
    }
}

fn split_boost(value: &str) -> Result<(&str, Option<f32>)> {
    match value.rfind('^') {
        Some(pos) if !value.ends_with('"') && pos > 0 => {
            let boost = value[pos + 1..].parse::<f32>()
                .map_err(|_| Error::new(ErrorKind::Parse, format!("Invalid boost in '{}'", value)))?;
            Ok((&value[..pos], Some(boost)))
        }
        _ => Ok((value, None)),
    }
}

/// Splits on whitespace, keeping quoted runs (and their quotes) intact.
fn lex(input: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in input.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if quoted {
        return Err(Error::new(ErrorKind::Parse, "Unterminated quote"));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> QueryParser {
        QueryParser::new("content")
    }

    #[test]
    fn single_term_on_default_field() {
        assert_eq!(parser().parse("chunk").unwrap(), Query::term("content", "chunk"));
        assert_eq!(parser().parse("   ").unwrap(), Query::MatchAll);
        assert_eq!(parser().parse("*").unwrap(), Query::MatchAll);
    }

    #[test]
    fn fields_phrases_and_patterns() {
        assert_eq!(parser().parse("title:rust").unwrap(), Query::term("title", "rust"));
        assert_eq!(
            parser().parse("title:\"virtual files\"").unwrap(),
            Query::term("title", "virtual files"),
        );
        assert_eq!(parser().parse("title:chunk*").unwrap(), Query::prefix("title", "chunk"));
        assert_eq!(parser().parse("ch?nk").unwrap(), Query::wildcard("content", "ch?nk"));
        assert_eq!(parser().parse("rust^2").unwrap(), Query::term("content", "rust").with_boost(2.0));
    }

    #[test]
    fn boolean_operators() {
        let query = parser().parse("rust AND chunk NOT draft").unwrap();
        let expected = BoolQuery::new()
            .with_must(Query::term("content", "rust"))
            .with_must(Query::term("content", "chunk"))
            .with_must_not(Query::term("content", "draft"));
        assert_eq!(query, Query::Bool(expected));

        let query = parser().parse("rust OR chunk").unwrap();
        let expected = BoolQuery::new()
            .with_should(Query::term("content", "rust"))
            .with_should(Query::term("content", "chunk"));
        assert_eq!(query, Query::Bool(expected));

        let query = parser().parse("+rust -status:draft").unwrap();
        let expected = BoolQuery::new()
            .with_must(Query::term("content", "rust"))
            .with_must_not(Query::term("status", "draft"));
        assert_eq!(query, Query::Bool(expected));
    }

    #[test]
    fn default_and_operator() {
        let query = parser().with_operator(BooleanOperator::And).parse("rust chunk").unwrap();
        let expected = BoolQuery::new()
            .with_must(Query::term("content", "rust"))
            .with_must(Query::term("content", "chunk"));
        assert_eq!(query, Query::Bool(expected));
    }

    #[test]
    fn malformed_input() {
        assert_eq!(parser().parse("rust AND").unwrap_err().kind, ErrorKind::Parse);
        assert_eq!(parser().parse("title:\"open").unwrap_err().kind, ErrorKind::Parse);
        assert_eq!(parser().parse("title:").unwrap_err().kind, ErrorKind::Parse);
        assert_eq!(parser().parse("rust^x").unwrap_err().kind, ErrorKind::Parse);
    }
}
