//! # SQL Parser
//!
//! Lexes and parses the SQL subset the engine compiles:
//!
//! ```sql
//! SELECT * | <group keys and aggregates>
//! FROM <relation>
//! [WHERE <predicate>]
//! [GROUP BY <columns>]
//! [ORDER BY <column> [ASC|DESC], ...]
//! ```
//!
//! The parser produces frozen plans through the validating plan builder, so
//! everything it returns is already schema- and type-checked. There is no
//! standalone projection operator: a plain query selects `*`, and a grouped
//! query's output is its group keys plus its aggregates.

use thiserror::Error;

use crate::catalog::Catalog;
use crate::plan::expr::StringPredicateOp;
use crate::plan::{
    AggregateFunc, BinaryOp, Direction, Expr, Operator, PlanBuilder, PlanError,
};

/// Parse failures: either malformed input (with the byte position of the
/// offending token) or a semantic error from the plan builder.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("syntax error at byte {position}: {message}")]
    Syntax { message: String, position: usize },

    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Parse a query and build its (validated, frozen) plan.
pub fn parse_query(source: &str, catalog: &Catalog) -> Result<Operator, ParseError> {
    let tokens = tokenize(source)?;
    Parser {
        tokens,
        pos: 0,
        catalog,
    }
    .parse()
}

// ---- lexer ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Symbol(&'static str),
}

#[derive(Debug, Clone)]
struct Spanned {
    tok: Tok,
    at: usize,
}

fn tokenize(source: &str) -> Result<Vec<Spanned>, ParseError> {
    let bytes = source.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let at = i;
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
            {
                i += 1;
            }
            out.push(Spanned {
                tok: Tok::Ident(source[start..i].to_string()),
                at,
            });
        } else if c.is_ascii_digit() {
            let start = i;
            let mut is_float = false;
            while i < bytes.len()
                && ((bytes[i] as char).is_ascii_digit() || (bytes[i] == b'.' && !is_float))
            {
                if bytes[i] == b'.' {
                    is_float = true;
                }
                i += 1;
            }
            let text = &source[start..i];
            let tok = if is_float {
                Tok::Float(text.parse().map_err(|_| ParseError::Syntax {
                    message: format!("bad number: {text}"),
                    position: at,
                })?)
            } else {
                Tok::Int(text.parse().map_err(|_| ParseError::Syntax {
                    message: format!("bad number: {text}"),
                    position: at,
                })?)
            };
            out.push(Spanned { tok, at });
        } else if c == '\'' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i] != b'\'' {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(ParseError::Syntax {
                    message: "unterminated string literal".to_string(),
                    position: at,
                });
            }
            out.push(Spanned {
                tok: Tok::Str(source[start..i].to_string()),
                at,
            });
            i += 1;
        } else {
            let two = if i + 1 < bytes.len() {
                &source[i..i + 2]
            } else {
                ""
            };
            let symbol = match two {
                "<>" | "<=" | ">=" | "!=" => Some(match two {
                    "<>" => "<>",
                    "<=" => "<=",
                    ">=" => ">=",
                    _ => "!=",
                }),
                _ => None,
            };
            if let Some(s) = symbol {
                out.push(Spanned {
                    tok: Tok::Symbol(s),
                    at,
                });
                i += 2;
                continue;
            }

            let one = match c {
                ',' => ",",
                '(' => "(",
                ')' => ")",
                '*' => "*",
                '=' => "=",
                '<' => "<",
                '>' => ">",
                '+' => "+",
                '-' => "-",
                '/' => "/",
                '%' => "%",
                ';' => ";",
                _ => {
                    return Err(ParseError::Syntax {
                        message: format!("unexpected character `{c}`"),
                        position: at,
                    })
                }
            };
            out.push(Spanned {
                tok: Tok::Symbol(one),
                at,
            });
            i += 1;
        }
    }

    Ok(out)
}

// ---- parser -----------------------------------------------------------

/// One entry of the select list before plan construction.
enum SelectItem {
    Star,
    Column(String),
    Aggregate {
        func: AggregateFunc,
        arg: Option<Expr>,
        alias: Option<String>,
    },
}

struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    catalog: &'a Catalog,
}

impl<'a> Parser<'a> {
    fn parse(mut self) -> Result<Operator, ParseError> {
        self.expect_keyword("SELECT")?;
        let items = self.select_list()?;

        self.expect_keyword("FROM")?;
        let relation = self.ident()?;

        let predicate = if self.eat_keyword("WHERE") {
            Some(self.expr()?)
        } else {
            None
        };

        let group_keys = if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            Some(self.column_list()?)
        } else {
            None
        };

        let order_keys = if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            Some(self.order_list()?)
        } else {
            None
        };

        self.eat_symbol(";");
        if self.pos < self.tokens.len() {
            return Err(self.unexpected("end of query"));
        }

        self.build_plan(items, &relation, predicate, group_keys, order_keys)
    }

    fn build_plan(
        &self,
        items: Vec<SelectItem>,
        relation: &str,
        predicate: Option<Expr>,
        group_keys: Option<Vec<String>>,
        order_keys: Option<Vec<(String, Direction)>>,
    ) -> Result<Operator, ParseError> {
        let builder = PlanBuilder::new(self.catalog);
        let mut plan = builder.scan(relation)?;

        if let Some(predicate) = predicate {
            plan = builder.select(plan, predicate)?;
        }

        let has_aggregates = items
            .iter()
            .any(|i| matches!(i, SelectItem::Aggregate { .. }));

        if has_aggregates || group_keys.is_some() {
            let keys = group_keys.unwrap_or_default();
            let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();

            let mut aggregates = Vec::new();
            for item in &items {
                match item {
                    SelectItem::Star => {
                        return Err(ParseError::Syntax {
                            message: "`*` cannot be mixed with GROUP BY".to_string(),
                            position: 0,
                        })
                    }
                    SelectItem::Column(name) => {
                        if !keys.contains(name) {
                            return Err(ParseError::Plan(PlanError::UnknownColumn(format!(
                                "{name} is neither a group key nor an aggregate"
                            ))));
                        }
                    }
                    SelectItem::Aggregate { func, arg, alias } => {
                        let name = alias.clone().unwrap_or_else(|| default_agg_name(*func, arg));
                        aggregates.push((name, *func, arg.clone()));
                    }
                }
            }
            plan = builder.group_by_aggregate(plan, &key_refs, aggregates)?;
        } else if !items.iter().all(|i| matches!(i, SelectItem::Star)) {
            return Err(ParseError::Syntax {
                message: "only `SELECT *` or aggregate queries are supported".to_string(),
                position: 0,
            });
        }

        if let Some(order_keys) = order_keys {
            let keys: Vec<(&str, Direction)> = order_keys
                .iter()
                .map(|(name, dir)| (name.as_str(), *dir))
                .collect();
            plan = builder.order_by(plan, &keys)?;
        }

        Ok(builder.output(plan)?)
    }

    // ---- grammar pieces ----------------------------------------------

    fn select_list(&mut self) -> Result<Vec<SelectItem>, ParseError> {
        let mut items = Vec::new();
        loop {
            items.push(self.select_item()?);
            if !self.eat_symbol(",") {
                break;
            }
        }
        Ok(items)
    }

    fn select_item(&mut self) -> Result<SelectItem, ParseError> {
        if self.eat_symbol("*") {
            return Ok(SelectItem::Star);
        }

        let name = self.ident()?;
        if let Some(func) = aggregate_func(&name) {
            self.expect_symbol("(")?;
            let arg = if self.eat_symbol("*") {
                None
            } else {
                Some(self.expr()?)
            };
            self.expect_symbol(")")?;
            let alias = if self.eat_keyword("AS") {
                Some(self.ident()?)
            } else {
                None
            };
            return Ok(SelectItem::Aggregate { func, arg, alias });
        }

        Ok(SelectItem::Column(name))
    }

    fn column_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut cols = vec![self.ident()?];
        while self.eat_symbol(",") {
            cols.push(self.ident()?);
        }
        Ok(cols)
    }

    fn order_list(&mut self) -> Result<Vec<(String, Direction)>, ParseError> {
        let mut keys = Vec::new();
        loop {
            let name = self.ident()?;
            let dir = if self.eat_keyword("DESC") {
                Direction::Descending
            } else {
                self.eat_keyword("ASC");
                Direction::Ascending
            };
            keys.push((name, dir));
            if !self.eat_symbol(",") {
                break;
            }
        }
        Ok(keys)
    }

    /// Predicate grammar: OR over AND over comparison over additive over
    /// multiplicative over primary.
    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("OR") {
            let right = self.and_expr()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.cmp_expr()?;
        while self.eat_keyword("AND") {
            let right = self.cmp_expr()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn cmp_expr(&mut self) -> Result<Expr, ParseError> {
        let left = self.add_expr()?;
        let op = if self.eat_symbol("=") {
            BinaryOp::Eq
        } else if self.eat_symbol("<>") || self.eat_symbol("!=") {
            BinaryOp::Neq
        } else if self.eat_symbol("<=") {
            BinaryOp::Lte
        } else if self.eat_symbol(">=") {
            BinaryOp::Gte
        } else if self.eat_symbol("<") {
            BinaryOp::Lt
        } else if self.eat_symbol(">") {
            BinaryOp::Gt
        } else {
            return Ok(left);
        };
        let right = self.add_expr()?;
        Ok(Expr::binary(op, left, right))
    }

    fn add_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.mul_expr()?;
        loop {
            let op = if self.eat_symbol("+") {
                BinaryOp::Add
            } else if self.eat_symbol("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.mul_expr()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn mul_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.primary()?;
        loop {
            let op = if self.eat_symbol("*") {
                BinaryOp::Mul
            } else if self.eat_symbol("/") {
                BinaryOp::Div
            } else if self.eat_symbol("%") {
                BinaryOp::Mod
            } else {
                return Ok(left);
            };
            let right = self.primary()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_symbol("(") {
            let inner = self.expr()?;
            self.expect_symbol(")")?;
            return Ok(inner);
        }

        match self.next()? {
            (Tok::Int(v), _) => Ok(Expr::IntLiteral(v)),
            (Tok::Float(v), _) => Ok(Expr::FloatLiteral(v)),
            (Tok::Str(s), _) => Ok(Expr::StringLiteral(s)),
            (Tok::Ident(name), at) => {
                if let Some(op) = string_predicate(&name) {
                    self.expect_symbol("(")?;
                    let value = self.expr()?;
                    self.expect_symbol(",")?;
                    let pattern = self.expr()?;
                    self.expect_symbol(")")?;
                    return Ok(Expr::StringPredicate {
                        op,
                        value: Box::new(value),
                        pattern: Box::new(pattern),
                    });
                }
                if name.eq_ignore_ascii_case("EXTRACT_YEAR") {
                    self.expect_symbol("(")?;
                    let inner = self.expr()?;
                    self.expect_symbol(")")?;
                    return Ok(Expr::ExtractYear(Box::new(inner)));
                }
                if aggregate_func(&name).is_some() {
                    return Err(ParseError::Syntax {
                        message: format!("aggregate {name} is not allowed here"),
                        position: at,
                    });
                }
                Ok(Expr::ColumnRef(name))
            }
            (tok, at) => Err(ParseError::Syntax {
                message: format!("unexpected token {tok:?}"),
                position: at,
            }),
        }
    }

    // ---- token plumbing ----------------------------------------------

    fn next(&mut self) -> Result<(Tok, usize), ParseError> {
        let spanned = self.tokens.get(self.pos).cloned().ok_or(ParseError::Syntax {
            message: "unexpected end of input".to_string(),
            position: usize::MAX,
        })?;
        self.pos += 1;
        Ok((spanned.tok, spanned.at))
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        match self.next()? {
            (Tok::Ident(name), _) => Ok(name),
            (tok, at) => Err(ParseError::Syntax {
                message: format!("expected identifier, found {tok:?}"),
                position: at,
            }),
        }
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(
            self.tokens.get(self.pos),
            Some(Spanned { tok: Tok::Ident(name), .. }) if name.eq_ignore_ascii_case(kw)
        )
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ParseError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected(kw))
        }
    }

    fn eat_symbol(&mut self, sym: &str) -> bool {
        if matches!(
            self.tokens.get(self.pos),
            Some(Spanned { tok: Tok::Symbol(s), .. }) if *s == sym
        ) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, sym: &str) -> Result<(), ParseError> {
        if self.eat_symbol(sym) {
            Ok(())
        } else {
            Err(self.unexpected(sym))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.tokens.get(self.pos) {
            Some(spanned) => ParseError::Syntax {
                message: format!("expected {expected}, found {:?}", spanned.tok),
                position: spanned.at,
            },
            None => ParseError::Syntax {
                message: format!("expected {expected}, found end of input"),
                position: usize::MAX,
            },
        }
    }
}

fn aggregate_func(name: &str) -> Option<AggregateFunc> {
    match name.to_ascii_uppercase().as_str() {
        "COUNT" => Some(AggregateFunc::Count),
        "SUM" => Some(AggregateFunc::Sum),
        "MIN" => Some(AggregateFunc::Min),
        "MAX" => Some(AggregateFunc::Max),
        "AVG" => Some(AggregateFunc::Avg),
        _ => None,
    }
}

fn string_predicate(name: &str) -> Option<StringPredicateOp> {
    match name.to_ascii_uppercase().as_str() {
        "CONTAINS" => Some(StringPredicateOp::Contains),
        "STARTS_WITH" => Some(StringPredicateOp::StartsWith),
        "ENDS_WITH" => Some(StringPredicateOp::EndsWith),
        _ => None,
    }
}

fn default_agg_name(func: AggregateFunc, arg: &Option<Expr>) -> String {
    let func = match func {
        AggregateFunc::Count => "count",
        AggregateFunc::Sum => "sum",
        AggregateFunc::Min => "min",
        AggregateFunc::Max => "max",
        AggregateFunc::Avg => "avg",
    };
    match arg {
        Some(Expr::ColumnRef(col)) => format!("{func}_{col}"),
        _ => func.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ScalarType;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.register_table(
            "lineitem",
            vec![
                ("l_orderkey".to_string(), ScalarType::I64, "l_orderkey.col".into()),
                ("l_quantity".to_string(), ScalarType::I32, "l_quantity.col".into()),
                ("l_comment".to_string(), ScalarType::Text, "l_comment.col".into()),
                ("l_shipdate".to_string(), ScalarType::Date, "l_shipdate.col".into()),
            ],
        );
        catalog
    }

    #[test]
    fn test_select_star() {
        let catalog = catalog();
        let plan = parse_query("SELECT * FROM lineitem;", &catalog).unwrap();
        assert!(matches!(plan, Operator::Output { .. }));
        assert_eq!(plan.schema().len(), 4);
    }

    #[test]
    fn test_where_predicate() {
        let catalog = catalog();
        let plan = parse_query(
            "SELECT * FROM lineitem WHERE l_quantity < 10 AND l_orderkey > 0",
            &catalog,
        )
        .unwrap();

        let Operator::Output { child, .. } = plan else {
            panic!("expected OUTPUT root");
        };
        assert!(matches!(*child, Operator::Select { .. }));
    }

    #[test]
    fn test_group_by_with_aggregates() {
        let catalog = catalog();
        let plan = parse_query(
            "SELECT l_orderkey, COUNT(*), SUM(l_quantity) AS total \
             FROM lineitem GROUP BY l_orderkey",
            &catalog,
        )
        .unwrap();

        assert_eq!(
            plan.schema().columns,
            vec![
                ("l_orderkey".to_string(), ScalarType::I64),
                ("count".to_string(), ScalarType::I64),
                ("total".to_string(), ScalarType::I64),
            ]
        );
    }

    #[test]
    fn test_order_by_directions() {
        let catalog = catalog();
        let plan = parse_query(
            "SELECT * FROM lineitem ORDER BY l_quantity DESC, l_orderkey",
            &catalog,
        )
        .unwrap();

        let Operator::Output { child, .. } = plan else {
            panic!("expected OUTPUT root");
        };
        let Operator::OrderBy { keys, .. } = *child else {
            panic!("expected ORDER BY below OUTPUT");
        };
        assert_eq!(keys[0].1, Direction::Descending);
        assert_eq!(keys[1].1, Direction::Ascending);
    }

    #[test]
    fn test_string_predicate_call() {
        let catalog = catalog();
        let plan = parse_query(
            "SELECT * FROM lineitem WHERE CONTAINS(l_comment, 'special')",
            &catalog,
        );
        assert!(plan.is_ok());
    }

    #[test]
    fn test_extract_year() {
        let catalog = catalog();
        let plan = parse_query(
            "SELECT * FROM lineitem WHERE EXTRACT_YEAR(l_shipdate) = 1998",
            &catalog,
        );
        assert!(plan.is_ok());
    }

    #[test]
    fn test_unknown_relation_is_plan_error() {
        let catalog = catalog();
        let err = parse_query("SELECT * FROM nation", &catalog).unwrap_err();
        assert!(matches!(
            err,
            ParseError::Plan(PlanError::UnknownRelation(_))
        ));
    }

    #[test]
    fn test_syntax_error_position() {
        let catalog = catalog();
        let err = parse_query("SELECT * FROM lineitem WHERE $", &catalog).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { position: 29, .. }));
    }

    #[test]
    fn test_bare_column_select_rejected() {
        let catalog = catalog();
        let err = parse_query("SELECT l_quantity FROM lineitem", &catalog).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let catalog = catalog();
        let err = parse_query("SELECT * FROM lineitem extra", &catalog).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }
}
