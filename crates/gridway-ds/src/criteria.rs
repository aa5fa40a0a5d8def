//! Advanced-criteria compiler
//!
//! Translates a criteria tree into a parameterised SQL fragment suitable for
//! wrapping as `WHERE (...)`. Two modes:
//!
//! - **strict**: predicates are emitted exactly as SQL's three-valued logic
//!   defines them, no extra null handling
//! - **lenient** (default): null sorts below every value and negation is
//!   set-theoretic, so equality/negation predicates grow null-inclusion or
//!   null-exclusion clauses
//!
//! Every user value is bound as a `?` parameter; only column identifiers and
//! constant SQL keywords are embedded in the fragment text.

use serde_json::Value;
use tracing::warn;

use gridway_protocol::{BaseOperator, Criterion, CriterionOperator};
use gridway_rdbc::security::{escape_like_pattern, validate_sql_identifier, LIKE_ESCAPE_CHAR};
use gridway_rdbc::SqlValue;

use crate::descriptor::DataSourceDescriptor;

/// Constant predicate that matches every row.
pub const ALWAYS_TRUE: &str = "1=1";
/// Constant predicate that matches no row; used to keep a containing
/// expression safe when a node is malformed.
pub const ALWAYS_FALSE: &str = "1=2";

/// A parameterised piece of SQL.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlFragment {
    /// SQL text with `?` placeholders
    pub sql: String,
    /// Values bound to the placeholders, in order
    pub params: Vec<SqlValue>,
}

impl SqlFragment {
    /// An empty fragment (compiles to no predicate at all).
    pub fn empty() -> Self {
        Self::default()
    }

    /// A constant, parameter-free fragment.
    pub fn constant(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            params: Vec::new(),
        }
    }

    fn new(sql: String, params: Vec<SqlValue>) -> Self {
        Self { sql, params }
    }

    /// Whether the fragment carries no SQL.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// Compiles criteria trees against one descriptor.
pub struct CriteriaCompiler<'a> {
    descriptor: &'a DataSourceDescriptor,
    strict: bool,
}

impl<'a> CriteriaCompiler<'a> {
    /// Create a compiler. `strict` selects plain three-valued SQL semantics.
    pub fn new(descriptor: &'a DataSourceDescriptor, strict: bool) -> Self {
        Self { descriptor, strict }
    }

    /// Compile a raw criteria tree. Malformed trees degrade per node; the
    /// result may be empty, in which case no WHERE clause applies.
    pub fn compile(&self, raw: &Value) -> SqlFragment {
        let criterion = match Criterion::from_value(raw) {
            Ok(criterion) => criterion,
            Err(e) => {
                warn!(data_source = %self.descriptor.id, error = %e, "unparsable criteria tree");
                return SqlFragment::empty();
            }
        };
        self.compile_node(&criterion).unwrap_or_default()
    }

    fn compile_node(&self, criterion: &Criterion) -> Option<SqlFragment> {
        let operator = match criterion.operator {
            Some(op) => op,
            None => {
                warn!(data_source = %self.descriptor.id, "criterion without operator dropped");
                return None;
            }
        };
        if operator.is_logical() {
            self.compile_logical(operator, criterion.criteria.as_ref())
        } else {
            self.compile_field(operator, criterion)
        }
    }

    fn compile_logical(
        &self,
        operator: CriterionOperator,
        children: Option<&Value>,
    ) -> Option<SqlFragment> {
        let items = match children {
            None => {
                warn!(data_source = %self.descriptor.id, op = ?operator,
                      "logical criterion without a child list dropped");
                return None;
            }
            Some(Value::Array(items)) => items,
            Some(_) => {
                warn!(data_source = %self.descriptor.id, op = ?operator,
                      "logical criterion children are not a list");
                return Some(SqlFragment::constant(ALWAYS_FALSE));
            }
        };

        let fragments: Vec<SqlFragment> = items
            .iter()
            .filter_map(|item| match Criterion::from_value(item) {
                Ok(child) => self.compile_node(&child),
                Err(e) => {
                    warn!(data_source = %self.descriptor.id, error = %e,
                          "unparsable child criterion skipped");
                    None
                }
            })
            .filter(|f| !f.is_empty())
            .collect();

        if fragments.is_empty() {
            return None;
        }

        match operator {
            CriterionOperator::And => Some(join(fragments, " AND ")),
            CriterionOperator::Or => Some(join(fragments, " OR ")),
            // a NOT with several children is a negated disjunction
            CriterionOperator::Not => {
                let inner = join(fragments, " OR ");
                Some(SqlFragment::new(format!("NOT ({})", inner.sql), inner.params))
            }
            _ => unreachable!("compile_logical called for a field operator"),
        }
    }

    fn compile_field(
        &self,
        operator: CriterionOperator,
        criterion: &Criterion,
    ) -> Option<SqlFragment> {
        let traits = operator
            .traits()
            .expect("field operator must decompose into traits");

        if traits.base == BaseOperator::Regexp {
            warn!(data_source = %self.descriptor.id, op = ?operator,
                  "regexp operators are not supported by the SQL compiler");
            return None;
        }

        let field_name = match &criterion.field_name {
            Some(name) => name,
            None => {
                warn!(data_source = %self.descriptor.id, op = ?operator,
                      "field criterion without fieldName dropped");
                return None;
            }
        };

        let column = match self.resolve_column(field_name) {
            Ok(column) => column,
            Err(fragment) => return Some(fragment),
        };

        let ci = traits.case_insensitive;

        if traits.field_comparison {
            // the "value" names the field on the right-hand side
            let other = match criterion.value.as_ref().and_then(Value::as_str) {
                Some(name) => name,
                None => {
                    warn!(data_source = %self.descriptor.id, op = ?operator,
                          "field-comparison criterion without a field name value");
                    return Some(SqlFragment::constant(ALWAYS_TRUE));
                }
            };
            let other_column = match self.descriptor.field(other) {
                Some(field) => field.column().to_string(),
                None => {
                    warn!(data_source = %self.descriptor.id, field = other,
                          "unknown field in cross-field criterion");
                    return Some(SqlFragment::constant(ALWAYS_TRUE));
                }
            };
            return Some(match traits.base {
                BaseOperator::Equals => self.equals_field(&column, &other_column, traits.negated, ci),
                BaseOperator::GreaterThan => self.compare_field(&column, ">", &other_column, ci),
                BaseOperator::LessThan => self.compare_field(&column, "<", &other_column, ci),
                BaseOperator::GreaterOrEqual => self.compare_field(&column, ">=", &other_column, ci),
                BaseOperator::LessOrEqual => self.compare_field(&column, "<=", &other_column, ci),
                BaseOperator::Contains | BaseOperator::StartsWith | BaseOperator::EndsWith => {
                    self.like_field(&column, traits.base, &other_column, traits.negated, ci)
                }
                _ => SqlFragment::constant(ALWAYS_TRUE),
            });
        }

        let value = criterion.value.as_ref();

        Some(match traits.base {
            BaseOperator::IsNull => is_null(&column, traits.negated),
            BaseOperator::IsBlank => is_blank(&column, traits.negated),
            BaseOperator::InSet => self.in_set(&column, value, traits.negated),
            BaseOperator::Equals if traits.pattern => {
                self.like_value(&column, BaseOperator::Equals, value, traits.negated, ci, true)
            }
            BaseOperator::Equals => self.equals(&column, value, traits.negated, ci),
            BaseOperator::GreaterThan => self.compare(&column, ">", value, ci),
            BaseOperator::LessThan => self.compare(&column, "<", value, ci),
            BaseOperator::GreaterOrEqual => self.compare(&column, ">=", value, ci),
            BaseOperator::LessOrEqual => self.compare(&column, "<=", value, ci),
            BaseOperator::Between { inclusive } => {
                self.between(&column, criterion, inclusive, ci)
            }
            BaseOperator::Contains | BaseOperator::StartsWith | BaseOperator::EndsWith => {
                self.like_value(&column, traits.base, value, traits.negated, ci, traits.pattern)
            }
            BaseOperator::Regexp => unreachable!("handled above"),
        })
    }

    /// Resolve a field name to its column, falling back to the raw name for
    /// fields outside the descriptor.
    fn resolve_column(&self, field_name: &str) -> Result<String, SqlFragment> {
        if let Some(field) = self.descriptor.field(field_name) {
            return Ok(field.column().to_string());
        }
        warn!(data_source = %self.descriptor.id, field = field_name,
              "criterion references a field outside the descriptor");
        match validate_sql_identifier(field_name) {
            Ok(()) => Ok(field_name.to_string()),
            Err(_) => Err(SqlFragment::constant(ALWAYS_FALSE)),
        }
    }

    fn equals(
        &self,
        column: &str,
        value: Option<&Value>,
        negated: bool,
        ci: bool,
    ) -> SqlFragment {
        let is_null_value = value.map_or(true, Value::is_null);

        if self.strict {
            let op = if negated { "<>" } else { "=" };
            return SqlFragment::new(
                format!("{} {} {}", fold_column(column, ci), op, fold_param(ci)),
                vec![json_to_sql(value)],
            );
        }

        if is_null_value {
            return is_null(column, negated);
        }

        if negated {
            SqlFragment::new(
                format!(
                    "({} <> {} OR {} IS NULL)",
                    fold_column(column, ci),
                    fold_param(ci),
                    column
                ),
                vec![json_to_sql(value)],
            )
        } else {
            SqlFragment::new(
                format!(
                    "({} = {} AND {} IS NOT NULL)",
                    fold_column(column, ci),
                    fold_param(ci),
                    column
                ),
                vec![json_to_sql(value)],
            )
        }
    }

    fn equals_field(&self, column: &str, other: &str, negated: bool, ci: bool) -> SqlFragment {
        let left = fold_column(column, ci);
        let right = fold_column(other, ci);
        if self.strict {
            let op = if negated { "<>" } else { "=" };
            return SqlFragment::constant(&format!("{left} {op} {right}"));
        }
        if negated {
            SqlFragment::constant(&format!("({left} <> {right} OR {column} IS NULL)"))
        } else {
            SqlFragment::constant(&format!("({left} = {right} AND {column} IS NOT NULL)"))
        }
    }

    fn compare(&self, column: &str, op: &str, value: Option<&Value>, ci: bool) -> SqlFragment {
        if value.map_or(true, Value::is_null) && !self.strict {
            // open-ended range edge: null compares below everything, so the
            // predicate cannot constrain the set
            return SqlFragment::constant(ALWAYS_TRUE);
        }
        SqlFragment::new(
            format!("{} {} {}", fold_column(column, ci), op, fold_param(ci)),
            vec![json_to_sql(value)],
        )
    }

    fn compare_field(&self, column: &str, op: &str, other: &str, ci: bool) -> SqlFragment {
        SqlFragment::constant(&format!(
            "{} {} {}",
            fold_column(column, ci),
            op,
            fold_column(other, ci)
        ))
    }

    fn between(
        &self,
        column: &str,
        criterion: &Criterion,
        inclusive: bool,
        ci: bool,
    ) -> SqlFragment {
        let (lower_op, upper_op) = if inclusive { (">=", "<=") } else { (">", "<") };
        let mut parts = Vec::new();
        for (bound, op) in [(&criterion.start, lower_op), (&criterion.end, upper_op)] {
            let fragment = self.compare(column, op, bound.as_ref(), ci);
            if fragment.sql != ALWAYS_TRUE {
                parts.push(fragment);
            }
        }
        if parts.is_empty() {
            return SqlFragment::constant(ALWAYS_TRUE);
        }
        if parts.len() == 1 {
            return parts.into_iter().next().expect("one part");
        }
        let joined = join(parts, " AND ");
        SqlFragment::new(format!("({})", joined.sql), joined.params)
    }

    fn like_value(
        &self,
        column: &str,
        base: BaseOperator,
        value: Option<&Value>,
        negated: bool,
        ci: bool,
        pattern_mode: bool,
    ) -> SqlFragment {
        let raw = match value {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => scalar_to_string(other),
        };
        let body = if pattern_mode {
            translate_wildcard_pattern(&raw)
        } else {
            escape_like_pattern(&raw)
        };
        let pattern = match base {
            BaseOperator::Contains => format!("%{body}%"),
            BaseOperator::StartsWith => format!("{body}%"),
            BaseOperator::EndsWith => format!("%{body}"),
            _ => body,
        };

        let left = fold_column(column, ci);
        let right = if ci { "upper(?)" } else { "?" };
        let like = if negated { "not like" } else { "like" };
        let params = vec![
            SqlValue::String(pattern),
            SqlValue::String(LIKE_ESCAPE_CHAR.to_string()),
        ];

        if self.strict {
            SqlFragment::new(format!("{left} {like} {right} escape ?"), params)
        } else {
            SqlFragment::new(
                format!("({left} {like} {right} escape ? AND {column} IS NOT NULL)"),
                params,
            )
        }
    }

    fn like_field(
        &self,
        column: &str,
        base: BaseOperator,
        other: &str,
        negated: bool,
        ci: bool,
    ) -> SqlFragment {
        let concat = match base {
            BaseOperator::Contains => format!("'%' || {other} || '%'"),
            BaseOperator::StartsWith => format!("{other} || '%'"),
            BaseOperator::EndsWith => format!("'%' || {other}"),
            _ => other.to_string(),
        };
        let left = fold_column(column, ci);
        let right = if ci { format!("upper({concat})") } else { concat };
        let like = if negated { "not like" } else { "like" };
        if self.strict {
            SqlFragment::constant(&format!("{left} {like} {right}"))
        } else {
            SqlFragment::constant(&format!(
                "({left} {like} {right} AND {column} IS NOT NULL)"
            ))
        }
    }

    fn in_set(&self, column: &str, value: Option<&Value>, negated: bool) -> SqlFragment {
        let items: Vec<&Value> = match value {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single) => vec![single],
            None => Vec::new(),
        };

        let positive = self.in_set_positive(column, &items);
        if negated {
            SqlFragment::new(format!("NOT ({})", positive.sql), positive.params)
        } else {
            positive
        }
    }

    fn in_set_positive(&self, column: &str, items: &[&Value]) -> SqlFragment {
        if items.is_empty() {
            return SqlFragment::constant(ALWAYS_FALSE);
        }

        if self.strict {
            let placeholders = vec!["?"; items.len()].join(", ");
            return SqlFragment::new(
                format!("{column} IN ({placeholders})"),
                items.iter().map(|v| json_to_sql(Some(v))).collect(),
            );
        }

        let non_nulls: Vec<&Value> = items.iter().copied().filter(|v| !v.is_null()).collect();
        let has_null = non_nulls.len() != items.len();

        match (non_nulls.is_empty(), has_null) {
            (true, true) => SqlFragment::constant(&format!("{column} IS NULL")),
            (true, false) => SqlFragment::constant(ALWAYS_FALSE),
            (false, false) => {
                let placeholders = vec!["?"; non_nulls.len()].join(", ");
                SqlFragment::new(
                    format!("{column} IN ({placeholders})"),
                    non_nulls.iter().map(|v| json_to_sql(Some(v))).collect(),
                )
            }
            (false, true) => {
                let placeholders = vec!["?"; non_nulls.len()].join(", ");
                SqlFragment::new(
                    format!("({column} IN ({placeholders}) OR {column} IS NULL)"),
                    non_nulls.iter().map(|v| json_to_sql(Some(v))).collect(),
                )
            }
        }
    }
}

fn join(fragments: Vec<SqlFragment>, separator: &str) -> SqlFragment {
    let mut params = Vec::new();
    let sql = fragments
        .into_iter()
        .map(|f| {
            params.extend(f.params);
            format!("({})", f.sql)
        })
        .collect::<Vec<_>>()
        .join(separator);
    SqlFragment::new(sql, params)
}

fn is_null(column: &str, negated: bool) -> SqlFragment {
    if negated {
        SqlFragment::constant(&format!("{column} IS NOT NULL"))
    } else {
        SqlFragment::constant(&format!("{column} IS NULL"))
    }
}

fn is_blank(column: &str, negated: bool) -> SqlFragment {
    if negated {
        SqlFragment::constant(&format!("({column} IS NOT NULL AND {column} <> '')"))
    } else {
        SqlFragment::constant(&format!("({column} IS NULL OR {column} = '')"))
    }
}

/// The `'' ||` coercion forces string context on non-text columns before the
/// upper-case fold.
fn fold_column(column: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        format!("upper('' || {column})")
    } else {
        column.to_string()
    }
}

fn fold_param(case_insensitive: bool) -> &'static str {
    if case_insensitive {
        "upper('' || ?)"
    } else {
        "?"
    }
}

fn json_to_sql(value: Option<&Value>) -> SqlValue {
    value.map(SqlValue::from_json).unwrap_or(SqlValue::Null)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Translate a client wildcard pattern into a LIKE pattern: `*` becomes `%`,
/// `?` becomes `_`, backslash escapes the next character, and LIKE
/// metacharacters in the input are escaped.
pub fn translate_wildcard_pattern(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '\\' => {
                if let Some(next) = chars.next() {
                    push_like_escaped(&mut out, next);
                }
            }
            other => push_like_escaped(&mut out, other),
        }
    }
    out
}

fn push_like_escaped(out: &mut String, c: char) {
    if c == '_' || c == '%' || c == LIKE_ESCAPE_CHAR {
        out.push(LIKE_ESCAPE_CHAR);
    }
    out.push(c);
}
