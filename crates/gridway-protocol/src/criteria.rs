//! Advanced criteria model
//!
//! A criteria tree is either a logical node (`and`/`or`/`not` over child
//! criteria) or a field node (an operator applied to one field). Plain
//! key/value criteria maps are distinguished from trees by the
//! `_constructor: "AdvancedCriteria"` marker or by carrying an `operator`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Marker value of the `_constructor` attribute on advanced criteria.
pub const ADVANCED_CRITERIA_CONSTRUCTOR: &str = "AdvancedCriteria";

/// Whether a raw criteria value is an advanced-criteria tree rather than a
/// simple field/value map.
pub fn is_advanced_criteria(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) => {
            obj.get("_constructor").and_then(Value::as_str) == Some(ADVANCED_CRITERIA_CONSTRUCTOR)
                || obj.contains_key("operator")
        }
        None => false,
    }
}

/// One node of a criteria tree.
///
/// Every attribute is optional on the wire; which ones are meaningful
/// depends on the operator. `criteria` is kept as raw JSON because the
/// compiler has defined behaviour for malformed child lists.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Criterion {
    /// The operator; absent operators degrade to an empty fragment
    pub operator: Option<CriterionOperator>,
    /// Field the operator applies to (field nodes)
    pub field_name: Option<String>,
    /// Comparison value, or the compared field name for `...Field` operators
    pub value: Option<Value>,
    /// Range start for the between family
    pub start: Option<Value>,
    /// Range end for the between family
    pub end: Option<Value>,
    /// Child criteria (logical nodes); raw so malformed shapes can degrade
    pub criteria: Option<Value>,
}

impl Criterion {
    /// Deserialize a criterion from raw JSON.
    pub fn from_value(value: &Value) -> Result<Criterion, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    /// Build a field criterion.
    pub fn field(operator: CriterionOperator, field_name: impl Into<String>, value: Value) -> Self {
        Self {
            operator: Some(operator),
            field_name: Some(field_name.into()),
            value: Some(value),
            ..Default::default()
        }
    }

    /// Build a logical criterion over children.
    pub fn logical(operator: CriterionOperator, children: Vec<Criterion>) -> Self {
        let children = children
            .into_iter()
            .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
            .collect();
        Self {
            operator: Some(operator),
            criteria: Some(Value::Array(children)),
            ..Default::default()
        }
    }
}

/// The full operator set of the criteria language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum CriterionOperator {
    // logical
    And,
    Or,
    Not,
    // comparison
    Equals,
    NotEqual,
    IEquals,
    INotEqual,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Between,
    BetweenInclusive,
    IBetween,
    IBetweenInclusive,
    // substring
    Contains,
    StartsWith,
    EndsWith,
    IContains,
    IStartsWith,
    IEndsWith,
    NotContains,
    NotStartsWith,
    NotEndsWith,
    INotContains,
    INotStartsWith,
    INotEndsWith,
    // pattern
    MatchesPattern,
    IMatchesPattern,
    ContainsPattern,
    StartsWithPattern,
    EndsWithPattern,
    IContainsPattern,
    IStartsWithPattern,
    IEndsWithPattern,
    NotContainsPattern,
    NotStartsWithPattern,
    NotEndsWithPattern,
    INotContainsPattern,
    INotStartsWithPattern,
    INotEndsWithPattern,
    // null / blank
    IsBlank,
    NotBlank,
    IsNull,
    NotNull,
    // set
    InSet,
    NotInSet,
    // cross-field
    EqualsField,
    NotEqualField,
    IEqualsField,
    INotEqualField,
    GreaterThanField,
    LessThanField,
    GreaterOrEqualField,
    LessOrEqualField,
    ContainsField,
    StartsWithField,
    EndsWithField,
    IContainsField,
    IStartsWithField,
    IEndsWithField,
    NotContainsField,
    NotStartsWithField,
    NotEndsWithField,
    INotContainsField,
    INotStartsWithField,
    INotEndsWithField,
    // regex (unsupported by the SQL compiler)
    Regexp,
    #[serde(rename = "iregexp")]
    IRegexp,
}

/// Structural operator family a field operator reduces to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BaseOperator {
    Equals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Between { inclusive: bool },
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    IsBlank,
    InSet,
    Regexp,
}

/// Decomposition of a field operator into its base family and modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOperatorTraits {
    /// Structural family
    pub base: BaseOperator,
    /// Whether the predicate is negated
    pub negated: bool,
    /// Whether both sides are folded to upper case
    pub case_insensitive: bool,
    /// Whether the value is a wildcard pattern (`*`/`?`) to translate
    pub pattern: bool,
    /// Whether the value names another field instead of a literal
    pub field_comparison: bool,
}

impl CriterionOperator {
    /// Whether this operator combines child criteria.
    pub fn is_logical(&self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Not)
    }

    /// Decompose a field operator. Logical operators return `None`.
    pub fn traits(&self) -> Option<FieldOperatorTraits> {
        use BaseOperator as B;

        let t = |base, negated, case_insensitive, pattern, field_comparison| {
            Some(FieldOperatorTraits {
                base,
                negated,
                case_insensitive,
                pattern,
                field_comparison,
            })
        };

        match self {
            Self::And | Self::Or | Self::Not => None,

            Self::Equals => t(B::Equals, false, false, false, false),
            Self::NotEqual => t(B::Equals, true, false, false, false),
            Self::IEquals => t(B::Equals, false, true, false, false),
            Self::INotEqual => t(B::Equals, true, true, false, false),
            Self::GreaterThan => t(B::GreaterThan, false, false, false, false),
            Self::LessThan => t(B::LessThan, false, false, false, false),
            Self::GreaterOrEqual => t(B::GreaterOrEqual, false, false, false, false),
            Self::LessOrEqual => t(B::LessOrEqual, false, false, false, false),
            Self::Between => t(B::Between { inclusive: false }, false, false, false, false),
            Self::BetweenInclusive => t(B::Between { inclusive: true }, false, false, false, false),
            Self::IBetween => t(B::Between { inclusive: false }, false, true, false, false),
            Self::IBetweenInclusive => t(B::Between { inclusive: true }, false, true, false, false),

            Self::Contains => t(B::Contains, false, false, false, false),
            Self::StartsWith => t(B::StartsWith, false, false, false, false),
            Self::EndsWith => t(B::EndsWith, false, false, false, false),
            Self::IContains => t(B::Contains, false, true, false, false),
            Self::IStartsWith => t(B::StartsWith, false, true, false, false),
            Self::IEndsWith => t(B::EndsWith, false, true, false, false),
            Self::NotContains => t(B::Contains, true, false, false, false),
            Self::NotStartsWith => t(B::StartsWith, true, false, false, false),
            Self::NotEndsWith => t(B::EndsWith, true, false, false, false),
            Self::INotContains => t(B::Contains, true, true, false, false),
            Self::INotStartsWith => t(B::StartsWith, true, true, false, false),
            Self::INotEndsWith => t(B::EndsWith, true, true, false, false),

            Self::MatchesPattern => t(B::Equals, false, false, true, false),
            Self::IMatchesPattern => t(B::Equals, false, true, true, false),
            Self::ContainsPattern => t(B::Contains, false, false, true, false),
            Self::StartsWithPattern => t(B::StartsWith, false, false, true, false),
            Self::EndsWithPattern => t(B::EndsWith, false, false, true, false),
            Self::IContainsPattern => t(B::Contains, false, true, true, false),
            Self::IStartsWithPattern => t(B::StartsWith, false, true, true, false),
            Self::IEndsWithPattern => t(B::EndsWith, false, true, true, false),
            Self::NotContainsPattern => t(B::Contains, true, false, true, false),
            Self::NotStartsWithPattern => t(B::StartsWith, true, false, true, false),
            Self::NotEndsWithPattern => t(B::EndsWith, true, false, true, false),
            Self::INotContainsPattern => t(B::Contains, true, true, true, false),
            Self::INotStartsWithPattern => t(B::StartsWith, true, true, true, false),
            Self::INotEndsWithPattern => t(B::EndsWith, true, true, true, false),

            Self::IsBlank => t(B::IsBlank, false, false, false, false),
            Self::NotBlank => t(B::IsBlank, true, false, false, false),
            Self::IsNull => t(B::IsNull, false, false, false, false),
            Self::NotNull => t(B::IsNull, true, false, false, false),

            Self::InSet => t(B::InSet, false, false, false, false),
            Self::NotInSet => t(B::InSet, true, false, false, false),

            Self::EqualsField => t(B::Equals, false, false, false, true),
            Self::NotEqualField => t(B::Equals, true, false, false, true),
            Self::IEqualsField => t(B::Equals, false, true, false, true),
            Self::INotEqualField => t(B::Equals, true, true, false, true),
            Self::GreaterThanField => t(B::GreaterThan, false, false, false, true),
            Self::LessThanField => t(B::LessThan, false, false, false, true),
            Self::GreaterOrEqualField => t(B::GreaterOrEqual, false, false, false, true),
            Self::LessOrEqualField => t(B::LessOrEqual, false, false, false, true),
            Self::ContainsField => t(B::Contains, false, false, false, true),
            Self::StartsWithField => t(B::StartsWith, false, false, false, true),
            Self::EndsWithField => t(B::EndsWith, false, false, false, true),
            Self::IContainsField => t(B::Contains, false, true, false, true),
            Self::IStartsWithField => t(B::StartsWith, false, true, false, true),
            Self::IEndsWithField => t(B::EndsWith, false, true, false, true),
            Self::NotContainsField => t(B::Contains, true, false, false, true),
            Self::NotStartsWithField => t(B::StartsWith, true, false, false, true),
            Self::NotEndsWithField => t(B::EndsWith, true, false, false, true),
            Self::INotContainsField => t(B::Contains, true, true, false, true),
            Self::INotStartsWithField => t(B::StartsWith, true, true, false, true),
            Self::INotEndsWithField => t(B::EndsWith, true, true, false, true),

            Self::Regexp => t(B::Regexp, false, false, false, false),
            Self::IRegexp => t(B::Regexp, false, true, false, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_wire_names() {
        assert_eq!(
            serde_json::to_string(&CriterionOperator::IEquals).unwrap(),
            "\"iEquals\""
        );
        assert_eq!(
            serde_json::to_string(&CriterionOperator::INotContainsPattern).unwrap(),
            "\"iNotContainsPattern\""
        );
        assert_eq!(
            serde_json::from_str::<CriterionOperator>("\"greaterOrEqual\"").unwrap(),
            CriterionOperator::GreaterOrEqual
        );
        // the case-insensitive regexp operator is all lower case on the wire
        assert_eq!(
            serde_json::from_str::<CriterionOperator>("\"iregexp\"").unwrap(),
            CriterionOperator::IRegexp
        );
    }

    #[test]
    fn test_is_advanced_criteria() {
        assert!(is_advanced_criteria(&json!({
            "_constructor": "AdvancedCriteria",
            "operator": "and",
            "criteria": []
        })));
        assert!(is_advanced_criteria(&json!({
            "operator": "equals", "fieldName": "id", "value": 1
        })));
        assert!(!is_advanced_criteria(&json!({"continent": "Europe"})));
        assert!(!is_advanced_criteria(&json!("x")));
    }

    #[test]
    fn test_criterion_parse() {
        let c = Criterion::from_value(&json!({
            "operator": "not",
            "criteria": [{"operator": "equals", "fieldName": "parent", "value": 42}]
        }))
        .unwrap();
        assert_eq!(c.operator, Some(CriterionOperator::Not));
        assert!(c.criteria.is_some());
    }

    #[test]
    fn test_traits_decomposition() {
        let t = CriterionOperator::INotContainsPattern.traits().unwrap();
        assert_eq!(t.base, BaseOperator::Contains);
        assert!(t.negated && t.case_insensitive && t.pattern);
        assert!(!t.field_comparison);

        let t = CriterionOperator::GreaterThanField.traits().unwrap();
        assert_eq!(t.base, BaseOperator::GreaterThan);
        assert!(t.field_comparison);

        assert!(CriterionOperator::And.traits().is_none());
        assert!(CriterionOperator::And.is_logical());
    }

    #[test]
    fn test_between_inclusive_flag() {
        assert_eq!(
            CriterionOperator::Between.traits().unwrap().base,
            BaseOperator::Between { inclusive: false }
        );
        assert_eq!(
            CriterionOperator::IBetweenInclusive.traits().unwrap().base,
            BaseOperator::Between { inclusive: true }
        );
    }
}
