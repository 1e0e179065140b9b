use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::skill::EntityScope;

const EQ_TOLERANCE: f64 = 1e-9;

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Equal within a small tolerance.
    Eq,
    /// Not equal.
    Ne,
}

impl Comparison {
    /// Applies the operator.
    #[must_use]
    pub fn holds(self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Eq => (left - right).abs() <= EQ_TOLERANCE,
            Self::Ne => (left - right).abs() > EQ_TOLERANCE,
        }
    }

    /// Operator symbol for reason strings.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// How a clause joins the expression built so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connector {
    /// Conjunction (binds tighter than `Or`).
    #[default]
    And,
    /// Disjunction.
    Or,
}

/// Single comparison against a named fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Fact name, e.g. `roas_3d`.
    pub field: String,
    /// Operator.
    pub op: Comparison,
    /// Right-hand value.
    pub value: f64,
}

impl Condition {
    /// Creates a condition.
    #[must_use]
    pub fn new(field: impl Into<String>, op: Comparison, value: f64) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Evaluates against the facts; a missing or non-finite fact is false.
    #[must_use]
    pub fn evaluate(&self, facts: &Facts) -> bool {
        facts
            .get(&self.field)
            .filter(|value| value.is_finite())
            .is_some_and(|value| self.op.holds(value, self.value))
    }
}

/// Condition plus the connector to the previous clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    /// Ignored on the first clause.
    #[serde(default)]
    pub connector: Connector,
    /// Comparison.
    #[serde(flatten)]
    pub condition: Condition,
}

/// Ordered AND/OR condition list. The empty list is true.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionList {
    /// Clauses in declaration order.
    pub clauses: Vec<Clause>,
}

impl ConditionList {
    /// Empty (always true) list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an AND clause.
    #[must_use]
    pub fn and(mut self, condition: Condition) -> Self {
        self.clauses.push(Clause {
            connector: Connector::And,
            condition,
        });
        self
    }

    /// Appends an OR clause.
    #[must_use]
    pub fn or(mut self, condition: Condition) -> Self {
        self.clauses.push(Clause {
            connector: Connector::Or,
            condition,
        });
        self
    }

    /// Whether the list has no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluates the list as a disjunction of AND-groups.
    #[must_use]
    pub fn evaluate(&self, facts: &Facts) -> bool {
        if self.clauses.is_empty() {
            return true;
        }
        let mut any_group = false;
        let mut group = true;
        for (idx, clause) in self.clauses.iter().enumerate() {
            if idx > 0 && clause.connector == Connector::Or {
                any_group |= group;
                group = true;
            }
            group = group && clause.condition.evaluate(facts);
        }
        any_group || group
    }

    /// Human readable rendering, e.g. `roas_3d < 0.2 AND spend_3d >= 50`.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (idx, clause) in self.clauses.iter().enumerate() {
            if idx > 0 {
                out.push_str(match clause.connector {
                    Connector::And => " AND ",
                    Connector::Or => " OR ",
                });
            }
            out.push_str(&format!(
                "{} {} {}",
                clause.condition.field,
                clause.condition.op.symbol(),
                clause.condition.value
            ));
        }
        out
    }
}

/// Entity attributes and numeric facts a skill is matched against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Facts {
    /// Scope attributes.
    pub scope: EntityScope,
    /// Named numeric facts.
    pub values: IndexMap<String, f64>,
}

impl Facts {
    /// Creates facts for a scope with no values.
    #[must_use]
    pub fn new(scope: EntityScope) -> Self {
        Self {
            scope,
            values: IndexMap::new(),
        }
    }

    /// Adds or replaces a fact.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: f64) -> Self {
        self.values.insert(field.into(), value);
        self
    }

    /// Adds or replaces a fact in place.
    pub fn insert(&mut self, field: impl Into<String>, value: f64) {
        self.values.insert(field.into(), value);
    }

    /// Looks up a fact.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> Facts {
        Facts::default()
            .with("roas_3d", 0.15)
            .with("spend_3d", 120.0)
            .with("conversions_3d", 0.0)
    }

    #[test]
    fn empty_list_is_true() {
        assert!(ConditionList::new().evaluate(&facts()));
    }

    #[test]
    fn and_requires_every_clause() {
        let list = ConditionList::new()
            .and(Condition::new("roas_3d", Comparison::Lt, 0.2))
            .and(Condition::new("spend_3d", Comparison::Ge, 50.0));
        assert!(list.evaluate(&facts()));
        let failing = list.and(Condition::new("conversions_3d", Comparison::Gt, 1.0));
        assert!(!failing.evaluate(&facts()));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        // false AND false OR true => true
        let list = ConditionList::new()
            .and(Condition::new("roas_3d", Comparison::Gt, 5.0))
            .and(Condition::new("spend_3d", Comparison::Lt, 1.0))
            .or(Condition::new("conversions_3d", Comparison::Eq, 0.0));
        assert!(list.evaluate(&facts()));
        // true OR true AND false => true (first group already holds)
        let list = ConditionList::new()
            .and(Condition::new("roas_3d", Comparison::Lt, 1.0))
            .or(Condition::new("spend_3d", Comparison::Gt, 1.0))
            .and(Condition::new("conversions_3d", Comparison::Gt, 3.0));
        assert!(list.evaluate(&facts()));
    }

    #[test]
    fn missing_fact_is_false() {
        let list = ConditionList::new().and(Condition::new("ctr", Comparison::Ge, 0.0));
        assert!(!list.evaluate(&facts()));
    }

    #[test]
    fn clauses_deserialize_flat() {
        let list: ConditionList = serde_json::from_str(
            r#"[{"field":"roas_3d","op":"lt","value":0.2},
                {"connector":"or","field":"spend_3d","op":"ge","value":500}]"#,
        )
        .unwrap();
        assert_eq!(list.clauses.len(), 2);
        assert_eq!(list.clauses[1].connector, Connector::Or);
        assert_eq!(list.describe(), "roas_3d < 0.2 OR spend_3d >= 500");
    }
}
