//! Filter conditions, ordering and paging.

use crate::pattern::matches_like;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Comparison operators usable in criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "LIKE")]
    Like,
}

impl Operator {
    /// Get the SQL representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "IN",
            Operator::Like => "LIKE",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a condition joins the conditions before it.
///
/// Combinators apply strictly left to right with no precedence between
/// AND and OR: `a OR b AND c` means `(a OR b) AND c`. Compiled SQL wraps
/// the running condition in parentheses to keep that meaning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

impl Combinator {
    pub const fn as_str(self) -> &'static str {
        match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
        }
    }
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    List(Vec<Value>),
    Single(Value),
}

impl Operand {
    /// The values this operand binds, in order.
    pub fn values(&self) -> &[Value] {
        match self {
            Operand::Single(v) => std::slice::from_ref(v),
            Operand::List(vs) => vs,
        }
    }
}

/// A single filter condition on an attribute of a type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    pub type_name: String,
    pub attribute: String,
    pub operator: Operator,
    pub operand: Operand,
    #[serde(default)]
    pub combinator: Combinator,
}

impl Criteria {
    /// Create a condition combined with AND.
    pub fn new(
        type_name: impl Into<String>,
        attribute: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            attribute: attribute.into(),
            operator,
            operand: Operand::Single(value.into()),
            combinator: Combinator::And,
        }
    }

    /// `attribute = value`
    pub fn equal(type_name: impl Into<String>, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(type_name, attribute, Operator::Eq, value)
    }

    /// `attribute IN (values)`
    pub fn is_in(type_name: impl Into<String>, attribute: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            type_name: type_name.into(),
            attribute: attribute.into(),
            operator: Operator::In,
            operand: Operand::List(values),
            combinator: Combinator::And,
        }
    }

    /// `attribute LIKE pattern`
    pub fn like(type_name: impl Into<String>, attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(type_name, attribute, Operator::Like, Value::Text(pattern.into()))
    }

    /// Combine with the preceding conditions using OR.
    ///
    /// Everything before this condition is grouped first; see [`Combinator`].
    #[must_use]
    pub fn or(mut self) -> Self {
        self.combinator = Combinator::Or;
        self
    }

    /// Shape identity: everything except the bound values.
    ///
    /// IN conditions include their arity and NULL comparisons are marked,
    /// since both change the compiled SQL.
    pub fn id(&self) -> String {
        match &self.operand {
            Operand::List(values) => format!(
                "{} {}.{} {} ({})",
                self.combinator.as_str(),
                self.type_name,
                self.attribute,
                self.operator,
                values.len()
            ),
            Operand::Single(value) => format!(
                "{} {}.{} {}{}",
                self.combinator.as_str(),
                self.type_name,
                self.attribute,
                self.operator,
                if value.is_null() { " NULL" } else { "" }
            ),
        }
    }

    /// Evaluate this condition against an in-memory attribute value.
    pub fn matches(&self, actual: &Value) -> bool {
        let values = self.operand.values();
        match self.operator {
            Operator::In => values.iter().any(|v| actual.sql_eq(v)),
            Operator::Like => match (actual, values.first()) {
                (Value::Null, _) | (_, None | Some(Value::Null)) => false,
                (a, Some(p)) => matches_like(&a.to_string(), &p.to_string()),
            },
            op => {
                let Some(expected) = values.first() else {
                    return false;
                };
                let Some(ord) = actual.compare(expected) else {
                    return false;
                };
                match op {
                    Operator::Eq => ord == Ordering::Equal,
                    Operator::Ne => ord != Ordering::Equal,
                    Operator::Lt => ord == Ordering::Less,
                    Operator::Le => ord != Ordering::Greater,
                    Operator::Gt => ord == Ordering::Greater,
                    Operator::Ge => ord != Ordering::Less,
                    Operator::In | Operator::Like => false,
                }
            }
        }
    }

    /// Evaluate a list of conditions left to right with their combinators.
    ///
    /// `lookup` supplies the attribute value for each condition. An empty list matches.
    pub fn matches_all<'a, F>(criteria: &[Criteria], mut lookup: F) -> bool
    where
        F: FnMut(&Criteria) -> Option<&'a Value>,
    {
        let mut iter = criteria.iter();
        let Some(first) = iter.next() else {
            return true;
        };
        let eval = |c: &Criteria, lookup: &mut F| lookup(c).is_some_and(|v| c.matches(v));
        let mut result = eval(first, &mut lookup);
        for c in iter {
            result = match c.combinator {
                Combinator::And => result && eval(c, &mut lookup),
                Combinator::Or => result || eval(c, &mut lookup),
            };
        }
        result
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    pub const fn is_desc(self) -> bool {
        matches!(self, SortDirection::Desc)
    }

    /// +1 for ascending, -1 for descending.
    pub const fn sign(self) -> f64 {
        match self {
            SortDirection::Asc => 1.0,
            SortDirection::Desc => -1.0,
        }
    }
}

/// Ordering by one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub attribute: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Desc,
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.attribute, self.direction.as_str())
    }
}

/// Page size and offset of a paged select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingInfo {
    pub page_size: usize,
    #[serde(default)]
    pub offset: usize,
}

impl PagingInfo {
    pub fn new(page_size: usize) -> Self {
        Self { page_size, offset: 0 }
    }

    /// Paging for the zero-based page `index`.
    pub fn page(page_size: usize, index: usize) -> Self {
        Self {
            page_size,
            offset: page_size * index,
        }
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}
