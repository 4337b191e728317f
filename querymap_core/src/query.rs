//! Backend-agnostic query wrapper.
//!
//! A [`Query`] is a list of condition groups: conditions inside a group are
//! AND-ed, groups are OR-ed. Columns are referenced by name; backends validate
//! them against the entity's mapped columns before use.
//!
//! ```
//! use querymap_core::Query;
//!
//! let q = Query::new()
//!     .eq("active", true)
//!     .like_right("name", "An")
//!     .or()
//!     .is_null("email")
//!     .order_by_desc("id")
//!     .limit(10);
//! assert_eq!(q.groups().count(), 2);
//! ```

use std::cmp::Ordering;

use crate::{ParamValue, RepoError, RepoResult};

static NULL: ParamValue = ParamValue::Null;

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Compare {
    pub fn sql(self) -> &'static str {
        match self {
            Compare::Eq => "=",
            Compare::Ne => "<>",
            Compare::Gt => ">",
            Compare::Ge => ">=",
            Compare::Lt => "<",
            Compare::Le => "<=",
        }
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            Compare::Eq => ord == Ordering::Equal,
            Compare::Ne => ord != Ordering::Equal,
            Compare::Gt => ord == Ordering::Greater,
            Compare::Ge => ord != Ordering::Less,
            Compare::Lt => ord == Ordering::Less,
            Compare::Le => ord != Ordering::Greater,
        }
    }
}

/// Where the wildcard goes in a LIKE pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeMode {
    /// `%value%`
    Contains,
    /// `%value` (value is a suffix)
    Left,
    /// `value%` (value is a prefix)
    Right,
}

impl LikeMode {
    pub fn pattern(self, value: &str) -> String {
        match self {
            LikeMode::Contains => format!("%{}%", value),
            LikeMode::Left => format!("%{}", value),
            LikeMode::Right => format!("{}%", value),
        }
    }

    // ASCII case-insensitive, as SQLite's default LIKE.
    fn matches(self, haystack: &str, needle: &str) -> bool {
        let h = haystack.to_ascii_lowercase();
        let n = needle.to_ascii_lowercase();
        match self {
            LikeMode::Contains => h.contains(&n),
            LikeMode::Left => h.ends_with(&n),
            LikeMode::Right => h.starts_with(&n),
        }
    }
}

/// A single restriction on one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        column: String,
        op: Compare,
        value: ParamValue,
    },
    Between {
        column: String,
        low: ParamValue,
        high: ParamValue,
        negated: bool,
    },
    Like {
        column: String,
        value: String,
        mode: LikeMode,
        negated: bool,
    },
    In {
        column: String,
        values: Vec<ParamValue>,
        negated: bool,
    },
    Null {
        column: String,
        negated: bool,
    },
}

impl Condition {
    pub fn column(&self) -> &str {
        match self {
            Condition::Compare { column, .. }
            | Condition::Between { column, .. }
            | Condition::Like { column, .. }
            | Condition::In { column, .. }
            | Condition::Null { column, .. } => column,
        }
    }

    /// Evaluates the condition against a column value with SQL semantics:
    /// anything but a null check is false when the value is `Null`.
    pub fn test(&self, actual: &ParamValue) -> bool {
        match self {
            Condition::Null { negated, .. } => actual.is_null() != *negated,
            Condition::In {
                values, negated, ..
            } if values.is_empty() => *negated,
            _ if actual.is_null() => false,
            Condition::Compare { op, value, .. } => {
                if value.is_null() {
                    return false;
                }
                match actual.compare(value) {
                    Some(ord) => op.holds(ord),
                    None => *op == Compare::Ne,
                }
            }
            Condition::Between {
                low, high, negated, ..
            } => {
                match (actual.compare(low), actual.compare(high)) {
                    (Some(lo), Some(hi)) => {
                        let inside = lo != Ordering::Less && hi != Ordering::Greater;
                        inside != *negated
                    }
                    _ => false,
                }
            }
            Condition::Like {
                value,
                mode,
                negated,
                ..
            } => mode.matches(&actual.to_string(), value) != *negated,
            Condition::In {
                values, negated, ..
            } => {
                let found = values
                    .iter()
                    .any(|v| actual.compare(v) == Some(Ordering::Equal));
                found != *negated
            }
        }
    }
}

/// Sort key for query results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Safety checks a single query opts out of.
///
/// Everything is enforced by default. A query that must touch the whole table
/// says so explicitly:
///
/// ```
/// use querymap_core::{IgnoreStrategy, Query};
///
/// let wipe = Query::new().ignore(IgnoreStrategy::new().block_attack(true));
/// assert!(wipe.check_block_attack().is_ok());
/// assert!(Query::new().check_block_attack().is_err());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IgnoreStrategy {
    block_attack: bool,
}

impl IgnoreStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow deletes without any condition.
    pub fn block_attack(mut self, ignore: bool) -> Self {
        self.block_attack = ignore;
        self
    }

    pub fn ignores_block_attack(&self) -> bool {
        self.block_attack
    }
}

/// Query wrapper: condition groups plus ordering and an optional window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    groups: Vec<Vec<Condition>>,
    order_by: Vec<Order>,
    limit: Option<usize>,
    offset: Option<usize>,
    ignore: IgnoreStrategy,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a condition to the current AND group.
    pub fn push(mut self, condition: Condition) -> Self {
        match self.groups.last_mut() {
            Some(group) => group.push(condition),
            None => self.groups.push(vec![condition]),
        }
        self
    }

    /// Start a new group; subsequent conditions are OR-ed with the previous ones.
    pub fn or(mut self) -> Self {
        if self.groups.last().map_or(false, |g| !g.is_empty()) {
            self.groups.push(Vec::new());
        }
        self
    }

    /// Apply `f` only when `condition` holds.
    pub fn when(self, condition: bool, f: impl FnOnce(Self) -> Self) -> Self {
        if condition {
            f(self)
        } else {
            self
        }
    }

    fn compare(self, column: impl Into<String>, op: Compare, value: impl Into<ParamValue>) -> Self {
        self.push(Condition::Compare {
            column: column.into(),
            op,
            value: value.into(),
        })
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.compare(column, Compare::Eq, value)
    }

    pub fn ne(self, column: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.compare(column, Compare::Ne, value)
    }

    pub fn gt(self, column: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.compare(column, Compare::Gt, value)
    }

    pub fn ge(self, column: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.compare(column, Compare::Ge, value)
    }

    pub fn lt(self, column: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.compare(column, Compare::Lt, value)
    }

    pub fn le(self, column: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.compare(column, Compare::Le, value)
    }

    /// Equality on every pair; a `Null` value becomes an `IS NULL` check.
    pub fn all_eq<I, K, V>(self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        self.all_eq_with(|_, _| true, pairs, true)
    }

    /// Equality on the pairs `filter` accepts.
    ///
    /// A `Null` value becomes `IS NULL` when `null_to_is_null` is set and is
    /// dropped otherwise.
    pub fn all_eq_with<F, I, K, V>(self, filter: F, pairs: I, null_to_is_null: bool) -> Self
    where
        F: Fn(&str, &ParamValue) -> bool,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        pairs.into_iter().fold(self, |q, (k, v)| {
            let (k, v) = (k.into(), v.into());
            if !filter(&k, &v) {
                q
            } else if v.is_null() {
                if null_to_is_null {
                    q.is_null(k)
                } else {
                    q
                }
            } else {
                q.eq(k, v)
            }
        })
    }

    fn between_impl(
        self,
        column: impl Into<String>,
        low: impl Into<ParamValue>,
        high: impl Into<ParamValue>,
        negated: bool,
    ) -> Self {
        self.push(Condition::Between {
            column: column.into(),
            low: low.into(),
            high: high.into(),
            negated,
        })
    }

    pub fn between(
        self,
        column: impl Into<String>,
        low: impl Into<ParamValue>,
        high: impl Into<ParamValue>,
    ) -> Self {
        self.between_impl(column, low, high, false)
    }

    pub fn not_between(
        self,
        column: impl Into<String>,
        low: impl Into<ParamValue>,
        high: impl Into<ParamValue>,
    ) -> Self {
        self.between_impl(column, low, high, true)
    }

    fn like_impl(
        self,
        column: impl Into<String>,
        value: impl Into<String>,
        mode: LikeMode,
        negated: bool,
    ) -> Self {
        self.push(Condition::Like {
            column: column.into(),
            value: value.into(),
            mode,
            negated,
        })
    }

    /// `column LIKE '%value%'`
    pub fn like(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.like_impl(column, value, LikeMode::Contains, false)
    }

    pub fn not_like(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.like_impl(column, value, LikeMode::Contains, true)
    }

    /// `column LIKE '%value'`
    pub fn like_left(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.like_impl(column, value, LikeMode::Left, false)
    }

    pub fn not_like_left(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.like_impl(column, value, LikeMode::Left, true)
    }

    /// `column LIKE 'value%'`
    pub fn like_right(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.like_impl(column, value, LikeMode::Right, false)
    }

    pub fn not_like_right(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.like_impl(column, value, LikeMode::Right, true)
    }

    pub fn in_list<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        self.push(Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        })
    }

    pub fn not_in_list<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        self.push(Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        })
    }

    pub fn is_null(self, column: impl Into<String>) -> Self {
        self.push(Condition::Null {
            column: column.into(),
            negated: false,
        })
    }

    pub fn is_not_null(self, column: impl Into<String>) -> Self {
        self.push(Condition::Null {
            column: column.into(),
            negated: true,
        })
    }

    pub fn order_by_asc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(Order {
            column: column.into(),
            ascending: true,
        });
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(Order {
            column: column.into(),
            ascending: false,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.offset = Some(n);
        self
    }

    /// Non-empty condition groups, in the order they were built.
    pub fn groups(&self) -> impl Iterator<Item = &[Condition]> {
        self.groups
            .iter()
            .filter(|g| !g.is_empty())
            .map(Vec::as_slice)
    }

    pub fn order(&self) -> &[Order] {
        &self.order_by
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<usize> {
        self.offset
    }

    /// True when the query places no restriction on rows.
    pub fn is_unconditional(&self) -> bool {
        self.groups().next().is_none()
    }

    pub fn ignore(mut self, strategy: IgnoreStrategy) -> Self {
        self.ignore = strategy;
        self
    }

    pub fn ignore_strategy(&self) -> IgnoreStrategy {
        self.ignore
    }

    /// Refuse to use this query for a delete that would hit every row,
    /// unless its [`IgnoreStrategy`] allows it.
    pub fn check_block_attack(&self) -> RepoResult<()> {
        if self.is_unconditional() && !self.ignore.ignores_block_attack() {
            return Err(RepoError::BlockAttack);
        }
        Ok(())
    }

    /// Every column referenced by conditions or ordering.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flatten()
            .map(Condition::column)
            .chain(self.order_by.iter().map(|o| o.column.as_str()))
    }

    /// Reject columns that are not in `known`.
    pub fn validate(&self, known: &[&str]) -> RepoResult<()> {
        match self.columns().find(|c| !known.contains(c)) {
            Some(unknown) => Err(RepoError::UnknownColumn(unknown.to_string())),
            None => Ok(()),
        }
    }

    /// Evaluate the conditions in memory. Columns that `lookup` cannot resolve
    /// are treated as `Null`.
    pub fn matches<'a, F>(&self, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<&'a ParamValue>,
    {
        let mut groups = self.groups().peekable();
        if groups.peek().is_none() {
            return true;
        }
        groups.any(|group| {
            group.iter().all(|cond| {
                let value = lookup(cond.column()).unwrap_or(&NULL);
                cond.test(value)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lookup_from<'a>(
        row: &'a [(&'static str, ParamValue)],
    ) -> impl Fn(&str) -> Option<&'a ParamValue> {
        move |col: &str| row.iter().find(|(c, _)| *c == col).map(|(_, v)| v)
    }

    fn ann() -> Vec<(&'static str, ParamValue)> {
        vec![
            ("id", ParamValue::I64(1)),
            ("name", ParamValue::String("Ann".into())),
            ("age", ParamValue::I32(30)),
            ("email", ParamValue::Null),
        ]
    }

    #[test]
    fn empty_query_matches_everything() {
        let row = ann();
        assert!(Query::new().matches(lookup_from(&row)));
        assert!(Query::new().or().or().matches(lookup_from(&row)));
        assert!(Query::new().is_unconditional());
    }

    #[test]
    fn comparisons() {
        let row = ann();
        let m = |q: Query| q.matches(lookup_from(&row));
        assert!(m(Query::new().eq("id", 1i64)));
        assert!(m(Query::new().eq("id", 1i32)));
        assert!(!m(Query::new().eq("id", 2i64)));
        assert!(m(Query::new().ne("name", "Bob")));
        assert!(m(Query::new().gt("age", 29)));
        assert!(m(Query::new().ge("age", 30)));
        assert!(!m(Query::new().lt("age", 30)));
        assert!(m(Query::new().le("age", 30)));
        assert!(m(Query::new().between("age", 18, 30)));
        assert!(!m(Query::new().not_between("age", 18, 30)));
    }

    #[test]
    fn null_never_compares_equal() {
        let row = ann();
        let m = |q: Query| q.matches(lookup_from(&row));
        assert!(!m(Query::new().eq("email", ParamValue::Null)));
        assert!(!m(Query::new().ne("email", "x")));
        assert!(m(Query::new().is_null("email")));
        assert!(!m(Query::new().is_not_null("email")));
        // Unresolvable columns read as Null.
        assert!(m(Query::new().is_null("missing")));
    }

    #[test]
    fn like_modes_are_case_insensitive() {
        let row = ann();
        let m = |q: Query| q.matches(lookup_from(&row));
        assert!(m(Query::new().like("name", "N")));
        assert!(m(Query::new().like_left("name", "nn")));
        assert!(m(Query::new().like_right("name", "an")));
        assert!(!m(Query::new().like_right("name", "nn")));
        assert!(m(Query::new().not_like("name", "z")));
        assert!(!m(Query::new().not_like_left("name", "N")));
        assert!(m(Query::new().not_like_right("name", "B")));
        assert_eq!(LikeMode::Contains.pattern("a"), "%a%");
        assert_eq!(LikeMode::Left.pattern("a"), "%a");
        assert_eq!(LikeMode::Right.pattern("a"), "a%");
    }

    #[test]
    fn in_lists_including_empty() {
        let row = ann();
        let m = |q: Query| q.matches(lookup_from(&row));
        assert!(m(Query::new().in_list("id", [3i64, 1])));
        assert!(!m(Query::new().not_in_list("id", [1i64])));
        assert!(!m(Query::new().in_list("id", Vec::<i64>::new())));
        assert!(m(Query::new().not_in_list("id", Vec::<i64>::new())));
    }

    #[test]
    fn groups_are_or_of_ands() {
        let row = ann();
        let m = |q: Query| q.matches(lookup_from(&row));
        assert!(!m(Query::new().eq("id", 1i64).eq("name", "Bob")));
        assert!(m(Query::new().eq("name", "Bob").or().eq("id", 1i64)));
        let q = Query::new().eq("a", 1).or().or().eq("b", 2);
        assert_eq!(q.groups().count(), 2);
    }

    #[test]
    fn when_and_all_eq() {
        let q = Query::new()
            .when(false, |q| q.eq("skipped", 1))
            .when(true, |q| q.eq("kept", 1));
        assert_eq!(q.columns().collect::<Vec<_>>(), vec!["kept"]);

        let row = ann();
        let q = Query::new().all_eq([("id", ParamValue::I64(1)), ("email", ParamValue::Null)]);
        assert!(q.matches(lookup_from(&row)));
        assert!(matches!(
            q.groups().next().unwrap()[1],
            Condition::Null { negated: false, .. }
        ));
    }

    #[test]
    fn all_eq_with_can_skip_nulls_and_filter_pairs() {
        let pairs = || {
            vec![
                ("id", ParamValue::I64(1)),
                ("name", ParamValue::String("Ann".into())),
                ("email", ParamValue::Null),
            ]
        };

        let skip_nulls = Query::new().all_eq_with(|_, _| true, pairs(), false);
        assert_eq!(skip_nulls.columns().collect::<Vec<_>>(), vec!["id", "name"]);

        let keep_nulls = Query::new().all_eq_with(|_, _| true, pairs(), true);
        assert_eq!(keep_nulls, Query::new().all_eq(pairs()));

        let only_name = Query::new().all_eq_with(|col, _| col == "name", pairs(), true);
        assert_eq!(only_name, Query::new().eq("name", "Ann"));

        let non_null = Query::new().all_eq_with(|_, v| !v.is_null(), pairs(), true);
        assert_eq!(non_null.columns().count(), 2);

        // Filtering everything out leaves an unconditional query.
        assert!(Query::new()
            .all_eq_with(|_, _| false, pairs(), true)
            .is_unconditional());
    }

    #[test]
    fn unconditional_queries_are_blocked_unless_ignored() {
        let err = Query::new().check_block_attack().unwrap_err();
        assert!(matches!(err, RepoError::BlockAttack));
        assert!(Query::new().or().check_block_attack().is_err());
        assert!(Query::new().eq("id", 1).check_block_attack().is_ok());

        let ignored = Query::new().ignore(IgnoreStrategy::new().block_attack(true));
        assert!(ignored.ignore_strategy().ignores_block_attack());
        assert!(ignored.check_block_attack().is_ok());
        assert!(!IgnoreStrategy::default().ignores_block_attack());
    }

    #[test]
    fn validate_checks_conditions_and_ordering() {
        let known = ["id", "name"];
        assert!(Query::new().eq("id", 1).order_by_asc("name").validate(&known).is_ok());
        let err = Query::new().eq("id", 1).order_by_desc("nope").validate(&known).unwrap_err();
        assert!(matches!(err, RepoError::UnknownColumn(c) if c == "nope"));
        let err = Query::new().like("bad; DROP", "x").validate(&known).unwrap_err();
        assert!(matches!(err, RepoError::UnknownColumn(_)));
    }

    #[test]
    fn window_accessors() {
        let q = Query::new().limit(5).offset(10).order_by_desc("id");
        assert_eq!(q.limit_value(), Some(5));
        assert_eq!(q.offset_value(), Some(10));
        assert_eq!(
            q.order(),
            &[Order {
                column: "id".into(),
                ascending: false
            }]
        );
        assert_eq!(Compare::Ne.sql(), "<>");
    }

    proptest! {
        // eq and ne partition non-null integer rows.
        #[test]
        fn eq_and_ne_are_complementary(actual in any::<i64>(), probe in any::<i64>()) {
            let row = vec![("v", ParamValue::I64(actual))];
            let eq = Query::new().eq("v", probe).matches(lookup_from(&row));
            let ne = Query::new().ne("v", probe).matches(lookup_from(&row));
            prop_assert!(eq != ne);
            prop_assert_eq!(eq, actual == probe);
        }

        // between is inclusive on both ends and agrees with ge + le.
        #[test]
        fn between_matches_ge_and_le(actual in -50i32..50, lo in -50i32..50, hi in -50i32..50) {
            let row = vec![("v", ParamValue::I32(actual))];
            let between = Query::new().between("v", lo, hi).matches(lookup_from(&row));
            let both = Query::new().ge("v", lo).le("v", hi).matches(lookup_from(&row));
            prop_assert_eq!(between, both);
        }
    }
}
