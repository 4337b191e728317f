#![forbid(unsafe_code)]
#![allow(unexpected_cfgs)]
//! Minimal SQL builder helpers that leverage metadata from `#[derive(Entity)]`
//! and render [`querymap_core::Query`] wrappers into parameterised statements.
//!
//! Feature flags select placeholder style:
//! - `postgres`: $1, $2, ...
//! - `libsql`: ?
//!
//! Default (no feature): ?

use querymap_core::{Condition, Fetchable, ParamValue, Query, RepoResult};

/// Placeholder representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Dollar,   // $1, $2, ...
    Question, // ?
}

fn placeholder_style() -> Placeholder {
    #[cfg(feature = "postgres")]
    return Placeholder::Dollar;

    #[cfg(not(feature = "postgres"))]
    return Placeholder::Question;
}

fn first_placeholder(ph: Placeholder) -> &'static str {
    match ph {
        Placeholder::Dollar => "$1",
        Placeholder::Question => "?",
    }
}

fn placeholder_n(ph: Placeholder, n: usize) -> String {
    match ph {
        Placeholder::Dollar => format!("${}", n),
        Placeholder::Question => "?".to_string(),
    }
}

/// Build a simple SELECT ... WHERE id = <ph> statement using metadata from `E`.
pub fn select_by_id<E>(id_column: &str) -> String
where
    E: Fetchable,
{
    let cols = E::SELECT_COLUMNS.join(", ");
    let table = E::TABLE;
    let ph = first_placeholder(placeholder_style());
    format!(
        "SELECT {cols} FROM {table} WHERE {id} = {ph}",
        cols = cols,
        table = table,
        id = id_column,
        ph = ph
    )
}

/// Build DELETE ... WHERE id = <ph>
pub fn delete_by_id<E>(id_column: &str) -> String
where
    E: Fetchable,
{
    let table = E::TABLE;
    let ph = first_placeholder(placeholder_style());
    format!(
        "DELETE FROM {table} WHERE {id} = {ph}",
        table = table,
        id = id_column,
        ph = ph
    )
}

/// Build INSERT INTO <table> (<cols>) VALUES (<placeholders>)
/// When feature `postgres` or `libsql_returning` is enabled, this appends `RETURNING <id_column>`.
pub fn insert<E>(id_column: &str) -> String
where
    E: Fetchable + querymap_core::Insertable,
{
    let cols = E::INSERT_COLUMNS;
    let style = placeholder_style();
    let phs: Vec<String> = (1..=cols.len()).map(|i| placeholder_n(style, i)).collect();
    #[allow(unused_mut)]
    let mut sql = format!(
        "INSERT INTO {table} ({cols}) VALUES ({vals})",
        table = E::TABLE,
        cols = cols.join(", "),
        vals = phs.join(", ")
    );

    #[cfg(any(feature = "postgres", feature = "libsql_returning"))]
    {
        sql.push_str(" RETURNING ");
        sql.push_str(id_column);
    }
    #[cfg(not(any(feature = "postgres", feature = "libsql_returning")))]
    let _ = id_column; // silence unused parameter when not returning

    sql
}

/// Build UPDATE <table> SET <col1>=<ph1>, ... WHERE <id>=<phN>
pub fn update_by_id<E>(id_column: &str) -> String
where
    E: Fetchable + querymap_core::Updatable,
{
    let cols = E::UPDATE_COLUMNS;
    let table = E::TABLE;
    let style = placeholder_style();

    let mut assignments = Vec::with_capacity(cols.len());
    for (i, col) in cols.iter().enumerate() {
        let ph = placeholder_n(style, i + 1);
        assignments.push(format!("{col} = {ph}", col = col, ph = ph));
    }
    let where_ph = placeholder_n(style, cols.len() + 1);

    format!(
        "UPDATE {table} SET {set_clause} WHERE {id} = {where_ph}",
        table = table,
        set_clause = assignments.join(", "),
        id = id_column,
        where_ph = where_ph
    )
}

/// Build SELECT <cols> FROM <table>
pub fn select_all<E>() -> String
where
    E: Fetchable,
{
    let cols = E::SELECT_COLUMNS.join(", ");
    let table = E::TABLE;
    format!("SELECT {cols} FROM {table}", cols = cols, table = table)
}

/// Collects bound parameters and hands out matching placeholders.
struct Binder {
    style: Placeholder,
    params: Vec<ParamValue>,
}

impl Binder {
    fn bind(&mut self, value: ParamValue) -> String {
        self.params.push(value);
        placeholder_n(self.style, self.params.len())
    }
}

fn not(negated: bool) -> &'static str {
    if negated {
        "NOT "
    } else {
        ""
    }
}

fn render_condition(cond: &Condition, binder: &mut Binder) -> String {
    match cond {
        Condition::Compare { column, op, value } => {
            let ph = binder.bind(value.clone());
            format!("{} {} {}", column, op.sql(), ph)
        }
        Condition::Between {
            column,
            low,
            high,
            negated,
        } => {
            let lo = binder.bind(low.clone());
            let hi = binder.bind(high.clone());
            format!("{} {}BETWEEN {} AND {}", column, not(*negated), lo, hi)
        }
        Condition::Like {
            column,
            value,
            mode,
            negated,
        } => {
            let ph = binder.bind(ParamValue::String(mode.pattern(value)));
            format!("{} {}LIKE {}", column, not(*negated), ph)
        }
        // IN () is not valid SQL; an empty list is a constant predicate.
        Condition::In {
            values, negated, ..
        } if values.is_empty() => {
            if *negated {
                "1 = 1".to_string()
            } else {
                "1 = 0".to_string()
            }
        }
        Condition::In {
            column,
            values,
            negated,
        } => {
            let phs: Vec<String> = values.iter().map(|v| binder.bind(v.clone())).collect();
            format!("{} {}IN ({})", column, not(*negated), phs.join(", "))
        }
        Condition::Null { column, negated } => {
            format!("{} IS {}NULL", column, not(*negated))
        }
    }
}

/// Render the WHERE clause of `query`.
///
/// A single group renders as `WHERE a = ? AND b = ?`; several groups render as
/// `WHERE (a = ?) OR (b = ? AND c = ?)`. Returns an empty string when the query
/// has no conditions. Columns are not validated here.
pub fn render_where(query: &Query) -> (String, Vec<ParamValue>) {
    let mut binder = Binder {
        style: placeholder_style(),
        params: Vec::new(),
    };
    let rendered: Vec<String> = query
        .groups()
        .map(|group| {
            group
                .iter()
                .map(|c| render_condition(c, &mut binder))
                .collect::<Vec<_>>()
                .join(" AND ")
        })
        .collect();

    let sql = match rendered.len() {
        0 => String::new(),
        1 => format!("WHERE {}", rendered[0]),
        _ => {
            let groups: Vec<String> = rendered.iter().map(|g| format!("({})", g)).collect();
            format!("WHERE {}", groups.join(" OR "))
        }
    };
    (sql, binder.params)
}

fn push_where(sql: &mut String, where_sql: &str) {
    if !where_sql.is_empty() {
        sql.push(' ');
        sql.push_str(where_sql);
    }
}

/// LIMIT/OFFSET literals are signed 64-bit in SQL; larger values are clamped.
fn sql_window_value(n: usize) -> u64 {
    (n as u64).min(i64::MAX as u64)
}

/// Build SELECT <cols> FROM <table> [WHERE ...] [ORDER BY ...] [LIMIT n] [OFFSET m]
///
/// Every referenced column must be one of `E::SELECT_COLUMNS`.
pub fn select_query<E>(query: &Query) -> RepoResult<(String, Vec<ParamValue>)>
where
    E: Fetchable,
{
    query.validate(E::SELECT_COLUMNS)?;
    let (where_sql, params) = render_where(query);
    let mut sql = select_all::<E>();
    push_where(&mut sql, &where_sql);

    if !query.order().is_empty() {
        let keys: Vec<String> = query
            .order()
            .iter()
            .map(|o| format!("{} {}", o.column, if o.ascending { "ASC" } else { "DESC" }))
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));
    }

    match (
        query.limit_value().map(sql_window_value),
        query.offset_value().map(sql_window_value),
    ) {
        (Some(l), Some(off)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", l, off)),
        (Some(l), None) => sql.push_str(&format!(" LIMIT {}", l)),
        // `?` dialects (SQLite, MySQL) do not accept OFFSET without LIMIT.
        (None, Some(off)) => match placeholder_style() {
            Placeholder::Question => sql.push_str(&format!(" LIMIT -1 OFFSET {}", off)),
            Placeholder::Dollar => sql.push_str(&format!(" OFFSET {}", off)),
        },
        (None, None) => {}
    }
    Ok((sql, params))
}

/// Build SELECT COUNT(*) FROM <table> [WHERE ...]
pub fn count_query<E>(query: &Query) -> RepoResult<(String, Vec<ParamValue>)>
where
    E: Fetchable,
{
    query.validate(E::SELECT_COLUMNS)?;
    let (where_sql, params) = render_where(query);
    let mut sql = format!("SELECT COUNT(*) FROM {}", E::TABLE);
    push_where(&mut sql, &where_sql);
    Ok((sql, params))
}

/// Build DELETE FROM <table> [WHERE ...]
///
/// A query without conditions is rejected with `RepoError::BlockAttack`
/// unless its ignore strategy allows a full-table delete.
pub fn delete_query<E>(query: &Query) -> RepoResult<(String, Vec<ParamValue>)>
where
    E: Fetchable,
{
    query.validate(E::SELECT_COLUMNS)?;
    query.check_block_attack()?;
    let (where_sql, params) = render_where(query);
    let mut sql = format!("DELETE FROM {}", E::TABLE);
    push_where(&mut sql, &where_sql);
    Ok((sql, params))
}
