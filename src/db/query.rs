use std::cmp::Ordering;

use chrono::DateTime;

use serde_json::Value;

/// Schema holding the shared (non-tenant) tables.
pub const SHARED_SCHEMA: &str = "public";

/// A `{schema}.{table}` address. Ordered by schema, then table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn shared(table: &str) -> Self {
        Self {
            schema: SHARED_SCHEMA.into(),
            table: table.into(),
        }
    }

    pub fn in_schema(schema: &str, table: &str) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn is_shared(&self) -> bool {
        self.schema == SHARED_SCHEMA
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn matches(&self, row: &Value) -> bool {
        let actual = row.get(&self.column).unwrap_or(&Value::Null);
        let ord = compare(actual, &self.value);
        match self.op {
            FilterOp::Eq => ord == Some(Ordering::Equal),
            FilterOp::Neq => ord != Some(Ordering::Equal),
            FilterOp::Gt => ord == Some(Ordering::Greater),
            FilterOp::Gte => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
            FilterOp::Lt => ord == Some(Ordering::Less),
            FilterOp::Lte => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// A select/update/delete target: table plus filters, ordering and limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub target: TableRef,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(target: TableRef) -> Self {
        Self {
            target,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    /// Query on a shared-schema table.
    pub fn table(table: &str) -> Self {
        Self::new(TableRef::shared(table))
    }

    pub fn filter(mut self, column: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Eq, value)
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Neq, value)
    }

    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gt, value)
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gte, value)
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lt, value)
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lte, value)
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> Self {
        self.order.push(OrderBy {
            column: column.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// REST query-string pairs: `select`, one `col=op.value` per filter,
    /// `order` and `limit`.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        for f in &self.filters {
            params.push((f.column.clone(), format!("{}.{}", f.op.as_str(), literal(&f.value))));
        }
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.descending { "desc" } else { "asc" }))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".into(), order));
        }
        if let Some(n) = self.limit {
            params.push(("limit".into(), n.to_string()));
        }
        params
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Evaluates the query against in-memory rows.
    pub fn apply<'a>(&self, rows: impl IntoIterator<Item = &'a Value>) -> Vec<Value> {
        let mut out: Vec<Value> = rows.into_iter().filter(|r| self.matches(r)).cloned().collect();
        if !self.order.is_empty() {
            out.sort_by(|a, b| {
                for o in &self.order {
                    let left = a.get(&o.column).unwrap_or(&Value::Null);
                    let right = b.get(&o.column).unwrap_or(&Value::Null);
                    let ord = compare(left, right).unwrap_or(Ordering::Equal);
                    let ord = if o.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        if let Some(n) = self.limit {
            out.truncate(n);
        }
        out
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Orders JSON scalars the way the backend orders their column types.
/// Timestamps compare as instants whatever their fractional precision.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(a), Ok(b)) => Some(a.cmp(&b)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::Number(y)) => x.parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        (Value::Number(x), Value::String(y)) => x.as_f64()?.partial_cmp(&y.parse::<f64>().ok()?),
        (Value::String(x), Value::Bool(y)) | (Value::Bool(y), Value::String(x)) => {
            (x.parse::<bool>().ok()? == *y).then_some(Ordering::Equal)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    #[test]
    fn table_refs_order_by_schema_then_table() {
        let refs: BTreeSet<TableRef> = [
            TableRef::in_schema("trainer_b", "players"),
            TableRef::in_schema("trainer_a", "homework"),
            TableRef::shared("trainers"),
            TableRef::in_schema("trainer_a", "exercises"),
        ]
        .into_iter()
        .collect();
        let ordered: Vec<String> = refs.iter().map(ToString::to_string).collect();
        assert_eq!(
            ordered,
            [
                "public.trainers",
                "trainer_a.exercises",
                "trainer_a.homework",
                "trainer_b.players"
            ]
        );
    }

    #[test]
    fn renders_rest_params() {
        let q = Query::table("ads")
            .eq("slot", "home_banner")
            .lte("starts_at", "2026-01-01T00:00:00Z")
            .eq("is_active", true)
            .order_by("created_at", true)
            .limit(1);

        assert_eq!(
            q.to_params(),
            vec![
                ("select".to_string(), "*".to_string()),
                ("slot".to_string(), "eq.home_banner".to_string()),
                ("starts_at".to_string(), "lte.2026-01-01T00:00:00Z".to_string()),
                ("is_active".to_string(), "eq.true".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn applies_filters_order_and_limit() {
        let rows = vec![
            json!({ "name": "a", "age": 12, "created_at": "2026-01-01T00:00:00Z" }),
            json!({ "name": "b", "age": 15, "created_at": "2026-03-01T00:00:00Z" }),
            json!({ "name": "c", "age": 17, "created_at": "2026-02-01T00:00:00Z" }),
        ];
        let q = Query::table("players").gte("age", 13).order_by("created_at", true).limit(5);
        let names: Vec<_> = q.apply(&rows).iter().map(|r| r["name"].clone()).collect();
        assert_eq!(names, vec![json!("b"), json!("c")]);
    }

    #[test]
    fn timestamps_order_by_instant() {
        let rows = vec![
            json!({ "n": 1, "created_at": "2026-01-01T12:00:00.123Z" }),
            json!({ "n": 2, "created_at": "2026-01-01T12:00:00.123456Z" }),
        ];
        let q = Query::table("t").order_by("created_at", true);
        assert_eq!(q.apply(&rows)[0]["n"], 2);
    }

    #[test]
    fn missing_column_only_matches_null() {
        let row = json!({ "name": "a" });
        assert!(Query::table("t").eq("deleted_at", Value::Null).matches(&row));
        assert!(!Query::table("t").eq("deleted_at", "x").matches(&row));
    }
}
