use sea_orm::sea_query::{Alias, Expr, Func, SimpleExpr};

use caddie_core::db::{ColumnDef, ColumnType, Dialect, NumericMode, Stored, TableDef};
use caddie_core::filter::{Condition, Operator};
use caddie_core::{Result, StoreError, Value};

fn always() -> SimpleExpr {
    Expr::cust("1 = 1")
}

fn never() -> SimpleExpr {
    Expr::cust("1 = 0")
}

fn unsupported(table: &TableDef, field: &str, why: &str) -> StoreError {
    StoreError::Unsupported(format!("`{}.{}`: {}", table.name(), field, why))
}

/// Columns whose application value is text.
fn holds_text(ty: ColumnType) -> bool {
    matches!(
        ty,
        ColumnType::Text | ColumnType::Varchar(_) | ColumnType::Numeric(NumericMode::Exact)
    )
}

/// SQLite's `CAST(.. AS integer)` saturates at the i64 bounds, so only values
/// strictly inside them compare the same as in memory.
fn within_cast(stored: &Stored) -> bool {
    match stored {
        Stored::Text(t) => t
            .parse::<i64>()
            .map_or(false, |i| i != i64::MIN && i != i64::MAX),
        _ => false,
    }
}

/// Translates `cond` into a WHERE expression over `table`.
///
/// Leaves are null-safe: each yields TRUE or FALSE, never NULL, so `not`
/// keeps the in-memory meaning. Returns [`StoreError::Unsupported`] for
/// conditions the SQL side cannot express with the same semantics; callers
/// fall back to evaluating in memory.
pub fn to_sql(table: &TableDef, dialect: Dialect, cond: Option<&Condition>) -> Result<SimpleExpr> {
    match cond {
        Some(c) => Translator { table, dialect }.condition(c),
        None => Ok(always()),
    }
}

struct Translator<'a> {
    table: &'a TableDef,
    dialect: Dialect,
}

impl Translator<'_> {
    fn condition(&self, cond: &Condition) -> Result<SimpleExpr> {
        match cond {
            Condition::Field { field, op, value } => self.leaf(field, *op, value),
            Condition::And(children) | Condition::All(children) => Ok(self
                .all(children)?
                .into_iter()
                .reduce(SimpleExpr::and)
                .unwrap_or_else(always)),
            Condition::Or(children) => Ok(self
                .all(children)?
                .into_iter()
                .reduce(SimpleExpr::or)
                .unwrap_or_else(never)),
            Condition::Not(inner) => Ok(self.condition(inner)?.not()),
            Condition::Match(fields) => Ok(fields
                .iter()
                .map(|(k, v)| self.leaf(k, Operator::Equal, v))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .reduce(SimpleExpr::and)
                .unwrap_or_else(always)),
            Condition::Literal(_) => Ok(always()),
        }
    }

    fn all(&self, children: &[Condition]) -> Result<Vec<SimpleExpr>> {
        children.iter().map(|c| self.condition(c)).collect()
    }

    fn column(&self, field: &str) -> Result<&ColumnDef> {
        self.table
            .column(field)
            .ok_or_else(|| unsupported(self.table, field, "not a stored column"))
    }

    fn operand(&self, col: &ColumnDef) -> Expr {
        Expr::expr(self.dialect.filter_operand(col.column_type(), col.name()))
    }

    fn present(&self, col: &ColumnDef) -> SimpleExpr {
        Expr::col(Alias::new(col.name())).is_not_null()
    }

    /// The filter value bound for comparison with `col`.
    ///
    /// `Ok(None)` when the value can never equal or order against the column.
    fn bound(&self, col: &ColumnDef, v: &Value) -> Result<Option<SimpleExpr>> {
        let ty = col.column_type();
        let direct = match (ty, v) {
            (ColumnType::Json | ColumnType::Jsonb | ColumnType::Blob, _) => {
                return Err(unsupported(self.table, col.name(), "not comparable in SQL"))
            }
            (
                ColumnType::Integer
                | ColumnType::SmallInt
                | ColumnType::BigInt
                | ColumnType::Real
                | ColumnType::Double,
                v,
            ) => match v {
                Value::Int(i) => Some(Expr::value(*i)),
                Value::Real(f) if f.is_nan() => None,
                Value::Real(f) => Some(Expr::value(*f)),
                Value::BigInt(i) => match i64::try_from(*i) {
                    Ok(i) => Some(Expr::value(i)),
                    Err(_) => return Err(unsupported(self.table, col.name(), "integer out of range")),
                },
                _ => None,
            },
            (ColumnType::Text | ColumnType::Varchar(_), Value::Text(s)) => Some(Expr::value(s.clone())),
            (ColumnType::Boolean, Value::Bool(b)) => Some(Expr::value(*b)),
            (ColumnType::Timestamp, Value::Timestamp(dt)) => Some(Expr::value(dt.timestamp_millis())),
            (ColumnType::Numeric(mode), v) => return self.bound_numeric(col, mode, v),
            (ColumnType::Date, Value::Date(_)) | (ColumnType::Time, Value::Time(_)) => {
                match col.save(v.clone()) {
                    Ok(stored) => Some(self.dialect.filter_value(ty, stored)),
                    Err(_) => None,
                }
            }
            _ => None,
        };
        Ok(direct)
    }

    fn bound_numeric(&self, col: &ColumnDef, mode: NumericMode, v: &Value) -> Result<Option<SimpleExpr>> {
        let accepted = match mode {
            NumericMode::Exact => matches!(v, Value::Text(_)),
            NumericMode::ScaledNumber { .. } => matches!(v, Value::Real(_) | Value::Int(_)),
            NumericMode::ScaledBigInt => matches!(v, Value::BigInt(_) | Value::Int(_)),
        };
        if !accepted {
            return Ok(None);
        }
        let stored = match col.save(v.clone()) {
            Ok(stored) => stored,
            Err(_) => return Ok(None),
        };
        if let NumericMode::ScaledNumber { .. } = mode {
            // a value finer than the scale would compare after rounding
            let exact = col
                .load(stored.clone())
                .map(|back| back.loose_eq(v))
                .unwrap_or(false);
            if !exact {
                return Err(unsupported(self.table, col.name(), "value finer than column scale"));
            }
        }
        let scaled = !matches!(mode, NumericMode::Exact);
        if scaled && self.dialect == Dialect::Sqlite && !within_cast(&stored) {
            return Err(unsupported(self.table, col.name(), "scaled value beyond 64-bit range"));
        }
        Ok(Some(self.dialect.filter_value(col.column_type(), stored)))
    }

    fn equal(&self, col: &ColumnDef, v: &Value) -> Result<SimpleExpr> {
        if v.is_null() {
            return Ok(Expr::col(Alias::new(col.name())).is_null());
        }
        Ok(match self.bound(col, v)? {
            Some(b) => self.present(col).and(self.operand(col).eq(b)),
            None => never(),
        })
    }

    fn text_arg(&self, col: &ColumnDef, v: &Value) -> Result<Option<String>> {
        let ty = col.column_type();
        if ty.is_json() {
            return Err(unsupported(self.table, col.name(), "text operators on json"));
        }
        Ok(match v {
            Value::Text(s) if holds_text(ty) => Some(s.clone()),
            _ => None,
        })
    }

    fn length_bound(&self, col: &ColumnDef, v: &Value) -> Result<Option<i32>> {
        let ty = col.column_type();
        if ty.is_json() {
            return Err(unsupported(self.table, col.name(), "length of json"));
        }
        if !holds_text(ty) {
            return Ok(None);
        }
        Ok(v.as_i64().map(|n| n.clamp(i32::MIN as i64, i32::MAX as i64) as i32))
    }

    fn truthy(&self, col: &ColumnDef) -> Result<SimpleExpr> {
        let present = self.present(col);
        let t = match col.column_type() {
            ColumnType::Boolean => self.operand(col).eq(true),
            ColumnType::Integer
            | ColumnType::SmallInt
            | ColumnType::BigInt
            | ColumnType::Real
            | ColumnType::Double
            | ColumnType::Numeric(NumericMode::ScaledNumber { .. } | NumericMode::ScaledBigInt) => {
                self.operand(col).ne(0)
            }
            ColumnType::Text | ColumnType::Varchar(_) | ColumnType::Numeric(NumericMode::Exact) => {
                self.operand(col).ne("")
            }
            ColumnType::Timestamp | ColumnType::Date | ColumnType::Time | ColumnType::Blob => {
                return Ok(present)
            }
            ColumnType::Json | ColumnType::Jsonb => {
                return Err(unsupported(self.table, col.name(), "truthiness of json"))
            }
        };
        Ok(present.and(t))
    }

    fn leaf(&self, field: &str, op: Operator, value: &Value) -> Result<SimpleExpr> {
        let col = self.column(field)?;
        let null_check = matches!(op, Operator::IsNull | Operator::IsNotNull);
        if col.has_codec() && !null_check {
            return Err(unsupported(self.table, field, "column has a custom codec"));
        }

        let expr = match op {
            Operator::Equal => self.equal(col, value)?,
            Operator::NotEqual => self.equal(col, value)?.not(),
            Operator::LessThan
            | Operator::LessThanOrEqual
            | Operator::GreaterThan
            | Operator::GreaterThanOrEqual => {
                if value.is_null() {
                    return Ok(never());
                }
                let Some(b) = self.bound(col, value)? else {
                    return Ok(never());
                };
                let lhs = self.operand(col);
                let cmp = match op {
                    Operator::LessThan => lhs.lt(b),
                    Operator::LessThanOrEqual => lhs.lte(b),
                    Operator::GreaterThan => lhs.gt(b),
                    _ => lhs.gte(b),
                };
                self.present(col).and(cmp)
            }
            Operator::AnyOf => {
                let Value::List(options) = value else {
                    return self.equal(col, value);
                };
                let mut bound = Vec::with_capacity(options.len());
                for o in options.iter().filter(|o| !o.is_null()) {
                    if let Some(b) = self.bound(col, o)? {
                        bound.push(b);
                    }
                }
                let mut expr = if bound.is_empty() {
                    never()
                } else {
                    self.present(col).and(self.operand(col).is_in(bound))
                };
                if options.iter().any(Value::is_null) {
                    expr = expr.or(Expr::col(Alias::new(col.name())).is_null());
                }
                expr
            }
            Operator::Contains => match self.text_arg(col, value)? {
                Some(s) => {
                    let pos = Func::cust(Alias::new(self.dialect.position_fn()))
                        .arg(self.dialect.filter_operand(col.column_type(), col.name()))
                        .arg(s);
                    self.present(col).and(Expr::expr(pos).gt(0))
                }
                None => never(),
            },
            Operator::StartsWith => match self.text_arg(col, value)? {
                Some(s) => {
                    let n = s.chars().count() as i32;
                    let head = Func::cust(Alias::new("substr"))
                        .arg(self.dialect.filter_operand(col.column_type(), col.name()))
                        .arg(1i32)
                        .arg(n);
                    self.present(col).and(Expr::expr(head).eq(s))
                }
                None => never(),
            },
            Operator::EndsWith => match self.text_arg(col, value)? {
                Some(s) if s.is_empty() => self.present(col),
                Some(s) => {
                    let n = s.chars().count() as i32;
                    let operand = self.dialect.filter_operand(col.column_type(), col.name());
                    let tail = match self.dialect {
                        Dialect::Sqlite => Func::cust(Alias::new("substr")).arg(operand).arg(-n),
                        Dialect::Postgres => Func::cust(Alias::new("right")).arg(operand).arg(n),
                    };
                    self.present(col).and(Expr::expr(tail).eq(s))
                }
                None => never(),
            },
            Operator::MinLength | Operator::MaxLength => match self.length_bound(col, value)? {
                Some(n) => {
                    let len = Expr::expr(
                        Func::cust(Alias::new(self.dialect.length_fn()))
                            .arg(self.dialect.filter_operand(col.column_type(), col.name())),
                    );
                    let cmp = if op == Operator::MinLength {
                        len.gte(n)
                    } else {
                        len.lte(n)
                    };
                    self.present(col).and(cmp)
                }
                None => never(),
            },
            Operator::Truthy => {
                let want = value.is_null() || value.is_truthy();
                let t = self.truthy(col)?;
                if want {
                    t
                } else {
                    t.not()
                }
            }
            Operator::IsNull => Expr::col(Alias::new(col.name())).is_null(),
            Operator::IsNotNull => self.present(col),
        };
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caddie_core::db::column::*;
    use caddie_core::db::table;
    use sea_orm::sea_query::{PostgresQueryBuilder, Query, SqliteQueryBuilder};

    fn course() -> TableDef {
        table("course")
            .col(text("id").primary_key())
            .col(text("name").not_null())
            .col(smallint("holes"))
            .col(numeric("rating").mode(NumericMode::ScaledNumber { scale: 1 }))
            .col(numeric("purse").mode(NumericMode::ScaledBigInt))
            .col(json("meta"))
            .col(text("code").codec(|v| Ok(v), |v| Ok(v)))
            .build()
            .unwrap()
    }

    fn render(dialect: Dialect, cond: &Condition) -> String {
        let expr = to_sql(&course(), dialect, Some(cond)).unwrap();
        let mut stmt = Query::select();
        stmt.expr(Expr::val(1)).from(Alias::new("course")).and_where(expr);
        match dialect {
            Dialect::Sqlite => stmt.to_string(SqliteQueryBuilder),
            Dialect::Postgres => stmt.to_string(PostgresQueryBuilder),
        }
    }

    #[test]
    fn test_text_functions_per_dialect() {
        let c = Condition::leaf("name", Operator::Contains, "Pine");
        assert!(render(Dialect::Sqlite, &c).contains("instr("), "{}", render(Dialect::Sqlite, &c));
        assert!(render(Dialect::Postgres, &c).contains("strpos("));

        let c = Condition::leaf("name", Operator::EndsWith, "ery");
        assert!(render(Dialect::Sqlite, &c).contains("substr(\"name\", -3)"), "{}", render(Dialect::Sqlite, &c));
        assert!(render(Dialect::Postgres, &c).contains("right(\"name\", 3)"));

        let c = Condition::leaf("name", Operator::MaxLength, 4);
        assert!(render(Dialect::Postgres, &c).contains("char_length("));
    }

    #[test]
    fn test_null_equality_and_negation() {
        let sql = render(Dialect::Sqlite, &Condition::eq("holes", Value::Null));
        assert!(sql.contains("\"holes\" IS NULL"), "{sql}");
        let sql = render(Dialect::Sqlite, &Condition::ne("holes", 9));
        assert!(sql.contains("NOT"), "{sql}");
        assert!(sql.contains("IS NOT NULL"), "{sql}");
    }

    #[test]
    fn test_mismatched_values_never_match() {
        let sql = render(Dialect::Sqlite, &Condition::eq("holes", "nine"));
        assert!(sql.contains("1 = 0"), "{sql}");
        let sql = render(Dialect::Sqlite, &Condition::gt("name", 3));
        assert!(sql.contains("1 = 0"), "{sql}");
        let sql = render(Dialect::Sqlite, &Condition::or([]));
        assert!(sql.contains("1 = 0"), "{sql}");
        let sql = render(Dialect::Sqlite, &Condition::Literal(false));
        assert!(sql.contains("1 = 1"), "{sql}");
    }

    #[test]
    fn test_scaled_numeric_compares_as_integer() {
        let sql = render(Dialect::Sqlite, &Condition::gte("rating", 71.5));
        assert!(sql.contains("CAST(\"rating\" AS integer) >= 715"), "{sql}");
        let sql = render(Dialect::Sqlite, &Condition::lt("purse", Value::BigInt(-42)));
        assert!(sql.contains("CAST(\"purse\" AS integer) < -42"), "{sql}");
    }

    #[test]
    fn test_untranslatable_conditions() {
        let t = course();
        let unsupported = [
            Condition::leaf("meta", Operator::Contains, "x"),
            Condition::eq("meta", 1),
            Condition::leaf("meta", Operator::Truthy, true),
            Condition::eq("code", "A"),
            Condition::eq("over_par", 1),
            Condition::eq("rating", 71.25),
            Condition::gt("rating", 1e19),
            Condition::eq("purse", Value::BigInt(10i128.pow(20))),
            Condition::gte("purse", Value::Int(i64::MAX)),
            Condition::lt("purse", Value::Int(i64::MIN)),
        ];
        for c in unsupported {
            let res = to_sql(&t, Dialect::Sqlite, Some(&c));
            assert!(matches!(res, Err(StoreError::Unsupported(_))), "{c:?}");
        }
        assert!(to_sql(&t, Dialect::Sqlite, Some(&Condition::is_null("meta"))).is_ok());
        assert!(to_sql(&t, Dialect::Sqlite, Some(&Condition::is_not_null("code"))).is_ok());
    }
}
