use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::values::{Stored, Timestamp, Value};
use crate::error::ColumnError;

/// Largest scale a `ScaledNumber` column accepts.
pub const MAX_SCALE: u32 = 28;

/// How a `numeric` column exposes its value to application code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NumericMode {
    /// Decimal string in, decimal string out.
    #[default]
    Exact,
    /// `Real` in and out, stored as an integer string of `value * 10^scale`.
    /// `scale` is at most [`MAX_SCALE`].
    ScaledNumber { scale: u32 },
    /// `BigInt` in and out, stored as an integer string. The caller owns the scale.
    ScaledBigInt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Varchar(u32),
    Integer,
    SmallInt,
    BigInt,
    Real,
    Double,
    Numeric(NumericMode),
    Boolean,
    Timestamp,
    Time,
    Date,
    Json,
    Jsonb,
    Blob,
}

/// The primitive a column is persisted as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Integer,
    Float,
    Text,
    Bool,
    Blob,
}

impl ColumnType {
    pub fn storage_kind(&self) -> StorageKind {
        match self {
            ColumnType::Text
            | ColumnType::Varchar(_)
            | ColumnType::Numeric(_)
            | ColumnType::Time
            | ColumnType::Date
            | ColumnType::Json
            | ColumnType::Jsonb => StorageKind::Text,
            ColumnType::Integer | ColumnType::SmallInt | ColumnType::BigInt => StorageKind::Integer,
            ColumnType::Timestamp => StorageKind::Integer,
            ColumnType::Real | ColumnType::Double => StorageKind::Float,
            ColumnType::Boolean => StorageKind::Bool,
            ColumnType::Blob => StorageKind::Blob,
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::Varchar(_))
    }

    pub fn is_json(&self) -> bool {
        matches!(self, ColumnType::Json | ColumnType::Jsonb)
    }
}

pub type CodecFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;
pub type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Serializer/loader pair applied around the built-in storage conversion.
#[derive(Clone)]
pub struct ColumnCodec {
    pub save: CodecFn,
    pub load: CodecFn,
}

#[derive(Clone)]
pub enum ColumnDefault {
    Value(Value),
    Generator(DefaultFn),
}

impl ColumnDefault {
    pub fn produce(&self) -> Value {
        match self {
            ColumnDefault::Value(v) => v.clone(),
            ColumnDefault::Generator(f) => f(),
        }
    }
}

impl fmt::Debug for ColumnDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnDefault::Value(v) => f.debug_tuple("Value").field(v).finish(),
            ColumnDefault::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// `field` references `table.references_field`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignKey {
    pub field: String,
    pub table: String,
    pub references_field: String,
    pub cascade_delete: bool,
}

impl ForeignKey {
    pub fn new(
        field: impl Into<String>,
        table: impl Into<String>,
        references_field: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            table: table.into(),
            references_field: references_field.into(),
            cascade_delete: false,
        }
    }

    pub fn cascade(mut self) -> Self {
        self.cascade_delete = true;
        self
    }
}

#[derive(Clone)]
pub struct ColumnDef {
    name: String,
    ty: ColumnType,
    not_null: bool,
    primary_key: bool,
    unique: bool,
    default: Option<ColumnDefault>,
    codec: Option<ColumnCodec>,
    references: Option<ForeignKey>,
}

impl fmt::Debug for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDef")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("not_null", &self.not_null)
            .field("primary_key", &self.primary_key)
            .field("unique", &self.unique)
            .field("default", &self.default)
            .field("codec", &self.codec.is_some())
            .field("references", &self.references)
            .finish()
    }
}

pub fn column(name: impl Into<String>, ty: ColumnType) -> ColumnDef {
    ColumnDef {
        name: name.into(),
        ty,
        not_null: false,
        primary_key: false,
        unique: false,
        default: None,
        codec: None,
        references: None,
    }
}

pub fn text(name: impl Into<String>) -> ColumnDef {
    column(name, ColumnType::Text)
}
pub fn varchar(name: impl Into<String>, len: u32) -> ColumnDef {
    column(name, ColumnType::Varchar(len))
}
pub fn integer(name: impl Into<String>) -> ColumnDef {
    column(name, ColumnType::Integer)
}
pub fn smallint(name: impl Into<String>) -> ColumnDef {
    column(name, ColumnType::SmallInt)
}
pub fn bigint(name: impl Into<String>) -> ColumnDef {
    column(name, ColumnType::BigInt)
}
pub fn real(name: impl Into<String>) -> ColumnDef {
    column(name, ColumnType::Real)
}
pub fn double_precision(name: impl Into<String>) -> ColumnDef {
    column(name, ColumnType::Double)
}
pub fn numeric(name: impl Into<String>) -> ColumnDef {
    column(name, ColumnType::Numeric(NumericMode::Exact))
}
pub fn boolean(name: impl Into<String>) -> ColumnDef {
    column(name, ColumnType::Boolean)
}
pub fn bool(name: impl Into<String>) -> ColumnDef {
    boolean(name)
}
pub fn timestamp(name: impl Into<String>) -> ColumnDef {
    column(name, ColumnType::Timestamp)
}
pub fn time(name: impl Into<String>) -> ColumnDef {
    column(name, ColumnType::Time)
}
pub fn date(name: impl Into<String>) -> ColumnDef {
    column(name, ColumnType::Date)
}
pub fn json(name: impl Into<String>) -> ColumnDef {
    column(name, ColumnType::Json)
}
pub fn jsonb(name: impl Into<String>) -> ColumnDef {
    column(name, ColumnType::Jsonb)
}
pub fn blob(name: impl Into<String>) -> ColumnDef {
    column(name, ColumnType::Blob)
}

impl ColumnDef {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn column_type(&self) -> ColumnType {
        self.ty
    }
    pub fn is_not_null(&self) -> bool {
        self.not_null
    }
    /// Whether `value` leaves this column to its default or generator: the field is
    /// missing, or null where null cannot be stored.
    pub fn is_unset(&self, value: Option<&Value>) -> bool {
        match value {
            None => true,
            Some(v) => v.is_null() && self.not_null,
        }
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }
    pub fn is_unique(&self) -> bool {
        self.unique || self.primary_key
    }
    pub fn default_value(&self) -> Option<&ColumnDefault> {
        self.default.as_ref()
    }
    pub fn foreign_key(&self) -> Option<&ForeignKey> {
        self.references.as_ref()
    }
    pub fn has_codec(&self) -> bool {
        self.codec.is_some()
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Only meaningful on `numeric` columns; ignored elsewhere.
    pub fn mode(mut self, mode: NumericMode) -> Self {
        if let ColumnType::Numeric(m) = &mut self.ty {
            *m = mode;
        }
        self
    }

    pub fn default(mut self, v: impl Into<Value>) -> Self {
        self.default = Some(ColumnDefault::Value(v.into()));
        self
    }

    pub fn default_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(ColumnDefault::Generator(Arc::new(f)));
        self
    }

    pub fn references(mut self, table: impl Into<String>, field: impl Into<String>) -> Self {
        self.references = Some(ForeignKey::new(self.name.clone(), table, field));
        self
    }

    /// Marks the reference set by [`ColumnDef::references`] as cascading.
    pub fn cascade(mut self) -> Self {
        if let Some(fk) = self.references.take() {
            self.references = Some(fk.cascade());
        }
        self
    }

    pub fn codec<S, L>(mut self, save: S, load: L) -> Self
    where
        S: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
        L: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.codec = Some(ColumnCodec {
            save: Arc::new(save),
            load: Arc::new(load),
        });
        self
    }

    fn err(&self, message: impl Into<String>) -> ColumnError {
        ColumnError::new(&self.name, message)
    }

    fn mismatch(&self, v: &Value) -> ColumnError {
        self.err(format!("expected {:?}, got {}", self.ty, v.type_name()))
    }

    /// Checks nullability and that the value converts to this column's storage form.
    pub fn validate(&self, v: &Value) -> Result<(), ColumnError> {
        if v.is_null() {
            if self.not_null {
                return Err(self.err("must not be null"));
            }
            return Ok(());
        }
        self.save(v.clone()).map(|_| ())
    }

    /// Application value to stored value.
    pub fn save(&self, v: Value) -> Result<Stored, ColumnError> {
        let v = match &self.codec {
            Some(codec) => (codec.save)(v).map_err(|e| self.err(e))?,
            None => v,
        };
        if v.is_null() {
            return Ok(Stored::Null);
        }
        match self.ty {
            ColumnType::Text => match v {
                Value::Text(s) => Ok(Stored::Text(s)),
                other => Err(self.mismatch(&other)),
            },
            ColumnType::Varchar(len) => match v {
                Value::Text(s) if s.chars().count() <= len as usize => Ok(Stored::Text(s)),
                Value::Text(_) => Err(self.err(format!("longer than {} characters", len))),
                other => Err(self.mismatch(&other)),
            },
            ColumnType::Integer | ColumnType::SmallInt | ColumnType::BigInt => {
                let i = match v {
                    Value::Int(i) => i,
                    Value::BigInt(i) => {
                        i64::try_from(i).map_err(|_| self.err("integer out of range"))?
                    }
                    other => return Err(self.mismatch(&other)),
                };
                let in_range = match self.ty {
                    ColumnType::SmallInt => i16::try_from(i).is_ok(),
                    ColumnType::Integer => i32::try_from(i).is_ok(),
                    _ => true,
                };
                if !in_range {
                    return Err(self.err(format!("{} out of range for {:?}", i, self.ty)));
                }
                Ok(Stored::Int(i))
            }
            ColumnType::Real | ColumnType::Double => match v {
                Value::Real(f) => Ok(Stored::Real(f)),
                Value::Int(i) => Ok(Stored::Real(i as f64)),
                other => Err(self.mismatch(&other)),
            },
            ColumnType::Numeric(mode) => self.save_numeric(mode, v),
            ColumnType::Boolean => match v {
                Value::Bool(b) => Ok(Stored::Bool(b)),
                other => Err(self.mismatch(&other)),
            },
            ColumnType::Timestamp => match v {
                Value::Timestamp(dt) => Ok(Stored::Int(dt.timestamp_millis())),
                Value::Int(ms) => Ok(Stored::Int(ms)),
                Value::Text(s) => Timestamp::try_from(s.as_str())
                    .map(|ts| Stored::Int(ts.as_millis()))
                    .map_err(|e| self.err(e.to_string())),
                other => Err(self.mismatch(&other)),
            },
            ColumnType::Date => match v {
                Value::Date(d) => Ok(Stored::Text(d.format("%Y-%m-%d").to_string())),
                Value::Text(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                    .map(|d| Stored::Text(d.format("%Y-%m-%d").to_string()))
                    .map_err(|e| self.err(e.to_string())),
                other => Err(self.mismatch(&other)),
            },
            ColumnType::Time => match v {
                Value::Time(t) => Ok(Stored::Text(t.format("%H:%M:%S%.f").to_string())),
                Value::Text(s) => NaiveTime::parse_from_str(&s, "%H:%M:%S%.f")
                    .map(|t| Stored::Text(t.format("%H:%M:%S%.f").to_string()))
                    .map_err(|e| self.err(e.to_string())),
                other => Err(self.mismatch(&other)),
            },
            ColumnType::Json | ColumnType::Jsonb => serde_json::to_string(&v.to_json())
                .map(Stored::Text)
                .map_err(|e| self.err(e.to_string())),
            ColumnType::Blob => match v {
                Value::Blob(b) => Ok(Stored::Blob(b)),
                other => Err(self.mismatch(&other)),
            },
        }
    }

    fn save_numeric(&self, mode: NumericMode, v: Value) -> Result<Stored, ColumnError> {
        match mode {
            NumericMode::Exact => match v {
                Value::Text(s) => {
                    let s = s.trim().to_string();
                    Decimal::from_str_exact(&s).map_err(|e| self.err(e.to_string()))?;
                    Ok(Stored::Text(s))
                }
                Value::Int(i) => Ok(Stored::Text(i.to_string())),
                Value::BigInt(i) => Ok(Stored::Text(i.to_string())),
                other => Err(self.mismatch(&other)),
            },
            NumericMode::ScaledNumber { scale } => {
                let d = match v {
                    Value::Real(f) => Decimal::from_f64(f)
                        .ok_or_else(|| self.err(format!("{} is not representable as a decimal", f)))?,
                    Value::Int(i) => Decimal::from(i),
                    other => return Err(self.mismatch(&other)),
                };
                let mut rounded =
                    d.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
                // rescale quietly settles for a smaller scale when the mantissa would overflow
                rounded.rescale(scale);
                if rounded.scale() != scale {
                    return Err(self.err(format!("{} does not fit at scale {}", d, scale)));
                }
                Ok(Stored::Text(rounded.mantissa().to_string()))
            }
            NumericMode::ScaledBigInt => match v {
                Value::BigInt(i) => Ok(Stored::Text(i.to_string())),
                Value::Int(i) => Ok(Stored::Text(i.to_string())),
                other => Err(self.mismatch(&other)),
            },
        }
    }

    /// Stored value to application value.
    pub fn load(&self, s: Stored) -> Result<Value, ColumnError> {
        let v = self.load_builtin(s)?;
        match &self.codec {
            Some(codec) if !v.is_null() => (codec.load)(v).map_err(|e| self.err(e)),
            _ => Ok(v),
        }
    }

    fn load_builtin(&self, s: Stored) -> Result<Value, ColumnError> {
        if s == Stored::Null {
            return Ok(Value::Null);
        }
        let bad = |s: &Stored| self.err(format!("cannot load {:?} as {:?}", s, self.ty));
        match (self.ty, s) {
            (ColumnType::Text | ColumnType::Varchar(_), Stored::Text(t)) => Ok(Value::Text(t)),
            (ColumnType::Integer | ColumnType::SmallInt | ColumnType::BigInt, Stored::Int(i)) => {
                Ok(Value::Int(i))
            }
            (ColumnType::Real | ColumnType::Double, Stored::Real(f)) => Ok(Value::Real(f)),
            (ColumnType::Real | ColumnType::Double, Stored::Int(i)) => Ok(Value::Real(i as f64)),
            (ColumnType::Numeric(mode), Stored::Text(t)) => self.load_numeric(mode, &t),
            (ColumnType::Boolean, Stored::Bool(b)) => Ok(Value::Bool(b)),
            (ColumnType::Boolean, Stored::Int(i)) => Ok(Value::Bool(i != 0)),
            (ColumnType::Timestamp, Stored::Int(ms)) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .map(Value::Timestamp)
                .ok_or_else(|| self.err(format!("timestamp {} out of range", ms))),
            (ColumnType::Date, Stored::Text(t)) => NaiveDate::parse_from_str(&t, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| self.err(e.to_string())),
            (ColumnType::Time, Stored::Text(t)) => NaiveTime::parse_from_str(&t, "%H:%M:%S%.f")
                .map(Value::Time)
                .map_err(|e| self.err(e.to_string())),
            (ColumnType::Json | ColumnType::Jsonb, Stored::Text(t)) => serde_json::from_str(&t)
                .map(Value::Json)
                .map_err(|e| self.err(e.to_string())),
            (ColumnType::Blob, Stored::Blob(b)) => Ok(Value::Blob(b)),
            (_, other) => Err(bad(&other)),
        }
    }

    fn load_numeric(&self, mode: NumericMode, t: &str) -> Result<Value, ColumnError> {
        match mode {
            NumericMode::Exact => Ok(Value::Text(t.to_string())),
            NumericMode::ScaledNumber { scale } => {
                let n = i128::from_str(t).map_err(|e| self.err(e.to_string()))?;
                let d = Decimal::try_from_i128_with_scale(n, scale)
                    .map_err(|e| self.err(e.to_string()))?;
                d.to_f64()
                    .map(Value::Real)
                    .ok_or_else(|| self.err("not representable as f64"))
            }
            NumericMode::ScaledBigInt => i128::from_str(t)
                .map(Value::BigInt)
                .map_err(|e| self.err(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_timestamp_round_trip() {
        let col = timestamp("played_at");
        let base = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let offsets = [
            0i64,
            1,
            -1,
            86_400_000,
            -1_700_000_000_123,
            253_402_300_799_000 - 1_700_000_000_123,
        ];
        for offset in offsets {
            let dt = base + Duration::milliseconds(offset);
            let stored = col.save(Value::Timestamp(dt)).unwrap();
            assert_eq!(stored, Stored::Int(dt.timestamp_millis()));
            assert_eq!(col.load(stored).unwrap(), Value::Timestamp(dt));
        }
    }

    #[test]
    fn test_scaled_number_rounds_and_restores() {
        let col = numeric("handicap").mode(NumericMode::ScaledNumber { scale: 1 });
        assert_eq!(col.save(Value::Real(12.34)).unwrap(), Stored::Text("123".into()));
        assert_eq!(col.save(Value::Real(-0.05)).unwrap(), Stored::Text("-1".into()));
        assert_eq!(col.save(Value::Int(3)).unwrap(), Stored::Text("30".into()));
        match col.load(Stored::Text("123".into())).unwrap() {
            Value::Real(f) => assert!((f - 12.3).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_scaled_number_rejects_overflow() {
        let col = numeric("purse").mode(NumericMode::ScaledNumber { scale: 10 });
        let err = col.save(Value::Real(1e20)).unwrap_err();
        assert!(err.to_string().contains("scale 10"), "{err}");
        assert!(col.validate(&Value::Real(1e20)).is_err());
        assert!(col.save(Value::Real(f64::NAN)).is_err());

        // the largest magnitude that still fits keeps its value
        let stored = col.save(Value::Real(1e18)).unwrap();
        assert_eq!(stored, Stored::Text(format!("1{}", "0".repeat(28))));
        assert_eq!(col.load(stored).unwrap(), Value::Real(1e18));

        let stored = col.save(Value::Real(1234.5)).unwrap();
        assert_eq!(stored, Stored::Text("12345000000000".into()));
        assert_eq!(col.load(stored).unwrap(), Value::Real(1234.5));
    }

    #[test]
    fn test_exact_numeric_keeps_string() {
        let col = numeric("slope");
        assert_eq!(
            col.save(Value::Text("113.10".into())).unwrap(),
            Stored::Text("113.10".into())
        );
        assert!(col.save(Value::Text("abc".into())).is_err());
        assert!(col.save(Value::Real(1.5)).is_err());
        assert_eq!(
            col.load(Stored::Text("113.10".into())).unwrap(),
            Value::Text("113.10".into())
        );
    }

    #[test]
    fn test_scaled_bigint() {
        let col = numeric("cents").mode(NumericMode::ScaledBigInt);
        let big = i128::from(i64::MAX) * 10;
        assert_eq!(col.save(Value::BigInt(big)).unwrap(), Stored::Text(big.to_string()));
        assert_eq!(col.load(Stored::Text(big.to_string())).unwrap(), Value::BigInt(big));
    }

    #[test]
    fn test_integer_ranges() {
        assert!(smallint("par").save(Value::Int(40_000)).is_err());
        assert!(integer("yards").save(Value::Int(i64::from(i32::MAX) + 1)).is_err());
        assert!(bigint("yards").save(Value::Int(i64::MAX)).is_ok());
        assert!(integer("yards").save(Value::Text("1".into())).is_err());
    }

    #[test]
    fn test_varchar_length_and_not_null() {
        let col = varchar("code", 3).not_null();
        assert!(col.validate(&Value::Text("abc".into())).is_ok());
        assert!(col.validate(&Value::Text("abcd".into())).is_err());
        assert!(col.validate(&Value::Null).is_err());
        assert!(varchar("code", 3).validate(&Value::Null).is_ok());
    }

    #[test]
    fn test_date_time_json_blob() {
        let d = date("day");
        let stored = d.save(Value::Text("2024-02-29".into())).unwrap();
        assert_eq!(
            d.load(stored).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );

        let t = time("tee_time");
        let at = NaiveTime::from_hms_milli_opt(7, 30, 0, 500).unwrap();
        let stored = t.save(Value::Time(at)).unwrap();
        assert_eq!(t.load(stored).unwrap(), Value::Time(at));

        let j = json("meta");
        let stored = j.save(Value::List(vec![Value::Int(1), Value::from("a")])).unwrap();
        assert_eq!(stored, Stored::Text(r#"[1,"a"]"#.into()));
        assert_eq!(j.load(stored).unwrap(), Value::Json(serde_json::json!([1, "a"])));

        let b = blob("photo");
        assert_eq!(b.save(Value::Blob(vec![1, 2])).unwrap(), Stored::Blob(vec![1, 2]));
    }

    #[test]
    fn test_custom_codec_wraps_builtin() {
        let col = text("name").codec(
            |v| match v {
                Value::Text(s) => Ok(Value::Text(s.to_uppercase())),
                other => Err(format!("unexpected {}", other.type_name())),
            },
            |v| match v {
                Value::Text(s) => Ok(Value::Text(s.to_lowercase())),
                other => Ok(other),
            },
        );
        let stored = col.save(Value::from("Pine")).unwrap();
        assert_eq!(stored, Stored::Text("PINE".into()));
        assert_eq!(col.load(stored).unwrap(), Value::from("pine"));
        assert!(col.save(Value::Int(1)).is_err());
    }

    #[test]
    fn test_references_and_cascade() {
        let col = text("course_id").references("course", "id").cascade();
        let fk = col.foreign_key().unwrap();
        assert_eq!(fk.table, "course");
        assert_eq!(fk.references_field, "id");
        assert!(fk.cascade_delete);
        assert!(text("x").cascade().foreign_key().is_none());
    }
}
