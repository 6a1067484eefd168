//! Conversions between [`Value`] and the PostgreSQL wire types.

use crate::error::{OrmError, OrmResult};
use crate::row::Row;
use crate::value::Value;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::error::Error;
use std::sync::Arc;
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type};
use uuid::Uuid;

type BoxError = Box<dyn Error + Sync + Send>;

// ─── ToSql ──────────────────────────────────────────────────────────────────

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql(ty, out),
            Value::Int(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::OID => u32::try_from(*v)?.to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                _ if is_text(ty) => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                _ if is_text(ty) => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Text(s) => match *ty {
                Type::UUID => Uuid::parse_str(s)?.to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out),
                _ => s.as_str().to_sql(ty, out),
            },
            Value::Bytes(b) => b.as_slice().to_sql(ty, out),
            Value::Uuid(u) if is_text(ty) => u.to_string().to_sql(ty, out),
            Value::Uuid(u) => u.to_sql(ty, out),
            Value::Timestamp(t) => match *ty {
                Type::TIMESTAMP => t.naive_utc().to_sql(ty, out),
                Type::DATE => t.date_naive().to_sql(ty, out),
                _ if is_text(ty) => t.to_rfc3339().to_sql(ty, out),
                _ => t.to_sql(ty, out),
            },
            Value::Json(j) if is_text(ty) => j.to_string().to_sql(ty, out),
            Value::Json(j) => j.to_sql(ty, out),
            Value::Array(items) => match ty.kind() {
                Kind::Array(_) => items.to_sql(ty, out),
                _ => Err(format!("cannot bind an array to a {ty} parameter").into()),
            },
        }
    }

    // Per-variant checks happen in `to_sql`, against the inferred type.
    fn accepts(_ty: &Type) -> bool {
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

fn is_text(ty: &Type) -> bool {
    matches!(*ty, Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN)
}

// ─── FromSql ────────────────────────────────────────────────────────────────

/// Decode a whole row; `columns` is shared by every row of one result.
pub fn decode_row(row: &tokio_postgres::Row, columns: Arc<[String]>) -> OrmResult<Row> {
    let values = (0..row.len())
        .map(|idx| decode_column(row, idx))
        .collect::<OrmResult<Vec<_>>>()?;
    Ok(Row::new(columns, values))
}

fn get<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, idx: usize) -> OrmResult<Option<T>> {
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| OrmError::decode(row.columns()[idx].name(), e.to_string()))
}

fn array<'a, T: FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    idx: usize,
    wrap: impl Fn(T) -> Value,
) -> OrmResult<Value> {
    Ok(match get::<Vec<Option<T>>>(row, idx)? {
        Some(items) => Value::Array(
            items
                .into_iter()
                .map(|item| item.map_or(Value::Null, &wrap))
                .collect(),
        ),
        None => Value::Null,
    })
}

fn wrap<T>(value: Option<T>, f: impl FnOnce(T) -> Value) -> Value {
    value.map_or(Value::Null, f)
}

pub(crate) fn decode_column(row: &tokio_postgres::Row, idx: usize) -> OrmResult<Value> {
    let column = &row.columns()[idx];
    let ty = column.type_();
    let value = match *ty {
        Type::BOOL => wrap(get::<bool>(row, idx)?, Value::Bool),
        Type::INT2 => wrap(get::<i16>(row, idx)?, |v| Value::Int(v.into())),
        Type::INT4 => wrap(get::<i32>(row, idx)?, |v| Value::Int(v.into())),
        Type::INT8 => wrap(get::<i64>(row, idx)?, Value::Int),
        Type::OID => wrap(get::<u32>(row, idx)?, |v| Value::Int(v.into())),
        Type::FLOAT4 => wrap(get::<f32>(row, idx)?, |v| Value::Float(v.into())),
        Type::FLOAT8 => wrap(get::<f64>(row, idx)?, Value::Float),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            wrap(get::<String>(row, idx)?, Value::Text)
        }
        Type::BYTEA => wrap(get::<Vec<u8>>(row, idx)?, Value::Bytes),
        Type::UUID => wrap(get::<Uuid>(row, idx)?, Value::Uuid),
        Type::TIMESTAMPTZ => wrap(get::<DateTime<Utc>>(row, idx)?, Value::Timestamp),
        Type::TIMESTAMP => wrap(get::<NaiveDateTime>(row, idx)?, |v| Value::Timestamp(v.and_utc())),
        Type::DATE => wrap(get::<NaiveDate>(row, idx)?, |v| {
            Value::Timestamp(v.and_time(chrono::NaiveTime::MIN).and_utc())
        }),
        Type::JSON | Type::JSONB => wrap(get::<serde_json::Value>(row, idx)?, Value::Json),
        Type::BOOL_ARRAY => array::<bool>(row, idx, Value::Bool)?,
        Type::INT2_ARRAY => array::<i16>(row, idx, |v| Value::Int(v.into()))?,
        Type::INT4_ARRAY => array::<i32>(row, idx, |v| Value::Int(v.into()))?,
        Type::INT8_ARRAY => array::<i64>(row, idx, Value::Int)?,
        Type::FLOAT8_ARRAY => array::<f64>(row, idx, Value::Float)?,
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => array::<String>(row, idx, Value::Text)?,
        Type::UUID_ARRAY => array::<Uuid>(row, idx, Value::Uuid)?,
        _ => {
            return Err(OrmError::decode(
                column.name(),
                format!("unsupported column type {ty}; cast it in the selection, e.g. ::text"),
            ));
        }
    };
    Ok(value)
}
