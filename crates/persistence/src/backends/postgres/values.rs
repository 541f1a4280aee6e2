//! Conversions between [`SqlValue`] and PostgreSQL wire types.

use std::error::Error;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use postgres_types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::Row;

use crate::core::SqlValue;

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(b) => b.to_sql(ty, out),
            SqlValue::Int(i) => {
                if *ty == Type::INT2 {
                    i16::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*i as f64).to_sql(ty, out)
                } else if *ty == Type::TEXT || *ty == Type::VARCHAR {
                    i.to_string().to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            SqlValue::Float(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            SqlValue::Text(s) => s.as_str().to_sql(ty, out),
            SqlValue::Bytes(b) => b.as_slice().to_sql(ty, out),
            SqlValue::Timestamp(t) => {
                if *ty == Type::TIMESTAMP {
                    t.naive_utc().to_sql(ty, out)
                } else {
                    t.to_sql(ty, out)
                }
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Decodes every cell of a row.
///
/// Columns of types without a mapping decode as text when the driver allows
/// it, otherwise as `NULL`.
pub(crate) fn row_values(row: &Row) -> Result<Vec<SqlValue>, tokio_postgres::Error> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| cell(row, idx, column.type_()))
        .collect()
}

fn cell(row: &Row, idx: usize, ty: &Type) -> Result<SqlValue, tokio_postgres::Error> {
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?
            .map(|v| SqlValue::Int(i64::from(v)))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?
            .map(|v| SqlValue::Int(i64::from(v)))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::Int)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?
            .map(|v| SqlValue::Float(f64::from(v)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::Float)
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx)?.map(SqlValue::Bytes)
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(SqlValue::Timestamp)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|v| SqlValue::Timestamp(v.and_utc()))
    } else {
        row.try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Text)
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

/// Borrows parameters in the shape the driver expects.
pub(crate) fn param_refs(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}
