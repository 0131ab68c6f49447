//! Decoding of Postgres result rows into ordered JSON maps.

use crate::error::{DoctorError, DoctorResult};
use serde_json::{Map, Value};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, Kind, Type};

/// One materialized row: column name → value, in column order.
pub type RowMap = Map<String, Value>;

type DecodeError = Box<dyn std::error::Error + Sync + Send>;

/// Convert a row into a [`RowMap`], keeping column order.
///
/// Duplicate column names (e.g. `SELECT 1 AS a, 2 AS a`) keep the last value, matching how a
/// name-keyed mapping behaves.
pub fn row_to_map(row: &Row) -> DoctorResult<RowMap> {
    let mut map = Map::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), column_value(row, idx)?);
    }
    Ok(map)
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> DoctorResult<Option<T>> {
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| DoctorError::decode(row.columns()[idx].name(), e.to_string()))
}

fn column_value(row: &Row, idx: usize) -> DoctorResult<Value> {
    let value = match *row.columns()[idx].type_() {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::from),
        Type::INT2 => get::<i16>(row, idx)?.map(Value::from),
        Type::INT4 => get::<i32>(row, idx)?.map(Value::from),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::from),
        Type::OID => get::<u32>(row, idx)?.map(Value::from),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| Value::from(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(Value::from),
        Type::NUMERIC => get::<PgNumeric>(row, idx)?.map(|v| Value::String(v.0)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx)?.map(Value::String)
        }
        Type::JSON | Type::JSONB => get::<Value>(row, idx)?,
        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(|v| Value::String(v.to_string())),
        Type::DATE => get::<chrono::NaiveDate>(row, idx)?.map(|v| Value::String(v.to_string())),
        Type::TIME => get::<chrono::NaiveTime>(row, idx)?.map(|v| Value::String(v.to_string())),
        Type::TIMESTAMP => {
            get::<chrono::NaiveDateTime>(row, idx)?.map(|v| Value::String(v.to_string()))
        }
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, idx)?
            .map(|v| Value::String(v.to_rfc3339())),
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(|v| Value::String(hex_literal(&v))),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => {
            get::<Vec<Option<String>>>(row, idx)?.map(Value::from)
        }
        Type::INT2_ARRAY => get::<Vec<Option<i16>>>(row, idx)?.map(Value::from),
        Type::INT4_ARRAY => get::<Vec<Option<i32>>>(row, idx)?.map(Value::from),
        Type::INT8_ARRAY => get::<Vec<Option<i64>>>(row, idx)?.map(Value::from),
        _ => get::<PgFallback>(row, idx)?.map(|v| v.0),
    };

    Ok(value.unwrap_or(Value::Null))
}

fn hex_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// NUMERIC rendered as its exact decimal text.
#[derive(Debug)]
struct PgNumeric(String);

impl PgNumeric {
    fn parse(raw: &[u8]) -> Result<String, DecodeError> {
        if raw.len() < 8 {
            return Err("invalid NUMERIC payload: too short".into());
        }

        let ndigits = i16::from_be_bytes([raw[0], raw[1]]).max(0) as usize;
        let weight = i16::from_be_bytes([raw[2], raw[3]]);
        let sign = u16::from_be_bytes([raw[4], raw[5]]);
        let dscale = i16::from_be_bytes([raw[6], raw[7]]).max(0) as usize;

        if raw.len() < 8 + ndigits * 2 {
            return Err("invalid NUMERIC payload: truncated digits".into());
        }
        match sign {
            0xC000 => return Ok("NaN".to_string()),
            0xD000 => return Ok("Infinity".to_string()),
            0xF000 => return Ok("-Infinity".to_string()),
            _ => {}
        }

        let digits: Vec<u16> = (0..ndigits)
            .map(|i| u16::from_be_bytes([raw[8 + i * 2], raw[9 + i * 2]]))
            .collect();

        // Base-10000 groups; group `i` has weight `weight - i`.
        let int_groups = if weight >= 0 { weight as usize + 1 } else { 0 };
        let mut int_text = String::new();
        for i in 0..int_groups {
            let group = digits.get(i).copied().unwrap_or(0);
            if i == 0 {
                int_text.push_str(&group.to_string());
            } else {
                int_text.push_str(&format!("{group:04}"));
            }
        }
        if int_text.is_empty() {
            int_text.push('0');
        }

        let mut frac_text = String::new();
        if dscale > 0 {
            // Leading zero groups when weight < -1.
            for _ in 0..((-(weight as i32) - 1).max(0)) {
                frac_text.push_str("0000");
            }
            for group in digits.iter().skip(int_groups) {
                frac_text.push_str(&format!("{group:04}"));
            }
            if frac_text.len() < dscale {
                frac_text.push_str(&"0".repeat(dscale - frac_text.len()));
            }
            frac_text.truncate(dscale);
        }

        let mut out = String::new();
        if sign == 0x4000 && (int_text != "0" || frac_text.chars().any(|c| c != '0')) {
            out.push('-');
        }
        out.push_str(&int_text);
        if !frac_text.is_empty() {
            out.push('.');
            out.push_str(&frac_text);
        }
        Ok(out)
    }
}

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, DecodeError> {
        Ok(Self(Self::parse(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Any other type, decoded from its binary form where the layout is known.
///
/// Enums are UTF-8 labels and domains decode as their base type. Unknown types become a
/// placeholder naming the type, never a guess at text.
#[derive(Debug)]
struct PgFallback(Value);

impl<'a> FromSql<'a> for PgFallback {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, DecodeError> {
        Ok(Self(fallback_value(ty, raw)?))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn fallback_value(ty: &Type, raw: &[u8]) -> Result<Value, DecodeError> {
    match ty.kind() {
        Kind::Enum(_) => return Ok(Value::String(std::str::from_utf8(raw)?.to_string())),
        Kind::Domain(base) => return fallback_value(base, raw),
        _ => {}
    }

    let value = match *ty {
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            Value::String(std::str::from_utf8(raw)?.to_string())
        }
        Type::BOOL => Value::from(bool::from_sql(ty, raw)?),
        Type::INT2 => Value::from(i16::from_sql(ty, raw)?),
        Type::INT4 => Value::from(i32::from_sql(ty, raw)?),
        Type::INT8 => Value::from(i64::from_sql(ty, raw)?),
        Type::OID
        | Type::XID
        | Type::CID
        | Type::REGPROC
        | Type::REGCLASS
        | Type::REGTYPE => Value::from(u32::from_be_bytes(<[u8; 4]>::try_from(raw)?)),
        Type::INET | Type::CIDR => Value::String(inet_text(ty, raw)?),
        _ => Value::String(format!("<{} bytes of {}>", raw.len(), ty.name())),
    };
    Ok(value)
}

/// `inet`/`cidr` in Postgres text form: the prefix length is shown for `cidr` and for `inet`
/// values narrower than a host address.
fn inet_text(ty: &Type, raw: &[u8]) -> Result<String, DecodeError> {
    let [family, bits, _is_cidr, len, addr @ ..] = raw else {
        return Err("invalid INET payload: too short".into());
    };

    let (ip, host_bits) = match (*family, usize::from(*len), addr.len()) {
        (2, 4, 4) => (IpAddr::V4(Ipv4Addr::from(<[u8; 4]>::try_from(addr)?)), 32),
        (3, 16, 16) => (IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(addr)?)), 128),
        _ => {
            return Err(format!("invalid INET payload: family {family}, {len} address bytes").into());
        }
    };

    if *ty == Type::CIDR || *bits != host_bits {
        Ok(format!("{ip}/{bits}"))
    } else {
        Ok(ip.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(ndigits: i16, weight: i16, sign: u16, dscale: i16, groups: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&ndigits.to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for g in groups {
            raw.extend_from_slice(&g.to_be_bytes());
        }
        raw
    }

    #[test]
    fn numeric_integer_and_fraction() {
        // 12345.678 = [1, 2345, 6780], weight 1, dscale 3
        let raw = numeric(3, 1, 0x0000, 3, &[1, 2345, 6780]);
        assert_eq!(PgNumeric::parse(&raw).unwrap(), "12345.678");
    }

    #[test]
    fn numeric_negative_small_fraction() {
        // -0.00012 = [1, 2000], weight -1, dscale 5
        let raw = numeric(2, -1, 0x4000, 5, &[1, 2000]);
        assert_eq!(PgNumeric::parse(&raw).unwrap(), "-0.00012");

        // 0.00000123 = [123], weight -2, dscale 8
        let raw = numeric(1, -2, 0x0000, 8, &[123]);
        assert_eq!(PgNumeric::parse(&raw).unwrap(), "0.00000123");
    }

    #[test]
    fn numeric_zero_and_nan() {
        assert_eq!(PgNumeric::parse(&numeric(0, 0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(PgNumeric::parse(&numeric(0, 0, 0, 2, &[])).unwrap(), "0.00");
        assert_eq!(PgNumeric::parse(&numeric(0, 0, 0xC000, 0, &[])).unwrap(), "NaN");
    }

    #[test]
    fn numeric_rejects_truncated_payload() {
        assert!(PgNumeric::parse(&[0, 1]).is_err());
        assert!(PgNumeric::parse(&numeric(2, 0, 0, 0, &[1])).is_err());
    }

    fn fallback(ty: &Type, raw: &[u8]) -> Value {
        PgFallback::from_sql(ty, raw).unwrap().0
    }

    #[test]
    fn fallback_reads_transaction_ids_as_integers() {
        assert_eq!(
            fallback(&Type::XID, &0x4142_4344u32.to_be_bytes()),
            Value::from(0x4142_4344u32)
        );
        assert_eq!(
            fallback(&Type::XID, &16_909_060u32.to_be_bytes()),
            Value::from(16_909_060u32)
        );
        assert_eq!(fallback(&Type::CID, &7u32.to_be_bytes()), Value::from(7u32));
        assert_eq!(
            fallback(&Type::REGCLASS, &1259u32.to_be_bytes()),
            Value::from(1259u32)
        );
        assert!(PgFallback::from_sql(&Type::XID, &[1, 2, 3]).is_err());
    }

    #[test]
    fn fallback_renders_inet_and_cidr() {
        assert_eq!(
            fallback(&Type::INET, &[2, 32, 0, 4, 10, 1, 2, 3]),
            Value::String("10.1.2.3".to_string())
        );
        assert_eq!(
            fallback(&Type::INET, &[2, 24, 0, 4, 192, 168, 0, 7]),
            Value::String("192.168.0.7/24".to_string())
        );
        assert_eq!(
            fallback(&Type::CIDR, &[2, 8, 1, 4, 10, 0, 0, 0]),
            Value::String("10.0.0.0/8".to_string())
        );

        let mut v6 = vec![3, 128, 0, 16];
        v6.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        assert_eq!(fallback(&Type::INET, &v6), Value::String("::1".to_string()));

        assert!(PgFallback::from_sql(&Type::INET, &[2, 32, 0]).is_err());
        assert!(PgFallback::from_sql(&Type::INET, &[2, 32, 0, 16, 10, 1, 2, 3]).is_err());
    }

    #[test]
    fn fallback_decodes_enums_and_domains() {
        let state = Type::new(
            "backend_state".to_string(),
            90_001,
            Kind::Enum(vec!["active".to_string(), "idle".to_string()]),
            "public".to_string(),
        );
        assert_eq!(fallback(&state, b"active"), Value::String("active".to_string()));

        let cardinal = Type::new(
            "cardinal_number".to_string(),
            90_002,
            Kind::Domain(Type::INT4),
            "information_schema".to_string(),
        );
        assert_eq!(fallback(&cardinal, &42i32.to_be_bytes()), Value::from(42));

        let identifier = Type::new(
            "sql_identifier".to_string(),
            90_003,
            Kind::Domain(Type::NAME),
            "information_schema".to_string(),
        );
        assert_eq!(
            fallback(&identifier, b"pg_class"),
            Value::String("pg_class".to_string())
        );
    }

    #[test]
    fn fallback_never_reads_unknown_binary_as_text() {
        // Valid UTF-8, but money is an int8 of cents.
        assert_eq!(
            fallback(&Type::MONEY, b"ABCDEFGH"),
            Value::String("<8 bytes of money>".to_string())
        );
        assert_eq!(
            fallback(&Type::POINT, &[0u8; 16]),
            Value::String("<16 bytes of point>".to_string())
        );
    }

    #[test]
    fn bytea_renders_as_hex() {
        assert_eq!(hex_literal(&[0xde, 0xad, 0x01]), "\\xdead01");
    }
}
