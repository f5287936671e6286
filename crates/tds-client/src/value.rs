//! Cell values and their text rendering.
//!
//! Every non-NULL cell is rendered to canonical text at materialization
//! time. Numbers keep their exact value, date/time types use ISO layouts and
//! binary data is hex. Character data is passed through without collation
//! conversion: single-byte text is read as lossy UTF-8, Unicode text as
//! UTF-16LE.
//!
//! A payload whose length does not fit its declared type (which the row
//! decoder already rejects for the fixed layouts) falls back to hex instead
//! of failing the whole batch.

use std::fmt::{self, Write as _};

use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use tds_protocol::{ColumnData, TypeId};
use uuid::Uuid;

/// A single cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Value {
    /// SQL NULL.
    #[default]
    Null,
    /// Canonical text rendering of a non-NULL value.
    Text(String),
}

impl Value {
    /// Render a raw cell payload according to its column.
    #[must_use]
    pub fn decode(column: &ColumnData, raw: Option<&[u8]>) -> Self {
        match raw {
            None => Self::Null,
            Some(data) => Self::Text(render(column, data)),
        }
    }

    /// Check for SQL NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check for NULL or zero-length data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.is_empty(),
        }
    }

    /// Borrow the text, `None` for NULL.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Null => None,
            Self::Text(s) => Some(s),
        }
    }

    /// Take the text, `None` for NULL.
    #[must_use]
    pub fn into_string(self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

fn render(column: &ColumnData, data: &[u8]) -> String {
    let scale = column.type_info.scale.unwrap_or(7);
    let rendered = match column.type_id {
        TypeId::Int1 | TypeId::Int2 | TypeId::Int4 | TypeId::Int8 | TypeId::IntN => {
            render_int(data)
        }
        TypeId::Float4 | TypeId::Float8 | TypeId::FloatN => render_float(data),
        TypeId::Bit | TypeId::BitN => data
            .first()
            .map(|b| (if *b != 0 { "1" } else { "0" }).to_string()),
        TypeId::Money | TypeId::Money4 | TypeId::MoneyN => render_money(data),
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            render_decimal(data, column.type_info.scale.unwrap_or(0))
        }
        TypeId::DateTime | TypeId::DateTime4 | TypeId::DateTimeN => render_datetime(data),
        TypeId::Date => date_from_days(data).map(|d| d.format("%Y-%m-%d").to_string()),
        TypeId::Time => render_time(data, scale),
        TypeId::DateTime2 => render_datetime2(data, scale),
        TypeId::DateTimeOffset => render_datetimeoffset(data, scale),
        TypeId::Guid => render_guid(data),
        TypeId::NChar | TypeId::NVarChar | TypeId::NText => Some(utf16_lossy(data)),
        TypeId::Xml => Some(utf16_lossy(data).trim_start_matches('\u{feff}').to_string()),
        id if id.is_character() => Some(String::from_utf8_lossy(data).into_owned()),
        _ => None,
    };
    rendered.unwrap_or_else(|| hex(data))
}

fn render_int(data: &[u8]) -> Option<String> {
    let value = match *data {
        // TINYINT is unsigned
        [b] => i64::from(b),
        [a, b] => i64::from(i16::from_le_bytes([a, b])),
        [a, b, c, d] => i64::from(i32::from_le_bytes([a, b, c, d])),
        [a, b, c, d, e, f, g, h] => i64::from_le_bytes([a, b, c, d, e, f, g, h]),
        _ => return None,
    };
    Some(value.to_string())
}

fn render_float(data: &[u8]) -> Option<String> {
    // Display for floats is shortest round-trip and never uses an exponent.
    match *data {
        [a, b, c, d] => Some(f32::from_le_bytes([a, b, c, d]).to_string()),
        [a, b, c, d, e, f, g, h] => Some(f64::from_le_bytes([a, b, c, d, e, f, g, h]).to_string()),
        _ => None,
    }
}

fn render_money(data: &[u8]) -> Option<String> {
    let units = match *data {
        [a, b, c, d] => i64::from(i32::from_le_bytes([a, b, c, d])),
        // High 32 bits first, each half little-endian
        [a, b, c, d, e, f, g, h] => {
            let high = i64::from(i32::from_le_bytes([a, b, c, d]));
            let low = i64::from(u32::from_le_bytes([e, f, g, h]));
            (high << 32) | low
        }
        _ => return None,
    };
    Some(scaled_text(units < 0, u128::from(units.unsigned_abs()), 4))
}

fn render_decimal(data: &[u8], scale: u8) -> Option<String> {
    let (&sign, mantissa) = data.split_first()?;
    if mantissa.len() > 16 {
        return None;
    }
    let mut bytes = [0u8; 16];
    bytes[..mantissa.len()].copy_from_slice(mantissa);
    let magnitude = u128::from_le_bytes(bytes);
    Some(scaled_text(sign == 0 && magnitude != 0, magnitude, usize::from(scale)))
}

/// Render `magnitude / 10^scale` exactly.
fn scaled_text(negative: bool, magnitude: u128, scale: usize) -> String {
    let digits = format!("{magnitude:0>width$}", width = scale + 1);
    let (int_part, frac_part) = digits.split_at(digits.len() - scale);

    let mut out = String::with_capacity(digits.len() + 2);
    if negative {
        out.push('-');
    }
    out.push_str(int_part);
    if scale > 0 {
        out.push('.');
        out.push_str(frac_part);
    }
    out
}

fn base_1900() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1900, 1, 1)
}

fn render_datetime(data: &[u8]) -> Option<String> {
    match *data {
        [a, b, c, d] => {
            let days = u16::from_le_bytes([a, b]);
            let minutes = u16::from_le_bytes([c, d]);
            let date = base_1900()?.checked_add_signed(Duration::days(i64::from(days)))?;
            let time = NaiveTime::from_num_seconds_from_midnight_opt(u32::from(minutes) * 60, 0)?;
            Some(date.and_time(time).format("%Y-%m-%d %H:%M:%S").to_string())
        }
        [a, b, c, d, e, f, g, h] => {
            let days = i32::from_le_bytes([a, b, c, d]);
            let ticks = u64::from(u32::from_le_bytes([e, f, g, h]));
            // 1/300 s ticks, rounded to the nearest millisecond
            let millis = (ticks * 1000 + 150) / 300;
            let date = base_1900()?.checked_add_signed(Duration::days(i64::from(days)))?;
            let time = NaiveTime::from_num_seconds_from_midnight_opt(
                u32::try_from(millis / 1000).ok()?,
                u32::try_from(millis % 1000).ok()? * 1_000_000,
            )?;
            Some(date.and_time(time).format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        }
        _ => None,
    }
}

fn date_from_days(data: &[u8]) -> Option<NaiveDate> {
    let [a, b, c] = *data else {
        return None;
    };
    let days = u32::from_le_bytes([a, b, c, 0]);
    NaiveDate::from_ymd_opt(1, 1, 1)?.checked_add_signed(Duration::days(i64::from(days)))
}

/// Time of day stored as `10^-scale` second intervals; returns the time and
/// the fractional digits.
fn time_parts(data: &[u8], scale: u8) -> Option<(NaiveTime, String)> {
    if data.is_empty() || data.len() > 5 || scale > 7 {
        return None;
    }
    let mut bytes = [0u8; 8];
    bytes[..data.len()].copy_from_slice(data);
    let intervals = u64::from_le_bytes(bytes);

    let unit = 10u64.pow(u32::from(scale));
    let secs = u32::try_from(intervals / unit).ok()?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)?;

    let mut frac = String::new();
    if scale > 0 {
        write!(frac, ".{:0width$}", intervals % unit, width = usize::from(scale)).ok()?;
    }
    Some((time, frac))
}

fn render_time(data: &[u8], scale: u8) -> Option<String> {
    let (time, frac) = time_parts(data, scale)?;
    Some(format!("{}{frac}", time.format("%H:%M:%S")))
}

fn split_datetime2(data: &[u8], scale: u8) -> Option<(NaiveDateTime, String)> {
    let split = data.len().checked_sub(3)?;
    let (time_bytes, date_bytes) = data.split_at(split);
    let (time, frac) = time_parts(time_bytes, scale)?;
    Some((date_from_days(date_bytes)?.and_time(time), frac))
}

fn render_datetime2(data: &[u8], scale: u8) -> Option<String> {
    let (datetime, frac) = split_datetime2(data, scale)?;
    Some(format!("{}{frac}", datetime.format("%Y-%m-%d %H:%M:%S")))
}

fn render_datetimeoffset(data: &[u8], scale: u8) -> Option<String> {
    let split = data.len().checked_sub(2)?;
    let (value, offset) = data.split_at(split);
    let minutes = i16::from_le_bytes([offset[0], offset[1]]);
    let (utc, frac) = split_datetime2(value, scale)?;

    // Stored as UTC; shown in the value's own offset
    let zone = FixedOffset::east_opt(i32::from(minutes) * 60)?;
    let local = utc.and_utc().with_timezone(&zone);
    Some(format!(
        "{}{frac} {}",
        local.format("%Y-%m-%d %H:%M:%S"),
        local.format("%:z")
    ))
}

fn render_guid(data: &[u8]) -> Option<String> {
    let bytes: [u8; 16] = data.try_into().ok()?;
    // First three groups are little-endian on the wire
    let guid = Uuid::from_bytes_le(bytes);
    Some(guid.hyphenated().to_string().to_uppercase())
}

fn utf16_lossy(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(2 + data.len() * 2);
    out.push_str("0x");
    for byte in data {
        let _ = write!(out, "{byte:02X}");
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::{ColumnFlags, TypeInfo};

    fn column(type_id: TypeId) -> ColumnData {
        ColumnData {
            name: String::new(),
            type_id,
            user_type: 0,
            flags: ColumnFlags::NULLABLE,
            type_info: TypeInfo::default(),
        }
    }

    fn scaled(type_id: TypeId, scale: u8) -> ColumnData {
        let mut col = column(type_id);
        col.type_info.scale = Some(scale);
        col
    }

    fn text(col: &ColumnData, data: &[u8]) -> String {
        Value::decode(col, Some(data)).into_string().unwrap()
    }

    #[test]
    fn test_null_and_empty() {
        let col = column(TypeId::BigVarChar);
        assert_eq!(Value::decode(&col, None), Value::Null);

        let empty = Value::decode(&col, Some(b""));
        assert_eq!(empty, Value::Text(String::new()));
        assert!(empty.is_empty());
        assert!(!empty.is_null());
    }

    #[test]
    fn test_integers() {
        assert_eq!(text(&column(TypeId::Int1), &[0xFF]), "255");
        assert_eq!(text(&column(TypeId::Int2), &(-2i16).to_le_bytes()), "-2");
        assert_eq!(text(&column(TypeId::IntN), &42i32.to_le_bytes()), "42");
        assert_eq!(
            text(&column(TypeId::Int8), &i64::MIN.to_le_bytes()),
            "-9223372036854775808"
        );
    }

    #[test]
    fn test_floats_have_no_exponent() {
        assert_eq!(text(&column(TypeId::Float8), &1.5f64.to_le_bytes()), "1.5");
        assert_eq!(text(&column(TypeId::FloatN), &1e20f64.to_le_bytes()), "100000000000000000000");
        assert_eq!(text(&column(TypeId::Float4), &0.1f32.to_le_bytes()), "0.1");
        assert_eq!(text(&column(TypeId::Float8), &1e-7f64.to_le_bytes()), "0.0000001");
    }

    #[test]
    fn test_bit() {
        assert_eq!(text(&column(TypeId::BitN), &[1]), "1");
        assert_eq!(text(&column(TypeId::Bit), &[0]), "0");
    }

    #[test]
    fn test_money() {
        // 12.3456 = 123456 units
        assert_eq!(text(&column(TypeId::Money4), &123_456i32.to_le_bytes()), "12.3456");

        let units: i64 = -1;
        let mut raw = Vec::new();
        raw.extend_from_slice(&((units >> 32) as i32).to_le_bytes());
        raw.extend_from_slice(&(units as u32).to_le_bytes());
        assert_eq!(text(&column(TypeId::MoneyN), &raw), "-0.0001");
    }

    #[test]
    fn test_decimal_exact() {
        let col = scaled(TypeId::DecimalN, 2);
        let mut raw = vec![1u8];
        raw.extend_from_slice(&12345u32.to_le_bytes());
        assert_eq!(text(&col, &raw), "123.45");

        raw[0] = 0;
        assert_eq!(text(&col, &raw), "-123.45");

        let mut small = vec![1u8];
        small.extend_from_slice(&5u32.to_le_bytes());
        assert_eq!(text(&scaled(TypeId::NumericN, 3), &small), "0.005");
        assert_eq!(text(&scaled(TypeId::NumericN, 0), &small), "5");
    }

    #[test]
    fn test_datetime() {
        // 2000-01-01 is 36524 days after 1900-01-01; 300 ticks = 1 s
        let mut raw = Vec::new();
        raw.extend_from_slice(&36524i32.to_le_bytes());
        raw.extend_from_slice(&(300u32 * 3661 + 2).to_le_bytes());
        assert_eq!(text(&column(TypeId::DateTime), &raw), "2000-01-01 01:01:01.007");

        let mut small = Vec::new();
        small.extend_from_slice(&36524u16.to_le_bytes());
        small.extend_from_slice(&61u16.to_le_bytes());
        assert_eq!(text(&column(TypeId::DateTimeN), &small), "2000-01-01 01:01:00");
    }

    #[test]
    fn test_date_time_datetime2() {
        // 2024-03-15 is day 738959 since 0001-01-01
        let day = 738_959u32.to_le_bytes();
        assert_eq!(text(&column(TypeId::Date), &day[..3]), "2024-03-15");

        // 12:30:45.123 at scale 3
        let ms: u64 = (12 * 3600 + 30 * 60 + 45) * 1000 + 123;
        let time = &ms.to_le_bytes()[..4];
        assert_eq!(text(&scaled(TypeId::Time, 3), time), "12:30:45.123");

        let mut dt2 = time.to_vec();
        dt2.extend_from_slice(&day[..3]);
        assert_eq!(
            text(&scaled(TypeId::DateTime2, 3), &dt2),
            "2024-03-15 12:30:45.123"
        );

        let secs: u64 = 3600;
        assert_eq!(text(&scaled(TypeId::Time, 0), &secs.to_le_bytes()[..3]), "01:00:00");
    }

    #[test]
    fn test_datetimeoffset_shown_in_offset() {
        let day = 738_959u32.to_le_bytes();
        let secs: u64 = 10 * 3600;
        let mut raw = secs.to_le_bytes()[..3].to_vec();
        raw.extend_from_slice(&day[..3]);
        raw.extend_from_slice(&330i16.to_le_bytes());
        assert_eq!(
            text(&scaled(TypeId::DateTimeOffset, 0), &raw),
            "2024-03-15 15:30:00 +05:30"
        );
    }

    #[test]
    fn test_guid_uppercase_hyphenated() {
        let raw = [
            0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF,
        ];
        assert_eq!(
            text(&column(TypeId::Guid), &raw),
            "00112233-4455-6677-8899-AABBCCDDEEFF"
        );
    }

    #[test]
    fn test_character_and_binary() {
        assert_eq!(text(&column(TypeId::BigVarChar), b"abc"), "abc");
        let utf16: Vec<u8> = "héllo".encode_utf16().flat_map(u16::to_le_bytes).collect();
        assert_eq!(text(&column(TypeId::NVarChar), &utf16), "héllo");
        assert_eq!(text(&column(TypeId::BigVarBinary), &[0xDE, 0xAD, 0x01]), "0xDEAD01");
    }

    #[test]
    fn test_xml_udt_and_variant() {
        let xml: Vec<u8> = "\u{feff}<r a=\"1\"/>"
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        assert_eq!(text(&column(TypeId::Xml), &xml), "<r a=\"1\"/>");
        assert_eq!(text(&column(TypeId::Udt), &[0xE6, 0x10]), "0xE610");
        assert_eq!(
            text(&column(TypeId::Variant), &[0x38, 0x00, 7, 0, 0, 0]),
            "0x380007000000"
        );
    }

    #[test]
    fn test_odd_length_falls_back_to_hex() {
        assert_eq!(text(&column(TypeId::IntN), &[1, 2, 3]), "0x010203");
    }

    #[test]
    fn test_accessors() {
        let value = Value::from("x");
        assert_eq!(value.as_str(), Some("x"));
        assert_eq!(value.to_string(), "x");
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::Null.to_string(), "NULL");
    }
}
