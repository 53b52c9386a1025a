//! Typed card values and their textual encodings.
//!
//! A value is written in one of two layouts. In the *fixed* layout numbers and
//! logicals are right-justified in columns 11-30 and strings open in column
//! 11 with at least eight characters between the quotes. In the *free* layout
//! the value follows `= ` as compactly as possible.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::{Error, Result};

/// A typed header value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Logical `T` / `F`.
    Bool(bool),
    /// Integer that fits in 32 bits.
    Int32(i32),
    /// Integer that needs 64 bits.
    Int64(i64),
    /// Single-precision real.
    Float32(f32),
    /// Double-precision real.
    Float64(f64),
    /// Complex number as `(real, imaginary)` doubles.
    Complex128(f64, f64),
    /// Character string (content between the quotes, unescaped).
    String(String),
}

/// The scalar kind of a [`Value`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    Complex128,
    String,
}

/// Card layout used when encoding a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Value right-justified to column 30 (strings open at column 11).
    Fixed,
    /// Value written compactly after `= `.
    Free,
}

/// Width of the fixed value field (columns 11-30).
pub const FIXED_FIELD_WIDTH: usize = 20;

/// Worst-case width budget for a free-format single-precision real.
pub const FREE_FLOAT32_WIDTH: usize = 15;

/// Worst-case width budget for a free-format double-precision real.
pub const FREE_FLOAT64_WIDTH: usize = 24;

/// Minimum number of characters between the quotes of a fixed-format string.
pub const MIN_STRING_WIDTH: usize = 8;

/// Highest precision tried when formatting a real.
const MAX_PRECISION: usize = 17;

impl Value {
    /// The scalar kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int32(_) => ValueKind::Int32,
            Value::Int64(_) => ValueKind::Int64,
            Value::Float32(_) => ValueKind::Float32,
            Value::Float64(_) => ValueKind::Float64,
            Value::Complex128(..) => ValueKind::Complex128,
            Value::String(_) => ValueKind::String,
        }
    }

    /// Returns `false` for NaN or infinite reals.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Float32(f) => f.is_finite(),
            Value::Float64(f) => f.is_finite(),
            Value::Complex128(re, im) => re.is_finite() && im.is_finite(),
            _ => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer value, widened to 64 bits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(n) => Some(i64::from(*n)),
            Value::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// Real value, widened to 64 bits. Integers convert as well.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(f) => Some(f64::from(*f)),
            Value::Float64(f) => Some(*f),
            Value::Int32(n) => Some(f64::from(*n)),
            Value::Int64(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a decoded value to the requested kind.
    ///
    /// Decoding always produces the widest natural kind (`Int32` when the
    /// literal fits, otherwise `Int64`; `Float64` for every real). This
    /// narrows or widens to what the caller expects, returning `None` when
    /// the value does not fit the target.
    pub fn coerce(&self, kind: ValueKind) -> Option<Value> {
        if self.kind() == kind {
            return Some(self.clone());
        }
        match (self, kind) {
            (Value::Int32(n), ValueKind::Int64) => Some(Value::Int64(i64::from(*n))),
            (Value::Int64(n), ValueKind::Int32) => i32::try_from(*n).ok().map(Value::Int32),
            (Value::Float64(f), ValueKind::Float32) => {
                let narrowed = *f as f32;
                narrowed.is_finite().then_some(Value::Float32(narrowed))
            }
            (Value::Float32(f), ValueKind::Float64) => Some(Value::Float64(f64::from(*f))),
            (Value::Int32(_) | Value::Int64(_), ValueKind::Float64) => {
                self.as_f64().map(Value::Float64)
            }
            (Value::Int32(_) | Value::Int64(_), ValueKind::Float32) => {
                self.as_f64().map(|f| Value::Float32(f as f32))
            }
            (Value::Float32(_) | Value::Float64(_), ValueKind::Complex128) => {
                self.as_f64().map(|re| Value::Complex128(re, 0.0))
            }
            _ => None,
        }
    }
}

// ---- Real formatting ----

/// A finite real broken into sign, significant digits and the decimal
/// exponent of the first digit (`1.25E3` is `digits = "125"`, `exponent = 3`).
#[derive(Debug, Clone)]
struct Decimal {
    negative: bool,
    digits: Vec<u8>,
    exponent: i32,
}

impl Decimal {
    /// Parse the output of Rust's `{:E}` formatting (`-1.25E-3`, `7E0`).
    fn from_scientific(s: &str) -> Decimal {
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (mantissa, exp) = body.split_once('E').unwrap_or((body, "0"));
        let mut digits: Vec<u8> = mantissa.bytes().filter(u8::is_ascii_digit).collect();
        while digits.len() > 1 && digits.last() == Some(&b'0') {
            digits.pop();
        }
        if digits.is_empty() {
            digits.push(b'0');
        }
        Decimal {
            negative,
            digits,
            exponent: exp.parse().unwrap_or(0),
        }
    }

    fn is_zero(&self) -> bool {
        self.digits == [b'0']
    }

    /// Render in general notation for the given precision: scientific when
    /// the exponent is below -4 or at least `precision`, positional otherwise.
    fn render_general(&self, precision: usize) -> String {
        let mut out = String::new();
        if self.negative {
            out.push('-');
        }
        let digits = core::str::from_utf8(&self.digits).unwrap_or("0");
        if self.is_zero() {
            out.push('0');
            return out;
        }

        if self.exponent < -4 || self.exponent >= precision as i32 {
            out.push_str(&digits[..1]);
            if digits.len() > 1 {
                out.push('.');
                out.push_str(&digits[1..]);
            }
            let sign = if self.exponent < 0 { '-' } else { '+' };
            out.push_str(&format!("E{}{:02}", sign, self.exponent.unsigned_abs()));
        } else if self.exponent < 0 {
            out.push_str("0.");
            for _ in 0..(-self.exponent - 1) {
                out.push('0');
            }
            out.push_str(digits);
        } else {
            let int_len = self.exponent as usize + 1;
            if digits.len() <= int_len {
                out.push_str(digits);
                for _ in digits.len()..int_len {
                    out.push('0');
                }
            } else {
                out.push_str(&digits[..int_len]);
                out.push('.');
                out.push_str(&digits[int_len..]);
            }
        }
        out
    }
}

/// Make sure a rendered real reads back as a real: `3` becomes `3.0` and
/// `1E+20` becomes `1.0E+20`.
fn with_decimal_point(mut s: String) -> String {
    if s.contains('.') {
        return s;
    }
    match s.find('E') {
        Some(pos) => s.insert_str(pos, ".0"),
        None => s.push_str(".0"),
    }
    s
}

/// Format a finite real into at most `width` characters.
///
/// `shortest` is the `{:E}` rendering of the value at its native precision,
/// which supplies the shortest round-trippable digits. The precision budget
/// starts at 17 and shrinks by the overflow on each retry; digits beyond the
/// budget are rounded away. Returns `None` for NaN or infinity, or if even
/// one significant digit does not fit.
pub fn format_real(value: f64, shortest: &str, width: usize) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    let full = Decimal::from_scientific(shortest);
    let mut precision = MAX_PRECISION;
    loop {
        let decimal = if precision >= full.digits.len() {
            full.clone()
        } else {
            Decimal::from_scientific(&format!("{:.*E}", precision - 1, value))
        };
        let rendered = with_decimal_point(decimal.render_general(precision));
        if rendered.len() <= width {
            return Some(rendered);
        }
        if precision == 1 {
            return None;
        }
        precision = precision.saturating_sub(rendered.len() - width).max(1);
    }
}

fn format_f32(f: f32, width: usize) -> Option<String> {
    format_real(f64::from(f), &format!("{:E}", f), width)
}

fn format_f64(f: f64, width: usize) -> Option<String> {
    format_real(f, &format!("{:E}", f), width)
}

// ---- Value text ----

/// Escape a string value: wrap in quotes and double embedded quotes.
///
/// `min_width` pads the content with spaces before the closing quote.
pub fn quote_string(s: &str, min_width: usize) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    let mut content = 0;
    for ch in s.chars() {
        if ch == '\'' {
            out.push_str("''");
            content += 2;
        } else {
            out.push(ch);
            content += 1;
        }
    }
    while content < min_width {
        out.push(' ');
        content += 1;
    }
    out.push('\'');
    out
}

/// Length of `s` once embedded quotes are doubled.
pub fn escaped_len(s: &str) -> usize {
    s.len() + s.bytes().filter(|&b| b == b'\'').count()
}

/// Render the textual form of a value, without column placement.
///
/// Returns `None` when a real cannot be squeezed into its width budget.
/// Non-finite reals must be rejected by the caller.
pub fn value_text(value: &Value, format: Format) -> Option<String> {
    match (value, format) {
        (Value::Bool(b), _) => Some(String::from(if *b { "T" } else { "F" })),
        (Value::Int32(n), _) => Some(n.to_string()),
        (Value::Int64(n), _) => Some(n.to_string()),
        (Value::Float32(f), Format::Fixed) => format_f32(*f, FIXED_FIELD_WIDTH),
        (Value::Float32(f), Format::Free) => format_f32(*f, FREE_FLOAT32_WIDTH),
        (Value::Float64(f), Format::Fixed) => format_f64(*f, FIXED_FIELD_WIDTH),
        (Value::Float64(f), Format::Free) => format_f64(*f, FREE_FLOAT64_WIDTH),
        (Value::Complex128(re, im), Format::Fixed) => {
            let re = format_f64(*re, FIXED_FIELD_WIDTH)?;
            let im = format_f64(*im, FIXED_FIELD_WIDTH)?;
            Some(format!("({}, {})", re, im))
        }
        (Value::Complex128(re, im), Format::Free) => {
            let re = format_f64(*re, FREE_FLOAT64_WIDTH)?;
            let im = format_f64(*im, FREE_FLOAT64_WIDTH)?;
            Some(format!("{}:{}", re, im))
        }
        // Blank strings are written exactly as given.
        (Value::String(s), Format::Fixed) if s.trim().is_empty() => Some(quote_string(s, 0)),
        (Value::String(s), Format::Fixed) => Some(quote_string(s, MIN_STRING_WIDTH)),
        (Value::String(s), Format::Free) => Some(quote_string(s, 0)),
    }
}

// ---- Parsing ----

/// Split a quoted string off the front of `text`.
///
/// `text` must start with `'`. Returns the unescaped content (no trimming)
/// and whatever follows the closing quote.
pub fn parse_quoted(text: &str) -> Result<(String, &str)> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'\'') {
        return Err(Error::MalformedCardBody("string value does not open with a quote"));
    }
    let mut content = String::new();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                content.push('\'');
                i += 2;
            } else {
                return Ok((content, &text[i + 1..]));
            }
        } else {
            content.push(bytes[i] as char);
            i += 1;
        }
    }
    Err(Error::MalformedCardBody("unterminated string value"))
}

/// Trailing spaces in a string value are insignificant, except that an
/// all-blank value is kept exactly as written.
pub fn normalize_string(raw: String) -> String {
    if raw.trim().is_empty() {
        raw
    } else {
        String::from(raw.trim_end())
    }
}

fn is_integer_literal(s: &str) -> bool {
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_real_literal(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().any(|b| b.is_ascii_digit())
        && s
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'E' | b'e' | b'D' | b'd'))
}

/// Parse a real, accepting the FITS `D` exponent.
fn parse_real(s: &str) -> Option<f64> {
    let s = s.trim();
    if !is_real_literal(s) {
        return None;
    }
    s.replace(['D', 'd'], "E")
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
}

fn parse_complex(text: &str) -> Option<Value> {
    let (re, im) = if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        inner.split_once(',')?
    } else {
        text.split_once(':')?
    };
    Some(Value::Complex128(parse_real(re)?, parse_real(im)?))
}

/// Parse the value region of a card (the text between `=` and the comment
/// separator). Blank text is an absent value.
pub fn parse_value_text(text: &str) -> Result<Option<Value>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    if text.starts_with('\'') {
        let (content, rest) = parse_quoted(text)?;
        if !rest.trim().is_empty() {
            return Err(Error::MalformedCardBody("text after closing quote"));
        }
        return Ok(Some(Value::String(normalize_string(content))));
    }

    match text {
        "T" => return Ok(Some(Value::Bool(true))),
        "F" => return Ok(Some(Value::Bool(false))),
        _ => {}
    }

    if text.starts_with('(') || text.contains(':') {
        return parse_complex(text)
            .map(Some)
            .ok_or(Error::MalformedCardBody("unparsable complex value"));
    }

    if is_integer_literal(text) {
        let n: i64 = text
            .parse()
            .map_err(|_| Error::MalformedCardBody("integer value out of 64-bit range"))?;
        return Ok(Some(match i32::try_from(n) {
            Ok(small) => Value::Int32(small),
            Err(_) => Value::Int64(n),
        }));
    }

    parse_real(text)
        .map(|f| Some(Value::Float64(f)))
        .ok_or(Error::MalformedCardBody("unrecognized value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(v: &Value) -> String {
        value_text(v, Format::Fixed).unwrap()
    }

    fn free(v: &Value) -> String {
        value_text(v, Format::Free).unwrap()
    }

    fn reparse(text: &str) -> Value {
        parse_value_text(text).unwrap().unwrap()
    }

    // ---- general formatting ----

    #[test]
    fn shortest_digits_used_first() {
        assert_eq!(fixed(&Value::Float64(0.1)), "0.1");
        assert_eq!(fixed(&Value::Float64(9.80665)), "9.80665");
        assert_eq!(fixed(&Value::Float32(0.1)), "0.1");
    }

    #[test]
    fn integral_reals_get_a_fraction_digit() {
        assert_eq!(fixed(&Value::Float64(3.0)), "3.0");
        assert_eq!(fixed(&Value::Float64(-250.0)), "-250.0");
        assert_eq!(fixed(&Value::Float64(1e20)), "1.0E+20");
    }

    #[test]
    fn small_exponents_switch_to_scientific() {
        assert_eq!(fixed(&Value::Float64(0.00001)), "1.0E-05");
        assert_eq!(fixed(&Value::Float64(0.0001)), "0.0001");
        assert_eq!(fixed(&Value::Float64(-4.56e-20)), "-4.56E-20");
    }

    #[test]
    fn zero_formats_as_real() {
        assert_eq!(fixed(&Value::Float64(0.0)), "0.0");
        assert_eq!(fixed(&Value::Float64(-0.0)), "-0.0");
    }

    #[test]
    fn wide_double_falls_back_to_lower_precision() {
        let v = -1.234_567_890_123_456_7e-100;
        let s = fixed(&Value::Float64(v));
        assert!(s.len() <= FIXED_FIELD_WIDTH, "{s} too wide");
        assert_eq!(s, "-1.234567890123E-100");
        let back = reparse(&s).as_f64().unwrap();
        assert!(((back - v) / v).abs() < 1e-12);
    }

    #[test]
    fn seventeen_digit_double_fits_free_budget() {
        let v = 0.1 + 0.2;
        let s = free(&Value::Float64(v));
        assert_eq!(s, "0.30000000000000004");
        assert_eq!(reparse(&s), Value::Float64(v));
    }

    #[test]
    fn free_float32_respects_budget() {
        let s = free(&Value::Float32(-1.175_494_4e-38));
        assert!(s.len() <= FREE_FLOAT32_WIDTH, "{s}");
        assert_eq!(
            reparse(&s).coerce(ValueKind::Float32),
            Some(Value::Float32(-1.175_494_4e-38))
        );
    }

    #[test]
    fn format_real_gives_up_when_nothing_fits() {
        assert_eq!(format_real(1.5e300, "1.5E300", 4), None);
    }

    // ---- other kinds ----

    #[test]
    fn bool_and_int_text() {
        assert_eq!(fixed(&Value::Bool(true)), "T");
        assert_eq!(free(&Value::Bool(false)), "F");
        assert_eq!(fixed(&Value::Int32(-99)), "-99");
        assert_eq!(free(&Value::Int64(9_999_999_999)), "9999999999");
    }

    #[test]
    fn complex_layouts() {
        assert_eq!(fixed(&Value::Complex128(1.5, -2.0)), "(1.5, -2.0)");
        assert_eq!(free(&Value::Complex128(1.5, -2.0)), "1.5:-2.0");
    }

    #[test]
    fn fixed_strings_pad_to_eight() {
        assert_eq!(fixed(&Value::String(String::from("AB"))), "'AB      '");
        assert_eq!(free(&Value::String(String::from("AB"))), "'AB'");
    }

    #[test]
    fn quotes_are_doubled() {
        assert_eq!(free(&Value::String(String::from("it's"))), "'it''s'");
        assert_eq!(escaped_len("it's"), 5);
    }

    // ---- parsing ----

    #[test]
    fn parse_kinds() {
        assert_eq!(reparse("T"), Value::Bool(true));
        assert_eq!(reparse("   42"), Value::Int32(42));
        assert_eq!(reparse("-9999999999"), Value::Int64(-9_999_999_999));
        assert_eq!(reparse("1.234D+05"), Value::Float64(1.234e5));
        assert_eq!(reparse("(1, 2)"), Value::Complex128(1.0, 2.0));
        assert_eq!(reparse("1.0:-2.5"), Value::Complex128(1.0, -2.5));
    }

    #[test]
    fn parse_string_trims_trailing_blanks() {
        assert_eq!(reparse("'IMAGE   '"), Value::String(String::from("IMAGE")));
        assert_eq!(reparse("'it''s ok'"), Value::String(String::from("it's ok")));
        assert_eq!(reparse("'  lead'"), Value::String(String::from("  lead")));
    }

    #[test]
    fn blank_string_is_preserved() {
        assert_eq!(reparse("'    '"), Value::String(String::from("    ")));
        assert_eq!(reparse("''"), Value::String(String::new()));
    }

    #[test]
    fn out_of_range_reals_rejected() {
        for text in ["1E999", "-1.5D400", "(1E999, 0)", "0:1E400"] {
            assert!(
                matches!(parse_value_text(text), Err(Error::MalformedCardBody(_))),
                "{}",
                text
            );
        }
        assert_eq!(reparse("1E-999"), Value::Float64(0.0));
        assert_eq!(value_text(&Value::Float64(f64::INFINITY), Format::Free), None);
        assert_eq!(value_text(&Value::Float32(f32::NAN), Format::Fixed), None);
        assert_eq!(format_real(f64::NEG_INFINITY, "-inf", 20), None);
    }

    #[test]
    fn blank_strings_are_not_padded() {
        for layout in [Format::Fixed, Format::Free] {
            for blank in ["", " ", "   "] {
                let v = Value::String(String::from(blank));
                let text = value_text(&v, layout).unwrap();
                assert_eq!(text, format!("'{}'", blank));
                assert_eq!(reparse(&text), v);
            }
        }
        assert_eq!(fixed(&Value::String(String::from("A"))), "'A       '");
    }

    #[test]
    fn blank_text_is_absent() {
        assert_eq!(parse_value_text("    ").unwrap(), None);
    }

    #[test]
    fn malformed_values_rejected() {
        assert!(parse_value_text("'open").is_err());
        assert!(parse_value_text("'a' junk").is_err());
        assert!(parse_value_text("inf").is_err());
        assert!(parse_value_text("NaN").is_err());
        assert!(parse_value_text("12abc").is_err());
        assert!(parse_value_text("99999999999999999999").is_err());
    }

    // ---- coerce ----

    #[test]
    fn coerce_between_widths() {
        assert_eq!(
            Value::Int32(5).coerce(ValueKind::Int64),
            Some(Value::Int64(5))
        );
        assert_eq!(Value::Int64(1 << 40).coerce(ValueKind::Int32), None);
        assert_eq!(
            Value::Float64(0.5).coerce(ValueKind::Float32),
            Some(Value::Float32(0.5))
        );
        assert_eq!(Value::Float64(1e300).coerce(ValueKind::Float32), None);
        assert_eq!(Value::Bool(true).coerce(ValueKind::Int32), None);
    }

    #[test]
    fn finiteness() {
        assert!(Value::Float64(1.0).is_finite());
        assert!(!Value::Float32(f32::NAN).is_finite());
        assert!(!Value::Complex128(0.0, f64::INFINITY).is_finite());
    }
}
