//! Form Encoding
//!
//! `application/x-www-form-urlencoded` bodies and query strings.

use std::fmt;

/// Percent-encode a query component. Leaves `A-Z a-z 0-9 - _ . ! ~ * ' ( )`
/// untouched and encodes everything else as UTF-8 bytes, space as `%20`.
pub fn percent_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len() * 3);

    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9'
            | '-' | '_' | '.' | '!' | '~' | '*' | '\'' | '(' | ')' => {
                result.push(c);
            }
            _ => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).as_bytes() {
                    result.push_str(&format!("%{:02X}", byte));
                }
            }
        }
    }

    result
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode a percent-encoded component; `+` decodes to a space
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let decoded = bytes.get(i + 1).copied().and_then(hex_value)
                    .zip(bytes.get(i + 2).copied().and_then(hex_value));
                match decoded {
                    Some((hi, lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    // Invalid encoding, keep as-is
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Split a query string into decoded key/value pairs
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query.trim_start_matches('?')
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(k), percent_decode(v))
        })
        .collect()
}

/// A form field value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Number(f64),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::Number(n) if n.is_infinite() => {
                f.write_str(if *n > 0.0 { "Infinity" } else { "-Infinity" })
            }
            ParamValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            ParamValue::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        ParamValue::Number(n)
    }
}

impl From<i32> for ParamValue {
    fn from(n: i32) -> Self {
        ParamValue::Number(f64::from(n))
    }
}

impl From<u32> for ParamValue {
    fn from(n: u32) -> Self {
        ParamValue::Number(f64::from(n))
    }
}

/// POST parameters: either an already-encoded body or fields to encode
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    Encoded(String),
    Fields(Vec<(String, ParamValue)>),
}

impl Params {
    pub fn fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        Params::Fields(fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Body text sent on the wire
    pub fn encode(&self) -> String {
        match self {
            Params::Encoded(s) => s.clone(),
            Params::Fields(fields) => fields.iter()
                .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(&v.to_string())))
                .collect::<Vec<_>>()
                .join("&"),
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::Encoded(String::new())
    }
}

impl From<&str> for Params {
    fn from(s: &str) -> Self {
        Params::Encoded(s.to_string())
    }
}

impl From<String> for Params {
    fn from(s: String) -> Self {
        Params::Encoded(s)
    }
}

impl<K: Into<String>, V: Into<ParamValue>> From<Vec<(K, V)>> for Params {
    fn from(fields: Vec<(K, V)>) -> Self {
        Params::fields(fields)
    }
}

impl<K: Into<String>, V: Into<ParamValue>, const N: usize> From<[(K, V); N]> for Params {
    fn from(fields: [(K, V); N]) -> Self {
        Params::fields(fields)
    }
}
