//! Decoded RESP values.

use bytes::Bytes;
use std::fmt;

/// Bytes of a bulk payload shown by `Display` before eliding.
const DISPLAY_BULK_BYTES: usize = 64;

/// Array elements shown by `Display` before eliding.
const DISPLAY_ARRAY_ITEMS: usize = 16;

/// A decoded RESP2 value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Simple string: +OK\r\n
    Status(String),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Bulk string: $5\r\nhello\r\n or $-1\r\n (null)
    Bulk(Option<Bytes>),
    /// Bulk string longer than the capture limit; only its length was kept.
    OmittedBulk(usize),
    /// Array: *2\r\n... or *-1\r\n (null)
    Array(Option<Vec<Value>>),
}

impl Value {
    /// Short type name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Status(_) => "status",
            Value::Error(_) => "error",
            Value::Integer(_) => "integer",
            Value::Bulk(None) => "null-bulk",
            Value::Bulk(Some(_)) => "bulk",
            Value::OmittedBulk(_) => "omitted-bulk",
            Value::Array(None) => "null-array",
            Value::Array(Some(_)) => "array",
        }
    }

    /// Check if this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Project an array into its bulk elements.
    ///
    /// Elements that are not captured bulk strings (including omitted ones)
    /// become `None`. Returns `None` if this is not a non-null array.
    pub fn as_bulk_array(&self) -> Option<Vec<Option<Bytes>>> {
        match self {
            Value::Array(Some(items)) => Some(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Bulk(data) => data.clone(),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Wire size of the payload this value accounts for: bulk lengths
    /// (captured or omitted) summed over nested arrays.
    pub fn payload_len(&self) -> usize {
        match self {
            Value::Bulk(Some(data)) => data.len(),
            Value::OmittedBulk(len) => *len,
            Value::Array(Some(items)) => items.iter().map(Value::payload_len).sum(),
            _ => 0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Status(s) => write!(f, "{s}"),
            Value::Error(s) => write!(f, "(error) {s}"),
            Value::Integer(n) => write!(f, "(integer) {n}"),
            Value::Bulk(None) | Value::Array(None) => f.write_str("(nil)"),
            Value::Bulk(Some(data)) => {
                let shown = &data[..data.len().min(DISPLAY_BULK_BYTES)];
                write!(f, "\"{}\"", shown.escape_ascii())?;
                if data.len() > shown.len() {
                    write!(f, "...({} bytes)", data.len())?;
                }
                Ok(())
            }
            Value::OmittedBulk(len) => write!(f, "<{len} bytes omitted>"),
            Value::Array(Some(items)) => {
                f.write_str("[")?;
                for (i, item) in items.iter().take(DISPLAY_ARRAY_ITEMS).enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if items.len() > DISPLAY_ARRAY_ITEMS {
                    write!(f, ", ...{} more", items.len() - DISPLAY_ARRAY_ITEMS)?;
                }
                f.write_str("]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(data: &'static [u8]) -> Value {
        Value::Bulk(Some(Bytes::from_static(data)))
    }

    #[test]
    fn test_as_bulk_array() {
        let value = Value::Array(Some(vec![
            bulk(b"SET"),
            bulk(b"key"),
            Value::OmittedBulk(1 << 20),
            Value::Bulk(None),
            Value::Integer(7),
        ]));

        let args = value.as_bulk_array().unwrap();
        assert_eq!(args.len(), 5);
        assert_eq!(args[0].as_deref(), Some(&b"SET"[..]));
        assert_eq!(args[1].as_deref(), Some(&b"key"[..]));
        assert!(args[2].is_none());
        assert!(args[3].is_none());
        assert!(args[4].is_none());
    }

    #[test]
    fn test_as_bulk_array_not_array() {
        assert!(Value::Array(None).as_bulk_array().is_none());
        assert!(bulk(b"x").as_bulk_array().is_none());
        assert_eq!(Value::Array(Some(vec![])).as_bulk_array(), Some(vec![]));
    }

    #[test]
    fn test_payload_len() {
        let value = Value::Array(Some(vec![
            bulk(b"abc"),
            Value::OmittedBulk(100),
            Value::Array(Some(vec![bulk(b"de")])),
            Value::Integer(99),
        ]));
        assert_eq!(value.payload_len(), 105);
    }

    #[test]
    fn test_kind() {
        assert_eq!(Value::Status("OK".into()).kind(), "status");
        assert_eq!(Value::Bulk(None).kind(), "null-bulk");
        assert_eq!(Value::OmittedBulk(3).kind(), "omitted-bulk");
        assert!(Value::Error("ERR".into()).is_error());
        assert!(!Value::Status("ERR".into()).is_error());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Status("OK".into()).to_string(), "OK");
        assert_eq!(Value::Error("ERR bad".into()).to_string(), "(error) ERR bad");
        assert_eq!(Value::Integer(-3).to_string(), "(integer) -3");
        assert_eq!(Value::Bulk(None).to_string(), "(nil)");
        assert_eq!(bulk(b"a\r\n").to_string(), "\"a\\r\\n\"");
        assert_eq!(Value::OmittedBulk(10).to_string(), "<10 bytes omitted>");
        assert_eq!(
            Value::Array(Some(vec![bulk(b"GET"), bulk(b"k")])).to_string(),
            "[\"GET\", \"k\"]"
        );
    }

    #[test]
    fn test_display_elides_long_values() {
        let long = Value::Bulk(Some(Bytes::from(vec![b'x'; 100])));
        let shown = long.to_string();
        assert!(shown.ends_with("...(100 bytes)"));

        let wide = Value::Array(Some(vec![Value::Integer(1); 20]));
        assert!(wide.to_string().ends_with(", ...4 more]"));
    }
}
