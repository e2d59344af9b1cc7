use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

use crate::error::WriteError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} `{name}`")]
pub struct ParseEnumError {
    kind: &'static str,
    name: String,
}

// Generates the upper-case name mapping shared by the schema enums.
macro_rules! named_enum {
    ($kind:literal, $ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn name(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: $kind,
                        name: s.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TSDataType {
    Boolean,
    Int32,
    Int64,
    Float,
    Double,
    Text,
}

named_enum!("data type", TSDataType {
    Boolean => "BOOLEAN",
    Int32 => "INT32",
    Int64 => "INT64",
    Float => "FLOAT",
    Double => "DOUBLE",
    Text => "TEXT",
});

impl TSDataType {
    /// Encodings the server accepts for a series of this type.
    pub fn supported_encodings(&self) -> &'static [TSEncoding] {
        use TSEncoding::*;
        match self {
            TSDataType::Boolean => &[Plain, Rle],
            TSDataType::Int32 | TSDataType::Int64 => &[Plain, Rle, Ts2Diff, Regular],
            TSDataType::Float | TSDataType::Double => &[Plain, Rle, Ts2Diff, Gorilla],
            TSDataType::Text => &[Plain, PlainDictionary],
        }
    }

    pub fn supports(&self, encoding: TSEncoding) -> bool {
        self.supported_encodings().contains(&encoding)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TSEncoding {
    #[default]
    Plain,
    PlainDictionary,
    Rle,
    Diff,
    #[serde(rename = "TS_2DIFF")]
    Ts2Diff,
    Bitmap,
    Gorilla,
    Regular,
}

named_enum!("encoding", TSEncoding {
    Plain => "PLAIN",
    PlainDictionary => "PLAIN_DICTIONARY",
    Rle => "RLE",
    Diff => "DIFF",
    Ts2Diff => "TS_2DIFF",
    Bitmap => "BITMAP",
    Gorilla => "GORILLA",
    Regular => "REGULAR",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressionType {
    #[default]
    Uncompressed,
    Snappy,
    Gzip,
    Lzo,
    Sdt,
    Paa,
    Pla,
}

named_enum!("compression", CompressionType {
    Uncompressed => "UNCOMPRESSED",
    Snappy => "SNAPPY",
    Gzip => "GZIP",
    Lzo => "LZO",
    Sdt => "SDT",
    Paa => "PAA",
    Pla => "PLA",
});

/// A single typed value written to, or read from, a timeseries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Text(String),
}

impl Value {
    pub fn data_type(&self) -> TSDataType {
        match self {
            Value::Boolean(_) => TSDataType::Boolean,
            Value::Int32(_) => TSDataType::Int32,
            Value::Int64(_) => TSDataType::Int64,
            Value::Float(_) => TSDataType::Float,
            Value::Double(_) => TSDataType::Double,
            Value::Text(_) => TSDataType::Text,
        }
    }

    /// Converts the value to the declared type of `series`.
    ///
    /// Text is parsed as the declared type, which is how rows submitted in
    /// string form are accepted. Any other pairing of distinct types is a
    /// type mismatch; numbers are never widened implicitly.
    pub fn coerce(self, series: &str, declared: TSDataType) -> Result<Value, WriteError> {
        if self.data_type() == declared {
            return Ok(self);
        }
        let mismatch = |value: &Value| WriteError::TypeMismatch {
            series: series.to_string(),
            expected: declared,
            value: value.to_string(),
        };
        let text = match &self {
            Value::Text(text) => text.trim(),
            other => return Err(mismatch(other)),
        };
        let parsed = match declared {
            TSDataType::Boolean => text.to_ascii_lowercase().parse().map(Value::Boolean).ok(),
            TSDataType::Int32 => text.parse().map(Value::Int32).ok(),
            TSDataType::Int64 => text.parse().map(Value::Int64).ok(),
            TSDataType::Float => text.parse().map(Value::Float).ok(),
            TSDataType::Double => text.parse().map(Value::Double).ok(),
            TSDataType::Text => Some(Value::Text(text.to_string())),
        };
        parsed.ok_or_else(|| mismatch(&self))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

#[cfg(test)]
pub mod tests {
    use super::{CompressionType, TSDataType, TSEncoding, Value};
    use crate::error::WriteError;

    #[test]
    fn test_enum_names() {
        assert_eq!("INT64".parse::<TSDataType>().unwrap(), TSDataType::Int64);
        assert_eq!("rle".parse::<TSEncoding>().unwrap(), TSEncoding::Rle);
        assert_eq!("TS_2DIFF".parse::<TSEncoding>().unwrap(), TSEncoding::Ts2Diff);
        assert_eq!(
            "SNAPPY".parse::<CompressionType>().unwrap(),
            CompressionType::Snappy
        );
        assert!("INT128".parse::<TSDataType>().is_err());

        for data_type in TSDataType::ALL {
            assert_eq!(data_type.to_string().parse::<TSDataType>().unwrap(), *data_type);
        }
        assert_eq!(
            serde_json::to_string(&TSEncoding::Ts2Diff).unwrap(),
            "\"TS_2DIFF\""
        );
    }

    #[test]
    fn test_supported_encodings() {
        assert!(TSDataType::Int64.supports(TSEncoding::Rle));
        assert!(TSDataType::Double.supports(TSEncoding::Gorilla));
        assert!(!TSDataType::Boolean.supports(TSEncoding::Ts2Diff));
        assert!(!TSDataType::Text.supports(TSEncoding::Rle));
        assert!(!TSDataType::Int32.supports(TSEncoding::Gorilla));
    }

    #[test]
    fn test_coerce_text() {
        assert_eq!(
            Value::from("1").coerce("root.sg1.d1.s1", TSDataType::Int64),
            Ok(Value::Int64(1))
        );
        assert_eq!(
            Value::from("TRUE").coerce("root.sg1.d1.s1", TSDataType::Boolean),
            Ok(Value::Boolean(true))
        );
        assert_eq!(
            Value::from(" 2.5 ").coerce("root.sg1.d1.s1", TSDataType::Double),
            Ok(Value::Double(2.5))
        );
        assert!(matches!(
            Value::from("one").coerce("root.sg1.d1.s1", TSDataType::Int64),
            Err(WriteError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_coerce_typed() {
        assert_eq!(
            Value::Int64(7).coerce("root.sg1.d1.s1", TSDataType::Int64),
            Ok(Value::Int64(7))
        );
        assert!(matches!(
            Value::Int32(7).coerce("root.sg1.d1.s1", TSDataType::Int64),
            Err(WriteError::TypeMismatch { expected: TSDataType::Int64, .. })
        ));
        assert!(matches!(
            Value::Double(1.0).coerce("root.sg1.d1.s1", TSDataType::Text),
            Err(WriteError::TypeMismatch { .. })
        ));
    }
}
