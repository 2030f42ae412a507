use super::LogRecord;
use log::Level;
use serde::Deserialize;

/// Scalar from the config file, compared as text against record attributes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Scalar")]
pub struct AttrValue(pub String);

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<Scalar> for AttrValue {
    fn from(s: Scalar) -> Self {
        AttrValue(match s {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Str(s) => s,
        })
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue(s.to_string())
    }
}

/// Per-sink record filter.
///
/// ```yaml
/// filters:
///   - type: level
///     level: error
///     strict: false
///   - type: attribute
///     name: tg
///     allow_value: true
///     default_value: false
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    /// Passes records at `level` or more severe; only `level` when `strict`.
    Level {
        level: Level,
        #[serde(default)]
        strict: bool,
    },
    /// Passes records whose `name` attribute (or `default_value` when the
    /// record has none) equals `allow_value`.
    Attribute {
        name: String,
        allow_value: AttrValue,
        #[serde(default)]
        default_value: Option<AttrValue>,
    },
}

impl FilterConfig {
    pub fn allows(&self, record: &LogRecord) -> bool {
        match self {
            FilterConfig::Level { level, strict } => {
                if *strict {
                    record.level == *level
                } else {
                    record.level <= *level
                }
            }
            FilterConfig::Attribute {
                name,
                allow_value,
                default_value,
            } => {
                let value = record
                    .attribute(name)
                    .or_else(|| default_value.as_ref().map(|d| d.0.as_str()));
                value == Some(allow_value.0.as_str())
            }
        }
    }
}
