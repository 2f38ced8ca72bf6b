// src/core/value.rs

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A value visible to templates.
///
/// `Section` and `Template` are lazy: they are resolved by the namespace at
/// the moment they are read, so that configuration values can themselves
/// contain template markup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A configuration section, resolved option by option.
    Section(String),
    /// A raw template string, expanded when read.
    Template(String),
}

impl Value {
    /// Truthiness, in the usual scripting-language sense.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Str(s) | Self::Template(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(map) => !map.is_empty(),
            Self::Section(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Template(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Section(_) => "section",
            Self::Template(_) => "template",
        }
    }

    /// A quoted, debug-style rendering used for containers and namespace dumps.
    pub fn repr(&self) -> String {
        match self {
            Self::None => "None".to_string(),
            Self::Str(s) | Self::Template(s) => format!("{s:?}"),
            Self::Section(name) => format!("<section [{name}]>"),
            other => other.to_string(),
        }
    }

    /// Interprets the value as a list of items.
    ///
    /// Strings are split into lines; blank lines and `#` comments are dropped.
    pub fn to_items(&self) -> Vec<Self> {
        match self {
            Self::None => Vec::new(),
            Self::List(items) => items.clone(),
            Self::Map(map) => map.keys().cloned().map(Self::Str).collect(),
            Self::Str(s) | Self::Template(s) => s
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(|line| Self::Str(line.to_string()))
                .collect(),
            other => vec![other.clone()],
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // None renders as nothing, so `{{if}}`-less optional values disappear.
            Self::None => Ok(()),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) | Self::Template(s) => f.write_str(s),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(Self::repr).collect();
                write!(f, "[{}]", inner.join(", "))
            }
            Self::Map(map) => {
                let inner: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{k:?}: {}", v.repr()))
                    .collect();
                write!(f, "{{{}}}", inner.join(", "))
            }
            Self::Section(name) => write!(f, "[{name}]"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Map(map)
    }
}

/// Parses the usual spellings of a boolean.
pub fn asbool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "y" | "t" | "1" => Some(true),
        "false" | "no" | "off" | "n" | "f" | "0" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_template_conventions() {
        assert_eq!(Value::None.to_string(), "");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(
            Value::List(vec!["a".into(), Value::Int(2)]).to_string(),
            "[\"a\", 2]"
        );
    }

    #[test]
    fn test_to_items_splits_lines_and_drops_comments() {
        let v = Value::from("one\n\n  two  \n# skipped\nthree");
        let items: Vec<String> = v.to_items().iter().map(ToString::to_string).collect();
        assert_eq!(items, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_asbool_spellings() {
        assert_eq!(asbool("Yes"), Some(true));
        assert_eq!(asbool(" off "), Some(false));
        assert_eq!(asbool("maybe"), None);
    }
}
