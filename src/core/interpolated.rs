// src/core/interpolated.rs

use crate::core::namespace::Namespace;
use crate::core::template::TemplateError;
use crate::core::value::{Value, asbool};
use thiserror::Error;

/// Errors raised when reading a task attribute.
#[derive(Error, Debug)]
pub enum AttributeError {
    /// The attribute was read before its task was bound and resolved.
    #[error("No value resolved for attribute '{0}' (the task has not been bound)")]
    Unresolved(&'static str),
    /// The resolved value has the wrong shape.
    #[error("Attribute '{attribute}' {message}")]
    Invalid {
        attribute: &'static str,
        message: String,
    },
    /// The raw template could not be rendered.
    #[error("Could not interpolate attribute '{attribute}'")]
    Template {
        attribute: &'static str,
        #[source]
        source: TemplateError,
    },
}

/// A task attribute held as a raw template and resolved explicitly.
///
/// The raw value is kept for descriptions and re-resolution; the resolved value
/// only exists after [`Interpolated::resolve`] has been called with a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolated {
    attribute: &'static str,
    raw: Value,
    resolved: Option<Value>,
}

impl Interpolated {
    pub fn new(attribute: &'static str, raw: impl Into<Value>) -> Self {
        Self {
            attribute,
            raw: raw.into(),
            resolved: None,
        }
    }

    pub fn attribute(&self) -> &'static str {
        self.attribute
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// The raw value as it should appear in a namespace (lazily expanded).
    pub fn lazy(&self) -> Value {
        match &self.raw {
            Value::Str(s) => Value::Template(s.clone()),
            other => other.clone(),
        }
    }

    /// Renders the raw value against `ns` and caches the result.
    pub fn resolve(&mut self, ns: &Namespace<'_>, owner: &str) -> Result<&Value, AttributeError> {
        let name = format!("{owner} attribute {}", self.attribute);
        let value = ns
            .interpolate_value(&self.raw, &name)
            .map_err(|source| AttributeError::Template {
                attribute: self.attribute,
                source,
            })?;
        Ok(&*self.resolved.insert(value))
    }

    /// Forgets the resolved value, returning the attribute to its unbound state.
    pub fn clear(&mut self) {
        self.resolved = None;
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn get(&self) -> Result<&Value, AttributeError> {
        self.resolved
            .as_ref()
            .ok_or(AttributeError::Unresolved(self.attribute))
    }

    pub fn string(&self) -> Result<String, AttributeError> {
        Ok(self.get()?.to_string())
    }

    /// The resolved value as a boolean, accepting the usual spellings.
    pub fn flag(&self) -> Result<bool, AttributeError> {
        match self.get()? {
            Value::Bool(b) => Ok(*b),
            Value::None => Ok(false),
            Value::Int(i) => Ok(*i != 0),
            other => {
                let text = other.to_string();
                asbool(&text).ok_or_else(|| AttributeError::Invalid {
                    attribute: self.attribute,
                    message: format!("is not a boolean: {text:?}"),
                })
            }
        }
    }

    /// The resolved value as a string, or `None` when unset or empty.
    pub fn optional(&self) -> Result<Option<String>, AttributeError> {
        let value = self.string()?;
        Ok((!value.is_empty()).then_some(value))
    }

    /// The resolved value as an integer.
    pub fn int(&self) -> Result<i64, AttributeError> {
        match self.get()? {
            Value::Int(i) => Ok(*i),
            other => {
                let text = other.to_string();
                text.trim().parse().map_err(|_| AttributeError::Invalid {
                    attribute: self.attribute,
                    message: format!("is not an integer: {text:?}"),
                })
            }
        }
    }

    /// The resolved value as a list of strings (lines, for a plain string).
    pub fn items(&self) -> Result<Vec<String>, AttributeError> {
        Ok(self.get()?.to_items().iter().map(ToString::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_store::ConfigStore;

    #[test]
    fn test_reading_before_resolve_names_the_attribute() {
        let attr = Interpolated::new("dest", "{{x}}");
        let err = attr.get().unwrap_err();
        assert!(matches!(err, AttributeError::Unresolved("dest")));
        assert!(err.to_string().contains("dest"));
    }

    #[test]
    fn test_template_failure_names_the_cause_once() {
        let store = ConfigStore::new();
        let ns = Namespace::new(&store);

        let mut attr = Interpolated::new("content", "{{nowhere}}");
        let err = attr.resolve(&ns, "task").unwrap_err();
        let report = format!("{:#}", anyhow::Error::new(err));
        assert!(report.starts_with("Could not interpolate attribute 'content': "));
        assert_eq!(report.matches("nowhere").count(), 1);
    }

    #[test]
    fn test_resolve_then_clear() {
        let store = ConfigStore::new();
        let mut ns = Namespace::new(&store);
        ns.set("x", "value");

        let mut attr = Interpolated::new("dest", "/srv/{{x}}");
        attr.resolve(&ns, "task 1").unwrap();
        assert_eq!(attr.string().unwrap(), "/srv/value");
        assert_eq!(attr.raw(), &Value::from("/srv/{{x}}"));

        attr.clear();
        assert!(!attr.is_resolved());
    }

    #[test]
    fn test_flag_accepts_templated_booleans() {
        let store = ConfigStore::new();
        let mut ns = Namespace::new(&store);
        ns.set("force", "yes");

        let mut attr = Interpolated::new("overwrite", "{{force}}");
        attr.resolve(&ns, "task").unwrap();
        assert!(attr.flag().unwrap());

        let mut bad = Interpolated::new("overwrite", "perhaps");
        bad.resolve(&ns, "task").unwrap();
        assert!(matches!(bad.flag(), Err(AttributeError::Invalid { .. })));
    }

    #[test]
    fn test_unset_attributes_read_as_absent() {
        let store = ConfigStore::new();
        let ns = Namespace::new(&store);

        let mut cwd = Interpolated::new("cwd", Value::None);
        cwd.resolve(&ns, "task").unwrap();
        assert_eq!(cwd.optional().unwrap(), None);
        assert!(!cwd.flag().unwrap());

        let mut strip = Interpolated::new("strip", "1");
        strip.resolve(&ns, "task").unwrap();
        assert_eq!(strip.int().unwrap(), 1);
    }
}
