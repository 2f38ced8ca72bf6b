//! # Namespace
//!
//! The variable scope templates are rendered against. It layers explicit
//! variables (environment, project, task, loop variables) over the sections
//! of a [`ConfigStore`]; reading a configuration option through the namespace
//! expands any markup in its raw value, recursively, with the same namespace.
//!
//! Expansion is guarded twice: a value that refers back to itself is reported
//! as a cycle, and nesting deeper than [`MAX_RECURSION_DEPTH`] is rejected.

use crate::constants::MAX_RECURSION_DEPTH;
use crate::core::config_store::ConfigStore;
use crate::core::expr::Scope;
use crate::core::template::{TemplateError, render_str};
use crate::core::value::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A fresh scope for one task (or one orchestration step).
#[derive(Debug)]
pub struct Namespace<'a> {
    store: &'a ConfigStore,
    vars: BTreeMap<String, Value>,
    base_path: Option<PathBuf>,
    stack: RefCell<Vec<String>>,
}

impl<'a> Namespace<'a> {
    pub fn new(store: &'a ConfigStore) -> Self {
        Self {
            store,
            vars: BTreeMap::new(),
            base_path: None,
            stack: RefCell::new(Vec::new()),
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.vars.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn vars(&self) -> &BTreeMap<String, Value> {
        &self.vars
    }

    pub fn store(&self) -> &ConfigStore {
        self.store
    }

    /// Renders `template`; `name` identifies it in error messages.
    pub fn interpolate(&self, template: &str, name: &str) -> Result<String, TemplateError> {
        self.guarded(name, false, || render_str(template, name, self))
    }

    /// Renders every string inside `value`, descending into lists and maps.
    pub fn interpolate_value(&self, value: &Value, name: &str) -> Result<Value, TemplateError> {
        match value {
            Value::Str(raw) | Value::Template(raw) => Ok(Value::Str(self.interpolate(raw, name)?)),
            Value::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|item| self.interpolate_value(item, name))
                    .collect::<Result<_, _>>()?,
            )),
            Value::Map(map) => Ok(Value::Map(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.interpolate_value(v, name)?)))
                    .collect::<Result<_, TemplateError>>()?,
            )),
            other => Ok(other.clone()),
        }
    }

    /// A readable dump of every variable and configuration section.
    pub fn string_repr(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.vars {
            out.push_str(&format!("{name} = {}\n", value.repr()));
        }
        for section in self.store.section_names() {
            out.push_str(&format!("[{section}]\n"));
            for (option, raw) in self.store.items(section) {
                out.push_str(&format!("  {option} = {raw:?}\n"));
            }
        }
        out
    }

    /// Runs `f` with `key` pushed on the expansion stack.
    fn guarded<T>(
        &self,
        key: &str,
        detect_cycle: bool,
        f: impl FnOnce() -> Result<T, TemplateError>,
    ) -> Result<T, TemplateError> {
        {
            let stack = self.stack.borrow();
            if detect_cycle && stack.iter().any(|entry| entry == key) {
                let mut chain: Vec<String> = stack
                    .iter()
                    .skip_while(|entry| entry.as_str() != key)
                    .cloned()
                    .collect();
                chain.push(key.to_string());
                return Err(TemplateError::Cycle(chain));
            }
            if stack.len() >= MAX_RECURSION_DEPTH {
                return Err(TemplateError::DepthExceeded(MAX_RECURSION_DEPTH));
            }
        }

        self.stack.borrow_mut().push(key.to_string());
        let _pop = scopeguard::guard(&self.stack, |stack| {
            stack.borrow_mut().pop();
        });
        f()
    }
}

impl Scope for Namespace<'_> {
    fn lookup(&self, name: &str) -> Result<Value, TemplateError> {
        if let Some(value) = self.vars.get(name) {
            return Ok(value.clone());
        }
        if self.store.has_section(name) {
            return Ok(Value::Section(name.to_string()));
        }
        Err(TemplateError::Undefined(name.to_string()))
    }

    fn section_option(&self, section: &str, option: &str) -> Result<Value, TemplateError> {
        let raw = self
            .store
            .get(section, option)
            .ok_or_else(|| TemplateError::Undefined(format!("{section}.{option}")))?;
        let key = format!("{section}.{option}");
        let label = format!("[{section}] {option}");
        self.guarded(&key, true, || render_str(raw, &label, self))
            .map(Value::Str)
    }

    fn expand(&self, raw: &str) -> Result<String, TemplateError> {
        self.guarded(raw, true, || render_str(raw, "<value>", self))
    }

    fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_store::Source;

    fn store() -> ConfigStore {
        let mut store = ConfigStore::new();
        store.set("DEFAULT", "root", "/srv", Source::Unset);
        store.set("app", "name", "demo", Source::Unset);
        store.set("app", "home", "{{app.root}}/{{config.name}}", Source::Unset);
        store
    }

    #[test]
    fn test_interpolate_without_markup_is_identity() {
        let store = store();
        let ns = Namespace::new(&store);
        assert_eq!(ns.interpolate("plain {text}", "t").unwrap(), "plain {text}");
    }

    #[test]
    fn test_interpolate_variable_matches_display() {
        let store = store();
        let mut ns = Namespace::new(&store);
        ns.set("x", Value::Int(5));
        assert_eq!(
            ns.interpolate("{{x}}", "t").unwrap(),
            ns.get("x").unwrap().to_string()
        );
    }

    #[test]
    fn test_config_values_expand_recursively() {
        let store = store();
        let mut ns = Namespace::new(&store);
        ns.set("config", Value::Section("app".to_string()));
        assert_eq!(ns.interpolate("{{config.home}}", "t").unwrap(), "/srv/demo");
        assert_eq!(ns.interpolate("{{app.home}}", "t").unwrap(), "/srv/demo");
    }

    #[test]
    fn test_containers_are_interpolated_element_wise() {
        let store = store();
        let ns = Namespace::new(&store);
        let value = Value::List(vec![Value::from("{{app.name}}"), Value::Int(1)]);
        assert_eq!(
            ns.interpolate_value(&value, "t").unwrap(),
            Value::List(vec![Value::from("demo"), Value::Int(1)])
        );
    }

    #[test]
    fn test_self_referencing_values_are_rejected() {
        let mut store = ConfigStore::new();
        store.set("app", "a", "{{app.b}}", Source::Unset);
        store.set("app", "b", "x{{app.a}}", Source::Unset);
        let ns = Namespace::new(&store);

        let err = ns.interpolate("{{app.a}}", "t").unwrap_err();
        match err.root() {
            TemplateError::Cycle(chain) => {
                assert_eq!(chain, &["app.a", "app.b", "app.a"]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_option_is_undefined() {
        let store = store();
        let ns = Namespace::new(&store);
        let err = ns.interpolate("{{app.nope}}", "t").unwrap_err();
        assert!(matches!(err.root(), TemplateError::Undefined(n) if n == "app.nope"));
    }
}
