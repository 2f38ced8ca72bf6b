// src/models.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// --- PROJECT FILE MODELS (FOR TOML) ---
// These are what a project author writes; the compiler turns them into
// runtime steps. Attribute values are kept as raw TOML values so a flag can be
// written either as `true` or as a template such as `"{{config.debug}}"`.

pub type RawValue = toml::Value;

/// One `*.toml` project definition.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProjectFile {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Configuration section for the settings; defaults to the project name.
    pub section: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub settings: Vec<SettingDef>,
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Integer(i64),
    Boolean(bool),
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Text(s) => f.write_str(s),
            Scalar::Integer(i) => write!(f, "{i}"),
            Scalar::Boolean(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct SettingDef {
    pub name: String,
    pub default: Option<Scalar>,
    pub help: Option<String>,
    /// A global option to inherit, written `section.option`.
    pub inherit: Option<String>,
}

/// A task entry, selected by its `kind` key.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskDef {
    Script(ScriptDef),
    CopyDir(CopyDirDef),
    CopyFile(CopyFileDef),
    EnsureFile(EnsureFileDef),
    EnsureSymlink(EnsureSymlinkDef),
    EnsureDir(EnsureDirDef),
    Checkout(CheckoutDef),
    SaveSetting(SaveSettingDef),
    Patch(PatchDef),
    Log(LogDef),
    CreateRuntime(CreateRuntimeDef),
    InstallPackages(InstallPackagesDef),
    WithService(WithServiceDef),
    Conditional(ConditionalDef),
    ForEach(ForEachDef),
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScriptDef {
    pub name: Option<String>,
    /// A command line, or a list of arguments.
    pub command: RawValue,
    pub cwd: Option<RawValue>,
    pub env: Option<BTreeMap<String, RawValue>>,
    pub stdin: Option<RawValue>,
    pub use_runtime: Option<RawValue>,
    #[serde(default)]
    pub accept_codes: Vec<i32>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CopyDirDef {
    pub name: Option<String>,
    pub source: RawValue,
    pub dest: RawValue,
    pub overwrite: Option<RawValue>,
    pub include_hidden: Option<RawValue>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CopyFileDef {
    pub name: Option<String>,
    pub source: RawValue,
    pub dest: RawValue,
    pub overwrite: Option<RawValue>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct EnsureFileDef {
    pub name: Option<String>,
    pub dest: RawValue,
    pub content: Option<RawValue>,
    pub content_path: Option<RawValue>,
    pub overwrite: Option<RawValue>,
    pub force_overwrite: Option<RawValue>,
    pub executable: Option<RawValue>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct EnsureSymlinkDef {
    pub name: Option<String>,
    pub source: RawValue,
    pub dest: RawValue,
    pub overwrite: Option<RawValue>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct EnsureDirDef {
    pub name: Option<String>,
    pub dest: RawValue,
    pub vcs_add: Option<RawValue>,
    pub vcs: Option<RawValue>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CheckoutDef {
    pub name: Option<String>,
    pub repository: RawValue,
    pub dest: RawValue,
    pub revision: Option<RawValue>,
    pub vcs: Option<RawValue>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct SaveSettingDef {
    pub name: Option<String>,
    pub section: Option<RawValue>,
    pub values: BTreeMap<String, RawValue>,
    pub overwrite: Option<RawValue>,
    pub overwrite_if_empty: Option<RawValue>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct PatchDef {
    pub name: Option<String>,
    pub files: RawValue,
    pub dest: RawValue,
    pub strip: Option<RawValue>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct LogDef {
    pub name: Option<String>,
    pub message: RawValue,
    pub level: Option<RawValue>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CreateRuntimeDef {
    pub name: Option<String>,
    pub path: RawValue,
    pub system_packages: Option<RawValue>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct InstallPackagesDef {
    pub name: Option<String>,
    pub packages: RawValue,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct WithServiceDef {
    pub name: Option<String>,
    pub start: RawValue,
    pub stop: RawValue,
    pub cwd: Option<RawValue>,
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct BranchDef {
    /// An expression, such as `config.use_cache` or `env.hostname == 'prod'`.
    pub when: String,
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ConditionalDef {
    pub name: Option<String>,
    pub branches: Vec<BranchDef>,
    #[serde(rename = "else", default)]
    pub otherwise: Vec<TaskDef>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ForEachDef {
    pub name: Option<String>,
    pub variable: String,
    /// A list, or a string template expanding to one item per line.
    pub values: RawValue,
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
}
