/// Script compiler boundary
///
/// The pipeline drives compilation through [`ScriptCompiler`]; the crate ships
/// [`DslCompiler`] for the bundled DSL. Compiled output is two directories per
/// phase: a classes directory holding `<ClassName>.class.json` and a metadata
/// directory holding `metadata.json`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::scope::{ScopeError, ScopeHandle};

pub mod dsl;

pub use dsl::{BodyVerifier, DslCompiler, NoopHook};

pub const METADATA_FILE: &str = "metadata.json";
pub const CLASS_FILE_SUFFIX: &str = ".class.json";
pub const METADATA_VERSION: u32 = 1;

/// Kind of object a script configures; doubles as the script's base type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    Project,
    Settings,
    /// The top-level build invocation (init scripts)
    Invocation,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Project => "project",
            TargetKind::Settings => "settings",
            TargetKind::Invocation => "invocation",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compilation phase; also the discriminator between the two units of a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// The plugin-request preamble
    Preamble,
    Body,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Preamble => f.write_str("preamble"),
            Phase::Body => f.write_str("body"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRequest {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub apply: bool,
}

impl fmt::Display for PluginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[id: '{}'", self.id)?;
        if let Some(version) = &self.version {
            write!(f, ", version: '{}'", version)?;
        }
        if !self.apply {
            f.write_str(", apply: false")?;
        }
        f.write_str("]")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Instruction {
    Println { text: String },
    RequestPlugin(PluginRequest),
    ApplyPlugin { id: String },
    SetProperty { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub line: usize,
    #[serde(flatten)]
    pub instruction: Instruction,
}

/// A loadable compiled unit, persisted as `<name>.class.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptClass {
    pub name: String,
    pub phase: Phase,
    pub target_kind: TargetKind,
    pub steps: Vec<Step>,
}

#[derive(Error, Debug)]
pub enum ClassFileError {
    #[error("Failed to access class file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed class file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ScriptClass {
    pub fn file_name(class_name: &str) -> String {
        format!("{}{}", class_name, CLASS_FILE_SUFFIX)
    }

    pub fn write_to(&self, classes_dir: &Path) -> Result<PathBuf, ClassFileError> {
        let path = classes_dir.join(Self::file_name(&self.name));
        let io_err = |source| ClassFileError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(classes_dir).map_err(io_err)?;
        let json = serde_json::to_string_pretty(self).map_err(|source| {
            ClassFileError::Malformed {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, json).map_err(io_err)?;
        Ok(path)
    }

    pub fn read_from(path: &Path) -> Result<Self, ClassFileError> {
        let json = fs::read_to_string(path).map_err(|source| ClassFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ClassFileError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read every class file directly inside `dir`, sorted by class name
    pub fn read_all(dir: &Path) -> Result<Vec<Self>, ClassFileError> {
        let io_err = |source| ClassFileError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut classes = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_class = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(CLASS_FILE_SUFFIX));
            if is_class && path.is_file() {
                classes.push(Self::read_from(&path)?);
            }
        }
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(classes)
    }
}

/// Per-operation payload recorded alongside a compiled unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UnitData {
    None,
    BuildScript { has_imperative_statements: bool },
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub version: u32,
    pub class_name: String,
    pub content_hash: String,
    pub phase: Phase,
    pub target_kind: TargetKind,
    pub run_does_something: bool,
    pub has_methods: bool,
    pub data: UnitData,
    pub created_at: DateTime<Utc>,
}

impl UnitMetadata {
    pub fn path_in(metadata_dir: &Path) -> PathBuf {
        metadata_dir.join(METADATA_FILE)
    }

    pub fn write_to(&self, metadata_dir: &Path) -> Result<(), LoadError> {
        let path = Self::path_in(metadata_dir);
        let io_err = |source| LoadError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(metadata_dir).map_err(io_err)?;
        let json = serde_json::to_string_pretty(self).map_err(|e| LoadError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&path, json).map_err(io_err)
    }

    pub fn read_from(metadata_dir: &Path) -> Result<Self, LoadError> {
        let path = Self::path_in(metadata_dir);
        let json = fs::read_to_string(&path).map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|e| LoadError::Corrupt {
            path,
            message: e.to_string(),
        })
    }
}

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: {message}")]
    Rejected { line: usize, message: String },

    #[error("Failed to write compiled output: {0}")]
    Output(#[from] ClassFileError),

    #[error("Failed to write compiled metadata: {0}")]
    Metadata(#[source] Box<LoadError>),
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt cache entry {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error(
        "Content hash mismatch for '{class_name}': expected {expected}, cache entry has {found}"
    )]
    HashMismatch {
        class_name: String,
        expected: String,
        found: String,
    },

    #[error("Cache entry for '{class_name}' was compiled as {found}, expected {expected}")]
    OperationMismatch {
        class_name: String,
        expected: String,
        found: String,
    },

    #[error(transparent)]
    Scope(#[from] ScopeError),
}

/// Side-effect hook run over every compiled step of one phase
pub trait CompileHook: Send + Sync {
    fn verify(&self, step: &Step) -> Result<(), String>;
}

pub struct CompileRequest<'a> {
    pub source: &'a str,
    /// Scope whose exports the compiled unit may reference
    pub export_scope: &'a ScopeHandle,
    pub classes_dir: &'a Path,
    pub metadata_dir: &'a Path,
    pub class_name: &'a str,
    pub content_hash: &'a str,
    pub phase: Phase,
    pub base_script: TargetKind,
    pub hook: &'a dyn CompileHook,
}

pub struct LoadRequest<'a> {
    pub source: &'a str,
    pub content_hash: &'a str,
    pub scope: &'a ScopeHandle,
    pub classes_dir: &'a Path,
    pub metadata_dir: &'a Path,
    pub class_name: &'a str,
    pub phase: Phase,
    pub base_script: TargetKind,
}

/// External compiler collaborator
pub trait ScriptCompiler: Send + Sync {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<(), CompileError>;

    fn load_from_dir(&self, request: &LoadRequest<'_>) -> Result<CompiledUnit, LoadError>;
}

/// A loaded phase of one script
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    class: Arc<ScriptClass>,
    content_hash: String,
    run_does_something: bool,
    has_methods: bool,
    data: UnitData,
    scope: ScopeHandle,
}

impl CompiledUnit {
    pub fn new(class: Arc<ScriptClass>, metadata: UnitMetadata, scope: ScopeHandle) -> Self {
        Self {
            class,
            content_hash: metadata.content_hash,
            run_does_something: metadata.run_does_something,
            has_methods: metadata.has_methods,
            data: metadata.data,
            scope,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class.name
    }

    pub fn load_class(&self) -> Arc<ScriptClass> {
        Arc::clone(&self.class)
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// False when running the unit is a guaranteed no-op
    pub fn run_does_something(&self) -> bool {
        self.run_does_something
    }

    pub fn has_methods(&self) -> bool {
        self.has_methods
    }

    pub fn data(&self) -> &UnitData {
        &self.data
    }

    pub fn on_reuse(&self) -> Result<(), ScopeError> {
        self.scope.on_reuse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_class_file_format() {
        let class = ScriptClass {
            name: "precompiled_demo".to_string(),
            phase: Phase::Body,
            target_kind: TargetKind::Project,
            steps: vec![
                Step {
                    line: 1,
                    instruction: Instruction::Println {
                        text: "hi".to_string(),
                    },
                },
                Step {
                    line: 2,
                    instruction: Instruction::RequestPlugin(PluginRequest {
                        id: "base".to_string(),
                        version: None,
                        apply: true,
                    }),
                },
            ],
        };

        let json = serde_json::to_value(&class).unwrap();
        assert_eq!(json["steps"][0]["op"], "println");
        assert_eq!(json["steps"][0]["line"], 1);
        assert_eq!(json["steps"][1]["op"], "request-plugin");
        assert_eq!(json["steps"][1]["id"], "base");
        assert_eq!(json["target_kind"], "project");
    }

    #[test]
    fn test_read_all_ignores_other_files() {
        let temp = TempDir::new().unwrap();
        let class = ScriptClass {
            name: "precompiled_a".to_string(),
            phase: Phase::Preamble,
            target_kind: TargetKind::Settings,
            steps: vec![],
        };
        class.write_to(temp.path()).unwrap();
        fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let classes = ScriptClass::read_all(temp.path()).unwrap();
        assert_eq!(classes, vec![class]);
    }

    #[test]
    fn test_malformed_class_file() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("broken.class.json"), "{").unwrap();
        assert!(matches!(
            ScriptClass::read_all(temp.path()),
            Err(ClassFileError::Malformed { .. })
        ));
    }

    #[test]
    fn test_plugin_request_display() {
        let request = PluginRequest {
            id: "org.example.lint".to_string(),
            version: Some("1.2".to_string()),
            apply: false,
        };
        assert_eq!(
            request.to_string(),
            "[id: 'org.example.lint', version: '1.2', apply: false]"
        );
    }
}
