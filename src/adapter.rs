//! Script plugin adapters
//!
//! An adapter is the small per-script record that ties a script id to its
//! compiled phases. Phases whose execution would be a no-op are left out, so
//! applying the adapter never loads them.
//!
//! Adapters are persisted as TOML under
//! `generated-classes/script-plugins/adapters/<AdapterClass>.toml`:
//!
//! ```toml
//! # Precompiled my.plugin script plugin.
//! adapter_class = "MyPluginPlugin"
//! script_id = "my.plugin"
//! target_kind = "project"
//! preamble_class = "cp_precompiled_my_plugin"
//! body_class = "precompiled_my_plugin"
//! ```
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::compiler::{CompiledUnit, TargetKind};
use crate::logging::{operations, status};
use crate::pipeline::PipelineError;
use crate::runtime::{RunError, ScriptRunner, ScriptTarget};
use crate::script::ScriptDescriptor;

pub const ADAPTER_EXTENSION: &str = "toml";

/// Any failure while applying an adapter, tagged with the originating script
#[derive(Error, Debug)]
#[error("Failed to apply precompiled script '{script_id}': {cause}")]
pub struct AdapterApplyFailure {
    pub script_id: String,
    #[source]
    pub cause: RunError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    pub adapter_class: String,
    pub script_id: String,
    pub target_kind: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preamble_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_class: Option<String>,
}

impl AdapterDescriptor {
    pub fn for_script(
        descriptor: &ScriptDescriptor,
        preamble: Option<&CompiledUnit>,
        body: &CompiledUnit,
    ) -> Self {
        let referenced =
            |unit: &CompiledUnit| unit.run_does_something().then(|| unit.class_name().to_string());

        Self {
            adapter_class: descriptor.adapter_class_name().to_string(),
            script_id: descriptor.id().to_string(),
            target_kind: descriptor.target_kind(),
            preamble_class: preamble.and_then(referenced),
            body_class: referenced(body),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.adapter_class, ADAPTER_EXTENSION)
    }

    pub fn to_source(&self) -> Result<String, toml::ser::Error> {
        Ok(format!(
            "# Precompiled {} script plugin.\n{}",
            self.script_id,
            toml::to_string(self)?
        ))
    }

    pub fn parse(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Resolve the referenced classes through the target's scope and run them
    pub fn apply(&self, target: &mut dyn ScriptTarget) -> Result<(), AdapterApplyFailure> {
        info!(
            operation = operations::ADAPTER_APPLY,
            script_id = %self.script_id,
            target = %target.display_name(),
            "applying precompiled script"
        );

        self.run(target).map_err(|cause| {
            error!(
                operation = operations::ADAPTER_APPLY,
                status = status::ERROR,
                script_id = %self.script_id,
                error = %cause,
                "precompiled script failed"
            );
            AdapterApplyFailure {
                script_id: self.script_id.clone(),
                cause,
            }
        })
    }

    fn run(&self, target: &mut dyn ScriptTarget) -> Result<(), RunError> {
        if target.kind() != self.target_kind {
            return Err(RunError::IncompatibleTarget {
                expected: self.target_kind,
                found: target.kind(),
            });
        }

        let scope = target.scope().clone();
        let preamble = self
            .preamble_class
            .as_deref()
            .map(|name| scope.resolve_class(name))
            .transpose()?;
        let body = self
            .body_class
            .as_deref()
            .map(|name| scope.resolve_class(name))
            .transpose()?;

        ScriptRunner::new(target)?.run(preamble, body)
    }
}

/// Writes adapters atomically into one directory
#[derive(Debug, Clone)]
pub struct AdapterGenerator {
    adapters_dir: PathBuf,
}

impl AdapterGenerator {
    pub fn new(adapters_dir: PathBuf) -> Self {
        Self { adapters_dir }
    }

    pub fn adapters_dir(&self) -> &Path {
        &self.adapters_dir
    }

    /// Write one adapter; readers never observe a partially written file
    pub fn generate(&self, adapter: &AdapterDescriptor) -> Result<PathBuf, PipelineError> {
        let path = self.adapters_dir.join(adapter.file_name());
        let source = adapter
            .to_source()
            .map_err(|source| PipelineError::AdapterEncode {
                script_id: adapter.script_id.clone(),
                source,
            })?;
        let io_err = |source| PipelineError::AdapterWrite {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.adapters_dir).map_err(io_err)?;
        let mut file = NamedTempFile::new_in(&self.adapters_dir).map_err(io_err)?;
        file.write_all(source.as_bytes()).map_err(io_err)?;
        file.persist(&path).map_err(|e| io_err(e.error))?;

        debug!(
            operation = operations::ADAPTER_GENERATE,
            status = status::SUCCESS,
            script_id = %adapter.script_id,
            path = %path.display(),
            "generated adapter"
        );
        Ok(path)
    }
}

/// Adapters of one build output, keyed by script id
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, AdapterDescriptor>,
}

impl AdapterRegistry {
    /// Load every adapter in `dir`. A missing directory yields an empty registry.
    pub fn load_from_dir(dir: &Path) -> Result<Self, PipelineError> {
        let mut registry = Self::default();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(registry),
            Err(source) => {
                return Err(PipelineError::CacheIo {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        };

        for entry in entries {
            let path = entry
                .map_err(|source| PipelineError::CacheIo {
                    path: dir.to_path_buf(),
                    source,
                })?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ADAPTER_EXTENSION) {
                continue;
            }

            let source = fs::read_to_string(&path).map_err(|source| PipelineError::CacheIo {
                path: path.clone(),
                source,
            })?;
            let adapter = AdapterDescriptor::parse(&source)
                .map_err(|source| PipelineError::AdapterParse { path, source })?;
            registry.insert(adapter);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, adapter: AdapterDescriptor) {
        self.adapters.insert(adapter.script_id.clone(), adapter);
    }

    pub fn get(&self, script_id: &str) -> Option<&AdapterDescriptor> {
        self.adapters.get(script_id)
    }

    pub fn script_ids(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
