/// Compile cache for precompiled scripts
///
/// Each phase of each script owns one entry:
/// - `<classes_root>/<ClassName>/` holds the compiled class file
/// - `<metadata_root>/<ClassName>/metadata.json` holds the unit metadata
///
/// Entries are keyed by class name (script identity plus phase) and
/// validated against the script's content hash.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::descriptor::ScriptDescriptor;
use crate::compiler::{
    BodyVerifier, CompileHook, CompileRequest, CompiledUnit, LoadError, LoadRequest, NoopHook,
    Phase, ScriptClass, ScriptCompiler, UnitMetadata,
};
use crate::logging::{operations, status};
use crate::pipeline::{ClassesSpec, PipelineError};
use crate::scope::ScopeHandle;

/// Both loaded phases of one script
#[derive(Debug, Clone)]
pub struct CompiledScript {
    /// `None` when the script has no plugins block
    pub preamble: Option<CompiledUnit>,
    pub body: CompiledUnit,
    /// Phases that had to be (re)compiled in this run
    pub recompiled: Vec<Phase>,
}

/// One cache entry as listed by [`CompileCache::list`]
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub class_name: String,
    pub metadata: UnitMetadata,
    pub classes_dir: PathBuf,
    pub metadata_dir: PathBuf,
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub noop_entries: usize,
    pub corrupt_entries: usize,
}

enum Probe {
    Missing,
    Stale(String),
    Fresh,
}

/// Script compile cache manager
pub struct CompileCache {
    classes_root: PathBuf,
    metadata_root: PathBuf,
    compiler: Arc<dyn ScriptCompiler>,
}

impl CompileCache {
    /// Create new compile cache manager, creating both roots
    pub fn new(
        classes_root: PathBuf,
        metadata_root: PathBuf,
        compiler: Arc<dyn ScriptCompiler>,
    ) -> Result<Self, PipelineError> {
        for dir in [&classes_root, &metadata_root] {
            fs::create_dir_all(dir).map_err(|source| PipelineError::CacheIo {
                path: dir.clone(),
                source,
            })?;
        }

        Ok(Self {
            classes_root,
            metadata_root,
            compiler,
        })
    }

    pub fn classes_root(&self) -> &Path {
        &self.classes_root
    }

    pub fn metadata_root(&self) -> &Path {
        &self.metadata_root
    }

    pub fn classes_dir(&self, class_name: &str) -> PathBuf {
        self.classes_root.join(class_name)
    }

    pub fn metadata_dir(&self, class_name: &str) -> PathBuf {
        self.metadata_root.join(class_name)
    }

    /// Compile (or reuse) and load both phases of a script
    pub fn compile_and_cache(
        &self,
        descriptor: &ScriptDescriptor,
        scope: &ScopeHandle,
        classes_spec: &ClassesSpec,
    ) -> Result<CompiledScript, PipelineError> {
        let mut recompiled = Vec::new();

        let preamble = if descriptor.has_preamble() {
            let (unit, compiled) =
                self.compile_phase(descriptor, Phase::Preamble, scope, classes_spec)?;
            if compiled {
                recompiled.push(Phase::Preamble);
            }
            Some(unit)
        } else {
            None
        };

        let (body, compiled) = self.compile_phase(descriptor, Phase::Body, scope, classes_spec)?;
        if compiled {
            recompiled.push(Phase::Body);
        }

        Ok(CompiledScript {
            preamble,
            body,
            recompiled,
        })
    }

    /// Returns the loaded unit and whether the compiler ran
    fn compile_phase(
        &self,
        descriptor: &ScriptDescriptor,
        phase: Phase,
        scope: &ScopeHandle,
        classes_spec: &ClassesSpec,
    ) -> Result<(CompiledUnit, bool), PipelineError> {
        let class_name = descriptor.class_name_for(phase);
        let classes_dir = self.classes_dir(class_name);
        let metadata_dir = self.metadata_dir(class_name);

        let needs_compile = match self.probe(descriptor, phase)? {
            Probe::Fresh => false,
            Probe::Missing => true,
            Probe::Stale(reason) => {
                info!(
                    operation = operations::COMPILE,
                    status = status::STALE,
                    script_id = %descriptor.id(),
                    class_name = %class_name,
                    reason = %reason,
                    "discarding stale cache entry"
                );
                self.remove(class_name)?;
                true
            }
        };

        if needs_compile {
            let hook: &dyn CompileHook = match phase {
                Phase::Preamble => &NoopHook,
                Phase::Body => &BodyVerifier,
            };
            self.compiler
                .compile(&CompileRequest {
                    source: descriptor.source_for(phase),
                    export_scope: scope,
                    classes_dir: &classes_dir,
                    metadata_dir: &metadata_dir,
                    class_name,
                    content_hash: descriptor.content_hash(),
                    phase,
                    base_script: descriptor.target_kind(),
                    hook,
                })
                .map_err(|cause| PipelineError::CompilationFailed {
                    phase,
                    script_id: descriptor.id().to_string(),
                    cause,
                })?;
            info!(
                operation = operations::COMPILE,
                status = status::MISS,
                script_id = %descriptor.id(),
                class_name = %class_name,
                phase = %phase,
                "compiled script phase"
            );
        } else {
            debug!(
                operation = operations::COMPILE,
                status = status::HIT,
                script_id = %descriptor.id(),
                class_name = %class_name,
                phase = %phase,
                "reusing cached script phase"
            );
        }

        classes_spec.from(classes_dir.clone());

        let unit = self
            .compiler
            .load_from_dir(&LoadRequest {
                source: descriptor.source_for(phase),
                content_hash: descriptor.content_hash(),
                scope,
                classes_dir: &classes_dir,
                metadata_dir: &metadata_dir,
                class_name,
                phase,
                base_script: descriptor.target_kind(),
            })
            .map_err(|error| match error {
                LoadError::Io { path, source } => PipelineError::CacheIo { path, source },
                other => PipelineError::Load {
                    script_id: descriptor.id().to_string(),
                    source: other,
                },
            })?;

        if !needs_compile {
            unit.on_reuse()?;
        }

        Ok((unit, needs_compile))
    }

    fn probe(&self, descriptor: &ScriptDescriptor, phase: Phase) -> Result<Probe, PipelineError> {
        let class_name = descriptor.class_name_for(phase);
        let metadata_dir = self.metadata_dir(class_name);
        let class_file = self
            .classes_dir(class_name)
            .join(ScriptClass::file_name(class_name));

        if !UnitMetadata::path_in(&metadata_dir).exists() {
            return Ok(Probe::Missing);
        }
        if !class_file.exists() {
            return Ok(Probe::Stale("class file missing".to_string()));
        }

        match UnitMetadata::read_from(&metadata_dir) {
            Ok(metadata) if metadata.class_name != class_name => Ok(Probe::Stale(format!(
                "entry belongs to '{}'",
                metadata.class_name
            ))),
            Ok(metadata)
                if metadata.phase != phase
                    || metadata.target_kind != descriptor.target_kind() =>
            {
                Ok(Probe::Stale(format!(
                    "compiled as {} of a {} script",
                    metadata.phase, metadata.target_kind
                )))
            }
            Ok(metadata) if metadata.content_hash != descriptor.content_hash() => {
                Ok(Probe::Stale("content hash changed".to_string()))
            }
            Ok(_) => Ok(Probe::Fresh),
            Err(LoadError::Io { path, source }) => Err(PipelineError::CacheIo { path, source }),
            Err(other) => Ok(Probe::Stale(other.to_string())),
        }
    }

    /// Remove the entry for one class
    pub fn remove(&self, class_name: &str) -> Result<(), PipelineError> {
        for dir in [self.classes_dir(class_name), self.metadata_dir(class_name)] {
            remove_dir_if_exists(&dir)?;
        }
        Ok(())
    }

    /// List all cache entries with readable metadata, sorted by class name
    pub fn list(&self) -> Result<Vec<CacheEntry>, PipelineError> {
        let mut entries = Vec::new();
        for class_name in self.entry_names()? {
            let metadata_dir = self.metadata_dir(&class_name);
            match UnitMetadata::read_from(&metadata_dir) {
                Ok(metadata) => entries.push(CacheEntry {
                    classes_dir: self.classes_dir(&class_name),
                    metadata_dir,
                    class_name,
                    metadata,
                }),
                Err(e) => warn!(class_name = %class_name, error = %e, "skipping unreadable cache entry"),
            }
        }
        Ok(entries)
    }

    /// Get cache statistics
    pub fn stats(&self) -> Result<CacheStats, PipelineError> {
        let mut stats = CacheStats::default();
        for class_name in self.entry_names()? {
            stats.total_entries += 1;
            stats.total_size_bytes += dir_size(&self.classes_dir(&class_name));
            stats.total_size_bytes += dir_size(&self.metadata_dir(&class_name));
            match UnitMetadata::read_from(&self.metadata_dir(&class_name)) {
                Ok(metadata) if !metadata.run_does_something => stats.noop_entries += 1,
                Ok(_) => {}
                Err(_) => stats.corrupt_entries += 1,
            }
        }
        Ok(stats)
    }

    /// Clean all cache entries
    pub fn clean_all(&self) -> Result<(), PipelineError> {
        for root in [&self.classes_root, &self.metadata_root] {
            remove_dir_if_exists(root)?;
            fs::create_dir_all(root).map_err(|source| PipelineError::CacheIo {
                path: root.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn entry_names(&self) -> Result<Vec<String>, PipelineError> {
        let mut names = Vec::new();
        let read_err = |source| PipelineError::CacheIo {
            path: self.metadata_root.clone(),
            source,
        };
        for entry in fs::read_dir(&self.metadata_root).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            if entry.file_type().map_err(read_err)?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn remove_dir_if_exists(dir: &Path) -> Result<(), PipelineError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PipelineError::CacheIo {
            path: dir.to_path_buf(),
            source,
        }),
    }
}

fn dir_size(dir: &Path) -> u64 {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}
