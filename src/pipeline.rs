//! Batch precompilation of script plugins
//!
//! One batch compiles every discovered script inside a dedicated child scope
//! of the session root, writes one adapter per script, locks the scope and
//! packages all compiled output into a single tree:
//!
//! ```text
//! <build>/compiled-scripts/classes/<ClassName>/      compile cache (classes)
//! <build>/compiled-scripts/metadata/<ClassName>/     compile cache (metadata)
//! <build>/generated-classes/script-plugins/classes/  packaged output
//! <build>/generated-classes/script-plugins/adapters/ one adapter per script
//! ```
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::adapter::{AdapterDescriptor, AdapterGenerator};
use crate::compiler::{CompileError, LoadError, Phase, ScriptCompiler};
use crate::logging::{operations, status};
use crate::scope::{ScopeError, ScopeHandle};
use crate::script::{CompileCache, ScriptDescriptor};

/// Name of the long-lived root scope of a session
pub const ROOT_SCOPE_NAME: &str = "core-and-plugins";

/// Name of the child scope every batch compiles into
pub const BATCH_SCOPE_NAME: &str = "pre-compiled-scripts";

/// Name of the child scope that exposes packaged output at apply time
pub const OUTPUT_SCOPE_NAME: &str = "script-plugins";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to compile {phase} of script '{script_id}': {cause}")]
    CompilationFailed {
        phase: Phase,
        script_id: String,
        #[source]
        cause: CompileError,
    },

    #[error("Cache I/O error at {path}: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to load compiled script '{script_id}': {source}")]
    Load {
        script_id: String,
        #[source]
        source: LoadError,
    },

    #[error("Class name '{class_name}' of script '{script_id}' is already used by script '{first}'")]
    DuplicateClassName {
        class_name: String,
        script_id: String,
        first: String,
    },

    #[error("Compilation of script '{script_id}' panicked: {message}")]
    WorkerPanicked { script_id: String, message: String },

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error("Failed to encode adapter for script '{script_id}': {source}")]
    AdapterEncode {
        script_id: String,
        #[source]
        source: toml::ser::Error,
    },

    #[error("Failed to write adapter {path}: {source}")]
    AdapterWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed adapter {path}: {source}")]
    AdapterParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl PipelineError {
    /// Phase the failure belongs to, when it is phase-specific
    pub fn phase(&self) -> Option<Phase> {
        match self {
            PipelineError::CompilationFailed { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// Directory layout below a build-output root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    root: PathBuf,
}

impl BuildLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn compiled_classes_dir(&self) -> PathBuf {
        self.root.join("compiled-scripts").join("classes")
    }

    pub fn compiled_metadata_dir(&self) -> PathBuf {
        self.root.join("compiled-scripts").join("metadata")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("generated-classes").join("script-plugins")
    }

    /// Packaged classes; compiled metadata lands in its `metadata/` subdirectory
    pub fn output_classes_dir(&self) -> PathBuf {
        self.output_dir().join("classes")
    }

    pub fn adapters_dir(&self) -> PathBuf {
        self.output_dir().join("adapters")
    }
}

/// Append-only aggregation of classes directories shared by all workers of a batch
#[derive(Debug, Default)]
pub struct ClassesSpec {
    dirs: Mutex<Vec<PathBuf>>,
}

impl ClassesSpec {
    /// Register one compiled classes directory for packaging
    pub fn from(&self, dir: PathBuf) {
        self.dirs.lock().push(dir);
    }

    /// Registered directories, sorted
    pub fn dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.dirs.lock().clone();
        dirs.sort();
        dirs
    }

    pub fn len(&self) -> usize {
        self.dirs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.lock().is_empty()
    }
}

/// Successful outcome for one script of a batch
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    pub adapter: AdapterDescriptor,
    pub adapter_path: PathBuf,
    /// Phases compiled in this batch; empty on a full cache hit
    pub recompiled: Vec<Phase>,
}

#[derive(Debug)]
pub struct ScriptReport {
    pub script_id: String,
    pub result: Result<ScriptOutcome, PipelineError>,
}

/// Result of one batch. Per-script failures never abort sibling scripts.
#[derive(Debug)]
pub struct BatchReport {
    pub scripts: Vec<ScriptReport>,
    /// Locked batch scope. The caller releases it once the loaded units are no longer needed.
    pub scope: ScopeHandle,
    pub packaged_files: usize,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.scripts.iter().all(|report| report.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &PipelineError)> {
        self.scripts.iter().filter_map(|report| match &report.result {
            Err(e) => Some((report.script_id.as_str(), e)),
            Ok(_) => None,
        })
    }

    pub fn outcome(&self, script_id: &str) -> Option<&ScriptOutcome> {
        self.scripts
            .iter()
            .find(|report| report.script_id == script_id)
            .and_then(|report| report.result.as_ref().ok())
    }
}

/// Drives one compile batch
pub struct Precompiler {
    layout: BuildLayout,
    cache: CompileCache,
    generator: AdapterGenerator,
    workers: usize,
}

impl Precompiler {
    pub fn new(
        layout: BuildLayout,
        compiler: Arc<dyn ScriptCompiler>,
    ) -> Result<Self, PipelineError> {
        let cache = CompileCache::new(
            layout.compiled_classes_dir(),
            layout.compiled_metadata_dir(),
            compiler,
        )?;
        let generator = AdapterGenerator::new(layout.adapters_dir());

        Ok(Self {
            layout,
            cache,
            generator,
            workers: num_cpus::get(),
        })
    }

    /// Number of compile workers; 0 means one per CPU
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = if workers == 0 {
            num_cpus::get()
        } else {
            workers
        };
        self
    }

    pub fn layout(&self) -> &BuildLayout {
        &self.layout
    }

    pub fn cache(&self) -> &CompileCache {
        &self.cache
    }

    /// Compile a batch of scripts into a fresh child scope of `root`
    pub fn compile_scripts(
        &self,
        root: &ScopeHandle,
        scripts: &[ScriptDescriptor],
    ) -> Result<BatchReport, PipelineError> {
        let scope = root.create_child(BATCH_SCOPE_NAME)?;
        let classes_spec = ClassesSpec::default();

        for dir in [self.layout.output_classes_dir(), self.layout.adapters_dir()] {
            reset_dir(&dir)?;
        }

        let mut results: Vec<(usize, Result<ScriptOutcome, PipelineError>)> = Vec::new();
        let mut pending = Vec::new();
        for (index, conflict) in find_class_name_conflicts(scripts).into_iter().enumerate() {
            match conflict {
                Some(error) => results.push((index, Err(error))),
                None => pending.push(index),
            }
        }

        let workers = self.workers.clamp(1, pending.len().max(1));
        info!(
            operation = operations::BATCH,
            script_count = scripts.len(),
            workers,
            scope = %scope.path()?,
            "starting compile batch"
        );

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<usize>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        for index in pending {
            // Receiver is alive until the scope below ends
            let _ = job_tx.send(index);
        }
        drop(job_tx);

        thread::scope(|s| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let scope = &scope;
                let classes_spec = &classes_spec;
                s.spawn(move || {
                    while let Ok(index) = job_rx.recv() {
                        let descriptor = &scripts[index];
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            self.compile_script(descriptor, scope, classes_spec)
                        }))
                        .unwrap_or_else(|payload| {
                            Err(PipelineError::WorkerPanicked {
                                script_id: descriptor.id().to_string(),
                                message: panic_message(payload.as_ref()),
                            })
                        });
                        let _ = result_tx.send((index, result));
                    }
                });
            }
        });
        drop(result_tx);

        // Every queued job reports exactly once, so sorting restores discovery order
        results.extend(result_rx.iter());
        results.sort_by_key(|(index, _)| *index);

        scope.lock()?;
        let packaged_files = package(
            &classes_spec.dirs(),
            self.cache.metadata_root(),
            &self.layout.output_classes_dir(),
        )?;

        let scripts: Vec<ScriptReport> = scripts
            .iter()
            .zip(results)
            .map(|(descriptor, (_, result))| ScriptReport {
                script_id: descriptor.id().to_string(),
                result,
            })
            .collect();

        let error_count = scripts.iter().filter(|r| r.result.is_err()).count();
        for report in &scripts {
            if let Err(e) = &report.result {
                error!(
                    operation = operations::COMPILE,
                    status = status::ERROR,
                    script_id = %report.script_id,
                    error = %e,
                    "script failed to compile"
                );
            }
        }
        info!(
            operation = operations::BATCH,
            success_count = scripts.len() - error_count,
            error_count,
            packaged_files,
            "compile batch finished"
        );

        Ok(BatchReport {
            scripts,
            scope,
            packaged_files,
        })
    }

    fn compile_script(
        &self,
        descriptor: &ScriptDescriptor,
        scope: &ScopeHandle,
        classes_spec: &ClassesSpec,
    ) -> Result<ScriptOutcome, PipelineError> {
        let compiled = self
            .cache
            .compile_and_cache(descriptor, scope, classes_spec)?;
        let adapter =
            AdapterDescriptor::for_script(descriptor, compiled.preamble.as_ref(), &compiled.body);
        let adapter_path = self.generator.generate(&adapter)?;

        Ok(ScriptOutcome {
            adapter,
            adapter_path,
            recompiled: compiled.recompiled,
        })
    }
}

/// Expose packaged output to apply-time lookups through a locked child of `root`
pub fn open_output(layout: &BuildLayout, root: &ScopeHandle) -> Result<ScopeHandle, PipelineError> {
    let scope = root.create_child(OUTPUT_SCOPE_NAME)?;
    let classes_dir = layout.output_classes_dir();
    if classes_dir.is_dir() {
        scope.export_classes_dir(&classes_dir)?;
    } else {
        warn!(dir = %classes_dir.display(), "no packaged script classes found");
    }
    scope.lock()?;
    Ok(scope)
}

/// Per script, the first class name that an earlier script already claimed
fn find_class_name_conflicts(scripts: &[ScriptDescriptor]) -> Vec<Option<PipelineError>> {
    let mut owners: HashMap<&str, &str> = HashMap::new();
    scripts
        .iter()
        .map(|descriptor| {
            let names = [
                descriptor.class_name(),
                descriptor.preamble_class_name(),
                descriptor.adapter_class_name(),
            ];
            let conflict = names.iter().find_map(|name| {
                owners.get(name).map(|first| PipelineError::DuplicateClassName {
                    class_name: name.to_string(),
                    script_id: descriptor.id().to_string(),
                    first: first.to_string(),
                })
            });
            if conflict.is_none() {
                for name in names {
                    owners.insert(name, descriptor.id());
                }
            }
            conflict
        })
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn reset_dir(dir: &Path) -> Result<(), PipelineError> {
    let io_err = |source| PipelineError::CacheIo {
        path: dir.to_path_buf(),
        source,
    };
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(e)),
    }
    fs::create_dir_all(dir).map_err(io_err)
}

/// Copy every registered classes dir into `dest` and the metadata root into
/// `dest/metadata`. Returns the number of files copied.
fn package(class_dirs: &[PathBuf], metadata_root: &Path, dest: &Path) -> Result<usize, PipelineError> {
    let mut copied = 0;
    for dir in class_dirs {
        copied += copy_tree(dir, dest)?;
    }
    if metadata_root.is_dir() {
        copied += copy_tree(metadata_root, &dest.join("metadata"))?;
    }
    info!(
        operation = operations::PACKAGE,
        status = status::SUCCESS,
        dest = %dest.display(),
        file_count = copied,
        "packaged compiled scripts"
    );
    Ok(copied)
}

fn copy_tree(src: &Path, dest: &Path) -> Result<usize, PipelineError> {
    let mut copied = 0;
    for entry in walkdir::WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| PipelineError::CacheIo {
            path: src.to_path_buf(),
            source: e.into(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| PipelineError::CacheIo {
                path: entry.path().to_path_buf(),
                source: io::Error::other(e),
            })?;
        let target = dest.join(relative);
        let io_err = |source| PipelineError::CacheIo {
            path: target.clone(),
            source,
        };

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(io_err)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
            fs::copy(entry.path(), &target).map_err(io_err)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompileRequest, CompiledUnit, DslCompiler, LoadRequest, TargetKind};
    use tempfile::TempDir;

    /// Panics on any script that prints "boom", otherwise compiles normally
    struct PanickingCompiler;

    impl ScriptCompiler for PanickingCompiler {
        fn compile(&self, request: &CompileRequest<'_>) -> Result<(), CompileError> {
            if request.source.contains("boom") {
                panic!("compiler crashed on {}", request.class_name);
            }
            DslCompiler.compile(request)
        }

        fn load_from_dir(&self, request: &LoadRequest<'_>) -> Result<CompiledUnit, LoadError> {
            DslCompiler.load_from_dir(request)
        }
    }

    fn precompiler(temp: &TempDir) -> Precompiler {
        Precompiler::new(
            BuildLayout::new(temp.path().join("build")),
            Arc::new(DslCompiler::new()),
        )
        .unwrap()
        .with_workers(2)
    }

    #[test]
    fn test_layout_paths() {
        let layout = BuildLayout::new("/b");
        assert_eq!(
            layout.compiled_classes_dir(),
            PathBuf::from("/b/compiled-scripts/classes")
        );
        assert_eq!(
            layout.adapters_dir(),
            PathBuf::from("/b/generated-classes/script-plugins/adapters")
        );
    }

    #[test]
    fn test_batch_compiles_packages_and_locks() {
        let temp = TempDir::new().unwrap();
        let precompiler = precompiler(&temp);
        let root = ScopeHandle::root("core-and-plugins");
        let scripts = vec![
            ScriptDescriptor::new("a", TargetKind::Project, "plugins { id 'base' }\nprintln 'a'"),
            ScriptDescriptor::new("b", TargetKind::Settings, "println 'b'"),
        ];

        let report = precompiler.compile_scripts(&root, &scripts).unwrap();

        assert!(report.is_success());
        assert!(report.scope.is_locked().unwrap());
        assert_eq!(
            report.scope.path().unwrap(),
            "core-and-plugins:pre-compiled-scripts"
        );

        let output = precompiler.layout().output_classes_dir();
        assert!(output.join("precompiled_a.class.json").is_file());
        assert!(output.join("cp_precompiled_a.class.json").is_file());
        assert!(output.join("precompiled_b.class.json").is_file());
        assert!(output.join("metadata/precompiled_b/metadata.json").is_file());
        assert_eq!(report.packaged_files, 6);

        let outcome = report.outcome("a").unwrap();
        assert!(outcome.adapter_path.ends_with("APlugin.toml"));
        assert!(outcome.adapter_path.is_file());
    }

    #[test]
    fn test_failure_does_not_abort_siblings() {
        let temp = TempDir::new().unwrap();
        let precompiler = precompiler(&temp);
        let root = ScopeHandle::root("core");
        let scripts = vec![
            ScriptDescriptor::new("good", TargetKind::Project, "println 'ok'"),
            ScriptDescriptor::new("bad", TargetKind::Project, "println"),
            ScriptDescriptor::new("late", TargetKind::Project, "println 'x'\nplugins { id 'base' }"),
        ];

        let report = precompiler.compile_scripts(&root, &scripts).unwrap();

        assert!(!report.is_success());
        assert!(report.outcome("good").is_some());
        let failures: Vec<_> = report.failures().map(|(id, e)| (id, e.phase())).collect();
        assert_eq!(
            failures,
            vec![("bad", Some(Phase::Body)), ("late", Some(Phase::Body))]
        );
        assert!(!precompiler
            .layout()
            .adapters_dir()
            .join("BadPlugin.toml")
            .exists());
    }

    #[test]
    fn test_worker_panic_is_reported_per_script() {
        let temp = TempDir::new().unwrap();
        let precompiler = Precompiler::new(
            BuildLayout::new(temp.path().join("build")),
            Arc::new(PanickingCompiler),
        )
        .unwrap()
        .with_workers(2);
        let scripts = vec![
            ScriptDescriptor::new("crash", TargetKind::Project, "println 'boom'"),
            ScriptDescriptor::new("fine", TargetKind::Project, "println 'ok'"),
        ];

        let report = precompiler
            .compile_scripts(&ScopeHandle::root("core"), &scripts)
            .unwrap();

        assert_eq!(report.scripts[0].script_id, "crash");
        match &report.scripts[0].result {
            Err(PipelineError::WorkerPanicked { script_id, message }) => {
                assert_eq!(script_id, "crash");
                assert!(message.contains("compiler crashed on precompiled_crash"));
            }
            other => panic!("expected worker panic, got {:?}", other),
        }
        assert!(report.outcome("fine").is_some());
        assert!(report.scope.is_locked().unwrap());
    }

    #[test]
    fn test_duplicate_class_names_fail_later_script() {
        let temp = TempDir::new().unwrap();
        let precompiler = precompiler(&temp);
        let root = ScopeHandle::root("core");
        let scripts = vec![
            ScriptDescriptor::new("my.plugin", TargetKind::Project, "println 'a'"),
            ScriptDescriptor::new("my-plugin", TargetKind::Project, "println 'b'"),
        ];

        let report = precompiler.compile_scripts(&root, &scripts).unwrap();

        assert!(report.outcome("my.plugin").is_some());
        match &report.scripts[1].result {
            Err(PipelineError::DuplicateClassName {
                class_name, first, ..
            }) => {
                assert_eq!(class_name, "precompiled_my_plugin");
                assert_eq!(first, "my.plugin");
            }
            other => panic!("expected duplicate class name, got {:?}", other),
        }
    }

    #[test]
    fn test_open_output_exposes_packaged_classes() {
        let temp = TempDir::new().unwrap();
        let precompiler = precompiler(&temp);
        let scripts = vec![ScriptDescriptor::new("a", TargetKind::Project, "println 'a'")];
        precompiler
            .compile_scripts(&ScopeHandle::root("compile"), &scripts)
            .unwrap();

        let root = ScopeHandle::root("apply");
        let output = open_output(precompiler.layout(), &root).unwrap();
        let target_scope = output.create_child("project").unwrap();

        assert!(output.is_locked().unwrap());
        assert!(target_scope.resolve_class("precompiled_a").is_ok());
        assert!(root.resolve_class("precompiled_a").is_err());
    }

    #[test]
    fn test_released_batch_leaves_root_usable() {
        let temp = TempDir::new().unwrap();
        let precompiler = precompiler(&temp);
        let root = ScopeHandle::root("core");
        let scripts = vec![ScriptDescriptor::new("a", TargetKind::Project, "println 'a'")];

        let first = precompiler.compile_scripts(&root, &scripts).unwrap();
        let first_scope = first.scope.clone();
        first.scope.release().unwrap();
        assert!(first_scope.is_released());

        let second = precompiler.compile_scripts(&root, &scripts).unwrap();
        assert!(second.is_success());
        assert!(second.scope.resolve_class("precompiled_a").is_ok());
        assert_eq!(second.scope.reuse_count().unwrap(), 1);
    }

    #[test]
    fn test_classes_spec_is_append_only() {
        let spec = ClassesSpec::default();
        assert!(spec.is_empty());
        spec.from(PathBuf::from("/b"));
        spec.from(PathBuf::from("/a"));
        assert_eq!(spec.len(), 2);
        assert_eq!(spec.dirs(), vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }
}
