/// End-to-end pipeline scenarios: compile a batch, then apply adapters to
/// fresh targets the way a later build invocation would.
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use prescript::adapter::AdapterRegistry;
use prescript::compiler::{
    CompileError, CompileRequest, CompiledUnit, DslCompiler, LoadError, LoadRequest, PluginRequest,
    ScriptCompiler,
};
use prescript::pipeline::{open_output, BuildLayout, PipelineError, Precompiler};
use prescript::runtime::{
    BuildTarget, PluginError, PluginManager, PluginRequestApplicator, ScriptHandler,
    ScriptServices, TargetEvent,
};
use prescript::scope::{ScopeError, ScopeHandle};
use prescript::script::ScriptDescriptor;
use prescript::{Phase, TargetKind};
use tempfile::TempDir;

/// Delegates to the DSL compiler and counts compilations
#[derive(Default)]
struct CountingCompiler {
    compiles: AtomicUsize,
}

impl ScriptCompiler for CountingCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<(), CompileError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        DslCompiler.compile(request)
    }

    fn load_from_dir(&self, request: &LoadRequest<'_>) -> Result<CompiledUnit, LoadError> {
        DslCompiler.load_from_dir(request)
    }
}

/// Records every applicator call, then applies like the default one
#[derive(Default)]
struct RecordingApplicator {
    calls: Mutex<Vec<Vec<String>>>,
}

impl PluginRequestApplicator for RecordingApplicator {
    fn apply_plugins(
        &self,
        requests: &[PluginRequest],
        handler: &ScriptHandler,
        plugin_manager: Option<&mut dyn PluginManager>,
        scope: &ScopeHandle,
    ) -> Result<(), PluginError> {
        self.calls
            .lock()
            .push(requests.iter().map(|r| r.id.clone()).collect());
        prescript::runtime::DefaultPluginRequestApplicator.apply_plugins(
            requests,
            handler,
            plugin_manager,
            scope,
        )
    }
}

struct Harness {
    temp: TempDir,
    compiler: Arc<CountingCompiler>,
    applicator: Arc<RecordingApplicator>,
}

impl Harness {
    fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            compiler: Arc::new(CountingCompiler::default()),
            applicator: Arc::new(RecordingApplicator::default()),
        }
    }

    fn layout(&self) -> BuildLayout {
        BuildLayout::new(self.temp.path().join("build"))
    }

    fn precompiler(&self) -> Precompiler {
        Precompiler::new(self.layout(), self.compiler.clone())
            .unwrap()
            .with_workers(2)
    }

    fn compile(&self, scripts: &[ScriptDescriptor]) -> prescript::BatchReport {
        let report = self
            .precompiler()
            .compile_scripts(&ScopeHandle::root("core-and-plugins"), scripts)
            .unwrap();
        assert!(report.is_success(), "batch failed: {:?}", report.scripts);
        report
    }

    /// Apply the adapter of `script_id` to a fresh project-style target
    fn apply(&self, script_id: &str, kind: TargetKind) -> BuildTarget {
        let layout = self.layout();
        let registry = AdapterRegistry::load_from_dir(&layout.adapters_dir()).unwrap();
        let adapter = registry.get(script_id).unwrap();

        let root = ScopeHandle::root("apply-session");
        let plugins = open_output(&layout, &root).unwrap();
        let mut target = BuildTarget::new(kind, "app", plugins.create_child("app").unwrap())
            .with_services(ScriptServices {
                applicator: self.applicator.clone(),
            });
        adapter.apply(&mut target).unwrap();
        target
    }

    fn compiles(&self) -> usize {
        self.compiler.compiles.load(Ordering::SeqCst)
    }

    fn applicator_calls(&self) -> Vec<Vec<String>> {
        self.applicator.calls.lock().clone()
    }
}

#[test]
fn test_body_only_script_prints_without_plugin_application() {
    let harness = Harness::new();
    harness.compile(&[ScriptDescriptor::new(
        "my.plugin",
        TargetKind::Project,
        "println 'hi'",
    )]);

    let target = harness.apply("my.plugin", TargetKind::Project);

    assert_eq!(target.journal().console_lines(), vec!["hi"]);
    assert!(harness.applicator_calls().is_empty());
}

#[test]
fn test_preamble_only_script_applies_once_and_skips_body() {
    let harness = Harness::new();
    let report = harness.compile(&[ScriptDescriptor::new(
        "base.only",
        TargetKind::Project,
        "plugins { id 'base' }",
    )]);

    let adapter = &report.outcome("base.only").unwrap().adapter;
    assert_eq!(adapter.body_class, None);
    assert_eq!(
        adapter.preamble_class.as_deref(),
        Some("cp_precompiled_base_only")
    );

    let target = harness.apply("base.only", TargetKind::Project);

    assert_eq!(harness.applicator_calls(), vec![vec!["base".to_string()]]);
    assert_eq!(
        target.journal().events(),
        vec![TargetEvent::PluginApplied("base".to_string())]
    );
}

#[test]
fn test_unchanged_script_is_a_cache_hit() {
    let harness = Harness::new();
    let script = ScriptDescriptor::new(
        "demo",
        TargetKind::Project,
        "plugins { id 'base' }\nprintln 'hi'\n",
    );

    let first = harness.compile(std::slice::from_ref(&script));
    assert_eq!(harness.compiles(), 2);

    let second = harness.compile(std::slice::from_ref(&script));
    assert_eq!(harness.compiles(), 2);

    let (a, b) = (first.outcome("demo").unwrap(), second.outcome("demo").unwrap());
    assert_eq!(a.recompiled, vec![Phase::Preamble, Phase::Body]);
    assert!(b.recompiled.is_empty());
    assert_eq!(a.adapter, b.adapter);
}

#[test]
fn test_single_character_edit_recompiles() {
    let harness = Harness::new();
    harness.compile(&[ScriptDescriptor::new(
        "demo",
        TargetKind::Project,
        "plugins { id 'base' }\nprintln 'hi'\n",
    )]);
    let report = harness.compile(&[ScriptDescriptor::new(
        "demo",
        TargetKind::Project,
        "plugins { id 'base' }\nprintln 'ho'\n",
    )]);

    // The hash covers the whole source, so both phases are rebuilt
    assert_eq!(
        report.outcome("demo").unwrap().recompiled,
        vec![Phase::Preamble, Phase::Body]
    );
    assert_eq!(harness.compiles(), 4);

    let target = harness.apply("demo", TargetKind::Project);
    assert_eq!(target.journal().console_lines(), vec!["ho"]);
}

#[test]
fn test_stale_metadata_fails_fast_on_load() {
    let temp = TempDir::new().unwrap();
    let layout = BuildLayout::new(temp.path());
    let script = ScriptDescriptor::new("demo", TargetKind::Project, "println 'hi'");

    let scope = ScopeHandle::root("core");
    let result = DslCompiler.load_from_dir(&LoadRequest {
        source: script.body(),
        content_hash: "0000",
        scope: &scope,
        classes_dir: &layout.compiled_classes_dir().join(script.class_name()),
        metadata_dir: &layout.compiled_metadata_dir().join(script.class_name()),
        class_name: script.class_name(),
        phase: Phase::Body,
        base_script: TargetKind::Project,
    });
    assert!(matches!(result, Err(LoadError::Io { .. })));

    let precompiler = Precompiler::new(layout.clone(), Arc::new(DslCompiler)).unwrap();
    precompiler
        .compile_scripts(&ScopeHandle::root("core"), std::slice::from_ref(&script))
        .unwrap();

    let result = DslCompiler.load_from_dir(&LoadRequest {
        source: script.body(),
        content_hash: "0000",
        scope: &ScopeHandle::root("core"),
        classes_dir: &layout.compiled_classes_dir().join(script.class_name()),
        metadata_dir: &layout.compiled_metadata_dir().join(script.class_name()),
        class_name: script.class_name(),
        phase: Phase::Body,
        base_script: TargetKind::Project,
    });
    assert!(matches!(result, Err(LoadError::HashMismatch { .. })));
}

#[test]
fn test_empty_preamble_produces_no_preamble_reference() {
    let harness = Harness::new();
    let report = harness.compile(&[ScriptDescriptor::new(
        "quiet",
        TargetKind::Project,
        "plugins {\n}\nprintln 'body'\n",
    )]);

    let outcome = report.outcome("quiet").unwrap();
    assert_eq!(outcome.adapter.preamble_class, None);
    let source = fs::read_to_string(&outcome.adapter_path).unwrap();
    assert!(!source.contains("preamble_class"));

    let target = harness.apply("quiet", TargetKind::Project);
    assert_eq!(target.journal().console_lines(), vec!["body"]);
    assert!(harness.applicator_calls().is_empty());
}

#[test]
fn test_preamble_plugins_applied_before_body_effects() {
    let harness = Harness::new();
    harness.compile(&[ScriptDescriptor::new(
        "ordered",
        TargetKind::Project,
        "plugins {\n  id 'base'\n  id 'java'\n}\nprintln 'configuring'\next.group = 'org.example'\napply plugin: 'lint'\n",
    )]);

    let target = harness.apply("ordered", TargetKind::Project);

    assert_eq!(
        target.journal().events(),
        vec![
            TargetEvent::PluginApplied("base".to_string()),
            TargetEvent::PluginApplied("java".to_string()),
            TargetEvent::Console("configuring".to_string()),
            TargetEvent::PropertySet {
                key: "group".to_string(),
                value: "org.example".to_string(),
            },
            TargetEvent::PluginApplied("lint".to_string()),
        ]
    );
}

#[test]
fn test_separate_batches_cannot_see_each_other() {
    let temp = TempDir::new().unwrap();
    let root = ScopeHandle::root("core-and-plugins");

    let first = Precompiler::new(BuildLayout::new(temp.path().join("a")), Arc::new(DslCompiler))
        .unwrap()
        .compile_scripts(
            &root,
            &[ScriptDescriptor::new("a", TargetKind::Project, "println 'a'")],
        )
        .unwrap();
    let second = Precompiler::new(BuildLayout::new(temp.path().join("b")), Arc::new(DslCompiler))
        .unwrap()
        .compile_scripts(
            &root,
            &[ScriptDescriptor::new("b", TargetKind::Project, "println 'b'")],
        )
        .unwrap();

    assert!(first.scope.resolve_class("precompiled_a").is_ok());
    assert!(matches!(
        first.scope.resolve_class("precompiled_b"),
        Err(ScopeError::ClassNotFound { .. })
    ));
    assert!(second.scope.resolve_class("precompiled_a").is_err());
    assert!(root.resolve_class("precompiled_a").is_err());
}

#[test]
fn test_settings_script_with_plugins_fails_with_script_id() {
    let harness = Harness::new();
    harness.compile(&[ScriptDescriptor::new(
        "company",
        TargetKind::Settings,
        "plugins { id 'base' }\nprintln 'settings'",
    )]);

    let layout = harness.layout();
    let registry = AdapterRegistry::load_from_dir(&layout.adapters_dir()).unwrap();
    let plugins = open_output(&layout, &ScopeHandle::root("session")).unwrap();
    let mut target = BuildTarget::new(
        TargetKind::Settings,
        "settings",
        plugins.create_child("settings").unwrap(),
    );

    let failure = registry
        .get("company")
        .unwrap()
        .apply(&mut target)
        .unwrap_err();
    assert_eq!(failure.script_id, "company");
    assert!(failure.to_string().contains("no plugin manager"));
    assert!(target.journal().events().is_empty());
}

#[test]
fn test_compile_failure_is_reported_per_script() {
    let harness = Harness::new();
    let report = harness
        .precompiler()
        .compile_scripts(
            &ScopeHandle::root("core"),
            &[
                ScriptDescriptor::new("ok", TargetKind::Project, "println 'fine'"),
                ScriptDescriptor::new("broken", TargetKind::Project, "plugins { id }"),
            ],
        )
        .unwrap();

    assert!(report.outcome("ok").is_some());
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    let (script_id, error) = failures[0];
    assert_eq!(script_id, "broken");
    assert!(matches!(
        error,
        PipelineError::CompilationFailed {
            phase: Phase::Preamble,
            ..
        }
    ));
}
