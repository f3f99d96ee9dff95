/// Compiler for the bundled script DSL
use chrono::Utc;
use std::collections::HashMap;
use tracing::debug;

use super::{
    CompileError, CompileHook, CompileRequest, CompiledUnit, Instruction, LoadError, LoadRequest,
    Phase, PluginRequest, ScriptClass, ScriptCompiler, Step, UnitData, UnitMetadata,
    METADATA_VERSION,
};
use crate::dsl::{parse, tokenize, Statement, Stmt};

/// Hook for phases that need no verification
pub struct NoopHook;

impl CompileHook for NoopHook {
    fn verify(&self, _step: &Step) -> Result<(), String> {
        Ok(())
    }
}

/// Body-phase hook: plugin requests must live in the leading plugins block
pub struct BodyVerifier;

impl CompileHook for BodyVerifier {
    fn verify(&self, step: &Step) -> Result<(), String> {
        match step.instruction {
            Instruction::RequestPlugin(_) => Err(
                "all plugins {} blocks must appear before any other statements in the script"
                    .to_string(),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DslCompiler;

impl DslCompiler {
    pub fn new() -> Self {
        Self
    }

    fn lower(&self, phase: Phase, stmts: Vec<Stmt>) -> Result<Vec<Step>, CompileError> {
        let mut steps = Vec::new();
        let mut requested: HashMap<String, usize> = HashMap::new();

        for stmt in stmts {
            let line = stmt.line;
            match (phase, stmt.statement) {
                (_, Statement::PluginsBlock(specs)) => {
                    for spec in specs {
                        if let Some(first) = requested.get(&spec.id) {
                            return Err(CompileError::Syntax {
                                line: spec.line,
                                message: format!(
                                    "plugin with id '{}' was already requested at line {}",
                                    spec.id, first
                                ),
                            });
                        }
                        requested.insert(spec.id.clone(), spec.line);
                        steps.push(Step {
                            line: spec.line,
                            instruction: Instruction::RequestPlugin(PluginRequest {
                                id: spec.id,
                                version: spec.version,
                                apply: spec.apply,
                            }),
                        });
                    }
                }
                (Phase::Preamble, _) => {
                    return Err(CompileError::Syntax {
                        line,
                        message: "only plugins {} blocks are allowed in the plugin request phase"
                            .to_string(),
                    })
                }
                (Phase::Body, Statement::Println(text)) => steps.push(Step {
                    line,
                    instruction: Instruction::Println { text },
                }),
                (Phase::Body, Statement::ApplyPlugin(id)) => steps.push(Step {
                    line,
                    instruction: Instruction::ApplyPlugin { id },
                }),
                (Phase::Body, Statement::Assign { key, value }) => steps.push(Step {
                    line,
                    instruction: Instruction::SetProperty { key, value },
                }),
            }
        }

        Ok(steps)
    }
}

impl ScriptCompiler for DslCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<(), CompileError> {
        let tokens = tokenize(request.source).map_err(|e| CompileError::Syntax {
            line: e.line,
            message: e.message,
        })?;
        let stmts = parse(&tokens).map_err(|e| CompileError::Syntax {
            line: e.line,
            message: e.message,
        })?;
        let steps = self.lower(request.phase, stmts)?;

        for step in &steps {
            request
                .hook
                .verify(step)
                .map_err(|message| CompileError::Rejected {
                    line: step.line,
                    message,
                })?;
        }

        let data = match request.phase {
            Phase::Preamble => UnitData::None,
            Phase::Body => UnitData::BuildScript {
                has_imperative_statements: steps
                    .iter()
                    .any(|s| !matches!(s.instruction, Instruction::RequestPlugin(_))),
            },
        };

        let metadata = UnitMetadata {
            version: METADATA_VERSION,
            class_name: request.class_name.to_string(),
            content_hash: request.content_hash.to_string(),
            phase: request.phase,
            target_kind: request.base_script,
            run_does_something: !steps.is_empty(),
            has_methods: false,
            data,
            created_at: Utc::now(),
        };

        let class = ScriptClass {
            name: request.class_name.to_string(),
            phase: request.phase,
            target_kind: request.base_script,
            steps,
        };

        class.write_to(request.classes_dir)?;
        metadata
            .write_to(request.metadata_dir)
            .map_err(|e| CompileError::Metadata(Box::new(e)))?;

        debug!(
            class_name = %request.class_name,
            phase = %request.phase,
            steps = class.steps.len(),
            "compiled script unit"
        );
        Ok(())
    }

    fn load_from_dir(&self, request: &LoadRequest<'_>) -> Result<CompiledUnit, LoadError> {
        let metadata = UnitMetadata::read_from(request.metadata_dir)?;

        if metadata.class_name != request.class_name {
            return Err(LoadError::Corrupt {
                path: UnitMetadata::path_in(request.metadata_dir),
                message: format!(
                    "entry belongs to '{}', expected '{}'",
                    metadata.class_name, request.class_name
                ),
            });
        }
        if metadata.phase != request.phase || metadata.target_kind != request.base_script {
            return Err(LoadError::OperationMismatch {
                class_name: request.class_name.to_string(),
                expected: format!("{} of a {} script", request.phase, request.base_script),
                found: format!("{} of a {} script", metadata.phase, metadata.target_kind),
            });
        }
        if metadata.content_hash != request.content_hash {
            return Err(LoadError::HashMismatch {
                class_name: request.class_name.to_string(),
                expected: request.content_hash.to_string(),
                found: metadata.content_hash,
            });
        }

        request.scope.export_classes_dir(request.classes_dir)?;
        let class = request.scope.resolve_class(request.class_name)?;

        Ok(CompiledUnit::new(class, metadata, request.scope.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::TargetKind;
    use crate::scope::ScopeHandle;
    use std::path::Path;
    use tempfile::TempDir;

    fn compile(
        source: &str,
        phase: Phase,
        hook: &dyn CompileHook,
    ) -> (TempDir, Result<(), CompileError>) {
        let temp = TempDir::new().unwrap();
        let scope = ScopeHandle::root("test");
        let classes_dir = temp.path().join("classes/unit");
        let metadata_dir = temp.path().join("metadata/unit");
        let result = DslCompiler::new().compile(&CompileRequest {
            source,
            export_scope: &scope,
            classes_dir: &classes_dir,
            metadata_dir: &metadata_dir,
            class_name: "unit",
            content_hash: "abc",
            phase,
            base_script: TargetKind::Project,
            hook,
        });
        (temp, result)
    }

    fn load(root: &Path, phase: Phase, hash: &str) -> Result<CompiledUnit, LoadError> {
        let scope = ScopeHandle::root("test");
        DslCompiler::new().load_from_dir(&LoadRequest {
            source: "",
            content_hash: hash,
            scope: &scope,
            classes_dir: &root.join("classes/unit"),
            metadata_dir: &root.join("metadata/unit"),
            class_name: "unit",
            phase,
            base_script: TargetKind::Project,
        })
    }

    #[test]
    fn test_compile_and_load_body() {
        let (temp, result) = compile("println 'hi'\next.a = 'b'\n", Phase::Body, &BodyVerifier);
        result.unwrap();

        let unit = load(temp.path(), Phase::Body, "abc").unwrap();
        assert_eq!(unit.class_name(), "unit");
        assert!(unit.run_does_something());
        assert!(!unit.has_methods());
        assert_eq!(
            unit.data(),
            &UnitData::BuildScript {
                has_imperative_statements: true
            }
        );
        assert_eq!(unit.load_class().steps.len(), 2);
    }

    #[test]
    fn test_empty_body_does_nothing() {
        let (temp, result) = compile("   \n// only a comment\n", Phase::Body, &BodyVerifier);
        result.unwrap();

        let unit = load(temp.path(), Phase::Body, "abc").unwrap();
        assert!(!unit.run_does_something());
    }

    #[test]
    fn test_empty_plugins_block_does_nothing() {
        let (temp, result) = compile("plugins { }", Phase::Preamble, &NoopHook);
        result.unwrap();

        let unit = load(temp.path(), Phase::Preamble, "abc").unwrap();
        assert!(!unit.run_does_something());
        assert_eq!(unit.data(), &UnitData::None);
    }

    #[test]
    fn test_body_verifier_rejects_late_plugins_block() {
        let (_temp, result) = compile(
            "println 'x'\nplugins { id 'base' }\n",
            Phase::Body,
            &BodyVerifier,
        );
        match result {
            Err(CompileError::Rejected { line, message }) => {
                assert_eq!(line, 2);
                assert!(message.contains("must appear before any other statements"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_preamble_rejects_other_statements() {
        let (_temp, result) = compile("println 'x'", Phase::Preamble, &NoopHook);
        assert!(matches!(result, Err(CompileError::Syntax { line: 1, .. })));
    }

    #[test]
    fn test_duplicate_plugin_request() {
        let (_temp, result) = compile(
            "plugins {\n id 'base'\n id 'base'\n}",
            Phase::Preamble,
            &NoopHook,
        );
        match result {
            Err(CompileError::Syntax { line, message }) => {
                assert_eq!(line, 3);
                assert!(message.contains("already requested at line 2"));
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_detects_hash_mismatch() {
        let (temp, result) = compile("println 'hi'", Phase::Body, &BodyVerifier);
        result.unwrap();

        assert!(matches!(
            load(temp.path(), Phase::Body, "different"),
            Err(LoadError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_load_detects_phase_mismatch() {
        let (temp, result) = compile("println 'hi'", Phase::Body, &BodyVerifier);
        result.unwrap();

        assert!(matches!(
            load(temp.path(), Phase::Preamble, "abc"),
            Err(LoadError::OperationMismatch { .. })
        ));
    }

    #[test]
    fn test_load_missing_entry() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            load(temp.path(), Phase::Body, "abc"),
            Err(LoadError::Io { .. })
        ));
    }
}
