/// A compiled class bound to one target
use std::sync::Arc;
use tracing::trace;

use super::runner::RunError;
use super::target::ScriptTarget;
use crate::compiler::{Instruction, Phase, PluginRequest, ScriptClass};

/// Executable instance of one compiled phase
#[derive(Debug)]
pub struct ScriptInstance {
    class: Arc<ScriptClass>,
    plugin_requests: Vec<PluginRequest>,
}

impl ScriptInstance {
    /// Instantiate `class` for a target, checking that it was compiled for
    /// the expected phase and the target's kind
    pub fn new(
        class: Arc<ScriptClass>,
        phase: Phase,
        target: &dyn ScriptTarget,
    ) -> Result<Self, RunError> {
        if class.phase != phase || class.target_kind != target.kind() {
            return Err(RunError::IncompatibleClass {
                class_name: class.name.clone(),
                expected: format!("{} of a {} script", phase, target.kind()),
                found: format!("{} of a {} script", class.phase, class.target_kind),
            });
        }
        Ok(Self {
            class,
            plugin_requests: Vec::new(),
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class.name
    }

    /// Execute every step against the target, in order
    pub fn run(&mut self, target: &mut dyn ScriptTarget) -> Result<(), RunError> {
        for step in &self.class.steps {
            trace!(class_name = %self.class.name, line = step.line, "executing step");
            let fail = |message: String| RunError::Execution {
                class_name: self.class.name.clone(),
                line: step.line,
                message,
            };

            match &step.instruction {
                Instruction::Println { text } => target.println(text),
                Instruction::RequestPlugin(request) => self.plugin_requests.push(request.clone()),
                Instruction::ApplyPlugin { id } => {
                    let manager = target.plugin_manager().ok_or_else(|| {
                        fail(format!("cannot apply plugin '{}': target has no plugins", id))
                    })?;
                    manager.apply(id).map_err(|e| fail(e.to_string()))?;
                }
                Instruction::SetProperty { key, value } => target.set_property(key, value),
            }
        }
        Ok(())
    }

    /// Plugin requests accumulated while running
    pub fn plugin_requests(&self) -> &[PluginRequest] {
        &self.plugin_requests
    }

    pub fn into_plugin_requests(self) -> Vec<PluginRequest> {
        self.plugin_requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Step, TargetKind};
    use crate::runtime::target::BuildTarget;
    use crate::scope::ScopeHandle;

    fn class(phase: Phase, kind: TargetKind, steps: Vec<Instruction>) -> Arc<ScriptClass> {
        Arc::new(ScriptClass {
            name: "unit".to_string(),
            phase,
            target_kind: kind,
            steps: steps
                .into_iter()
                .enumerate()
                .map(|(i, instruction)| Step {
                    line: i + 1,
                    instruction,
                })
                .collect(),
        })
    }

    #[test]
    fn test_run_collects_requests_and_effects() {
        let mut target = BuildTarget::new(TargetKind::Project, "app", ScopeHandle::root("core"));
        let class = class(
            Phase::Body,
            TargetKind::Project,
            vec![
                Instruction::Println {
                    text: "hi".to_string(),
                },
                Instruction::ApplyPlugin {
                    id: "java".to_string(),
                },
                Instruction::SetProperty {
                    key: "version".to_string(),
                    value: "1.0".to_string(),
                },
            ],
        );

        let mut instance = ScriptInstance::new(class, Phase::Body, &target).unwrap();
        instance.run(&mut target).unwrap();

        assert_eq!(target.journal().console_lines(), vec!["hi"]);
        assert_eq!(target.journal().applied_plugins(), vec!["java"]);
        assert_eq!(target.property("version"), Some("1.0"));
        assert!(instance.plugin_requests().is_empty());
    }

    #[test]
    fn test_incompatible_class_is_rejected() {
        let target = BuildTarget::new(TargetKind::Settings, "settings", ScopeHandle::root("core"));
        let class = class(Phase::Body, TargetKind::Project, vec![]);
        assert!(matches!(
            ScriptInstance::new(class, Phase::Body, &target),
            Err(RunError::IncompatibleClass { .. })
        ));
    }

    #[test]
    fn test_apply_plugin_without_manager_fails_with_line() {
        let mut target = BuildTarget::new(TargetKind::Settings, "settings", ScopeHandle::root("core"));
        let class = class(
            Phase::Body,
            TargetKind::Settings,
            vec![
                Instruction::Println {
                    text: "before".to_string(),
                },
                Instruction::ApplyPlugin {
                    id: "java".to_string(),
                },
            ],
        );

        let mut instance = ScriptInstance::new(class, Phase::Body, &target).unwrap();
        match instance.run(&mut target) {
            Err(RunError::Execution { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected execution error, got {:?}", other),
        }
        assert_eq!(target.journal().console_lines(), vec!["before"]);
    }
}
