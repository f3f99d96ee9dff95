/// Runs the two compiled phases of one script against a target
///
/// ```text
/// Idle --run--> lock scope --> [preamble: run, collect requests, apply plugins]
///                          --> [body: run] --> Completed
///                                          \-> Failed (no rollback)
/// ```
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::executable::ScriptInstance;
use super::plugins::{PluginError, ScriptHandler};
use super::target::ScriptTarget;
use crate::compiler::{Phase, ScriptClass, TargetKind};
use crate::logging::{operations, status};
use crate::scope::{ScopeError, ScopeHandle};

/// Name of the child scope bound for invocation targets
pub const INIT_PLUGIN_SCOPE_NAME: &str = "init-plugin";

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Script runner has already run")]
    AlreadyRun,

    #[error("Target '{target}' ({kind}) has no plugin manager, cannot apply requested plugins")]
    MissingPluginManager { target: String, kind: TargetKind },

    #[error("Class '{class_name}' was compiled as {found}, expected {expected}")]
    IncompatibleClass {
        class_name: String,
        expected: String,
        found: String,
    },

    #[error("Script for {expected} targets cannot be applied to a {found} target")]
    IncompatibleTarget {
        expected: TargetKind,
        found: TargetKind,
    },

    #[error("{class_name}, line {line}: {message}")]
    Execution {
        class_name: String,
        line: usize,
        message: String,
    },

    #[error("Failed to apply requested plugins: {0}")]
    PluginApplication(#[from] PluginError),

    #[error(transparent)]
    Scope(#[from] ScopeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Completed,
    Failed,
}

/// Single-use runner bound to one target
pub struct ScriptRunner<'t> {
    target: &'t mut dyn ScriptTarget,
    scope: ScopeHandle,
    /// Set when `scope` was created for this run and is released after it
    owns_scope: bool,
    state: RunState,
}

impl<'t> ScriptRunner<'t> {
    pub fn new(target: &'t mut dyn ScriptTarget) -> Result<Self, RunError> {
        let (scope, owns_scope) = match target.kind() {
            TargetKind::Invocation => (target.scope().create_child(INIT_PLUGIN_SCOPE_NAME)?, true),
            TargetKind::Project | TargetKind::Settings => (target.scope().clone(), false),
        };
        Ok(Self {
            target,
            scope,
            owns_scope,
            state: RunState::Idle,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Scope the phases execute through
    pub fn scope(&self) -> &ScopeHandle {
        &self.scope
    }

    /// Run the preamble (if any) to completion, including plugin application,
    /// then the body (if any). Can be called once.
    pub fn run(
        &mut self,
        preamble: Option<Arc<ScriptClass>>,
        body: Option<Arc<ScriptClass>>,
    ) -> Result<(), RunError> {
        if self.state != RunState::Idle {
            return Err(RunError::AlreadyRun);
        }

        let result = self.execute(preamble, body);
        let released = if self.owns_scope {
            self.scope.clone().release().map_err(RunError::from)
        } else {
            Ok(())
        };

        let result = result.and(released);
        self.state = if result.is_ok() {
            RunState::Completed
        } else {
            RunState::Failed
        };
        result
    }

    fn execute(
        &mut self,
        preamble: Option<Arc<ScriptClass>>,
        body: Option<Arc<ScriptClass>>,
    ) -> Result<(), RunError> {
        self.scope.lock()?;

        if let Some(class) = preamble {
            self.apply_preamble(class)?;
        }

        if let Some(class) = body {
            let mut instance = ScriptInstance::new(class, Phase::Body, &*self.target)?;
            debug!(
                operation = operations::RUN,
                class_name = %instance.class_name(),
                target = %self.target.display_name(),
                "executing script body"
            );
            instance.run(&mut *self.target)?;
        }

        info!(
            operation = operations::RUN,
            status = status::SUCCESS,
            target = %self.target.display_name(),
            "script run completed"
        );
        Ok(())
    }

    fn apply_preamble(&mut self, class: Arc<ScriptClass>) -> Result<(), RunError> {
        if self.target.plugin_manager().is_none() {
            return Err(RunError::MissingPluginManager {
                target: self.target.display_name().to_string(),
                kind: self.target.kind(),
            });
        }

        let mut instance = ScriptInstance::new(class, Phase::Preamble, &*self.target)?;
        debug!(
            operation = operations::RUN,
            class_name = %instance.class_name(),
            target = %self.target.display_name(),
            "executing plugin requests"
        );
        instance.run(&mut *self.target)?;
        let requests = instance.into_plugin_requests();

        let handler = ScriptHandler::new(self.scope.clone(), self.target.display_name());
        let applicator = self.target.services().applicator.clone();
        applicator.apply_plugins(
            &requests,
            &handler,
            self.target.plugin_manager(),
            &self.scope,
        )?;
        Ok(())
    }
}
