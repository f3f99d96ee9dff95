/// Plugin managers and the plugin-request applicator
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;
use tracing::{debug, info};

use super::target::{Journal, TargetEvent};
use crate::compiler::PluginRequest;
use crate::logging::{operations, status};
use crate::scope::ScopeHandle;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin with id '{0}' not found")]
    NotFound(String),

    #[error("Plugin with id '{0}' was requested more than once")]
    DuplicateRequest(String),

    #[error("Cannot apply plugin '{0}': target has no plugin manager")]
    NoPluginManager(String),
}

/// Applies plugins to one target
pub trait PluginManager {
    /// Apply a plugin. Returns false when it was already applied.
    fn apply(&mut self, plugin_id: &str) -> Result<bool, PluginError>;

    fn has_plugin(&self, plugin_id: &str) -> bool;

    /// Applied plugin ids in application order
    fn applied(&self) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct DefaultPluginManager {
    applied: Vec<String>,
    known: Option<BTreeSet<String>>,
    journal: Option<Journal>,
}

impl DefaultPluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept these ids; anything else is [`PluginError::NotFound`]
    pub fn with_known_plugins(mut self, known: BTreeSet<String>) -> Self {
        self.known = Some(known);
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }
}

impl PluginManager for DefaultPluginManager {
    fn apply(&mut self, plugin_id: &str) -> Result<bool, PluginError> {
        if self.has_plugin(plugin_id) {
            debug!(plugin_id = %plugin_id, "plugin already applied");
            return Ok(false);
        }
        if let Some(known) = &self.known {
            if !known.contains(plugin_id) {
                return Err(PluginError::NotFound(plugin_id.to_string()));
            }
        }

        self.applied.push(plugin_id.to_string());
        if let Some(journal) = &self.journal {
            journal.record(TargetEvent::PluginApplied(plugin_id.to_string()));
        }
        Ok(true)
    }

    fn has_plugin(&self, plugin_id: &str) -> bool {
        self.applied.iter().any(|id| id == plugin_id)
    }

    fn applied(&self) -> Vec<String> {
        self.applied.clone()
    }
}

/// Per-run context handed to the applicator alongside the requests
#[derive(Debug, Clone)]
pub struct ScriptHandler {
    scope: ScopeHandle,
    target_name: String,
}

impl ScriptHandler {
    pub fn new(scope: ScopeHandle, target_name: &str) -> Self {
        Self {
            scope,
            target_name: target_name.to_string(),
        }
    }

    pub fn scope(&self) -> &ScopeHandle {
        &self.scope
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }
}

/// Resolves and applies the plugin requests collected from a preamble
pub trait PluginRequestApplicator: Send + Sync {
    fn apply_plugins(
        &self,
        requests: &[PluginRequest],
        handler: &ScriptHandler,
        plugin_manager: Option<&mut dyn PluginManager>,
        scope: &ScopeHandle,
    ) -> Result<(), PluginError>;
}

/// Applies every `apply true` request in declaration order; `apply false`
/// requests are only resolved.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPluginRequestApplicator;

impl PluginRequestApplicator for DefaultPluginRequestApplicator {
    fn apply_plugins(
        &self,
        requests: &[PluginRequest],
        handler: &ScriptHandler,
        mut plugin_manager: Option<&mut dyn PluginManager>,
        _scope: &ScopeHandle,
    ) -> Result<(), PluginError> {
        let mut seen = HashSet::new();
        for request in requests {
            if !seen.insert(request.id.as_str()) {
                return Err(PluginError::DuplicateRequest(request.id.clone()));
            }
        }

        for request in requests {
            if !request.apply {
                debug!(
                    operation = operations::PLUGIN_APPLY,
                    status = status::SKIPPED,
                    plugin_id = %request.id,
                    target = %handler.target_name(),
                    "resolved plugin without applying"
                );
                continue;
            }

            let manager = plugin_manager
                .as_deref_mut()
                .ok_or_else(|| PluginError::NoPluginManager(request.id.clone()))?;
            let newly_applied = manager.apply(&request.id)?;
            info!(
                operation = operations::PLUGIN_APPLY,
                status = status::SUCCESS,
                plugin_id = %request.id,
                target = %handler.target_name(),
                newly_applied,
                "applied plugin {}",
                request
            );
        }
        Ok(())
    }
}
