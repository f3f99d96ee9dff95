/// Objects scripts are applied to
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::plugins::{DefaultPluginManager, DefaultPluginRequestApplicator, PluginManager, PluginRequestApplicator};
use crate::compiler::TargetKind;
use crate::scope::ScopeHandle;

/// Ambient services available to every script executed against a target
#[derive(Clone)]
pub struct ScriptServices {
    pub applicator: Arc<dyn PluginRequestApplicator>,
}

impl Default for ScriptServices {
    fn default() -> Self {
        Self {
            applicator: Arc::new(DefaultPluginRequestApplicator),
        }
    }
}

impl std::fmt::Debug for ScriptServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptServices").finish_non_exhaustive()
    }
}

/// A live object configured by precompiled scripts
pub trait ScriptTarget {
    fn kind(&self) -> TargetKind;

    fn display_name(&self) -> &str;

    /// Scope compiled classes are resolved and executed through
    fn scope(&self) -> &ScopeHandle;

    fn services(&self) -> &ScriptServices;

    fn println(&mut self, text: &str);

    fn set_property(&mut self, key: &str, value: &str);

    /// `None` for targets that cannot have plugins applied
    fn plugin_manager(&mut self) -> Option<&mut dyn PluginManager>;
}

/// Observable side effect on a [`BuildTarget`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetEvent {
    PluginApplied(String),
    Console(String),
    PropertySet { key: String, value: String },
}

/// Ordered record of side effects, shared with the target's plugin manager
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<TargetEvent>>>);

impl Journal {
    pub fn record(&self, event: TargetEvent) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<TargetEvent> {
        self.0.lock().clone()
    }

    pub fn console_lines(&self) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter_map(|event| match event {
                TargetEvent::Console(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn applied_plugins(&self) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter_map(|event| match event {
                TargetEvent::PluginApplied(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }
}

/// In-process target that records everything scripts do to it.
///
/// Project targets carry a [`DefaultPluginManager`]; settings and invocation
/// targets have none.
#[derive(Debug)]
pub struct BuildTarget {
    kind: TargetKind,
    name: String,
    scope: ScopeHandle,
    services: ScriptServices,
    journal: Journal,
    properties: BTreeMap<String, String>,
    plugins: Option<DefaultPluginManager>,
}

impl BuildTarget {
    pub fn new(kind: TargetKind, name: &str, scope: ScopeHandle) -> Self {
        let journal = Journal::default();
        let plugins = match kind {
            TargetKind::Project => Some(DefaultPluginManager::new().with_journal(journal.clone())),
            TargetKind::Settings | TargetKind::Invocation => None,
        };

        Self {
            kind,
            name: name.to_string(),
            scope,
            services: ScriptServices::default(),
            journal,
            properties: BTreeMap::new(),
            plugins,
        }
    }

    pub fn with_services(mut self, services: ScriptServices) -> Self {
        self.services = services;
        self
    }

    /// Restrict the plugin manager to these ids; empty means any id is accepted
    pub fn with_known_plugins<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let known: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        if !known.is_empty() {
            self.plugins = self.plugins.map(|manager| manager.with_known_plugins(known));
        }
        self
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl ScriptTarget for BuildTarget {
    fn kind(&self) -> TargetKind {
        self.kind
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> &ScopeHandle {
        &self.scope
    }

    fn services(&self) -> &ScriptServices {
        &self.services
    }

    fn println(&mut self, text: &str) {
        self.journal.record(TargetEvent::Console(text.to_string()));
    }

    fn set_property(&mut self, key: &str, value: &str) {
        self.properties.insert(key.to_string(), value.to_string());
        self.journal.record(TargetEvent::PropertySet {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    fn plugin_manager(&mut self) -> Option<&mut dyn PluginManager> {
        self.plugins
            .as_mut()
            .map(|manager| manager as &mut dyn PluginManager)
    }
}
