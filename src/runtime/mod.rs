//! Apply-time execution of precompiled scripts
pub mod executable;
pub mod plugins;
pub mod runner;
pub mod target;

pub use executable::ScriptInstance;
pub use plugins::{
    DefaultPluginManager, DefaultPluginRequestApplicator, PluginError, PluginManager,
    PluginRequestApplicator, ScriptHandler,
};
pub use runner::{RunError, RunState, ScriptRunner, INIT_PLUGIN_SCOPE_NAME};
pub use target::{BuildTarget, Journal, ScriptServices, ScriptTarget, TargetEvent};
