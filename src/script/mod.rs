//! Script sources: discovery, descriptors, splitting and the compile cache
pub mod cache;
pub mod descriptor;
pub mod discovery;
pub mod splitter;

pub use cache::{CacheEntry, CacheStats, CompileCache, CompiledScript};
pub use descriptor::{content_hash, ScriptDescriptor};
pub use discovery::{discover_scripts, load_script, script_identity};
pub use splitter::{split, SplitSource};
