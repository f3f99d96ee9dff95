/// Script descriptors: identity, split source and derived class names
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use super::splitter::split;
use crate::compiler::{Phase, TargetKind};

/// One discovered script. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDescriptor {
    id: String,
    target_kind: TargetKind,
    source_path: Option<PathBuf>,
    preamble: String,
    body: String,
    content_hash: String,
    class_name: String,
    preamble_class_name: String,
    adapter_class_name: String,
}

impl ScriptDescriptor {
    /// Build a descriptor from the full script source
    pub fn new(id: &str, target_kind: TargetKind, source: &str) -> Self {
        let split = split(source);
        let ident = java_identifier(id);

        Self {
            id: id.to_string(),
            target_kind,
            source_path: None,
            preamble: split.preamble,
            body: split.body,
            content_hash: content_hash(source),
            class_name: format!("precompiled_{}", ident),
            preamble_class_name: format!("cp_precompiled_{}", ident),
            adapter_class_name: adapter_class_name(id),
        }
    }

    pub fn with_source_path(mut self, path: &Path) -> Self {
        self.source_path = Some(path.to_path_buf());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target_kind(&self) -> TargetKind {
        self.target_kind
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Empty when the script has no leading plugins block
    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    pub fn has_preamble(&self) -> bool {
        !self.preamble.is_empty()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn preamble_class_name(&self) -> &str {
        &self.preamble_class_name
    }

    pub fn adapter_class_name(&self) -> &str {
        &self.adapter_class_name
    }

    pub fn class_name_for(&self, phase: Phase) -> &str {
        match phase {
            Phase::Preamble => &self.preamble_class_name,
            Phase::Body => &self.class_name,
        }
    }

    pub fn source_for(&self, phase: Phase) -> &str {
        match phase {
            Phase::Preamble => &self.preamble,
            Phase::Body => &self.body,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.source_path {
            Some(path) => format!("{} ({})", self.id, path.display()),
            None => self.id.clone(),
        }
    }
}

/// SHA-256 of the script source, hex-encoded
pub fn content_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

fn java_identifier(id: &str) -> String {
    let mut ident: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

/// `my.plugin` becomes `MyPluginPlugin`
fn adapter_class_name(id: &str) -> String {
    let mut name: String = id
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name.push_str("Plugin");
    name
}
