//! Hierarchical, lockable code-loading scopes
//!
//! Scopes form a strict tree owned by a single arena. A [`ScopeHandle`] is a
//! shared reference to the arena plus the index of one node, so a child never
//! owns its parent and a released subtree simply stops resolving.
//!
//! Visibility is one-directional: a scope sees its own exported classes plus
//! everything exported by its ancestors, never the exports of its children or
//! siblings.
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::compiler::{ClassFileError, ScriptClass};

/// Index of a node inside the scope arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(usize);

#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("Scope '{scope}' is locked, cannot {operation}")]
    LockViolation {
        scope: String,
        operation: &'static str,
    },

    #[error("Scope #{0} has been released")]
    Released(usize),

    #[error("Class '{name}' is not visible from scope '{scope}'")]
    ClassNotFound { scope: String, name: String },

    #[error("Class '{name}' is already exported by scope '{scope}'")]
    DuplicateClass { scope: String, name: String },

    #[error(transparent)]
    ClassFile(#[from] ClassFileError),
}

#[derive(Debug)]
struct ScopeNode {
    name: String,
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
    classes: BTreeMap<String, Arc<ScriptClass>>,
    class_dirs: Vec<PathBuf>,
    locked: bool,
    reuse_count: u64,
}

impl ScopeNode {
    fn new(name: &str, parent: Option<ScopeId>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            children: Vec::new(),
            classes: BTreeMap::new(),
            class_dirs: Vec::new(),
            locked: false,
            reuse_count: 0,
        }
    }
}

/// Arena of scope nodes. Slots of released nodes stay `None`; ids are never reused.
#[derive(Debug, Default)]
struct ScopeTree {
    nodes: Vec<Option<ScopeNode>>,
}

impl ScopeTree {
    fn node(&self, id: ScopeId) -> Result<&ScopeNode, ScopeError> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(ScopeError::Released(id.0))
    }

    fn node_mut(&mut self, id: ScopeId) -> Result<&mut ScopeNode, ScopeError> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(ScopeError::Released(id.0))
    }

    fn insert(&mut self, node: ScopeNode) -> ScopeId {
        self.nodes.push(Some(node));
        ScopeId(self.nodes.len() - 1)
    }

    /// Ids from `id` up to the root, nearest first
    fn chain(&self, id: ScopeId) -> Result<Vec<ScopeId>, ScopeError> {
        let mut chain = vec![id];
        let mut current = self.node(id)?.parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.node(parent)?.parent;
        }
        Ok(chain)
    }

    fn unlocked_mut(
        &mut self,
        id: ScopeId,
        operation: &'static str,
    ) -> Result<&mut ScopeNode, ScopeError> {
        let node = self.node_mut(id)?;
        if node.locked {
            return Err(ScopeError::LockViolation {
                scope: node.name.clone(),
                operation,
            });
        }
        Ok(node)
    }
}

/// Shared handle to one scope of a tree
#[derive(Debug, Clone)]
pub struct ScopeHandle {
    tree: Arc<RwLock<ScopeTree>>,
    id: ScopeId,
}

impl ScopeHandle {
    /// Create a new tree and return its root scope
    pub fn root(name: &str) -> Self {
        let mut tree = ScopeTree::default();
        let id = tree.insert(ScopeNode::new(name, None));
        Self {
            tree: Arc::new(RwLock::new(tree)),
            id,
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn name(&self) -> Result<String, ScopeError> {
        Ok(self.tree.read().node(self.id)?.name.clone())
    }

    /// Fully qualified name, root first (e.g. `core-and-plugins:pre-compiled-scripts`)
    pub fn path(&self) -> Result<String, ScopeError> {
        let tree = self.tree.read();
        let mut names = tree
            .chain(self.id)?
            .into_iter()
            .map(|id| tree.node(id).map(|node| node.name.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        names.reverse();
        Ok(names.join(":"))
    }

    pub fn parent(&self) -> Result<Option<ScopeHandle>, ScopeError> {
        let parent = self.tree.read().node(self.id)?.parent;
        Ok(parent.map(|id| ScopeHandle {
            tree: Arc::clone(&self.tree),
            id,
        }))
    }

    /// Create a child scope. Locking a parent does not prevent creating children.
    pub fn create_child(&self, name: &str) -> Result<ScopeHandle, ScopeError> {
        let mut tree = self.tree.write();
        tree.node(self.id)?;
        let child = tree.insert(ScopeNode::new(name, Some(self.id)));
        tree.node_mut(self.id)?.children.push(child);
        debug!(scope = %name, parent = self.id.0, "created child scope");
        Ok(ScopeHandle {
            tree: Arc::clone(&self.tree),
            id: child,
        })
    }

    /// Freeze this scope's export surface. Repeated calls are no-ops.
    pub fn lock(&self) -> Result<(), ScopeError> {
        let mut tree = self.tree.write();
        let node = tree.node_mut(self.id)?;
        if !node.locked {
            node.locked = true;
            debug!(scope = %node.name, "locked scope");
        }
        Ok(())
    }

    pub fn is_locked(&self) -> Result<bool, ScopeError> {
        Ok(self.tree.read().node(self.id)?.locked)
    }

    /// Signal that this scope is being reused in a new session without recompilation
    pub fn on_reuse(&self) -> Result<(), ScopeError> {
        let mut tree = self.tree.write();
        let node = tree.node_mut(self.id)?;
        node.reuse_count += 1;
        debug!(scope = %node.name, reuse_count = node.reuse_count, "scope reused");
        Ok(())
    }

    pub fn reuse_count(&self) -> Result<u64, ScopeError> {
        Ok(self.tree.read().node(self.id)?.reuse_count)
    }

    /// Export a single class through this scope
    pub fn export_class(&self, class: ScriptClass) -> Result<Arc<ScriptClass>, ScopeError> {
        let mut tree = self.tree.write();
        let node = tree.unlocked_mut(self.id, "export a class")?;
        if node.classes.contains_key(&class.name) {
            return Err(ScopeError::DuplicateClass {
                scope: node.name.clone(),
                name: class.name,
            });
        }
        let class = Arc::new(class);
        node.classes.insert(class.name.clone(), Arc::clone(&class));
        Ok(class)
    }

    /// Export every class file found directly inside `dir`.
    ///
    /// Returns the names of the exported classes. Fails without reading the
    /// directory when the scope is locked.
    pub fn export_classes_dir(&self, dir: &Path) -> Result<Vec<String>, ScopeError> {
        self.tree
            .read()
            .node(self.id)
            .and_then(|node| {
                if node.locked {
                    Err(ScopeError::LockViolation {
                        scope: node.name.clone(),
                        operation: "export a classes directory",
                    })
                } else {
                    Ok(())
                }
            })?;

        let classes = ScriptClass::read_all(dir)?;

        let mut tree = self.tree.write();
        let node = tree.unlocked_mut(self.id, "export a classes directory")?;
        if let Some(duplicate) = classes.iter().find(|c| node.classes.contains_key(&c.name)) {
            return Err(ScopeError::DuplicateClass {
                scope: node.name.clone(),
                name: duplicate.name.clone(),
            });
        }

        let mut names = Vec::with_capacity(classes.len());
        for class in classes {
            names.push(class.name.clone());
            node.classes.insert(class.name.clone(), Arc::new(class));
        }
        node.class_dirs.push(dir.to_path_buf());

        debug!(
            scope = %node.name,
            dir = %dir.display(),
            class_count = names.len(),
            "exported classes directory"
        );
        Ok(names)
    }

    /// Directories exported by this scope itself, in registration order
    pub fn class_dirs(&self) -> Result<Vec<PathBuf>, ScopeError> {
        Ok(self.tree.read().node(self.id)?.class_dirs.clone())
    }

    /// Read-only snapshot of every class visible from this scope
    pub fn export_class_set(&self) -> Result<ExportClassSet, ScopeError> {
        let tree = self.tree.read();
        let mut classes = BTreeMap::new();
        // Root first so nearer scopes shadow their ancestors
        for id in tree.chain(self.id)?.into_iter().rev() {
            for (name, class) in &tree.node(id)?.classes {
                classes.insert(name.clone(), Arc::clone(class));
            }
        }
        Ok(ExportClassSet {
            scope: tree.node(self.id)?.name.clone(),
            classes,
        })
    }

    /// Resolve a class by name through this scope and its ancestors
    pub fn resolve_class(&self, name: &str) -> Result<Arc<ScriptClass>, ScopeError> {
        let tree = self.tree.read();
        for id in tree.chain(self.id)? {
            if let Some(class) = tree.node(id)?.classes.get(name) {
                return Ok(Arc::clone(class));
            }
        }
        Err(ScopeError::ClassNotFound {
            scope: tree.node(self.id)?.name.clone(),
            name: name.to_string(),
        })
    }

    /// Tear down this scope and all of its descendants
    pub fn release(self) -> Result<(), ScopeError> {
        let mut tree = self.tree.write();
        let parent = tree.node(self.id)?.parent;
        if let Some(parent) = parent {
            if let Ok(node) = tree.node_mut(parent) {
                node.children.retain(|child| *child != self.id);
            }
        }

        let mut pending = vec![self.id];
        while let Some(id) = pending.pop() {
            if let Some(node) = tree.nodes.get_mut(id.0).and_then(Option::take) {
                debug!(scope = %node.name, "released scope");
                pending.extend(node.children);
            }
        }
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.tree.read().node(self.id).is_err()
    }
}

/// Classes visible from one scope at the time the snapshot was taken
#[derive(Debug, Clone)]
pub struct ExportClassSet {
    scope: String,
    classes: BTreeMap<String, Arc<ScriptClass>>,
}

impl ExportClassSet {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ScriptClass>> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
