//! A named document: a root node plus everything needed to save it and to
//! know whether it has unsaved changes.

use std::rc::Rc;

use tracing::info;

use crate::error::Result;
use crate::history::{GlobalHistoryContext, HistoryContext};
use crate::node::Node;
use crate::persist::Persistor;
use crate::schema::TypeCatalog;
use crate::serialize;

pub struct Document {
    name: String,
    root: Node,
}

impl Document {
    /// Wraps `root` and constructs the eager adapters of its subtree.
    pub fn new(name: &str, root: Node) -> Document {
        root.initialize_adapters();
        Document { name: name.to_string(), root }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn root(&self) -> &Node {
        &self.root
    }
    /// History contexts found anywhere in the document.
    pub fn histories(&self) -> Vec<Rc<HistoryContext>> {
        self.root.subtree().filter_map(|n| n.try_as::<HistoryContext>()).collect()
    }
    pub fn global_history(&self) -> Option<Rc<GlobalHistoryContext>> {
        self.root.try_as::<GlobalHistoryContext>()
    }
    /// Whether any history of the document moved away from its clean checkpoint.
    pub fn dirty(&self) -> bool {
        self.global_history().is_some_and(|g| g.dirty()) || self.histories().iter().any(|h| h.dirty())
    }
    pub fn set_dirty(&self, dirty: bool) {
        if let Some(global) = self.global_history() {
            global.set_dirty(dirty);
        }
        for history in self.histories() {
            history.set_dirty(dirty);
        }
    }
    pub fn to_json(&self) -> Result<String> {
        serialize::to_json_string(&self.root)
    }
    /// Stores the document and marks it clean. Returns whether a new
    /// revision was written.
    pub fn save(&self, persistor: &mut Persistor) -> Result<bool> {
        let written = persistor.save(&self.name, &self.to_json()?)?;
        self.set_dirty(false);
        Ok(written)
    }
    /// Latest saved revision of `name`, if there is one.
    pub fn load(catalog: &TypeCatalog, persistor: &Persistor, name: &str) -> Result<Option<Document>> {
        let Some(content) = persistor.load(name)? else {
            return Ok(None);
        };
        let root = serialize::from_json_str(catalog, &content)?;
        info!(document = name, nodes = root.subtree().count(), "document loaded");
        Ok(Some(Document::new(name, root)))
    }
}
