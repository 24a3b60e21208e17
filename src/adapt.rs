//! Adaptation: attaching capability objects to nodes.
//!
//! Each node type registers [`AdapterCreator`]s. A creator builds one adapter
//! object per node, on first request, and declares which capabilities
//! (concrete types or trait objects) that adapter can be viewed as.
//! Lookup walks the node type's lineage, most-derived type first, and within
//! a type keeps registration order; the first creator providing the
//! requested capability wins.
//!
//! ```ignore
//! spec.adapter(
//!     AdapterCreator::new("state", |node| Rc::new(StateAdapter::new(node)))
//!         .exposes(|a: Rc<StateAdapter>| a as Rc<dyn Named>),
//! );
//! let named = node.cast::<dyn Named>()?;
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::{DomError, Result};
use crate::node::{Node, WeakNode};
use crate::schema::NameHasher;

type ConstructFn = dyn Fn(&Node) -> Rc<dyn Any>;
type ViewFn = dyn Fn(Rc<dyn Any>) -> Option<Box<dyn Any>>;

pub struct AdapterCreator {
    id: usize,
    name: String,
    eager: bool,
    construct: Rc<ConstructFn>,
    views: HashMap<TypeId, Rc<ViewFn>, NameHasher>,
}

impl AdapterCreator {
    /// A creator whose adapters are of type `A`, which is also its first capability.
    pub fn new<A, F>(name: &str, construct: F) -> Self
    where
        A: Any,
        F: Fn(&Node) -> Rc<A> + 'static,
    {
        let creator = Self {
            id: 0,
            name: name.to_string(),
            eager: false,
            construct: Rc::new(move |node: &Node| construct(node) as Rc<dyn Any>),
            views: HashMap::default(),
        };
        creator.exposes(|adapter: Rc<A>| adapter)
    }
    /// Declares another capability `T`, reached from the adapter through `project`.
    pub fn exposes<A, T, F>(mut self, project: F) -> Self
    where
        A: Any,
        T: ?Sized + 'static,
        F: Fn(Rc<A>) -> Rc<T> + 'static,
    {
        let view: Rc<ViewFn> = Rc::new(move |instance: Rc<dyn Any>| {
            instance.downcast::<A>().ok().map(|adapter| Box::new(project(adapter)) as Box<dyn Any>)
        });
        self.views.insert(TypeId::of::<T>(), view);
        self
    }
    /// Adapters of eager creators are built by [`Node::initialize_adapters`].
    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn is_eager(&self) -> bool {
        self.eager
    }
    pub(crate) fn assign_id(&mut self, id: usize) {
        self.id = id;
    }
    pub(crate) fn provides(&self, capability: TypeId) -> bool {
        self.views.contains_key(&capability)
    }
    fn view<T: ?Sized + 'static>(&self, instance: Rc<dyn Any>) -> Option<Rc<T>> {
        let view = self.views.get(&TypeId::of::<T>())?;
        view(instance)?.downcast::<Rc<T>>().ok().map(|boxed| *boxed)
    }
}

impl fmt::Debug for AdapterCreator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AdapterCreator").field("name", &self.name).field("eager", &self.eager).finish()
    }
}

impl Node {
    fn adapter_instance(&self, creator: &AdapterCreator) -> Rc<dyn Any> {
        let cached = self.0.adapters.borrow().iter().find(|(id, _)| *id == creator.id).map(|(_, a)| Rc::clone(a));
        if let Some(existing) = cached {
            return existing;
        }
        // construction may itself ask this node for adapters
        let instance = (creator.construct)(self);
        let mut adapters = self.0.adapters.borrow_mut();
        if let Some((_, existing)) = adapters.iter().find(|(id, _)| *id == creator.id) {
            return Rc::clone(existing);
        }
        adapters.push((creator.id, Rc::clone(&instance)));
        debug!(node = %self, adapter = creator.name(), "adapter created");
        instance
    }
    /// The first adapter providing `T`, created on demand and cached for
    /// the node's lifetime.
    pub fn try_as<T: ?Sized + 'static>(&self) -> Option<Rc<T>> {
        let creators = self.node_type().creators_for(TypeId::of::<T>());
        creators.iter().find_map(|creator| creator.view::<T>(self.adapter_instance(creator)))
    }
    pub fn cast<T: ?Sized + 'static>(&self) -> Result<Rc<T>> {
        self.try_as::<T>().ok_or_else(|| DomError::Adaptation(format!("{} for {}", type_name::<T>(), self)))
    }
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.try_as::<T>().is_some()
    }
    /// Every adapter providing `T`, in precedence order.
    pub fn as_all<T: ?Sized + 'static>(&self) -> Vec<Rc<T>> {
        let creators = self.node_type().creators_for(TypeId::of::<T>());
        creators.iter().filter_map(|creator| creator.view::<T>(self.adapter_instance(creator))).collect()
    }
    /// Builds the adapters of eager creators for every node in the subtree.
    pub fn initialize_adapters(&self) {
        for node in self.subtree() {
            for creator in node.node_type().eager_creators() {
                node.adapter_instance(&creator);
            }
        }
    }
}

/// Convenience base for adapters: a weak link back to the adapted node.
#[derive(Clone, Debug)]
pub struct NodeAdapter {
    node: WeakNode,
}

impl NodeAdapter {
    pub fn new(node: &Node) -> Self {
        Self { node: node.downgrade() }
    }
    pub fn node(&self) -> Result<Node> {
        self.node
            .upgrade()
            .ok_or_else(|| DomError::InvalidOperation("the adapted node no longer exists".to_string()))
    }
    /// A sibling adapter on the same node.
    pub fn adapt<T: ?Sized + 'static>(&self) -> Option<Rc<T>> {
        self.node.upgrade()?.try_as::<T>()
    }
    /// An adapter of the node's parent.
    pub fn parent_as<T: ?Sized + 'static>(&self) -> Option<Rc<T>> {
        self.node.upgrade()?.parent()?.try_as::<T>()
    }
}
