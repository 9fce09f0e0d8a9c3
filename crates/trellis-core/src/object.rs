//! Object tree for Trellis.
//!
//! Objects live in an arena ([`ObjectTree`]) keyed by [`ObjectId`]. A node
//! records its parent as an id, never as an owning pointer, and owns the ids of
//! its children in insertion order. Destroying a node destroys its whole
//! subtree, children first.
//!
//! Every node carries a handler implementing [`Object`]. The dispatch loop
//! calls [`Object::handle`] on the event's target and bubbles unhandled events
//! to ancestors.
//!
//! # Key Types
//!
//! - [`Object`] - The handler capability every node carries
//! - [`ObjectId`] - Stable generational identifier for a node
//! - [`ObjectTree`] - The arena holding nodes and their relationships
//! - [`PlainObject`] / [`FnObject`] - Ready-made handlers

use std::any::Any;
use std::fmt;

use slotmap::{SlotMap, new_key_type};

use crate::dispatch::DispatchContext;
use crate::error::ObjectError;
use crate::event::{Event, EventResult, HandlerResult};

new_key_type! {
    /// A unique identifier for a node in an [`ObjectTree`].
    ///
    /// Ids are generational: once a node is destroyed its id never resolves
    /// again, even if the slot is reused.
    pub struct ObjectId;
}

impl ObjectId {
    /// Convert the ObjectId to a raw u64 value.
    #[inline]
    pub fn as_raw(self) -> u64 {
        use slotmap::Key;
        self.data().as_ffi()
    }

    /// Create an ObjectId from a raw u64 value.
    ///
    /// This does not check that the id exists in any tree.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self::from(slotmap::KeyData::from_ffi(raw))
    }
}

/// Result type for object tree operations.
pub type ObjectResult<T> = std::result::Result<T, ObjectError>;

/// The handler capability carried by every node.
///
/// `handle` runs on the dispatch thread with exclusive access to the tree
/// through `cx`. Returning [`EventResult::Unhandled`] lets the event bubble to
/// the parent; returning an error aborts the dispatch loop.
pub trait Object: Any + Send {
    /// React to an event. The default leaves it unhandled.
    fn handle(&mut self, event: &Event, cx: &mut DispatchContext<'_>) -> HandlerResult {
        let _ = (event, cx);
        Ok(EventResult::Unhandled)
    }
}

/// A node that never handles anything. Used for the default root.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainObject;

impl Object for PlainObject {}

/// A node whose handler is a closure.
pub struct FnObject<F> {
    handler: F,
}

impl<F> FnObject<F>
where
    F: FnMut(&Event, &mut DispatchContext<'_>) -> HandlerResult + Send + 'static,
{
    /// Wrap a closure as a handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> Object for FnObject<F>
where
    F: FnMut(&Event, &mut DispatchContext<'_>) -> HandlerResult + Send + 'static,
{
    fn handle(&mut self, event: &Event, cx: &mut DispatchContext<'_>) -> HandlerResult {
        (self.handler)(event, cx)
    }
}

impl<F> fmt::Debug for FnObject<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnObject").finish_non_exhaustive()
    }
}

struct Node {
    name: String,
    type_name: &'static str,
    parent: Option<ObjectId>,
    children: Vec<ObjectId>,
    /// `None` only while the dispatcher is running this node's handler.
    handler: Option<Box<dyn Object>>,
}

impl Node {
    fn new<T: Object>(object: T) -> Self {
        Self {
            name: String::new(),
            type_name: std::any::type_name::<T>(),
            parent: None,
            children: Vec::new(),
            handler: Some(Box::new(object)),
        }
    }
}

/// Arena of objects with parent/child relationships and a fixed root.
pub struct ObjectTree {
    nodes: SlotMap<ObjectId, Node>,
    root: ObjectId,
}

impl ObjectTree {
    /// Create a tree whose root carries `root` as its handler.
    pub fn new<T: Object>(root: T) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node::new(root));
        Self { nodes, root }
    }

    /// The root node. It has no parent and cannot be destroyed.
    #[inline]
    pub fn root(&self) -> ObjectId {
        self.root
    }

    /// Insert an unparented node and return its id.
    pub fn insert<T: Object>(&mut self, object: T) -> ObjectId {
        let id = self.nodes.insert(Node::new(object));
        tracing::trace!(target: "trellis_core::object", ?id, type_name = std::any::type_name::<T>(), "inserted object");
        id
    }

    /// Insert a node and attach it under `parent` in one step.
    pub fn insert_child<T: Object>(&mut self, parent: ObjectId, object: T) -> ObjectResult<ObjectId> {
        if !self.contains(parent) {
            return Err(ObjectError::InvalidObjectId(parent));
        }
        let id = self.insert(object);
        self.add_child(parent, id)?;
        Ok(id)
    }

    /// Replace the handler of an existing node, returning the previous one.
    ///
    /// Returns `Ok(None)` if the node's handler is currently running; the
    /// replacement takes over once that call returns.
    pub fn replace<T: Object>(
        &mut self,
        id: ObjectId,
        object: T,
    ) -> ObjectResult<Option<Box<dyn Object>>> {
        let node = self.node_mut(id)?;
        node.type_name = std::any::type_name::<T>();
        Ok(node.handler.replace(Box::new(object)))
    }

    /// Attach `child` under `parent`.
    ///
    /// The child must be unparented; detach it with [`remove_child`](Self::remove_child)
    /// first to move it.
    #[tracing::instrument(skip(self), target = "trellis_core::object", level = "trace")]
    pub fn add_child(&mut self, parent: ObjectId, child: ObjectId) -> ObjectResult<()> {
        if !self.contains(parent) {
            return Err(ObjectError::InvalidObjectId(parent));
        }
        let current = self.node(child)?.parent;
        if child == self.root {
            return Err(ObjectError::ProtectedRoot);
        }
        if child == parent || self.is_ancestor_of(child, parent) {
            return Err(ObjectError::CircularParentage);
        }
        if let Some(owner) = current {
            return Err(ObjectError::AlreadyParented {
                child,
                parent: owner,
            });
        }

        self.node_mut(child)?.parent = Some(parent);
        self.node_mut(parent)?.children.push(child);
        Ok(())
    }

    /// Detach `child` (and its subtree) from `parent`.
    ///
    /// The returned id is now unparented; the caller decides whether to
    /// re-attach or destroy it.
    #[tracing::instrument(skip(self), target = "trellis_core::object", level = "trace")]
    pub fn remove_child(&mut self, parent: ObjectId, child: ObjectId) -> ObjectResult<ObjectId> {
        let parent_node = self.node_mut(parent)?;
        let Some(pos) = parent_node.children.iter().position(|&c| c == child) else {
            return Err(ObjectError::NotAChild { parent, child });
        };
        parent_node.children.remove(pos);
        self.node_mut(child)?.parent = None;
        Ok(child)
    }

    /// Destroy a node and its whole subtree.
    ///
    /// Handlers are dropped deepest first, the node itself last.
    #[tracing::instrument(skip(self), target = "trellis_core::object", level = "trace")]
    pub fn destroy(&mut self, id: ObjectId) -> ObjectResult<()> {
        if id == self.root {
            return Err(ObjectError::ProtectedRoot);
        }
        let order = self.depth_first_postorder(id)?;
        tracing::trace!(target: "trellis_core::object", ?id, count = order.len(), "destroying subtree");

        if let Some(parent) = self.node(id)?.parent
            && let Some(parent_node) = self.nodes.get_mut(parent)
        {
            parent_node.children.retain(|&c| c != id);
        }
        for node in order {
            self.nodes.remove(node);
        }
        Ok(())
    }

    /// Check if a node exists.
    #[inline]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of live nodes, root included.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no nodes remain. The root keeps a live tree non-empty, so
    /// this only turns true once the tree has been released at shutdown.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get the parent of a node.
    pub fn parent(&self, id: ObjectId) -> ObjectResult<Option<ObjectId>> {
        Ok(self.node(id)?.parent)
    }

    /// Get the children of a node in insertion order.
    pub fn children(&self, id: ObjectId) -> ObjectResult<&[ObjectId]> {
        Ok(self.node(id)?.children.as_slice())
    }

    /// Get all ancestors of a node from immediate parent upwards.
    pub fn ancestors(&self, id: ObjectId) -> ObjectResult<Vec<ObjectId>> {
        let mut result = Vec::new();
        let mut current = self.node(id)?.parent;
        while let Some(current_id) = current {
            result.push(current_id);
            current = self.nodes.get(current_id).and_then(|n| n.parent);
        }
        Ok(result)
    }

    /// Check if `ancestor` is `id` or one of its ancestors.
    pub fn is_ancestor_of(&self, ancestor: ObjectId, id: ObjectId) -> bool {
        let mut current = Some(id);
        while let Some(current_id) = current {
            if current_id == ancestor {
                return true;
            }
            current = self.nodes.get(current_id).and_then(|n| n.parent);
        }
        false
    }

    /// Get the node's debug name.
    pub fn name(&self, id: ObjectId) -> ObjectResult<&str> {
        Ok(&self.node(id)?.name)
    }

    /// Set the node's debug name.
    pub fn set_name(&mut self, id: ObjectId, name: impl Into<String>) -> ObjectResult<()> {
        self.node_mut(id)?.name = name.into();
        Ok(())
    }

    /// The Rust type name of the node's handler.
    pub fn type_name(&self, id: ObjectId) -> ObjectResult<&'static str> {
        Ok(self.node(id)?.type_name)
    }

    /// Find a direct child by name.
    pub fn find_child_by_name(&self, id: ObjectId, name: &str) -> ObjectResult<Option<ObjectId>> {
        Ok(self
            .node(id)?
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes.get(c).is_some_and(|n| n.name == name)))
    }

    /// Borrow a node's handler as its concrete type.
    ///
    /// Returns `None` if the id is unknown, the type does not match, or the
    /// handler is currently running.
    pub fn get<T: Object>(&self, id: ObjectId) -> Option<&T> {
        let handler: &dyn Any = self.nodes.get(id)?.handler.as_deref()?;
        handler.downcast_ref()
    }

    /// Mutably borrow a node's handler as its concrete type.
    pub fn get_mut<T: Object>(&mut self, id: ObjectId) -> Option<&mut T> {
        let handler: &mut dyn Any = self.nodes.get_mut(id)?.handler.as_deref_mut()?;
        handler.downcast_mut()
    }

    /// Depth-first pre-order traversal: the node, then each child subtree.
    pub fn depth_first_preorder(&self, id: ObjectId) -> ObjectResult<Vec<ObjectId>> {
        let mut result = Vec::new();
        self.preorder_recursive(id, &mut result)?;
        Ok(result)
    }

    fn preorder_recursive(&self, id: ObjectId, result: &mut Vec<ObjectId>) -> ObjectResult<()> {
        let node = self.node(id)?;
        result.push(id);
        for &child in &node.children {
            self.preorder_recursive(child, result)?;
        }
        Ok(())
    }

    /// Depth-first post-order traversal: each child subtree, then the node.
    pub fn depth_first_postorder(&self, id: ObjectId) -> ObjectResult<Vec<ObjectId>> {
        let mut result = Vec::new();
        self.postorder_recursive(id, &mut result)?;
        Ok(result)
    }

    fn postorder_recursive(&self, id: ObjectId, result: &mut Vec<ObjectId>) -> ObjectResult<()> {
        let node = self.node(id)?;
        for &child in &node.children {
            self.postorder_recursive(child, result)?;
        }
        result.push(id);
        Ok(())
    }

    /// Ids of nodes that have no parent, the root first.
    pub fn top_level(&self) -> Vec<ObjectId> {
        let mut result = vec![self.root];
        result.extend(
            self.nodes
                .iter()
                .filter(|(id, n)| *id != self.root && n.parent.is_none())
                .map(|(id, _)| id),
        );
        result
    }

    /// Drop every node, children before parents.
    pub(crate) fn clear(&mut self) {
        for top in self.top_level() {
            if let Ok(order) = self.depth_first_postorder(top) {
                for id in order {
                    self.nodes.remove(id);
                }
            }
        }
    }

    /// Take the handler out for the duration of a call.
    pub(crate) fn take_handler(&mut self, id: ObjectId) -> Option<Box<dyn Object>> {
        self.nodes.get_mut(id)?.handler.take()
    }

    /// Put a handler back. Returns it if the node no longer exists.
    pub(crate) fn restore_handler(
        &mut self,
        id: ObjectId,
        handler: Box<dyn Object>,
    ) -> Option<Box<dyn Object>> {
        match self.nodes.get_mut(id) {
            Some(node) => {
                // A replacement installed while the handler ran wins.
                if node.handler.is_none() {
                    node.handler = Some(handler);
                }
                None
            }
            None => Some(handler),
        }
    }

    fn node(&self, id: ObjectId) -> ObjectResult<&Node> {
        self.nodes.get(id).ok_or(ObjectError::InvalidObjectId(id))
    }

    fn node_mut(&mut self, id: ObjectId) -> ObjectResult<&mut Node> {
        self.nodes.get_mut(id).ok_or(ObjectError::InvalidObjectId(id))
    }
}

impl Default for ObjectTree {
    fn default() -> Self {
        Self::new(PlainObject)
    }
}

impl Drop for ObjectTree {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for ObjectTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectTree")
            .field("root", &self.root)
            .field("len", &self.nodes.len())
            .finish()
    }
}
