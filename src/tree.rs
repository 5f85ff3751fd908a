//! Arena-based scene storage.
//!
//! The [`Scene`] owns every node using a sparse-set layout with generational
//! indices. Parent and child links are ids into the arena, so a node can
//! have at most one parent and reparenting is an index rewrite.
//!
//! ## Key Features
//!
//! - **Generational Indices**: a [`NodeId`] carries index + generation, so
//!   an id held after its node was removed never resolves to a newer node
//!   that reused the slot.
//!
//! - **Dense Storage**: nodes live contiguously; a sparse map gives O(1)
//!   lookup and swap-remove keeps the dense array free of holes.
//!
//! - **Membership invariant**: a node appears in its parent's child list if
//!   and only if its parent link names that parent. Every mutation below
//!   keeps both sides in sync and dispatches `added`/`removed`.

use std::cell::{RefCell, RefMut};
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

use crate::display::{DisplayProps, ImageId, ImageSource, Node, NodeKind, SpriteEvent, TextContext};
use crate::error::{Result, StageError};
use crate::events::{Event, FrameData, Listener, ListenerId};
use crate::geom::Point;
use crate::surface::Surface;
use crate::transform::Transform2D;

/// Unique identifier for a node in a [`Scene`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Combines generation (high bits) with index (low bits).
    pub fn as_u64(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }
}

/// Entry in the sparse map, pointing to a dense array slot.
struct SparseEntry {
    dense_index: usize,
    generation: u32,
}

struct Slot {
    node: Node,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Back-pointer to the sparse index, for swap-remove fixup.
    sparse_index: u32,
}

/// The scene: node arena, image registry and the scratch resources used by
/// hit testing and text measurement.
pub struct Scene {
    dense: Vec<Slot>,
    sparse: Vec<Option<SparseEntry>>,
    free_indices: Vec<u32>,
    images: Vec<Option<ImageSource>>,
    strict: bool,
    hit_surface: RefCell<Option<Surface>>,
    text: RefCell<Option<TextContext>>,
    /// Renderers that keep GPU state for caches, told when one goes away.
    cache_watchers: Vec<Weak<RefCell<Vec<NodeId>>>>,
}

/// Nodes whose caches were dropped or replaced since a renderer last looked.
pub(crate) type ReleasedCaches = Rc<RefCell<Vec<NodeId>>>;

impl Scene {
    pub fn new() -> Self {
        Self {
            dense: Vec::new(),
            sparse: Vec::new(),
            free_indices: Vec::new(),
            images: Vec::new(),
            strict: false,
            hit_surface: RefCell::new(None),
            text: RefCell::new(None),
            cache_watchers: Vec::new(),
        }
    }

    /// When strict, pixel read failures during hit testing and caching are
    /// returned as errors instead of being reported as "no hit".
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Registers a queue that receives every node whose cache is dropped,
    /// replaced, or freed with its node.
    pub(crate) fn watch_released_caches(&mut self) -> ReleasedCaches {
        let queue = ReleasedCaches::default();
        self.cache_watchers.push(Rc::downgrade(&queue));
        queue
    }

    pub(crate) fn notify_cache_released(&mut self, id: NodeId) {
        self.cache_watchers.retain(|watcher| match watcher.upgrade() {
            Some(queue) => {
                queue.borrow_mut().push(id);
                true
            }
            None => false,
        });
    }

    // -- arena -----------------------------------------------------------

    /// Stores a detached node and returns its id.
    pub fn insert(&mut self, node: Node) -> NodeId {
        let (sparse_index, generation) = if let Some(idx) = self.free_indices.pop() {
            let old_gen = self.sparse[idx as usize]
                .as_ref()
                .map(|e| e.generation)
                .unwrap_or(0);
            (idx, old_gen.wrapping_add(1))
        } else {
            let idx = self.sparse.len() as u32;
            self.sparse.push(None);
            (idx, 0)
        };

        let dense_index = self.dense.len();
        self.dense.push(Slot {
            node,
            parent: None,
            children: Vec::new(),
            sparse_index,
        });
        self.sparse[sparse_index as usize] = Some(SparseEntry {
            dense_index,
            generation,
        });
        NodeId::new(sparse_index, generation)
    }

    /// Detaches `id` from its parent and frees it together with its whole
    /// subtree. Returns `false` for an unknown id.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        if !self.has_node(id) {
            return false;
        }
        if let Some(parent) = self.parent(id) {
            self.remove_child(parent, id);
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            stack.extend_from_slice(self.children(current));
            if self.node(current).is_some_and(|n| n.is_cached()) {
                self.notify_cache_released(current);
            }
            self.free_slot(current);
        }
        true
    }

    fn free_slot(&mut self, id: NodeId) {
        let Some(dense_index) = self.dense_index(id) else {
            return;
        };
        let last_dense_index = self.dense.len() - 1;
        let removed = self.dense.swap_remove(dense_index);

        if dense_index != last_dense_index {
            let moved_sparse_idx = self.dense[dense_index].sparse_index;
            if let Some(ref mut entry) = self.sparse[moved_sparse_idx as usize] {
                entry.dense_index = dense_index;
            }
        }

        // Keep the generation around so the next allocation can bump it.
        self.sparse[id.index as usize] = Some(SparseEntry {
            dense_index: usize::MAX,
            generation: id.generation,
        });
        self.free_indices.push(id.index);
        drop(removed);
    }

    fn dense_index(&self, id: NodeId) -> Option<usize> {
        self.sparse
            .get(id.index as usize)
            .and_then(|e| e.as_ref())
            .filter(|e| e.generation == id.generation && e.dense_index != usize::MAX)
            .map(|e| e.dense_index)
    }

    fn slot(&self, id: NodeId) -> Option<&Slot> {
        self.dense_index(id).map(|idx| &self.dense[idx])
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut Slot> {
        self.dense_index(id).map(move |idx| &mut self.dense[idx])
    }

    pub fn has_node(&self, id: NodeId) -> bool {
        self.dense_index(id).is_some()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.slot(id).map(|s| &s.node)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slot_mut(id).map(|s| &mut s.node)
    }

    pub fn node_count(&self) -> usize {
        self.dense.len()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).and_then(|s| s.parent)
    }

    /// Children in draw order. Empty for leaves and unknown ids.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.slot(id).map(|s| s.children.as_slice()).unwrap_or(&[])
    }

    // -- images ----------------------------------------------------------

    pub fn add_image(&mut self, image: ImageSource) -> ImageId {
        let id = ImageId(self.images.len() as u32);
        self.images.push(Some(image));
        id
    }

    pub fn image(&self, id: ImageId) -> Option<&ImageSource> {
        self.images.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn image_mut(&mut self, id: ImageId) -> Option<&mut ImageSource> {
        self.images.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Unregisters an image. Nodes still referring to it draw nothing.
    pub fn remove_image(&mut self, id: ImageId) -> Option<ImageSource> {
        self.images.get_mut(id.0 as usize).and_then(Option::take)
    }

    // -- scoped contexts -------------------------------------------------

    /// Runs `f` with the scene's text context, creating it on first use.
    pub fn with_text_context<R>(&self, f: impl FnOnce(&mut TextContext) -> R) -> R {
        let mut slot = self.text.borrow_mut();
        let ctx = slot.get_or_insert_with(TextContext::new);
        f(ctx)
    }

    pub fn set_text_context(&mut self, ctx: TextContext) {
        *self.text.get_mut() = Some(ctx);
    }

    /// The 1x1 surface hit tests draw into.
    pub(crate) fn hit_surface(&self) -> Result<RefMut<'_, Surface>> {
        let mut slot = self.hit_surface.borrow_mut();
        if slot.is_none() {
            *slot = Some(Surface::new(1, 1)?);
        }
        RefMut::filter_map(slot, Option::as_mut)
            .map_err(|_| StageError::InvalidSize { width: 1, height: 1 })
    }

    // -- events ----------------------------------------------------------

    pub fn add_listener(
        &mut self,
        id: NodeId,
        kind: impl Into<String>,
        listener: Listener,
    ) -> Option<ListenerId> {
        self.node_mut(id)
            .map(|n| n.events_mut().add_listener(kind, listener))
    }

    pub fn remove_listener(&mut self, id: NodeId, kind: &str, listener: ListenerId) -> bool {
        self.node_mut(id)
            .is_some_and(|n| n.events_mut().remove_listener(kind, listener))
    }

    /// Dispatches `event` on one node. Returns `false` if a listener
    /// prevented the default.
    pub fn dispatch_event(&mut self, id: NodeId, event: &mut Event) -> bool {
        let Some(node) = self.node_mut(id) else {
            return true;
        };
        event.target = Some(id);
        node.events_mut().dispatch(event)
    }

    fn dispatch_simple(&mut self, id: NodeId, kind: &str) {
        let has = self.node(id).is_some_and(|n| n.events().has_listener(kind));
        if has {
            self.dispatch_event(id, &mut Event::new(kind));
        }
    }

    // -- container membership --------------------------------------------

    fn check_container(&self, id: NodeId) -> Result<()> {
        match self.node(id) {
            None => Err(StageError::UnknownNode(id)),
            Some(n) if !n.kind.is_container() => Err(StageError::NotAContainer(id)),
            Some(_) => Ok(()),
        }
    }

    fn check_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        if !self.has_node(child) {
            return Err(StageError::UnknownNode(child));
        }
        if self.contains(child, parent) {
            return Err(StageError::CyclicChild { parent, child });
        }
        Ok(())
    }

    /// Inserts `node` and appends it to `parent`.
    pub fn spawn_child(&mut self, parent: NodeId, node: Node) -> Result<NodeId> {
        self.check_container(parent)?;
        let id = self.insert(node);
        self.add_child(parent, id)
    }

    /// Appends `child`, first detaching it from any previous parent.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<NodeId> {
        self.check_container(parent)?;
        self.check_child(parent, child)?;

        if let Some(old) = self.parent(child) {
            self.remove_child(old, child);
        }
        if let Some(slot) = self.slot_mut(child) {
            slot.parent = Some(parent);
        }
        if let Some(slot) = self.slot_mut(parent) {
            slot.children.push(child);
        }
        self.dispatch_simple(child, "added");
        Ok(child)
    }

    /// Same as calling [`Scene::add_child`] for each id in order. Returns
    /// the last one added.
    pub fn add_children(&mut self, parent: NodeId, children: &[NodeId]) -> Result<Option<NodeId>> {
        let mut last = None;
        for &child in children {
            last = Some(self.add_child(parent, child)?);
        }
        Ok(last)
    }

    /// Inserts `child` at `index`. An index past the end is a no-op that
    /// returns `Ok(None)`.
    pub fn add_child_at(&mut self, parent: NodeId, child: NodeId, index: usize) -> Result<Option<NodeId>> {
        self.check_container(parent)?;
        if index > self.num_children(parent) {
            return Ok(None);
        }
        self.check_child(parent, child)?;

        if let Some(old) = self.parent(child) {
            self.remove_child(old, child);
        }
        if let Some(slot) = self.slot_mut(child) {
            slot.parent = Some(parent);
        }
        if let Some(slot) = self.slot_mut(parent) {
            let at = index.min(slot.children.len());
            slot.children.insert(at, child);
        }
        self.dispatch_simple(child, "added");
        Ok(Some(child))
    }

    /// Inserts the ids at consecutive positions starting at `index`.
    pub fn add_children_at(
        &mut self,
        parent: NodeId,
        children: &[NodeId],
        index: usize,
    ) -> Result<Option<NodeId>> {
        self.check_container(parent)?;
        if index > self.num_children(parent) {
            return Ok(None);
        }
        let mut last = None;
        for (i, &child) in children.iter().enumerate() {
            last = self.add_child_at(parent, child, index + i)?;
        }
        Ok(last)
    }

    /// Returns `false` if `child` is not a child of `parent`.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        match self.get_child_index(parent, child) {
            Some(index) => self.remove_child_at(parent, index),
            None => false,
        }
    }

    /// Removes each id; `true` only if every removal succeeded.
    pub fn remove_children(&mut self, parent: NodeId, children: &[NodeId]) -> bool {
        let mut good = true;
        for &child in children {
            good &= self.remove_child(parent, child);
        }
        good
    }

    /// Out-of-range indexes are a no-op that returns `false`.
    pub fn remove_child_at(&mut self, parent: NodeId, index: usize) -> bool {
        let Some(slot) = self.slot_mut(parent) else {
            return false;
        };
        if index >= slot.children.len() {
            return false;
        }
        let child = slot.children.remove(index);
        if let Some(slot) = self.slot_mut(child) {
            slot.parent = None;
        }
        self.dispatch_simple(child, "removed");
        true
    }

    /// Removes from the highest index down so earlier removals do not shift
    /// later ones.
    pub fn remove_children_at(&mut self, parent: NodeId, indexes: &[usize]) -> bool {
        let mut sorted = indexes.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        let mut good = true;
        for index in sorted {
            good &= self.remove_child_at(parent, index);
        }
        good
    }

    pub fn remove_all_children(&mut self, parent: NodeId) {
        while self.remove_child_at(parent, 0) {}
    }

    pub fn get_child_at(&self, parent: NodeId, index: usize) -> Option<NodeId> {
        self.children(parent).get(index).copied()
    }

    pub fn get_child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&c| self.node(c).and_then(|n| n.name.as_deref()) == Some(name))
    }

    pub fn get_child_index(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        self.children(parent).iter().position(|&c| c == child)
    }

    pub fn num_children(&self, parent: NodeId) -> usize {
        self.children(parent).len()
    }

    pub fn sort_children<F>(&mut self, parent: NodeId, mut compare: F)
    where
        F: FnMut(&Node, &Node) -> Ordering,
    {
        let Some(slot) = self.slot_mut(parent) else {
            return;
        };
        let mut kids = std::mem::take(&mut slot.children);
        kids.sort_by(|&a, &b| match (self.node(a), self.node(b)) {
            (Some(a), Some(b)) => compare(a, b),
            _ => Ordering::Equal,
        });
        if let Some(slot) = self.slot_mut(parent) {
            slot.children = kids;
        }
    }

    /// Does nothing if either index is out of range.
    pub fn swap_children_at(&mut self, parent: NodeId, index1: usize, index2: usize) {
        if let Some(slot) = self.slot_mut(parent) {
            let len = slot.children.len();
            if index1 < len && index2 < len {
                slot.children.swap(index1, index2);
            }
        }
    }

    /// Does nothing unless both nodes are children of `parent`.
    pub fn swap_children(&mut self, parent: NodeId, child1: NodeId, child2: NodeId) {
        if let (Some(i1), Some(i2)) = (
            self.get_child_index(parent, child1),
            self.get_child_index(parent, child2),
        ) {
            self.swap_children_at(parent, i1, i2);
        }
    }

    /// Moves an existing child to `index`. Does nothing if `child` is not a
    /// child of `parent` or `index` is out of range.
    pub fn set_child_index(&mut self, parent: NodeId, child: NodeId, index: usize) {
        let Some(current) = self.get_child_index(parent, child) else {
            return;
        };
        let Some(slot) = self.slot_mut(parent) else {
            return;
        };
        if index >= slot.children.len() || index == current {
            return;
        }
        let id = slot.children.remove(current);
        slot.children.insert(index, id);
    }

    /// Whether `node` is `ancestor` or one of its descendants.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Copies a node into a new detached slot. With `recursive`, container
    /// children are cloned too. Listeners and caches are not copied.
    pub fn clone_node(&mut self, id: NodeId, recursive: bool) -> Result<NodeId> {
        let node = self.node(id).ok_or(StageError::UnknownNode(id))?;
        if let NodeKind::DomProxy(_) = node.kind {
            return Err(StageError::NotCloneable(node.kind.type_name()));
        }
        let copy = node.clone_props();
        let clone = self.insert(copy);
        if recursive {
            let kids = self.children(id).to_vec();
            for kid in kids {
                let kid_clone = self.clone_node(kid, true)?;
                if let Some(slot) = self.slot_mut(kid_clone) {
                    slot.parent = Some(clone);
                }
                if let Some(slot) = self.slot_mut(clone) {
                    slot.children.push(kid_clone);
                }
            }
        }
        Ok(clone)
    }

    // -- transforms ------------------------------------------------------

    /// The node's own matrix; identity for unknown ids.
    pub fn matrix(&self, id: NodeId) -> Transform2D {
        self.node(id).map(Node::matrix).unwrap_or_default()
    }

    /// World transform: the node's matrix with every ancestor's prepended.
    pub fn concatenated_matrix(&self, id: NodeId) -> Transform2D {
        let mut mtx = self.matrix(id);
        let mut current = self.parent(id);
        while let Some(p) = current {
            mtx.prepend_matrix(&self.matrix(p));
            current = self.parent(p);
        }
        mtx
    }

    /// World matrix plus alpha, visibility, shadow and blend mode, where the
    /// nearest set shadow and blend mode win.
    pub fn concatenated_display_props(&self, id: NodeId) -> DisplayProps {
        let mut props = DisplayProps::default();
        props.matrix = self.matrix(id);
        let mut current = Some(id);
        while let Some(o) = current {
            let Some(node) = self.node(o) else {
                break;
            };
            let mtx = (o != id).then(|| node.matrix());
            props.prepend(node.visible, node.alpha, node.shadow, node.blend_mode, mtx.as_ref());
            current = self.parent(o);
        }
        props
    }

    pub fn local_to_global(&self, id: NodeId, x: f64, y: f64) -> Point {
        self.concatenated_matrix(id).transform_point(x, y)
    }

    pub fn global_to_local(&self, id: NodeId, x: f64, y: f64) -> Point {
        let mut mtx = self.concatenated_matrix(id);
        mtx.invert();
        mtx.transform_point(x, y)
    }

    pub fn local_to_local(&self, id: NodeId, x: f64, y: f64, target: NodeId) -> Point {
        let pt = self.local_to_global(id, x, y);
        self.global_to_local(target, pt.x, pt.y)
    }

    /// Visible, not fully transparent, not collapsed, and has something to
    /// draw (a cache, children, or loaded content).
    pub fn is_visible(&self, id: NodeId) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        if !(node.visible && node.alpha > 0.0 && node.scale_x != 0.0 && node.scale_y != 0.0) {
            return false;
        }
        if node.is_cached() {
            return true;
        }
        match &node.kind {
            NodeKind::Empty => true,
            NodeKind::Container => !self.children(id).is_empty(),
            kind => kind.content().is_some_and(|c| c.has_content(self)),
        }
    }

    // -- tick ------------------------------------------------------------

    /// Ticks children last-to-first, then the node itself: sprites advance
    /// and a `tick` event is dispatched if the node listens for it.
    pub fn tick(&mut self, id: NodeId, frame: &FrameData) {
        let Some(node) = self.node(id) else {
            return;
        };
        if node.kind.is_container() && node.tick_children {
            let kids = self.children(id).to_vec();
            for &child in kids.iter().rev() {
                if self.node(child).is_some_and(|n| n.tick_enabled) {
                    self.tick(child, frame);
                }
            }
        }

        if let Some(NodeKind::Sprite(sprite)) = self.node_mut(id).map(|n| &mut n.kind) {
            sprite.tick(Some(frame.delta));
            self.flush_sprite_events(id);
        }

        let listens = self.node(id).is_some_and(|n| n.events().has_listener("tick"));
        if listens {
            let mut event = Event::new("tick").with_frame(frame.clone());
            self.dispatch_event(id, &mut event);
        }
    }

    /// Dispatches the `change` and `animationend` events a sprite queued
    /// since the last flush. Call after driving a sprite by hand.
    pub fn flush_sprite_events(&mut self, id: NodeId) {
        let events = match self.node_mut(id).map(|n| &mut n.kind) {
            Some(NodeKind::Sprite(sprite)) => sprite.take_events(),
            _ => return,
        };
        for ev in events {
            let mut event = match ev {
                SpriteEvent::Change => Event::new("change"),
                SpriteEvent::AnimationEnd { name, .. } => {
                    let mut e = Event::new("animationend");
                    e.name = name;
                    e
                }
            };
            self.dispatch_event(id, &mut event);
        }
    }

    /// Copies each DOM proxy's concatenated props into its style. Renderers
    /// call this once a frame has been drawn.
    pub(crate) fn sync_dom_proxies(&mut self, root: NodeId) {
        let mut stack = vec![root];
        let mut proxies = Vec::new();
        while let Some(id) = stack.pop() {
            if let Some(NodeKind::DomProxy(_)) = self.node(id).map(|n| &n.kind) {
                proxies.push((id, self.concatenated_display_props(id)));
            }
            stack.extend_from_slice(self.children(id));
        }
        for (id, props) in proxies {
            if let Some(NodeKind::DomProxy(proxy)) = self.node_mut(id).map(|n| &mut n.kind) {
                proxy.sync(&props);
            }
        }
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("nodes", &self.dense.len())
            .field("images", &self.images.len())
            .field("strict", &self.strict)
            .finish()
    }
}
