//! Hierarchical scene graph
//!
//! Nodes live in a `SlotMap` and refer to each other by [`NodeKey`]. World
//! transforms are cached and only recomputed for nodes whose local transform
//! (or an ancestor's) changed since the last [`SceneGraph::update_world_transforms`].

use bitflags::bitflags;
use slotmap::{new_key_type, SlotMap};
use thiserror::Error;

use super::mesh::MeshHandle;
use crate::foundation::math::{Mat4, Transform};

new_key_type! {
    /// Key of a node in a [`SceneGraph`]
    pub struct NodeKey;
}

bitflags! {
    /// Per-node state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Node and its subtree are drawn
        const VISIBLE = 1 << 0;
        /// Local transform changed since the last world update
        const DIRTY = 1 << 1;
    }
}

/// Scene graph errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// Key does not refer to a live node
    #[error("Scene node not found")]
    NodeNotFound,

    /// Reparenting would make a node its own ancestor
    #[error("Reparenting would create a cycle")]
    Cycle,

    /// The root node cannot be removed or reparented
    #[error("The root node cannot be removed or reparented")]
    RootRemoval,
}

/// A single node in the scene graph
#[derive(Debug, Clone)]
pub struct SceneNode {
    name: String,
    local: Transform,
    world: Mat4,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
    mesh: Option<MeshHandle>,
    flags: NodeFlags,
}

impl SceneNode {
    fn new(name: String, local: Transform, parent: Option<NodeKey>) -> Self {
        Self {
            name,
            local,
            world: Mat4::identity(),
            parent,
            children: Vec::new(),
            mesh: None,
            flags: NodeFlags::VISIBLE | NodeFlags::DIRTY,
        }
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transform relative to the parent
    pub fn local_transform(&self) -> &Transform {
        &self.local
    }

    /// Cached world matrix
    pub fn world_matrix(&self) -> &Mat4 {
        &self.world
    }

    /// Parent node, `None` for the root
    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    /// Child nodes in insertion order
    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    /// Attached mesh
    pub fn mesh(&self) -> Option<MeshHandle> {
        self.mesh
    }

    /// State flags
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }
}

/// Tree of transform nodes with an always-present root
pub struct SceneGraph {
    nodes: SlotMap<NodeKey, SceneNode>,
    root: NodeKey,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    /// Create a graph containing only the root node
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(SceneNode::new("root".to_string(), Transform::identity(), None));
        Self { nodes, root }
    }

    /// Root node key
    pub fn root(&self) -> NodeKey {
        self.root
    }

    /// Number of nodes including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph holds only the root
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Look up a node
    pub fn node(&self, key: NodeKey) -> Option<&SceneNode> {
        self.nodes.get(key)
    }

    fn node_mut(&mut self, key: NodeKey) -> Result<&mut SceneNode, SceneError> {
        self.nodes.get_mut(key).ok_or(SceneError::NodeNotFound)
    }

    /// Add a child of `parent`
    pub fn add_node(&mut self, parent: NodeKey, name: impl Into<String>, local: Transform) -> Result<NodeKey, SceneError> {
        if !self.nodes.contains_key(parent) {
            return Err(SceneError::NodeNotFound);
        }
        let key = self.nodes.insert(SceneNode::new(name.into(), local, Some(parent)));
        self.node_mut(parent)?.children.push(key);
        Ok(key)
    }

    /// Attach or detach a mesh
    pub fn set_mesh(&mut self, key: NodeKey, mesh: Option<MeshHandle>) -> Result<(), SceneError> {
        self.node_mut(key)?.mesh = mesh;
        Ok(())
    }

    /// Show or hide a node and its subtree
    pub fn set_visible(&mut self, key: NodeKey, visible: bool) -> Result<(), SceneError> {
        self.node_mut(key)?.flags.set(NodeFlags::VISIBLE, visible);
        Ok(())
    }

    /// Replace the local transform and mark the node dirty
    pub fn set_local_transform(&mut self, key: NodeKey, local: Transform) -> Result<(), SceneError> {
        let node = self.node_mut(key)?;
        node.local = local;
        node.flags.insert(NodeFlags::DIRTY);
        Ok(())
    }

    /// Whether `ancestor` is `key` or one of its ancestors
    pub fn is_ancestor(&self, ancestor: NodeKey, key: NodeKey) -> bool {
        let mut current = Some(key);
        while let Some(k) = current {
            if k == ancestor {
                return true;
            }
            current = self.nodes.get(k).and_then(SceneNode::parent);
        }
        false
    }

    /// Move a node (with its subtree) under a new parent
    pub fn reparent(&mut self, key: NodeKey, new_parent: NodeKey) -> Result<(), SceneError> {
        if key == self.root {
            return Err(SceneError::RootRemoval);
        }
        if !self.nodes.contains_key(key) || !self.nodes.contains_key(new_parent) {
            return Err(SceneError::NodeNotFound);
        }
        if self.is_ancestor(key, new_parent) {
            return Err(SceneError::Cycle);
        }

        if let Some(old_parent) = self.nodes[key].parent {
            self.node_mut(old_parent)?.children.retain(|&c| c != key);
        }
        self.node_mut(new_parent)?.children.push(key);

        let node = self.node_mut(key)?;
        node.parent = Some(new_parent);
        node.flags.insert(NodeFlags::DIRTY);
        Ok(())
    }

    /// Remove a node and its whole subtree, returning how many nodes were removed
    pub fn remove(&mut self, key: NodeKey) -> Result<usize, SceneError> {
        if key == self.root {
            return Err(SceneError::RootRemoval);
        }
        let parent = self.nodes.get(key).ok_or(SceneError::NodeNotFound)?.parent;
        if let Some(parent) = parent {
            self.node_mut(parent)?.children.retain(|&c| c != key);
        }

        let mut removed = 0;
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            if let Some(node) = self.nodes.remove(k) {
                stack.extend(node.children);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Recompute world matrices of dirty nodes and their descendants
    ///
    /// Returns the number of nodes whose world matrix was recomputed.
    pub fn update_world_transforms(&mut self) -> usize {
        let mut updated = 0;
        let mut stack = vec![(self.root, Mat4::identity(), false)];

        while let Some((key, parent_world, parent_changed)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(key) else {
                continue;
            };
            let changed = parent_changed || node.flags.contains(NodeFlags::DIRTY);
            if changed {
                node.world = parent_world * node.local.to_matrix();
                node.flags.remove(NodeFlags::DIRTY);
                updated += 1;
            }
            let world = node.world;
            stack.extend(node.children.iter().rev().map(|&child| (child, world, changed)));
        }
        updated
    }

    /// World matrix as of the last update
    pub fn world_transform(&self, key: NodeKey) -> Result<Mat4, SceneError> {
        self.nodes.get(key).map(|n| n.world).ok_or(SceneError::NodeNotFound)
    }

    /// Visit every visible node with a mesh in depth-first order
    ///
    /// Hidden nodes prune their whole subtree.
    pub fn visit_drawables<F>(&self, mut visit: F)
    where
        F: FnMut(NodeKey, MeshHandle, &Mat4),
    {
        let mut stack = vec![self.root];
        while let Some(key) = stack.pop() {
            let Some(node) = self.nodes.get(key) else {
                continue;
            };
            if !node.flags.contains(NodeFlags::VISIBLE) {
                continue;
            }
            if let Some(mesh) = node.mesh {
                visit(key, mesh, &node.world);
            }
            stack.extend(node.children.iter().rev());
        }
    }

    /// First node with the given name, in depth-first order
    pub fn find_by_name(&self, name: &str) -> Option<NodeKey> {
        let mut stack = vec![self.root];
        while let Some(key) = stack.pop() {
            let node = self.nodes.get(key)?;
            if node.name == name {
                return Some(key);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Point3, Vec3};
    use approx::assert_relative_eq;

    fn mesh_handles(count: usize) -> Vec<MeshHandle> {
        let mut keys: SlotMap<MeshHandle, ()> = SlotMap::with_key();
        (0..count).map(|_| keys.insert(())).collect()
    }

    fn translated(x: f32, y: f32, z: f32) -> Transform {
        Transform::from_position(Vec3::new(x, y, z))
    }

    #[test]
    fn test_world_transform_composes_parents() {
        let mut graph = SceneGraph::new();
        let parent = graph.add_node(graph.root(), "parent", translated(1.0, 0.0, 0.0)).unwrap();
        let child = graph.add_node(parent, "child", translated(0.0, 2.0, 0.0)).unwrap();

        assert_eq!(graph.update_world_transforms(), 3);
        let origin = graph.world_transform(child).unwrap().transform_point(&Point3::origin());
        assert_relative_eq!(origin, Point3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_only_dirty_subtrees_are_updated() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(graph.root(), "a", Transform::identity()).unwrap();
        let a_child = graph.add_node(a, "a_child", Transform::identity()).unwrap();
        let _b = graph.add_node(graph.root(), "b", Transform::identity()).unwrap();
        graph.update_world_transforms();
        assert_eq!(graph.update_world_transforms(), 0);

        graph.set_local_transform(a, translated(0.0, 0.0, 5.0)).unwrap();
        assert_eq!(graph.update_world_transforms(), 2);

        let origin = graph.world_transform(a_child).unwrap().transform_point(&Point3::origin());
        assert_relative_eq!(origin, Point3::new(0.0, 0.0, 5.0));
    }

    #[test]
    fn test_reparent_rejects_cycles() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(graph.root(), "a", Transform::identity()).unwrap();
        let b = graph.add_node(a, "b", Transform::identity()).unwrap();

        assert_eq!(graph.reparent(a, b), Err(SceneError::Cycle));
        assert_eq!(graph.reparent(a, a), Err(SceneError::Cycle));
        assert_eq!(graph.reparent(graph.root(), a), Err(SceneError::RootRemoval));
    }

    #[test]
    fn test_reparent_moves_subtree() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(graph.root(), "a", translated(1.0, 0.0, 0.0)).unwrap();
        let b = graph.add_node(graph.root(), "b", translated(0.0, 3.0, 0.0)).unwrap();
        let leaf = graph.add_node(a, "leaf", Transform::identity()).unwrap();
        graph.update_world_transforms();

        graph.reparent(leaf, b).unwrap();
        graph.update_world_transforms();

        assert!(graph.node(a).unwrap().children().is_empty());
        assert_eq!(graph.node(b).unwrap().children(), &[leaf]);
        assert_eq!(graph.node(leaf).unwrap().parent(), Some(b));
        let origin = graph.world_transform(leaf).unwrap().transform_point(&Point3::origin());
        assert_relative_eq!(origin, Point3::new(0.0, 3.0, 0.0));
    }

    #[test]
    fn test_remove_subtree() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(graph.root(), "a", Transform::identity()).unwrap();
        let b = graph.add_node(a, "b", Transform::identity()).unwrap();
        graph.add_node(b, "c", Transform::identity()).unwrap();

        assert_eq!(graph.remove(a), Ok(3));
        assert!(graph.is_empty());
        assert!(graph.node(b).is_none());
        assert_eq!(graph.remove(a), Err(SceneError::NodeNotFound));
        assert_eq!(graph.remove(graph.root()), Err(SceneError::RootRemoval));
    }

    #[test]
    fn test_visit_drawables_depth_first() {
        let meshes = mesh_handles(3);
        let mut graph = SceneGraph::new();
        let a = graph.add_node(graph.root(), "a", Transform::identity()).unwrap();
        let a1 = graph.add_node(a, "a1", Transform::identity()).unwrap();
        let b = graph.add_node(graph.root(), "b", Transform::identity()).unwrap();
        graph.set_mesh(a, Some(meshes[0])).unwrap();
        graph.set_mesh(a1, Some(meshes[1])).unwrap();
        graph.set_mesh(b, Some(meshes[2])).unwrap();

        let mut order = Vec::new();
        graph.visit_drawables(|key, _, _| order.push(key));
        assert_eq!(order, vec![a, a1, b]);

        graph.set_visible(a, false).unwrap();
        order.clear();
        graph.visit_drawables(|key, _, _| order.push(key));
        assert_eq!(order, vec![b]);
    }

    #[test]
    fn test_find_by_name() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(graph.root(), "a", Transform::identity()).unwrap();
        let target = graph.add_node(a, "target", Transform::identity()).unwrap();

        assert_eq!(graph.find_by_name("target"), Some(target));
        assert_eq!(graph.find_by_name("root"), Some(graph.root()));
        assert_eq!(graph.find_by_name("missing"), None);
    }
}
