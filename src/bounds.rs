//! Bounds queries.
//!
//! Explicit bounds set with [`Node::set_bounds`](crate::display::Node::set_bounds)
//! win. A cached node then reports its cache rect. Otherwise leaves ask their
//! content and containers union their visible children.

use crate::geom::Rect;
use crate::transform::Transform2D;
use crate::tree::{NodeId, Scene};

impl Scene {
    /// Bounds in the node's own coordinate space, ignoring its transform.
    pub fn bounds(&self, id: NodeId) -> Option<Rect> {
        self.bounds_in(id, None, true)
    }

    /// Bounds in the parent's coordinate space.
    pub fn transformed_bounds(&self, id: NodeId) -> Option<Rect> {
        self.bounds_in(id, None, false)
    }

    /// Explicit bounds or cache rect, if either exists.
    fn own_bounds(&self, id: NodeId) -> Option<Rect> {
        let node = self.node(id)?;
        node.bounds.or_else(|| node.cache().map(|c| c.bounds()))
    }

    fn leaf_bounds(&self, id: NodeId) -> Option<Rect> {
        if let Some(b) = self.own_bounds(id) {
            return Some(b);
        }
        self.node(id)?.kind.content()?.bounds(self)
    }

    fn bounds_in(&self, id: NodeId, matrix: Option<&Transform2D>, ignore_transform: bool) -> Option<Rect> {
        let node = self.node(id)?;
        if !node.kind.is_container() {
            let rect = self.leaf_bounds(id)?;
            return Some(self.transform_bounds(id, rect, matrix, ignore_transform));
        }
        if let Some(rect) = self.own_bounds(id) {
            return Some(self.transform_bounds(id, rect, matrix, ignore_transform));
        }

        let mut mtx = if ignore_transform {
            Transform2D::IDENTITY
        } else {
            node.matrix()
        };
        if let Some(m) = matrix {
            mtx.prepend_matrix(m);
        }

        let mut out: Option<Rect> = None;
        for &child in self.children(id) {
            if !self.node(child).is_some_and(|c| c.visible) {
                continue;
            }
            if let Some(r) = self.bounds_in(child, Some(&mtx), false) {
                match out.as_mut() {
                    Some(o) => {
                        o.extend(r.x, r.y, r.width, r.height);
                    }
                    None => out = Some(r),
                }
            }
        }
        out
    }

    /// Axis-aligned box around `rect` after the node's transform (unless
    /// ignored) and `matrix` are applied.
    fn transform_bounds(
        &self,
        id: NodeId,
        rect: Rect,
        matrix: Option<&Transform2D>,
        ignore_transform: bool,
    ) -> Rect {
        let Rect { x, y, width, height } = rect;
        let mut mtx = if ignore_transform {
            Transform2D::IDENTITY
        } else {
            self.matrix(id)
        };
        if x != 0.0 || y != 0.0 {
            mtx.append_transform(0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, -x, -y);
        }
        if let Some(m) = matrix {
            mtx.prepend_matrix(m);
        }

        let corners = [
            mtx.transform_point(0.0, 0.0),
            mtx.transform_point(width, 0.0),
            mtx.transform_point(0.0, height),
            mtx.transform_point(width, height),
        ];
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in corners {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Sets or clears explicit bounds. Does nothing for unknown ids.
    pub fn set_bounds(&mut self, id: NodeId, bounds: Option<Rect>) {
        if let Some(node) = self.node_mut(id) {
            node.set_bounds(bounds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::display::{Graphics, Node};

    fn rect_node(x: f64, y: f64, w: f32, h: f32) -> Node {
        Node::shape(Graphics::filled_rect(Color::BLACK, 0.0, 0.0, w, h)).with_position(x, y)
    }

    #[test]
    fn test_container_unions_children() {
        let mut scene = Scene::new();
        let root = scene.insert(Node::container().with_position(100.0, 100.0));
        scene.spawn_child(root, rect_node(0.0, 0.0, 10.0, 10.0)).unwrap();
        scene.spawn_child(root, rect_node(20.0, 5.0, 10.0, 10.0)).unwrap();

        assert_eq!(scene.bounds(root), Some(Rect::new(0.0, 0.0, 30.0, 15.0)));
        assert_eq!(
            scene.transformed_bounds(root),
            Some(Rect::new(100.0, 100.0, 30.0, 15.0))
        );
    }

    #[test]
    fn test_hidden_children_are_skipped() {
        let mut scene = Scene::new();
        let root = scene.insert(Node::container());
        scene.spawn_child(root, rect_node(0.0, 0.0, 10.0, 10.0)).unwrap();
        let mut far = rect_node(50.0, 50.0, 10.0, 10.0);
        far.visible = false;
        scene.spawn_child(root, far).unwrap();
        assert_eq!(scene.bounds(root), Some(Rect::new(0.0, 0.0, 10.0, 10.0)));
    }

    #[test]
    fn test_explicit_bounds_win_and_transform() {
        let mut scene = Scene::new();
        let mut node = Node::container().with_position(10.0, 0.0);
        node.scale_x = 2.0;
        let id = scene.insert(node);
        scene.set_bounds(id, Some(Rect::new(-5.0, 0.0, 10.0, 4.0)));

        assert_eq!(scene.bounds(id), Some(Rect::new(-5.0, 0.0, 10.0, 4.0)));
        assert_eq!(scene.transformed_bounds(id), Some(Rect::new(0.0, 0.0, 20.0, 4.0)));
    }

    #[test]
    fn test_rotation_yields_axis_aligned_box() {
        let mut scene = Scene::new();
        let mut node = rect_node(0.0, 0.0, 10.0, 10.0);
        node.rotation = 90.0;
        let id = scene.insert(node);
        let b = scene.transformed_bounds(id).unwrap();
        assert!((b.x + 10.0).abs() < 1e-9);
        assert!((b.width - 10.0).abs() < 1e-9 && (b.height - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_container_has_no_bounds() {
        let mut scene = Scene::new();
        let root = scene.insert(Node::container());
        assert_eq!(scene.bounds(root), None);
    }
}
