//! Pixel-accurate hit testing.
//!
//! Candidates are drawn one at a time into a 1x1 surface translated so the
//! query point lands on its only pixel. A hit is an alpha above 1.

use crate::color::Color;
use crate::display::NodeKind;
use crate::error::Result;
use crate::raster::{Canvas, DrawState};
use crate::transform::Transform2D;
use crate::tree::{NodeId, Scene};

/// Which nodes qualify in [`Scene::objects_under_point`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HitMode {
    /// Every visible node.
    #[default]
    All,
    /// Only mouse-enabled nodes.
    MouseEnabled,
    /// Mouse-enabled nodes that listen for mouse events, directly or through
    /// an ancestor.
    Listeners,
}

impl HitMode {
    fn mouse(self) -> bool {
        self != HitMode::All
    }

    fn active_listener(self) -> bool {
        self == HitMode::MouseEnabled
    }
}

impl Scene {
    /// Whether the node has a visible pixel at the local point. Containers
    /// test their children instead.
    pub fn hit_test(&self, id: NodeId, x: f64, y: f64) -> Result<bool> {
        let Some(node) = self.node(id) else {
            return Ok(false);
        };
        if node.kind.is_container() {
            return Ok(self.object_under_point(id, x, y, HitMode::All)?.is_some());
        }
        let state = DrawState::with_transform(Transform2D::new(1.0, 0.0, 0.0, 1.0, -x, -y));
        self.hit_pixel(|scene, canvas| {
            scene.draw_node(id, canvas, &state, false);
        })
    }

    /// Every descendant of `container` with a visible pixel under the point,
    /// topmost first. The point is in `container`'s local space.
    pub fn objects_under_point(
        &self,
        container: NodeId,
        x: f64,
        y: f64,
        mode: HitMode,
    ) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let pt = self.local_to_global(container, x, y);
        self.objects_under(container, pt.x, pt.y, Some(&mut out), mode.mouse(), mode.active_listener(), 0)?;
        Ok(out)
    }

    /// The topmost descendant under the point. With a mouse mode a node
    /// whose parent has `mouse_children` off is reported as that parent.
    pub fn object_under_point(
        &self,
        container: NodeId,
        x: f64,
        y: f64,
        mode: HitMode,
    ) -> Result<Option<NodeId>> {
        let pt = self.local_to_global(container, x, y);
        self.objects_under(container, pt.x, pt.y, None, mode.mouse(), mode.active_listener(), 0)
    }

    /// `x` and `y` are global. With `out` every hit is collected and `None`
    /// returned; without it the first hit is returned.
    #[allow(clippy::too_many_arguments)]
    fn objects_under(
        &self,
        container: NodeId,
        x: f64,
        y: f64,
        mut out: Option<&mut Vec<NodeId>>,
        mouse: bool,
        active_listener: bool,
        depth: usize,
    ) -> Result<Option<NodeId>> {
        let Some(this) = self.node(container) else {
            return Ok(None);
        };
        if depth == 0 && !self.test_mask(container, x, y)? {
            return Ok(None);
        }
        let active_listener = active_listener || (mouse && this.has_mouse_listener());
        let redirect = |hit: NodeId| {
            if mouse && !this.mouse_children {
                container
            } else {
                hit
            }
        };

        for &child_id in self.children(container).iter().rev() {
            let Some(child) = self.node(child_id) else {
                continue;
            };
            let hit_area = child.hit_area.filter(|&h| self.has_node(h));
            if !child.visible
                || (hit_area.is_none() && !self.is_visible(child_id))
                || (mouse && !child.mouse_enabled)
            {
                continue;
            }
            if hit_area.is_none() && !self.test_mask(child_id, x, y)? {
                continue;
            }

            if hit_area.is_none() && child.kind.is_container() {
                let result = self.objects_under(
                    child_id,
                    x,
                    y,
                    out.as_deref_mut(),
                    mouse,
                    active_listener,
                    depth + 1,
                )?;
                if out.is_none() {
                    if let Some(hit) = result {
                        return Ok(Some(redirect(hit)));
                    }
                }
                continue;
            }

            if mouse && !active_listener && !child.has_mouse_listener() {
                continue;
            }

            let mut props = self.concatenated_display_props(child_id);
            let target = match hit_area {
                Some(area) => {
                    props.matrix.append_matrix(&self.matrix(area));
                    props.alpha = self.node(area).map_or(1.0, |n| n.alpha);
                    area
                }
                None => child_id,
            };
            let m = props.matrix;
            let state = DrawState {
                transform: Transform2D::new(m.a, m.b, m.c, m.d, m.tx - x, m.ty - y),
                alpha: props.alpha,
                ..DrawState::default()
            };
            let hit = self.hit_pixel(|scene, canvas| {
                scene.draw_node(target, canvas, &state, false);
            })?;
            if !hit {
                continue;
            }

            match out.as_deref_mut() {
                Some(list) => list.push(child_id),
                None => return Ok(Some(redirect(child_id))),
            }
        }
        Ok(None)
    }

    /// Whether the point survives the node's mask. Only non-empty shape masks
    /// are tested; anything else lets the point through.
    fn test_mask(&self, target: NodeId, x: f64, y: f64) -> Result<bool> {
        let Some(mask_id) = self.node(target).and_then(|n| n.mask) else {
            return Ok(true);
        };
        let Some(mask) = self.node(mask_id) else {
            return Ok(true);
        };
        let NodeKind::Shape(shape) = &mask.kind else {
            return Ok(true);
        };
        if shape.graphics.is_empty() {
            return Ok(true);
        }
        let Some(path) = shape.graphics.as_path() else {
            return Ok(true);
        };

        let mut mtx = match self.parent(target) {
            Some(parent) => self.concatenated_matrix(parent),
            None => Transform2D::IDENTITY,
        };
        mtx.append_matrix(&mask.matrix());
        let state = DrawState::with_transform(Transform2D::new(
            mtx.a,
            mtx.b,
            mtx.c,
            mtx.d,
            mtx.tx - x,
            mtx.ty - y,
        ));
        self.hit_pixel(|_, canvas| canvas.fill_path(&path, Color::BLACK, &state))
    }

    /// Clears the hit surface, runs `draw`, and reads back the pixel. Read
    /// failures count as a miss unless the scene is strict.
    fn hit_pixel<F>(&self, draw: F) -> Result<bool>
    where
        F: FnOnce(&Scene, &mut Canvas),
    {
        let mut surface = self.hit_surface()?;
        surface.clear();
        draw(self, &mut Canvas::new(&mut surface));
        let hit = match surface.pixel(0, 0) {
            Ok(px) => px.is_some_and(|p| p[3] > 1),
            Err(err) if self.strict() => return Err(err),
            Err(err) => {
                log::debug!("hit test read failed: {err}");
                false
            }
        };
        surface.clear();
        Ok(hit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{Graphics, ImageSource, Node};
    use crate::error::StageError;
    use crate::events::Event;

    fn square(color: Color, x: f64, y: f64, size: f32) -> Node {
        Node::shape(Graphics::filled_rect(color, 0.0, 0.0, size, size)).with_position(x, y)
    }

    #[test]
    fn test_topmost_child_wins() {
        let mut scene = Scene::new();
        let root = scene.insert(Node::container());
        let bottom = scene.spawn_child(root, square(Color::BLACK, 0.0, 0.0, 20.0)).unwrap();
        let top = scene.spawn_child(root, square(Color::WHITE, 10.0, 10.0, 20.0)).unwrap();

        assert_eq!(scene.object_under_point(root, 15.0, 15.0, HitMode::All).unwrap(), Some(top));
        assert_eq!(scene.object_under_point(root, 5.0, 5.0, HitMode::All).unwrap(), Some(bottom));
        assert_eq!(
            scene.objects_under_point(root, 15.0, 15.0, HitMode::All).unwrap(),
            vec![top, bottom]
        );
        assert_eq!(scene.object_under_point(root, 50.0, 50.0, HitMode::All).unwrap(), None);
    }

    #[test]
    fn test_transparent_pixels_miss() {
        let mut scene = Scene::new();
        let root = scene.insert(Node::container());
        let faint = square(Color::BLACK, 0.0, 0.0, 10.0).with_alpha(0.001);
        scene.spawn_child(root, faint).unwrap();
        assert_eq!(scene.object_under_point(root, 5.0, 5.0, HitMode::All).unwrap(), None);
    }

    #[test]
    fn test_mask_excludes_points() {
        let mut scene = Scene::new();
        let root = scene.insert(Node::container());
        let mask = scene.insert(square(Color::BLACK, 0.0, 0.0, 5.0));
        let mut node = square(Color::BLACK, 0.0, 0.0, 10.0);
        node.mask = Some(mask);
        let id = scene.spawn_child(root, node).unwrap();

        assert_eq!(scene.object_under_point(root, 2.0, 2.0, HitMode::All).unwrap(), Some(id));
        assert_eq!(scene.object_under_point(root, 8.0, 8.0, HitMode::All).unwrap(), None);
    }

    #[test]
    fn test_hit_area_replaces_content() {
        let mut scene = Scene::new();
        let root = scene.insert(Node::container());
        let area = scene.insert(square(Color::BLACK, 0.0, 0.0, 40.0));
        let mut node = square(Color::BLACK, 0.0, 0.0, 10.0);
        node.hit_area = Some(area);
        let id = scene.spawn_child(root, node).unwrap();
        assert_eq!(scene.object_under_point(root, 30.0, 30.0, HitMode::All).unwrap(), Some(id));
    }

    #[test]
    fn test_mouse_children_off_reports_parent() {
        let mut scene = Scene::new();
        let root = scene.insert(Node::container());
        let mut group = Node::container();
        group.mouse_children = false;
        let group = scene.spawn_child(root, group).unwrap();
        scene.spawn_child(group, square(Color::BLACK, 0.0, 0.0, 10.0)).unwrap();

        let hit = scene.object_under_point(root, 5.0, 5.0, HitMode::MouseEnabled).unwrap();
        assert_eq!(hit, Some(group));
    }

    #[test]
    fn test_listener_mode_needs_listener() {
        let mut scene = Scene::new();
        let root = scene.insert(Node::container());
        let id = scene.spawn_child(root, square(Color::BLACK, 0.0, 0.0, 10.0)).unwrap();
        assert_eq!(scene.object_under_point(root, 5.0, 5.0, HitMode::Listeners).unwrap(), None);

        scene.add_listener(id, "click", Box::new(|_: &mut Event| {}));
        assert_eq!(scene.object_under_point(root, 5.0, 5.0, HitMode::Listeners).unwrap(), Some(id));
    }

    #[test]
    fn test_leaf_hit_test_is_local() {
        let mut scene = Scene::new();
        let id = scene.insert(square(Color::BLACK, 100.0, 100.0, 10.0));
        assert!(scene.hit_test(id, 5.0, 5.0).unwrap());
        assert!(!scene.hit_test(id, 15.0, 5.0).unwrap());
    }

    #[test]
    fn test_tainted_read_depends_on_strict() {
        let mut scene = Scene::new();
        let image = ImageSource::solid(4, 4, Color::BLACK).unwrap().with_origin_clean(false);
        let image = scene.add_image(image);
        let id = scene.insert(Node::bitmap(image));

        assert!(!scene.hit_test(id, 1.0, 1.0).unwrap());
        scene.set_strict(true);
        assert!(matches!(scene.hit_test(id, 1.0, 1.0), Err(StageError::Tainted)));
    }
}
