//! Nodes that position an external element instead of drawing pixels.

use crate::geom::Rect;
use crate::raster::{Canvas, DrawState};
use crate::transform::Transform2D;
use crate::tree::Scene;

use super::{Content, DisplayProps};

const PRECISION: f64 = 10000.0;

/// Style an overlay element should carry to follow its node.
///
/// Only fields that changed since the previous frame are rewritten, so a
/// caller can diff cheaply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomStyle {
    pub visible: bool,
    /// CSS `matrix(a,b,c,d,tx,ty)` string.
    pub transform: Option<String>,
    pub opacity: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomProxy {
    /// Identifier of the element this node drives.
    pub element: String,
    style: DomStyle,
    last_matrix: Option<Transform2D>,
    last_alpha: Option<f64>,
    updates: u64,
}

impl DomProxy {
    pub fn new(element: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            ..Self::default()
        }
    }

    pub fn style(&self) -> &DomStyle {
        &self.style
    }

    /// Number of times the style changed.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Applies the node's concatenated props after a frame was drawn.
    pub(crate) fn sync(&mut self, props: &DisplayProps) {
        if self.style.visible != props.visible {
            self.style.visible = props.visible;
            self.updates += 1;
        }
        if !props.visible {
            return;
        }

        let m = props.matrix;
        if self.last_matrix.map_or(true, |old| !old.equals(&m)) {
            let round = |v: f64| (v * PRECISION).trunc() / PRECISION;
            self.style.transform = Some(format!(
                "matrix({},{},{},{},{},{})",
                round(m.a),
                round(m.b),
                round(m.c),
                round(m.d),
                (m.tx + 0.5).floor(),
                (m.ty + 0.5).floor()
            ));
            self.last_matrix = Some(m);
            self.updates += 1;
        }
        if self.last_alpha != Some(props.alpha) {
            self.style.opacity = Some(((props.alpha * PRECISION).trunc() / PRECISION).to_string());
            self.last_alpha = Some(props.alpha);
            self.updates += 1;
        }
    }
}

impl Content for DomProxy {
    fn has_content(&self, _scene: &Scene) -> bool {
        true
    }

    fn bounds(&self, _scene: &Scene) -> Option<Rect> {
        None
    }

    fn draw(&self, _scene: &Scene, _canvas: &mut Canvas, _state: &DrawState) -> bool {
        true
    }
}
