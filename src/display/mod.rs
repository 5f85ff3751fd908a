//! Scene nodes and their drawable content.
//!
//! A [`Node`] carries the properties every node shares (transform fields,
//! alpha, visibility, blend mode, shadow, filters, mask and hit area). What a
//! node draws is decided by its [`NodeKind`]: containers draw their children,
//! leaves implement [`Content`].

pub mod bitmap;
pub mod dom;
pub mod shape;
pub mod sprite;
pub mod text;

pub use bitmap::{Bitmap, ImageId, ImageSource};
pub use dom::{DomProxy, DomStyle};
pub use shape::{Command, Graphics, Shape, StrokeStyle};
pub use sprite::{Animation, Frame, FrameTarget, Sprite, SpriteEvent, SpriteSheet};
pub use text::{Text, TextAlign, TextBaseline, TextContext};

use crate::cache::BitmapCache;
use crate::color::Color;
use crate::events::EventDispatcher;
use crate::filters::Filter;
use crate::geom::Rect;
use crate::raster::{Canvas, DrawState};
use crate::transform::Transform2D;
use crate::tree::{NodeId, Scene};

/// Canvas-style compositing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    SourceOver,
    SourceAtop,
    SourceIn,
    SourceOut,
    DestinationOver,
    DestinationAtop,
    DestinationIn,
    DestinationOut,
    Lighter,
    Copy,
    Xor,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl BlendMode {
    /// Parses a canvas `globalCompositeOperation` name.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "source-over" => Self::SourceOver,
            "source-atop" => Self::SourceAtop,
            "source-in" => Self::SourceIn,
            "source-out" => Self::SourceOut,
            "destination-over" => Self::DestinationOver,
            "destination-atop" => Self::DestinationAtop,
            "destination-in" => Self::DestinationIn,
            "destination-out" => Self::DestinationOut,
            "lighter" => Self::Lighter,
            "copy" => Self::Copy,
            "xor" => Self::Xor,
            "multiply" => Self::Multiply,
            "screen" => Self::Screen,
            "overlay" => Self::Overlay,
            "darken" => Self::Darken,
            "lighten" => Self::Lighten,
            "color-dodge" => Self::ColorDodge,
            "color-burn" => Self::ColorBurn,
            "hard-light" => Self::HardLight,
            "soft-light" => Self::SoftLight,
            "difference" => Self::Difference,
            "exclusion" => Self::Exclusion,
            "hue" => Self::Hue,
            "saturation" => Self::Saturation,
            "color" => Self::Color,
            "luminosity" => Self::Luminosity,
            _ => return None,
        })
    }

    pub fn to_skia(self) -> resvg::tiny_skia::BlendMode {
        use resvg::tiny_skia::BlendMode as B;
        match self {
            BlendMode::SourceOver => B::SourceOver,
            BlendMode::SourceAtop => B::SourceAtop,
            BlendMode::SourceIn => B::SourceIn,
            BlendMode::SourceOut => B::SourceOut,
            BlendMode::DestinationOver => B::DestinationOver,
            BlendMode::DestinationAtop => B::DestinationAtop,
            BlendMode::DestinationIn => B::DestinationIn,
            BlendMode::DestinationOut => B::DestinationOut,
            BlendMode::Lighter => B::Plus,
            BlendMode::Copy => B::Source,
            BlendMode::Xor => B::Xor,
            BlendMode::Multiply => B::Multiply,
            BlendMode::Screen => B::Screen,
            BlendMode::Overlay => B::Overlay,
            BlendMode::Darken => B::Darken,
            BlendMode::Lighten => B::Lighten,
            BlendMode::ColorDodge => B::ColorDodge,
            BlendMode::ColorBurn => B::ColorBurn,
            BlendMode::HardLight => B::HardLight,
            BlendMode::SoftLight => B::SoftLight,
            BlendMode::Difference => B::Difference,
            BlendMode::Exclusion => B::Exclusion,
            BlendMode::Hue => B::Hue,
            BlendMode::Saturation => B::Saturation,
            BlendMode::Color => B::Color,
            BlendMode::Luminosity => B::Luminosity,
        }
    }
}

/// Drop shadow drawn under a node's content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shadow {
    pub color: Color,
    pub offset_x: f64,
    pub offset_y: f64,
    pub blur: f64,
}

impl Shadow {
    pub fn new(color: Color, offset_x: f64, offset_y: f64, blur: f64) -> Self {
        Self {
            color,
            offset_x,
            offset_y,
            blur,
        }
    }

    /// A shadow that draws nothing; use it to cancel an inherited shadow.
    pub fn identity() -> Self {
        Self::new(Color::TRANSPARENT, 0.0, 0.0, 0.0)
    }
}

/// Visibility, alpha, shadow, blend mode and matrix accumulated along a
/// parent chain.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayProps {
    pub visible: bool,
    pub alpha: f64,
    pub shadow: Option<Shadow>,
    pub blend_mode: Option<BlendMode>,
    pub matrix: Transform2D,
}

impl Default for DisplayProps {
    fn default() -> Self {
        Self {
            visible: true,
            alpha: 1.0,
            shadow: None,
            blend_mode: None,
            matrix: Transform2D::IDENTITY,
        }
    }
}

impl DisplayProps {
    /// Combines with a descendant's values: the descendant's shadow and blend
    /// mode win when set.
    pub fn append(
        &mut self,
        visible: bool,
        alpha: f64,
        shadow: Option<Shadow>,
        blend_mode: Option<BlendMode>,
        matrix: Option<&Transform2D>,
    ) -> &mut Self {
        self.alpha *= alpha;
        self.shadow = shadow.or(self.shadow);
        self.blend_mode = blend_mode.or(self.blend_mode);
        self.visible = self.visible && visible;
        if let Some(m) = matrix {
            self.matrix.append_matrix(m);
        }
        self
    }

    /// Combines with an ancestor's values: values already set win, the
    /// ancestor only fills what is still unset.
    pub fn prepend(
        &mut self,
        visible: bool,
        alpha: f64,
        shadow: Option<Shadow>,
        blend_mode: Option<BlendMode>,
        matrix: Option<&Transform2D>,
    ) -> &mut Self {
        self.alpha *= alpha;
        self.shadow = self.shadow.or(shadow);
        self.blend_mode = self.blend_mode.or(blend_mode);
        self.visible = self.visible && visible;
        if let Some(m) = matrix {
            self.matrix.prepend_matrix(m);
        }
        self
    }

    pub fn identity(&mut self) -> &mut Self {
        *self = Self::default();
        self
    }
}

/// Drawing contract shared by the leaf variants.
pub trait Content {
    /// Whether there is anything to draw right now (e.g. the image finished
    /// loading).
    fn has_content(&self, scene: &Scene) -> bool;

    /// Untransformed bounds of the content, if known.
    fn bounds(&self, scene: &Scene) -> Option<Rect>;

    /// Draws into `canvas` using `state` as the current context. Returns
    /// `false` if nothing could be drawn.
    fn draw(&self, scene: &Scene, canvas: &mut Canvas, state: &DrawState) -> bool;
}

/// The closed set of node variants.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// No content of its own; only useful with a cache or explicit bounds.
    Empty,
    Container,
    Bitmap(Bitmap),
    Sprite(Sprite),
    Shape(Shape),
    Text(Text),
    DomProxy(DomProxy),
}

impl NodeKind {
    pub fn content(&self) -> Option<&dyn Content> {
        match self {
            NodeKind::Empty | NodeKind::Container => None,
            NodeKind::Bitmap(b) => Some(b),
            NodeKind::Sprite(s) => Some(s),
            NodeKind::Shape(s) => Some(s),
            NodeKind::Text(t) => Some(t),
            NodeKind::DomProxy(d) => Some(d),
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, NodeKind::Container)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Empty => "DisplayObject",
            NodeKind::Container => "Container",
            NodeKind::Bitmap(_) => "Bitmap",
            NodeKind::Sprite(_) => "Sprite",
            NodeKind::Shape(_) => "Shape",
            NodeKind::Text(_) => "Text",
            NodeKind::DomProxy(_) => "DOMElement",
        }
    }
}

/// A node in the scene.
///
/// Parent and child links live in the [`Scene`] arena, not here.
pub struct Node {
    pub name: Option<String>,
    pub x: f64,
    pub y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    /// Degrees.
    pub rotation: f64,
    /// Degrees.
    pub skew_x: f64,
    /// Degrees.
    pub skew_y: f64,
    pub reg_x: f64,
    pub reg_y: f64,
    pub alpha: f64,
    pub visible: bool,
    /// Inherited from the parent chain when `None`.
    pub blend_mode: Option<BlendMode>,
    /// Inherited from the parent chain when `None`.
    pub shadow: Option<Shadow>,
    pub filters: Vec<Box<dyn Filter>>,
    /// A shape node used as a clip for this node.
    pub mask: Option<NodeId>,
    /// Tested in place of this node during hit testing.
    pub hit_area: Option<NodeId>,
    /// Overrides every numeric transform field when set.
    pub transform_matrix: Option<Transform2D>,
    pub mouse_enabled: bool,
    pub mouse_children: bool,
    pub tick_enabled: bool,
    pub tick_children: bool,
    pub cursor: Option<String>,
    pub kind: NodeKind,
    pub(crate) bounds: Option<Rect>,
    pub(crate) cache: Option<BitmapCache>,
    pub(crate) events: EventDispatcher,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            name: None,
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
            skew_x: 0.0,
            skew_y: 0.0,
            reg_x: 0.0,
            reg_y: 0.0,
            alpha: 1.0,
            visible: true,
            blend_mode: None,
            shadow: None,
            filters: Vec::new(),
            mask: None,
            hit_area: None,
            transform_matrix: None,
            mouse_enabled: true,
            mouse_children: true,
            tick_enabled: true,
            tick_children: true,
            cursor: None,
            kind,
            bounds: None,
            cache: None,
            events: EventDispatcher::new(),
        }
    }

    pub fn container() -> Self {
        Self::new(NodeKind::Container)
    }

    pub fn bitmap(image: ImageId) -> Self {
        Self::new(NodeKind::Bitmap(Bitmap::new(image)))
    }

    pub fn shape(graphics: Graphics) -> Self {
        Self::new(NodeKind::Shape(Shape::new(graphics)))
    }

    pub fn sprite(sprite: Sprite) -> Self {
        Self::new(NodeKind::Sprite(sprite))
    }

    pub fn text(text: Text) -> Self {
        Self::new(NodeKind::Text(text))
    }

    /// DOM proxies ignore the mouse by default.
    pub fn dom_proxy(element: impl Into<String>) -> Self {
        let mut node = Self::new(NodeKind::DomProxy(DomProxy::new(element)));
        node.mouse_enabled = false;
        node
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_bounds(mut self, bounds: Rect) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Sets all numeric transform fields at once.
    #[allow(clippy::too_many_arguments)]
    pub fn set_transform(
        &mut self,
        x: f64,
        y: f64,
        scale_x: f64,
        scale_y: f64,
        rotation: f64,
        skew_x: f64,
        skew_y: f64,
        reg_x: f64,
        reg_y: f64,
    ) -> &mut Self {
        self.x = x;
        self.y = y;
        self.scale_x = scale_x;
        self.scale_y = scale_y;
        self.rotation = rotation;
        self.skew_x = skew_x;
        self.skew_y = skew_y;
        self.reg_x = reg_x;
        self.reg_y = reg_y;
        self
    }

    /// Explicit bounds, overriding anything computed from content.
    pub fn set_bounds(&mut self, bounds: Option<Rect>) {
        self.bounds = bounds;
    }

    /// The node's own transform: the override matrix if set, otherwise the
    /// composition of the numeric fields.
    pub fn matrix(&self) -> Transform2D {
        if let Some(m) = self.transform_matrix {
            return m;
        }
        let mut m = Transform2D::IDENTITY;
        m.append_transform(
            self.x,
            self.y,
            self.scale_x,
            self.scale_y,
            self.rotation,
            self.skew_x,
            self.skew_y,
            self.reg_x,
            self.reg_y,
        );
        m
    }

    pub fn cache(&self) -> Option<&BitmapCache> {
        self.cache.as_ref()
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventDispatcher {
        &mut self.events
    }

    /// Whether this node has a mouse listener or a cursor.
    pub fn has_mouse_listener(&self) -> bool {
        self.cursor.is_some() || self.events.has_mouse_listener()
    }

    /// Copy of the node's properties and content. Listeners and the cache
    /// are not copied.
    pub fn clone_props(&self) -> Node {
        Node {
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            scale_x: self.scale_x,
            scale_y: self.scale_y,
            rotation: self.rotation,
            skew_x: self.skew_x,
            skew_y: self.skew_y,
            reg_x: self.reg_x,
            reg_y: self.reg_y,
            alpha: self.alpha,
            visible: self.visible,
            blend_mode: self.blend_mode,
            shadow: self.shadow,
            filters: self.filters.iter().map(|f| f.box_clone()).collect(),
            mask: self.mask,
            hit_area: self.hit_area,
            transform_matrix: self.transform_matrix,
            mouse_enabled: self.mouse_enabled,
            mouse_children: self.mouse_children,
            tick_enabled: self.tick_enabled,
            tick_children: self.tick_children,
            cursor: self.cursor.clone(),
            kind: self.kind.clone(),
            bounds: self.bounds,
            cache: None,
            events: EventDispatcher::new(),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.kind.type_name())
            .field("name", &self.name)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("alpha", &self.alpha)
            .field("visible", &self.visible)
            .finish_non_exhaustive()
    }
}
