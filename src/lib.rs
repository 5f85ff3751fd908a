pub mod cache;
pub mod color;
pub mod display;
pub mod error;
pub mod events;
pub mod filters;
pub mod geom;
pub mod stage;
pub mod stagegl;
pub mod transform;
pub mod tree;

// These modules are public for advanced use cases
pub mod raster;
pub mod render_stats;
pub mod surface;

mod bounds;
mod hit_test;

pub use cache::BitmapCache;
pub use color::Color;
pub use display::{
    Animation, Bitmap, BlendMode, DisplayProps, DomProxy, Frame, Graphics, ImageId, ImageSource,
    Node, NodeKind, Shadow, Sprite, SpriteSheet, Text, TextAlign, TextBaseline,
};
pub use error::{Result, StageError};
pub use events::{Event, FrameData, ListenerId};
pub use filters::{AlphaMapFilter, BlurFilter, ColorFilter, ColorMatrixFilter, Filter, FilterShader};
pub use geom::{Point, Rect};
pub use hit_test::HitMode;
pub use render_stats::{BatchStats, FlushReason};
pub use stage::Stage;
pub use stagegl::{GpuBackend, SoftwareBackend, StageGL, StageGLOptions, WgpuBackend};
pub use surface::Surface;
pub use transform::Transform2D;
pub use tree::{NodeId, Scene};

pub mod prelude {
    pub use crate::display::{
        Animation, Bitmap, BlendMode, Graphics, ImageId, ImageSource, Node, NodeKind, Shadow,
        Sprite, SpriteSheet, Text,
    };
    pub use crate::filters::{BlurFilter, ColorFilter, ColorMatrixFilter, Filter};
    pub use crate::stagegl::{SoftwareBackend, StageGL, StageGLOptions};
    pub use crate::{
        Color, Event, FrameData, HitMode, NodeId, Point, Rect, Scene, Stage, StageError,
        Transform2D,
    };
}
