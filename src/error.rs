//! Error type shared by the scene graph and both renderers.

use thiserror::Error;

use crate::tree::NodeId;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("No cache found. cache() must be called before update_cache()")]
    NoCache,
    #[error("Node {0:?} is not a container")]
    NotAContainer(NodeId),
    #[error("Cannot add node {child:?} to itself or to one of its descendants ({parent:?})")]
    CyclicChild { parent: NodeId, child: NodeId },
    #[error("{0} nodes cannot be cloned")]
    NotCloneable(&'static str),
    #[error("Node {0:?} is not registered in this scene")]
    UnknownNode(NodeId),
    #[error("Texture slot {slot} outside of acceptable range 0..={max}")]
    SlotOutOfRange { slot: usize, max: usize },
    #[error("Problems creating render textures ({0}), release unused textures")]
    RenderTexture(String),
    #[error("Shader compile failed with {units} texture units: {message}")]
    ShaderCompile { units: usize, message: String },
    #[error("No accelerated backend available: {0}")]
    NoBackend(String),
    #[error("Pixel data is not readable: the surface is tainted by an unclean image")]
    Tainted,
    #[error("Invalid color: {0}")]
    InvalidColor(String),
    #[error("Invalid surface size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("SVG error: {0}")]
    Svg(String),
    #[error("GPU error: {0}")]
    Gpu(String),
}

pub type Result<T> = std::result::Result<T, StageError>;
