pub mod face;
pub mod model;
pub mod pipeline;
pub mod video;
pub mod yunet;

pub use face::{Detection, Embedding};
pub use model::ModelPaths;
pub use pipeline::{EmbedOptions, NoFaceDetected, Pipeline};
pub use video::Camera;
