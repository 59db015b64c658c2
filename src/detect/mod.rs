//! Detector boundary.
//!
//! The fusion loop only interprets a detector's return contract: a list of
//! candidates with pixel-space corners, a confidence and a class id. Model
//! loading and inference live behind `DetectorBackend`.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::BackendRegistry;
pub use result::{best_detection, Detection, LabelMap};
