mod backend;
pub mod backends;
mod result;

pub use backend::DetectorBackend;
pub use backends::{open_backend, StubBackend};
pub use result::{Detection, RawDetection, RawDetections, PERSON_CLASS_ID};
