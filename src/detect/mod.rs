mod backend;
mod backends;
mod result;

pub use backend::Detector;
pub use backends::{MotionStubDetector, ScriptedDetector, SimulatedDetector};
#[cfg(feature = "backend-tract")]
pub use backends::YoloPersonDetector;
pub use result::{Detection, DEFAULT_CONFIDENCE_THRESHOLD};
