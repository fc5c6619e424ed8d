mod scripted;
mod simulated;
mod stub;
#[cfg(feature = "backend-tract")]
mod tract;

pub use scripted::ScriptedDetector;
pub use simulated::SimulatedDetector;
pub use stub::MotionStubDetector;
#[cfg(feature = "backend-tract")]
pub use tract::YoloPersonDetector;
