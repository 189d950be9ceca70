pub mod media;
pub mod outcome;
pub mod request;

pub use media::MediaAsset;
pub use outcome::{remediation_hint, BoundaryResult, CheckReport, GenerationOutcome};
pub use request::{Composition, GenerationRequest, InlinePart};
