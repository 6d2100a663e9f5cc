pub mod config;
pub mod coordinator;
pub mod error;
pub mod session;
pub mod stream;

pub use config::GenerationConfig;
pub use coordinator::{
    GenerationCoordinator, GenerationHandle, GenerationOutcome, GenerationPhase,
    GenerationRequest, GenerationSnapshot, GenerationStatus, RegenerationRequest,
};
pub use error::GenerationError;
pub use session::{GenerationKind, GenerationSession};
