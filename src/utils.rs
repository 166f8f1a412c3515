pub mod correlation;
pub mod error;
pub mod logging;

pub use correlation::CorrelationId;
pub use error::{EngineError, EngineResult, ErrorCode, ErrorObject, FieldIssue};
pub use logging::{LogLevel, init_logging};
