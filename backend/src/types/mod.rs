mod environment;
mod error;
mod extractors;

pub use environment::Environment;
pub use error::AppError;
pub use extractors::ValidatedJson;
