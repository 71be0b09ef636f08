pub mod types;
pub mod classification;
pub mod retry;

pub use types::ReconError;
pub use classification::{ErrorClassification, ErrorScope};
pub use retry::RetryPolicy;
