mod record;
mod request;
mod timestamp;

pub use record::{Batch, Record, Value};
pub use request::{ExtractionRequest, MAX_CREATED_WITHIN_DAYS};
pub use timestamp::UtcDateTime;
