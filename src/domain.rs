//! Domain module - values that flow through the pipeline
//!
//! - `request_key`: cache keys derived from URLs
//! - `work_item`: units of work and their identity
//! - `record`: extracted rows and the fixed output schema

pub mod record;
pub mod request_key;
pub mod work_item;

pub use record::{ExtraFieldPolicy, Record, RecordSchema, SchemaError};
pub use request_key::{RequestKey, effective_url};
pub use work_item::{WorkItem, canonical_identity};
