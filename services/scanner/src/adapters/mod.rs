pub mod http;
pub mod queue;

pub use http::{HttpIngestionClient, HttpProbe};
pub use queue::SqliteQueue;
