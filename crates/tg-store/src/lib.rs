pub mod error;
pub mod graph_store;
pub mod schema;
pub mod store;
pub mod sync;

pub use error::{PushError, Result, StoreError};
pub use graph_store::{GraphStore, SqliteGraphStore};
pub use store::{Store, StoreStats};
pub use sync::push;
