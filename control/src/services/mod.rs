pub mod discovery;
pub mod node_handle;
pub mod node_registry;
pub mod record_store;
pub mod supervisor;
pub mod transport;

pub use node_handle::NodeHandle;
pub use node_registry::{NodeRegistry, RegistryError, RegistrySettings};
pub use record_store::{MemoryStore, RecordStore, SqliteStore, StoreError};
pub use transport::{HttpTransport, NodeTransport};
