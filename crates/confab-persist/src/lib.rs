pub mod builder;
pub mod error;
pub mod port;
pub mod scheduler;
pub mod store;

pub use builder::ThreadStoreBuilder;
pub use error::{PersistError, Result};
pub use port::{FilePersistence, MemoryPersistence, PersistencePort};
pub use scheduler::WriteScheduler;
pub use store::{AddMessageOutcome, CascadeDeletion, ThreadStore};
