pub mod store;

pub use store::SqliteWorkflowStore;
