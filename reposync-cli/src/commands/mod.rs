//! CLI command implementations

pub mod report;
pub mod status;
pub mod sync;
pub mod target;
pub mod union;
pub mod unlock;

pub use status::StatusArgs;
pub use sync::SyncArgs;
pub use union::UnionArgs;
pub use unlock::UnlockArgs;
