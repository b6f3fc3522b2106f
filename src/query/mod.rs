//! Fluent query builders that accumulate a `Components` record and
//! dispatch to the dialect engine on a terminal call.

pub mod context;
pub mod delete;
pub mod insert;
pub mod select;
pub mod update;

pub use context::QueryContext;
pub use delete::DeleteBuilder;
pub use insert::InsertBuilder;
pub use select::SelectBuilder;
pub use update::UpdateBuilder;
