pub mod connection;
pub mod db_clone_baselines;
pub mod db_merge_points;
pub mod db_schema;
pub mod db_sync_history;
pub mod timestamps;

pub use connection::Database;
pub use db_clone_baselines::CloneBaselineMethods;
pub use db_merge_points::{MergePointMethods, is_valid_commit_id};
pub use db_schema::initialize_schema;
pub use db_sync_history::SyncHistoryMethods;
