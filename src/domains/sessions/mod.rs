pub mod entity;
pub mod lifecycle;
pub mod registry;

pub use entity::{OpenSession, ProjectState, SessionHandle, SessionView};
pub use lifecycle::IsolationManager;
pub use registry::{SessionRegistry, state_db_path};
