pub mod config_store;
pub mod entity;
pub mod manifest;
pub mod validation;

pub use config_store::ConfigStore;
pub use entity::{Project, ProjectSpec, Provenance};
pub use manifest::{MANIFEST_VERSION, Manifest, VOLUME_MANIFEST_FILE};
pub use validation::{
    RESERVED_PROJECT_NAMES, validate_project_name, validate_session_name, validate_unique_names,
};
