pub mod volume;

pub use volume::{
    AccessMode, LocalVolumeStore, VolumeMount, VolumeStore, session_from_volume_name,
    volume_name_for,
};
