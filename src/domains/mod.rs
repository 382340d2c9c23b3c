pub mod divergence;
pub mod git;
pub mod merge;
pub mod projects;
pub mod sessions;
pub mod settings;
pub mod storage;
