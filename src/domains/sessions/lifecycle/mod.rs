pub mod bootstrapper;

pub use bootstrapper::IsolationManager;
