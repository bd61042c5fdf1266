pub mod error;
pub mod lock;
pub mod path;
pub mod system;
