use error::HearthError;

pub mod adapter;
pub mod backend;
pub mod catalog;
pub mod commit;
pub mod error;
pub mod local;
pub mod privilege;
pub mod session;
pub mod target;

#[cfg(test)]
pub mod test_utils;

pub type HearthResult<T> = std::result::Result<T, HearthError>;
