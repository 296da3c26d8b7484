pub mod core;
pub mod hints;
pub mod notebook;
pub mod problems;
pub mod profiles;
pub mod session;
pub mod upload;
pub mod voice;
