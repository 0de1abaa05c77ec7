pub mod system;
pub mod transaction;
