pub mod chain;
pub mod defs;
pub mod encoder;
pub mod error;
pub mod signer;
pub mod transaction;
