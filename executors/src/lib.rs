pub mod eoa;
pub mod shutdown;

pub use redis;
