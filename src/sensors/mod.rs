pub mod codec;
pub mod error;
pub mod mag;
pub mod sim;
pub mod temp;

pub use self::error::SensorError;
