pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{Interval, OrderSide, OrderStatus, OrderType, PositionStatus};
pub use error::CoreError;
pub use structs::{
    AccountPosition, AccountSnapshot, Balance, Candle, Instrument, Order, Position, TimeGap, Trade,
};
