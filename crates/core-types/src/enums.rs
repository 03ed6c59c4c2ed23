use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Generates `as_str`, `Display` and `FromStr` for a fieldless enum whose
/// textual form is shared by the exchange API and the database columns.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(CoreError::InvalidInput(
                        stringify!($name).to_string(),
                        other.to_string(),
                    )),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

text_enum!(OrderSide { Buy => "BUY", Sell => "SELL" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopMarket,
    TakeProfit,
    TakeProfitMarket,
    TrailingStopMarket,
}

text_enum!(OrderType {
    Market => "MARKET",
    Limit => "LIMIT",
    Stop => "STOP",
    StopMarket => "STOP_MARKET",
    TakeProfit => "TAKE_PROFIT",
    TakeProfitMarket => "TAKE_PROFIT_MARKET",
    TrailingStopMarket => "TRAILING_STOP_MARKET",
});

/// Lifecycle of an order as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

text_enum!(OrderStatus {
    New => "NEW",
    PartiallyFilled => "PARTIALLY_FILLED",
    Filled => "FILLED",
    Canceled => "CANCELED",
    Rejected => "REJECTED",
    Expired => "EXPIRED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

text_enum!(PositionStatus { Open => "OPEN", Closed => "CLOSED" });

/// A candle bucket duration, spelled the way kline endpoints spell it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    OneMinute,
    ThreeMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    FourHours,
    SixHours,
    EightHours,
    TwelveHours,
    OneDay,
}

text_enum!(Interval {
    OneMinute => "1m",
    ThreeMinutes => "3m",
    FiveMinutes => "5m",
    FifteenMinutes => "15m",
    ThirtyMinutes => "30m",
    OneHour => "1h",
    TwoHours => "2h",
    FourHours => "4h",
    SixHours => "6h",
    EightHours => "8h",
    TwelveHours => "12h",
    OneDay => "1d",
});

impl Interval {
    /// Length of one bucket in milliseconds.
    pub fn as_millis(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Interval::OneMinute => MINUTE,
            Interval::ThreeMinutes => 3 * MINUTE,
            Interval::FiveMinutes => 5 * MINUTE,
            Interval::FifteenMinutes => 15 * MINUTE,
            Interval::ThirtyMinutes => 30 * MINUTE,
            Interval::OneHour => 60 * MINUTE,
            Interval::TwoHours => 120 * MINUTE,
            Interval::FourHours => 240 * MINUTE,
            Interval::SixHours => 360 * MINUTE,
            Interval::EightHours => 480 * MINUTE,
            Interval::TwelveHours => 720 * MINUTE,
            Interval::OneDay => 1_440 * MINUTE,
        }
    }
}

impl TryFrom<String> for Interval {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_round_trips_through_text() {
        let interval: Interval = "4h".parse().unwrap();
        assert_eq!(interval, Interval::FourHours);
        assert_eq!(interval.as_millis(), 14_400_000);
        assert_eq!(interval.to_string(), "4h");
    }

    #[test]
    fn unknown_text_is_rejected() {
        assert!("2w".parse::<Interval>().is_err());
        assert!("HALF_FILLED".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn order_status_uses_exchange_spelling() {
        let status: OrderStatus = serde_json::from_str("\"PARTIALLY_FILLED\"").unwrap();
        assert_eq!(status, OrderStatus::PartiallyFilled);
        assert_eq!(status.as_str(), "PARTIALLY_FILLED");
    }
}
