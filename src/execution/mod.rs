// Order path: quantize, validate, submit; plus the live price feed
pub mod gateway;
pub mod price_feed;
pub mod quantizer;
pub mod validator;

pub use gateway::{classify, classify_error, Classification, ExecutionGateway, RetryPolicy};
pub use price_feed::{parse_ticker_message, PriceBook, PriceFeed};
pub use quantizer::{quantize, quantize_price, quantize_quantity, to_wire};
pub use validator::OrderValidator;
