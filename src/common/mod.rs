pub mod constants;
pub mod ticker;

pub use ticker::{FakeTicker, SystemTicker, Ticker};
