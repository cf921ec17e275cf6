pub mod client;

pub use client::{BrokerClient, BrokerPosition, BrokerQuote};
