pub mod adapter;
pub mod btle;
pub mod connection;
pub mod constants;
pub mod debounce;
pub mod mock;
pub mod parser;
pub mod radio;
pub mod scanner;
pub mod status;
pub mod types;
pub mod unit;
