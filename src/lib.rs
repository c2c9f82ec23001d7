pub mod engine;
pub mod error;
pub mod geo;
pub mod storage;
