pub mod catalog;
pub mod config;
pub mod shape;
pub mod store;
pub mod sync;
