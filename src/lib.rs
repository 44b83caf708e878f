pub mod bot;
pub mod config;
pub mod detector;
pub mod error;
pub mod inference;
pub mod labels;
pub mod layout;
pub mod model;
pub mod records;
pub mod storage;
pub mod telegram;
pub mod types;
