pub mod aggregate;
pub mod db;
pub mod export;
pub mod models;
pub mod service;
pub mod state_key;
pub mod units;
