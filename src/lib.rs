// src/lib.rs

//! Real-estate ingestion library: scrape assessor and brokerage sources,
//! normalize what they return, and keep tracked entities fresh.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod services;
pub mod storage;
pub mod utils;
