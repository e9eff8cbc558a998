pub mod analyzer;
pub mod app;
pub mod config;
pub mod delete;
pub mod domain;
pub mod error;
pub mod filter;
pub mod matching;
pub mod metadata;
pub mod output;
pub mod report;
pub mod review;
pub mod storage;
