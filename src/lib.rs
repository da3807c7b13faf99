#![forbid(unsafe_code)]

pub mod config;
pub mod datamodel;
pub mod engine;
pub mod exporters;
pub mod http;
pub mod persistence;
pub mod storage;
