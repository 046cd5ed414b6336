#![forbid(unsafe_code)]

pub mod bootstrap;
pub mod cli;
pub mod error;
pub mod routes;
pub mod server;
