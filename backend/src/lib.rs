pub mod config;
pub mod error;
pub mod inference;
pub mod outcome;
pub mod pipeline;
pub mod recommend;
pub mod routes;
pub mod storage;
pub mod textile;
pub mod trends;

#[cfg(test)]
pub(crate) mod testing;
