pub mod audit;
pub mod cli;
pub mod config;
pub mod confirm;
pub mod persist;
pub mod report;
pub mod runtime;
pub mod timefmt;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_support;
