pub mod converter;
pub mod fetcher;
pub mod queue;
pub mod status;
pub mod version;
pub mod workspace;
