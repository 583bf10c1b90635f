pub mod error;
pub mod fetcher;
pub(crate) mod normalizer;
pub mod table_parser;
