pub mod config;
pub mod logging;
pub mod parser;
pub mod policy;
pub mod scan;
pub mod version;
pub mod workload;
