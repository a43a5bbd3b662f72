pub mod config;
pub mod corpus;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod report;
pub mod runner;
pub mod stats;
pub mod uploader;

pub use config::*;
pub use corpus::*;
pub use dispatcher::*;
pub use error::*;
pub use memory::*;
pub use report::*;
pub use runner::*;
pub use stats::*;
pub use uploader::*;
