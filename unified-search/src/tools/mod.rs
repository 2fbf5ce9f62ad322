//! Concrete [`SearchTool`](crate::tool::SearchTool) implementations.

pub mod http;
pub mod local_files;
pub mod static_tool;

pub use http::HttpTool;
pub use local_files::LocalFilesTool;
pub use static_tool::StaticTool;
