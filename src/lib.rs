pub mod archive;
pub mod build;
pub mod config;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod preview;
pub mod prompt;
pub mod render;
pub mod server;
pub mod session;
pub mod util;
pub mod workspace;
