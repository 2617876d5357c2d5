//! CLI command implementations.
//!
//! | Module      | Commands handled      |
//! |-------------|-----------------------|
//! | `serve`     | `Serve`               |
//! | `session`   | `Session`             |
//! | `templates` | `Templates`           |
//! | `config`    | `Config`              |

pub mod config;
pub mod serve;
pub mod session;
pub mod templates;

pub use config::cmd_config;
pub use serve::cmd_serve;
pub use session::cmd_session;
pub use templates::cmd_templates;
