//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `project` | `Init`           |
//! | `run`     | `Run`            |
//! | `status`  | `Status`         |
//! | `policy`  | `Policy`         |
//! | `config`  | `Config`         |

pub mod config;
pub mod policy;
pub mod project;
pub mod run;
pub mod status;

pub use config::cmd_config;
pub use policy::cmd_policy;
pub use project::cmd_init;
pub use run::cmd_run;
pub use status::cmd_status;
