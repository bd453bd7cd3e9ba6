//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`, `Init`  |

pub mod serve;

pub use serve::{cmd_init_db, cmd_serve};
