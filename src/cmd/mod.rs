//! CLI command implementations.
//!
//! | Module   | Commands handled                                              |
//! |----------|---------------------------------------------------------------|
//! | `feat`   | `feat new`, `list`, `show`, `retry`, `resume`, `stop`, `approve`, `reject` |
//! | `daemon` | `daemon start`, `status`, `stop`                              |

pub mod daemon;
pub mod feat;

pub use daemon::{cmd_daemon_start, cmd_daemon_status, cmd_daemon_stop};
pub use feat::{
    NewFeatureArgs, cmd_feat_approve, cmd_feat_list, cmd_feat_new, cmd_feat_reject,
    cmd_feat_resume, cmd_feat_retry, cmd_feat_show, cmd_feat_stop,
};
