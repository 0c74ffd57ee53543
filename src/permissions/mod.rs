//! Rule-based authorization policy: parsing, matching, storage, hot reload.

pub mod evaluator;
pub mod patterns;
pub mod rules;
pub mod store;
pub mod watch;

pub use evaluator::{primary_arg, Evaluation, PermissionEvaluator, ToolShape, SENSITIVE_TOOLS};
pub use rules::{DefaultMode, PermissionConfig, PermissionLevel, PermissionRule};
pub use store::PermissionStore;
pub use watch::{ChannelConfigWatch, ConfigWatch, FsConfigWatch};
