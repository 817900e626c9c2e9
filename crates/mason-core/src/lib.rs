//! Plan computation and execution engine for mason.
//!
//! Bricks are rendered by Dagger modules into script fragments, the
//! fragments are merged into one script per phase and post-run outcome,
//! and the merged scripts are executed with a success/failure post-run
//! lifecycle.

pub mod blueprint;
pub mod dagger;
pub mod event;
pub mod fragment;
pub mod mason;
pub mod merge;
pub mod phase;
pub mod plan;
pub mod workspace;

pub use blueprint::{Blueprint, Brick, BrickMetadata, Everything, LabelSelector, Labels, ModuleRef};
pub use event::{Event, EventBus, OutputSource};
pub use fragment::{Fragment, PostRun};
pub use mason::{Mason, RunContext};
pub use merge::{MergeError, merge_fragments};
pub use phase::{PhaseOutcome, PhaseRequest};
pub use plan::{Plan, PlanError, PlanRunError};
pub use workspace::Workspace;

/// Name of the directory holding a workspace's bricks.
pub const MASON_DIR_NAME: &str = ".mason";
/// Directory (inside [`MASON_DIR_NAME`]) holding per-run work directories.
pub const WORK_DIR_PREFIX: &str = ".work";
/// Directory (inside a plan work dir) where bricks are dumped for the renderer.
pub const BLUEPRINT_DIR_PREFIX: &str = "blueprint";
/// Directory (inside a plan work dir) where the renderer exports fragments.
pub const PLAN_DIR_PREFIX: &str = "plan";
