pub mod completions;
pub mod consolidate;
pub mod init;
pub mod periods;
pub mod query;
pub mod verify;

use std::path::Path;

use tally_core::Tally;

use crate::output::{OutputMode, fail};

/// Open the project at `project_root`, rendering the failure if it is not
/// initialized or its config is invalid.
pub(crate) fn open_project(output: OutputMode, project_root: &Path) -> anyhow::Result<Tally> {
    Tally::open(project_root).map_err(|err| fail(output, err))
}
