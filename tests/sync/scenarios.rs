use rstest_bdd_macros::scenario;

use super::{SyncContext, sync_context};

#[scenario(
    path = "tests/features/sync.feature",
    name = "Localise inputs and outputs for the script"
)]
fn scenario_localise(sync_context: SyncContext) {
    drop(sync_context);
}

#[scenario(path = "tests/features/sync.feature", name = "Surface download failures")]
fn scenario_download_failure(sync_context: SyncContext) {
    drop(sync_context);
}

#[scenario(
    path = "tests/features/sync.feature",
    name = "Refuse transfers without a lifecycle container"
)]
fn scenario_missing_routine(sync_context: SyncContext) {
    drop(sync_context);
}
