//! Start/stop ordering of a flow's children.
//!
//! Normal steps start before inbound steps, inbound steps stop before normal
//! steps. Inside a partition all steps are driven concurrently and the group is
//! joined as a whole: a failing step does not cancel its siblings, the first
//! error is reported once every member has finished.

use futures::future::join_all;
use indexmap::IndexMap;
use stepcore::{Step, StepError, StepState};

pub type Steps = IndexMap<String, Box<dyn Step>>;

/// Splits steps into `(normal, inbound)`, keeping insertion order within each part.
pub fn partition(steps: &Steps) -> (Vec<&dyn Step>, Vec<&dyn Step>) {
    steps
        .values()
        .map(|step| step.as_ref())
        .partition(|step| !step.is_inbound())
}

async fn start_group(flow: &str, group: &[&dyn Step]) -> Result<(), StepError> {
    let results = join_all(group.iter().map(|step| async move {
        step.start()
            .await
            .map_err(|e| e.in_flow(flow, step.name()))
    }))
    .await;
    results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
}

async fn stop_group(flow: &str, group: &[&dyn Step]) -> Result<(), StepError> {
    let results = join_all(
        group
            .iter()
            .filter(|step| step.state() == StepState::Running)
            .map(|step| async move {
                step.stop()
                    .await
                    .map_err(|e| e.in_flow(flow, step.name()))
            }),
    )
    .await;
    results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
}

/// Starts all normal steps, then, once every one of them runs, all inbound steps.
pub async fn start_steps(flow: &str, steps: &Steps) -> Result<(), StepError> {
    let (normal, inbound) = partition(steps);
    tracing::debug!(
        "Starting flow '{}': {} normal, {} inbound steps",
        flow,
        normal.len(),
        inbound.len()
    );
    start_group(flow, &normal).await?;
    start_group(flow, &inbound).await
}

/// Stops all running inbound steps, then all running normal steps.
///
/// The normal group is stopped even if stopping an inbound step failed; the
/// first error is returned after both groups finished.
pub async fn stop_steps(flow: &str, steps: &Steps) -> Result<(), StepError> {
    let (normal, inbound) = partition(steps);
    let inbound_result = stop_group(flow, &inbound).await;
    let normal_result = stop_group(flow, &normal).await;
    inbound_result.and(normal_result)
}

/// Stops whatever already runs after a failed start. Errors are only logged.
pub async fn compensate(flow: &str, steps: &Steps) {
    if let Err(e) = stop_steps(flow, steps).await {
        tracing::warn!("Compensating stop in flow '{}' failed: {}", flow, e);
    }
}

/// Removes every step concurrently.
pub async fn remove_steps(flow: &str, steps: &Steps) -> Result<(), StepError> {
    let results = join_all(steps.values().map(|step| async move {
        step.remove()
            .await
            .map_err(|e| e.in_flow(flow, step.name()))
    }))
    .await;
    results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
}
