//! The chain-it core library.
//!
//! This crate owns the suite context and the lifecycle scenarios, and runs the scenarios against
//! the node one after the other.

pub mod context;
pub mod report;
pub mod scenarios;

pub use context::TestContext;
pub use report::{ScenarioReport, SuiteReport};
pub use scenarios::{Scenario, ScenarioRunner};

/// Runs `scenarios` sequentially against the node of `context`.
///
/// Scenarios fail independently. Once the node has exited every remaining scenario is reported as
/// failed without running.
pub async fn run_suite(context: &mut TestContext, scenarios: &[Scenario]) -> SuiteReport {
    let mut report = SuiteReport::new(context.config().clone());

    for scenario in scenarios.iter().copied() {
        if let Err(error) = context.ensure_node_running() {
            report.push(ScenarioReport::new(
                scenario,
                Err(error),
                None,
                Default::default(),
            ));
            continue;
        }

        report.push(ScenarioRunner::new(context).run(scenario).await);
    }

    report
}
