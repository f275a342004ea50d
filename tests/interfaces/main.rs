//! Interface tests for the broker core using Cucumber.
//!
//! Each feature file describes one contract in Gherkin; the step
//! definitions drive the broker through its public API with mock
//! collaborators.
//!
//! ```bash
//! cargo test --test interfaces --features test-utils
//! ```

mod steps;

use cucumber::World;
use steps::backlog::BacklogWorld;
use steps::registry::RegistryWorld;
use steps::router::RouterWorld;

#[tokio::main]
async fn main() {
    // Run Registry tests
    println!("\n=== Running Registry Interface Tests ===\n");
    RegistryWorld::cucumber()
        .fail_on_skipped()
        .run("tests/interfaces/features/registry.feature")
        .await;

    // Run Backlog tests
    println!("\n=== Running Backlog Interface Tests ===\n");
    BacklogWorld::cucumber()
        .fail_on_skipped()
        .run("tests/interfaces/features/backlog.feature")
        .await;

    // Run Router tests
    println!("\n=== Running Delivery Router Interface Tests ===\n");
    RouterWorld::cucumber()
        .fail_on_skipped()
        .run("tests/interfaces/features/router.feature")
        .await;
}
