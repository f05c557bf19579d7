//! End-to-end demo: build a swarm, run a phase workflow, share knowledge,
//! and print the aggregate stats.

use std::sync::Arc;

use hivemind::orchestrator::FnExecutor;
use hivemind::persistence::SqliteStore;
use hivemind::{Swarm, SwarmConfig};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let store = Arc::new(SqliteStore::new(std::env::temp_dir().join("hivemind-demo.db"))?);
    let executor = Arc::new(FnExecutor::echo(0.96));
    let swarm = Swarm::new(SwarmConfig::default(), store, executor)?;

    let sweeps = swarm.spawn_maintenance();

    let result = swarm
        .execute_operation(
            "execute_phase_workflow",
            json!({
                "description": "inventory tracking service",
                "requirements": ["track stock levels", "alert on shortages"],
                "constraints": ["single process"],
            }),
        )
        .await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    swarm.share_knowledge(
        "pattern:phased-delivery",
        "process",
        json!({"note": "two tasks per phase with a dependency edge"}),
        0.8,
        None,
    )?;

    let stats = swarm.orchestrator().lock().await.swarm_stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    for sweep in sweeps {
        sweep.abort();
    }
    Ok(())
}
