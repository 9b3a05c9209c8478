//! Follow one workflow run from the terminal.
//!
//! ```sh
//! JOURN_API_URL=http://localhost:8000 cargo run --example watch -- <workflow-id>
//! ```

use std::sync::Arc;

use journ_client::{ClientConfig, HttpBackend, WorkflowSubscription};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let workflow_id = std::env::args()
        .nth(1)
        .expect("usage: watch <workflow-id> [project-id]");
    let project_id = std::env::args().nth(2).unwrap_or_default();

    let config = ClientConfig::from_env();
    let backend = Arc::new(HttpBackend::from_config(&config));
    let sub = WorkflowSubscription::open(backend, workflow_id, project_id, &config);

    let mut state = sub.watch();
    loop {
        {
            let session = state.borrow();
            println!(
                "[{:?}] {}% step {}/{} notifications={}",
                session.status,
                session.overall_progress,
                session.current_step + 1,
                session.steps.len(),
                session.notifications.len(),
            );
            if session.status.is_terminal() {
                if let Some(error) = &session.error_message {
                    println!("error: {error}");
                }
                break;
            }
        }
        if state.changed().await.is_err() {
            break;
        }
    }

    sub.shutdown().await;
}
