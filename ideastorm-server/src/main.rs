use std::sync::Arc;

use colored::Colorize;
use ideastorm_collab::{AnalysisError, Collab, GraniteAnalyzer};
use ideastorm_server::{logging, run_server, ServerContext};
use log::{error, info};
use thiserror::Error;
use tokio::runtime;

#[derive(Debug, Error)]
enum StartError {
    #[error("Could not initialize the analyzer: {0}")]
    Analyzer(#[from] AnalysisError),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl StartError {
    fn hint(&self) -> String {
        match self {
            StartError::Analyzer(_) => {
                "The AI collaborator needs credentials. Set IBM_API_KEY and IBM_PROJECT_ID in the environment, then try again.".to_string()
            }
            StartError::Fatal(_) => "This error is fatal, and should not happen.".to_string(),
        }
    }
}

fn start() -> Result<(), StartError> {
    let analyzer = GraniteAnalyzer::from_env()?;
    let collab = Arc::new(Collab::new(Arc::new(analyzer)));

    info!("Building async runtime...");
    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("ideastorm-async")
        .build()
        .map_err(|e| StartError::Fatal(e.to_string()))?;

    info!("Initialized successfully.");
    runtime.block_on(run_server(ServerContext {
        collab,
        heartbeat: Default::default(),
    }));

    Ok(())
}

fn main() {
    logging::init_logger();

    if let Err(error) = start() {
        error!(
            "{} Read the error below to troubleshoot the issue.",
            "IdeaStorm failed to start!".bold().red()
        );
        error!("{}", error);
        error!("{}", format!("Hint: {}", error.hint()).dimmed().italic());
    }
}
