// src/main.rs

use dagmaster::types::WorkflowState;
use dagmaster::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(WorkflowState::Success) => {}
        Ok(_) => std::process::exit(1),
        Err(err) => {
            eprintln!("dagmaster error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<WorkflowState> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
