// src/main.rs

use std::sync::Arc;

use lockstep::errors::LockstepError;
use lockstep::worker::{WorkerRegistry, dispatch};
use lockstep::{builtin, cli, logging, run};

fn main() {
    let registry = builtin::registry();

    // Worker processes never get past this.
    dispatch(&registry);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("lockstep error: failed to start tokio runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run_main(Arc::new(registry))) {
        match err.downcast_ref::<LockstepError>().and_then(|e| e.as_remote()) {
            Some(failure) => eprintln!("lockstep error: {}", failure.report()),
            None => eprintln!("lockstep error: {err:?}"),
        }
        std::process::exit(1);
    }
}

async fn run_main(registry: Arc<WorkerRegistry>) -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args, registry).await
}
