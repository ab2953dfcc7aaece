// src/main.rs

use evsched::config::JobConfig;
use evsched::module::ModuleRegistry;
use evsched::{cli, load_job, logging, print_dry_run, run};

/// Exit status for an invalid or unreadable job description.
const EXIT_CONFIG: i32 = 3;

fn main() {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("evsched error: {err:?}");
        std::process::exit(1);
    }

    let cfg = match load_job(&args) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("evsched error: {err}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    if args.dry_run {
        if let Err(err) = print_dry_run(&cfg) {
            eprintln!("evsched error: {err}");
            std::process::exit(EXIT_CONFIG);
        }
        return;
    }

    match run_main(&cfg) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("evsched error: {err:?}");
            std::process::exit(1);
        }
    }
}

fn run_main(cfg: &JobConfig) -> anyhow::Result<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.threads())
        .thread_name("evsched-worker")
        .enable_all()
        .build()?;

    let registry = ModuleRegistry::with_builtins();
    let report = match runtime.block_on(run(cfg, &registry)) {
        Ok(report) => report,
        Err(err) if err.is_configuration() => {
            eprintln!("evsched error: {err}");
            return Ok(EXIT_CONFIG);
        }
        Err(err) => return Err(err.into()),
    };
    Ok(report.exit_code())
}
