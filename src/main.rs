//! Ngaro image machine driver.
//!
//! Boots a memory image and runs it with stdin as the machine's input and
//! stdout as its output.
//!
//! # Usage
//! ```text
//! ngaro [OPTIONS] <image>
//! ```
//!
//! # Options
//! - `-s, --size <cells>`: Image capacity (default 50000)
//! - `--data-depth <n>` / `--address-depth <n>`: Stack depths (default 1024)
//! - `--format binary|text`: Boot image file format (default binary)
//! - `--swap-endian`: Byte-swap every cell after loading
//! - `--halt-on-wait`: Halt at `WAIT` once pending output is written
//!
//! Diagnostics go to stderr; the level is set with `NGARO_LOG`.
//! Exits 0 when the machine halts and 1 on a fault or setup error.

use ngaro::config::{Command, Config, USAGE};
use ngaro::host;
use ngaro::utils::log;
use ngaro::virtual_machine::ports::HaltSignal;
use ngaro::{error, info, warn};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    log::init_from_env();

    let config = match Config::from_args(env::args().skip(1)) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            println!("{}", USAGE);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            process::exit(1);
        }
    };

    let image = match config.load_image().await {
        Ok(image) => image,
        Err(e) => {
            error!("failed to load {}: {}", config.image_path.display(), e);
            process::exit(1);
        }
    };
    info!(
        "loaded {} into {} cells",
        config.image_path.display(),
        image.capacity()
    );

    let halt = HaltSignal::new();
    let interrupt = halt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && interrupt.raise() {
            warn!("interrupted, halting");
        }
    });

    let outcome = match host::run(
        image,
        config.run_options(),
        tokio::io::stdin(),
        tokio::io::stdout(),
        halt,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    // Exit directly: a blocked stdin read would otherwise hold up runtime shutdown.
    match outcome.result {
        Ok(report) => {
            info!(
                "halted at ip {} after {} instructions",
                report.ip, report.steps
            );
            process::exit(0);
        }
        Err(fault) => {
            error!("{}", fault);
            process::exit(1);
        }
    }
}
