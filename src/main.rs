#![warn(rust_2018_idioms)]
mod backend;
pub mod cfg;
pub mod consts;
pub mod prelude;
mod util;

use backend::finish::{self, umount::Umount, Context, FinishStep, ParameterBag, Step};
use tracing_subscriber::prelude::*;

use crate::prelude::*;

const USAGE: &str = "\
usage: finisher <step> <Info|Write> [--params-stdin]
       finisher run
       finisher umount --standalone";

#[allow(clippy::missing_errors_doc)]
#[allow(clippy::missing_panics_doc)]
fn main() -> Result<()> {
    let _guard = setup_logs_and_install_panic_hook();

    let args = std::env::args().skip(1).collect_vec();
    let config = cfg::get_cfg()?;
    tracing::debug!(?config, "Configuration loaded");

    match args.iter().map(String::as_str).collect_vec().as_slice() {
        ["run"] => {
            let context = Context::new(config);
            let steps = context.config.install.steps.clone();
            let summary = finish::run_steps(&steps, &context);
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.all_succeeded() {
                tracing::warn!("Some finish steps did not succeed");
            }
        }
        ["umount", "--standalone"] => {
            let context = Context::standalone(config);
            println!("Unmounting everything below {}", context.target_root.display());
            if Umount.write(&context, &ParameterBag::default())? {
                println!("Done, see the log for leftovers");
            }
        }
        [step, function, rest @ ..] => {
            let step = step.parse::<Step>()?;
            let params = match rest {
                [] => ParameterBag::default(),
                ["--params-stdin"] => serde_json::from_reader(std::io::stdin())
                    .wrap_err("cannot parse the parameters on stdin")?,
                _ => bail!("unexpected arguments {rest:?}\n{USAGE}"),
            };
            let context = Context::new(config);
            let ret = finish::call(step, function, &params, &context);
            println!("{}", serde_json::to_string(&ret)?);
        }
        _ => bail!("{USAGE}"),
    }
    Ok(())
}

/// Returns a logging guard.
///
/// # Panics
/// - cannot install `color_eyre`
/// - cannot create finisher tempdir
fn setup_logs_and_install_panic_hook() -> impl std::any::Any {
    color_eyre::install().expect("install color_eyre");
    let temp_dir = tempfile::Builder::new()
        .prefix("finisher-logs")
        .tempdir()
        .expect("create finisher logs tempdir")
        .into_path();
    let file_appender = tracing_appender::rolling::never(&temp_dir, "finisher.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let journald = tracing_journald::layer()
        .map(|layer| layer.with_syslog_identifier("finisher".to_owned()))
        .inspect_err(|e| eprintln!("journald unavailable: {e}"))
        .ok();

    // stdout carries the results, logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                .with_env_var("FINISHER_LOG")
                .from_env_lossy(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .pretty(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .compact(),
        )
        .with(journald)
        .init();

    tracing::info!(
        "finisher {version}",
        version = env!("CARGO_PKG_VERSION")
    );
    tracing::info!(
        "Logging to {tmp}/finisher.log",
        tmp = temp_dir.to_string_lossy()
    );
    guard
}
