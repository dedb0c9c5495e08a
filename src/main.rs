mod adapter;
mod cli;
mod launch;
mod logging;
mod persist;
mod provider;

use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{error, info};

use dapctl_config::{load_config, Config};
use dapctl_core::{DefaultPaths, Paths};
use dapctl_dap::{Breakpoints, LaunchOptions, SessionEvent, Sessions, SessionsEvent, StopReason};

use crate::adapter::ProcessAdapter;
use crate::cli::{CliArgs, Command};
use crate::provider::ProcessProvider;

fn run(args: CliArgs) -> Result<()> {
    let paths = DefaultPaths::new().context("failed to detect platform paths")?;
    let config_dir = args.config_dir.clone().unwrap_or_else(|| paths.config_dir());
    let project_dir = env::current_dir().ok();
    let config = load_config(&config_dir, project_dir.as_deref())
        .with_context(|| format!("failed to load configuration from {}", config_dir.display()))?;

    logging::init(&config.log, &paths)?;
    info!("dapctl starting: {}", args.configuration);

    let breakpoints_file = config
        .breakpoints
        .file
        .clone()
        .unwrap_or_else(|| paths.breakpoints_file());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(debug(args, config, &breakpoints_file, project_dir.as_deref()))
}

async fn debug(args: CliArgs, config: Config, breakpoints_file: &Path, cwd: Option<&Path>) -> Result<()> {
    let (configuration, entry) = launch::resolve(&config, &args.configuration)?;

    let breakpoints = Arc::new(Breakpoints::new());
    persist::load_breakpoints(breakpoints_file, &breakpoints)?;
    for bp in &args.breakpoints {
        let file = match cwd {
            Some(cwd) if bp.file.is_relative() => cwd.join(&bp.file),
            _ => bp.file.clone(),
        };
        breakpoints.source.add(file, bp.line, None);
    }
    for name in &args.functions {
        breakpoints.function.add(name.clone());
    }

    let sessions = Sessions::new(Arc::new(ProcessProvider));
    let mut events = sessions.subscribe();
    let adapter = Arc::new(ProcessAdapter::new(&configuration.adapter_type, entry));
    let session = sessions
        .launch(breakpoints.clone(), adapter, configuration, LaunchOptions::default())
        .await?;

    let mut interrupts = 0;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionsEvent::Removed(removed)) if removed.id() == session.id() => break,
                Some(event) => report(&event),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                interrupts += 1;
                eprintln!("{}", if interrupts == 1 { "stopping (Ctrl-C again to force)" } else { "forcing stop" });
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.stop().await {
                        error!("stop failed: {}", e);
                    }
                });
            }
        }
    }

    persist::save_breakpoints(breakpoints_file, &breakpoints)?;

    match session.stop_reason() {
        Some(reason @ (StopReason::LaunchError | StopReason::BuildFailed | StopReason::TerminatedUnexpectedly)) => {
            bail!("session ended: {:?}", reason)
        }
        _ => Ok(()),
    }
}

/// Console output goes to stdout, lifecycle changes to stderr.
fn report(event: &SessionsEvent) {
    let SessionsEvent::Session(session, event) = event else {
        return;
    };
    match event {
        SessionEvent::Output(output) => match output.category.as_deref() {
            Some("stderr") | Some("debugger.error") => eprint!("{}", with_newline(&output.output)),
            Some("telemetry") => {}
            _ => print!("{}", with_newline(&output.output)),
        },
        SessionEvent::StateChanged(state) => eprintln!("[{}] {:?}", session.name(), state),
        SessionEvent::SelectedFrame(Some(frame)) => {
            let location = frame
                .source
                .as_ref()
                .and_then(|s| s.path.clone().or_else(|| s.name.clone()))
                .unwrap_or_else(|| "??".to_string());
            eprintln!("[{}] stopped in {} at {}:{}", session.name(), frame.name, location, frame.line);
        }
        _ => {}
    }
}

fn with_newline(text: &str) -> std::borrow::Cow<'_, str> {
    if text.ends_with('\n') {
        text.into()
    } else {
        format!("{text}\n").into()
    }
}

fn main() {
    let args = match cli::parse(env::args().skip(1)) {
        Ok(Command::Debug(args)) => args,
        Ok(Command::Help) => {
            println!("{}", cli::USAGE);
            return;
        }
        Err(e) => {
            eprintln!("dapctl: {}\n\n{}", e, cli::USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args) {
        eprintln!("dapctl: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_newline_appends_once() {
        assert_eq!(with_newline("hello"), "hello\n");
        assert_eq!(with_newline("hello\n"), "hello\n");
    }
}
