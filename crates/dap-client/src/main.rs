use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use dap_client::{
    ClientOptions, ClientSettings, ConfigurationSet, DebugSession, EvaluateContext, TerminationCause,
};
use rustc_hash::FxHashMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::instrument::WithSubscriber;
use tracing::{info, Dispatch};

#[derive(Debug, Parser)]
#[command(name = "dap-client", about = "Drive a debug adapter over TCP")]
struct Cli {
    /// Adapter address, e.g. 127.0.0.1:5678.
    #[arg(long)]
    connect: String,
    /// JSON file holding `debug.configurations` (and optionally `debug.compounds`).
    #[arg(long)]
    configurations: PathBuf,
    /// Configuration to start; defaults to the first one.
    #[arg(long)]
    name: Option<String>,
    /// Extra `${name}` substitutions as NAME=VALUE.
    #[arg(long = "var", value_parser = parse_variable)]
    variables: Vec<(String, String)>,
    /// Directory searched for `dap-client.toml`.
    #[arg(long)]
    settings_dir: Option<PathBuf>,
    /// Log every protocol frame.
    #[arg(long)]
    transcript: bool,
}

fn parse_variable(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))
}

#[tokio::main]
async fn main() {
    if let Err(err) = run(Cli::parse()).await {
        eprintln!("dap-client error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let workspace = std::env::current_dir().context("reading current directory")?;
    let mut settings = ClientSettings::load(cli.settings_dir.as_deref().unwrap_or(&workspace));
    settings.log.transcript |= cli.transcript;
    let dispatch = dap_client::logging::dispatch(&settings.log);
    drive(cli, workspace, settings, dispatch.clone())
        .with_subscriber(dispatch)
        .await
}

/// Runs under the settings' dispatch; spawned client tasks get it through
/// [`ClientOptions`].
async fn drive(
    cli: Cli,
    workspace: PathBuf,
    settings: ClientSettings,
    dispatch: Dispatch,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&cli.configurations)
        .with_context(|| format!("reading {}", cli.configurations.display()))?;
    let json: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", cli.configurations.display()))?;
    let set = ConfigurationSet::from_json(&json)?;
    let configuration = match &cli.name {
        Some(name) => set
            .find(name)
            .with_context(|| format!("no configuration named '{name}'"))?,
        None => match set.configurations.first() {
            Some(configuration) => configuration,
            None => bail!("{} has no debug configurations", cli.configurations.display()),
        },
    };
    let mut variables: FxHashMap<String, String> = cli.variables.into_iter().collect();
    variables
        .entry("workspaceFolder".to_string())
        .or_insert_with(|| workspace.display().to_string());
    let configuration = configuration.with_variables(&variables);

    let stream = TcpStream::connect(&cli.connect)
        .await
        .with_context(|| format!("connecting to {}", cli.connect))?;
    let (reader, writer) = stream.into_split();
    let session = DebugSession::connect(
        reader,
        writer,
        ClientOptions {
            dispatch: Some(dispatch),
            transcript: settings.log.transcript,
        },
    );
    let mut stopped = session.on_stopped();
    let mut terminated = session.on_terminated();
    let mut output = session.on_output();

    session.start(&configuration).await?;
    info!(name = %configuration.name, "session started");
    println!("commands: c(ontinue) n(ext) s(tep in) o(ut) p <expr> q(uit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            notification = stopped.recv() => {
                let Ok(notification) = notification else { continue };
                println!("stopped: {}", notification.reason);
                print_stop(&session).await;
            }
            cause = terminated.recv() => {
                match cause {
                    Ok(TerminationCause::Exited(code)) => println!("debuggee exited with code {code}"),
                    _ => println!("session terminated"),
                }
                return Ok(());
            }
            line = output.recv() => {
                if let Ok(line) = line {
                    print!("{}", line.output);
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    session.disconnect(true).await?;
                    return Ok(());
                };
                if !handle_command(&session, line.trim()).await? {
                    return Ok(());
                }
            }
        }
    }
}

/// Returns `false` when the user asked to quit.
async fn handle_command(session: &DebugSession, line: &str) -> anyhow::Result<bool> {
    let thread_id = session
        .threads()
        .into_iter()
        .find(|thread| thread.selected)
        .map(|thread| thread.id);
    let outcome = match (line.split_once(' '), thread_id) {
        (Some(("p", expression)), _) => match session.evaluate(expression, EvaluateContext::Repl).await {
            Ok(response) => {
                println!("{}", response.result);
                Ok(())
            }
            Err(err) => Err(err),
        },
        (None, _) if line == "q" => {
            session.disconnect(true).await?;
            return Ok(false);
        }
        (None, Some(thread_id)) => match line {
            "c" => session.continue_thread(thread_id).await,
            "n" => session.next(thread_id).await,
            "s" => session.step_in(thread_id).await,
            "o" => session.step_out(thread_id).await,
            _ => {
                println!("unknown command '{line}'");
                Ok(())
            }
        },
        _ => {
            println!("no thread selected");
            Ok(())
        }
    };
    if let Err(err) = outcome {
        println!("error: {err}");
    }
    Ok(true)
}

async fn print_stop(session: &DebugSession) {
    if let Err(err) = session.list_threads().await {
        println!("error listing threads: {err}");
        return;
    }
    let frame = match session.selected_frame().await {
        Ok(frame) => frame,
        Err(err) => {
            println!("error: {err}");
            return;
        }
    };
    println!("  at {} ({}:{})", frame.name, frame.file, frame.line);
    let scopes = match session.scopes(frame.id).await {
        Ok(scopes) => scopes,
        Err(err) => {
            println!("error: {err}");
            return;
        }
    };
    for scope in scopes.iter().filter(|scope| !scope.expensive) {
        println!("  {}:", scope.name);
        match session.scope_variables(scope).await {
            Ok(variables) => {
                for variable in variables.iter() {
                    println!("    {} = {}", variable.name, variable.value);
                }
            }
            Err(err) => println!("    error: {err}"),
        }
    }
}
