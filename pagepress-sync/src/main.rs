use std::path::PathBuf;

use anyhow::Context;
use pagepress_core::RpcClient;
use pagepress_sync::config::SyncConfig;
use pagepress_sync::progress::Progress;
use pagepress_sync::sync::engine::SyncClient;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    Validate,
    Sync,
    Help,
}

#[derive(Debug, PartialEq, Eq)]
struct CliOptions {
    command: CliCommand,
    dir: Option<PathBuf>,
    verbose: bool,
}

fn parse_cli_options<I>(args: I) -> anyhow::Result<CliOptions>
where
    I: IntoIterator<Item = String>,
{
    let mut command = None;
    let mut dir = None;
    let mut verbose = false;

    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--verbose" | "-v" => verbose = true,
            "--dir" => {
                let value = args.next().context("--dir requires a path")?;
                dir = Some(PathBuf::from(value));
            }
            "--help" | "-h" => command = Some(CliCommand::Help),
            "validate" => command = Some(CliCommand::Validate),
            "sync" => command = Some(CliCommand::Sync),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    Ok(CliOptions {
        command: command.unwrap_or(CliCommand::Help),
        dir,
        verbose,
    })
}

fn print_usage() {
    println!("Usage: pagepress [--verbose] [--dir <path>] <validate|sync>");
    println!("  validate   Check the local content tree without writing to the server");
    println!("  sync       Validate, then reconcile the server with the local tree");
    println!("  --dir      Content root (default: PAGEPRESS_DIR or the current directory)");
    println!("  --verbose  Emit per-entity progress lines");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let options = parse_cli_options(std::env::args())?;
    if options.command == CliCommand::Help {
        print_usage();
        return Ok(());
    }

    let mut config = SyncConfig::from_env()?;
    if let Some(dir) = options.dir {
        config.dir = dir;
    }
    config.verbose = config.verbose || options.verbose;

    let rpc = RpcClient::new(&config.endpoint, &config.username, &config.password)?;
    let client = SyncClient::new(rpc, config.dir.clone(), Progress::stdio(config.verbose));

    match options.command {
        CliCommand::Validate => client.validate().await?,
        CliCommand::Sync => {
            client.validate().await?;
            client.sync().await?;
        }
        CliCommand::Help => unreachable!(),
    }
    Ok(())
}
