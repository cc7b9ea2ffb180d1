use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use davwrite::{
    config::Config,
    services::webdav::{AtomicRemoteWriter, WebDAVConnection, WebDAVUrlManager},
    AppError,
};

fn cli() -> Command {
    Command::new("davwrite")
        .about("Atomic file publishing on WebDAV servers")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("list")
                .about("List a remote directory, creating it if it is missing")
                .arg(Arg::new("path").help("Account-relative directory").default_value("/"))
                .arg(
                    Arg::new("json")
                        .help("Print the listing as JSON")
                        .long("json")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("put")
                .about("Upload a local file and publish it atomically")
                .arg(Arg::new("file").help("Local file to upload").required(true).index(1))
                .arg(Arg::new("destination").help("Account-relative destination").required(true).index(2))
                .arg(
                    Arg::new("overwrite")
                        .help("Replace an existing destination")
                        .long("overwrite")
                        .short('f')
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("move")
                .about("Move a remote file to a new path, creating parent directories")
                .arg(Arg::new("source").required(true).index(1))
                .arg(Arg::new("destination").required(true).index(2)),
        )
        .subcommand(
            Command::new("recover")
                .about("Finish or roll back an interrupted replace of a destination")
                .arg(Arg::new("destination").required(true).index(1)),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    let config = Config::from_env()?;

    let connection = WebDAVConnection::new(config.webdav_config(), config.retry_config())?;
    let base_url = connection.base_url()?;
    let staging_url = connection.url_for_path(&format!(
        "{}/",
        config.staging_dir.trim_end_matches('/')
    ))?;
    let resolver = connection.clone();
    let writer = AtomicRemoteWriter::with_config(Arc::new(connection), config.writer_config());

    let result = match matches.subcommand() {
        Some(("list", args)) => list(&writer, &resolver, args).await,
        Some(("put", args)) => {
            put(&writer, &resolver, args, staging_url, base_url).await
        }
        Some(("move", args)) => {
            let source = resolve(&resolver, required(args, "source")?)?;
            let destination = resolve(&resolver, required(args, "destination")?)?;
            let final_url = writer
                .move_url_to_missing_url_creating_container_if_needed(&source, &destination)
                .await?;
            println!("{}", final_url);
            Ok(())
        }
        Some(("recover", args)) => {
            let destination = resolve(&resolver, required(args, "destination")?)?;
            let outcome = writer.recover_interrupted_replace(&destination).await?;
            println!("{}", serde_json::to_string(&outcome)?);
            Ok(())
        }
        _ => Err(anyhow!("Unknown command")),
    };

    if let Err(e) = &result {
        if let Some(dav_error) = e.downcast_ref::<davwrite::DavError>() {
            error!("❌ {} [{}]", dav_error.user_message(), dav_error.error_code());
            if let Some(action) = dav_error.suggested_action() {
                info!("💡 {}", action);
            }
        }
    }

    result
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str> {
    args.get_one::<String>(name)
        .map(|s| s.as_str())
        .ok_or_else(|| anyhow!("Missing argument <{}>", name))
}

/// Resolves an account-relative path, refusing anything that escapes the account
fn resolve(resolver: &WebDAVConnection, path: &str) -> Result<url::Url> {
    let base = resolver.base_url()?;
    let resolved = resolver.url_for_path(path)?;
    WebDAVUrlManager::ensure_within(&resolved, &base)?;
    Ok(resolved)
}

async fn list(writer: &AtomicRemoteWriter, resolver: &WebDAVConnection, args: &ArgMatches) -> Result<()> {
    let directory = resolve(resolver, required(args, "path")?)?;
    let listing = writer
        .fetch_file_infos_ensuring_directory_exists(&directory)
        .await?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("# server date {}", listing.server_date.to_rfc3339());
    for file in &listing.files {
        let kind = if file.is_directory { "d" } else { "-" };
        let modified = file
            .last_modified
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!("{} {:>12} {} {}", kind, file.size, modified, file.name);
    }
    Ok(())
}

async fn put(
    writer: &AtomicRemoteWriter,
    resolver: &WebDAVConnection,
    args: &ArgMatches,
    staging_url: url::Url,
    base_url: url::Url,
) -> Result<()> {
    let file = Path::new(required(args, "file")?);
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let destination = resolve(resolver, required(args, "destination")?)?;
    let overwrite = args.get_flag("overwrite");

    info!("⬆️ Publishing {} ({} bytes) to {}", file.display(), data.len(), destination);

    let final_url = writer
        .write_data_to_url_atomically(data, destination, staging_url, base_url, overwrite)
        .await?;

    println!("{}", final_url);
    Ok(())
}
