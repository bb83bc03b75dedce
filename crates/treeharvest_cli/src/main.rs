//! Binary entry point for the `treeharvest` OAI-PMH harvest CLI.
//!
//! Answers one harvest request against a catalog database and writes the
//! XML response to stdout.

use std::error::Error;
use std::io::{self, BufWriter};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::info;
use treeharvest_core::harvest::ResponseEnvelope;
use treeharvest_core::{
    default_log_level, init_logging, HarvestConfig, HarvestOutcome, HarvestRequest, JsonLdConverter,
    MetadataFormat, RequestContext, RequestError, SqliteStoreProvider, StoreProvider,
    TreeStreamEmitter, XmlEnvelope,
};

#[derive(Parser, Debug)]
#[command(
    name = "treeharvest",
    version,
    about = "Serve OAI-PMH harvest responses from a JSON-LD record catalog",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    #[arg(long, global = true, value_name = "FILE", help = "Catalog SQLite database")]
    db: Option<PathBuf>,

    #[arg(long, global = true, value_name = "FILE", help = "JSON harvest configuration")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Log level (trace|debug|info|warn|error)")]
    log_level: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Absolute log directory; logging stays off when omitted"
    )]
    log_dir: Option<String>,
}

#[derive(Args, Debug)]
struct ListArgs {
    #[arg(long, help = "Metadata prefix, optionally suffixed with `:expanded`")]
    metadata_prefix: Option<String>,

    #[arg(long, help = "Lower modification bound (YYYY-MM-DD or YYYY-MM-DDThh:mm:ssZ)")]
    from: Option<String>,

    #[arg(long, help = "Upper modification bound, inclusive")]
    until: Option<String>,

    #[arg(long, value_name = "SET", help = "Collection, optionally `:<holder notation>`")]
    set: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Emit full records.
    ListRecords(ListArgs),
    /// Emit record headers only.
    ListIdentifiers(ListArgs),
    /// Emit the record behind one external identifier.
    GetRecord {
        #[arg(long)]
        identifier: Option<String>,

        #[arg(long, help = "Metadata prefix, optionally suffixed with `:expanded`")]
        metadata_prefix: Option<String>,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.common.log_dir {
        let level = cli
            .common
            .log_level
            .as_deref()
            .unwrap_or(default_log_level());
        init_logging(level, log_dir)?;
    }

    let config = match &cli.common.config {
        Some(path) => HarvestConfig::from_path(path)?,
        None => HarvestConfig::default(),
    };
    config.validate()?;

    let db = cli.common.db.clone().ok_or("--db is required")?;
    let provider = SqliteStoreProvider::new(&db);
    let converter = JsonLdConverter;
    let emitter = TreeStreamEmitter::new(&provider, &converter, &config);

    let stdout = io::stdout();
    let out = BufWriter::new(stdout.lock());

    let outcome = match &cli.command {
        Command::ListRecords(args) | Command::ListIdentifiers(args) => {
            let identifiers_only = matches!(cli.command, Command::ListIdentifiers(_));
            let verb = if identifiers_only {
                "ListIdentifiers"
            } else {
                "ListRecords"
            };
            let mut envelope = XmlEnvelope::new(out, list_context(&config, verb, args));

            let parsed = HarvestRequest::parse(
                args.metadata_prefix.as_deref(),
                args.set.as_deref(),
                args.from.as_deref(),
                args.until.as_deref(),
                identifiers_only,
            );
            match parsed {
                Ok(request) => {
                    let candidates = provider.acquire()?;
                    emitter.respond_with_trees(&candidates, &request, &mut envelope)?
                }
                Err(err) => reject(&mut envelope, &err)?,
            }
        }
        Command::GetRecord {
            identifier,
            metadata_prefix,
        } => {
            let mut context = RequestContext::new("GetRecord", config.repository_url.clone());
            if let Some(identifier) = identifier {
                context = context.with_argument("identifier", identifier.clone());
            }
            if let Some(prefix) = metadata_prefix {
                context = context.with_argument("metadataPrefix", prefix.clone());
            }
            let mut envelope = XmlEnvelope::new(out, context);

            let parsed = identifier
                .as_deref()
                .ok_or(RequestError::MissingArgument("identifier"))
                .and_then(|identifier| {
                    let prefix = metadata_prefix
                        .as_deref()
                        .ok_or(RequestError::MissingArgument("metadataPrefix"))?;
                    Ok((identifier, MetadataFormat::parse(prefix)?))
                });
            match parsed {
                Ok((identifier, format)) => {
                    emitter.respond_get_record(identifier, &format, &mut envelope)?
                }
                Err(err) => reject(&mut envelope, &err)?,
            }
        }
    };

    info!("event=cli_request module=cli status=ok outcome={:?}", outcome);
    Ok(())
}

fn list_context(config: &HarvestConfig, verb: &str, args: &ListArgs) -> RequestContext {
    let mut context = RequestContext::new(verb, config.repository_url.clone());
    let arguments = [
        ("metadataPrefix", &args.metadata_prefix),
        ("from", &args.from),
        ("until", &args.until),
        ("set", &args.set),
    ];
    for (name, value) in arguments {
        if let Some(value) = value {
            context = context.with_argument(name, value.clone());
        }
    }
    context
}

fn reject<E: ResponseEnvelope>(
    envelope: &mut E,
    err: &RequestError,
) -> Result<HarvestOutcome, Box<dyn Error>> {
    envelope.error(err.error_code(), &err.to_string())?;
    Ok(HarvestOutcome::Rejected(err.error_code()))
}
