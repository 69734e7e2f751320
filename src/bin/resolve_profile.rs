//! Resolve a profile document into a standalone catalog.
//!
//! Reads the profile from disk, follows its imports through the filesystem
//! loader, and writes `{"catalog": ...}` to stdout or to `--output`.
//! Diagnostics go to stderr through `tracing`; set `PROFILE_RESOLVER_LOG`
//! (e.g. `debug`) to see the per-import pipeline.

use anyhow::{Context, Result, bail};
use profile_resolver::{Document, PrefixMapper, ProfileResolver, ResolverConfig};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "PROFILE_RESOLVER_LOG";

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse()?;
    init_tracing();

    let mut config = ResolverConfig::default();
    if let Some(prefix) = args.id_prefix {
        config = config.with_mapper(PrefixMapper::new(prefix));
    }
    let catalog = ProfileResolver::new(config).resolve_path(&args.profile)?;

    let document = Document::Catalog(catalog);
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&document)?
    } else {
        serde_json::to_string(&document)?
    };

    match args.output {
        Some(path) => fs::write(&path, format!("{rendered}\n"))
            .with_context(|| format!("writing {}", path.display()))?,
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{rendered}").context("writing catalog to stdout")?;
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

struct CliArgs {
    profile: PathBuf,
    output: Option<PathBuf>,
    id_prefix: Option<String>,
    pretty: bool,
}

impl CliArgs {
    fn parse() -> Result<Self> {
        let mut args = env::args_os().skip(1);
        let mut profile: Option<PathBuf> = None;
        let mut output: Option<PathBuf> = None;
        let mut id_prefix: Option<String> = None;
        let mut pretty = false;

        while let Some(arg_os) = args.next() {
            let arg = arg_os
                .into_string()
                .map_err(|_| anyhow::anyhow!("argument is not valid UTF-8"))?;
            match arg.as_str() {
                "--output" | "-o" => {
                    output = Some(PathBuf::from(next_value(&mut args, "--output")?));
                }
                "--id-prefix" => {
                    let prefix = next_value(&mut args, "--id-prefix")?;
                    if prefix.is_empty() {
                        bail!("--id-prefix must not be empty");
                    }
                    id_prefix = Some(prefix);
                }
                "--pretty" => pretty = true,
                "--help" | "-h" => {
                    print!("{}", usage());
                    std::process::exit(0);
                }
                flag if flag.starts_with('-') => bail!("unknown flag: {flag}\n\n{}", usage()),
                path => {
                    if profile.is_some() {
                        bail!("only one profile may be resolved per invocation");
                    }
                    profile = Some(PathBuf::from(path));
                }
            }
        }

        let Some(profile) = profile else {
            bail!("missing profile path\n\n{}", usage());
        };
        Ok(CliArgs {
            profile,
            output,
            id_prefix,
            pretty,
        })
    }
}

fn next_value(args: &mut impl Iterator<Item = OsString>, flag: &str) -> Result<String> {
    args.next()
        .map(|os| {
            os.into_string()
                .map_err(|_| anyhow::anyhow!("value for {flag} is not valid UTF-8"))
        })
        .transpose()?
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn usage() -> &'static str {
    "Usage: resolve-profile <profile.json> [--output PATH] [--id-prefix PREFIX] [--pretty]\n\
Resolves the profile's imports and writes the resulting catalog as JSON.\n\
Set PROFILE_RESOLVER_LOG to a tracing filter (default: warn) for diagnostics.\n"
}
