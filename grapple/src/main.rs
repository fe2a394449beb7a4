//! # Grapple CLI Entry Point
//!
//! The main executable for the Grapple tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs the
//!    stderr log subscriber.
//! 2. **Configuration**: Composes the header channels and selects the schema source.
//! 3. **Connection**: Opens the channel shared by discovery and the call.
//! 4. **Discovery**: Lists the methods, or resolves the one to call, then closes the source.
//! 5. **Execution**: Pipes stdin through the invocation engine to stdout.
mod cli;
mod formatter;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use formatter::{ErrorReport, FormattedString, MethodList, Warning};
use grapple_core::{
    connection::annotate_transport_error,
    invoke::{InvokeOptions, Invoker},
    source::{MethodSource, SchemaSource},
};
use std::{io::IsTerminal, process::ExitCode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let plaintext = cli.connection().plaintext();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let report = FormattedString::from(ErrorReport(&err)).to_string();
            eprintln!("{}", annotate_transport_error(report, plaintext));
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so they never mix with the messages on stdout.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "grapple=debug,grapple_core=debug,warn"
    } else {
        "warn"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let metadata = cli
        .headers()
        .compose()
        .context("Invalid header configuration")?;

    let schema = cli.schema();
    let kind = schema.select()?;

    let channel = cli.connection().connect().await?;

    let mut source = SchemaSource::open(kind, &schema, channel.clone(), metadata.discovery)?;

    if cli.listing() {
        let methods = source.methods().await?;
        close_source(&mut source);

        if !methods.is_empty() {
            let list = MethodList {
                methods,
                long: cli.long_listing(),
            };
            println!("{}", FormattedString::from(list));
        }

        return Ok(());
    }

    let method = source.method(&cli.method).await?;
    close_source(&mut source);

    if !cli.no_warn_stdin_tty && std::io::stdin().is_terminal() {
        eprintln!(
            "{}",
            FormattedString::from(Warning(
                "reading message(s) from stdin (disable this message with --no-warn-stdin-tty)"
            ))
        );
    }

    let options = InvokeOptions {
        dump_header: cli.dump_header,
        dump_trailer: cli.dump_trailer,
    };

    let mut invoker = Invoker::new(channel, metadata.call, options);

    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();

    invoker
        .invoke(&method, input, &mut stdout, &mut stderr)
        .await?;

    Ok(())
}

/// Discovery already succeeded at this point, a failed close does not affect the outcome.
fn close_source<S>(source: &mut S)
where
    S: MethodSource,
{
    if let Err(err) = source.close() {
        tracing::warn!(%err, "failed to close the method source");
    }
}
