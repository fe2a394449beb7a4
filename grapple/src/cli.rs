//! # CLI
//!
//! This module defines the command-line interface of `grapple` using `clap`, and maps the parsed
//! flags onto the configuration types of `grapple_core`.
use clap::Parser;
use grapple_core::{
    connection::{ConnectOptions, TlsOptions},
    metadata::{HeaderChannel, MetadataComposer},
    source::{SchemaConfig, SchemaKind},
};
use std::path::PathBuf;

/// Method argument listing every method instead of calling one.
pub const LIST_METHODS: &str = "ls";
/// Same as [`LIST_METHODS`], in long format.
pub const LIST_METHODS_LONG: &str = "ll";

#[derive(Parser, Debug)]
#[command(
    name = "grapple",
    version,
    about = "Call gRPC methods with line-delimited JSON",
    long_about = "Call gRPC methods with line-delimited JSON.\n\n\
        Request messages are read from stdin, one JSON value per line. Response messages are \
        written to stdout, one JSON value per line.\n\n\
        Examples:\n  \
        grapple : ls\n  \
        echo '{\"message\": \"hi\"}' | grapple :50051 echo.Echo.Echo"
)]
pub struct Cli {
    /// Server to connect to. ':' is localhost:50051 and ':<port>' is localhost:<port>, both
    /// without TLS.
    pub target: String,

    /// Full name of the method to call (package.Service.Method), or 'ls' / 'll' to list methods
    #[arg(value_parser = parse_method)]
    pub method: String,

    /// If listing methods, output in long format
    #[arg(short, long)]
    pub long: bool,

    /// Get the schema from .protoset file(s); can be provided multiple times
    #[arg(long = "protoset", value_name = "FILE")]
    pub protosets: Vec<PathBuf>,

    /// Get the schema by compiling the .proto files under a directory with protoc; can be
    /// provided multiple times
    #[arg(long = "proto-path", value_name = "DIR")]
    pub proto_paths: Vec<PathBuf>,

    /// Where to get the schema from; default is to choose based on the provided flags
    #[arg(long, value_name = "protoset|protopath|reflection")]
    pub schema_from: Option<SchemaKind>,

    /// Header sent with both reflection and RPC requests, as 'key: value'
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Header key sent with both reflection and RPC requests; pairs with --header-raw-value
    #[arg(long = "header-raw-key", value_name = "KEY")]
    pub header_raw_keys: Vec<String>,

    #[arg(long = "header-raw-value", value_name = "VALUE")]
    pub header_raw_values: Vec<String>,

    /// Header sent only with reflection requests, as 'key: value'
    #[arg(long = "reflect-header", value_name = "HEADER")]
    pub reflect_headers: Vec<String>,

    #[arg(long = "reflect-header-raw-key", value_name = "KEY")]
    pub reflect_header_raw_keys: Vec<String>,

    #[arg(long = "reflect-header-raw-value", value_name = "VALUE")]
    pub reflect_header_raw_values: Vec<String>,

    /// Header sent only with the RPC request, as 'key: value'
    #[arg(long = "rpc-header", value_name = "HEADER")]
    pub rpc_headers: Vec<String>,

    #[arg(long = "rpc-header-raw-key", value_name = "KEY")]
    pub rpc_header_raw_keys: Vec<String>,

    #[arg(long = "rpc-header-raw-value", value_name = "VALUE")]
    pub rpc_header_raw_values: Vec<String>,

    /// Write the response headers to stderr as JSON
    #[arg(long)]
    pub dump_header: bool,

    /// Write the response trailers to stderr as JSON
    #[arg(long)]
    pub dump_trailer: bool,

    /// Disable TLS; default is to use TLS unless the target is a localhost shorthand
    #[arg(short = 'k', long)]
    pub insecure: bool,

    /// PEM file with a root certificate to trust; can be provided multiple times
    #[arg(long = "server-root-ca", value_name = "FILE")]
    pub server_root_cas: Vec<PathBuf>,

    /// Name to verify the server certificate against
    #[arg(long)]
    pub server_name: Option<String>,

    /// PEM file with a client certificate; pairs with --client-key
    #[arg(long = "client-cert", value_name = "FILE")]
    pub client_certs: Vec<PathBuf>,

    /// PEM file with a client private key; pairs with --client-cert
    #[arg(long = "client-key", value_name = "FILE")]
    pub client_keys: Vec<PathBuf>,

    /// Value prepended to the user-agent header sent with every request
    #[arg(long, value_name = "AGENT")]
    pub user_agent: Option<String>,

    /// Do not warn when reading messages from an interactive terminal
    #[arg(long)]
    pub no_warn_stdin_tty: bool,

    /// Log discovery and call progress to stderr (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Whether the method argument is one of the listing sentinels.
    pub fn listing(&self) -> bool {
        self.method == LIST_METHODS || self.method == LIST_METHODS_LONG
    }

    pub fn long_listing(&self) -> bool {
        self.long || self.method == LIST_METHODS_LONG
    }

    pub fn headers(&self) -> MetadataComposer {
        MetadataComposer {
            shared: HeaderChannel {
                inline: self.headers.clone(),
                raw_keys: self.header_raw_keys.clone(),
                raw_values: self.header_raw_values.clone(),
            },
            discovery: HeaderChannel {
                inline: self.reflect_headers.clone(),
                raw_keys: self.reflect_header_raw_keys.clone(),
                raw_values: self.reflect_header_raw_values.clone(),
            },
            call: HeaderChannel {
                inline: self.rpc_headers.clone(),
                raw_keys: self.rpc_header_raw_keys.clone(),
                raw_values: self.rpc_header_raw_values.clone(),
            },
        }
    }

    pub fn schema(&self) -> SchemaConfig {
        SchemaConfig {
            schema_from: self.schema_from,
            protosets: self.protosets.clone(),
            proto_paths: self.proto_paths.clone(),
        }
    }

    pub fn connection(&self) -> ConnectOptions {
        ConnectOptions {
            target: self.target.clone(),
            insecure: self.insecure,
            user_agent: self.user_agent.clone(),
            tls: TlsOptions {
                root_cas: self.server_root_cas.clone(),
                server_name: self.server_name.clone(),
                client_certs: self.client_certs.clone(),
                client_keys: self.client_keys.clone(),
            },
        }
    }
}

/// Accepts `package.Service.Method` as well as the `package.Service/Method` path form.
fn parse_method(value: &str) -> Result<String, String> {
    let value = value.trim().trim_start_matches('/');

    if value.is_empty() {
        return Err("Method name cannot be empty".to_string());
    }

    Ok(value.replace('/', "."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("grapple").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn slash_separated_methods_are_normalized() {
        assert_eq!(parse(&[":", "echo.Echo/Ping"]).method, "echo.Echo.Ping");
        assert_eq!(parse(&[":", "/echo.Echo/Ping"]).method, "echo.Echo.Ping");
        assert_eq!(parse(&[":", "echo.Echo.Ping"]).method, "echo.Echo.Ping");
    }

    #[test]
    fn ll_implies_long_listing() {
        let cli = parse(&[":", "ll"]);
        assert!(cli.listing());
        assert!(cli.long_listing());

        let cli = parse(&[":", "ls"]);
        assert!(cli.listing());
        assert!(!cli.long_listing());
    }

    #[test]
    fn header_flags_land_in_their_channel() {
        let cli = parse(&[
            ":",
            "ls",
            "-H",
            "a: 1",
            "--reflect-header",
            "b: 2",
            "--rpc-header-raw-key",
            "c",
            "--rpc-header-raw-value",
            "3",
        ]);

        let composer = cli.headers();
        assert_eq!(composer.shared.inline, vec!["a: 1"]);
        assert_eq!(composer.discovery.inline, vec!["b: 2"]);
        assert_eq!(composer.call.raw_keys, vec!["c"]);
        assert_eq!(composer.call.raw_values, vec!["3"]);
    }

    #[test]
    fn connection_flags_are_forwarded() {
        let cli = parse(&[
            "example.com:443",
            "ls",
            "--user-agent",
            "my-tool/2.0",
            "--server-name",
            "internal.example.com",
        ]);

        let options = cli.connection();
        assert_eq!(options.user_agent.as_deref(), Some("my-tool/2.0"));
        assert_eq!(
            options.tls.server_name.as_deref(),
            Some("internal.example.com")
        );
        assert!(!options.plaintext());

        assert_eq!(parse(&[":", "ls"]).connection().user_agent, None);
    }

    #[test]
    fn schema_from_is_validated() {
        let cli = parse(&[":", "ls", "--schema-from", "protopath", "--proto-path", "protos"]);
        assert_eq!(cli.schema().select().unwrap(), SchemaKind::ProtoPath);

        let err = Cli::try_parse_from(["grapple", ":", "ls", "--schema-from", "nope"]);
        assert!(err.is_err());
    }
}
