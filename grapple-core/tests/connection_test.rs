use echo_service::{EchoServer, EchoServiceImpl, FILE_DESCRIPTOR_SET, reflection_service};
use grapple_core::connection::{ConnectError, ConnectOptions, transport_hint};
use grapple_core::invoke::{InvokeOptions, Invoker};
use grapple_core::metadata::Metadata;
use grapple_core::registry::DescriptorRegistry;
use grapple_core::source::{MethodSource, ReflectionMethodSource};
use std::error::Error;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Identity, Server, ServerTlsConfig};

const SERVER_CERT: &str = include_str!("fixtures/server.pem");
const SERVER_KEY: &str = include_str!("fixtures/server.key");

async fn serve(tls: Option<ServerTlsConfig>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut builder = Server::builder();
    if let Some(tls) = tls {
        builder = builder.tls_config(tls).unwrap();
    }

    let server = builder
        .add_service(reflection_service().unwrap())
        .add_service(EchoServer::new(EchoServiceImpl))
        .serve_with_incoming(TcpListenerStream::new(listener));
    tokio::spawn(server);

    addr
}

async fn serve_tls() -> SocketAddr {
    let identity = Identity::from_pem(SERVER_CERT, SERVER_KEY);
    serve(Some(ServerTlsConfig::new().identity(identity))).await
}

/// Accepts connections and hangs up right away.
async fn serve_hang_up() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });

    addr
}

/// The error and its causes, joined the way the CLI prints them.
fn report(err: &dyn Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }

    text
}

/// Connects and lists methods, returning the first failure.
async fn failure(options: &ConnectOptions) -> String {
    match options.connect().await {
        Err(err) => report(&err),
        Ok(channel) => {
            let mut source = ReflectionMethodSource::new(channel, Metadata::default());
            let err = source.methods().await.unwrap_err();
            report(&err)
        }
    }
}

fn options(target: String) -> ConnectOptions {
    ConnectOptions {
        target,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_plaintext_client_against_tls_server() {
    let addr = serve_tls().await;
    let options = options(format!("http://{addr}"));

    let text = failure(&options).await;

    assert_eq!(
        transport_hint(&text, options.plaintext()),
        Some("is the server expecting TLS?"),
        "unexpected error: {text}"
    );
}

#[tokio::test]
async fn test_server_hanging_up_before_the_handshake() {
    let addr = serve_hang_up().await;

    let plaintext = options(format!("http://{addr}"));
    let text = failure(&plaintext).await;
    assert_eq!(
        transport_hint(&text, true),
        Some("is the server expecting TLS?"),
        "unexpected error: {text}"
    );
    assert_eq!(
        transport_hint(&text, false),
        Some("is the server expecting mutual TLS?")
    );
}

#[tokio::test]
async fn test_tls_client_against_plaintext_server() {
    let addr = serve(None).await;
    let options = options(format!("https://{addr}"));

    let text = failure(&options).await;

    assert_eq!(
        transport_hint(&text, options.plaintext()),
        Some("is the server expecting plaintext?"),
        "unexpected error: {text}"
    );
}

#[tokio::test]
async fn test_user_agent_is_sent() {
    let addr = serve(None).await;
    let options = ConnectOptions {
        user_agent: Some("grapple-test/1.0".to_string()),
        ..options(format!("http://{addr}"))
    };

    let channel = options.connect().await.unwrap();
    let method = DescriptorRegistry::decode(FILE_DESCRIPTOR_SET)
        .unwrap()
        .method("echo.Echo.EchoMetadata")
        .unwrap();

    let mut invoker = Invoker::new(channel, Metadata::default(), InvokeOptions::default());
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    invoker
        .invoke(&method, "{}".as_bytes(), &mut stdout, &mut stderr)
        .await
        .unwrap();

    let reply: serde_json::Value = serde_json::from_slice(&stdout).unwrap();
    let user_agent = reply["metadata"]["user-agent"]["values"][0]
        .as_str()
        .unwrap();
    assert!(
        user_agent.starts_with("grapple-test/1.0"),
        "unexpected user agent: {user_agent}"
    );
}

#[tokio::test]
async fn test_invalid_user_agent_is_rejected() {
    let options = ConnectOptions {
        user_agent: Some("bad\nagent".to_string()),
        ..options("http://127.0.0.1:1".to_string())
    };

    let result = options.connect().await;
    assert!(matches!(
        result,
        Err(ConnectError::InvalidUserAgent(agent, _)) if agent == "bad\nagent"
    ));
}
