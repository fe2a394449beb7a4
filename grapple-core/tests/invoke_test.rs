use echo_service::{EchoServer, EchoServiceImpl, FILE_DESCRIPTOR_SET, reflection_service};
use grapple_core::invoke::{CallShape, InvokeError, InvokeOptions, Invoker};
use grapple_core::metadata::{HeaderChannel, Metadata, MetadataComposer};
use grapple_core::prost_reflect::MethodDescriptor;
use grapple_core::registry::DescriptorRegistry;
use grapple_core::transcode::TranscodeError;
use std::time::Duration;
use tonic::service::Routes;

fn method(full_name: &str) -> MethodDescriptor {
    DescriptorRegistry::decode(FILE_DESCRIPTOR_SET)
        .unwrap()
        .method(full_name)
        .unwrap()
}

fn setup_invoker(metadata: Metadata, options: InvokeOptions) -> Invoker<Routes> {
    let routes = Routes::new(EchoServer::new(EchoServiceImpl));
    Invoker::new(routes, metadata, options)
}

struct Outcome {
    result: Result<(), InvokeError>,
    stdout: String,
    stderr: String,
}

async fn call(invoker: &mut Invoker<Routes>, full_name: &str, input: &str) -> Outcome {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let result = invoker
        .invoke(&method(full_name), input.as_bytes(), &mut stdout, &mut stderr)
        .await;

    Outcome {
        result,
        stdout: String::from_utf8(stdout).unwrap(),
        stderr: String::from_utf8(stderr).unwrap(),
    }
}

#[test]
fn test_call_shapes() {
    assert_eq!(CallShape::of(&method("echo.Echo.Echo")), CallShape::Unary);
    assert_eq!(
        CallShape::of(&method("echo.Echo.ClientStreamEcho")),
        CallShape::ClientStream
    );
    assert_eq!(
        CallShape::of(&method("echo.Echo.ServerStreamEcho")),
        CallShape::ServerStream
    );
    assert_eq!(
        CallShape::of(&method("echo.Echo.BidiStreamEcho")),
        CallShape::BidiStream
    );
}

#[tokio::test]
async fn test_unary_round_trip() {
    let mut invoker = setup_invoker(Metadata::default(), InvokeOptions::default());

    let outcome = call(&mut invoker, "echo.Echo.Echo", r#"{"message":"hi"}"#).await;

    outcome.result.unwrap();
    assert_eq!(outcome.stdout, "{\"message\":\"hi\"}\n");
    assert!(outcome.stderr.is_empty());
}

#[tokio::test]
async fn test_unary_only_sends_the_first_value() {
    let mut invoker = setup_invoker(Metadata::default(), InvokeOptions::default());

    let input = "{\"message\":\"first\"}\n{\"message\":\"second\"}\n";
    let outcome = call(&mut invoker, "echo.Echo.Echo", input).await;

    outcome.result.unwrap();
    assert_eq!(outcome.stdout, "{\"message\":\"first\"}\n");
}

#[tokio::test]
async fn test_unary_with_empty_input_type() {
    let mut invoker = setup_invoker(Metadata::default(), InvokeOptions::default());

    let outcome = call(&mut invoker, "echo.Echo.Ping", "{}").await;

    outcome.result.unwrap();
    assert_eq!(outcome.stdout, "{\"pong\":true}\n");
}

#[tokio::test]
async fn test_unary_rejects_unknown_fields() {
    let mut invoker = setup_invoker(Metadata::default(), InvokeOptions::default());

    let outcome = call(&mut invoker, "echo.Echo.Echo", r#"{"nope":1}"#).await;

    assert!(matches!(
        outcome.result,
        Err(InvokeError::Transcode(TranscodeError::Input { line: 1, .. }))
    ));
    assert!(outcome.stdout.is_empty());
}

#[tokio::test]
async fn test_client_streaming_count() {
    let mut invoker = setup_invoker(Metadata::default(), InvokeOptions::default());

    let input = "{\"message\":\"a\"}\n{\"message\":\"b\"}\n{\"message\":\"c\"}\n";
    let outcome = call(&mut invoker, "echo.Echo.ClientStreamEcho", input).await;

    outcome.result.unwrap();
    assert_eq!(outcome.stdout, "{\"count\":3}\n");
}

#[tokio::test]
async fn test_blank_lines_are_skipped() {
    let mut invoker = setup_invoker(Metadata::default(), InvokeOptions::default());

    let input = "{\"message\":\"a\"}\n\n   \n{\"message\":\"b\"}\n";
    let outcome = call(&mut invoker, "echo.Echo.ClientStreamEcho", input).await;

    outcome.result.unwrap();
    assert_eq!(outcome.stdout, "{\"count\":2}\n");
}

#[tokio::test]
async fn test_client_streaming_without_input() {
    let mut invoker = setup_invoker(Metadata::default(), InvokeOptions::default());

    let outcome = call(&mut invoker, "echo.Echo.ClientStreamEcho", "").await;

    outcome.result.unwrap();
    // Zero is the default value and is omitted.
    assert_eq!(outcome.stdout, "{}\n");
}

#[tokio::test]
async fn test_server_streaming() {
    let mut invoker = setup_invoker(Metadata::default(), InvokeOptions::default());

    let outcome = call(&mut invoker, "echo.Echo.ServerStreamEcho", "{\"count\":3}\n").await;

    outcome.result.unwrap();
    assert_eq!(
        outcome.stdout,
        "{\"message\":\"0\"}\n{\"message\":\"1\"}\n{\"message\":\"2\"}\n"
    );
}

#[tokio::test]
async fn test_bidi_streaming() {
    let mut invoker = setup_invoker(Metadata::default(), InvokeOptions::default());

    let input = "{\"message\":\"ping\"}\n{\"message\":\"pong\"}\n";
    let outcome = call(&mut invoker, "echo.Echo.BidiStreamEcho", input).await;

    outcome.result.unwrap();
    assert_eq!(outcome.stdout, input);
}

#[tokio::test]
async fn test_malformed_line_reports_its_number() {
    let mut invoker = setup_invoker(Metadata::default(), InvokeOptions::default());

    let input = "{\"message\":\"a\"}\nnot json\n{\"message\":\"c\"}\n";
    let outcome = call(&mut invoker, "echo.Echo.ClientStreamEcho", input).await;

    assert!(matches!(
        outcome.result,
        Err(InvokeError::Transcode(TranscodeError::Input { line: 2, .. }))
    ));
}

#[tokio::test]
async fn test_dump_header_and_trailer() {
    let options = InvokeOptions {
        dump_header: true,
        dump_trailer: true,
    };
    let mut invoker = setup_invoker(Metadata::default(), options);

    let outcome = call(&mut invoker, "echo.Echo.Echo", r#"{"message":"hi"}"#).await;
    outcome.result.unwrap();

    let lines: Vec<&str> = outcome.stderr.lines().collect();
    assert_eq!(lines.len(), 1);

    let report: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(
        report["header"]["full-method"],
        serde_json::json!(["/echo.Echo/Echo"])
    );
    assert!(report["trailer"].is_object());

    // Diagnostics never reach the primary output.
    assert_eq!(outcome.stdout, "{\"message\":\"hi\"}\n");
}

#[tokio::test]
async fn test_dump_header_only_on_streaming_calls() {
    let options = InvokeOptions {
        dump_header: true,
        dump_trailer: false,
    };
    let mut invoker = setup_invoker(Metadata::default(), options);

    let outcome = call(&mut invoker, "echo.Echo.ServerStreamEcho", "{\"count\":1}").await;
    outcome.result.unwrap();

    let report: serde_json::Value = serde_json::from_str(outcome.stderr.trim_end()).unwrap();
    assert_eq!(
        report["header"]["full-method"],
        serde_json::json!(["/echo.Echo/ServerStreamEcho"])
    );
    assert!(report.get("trailer").is_none());
}

#[tokio::test]
async fn test_call_metadata_is_sent() {
    let composed = MetadataComposer {
        shared: HeaderChannel {
            inline: vec!["x-shared: one".to_string()],
            ..Default::default()
        },
        discovery: HeaderChannel {
            inline: vec!["x-discovery: two".to_string()],
            ..Default::default()
        },
        call: HeaderChannel {
            raw_keys: vec!["x-call-bin".to_string()],
            // "three" without padding
            raw_values: vec!["dGhyZWU".to_string()],
            ..Default::default()
        },
    }
    .compose()
    .unwrap();

    let mut invoker = setup_invoker(composed.call, InvokeOptions::default());

    let outcome = call(&mut invoker, "echo.Echo.EchoMetadata", "{}").await;
    outcome.result.unwrap();

    let reply: serde_json::Value = serde_json::from_str(outcome.stdout.trim_end()).unwrap();
    let metadata = &reply["metadata"];

    assert_eq!(metadata["x-shared"]["values"], serde_json::json!(["one"]));
    assert_eq!(metadata["x-call-bin"]["values"], serde_json::json!(["three"]));
    assert!(metadata.get("x-discovery").is_none());
}

#[tokio::test]
async fn test_unimplemented_method_surfaces_the_status() {
    let routes = Routes::new(reflection_service().unwrap());
    let mut invoker = Invoker::new(routes, Metadata::default(), InvokeOptions::default());

    let outcome = call(&mut invoker, "echo.Echo.Echo", r#"{"message":"hi"}"#).await;

    match outcome.result {
        Err(InvokeError::Status(status)) => assert_eq!(status.code(), tonic::Code::Unimplemented),
        other => panic!("expected an Unimplemented status, got {other:?}"),
    }
    assert!(outcome.stdout.is_empty());
}

#[tokio::test]
async fn test_streaming_call_fails_while_input_is_still_open() {
    let routes = Routes::new(reflection_service().unwrap());
    let mut invoker = Invoker::new(routes, Metadata::default(), InvokeOptions::default());

    // The writer half stays alive, so the input never reaches end of file.
    let (_writer, reader) = tokio::io::duplex(64);
    let input = tokio::io::BufReader::new(reader);
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        invoker.invoke(
            &method("echo.Echo.BidiStreamEcho"),
            input,
            &mut stdout,
            &mut stderr,
        ),
    )
    .await
    .expect("the call should end without waiting for more input");

    match result {
        Err(InvokeError::Status(status)) => assert_eq!(status.code(), tonic::Code::Unimplemented),
        other => panic!("expected an Unimplemented status, got {other:?}"),
    }
    assert!(stdout.is_empty());
}
