// Unit tests for the line driver, played against an in-memory helper that echoes calls

use crate::driver::{
    DRIVER_STATUS, DriverOutput, DriverReply, DriverRequest, execute, parse_request, serve,
};

use host_core::config::RestartConfig;
use host_core::error::spawn::SpawnError;
use host_core::protocol::{
    CMD_START_USB, CMD_YK_CHAL_RESP, HelperRequest, InboundMessage, TOUCH_REQUESTED_FIELD,
};
use host_core::{HelperChannel, HelperHost, HelperLauncher, TransportEvent};

use common::{SecureValueEnvelope, unmask};

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, BufReader, duplex};
use tokio::sync::mpsc;

/// Replies to every call with `{"cmd", "args"}`, or an error object for `fail`.
///
/// `start-usb` is preceded by a one-key `yubikeys` notice. `yk-chal-resp` is accepted, then
/// answered with a touch prompt followed by `"RESPONSE"`.
struct EchoLauncher;

impl HelperLauncher for EchoLauncher {
    fn launch(&mut self) -> Result<HelperChannel, SpawnError> {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<HelperRequest>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                if request.cmd == CMD_START_USB {
                    let _ = event_tx.send(TransportEvent::Message(InboundMessage::YubiKeys {
                        args: vec![json!(1)],
                    }));
                }

                if request.cmd == CMD_YK_CHAL_RESP {
                    let callback_id = request.args.last().and_then(Value::as_u64).unwrap();
                    let messages = [
                        InboundMessage::Result {
                            call_id: request.call_id,
                            result: None,
                            error: None,
                        },
                        InboundMessage::ChallengeResponseResult {
                            callback_id,
                            error: Some(json!({TOUCH_REQUESTED_FIELD: true})),
                            result: None,
                        },
                        InboundMessage::ChallengeResponseResult {
                            callback_id,
                            error: None,
                            result: Some(json!("RESPONSE")),
                        },
                    ];
                    for message in messages {
                        let _ = event_tx.send(TransportEvent::Message(message));
                    }
                    continue;
                }

                let (result, error) = if request.cmd == "fail" {
                    (None, Some(json!({"message": "refused"})))
                } else {
                    (Some(json!({"cmd": request.cmd, "args": request.args})), None)
                };
                let _ = event_tx.send(TransportEvent::Message(InboundMessage::Result {
                    call_id: request.call_id,
                    result,
                    error,
                }));
            }
        });

        Ok(HelperChannel {
            requests: request_tx,
            events: event_rx,
            pid: None,
        })
    }
}

fn echo_host() -> HelperHost {
    HelperHost::new(
        EchoLauncher,
        &RestartConfig {
            enabled: false,
            delay_ms: 1000,
        },
    )
}

/// Execute one request, returning its final reply and any lines written before it.
async fn run(host: &HelperHost, request: DriverRequest) -> (DriverReply, Vec<DriverOutput>) {
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let reply = execute(host, request, &progress_tx).await;

    let mut earlier = Vec::new();
    while let Ok(line) = progress_rx.try_recv() {
        earlier.push(line);
    }
    (reply, earlier)
}

async fn run_line(host: &HelperHost, line: &str) -> DriverReply {
    run(host, parse_request(line).unwrap()).await.0
}

async fn serve_lines(host: HelperHost, input: &str) -> Vec<Value> {
    let (output, mut client) = duplex(64 * 1024);
    serve(host, BufReader::new(input.as_bytes()), output)
        .await
        .unwrap();

    let mut written = String::new();
    client.read_to_string(&mut written).await.unwrap();
    written
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn given_minimal_line_when_parsed_then_id_and_args_default() {
    let request = parse_request(r#"{"cmd":"kbd-get-active-pid"}"#).unwrap();

    assert_eq!(
        request,
        DriverRequest {
            id: Value::Null,
            cmd: "kbd-get-active-pid".to_string(),
            args: Vec::new(),
        }
    );
}

#[test]
fn given_line_without_cmd_when_parsed_then_returns_request_error() {
    let result = parse_request(r#"{"args":[]}"#);

    assert!(result.unwrap_err().to_string().contains("Request Error"));
}

#[tokio::test]
async fn given_helper_command_when_executed_then_forwards_and_echoes_id() {
    let host = echo_host();

    let reply = run_line(&host, r#"{"id":"a1","cmd":"kbd-shortcut","args":["v"]}"#).await;

    assert_eq!(reply.id, json!("a1"));
    assert_eq!(reply.result, Some(json!({"cmd": "kbd-shortcut", "args": ["v"]})));
    assert!(reply.error.is_none());
}

/// **VALUE**: Verifies helper errors reach the client unchanged.
///
/// **BUG THIS CATCHES**: Would catch the helper's error object being replaced by a
/// generic message, hiding the fields clients branch on.
#[tokio::test]
async fn given_helper_error_when_executed_then_error_is_verbatim() {
    // GIVEN: A command the echo helper refuses
    let host = echo_host();

    // WHEN: Executing it
    let reply = run_line(&host, r#"{"id":2,"cmd":"fail"}"#).await;

    // THEN: The helper's error object is the reply's error
    assert_eq!(reply.error, Some(json!({"message": "refused"})));
    assert!(reply.result.is_none());
}

/// **VALUE**: Verifies a password given to the driver is masked before reaching the helper.
///
/// **WHY THIS MATTERS**: The driver is the one place a plain string password enters; it
/// must not forward it in the clear.
///
/// **BUG THIS CATCHES**: Would catch argon2 falling through to the generic forwarding path.
#[tokio::test]
async fn given_argon2_with_plain_password_when_executed_then_helper_gets_envelope() {
    // GIVEN: An argon2 request with a string password and salt
    let host = echo_host();
    let line = r#"{"id":3,"cmd":"argon2","args":["hunter2","pepper",{"iterations":3}]}"#;

    // WHEN: Executing it
    let reply = run_line(&host, line).await;

    // THEN: The helper saw a masked envelope, not the string
    let echoed = reply.result.unwrap();
    let envelope: SecureValueEnvelope = serde_json::from_value(echoed["args"][0].clone()).unwrap();
    assert_eq!(unmask(envelope).unwrap().expose(), b"hunter2");
    assert_eq!(echoed["args"][1], json!(b"pepper"));
    assert_eq!(echoed["args"][2], json!({"iterations": 3}));
}

#[tokio::test]
async fn given_argon2_without_password_when_executed_then_returns_request_error() {
    let host = echo_host();

    let reply = run_line(&host, r#"{"id":4,"cmd":"argon2","args":[]}"#).await;

    assert_eq!(reply.error.unwrap()["type"], "Request");
}

#[tokio::test]
async fn given_status_request_when_executed_then_reports_host_state() {
    let host = echo_host();
    host.ensure_started().await.unwrap();

    let (reply, _) = run(
        &host,
        DriverRequest {
            id: json!(5),
            cmd: DRIVER_STATUS.to_string(),
            args: Vec::new(),
        },
    )
    .await;

    let status = reply.result.unwrap();
    assert_eq!(status["running"], json!(true));
    assert_eq!(status["generation"], json!(1));
    assert_eq!(status["pendingCalls"], json!(0));
}

/// **VALUE**: Verifies the whole driver loop: every line gets exactly one reply, bad lines
/// included, and serve() returns once input closes.
///
/// **BUG THIS CATCHES**: Would catch:
/// - A bad line aborting the loop
/// - Replies lost when input closes while requests are still in flight
/// - Output lines not newline-terminated
#[tokio::test]
async fn given_request_lines_when_served_then_one_reply_line_each() {
    // GIVEN: Three request lines, one of them malformed
    let host = echo_host();
    let input = concat!(
        r#"{"id":1,"cmd":"get-yubikeys","args":[{}]}"#,
        "\n",
        "not json\n",
        "\n",
        r#"{"id":2,"cmd":"kbd-get-active-pid"}"#,
        "\n",
    );

    // WHEN: Serving until EOF
    let replies = serve_lines(host, input).await;

    // THEN: Three reply lines
    assert_eq!(replies.len(), 3);

    let by_id = |id: Value| replies.iter().find(|r| r["id"] == id).cloned();
    assert_eq!(
        by_id(json!(1)).unwrap()["result"]["cmd"],
        json!("get-yubikeys")
    );
    assert_eq!(
        by_id(json!(2)).unwrap()["result"]["cmd"],
        json!("kbd-get-active-pid")
    );
    assert_eq!(by_id(Value::Null).unwrap()["error"]["type"], json!("Request"));
}

/// **VALUE**: Verifies a challenge-response request reports the key's touch prompt and
/// then its answer, both under the request's id.
///
/// **WHY THIS MATTERS**: The answer comes back through the callback channel, not as the
/// call's result. Forwarding the request as a plain call returns `null` and drops the answer.
///
/// **BUG THIS CATCHES**: Would catch:
/// - `yk-chal-resp` taking the generic forwarding path
/// - The touch prompt written as a final line
#[tokio::test]
async fn given_challenge_response_when_executed_then_progress_then_final_answer() {
    // GIVEN: A challenge with a client-supplied trailing id the host replaces
    let host = echo_host();
    let line = r#"{"id":1,"cmd":"yk-chal-resp","args":[{"serial":1},[1,2,3],2,7]}"#;

    // WHEN: Executing it
    let (reply, earlier) = run(&host, parse_request(line).unwrap()).await;

    // THEN: One touch prompt, then the answer
    assert_eq!(earlier.len(), 1);
    match &earlier[0] {
        DriverOutput::Reply(progress) => {
            assert_eq!(progress.id, json!(1));
            assert!(!progress.is_final());
            assert_eq!(progress.progress, Some(json!({TOUCH_REQUESTED_FIELD: true})));
        }
        other => panic!("Expected a progress reply, got {other:?}"),
    }
    assert!(reply.is_final());
    assert_eq!(reply.result, Some(json!("RESPONSE")));
    assert_eq!(host.pending_counts().await.unwrap(), (0, 0));
}

#[tokio::test]
async fn given_challenge_response_with_bad_slot_when_executed_then_returns_request_error() {
    let host = echo_host();

    let reply = run_line(&host, r#"{"id":9,"cmd":"yk-chal-resp","args":[{},"abc",300]}"#).await;

    assert_eq!(reply.error.unwrap()["type"], "Request");
    assert!(!host.is_running().await);
}

/// **VALUE**: Verifies the served output carries challenge answers and YubiKey notices.
///
/// **WHY THIS MATTERS**: Clients only see stdout. Host events that never reach it are lost,
/// so a plugged-in key goes unnoticed.
///
/// **BUG THIS CATCHES**: Would catch:
/// - serve() never subscribing to host events
/// - Events still queued at EOF dropped instead of written
#[tokio::test]
async fn given_usb_listener_and_challenge_when_served_then_output_has_answer_and_event() {
    // GIVEN: A USB listener request and a challenge-response request
    let host = echo_host();
    let input = concat!(
        r#"{"id":"usb","cmd":"start-usb"}"#,
        "\n",
        r#"{"id":1,"cmd":"yk-chal-resp","args":[{"serial":1},[1,2,3],2,7]}"#,
        "\n",
    );

    // WHEN: Serving until EOF
    let lines = serve_lines(host, input).await;

    // THEN: The answer, the touch prompt and the yubikeys notice are all there
    let written: Vec<String> = lines.iter().map(Value::to_string).collect();
    assert!(written.iter().any(|line| line.contains("RESPONSE")));

    let finals: Vec<&Value> = lines
        .iter()
        .filter(|line| line.get("result").is_some() || line.get("error").is_some())
        .collect();
    assert_eq!(finals.len(), 2);
    assert!(finals.iter().any(|line| line["id"] == json!(1) && line["result"] == json!("RESPONSE")));

    assert!(lines.iter().any(|line| line["id"] == json!(1) && line.get("progress").is_some()));
    assert!(lines.contains(&json!({"event": "yubikeys", "args": [1]})));
}
