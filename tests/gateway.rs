//! End-to-end tests over a real TCP socket
//!
//! Each test spins the gateway up against a scripted terminal, connects
//! like a till would and drives the framed JSON exchange.

use epos_bridge::config::CallbackPolicy;
use epos_bridge::device::DeviceAdapter;
use epos_bridge::server;
use epos_bridge::terminal::sim::{SimPrompt, SimTransaction, SimulatedTerminal};
use epos_bridge::terminal::TerminalStatus;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const ETX: u8 = 0x03;
const EOT: u8 = 0x04;

// =============================================================================
// Test till
// =============================================================================

/// Minimal till-side client speaking the framed protocol
struct Till {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl Till {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    async fn send(&mut self, body: &str) {
        let mut frame = body.as_bytes().to_vec();
        frame.push(ETX);
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Next frame as (json, is_final)
    async fn next_frame(&mut self) -> (Value, bool) {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == ETX) {
                let mut body: Vec<u8> = self.buffer.drain(..=pos).collect();
                body.pop();
                let is_final = body.last() == Some(&EOT);
                if is_final {
                    body.pop();
                }
                let value = serde_json::from_slice(&body).unwrap();
                return (value, is_final);
            }

            let mut chunk = [0u8; 1024];
            let n = timeout(Duration::from_secs(5), self.stream.read(&mut chunk))
                .await
                .expect("timed out waiting for a frame")
                .unwrap();
            assert!(n > 0, "gateway closed the connection unexpectedly");
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Drain frames until the final reply, answering nothing; returns the
    /// final body and the interim frame kinds seen on the way
    async fn final_reply(&mut self) -> (Value, Vec<String>) {
        let mut interim = Vec::new();
        loop {
            let (frame, is_final) = self.next_frame().await;
            if is_final {
                return (frame, interim);
            }
            interim.push(frame["type"].as_str().unwrap().to_string());
        }
    }
}

async fn start_gateway(
    sim: SimulatedTerminal,
    policy: CallbackPolicy,
) -> (SocketAddr, Arc<DeviceAdapter>) {
    let adapter = Arc::new(DeviceAdapter::new(Box::new(sim), policy));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let serving = adapter.clone();
    tokio::spawn(async move {
        let _ = server::serve(listener, serving).await;
    });

    (addr, adapter)
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_clean_sale_returns_receipts_and_masked_pan() {
    let sim = SimulatedTerminal::new().with_script(vec![
        SimPrompt::StatusChange(TerminalStatus::Busy),
        SimPrompt::WaitForCard("Present card".to_string()),
        SimPrompt::PromptScreen("Processing".to_string()),
    ]);
    let (addr, _adapter) = start_gateway(sim, CallbackPolicy::default()).await;

    let mut till = Till::connect(addr).await;
    till.send(r#"{"type":"Sale","amount":"23.50"}"#).await;

    let (reply, interim) = till.final_reply().await;
    assert_eq!(reply["type"], "success");
    assert_eq!(reply["status"], "RESULT_TRANS_ACCEPTED");
    assert_eq!(reply["value"]["pan"], "479275******1234");
    assert_eq!(reply["value"]["cardType"], "VISA DEBIT");
    assert!(reply["value"]["merchant"].as_array().unwrap().len() > 1);
    assert!(reply["value"]["customer"].as_array().unwrap().len() > 1);

    // the terminal's screens were mirrored to the till on the way
    assert!(interim.contains(&"waitForCard".to_string()));
    assert!(interim.contains(&"showPromptScreen".to_string()));
}

#[tokio::test]
async fn test_copy_prompt_round_trip() {
    let sim = SimulatedTerminal::new()
        .with_script(vec![SimPrompt::AskForCopy("Print another copy?".to_string())]);
    let probe = sim.probe();
    let (addr, _adapter) = start_gateway(sim, CallbackPolicy::default()).await;

    let mut till = Till::connect(addr).await;
    till.send(r#"{"type":"Sale","amount":"5.00"}"#).await;

    loop {
        let (frame, is_final) = till.next_frame().await;
        if is_final {
            assert_eq!(frame["type"], "success");
            break;
        }
        if frame["type"] == "askForCopy" {
            assert_eq!(frame["prompt"], "Print another copy?");
            till.send(r#"{"type":"Response","value":"true"}"#).await;
        }
    }

    // the session saw the till's answer
    assert_eq!(*probe.answers.lock(), vec!["true".to_string()]);
}

#[tokio::test]
async fn test_batch_read_accumulates_every_round() {
    let rounds = vec![
        vec![
            SimTransaction::default().with_number("000001"),
            SimTransaction::default().with_number("000002"),
        ],
        vec![SimTransaction::default().with_number("000003")],
    ];
    let sim = SimulatedTerminal::new()
        .with_statuses(vec![
            TerminalStatus::BatchCompleted,
            TerminalStatus::BatchCompleted,
            TerminalStatus::ReadyForNew,
        ])
        .with_batch_rounds(rounds);
    let (addr, _adapter) = start_gateway(sim, CallbackPolicy::default()).await;

    let mut till = Till::connect(addr).await;
    till.send(r#"{"type":"Batch"}"#).await;

    let (reply, _) = till.final_reply().await;
    assert_eq!(reply["type"], "success");
    let reports = reply["value"]["reports"].as_array().unwrap();
    // one nested array per round
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].as_array().unwrap().len(), 2);
    assert_eq!(reports[0][0]["transactionNumber"], "000001");
    assert_eq!(reports[1][0]["transactionNumber"], "000003");
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_usable() {
    let sim = SimulatedTerminal::new();
    let (addr, _adapter) = start_gateway(sim, CallbackPolicy::default()).await;

    let mut till = Till::connect(addr).await;
    till.send("this is not json").await;
    let (reply, _) = till.final_reply().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["prompt"], "Malformed request.");

    till.send(r#"{"type":"Status"}"#).await;
    let (reply, _) = till.final_reply().await;
    assert_eq!(reply["type"], "success");
    assert_eq!(reply["status"], "STATUS_READY_FOR_NEW_TRAN");
}

#[tokio::test]
async fn test_retry_of_settled_sale_is_not_resubmitted() {
    // The terminal remembers the same transaction the gateway will record
    let sim = SimulatedTerminal::new().with_last_transaction(SimTransaction::default());
    let probe = sim.probe();
    let (addr, _adapter) = start_gateway(sim, CallbackPolicy::default()).await;

    let mut till = Till::connect(addr).await;
    till.send(r#"{"type":"Sale","amount":"10.00"}"#).await;
    let (reply, _) = till.final_reply().await;
    assert_eq!(reply["type"], "success");
    assert_eq!(probe.starts(), 1);

    // The till lost our reply and resubmits with the retry marker
    till.send(r#"{"type":"Sale","amount":"10.00","retry":true}"#)
        .await;
    let (reply, _) = till.final_reply().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["status"], "TK_TRANSACTION_ALREADY_COMPLETED");

    // no second submission reached the terminal
    assert_eq!(probe.starts(), 1);
}

#[tokio::test]
async fn test_till_disconnect_mid_prompt_unwinds_the_session() {
    let sim = SimulatedTerminal::new()
        .with_script(vec![SimPrompt::AskForCopy("Print another copy?".to_string())]);
    let probe = sim.probe();
    let (addr, _adapter) = start_gateway(sim, CallbackPolicy::default()).await;

    let mut till = Till::connect(addr).await;
    till.send(r#"{"type":"Sale","amount":"5.00"}"#).await;

    // wait for the prompt, then vanish without answering
    loop {
        let (frame, _) = till.next_frame().await;
        if frame["type"] == "askForCopy" {
            break;
        }
    }
    drop(till);

    // the blocked callback resolves to its declining default and the
    // gateway tells the terminal to stand down
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let answered = *probe.answers.lock() == vec!["false".to_string()];
        if answered && probe.cancels() >= 1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "session did not unwind after disconnect"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_fresh_connection_supersedes_a_wedged_one() {
    let sim = SimulatedTerminal::new();
    let (addr, _adapter) = start_gateway(sim, CallbackPolicy::default()).await;

    // first till connects and goes silent without disconnecting
    let _stale = Till::connect(addr).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut till = Till::connect(addr).await;
    till.send(r#"{"type":"Status"}"#).await;
    let (reply, _) = till.final_reply().await;
    assert_eq!(reply["type"], "success");
    assert_eq!(reply["status"], "STATUS_READY_FOR_NEW_TRAN");
}

#[tokio::test]
async fn test_supersession_mid_prompt_frees_the_session_for_the_new_till() {
    let sim = SimulatedTerminal::new()
        .with_script(vec![SimPrompt::AskForCopy("Print another copy?".to_string())]);
    let probe = sim.probe();
    let (addr, _adapter) = start_gateway(sim, CallbackPolicy::default()).await;

    // first till reaches the copy prompt and never answers, keeping its
    // socket open the whole time
    let mut stale = Till::connect(addr).await;
    stale.send(r#"{"type":"Sale","amount":"5.00"}"#).await;
    loop {
        let (frame, _) = stale.next_frame().await;
        if frame["type"] == "askForCopy" {
            break;
        }
    }

    // a replacement till takes over and must be served promptly
    let mut till = Till::connect(addr).await;
    till.send(r#"{"type":"Status"}"#).await;
    let (reply, _) = till.final_reply().await;
    assert_eq!(reply["type"], "success");
    assert_eq!(reply["status"], "STATUS_READY_FOR_NEW_TRAN");

    // meanwhile the abandoned prompt resolved to its declining default
    // and the in-flight transaction was told to stand down
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let answered = *probe.answers.lock() == vec!["false".to_string()];
        if answered && probe.cancels() >= 1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "superseded session did not unwind"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    drop(stale);
}

#[tokio::test]
async fn test_close_connection_request_ends_the_exchange() {
    let sim = SimulatedTerminal::new();
    let (addr, _adapter) = start_gateway(sim, CallbackPolicy::default()).await;

    let mut till = Till::connect(addr).await;
    till.send(r#"{"type":"closeConnection"}"#).await;

    // the gateway closes its side; the read returns zero
    let mut chunk = [0u8; 64];
    let n = timeout(Duration::from_secs(5), till.stream.read(&mut chunk))
        .await
        .expect("timed out waiting for close")
        .unwrap();
    assert_eq!(n, 0);
}
