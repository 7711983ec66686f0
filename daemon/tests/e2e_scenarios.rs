//! End-to-end scenarios over loopback TCP.
//!
//! Everything shares one daemon inside one test function: the reaper
//! sweeps `waitpid(-1)`, so a second daemon in the same process would
//! steal exits from the first.

#![cfg(unix)]

use std::time::{Duration, Instant};

use daemon::Daemon;
use ipc::IpcClient;
use schema::{ClientConfig, DaemonConfig, Request, Response, StartRequest, StdioRole};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn client_config() -> ClientConfig {
    ClientConfig {
        retries: 3,
        retry_delay_ms: 50,
    }
}

fn start_request(cmd: &str, alias: &str) -> Request {
    Request::Start(StartRequest {
        cmd: cmd.to_string(),
        alias: alias.to_string(),
        ..Default::default()
    })
}

async fn ack_message(client: &IpcClient, request: Request) -> String {
    match client.send_request(&request).await.expect("request") {
        Response::Ack { message } => message,
        other => panic!("expected ack, got {other:?}"),
    }
}

async fn ps_len(client: &IpcClient) -> usize {
    match client.send_request(&Request::Ps).await.expect("ps") {
        Response::Procs { procs } => procs.len(),
        other => panic!("expected procs, got {other:?}"),
    }
}

async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if check().await {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_server_scenarios() {
    let daemon = Daemon::bind(DaemonConfig {
        listen: "127.0.0.1:0".to_string(),
        ..Default::default()
    })
    .await
    .expect("bind daemon");
    let addr = daemon.local_addr().to_string();
    let serve = tokio::spawn(daemon.serve());
    let client = IpcClient::new(addr.clone(), &client_config());

    // Launch, observe, terminate, and watch the reaper clean up.
    match client
        .send_with_retry(&start_request("sleep 30", "s1"))
        .await
        .expect("start")
    {
        Response::Started { pid, status, .. } => {
            assert!(pid > 0, "status: {status}");
            assert!(status.contains("STARTED:"));
            assert!(status.contains("alias=s1"));
        }
        other => panic!("expected started, got {other:?}"),
    }
    assert_eq!(
        ack_message(
            &client,
            Request::Isrunning {
                alias: "s1".to_string()
            }
        )
        .await,
        "running"
    );
    match client.send_request(&Request::Ps).await.expect("ps") {
        Response::Procs { procs } => {
            assert_eq!(procs.len(), 1);
            assert_eq!(procs[0].alias, "s1");
            assert_eq!(procs[0].cmd, "sleep 30");
            assert_eq!(procs[0].status, "running");
        }
        other => panic!("expected procs, got {other:?}"),
    }
    assert_eq!(
        ack_message(
            &client,
            Request::Sigterm {
                alias: "s1".to_string()
            }
        )
        .await,
        "sigterm OK"
    );
    wait_until("s1 to be reaped", || async {
        ps_len(&client).await == 0
    })
    .await;
    assert_eq!(
        ack_message(
            &client,
            Request::Isrunning {
                alias: "s1".to_string()
            }
        )
        .await,
        "not running"
    );

    // Signalling an unknown alias fails cleanly and changes nothing.
    assert_eq!(
        ack_message(
            &client,
            Request::Kill {
                alias: "ghost".to_string(),
                signum: 15
            }
        )
        .await,
        "kill FAILED"
    );
    assert_eq!(ps_len(&client).await, 0);

    // Malformed requests are rejected before any side effect.
    for request in [
        start_request("", "a"),
        start_request("sleep 1", ""),
        Request::Kill {
            alias: String::new(),
            signum: 15,
        },
    ] {
        match client.send_request(&request).await.expect("request") {
            Response::Error { message } => {
                assert!(message.starts_with("SYNTAX ERROR:"), "got: {message}")
            }
            other => panic!("expected error, got {other:?}"),
        }
    }
    assert_eq!(ps_len(&client).await, 0);

    // which resolves through PATH and falls back to the name.
    match client
        .send_request(&Request::Which {
            name: "sh".to_string(),
        })
        .await
        .expect("which")
    {
        Response::Which { path } => {
            assert!(path.ends_with("sh"));
            assert!(path.starts_with('/'));
        }
        other => panic!("expected which, got {other:?}"),
    }
    match client
        .send_request(&Request::Which {
            name: "no-such-tool-xyz".to_string(),
        })
        .await
        .expect("which")
    {
        Response::Which { path } => assert_eq!(path, "no-such-tool-xyz"),
        other => panic!("expected which, got {other:?}"),
    }

    // sysinfo answers with a populated snapshot.
    match client.send_request(&Request::Sysinfo).await.expect("sysinfo") {
        Response::Sysinfo(info) => {
            assert!(info.cpu_count >= 1);
            assert!(!info.os.is_empty());
        }
        other => panic!("expected sysinfo, got {other:?}"),
    }

    // Stdio hub: output fans out to the terminal, keystrokes reach
    // the input drain, and closing the output side ends the session.
    let session = "test/0/hub-0";
    let mut output = ipc::connect_attach(&addr, session, StdioRole::Output, &client_config())
        .await
        .expect("attach output");
    let mut terminal = ipc::connect_attach(&addr, session, StdioRole::Terminal, &client_config())
        .await
        .expect("attach terminal");

    output.write_all(b"hello from command\n").await.expect("send output");
    let mut buf = vec![0_u8; 64];
    let n = terminal.read(&mut buf).await.expect("terminal read");
    assert_eq!(&buf[..n], b"hello from command\n");

    terminal.write_all(b"keys\n").await.expect("send keys");
    let mut input = ipc::connect_attach(&addr, session, StdioRole::Input, &client_config())
        .await
        .expect("attach input");
    let n = input.read(&mut buf).await.expect("input read");
    assert_eq!(&buf[..n], b"keys\n");

    // Command side closing tears the session down for everyone.
    drop(output);
    let n = terminal.read(&mut buf).await.expect("terminal eof");
    assert_eq!(n, 0);
    let n = input.read(&mut buf).await.expect("input eof");
    assert_eq!(n, 0);

    // Several children, blanket termination, then daemon exit.
    for alias in ["a", "b", "c"] {
        match client
            .send_request(&start_request("sleep 30", alias))
            .await
            .expect("start")
        {
            Response::Started { pid, .. } => assert!(pid > 0),
            other => panic!("expected started, got {other:?}"),
        }
    }
    assert_eq!(ps_len(&client).await, 3);
    assert_eq!(
        ack_message(&client, Request::Sigtermall).await,
        "sigtermall OK"
    );
    wait_until("all children to be reaped", || async {
        ps_len(&client).await == 0
    })
    .await;

    assert_eq!(ack_message(&client, Request::Exit).await, "exit OK");
    let served = tokio::time::timeout(Duration::from_secs(5), serve)
        .await
        .expect("serve to stop")
        .expect("serve task");
    assert!(served.is_ok());
}
