//! End-to-end SCPI exchange over a real TCP socket.
//!
//! A tokio task plays a line-oriented instrument on a loopback listener;
//! the session and driver layers connect to it through the same resource
//! strings an operator would put in the config file.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use rf_bench::error::ScpiError;
use rf_bench::instruments::{NetworkAnalyzer, PnaX};
use rf_bench::measurement::SweepPlan;
use rf_bench::scpi::ScpiSession;
use rf_bench::visa::ResourceAddr;

const TIMEOUT: Duration = Duration::from_secs(2);

/// Serves one connection, answering queries from a fixed table. Commands
/// without a `?` are accepted silently, like a real instrument.
async fn serve_fake_analyzer(listener: TcpListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply: Option<&str> = match line.trim() {
            "*IDN?" => Some("Keysight Technologies,N5245A,MY00000001,A.09.90.20"),
            "*OPC?" => Some("1"),
            "SYST:ERR?" => Some("+0,\"No error\""),
            "SENS:FREQ:STAR?" => Some("+1.00000000E+09"),
            "SENS:FREQ:STOP?" => Some("+2.00000000E+09"),
            "SENS:SWE:POIN?" => Some("+3"),
            "CALC:DATA? SDATA" => Some("0.5,0.0,0.25,-0.25,0.1,0.0"),
            _ => None,
        };
        if let Some(reply) = reply {
            writer.write_all(reply.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
        }
    }
}

async fn spawn_fake_analyzer() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(serve_fake_analyzer(listener));
    port
}

#[tokio::test]
async fn session_identifies_over_socket_resource() {
    let port = spawn_fake_analyzer().await;
    let addr: ResourceAddr = format!("TCPIP0::127.0.0.1::{port}::SOCKET")
        .parse()
        .unwrap();

    let session = ScpiSession::connect(&addr, TIMEOUT).await.unwrap();
    let identity = session.identify().await.unwrap();
    assert_eq!(identity.manufacturer, "Keysight Technologies");
    assert_eq!(identity.model, "N5245A");

    let errors = session.drain_errors().await.unwrap();
    assert!(errors.is_empty());
}

#[tokio::test]
async fn host_port_shorthand_reaches_the_same_socket() {
    let port = spawn_fake_analyzer().await;
    let addr: ResourceAddr = format!("127.0.0.1:{port}").parse().unwrap();

    let session = ScpiSession::connect(&addr, TIMEOUT).await.unwrap();
    session.wait_complete().await.unwrap();
}

#[tokio::test]
async fn pnax_sweeps_over_a_real_socket() {
    let port = spawn_fake_analyzer().await;
    let addr: ResourceAddr = format!("TCPIP0::127.0.0.1::{port}::SOCKET")
        .parse()
        .unwrap();

    let vna = PnaX::connect(&addr, TIMEOUT).await.unwrap();
    assert_eq!(vna.identity().unwrap().model, "N5245A");

    let plan = SweepPlan::new(1.0e9, 2.0e9, 3).unwrap();
    vna.configure_sweep(&plan).await.unwrap();
    vna.define_measurement("gain", "S21".parse().unwrap())
        .await
        .unwrap();

    let trace = vna.acquire("gain").await.unwrap();
    assert_eq!(trace.len(), 3);
    assert_eq!(trace.frequencies_hz(), vec![1.0e9, 1.5e9, 2.0e9]);
    assert_eq!(
        trace.values()[1],
        num_complex::Complex64::new(0.25, -0.25)
    );
}

#[tokio::test]
async fn connecting_to_a_closed_port_fails() {
    // Bind then drop, so the port is known free.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let addr: ResourceAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let err = ScpiSession::connect(&addr, Duration::from_millis(500))
        .await
        .err();
    assert!(err.is_some());
}

#[tokio::test]
async fn silent_instrument_times_out_instead_of_hanging() {
    // Accepts the connection but never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let addr: ResourceAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let session = ScpiSession::connect(&addr, Duration::from_millis(100))
        .await
        .unwrap();
    let err = session.query("*IDN?").await.unwrap_err();
    assert!(matches!(err, ScpiError::Timeout { .. }), "{err}");
}
