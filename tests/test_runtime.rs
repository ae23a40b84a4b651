/// Full relay process over loopback: a fake gpsd feeds reports, the runtime
/// normalizes them and the fix arrives at the upstream WebSocket endpoint
/// and the point-query endpoint.

use gps_relay::codec::WireDecode;
use gps_relay::model::{Fix, SourceTag};
use gps_relay::runtime::config::PipelineConfig;
use gps_relay::RelayRuntime;

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(10);

const REPORTS: &[u8] = b"{\"class\":\"VERSION\",\"release\":\"3.22\"}\n\
{\"class\":\"TPV\",\"device\":\"/dev/ttyACM0\",\"lat\":51.5,\"lon\":-0.12,\"alt\":15.0,\"speed\":5.0,\"track\":271.26}\n\
{\"class\":\"SKY\",\"device\":\"/dev/ttyACM0\",\"satellites\":[{\"PRN\":5,\"used\":true},{\"PRN\":0,\"used\":true}]}\n\
{\"class\":\"TPV\",\"device\":\"/dev/ttyUSB9\",\"lat\":1.0,\"lon\":1.0,\"alt\":1.0,\"speed\":1.0}\n\
{\"class\":\"TPV\",\"device\":\"/dev/ttyACM1\",\"lat\":51.6,\"lon\":-0.13,\"alt\":16.0,\"speed\":5.0}\n\
{\"class\":\"SKY\",\"device\":\"/dev/ttyACM1\",\"satellites\":[{\"PRN\":8,\"used\":true},{\"PRN\":9,\"used\":false}]}\n";

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Accepts one client, checks the watch command and streams `REPORTS`,
/// then holds the connection open.
fn spawn_fake_gpsd() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        let mut watch = [0u8; 16];
        conn.read_exact(&mut watch).unwrap();
        assert!(watch.starts_with(b"?WATCH="));
        conn.write_all(REPORTS).unwrap();
        thread::sleep(Duration::from_secs(30));
    });
    port
}

async fn http_get(port: u16) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(b"GET /gps HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_gpsd_reports_reach_upstream() {
    let dir = tempfile::tempdir().unwrap();
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_port = free_port();

    let config = PipelineConfig::from_json(&format!(
        r#"{{
            "ship_id": "TESTSHIP",
            "device_id": "board-1",
            "gpsd": {{"host": "127.0.0.1", "port": {gpsd}, "reconnect_delay_ms": 50}},
            "broadcast": {{"bind": "127.0.0.1:{bcast}"}},
            "http": {{"bind": "127.0.0.1:{http}"}},
            "upstream": {{"address": "ws://{up}", "drain_send_delay_ms": 0,
                          "reconnect": {{"initial_delay_ms": 50, "max_delay_ms": 50}}}},
            "storage": {{"data_dir": {data:?}, "offline_file": {offline:?}}}
        }}"#,
        gpsd = spawn_fake_gpsd(),
        bcast = free_port(),
        http = http_port,
        up = upstream.local_addr().unwrap(),
        data = dir.path().join("data").display().to_string(),
        offline = dir.path().join("offline.json").display().to_string(),
    ))
    .unwrap();

    let runtime = RelayRuntime::new(config);
    let running = Arc::clone(&runtime);
    let run = tokio::spawn(async move { running.run().await });

    let (conn, _) = tokio::time::timeout(WAIT, upstream.accept()).await.unwrap().unwrap();
    let mut ws = tokio_tungstenite::accept_async(conn).await.unwrap();
    let text = loop {
        match tokio::time::timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap() {
            Message::Text(text) => break text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message {:?}", other),
        }
    };
    let fix = Fix::decode_frame(text.as_bytes()).unwrap();

    assert!(fix.is_complete());
    assert_eq!(fix.ship_id, "TESTSHIP");
    assert_eq!(fix.device_id, "board-1");
    assert_eq!(fix.heading, Some(271.3));
    let top = fix.snapshot(SourceTag::Top).unwrap();
    assert_eq!(top.latitude, Some(51.5));
    assert_eq!(top.speed, Some(18.0));
    assert_eq!(top.satellites, Some(2));
    assert_eq!(top.satellite_prns, vec!["5"]);
    let bottom = fix.snapshot(SourceTag::Bottom).unwrap();
    assert_eq!(bottom.altitude, Some(16.0));
    assert_eq!(bottom.satellites, Some(1));

    let response = tokio::time::timeout(WAIT, http_get(http_port)).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("\"ship_id\":\"TESTSHIP\""));

    runtime.stop();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert!(!runtime.is_running());
}
