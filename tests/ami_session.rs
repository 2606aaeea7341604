//! Integration tests driving a scripted mock AMI server over a real TCP
//! socket, the way a mock WebSocket server elsewhere in this stack drives
//! its own client-facing tests: bind an ephemeral port, script the
//! request/response exchange, assert on the client's observed behavior.

use asterisk_ami::error::AmiError;
use asterisk_ami::session::{ConnectOptions, Session};
use asterisk_ami::{action, events, list_actions};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

async fn read_packet_lines(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.unwrap();
        if n == 0 {
            break;
        }
        let line = line.trim_end_matches(['\r', '\n']).to_owned();
        if line.is_empty() {
            break;
        }
        lines.push(line);
    }
    lines
}

async fn write_packet(writer: &mut tokio::net::tcp::OwnedWriteHalf, lines: &[String]) {
    let mut buf = String::new();
    for line in lines {
        buf.push_str(line);
        buf.push_str("\r\n");
    }
    buf.push_str("\r\n");
    writer.write_all(buf.as_bytes()).await.unwrap();
}

fn extract(lines: &[String], header: &str) -> Option<String> {
    let prefix = format!("{header}: ");
    lines.iter().find_map(|l| l.strip_prefix(&prefix).map(str::to_owned))
}

async fn accept_and_split(listener: &TcpListener) -> (tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf) {
    let (sock, _) = listener.accept().await.unwrap();
    sock.into_split()
}

async fn default_opts() -> ConnectOptions {
    ConnectOptions {
        username: "admin".to_owned(),
        secret: "secret".to_owned(),
        events_enabled: true,
        nonce: 7,
        default_timeout: Duration::from_secs(2),
        deferred_capacity: 64,
    }
}

#[tokio::test]
async fn login_succeeds_and_closes_cleanly() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (read_half, mut write_half) = accept_and_split(&listener).await;
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"Asterisk Call Manager/1.0\r\n").await.unwrap();
        let login = read_packet_lines(&mut reader).await;
        assert_eq!(extract(&login, "Action").as_deref(), Some("Login"));
        assert_eq!(extract(&login, "Username").as_deref(), Some("admin"));
        write_packet(&mut write_half, &["Response: Success".to_owned(), "Message: Authentication accepted".to_owned()]).await;

        let logoff = read_packet_lines(&mut reader).await;
        let action_id = extract(&logoff, "ActionID").unwrap();
        write_packet(&mut write_half, &["Response: Goodbye".to_owned(), format!("ActionID: {action_id}")]).await;
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let session = Session::connect(stream, default_opts().await).await.unwrap();
    session.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn login_failure_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (read_half, mut write_half) = accept_and_split(&listener).await;
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"Asterisk Call Manager/1.0\r\n").await.unwrap();
        let _login = read_packet_lines(&mut reader).await;
        write_packet(&mut write_half, &["Response: Error".to_owned(), "Message: Authentication failed".to_owned()]).await;
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let err = Session::connect(stream, default_opts().await).await.unwrap_err();
    assert!(matches!(err, AmiError::AuthenticationFailure(_)));
    server.await.unwrap();
}

#[tokio::test]
async fn ping_round_trips() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (read_half, mut write_half) = accept_and_split(&listener).await;
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"Asterisk Call Manager/1.0\r\n").await.unwrap();
        let _login = read_packet_lines(&mut reader).await;
        write_packet(&mut write_half, &["Response: Success".to_owned()]).await;

        let ping = read_packet_lines(&mut reader).await;
        assert_eq!(extract(&ping, "Action").as_deref(), Some("Ping"));
        let action_id = extract(&ping, "ActionID").unwrap();
        write_packet(&mut write_half, &["Response: Pong".to_owned(), format!("ActionID: {action_id}")]).await;
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let session = Session::connect(stream, default_opts().await).await.unwrap();
    action::ping(&session).await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn event_interleaved_with_an_in_flight_action_fires_its_subscriber() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (read_half, mut write_half) = accept_and_split(&listener).await;
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"Asterisk Call Manager/1.0\r\n").await.unwrap();
        let _login = read_packet_lines(&mut reader).await;
        write_packet(&mut write_half, &["Response: Success".to_owned()]).await;

        let ping = read_packet_lines(&mut reader).await;
        let action_id = extract(&ping, "ActionID").unwrap();

        write_packet(&mut write_half, &["Event: Hangup".to_owned(), "Channel: SIP/100-1".to_owned(), "Cause: 16".to_owned()]).await;
        write_packet(&mut write_half, &["Response: Pong".to_owned(), format!("ActionID: {action_id}")]).await;
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let session = Session::connect(stream, default_opts().await).await.unwrap();

    let seen: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let seen_clone = seen.clone();
    session
        .registry()
        .subscribe(
            "on_Hangup",
            Arc::new(move |msg: &events::EventMessage| {
                *seen_clone.lock().unwrap() = msg.channel.as_ref().map(|c| c.id().to_owned());
                Ok(())
            }),
        )
        .unwrap();

    action::ping(&session).await.unwrap();
    assert_eq!(seen.lock().unwrap().as_deref(), Some("SIP/100-1"));
    server.await.unwrap();
}

#[tokio::test]
async fn status_list_action_aggregates_until_the_terminator() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (read_half, mut write_half) = accept_and_split(&listener).await;
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"Asterisk Call Manager/1.0\r\n").await.unwrap();
        let _login = read_packet_lines(&mut reader).await;
        write_packet(&mut write_half, &["Response: Success".to_owned()]).await;

        let status = read_packet_lines(&mut reader).await;
        assert_eq!(extract(&status, "Action").as_deref(), Some("Status"));
        let action_id = extract(&status, "ActionID").unwrap();

        write_packet(&mut write_half, &["Response: Success".to_owned(), format!("ActionID: {action_id}"), "Message: Channel status will follow".to_owned()]).await;
        write_packet(
            &mut write_half,
            &[
                "Event: Status".to_owned(),
                format!("ActionID: {action_id}"),
                "Channel: SIP/100-1".to_owned(),
                "State: Up".to_owned(),
            ],
        )
        .await;
        write_packet(
            &mut write_half,
            &[
                "Event: Status".to_owned(),
                format!("ActionID: {action_id}"),
                "Channel: SIP/101-1".to_owned(),
                "State: Ringing".to_owned(),
            ],
        )
        .await;
        write_packet(&mut write_half, &["Event: StatusComplete".to_owned(), format!("ActionID: {action_id}"), "Items: 2".to_owned()]).await;
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let session = Session::connect(stream, default_opts().await).await.unwrap();

    let aggregate = list_actions::status(&session).await.unwrap();
    assert_eq!(aggregate.len(), 2);
    assert_eq!(aggregate.get("SIP/100-1").unwrap().get("State").map(String::as_str), Some("Up"));
    assert_eq!(aggregate.get("SIP/101-1").unwrap().get("State").map(String::as_str), Some("Ringing"));
    server.await.unwrap();
}

#[tokio::test]
async fn command_action_returns_follows_body_lines() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (read_half, mut write_half) = accept_and_split(&listener).await;
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"Asterisk Call Manager/1.0\r\n").await.unwrap();
        let _login = read_packet_lines(&mut reader).await;
        write_packet(&mut write_half, &["Response: Success".to_owned()]).await;

        let command = read_packet_lines(&mut reader).await;
        assert_eq!(extract(&command, "Action").as_deref(), Some("Command"));
        assert_eq!(extract(&command, "Command").as_deref(), Some("core show channels"));
        let action_id = extract(&command, "ActionID").unwrap();

        let mut buf = String::new();
        buf.push_str("Response: Follows\r\n");
        buf.push_str(&format!("ActionID: {action_id}\r\n"));
        buf.push_str("Channel              Location             State\r\n");
        buf.push_str("SIP/100-1            100@default:1        Up\r\n");
        buf.push_str("--END COMMAND--\r\n");
        buf.push_str("\r\n");
        write_half.write_all(buf.as_bytes()).await.unwrap();
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let session = Session::connect(stream, default_opts().await).await.unwrap();

    let lines = action::command(&session, "core show channels").await.unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("Channel"));
    server.await.unwrap();
}
