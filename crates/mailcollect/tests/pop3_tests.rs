//! POP3 collector against an in-process plaintext server.

use std::time::Duration;

use futures_util::StreamExt;
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use mailcollect::collector::{Collector, Pop3Collector, Pop3Config};
use mailcollect::model::{CollectOptions, EmailFilter};

const PASSWORD: &str = "pw";

fn raw_message(index: usize, subject: &str) -> String {
    format!(
        "From: Sender <sender@example.com>\r\n\
         To: me@example.com\r\n\
         Subject: {subject}\r\n\
         Date: Fri, 15 Mar 2024 10:30:00 +0000\r\n\
         Message-ID: <msg{index}@example.com>\r\n\
         \r\n\
         Body of {subject}\r\n\
         ..leading dot line\r\n",
        subject = subject,
        index = index
    )
}

/// Serves one session over `messages` and returns the commands received.
async fn serve(messages: Vec<String>) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut received = Vec::new();

        write.write_all(b"+OK POP3 ready\r\n").await.unwrap();
        while let Ok(Some(line)) = lines.next_line().await {
            received.push(line.clone());
            let mut parts = line.splitn(2, ' ');
            let verb = parts.next().unwrap_or_default().to_ascii_uppercase();
            let arg = parts.next().unwrap_or_default();

            let reply = match verb.as_str() {
                "USER" => "+OK\r\n".to_string(),
                "PASS" if arg == PASSWORD => "+OK logged in\r\n".to_string(),
                "PASS" => "-ERR invalid password\r\n".to_string(),
                "STAT" => format!("+OK {} 1000\r\n", messages.len()),
                "RETR" => match arg.parse::<usize>().ok().and_then(|i| messages.get(i - 1)) {
                    Some(body) => format!("+OK message follows\r\n{}.\r\n", body),
                    None => "-ERR no such message\r\n".to_string(),
                },
                "NOOP" => "+OK\r\n".to_string(),
                "QUIT" => {
                    write.write_all(b"+OK bye\r\n").await.unwrap();
                    break;
                }
                _ => "-ERR unknown command\r\n".to_string(),
            };
            write.write_all(reply.as_bytes()).await.unwrap();
        }
        received
    });

    (port, handle)
}

fn collector(port: u16, password: &str) -> Pop3Collector {
    let mut config = Pop3Config::new("127.0.0.1", "me", SecretString::from(password.to_string()));
    config.port = port;
    config.use_tls = false;
    config.timeout = Duration::from_secs(5);
    Pop3Collector::new(config).unwrap()
}

#[tokio::test]
async fn test_collect_scans_window_then_filters() {
    let (port, server) = serve(vec![
        raw_message(1, "Invoice 1"),
        raw_message(2, "Lunch"),
        raw_message(3, "Invoice 3"),
    ])
    .await;

    let filter = EmailFilter {
        subject_contains: Some("invoice".to_string()),
        max_results: Some(2),
        ..Default::default()
    };
    let result = collector(port, PASSWORD)
        .collect(&filter, &CollectOptions::default())
        .await;

    assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
    assert_eq!(result.total_count, 3);
    assert_eq!(result.messages.len(), 1);
    let message = &result.messages[0];
    assert_eq!(message.subject, "Invoice 1");
    assert_eq!(message.source_folder.as_deref(), Some("INBOX"));
    assert!(message
        .body_text
        .as_deref()
        .unwrap()
        .contains("\n.leading dot line"));

    let commands = server.await.unwrap();
    assert_eq!(commands, vec!["USER me", "PASS pw", "STAT", "RETR 1", "RETR 2", "QUIT"]);
}

#[tokio::test]
async fn test_wrong_password_is_reported_as_connection_error() {
    let (port, server) = serve(vec![raw_message(1, "Hello")]).await;

    let result = collector(port, "wrong")
        .collect(&EmailFilter::default(), &CollectOptions::default())
        .await;

    assert!(result.messages.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("Connection error"));

    let commands = server.await.unwrap();
    assert_eq!(commands.last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn test_stream_yields_every_message() {
    let (port, server) = serve(vec![raw_message(1, "One"), raw_message(2, "Two")]).await;

    let pop3 = collector(port, PASSWORD);
    let filter = EmailFilter::default();
    let options = CollectOptions::default();
    let subjects: Vec<String> = pop3
        .collect_stream(&filter, &options)
        .map(|item| item.unwrap().subject)
        .collect()
        .await;

    assert_eq!(subjects, vec!["One", "Two"]);
    server.await.unwrap();
}

#[tokio::test]
async fn test_stream_keeps_ids_unique_for_copies() {
    let copy = raw_message(7, "Forwarded twice");
    let (port, server) = serve(vec![copy.clone(), copy]).await;

    let pop3 = collector(port, PASSWORD);
    let filter = EmailFilter::default();
    let options = CollectOptions::default();
    let ids: Vec<String> = pop3
        .collect_stream(&filter, &options)
        .map(|item| item.unwrap().id)
        .collect()
        .await;

    assert_eq!(ids, vec!["<msg7@example.com>", "pop3-2"]);
    server.await.unwrap();
}

#[tokio::test]
async fn test_connection_check_logs_in_and_out() {
    let (port, server) = serve(Vec::new()).await;

    assert!(collector(port, PASSWORD).test_connection().await);
    let commands = server.await.unwrap();
    assert_eq!(commands, vec!["USER me", "PASS pw", "QUIT"]);
}
