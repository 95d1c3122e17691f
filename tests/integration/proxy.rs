//! End-to-end tests against an in-process proxy and fake backends

use aegis::protocol::capabilities::DEFAULT_CAPABILITIES;
use aegis::protocol::packets::{parse_eof_status, parse_err};
use aegis::protocol::status::SERVER_STATUS_AUTOCOMMIT;
use aegis::protocol::{is_eof_packet, is_err_packet, is_ok_packet, Field, Resultset, Value};

use crate::{FakeBackend, TestClient, TestProxy, PROXY_PASSWORD};

/// Read column definitions up to EOF, then rows up to EOF
async fn read_resultset(client: &mut TestClient, first: bytes::Bytes) -> (Resultset, u16) {
    let mut fields = Vec::new();
    loop {
        let packet = client.next().await;
        if is_eof_packet(&packet) {
            break;
        }
        fields.push(Field::parse(packet).unwrap());
    }
    assert_eq!(fields.len(), first[0] as usize);

    let mut rs = Resultset::new(fields);
    loop {
        let packet = client.next().await;
        if is_eof_packet(&packet) {
            return (rs, parse_eof_status(&packet));
        }
        rs.push_row(packet, false).unwrap();
    }
}

#[tokio::test]
async fn test_select_one() {
    let backend = FakeBackend::start().await;
    let proxy = TestProxy::start(backend.addr, &[], 0).await;

    let (mut client, reply) = TestClient::login(proxy.addr, PROXY_PASSWORD, None).await;
    assert!(is_ok_packet(&reply));

    let first = client.query("SELECT 1").await;
    let (rs, status) = read_resultset(&mut client, first).await;
    assert_eq!(rs.column_count(), 1);
    assert_eq!(rs.row_count(), 1);
    assert_eq!(rs.value(0, 0).and_then(Value::as_i64), Some(1));
    assert_ne!(status & SERVER_STATUS_AUTOCOMMIT, 0);

    assert!(backend.seen().contains(&"0x03:SELECT 1".to_string()));
    proxy.stop().await;
}

#[tokio::test]
async fn test_reads_go_to_slaves_and_locking_reads_to_master() {
    let master = FakeBackend::start().await;
    let slave = FakeBackend::start().await;
    let proxy = TestProxy::start(master.addr, &[(slave.addr, 1)], 0).await;

    let (mut client, _) = TestClient::login(proxy.addr, PROXY_PASSWORD, None).await;

    let first = client.query("SELECT id FROM t").await;
    read_resultset(&mut client, first).await;
    let first = client.query("SELECT id FROM t LOCK IN SHARE MODE").await;
    read_resultset(&mut client, first).await;

    assert_eq!(slave.seen(), vec!["0x03:SELECT id FROM t".to_string()]);
    assert_eq!(
        master.seen(),
        vec!["0x03:SELECT id FROM t LOCK IN SHARE MODE".to_string()]
    );
    proxy.stop().await;
}

#[tokio::test]
async fn test_use_database_is_applied_on_backend() {
    let backend = FakeBackend::start().await;
    let proxy = TestProxy::start(backend.addr, &[], 0).await;

    let (mut client, _) = TestClient::login(proxy.addr, PROXY_PASSWORD, None).await;
    assert!(is_ok_packet(&client.query("USE `shop`").await));

    let first = client.query("SHOW TABLES").await;
    read_resultset(&mut client, first).await;

    assert_eq!(
        backend.seen(),
        vec!["0x02:shop".to_string(), "0x03:SHOW TABLES".to_string()]
    );
    proxy.stop().await;
}

#[tokio::test]
async fn test_unknown_command_keeps_connection_usable() {
    let backend = FakeBackend::start().await;
    let proxy = TestProxy::start(backend.addr, &[], 0).await;

    let (mut client, _) = TestClient::login(proxy.addr, PROXY_PASSWORD, None).await;
    let reply = client.command(0x1f, &[]).await;
    assert!(is_err_packet(&reply));
    let err = parse_err(&reply, DEFAULT_CAPABILITIES).unwrap();
    assert_eq!(err.code, 1105);
    assert!(err.message.contains("not supported"));

    assert!(is_ok_packet(&client.command(0x0e, &[]).await));
    proxy.stop().await;
}

#[tokio::test]
async fn test_writes_are_rejected() {
    let backend = FakeBackend::start().await;
    let proxy = TestProxy::start(backend.addr, &[], 0).await;

    let (mut client, _) = TestClient::login(proxy.addr, PROXY_PASSWORD, None).await;
    let reply = client.query("UPDATE t SET a = 1").await;
    let err = parse_err(&reply, DEFAULT_CAPABILITIES).unwrap();
    assert_eq!(err.code, 1105);
    assert!(err.message.contains("not supported"));

    let reply = client.query("SELECT FROM WHERE").await;
    let err = parse_err(&reply, DEFAULT_CAPABILITIES).unwrap();
    assert_eq!(err.code, 1064);

    assert!(backend.seen().is_empty());
    proxy.stop().await;
}

#[tokio::test]
async fn test_wrong_password_denied() {
    let backend = FakeBackend::start().await;
    let proxy = TestProxy::start(backend.addr, &[], 0).await;

    let (_client, reply) = TestClient::login(proxy.addr, "wrong", None).await;
    assert!(is_err_packet(&reply));
    let err = parse_err(&reply, DEFAULT_CAPABILITIES).unwrap();
    assert_eq!(err.code, 1045);
    assert!(err.message.starts_with("Access denied for user 'root'@'127.0.0.1'"));
    proxy.stop().await;
}

#[tokio::test]
async fn test_per_ip_limit() {
    let backend = FakeBackend::start().await;
    let proxy = TestProxy::start(backend.addr, &[], 1).await;

    let (mut first, reply) = TestClient::login(proxy.addr, PROXY_PASSWORD, None).await;
    assert!(is_ok_packet(&reply));

    let mut second =
        aegis::protocol::PacketStream::new(tokio::net::TcpStream::connect(proxy.addr).await.unwrap());
    let reply = second.read_packet().await.unwrap();
    assert!(is_err_packet(&reply));
    assert_eq!(parse_err(&reply, 0).unwrap().code, 1203);

    // The admitted client is unaffected
    assert!(is_ok_packet(&first.command(0x0e, &[]).await));
    proxy.stop().await;
}

#[tokio::test]
async fn test_show_proxy_status() {
    let master = FakeBackend::start().await;
    let slave = FakeBackend::start().await;
    let proxy = TestProxy::start(master.addr, &[(slave.addr, 3)], 0).await;

    let (mut client, _) = TestClient::login(proxy.addr, PROXY_PASSWORD, None).await;
    let first = client.query("show proxy status").await;
    let (rs, _) = read_resultset(&mut client, first).await;

    assert_eq!(rs.row_count(), 1);
    assert_eq!(
        rs.value_by_name(0, "Version").and_then(Value::as_str),
        Some(env!("CARGO_PKG_VERSION"))
    );
    let master_addr = master.addr.to_string();
    let slave_addr = slave.addr.to_string();
    assert_eq!(
        rs.value_by_name(0, "Master").and_then(Value::as_str),
        Some(master_addr.as_str())
    );
    assert_eq!(
        rs.value_by_name(0, "Slaves").and_then(Value::as_str),
        Some(slave_addr.as_str())
    );
    assert!(master.seen().is_empty());
    proxy.stop().await;
}
