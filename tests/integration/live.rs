//! Tests against a running proxy in front of a real MySQL server

use mysql::prelude::*;

use crate::{assert_query_error, get_proxy_config, skip_if_not_enabled};

#[test]
fn test_select_through_proxy() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let one: Option<i64> = conn.query_first("SELECT 1").expect("SELECT 1 should succeed");
    assert_eq!(one, Some(1));
}

#[test]
fn test_proxy_status() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let row: Option<(String, String, String, String)> = conn
        .query_first("SHOW PROXY STATUS")
        .expect("SHOW PROXY STATUS should succeed");
    let (version, _commit, master, slaves) = row.expect("one status row");
    assert!(!version.is_empty());
    assert!(!master.is_empty());
    assert!(!slaves.is_empty());
}

#[test]
fn test_use_then_select() {
    skip_if_not_enabled!();

    let config = get_proxy_config();
    let mut conn = config.conn();
    conn.query_drop(format!("USE {}", config.database))
        .expect("USE should succeed");
    let db: Option<String> = conn
        .query_first("SELECT DATABASE()")
        .expect("SELECT DATABASE() should succeed");
    assert_eq!(db.as_deref(), Some(config.database.as_str()));
}

#[test]
fn test_write_is_rejected() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let result = conn.query_drop("DELETE FROM aegis_missing_table");
    assert_query_error(result, 1105, "not supported");
}
