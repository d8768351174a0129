//! Mock Coinbase API server for testing
//!
//! Serves the two v2 endpoints the sync uses, with the same envelope as the
//! real API:
//! - GET /v2/accounts returns { pagination: { next_uri }, data: [...] }
//! - GET /v2/accounts/{id}/transactions returns { pagination: { next_uri }, data: [...] }
//!
//! Pages are selected with a `page=N` query parameter that only this mock
//! understands; the client just follows `next_uri`.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

/// Mock Coinbase server for testing
pub struct MockCoinbaseServer {
    port: u16,
    running: Arc<AtomicBool>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

/// Configuration for mock data generation
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub num_accounts: usize,
    pub num_transactions_per_account: usize,
    /// Items per page on both list endpoints
    pub page_size: usize,
    pub fail_auth: bool,
    pub rate_limit: bool,
    /// Account whose transaction listing answers with HTTP 500
    pub failing_account: Option<String>,
    /// Secret the mock recomputes CB-ACCESS-SIGN with
    pub api_secret: String,
    /// Status sent with successful list pages
    pub success_status: u16,
    /// Path every request must start with, as behind a reverse proxy.
    /// `next_uri` links are still written without it.
    pub path_prefix: Option<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            num_accounts: 3,
            num_transactions_per_account: 10,
            page_size: 25,
            fail_auth: false,
            rate_limit: false,
            failing_account: None,
            api_secret: "test_secret".to_string(),
            success_status: 200,
            path_prefix: None,
        }
    }
}

const CURRENCIES: &[(&str, &str)] = &[("BTC", "Bitcoin"), ("ETH", "Ethereum"), ("SOL", "Solana")];

// Response structures matching the real API

#[derive(Serialize)]
struct MockPagination {
    next_uri: Option<String>,
}

#[derive(Serialize)]
struct MockList<T> {
    pagination: MockPagination,
    data: Vec<T>,
}

#[derive(Serialize)]
struct MockCurrency {
    code: String,
    name: String,
}

#[derive(Serialize)]
struct MockAccount {
    id: String,
    name: String,
    currency: MockCurrency,
}

#[derive(Serialize)]
struct MockMoney {
    amount: String,
    currency: String,
}

#[derive(Serialize)]
struct MockTransaction {
    id: String,
    #[serde(rename = "type")]
    tx_type: String,
    status: String,
    amount: MockMoney,
    native_amount: MockMoney,
    created_at: String,
}

impl MockCoinbaseServer {
    /// Start a new mock server on a random available port
    pub fn start(config: MockConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();

        listener.set_nonblocking(true)?;

        let thread_handle = thread::spawn(move || {
            while running_clone.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let cfg = config.clone();
                        thread::spawn(move || {
                            handle_connection(stream, &cfg);
                        });
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(std::time::Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            port,
            running,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockCoinbaseServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_connection(mut stream: TcpStream, config: &MockConfig) {
    // The accepted socket inherits non-blocking mode on some platforms
    let _ = stream.set_nonblocking(false);
    let mut buffer = [0; 4096];

    let n = match stream.read(&mut buffer) {
        Ok(n) => n,
        Err(_) => return,
    };
    let request = String::from_utf8_lossy(&buffer[..n]);

    let first_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = first_line.split_whitespace().collect();
    if parts.len() < 2 {
        send_response(&mut stream, 400, "Bad Request", r#"{"errors": [{"id": "invalid_request"}]}"#);
        return;
    }
    let method = parts[0];
    let target = parts[1];

    let headers = parse_headers(&request);
    let header = |name: &str| headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());
    let has_valid_auth = match (
        header("cb-access-key"),
        header("cb-access-sign"),
        header("cb-access-timestamp"),
    ) {
        (Some(key), Some(sign), Some(timestamp)) => {
            key.starts_with("test_")
                && expected_signature(&config.api_secret, timestamp, method, target, "")
                    .eq_ignore_ascii_case(sign)
        }
        _ => false,
    };

    if config.fail_auth || !has_valid_auth {
        send_response(
            &mut stream,
            401,
            "Unauthorized",
            r#"{"errors": [{"id": "authentication_error", "message": "invalid api key"}]}"#,
        );
        return;
    }

    if config.rate_limit {
        send_response(
            &mut stream,
            429,
            "Too Many Requests",
            r#"{"errors": [{"id": "rate_limit_exceeded"}]}"#,
        );
        return;
    }

    if method != "GET" {
        send_response(&mut stream, 405, "Method Not Allowed", r#"{"errors": []}"#);
        return;
    }

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p, q),
        None => (target, ""),
    };
    let path = match config.path_prefix.as_deref() {
        Some(prefix) => match path.strip_prefix(prefix) {
            Some(rest) => rest,
            None => {
                send_response(&mut stream, 404, "Not Found", r#"{"errors": [{"id": "not_found"}]}"#);
                return;
            }
        },
        None => path,
    };
    let ok = config.success_status;
    let page = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("page="))
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1)
        .max(1);

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["v2", "accounts"] => {
            let accounts = generate_mock_accounts(config.num_accounts);
            let body = paginate(accounts, page, config.page_size, path);
            send_response(&mut stream, ok, "OK", &body);
        }
        ["v2", "accounts", account_id, "transactions"] => {
            if config.failing_account.as_deref() == Some(*account_id) {
                send_response(
                    &mut stream,
                    500,
                    "Internal Server Error",
                    r#"{"errors": [{"id": "internal_server_error"}]}"#,
                );
                return;
            }
            let Some(index) = account_index(account_id, config.num_accounts) else {
                send_response(&mut stream, 404, "Not Found", r#"{"errors": [{"id": "not_found"}]}"#);
                return;
            };
            let txs = generate_mock_transactions(index, config.num_transactions_per_account);
            let body = paginate(txs, page, config.page_size, path);
            send_response(&mut stream, ok, "OK", &body);
        }
        _ => {
            send_response(&mut stream, 404, "Not Found", r#"{"errors": [{"id": "not_found"}]}"#);
        }
    }
}

/// Lowercased header names with trimmed values
fn parse_headers(request: &str) -> Vec<(String, String)> {
    request
        .lines()
        .skip(1)
        .take_while(|line| !line.trim().is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_lowercase(), value.trim().to_string()))
        .collect()
}

/// hex(HMAC-SHA256(secret, timestamp + method + path?query + body))
fn expected_signature(secret: &str, timestamp: &str, method: &str, target: &str, body: &str) -> String {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(format!("{}{}{}{}", timestamp, method, target, body).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn paginate<T: Serialize>(items: Vec<T>, page: usize, page_size: usize, path: &str) -> String {
    let page_size = page_size.max(1);
    let total = items.len();
    let start = (page - 1) * page_size;
    let data: Vec<T> = items.into_iter().skip(start).take(page_size).collect();
    let next_uri = if start + page_size < total {
        Some(format!("{}?limit={}&page={}", path, page_size, page + 1))
    } else {
        None
    };
    serde_json::to_string(&MockList {
        pagination: MockPagination { next_uri },
        data,
    })
    .unwrap_or_else(|_| "{}".to_string())
}

/// "acct-3" -> Some(2) when there are at least 3 accounts
fn account_index(account_id: &str, num_accounts: usize) -> Option<usize> {
    let n: usize = account_id.strip_prefix("acct-")?.parse().ok()?;
    (1..=num_accounts).contains(&n).then(|| n - 1)
}

fn send_response(stream: &mut TcpStream, status: u16, status_text: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn generate_mock_accounts(count: usize) -> Vec<MockAccount> {
    (0..count)
        .map(|i| {
            let (code, name) = CURRENCIES[i % CURRENCIES.len()];
            MockAccount {
                id: format!("acct-{}", i + 1),
                name: format!("{} Wallet", code),
                currency: MockCurrency {
                    code: code.to_string(),
                    name: name.to_string(),
                },
            }
        })
        .collect()
}

fn generate_mock_transactions(account_index: usize, count: usize) -> Vec<MockTransaction> {
    let (code, _) = CURRENCIES[account_index % CURRENCIES.len()];
    let start = Utc
        .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);

    (0..count)
        .map(|i| {
            // Every fourth transaction sends funds out
            let (tx_type, amount, native) = if i % 4 == 3 {
                ("send", "-0.05000000", "-2500.00")
            } else {
                ("buy", "0.10000000", "5000.00")
            };
            MockTransaction {
                id: format!("tx-{}-{}", account_index + 1, i + 1),
                tx_type: tx_type.to_string(),
                status: "completed".to_string(),
                amount: MockMoney {
                    amount: amount.to_string(),
                    currency: code.to_string(),
                },
                native_amount: MockMoney {
                    amount: native.to_string(),
                    currency: "USD".to_string(),
                },
                created_at: (start + Duration::days(i as i64))
                    .format("%Y-%m-%dT%H:%M:%SZ")
                    .to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_server_starts() {
        let server = MockCoinbaseServer::start(MockConfig::default()).unwrap();
        assert!(server.port() > 0);
        assert!(server.base_url().starts_with("http://127.0.0.1:"));
    }

    #[test]
    fn test_paginate_links_next_page() {
        let items: Vec<u32> = (0..5).collect();
        let first: serde_json::Value =
            serde_json::from_str(&paginate(items.clone(), 1, 2, "/v2/accounts")).unwrap();
        assert_eq!(first["data"].as_array().unwrap().len(), 2);
        assert_eq!(first["pagination"]["next_uri"], "/v2/accounts?limit=2&page=2");

        let last: serde_json::Value =
            serde_json::from_str(&paginate(items, 3, 2, "/v2/accounts")).unwrap();
        assert_eq!(last["data"].as_array().unwrap().len(), 1);
        assert!(last["pagination"]["next_uri"].is_null());
    }

    #[test]
    fn test_expected_signature_matches_client() {
        let target = "/v2/accounts/acct-1/transactions?limit=100&page=2";
        assert_eq!(
            expected_signature("test_secret", "1700000000", "GET", target, ""),
            crate::adapters::coinbase::sign_request("test_secret", "1700000000", "GET", target, "")
                .unwrap()
        );
        assert_ne!(
            expected_signature("test_secret", "1700000000", "GET", target, ""),
            expected_signature("test_secret", "1700000001", "GET", target, "")
        );
    }

    #[test]
    fn test_parse_headers() {
        let request = "GET /v2/accounts HTTP/1.1\r\nCB-ACCESS-KEY: test_key\r\nHost: x\r\n\r\n";
        let headers = parse_headers(request);
        assert_eq!(headers[0], ("cb-access-key".to_string(), "test_key".to_string()));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_account_index() {
        assert_eq!(account_index("acct-1", 3), Some(0));
        assert_eq!(account_index("acct-3", 3), Some(2));
        assert_eq!(account_index("acct-4", 3), None);
        assert_eq!(account_index("acct-0", 3), None);
        assert_eq!(account_index("other", 3), None);
    }

    #[test]
    fn test_generated_transactions_include_sends() {
        let txs = generate_mock_transactions(0, 8);
        assert_eq!(txs.iter().filter(|t| t.tx_type == "send").count(), 2);
        assert!(txs.iter().all(|t| t.amount.currency == "BTC"));
    }
}
