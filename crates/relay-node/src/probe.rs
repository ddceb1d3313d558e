use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// TCP-connect probe against a camera's network endpoint.
///
/// Timeout, refusal and every other socket error look the same to the
/// caller, which only decides between "proceed" and "retry later". The
/// socket is dropped on every path and no data is sent.
pub async fn host_is_up(host: &str, port: u16, limit: Duration) -> bool {
  matches!(timeout(limit, TcpStream::connect((host, port))).await, Ok(Ok(_)))
}
