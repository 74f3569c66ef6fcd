use std::time::Duration;

use tokio::{net::TcpStream, time::timeout};

use crate::result::Result;

/// Opens outbound tcp connections, optionally bounded by a connect timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpPool {
    connect_timeout: Option<Duration>,
}
impl TcpPool {
    pub fn new() -> Self {
        Self {
            connect_timeout: None,
        }
    }
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(connect_timeout),
        }
    }
    pub async fn get_connection(&self, tcp_address: &str) -> Result<TcpStream> {
        let connect = TcpStream::connect(tcp_address);
        let stream = match self.connect_timeout {
            Some(limit) => timeout(limit, connect)
                .await
                .map_err(|_| format!("Timed out while connecting to stream at {tcp_address:?}"))?,
            None => connect.await,
        };
        stream.map_err(|e| {
            format!("Error while connecting to stream at {tcp_address:?} {e:?}").into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_listening_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addrs = listener.local_addr().unwrap().to_string();
        let pool = TcpPool::with_connect_timeout(Duration::from_secs(1));
        let (connected, accepted) = tokio::join!(pool.get_connection(&addrs), listener.accept());
        assert!(connected.is_ok());
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn reports_unreachable_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addrs = listener.local_addr().unwrap().to_string();
        drop(listener);
        let err = TcpPool::new().get_connection(&addrs).await.unwrap_err();
        assert!(err.to_string().contains(&addrs));
    }
}
