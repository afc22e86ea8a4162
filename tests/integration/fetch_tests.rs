//! Body size limits on responses without a usable Content-Length

use source_sentinel::config::{FetcherConfig, UserAgentConfig};
use source_sentinel::crawler::{FetchFailure, Fetcher};
use source_sentinel::url::content_checksum;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

/// Serves every connection a chunked body of `chunks` × `chunk_size` bytes
async fn serve_chunked(chunks: usize, chunk_size: usize) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;

            let mut response = b"HTTP/1.1 200 OK\r\n\
                Content-Type: text/plain\r\n\
                Transfer-Encoding: chunked\r\n\
                Connection: close\r\n\r\n"
                .to_vec();
            for _ in 0..chunks {
                response.extend_from_slice(format!("{:x}\r\n", chunk_size).as_bytes());
                response.extend(std::iter::repeat(b'a').take(chunk_size));
                response.extend_from_slice(b"\r\n");
            }
            response.extend_from_slice(b"0\r\n\r\n");

            // The client may hang up early once it has seen enough
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
        }
    });

    Url::parse(&format!("http://{}/stream", addr)).unwrap()
}

fn fetcher(max_body_bytes: usize) -> Fetcher {
    let config = FetcherConfig {
        timeout_secs: 5,
        max_body_bytes,
        ..Default::default()
    };
    Fetcher::new(&UserAgentConfig::default(), &config).unwrap()
}

#[tokio::test]
async fn test_chunked_body_over_limit_is_rejected() {
    let url = serve_chunked(10, 1024).await;
    let result = fetcher(4096).fetch(&url).await;
    assert!(matches!(result, Err(FetchFailure::ContentRejected(_))), "{:?}", result);
}

#[tokio::test]
async fn test_chunked_body_within_limit_is_returned() {
    let url = serve_chunked(2, 512).await;
    let page = fetcher(4096).fetch(&url).await.unwrap();
    assert_eq!(page.body.len(), 1024);
    assert_eq!(page.checksum, content_checksum(&page.body));
    assert_eq!(page.content_type.as_deref(), Some("text/plain"));
}

#[tokio::test]
async fn test_text_fetch_honors_the_limit() {
    let url = serve_chunked(10, 1024).await;
    let result = fetcher(4096).fetch_text(&url).await;
    assert!(matches!(result, Err(FetchFailure::ContentRejected(_))), "{:?}", result);
}
