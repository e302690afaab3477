use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
};

/// Request lines seen by [`serve`], e.g. `GET /bucket?list-type=2 HTTP/1.1`
pub type Requests = Arc<Mutex<Vec<String>>>;

/// Answers `GET` requests with the body stored under the request path, or
/// 404. The query string is ignored when looking the path up.
pub async fn serve(bodies: BTreeMap<String, Vec<u8>>) -> (u16, Requests) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Requests::default();
    let seen = requests.clone();
    let bodies = Arc::new(bodies);
    tokio::spawn(async move {
        while let Ok((conn, _)) = listener.accept().await {
            let (bodies, seen) = (bodies.clone(), seen.clone());
            tokio::spawn(async move {
                let (r, mut w) = conn.into_split();
                let mut lines = BufReader::new(r).lines();
                let Ok(Some(request)) = lines.next_line().await else {
                    return;
                };
                while let Ok(Some(header)) = lines.next_line().await {
                    if header.is_empty() {
                        break;
                    }
                }
                seen.lock().unwrap().push(request.clone());
                let target = request.split(' ').nth(1).unwrap_or("/");
                let path = target.split('?').next().unwrap_or(target);
                let response = match bodies.get(path) {
                    Some(body) => {
                        let mut head = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\
                             Last-Modified: Wed, 21 Oct 2015 07:28:00 GMT\r\n\
                             ETag: \"0\"\r\nConnection: close\r\n\r\n",
                            body.len()
                        )
                        .into_bytes();
                        head.extend(body);
                        head
                    }
                    None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_vec(),
                };
                let _ = w.write_all(&response).await;
                let _ = w.shutdown().await;
            });
        }
    });
    (port, requests)
}
