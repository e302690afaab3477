use std::collections::{BTreeMap, BTreeSet};

use bioimage_datasets::{
    download::{download_ftp_files, download_ftp_matching, FtpClient},
    error::UsageError,
    DatasetError,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{tcp::OwnedWriteHalf, TcpListener},
    task::JoinHandle,
};

type Files = BTreeMap<String, Vec<u8>>;

fn files(entries: &[(&str, &[u8])]) -> Files {
    entries
        .iter()
        .map(|(path, content)| (path.to_string(), content.to_vec()))
        .collect()
}

fn resolve(cwd: &str, arg: &str) -> String {
    let path = if arg.starts_with('/') {
        arg.to_string()
    } else if arg == ".." {
        cwd.rsplit_once('/').map(|(p, _)| p.to_string()).unwrap_or_default()
    } else {
        format!("{}/{arg}", cwd.trim_end_matches('/'))
    };
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn children(files: &Files, dir: &str) -> BTreeSet<String> {
    let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
    files
        .keys()
        .filter_map(|path| path.strip_prefix(&prefix))
        .filter_map(|rest| rest.split('/').next())
        .map(str::to_string)
        .collect()
}

fn is_dir(files: &Files, path: &str) -> bool {
    path == "/" || !children(files, path).is_empty()
}

async fn reply(w: &mut OwnedWriteHalf, line: &str) {
    w.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
}

/// Serves one control connection over an in-memory file tree
async fn start_server(files: Files) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (control, _) = listener.accept().await.unwrap();
        let (r, mut w) = control.into_split();
        let mut lines = BufReader::new(r).lines();
        let mut commands = Vec::new();
        let mut cwd = "/".to_string();
        let mut passive: Option<TcpListener> = None;
        w.write_all(b"220-Welcome\r\n Test server\r\n220 ready\r\n")
            .await
            .unwrap();
        while let Ok(Some(line)) = lines.next_line().await {
            commands.push(line.clone());
            let (cmd, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            match cmd {
                "USER" => reply(&mut w, "331 password please").await,
                "PASS" => reply(&mut w, "230-Logged in\r\n230 ok").await,
                "TYPE" => reply(&mut w, "200 binary").await,
                "CWD" => {
                    let target = resolve(&cwd, arg);
                    if is_dir(&files, &target) {
                        cwd = target;
                        reply(&mut w, "250 ok").await;
                    } else {
                        reply(&mut w, "550 not a directory").await;
                    }
                }
                "PASV" => {
                    let data = TcpListener::bind("127.0.0.1:0").await.unwrap();
                    let p = data.local_addr().unwrap().port();
                    passive = Some(data);
                    reply(
                        &mut w,
                        &format!("227 Entering Passive Mode (127,0,0,1,{},{})", p >> 8, p & 0xff),
                    )
                    .await;
                }
                "NLST" | "RETR" => {
                    let content = if cmd == "NLST" {
                        let names: Vec<_> = children(&files, &cwd).into_iter().collect();
                        Some(names.join("\r\n").into_bytes())
                    } else {
                        files.get(&resolve(&cwd, arg)).cloned()
                    };
                    let data = passive.take().unwrap();
                    let Some(content) = content else {
                        reply(&mut w, "550 no such file").await;
                        continue;
                    };
                    reply(&mut w, "150 opening data connection").await;
                    let (mut stream, _) = data.accept().await.unwrap();
                    stream.write_all(&content).await.unwrap();
                    stream.shutdown().await.unwrap();
                    drop(stream);
                    reply(&mut w, "226 transfer complete").await;
                }
                "QUIT" => {
                    reply(&mut w, "221 bye").await;
                    break;
                }
                _ => reply(&mut w, "502 not implemented").await,
            }
        }
        commands
    });
    (port, handle)
}

#[tokio::test]
async fn mirror_directory_tree() {
    let (port, server) = start_server(files(&[
        ("/empiar/data/a.dm3", b"A"),
        ("/empiar/data/grid/b.dm3", b"BB"),
        ("/empiar/other/c.dm3", b"C"),
    ]))
    .await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("empiar_11759_dataset");

    let mut client = FtpClient::connect("127.0.0.1", port).await.unwrap();
    client.login_anonymous().await.unwrap();
    let fetched = download_ftp_files(&mut client, "/empiar/data/", &local, 8192)
        .await
        .unwrap();
    client.quit().await.unwrap();

    assert_eq!(fetched, 2);
    assert_eq!(std::fs::read(local.join("a.dm3")).unwrap(), b"A");
    assert_eq!(std::fs::read(local.join("grid/b.dm3")).unwrap(), b"BB");
    assert!(!local.join("c.dm3").exists());
    let commands = server.await.unwrap();
    assert!(commands.contains(&"TYPE I".to_string()));
    assert!(commands.contains(&"PASS anonymous@".to_string()));
}

#[tokio::test]
async fn download_matching_files() {
    let (port, server) = start_server(files(&[
        ("/idr/Figure_S3B_FIB-SEM_U2OS_20x20x20nm_xy.tif", b"tif1"),
        ("/idr/Figure_S3B_FIB-SEM_U2OS_20x20x20nm_xz.tif", b"tif2"),
        ("/idr/README.txt", b"read me"),
    ]))
    .await;
    let dir = tempfile::tempdir().unwrap();

    let mut client = FtpClient::connect("127.0.0.1", port).await.unwrap();
    client.login_anonymous().await.unwrap();
    let saved = download_ftp_matching(
        &mut client,
        "/idr",
        "Figure_S3B_FIB-SEM_U2OS_*.tif",
        dir.path(),
        8192,
    )
    .await
    .unwrap();
    client.quit().await.unwrap();
    server.await.unwrap();

    assert_eq!(saved.len(), 2);
    assert_eq!(
        std::fs::read(dir.path().join("Figure_S3B_FIB-SEM_U2OS_20x20x20nm_xz.tif")).unwrap(),
        b"tif2"
    );
    assert!(!dir.path().join("README.txt").exists());
}

#[tokio::test]
async fn failed_cwd_and_transfer_before_login() {
    let (port, server) = start_server(files(&[("/pub/a", b"a")])).await;
    let mut client = FtpClient::connect("127.0.0.1", port).await.unwrap();
    assert!(matches!(
        client.nlst().await,
        Err(DatasetError::UsageError(UsageError::FtpNotLoggedIn))
    ));
    client.login_anonymous().await.unwrap();
    assert!(matches!(
        client.cwd("/missing").await,
        Err(DatasetError::FtpError { code: 550, .. })
    ));
    client.cwd("/pub").await.unwrap();
    assert_eq!(client.nlst().await.unwrap(), ["a"]);
    client.quit().await.unwrap();
    server.await.unwrap();
}
