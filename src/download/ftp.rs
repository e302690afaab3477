use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Instant,
};

use glob::Pattern;
use log::{debug, info, warn};
use tokio::{
    fs,
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
    net::TcpStream,
};

use super::part_path;
use crate::{
    error::{DatasetError, DatasetResult, UsageError},
    util::elapsed_secs,
};

/// A complete server reply. Multi-line replies have their lines joined by `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub message: String,
}

impl Reply {
    fn into_error(self) -> DatasetError {
        DatasetError::FtpError {
            code: self.code,
            message: self.message,
        }
    }
}

fn reply_code(line: &str) -> Option<u16> {
    let code = line.get(..3)?;
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    code.parse().ok()
}

/// Port of a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply
fn passive_port(message: &str) -> Option<u16> {
    let numbers = message
        .split(|c: char| !(c.is_ascii_digit() || c == ','))
        .find(|s| s.matches(',').count() == 5)?
        .split(',')
        .map(str::parse::<u8>)
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    Some(u16::from(numbers[4]) << 8 | u16::from(numbers[5]))
}

/// `dir/name` on the server
fn remote_join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    format!("{dir}/{name}")
}

/// Minimal FTP client: passive mode, binary transfers, one data connection
/// at a time.
pub struct FtpClient {
    control: BufReader<TcpStream>,
    peer: SocketAddr,
    logged_in: bool,
}

impl FtpClient {
    /// Connects and reads the server greeting
    pub async fn connect(host: &str, port: u16) -> DatasetResult<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        let peer = stream.peer_addr()?;
        let mut client = FtpClient {
            control: BufReader::new(stream),
            peer,
            logged_in: false,
        };
        client.expect_reply(&[220]).await?;
        info!("Connected to FTP server: {host}");
        Ok(client)
    }

    async fn read_reply(&mut self) -> DatasetResult<Reply> {
        let mut line = String::new();
        if self.control.read_line(&mut line).await? == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        let code = reply_code(&line).ok_or_else(|| DatasetError::FtpError {
            code: 0,
            message: line.trim_end().to_string(),
        })?;
        let mut message = line.get(4..).unwrap_or_default().trim_end().to_string();
        if line.as_bytes().get(3) == Some(&b'-') {
            let last = format!("{code} ");
            loop {
                line.clear();
                if self.control.read_line(&mut line).await? == 0 {
                    return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
                }
                let text = line.strip_prefix(&last);
                message.push('\n');
                message.push_str(text.unwrap_or(&line).trim_end());
                if text.is_some() {
                    break;
                }
            }
        }
        debug!("< {code} {message}");
        Ok(Reply { code, message })
    }

    async fn expect_reply(&mut self, codes: &[u16]) -> DatasetResult<Reply> {
        let reply = self.read_reply().await?;
        if codes.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(reply.into_error())
        }
    }

    async fn send(&mut self, command: &str) -> DatasetResult<()> {
        if command.starts_with("PASS ") {
            debug!("> PASS ****");
        } else {
            debug!("> {command}");
        }
        let stream = self.control.get_mut();
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        Ok(())
    }

    /// Sends `command` and fails unless the reply code is one of `codes`
    pub async fn command(&mut self, command: &str, codes: &[u16]) -> DatasetResult<Reply> {
        self.send(command).await?;
        self.expect_reply(codes).await
    }

    /// Logs in and switches to binary transfers
    pub async fn login(&mut self, user: &str, password: &str) -> DatasetResult<()> {
        let reply = self.command(&format!("USER {user}"), &[230, 331]).await?;
        if reply.code == 331 {
            self.command(&format!("PASS {password}"), &[230, 202]).await?;
        }
        self.command("TYPE I", &[200]).await?;
        self.logged_in = true;
        Ok(())
    }

    pub async fn login_anonymous(&mut self) -> DatasetResult<()> {
        self.login("anonymous", "anonymous@").await
    }

    pub async fn cwd(&mut self, dir: &str) -> DatasetResult<()> {
        self.command(&format!("CWD {dir}"), &[200, 250]).await?;
        Ok(())
    }

    /// Opens a passive data connection
    async fn data_connection(&mut self) -> DatasetResult<TcpStream> {
        if !self.logged_in {
            return Err(UsageError::FtpNotLoggedIn.into());
        }
        let reply = self.command("PASV", &[227]).await?;
        let port = passive_port(&reply.message).ok_or_else(|| reply.clone().into_error())?;
        // data connections go to the control peer, never to the advertised host
        Ok(TcpStream::connect((self.peer.ip(), port)).await?)
    }

    /// Names in the current directory. A missing or empty listing yields no
    /// names.
    pub async fn nlst(&mut self) -> DatasetResult<Vec<String>> {
        let mut data = self.data_connection().await?;
        let reply = self.command("NLST", &[125, 150, 450, 550]).await?;
        if reply.code >= 400 {
            return Ok(Vec::new());
        }
        let mut listing = String::new();
        data.read_to_string(&mut listing).await?;
        drop(data);
        self.expect_reply(&[226, 250]).await?;
        Ok(listing
            .lines()
            .map(|l| l.trim().rsplit('/').next().unwrap_or_default().to_string())
            .filter(|name| !name.is_empty() && name != "." && name != "..")
            .collect())
    }

    /// Downloads `name` from the current directory into `target` through its
    /// `.part` sibling, returning the byte count
    pub async fn retr(&mut self, name: &str, target: &Path, chunk_size: usize) -> DatasetResult<u64> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut data = self.data_connection().await?;
        self.command(&format!("RETR {name}"), &[125, 150]).await?;
        let part = part_path(target);
        let mut file = BufWriter::with_capacity(chunk_size, fs::File::create(&part).await?);
        let written = tokio::io::copy(&mut data, &mut file).await?;
        file.flush().await?;
        drop(file);
        drop(data);
        self.expect_reply(&[226, 250]).await?;
        fs::rename(&part, target).await?;
        Ok(written)
    }

    pub async fn quit(mut self) -> DatasetResult<()> {
        self.command("QUIT", &[221]).await?;
        Ok(())
    }
}

/// Mirrors `remote_dir` and its subdirectories into `local_dir`.
///
/// Directories are told apart from files by trying to `CWD` into them. Files
/// that already exist locally are skipped. Returns the number of files
/// downloaded.
pub async fn download_ftp_files(
    client: &mut FtpClient,
    remote_dir: &str,
    local_dir: &Path,
    chunk_size: usize,
) -> DatasetResult<usize> {
    let start = Instant::now();
    let mut fetched = 0;
    let mut pending: Vec<(String, PathBuf)> = vec![(remote_dir.to_string(), local_dir.to_path_buf())];
    while let Some((remote, local)) = pending.pop() {
        client.cwd(&remote).await?;
        fs::create_dir_all(&local).await?;
        for name in client.nlst().await? {
            let child = remote_join(&remote, &name);
            match client.cwd(&child).await {
                Ok(()) => {
                    debug!("{child} is a directory");
                    pending.push((child, local.join(&name)));
                    client.cwd(&remote).await?;
                    continue;
                }
                Err(DatasetError::FtpError { .. }) => {}
                Err(e) => return Err(e),
            }
            let target = local.join(&name);
            if target.exists() {
                debug!("{} exists, skipping", target.display());
                continue;
            }
            info!("Downloading {child} to {}...", target.display());
            match client.retr(&name, &target, chunk_size).await {
                Ok(_) => fetched += 1,
                Err(e @ DatasetError::FtpError { .. }) => warn!("cannot retrieve {child}: {e}"),
                Err(e) => return Err(e),
            }
        }
    }
    info!(
        "Download completed in {} seconds ({fetched} files).",
        elapsed_secs(start)
    );
    Ok(fetched)
}

/// Downloads the files of `remote_dir` whose names match the shell-style
/// `pattern` into `local_dir`
pub async fn download_ftp_matching(
    client: &mut FtpClient,
    remote_dir: &str,
    pattern: &str,
    local_dir: &Path,
    chunk_size: usize,
) -> DatasetResult<Vec<PathBuf>> {
    let pattern = Pattern::new(pattern)?;
    client.cwd(remote_dir).await?;
    let names: Vec<String> = client
        .nlst()
        .await?
        .into_iter()
        .filter(|name| pattern.matches(name))
        .collect();
    info!("{} files match {pattern} in {remote_dir}", names.len());
    let mut saved = Vec::with_capacity(names.len());
    for name in names {
        let target = local_dir.join(&name);
        if !target.exists() {
            client.retr(&name, &target, chunk_size).await?;
        }
        saved.push(target);
    }
    Ok(saved)
}
