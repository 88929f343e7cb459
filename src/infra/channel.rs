//! # Duplex Channel Module / 双工通道模块
//!
//! The server endpoint of the per-session duplex channel: a Unix domain
//! socket bound to a freshly generated unique name. The endpoint exists
//! before the child process starts so the very first connection attempt of
//! the module can never race the server.
//!
//! 每个会话的双工通道的服务端端点：绑定到新生成唯一名称的
//! Unix 域套接字。端点在子进程启动之前就已存在，
//! 因此模块的第一次连接尝试永远不会与服务端竞争。

use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};
use uuid::Uuid;

/// The unique name of one channel endpoint and the filesystem path backing
/// it. The `name` is what travels on the child's command line.
#[derive(Debug, Clone)]
pub struct ChannelName {
    pub name: String,
    pub path: PathBuf,
}

impl ChannelName {
    /// Derives a fresh endpoint name from a new unique token.
    pub fn fresh() -> Self {
        let token = Uuid::new_v4().simple().to_string();
        let name = format!("module-runner-{token}.sock");
        let path = std::env::temp_dir().join(&name);
        Self { name, path }
    }

    /// The value handed to the child via the trailing channel argument.
    pub fn as_endpoint_argument(&self) -> String {
        self.path.display().to_string()
    }
}

/// A bound, listening channel endpoint. Accepting stays available until the
/// server is dropped; unlinking the socket path is an explicit cleanup step
/// whose failure the caller captures rather than propagates.
pub struct ChannelServer {
    listener: UnixListener,
    name: ChannelName,
}

impl ChannelServer {
    /// Binds the endpoint. The socket file appears on disk here.
    pub fn bind(name: ChannelName) -> std::io::Result<Self> {
        let listener = UnixListener::bind(&name.path)?;
        Ok(Self { listener, name })
    }

    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.name.path
    }

    /// Waits for the next peer connection. A module may connect more than
    /// once (a controller process plus its host), so callers accept in a
    /// loop until cancelled.
    pub async fn accept(&self) -> std::io::Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    /// Removes the socket file. Failure here is a cleanup failure: captured
    /// by the session and folded into the module result, never rethrown.
    pub fn unlink(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.name.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn fresh_names_never_collide() {
        let a = ChannelName::fresh();
        let b = ChannelName::fresh();
        assert_ne!(a.path, b.path);
        assert!(a.name.starts_with("module-runner-"));
    }

    #[tokio::test]
    async fn accepts_multiple_peers_on_one_endpoint() {
        let server = ChannelServer::bind(ChannelName::fresh()).unwrap();
        let path = server.path().to_path_buf();

        let client = tokio::spawn(async move {
            let mut first = UnixStream::connect(&path).await.unwrap();
            first.write_all(b"a").await.unwrap();
            let mut second = UnixStream::connect(&path).await.unwrap();
            second.write_all(b"b").await.unwrap();
        });

        let mut buf = [0u8; 1];
        let mut first = server.accept().await.unwrap();
        first.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"a");

        let mut second = server.accept().await.unwrap();
        second.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"b");

        client.await.unwrap();
        server.unlink().unwrap();
        assert!(!server.path().exists());
    }

    #[tokio::test]
    async fn unlink_twice_is_not_an_error() {
        let server = ChannelServer::bind(ChannelName::fresh()).unwrap();
        server.unlink().unwrap();
        server.unlink().unwrap();
    }
}
