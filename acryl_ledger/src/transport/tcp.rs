use std::net::SocketAddr;
use std::time::Duration;

use ledger_apdu::APDUAnswer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::{
    open_with_retry, APDUAnswerVec, APDUCmdVec, Transport, TransportProvider, TransportSettings,
};
use crate::consts::SPECULOS_ADDR;
use crate::{Error, Result};

/// Opens [`TransportTcp`] connections to a Speculos emulator.
#[derive(Debug, Clone)]
pub struct TcpProvider {
    addr: SocketAddr,
}

impl TcpProvider {
    /// Provider for an emulator listening on `addr`
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Provider for an emulator listening on the default Speculos address, 127.0.0.1:9999
    pub fn speculos() -> Self {
        Self::new(SPECULOS_ADDR)
    }
}

impl TransportProvider for TcpProvider {
    type Transport = TransportTcp;

    async fn create(
        &self,
        open_timeout: Option<Duration>,
        listen_timeout: Option<Duration>,
    ) -> Result<TransportTcp> {
        let addr = self.addr;
        tracing::debug!("connecting to {addr}");
        open_with_retry(open_timeout, listen_timeout, || TransportTcp::connect(addr)).await
    }
}

/// Transport to communicate with the Speculos emulator.
///
/// Commands are prefixed by their length as a 4 bytes big endian integer, answers are the
/// length of the data, the data, and the 2 bytes status word.
#[derive(Debug)]
pub struct TransportTcp {
    connection: Mutex<Option<TcpStream>>,
    settings: TransportSettings,
}

impl TransportTcp {
    /// Connects to an emulator listening on `addr`
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::TransportCreation(format!("{addr}: {e}")))?;
        Ok(Self {
            connection: Mutex::new(Some(stream)),
            settings: TransportSettings::default(),
        })
    }

    async fn roundtrip(&self, command_bytes: &[u8]) -> Result<Vec<u8>> {
        let mut connection = self.connection.lock().await;
        let stream = connection
            .as_mut()
            .ok_or_else(|| Error::Transport("transport is closed".into()))?;

        let mut req = Vec::with_capacity(command_bytes.len() + 4);
        req.extend_from_slice(&(command_bytes.len() as u32).to_be_bytes());
        req.extend_from_slice(command_bytes);
        stream.write_all(&req).await?;

        let mut buff = [0u8; 4];
        stream.read_exact(&mut buff).await?;
        let len = u32::from_be_bytes(buff);

        let mut resp = vec![0u8; len as usize + 2];
        stream.read_exact(&mut resp).await?;
        Ok(resp)
    }
}

impl Transport for TransportTcp {
    async fn exchange(&self, command: &APDUCmdVec) -> Result<APDUAnswerVec> {
        self.settings.log_command(command);
        let command_bytes = command.serialize();
        let resp = self.settings.bounded(self.roundtrip(&command_bytes)).await?;
        let answer = APDUAnswer::from_answer(resp)
            .map_err(|e| Error::Transport(format!("Invalid Answer: {e:?}")))?;
        self.settings.log_answer(&answer);
        Ok(answer)
    }

    fn set_debug_mode(&self, debug: bool) {
        self.settings.set_debug(debug);
    }

    fn set_exchange_timeout(&self, timeout: Option<Duration>) {
        self.settings.set_exchange_timeout(timeout);
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut stream) = self.connection.lock().await.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use tokio::net::TcpListener;

    use super::*;

    fn get_version() -> APDUCmdVec {
        APDUCmdVec {
            cla: 0x80,
            ins: 0x06,
            p1: 0x00,
            p2: 0x00,
            data: vec![],
        }
    }

    /// Accepts one connection and answers every command with `data` and status word 0x9000
    async fn emulator(data: Vec<u8>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            loop {
                let mut len = [0u8; 4];
                if stream.read_exact(&mut len).await.is_err() {
                    break;
                }
                let mut command = vec![0u8; u32::from_be_bytes(len) as usize];
                stream.read_exact(&mut command).await.unwrap();

                let mut resp = (data.len() as u32).to_be_bytes().to_vec();
                resp.extend_from_slice(&data);
                resp.extend_from_slice(&[0x90, 0x00]);
                stream.write_all(&resp).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn exchange_with_emulator() {
        let addr = emulator(vec![1, 2, 0]).await;
        let transport = TcpProvider::new(addr).create(None, None).await.unwrap();
        transport.set_debug_mode(true);

        let answer = transport.exchange(&get_version()).await.unwrap();
        assert_eq!(answer.retcode(), 0x9000);
        assert_eq!(answer.data(), &[1, 2, 0]);

        // the connection is reused
        let answer = transport.exchange(&get_version()).await.unwrap();
        assert_eq!(answer.data(), &[1, 2, 0]);
    }

    #[tokio::test]
    async fn exchange_after_close() {
        let addr = emulator(vec![]).await;
        let transport = TcpProvider::new(addr).create(None, None).await.unwrap();
        transport.close().await.unwrap();
        // closing twice is harmless
        transport.close().await.unwrap();

        let err = transport.exchange(&get_version()).await.unwrap_err();
        assert_eq!(err, Error::Transport("transport is closed".into()));
    }

    #[tokio::test]
    async fn exchange_timeout_on_silent_device() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        });

        let transport = TcpProvider::new(addr).create(None, None).await.unwrap();
        transport.set_exchange_timeout(Some(Duration::from_millis(50)));
        let err = transport.exchange(&get_version()).await.unwrap_err();
        assert_eq!(
            err,
            Error::Timeout {
                operation: "exchanging apdu",
                after: Duration::from_millis(50)
            }
        );
        silent.abort();
    }

    #[tokio::test]
    async fn create_without_emulator() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = TcpProvider::new(addr);
        let err = provider.create(None, None).await.unwrap_err();
        assert!(matches!(err, Error::TransportCreation(_)), "{err:?}");

        let listen = Duration::from_millis(300);
        let err = provider.create(None, Some(listen)).await.unwrap_err();
        assert_eq!(
            err,
            Error::Timeout {
                operation: "waiting for a device",
                after: listen
            }
        );
    }
}
