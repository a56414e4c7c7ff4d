//! TCP listeners and the per-connection frame dispatcher.
//!
//! One listener per protocol port, one task per accepted connection. The
//! dispatcher is the only component that touches sockets: it pulls complete
//! frames off the wire, hands them to the protocol decoder, writes any
//! acknowledgement back, and forwards resolved positions to the sink.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::cache::DeviceCache;
use crate::config::AppConfig;
use crate::error::Result;
use crate::model::Position;
use crate::protocol::{Decoder, Gt06Decoder, NoranDecoder, Session};
use crate::store::{DeviceDirectory, PositionSink};

/// Tracker ingest server: accepts device connections and emits positions.
pub struct TrackerServer {
    config: AppConfig,
    cache: Arc<DeviceCache>,
    sink: Arc<dyn PositionSink>,
}

impl TrackerServer {
    pub fn new(
        config: AppConfig,
        directory: Arc<dyn DeviceDirectory>,
        sink: Arc<dyn PositionSink>,
    ) -> Self {
        let cache = Arc::new(DeviceCache::new(
            directory,
            Duration::from_secs(config.devices.refresh_secs),
        ));
        Self { config, cache, sink }
    }

    /// Bind both protocol listeners and serve until ctrl-c.
    pub async fn run(self) -> Result<()> {
        let bind = &self.config.server.bind_address;

        let gt06 = TcpListener::bind((bind.as_str(), self.config.server.gt06_port)).await?;
        info!("GT06 listening on {}", gt06.local_addr()?);
        let noran = TcpListener::bind((bind.as_str(), self.config.server.noran_port)).await?;
        info!("Noran listening on {}", noran.local_addr()?);

        let gt06_decoder = Arc::new(Decoder::Gt06(Gt06Decoder::new(Arc::clone(&self.cache))));
        let noran_decoder = Arc::new(Decoder::Noran(NoranDecoder::new(Arc::clone(&self.cache))));

        tokio::spawn(accept_loop(gt06, gt06_decoder, Arc::clone(&self.sink)));
        tokio::spawn(accept_loop(noran, noran_decoder, Arc::clone(&self.sink)));

        tokio::signal::ctrl_c().await?;
        info!("Shutdown requested, closing listeners");
        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, decoder: Arc<Decoder>, sink: Arc<dyn PositionSink>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("{} connection from {peer}", decoder.protocol());
                let decoder = Arc::clone(&decoder);
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    handle_connection(stream, &peer.to_string(), decoder, sink).await;
                });
            }
            Err(e) => {
                // Transient accept failures (fd exhaustion etc) should not
                // kill the listener
                warn!("{} accept failed: {e}", decoder.protocol());
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Per-connection dispatch loop.
///
/// Frames are decoded strictly in arrival order. A malformed frame is
/// discarded and the next one attempted; transport-level desync or EOF
/// ends the connection. Session state dies with the connection.
pub async fn handle_connection<S>(
    stream: S,
    peer: &str,
    decoder: Arc<Decoder>,
    sink: Arc<dyn PositionSink>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut session = Session::default();
    let protocol = decoder.protocol();

    loop {
        let frame = match decoder.read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("{protocol} connection from {peer} closed");
                break;
            }
            Err(e) => {
                warn!("{protocol} stream from {peer} unreadable: {e}");
                break;
            }
        };

        let decoded = match decoder.decode(&mut session, &frame).await {
            Ok(decoded) => decoded,
            Err(e) => {
                // Next frame is attempted independently
                warn!("{protocol} frame from {peer} discarded: {e}");
                continue;
            }
        };

        if let Some(response) = decoded.response {
            if let Err(e) = writer.write_all(&response).await {
                warn!("{protocol} response to {peer} failed: {e}");
                break;
            }
        }

        if let Some(position) = decoded.position {
            deliver(sink.as_ref(), position).await;
        }
    }
}

/// Hand one decoded position to the sink, dropping events that never
/// resolved a device id. Sink failures are logged and do not close the
/// connection.
async fn deliver(sink: &dyn PositionSink, position: Position) {
    let Some(device_id) = position.device_id else {
        warn!(
            "Dropping {} position without resolved device id",
            position.extended_info.protocol()
        );
        return;
    };

    match sink.store(&position).await {
        Ok(position_id) => {
            if let Err(e) = sink.update_latest_position(device_id, position_id).await {
                warn!("Latest-position update for device {device_id} failed: {e}");
            }
        }
        Err(e) => warn!("Position store for device {device_id} failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryDirectory, MemorySink};
    use tokio::io::AsyncReadExt;

    fn gt06_setup() -> (Arc<MemoryDirectory>, Arc<MemorySink>, Arc<Decoder>) {
        let directory = Arc::new(MemoryDirectory::new());
        let sink = Arc::new(MemorySink::new());
        let dyn_directory: Arc<dyn DeviceDirectory> = directory.clone();
        let cache = Arc::new(DeviceCache::new(dyn_directory, Duration::from_secs(300)));
        let decoder = Arc::new(Decoder::Gt06(Gt06Decoder::new(cache)));
        (directory, sink, decoder)
    }

    fn gt06_login_frame() -> Vec<u8> {
        let mut frame = vec![0x78, 0x78, 0x0D, 0x01];
        frame.extend_from_slice(&[0x01, 0x23, 0x45, 0x67, 0x89, 0x01, 0x23, 0x45]);
        frame.extend_from_slice(&[0x00, 0x01]); // index
        frame.extend_from_slice(&[0x00, 0x00]); // crc (not checked on ingest)
        frame.extend_from_slice(&[0x0D, 0x0A]);
        frame
    }

    fn gt06_gps_frame() -> Vec<u8> {
        let mut frame = vec![0x78, 0x78, 0x17, 0x10];
        frame.extend_from_slice(&[23, 8, 28, 12, 30, 45]);
        frame.push(0xC9);
        frame.extend_from_slice(&40_500_000u32.to_be_bytes());
        frame.extend_from_slice(&205_200_000u32.to_be_bytes());
        frame.push(100);
        frame.extend_from_slice(&0x145Au16.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x42]); // index
        frame.extend_from_slice(&[0x00, 0x00, 0x0D, 0x0A]);
        frame
    }

    #[tokio::test]
    async fn test_gt06_connection_login_then_position() {
        let (directory, sink, decoder) = gt06_setup();

        let (client, server) = tokio::io::duplex(1024);
        let sink_for_conn: Arc<dyn PositionSink> = sink.clone();
        let conn = tokio::spawn(async move {
            handle_connection(server, "test", decoder, sink_for_conn).await;
        });

        let (mut client_read, mut client_write) = tokio::io::split(client);

        client_write.write_all(&gt06_login_frame()).await.unwrap();
        let mut ack = [0u8; 10];
        client_read.read_exact(&mut ack).await.unwrap();
        assert_eq!(&ack[0..4], &[0x78, 0x78, 0x05, 0x01]);

        client_write.write_all(&gt06_gps_frame()).await.unwrap();
        let mut ack = [0u8; 10];
        client_read.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack[3], 0x10);

        drop(client_write);
        drop(client_read);
        conn.await.unwrap();

        assert_eq!(directory.create_calls(), 1);
        assert_eq!(sink.stored_count(), 1);
        let device_id = directory.list_devices().await.unwrap()[0].id;
        assert_eq!(sink.latest_for(device_id), Some(1));
    }

    #[tokio::test]
    async fn test_position_without_login_is_dropped() {
        let (_directory, sink, decoder) = gt06_setup();

        let (client, server) = tokio::io::duplex(1024);
        let sink_for_conn: Arc<dyn PositionSink> = sink.clone();
        let conn = tokio::spawn(async move {
            handle_connection(server, "test", decoder, sink_for_conn).await;
        });

        let (mut client_read, mut client_write) = tokio::io::split(client);

        // No login first: the ack still goes out, the event is dropped
        client_write.write_all(&gt06_gps_frame()).await.unwrap();
        let mut ack = [0u8; 10];
        client_read.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack[3], 0x10);

        drop(client_write);
        drop(client_read);
        conn.await.unwrap();

        assert_eq!(sink.stored_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection_open() {
        let (_directory, sink, decoder) = gt06_setup();

        let (client, server) = tokio::io::duplex(1024);
        let sink_for_conn: Arc<dyn PositionSink> = sink.clone();
        let conn = tokio::spawn(async move {
            handle_connection(server, "test", decoder, sink_for_conn).await;
        });

        let (mut client_read, mut client_write) = tokio::io::split(client);

        // Position frame truncated mid-longitude: the decoder runs out of
        // bytes and discards the frame without an ack
        let mut bad = vec![0x78, 0x78, 0x0A, 0x10];
        bad.extend_from_slice(&[23, 8, 28, 12, 30, 45]);
        bad.resize(3 + 0x0A + 2, 0x00); // pad to the declared frame size
        client_write.write_all(&bad).await.unwrap();

        // A valid login still succeeds on the same connection
        client_write.write_all(&gt06_login_frame()).await.unwrap();
        let mut ack = [0u8; 10];
        client_read.read_exact(&mut ack).await.unwrap();
        assert_eq!(&ack[0..4], &[0x78, 0x78, 0x05, 0x01]);

        drop(client_write);
        drop(client_read);
        conn.await.unwrap();
    }
}
