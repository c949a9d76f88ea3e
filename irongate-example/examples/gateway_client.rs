//! Gateway Client Example
//!
//! A counterparty connecting to the `gateway_server` example:
//! 1. sends a Logon and waits for the gateway's answer,
//! 2. sends a TestRequest and waits for the matching Heartbeat,
//! 3. logs out.
//!
//! Inbound bytes are framed with the gateway's own `FixCodec` through the
//! `tokio_util` decoder interface.

use std::time::Duration;

use anyhow::{Context, bail};
use bytes::{Bytes, BytesMut};
use irongate_transport::codec::FixCodec;
use irongate_transport::header::{FrameHeader, find_field};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Decoder;
use tracing::info;

mod common;
use common::{ExampleConfig, init_logging, logon, logout, session_message};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

struct Connection {
    stream: TcpStream,
    codec: FixCodec,
    buffer: BytesMut,
}

impl Connection {
    async fn send(&mut self, frame: &Bytes) -> anyhow::Result<()> {
        self.stream.write_all(frame).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> anyhow::Result<Bytes> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                return Ok(frame);
            }
            let read = timeout(REPLY_TIMEOUT, self.stream.read_buf(&mut self.buffer))
                .await
                .context("no reply from gateway")??;
            if read == 0 {
                bail!("gateway closed the connection");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cfg = ExampleConfig::client();
    info!("Connecting to gateway at {}", cfg.addr());

    let stream = TcpStream::connect(cfg.addr()).await?;
    let mut connection = Connection {
        stream,
        codec: FixCodec::new(),
        buffer: BytesMut::with_capacity(4096),
    };
    let mut seq = 1;

    connection
        .send(&logon(
            &cfg.sender_comp_id,
            &cfg.target_comp_id,
            seq,
            cfg.heartbeat_interval,
        ))
        .await?;
    seq += 1;
    let reply = FrameHeader::parse(&connection.next_frame().await?)?;
    match reply.msg_type.as_str() {
        "A" => info!(gateway = %reply.sender_comp_id, "logged on"),
        "5" => bail!("logon rejected by {}", reply.sender_comp_id),
        other => bail!("unexpected reply to logon: {other}"),
    }

    let test_req_id = format!("TEST-{}", chrono::Utc::now().timestamp_millis());
    connection
        .send(
            &session_message("1", &cfg.sender_comp_id, &cfg.target_comp_id, seq)
                .field(112, &test_req_id)
                .build(),
        )
        .await?;
    seq += 1;
    let heartbeat = connection.next_frame().await?;
    let echoed = find_field(&heartbeat, 112).map(String::from_utf8_lossy);
    info!(test_req_id = %test_req_id, echoed = ?echoed, "heartbeat received");

    connection
        .send(&logout(&cfg.sender_comp_id, &cfg.target_comp_id, seq, None))
        .await?;
    let reply = FrameHeader::parse(&connection.next_frame().await?)?;
    info!(msg_type = %reply.msg_type, "logout acknowledged");
    Ok(())
}
