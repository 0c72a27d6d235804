use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::redis::rdb;
use crate::redis::resp::command::{Command, ReplConf};
use crate::redis::resp::encoding;
use crate::redis::resp::reader::RespReader;
use crate::redis::store::Store;

/// Wire length of `REPLCONF GETACK *`; subtracted from the replica's
/// `bytes_read` when computing a reported ack offset (spec.md §4.7).
const GETACK_WIRE_LEN: u64 = 37;

/// Runs the replica-side outbound handshake against `host:port`, then
/// applies the primary's command stream forever (spec.md §4.7). A failure
/// during the handshake itself is fatal to the process (spec.md §7, §9);
/// a failure afterwards only ends this link's task.
pub async fn run(host: &str, port: u16, listening_port: u16, store: Store) -> Result<()> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("connecting to primary {}:{}", host, port))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = RespReader::new(read_half);

    write_half.write_all(&encoding::ping()).await?;
    expect_prefix(&mut reader, b"PONG").await.context("PING handshake step")?;

    write_half.write_all(&encoding::replconf_port(listening_port)).await?;
    expect_prefix(&mut reader, b"OK").await.context("REPLCONF listening-port step")?;

    write_half.write_all(&encoding::replconf_capa()).await?;
    expect_prefix(&mut reader, b"OK").await.context("REPLCONF capa step")?;

    write_half.write_all(&encoding::psync()).await?;
    expect_prefix(&mut reader, b"FULLRESYNC").await.context("PSYNC step")?;

    let rdb_bytes = reader.read_rdb_frame().await.context("reading RDB transfer")?;
    rdb::load_bytes(&rdb_bytes, &store).await;

    println!("[redis] replica handshake with {}:{} complete", host, port);

    apply_stream(reader, write_half, store).await
}

async fn expect_prefix(reader: &mut RespReader<tokio::net::tcp::OwnedReadHalf>, prefix: &[u8]) -> Result<()> {
    use crate::redis::resp::RespValue;
    match reader.read_reply().await? {
        RespValue::Simple(s) if s.starts_with(prefix) => Ok(()),
        other => bail!("unexpected handshake reply, expected prefix {:?}: {:?}", prefix, other),
    }
}

/// Continuously reads and applies the primary's propagated command stream,
/// answering `REPLCONF GETACK *` with this replica's ack accounting
/// (spec.md §4.7's "Ack accounting" section).
async fn apply_stream(
    mut reader: RespReader<tokio::net::tcp::OwnedReadHalf>,
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    store: Store,
) -> Result<()> {
    let replication_start = reader.bytes_read();

    loop {
        let request = match reader.read_request().await {
            Ok(request) => request,
            Err(_) => return Ok(()),
        };

        match Command::try_from(request) {
            Ok(Command::Set { key, value, px }) => {
                store.set(key, value, px).await;
            }
            Ok(Command::ReplConf(ReplConf::GetAck)) => {
                let reported = reader
                    .bytes_read()
                    .saturating_sub(replication_start)
                    .saturating_sub(GETACK_WIRE_LEN);
                write_half.write_all(&encoding::replconf_ack(reported)).await?;
            }
            Ok(_) => {
                // PING keepalives and anything else on the replication
                // stream require no reply from this side.
            }
            Err(err) => {
                eprintln!("[redis - error] malformed command on replication stream: {err}");
            }
        }
    }
}
