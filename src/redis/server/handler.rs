use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;

use crate::redis::config::{Config, Role};
use crate::redis::error::RedisError;
use crate::redis::replication::ReplicationState;
use crate::redis::resp::command::{Command, ReplConf};
use crate::redis::resp::encoding;
use crate::redis::resp::reader::RespReader;
use crate::redis::resp::RespValue;
use crate::redis::store::Store;

use super::EMPTY_RDB;

async fn write_reply(write_half: &mut Option<OwnedWriteHalf>, value: RespValue) -> Result<()> {
    if let Some(half) = write_half.as_mut() {
        let bytes: Bytes = (&value).into();
        half.write_all(&bytes).await?;
    }
    Ok(())
}

fn info_body(config: &Config, replication_id: &str, offset: u64) -> String {
    let mut lines = vec!["# Replication".to_string(), format!("role:{}", config.role_name())];
    if matches!(config.role, Role::Primary) {
        lines.push(format!("master_replid:{}", replication_id));
        lines.push(format!("master_repl_offset:{}", offset));
    }
    lines.join("\r\n")
}

/// Drives one accepted TCP connection through the serve loop of spec.md
/// §4.7 (the handshake states only apply to the outbound replica link,
/// handled separately in `replication::handshake`). Any error here aborts
/// just this connection (spec.md §7); it never tears down the process.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    store: Store,
    repl: ReplicationState,
    config: Arc<Config>,
) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = RespReader::new(read_half);
    let mut write_half = Some(write_half);
    let mut registered_as_replica = false;
    let addr_key = addr.to_string();

    loop {
        let request = match reader.read_request().await {
            Ok(request) => request,
            Err(_) => break,
        };

        let original_bytes: Bytes = (&request).into();
        let should_propagate = request.is_propagated_write();

        let command = match Command::try_from(request) {
            Ok(command) => command,
            Err(err) => {
                eprintln!("[redis - error] connection {addr}: {err}");
                break;
            }
        };

        match command {
            Command::Ping => write_reply(&mut write_half, RespValue::simple("PONG")).await?,
            Command::Echo(message) => write_reply(&mut write_half, RespValue::Bulk(message)).await?,
            Command::Get(key) => {
                let reply = match store.get(&key).await {
                    Some(value) => RespValue::Bulk(value),
                    None => RespValue::NullBulk,
                };
                write_reply(&mut write_half, reply).await?;
            }
            Command::Set { key, value, px } => {
                store.set(key, value, px).await;
                write_reply(&mut write_half, RespValue::simple("OK")).await?;
            }
            Command::ConfigGet(key) => {
                let reply = match config.get(&key) {
                    Some(value) => RespValue::array_of_bulk([
                        String::from_utf8_lossy(&key).into_owned(),
                        value,
                    ]),
                    None => RespValue::error(format!(
                        "ERR unknown CONFIG parameter '{}'",
                        String::from_utf8_lossy(&key)
                    )),
                };
                write_reply(&mut write_half, reply).await?;
            }
            Command::Keys(pattern) => {
                if &pattern[..] != b"*" {
                    return Err(RedisError::Semantic(
                        "KEYS only supports the '*' pattern".into(),
                    )
                    .into());
                }
                let keys = store.keys().await;
                write_reply(&mut write_half, RespValue::Array(keys.into_iter().map(RespValue::Bulk).collect())).await?;
            }
            Command::Type(key) => {
                let reply = RespValue::simple(store.key_type(&key).await);
                write_reply(&mut write_half, reply).await?;
            }
            Command::Info(_section) => {
                let replication_id = repl.replication_id().await;
                let offset = repl.propagation_offset().await;
                let body = info_body(&config, &replication_id, offset);
                write_reply(&mut write_half, RespValue::Bulk(Bytes::from(body))).await?;
            }
            Command::ReplConf(sub) => {
                if matches!(config.role, Role::Primary) {
                    if let ReplConf::Ack(offset) = sub {
                        repl.ack_replica(&addr_key, offset).await;
                    } else {
                        write_reply(&mut write_half, RespValue::simple("OK")).await?;
                    }
                } else if let ReplConf::Ack(offset) = sub {
                    // A replica's own clients have no reason to send this,
                    // but accept it harmlessly rather than erroring.
                    let _ = offset;
                }
            }
            Command::Psync { replid, offset } => {
                if !matches!(config.role, Role::Primary) {
                    return Err(RedisError::Semantic("PSYNC is only accepted by a primary".into()).into());
                }
                if &replid[..] != b"?" || offset > 0 {
                    return Err(RedisError::Semantic("partial resync is not supported".into()).into());
                }

                let replication_id = repl.replication_id().await;
                let fullresync = RespValue::simple(format!("FULLRESYNC {} 0", replication_id));
                write_reply(&mut write_half, fullresync).await?;

                if let Some(half) = write_half.as_mut() {
                    half.write_all(&encoding::rdb_frame(&EMPTY_RDB)).await?;
                }

                if let Some(half) = write_half.take() {
                    repl.add_replica(addr_key.clone(), half).await;
                    registered_as_replica = true;
                }
            }
            Command::Wait { num_replicas, timeout_ms } => {
                if !matches!(config.role, Role::Primary) {
                    return Err(RedisError::Semantic("WAIT is only accepted by a primary".into()).into());
                }
                let synced = repl.wait(num_replicas, timeout_ms).await;
                write_reply(&mut write_half, RespValue::Integer(synced as i64)).await?;
            }
            Command::Unknown => {}
        }

        if should_propagate && matches!(config.role, Role::Primary) {
            repl.propagate(&original_bytes).await;
        }
    }

    if registered_as_replica {
        repl.remove_replica(&addr_key).await;
    }

    Ok(())
}
