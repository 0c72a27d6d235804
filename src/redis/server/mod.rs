pub mod handler;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use crate::redis::config::{Config, Role};
use crate::redis::rdb;
use crate::redis::replication::{self, handshake, ReplicationState};
use crate::redis::store::Store;

/// The canned empty-database RDB the primary sends on every `PSYNC`
/// (spec.md §6), decoded ahead of time from the spec's base64 blob — no
/// base64 crate is carried in this workspace, so the bytes are inlined.
pub const EMPTY_RDB: [u8; 88] = [
    0x52, 0x45, 0x44, 0x49, 0x53, 0x30, 0x30, 0x31, 0x31, 0xfa, 0x09, 0x72, 0x65, 0x64, 0x69, 0x73,
    0x2d, 0x76, 0x65, 0x72, 0x05, 0x37, 0x2e, 0x32, 0x2e, 0x30, 0xfa, 0x0a, 0x72, 0x65, 0x64, 0x69,
    0x73, 0x2d, 0x62, 0x69, 0x74, 0x73, 0xc0, 0x40, 0xfa, 0x05, 0x63, 0x74, 0x69, 0x6d, 0x65, 0xc2,
    0x6d, 0x08, 0xbc, 0x65, 0xfa, 0x08, 0x75, 0x73, 0x65, 0x64, 0x2d, 0x6d, 0x65, 0x6d, 0xc2, 0xb0,
    0xc4, 0x10, 0x00, 0xfa, 0x08, 0x61, 0x6f, 0x66, 0x2d, 0x62, 0x61, 0x73, 0x65, 0xc0, 0x00, 0xff,
    0xf0, 0x6e, 0x3b, 0xfe, 0xc0, 0xff, 0x5a, 0xa2,
];

/// Binds the listener and runs the accept loop forever (spec.md §6's
/// startup sequence, steps 2-4; step 1 already ran in `main` to build
/// `config`).
pub async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    let store = Store::new();

    if let (Some(dir), Some(dbfilename)) = (&config.dir, &config.dbfilename) {
        rdb::load_file(dir, dbfilename, &store).await;
    }

    let replication_id = match config.role {
        Role::Primary => replication::generate_replication_id(),
        Role::Replica { .. } => String::new(),
    };
    let repl = ReplicationState::new(replication_id);

    if let Role::Replica { host, port } = config.role.clone() {
        let store = store.clone();
        let listening_port = config.port;
        tokio::spawn(async move {
            if let Err(err) = handshake::run(&host, port, listening_port, store).await {
                eprintln!("[redis - error] replica handshake with {}:{} failed: {err}", host, port);
                std::process::exit(1);
            }
        });
    }

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding 0.0.0.0:{}", config.port))?;
    println!("[redis] listening on 0.0.0.0:{}", config.port);

    loop {
        let (stream, addr) = listener.accept().await?;
        let store = store.clone();
        let repl = repl.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(err) = handler::handle_connection(stream, addr, store, repl, config).await {
                eprintln!("[redis - error] connection {addr} aborted: {err}");
            }
        });
    }
}
