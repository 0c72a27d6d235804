use anyhow::{bail, Context, Result};

/// Process role, carrying the replica-only coordinates when applicable
/// (spec.md §3's `Config`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Primary,
    Replica { host: String, port: u16 },
}

/// Immutable configuration produced once at startup (spec.md §3, §6).
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub role: Role,
    pub dir: Option<String>,
    pub dbfilename: Option<String>,
}

impl Config {
    pub fn role_name(&self) -> &'static str {
        match self.role {
            Role::Primary => "master",
            Role::Replica { .. } => "slave",
        }
    }

    /// `CONFIG GET <key>` surface (spec.md §4.7 table, ambient addition
    /// documented in SPEC_FULL.md §4). Returns `None` for unknown keys.
    pub fn get(&self, key: &[u8]) -> Option<String> {
        match key.to_ascii_lowercase().as_slice() {
            b"dir" => Some(self.dir.clone().unwrap_or_default()),
            b"dbfilename" => Some(self.dbfilename.clone().unwrap_or_default()),
            _ => None,
        }
    }
}

/// Parses the flags of spec.md §6 from a raw argv slice (argv[0] already
/// stripped). Unknown flags and `--help` follow ambient CLI ergonomics
/// described in SPEC_FULL.md §6, not a spec.md requirement.
pub fn parse_args(args: &[String]) -> Result<Config> {
    let mut port: u16 = 6379;
    let mut replicaof: Option<(String, u16)> = None;
    let mut dir: Option<String> = None;
    let mut dbfilename: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-p" | "--port" => {
                let value = args.get(i + 1).context("--port requires a value")?;
                port = value.parse().context("--port must be a number")?;
                i += 2;
            }
            "--replicaof" => {
                let value = args.get(i + 1).context("--replicaof requires a value")?;
                let mut parts = value.split_whitespace();
                let host = parts.next().context("--replicaof value missing host")?.to_string();
                let port = parts
                    .next()
                    .context("--replicaof value missing port")?
                    .parse()
                    .context("--replicaof port must be a number")?;
                replicaof = Some((host, port));
                i += 2;
            }
            "--dir" => {
                dir = Some(args.get(i + 1).context("--dir requires a value")?.clone());
                i += 2;
            }
            "--dbfilename" => {
                dbfilename = Some(args.get(i + 1).context("--dbfilename requires a value")?.clone());
                i += 2;
            }
            "--help" => {
                println!("usage: redis-lite-server [-p PORT] [--replicaof \"HOST PORT\"] [--dir DIR] [--dbfilename NAME]");
                std::process::exit(0);
            }
            other => bail!("unrecognised flag '{}'", other),
        }
    }

    let role = match replicaof {
        Some((host, port)) => Role::Replica { host, port },
        None => Role::Primary,
    };

    Ok(Config { port, role, dir, dbfilename })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_to_primary_on_port_6379() {
        let config = parse_args(&args(&[])).unwrap();
        assert_eq!(config.port, 6379);
        assert_eq!(config.role, Role::Primary);
    }

    #[test]
    fn parses_replicaof_into_host_and_port() {
        let config = parse_args(&args(&["--replicaof", "127.0.0.1 6379"])).unwrap();
        assert_eq!(
            config.role,
            Role::Replica {
                host: "127.0.0.1".into(),
                port: 6379,
            }
        );
    }

    #[test]
    fn config_get_returns_none_for_unknown_key() {
        let config = parse_args(&args(&[])).unwrap();
        assert_eq!(config.get(b"maxmemory"), None);
    }

    #[test]
    fn unrecognised_flag_is_an_error() {
        assert!(parse_args(&args(&["--bogus"])).is_err());
    }
}
