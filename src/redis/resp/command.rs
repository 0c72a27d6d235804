use std::collections::HashMap;

use bytes::Bytes;

use crate::redis::error::{RedisError, RedisResult};

use super::options::parse_options;
use super::RespValue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplConf {
    ListeningPort(u16),
    Capa(Vec<Bytes>),
    GetAck,
    Ack(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Echo(Bytes),
    Get(Bytes),
    Set {
        key: Bytes,
        value: Bytes,
        px: Option<u64>,
    },
    ConfigGet(Bytes),
    Keys(Bytes),
    Type(Bytes),
    Info(Option<Bytes>),
    ReplConf(ReplConf),
    Psync { replid: Bytes, offset: i64 },
    Wait { num_replicas: u32, timeout_ms: u64 },
    /// A command this core does not understand; the spec says such input
    /// is silently ignored rather than rejected (spec.md §4.7 table).
    Unknown,
}

struct Parser {
    tokens: std::collections::VecDeque<Bytes>,
}

impl Parser {
    fn new(tokens: Vec<Bytes>) -> Self {
        Self {
            tokens: tokens.into(),
        }
    }

    fn next(&mut self) -> Option<Bytes> {
        self.tokens.pop_front()
    }

    fn expect(&mut self, command: &str, arg: &str) -> RedisResult<Bytes> {
        self.next()
            .ok_or_else(|| RedisError::Semantic(format!("'{}' requires argument '{}'", command, arg)))
    }

    fn rest(&mut self) -> Vec<Bytes> {
        self.tokens.drain(..).collect()
    }
}

fn parse_u64(bytes: &[u8], what: &str) -> RedisResult<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| RedisError::Semantic(format!("expected {} to be a non-negative integer", what)))
}

fn set_option_schema() -> HashMap<&'static str, usize> {
    [
        ("EX", 1),
        ("PX", 1),
        ("EXAT", 1),
        ("PXAT", 1),
        ("NX", 0),
        ("XX", 0),
        ("KEEPTTL", 0),
        ("GET", 0),
    ]
    .into_iter()
    .collect()
}

impl TryFrom<RespValue> for Command {
    type Error = RedisError;

    fn try_from(value: RespValue) -> Result<Self, Self::Error> {
        let tokens = match value {
            RespValue::Array(values) => values
                .into_iter()
                .map(|v| {
                    v.into_bulk()
                        .ok_or_else(|| RedisError::Wire("expected array of bulk strings".into()))
                })
                .collect::<RedisResult<Vec<_>>>()?,
            RespValue::Simple(s) => vec![s],
            other => return Err(RedisError::Wire(format!("unexpected request shape: {:?}", other))),
        };

        if tokens.is_empty() {
            return Err(RedisError::Wire("empty command".into()));
        }

        let mut parser = Parser::new(tokens);
        let name = parser.next().unwrap().to_ascii_uppercase();
        match &name[..] {
            b"PING" => Ok(Command::Ping),
            b"ECHO" => Ok(Command::Echo(parser.expect("ECHO", "message")?)),
            b"GET" => Ok(Command::Get(parser.expect("GET", "key")?)),
            b"SET" => {
                let key = parser.expect("SET", "key")?;
                let value = parser.expect("SET", "value")?;
                let rest = parser.rest();
                let options = parse_options(&rest, &set_option_schema())
                    .map_err(|_| RedisError::Option("invalid SET option".into()))?;
                let px = options.get("PX").and_then(|args| args.first()).map(|b| parse_u64(b, "PX")).transpose()?;
                Ok(Command::Set { key, value, px })
            }
            b"CONFIG" => {
                let sub = parser
                    .next()
                    .ok_or_else(|| RedisError::Semantic("CONFIG requires a subcommand".into()))?
                    .to_ascii_uppercase();
                if &sub[..] != b"GET" {
                    return Err(RedisError::Semantic(format!(
                        "unknown CONFIG subcommand '{}'",
                        String::from_utf8_lossy(&sub)
                    )));
                }
                Ok(Command::ConfigGet(parser.expect("CONFIG GET", "parameter")?))
            }
            b"KEYS" => Ok(Command::Keys(parser.expect("KEYS", "pattern")?)),
            b"TYPE" => Ok(Command::Type(parser.expect("TYPE", "key")?)),
            b"INFO" => Ok(Command::Info(parser.next())),
            b"REPLCONF" => {
                let sub = parser
                    .next()
                    .ok_or_else(|| RedisError::Semantic("REPLCONF requires a subcommand".into()))?
                    .to_ascii_lowercase();
                match &sub[..] {
                    b"listening-port" => {
                        let port = parser.expect("REPLCONF", "listening-port")?;
                        let port = parse_u64(&port, "listening-port")? as u16;
                        Ok(Command::ReplConf(ReplConf::ListeningPort(port)))
                    }
                    b"capa" => Ok(Command::ReplConf(ReplConf::Capa(parser.rest()))),
                    b"getack" => {
                        let _ = parser.next();
                        Ok(Command::ReplConf(ReplConf::GetAck))
                    }
                    b"ack" => {
                        let offset = parser.expect("REPLCONF", "ack")?;
                        Ok(Command::ReplConf(ReplConf::Ack(parse_u64(&offset, "ack offset")?)))
                    }
                    other => Err(RedisError::Semantic(format!(
                        "unknown REPLCONF subcommand '{}'",
                        String::from_utf8_lossy(other)
                    ))),
                }
            }
            b"PSYNC" => {
                let replid = parser.expect("PSYNC", "replication_id")?;
                let offset = parser.expect("PSYNC", "offset")?;
                let offset = std::str::from_utf8(&offset)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| RedisError::Semantic("invalid PSYNC offset".into()))?;
                Ok(Command::Psync { replid, offset })
            }
            b"WAIT" => {
                let num_replicas = parser.expect("WAIT", "numreplicas")?;
                let timeout = parser.expect("WAIT", "timeout")?;
                let num_replicas = parse_u64(&num_replicas, "numreplicas")? as u32;
                let timeout_ms = parse_u64(&timeout, "timeout")?;
                Ok(Command::Wait {
                    num_replicas,
                    timeout_ms,
                })
            }
            _ => Ok(Command::Unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(tokens: &[&str]) -> RespValue {
        RespValue::array_of_bulk(tokens)
    }

    #[test]
    fn parses_ping() {
        let cmd: Command = array(&["PING"]).try_into().unwrap();
        assert_eq!(cmd, Command::Ping);
    }

    #[test]
    fn parses_set_with_px() {
        let cmd: Command = array(&["SET", "key", "val", "PX", "100"]).try_into().unwrap();
        assert_eq!(
            cmd,
            Command::Set {
                key: Bytes::from_static(b"key"),
                value: Bytes::from_static(b"val"),
                px: Some(100),
            }
        );
    }

    #[test]
    fn set_with_px_zero_means_no_expiry_is_preserved_as_value() {
        let cmd: Command = array(&["SET", "key", "val", "PX", "0"]).try_into().unwrap();
        assert_eq!(
            cmd,
            Command::Set {
                key: Bytes::from_static(b"key"),
                value: Bytes::from_static(b"val"),
                px: Some(0),
            }
        );
    }

    #[test]
    fn parses_replconf_getack() {
        let cmd: Command = array(&["REPLCONF", "GETACK", "*"]).try_into().unwrap();
        assert_eq!(cmd, Command::ReplConf(ReplConf::GetAck));
    }

    #[test]
    fn parses_wait() {
        let cmd: Command = array(&["WAIT", "1", "100"]).try_into().unwrap();
        assert_eq!(
            cmd,
            Command::Wait {
                num_replicas: 1,
                timeout_ms: 100,
            }
        );
    }

    #[test]
    fn unknown_command_is_ignored_not_an_error() {
        let cmd: Command = array(&["FLUSHALL"]).try_into().unwrap();
        assert_eq!(cmd, Command::Unknown);
    }
}
