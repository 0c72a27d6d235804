use std::collections::HashMap;

use bytes::Bytes;

use crate::redis::error::{RedisError, RedisResult};

/// Turns the trailing tokens of a command into a named-option mapping under
/// a declared schema (spec.md §4.3). `schema` maps uppercase option name to
/// arity; arity 0 is a flag, `n > 0` consumes the next `n` tokens verbatim.
///
/// Bug-compatibility: when a trailing option's declared arity exceeds the
/// tokens remaining, the option collapses to an empty argument vector
/// rather than erroring — preserved deliberately (spec.md §9).
pub fn parse_options(
    tokens: &[Bytes],
    schema: &HashMap<&str, usize>,
) -> RedisResult<HashMap<String, Vec<Bytes>>> {
    let mut result = HashMap::new();
    let mut i = 0;
    while i < tokens.len() {
        let name = String::from_utf8_lossy(&tokens[i]).to_uppercase();
        let arity = *schema
            .get(name.as_str())
            .ok_or_else(|| RedisError::Option(format!("unknown option '{}'", name)))?;

        i += 1;
        let available = tokens.len() - i;
        let args = if arity <= available {
            tokens[i..i + arity].to_vec()
        } else {
            Vec::new()
        };
        i += arity.min(available);

        result.insert(name, args);
    }

    Ok(result)
}
