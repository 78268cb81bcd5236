use serde_json::{Map, Value};
use std::fmt;

/// Keys whose list values are collapsed to their first entry.
const FIRST_ENTRY_KEYS: [&str; 2] = ["failed_shards", "root_cause"];

/// Indented, tab-separated rendering of a server error payload.
///
/// Objects nest one tab per level, `root_cause` and `failed_shards` expand
/// their first entry, other lists print one item per line and scalars print
/// as `key:\tvalue`.
pub struct ErrorTree<'a>(pub &'a Value);

impl fmt::Display for ErrorTree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::Object(map) => write_map(f, map, 0),
            other => writeln!(f, "{}", Scalar(other)),
        }
    }
}

fn write_map(f: &mut fmt::Formatter<'_>, map: &Map<String, Value>, depth: usize) -> fmt::Result {
    let pre = "\t".repeat(depth);
    for (key, value) in map {
        match value {
            Value::Array(items) if FIRST_ENTRY_KEYS.contains(&key.as_str()) => {
                writeln!(f, "{pre}{key}:")?;
                match items.first() {
                    Some(Value::Object(inner)) => write_map(f, inner, depth + 1)?,
                    Some(other) => writeln!(f, "{pre}\t{}", Scalar(other))?,
                    None => {}
                }
            }
            Value::Object(inner) => {
                writeln!(f, "{pre}{key}:")?;
                write_map(f, inner, depth + 1)?;
            }
            Value::Array(items) => {
                writeln!(f, "{pre}{key}:")?;
                for item in items {
                    writeln!(f, "{pre}\t{}", Scalar(item))?;
                }
            }
            scalar => writeln!(f, "{pre}{key}:\t{}", Scalar(scalar))?,
        }
    }
    Ok(())
}

/// Strings print bare, everything else as compact JSON.
struct Scalar<'a>(&'a Value);

impl fmt::Display for Scalar<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}
