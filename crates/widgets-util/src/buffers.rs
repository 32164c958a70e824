//! Splitting binary leaves out of a value tree and putting them back.
//!
//! Wire messages carry a JSON `state` plus a positional list of binary
//! buffers; `buffer_paths[i]` locates where `buffers[i]` belongs.
//!
//! ```text
//! {a: <bytes>, b: [1, <bytes>]}
//!     -> state {b: [1, null]}, buffer_paths [["a"], ["b", 1]]
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{Reference, Value};

/// One step of a buffer path: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathStep {
    Index(usize),
    Key(String),
}

impl From<&str> for PathStep {
    fn from(key: &str) -> Self {
        PathStep::Key(key.to_owned())
    }
}

impl From<String> for PathStep {
    fn from(key: String) -> Self {
        PathStep::Key(key)
    }
}

impl From<usize> for PathStep {
    fn from(index: usize) -> Self {
        PathStep::Index(index)
    }
}

/// Structural path from the root of a state tree to a binary leaf.
pub type BufferPath = Vec<PathStep>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("buffer path {0:?} does not resolve inside the state")]
    MissingPath(BufferPath),
    #[error("{paths} buffer paths but only {buffers} buffers")]
    CountMismatch { paths: usize, buffers: usize },
    #[error("invalid {encoding} buffer data")]
    InvalidEncoding { encoding: &'static str },
}

/// Result of [`remove_buffers`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitBuffers {
    /// JSON-only state with every binary leaf removed.
    pub state: serde_json::Value,
    pub buffer_paths: Vec<BufferPath>,
    pub buffers: Vec<Bytes>,
}

/// Removes binary leaves from `state`.
///
/// References are converted to their plain form first, so any binary they
/// expand to is extracted as well. Binary array elements are replaced with
/// `null`; binary object members are dropped. The input is not modified.
pub fn remove_buffers<R: Reference>(state: &Value<R>) -> SplitBuffers {
    let mut split = SplitBuffers::default();
    let mut path = Vec::new();
    split.state = strip(state, &mut path, &mut split.buffer_paths, &mut split.buffers)
        .unwrap_or(serde_json::Value::Null);
    split
}

fn strip<R: Reference>(
    value: &Value<R>,
    path: &mut BufferPath,
    paths: &mut Vec<BufferPath>,
    buffers: &mut Vec<Bytes>,
) -> Option<serde_json::Value> {
    match value {
        Value::Binary(bytes) => {
            paths.push(path.clone());
            buffers.push(bytes.clone());
            None
        }
        Value::Ref(r) => strip(&r.to_plain(), path, paths, buffers),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                path.push(PathStep::Index(i));
                out.push(strip(item, path, paths, buffers).unwrap_or(serde_json::Value::Null));
                path.pop();
            }
            Some(serde_json::Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                path.push(PathStep::Key(key.clone()));
                if let Some(stripped) = strip(item, path, paths, buffers) {
                    out.insert(key.clone(), stripped);
                }
                path.pop();
            }
            Some(serde_json::Value::Object(out))
        }
        Value::Null => Some(serde_json::Value::Null),
        Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
        Value::Number(n) => Some(serde_json::Value::Number(n.clone())),
        Value::String(s) => Some(serde_json::Value::String(s.clone())),
    }
}

/// Inserts `buffers` into `state` at `buffer_paths`.
///
/// Intermediate containers must already exist; the terminal slot is created
/// or overwritten. Buffers past the number of paths are ignored.
pub fn put_buffers<R: Reference>(
    state: &mut Value<R>,
    buffer_paths: &[BufferPath],
    buffers: &[Bytes],
) -> Result<(), BufferError> {
    if buffer_paths.len() > buffers.len() {
        return Err(BufferError::CountMismatch {
            paths: buffer_paths.len(),
            buffers: buffers.len(),
        });
    }
    for (path, buffer) in buffer_paths.iter().zip(buffers) {
        put_one(state, path, buffer.clone())?;
    }
    Ok(())
}

fn put_one<R: Reference>(
    state: &mut Value<R>,
    path: &BufferPath,
    buffer: Bytes,
) -> Result<(), BufferError> {
    let Some((last, parents)) = path.split_last() else {
        *state = Value::Binary(buffer);
        return Ok(());
    };
    let missing = || BufferError::MissingPath(path.clone());

    let mut cur = state;
    for step in parents {
        cur = match (step, cur) {
            (PathStep::Key(key), Value::Object(map)) => map.get_mut(key).ok_or_else(missing)?,
            (PathStep::Index(idx), Value::Array(items)) => {
                items.get_mut(*idx).ok_or_else(missing)?
            }
            _ => return Err(missing()),
        };
    }
    match (last, cur) {
        (PathStep::Key(key), Value::Object(map)) => {
            map.insert(key.clone(), Value::Binary(buffer));
        }
        (PathStep::Index(idx), Value::Array(items)) => {
            if *idx >= items.len() {
                items.resize(*idx + 1, Value::Null);
            }
            items[*idx] = Value::Binary(buffer);
        }
        _ => return Err(missing()),
    }
    Ok(())
}
