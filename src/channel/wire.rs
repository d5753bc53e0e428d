// src/channel/wire.rs

//! Frames exchanged between the coordinator and a worker process.
//!
//! Downstream frames (coordinator -> worker) travel over the worker's stdin,
//! one JSON document per line; stdin belongs to the protocol alone.
//!
//! Upstream frames (worker -> coordinator) share stdout with whatever the
//! worker code prints, so each frame is prefixed with [`MARKER`]. Anything
//! before the marker on a line, and any line without it, is plain output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capsule::FailureCapsule;
use crate::types::Options;

/// Prefix of every upstream frame on the worker's stdout.
pub const MARKER: &str = "\u{1e}lockstep ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Downstream {
    Init {
        name: String,
        initial: Options,
        #[serde(default)]
        args: Value,
    },
    SharedOptions {
        options: Options,
    },
    Run,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Upstream {
    Contribution { options: Options },
    Ready,
    Failure { capsule: FailureCapsule },
}

/// A line read from a worker's stdout.
#[derive(Debug)]
pub enum StdoutLine<'a> {
    /// Plain output with no frame in it.
    Output(&'a str),
    /// A frame, possibly preceded by unterminated output.
    Frame {
        output: Option<&'a str>,
        frame: serde_json::Result<Upstream>,
    },
}

pub fn encode_downstream(frame: &Downstream) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_downstream(line: &str) -> serde_json::Result<Downstream> {
    serde_json::from_str(line.trim_end())
}

pub fn encode_upstream(frame: &Upstream) -> serde_json::Result<String> {
    let json = serde_json::to_string(frame)?;
    Ok(format!("{MARKER}{json}\n"))
}

pub fn classify_stdout(line: &str) -> StdoutLine<'_> {
    let line = line.trim_end_matches(['\r', '\n']);
    match line.find(MARKER) {
        None => StdoutLine::Output(line),
        Some(at) => {
            let output = Some(&line[..at]).filter(|s| !s.is_empty());
            let frame = serde_json::from_str(&line[at + MARKER.len()..]);
            StdoutLine::Frame { output, frame }
        }
    }
}
