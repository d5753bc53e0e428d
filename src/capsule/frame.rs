// src/capsule/frame.rs

//! Recorded stack frames and backtrace parsing.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One recorded `(location, line)` pair of a captured failure.
///
/// `function` is kept when the backtrace had a symbol for the frame; it is
/// only used for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub location: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

impl Frame {
    pub fn new(location: impl Into<String>, line: u32) -> Self {
        Self {
            location: location.into(),
            line,
            function: None,
        }
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(function) => write!(f, "{}:{} in {}", self.location, self.line, function),
            None => write!(f, "{}:{}", self.location, self.line),
        }
    }
}

static SYMBOL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+:\s+(?P<symbol>.+?)\s*$").expect("valid regex"));

static LOCATION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*at\s+(?P<file>.+?):(?P<line>\d+)(?::\d+)?\s*$").expect("valid regex")
});

/// Symbols that belong to the runtime or to the capture machinery rather
/// than to the code that failed.
const HIDDEN_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "anyhow::",
    "<anyhow::",
    "lockstep::capsule::",
    "__rust",
];

/// Parse the rendered form of a `std::backtrace::Backtrace` into frames,
/// outermost frame first.
///
/// Unknown lines are skipped; an unparseable or disabled backtrace yields an
/// empty list.
pub fn parse_backtrace(rendered: &str) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut symbol: Option<String> = None;

    for line in rendered.lines() {
        if let Some(caps) = LOCATION_LINE.captures(line) {
            let Ok(lineno) = caps["line"].parse::<u32>() else {
                continue;
            };
            let file = &caps["file"];
            if is_hidden(file, symbol.as_deref()) {
                continue;
            }
            let mut frame = Frame::new(file, lineno);
            if let Some(sym) = &symbol {
                frame = frame.with_function(sym.clone());
            }
            frames.push(frame);
        } else if let Some(caps) = SYMBOL_LINE.captures(line) {
            symbol = Some(strip_hash(&caps["symbol"]).to_string());
        }
    }

    // Backtraces list the innermost frame first.
    frames.reverse();
    frames
}

fn is_hidden(file: &str, symbol: Option<&str>) -> bool {
    if file.starts_with("/rustc/") {
        return true;
    }
    symbol.is_some_and(|s| HIDDEN_PREFIXES.iter().any(|p| s.starts_with(p)))
}

/// Drop the trailing `::h0123abcd` disambiguator from legacy-mangled symbols.
fn strip_hash(symbol: &str) -> &str {
    match symbol.rsplit_once("::h") {
        Some((head, tail)) if tail.len() == 16 && tail.chars().all(|c| c.is_ascii_hexdigit()) => {
            head
        }
        _ => symbol,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
   0: std::backtrace_rs::backtrace::libunwind::trace
             at /rustc/abc/library/std/src/../../backtrace/src/backtrace/libunwind.rs:116:5
   1: anyhow::error::<impl anyhow::Error>::msg
             at /home/u/.cargo/registry/src/anyhow-1.0.100/src/error.rs:83:36
   2: demo::server::bind
             at ./src/server.rs:42:13
   3: demo::main::h0123456789abcdef
             at ./src/main.rs:7:5
   4: core::ops::function::FnOnce::call_once
             at /rustc/abc/library/core/src/ops/function.rs:250:5
";

    #[test]
    fn frames_are_outermost_first_and_runtime_frames_are_hidden() {
        let frames = parse_backtrace(SAMPLE);
        assert_eq!(
            frames,
            vec![
                Frame::new("./src/main.rs", 7).with_function("demo::main"),
                Frame::new("./src/server.rs", 42).with_function("demo::server::bind"),
            ]
        );
    }

    #[test]
    fn disabled_backtrace_yields_no_frames() {
        assert!(parse_backtrace("disabled backtrace").is_empty());
        assert!(parse_backtrace("").is_empty());
    }

    #[test]
    fn location_without_column_is_accepted() {
        let frames = parse_backtrace("   0: demo::f\n             at src/lib.rs:12\n");
        assert_eq!(frames, vec![Frame::new("src/lib.rs", 12).with_function("demo::f")]);
    }

    #[test]
    fn frame_display_includes_function_when_known() {
        assert_eq!(Frame::new("src/a.rs", 3).to_string(), "src/a.rs:3");
        assert_eq!(
            Frame::new("src/a.rs", 3).with_function("a::b").to_string(),
            "src/a.rs:3 in a::b"
        );
    }
}
