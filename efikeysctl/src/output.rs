// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

//! Output formatting for efikeysctl
//!
//! Commands return their result as a JSON value. In JSON mode it is printed
//! as is on stdout; in text mode it is rendered as indented `key: value`
//! lines. Diagnostics go to stderr through the logger, so stdout only ever
//! carries results.

use crate::config::OutputFormat;
use crate::error::EfikeysctlError;
use serde_json::Value;
use std::error::Error as _;

#[derive(Debug)]
pub struct OutputHandler {
    format: OutputFormat,
    quiet: bool,
}

impl OutputHandler {
    pub fn new(format: OutputFormat, quiet: bool) -> Self {
        Self { format, quiet }
    }

    /// Print a command's result on stdout
    pub fn success(&self, value: Value) {
        let output = match self.format {
            OutputFormat::Json => format_json(&value),
            OutputFormat::Text => format_text(&value, 0),
        };
        if !output.is_empty() {
            println!("{}", output.trim_end());
        }
    }

    /// Print an error: JSON on stdout in JSON mode, text on stderr
    /// otherwise
    pub fn error(&self, error: &EfikeysctlError) {
        match self.format {
            OutputFormat::Json => {
                let mut json = error.to_json();
                json["error"]["message"] = Value::from(error_chain(error));
                println!("{}", format_json(&json));
            }
            OutputFormat::Text => eprintln!("Error: {}", error_chain(error)),
        }
    }

    /// Progress message on stderr, suppressed in quiet mode
    pub fn progress<T: AsRef<str>>(&self, message: T) {
        if !self.quiet {
            eprintln!("{}", message.as_ref());
        }
    }
}

/// The error followed by each of its sources not already part of its
/// message
fn error_chain(error: &EfikeysctlError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// Render a value as indented text.
///
/// A `message` key is printed alone on its line, ahead of the other keys.
fn format_text(value: &Value, indent: usize) -> String {
    let pad = " ".repeat(indent);
    let mut output = String::new();
    match value {
        Value::Object(map) => {
            if let Some(message) = map.get("message") {
                output.push_str(&format!("{pad}{}\n", scalar(message)));
            }
            for (key, value) in map.iter().filter(|(k, _)| *k != "message") {
                match value {
                    Value::Object(_) => {
                        output.push_str(&format!("{pad}{key}:\n"));
                        output.push_str(&format_text(value, indent + 2));
                    }
                    Value::Array(items) if items.is_empty() => {
                        output.push_str(&format!("{pad}{key}: (none)\n"));
                    }
                    Value::Array(_) => {
                        output.push_str(&format!("{pad}{key}:\n"));
                        output.push_str(&format_text(value, indent + 2));
                    }
                    _ => output
                        .push_str(&format!("{pad}{key}: {}\n", scalar(value))),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => {
                        output.push_str(&format!("{pad}-\n"));
                        output.push_str(&format_text(item, indent + 2));
                    }
                    _ => output
                        .push_str(&format!("{pad}- {}\n", scalar(item))),
                }
            }
        }
        other => output.push_str(&format!("{pad}{}\n", scalar(other))),
    }
    output
}
