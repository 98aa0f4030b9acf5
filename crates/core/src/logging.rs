//! Logging bootstrap: filter selection, the rolling file sink with its
//! console-only fallback, and redaction of chat-bot credentials before
//! anything reaches disk.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use tracing::Metadata;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriter;

pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_NOISE_FILTER: &str = "hyper=warn,hyper_util=warn,reqwest=warn,tungstenite=warn";
pub const DEFAULT_LOG_RETENTION_FILES: usize = 14;
pub const DEFAULT_LOG_DIR_NAME: &str = "logs";
pub const DEFAULT_LOG_FILE_PREFIX: &str = "vidgen";
pub const DEFAULT_LOG_FILE_SUFFIX: &str = "log";
pub const REDACTION_PLACEHOLDER: &str = "***REDACTED***";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingInitOptions {
    pub data_dir: Option<PathBuf>,
    pub verbose: u8,
    pub cli_log_filter: Option<String>,
    pub rust_log_env: Option<String>,
    pub default_log_filter: String,
    pub noise_filter: String,
    pub retention_files: usize,
}

impl Default for LoggingInitOptions {
    fn default() -> Self {
        Self {
            data_dir: None,
            verbose: 0,
            cli_log_filter: None,
            rust_log_env: None,
            default_log_filter: DEFAULT_LOG_FILTER.to_string(),
            noise_filter: DEFAULT_NOISE_FILTER.to_string(),
            retention_files: DEFAULT_LOG_RETENTION_FILES,
        }
    }
}

#[derive(Debug)]
pub struct LoggingInitPlan {
    pub filter: String,
    pub file_sink: FileSinkPlan,
}

#[derive(Debug)]
pub enum FileSinkPlan {
    Ready(ReadyFileSinkPlan),
    Fallback(FallbackFileSinkPlan),
}

#[derive(Debug)]
pub struct ReadyFileSinkPlan {
    pub log_dir: PathBuf,
    pub retention_files: usize,
    pub appender: RollingFileAppender,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackFileSinkPlan {
    pub attempted_log_dir: Option<PathBuf>,
    pub reason: String,
}

impl FileSinkPlan {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            Self::Ready(_) => None,
            Self::Fallback(plan) => Some(plan.reason.as_str()),
        }
    }
}

pub fn compose_logging_init_plan(options: &LoggingInitOptions) -> LoggingInitPlan {
    LoggingInitPlan {
        filter: select_log_filter(options),
        file_sink: build_file_sink_plan(options),
    }
}

/// Filter precedence: explicit --log-filter beats -v/-vv beats RUST_LOG
/// beats the default. The noise filter only rides along when nothing
/// explicit was asked for.
pub fn select_log_filter(options: &LoggingInitOptions) -> String {
    let user_filter = if let Some(filter) = options.cli_log_filter.as_deref() {
        filter.to_string()
    } else if options.verbose >= 2 {
        "trace".to_string()
    } else if options.verbose == 1 {
        "debug".to_string()
    } else if let Some(filter) = options.rust_log_env.as_deref() {
        filter.to_string()
    } else {
        options.default_log_filter.clone()
    };

    let implicit = options.cli_log_filter.is_none() && options.verbose == 0;
    if implicit && !options.noise_filter.trim().is_empty() {
        format!("{},{user_filter}", options.noise_filter)
    } else {
        user_filter
    }
}

pub fn build_file_sink_plan(options: &LoggingInitOptions) -> FileSinkPlan {
    let retention_files = if options.retention_files == 0 {
        DEFAULT_LOG_RETENTION_FILES
    } else {
        options.retention_files
    };

    let Some(data_dir) = options.data_dir.as_deref() else {
        return FileSinkPlan::Fallback(FallbackFileSinkPlan {
            attempted_log_dir: None,
            reason: "file sink disabled: data_dir is not configured".to_string(),
        });
    };

    let log_dir = data_dir.join(DEFAULT_LOG_DIR_NAME);
    if let Err(error) = fs::create_dir_all(&log_dir) {
        return FileSinkPlan::Fallback(FallbackFileSinkPlan {
            attempted_log_dir: Some(log_dir),
            reason: format!("failed to create log directory: {error}"),
        });
    }

    let appender_builder = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(DEFAULT_LOG_FILE_PREFIX)
        .filename_suffix(DEFAULT_LOG_FILE_SUFFIX)
        .max_log_files(retention_files);

    match appender_builder.build(&log_dir) {
        Ok(appender) => FileSinkPlan::Ready(ReadyFileSinkPlan {
            log_dir,
            retention_files,
            appender,
        }),
        Err(error) => FileSinkPlan::Fallback(FallbackFileSinkPlan {
            attempted_log_dir: Some(log_dir),
            reason: format!("failed to initialize rolling file sink: {error}"),
        }),
    }
}

#[derive(Debug)]
pub struct RedactingMakeWriter<M> {
    inner: M,
}

#[derive(Debug)]
pub struct RedactingWriter<W: Write> {
    inner: W,
    pending: Vec<u8>,
}

pub fn redacting_make_writer<M>(inner: M) -> RedactingMakeWriter<M> {
    RedactingMakeWriter { inner }
}

impl<'a, M> MakeWriter<'a> for RedactingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: self.inner.make_writer(),
            pending: Vec::new(),
        }
    }

    fn make_writer_for(&'a self, metadata: &Metadata<'_>) -> Self::Writer {
        RedactingWriter {
            inner: self.inner.make_writer_for(metadata),
            pending: Vec::new(),
        }
    }
}

impl<W: Write> RedactingWriter<W> {
    fn flush_complete_lines(&mut self) -> io::Result<()> {
        while let Some(newline_index) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline_index).collect();
            self.write_redacted_bytes(&line)?;
        }
        Ok(())
    }

    fn flush_all_pending(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let chunk: Vec<u8> = self.pending.drain(..).collect();
            self.write_redacted_bytes(&chunk)?;
        }
        Ok(())
    }

    fn write_redacted_bytes(&mut self, chunk: &[u8]) -> io::Result<()> {
        let text = String::from_utf8_lossy(chunk);
        let redacted = redact_sensitive_text(text.as_ref());
        self.inner.write_all(redacted.as_bytes())
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.flush_complete_lines()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_all_pending()?;
        self.inner.flush()
    }
}

impl<W: Write> Drop for RedactingWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush_all_pending();
        let _ = self.inner.flush();
    }
}

/// Mask bot tokens wherever they can leak into a log line: inside Bot API
/// URLs (`/bot<token>/method`) and in `token=`-style assignments.
pub fn redact_sensitive_text(input: &str) -> String {
    redact_token_assignments(&redact_bot_url_tokens(input))
}

fn redact_bot_url_tokens(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut cursor = 0;

    while let Some(offset) = input[cursor..].find("/bot") {
        let token_start = cursor + offset + "/bot".len();
        let token_end = input[token_start..]
            .find(|ch: char| matches!(ch, '/' | ' ' | '"' | '\'' | '\t' | '\r' | '\n'))
            .map(|o| token_start + o)
            .unwrap_or(input.len());

        // Telegram tokens are `<digits>:<secret>`; leave other /bot…
        // path segments alone.
        let candidate = &input[token_start..token_end];
        let looks_like_token = candidate
            .split_once(':')
            .is_some_and(|(id, secret)| {
                !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) && !secret.is_empty()
            });

        output.push_str(&input[cursor..token_start]);
        if looks_like_token {
            output.push_str(REDACTION_PLACEHOLDER);
        } else {
            output.push_str(candidate);
        }
        cursor = token_end;
    }

    output.push_str(&input[cursor..]);
    output
}

fn redact_token_assignments(input: &str) -> String {
    const SENSITIVE_KEYS: [&str; 3] = ["bot_token", "api_key", "token"];

    let mut output = String::with_capacity(input.len());
    for (index, segment) in input.split_whitespace().enumerate() {
        if index > 0 {
            output.push(' ');
        }

        match segment.split_once('=') {
            Some((key, value))
                if !value.is_empty()
                    && SENSITIVE_KEYS
                        .iter()
                        .any(|k| key.trim_matches('"').eq_ignore_ascii_case(k)) =>
            {
                output.push_str(key);
                output.push('=');
                output.push_str(REDACTION_PLACEHOLDER);
            }
            _ => output.push_str(segment),
        }
    }

    // Preserve the trailing newline tracing writes per line.
    if input.ends_with('\n') {
        output.push('\n');
    }
    output
}
