//! Structs and functions for generating log messages and bug reports.

use std::thread::JoinHandle;

use super::diagnostic::BugReport;
use crate::prelude::*;

/// A generic log message.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct LogMessage {
    /// The log message.
    pub text: String,
    /// The severity/type of the log message.
    pub level: LogLevel,
    /// The analysis where the message originated.
    pub source: Option<String>,
}

impl LogMessage {
    /// Create a new `Info`-level log message.
    pub fn new_info(text: impl Into<String>) -> LogMessage {
        LogMessage {
            text: text.into(),
            level: LogLevel::Info,
            source: None,
        }
    }

    /// Create a new `Debug`-level log message.
    pub fn new_debug(text: impl Into<String>) -> LogMessage {
        LogMessage {
            text: text.into(),
            level: LogLevel::Debug,
            source: None,
        }
    }

    /// Create a new `Error`-level log message.
    pub fn new_error(text: impl Into<String>) -> LogMessage {
        LogMessage {
            text: text.into(),
            level: LogLevel::Error,
            source: None,
        }
    }

    /// Set the name of the source analysis for the log message.
    pub fn source(mut self, source: impl Into<String>) -> LogMessage {
        self.source = Some(source.into());
        self
    }
}

/// The severity/type of a log message.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub enum LogLevel {
    /// Messages intended for debugging.
    Debug,
    /// Errors encountered during analysis.
    Error,
    /// Non-error messages intended for the user.
    Info,
}

impl std::fmt::Display for LogMessage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.level {
            LogLevel::Debug => write!(formatter, "DEBUG: ")?,
            LogLevel::Error => write!(formatter, "ERROR: ")?,
            LogLevel::Info => write!(formatter, "INFO: ")?,
        };
        if let Some(source) = &self.source {
            write!(formatter, "{source}: ")?;
        }
        write!(formatter, "{}", self.text)
    }
}

/// Print all provided log messages and bug reports.
///
/// Log messages will always be printed to `stdout`.
/// Bug reports will either be printed to `stdout` or to the file path
/// provided in `out_path`. If `emit_json` is set, the reports are converted
/// to JSON for the output.
pub fn print_all_messages(
    logs: Vec<LogMessage>,
    bugs: Vec<BugReport>,
    out_path: Option<&str>,
    emit_json: bool,
) {
    for log in logs {
        println!("{log}");
    }
    let output: String = if emit_json {
        serde_json::to_string_pretty(&bugs).unwrap()
    } else {
        bugs.iter().map(|bug| format!("{bug}")).collect()
    };
    if let Some(file_path) = out_path {
        std::fs::write(file_path, output).unwrap_or_else(|error| {
            panic!("Writing to output path {file_path} failed: {error}")
        });
    } else {
        print!("{output}");
    }
}

/// The message types a logging thread can receive.
/// See the [`LogThread`] type for more information.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub enum LogThreadMsg {
    /// A normal log message.
    Log(LogMessage),
    /// A bug report.
    Bug(BugReport),
    /// If the log collector thread receives this signal,
    /// it should stop receiving new messages
    /// and instead terminate and return the collected messages.
    Terminate,
}

impl From<LogMessage> for LogThreadMsg {
    fn from(msg: LogMessage) -> Self {
        Self::Log(msg)
    }
}

impl From<BugReport> for LogThreadMsg {
    fn from(bug: BugReport) -> Self {
        Self::Bug(bug)
    }
}

/// A type for managing a thread collecting log messages and bug reports
/// while the analysis runs.
///
/// With [`LogThread::spawn()`] one can create a new log thread whose handle
/// is contained in the returned `LogThread` struct. By calling the
/// [`collect()`](LogThread::collect()) method one can tell the log thread to
/// shut down and return the messages collected to this point. If the
/// `LogThread` object gets dropped before calling `collect()`, the
/// corresponding logging thread will be stopped and all collected messages
/// will be discarded.
pub struct LogThread {
    msg_sender: crossbeam_channel::Sender<LogThreadMsg>,
    thread_handle: Option<JoinHandle<(Vec<LogMessage>, Vec<BugReport>)>>,
}

impl Drop for LogThread {
    /// If the logging thread still exists, send it the `Terminate` signal
    /// and then wait until it stopped.
    fn drop(&mut self) {
        let _ = self.msg_sender.send(LogThreadMsg::Terminate);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl LogThread {
    /// Create a new `LogThread` object with a handle to a freshly spawned
    /// logging collector thread.
    ///
    /// The parameter is the function containing the actual log collection
    /// logic, i.e. it should receive messages through the given receiver
    /// until the channel disconnects or until it receives a
    /// [`LogThreadMsg::Terminate`] message.
    pub fn spawn<F>(collector_func: F) -> LogThread
    where
        F: FnOnce(crossbeam_channel::Receiver<LogThreadMsg>) -> (Vec<LogMessage>, Vec<BugReport>)
            + Send
            + 'static,
    {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let thread_handle = std::thread::spawn(move || collector_func(receiver));
        LogThread {
            msg_sender: sender,
            thread_handle: Some(thread_handle),
        }
    }

    /// Just create a disconnected sender to a (non-existing) logging thread.
    /// Can be used like a sender to a channel that deliberately discards all
    /// messages sent to it.
    pub fn create_disconnected_sender() -> crossbeam_channel::Sender<LogThreadMsg> {
        let (sender, _) = crossbeam_channel::unbounded();
        sender
    }

    /// Get a sender that can be used to send messages to the logging thread
    /// corresponding to this `LogThread` instance.
    pub fn get_msg_sender(&self) -> crossbeam_channel::Sender<LogThreadMsg> {
        self.msg_sender.clone()
    }

    /// Stop the logging thread by sending it the `Terminate` signal
    /// and then return all messages collected until that point.
    pub fn collect(mut self) -> (Vec<LogMessage>, Vec<BugReport>) {
        let _ = self.msg_sender.send(LogThreadMsg::Terminate);
        if let Some(handle) = self.thread_handle.take() {
            handle.join().unwrap()
        } else {
            (Vec::new(), Vec::new())
        }
    }

    /// A standard collector function for [`LogThread::spawn`]:
    /// collects messages until a [`LogThreadMsg::Terminate`] signal is
    /// received and deduplicates identical bug reports.
    pub fn collect_and_deduplicate(
        receiver: crossbeam_channel::Receiver<LogThreadMsg>,
    ) -> (Vec<LogMessage>, Vec<BugReport>) {
        let mut logs = Vec::new();
        let mut bugs = Vec::new();
        while let Ok(msg) = receiver.recv() {
            match msg {
                LogThreadMsg::Log(log) => logs.push(log),
                LogThreadMsg::Bug(bug) => {
                    if !bugs.contains(&bug) {
                        bugs.push(bug);
                    }
                }
                LogThreadMsg::Terminate => break,
            }
        }
        (logs, bugs)
    }
}
