use serde_json::Value;

/// Structured fields attached to a log record
pub type Fields = [(&'static str, Value)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Logger handed to extensions; records are attributed to the extension
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, fields: &Fields);

    fn debug(&self, message: &str, fields: &Fields) {
        self.log(LogLevel::Debug, message, fields);
    }

    fn info(&self, message: &str, fields: &Fields) {
        self.log(LogLevel::Info, message, fields);
    }

    fn warn(&self, message: &str, fields: &Fields) {
        self.log(LogLevel::Warn, message, fields);
    }

    fn error(&self, message: &str, fields: &Fields) {
        self.log(LogLevel::Error, message, fields);
    }
}
