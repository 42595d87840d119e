use crate::structured::LogEntry;
use crate::LogError;
use chrono::SecondsFormat;
use std::fmt::Write;
use std::str::FromStr;

/// 导出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Txt,
}

impl FromStr for ExportFormat {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "txt" | "text" => Ok(ExportFormat::Txt),
            other => Err(LogError::UnknownFormat(other.to_string())),
        }
    }
}

pub(crate) fn render(entries: &[LogEntry], format: ExportFormat) -> Result<String, LogError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(entries)?),
        ExportFormat::Csv => Ok(to_csv(entries)),
        ExportFormat::Txt => Ok(to_txt(entries)),
    }
}

fn timestamp(entry: &LogEntry) -> String {
    entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn to_csv(entries: &[LogEntry]) -> String {
    let mut out = String::from("timestamp,level,component,message,metadata\n");
    for entry in entries {
        let _ = writeln!(
            out,
            "{},{},{},{},{}",
            timestamp(entry),
            entry.level,
            csv_field(&entry.component),
            csv_field(&entry.message),
            csv_field(&entry.metadata_json()),
        );
    }
    out
}

fn to_txt(entries: &[LogEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(
            out,
            "[{}] {} {}: {}",
            timestamp(entry),
            entry.level.as_str().to_uppercase(),
            entry.component,
            entry.message
        );
    }
    out
}
