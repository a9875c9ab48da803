//! Text extraction boundary.
//!
//! PDF goes through `pdf-extract` (feature `pdf`). DOCX goes through an
//! external converter (pandoc by default) run with a timeout, since the
//! upload is untrusted and conversion can hang.

use std::fs::File;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::spans::PageBoundary;

pub const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 60;

/// Placeholder replaced by the input file path in a converter command.
pub const INPUT_PLACEHOLDER: &str = "{input}";

#[cfg_attr(not(feature = "pdf"), allow(dead_code))]
const PDF_METHOD: &str = "pdf-extract_v0.7";
const FORM_FEED: char = '\u{c}';

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("{0} extraction not enabled in this build")]
    FeatureDisabled(&'static str),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("DOCX converter failed: {0}")]
    Converter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no text could be extracted from the document")]
    NoText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Docx,
}

impl FileKind {
    /// Resolve a declared type: `pdf`, `docx` or one of their MIME types.
    pub fn from_declared(file_type: &str) -> Result<Self, ExtractError> {
        match file_type.trim().to_ascii_lowercase().as_str() {
            "pdf" | "application/pdf" => Ok(Self::Pdf),
            "docx"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Ok(Self::Docx)
            }
            _ => Err(ExtractError::UnsupportedFormat(file_type.to_string())),
        }
    }

    /// A non-empty declared type decides on its own; the file name's
    /// extension is only consulted when nothing was declared.
    pub fn detect(file_type: &str, file_name: &str) -> Result<Self, ExtractError> {
        if !file_type.trim().is_empty() {
            return Self::from_declared(file_type);
        }
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => Ok(Self::Pdf),
            Some("docx") => Ok(Self::Docx),
            _ => Err(ExtractError::UnsupportedFormat(file_name.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub text: String,
    /// Empty when the source has no page structure (DOCX).
    pub page_boundaries: Vec<PageBoundary>,
    /// Extractor tag recorded in analysis metadata.
    pub method: String,
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], kind: FileKind) -> Result<ExtractedText, ExtractError>;
}

/// External command used for DOCX conversion. `{input}` in `args` is replaced
/// with the path of the uploaded file; the converter writes text to stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ConverterCommand {
    pub fn pandoc() -> Self {
        Self {
            program: "pandoc".to_string(),
            args: ["--from", "docx", "--to", "plain", "--wrap=none", INPUT_PLACEHOLDER]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Parse a whitespace-separated command line. If `{input}` is absent the
    /// path is appended as the last argument.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        let mut args: Vec<String> = parts.collect();
        if !args.iter().any(|a| a.contains(INPUT_PLACEHOLDER)) {
            args.push(INPUT_PLACEHOLDER.to_string());
        }
        Some(Self { program, args })
    }

    fn method_tag(&self) -> String {
        let name = std::path::Path::new(&self.program)
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.clone());
        format!("{name}_docx")
    }
}

#[derive(Debug, Clone)]
pub struct DocumentExtractor {
    pub docx_command: Option<ConverterCommand>,
    pub timeout: Duration,
}

impl Default for DocumentExtractor {
    fn default() -> Self {
        Self {
            docx_command: Some(ConverterCommand::pandoc()),
            timeout: Duration::from_secs(DEFAULT_EXTRACT_TIMEOUT_SECS),
        }
    }
}

impl DocumentExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_docx_command(mut self, command: Option<ConverterCommand>) -> Self {
        self.docx_command = command;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn extract_docx(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
        let command = self
            .docx_command
            .as_ref()
            .ok_or(ExtractError::FeatureDisabled("DOCX"))?;

        let input = TempPath::write("upload.docx", bytes)?;
        let input_str = input.0.to_string_lossy().to_string();

        let mut cmd = Command::new(&command.program);
        for arg in &command.args {
            cmd.arg(arg.replace(INPUT_PLACEHOLDER, &input_str));
        }
        debug!(program = %command.program, "running DOCX converter");

        let output = run_with_timeout(cmd, self.timeout)?;
        if !output.success {
            warn!(program = %command.program, "DOCX converter exited with an error");
            return Err(ExtractError::Converter(output.stderr.trim().to_string()));
        }

        Ok(ExtractedText {
            text: output.stdout,
            page_boundaries: Vec::new(),
            method: command.method_tag(),
        })
    }
}

impl TextExtractor for DocumentExtractor {
    fn extract(&self, bytes: &[u8], kind: FileKind) -> Result<ExtractedText, ExtractError> {
        let extracted = match kind {
            FileKind::Pdf => extract_pdf(bytes)?,
            FileKind::Docx => self.extract_docx(bytes)?,
        };
        if extracted.text.trim().is_empty() {
            return Err(ExtractError::NoText);
        }
        Ok(extracted)
    }
}

#[cfg(feature = "pdf")]
fn extract_pdf(bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
    use pdf_extract::extract_text_from_mem;

    let raw = extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let (text, page_boundaries) = split_pages(&raw);
    Ok(ExtractedText {
        text,
        page_boundaries,
        method: PDF_METHOD.to_string(),
    })
}

#[cfg(not(feature = "pdf"))]
fn extract_pdf(_bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
    Err(ExtractError::FeatureDisabled("PDF"))
}

/// Replace form feeds with newlines and record where each page starts.
pub fn split_pages(raw: &str) -> (String, Vec<PageBoundary>) {
    let mut text = String::with_capacity(raw.len());
    let mut boundaries = vec![PageBoundary {
        page: 1,
        char_offset: 0,
    }];
    let mut chars = 0usize;
    for c in raw.chars() {
        if c == FORM_FEED {
            text.push('\n');
            chars += 1;
            boundaries.push(PageBoundary {
                page: boundaries.len() + 1,
                char_offset: chars,
            });
        } else {
            text.push(c);
            chars += 1;
        }
    }
    // A trailing form feed does not start a real page.
    if boundaries.len() > 1 && boundaries.last().map(|b| b.char_offset) == Some(chars) {
        boundaries.pop();
    }
    (text, boundaries)
}

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Temp file removed on drop.
struct TempPath(PathBuf);

impl TempPath {
    fn write(suffix: &str, contents: &[u8]) -> Result<Self, ExtractError> {
        let path = unique_temp_path(suffix);
        std::fs::write(&path, contents)?;
        Ok(Self(path))
    }

    fn create(suffix: &str) -> Result<(Self, File), ExtractError> {
        let path = unique_temp_path(suffix);
        let file = File::create(&path)?;
        Ok((Self(path), file))
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn unique_temp_path(suffix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut path = std::env::temp_dir();
    path.push(format!("phiseal_{}_{nanos}_{suffix}", std::process::id()));
    path
}

/// Output goes to temp files rather than pipes so a chatty converter cannot
/// block on a full pipe while we poll.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<CommandOutput, ExtractError> {
    let (stdout_path, stdout_file) = TempPath::create("stdout.txt")?;
    let (stderr_path, stderr_file) = TempPath::create("stderr.txt")?;
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::from(stdout_file));
    cmd.stderr(Stdio::from(stderr_file));

    let mut child = cmd
        .spawn()
        .map_err(|e| ExtractError::Converter(format!("failed to spawn converter: {e}")))?;

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExtractError::Converter(format!(
                "converter timed out after {}s",
                timeout.as_secs()
            )));
        }
        std::thread::sleep(Duration::from_millis(25));
    };

    let stdout = std::fs::read(&stdout_path.0)?;
    let stderr = std::fs::read(&stderr_path.0)?;
    Ok(CommandOutput {
        success: status.success(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_declared_type_then_extension() {
        assert_eq!(FileKind::detect("pdf", "x.bin").unwrap(), FileKind::Pdf);
        assert_eq!(
            FileKind::detect("application/pdf", "").unwrap(),
            FileKind::Pdf
        );
        assert_eq!(FileKind::detect("", "Report.DOCX").unwrap(), FileKind::Docx);
        assert!(matches!(
            FileKind::detect("text/plain", "notes.txt"),
            Err(ExtractError::UnsupportedFormat(t)) if t == "text/plain"
        ));
    }

    #[test]
    fn declared_type_is_not_overridden_by_extension() {
        assert!(matches!(
            FileKind::detect("txt", "report.pdf"),
            Err(ExtractError::UnsupportedFormat(t)) if t == "txt"
        ));
        assert!(FileKind::from_declared("").is_err());
        assert!(FileKind::from_declared("txt").is_err());
        assert_eq!(
            FileKind::from_declared(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            )
            .unwrap(),
            FileKind::Docx
        );
        assert!(matches!(
            FileKind::detect("", "notes.txt"),
            Err(ExtractError::UnsupportedFormat(t)) if t == "notes.txt"
        ));
    }

    #[test]
    fn form_feeds_become_page_boundaries() {
        let (text, pages) = split_pages("one\u{c}two\u{c}three\u{c}");
        assert_eq!(text, "one\ntwo\nthree\n");
        assert_eq!(
            pages,
            vec![
                PageBoundary { page: 1, char_offset: 0 },
                PageBoundary { page: 2, char_offset: 4 },
                PageBoundary { page: 3, char_offset: 8 },
            ]
        );
    }

    #[test]
    fn converter_command_appends_input_when_missing() {
        let cmd = ConverterCommand::parse("docx2txt").unwrap();
        assert_eq!(cmd.args, vec![INPUT_PLACEHOLDER.to_string()]);
        let cmd = ConverterCommand::parse("pandoc -t plain {input}").unwrap();
        assert_eq!(cmd.args.len(), 3);
        assert!(ConverterCommand::parse("   ").is_none());
    }

    #[test]
    fn disabled_docx_is_reported() {
        let extractor = DocumentExtractor::new().with_docx_command(None);
        assert!(matches!(
            extractor.extract(b"PK", FileKind::Docx),
            Err(ExtractError::FeatureDisabled("DOCX"))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn converter_stdout_is_the_text() {
        let extractor = DocumentExtractor::new().with_docx_command(Some(ConverterCommand {
            program: "cat".to_string(),
            args: vec![INPUT_PLACEHOLDER.to_string()],
        }));
        let out = extractor
            .extract(b"Plain body. Second sentence.", FileKind::Docx)
            .unwrap();
        assert_eq!(out.text, "Plain body. Second sentence.");
        assert_eq!(out.method, "cat_docx");
        assert!(out.page_boundaries.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn empty_converter_output_is_no_text() {
        let extractor = DocumentExtractor::new().with_docx_command(Some(ConverterCommand {
            program: "true".to_string(),
            args: vec![],
        }));
        assert!(matches!(
            extractor.extract(b"x", FileKind::Docx),
            Err(ExtractError::NoText)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn slow_converter_times_out() {
        let extractor = DocumentExtractor::new()
            .with_timeout(Duration::from_millis(100))
            .with_docx_command(Some(ConverterCommand {
                program: "sleep".to_string(),
                args: vec!["5".to_string()],
            }));
        assert!(matches!(
            extractor.extract(b"x", FileKind::Docx),
            Err(ExtractError::Converter(msg)) if msg.contains("timed out")
        ));
    }
}
