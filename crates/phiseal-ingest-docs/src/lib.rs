//! Document ingestion for PhiSeal
//!
//! Turns uploaded files into citation-ready text:
//! - `extract`: PDF/DOCX bytes → plain text (+ page boundaries when known)
//! - `spans`: plain text → ordered `p<n>.s<m>` spans with char offsets
//!
//! **Untrusted boundary**: extraction shells out to third-party code (PDF
//! parser, DOCX converter). The span mapper is a pure function of the text it
//! is given, so the same text always yields the same span map and therefore
//! the same seal digest.

pub mod extract;
pub mod spans;

pub use extract::{
    ConverterCommand, DocumentExtractor, ExtractError, ExtractedText, FileKind, TextExtractor,
};
pub use spans::{map_spans, PageBoundary, SpanMap};
