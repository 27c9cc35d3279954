pub mod detector;
pub mod parser;
pub mod source;

pub use detector::{ChangeDetector, Cursor, DetectorMode, TailRead};
pub use parser::{parse_line, parse_lines, ParsedBatch};
pub use source::SourceFile;
