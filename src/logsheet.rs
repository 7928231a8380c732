// Mon Feb 2 2026 - Alex

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

const TEXT_OPEN: &str = "[<[";
const TEXT_CLOSE: &str = "]>]";

/// Escape embedded newlines as the two-character sequence `\n` so every
/// entry stays one physical line.
pub fn escape_newlines(s: &str) -> String {
    s.replace('\n', "\\n")
}

/// Wrap a free-text field in its delimiter markers, escaping newlines.
pub fn quoted(s: &str) -> String {
    format!("{}{}{}", TEXT_OPEN, escape_newlines(s), TEXT_CLOSE)
}

/// Structured per-worker log: a commented field-name header, then one
/// numbered whitespace-separated entry per line.
pub struct Logsheet {
    file: File,
    entries: u64,
}

impl Logsheet {
    pub fn create(path: &Path, description: &str) -> io::Result<Self> {
        let mut file = OpenOptions::new().create_new(true).append(true).open(path)?;
        writeln!(file, "# {}", description)?;
        Ok(Self { file, entries: 0 })
    }

    /// Append one entry; `line` holds every field after EntryType/EntryNum.
    pub fn append(&mut self, line: &str) -> io::Result<()> {
        self.entries += 1;
        writeln!(self.file, "E {:010} {}", self.entries, line)?;
        self.file.flush()
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_header_and_numbering() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0-0.log");

        let mut log = Logsheet::create(&path, "EntryType EntryNum SearchID").unwrap();
        log.append("S1 ok").unwrap();
        log.append("S2 ok").unwrap();
        assert_eq!(log.entries(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# EntryType EntryNum SearchID");
        assert_eq!(lines[1], "E 0000000001 S1 ok");
        assert_eq!(lines[2], "E 0000000002 S2 ok");
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dup.log");
        Logsheet::create(&path, "x").unwrap();
        assert!(Logsheet::create(&path, "x").is_err());
    }

    #[test]
    fn test_quoted_escapes_newlines() {
        assert_eq!(quoted("two\nlines"), "[<[two\\nlines]>]");
        assert_eq!(quoted(""), "[<[]>]");
    }
}
