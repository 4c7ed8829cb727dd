use std::{
    fs::File,
    io::Write as _,
    path::Path,
};

use crate::error::{MashError, MashResult};

/// Incremental notebook/markdown writer.
///
/// The source is pre-split on `n"""…"""` note markers into code segments.
/// Each executed note flushes the pending code segment as a fenced block,
/// followed by an `_[Output]:_` block when the segment printed anything, and
/// then the note text verbatim. `finish` flushes whatever remains after the
/// last note.
#[derive(Debug)]
pub struct Notebook {
    file: File,
    segments: Vec<String>,
    next_segment: usize,
    output: String,
}

impl Notebook {
    pub fn create(path: &Path, source: &str) -> MashResult<Self> {
        let file = File::create(path)
            .map_err(|err| MashError::internal(format!("Cannot create notebook output '{}': {err}", path.display())))?;
        Ok(Self {
            file,
            segments: split_segments(source),
            next_segment: 0,
            output: String::new(),
        })
    }

    /// Collects program output printed during the current code segment.
    pub fn on_print(&mut self, text: &str) {
        self.output.push_str(text);
    }

    pub fn on_note(&mut self, text: &str) -> MashResult<()> {
        self.flush_segment()?;
        self.write(text)?;
        self.write("\n\n")
    }

    pub fn finish(&mut self) -> MashResult<()> {
        while self.next_segment < self.segments.len() {
            self.flush_segment()?;
        }
        Ok(())
    }

    fn flush_segment(&mut self) -> MashResult<()> {
        let code = self
            .segments
            .get(self.next_segment)
            .map(|s| s.trim().to_owned())
            .unwrap_or_default();
        self.next_segment += 1;
        if !code.is_empty() {
            let block = format!("```\n{code}\n```\n");
            self.write(&block)?;
        }
        if !self.output.is_empty() {
            let block = format!("_[Output]:_\n\n```\n{}\n```\n", self.output.trim_end_matches('\n'));
            self.write(&block)?;
            self.output.clear();
        }
        Ok(())
    }

    fn write(&mut self, text: &str) -> MashResult<()> {
        self.file
            .write_all(text.as_bytes())
            .map_err(|err| MashError::internal(format!("Failed writing notebook output: {err}")))
    }
}

/// Splits source text into the code runs between `n"""…"""` note markers.
fn split_segments(source: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut rest = source;
    while let Some(start) = rest.find("n\"\"\"") {
        segments.push(rest[..start].to_owned());
        let after = &rest[start + 4..];
        match after.find("\"\"\"") {
            Some(end) => rest = &after[end + 3..],
            None => {
                rest = "";
                break;
            }
        }
    }
    segments.push(rest.to_owned());
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_note_markers() {
        let source = "a = 1\nn\"\"\"first note\"\"\"\nb = 2\nn\"\"\"second\"\"\"\nc = 3\n";
        let segments = split_segments(source);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].trim(), "a = 1");
        assert_eq!(segments[1].trim(), "b = 2");
        assert_eq!(segments[2].trim(), "c = 3");
    }

    #[test]
    fn source_without_notes_is_one_segment() {
        assert_eq!(split_segments("a = 1").len(), 1);
    }
}
