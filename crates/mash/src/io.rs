use std::io::{self, Write as _};

use crate::error::{MashError, MashResult};

/// Trait for handling interpreter output.
///
/// Implement this to capture or redirect output from evaluated Mash code.
/// Print instructions never append separators or newlines on their own; the
/// written text is exactly what the program produced.
pub trait PrintWriter {
    fn write(&mut self, output: &str) -> MashResult<()>;
}

/// Default `PrintWriter` that writes to stdout.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write(&mut self, output: &str) -> MashResult<()> {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.as_bytes())
            .and_then(|()| handle.flush())
            .map_err(|err| MashError::internal(format!("Failed writing to stdout: {err}")))
    }
}

/// A `PrintWriter` that collects all output into a string.
///
/// Useful for testing or capturing program output programmatically.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn write(&mut self, output: &str) -> MashResult<()> {
        self.0.push_str(output);
        Ok(())
    }
}

/// `PrintWriter` that ignores all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write(&mut self, _output: &str) -> MashResult<()> {
        Ok(())
    }
}
