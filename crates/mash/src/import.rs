use std::{io::ErrorKind as IoErrorKind, path::PathBuf};

use crate::error::{ErrorKind, MashError, MashResult};

/// Locates a module on the search path and reads its source.
///
/// A dotted module path maps onto subdirectories: `a::b` is looked up as
/// `a/b.ms` under each search directory in order; the first existing file
/// wins. Missing, unreadable and permission-denied files are all
/// ImportErrors with distinct messages.
pub fn load_module(lib_paths: &[PathBuf], path: &[String]) -> MashResult<String> {
    let mut relative = PathBuf::new();
    for seg in path {
        relative.push(seg);
    }
    relative.set_extension("ms");

    let display = path.join("::");
    for dir in lib_paths {
        let candidate = dir.join(&relative);
        if !candidate.is_file() {
            continue;
        }
        return std::fs::read_to_string(&candidate).map_err(|err| {
            let message = match err.kind() {
                IoErrorKind::PermissionDenied => {
                    format!("Permission denied reading module '{display}' at '{}'", candidate.display())
                }
                _ => format!("Cannot read module '{display}' at '{}': {err}", candidate.display()),
            };
            MashError::new(ErrorKind::ImportError, message)
        });
    }
    Err(MashError::new(
        ErrorKind::ImportError,
        format!("Module '{display}' not found"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_module_is_an_import_error() {
        let err = load_module(&[PathBuf::from(".")], &["no_such_module_xyz".to_owned()]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ImportError);
        assert!(err.message.contains("not found"));
    }
}
