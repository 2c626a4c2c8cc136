use crate::prompt::{CYAN, RED, RESET};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// True for names whose last extension is `.config` or `.json`.
pub fn is_config_file(name: &str) -> bool {
    match name.rfind('.') {
        Some(dot) => matches!(&name[dot..], ".config" | ".json"),
        None => false,
    }
}

/// Prints every configuration file under `root`, depth first.
///
/// Symlinks are not followed and the working directory is left alone.
/// Unreadable entries are reported and skipped. Returns the number of files
/// printed.
pub fn scan(root: &Path, out: &mut dyn Write) -> io::Result<usize> {
    let mut found = 0;
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                writeln!(out, "scan: {err}")?;
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_config_file(&entry.file_name().to_string_lossy()) {
            continue;
        }

        let path = entry.path();
        match fs::read(path) {
            Ok(contents) => {
                let shown = path.display();
                writeln!(out, "{RED}Config file found: {shown}\nContents of {shown}:{CYAN}")?;
                out.write_all(&contents)?;
                writeln!(out, "{RESET}")?;
                found += 1;
            }
            Err(err) => writeln!(out, "scan: {}: {err}", path.display())?,
        }
    }
    debug!(root = %root.display(), found, "scan finished");
    Ok(found)
}
