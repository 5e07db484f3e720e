use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::admin::{AdminError, Result};
use crate::storage::{Document, StorageManager};
use crate::types::OpContext;

/// Outcome of a JSON-lines load.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// Target namespace.
    pub ns: String,
    /// Documents stored.
    pub inserted: u64,
    /// Documents the store accepted without storing (ignored index definitions).
    pub ignored: u64,
    /// Blank lines skipped.
    pub blank_lines: u64,
}

/// Inserts every line of `path` as one document into `ns`.
///
/// Lines must hold JSON objects; blank lines are skipped. The first line that
/// fails to parse or insert stops the load with an error naming its line
/// number, leaving earlier documents in place.
pub fn load_json_lines(
    store: &StorageManager,
    ctx: &OpContext,
    ns: &str,
    path: &Path,
) -> Result<LoadReport> {
    if !path.exists() {
        return Err(AdminError::missing_input(path));
    }
    let reader = BufReader::new(File::open(path)?);
    let mut report = LoadReport {
        ns: ns.to_owned(),
        ..LoadReport::default()
    };
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let lineno = idx + 1;
        if line.trim().is_empty() {
            report.blank_lines += 1;
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .map_err(|err| AdminError::Message(format!("{}:{lineno}: {err}", path.display())))?;
        let doc = Document::try_from(value)
            .map_err(|err| AdminError::Message(format!("{}:{lineno}: {err}", path.display())))?;
        match store.insert(ctx, ns, &doc) {
            Ok(Some(loc)) => {
                debug!(target: "extentdb::admin", ns, line = lineno, %loc, "load.insert");
                report.inserted += 1;
            }
            Ok(None) => report.ignored += 1,
            Err(err) => {
                return Err(AdminError::Message(format!(
                    "{}:{lineno}: {err}",
                    path.display()
                )))
            }
        }
    }
    info!(
        ns,
        inserted = report.inserted,
        ignored = report.ignored,
        "load.done"
    );
    Ok(report)
}
