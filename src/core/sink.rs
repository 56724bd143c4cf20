use std::fs::File;
use std::path::Path;

use crate::core::domain::BenchResult;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rewrites `destination` with one header row of `fields` and one row per
/// result. Unknown field names become empty cells.
#[tracing::instrument(skip(results, fields))]
pub fn write(results: &[BenchResult], fields: &[String], destination: &Path) -> Result<(), SinkError> {
    if let Some(dir) = destination.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let mut writer = csv::Writer::from_writer(File::create(destination)?);
    writer.write_record(fields)?;
    for result in results {
        writer.write_record(
            fields
                .iter()
                .map(|name| result.field(name).unwrap_or_default()),
        )?;
    }
    writer.flush()?;

    tracing::info!("Wrote {} results to {}", results.len(), destination.display());
    Ok(())
}
