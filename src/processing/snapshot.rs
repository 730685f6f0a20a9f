//! Raw JSON-lines snapshots of fetched listings and their re-import.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::listing::{Listing, OperationType};
use crate::repository::ListingWriter;
use crate::repository::errors::RepositoryError;

const IMPORT_CHUNK: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode snapshot record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to store imported listings: {0}")]
    Repository(#[from] RepositoryError),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// One line of a snapshot file.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    collection: OperationType,
    #[serde(flatten)]
    listing: Listing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub appended: usize,
    pub skipped: usize,
}

pub fn snapshot_path(dir: &Path, batch_id: &str) -> PathBuf {
    dir.join(format!("properties_{batch_id}.jsonl"))
}

/// Writes `properties_<batch_id>.jsonl` under `dir`, one listing per line.
pub fn write_snapshot(
    dir: &Path,
    batch_id: &str,
    listings: &[(OperationType, Listing)],
) -> SnapshotResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = snapshot_path(dir, batch_id);
    let mut writer = BufWriter::new(File::create(&path)?);

    for (collection, listing) in listings {
        let record = SnapshotRecord {
            collection: *collection,
            listing: listing.clone(),
        };
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    Ok(path)
}

/// Appends every record of a snapshot file to the document store as new
/// rows. Unreadable lines are skipped and counted.
pub fn import_snapshot<R>(path: &Path, repo: &R) -> SnapshotResult<ImportReport>
where
    R: ListingWriter,
{
    let reader = BufReader::new(File::open(path)?);
    let mut report = ImportReport::default();
    let mut pending: Vec<(OperationType, Listing)> = Vec::new();

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SnapshotRecord>(&line) {
            Ok(record) => pending.push((record.collection, record.listing)),
            Err(e) => {
                log::warn!("Skipping line {} of {}: {e}", number + 1, path.display());
                report.skipped += 1;
            }
        }
        if pending.len() >= IMPORT_CHUNK {
            report.appended += flush(repo, &mut pending)?;
        }
    }
    report.appended += flush(repo, &mut pending)?;

    Ok(report)
}

fn flush<R: ListingWriter>(
    repo: &R,
    pending: &mut Vec<(OperationType, Listing)>,
) -> SnapshotResult<usize> {
    let mut appended = 0;
    for collection in OperationType::ALL {
        let listings: Vec<Listing> = pending
            .iter()
            .filter(|(c, _)| *c == collection)
            .map(|(_, listing)| listing.clone())
            .collect();
        if !listings.is_empty() {
            appended += repo.append_listings(collection, &listings)?;
        }
    }
    pending.clear();
    Ok(appended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::listing::{FINCA_RAIZ_SOURCE, PropertyType};
    use crate::repository::tests::FakeRepository;

    fn listing(code: &str) -> Listing {
        let mut listing = Listing::new(FINCA_RAIZ_SOURCE, code);
        listing.price = Some(1_500_000.0);
        listing.property_type = Some(PropertyType::Apartamento);
        listing.description = "Apartamento con balcón".to_string();
        listing
    }

    #[test]
    fn snapshot_file_is_named_after_the_batch() {
        let path = snapshot_path(Path::new("/tmp/raw"), "2024-05-01_10-00-00");

        assert_eq!(
            path,
            PathBuf::from("/tmp/raw/properties_2024-05-01_10-00-00.jsonl")
        );
    }

    #[test]
    fn written_snapshot_imports_into_its_collections() {
        let dir = tempfile::tempdir().expect("temp dir");
        let listings = vec![
            (OperationType::Venta, listing("1")),
            (OperationType::Arriendo, listing("2")),
            (OperationType::Venta, listing("3")),
        ];

        let path = write_snapshot(dir.path(), "batch", &listings).expect("snapshot written");
        let repo = FakeRepository::default();
        let report = import_snapshot(&path, &repo).expect("snapshot imported");

        assert_eq!(report, ImportReport { appended: 3, skipped: 0 });
        let rows = repo.rows();
        assert_eq!(
            rows.iter()
                .filter(|row| row.collection == OperationType::Venta)
                .count(),
            2
        );
        assert!(rows.iter().any(|row| row.listing == listings[1].1));
    }

    #[test]
    fn import_appends_even_when_the_listing_exists() {
        let dir = tempfile::tempdir().expect("temp dir");
        let listings = vec![(OperationType::Venta, listing("1"))];
        let path = write_snapshot(dir.path(), "batch", &listings).expect("snapshot written");
        let repo = FakeRepository::default();

        import_snapshot(&path, &repo).expect("first import");
        import_snapshot(&path, &repo).expect("second import");

        assert_eq!(repo.rows().len(), 2);
    }

    #[test]
    fn unreadable_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("broken.jsonl");
        let good = serde_json::to_string(&SnapshotRecord {
            collection: OperationType::Arriendo,
            listing: listing("7"),
        })
        .expect("encode");
        std::fs::write(&path, format!("{good}\nnot json\n\n")).expect("write file");

        let repo = FakeRepository::default();
        let report = import_snapshot(&path, &repo).expect("import runs");

        assert_eq!(report, ImportReport { appended: 1, skipped: 1 });
    }
}
