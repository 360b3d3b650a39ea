use datafusion::arrow::array::{Array, UInt64Array};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::dataframe::{DataFrame, DataFrameWriteOptions};
use datafusion::execution::context::SessionContext;
use datafusion::execution::object_store::ObjectStoreUrl;
use futures::StreamExt;
use object_store::path::Path as ObjectPath;
use std::path::Path;
use tracing::info;
use url::Url;

use crate::error::PipelineError;

pub const SONGS_TABLE: &str = "songs.parquet";
pub const ARTISTS_TABLE: &str = "artists.parquet";
pub const USERS_TABLE: &str = "users.parquet";
pub const TIME_TABLE: &str = "time.parquet";
pub const SONGPLAYS_TABLE: &str = "songplays.parquet";

pub fn table_location(output_root: &str, table: &str) -> String {
    format!("{}/{}", output_root.trim_end_matches('/'), table)
}

/// Persists a table as Parquet under `location`, replacing whatever a prior
/// run left there. Partition columns become `<column>=<value>` directories.
pub async fn write_table(
    ctx: &SessionContext,
    table: DataFrame,
    location: &str,
    partition_by: &[&str],
) -> Result<u64, PipelineError> {
    clear_location(ctx, location).await?;

    let options = DataFrameWriteOptions::new()
        .with_partition_by(partition_by.iter().map(|column| column.to_string()).collect());

    // Trailing slash keeps the sink in directory mode for unpartitioned
    // tables.
    let batches = table
        .write_parquet(&format!("{}/", location), options, None)
        .await?;

    let rows = written_rows(&batches);
    info!("Wrote {} rows to {}", rows, location);
    Ok(rows)
}

/// The Parquet sink appends, so overwrite means clearing the destination
/// before handing it the frame.
async fn clear_location(ctx: &SessionContext, location: &str) -> Result<(), PipelineError> {
    match Url::parse(location) {
        Ok(url) if url.scheme() == "s3" => clear_remote(ctx, &url).await,
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| PipelineError::StorageError {
                    message: format!("Invalid file URL: {}", location),
                })?;
            remove_local_dir(&path)
        }
        Ok(url) => Err(PipelineError::StorageError {
            message: format!("Unsupported storage scheme: {}", url.scheme()),
        }),
        Err(_) => remove_local_dir(Path::new(location)),
    }
}

async fn clear_remote(ctx: &SessionContext, url: &Url) -> Result<(), PipelineError> {
    let bucket = url.host_str().ok_or_else(|| PipelineError::StorageError {
        message: format!("Invalid S3 URL: missing bucket in {}", url),
    })?;
    let store_url = ObjectStoreUrl::parse(format!("s3://{}", bucket))?;
    let store = ctx.runtime_env().object_store(store_url)?;

    let prefix = ObjectPath::from(url.path().trim_start_matches('/'));
    let mut objects = store.list(Some(&prefix));
    let mut removed = 0u64;
    while let Some(meta) = objects.next().await {
        store.delete(&meta?.location).await?;
        removed += 1;
    }
    if removed > 0 {
        info!("Cleared {} objects under {}", removed, url);
    }
    Ok(())
}

fn remove_local_dir(path: &Path) -> Result<(), PipelineError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn written_rows(batches: &[RecordBatch]) -> u64 {
    batches
        .iter()
        .filter_map(|batch| batch.columns().first())
        .filter_map(|column| column.as_any().downcast_ref::<UInt64Array>())
        .flat_map(|counts| counts.iter().flatten())
        .sum()
}
