use datafusion::arrow::datatypes::DataType;
use datafusion::dataframe::DataFrame;
use datafusion::execution::context::SessionContext;
use datafusion::execution::options::NdJsonReadOptions;
use datafusion::functions::expr_fn::coalesce;
use datafusion::prelude::{col, lit, try_cast};
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::storage;
use crate::transform;

// Full-column sort keys giving the cap a stable order.
const SONGS_ORDER: [&str; 5] = ["song_id", "title", "artist_id", "year", "duration"];
const ARTISTS_ORDER: [&str; 5] = ["artist_id", "name", "location", "latitude", "longitude"];

/// Runs stage 1: the songs and artists dimensions from the raw catalog.
pub async fn run(
    ctx: &SessionContext,
    config: &PipelineConfig,
) -> Result<(u64, u64), PipelineError> {
    let song_path = config.song_data_path();
    info!("Reading song catalog from {}", song_path);
    let catalog = ctx
        .read_json(song_path.as_str(), NdJsonReadOptions::default())
        .await?;
    info!("Song catalog schema: {}", catalog.schema());

    let cap = config.effective_row_cap();

    let songs = songs_table(catalog.clone(), cap)?;
    let songs_rows = storage::write_table(
        ctx,
        songs,
        &storage::table_location(&config.output_root, storage::SONGS_TABLE),
        &["year", "artist_id"],
    )
    .await?;

    let artists = artists_table(catalog, cap)?;
    let artists_rows = storage::write_table(
        ctx,
        artists,
        &storage::table_location(&config.output_root, storage::ARTISTS_TABLE),
        &[],
    )
    .await?;

    Ok((songs_rows, artists_rows))
}

pub fn songs_table(catalog: DataFrame, cap: Option<usize>) -> Result<DataFrame, PipelineError> {
    let projected = catalog.select(vec![
        col("song_id"),
        col("title"),
        col("artist_id"),
        // The catalog marks an unknown year as 0; unparsable values degrade
        // to the same marker instead of failing the cast.
        coalesce(vec![try_cast(col("year"), DataType::Int32), lit(0)]).alias("year"),
        col("duration"),
    ])?;
    transform::distinct_capped(projected, &SONGS_ORDER, cap)
}

pub fn artists_table(catalog: DataFrame, cap: Option<usize>) -> Result<DataFrame, PipelineError> {
    let projected = catalog.select(vec![
        col("artist_id"),
        col("artist_name").alias("name"),
        col("artist_location").alias("location"),
        col("artist_latitude").alias("latitude"),
        col("artist_longitude").alias("longitude"),
    ])?;
    transform::distinct_capped(projected, &ARTISTS_ORDER, cap)
}
