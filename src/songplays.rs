use datafusion::arrow::datatypes::DataType;
use datafusion::dataframe::DataFrame;
use datafusion::execution::context::SessionContext;
use datafusion::execution::options::NdJsonReadOptions;
use datafusion::functions::expr_fn::date_part;
use datafusion::functions_window::expr_fn::row_number;
use datafusion::logical_expr::{ExprFunctionExt, JoinType};
use datafusion::prelude::{cast, col, lit, try_cast};
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::storage;
use crate::transform;

// Fact sort keys: ascending `ts` first, the remaining columns giving equal
// timestamps a fixed relative order.
const FACT_ORDER: [&str; 10] = [
    "ts",
    "user_id",
    "level",
    "song_id",
    "artist_id",
    "session_id",
    "location",
    "useragent",
    "year",
    "month",
];

/// Runs stage 2 fact derivation: the songplays table.
pub async fn run(
    ctx: &SessionContext,
    config: &PipelineConfig,
    events: DataFrame,
) -> Result<u64, PipelineError> {
    let song_path = config.song_data_path();
    info!("Re-reading song catalog from {}", song_path);
    // The catalog is read fresh from storage rather than handed over from
    // stage 1, keeping the stages decoupled at the cost of a second scan.
    let catalog = ctx
        .read_json(song_path.as_str(), NdJsonReadOptions::default())
        .await?;
    info!("Song catalog schema: {}", catalog.schema());

    let songplays = songplays_table(events, catalog, config.effective_row_cap())?;
    storage::write_table(
        ctx,
        songplays,
        &storage::table_location(&config.output_root, storage::SONGPLAYS_TABLE),
        &["year", "month"],
    )
    .await
}

pub fn songplays_table(
    events: DataFrame,
    catalog: DataFrame,
    cap: Option<usize>,
) -> Result<DataFrame, PipelineError> {
    let plays = events.select(vec![
        col("ts"),
        col("event_time"),
        try_cast(col("userid"), DataType::Int32).alias("user_id"),
        col("level"),
        try_cast(col("sessionid"), DataType::Int32).alias("session_id"),
        col("location"),
        col("useragent"),
        col("song"),
        col("artist"),
        col("length"),
    ])?;
    let songs = catalog.select(vec![
        col("song_id"),
        col("artist_id"),
        col("title"),
        col("artist_name"),
        col("duration"),
    ])?;

    // Exact equality on all three keys, the float duration included; plays
    // without a catalog match keep null song_id/artist_id.
    let joined = plays.join_on(
        songs,
        JoinType::Left,
        [
            col("title").eq(col("song")),
            col("duration").eq(col("length")),
            col("artist_name").eq(col("artist")),
        ],
    )?;

    let projected = joined.select(vec![
        transform::epoch_seconds("ts").alias("ts"),
        col("user_id"),
        col("level"),
        col("song_id"),
        col("artist_id"),
        col("session_id"),
        col("location"),
        col("useragent"),
        date_part(lit("year"), col("event_time")).alias("year"),
        date_part(lit("month"), col("event_time")).alias("month"),
    ])?;

    let deduped = transform::distinct_capped(projected, &FACT_ORDER, cap)?;

    let ranked = deduped.window(vec![row_number()
        .order_by(transform::ascending(&FACT_ORDER))
        .build()?
        .alias("songplays_id")])?;

    let fact = ranked.select(vec![
        cast(col("songplays_id"), DataType::Int32).alias("songplays_id"),
        col("ts"),
        col("user_id"),
        col("level"),
        col("song_id"),
        col("artist_id"),
        col("session_id"),
        col("location"),
        col("useragent"),
        col("year"),
        col("month"),
    ])?;

    Ok(fact.sort(transform::ascending(&["songplays_id"]))?)
}
