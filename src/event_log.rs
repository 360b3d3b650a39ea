use datafusion::arrow::datatypes::DataType;
use datafusion::dataframe::DataFrame;
use datafusion::execution::context::SessionContext;
use datafusion::execution::options::NdJsonReadOptions;
use datafusion::functions::expr_fn::{date_part, to_char};
use datafusion::prelude::{cast, col, lit, try_cast};
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::storage;
use crate::transform;

const USERS_ORDER: [&str; 5] = ["user_id", "level", "first_name", "last_name", "gender"];
const TIME_ORDER: [&str; 7] = ["start_time", "hour", "day", "week", "month", "year", "weekday"];

/// Runs stage 2 dimension extraction: the users and time tables from the
/// event log. Returns the filtered, time-enriched events for the fact
/// derivation.
pub async fn run(
    ctx: &SessionContext,
    config: &PipelineConfig,
) -> Result<(DataFrame, u64, u64), PipelineError> {
    let log_path = config.log_data_path();
    info!("Reading event log from {}", log_path);
    let logs = ctx
        .read_json(log_path.as_str(), NdJsonReadOptions::default())
        .await?;
    info!("Event log schema: {}", logs.schema());

    let events = with_event_time(next_song_events(logs)?, &config.timezone)?;
    let cap = config.effective_row_cap();

    let users = users_table(events.clone(), cap)?;
    let users_rows = storage::write_table(
        ctx,
        users,
        &storage::table_location(&config.output_root, storage::USERS_TABLE),
        &[],
    )
    .await?;

    let time = time_table(events.clone(), cap)?;
    let time_rows = storage::write_table(
        ctx,
        time,
        &storage::table_location(&config.output_root, storage::TIME_TABLE),
        &["year", "month"],
    )
    .await?;

    Ok((events, users_rows, time_rows))
}

/// Keeps only the rows recording an actual song play.
pub fn next_song_events(logs: DataFrame) -> Result<DataFrame, PipelineError> {
    Ok(logs.filter(col("page").eq(lit("NextSong")))?)
}

/// Adds the typed instant and date derived from the millisecond epoch `ts`.
pub fn with_event_time(events: DataFrame, timezone: &str) -> Result<DataFrame, PipelineError> {
    let events = events.with_column("event_time", transform::event_time("ts", timezone))?;
    Ok(events.with_column("event_date", cast(col("event_time"), DataType::Date32))?)
}

/// One row per observed (user_id, level) pair; a level change keeps both
/// snapshots.
pub fn users_table(events: DataFrame, cap: Option<usize>) -> Result<DataFrame, PipelineError> {
    let projected = events.select(vec![
        try_cast(col("userid"), DataType::Int32).alias("user_id"),
        col("firstname").alias("first_name"),
        col("lastname").alias("last_name"),
        col("gender"),
        col("level"),
    ])?;
    transform::distinct_capped(projected, &USERS_ORDER, cap)
}

/// One row per distinct play timestamp, decomposed into calendar fields.
pub fn time_table(events: DataFrame, cap: Option<usize>) -> Result<DataFrame, PipelineError> {
    // A row without a timestamp has no calendar decomposition or partition
    // slot.
    let projected = events.filter(col("ts").is_not_null())?.select(vec![
        transform::epoch_seconds("ts").alias("start_time"),
        date_part(lit("hour"), col("event_time")).alias("hour"),
        date_part(lit("day"), col("event_time")).alias("day"),
        date_part(lit("week"), col("event_time")).alias("week"),
        date_part(lit("month"), col("event_time")).alias("month"),
        date_part(lit("year"), col("event_time")).alias("year"),
        to_char(col("event_time"), lit("%a")).alias("weekday"),
    ])?;
    transform::distinct_capped(projected, &TIME_ORDER, cap)
}
