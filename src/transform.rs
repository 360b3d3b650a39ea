use datafusion::arrow::datatypes::{DataType, TimeUnit};
use datafusion::dataframe::DataFrame;
use datafusion::functions::expr_fn::to_timestamp_millis;
use datafusion::logical_expr::{Expr, SortExpr};
use datafusion::prelude::{cast, col, lit};

use crate::error::PipelineError;

/// Millisecond epoch column as fractional seconds since the epoch.
pub fn epoch_seconds(column: &str) -> Expr {
    // Float division; integer division would drop the millisecond part.
    cast(col(column), DataType::Float64) / lit(1000.0)
}

/// Millisecond epoch column as an instant carrying the given zone, so that
/// calendar fields extract in that zone rather than host-local time.
pub fn event_time(column: &str, timezone: &str) -> Expr {
    cast(
        to_timestamp_millis(vec![col(column)]),
        DataType::Timestamp(TimeUnit::Millisecond, Some(timezone.into())),
    )
}

/// Ascending, nulls-last sort keys over the named columns.
pub fn ascending(columns: &[&str]) -> Vec<SortExpr> {
    columns
        .iter()
        .map(|name| col(*name).sort(true, false))
        .collect()
}

/// De-duplicates on full-row equality, then caps.
///
/// The sort between the two steps runs over every projected column, so the
/// cap keeps the same survivors for the same input regardless of scan order.
pub fn distinct_capped(
    table: DataFrame,
    order: &[&str],
    cap: Option<usize>,
) -> Result<DataFrame, PipelineError> {
    let table = table.distinct()?.sort(ascending(order))?;
    match cap {
        Some(limit) => Ok(table.limit(0, Some(limit))?),
        None => Ok(table),
    }
}
