use std::time::Instant;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::event_log;
use crate::session;
use crate::song_catalog;
use crate::songplays;

/// Rows written to each output table by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub songs: u64,
    pub artists: u64,
    pub users: u64,
    pub time: u64,
    pub songplays: u64,
}

/// Runs the full two-stage pipeline against the configured roots.
pub async fn run(config: &PipelineConfig) -> Result<RunSummary, PipelineError> {
    config.validate()?;
    let ctx = session::create_session(config)?;
    let start = Instant::now();

    info!("Starting song catalog transform");
    let (songs, artists) = song_catalog::run(&ctx, config).await?;

    info!("Starting event log transform");
    let (events, users, time) = event_log::run(&ctx, config).await?;
    let songplays = songplays::run(&ctx, config, events).await?;

    let summary = RunSummary {
        songs,
        artists,
        users,
        time,
        songplays,
    };
    info!(
        "Pipeline completed in {}ms: {} songs, {} artists, {} users, {} time, {} songplays",
        start.elapsed().as_millis(),
        summary.songs,
        summary.artists,
        summary.users,
        summary.time,
        summary.songplays
    );
    Ok(summary)
}
