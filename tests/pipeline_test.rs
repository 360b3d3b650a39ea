use datafusion::arrow::array::{Array, Int32Array, StringArray};
use datafusion::arrow::compute::concat_batches;
use datafusion::arrow::datatypes::DataType;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::dataframe::DataFrame;
use datafusion::execution::context::SessionContext;
use datafusion::execution::options::ParquetReadOptions;
use datafusion::prelude::{cast, col};
use serde_json::{json, Value};
use songlake_etl::{pipeline, storage, PipelineConfig, RunSummary, Scope};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;
use walkdir::WalkDir;

static INIT: Once = Once::new();

fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

const TS_SETANTA: i64 = 1542837407796;
const TS_MORNING: i64 = 1542837500000;
const TS_UNKNOWN: i64 = 1542837600000;
const TS_NIGHT: i64 = 1542837650000;

fn song(
    song_id: &str,
    title: &str,
    artist_id: &str,
    artist_name: &str,
    year: i64,
    duration: f64,
) -> Value {
    json!({
        "song_id": song_id,
        "title": title,
        "artist_id": artist_id,
        "artist_name": artist_name,
        "artist_location": "Detroit, MI",
        "artist_latitude": 42.33,
        "artist_longitude": -83.04,
        "year": year,
        "duration": duration,
    })
}

fn play(
    ts: i64,
    userid: &str,
    level: &str,
    song: &str,
    artist: &str,
    length: f64,
    sessionid: i64,
) -> Value {
    json!({
        "ts": ts,
        "userid": userid,
        "firstname": "Ryan",
        "lastname": "Smith",
        "gender": "M",
        "level": level,
        "page": "NextSong",
        "song": song,
        "artist": artist,
        "length": length,
        "sessionid": sessionid,
        "location": "San Jose-Sunnyvale-Santa Clara, CA",
        "useragent": "Mozilla/5.0",
    })
}

fn write_jsonl(path: &Path, rows: &[Value]) {
    let lines: Vec<String> = rows.iter().map(|row| row.to_string()).collect();
    std::fs::write(path, lines.join("\n")).expect("Failed to write fixture file");
}

/// Lays out a miniature lake: three catalog songs by two artists (one song
/// with no year) and four November 2018 plays, one of which matches nothing.
fn setup_input(input_root: &Path) {
    let songs_dir = input_root.join("song_data/A/A/A");
    std::fs::create_dir_all(&songs_dir).expect("Failed to create song_data tree");
    let logs_dir = input_root.join("log_data/2018/11");
    std::fs::create_dir_all(&logs_dir).expect("Failed to create log_data tree");

    let morning = song("SOAAA001", "Morning Light", "AR001", "The Prime Movers", 2005, 210.5);
    let mut night = song("SOAAB002", "Night Drive", "AR001", "The Prime Movers", 0, 185.25);
    night
        .as_object_mut()
        .expect("song fixture is an object")
        .remove("year");
    let setanta = song("SOAAC003", "Setanta matins", "AR002", "Elena", 2005, 269.58363);
    write_jsonl(&songs_dir.join("TRAAAA.json"), &[morning, night]);
    write_jsonl(&songs_dir.join("TRAAAB.json"), &[setanta]);

    let mut tegan = play(
        TS_NIGHT,
        "80",
        "paid",
        "Night Drive",
        "The Prime Movers",
        185.25,
        611,
    );
    tegan["firstname"] = json!("Tegan");
    tegan["lastname"] = json!("Levine");
    tegan["gender"] = json!("F");
    let events = vec![
        play(TS_SETANTA, "26", "free", "Setanta matins", "Elena", 269.58363, 583),
        play(TS_MORNING, "26", "free", "Morning Light", "The Prime Movers", 210.5, 583),
        play(TS_UNKNOWN, "26", "paid", "Unknown Tune", "Nobody", 99.9, 584),
        tegan,
    ];
    write_jsonl(&logs_dir.join("2018-11-21-events.json"), &events);
}

fn config_for(input_root: &Path, output_root: &Path) -> PipelineConfig {
    PipelineConfig {
        input_root: input_root.to_string_lossy().into_owned(),
        output_root: output_root.to_string_lossy().into_owned(),
        scope: Scope::Sample,
        row_cap: Some(100),
        timezone: "UTC".to_string(),
        access_key_id: None,
        secret_key: None,
        region: "us-east-1".to_string(),
    }
}

fn parquet_files_under(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "parquet"))
        .collect()
}

async fn collect_one(table: DataFrame) -> RecordBatch {
    let batches = table.collect().await.expect("Failed to collect table");
    assert!(!batches.is_empty(), "expected at least one batch");
    let schema = batches[0].schema();
    concat_batches(&schema, &batches).expect("Failed to concat batches")
}

fn str_col<'a>(batch: &'a RecordBatch, name: &str) -> &'a StringArray {
    batch
        .column_by_name(name)
        .unwrap_or_else(|| panic!("missing column {}", name))
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap_or_else(|| panic!("column {} is not a string column", name))
}

fn i32_col<'a>(batch: &'a RecordBatch, name: &str) -> &'a Int32Array {
    batch
        .column_by_name(name)
        .unwrap_or_else(|| panic!("missing column {}", name))
        .as_any()
        .downcast_ref::<Int32Array>()
        .unwrap_or_else(|| panic!("column {} is not an int32 column", name))
}

#[tokio::test]
async fn test_pipeline_writes_all_five_star_schema_tables() {
    init_test_logging();

    // Given: a lake with song and log fixtures
    let input = TempDir::new().expect("Failed to create input dir");
    let output = TempDir::new().expect("Failed to create output dir");
    setup_input(input.path());
    let config = config_for(input.path(), output.path());

    // When: running the full pipeline
    let summary = pipeline::run(&config).await.expect("Pipeline run failed");

    // Then: each table carries the expected row count
    assert_eq!(
        summary,
        RunSummary {
            songs: 3,
            artists: 2,
            users: 3,
            time: 4,
            songplays: 4,
        }
    );

    // And: partitioned tables land under hive-style directories, the
    // year-less song under the unknown marker
    let output_root = output.path();
    assert!(output_root.join("songs.parquet/year=2005/artist_id=AR001").is_dir());
    assert!(output_root.join("songs.parquet/year=2005/artist_id=AR002").is_dir());
    assert!(output_root.join("songs.parquet/year=0/artist_id=AR001").is_dir());
    assert!(output_root.join("time.parquet/year=2018/month=11").is_dir());
    assert!(output_root.join("songplays.parquet/year=2018/month=11").is_dir());

    // And: the flat tables keep their files directly under the table root
    let artists_dir = output_root.join("artists.parquet");
    let artist_files = parquet_files_under(&artists_dir);
    assert!(!artist_files.is_empty(), "artists table should contain parquet files");
    assert!(
        artist_files
            .iter()
            .all(|file| file.parent() == Some(artists_dir.as_path())),
        "artists table is unpartitioned, files should sit directly under it"
    );
    assert!(!parquet_files_under(&output_root.join("users.parquet")).is_empty());

    // And: the persisted fact ids are dense
    let ctx = SessionContext::new();
    let songplays_location = storage::table_location(&config.output_root, storage::SONGPLAYS_TABLE);
    let options = ParquetReadOptions::default().table_partition_cols(vec![
        ("year".to_string(), DataType::Int32),
        ("month".to_string(), DataType::Int32),
    ]);
    let fact = ctx
        .read_parquet(format!("{}/", songplays_location), options)
        .await
        .expect("Failed to read songplays back");
    let batch = collect_one(fact.select(vec![col("songplays_id")]).expect("Failed to project")).await;
    let mut ids: Vec<i32> = i32_col(&batch, "songplays_id").values().iter().copied().collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_songs_rows_live_under_matching_partitions() {
    init_test_logging();

    // Given: a completed run
    let input = TempDir::new().expect("Failed to create input dir");
    let output = TempDir::new().expect("Failed to create output dir");
    setup_input(input.path());
    let config = config_for(input.path(), output.path());
    pipeline::run(&config).await.expect("Pipeline run failed");

    // When: reading one partition directory as plain parquet
    let ctx = SessionContext::new();
    let partition_dir = output.path().join("songs.parquet/year=2005/artist_id=AR002");
    let leaf = ctx
        .read_parquet(
            format!("{}/", partition_dir.to_string_lossy()),
            ParquetReadOptions::default(),
        )
        .await
        .expect("Failed to read partition dir");
    let leaf_batch = collect_one(leaf).await;

    // Then: only the row whose keys match the directory lives there, and the
    // partition columns exist solely in the path
    assert_eq!(leaf_batch.num_rows(), 1);
    assert_eq!(str_col(&leaf_batch, "song_id").value(0), "SOAAC003");
    assert!(leaf_batch.column_by_name("year").is_none());
    assert!(leaf_batch.column_by_name("artist_id").is_none());

    // When: reading the whole table with declared partition columns
    let songs_location = storage::table_location(&config.output_root, storage::SONGS_TABLE);
    let options = ParquetReadOptions::default().table_partition_cols(vec![
        ("year".to_string(), DataType::Int32),
        ("artist_id".to_string(), DataType::Utf8),
    ]);
    let songs = ctx
        .read_parquet(format!("{}/", songs_location), options)
        .await
        .expect("Failed to read songs back")
        .select(vec![
            col("song_id"),
            cast(col("year"), DataType::Int32).alias("year"),
            cast(col("artist_id"), DataType::Utf8).alias("artist_id"),
        ])
        .expect("Failed to project songs");
    let batch = collect_one(songs).await;

    // Then: every row's partition values round-trip to its own columns
    assert_eq!(batch.num_rows(), 3);
    let mut partitions: HashMap<String, (i32, String)> = HashMap::new();
    let song_id = str_col(&batch, "song_id");
    let year = i32_col(&batch, "year");
    let artist_id = str_col(&batch, "artist_id");
    for row in 0..batch.num_rows() {
        partitions.insert(
            song_id.value(row).to_string(),
            (year.value(row), artist_id.value(row).to_string()),
        );
    }
    assert_eq!(partitions["SOAAA001"], (2005, "AR001".to_string()));
    assert_eq!(partitions["SOAAB002"], (0, "AR001".to_string()));
    assert_eq!(partitions["SOAAC003"], (2005, "AR002".to_string()));
}

#[tokio::test]
async fn test_second_run_replaces_previous_outputs() {
    init_test_logging();

    // Given: a completed run over the initial fixtures
    let input = TempDir::new().expect("Failed to create input dir");
    let output = TempDir::new().expect("Failed to create output dir");
    setup_input(input.path());
    let config = config_for(input.path(), output.path());
    let first = pipeline::run(&config).await.expect("First run failed");
    assert!(output.path().join("songs.parquet/year=2005/artist_id=AR001").is_dir());

    // When: the catalog moves a song to a new year and the pipeline reruns
    let morning = song("SOAAA001", "Morning Light", "AR001", "The Prime Movers", 2007, 210.5);
    let mut night = song("SOAAB002", "Night Drive", "AR001", "The Prime Movers", 0, 185.25);
    night
        .as_object_mut()
        .expect("song fixture is an object")
        .remove("year");
    write_jsonl(
        &input.path().join("song_data/A/A/A/TRAAAA.json"),
        &[morning, night],
    );
    let second = pipeline::run(&config).await.expect("Second run failed");

    // Then: the stale partition is gone rather than merged alongside the new
    // one, and the counts are unchanged
    assert!(!output.path().join("songs.parquet/year=2005/artist_id=AR001").exists());
    assert!(output.path().join("songs.parquet/year=2007/artist_id=AR001").is_dir());
    assert!(output.path().join("songs.parquet/year=2005/artist_id=AR002").is_dir());
    assert_eq!(first, second);

    // And: the flat tables did not grow by appending
    let ctx = SessionContext::new();
    let artists_location = storage::table_location(&config.output_root, storage::ARTISTS_TABLE);
    let artists = ctx
        .read_parquet(format!("{}/", artists_location), ParquetReadOptions::default())
        .await
        .expect("Failed to read artists back");
    assert_eq!(artists.count().await.expect("Failed to count artists"), 2);
}
