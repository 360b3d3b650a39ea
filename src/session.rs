use datafusion::execution::config::SessionConfig;
use datafusion::execution::context::SessionContext;
use datafusion::execution::object_store::ObjectStoreUrl;
use datafusion::execution::runtime_env::RuntimeEnvBuilder;
use object_store::aws::AmazonS3Builder;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// Builds the session both stages share, with object stores registered for
/// any remote root.
pub fn create_session(config: &PipelineConfig) -> Result<SessionContext, PipelineError> {
    let max_memory = 8 * 1024 * 1024 * 1024;
    let memory_fraction = 0.8;

    let runtime_builder = RuntimeEnvBuilder::new().with_memory_limit(max_memory, memory_fraction);

    let runtime_env = runtime_builder
        .build()
        .map_err(|e| PipelineError::ConfigError {
            message: format!("Failed to build DataFusion runtime environment: {}", e),
        })?;

    let session_config = SessionConfig::new()
        .set_bool("datafusion.execution.listing_table_ignore_subdirectory", false);
    let ctx = SessionContext::new_with_config_rt(session_config, runtime_env.into());

    let mut registered = HashSet::new();
    for root in [&config.input_root, &config.output_root] {
        // Roots that do not parse as URLs are local filesystem paths and need
        // no registration.
        if let Ok(url) = Url::parse(root) {
            match url.scheme() {
                "s3" => register_s3_store(&ctx, config, &url, &mut registered)?,
                "file" => {}
                scheme => {
                    return Err(PipelineError::ConfigError {
                        message: format!("Unsupported storage scheme: {}", scheme),
                    });
                }
            }
        }
    }

    Ok(ctx)
}

fn register_s3_store(
    ctx: &SessionContext,
    config: &PipelineConfig,
    url: &Url,
    registered: &mut HashSet<String>,
) -> Result<(), PipelineError> {
    let bucket = url.host_str().ok_or_else(|| PipelineError::ConfigError {
        message: format!("Invalid S3 URL: missing bucket in {}", url),
    })?;
    if !registered.insert(bucket.to_string()) {
        return Ok(());
    }

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region(&config.region);
    if let (Some(access_key_id), Some(secret_key)) = (&config.access_key_id, &config.secret_key) {
        builder = builder
            .with_access_key_id(access_key_id)
            .with_secret_access_key(secret_key);
    }
    let store = builder.build().map_err(|e| PipelineError::ConfigError {
        message: format!("Failed to create S3 client for bucket {}: {}", bucket, e),
    })?;

    let store_url = ObjectStoreUrl::parse(format!("s3://{}", bucket))?;
    ctx.register_object_store(store_url.as_ref(), Arc::new(store));
    info!("Registered S3 object store for bucket {}", bucket);
    Ok(())
}
