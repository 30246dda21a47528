use clap::{ArgGroup, Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stac_harvester::harvest::{
    collect_into, CollectOutcome, FailurePolicy, HarvestPipeline, OutputPaths, ProviderProfile,
    RetryPolicy, TransformOptions,
};
use stac_harvester::HttpSource;

const EXIT_CONFIG: u8 = 6;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Provider {
    Linz,
    Maxar,
    Umbra,
    #[value(name = "sentinel-2-iceland")]
    Sentinel2Iceland,
}

impl Provider {
    fn name(self) -> &'static str {
        match self {
            Provider::Linz => "linz",
            Provider::Maxar => "maxar",
            Provider::Umbra => "umbra",
            Provider::Sentinel2Iceland => "sentinel-2-iceland",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OnItemError {
    Skip,
    AbortCollection,
    AbortRun,
}

impl From<OnItemError> for FailurePolicy {
    fn from(value: OnItemError) -> Self {
        match value {
            OnItemError::Skip => FailurePolicy::SkipItem,
            OnItemError::AbortCollection => FailurePolicy::AbortCollection,
            OnItemError::AbortRun => FailurePolicy::AbortRun,
        }
    }
}

/// Harvest a provider's STAC catalog into line-delimited collection and item files
#[derive(Parser, Debug)]
#[command(name = "stac-harvester", version, about)]
#[command(group(ArgGroup::new("source").required(true).args(["provider", "profile_file"])))]
struct Cli {
    /// Built-in provider profile
    #[arg(long, value_enum)]
    provider: Option<Provider>,

    /// Provider profile loaded from a JSON file
    #[arg(long)]
    profile_file: Option<PathBuf>,

    /// Override the profile's root catalog URL
    #[arg(long)]
    root_url: Option<String>,

    /// Harvest the item URLs listed in this file into one collection
    #[arg(long, requires = "collection_id")]
    item_list: Option<PathBuf>,

    /// Collection ID for --item-list and --collection-from-items
    #[arg(long)]
    collection_id: Option<String>,

    /// Build the collection from the items file instead of harvesting
    #[arg(long, requires = "collection_id", conflicts_with = "item_list")]
    collection_from_items: bool,

    /// Collections output file (also read to resume)
    #[arg(long, default_value = "collections.json")]
    collections: PathBuf,

    /// Items output file
    #[arg(long, default_value = "items.json")]
    items: PathBuf,

    /// Rewrite asset hrefs to storage-native URLs
    #[arg(long, overrides_with = "without_s3_url")]
    with_s3_urls: bool,

    #[arg(long, overrides_with = "with_s3_urls")]
    without_s3_url: bool,

    /// Attach aggregated item asset descriptions to each collection
    #[arg(long, overrides_with = "without_assets_extension")]
    with_assets_extension: bool,

    #[arg(long, overrides_with = "with_assets_extension")]
    without_assets_extension: bool,

    /// Maximum number of in-flight fetches
    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..))]
    concurrency: u32,

    /// Attempts per document before giving up
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// Pause between attempts, in milliseconds
    #[arg(long, default_value_t = 1000)]
    retry_delay_ms: u64,

    /// What to do when an item cannot be fetched after retries
    #[arg(long, value_enum, default_value = "abort-run")]
    on_item_error: OnItemError,
}

impl Cli {
    fn load_profile(&self) -> Result<ProviderProfile, stac_harvester::harvest::ProfileError> {
        let profile = match (&self.profile_file, self.provider) {
            (Some(path), _) => ProviderProfile::from_json_file(path)?,
            (None, provider) => ProviderProfile::builtin(provider.map_or("", Provider::name))?,
        };
        let profile = match &self.root_url {
            Some(root_url) => profile.with_root_url(root_url.clone()),
            None => profile,
        };
        let profile = match (&self.item_list, &self.collection_id) {
            (Some(list), Some(id)) => profile.with_item_list(list, id),
            _ => profile,
        };
        profile.validate()?;
        Ok(profile)
    }

    fn options(&self) -> TransformOptions {
        TransformOptions {
            with_s3_urls: self.with_s3_urls,
            with_assets_extension: self.with_assets_extension,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let profile = match cli.load_profile() {
        Ok(profile) => profile,
        Err(e) => {
            error!("Invalid provider profile: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let paths = OutputPaths {
        collections: cli.collections.clone(),
        items: cli.items.clone(),
    };

    if cli.collection_from_items {
        let collection_id = cli.collection_id.as_deref().unwrap_or_default();
        return match collect_into(&paths, collection_id, &profile).await {
            Ok(CollectOutcome::Written { items, .. }) => {
                info!(collection = collection_id, items, "Done");
                ExitCode::SUCCESS
            }
            Ok(CollectOutcome::AlreadyPresent) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Collection build failed: {}", e);
                ExitCode::from(e.exit_code())
            }
        };
    }

    let source = match HttpSource::new() {
        Ok(source) => source,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    info!(
        provider = %profile.name,
        root = %profile.root_url,
        with_s3_urls = cli.with_s3_urls,
        with_assets_extension = cli.with_assets_extension,
        "Starting harvest"
    );

    let pipeline = HarvestPipeline::new(source, profile)
        .with_options(cli.options())
        .with_concurrency(cli.concurrency as usize)
        .with_retry(RetryPolicy::new(
            cli.max_attempts,
            Duration::from_millis(cli.retry_delay_ms),
        ))
        .with_failure_policy(cli.on_item_error.into());

    match pipeline.run(&paths).await {
        Ok(stats) => {
            info!(
                collections = stats.collections_written,
                items = stats.items_written,
                "Done"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Harvest failed: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
