use anyhow::Context;
use basemap_quads_core::{
    exceeds_quad_limit, group_by_mosaic, group_by_quad, plan_search, summary, total_area_km2,
    Aoi, ClientConfig, Mosaic, Outcome, PlanetClient, QuadFinder, SearchProgress,
    DEFAULT_BASEMAPS_URL, DEFAULT_PAGE_SIZE, MAX_QUADS_TO_DOWNLOAD,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "basemap-quads", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Planet API key
    #[arg(long, env = "PL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Basemaps API base URL
    #[arg(long, env = "PLANET_BASEMAPS_URL", default_value = DEFAULT_BASEMAPS_URL)]
    base_url: String,

    /// Quads requested per page
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u32,
}

#[derive(Subcommand)]
enum Command {
    /// Find the quads of one or more basemap instances that intersect an AOI.
    FindQuads {
        /// Mosaic name; repeat to search several instances in order.
        #[arg(long = "mosaic", required = true)]
        mosaics: Vec<String>,
        /// GeoJSON file holding the AOI polygon (EPSG:4326).
        #[arg(long)]
        aoi: PathBuf,
        /// List each quad once with the instances that contain it.
        #[arg(long, default_value_t = false)]
        group_by_quad: bool,
        /// Print the result as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List the mosaics of a basemap series.
    SeriesMosaics {
        /// Series id
        #[arg(long)]
        series: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if cli.api_key.is_none() {
        warn!("no api key configured, requests will be anonymous");
    }

    let client = Arc::new(PlanetClient::new(ClientConfig {
        base_url: cli.base_url,
        api_key: cli.api_key,
        page_size: cli.page_size,
    }));
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        base_url = %client.config().base_url,
        "basemap-quads boot"
    );

    match cli.command {
        Command::FindQuads {
            mosaics,
            aoi,
            group_by_quad,
            json,
        } => find_quads(client, &mosaics, aoi, group_by_quad, json).await?,
        Command::SeriesMosaics { series } => {
            let mosaics = client
                .mosaics_in_series(&series)
                .await
                .with_context(|| format!("listing mosaics of series {series}"))?;
            for mosaic in &mosaics {
                println!("{}  {}  {}", mosaic.id, mosaic.name, acquired_range(mosaic));
            }
            println!("{} mosaics", mosaics.len());
        }
    }

    Ok(())
}

async fn find_quads(
    client: Arc<PlanetClient>,
    names: &[String],
    aoi_path: PathBuf,
    by_quad: bool,
    as_json: bool,
) -> anyhow::Result<()> {
    let aoi = Aoi::from_geojson_file(&aoi_path)
        .await
        .with_context(|| format!("loading AOI from {}", aoi_path.display()))?;

    let mut mosaics = Vec::with_capacity(names.len());
    for name in names {
        mosaics.push(client.mosaic_by_name(name).await?);
    }

    let plan = plan_search(client.as_ref(), &aoi, &mosaics).await?;
    info!(
        aoi_area_km2 = plan.aoi_area_km2,
        estimated_pages = plan.estimated_pages,
        "starting quad search"
    );

    let finder = QuadFinder::new(client);
    let mut session = finder.start(mosaics.clone(), &aoi)?;

    info!(session = %session.id(), mosaics = mosaics.len(), "quad search session started");

    let cancel = session.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut progress = SearchProgress::new(mosaics.len(), plan.estimated_pages);
    while let Some(event) = session.next_event().await {
        if let Some(line) = progress.apply(&event) {
            eprintln!("{line}");
        }
    }

    let outcome = session.join().await;
    interrupt.abort();

    let result = match outcome? {
        Outcome::Completed(result) => result,
        Outcome::Canceled { .. } => {
            println!("search canceled");
            return Ok(());
        }
    };

    if exceeds_quad_limit(result.total_quads()) {
        warn!(
            quads = result.total_quads(),
            limit = MAX_QUADS_TO_DOWNLOAD,
            "result exceeds the quad download limit"
        );
    }

    if as_json {
        let body = if by_quad {
            json!(group_by_quad(&mosaics, &result))
        } else {
            let grouped: Vec<_> = group_by_mosaic(&mosaics, &result)
                .into_iter()
                .map(|(name, quads)| json!({ "mosaic": name, "quads": quads }))
                .collect();
            json!(grouped)
        };
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    if by_quad {
        for (quad_id, instances) in group_by_quad(&mosaics, &result) {
            println!("{quad_id}: {}", instances.join(", "));
        }
    } else {
        for (name, quads) in group_by_mosaic(&mosaics, &result) {
            println!("{name} ({} quads, {:.2} km2)", quads.len(), total_area_km2(quads));
            for quad in quads {
                println!("  {} bbox={}", quad.id, quad.bbox.as_query_param());
            }
        }
    }
    println!("{}", summary(&mosaics, &result));

    Ok(())
}

fn acquired_range(mosaic: &Mosaic) -> String {
    match (mosaic.first_acquired, mosaic.last_acquired) {
        (Some(first), Some(last)) => format!(
            "{} - {}",
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d")
        ),
        (Some(first), None) => first.format("%Y-%m-%d").to_string(),
        _ => "-".to_string(),
    }
}
