mod cli;

use mediakiln::config;
use mediakiln::probe::{FfprobeProber, MediaProber};
use mediakiln::transcode::{
    CacheJanitor, Encoder, FfmpegEncoder, JobStatusReport, RenditionStore, TranscodeService,
};
use mediakiln_common::{JobId, MediaId};
use mediakiln_db::pool::init_pool;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise use defaults based on the
    // verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediakiln=trace,mediakiln_db=debug,mediakiln_common=debug".to_string()
        } else {
            "mediakiln=info,mediakiln_db=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Run {
            input,
            quality,
            media_id,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_transcode(
                &input,
                &quality,
                media_id,
                cli.config.as_deref(),
            ))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, cli.config.as_deref()))
        }
        Commands::Status { job_id } => show_status(job_id, cli.config.as_deref()),
        Commands::Qualities { media_id } => list_qualities(media_id, cli.config.as_deref()),
        Commands::Purge { older_than_hours } => {
            purge_cache(older_than_hours, cli.config.as_deref())
        }
        Commands::PruneJobs { older_than_days } => {
            prune_jobs(older_than_days, cli.config.as_deref())
        }
        Commands::CheckTools => check_tools(),
        Commands::Version => {
            println!("mediakiln {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn open_pool(config: &config::Config) -> Result<mediakiln_db::DbPool> {
    std::fs::create_dir_all(&config.storage.data_dir)?;
    let db_path = config.db_path();
    tracing::debug!("opening database at {}", db_path.display());
    Ok(init_pool(&db_path.to_string_lossy())?)
}

fn build_prober(config: &config::Config) -> Result<Arc<dyn MediaProber>> {
    let prober = match &config.transcode.ffprobe_path {
        Some(path) => FfprobeProber::new(path.clone()),
        None => FfprobeProber::discover()?,
    };
    Ok(Arc::new(prober))
}

fn build_encoder(config: &config::Config) -> Result<Arc<dyn Encoder>> {
    let encoder = match &config.transcode.ffmpeg_path {
        Some(path) => FfmpegEncoder::new(path.clone(), config.transcode.preset.clone()),
        None => FfmpegEncoder::discover(config.transcode.preset.clone())?,
    };
    Ok(Arc::new(encoder))
}

async fn run_transcode(
    input: &Path,
    quality: &str,
    media_id: Option<MediaId>,
    config_path: Option<&Path>,
) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", input);
    }

    let config = config::load_config_or_default(config_path)?;
    let pool = open_pool(&config)?;
    let service = TranscodeService::new(
        pool.clone(),
        config.scheduler_settings(),
        build_prober(&config)?,
        build_encoder(&config)?,
    )?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let janitor = CacheJanitor::new(
        pool,
        service.store(),
        config.cache_ttl(),
        config.janitor_interval(),
    );
    let janitor_handle = janitor.start(shutdown_rx);

    let media_id = media_id.unwrap_or_default();
    let job_id = service.submit(media_id, input, quality).await?;
    println!("Submitted job {} (media {})", job_id, media_id);

    let report = wait_for_terminal(&service, job_id).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let _ = shutdown_tx.send(()).await;
    let _ = janitor_handle.await;

    if report.status == "failed" {
        anyhow::bail!(
            "transcode failed: {}",
            report.error_message.unwrap_or_default()
        );
    }
    Ok(())
}

async fn wait_for_terminal(
    service: &TranscodeService,
    job_id: JobId,
) -> Result<JobStatusReport> {
    let mut last_reported = -1.0;
    loop {
        let report = service.status(job_id)?;
        match report.status.as_str() {
            "completed" | "failed" => return Ok(report),
            _ => {
                if report.progress > last_reported {
                    last_reported = report.progress;
                    tracing::info!(progress = report.progress, "transcoding");
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

async fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let prober = build_prober(&config)?;
    let probe = prober.probe(file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&probe)?);
    } else {
        println!("File: {}", file.display());
        if let Some(duration) = probe.duration_secs {
            let secs = duration as u64;
            let mins = secs / 60;
            let hours = mins / 60;
            println!("Duration: {:02}:{:02}:{:02}", hours, mins % 60, secs % 60);
        }
        match (probe.width, probe.height) {
            (Some(w), Some(h)) => println!("Resolution: {}x{}", w, h),
            _ => println!("Resolution: unknown (no video stream?)"),
        }
        if let Some(ref codec) = probe.video_codec {
            println!("Video codec: {}", codec);
        }
        if let Some(ref codec) = probe.audio_codec {
            println!("Audio codec: {}", codec);
        }
        if let Some(bit_rate) = probe.bit_rate {
            println!("Bitrate: {} b/s", bit_rate);
        }
    }

    Ok(())
}

fn show_status(job_id: JobId, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let pool = open_pool(&config)?;
    let conn = pool.get()?;

    let job = mediakiln_db::queries::transcode_jobs::get_job(&conn, job_id)?;
    let report = JobStatusReport::from(job);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn list_qualities(media_id: MediaId, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let pool = open_pool(&config)?;
    let conn = pool.get()?;

    let store = RenditionStore::new(config.cache_dir());
    let qualities = store.available_qualities(&conn, media_id)?;
    if qualities.is_empty() {
        println!("No cached renditions for media {}", media_id);
    } else {
        for quality in qualities {
            println!("{}", quality);
        }
    }
    Ok(())
}

fn purge_cache(older_than_hours: u64, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let pool = open_pool(&config)?;
    let conn = pool.get()?;

    let store = RenditionStore::new(config.cache_dir());
    let removed = store.evict_older_than(&conn, Duration::from_secs(older_than_hours * 3600))?;
    println!("Evicted {} cached renditions", removed);
    Ok(())
}

fn prune_jobs(older_than_days: u64, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let pool = open_pool(&config)?;
    let conn = pool.get()?;

    let cutoff = chrono::Utc::now() - chrono::Duration::days(older_than_days as i64);
    let pruned = mediakiln_db::queries::transcode_jobs::prune_terminal_jobs(&conn, cutoff)?;
    println!("Pruned {} job records", pruned);
    Ok(())
}

fn check_tools() -> Result<()> {
    println!("Checking external tools...\n");

    let mut all_ok = true;
    for tool in ["ffmpeg", "ffprobe"] {
        match which::which(tool) {
            Ok(path) => println!("✓ {} - {}", tool, path.display()),
            Err(_) => {
                all_ok = false;
                println!("✗ {}", tool);
            }
        }
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable transcoding.");
    }

    Ok(())
}
