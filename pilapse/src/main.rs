use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pilapse::capture::StillCommandCapturer;
use pilapse::command::{CommandDispatcher, CommandListener, CommandParser, parse_duration_token};
use pilapse::config::AppConfig;
use pilapse::health::HealthMonitor;
use pilapse::logging;
use pilapse::notification::{MessageSink, NotificationDispatcher};
use pilapse::scheduler::{CaptureScheduler, SchedulerOptions};
use pilapse::slack::SlackClient;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file (default: ./pilapse.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one capture session from the config, encode the video, exit
    Run {
        /// Override the capture interval (e.g. 30s, 5m)
        #[arg(long, value_parser = parse_duration_arg)]
        interval: Option<Duration>,

        /// Override the session length (e.g. 10m, 2h)
        #[arg(long, value_parser = parse_duration_arg)]
        duration: Option<Duration>,
    },
    /// Listen for chat commands until interrupted
    Bot,
    /// Take a single picture outside any session
    Snapshot {
        /// Also post a preview to the chat channel
        #[arg(long)]
        post: bool,
    },
    /// Print one health sample as JSON
    CheckHealth,
}

fn parse_duration_arg(value: &str) -> Result<Duration, String> {
    parse_duration_token(&value.to_lowercase())
        .ok_or_else(|| format!("invalid duration {value:?}, expected e.g. 30s, 10m or 1h"))
}

struct App {
    slack: Arc<SlackClient>,
    scheduler: CaptureScheduler,
}

async fn build_app(config: &AppConfig, options: SchedulerOptions, shutdown: CancellationToken) -> App {
    let slack = Arc::new(SlackClient::new(config.slack.clone()));
    if slack.config().is_enabled() {
        if let Err(e) = slack.verify().await {
            warn!(error = %e, "Slack verification failed, notifications may not be delivered");
        }
    } else {
        info!("Slack notifications disabled");
    }

    let sink: Arc<dyn MessageSink> = slack.clone();
    let dispatcher = Arc::new(NotificationDispatcher::new(
        sink,
        config.slack.channel.clone(),
        config.notifications.clone(),
    ));
    let capturer = Box::new(StillCommandCapturer::new(config.camera.clone()));
    let scheduler = CaptureScheduler::new(capturer, dispatcher, options, shutdown);

    App { slack, scheduler }
}

fn watch_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
}

async fn run_session(
    config: &AppConfig,
    interval: Option<Duration>,
    duration: Option<Duration>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut options = config.scheduler_options();
    // Encoded inline below so the process does not exit mid-encode.
    let video = options.video.take();

    let base = config.session_config();
    let session = base.with_schedule(
        interval.unwrap_or(base.interval),
        duration.unwrap_or(base.total_duration),
    );

    let app = build_app(config, options, shutdown).await;
    let result = app.scheduler.run_session(session.clone()).await;
    app.scheduler.close_camera().await;
    let state = result.context("Failed to start capture session")?;

    info!(
        image_count = state.image_count,
        stats = ?app.scheduler.dispatcher().stats(),
        "Session finished"
    );

    if let Some(video) = video
        && let Err(e) = video.encode(&session.output_dir, &session.filename_prefix).await
    {
        warn!(error = %e, "Video creation failed");
    }
    Ok(())
}

async fn run_bot(config: &AppConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let parser = CommandParser::new(&config.bot.mention)?;
    let app = build_app(config, config.scheduler_options(), shutdown.clone()).await;
    if !app.slack.config().is_enabled() {
        app.scheduler.close_camera().await;
        anyhow::bail!("bot mode needs slack.enabled and a bot token");
    }

    let sink: Arc<dyn MessageSink> = app.slack.clone();
    let dispatcher = Arc::new(CommandDispatcher::new(
        app.scheduler.clone(),
        sink,
        parser,
        config.bot.reply_to_unknown,
    ));

    info!(mode = ?config.bot.mode, channel = %config.slack.channel, "Timelapse bot started");
    let result = CommandListener::new(dispatcher, Arc::clone(&app.slack), config.bot.clone())
        .run(shutdown.clone())
        .await;

    shutdown.cancel();
    app.scheduler.shutdown().await;
    result.context("Command listener failed")
}

async fn snapshot(config: &AppConfig, post: bool, shutdown: CancellationToken) -> anyhow::Result<()> {
    let app = build_app(config, config.scheduler_options(), shutdown).await;
    let result = app.scheduler.capture_once(post).await;
    app.scheduler.close_camera().await;

    let outcome = result.context("Capture failed")?;
    println!("{}", outcome.path.display());
    if post && !outcome.photo_delivered {
        warn!("Snapshot was not posted to chat");
    }
    Ok(())
}

fn check_health(config: &AppConfig) -> anyhow::Result<()> {
    let monitor = HealthMonitor::with_thermal_zone(
        &config.health.thermal_zone_path,
        &config.session.output_dir,
    )
    .component_fallback(config.health.sensor_fallback);
    let result = monitor.check(&config.health.thresholds);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let _guard = logging::init_logging(&config.logging).context("Failed to initialize logging")?;
    logging::install_panic_hook(&config.logging.dir);

    let shutdown = CancellationToken::new();
    logging::start_retention_cleanup(&config.logging, shutdown.clone());
    watch_ctrl_c(shutdown.clone());

    let result = match cli.command {
        Command::Run { interval, duration } => {
            run_session(&config, interval, duration, shutdown.clone()).await
        }
        Command::Bot => run_bot(&config, shutdown.clone()).await,
        Command::Snapshot { post } => snapshot(&config, post, shutdown.clone()).await,
        Command::CheckHealth => check_health(&config),
    };

    shutdown.cancel();
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "pilapse exited with an error");
    }
    result
}
