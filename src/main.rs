use clap::{Args, Parser, Subcommand};
use pagesettle::scripts::{Helper, PAGE_HELPERS};
use pagesettle::SettleConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pagesettle", version, about = "Prepare pages for deterministic full-page captures")]
struct Cli {
    #[command(flatten)]
    settle: SettleArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct SettleArgs {
    /// JSON file with watcher settings
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    image_timeout_ms: Option<u64>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    #[arg(long)]
    required_unchanged: Option<u32>,
    #[arg(long)]
    stable_timeout_ms: Option<u64>,
}

impl SettleArgs {
    fn resolve(&self) -> anyhow::Result<SettleConfig> {
        let mut config = match &self.config {
            Some(path) => SettleConfig::from_json_file(path)?,
            None => SettleConfig::default(),
        };
        if let Some(v) = self.image_timeout_ms {
            config.image_timeout_ms = v;
        }
        if let Some(v) = self.poll_interval_ms {
            config.poll_interval_ms = v;
        }
        if let Some(v) = self.required_unchanged {
            config.required_unchanged = v;
        }
        if self.stable_timeout_ms.is_some() {
            config.stable_timeout_ms = self.stable_timeout_ms;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the helper bundle, optionally followed by one helper call
    Script {
        /// disable-smooth-scroll, wait-for-images, get-full-height,
        /// detect-dynamic-content-stable or force-dark-mode
        helper: Option<Helper>,
    },
    /// Load a URL in headless Chrome and prepare it for capture
    Capture {
        #[arg(long)]
        url: String,
        /// Force a dark color scheme first
        #[arg(long)]
        dark: bool,
        #[arg(long, default_value_t = 1280)]
        width: u32,
        #[arg(long, default_value_t = 720)]
        height: u32,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = cli.settle.resolve()?;

    match cli.command {
        Command::Script { helper: Some(helper) } => println!("{}", helper.script(&config)),
        Command::Script { helper: None } => println!("{}", PAGE_HELPERS.trim()),
        Command::Capture { url, dark, width, height } => capture(config, &url, dark, width, height)?,
    }
    Ok(())
}

#[cfg(feature = "cdp")]
fn capture(config: SettleConfig, url: &str, dark: bool, width: u32, height: u32) -> anyhow::Result<()> {
    use pagesettle::cdp::{BrowserConfig, Viewport};
    use pagesettle::{CaptureBrowser, CaptureOptions};

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let browser_config = BrowserConfig {
            viewport: Viewport { width, height },
            ..Default::default()
        };
        let browser = CaptureBrowser::launch(Some(browser_config), config).await?;
        browser.goto(url).await?;
        let options = CaptureOptions {
            dark_mode: dark,
            ..Default::default()
        };
        let report = browser.prepare_for_capture(options).await;
        browser.close().await?;
        println!("{}", serde_json::to_string_pretty(&report?)?);
        Ok::<(), anyhow::Error>(())
    })
}

#[cfg(not(feature = "cdp"))]
fn capture(_config: SettleConfig, url: &str, _dark: bool, _width: u32, _height: u32) -> anyhow::Result<()> {
    anyhow::bail!("cannot capture {}: pagesettle was built without the `cdp` feature", url)
}
