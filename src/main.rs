mod archiver;
mod browser;
mod config;
mod error;
mod extractor;
mod fetcher;
mod forecast;
mod logging;
mod models;
mod parser;
mod scheduler;
mod tracker;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::archiver::{JsonFileStore, PriceHistory};
use crate::browser::RenderedExtractor;
use crate::config::ConfigStore;
use crate::extractor::PriceExtractor;
use crate::fetcher::StaticExtractor;
use crate::logging::{LineLevel, LoggingConfig};
use crate::models::SelectorDescriptor;
use crate::scheduler::Phase;
use crate::tracker::Tracker;

#[derive(Parser)]
#[command(name = "product_price_tracker", about = "Track product prices scraped from web pages")]
struct Cli {
    /// Price history file
    #[arg(long, default_value = "prices.json")]
    data: PathBuf,

    /// Refresh configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    #[arg(long, default_value = logging::DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start tracking a product with its current price
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        price: f64,
        #[arg(long, default_value = "span")]
        tag: String,
        #[arg(long = "class")]
        class_name: String,
    },
    /// Record a price by hand
    Record { name: String, price: f64 },
    /// Extract the current price of one product now
    Refresh { name: String },
    History {
        name: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// List products with their latest price and forecast
    List,
    Logs {
        #[arg(long, default_value_t = 100)]
        lines: usize,
    },
    /// Show or change the automatic refresh frequency
    Config {
        #[arg(long)]
        frequency_hours: Option<u32>,
    },
    /// Run the refresh scheduler until Ctrl+C or `q` on stdin
    Watch {
        #[arg(long, default_value_t = 60)]
        poll_secs: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_logging(&LoggingConfig::new(&cli.log_file))
        .with_context(|| format!("opening log file {}", cli.log_file.display()))?;

    let history = PriceHistory::open(Box::new(JsonFileStore::new(&cli.data)))
        .with_context(|| format!("loading {}", cli.data.display()))?;
    let source = PriceExtractor::new(StaticExtractor::new()?, RenderedExtractor::default());
    let tracker = Tracker::new(
        history,
        Arc::new(source),
        ConfigStore::new(&cli.config),
        &cli.log_file,
    )
    .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Add { name, url, price, tag, class_name } => {
            let selector = SelectorDescriptor::new(tag, class_name);
            if tracker.add_product(&name, &url, price, selector)? {
                println!("Product '{}' added.", name.trim());
            } else {
                println!("Product '{}' already exists; nothing changed.", name.trim());
            }
        }
        Command::Record { name, price } => {
            tracker.record_price(&name, price)?;
            println!("Recorded R$ {:.2} for {}.", price, name);
        }
        Command::Refresh { name } => match tracker.refresh_now(&name)? {
            Some(price) => println!("{}: R$ {:.2}", name, price),
            None => println!("Could not update {}.", name),
        },
        Command::History { name, limit } => {
            if let Some(product) = tracker.product(&name) {
                println!("{} ({})", product.name, product.url);
            }
            for obs in tracker.history(&name, limit)? {
                println!("{}  R$ {:>10.2}", obs.timestamp.to_rfc3339(), obs.price);
            }
            if let Some(forecast) = tracker.forecast(&name)? {
                println!("Forecast (moving average): R$ {:.2}", forecast);
            }
        }
        Command::List => print_products(&tracker),
        Command::Logs { lines } => {
            let lines = tracker.recent_logs(lines)?;
            if lines.is_empty() {
                println!("The log is empty.");
            }
            for line in lines {
                let marker = match line.level {
                    LineLevel::Error => "!!",
                    LineLevel::Warning => " !",
                    LineLevel::Info | LineLevel::Other => "  ",
                };
                println!("{} {}", marker, line.text);
            }
        }
        Command::Config { frequency_hours } => {
            let config = match frequency_hours {
                Some(hours) => tracker.set_frequency_hours(hours)?,
                None => tracker.refresh_config(),
            };
            println!("Automatic update every {} hour(s).", config.frequency_hours);
        }
        Command::Watch { poll_secs } => watch(&tracker, Duration::from_secs(poll_secs))?,
    }

    Ok(())
}

fn print_products(tracker: &Tracker) {
    let products = tracker.products();
    if products.is_empty() {
        println!("No products registered.");
        return;
    }
    for product in products {
        println!("{}", product.name);
        println!("  URL: {}", product.url);
        println!("  Tag: {} | Class: {}", product.selector.tag, product.selector.class_name);
        if let Some(latest) = product.latest() {
            println!("  Latest: R$ {:.2} at {}", latest.price, latest.timestamp.to_rfc3339());
        }
        if let Some(forecast) = forecast::forecast(&product.prices()) {
            println!("  Forecast: R$ {:.2}", forecast);
        }
    }
}

fn watch(tracker: &Tracker, poll: Duration) -> Result<()> {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let ctrlc_tx = stop_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(());
    })
    .context("Failed to set Ctrl+C handler")?;

    std::thread::Builder::new()
        .name("stdin-stop".into())
        .spawn(move || stop_on_quit(std::io::stdin().lock(), &stop_tx))
        .context("starting stdin reader")?;

    let handle = tracker.start_scheduler(poll).context("starting refresh scheduler")?;
    println!(
        "Refreshing every {} hour(s). Press Ctrl+C (or enter `q`) to stop.",
        tracker.refresh_config().frequency_hours
    );

    // Only the stdin reader can drop its sender, and the Ctrl+C one lives for
    // the whole process, so this returns on a stop request.
    let _ = stop_rx.recv();

    let state = handle.state();
    if state.phase == Phase::Running {
        println!("Waiting for the running update to finish...");
    } else if let Some(last) = state.last_sweep {
        println!("Last automatic update finished at {}.", last.to_rfc3339());
    }
    handle.stop();
    Ok(())
}

/// Sends a stop request when a line reads `q`. Interactive stop only: a
/// closed or absent stdin returns without sending, and the watcher keeps
/// running until Ctrl+C.
fn stop_on_quit(input: impl BufRead, stop: &mpsc::Sender<()>) {
    for line in input.lines() {
        match line {
            Ok(line) if line.trim() == "q" => {
                let _ = stop.send(());
                return;
            }
            Ok(_) => {}
            Err(_) => return,
        }
    }
}
