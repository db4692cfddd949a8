//! Marketplace simulation
//!
//! Runs an in-process market: a requester posts contracts while drivers
//! long-poll with their filters, bid on what they receive, and carry out
//! the moves they win.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use moveboard::{
    init_tracing, Account, AccountId, ContractDraft, ContractStatus, FilterCriteria,
    HaversineDistance, LifecycleManager, Location, LogFormat, MarketConfig, MarketResult,
    MarketStores, SystemClock,
};

struct Options {
    config: Option<PathBuf>,
    drivers: usize,
    contracts: usize,
    log_format: LogFormat,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config: None,
            drivers: 4,
            contracts: 12,
            log_format: LogFormat::Compact,
        }
    }
}

fn usage() -> ! {
    println!("market-sim - in-process moving marketplace simulation");
    println!();
    println!("USAGE:");
    println!("    market-sim [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>        JSON config file");
    println!("    -d, --drivers <N>          Number of polling drivers [default: 4]");
    println!("    -n, --contracts <N>        Contracts to post [default: 12]");
    println!("        --log-format <FORMAT>  json | pretty | compact [default: compact]");
    println!("    -h, --help                 Print help information");
    std::process::exit(0);
}

fn fail(message: &str) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut opts = Options::default();
    let mut it = args.iter();
    while let Some(flag) = it.next() {
        let mut value = || {
            it.next()
                .cloned()
                .unwrap_or_else(|| fail(&format!("{flag} requires a value")))
        };
        match flag.as_str() {
            "--config" | "-c" => opts.config = Some(PathBuf::from(value())),
            "--drivers" | "-d" => {
                let raw = value();
                opts.drivers = raw
                    .parse()
                    .unwrap_or_else(|_| fail(&format!("invalid driver count: {raw}")));
            }
            "--contracts" | "-n" => {
                let raw = value();
                opts.contracts = raw
                    .parse()
                    .unwrap_or_else(|_| fail(&format!("invalid contract count: {raw}")));
            }
            "--log-format" => {
                opts.log_format = match value().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    "compact" => LogFormat::Compact,
                    other => fail(&format!("unknown log format: {other}")),
                }
            }
            "--help" | "-h" => usage(),
            other => fail(&format!("unknown argument: {other}")),
        }
    }
    opts
}

fn main() {
    let opts = parse_args();
    if let Err(e) = init_tracing(opts.log_format, "info") {
        eprintln!("warning: {e}");
    }
    if let Err(e) = run(&opts) {
        error!(error = %e, "simulation failed");
        std::process::exit(1);
    }
}

fn run(opts: &Options) -> MarketResult<()> {
    let mut config = match &opts.config {
        Some(path) => MarketConfig::from_json_file(path)?,
        None => MarketConfig::default(),
    };
    if opts.config.is_none() {
        config.hub.poll_timeout = Duration::from_secs(2);
    }

    let stores = MarketStores::in_memory();
    let requester = Account::requester("rita", "rita@example.com");
    stores.accounts.insert(requester.clone())?;
    let drivers: Vec<Account> = (0..opts.drivers)
        .map(|i| Account::driver(format!("driver-{i}"), format!("driver-{i}@example.com")))
        .collect();
    for d in &drivers {
        stores.accounts.insert(d.clone())?;
    }

    let manager = LifecycleManager::new(
        stores,
        Arc::new(HaversineDistance),
        Arc::new(SystemClock),
        config,
    )?;
    let done = Arc::new(AtomicBool::new(false));

    let mut workers = Vec::with_capacity(drivers.len());
    for (idx, driver) in drivers.iter().enumerate() {
        let manager = manager.clone();
        let done = Arc::clone(&done);
        let driver_id = driver.id();
        // Spread caps so drivers see different slices of the board.
        let filter = FilterCriteria {
            max_price: Some(100.0 + 60.0 * idx as f64),
            ..FilterCriteria::default()
        };
        workers.push(thread::spawn(move || drive(&manager, driver_id, &filter, &done)));
    }

    for n in 0..opts.contracts {
        let contract = manager.create(sample_draft(requester.id(), n))?;
        thread::sleep(Duration::from_millis(150));

        let offers = manager.offers_for(contract.id)?;
        let Some(best) = offers
            .iter()
            .filter(|o| o.is_pending())
            .min_by(|a, b| a.price.total_cmp(&b.price))
        else {
            info!(contract = %contract.id, price = contract.price, "no offers yet");
            continue;
        };
        let accepted = manager.accept_offer(contract.id, best.id, requester.id())?;
        info!(
            contract = %accepted.id,
            driver = ?accepted.driver_id,
            price = best.price,
            "offer accepted"
        );
    }

    done.store(true, Ordering::Relaxed);
    for w in workers {
        if w.join().is_err() {
            warn!("driver thread panicked");
        }
    }

    let mut finished = 0;
    // Stands in for the rating service recording a review.
    for c in manager.contracts_for_requester(requester.id(), Some(ContractStatus::Completed))? {
        manager.mark_finalized(c.id)?;
        finished += 1;
    }
    info!(finished, stats = ?manager.hub().stats(), "simulation complete");
    Ok(())
}

fn drive(manager: &LifecycleManager, driver_id: AccountId, filter: &FilterCriteria, done: &AtomicBool) {
    let mut bid_on = HashSet::new();
    while !done.load(Ordering::Relaxed) {
        let handle = match manager.poll(None, filter.clone()) {
            Ok(h) => h,
            Err(e) => {
                warn!(driver = %driver_id, error = %e, "poll failed");
                return;
            }
        };
        for contract in handle.wait() {
            if !bid_on.insert(contract.id) {
                continue;
            }
            let bid = contract.price * 0.9;
            match manager.submit_offer(contract.id, driver_id, bid) {
                Ok(_) => {}
                Err(e) if e.is_conflict() => {}
                Err(e) => warn!(driver = %driver_id, error = %e, "offer failed"),
            }
        }

        // Carry out whatever was won so far.
        match manager.contracts_for_driver(driver_id, Some(ContractStatus::Accepted)) {
            Ok(won) => {
                for c in won {
                    if let Err(e) = manager.fulfill(c.id, driver_id) {
                        warn!(contract = %c.id, error = %e, "fulfill failed");
                    }
                }
            }
            Err(e) => warn!(driver = %driver_id, error = %e, "listing won contracts failed"),
        }
        thread::sleep(Duration::from_millis(50));
    }
}

fn sample_draft(requester_id: AccountId, n: usize) -> ContractDraft {
    ContractDraft {
        requester_id,
        title: format!("Move #{n}"),
        description: "Flat contents".to_string(),
        weight: 20.0 + n as f64,
        height: 1.5,
        width: 2.0,
        length: 3.0,
        man_power: 2,
        fragile: n % 3 == 0,
        cooling_required: false,
        ride_along: n % 2 == 0,
        price: 80.0 + 25.0 * (n % 8) as f64,
        collateral: 0.0,
        move_date_time: Utc::now() + chrono::Duration::days(7 + n as i64),
        from: Some(Location::new("Bahnhofstrasse 1, Zurich", 47.3769, 8.5417)),
        to: Some(Location::new("Bundesplatz 3, Bern", 46.9466, 7.4441)),
        photos: Vec::new(),
    }
}
