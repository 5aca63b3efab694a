use wolretry::config;
use wolretry::host::{Lifecycle, MonotonicClock};
use wolretry::net;
use wolretry::scheduler::Scheduler;

use clap::Parser;
use log::{info, warn};
use rouille::{Request, Response};
use serde_json::{json, Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    http_addr: String,

    /// JSON settings file. Rewritten when fields are missing.
    #[arg(long, env = "WOL_CONFIG", default_value = "wolretry.json")]
    config: PathBuf,

    /// Only broadcast on this network interface.
    #[arg(long, env = "WOL_INTERFACE")]
    interface: Option<String>,

    /// Target MAC address, in xx:xx:xx:xx:xx:xx form. Overrides the settings file.
    #[arg(long, env = "WOL_MAC")]
    mac: Option<String>,

    /// Milliseconds between scheduler ticks.
    #[arg(long, default_value_t = 1000)]
    tick_ms: u64,

    /// If true, log packets instead of sending them.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Clone)]
struct AppState {
    scheduler: Arc<Mutex<Scheduler>>,
    config_path: PathBuf,
}

fn load_settings(path: &Path) -> Value {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("no settings at {}, using defaults", path.display());
            return Value::Null;
        }
        Err(e) => {
            warn!("can't read {}: {}", path.display(), e);
            return Value::Null;
        }
    };
    serde_json::from_str(&contents).unwrap_or_else(|e| {
        warn!("can't parse {}: {}", path.display(), e);
        Value::Null
    })
}

// Other top-level objects in the file are left alone.
fn save_settings(path: &Path, scheduler: &Scheduler) -> Result<(), Box<dyn std::error::Error>> {
    let mut root = match load_settings(path) {
        Value::Object(root) => root,
        _ => Map::new(),
    };
    scheduler.add_to_config(&mut root);
    fs::write(path, serde_json::to_string_pretty(&Value::Object(root))?)?;
    info!("wrote settings to {}", path.display());
    Ok(())
}

fn run_ticks(scheduler: Arc<Mutex<Scheduler>>, period: Duration) {
    let mut was_connected = false;
    loop {
        {
            let mut s = scheduler.lock().unwrap();
            let connected = s.is_connected();
            if connected && !was_connected {
                s.on_network_up();
            }
            was_connected = connected;
            s.on_tick();
        }
        thread::sleep(period);
    }
}

fn varz() -> Response {
    let metrics = prometheus::gather();
    let encoder = prometheus::TextEncoder::new();
    match encoder.encode_to_string(&metrics) {
        Ok(text) => Response::text(text),
        Err(e) => Response::text(e.to_string()).with_status_code(500),
    }
}

fn handle(request: &Request, app: &AppState) -> Response {
    rouille::router!(request,
        (GET) (/json/info) => {
            let mut root = json!({});
            app.scheduler.lock().unwrap().add_to_json_info(&mut root);
            Response::json(&root)
        },
        (GET) (/json/state) => {
            let mut root = json!({});
            app.scheduler.lock().unwrap().add_to_json_state(&mut root);
            Response::json(&root)
        },
        (POST) (/json/state) => {
            let body: Value = rouille::try_or_400!(rouille::input::json_input(request));
            let mut root = json!({});
            let mut s = app.scheduler.lock().unwrap();
            let outcome = s.read_from_json_state(&body);
            info!("state write: {:?}", outcome);
            s.add_to_json_state(&mut root);
            Response::json(&root)
        },
        (GET) (/json/config) => {
            let mut root = Map::new();
            app.scheduler.lock().unwrap().add_to_config(&mut root);
            Response::json(&Value::Object(root))
        },
        (POST) (/json/config) => {
            let body: Value = rouille::try_or_400!(rouille::input::json_input(request));
            let mut s = app.scheduler.lock().unwrap();
            let complete = s.read_from_config(&body);
            match save_settings(&app.config_path, &s) {
                Ok(()) => Response::json(&json!({ "complete": complete })),
                Err(e) => Response::text(e.to_string()).with_status_code(500),
            }
        },
        (GET) (/json/config/hints) => {
            Response::json(&config::config_hints())
        },
        (GET) (/varz) => {
            varz()
        },
        _ => Response::empty_404()
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("INFO"))
        .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Millis))
        .init();

    let transport: Box<dyn net::Transport> = if args.dry_run {
        Box::new(net::noop::LogOnlyTransport::default())
    } else {
        Box::new(net::UdpBroadcast::new(args.interface.clone()))
    };
    let mut scheduler = Scheduler::new(
        config::Policy::default(),
        Box::new(MonotonicClock::new()),
        transport,
    );

    let complete = scheduler.read_from_config(&load_settings(&args.config));
    if let Some(mac) = &args.mac {
        scheduler.set_target(mac)?;
    }
    if !complete || args.mac.is_some() {
        save_settings(&args.config, &scheduler)?;
    }
    scheduler.on_init();

    let app = AppState {
        scheduler: Arc::new(Mutex::new(scheduler)),
        config_path: args.config,
    };

    let ticker = app.scheduler.clone();
    let period = Duration::from_millis(args.tick_ms.max(1));
    thread::spawn(move || run_ticks(ticker, period));

    info!("Starting server on {}...", args.http_addr);
    let server = rouille::Server::new(args.http_addr.as_str(), move |request| {
        rouille::log_custom(
            request,
            |req, resp, elapsed| {
                info!(
                    "{} {} {} {}ms",
                    req.method(),
                    req.raw_url(),
                    resp.status_code,
                    elapsed.as_millis()
                )
            },
            |req, elapsed| warn!("{} {} panicked after {:?}", req.method(), req.raw_url(), elapsed),
            || handle(request, &app),
        )
    })
    .map_err(|e| e.to_string())?;
    server.run();
    Ok(())
}
