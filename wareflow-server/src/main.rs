use std::net::TcpListener;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use wareflow::Database;
use wareflow_server::config::Config;
use wareflow_server::handler::AppState;
use wareflow_server::{logging, server};

fn main() {
    let config = Config::parse();
    logging::init(config.log_format);

    let policies = match config.policies() {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!(error = %e, "invalid stock policy configuration");
            process::exit(1);
        }
    };

    let db = Arc::new(Database::new());
    match config.load_seed(&db) {
        Ok(0) => {}
        Ok(n) => info!(documents = n, "seed data loaded"),
        Err(e) => {
            error!(error = %e, "failed to load seed data");
            process::exit(1);
        }
    }

    let state = match AppState::new(db, policies) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to initialize repositories");
            process::exit(1);
        }
    };

    let listener = match TcpListener::bind(&config.addr) {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %config.addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(addr = %config.addr, "wareflow-server listening");
    server::serve(listener, state);
}
