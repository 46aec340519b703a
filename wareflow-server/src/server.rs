use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::handler::{AppState, handle_request};
use crate::protocol::{read_message, write_json};

/// Accept connections forever, one thread per client.
pub fn serve(listener: TcpListener, state: Arc<AppState>) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let state = Arc::clone(&state);
        std::thread::spawn(move || handle_client(stream, &state));
    }
}

pub fn handle_client(mut stream: TcpStream, state: &AppState) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    debug!(%peer, "client connected");

    loop {
        let msg = match read_message(&mut stream) {
            Ok(m) => m,
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    warn!(%peer, error = %e, "read failed");
                }
                break;
            }
        };

        let response = match serde_json::from_slice::<Value>(&msg) {
            Ok(request) => handle_request(state, &request),
            Err(e) => json!({
                "ok": false,
                "status": 400,
                "error": "validation",
                "message": format!("invalid JSON: {e}"),
            }),
        };

        if let Err(e) = write_json(&mut stream, &response) {
            warn!(%peer, error = %e, "write failed");
            break;
        }
    }

    info!(%peer, "client disconnected");
}
