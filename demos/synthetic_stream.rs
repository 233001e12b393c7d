//! Synthetic stream example
//!
//! Pushes generated SVG frames on the image channel and fake sensor rows on
//! the auxiliary channel.
//!
//! Run with: cargo run --example synthetic_stream [PORT] [--raw-aux]
//!
//! Examples:
//!   cargo run --example synthetic_stream              # serves on port 8080
//!   cargo run --example synthetic_stream 9000         # serves on port 9000
//!   cargo run --example synthetic_stream 9000 --raw-aux
//!
//! ## Watching
//!
//! Firefox renders the multipart stream directly:
//!   http://localhost:8080/
//!
//! With curl (shows part headers and CSV rows):
//!   curl -sN http://localhost:8080/
//!
//! With `--raw-aux` the server runs in raw mode and serves only the CSV
//! rows, as a plain `text/csv` body.
//!
//! The CSV column names are a one-shot header: they are queued whenever a
//! viewer joins and go out with the next row, so every new viewer sees them.
//! Viewers already watching get them again at that point.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mxstream::{ServerConfig, SessionInfo, StreamMode, StreamingCallback, StreamingServer};

const DEFAULT_PORT: u16 = 8080;
const FRAME_INTERVAL: Duration = Duration::from_millis(100);
const SENSOR_INTERVAL: Duration = Duration::from_millis(20);
const CSV_COLUMNS: &str = "timestamp,x,y,z\n";

/// Logs viewers the way a recorder would start and stop
struct ViewerLog {
    viewers: AtomicU64,
    /// Set when a viewer joined and has not seen the column names yet
    header_due: AtomicBool,
}

impl StreamingCallback for ViewerLog {
    fn on_start(&self, session: &SessionInfo) {
        self.header_due.store(true, Ordering::Release);
        let viewers = self.viewers.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(session_id = %session.id, peer = %session.peer_addr, viewers, "Viewer joined");
    }

    fn on_stop(&self, session: &SessionInfo) {
        let viewers = self.viewers.fetch_sub(1, Ordering::Relaxed) - 1;
        tracing::info!(
            session_id = %session.id,
            watched = ?session.age(),
            viewers,
            "Viewer left"
        );
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn render_frame(index: u64) -> String {
    let angle = (index % 60) as f64 / 60.0 * TAU;
    let x = 160.0 + 100.0 * angle.cos();
    let y = 120.0 + 80.0 * angle.sin();
    format!(
        concat!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"320\" height=\"240\">",
            "<rect width=\"320\" height=\"240\" fill=\"#202020\"/>",
            "<circle cx=\"{:.1}\" cy=\"{:.1}\" r=\"16\" fill=\"#e0a020\"/>",
            "<text x=\"8\" y=\"232\" fill=\"#ffffff\" font-family=\"monospace\">frame {}</text>",
            "</svg>"
        ),
        x, y, index
    )
}

fn sensor_row(index: u64, timestamp: i64) -> String {
    let t = index as f64 * 0.05;
    format!("{},{:.4},{:.4},{:.4}\n", timestamp, t.sin(), t.cos(), (t * 0.3).sin())
}

fn print_usage() {
    eprintln!("Usage: synthetic_stream [PORT] [--raw-aux]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  PORT         Port to listen on (default: {})", DEFAULT_PORT);
    eprintln!("  --raw-aux    Serve only the CSV rows as a raw text/csv body");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let raw_aux = args.iter().any(|a| a == "--raw-aux");
    let port = match args.iter().find(|a| !a.starts_with("--")) {
        Some(port) => match port.parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                eprintln!("Error: invalid port '{}'", port);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => DEFAULT_PORT,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mxstream=debug".parse()?)
                .add_directive("synthetic_stream=info".parse()?),
        )
        .init();

    let config = if raw_aux {
        ServerConfig::default().mode(StreamMode::Raw("text/csv".into()))
    } else {
        ServerConfig::default()
    };
    let server = StreamingServer::new(config);
    let viewer_log = Arc::new(ViewerLog {
        viewers: AtomicU64::new(0),
        header_due: AtomicBool::new(false),
    });
    server.set_callback(viewer_log.clone());

    let image_type = (!raw_aux).then_some("image/svg+xml");
    server.start(port, image_type, true).await?;

    println!("Streaming on http://localhost:{}/", port);
    println!("Press Ctrl+C to stop");

    let mut frames = tokio::time::interval(FRAME_INTERVAL);
    let mut readings = tokio::time::interval(SENSOR_INTERVAL);
    let mut frame_index = 0u64;
    let mut reading_index = 0u64;

    loop {
        tokio::select! {
            _ = frames.tick(), if !raw_aux => {
                frame_index += 1;
                let frame = render_frame(frame_index);
                if let Err(e) = server.stream_image(frame.as_bytes(), now_millis()) {
                    tracing::warn!(error = %e, "Failed to push frame");
                }
            }
            _ = readings.tick() => {
                reading_index += 1;
                let timestamp = now_millis();
                let row = sensor_row(reading_index, timestamp);
                if viewer_log.header_due.swap(false, Ordering::AcqRel) {
                    if let Err(e) = server.set_aux_header(CSV_COLUMNS) {
                        tracing::warn!(error = %e, "Failed to queue CSV header");
                    }
                }
                if let Err(e) = server.stream_aux_data(row.as_bytes(), timestamp) {
                    tracing::warn!(error = %e, "Failed to push sensor row");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    let stats = server.stats();
    server.stop().await;
    println!(
        "Served {} connections, broadcast {} parts",
        stats.total_connections, stats.parts_broadcast
    );

    Ok(())
}
