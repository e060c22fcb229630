//! services/scanner/src/bin/scanner.rs
//!
//! The scanning client. Reads one scanned QR text per line from stdin, records
//! each scan online or in the local queue, and keeps the queue draining in the
//! background while the server is reachable.

use std::sync::Arc;

use attendance_core::capture::{CaptureError, CaptureOutcome, ScanRecorder};
use attendance_core::connectivity::{run_probe_loop, ConnectivityMonitor};
use attendance_core::ports::{ConnectivityProbe, PendingQueue};
use attendance_core::sync::{run_auto_sync, SyncCoordinator};
use attendance_core::token::TokenCodec;
use scanner_lib::{
    adapters::{HttpIngestionClient, HttpProbe, SqliteQueue},
    config::Config,
    error::ScannerError,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ScannerError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!(?config, "Configuration loaded. Starting scanner...");

    // --- 2. Open the Local Queue ---
    let queue = Arc::new(SqliteQueue::open(&config.queue_path).await?);
    let pending = queue.pending_count().await?;
    info!(pending, "Local queue ready");

    // --- 3. Wire the Engine ---
    let gateway = Arc::new(HttpIngestionClient::new(
        config.api_base_url.clone(),
        config.api_token.clone(),
        config.request_timeout,
    )?);
    let probe: Arc<dyn ConnectivityProbe> =
        Arc::new(HttpProbe::new(&config.api_base_url, config.request_timeout)?);
    let monitor = Arc::new(ConnectivityMonitor::new(probe.is_reachable().await));
    info!(online = monitor.is_online(), "Initial reachability");

    let coordinator = Arc::new(SyncCoordinator::new(
        queue.clone(),
        gateway.clone(),
        monitor.clone(),
        config.request_timeout,
    ));

    let mut recorder = ScanRecorder::new(
        queue.clone(),
        gateway,
        monitor.clone(),
        config.request_timeout,
    );
    if let Some(secret) = &config.token_secret {
        info!("Deriving token key, this device decodes tokens locally");
        let codec = TokenCodec::with_cost(secret, config.token_kdf_log_n)?;
        recorder = recorder.with_local_codec(codec);
    }
    if let Some(operator_id) = &config.operator_id {
        recorder = recorder.with_operator_id(operator_id.clone());
    }

    // --- 4. Start Background Tasks ---
    let cancel = CancellationToken::new();
    let probe_task = tokio::spawn(run_probe_loop(
        monitor.clone(),
        probe,
        config.probe_interval,
        cancel.clone(),
    ));
    let mut sync_task = tokio::spawn(run_auto_sync(
        coordinator,
        config.sync_interval,
        cancel.clone(),
    ));

    // --- 5. Capture Scans Until EOF, Ctrl-C or a Fatal Queue Error ---
    info!("Ready for scans");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sync_result = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            joined = &mut sync_task => {
                sync_result = Some(joined);
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => handle_scan(&recorder, &line).await?,
                None => {
                    info!("Input closed, shutting down");
                    break;
                }
            },
        }
    }

    // --- 6. Shut Down ---
    cancel.cancel();
    let sync_result = match sync_result {
        Some(joined) => joined,
        None => sync_task.await,
    };
    if let Err(e) = probe_task.await {
        warn!("Probe task ended abnormally: {}", e);
    }
    sync_result.map_err(|e| ScannerError::Internal(format!("Sync task panicked: {}", e)))??;

    let pending = queue.pending_count().await?;
    if pending > 0 {
        info!(pending, "Claims remain queued for the next run");
    }
    queue.close().await;
    Ok(())
}

/// Records one scan. Only a broken local queue is fatal.
async fn handle_scan(recorder: &ScanRecorder, scanned: &str) -> Result<(), ScannerError> {
    match recorder.capture_scan(scanned).await {
        Ok(CaptureOutcome::Marked(record)) => info!(
            student_id = %record.student_id,
            session_id = %record.session_id,
            "Attendance marked"
        ),
        Ok(CaptureOutcome::Duplicate) => info!("Attendance already marked for this session"),
        Ok(CaptureOutcome::Queued(record)) => info!(
            local_id = record.local_id,
            student_id = %record.claim.student_id(),
            "Offline, attendance saved locally"
        ),
        Err(CaptureError::Storage(e)) => {
            error!("Local queue unavailable: {}", e);
            return Err(ScannerError::Port(e));
        }
        Err(e) => warn!("Scan not recorded: {}", e),
    }
    Ok(())
}
