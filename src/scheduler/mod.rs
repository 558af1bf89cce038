//! Background loops driving scanning and DNS-log ingestion
//!
//! The scheduler owns two independent loops, one running scan ticks and one
//! ingesting DNS query logs. Each has its own lifecycle
//! (`Stopped → Running → Stopping → Stopped`), a watch channel for shutdown,
//! and a bounded join on stop. A tick that fails is logged at the loop
//! boundary and the loop keeps going; only `stop()` ends a loop.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{IngestMode, Settings};
use crate::detector;
use crate::error::Result;
use crate::ingest::{self, AdguardClient};
use crate::models::{HostRecord, HostStatus, ScanRun, ScanStats};
use crate::notify::NotificationDispatcher;
use crate::scanner::{resolve_targets, HostProber, NeighborTable};
use crate::store::Store;
use crate::vendor::OuiLookup;

/// Lifecycle state of one background loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
    Stopping,
}

struct LoopHandle {
    state: LoopState,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl LoopHandle {
    fn new() -> Self {
        Self {
            state: LoopState::Stopped,
            stop_tx: None,
            task: None,
        }
    }
}

/// Shared dependencies of both loops
#[derive(Clone)]
pub struct SchedulerContext {
    pub store: Arc<dyn Store>,
    pub neighbors: Arc<dyn NeighborTable>,
    pub dispatcher: Arc<NotificationDispatcher>,
    /// Target specification from process config, resolved fresh each tick
    pub targets_spec: String,
}

pub struct ScanScheduler {
    ctx: SchedulerContext,
    join_timeout: Duration,
    scan_loop: Mutex<LoopHandle>,
    ingest_loop: Mutex<LoopHandle>,
}

impl ScanScheduler {
    pub fn new(ctx: SchedulerContext, join_timeout: Duration) -> Self {
        Self {
            ctx,
            join_timeout,
            scan_loop: Mutex::new(LoopHandle::new()),
            ingest_loop: Mutex::new(LoopHandle::new()),
        }
    }

    /// Start both loops. Starting an already running loop is a no-op.
    pub fn start(&self) {
        self.start_loop(&self.scan_loop, "scan", |ctx, stop_rx| {
            tokio::spawn(scan_loop(ctx, stop_rx))
        });
        self.start_loop(&self.ingest_loop, "ingest", |ctx, stop_rx| {
            tokio::spawn(ingest_loop(ctx, stop_rx))
        });
    }

    fn start_loop<F>(&self, slot: &Mutex<LoopHandle>, name: &str, spawn: F)
    where
        F: FnOnce(SchedulerContext, watch::Receiver<bool>) -> JoinHandle<()>,
    {
        let mut handle = slot.lock().unwrap();
        if handle.state != LoopState::Stopped {
            tracing::debug!(loop_name = name, "loop already running, start ignored");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        handle.task = Some(spawn(self.ctx.clone(), stop_rx));
        handle.stop_tx = Some(stop_tx);
        handle.state = LoopState::Running;
        tracing::info!(loop_name = name, "loop started");
    }

    /// Signal both loops to stop and wait for each, bounded by the join
    /// timeout. A loop that fails to join in time is abandoned and still
    /// marked Stopped.
    pub async fn stop(&self) {
        self.stop_loop(&self.scan_loop, "scan").await;
        self.stop_loop(&self.ingest_loop, "ingest").await;
    }

    async fn stop_loop(&self, slot: &Mutex<LoopHandle>, name: &str) {
        let (stop_tx, task) = {
            let mut handle = slot.lock().unwrap();
            if handle.state != LoopState::Running {
                return;
            }
            handle.state = LoopState::Stopping;
            (handle.stop_tx.take(), handle.task.take())
        };

        if let Some(tx) = stop_tx {
            let _ = tx.send(true);
        }

        if let Some(task) = task {
            match tokio::time::timeout(self.join_timeout, task).await {
                Ok(Ok(())) => tracing::info!(loop_name = name, "loop stopped"),
                Ok(Err(e)) => tracing::error!(loop_name = name, error = %e, "loop task panicked"),
                Err(_) => {
                    tracing::warn!(loop_name = name, "loop did not stop in time, abandoning")
                }
            }
        }

        slot.lock().unwrap().state = LoopState::Stopped;
    }

    pub fn scan_state(&self) -> LoopState {
        self.scan_loop.lock().unwrap().state
    }

    pub fn ingest_state(&self) -> LoopState {
        self.ingest_loop.lock().unwrap().state
    }
}

async fn scan_loop(ctx: SchedulerContext, mut stop_rx: watch::Receiver<bool>) {
    // Vendor table state lives with the loop; reloaded when the configured
    // path changes
    let mut oui: Option<OuiLookup> = None;

    loop {
        let settings = Settings::load(&*ctx.store);

        match run_scan_tick(&ctx, &settings, &mut oui).await {
            Ok(Some(run)) => tracing::info!(
                targets = run.targets_count,
                up = run.up_count,
                down = run.down_count,
                "scan tick complete"
            ),
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "scan tick failed"),
        }

        let interval = Duration::from_secs(settings.scan_interval_seconds.max(1));
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            res = stop_rx.changed() => {
                // A dropped sender also means stop
                if res.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}

async fn ingest_loop(ctx: SchedulerContext, mut stop_rx: watch::Receiver<bool>) {
    loop {
        // Re-read settings every tick so enabling ingestion at runtime takes
        // effect without a restart
        let settings = Settings::load(&*ctx.store);

        if settings.adguard_enabled {
            if let Err(e) = run_ingest_tick(&ctx, &settings).await {
                tracing::error!(error = %e, "ingest tick failed");
            }
        }

        let interval = Duration::from_secs(settings.adguard_ingest_interval_seconds.max(1));
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            res = stop_rx.changed() => {
                if res.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// One scan pass: probe, persist, classify, notify.
///
/// Returns the recorded run, or `None` when the target specification
/// resolves to nothing (in which case no ScanRun is created).
pub async fn run_scan_tick(
    ctx: &SchedulerContext,
    settings: &Settings,
    oui: &mut Option<OuiLookup>,
) -> Result<Option<ScanRun>> {
    let targets = resolve_targets(&ctx.targets_spec, settings.target_cap);
    if targets.is_empty() {
        tracing::warn!(spec = %ctx.targets_spec, "target specification resolves to nothing, skipping tick");
        return Ok(None);
    }

    let started_ts = Utc::now().timestamp();
    let prober = HostProber::from_settings(settings);
    let results = prober.scan(&targets, &*ctx.neighbors).await;
    let finished_ts = Utc::now().timestamp();

    let up_count = results.iter().filter(|r| r.is_up()).count();
    let run = ScanRun {
        id: 0,
        started_ts,
        finished_ts,
        targets_count: targets.len(),
        up_count,
        down_count: results.len() - up_count,
    };
    let run_id = ctx.store.create_scan_run(&run)?;

    let known: HashMap<IpAddr, HostRecord> = ctx
        .store
        .get_all_hosts()?
        .into_iter()
        .map(|h| (h.ip, h))
        .collect();

    for result in &results {
        ctx.store.insert_observation(run_id, result)?;

        let previous = known.get(&result.ip);
        let event = detector::classify(result, previous);

        let vendor = match &result.mac {
            Some(mac) if settings.oui_lookup_enabled => {
                lookup_vendor(oui, settings, mac)
            }
            _ => None,
        };

        let record = detector::merge(previous, result, vendor, finished_ts);
        ctx.store.upsert_host(&record)?;

        if let Some(event) = event {
            let profile = ctx.store.get_device_profile(result.mac.as_deref(), result.ip)?;
            let event = event
                .with_vendor(record.vendor.clone())
                .with_profile(profile.as_ref());
            ctx.dispatcher.dispatch(&event, settings).await;
        }
    }

    Ok(Some(ScanRun { id: run_id, ..run }))
}

/// Resolve a vendor name through the OUI table, loading or reloading it
/// when the configured path changed
fn lookup_vendor(oui: &mut Option<OuiLookup>, settings: &Settings, mac: &str) -> Option<String> {
    if settings.oui_file_path.is_empty() {
        return None;
    }

    let stale = oui
        .as_ref()
        .map(|l| l.file_path() != std::path::Path::new(&settings.oui_file_path))
        .unwrap_or(true);
    if stale {
        match OuiLookup::load(&settings.oui_file_path) {
            Ok(table) => *oui = Some(table),
            Err(e) => {
                tracing::warn!(error = %e, path = %settings.oui_file_path, "OUI table load failed");
                return None;
            }
        }
    }

    oui.as_ref().and_then(|l| l.lookup(mac)).map(String::from)
}

/// One ingestion pass: pull new DNS events, advance the cursor, then run
/// burst detection over the fresh window
pub async fn run_ingest_tick(ctx: &SchedulerContext, settings: &Settings) -> Result<()> {
    let mut cursor = ctx.store.get_dns_cursor()?;

    let events = match settings.adguard_mode {
        IngestMode::Api => {
            let client = AdguardClient::from_settings(settings)?;
            let since = (cursor.last_seen_ts > 0).then_some(cursor.last_seen_ts);
            let events = client.fetch(since).await?;
            if let Some(max_ts) = events.iter().map(|e| e.ts).max() {
                cursor.last_seen_ts = cursor.last_seen_ts.max(max_ts);
            }
            events
        }
        IngestMode::File => {
            let path = std::path::Path::new(&settings.adguard_querylog_path);
            let (events, new_offset) =
                ingest::read_querylog_file(path, cursor.last_offset).await?;
            cursor.last_offset = new_offset;
            events
        }
    };

    if !events.is_empty() {
        for event in &events {
            ctx.store.insert_dns_event(event)?;
        }
        tracing::debug!(count = events.len(), "DNS events ingested");
    }
    ctx.store.set_dns_cursor(cursor)?;

    for burst in ingest::detect_dns_bursts(&*ctx.store)? {
        ctx.dispatcher.dispatch(&burst, settings).await;
    }

    Ok(())
}

/// Aggregate presence statistics for operator surfaces
pub fn get_scan_stats(store: &dyn Store, settings: &Settings) -> Result<ScanStats> {
    let cutoff = Utc::now().timestamp() - (settings.missing_threshold_minutes * 60) as i64;

    Ok(ScanStats {
        up_count: store.count_hosts_with_status(HostStatus::Up)?,
        down_count: store.count_hosts_with_status(HostStatus::Down)?,
        total_hosts: store.count_hosts()?,
        last_scan_ts: store.last_scan_finished()?,
        missing_count: store.count_missing_since(cutoff)?,
    })
}
