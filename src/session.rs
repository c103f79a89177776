/// Analysis session: the orchestrator between fetch glue and presentation.
///
/// The session owns every piece of per-run state: the selected stations,
/// the parameter on display, each station's series and its latest
/// `StationAnalysis`. Presentation code receives snapshots by reference
/// (or through an `AnalysisListener`) rather than reading shared globals.
///
/// # Concurrency
/// Each station has its own `Mutex`. An ingest merges the batch, recomputes
/// the analysis and publishes it while holding that lock, so nothing ever
/// observes a half-merged series. Different stations never share a lock
/// after the registry lookup, so their ingests run in parallel.
///
/// Deselecting a station (or switching parameter) is done under the same
/// station lock; an ingest that loses that race sees the change and
/// discards its batch.
///
/// The registry lock is never held while waiting for a station lock. A
/// parameter switch bumps the registry generation first and then resets
/// each station; any path that reaches a station still on an older
/// generation resets it on the spot.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::analysis::station::StationAnalysis;
use crate::config::Config;
use crate::ingest::usgs::IvSeries;
use crate::logging::{self, DataSource};
use crate::model::{PARAM_DISCHARGE, RawReading, SessionError};
use crate::series::{DuplicatePolicy, Series, merge_with_policy};
use crate::stations::{DEFAULT_MAX_STATIONS, is_valid_station_id, normalize_station_id};

/// Receives every snapshot the session produces.
///
/// `publish` runs while the station's lock is held, so snapshots for one
/// station arrive in order. Implementations may read the session (station
/// list, parameter, other stations' snapshots) but must not call back into
/// it for the same station.
pub trait AnalysisListener: Send + Sync {
    fn publish(&self, analysis: &Arc<StationAnalysis>);
}

struct StationContext {
    /// Cleared on removal; ingests that find it cleared discard their batch.
    active: bool,
    /// Registry generation this context's parameter belongs to.
    generation: u64,
    parameter: String,
    site_name: Option<String>,
    series: Series,
    analysis: Option<Arc<StationAnalysis>>,
}

impl StationContext {
    fn new(parameter: &str, generation: u64) -> Self {
        StationContext {
            active: true,
            generation,
            parameter: parameter.to_string(),
            site_name: None,
            series: Series::new(),
            analysis: None,
        }
    }

    /// Moves the context to a newer parameter generation, clearing its
    /// series. Older generations are ignored.
    fn catch_up(&mut self, parameter: &str, generation: u64) {
        if self.generation >= generation {
            return;
        }
        self.generation = generation;
        self.parameter = parameter.to_string();
        self.series = Series::new();
        self.analysis = None;
    }
}

type SharedContext = Arc<Mutex<StationContext>>;

struct Registry {
    parameter: String,
    /// Bumped on every parameter switch.
    generation: u64,
    /// Selection order, which is also the order of `analyses()`.
    order: Vec<String>,
    contexts: HashMap<String, SharedContext>,
}

pub struct AnalysisSession {
    registry: RwLock<Registry>,
    max_stations: usize,
    stale_after_minutes: u64,
    duplicate_policy: DuplicatePolicy,
    listener: RwLock<Option<Arc<dyn AnalysisListener>>>,
}

// Lock helpers: a panic while a lock is held (only possible through the
// series invariant assertion, before any state is written) must not take
// the whole session down with poisoned locks.
fn lock(ctx: &Mutex<StationContext>) -> MutexGuard<'_, StationContext> {
    ctx.lock().unwrap_or_else(|e| e.into_inner())
}

/// Registry state copied out under the read lock, so station locks are
/// taken after it is released.
struct Snapshot {
    parameter: String,
    generation: u64,
    contexts: Vec<(String, SharedContext)>,
}

impl Snapshot {
    /// Locks a station context, bringing it up to the snapshot's generation.
    fn lock<'a>(&self, ctx: &'a Mutex<StationContext>) -> MutexGuard<'a, StationContext> {
        let mut guard = lock(ctx);
        guard.catch_up(&self.parameter, self.generation);
        guard
    }
}

impl AnalysisSession {
    pub fn new(parameter: &str) -> Self {
        AnalysisSession {
            registry: RwLock::new(Registry {
                parameter: parameter.to_string(),
                generation: 0,
                order: Vec::new(),
                contexts: HashMap::new(),
            }),
            max_stations: DEFAULT_MAX_STATIONS,
            stale_after_minutes: 60,
            duplicate_policy: DuplicatePolicy::default(),
            listener: RwLock::new(None),
        }
    }

    /// Session showing discharge with limits taken from `config`.
    pub fn from_config(config: &Config) -> Self {
        AnalysisSession::new(PARAM_DISCHARGE)
            .with_max_stations(config.session.max_stations)
            .with_stale_after_minutes(config.session.stale_after_minutes)
            .with_duplicate_policy(config.series.duplicate_policy)
    }

    pub fn with_max_stations(mut self, max_stations: usize) -> Self {
        self.max_stations = max_stations;
        self
    }

    pub fn with_stale_after_minutes(mut self, minutes: u64) -> Self {
        self.stale_after_minutes = minutes;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn set_listener(&self, listener: Arc<dyn AnalysisListener>) {
        *self.listener.write().unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Copies the selected stations (all, or just `only`) in selection order.
    fn snapshot(&self, only: Option<&str>) -> Snapshot {
        let registry = self.read();
        let contexts = registry
            .order
            .iter()
            .filter(|id| only.is_none_or(|only| only == id.as_str()))
            .filter_map(|id| {
                let ctx = registry.contexts.get(id)?;
                Some((id.clone(), Arc::clone(ctx)))
            })
            .collect();
        Snapshot {
            parameter: registry.parameter.clone(),
            generation: registry.generation,
            contexts,
        }
    }

    // -----------------------------------------------------------------------
    // Station selection
    // -----------------------------------------------------------------------

    /// Selects a station. Surrounding whitespace is ignored.
    pub fn add_station(&self, raw_id: &str) -> Result<(), SessionError> {
        let id = normalize_station_id(raw_id);
        if !is_valid_station_id(id) {
            return Err(SessionError::InvalidStationId(id.to_string()));
        }

        let mut registry = self.write();
        if registry.contexts.contains_key(id) {
            return Err(SessionError::DuplicateStation(id.to_string()));
        }
        if registry.order.len() >= self.max_stations {
            return Err(SessionError::TooManyStations {
                max: self.max_stations,
            });
        }

        let ctx = StationContext::new(&registry.parameter, registry.generation);
        registry.order.push(id.to_string());
        registry
            .contexts
            .insert(id.to_string(), Arc::new(Mutex::new(ctx)));
        logging::info(DataSource::Session, Some(id), "Station added");
        Ok(())
    }

    /// Deselects a station and drops its series and analysis. Returns
    /// `false` if it was not selected.
    pub fn remove_station(&self, id: &str) -> bool {
        let mut registry = self.write();
        let Some(ctx) = registry.contexts.remove(id) else {
            return false;
        };
        registry.order.retain(|s| s != id);
        drop(registry);

        let mut ctx = lock(&ctx);
        ctx.active = false;
        ctx.series = Series::new();
        ctx.analysis = None;
        logging::info(DataSource::Session, Some(id), "Station removed");
        true
    }

    pub fn station_ids(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn parameter(&self) -> String {
        self.read().parameter.clone()
    }

    /// Switches the parameter on display. Every station's series and
    /// analysis are cleared; batches still in flight for the old parameter
    /// will be rejected.
    pub fn select_parameter(&self, parameter: &str) {
        let snapshot = {
            let mut registry = self.write();
            if registry.parameter == parameter {
                return;
            }
            registry.parameter = parameter.to_string();
            registry.generation += 1;
            Snapshot {
                parameter: registry.parameter.clone(),
                generation: registry.generation,
                contexts: registry
                    .contexts
                    .iter()
                    .map(|(id, ctx)| (id.clone(), Arc::clone(ctx)))
                    .collect(),
            }
        };

        for (_, ctx) in &snapshot.contexts {
            drop(snapshot.lock(ctx));
        }
        logging::info(
            DataSource::Session,
            None,
            &format!("Parameter changed to {}", parameter),
        );
    }

    // -----------------------------------------------------------------------
    // Ingest
    // -----------------------------------------------------------------------

    /// Merges a batch into the station's series, recomputes its analysis
    /// and publishes the new snapshot, as one step with respect to other
    /// updates of the same station.
    ///
    /// An empty batch still republishes (the analysis is unchanged).
    pub fn ingest(
        &self,
        station_id: &str,
        parameter: &str,
        readings: &[RawReading],
    ) -> Result<Arc<StationAnalysis>, SessionError> {
        self.ingest_with_site(station_id, parameter, None, readings)
    }

    /// `ingest` for a parsed IV series, also recording the site name.
    pub fn ingest_iv(
        &self,
        station_id: &str,
        parameter: &str,
        series: &IvSeries,
    ) -> Result<Arc<StationAnalysis>, SessionError> {
        self.ingest_with_site(
            station_id,
            parameter,
            Some(series.site_name.as_str()),
            &series.readings,
        )
    }

    fn ingest_with_site(
        &self,
        station_id: &str,
        parameter: &str,
        site_name: Option<&str>,
        readings: &[RawReading],
    ) -> Result<Arc<StationAnalysis>, SessionError> {
        let snapshot = self.snapshot(Some(station_id));
        let Some((_, shared)) = snapshot.contexts.first() else {
            return Err(SessionError::StationNotActive(station_id.to_string()));
        };

        let mut ctx = snapshot.lock(shared);
        if !ctx.active {
            logging::debug(
                DataSource::Session,
                Some(station_id),
                "Discarding batch for deselected station",
            );
            return Err(SessionError::StationNotActive(station_id.to_string()));
        }
        if ctx.parameter != parameter {
            logging::debug(
                DataSource::Session,
                Some(station_id),
                &format!("Discarding stale batch for parameter {}", parameter),
            );
            return Err(SessionError::ParameterMismatch {
                expected: ctx.parameter.clone(),
                received: parameter.to_string(),
            });
        }

        let merged = merge_with_policy(&ctx.series, readings, self.duplicate_policy);
        let added = merged.len() - ctx.series.len();
        let dropped = readings.len().saturating_sub(added);
        if dropped > 0 {
            logging::debug(
                DataSource::Session,
                Some(station_id),
                &format!(
                    "{} of {} readings were invalid or already present",
                    dropped,
                    readings.len()
                ),
            );
        }

        if let Some(name) = site_name {
            ctx.site_name = Some(name.to_string());
        }
        let analysis = Arc::new(StationAnalysis::compute(
            station_id,
            ctx.site_name.as_deref(),
            &ctx.parameter,
            merged.clone(),
        ));
        ctx.series = merged;
        ctx.analysis = Some(Arc::clone(&analysis));

        let listener = self
            .listener
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(listener) = listener {
            listener.publish(&analysis);
        }

        Ok(analysis)
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Latest snapshot for a station, if it has been analyzed.
    pub fn analysis(&self, station_id: &str) -> Option<Arc<StationAnalysis>> {
        let snapshot = self.snapshot(Some(station_id));
        let (_, ctx) = snapshot.contexts.first()?;
        snapshot.lock(ctx).analysis.clone()
    }

    /// Latest snapshots for all analyzed stations, in selection order.
    pub fn analyses(&self) -> Vec<Arc<StationAnalysis>> {
        let snapshot = self.snapshot(None);
        snapshot
            .contexts
            .iter()
            .filter_map(|(_, ctx)| snapshot.lock(ctx).analysis.clone())
            .collect()
    }

    /// Selected stations whose newest sample is older than the configured
    /// freshness window (or that have no samples yet).
    pub fn stale_stations_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let snapshot = self.snapshot(None);
        snapshot
            .contexts
            .iter()
            .filter(|(_, ctx)| {
                snapshot
                    .lock(ctx)
                    .analysis
                    .as_ref()
                    .is_none_or(|a| a.is_stale_at(self.stale_after_minutes, now))
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PARAM_STAGE, TrendDirection};
    use chrono::{Duration, TimeZone};
    use std::sync::{OnceLock, Weak, mpsc};
    use std::time::Duration as StdDuration;

    const KINGSTON: &str = "05568500";
    const PEORIA: &str = "05567500";

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn batch(points: &[(i64, f64)]) -> Vec<RawReading> {
        points.iter().map(|&(m, v)| RawReading::at(t(m), v)).collect()
    }

    struct Recorder(Mutex<Vec<(String, usize)>>);

    impl AnalysisListener for Recorder {
        fn publish(&self, analysis: &Arc<StationAnalysis>) {
            self.0
                .lock()
                .unwrap()
                .push((analysis.station_id.clone(), analysis.series.len()));
        }
    }

    // --- Selection ----------------------------------------------------------

    #[test]
    fn test_add_station_validates_and_limits() {
        let session = AnalysisSession::new(PARAM_DISCHARGE).with_max_stations(2);

        assert_eq!(
            session.add_station("123"),
            Err(SessionError::InvalidStationId("123".into()))
        );
        assert_eq!(session.add_station(" 05568500 "), Ok(()));
        assert_eq!(
            session.add_station(KINGSTON),
            Err(SessionError::DuplicateStation(KINGSTON.into()))
        );
        assert_eq!(session.add_station(PEORIA), Ok(()));
        assert_eq!(
            session.add_station("05568000"),
            Err(SessionError::TooManyStations { max: 2 })
        );
        assert_eq!(session.station_ids(), vec![KINGSTON, PEORIA]);
    }

    #[test]
    fn test_remove_unknown_station_returns_false() {
        let session = AnalysisSession::new(PARAM_DISCHARGE);
        assert!(!session.remove_station(KINGSTON));
    }

    // --- Ingest -------------------------------------------------------------

    #[test]
    fn test_ingest_merges_pages_and_recomputes() {
        let session = AnalysisSession::new(PARAM_DISCHARGE);
        session.add_station(KINGSTON).unwrap();

        let first = session
            .ingest(KINGSTON, PARAM_DISCHARGE, &batch(&[(0, 10.0), (15, 10.5), (30, 11.0)]))
            .unwrap();
        assert!(first.alerts.is_empty());
        assert_eq!(first.trend.map(|tr| tr.direction), Ok(TrendDirection::Up));

        // Paging in a later range that contains a surge.
        let second = session
            .ingest(KINGSTON, PARAM_DISCHARGE, &batch(&[(45, 30.0), (30, 99.0)]))
            .unwrap();
        assert_eq!(second.series.len(), 4);
        assert_eq!(second.alerts.len(), 3);
        assert_eq!(session.analysis(KINGSTON), Some(second));
    }

    #[test]
    fn test_ingest_for_unselected_station_is_rejected() {
        let session = AnalysisSession::new(PARAM_DISCHARGE);
        assert_eq!(
            session.ingest(KINGSTON, PARAM_DISCHARGE, &batch(&[(0, 1.0)])),
            Err(SessionError::StationNotActive(KINGSTON.into()))
        );
    }

    #[test]
    fn test_removed_station_discards_pending_batches() {
        let session = AnalysisSession::new(PARAM_DISCHARGE);
        session.add_station(KINGSTON).unwrap();
        session
            .ingest(KINGSTON, PARAM_DISCHARGE, &batch(&[(0, 1.0)]))
            .unwrap();

        assert!(session.remove_station(KINGSTON));
        assert!(session.analysis(KINGSTON).is_none());
        assert!(
            session
                .ingest(KINGSTON, PARAM_DISCHARGE, &batch(&[(15, 2.0)]))
                .is_err()
        );

        // Re-adding starts from an empty series.
        session.add_station(KINGSTON).unwrap();
        let fresh = session
            .ingest(KINGSTON, PARAM_DISCHARGE, &batch(&[(30, 3.0)]))
            .unwrap();
        assert_eq!(fresh.series.len(), 1);
    }

    #[test]
    fn test_parameter_switch_resets_and_rejects_stale_batches() {
        let session = AnalysisSession::new(PARAM_DISCHARGE);
        session.add_station(KINGSTON).unwrap();
        session
            .ingest(KINGSTON, PARAM_DISCHARGE, &batch(&[(0, 1.0), (15, 2.0)]))
            .unwrap();

        session.select_parameter(PARAM_STAGE);
        assert_eq!(session.parameter(), PARAM_STAGE);
        assert!(session.analysis(KINGSTON).is_none());
        assert_eq!(
            session.ingest(KINGSTON, PARAM_DISCHARGE, &batch(&[(30, 3.0)])),
            Err(SessionError::ParameterMismatch {
                expected: PARAM_STAGE.into(),
                received: PARAM_DISCHARGE.into(),
            })
        );

        let stage = session
            .ingest(KINGSTON, PARAM_STAGE, &batch(&[(0, 14.2)]))
            .unwrap();
        assert_eq!(stage.series.len(), 1);
        assert_eq!(stage.parameter.display_name, "Gage Height");
    }

    #[test]
    fn test_analyses_follow_selection_order() {
        let session = AnalysisSession::new(PARAM_DISCHARGE);
        session.add_station(PEORIA).unwrap();
        session.add_station(KINGSTON).unwrap();
        session.ingest(KINGSTON, PARAM_DISCHARGE, &batch(&[(0, 1.0)])).unwrap();
        session.ingest(PEORIA, PARAM_DISCHARGE, &batch(&[(0, 1.0)])).unwrap();

        let ids: Vec<_> = session.analyses().iter().map(|a| a.station_id.clone()).collect();
        assert_eq!(ids, vec![PEORIA, KINGSTON]);
    }

    #[test]
    fn test_listener_receives_every_snapshot() {
        let session = AnalysisSession::new(PARAM_DISCHARGE);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        session.set_listener(recorder.clone());
        session.add_station(KINGSTON).unwrap();

        session.ingest(KINGSTON, PARAM_DISCHARGE, &batch(&[(0, 1.0)])).unwrap();
        session.ingest(KINGSTON, PARAM_DISCHARGE, &[]).unwrap();
        session.ingest(KINGSTON, PARAM_DISCHARGE, &batch(&[(15, 2.0)])).unwrap();

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![(KINGSTON.to_string(), 1), (KINGSTON.to_string(), 1), (KINGSTON.to_string(), 2)]
        );
    }

    // --- Concurrency --------------------------------------------------------

    #[test]
    fn test_concurrent_ingests_into_one_station_are_serialized() {
        let session = AnalysisSession::new(PARAM_DISCHARGE);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        session.set_listener(recorder.clone());
        session.add_station(KINGSTON).unwrap();
        session.add_station(PEORIA).unwrap();

        std::thread::scope(|scope| {
            for worker in 0..8i64 {
                let session = &session;
                scope.spawn(move || {
                    for page in 0..10i64 {
                        let minute = (worker * 10 + page) * 15;
                        for station in [KINGSTON, PEORIA] {
                            session
                                .ingest(station, PARAM_DISCHARGE, &batch(&[(minute, 5.0)]))
                                .unwrap();
                        }
                    }
                });
            }
        });

        for station in [KINGSTON, PEORIA] {
            let analysis = session.analysis(station).unwrap();
            assert_eq!(analysis.series.len(), 80);
            assert!(analysis.series.is_strictly_increasing());

            // Every publish for a station saw exactly one more sample than the last.
            let lens: Vec<_> = recorder
                .0
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| id == station)
                .map(|(_, n)| *n)
                .collect();
            assert_eq!(lens, (1..=80).collect::<Vec<_>>());
        }
    }

    /// Reads the station list from inside `publish`, after signalling that
    /// it has entered.
    struct RegistryReader {
        session: OnceLock<Weak<AnalysisSession>>,
        entered: mpsc::SyncSender<()>,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl AnalysisListener for RegistryReader {
        fn publish(&self, _analysis: &Arc<StationAnalysis>) {
            let _ = self.entered.send(());
            std::thread::sleep(StdDuration::from_millis(100));
            if let Some(session) = self.session.get().and_then(Weak::upgrade) {
                self.seen.lock().unwrap().push(session.station_ids());
            }
        }
    }

    #[test]
    fn test_listener_reading_registry_during_parameter_switch_completes() {
        let session = Arc::new(AnalysisSession::new(PARAM_DISCHARGE));
        let (entered_tx, entered_rx) = mpsc::sync_channel(1);
        let reader = Arc::new(RegistryReader {
            session: OnceLock::new(),
            entered: entered_tx,
            seen: Mutex::new(Vec::new()),
        });
        let _ = reader.session.set(Arc::downgrade(&session));
        session.set_listener(reader.clone());
        session.add_station(KINGSTON).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        {
            let session = Arc::clone(&session);
            let done = done_tx.clone();
            std::thread::spawn(move || {
                let result = session.ingest(KINGSTON, PARAM_DISCHARGE, &batch(&[(0, 1.0)]));
                let _ = done.send(("ingest", result.is_ok()));
            });
        }

        // Switch while the listener is still inside publish.
        entered_rx
            .recv_timeout(StdDuration::from_secs(5))
            .expect("listener was called");
        {
            let session = Arc::clone(&session);
            std::thread::spawn(move || {
                session.select_parameter(PARAM_STAGE);
                let _ = done_tx.send(("switch", true));
            });
        }

        for _ in 0..2 {
            let (step, ok) = done_rx
                .recv_timeout(StdDuration::from_secs(5))
                .expect("ingest and parameter switch both finish");
            assert!(ok, "{} failed", step);
        }
        assert_eq!(*reader.seen.lock().unwrap(), vec![vec![KINGSTON.to_string()]]);
        assert_eq!(session.parameter(), PARAM_STAGE);
        assert!(session.analysis(KINGSTON).is_none());
    }

    #[test]
    fn test_station_added_after_switch_uses_new_parameter() {
        let session = AnalysisSession::new(PARAM_DISCHARGE);
        session.add_station(KINGSTON).unwrap();
        session.select_parameter(PARAM_STAGE);
        session.select_parameter(PARAM_DISCHARGE);
        session.add_station(PEORIA).unwrap();

        for station in [KINGSTON, PEORIA] {
            assert!(session.ingest(station, PARAM_DISCHARGE, &batch(&[(0, 1.0)])).is_ok());
            assert!(session.ingest(station, PARAM_STAGE, &batch(&[(15, 1.0)])).is_err());
        }
    }

    // --- Freshness ----------------------------------------------------------

    #[test]
    fn test_stale_stations() {
        let session = AnalysisSession::new(PARAM_DISCHARGE).with_stale_after_minutes(30);
        session.add_station(KINGSTON).unwrap();
        session.add_station(PEORIA).unwrap();
        session.ingest(KINGSTON, PARAM_DISCHARGE, &batch(&[(0, 1.0)])).unwrap();

        // Peoria has no samples at all.
        assert_eq!(session.stale_stations_at(t(30)), vec![PEORIA.to_string()]);
        assert_eq!(
            session.stale_stations_at(t(31)),
            vec![KINGSTON.to_string(), PEORIA.to_string()]
        );
    }
}
