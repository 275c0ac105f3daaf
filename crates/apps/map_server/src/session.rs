//! One live map per renderer connection.
//!
//! A `MapSession` owns the active filter, the center coordinate and the
//! per-source state, recomputes the full point set whenever any of them
//! changes, and hands each result to its `RenderChannel`. All of it runs on a
//! single task; sampling batches and report snapshots arrive as events.

use std::sync::Arc;

use foundation::LatLng;
use layers::aggregate;
use streaming::{Channel, Filter, HostCommand, Point, Publish, RenderChannel};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::reports::{ReportSnapshot, ReportStore, ReportSubscription};
use crate::sampler::AqiGridSampler;

/// Shared sources every session reads from.
#[derive(Clone)]
pub struct SessionDeps {
    pub catalog: Arc<Vec<Point>>,
    pub reports: Arc<ReportStore>,
    pub sampler: Arc<AqiGridSampler>,
    pub default_center: LatLng,
}

#[derive(Debug)]
struct Sampled {
    generation: u64,
    points: Vec<Point>,
}

pub struct MapSession<C> {
    id: String,
    deps: SessionDeps,
    channel: RenderChannel<C>,
    filter: Filter,
    center: Option<LatLng>,
    /// Host-supplied points that replace the live sources when present.
    override_points: Option<Vec<Point>>,
    reports: ReportSnapshot,
    subscription: Option<ReportSubscription>,
    aqi_samples: Vec<Point>,
    /// Bumped on every sampling dispatch; results from older batches are dropped.
    generation: u64,
    sampling: Option<JoinHandle<()>>,
    sampled_tx: mpsc::UnboundedSender<Sampled>,
    sampled_rx: mpsc::UnboundedReceiver<Sampled>,
}

impl<C: Channel> MapSession<C> {
    pub fn new(deps: SessionDeps, transport: C, filter: Filter) -> Self {
        let (sampled_tx, sampled_rx) = mpsc::unbounded_channel();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            deps,
            channel: RenderChannel::new(transport),
            filter,
            center: None,
            override_points: None,
            reports: Ok(Arc::from(Vec::new())),
            subscription: None,
            aqi_samples: Vec::new(),
            generation: 0,
            sampling: None,
            sampled_tx,
            sampled_rx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The renderer instance exists and is loading its map.
    pub fn attach(&mut self) {
        self.channel.begin_loading();
        self.sync_sources();
        self.refresh();
    }

    pub fn handle_command(&mut self, cmd: HostCommand) {
        match cmd {
            HostCommand::RendererReady => match self.channel.mark_ready() {
                Ok(flushed) => info!("session {} renderer ready (flushed={flushed})", self.id),
                Err(e) => warn!("session {} failed to flush snapshot: {e}", self.id),
            },
            HostCommand::SetFilter { filter } => self.set_filter(filter),
            HostCommand::Location { lat, lng } => match LatLng::try_new(lat, lng) {
                Ok(center) => self.set_center(center),
                Err(e) => {
                    warn!("session {} got unusable location ({e}), using default", self.id);
                    self.set_center(self.deps.default_center);
                }
            },
            HostCommand::LocationDenied => {
                info!("session {} location denied, using default center", self.id);
                self.set_center(self.deps.default_center);
            }
            HostCommand::Override {
                initial_filter,
                initial_points,
            } => {
                info!(
                    "session {} showing {} supplied {} points",
                    self.id,
                    initial_points.len(),
                    initial_filter.as_str()
                );
                self.override_points = Some(initial_points);
                self.filter = initial_filter;
                self.sync_sources();
                self.refresh();
            }
        }
    }

    fn set_filter(&mut self, filter: Filter) {
        if filter == self.filter {
            debug!("session {} filter unchanged ({})", self.id, filter.as_str());
            return;
        }
        debug!(
            "session {} filter {} -> {}",
            self.id,
            self.filter.as_str(),
            filter.as_str()
        );
        self.filter = filter;
        self.sync_sources();
        self.refresh();
    }

    /// Only AQI output depends on the center, and it is republished when the
    /// new batch lands. Samples for an old center are dropped otherwise.
    fn set_center(&mut self, center: LatLng) {
        self.center = Some(center);
        if self.samples_aqi() {
            self.start_sampling(center);
        } else {
            self.aqi_samples.clear();
        }
    }

    fn wants_reports(&self) -> bool {
        self.override_points.is_none() && !self.filter.is_aqi()
    }

    fn samples_aqi(&self) -> bool {
        self.override_points.is_none() && self.filter.is_aqi()
    }

    /// Hold the report subscription only while reports feed the map, and
    /// kick off sampling when entering AQI mode with a known center.
    fn sync_sources(&mut self) {
        if self.wants_reports() {
            if self.subscription.is_none() {
                let mut sub = self.deps.reports.subscribe();
                self.reports = sub.current();
                self.subscription = Some(sub);
                debug!("session {} subscribed to reports", self.id);
            }
        } else if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
            self.reports = Ok(Arc::from(Vec::new()));
            debug!("session {} released report subscription", self.id);
        }

        if self.samples_aqi() {
            if let Some(center) = self.center {
                self.start_sampling(center);
            }
        } else {
            self.cancel_sampling();
        }
    }

    fn start_sampling(&mut self, center: LatLng) {
        self.cancel_sampling();
        self.generation += 1;
        let generation = self.generation;
        let sampler = self.deps.sampler.clone();
        let tx = self.sampled_tx.clone();
        debug!(
            "session {} sampling generation {generation} at ({:.4}, {:.4})",
            self.id, center.lat, center.lng
        );
        self.sampling = Some(tokio::spawn(async move {
            let points = sampler.sample(center).await;
            let _ = tx.send(Sampled { generation, points });
        }));
    }

    /// Stop waiting on the in-flight batch. Its generation is already stale
    /// or about to be, so a late result would be dropped anyway.
    fn cancel_sampling(&mut self) {
        if let Some(handle) = self.sampling.take() {
            handle.abort();
        }
    }

    fn on_sampled(&mut self, sampled: Sampled) {
        if sampled.generation != self.generation || !self.samples_aqi() {
            debug!(
                "session {} dropping stale AQI batch (generation {} vs {})",
                self.id, sampled.generation, self.generation
            );
            return;
        }
        self.sampling = None;
        self.aqi_samples = sampled.points;
        self.refresh();
    }

    fn on_reports(&mut self, snapshot: ReportSnapshot) {
        if !self.wants_reports() {
            return;
        }
        self.reports = snapshot;
        self.refresh();
    }

    fn refresh(&mut self) {
        let none: &[Point] = &[];
        let points = match &self.override_points {
            Some(supplied) if self.filter.is_aqi() => {
                let samples: Vec<Point> = supplied
                    .iter()
                    .filter(|p| self.filter.matches(p.category))
                    .cloned()
                    .collect();
                aggregate::<String>(self.filter, none, Ok(none), &samples)
            }
            Some(supplied) => aggregate::<String>(self.filter, supplied, Ok(none), none),
            None => aggregate(
                self.filter,
                &self.deps.catalog,
                self.reports.as_ref().map(|p| &p[..]),
                &self.aqi_samples,
            ),
        };

        let count = points.len();
        match self.channel.publish(points, self.filter) {
            Ok(Publish::Sent) => debug!("session {} sent {count} points", self.id),
            Ok(Publish::Buffered) => debug!("session {} buffered {count} points", self.id),
            Err(e) => warn!("session {} failed to send markers: {e}", self.id),
        }
    }
}

impl<C: Channel + Send + 'static> MapSession<C> {
    /// Drive the session until the command stream closes.
    pub async fn run(mut self, mut commands: mpsc::Receiver<HostCommand>) {
        self.attach();
        info!("map session {} started ({})", self.id, self.filter.as_str());

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(sampled) = self.sampled_rx.recv() => self.on_sampled(sampled),
                snapshot = next_snapshot(&mut self.subscription) => match snapshot {
                    Some(snapshot) => self.on_reports(snapshot),
                    None => {
                        warn!("session {} report stream ended", self.id);
                        self.subscription = None;
                    }
                },
            }
        }

        self.cancel_sampling();
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        info!("map session {} closed", self.id);
    }
}

async fn next_snapshot(sub: &mut Option<ReportSubscription>) -> Option<ReportSnapshot> {
    match sub {
        Some(sub) => sub.changed().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aqi::{AirSample, AqiError, AqiProvider, BoxFuture};
    use crate::reports::Report;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::time::Duration;
    use streaming::{Category, ChannelError, MapMessage};
    use tempfile::TempDir;

    const DEFAULT_CENTER: LatLng = LatLng::new(21.0285, 105.8542);

    /// Answers every call; requests north of `slow_above_lat` take longer.
    struct FixedProvider {
        slow_above_lat: f64,
    }

    impl AqiProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn fetch_aqi(&self, at: LatLng) -> BoxFuture<'_, Result<AirSample, AqiError>> {
            let delay = if at.lat > self.slow_above_lat { 5 } else { 1 };
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(delay)).await;
                Ok(AirSample {
                    pm2_5: 15.0,
                    pm10: None,
                })
            })
        }
    }

    struct TestTransport(mpsc::UnboundedSender<MapMessage>);

    impl Channel for TestTransport {
        fn send(&mut self, message: &MapMessage) -> Result<(), ChannelError> {
            self.0.send(message.clone()).map_err(|_| ChannelError::Closed)
        }
    }

    struct Harness {
        commands: mpsc::Sender<HostCommand>,
        out: mpsc::UnboundedReceiver<MapMessage>,
        store: Arc<ReportStore>,
        reports_path: PathBuf,
        _dir: TempDir,
    }

    fn catalog() -> Vec<Point> {
        vec![
            Point::marker("glass-1", LatLng::new(21.02, 105.84), Category::Glass, "Bottle bank"),
            Point::marker("paper-1", LatLng::new(21.03, 105.81), Category::Paper, "Paper bank"),
        ]
    }

    async fn deps_with(reports_file: Option<&str>) -> (SessionDeps, PathBuf, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.json");
        if let Some(text) = reports_file {
            std::fs::write(&path, text).unwrap();
        }
        let store = Arc::new(ReportStore::open(path.clone()).await);
        let provider = Arc::new(FixedProvider {
            slow_above_lat: 30.0,
        });
        let deps = SessionDeps {
            catalog: Arc::new(catalog()),
            reports: store,
            sampler: Arc::new(
                AqiGridSampler::new(provider, Duration::from_secs(8)).with_seed(1),
            ),
            default_center: DEFAULT_CENTER,
        };
        (deps, path, dir)
    }

    async fn start_with(filter: Filter, reports_file: Option<&str>) -> Harness {
        let (deps, reports_path, dir) = deps_with(reports_file).await;
        let store = deps.reports.clone();
        let (out_tx, out) = mpsc::unbounded_channel();
        let (commands, rx) = mpsc::channel(16);
        tokio::spawn(MapSession::new(deps, TestTransport(out_tx), filter).run(rx));
        Harness {
            commands,
            out,
            store,
            reports_path,
            _dir: dir,
        }
    }

    async fn start(filter: Filter) -> Harness {
        start_with(filter, None).await
    }

    impl Harness {
        async fn send(&self, cmd: HostCommand) {
            self.commands.send(cmd).await.unwrap();
        }

        async fn next(&mut self) -> (Vec<Point>, Filter) {
            let msg = tokio::time::timeout(Duration::from_secs(60), self.out.recv())
                .await
                .expect("timed out waiting for markers")
                .expect("session closed");
            match msg {
                MapMessage::UpdateMarkers { points, filter } => (points, filter),
            }
        }

        async fn is_quiet(&mut self) -> bool {
            tokio::time::timeout(Duration::from_secs(60), self.out.recv())
                .await
                .is_err()
        }
    }

    fn ids(points: &[Point]) -> Vec<&str> {
        points.iter().map(|p| p.id.as_str()).collect()
    }

    fn waste_report(id: &str) -> Report {
        Report {
            id: id.to_string(),
            lat: 21.01,
            lng: 105.83,
            title: "Illegal dumping".to_string(),
            description: String::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_sent_before_ready_then_latest_flushes() {
        let mut h = start(Filter::All).await;
        h.send(HostCommand::SetFilter {
            filter: Filter::Paper,
        })
        .await;
        h.send(HostCommand::SetFilter {
            filter: Filter::Glass,
        })
        .await;
        assert!(h.is_quiet().await);

        h.send(HostCommand::RendererReady).await;
        let (points, filter) = h.next().await;
        assert_eq!(filter, Filter::Glass);
        assert_eq!(ids(&points), vec!["glass-1"]);
        assert!(h.is_quiet().await);
    }

    #[tokio::test(start_paused = true)]
    async fn report_snapshots_refresh_the_map() {
        let mut h = start(Filter::All).await;
        h.send(HostCommand::RendererReady).await;
        let (points, _) = h.next().await;
        assert_eq!(ids(&points), vec!["glass-1", "paper-1"]);

        h.store.upsert(waste_report("r1"), 1).await.unwrap();
        let (points, _) = h.next().await;
        assert_eq!(ids(&points), vec!["glass-1", "paper-1", "r1"]);

        h.store.delete("r1").await.unwrap();
        let (points, _) = h.next().await;
        assert_eq!(ids(&points), vec!["glass-1", "paper-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn aqi_mode_releases_reports_and_samples_default_center() {
        let mut h = start(Filter::All).await;
        h.send(HostCommand::RendererReady).await;
        h.next().await;
        assert_eq!(h.store.subscriber_count(), 1);

        h.send(HostCommand::SetFilter { filter: Filter::Aqi }).await;
        let (points, filter) = h.next().await;
        assert_eq!(filter, Filter::Aqi);
        assert!(points.is_empty());
        assert_eq!(h.store.subscriber_count(), 0);

        h.send(HostCommand::LocationDenied).await;
        let (points, _) = h.next().await;
        assert_eq!(points.len(), 5);
        assert_eq!(points[0].position(), DEFAULT_CENTER);
        assert!(points.iter().all(|p| p.category == Category::Aqi));

        // Reports no longer reach an AQI map.
        h.store.upsert(waste_report("r1"), 1).await.unwrap();
        assert!(h.is_quiet().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_sampling_batch_is_discarded() {
        let mut h = start(Filter::Aqi).await;
        h.send(HostCommand::RendererReady).await;
        h.next().await;

        // The first center is slow to sample; the second answers first.
        h.send(HostCommand::Location { lat: 40.0, lng: 10.0 }).await;
        h.send(HostCommand::Location { lat: 10.0, lng: 10.0 }).await;

        let (points, _) = h.next().await;
        assert_eq!(points.len(), 5);
        assert!((points[0].lat - 10.0).abs() < 1e-9);
        assert!(h.is_quiet().await);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_location_falls_back_to_default() {
        let mut h = start(Filter::Aqi).await;
        h.send(HostCommand::RendererReady).await;
        h.next().await;
        h.send(HostCommand::Location { lat: 123.0, lng: 0.0 }).await;
        let (points, _) = h.next().await;
        assert_eq!(points[0].position(), DEFAULT_CENTER);
    }

    #[tokio::test(start_paused = true)]
    async fn override_bypasses_live_sources() {
        let mut h = start(Filter::All).await;
        h.send(HostCommand::RendererReady).await;
        h.next().await;

        let supplied = vec![
            Point::marker("m1", LatLng::new(21.0, 105.9), Category::Metal, "Scrap yard"),
            Point::marker("m2", LatLng::new(21.1, 105.9), Category::Metal, "Can bank"),
        ];
        h.send(HostCommand::Override {
            initial_filter: Filter::Metal,
            initial_points: supplied.clone(),
        })
        .await;
        let (points, filter) = h.next().await;
        assert_eq!(filter, Filter::Metal);
        assert_eq!(points, supplied);
        assert_eq!(h.store.subscriber_count(), 0);

        h.store.upsert(waste_report("r1"), 1).await.unwrap();
        h.send(HostCommand::LocationDenied).await;
        assert!(h.is_quiet().await);
    }

    #[tokio::test(start_paused = true)]
    async fn filter_change_narrows_supplied_points() {
        let mut h = start(Filter::All).await;
        h.send(HostCommand::RendererReady).await;
        h.next().await;

        let metal = Point::marker("m1", LatLng::new(21.0, 105.9), Category::Metal, "Scrap yard");
        h.send(HostCommand::Override {
            initial_filter: Filter::Metal,
            initial_points: vec![metal.clone()],
        })
        .await;
        h.next().await;

        h.send(HostCommand::SetFilter { filter: Filter::Aqi }).await;
        let (points, filter) = h.next().await;
        assert_eq!(filter, Filter::Aqi);
        assert!(points.is_empty());

        h.send(HostCommand::SetFilter {
            filter: Filter::Metal,
        })
        .await;
        let (points, _) = h.next().await;
        assert_eq!(points, vec![metal]);
        assert!(h.is_quiet().await);
    }

    #[tokio::test(start_paused = true)]
    async fn aqi_override_keeps_only_aqi_points() {
        let mut h = start(Filter::All).await;
        h.send(HostCommand::RendererReady).await;
        h.next().await;

        let reading = Point::aqi("a1", LatLng::new(21.0, 105.9), 72.0, "Station");
        h.send(HostCommand::Override {
            initial_filter: Filter::Aqi,
            initial_points: vec![
                reading.clone(),
                Point::marker("g1", LatLng::new(21.0, 105.9), Category::Glass, "Bottle bank"),
            ],
        })
        .await;
        let (points, filter) = h.next().await;
        assert_eq!(filter, Filter::Aqi);
        assert_eq!(points, vec![reading]);
    }

    #[tokio::test(start_paused = true)]
    async fn moving_center_keeps_samples_until_new_batch() {
        let mut h = start(Filter::Aqi).await;
        h.send(HostCommand::RendererReady).await;
        h.next().await;

        h.send(HostCommand::LocationDenied).await;
        let (first, _) = h.next().await;
        assert_eq!(first[0].position(), DEFAULT_CENTER);

        h.send(HostCommand::Location { lat: 10.0, lng: 10.0 }).await;
        let (second, _) = h.next().await;
        assert_eq!(second.len(), 5);
        assert!((second[0].lat - 10.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_generation_is_ignored() {
        let (deps, _path, _dir) = deps_with(None).await;
        let (out_tx, mut out) = mpsc::unbounded_channel();
        let mut session = MapSession::new(deps, TestTransport(out_tx), Filter::Aqi);
        session.attach();
        session.handle_command(HostCommand::RendererReady);
        out.try_recv().unwrap();

        session.handle_command(HostCommand::Location { lat: 10.0, lng: 10.0 });
        let old = session.generation;
        session.handle_command(HostCommand::Location { lat: 11.0, lng: 10.0 });
        assert_eq!(session.generation, old + 1);

        let late = vec![Point::aqi("late", LatLng::new(10.0, 10.0), 99.0, "AQI")];
        session.on_sampled(Sampled {
            generation: old,
            points: late,
        });
        assert!(out.try_recv().is_err());
        assert!(session.aqi_samples.is_empty());

        let fresh = vec![Point::aqi("fresh", LatLng::new(11.0, 10.0), 40.0, "AQI")];
        session.on_sampled(Sampled {
            generation: session.generation,
            points: fresh.clone(),
        });
        match out.try_recv().unwrap() {
            MapMessage::UpdateMarkers { points, .. } => assert_eq!(points, fresh),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn report_stream_failure_falls_back_to_catalog() {
        let mut h = start(Filter::All).await;
        h.send(HostCommand::RendererReady).await;
        h.next().await;

        h.store.upsert(waste_report("r1"), 1).await.unwrap();
        let (points, _) = h.next().await;
        assert_eq!(ids(&points), vec!["glass-1", "paper-1", "r1"]);

        std::fs::write(&h.reports_path, "not json").unwrap();
        assert!(h.store.upsert(waste_report("r2"), 2).await.is_err());
        let (points, _) = h.next().await;
        assert_eq!(ids(&points), vec!["glass-1", "paper-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn broken_report_store_leaves_catalog() {
        let mut h = start_with(Filter::All, Some("[{\"id\": 5}")).await;
        h.send(HostCommand::RendererReady).await;
        let (points, _) = h.next().await;
        assert_eq!(ids(&points), vec!["glass-1", "paper-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_filter_is_not_resent() {
        let mut h = start(Filter::Paper).await;
        h.send(HostCommand::RendererReady).await;
        let (points, _) = h.next().await;
        assert_eq!(ids(&points), vec!["paper-1"]);
        h.send(HostCommand::SetFilter {
            filter: Filter::Paper,
        })
        .await;
        assert!(h.is_quiet().await);
    }
}
