use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

use chrono::Utc;
use employee_map_core::{MapHandle, MapSurface, Normalizer, SyncState};
use employee_map_directory::{DirectoryClient, DirectoryError};
use employee_map_util::SyncOptions;
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};
use ulid::Ulid;

/// Counts from one completed sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub received: usize,
    pub placed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncReport),
    Failed { error: String },
    AlreadyRunning,
}

impl SyncOutcome {
    pub fn result_label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Failed { .. } => "failed",
            Self::AlreadyRunning => "rejected",
        }
    }
}

/// Fetches an activation code, then the employee list, and places one
/// marker per employee on the attached map.
///
/// Failures never leave this type as errors: the message lands in
/// [`SyncState::error`] and the attempt ends.
pub struct SyncController<S: MapSurface> {
    directory: DirectoryClient,
    surface: Arc<S>,
    map: Mutex<Option<MapHandle>>,
    state: watch::Sender<SyncState>,
    in_flight: AtomicUsize,
    options: SyncOptions,
}

impl<S: MapSurface> SyncController<S> {
    pub fn new(directory: DirectoryClient, surface: Arc<S>, options: SyncOptions) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self {
            directory,
            surface,
            map: Mutex::new(None),
            state,
            in_flight: AtomicUsize::new(0),
            options,
        }
    }

    pub fn attach(&self, map: MapHandle) {
        *self.map.lock().expect("map slot poisoned") = Some(map);
    }

    pub fn detach(&self) -> Option<MapHandle> {
        self.map.lock().expect("map slot poisoned").take()
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn sync_employees(&self) -> SyncOutcome {
        let Some(_flight) = self.enter() else {
            info!(stage = "sync", "sync already in flight; trigger rejected");
            counter!("employee_sync_total", "result" => "rejected").increment(1);
            return SyncOutcome::AlreadyRunning;
        };

        let sync_id = Ulid::new();
        let started = Instant::now();
        let outcome = async {
            match self.fetch_and_place().await {
                Ok(report) => {
                    info!(
                        stage = "sync",
                        received = report.received,
                        placed = report.placed,
                        skipped = report.skipped,
                        "employee sync completed"
                    );
                    SyncOutcome::Completed(report)
                }
                Err(err) => {
                    warn!(stage = "sync", kind = err.kind(), error = %err, "employee sync failed");
                    let error = err.to_string();
                    self.state.send_modify(|state| state.fail(error.clone()));
                    SyncOutcome::Failed { error }
                }
            }
        }
        .instrument(info_span!("sync", %sync_id))
        .await;

        histogram!("employee_sync_duration_seconds").record(started.elapsed().as_secs_f64());
        counter!("employee_sync_total", "result" => outcome.result_label()).increment(1);
        outcome
    }

    // The counter only changes inside the watch's write lock, so an attempt
    // ending can never clear `loading` set by one that just started.
    fn enter(&self) -> Option<FlightGuard<'_>> {
        if self.options.single_flight {
            self.in_flight
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .ok()?;
            self.state.send_modify(SyncState::begin);
        } else {
            self.state.send_modify(|state| {
                self.in_flight.fetch_add(1, Ordering::AcqRel);
                state.begin();
            });
        }
        Some(FlightGuard {
            state: &self.state,
            in_flight: &self.in_flight,
        })
    }

    async fn fetch_and_place(&self) -> Result<SyncReport, DirectoryError> {
        let code = self.directory.request_activation_code().await?;
        let employees = self.directory.fetch_employees(&code).await?;
        Ok(self.place_markers(&employees))
    }

    fn place_markers(&self, employees: &[Value]) -> SyncReport {
        let mut report = SyncReport {
            received: employees.len(),
            ..SyncReport::default()
        };

        let Some(map) = *self.map.lock().expect("map slot poisoned") else {
            warn!(stage = "sync", received = report.received, "no map attached; markers not placed");
            return report;
        };

        if self.options.replace_markers {
            match self.surface.clear_markers(map) {
                Ok(removed) => debug!(stage = "sync", removed, "cleared previous markers"),
                Err(err) => {
                    warn!(stage = "sync", error = %err, "failed to clear markers; skipping placement");
                    return report;
                }
            }
        }

        for employee in employees {
            let record = match Normalizer::normalize(employee) {
                Ok(record) => record,
                Err(err) => {
                    warn!(stage = "sync", %employee, error = %err, "invalid coordinates for employee");
                    report.skipped += 1;
                    continue;
                }
            };

            debug!(stage = "sync", lat = record.latitude, lng = record.longitude, "adding marker");
            if let Err(err) = self.surface.add_marker(map, &record.to_marker()) {
                warn!(stage = "sync", error = %err, "map rejected marker; stopping placement");
                break;
            }
            report.placed += 1;
        }

        counter!("employee_markers_placed_total").increment(report.placed as u64);
        counter!("employee_records_skipped_total").increment(report.skipped as u64);
        report
    }
}

/// Clears `loading` when the last running attempt ends, including when the
/// sync future is dropped mid-flight.
struct FlightGuard<'a> {
    state: &'a watch::Sender<SyncState>,
    in_flight: &'a AtomicUsize,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|state| {
            if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                state.finish(Utc::now());
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHub;
    use crate::surface::MapBoard;
    use employee_map_core::{LatLng, MapOptions};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;
    use url::Url;

    const ACTIVATION_PATH: &str = "/hiring_test/get_activation_code";
    const EMPLOYEES_PATH: &str = "/hiring_test/get_all_employee";

    struct Fixture {
        board: Arc<MapBoard>,
        map: MapHandle,
        controller: Arc<SyncController<MapBoard>>,
    }

    fn fixture(server: &MockServer, options: SyncOptions) -> Fixture {
        fixture_for(
            &server.url(ACTIVATION_PATH),
            &server.url(EMPLOYEES_PATH),
            options,
        )
    }

    fn fixture_for(activation_url: &str, employees_url: &str, options: SyncOptions) -> Fixture {
        let directory = DirectoryClient::new(
            Url::parse(activation_url).expect("url"),
            Url::parse(employees_url).expect("url"),
            reqwest::Client::builder().build().expect("client"),
        );
        let board = Arc::new(MapBoard::new(EventHub::new()));
        let map = board.create("map", &MapOptions::default()).expect("create");
        let controller = Arc::new(SyncController::new(directory, board.clone(), options));
        controller.attach(map);
        Fixture {
            board,
            map,
            controller,
        }
    }

    fn employees() -> Value {
        json!([
            { "firstName": "Ayesha", "lastName": "Khan", "city": "Multan", "country": "Pakistan", "latitude": 30.1575, "longitude": 71.5249 },
            { "firstName": "Bilal", "lastName": "Ahmed", "city": "Lahore", "country": "Pakistan", "latitude": "31.5204", "longitude": "74.3587" },
            { "firstName": "Sara", "lastName": "Ali", "city": "Karachi", "country": "Pakistan", "latitude": 24.8607, "longitude": 67.0011 }
        ])
    }

    async fn mock_activation(server: &MockServer) -> httpmock::Mock<'_> {
        server
            .mock_async(|when, then| {
                when.method(POST).path(ACTIVATION_PATH);
                then.status(200).json_body(json!({ "activationCode": "X" }));
            })
            .await
    }

    async fn mock_employees(server: &MockServer, body: Value) -> httpmock::Mock<'_> {
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(EMPLOYEES_PATH)
                    .json_body(json!({ "activationCode": "X" }));
                then.status(200).json_body(body);
            })
            .await
    }

    async fn mock_delayed_activation(server: &MockServer, delay: Duration) -> httpmock::Mock<'_> {
        server
            .mock_async(|when, then| {
                when.method(POST).path(ACTIVATION_PATH);
                then.status(200)
                    .json_body(json!({ "activationCode": "X" }))
                    .delay(delay);
            })
            .await
    }

    async fn wait_for_hits(mock: &httpmock::Mock<'_>, hits: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while mock.hits_async().await < hits {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("request reached the directory");
    }

    #[tokio::test]
    async fn happy_path_places_one_marker_per_employee() {
        let server = MockServer::start_async().await;
        mock_activation(&server).await;
        let employees_mock = mock_employees(&server, employees()).await;
        let fx = fixture(&server, SyncOptions::default());

        let outcome = fx.controller.sync_employees().await;
        employees_mock.assert_async().await;

        assert_eq!(
            outcome,
            SyncOutcome::Completed(SyncReport {
                received: 3,
                placed: 3,
                skipped: 0
            })
        );
        assert_eq!(fx.board.marker_count(fx.map), 3);
        let state = fx.controller.state();
        assert_eq!(state.error, None);
        assert!(!state.loading);
        assert!(state.last_synced_at.is_some());

        let view = fx.board.snapshot(fx.map).expect("snapshot");
        assert_eq!(view.markers[1].position, LatLng::new(31.5204, 74.3587));
        assert_eq!(
            view.markers[0].popup_html,
            "<b>Ayesha Khan</b><br>Multan, Pakistan"
        );
    }

    #[tokio::test]
    async fn activation_failure_skips_employee_request() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(ACTIVATION_PATH);
                then.status(500);
            })
            .await;
        let employees_mock = mock_employees(&server, employees()).await;
        let fx = fixture(&server, SyncOptions::default());

        let outcome = fx.controller.sync_employees().await;

        employees_mock.assert_hits_async(0).await;
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        let error = fx.controller.state().error.expect("error set");
        assert!(error.starts_with("Failed to fetch activation code"));
        assert_eq!(fx.board.marker_count(fx.map), 0);
    }

    #[tokio::test]
    async fn malformed_coordinates_skip_only_that_record() {
        let server = MockServer::start_async().await;
        mock_activation(&server).await;
        let mut body = employees();
        body[1]["latitude"] = json!("abc");
        mock_employees(&server, body).await;
        let fx = fixture(&server, SyncOptions::default());

        let outcome = fx.controller.sync_employees().await;

        assert_eq!(
            outcome,
            SyncOutcome::Completed(SyncReport {
                received: 3,
                placed: 2,
                skipped: 1
            })
        );
        assert_eq!(fx.board.marker_count(fx.map), 2);
        assert_eq!(fx.controller.state().error, None);
    }

    #[tokio::test]
    async fn non_array_employee_response_sets_format_error() {
        let server = MockServer::start_async().await;
        mock_activation(&server).await;
        mock_employees(&server, json!({})).await;
        let fx = fixture(&server, SyncOptions::default());

        fx.controller.sync_employees().await;

        assert_eq!(
            fx.controller.state().error.as_deref(),
            Some("Invalid employee data format")
        );
        assert_eq!(fx.board.marker_count(fx.map), 0);
    }

    #[tokio::test]
    async fn loading_is_set_only_while_sync_runs() {
        for status in [200, 500] {
            let server = MockServer::start_async().await;
            let activation = server
                .mock_async(|when, then| {
                    when.method(POST).path(ACTIVATION_PATH);
                    then.status(status)
                        .json_body(json!({ "activationCode": "X" }))
                        .delay(Duration::from_millis(500));
                })
                .await;
            mock_employees(&server, employees()).await;
            let fx = fixture(&server, SyncOptions::default());
            assert!(!fx.controller.state().loading);

            let controller = fx.controller.clone();
            let task = tokio::spawn(async move { controller.sync_employees().await });

            wait_for_hits(&activation, 1).await;
            assert!(fx.controller.state().loading, "status {status}");
            assert_eq!(fx.controller.in_flight(), 1);

            task.await.expect("sync task");
            assert!(!fx.controller.state().loading, "status {status}");
            assert_eq!(fx.controller.in_flight(), 0);
        }
    }

    #[tokio::test]
    async fn cancelled_sync_still_clears_loading() {
        let server = MockServer::start_async().await;
        let activation = mock_delayed_activation(&server, Duration::from_secs(5)).await;
        let fx = fixture(&server, SyncOptions::default());

        let controller = fx.controller.clone();
        let task = tokio::spawn(async move { controller.sync_employees().await });
        wait_for_hits(&activation, 1).await;
        assert!(fx.controller.state().loading);

        task.abort();
        assert!(task.await.expect_err("aborted").is_cancelled());
        assert!(!fx.controller.state().loading);
        assert_eq!(fx.controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn repeated_syncs_accumulate_markers() {
        let server = MockServer::start_async().await;
        mock_activation(&server).await;
        mock_employees(&server, employees()).await;
        let fx = fixture(&server, SyncOptions::default());

        fx.controller.sync_employees().await;
        fx.controller.sync_employees().await;

        assert_eq!(fx.board.marker_count(fx.map), 6);
    }

    #[tokio::test]
    async fn replace_mode_clears_previous_markers() {
        let server = MockServer::start_async().await;
        mock_activation(&server).await;
        mock_employees(&server, employees()).await;
        let fx = fixture(
            &server,
            SyncOptions {
                replace_markers: true,
                ..SyncOptions::default()
            },
        );

        fx.controller.sync_employees().await;
        fx.controller.sync_employees().await;

        assert_eq!(fx.board.marker_count(fx.map), 3);
    }

    #[tokio::test]
    async fn single_flight_rejects_overlapping_trigger() {
        let server = MockServer::start_async().await;
        let activation = mock_delayed_activation(&server, Duration::from_secs(1)).await;
        mock_employees(&server, employees()).await;
        let fx = fixture(
            &server,
            SyncOptions {
                single_flight: true,
                ..SyncOptions::default()
            },
        );

        let controller = fx.controller.clone();
        let first = tokio::spawn(async move { controller.sync_employees().await });
        wait_for_hits(&activation, 1).await;

        assert_eq!(
            fx.controller.sync_employees().await,
            SyncOutcome::AlreadyRunning
        );
        assert!(fx.controller.state().loading);

        let outcome = first.await.expect("first sync");
        assert_eq!(outcome.result_label(), "completed");
        assert_eq!(fx.board.marker_count(fx.map), 3);
    }

    #[tokio::test]
    async fn overlapping_syncs_both_place_markers_by_default() {
        let server = MockServer::start_async().await;
        mock_delayed_activation(&server, Duration::from_millis(100)).await;
        mock_employees(&server, employees()).await;
        let fx = fixture(&server, SyncOptions::default());

        let (first, second) = tokio::join!(
            fx.controller.sync_employees(),
            fx.controller.sync_employees()
        );

        assert_eq!(first.result_label(), "completed");
        assert_eq!(second.result_label(), "completed");
        assert_eq!(fx.board.marker_count(fx.map), 6);
        assert!(!fx.controller.state().loading);
    }

    #[tokio::test]
    async fn detached_controller_fetches_but_places_nothing() {
        let server = MockServer::start_async().await;
        mock_activation(&server).await;
        let employees_mock = mock_employees(&server, employees()).await;
        let fx = fixture(&server, SyncOptions::default());
        assert_eq!(fx.controller.detach(), Some(fx.map));

        let outcome = fx.controller.sync_employees().await;

        employees_mock.assert_async().await;
        assert_eq!(
            outcome,
            SyncOutcome::Completed(SyncReport {
                received: 3,
                placed: 0,
                skipped: 0
            })
        );
        assert_eq!(fx.board.marker_count(fx.map), 0);
    }

    #[tokio::test]
    async fn new_attempt_clears_previous_error() {
        let server = MockServer::start_async().await;
        let mut failing = server
            .mock_async(|when, then| {
                when.method(POST).path(ACTIVATION_PATH);
                then.status(200).json_body(json!({}));
            })
            .await;
        mock_employees(&server, employees()).await;
        let fx = fixture(&server, SyncOptions::default());

        fx.controller.sync_employees().await;
        assert_eq!(
            fx.controller.state().error.as_deref(),
            Some("Activation code is missing")
        );

        failing.delete_async().await;
        mock_activation(&server).await;
        fx.controller.sync_employees().await;
        assert_eq!(fx.controller.state().error, None);
        assert_eq!(fx.board.marker_count(fx.map), 3);
    }

    #[tokio::test]
    async fn loading_stays_set_until_the_last_overlapping_sync_ends() {
        let server = MockServer::start_async().await;
        let mut first_activation = mock_delayed_activation(&server, Duration::from_millis(300)).await;
        mock_employees(&server, employees()).await;
        let fx = fixture(&server, SyncOptions::default());

        let controller = fx.controller.clone();
        let first = tokio::spawn(async move { controller.sync_employees().await });
        wait_for_hits(&first_activation, 1).await;

        first_activation.delete_async().await;
        let second_activation = mock_delayed_activation(&server, Duration::from_secs(3)).await;
        let controller = fx.controller.clone();
        let second = tokio::spawn(async move { controller.sync_employees().await });
        wait_for_hits(&second_activation, 1).await;

        assert_eq!(first.await.expect("first sync").result_label(), "completed");
        let state = fx.controller.state();
        assert!(state.loading);
        assert!(state.last_synced_at.is_none());
        assert_eq!(fx.controller.in_flight(), 1);

        assert_eq!(second.await.expect("second sync").result_label(), "completed");
        let state = fx.controller.state();
        assert!(!state.loading);
        assert!(state.last_synced_at.is_some());
        assert_eq!(fx.controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn flight_guards_clear_loading_only_when_all_are_gone() {
        let server = MockServer::start_async().await;
        let fx = fixture(&server, SyncOptions::default());

        let first = fx.controller.enter().expect("first attempt");
        let second = fx.controller.enter().expect("second attempt");
        drop(first);
        assert!(fx.controller.state().loading);

        drop(second);
        assert!(!fx.controller.state().loading);
        assert_eq!(fx.controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn employee_status_failure_sets_error_and_places_nothing() {
        let server = MockServer::start_async().await;
        mock_activation(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(EMPLOYEES_PATH);
                then.status(500).body("boom");
            })
            .await;
        let fx = fixture(&server, SyncOptions::default());

        let outcome = fx.controller.sync_employees().await;

        assert_eq!(outcome.result_label(), "failed");
        let state = fx.controller.state();
        assert!(!state.loading);
        assert!(state
            .error
            .expect("error set")
            .starts_with("Failed to fetch employees"));
        assert_eq!(fx.board.marker_count(fx.map), 0);
    }

    #[tokio::test]
    async fn unreachable_directory_reports_transport_error() {
        let fx = fixture_for(
            &format!("http://127.0.0.1:1{ACTIVATION_PATH}"),
            &format!("http://127.0.0.1:1{EMPLOYEES_PATH}"),
            SyncOptions::default(),
        );

        let outcome = fx.controller.sync_employees().await;

        let SyncOutcome::Failed { error } = &outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(error.starts_with("request failed"), "{error}");
        let state = fx.controller.state();
        assert!(!state.loading);
        assert_eq!(state.error.as_deref(), Some(error.as_str()));
        assert_eq!(fx.board.marker_count(fx.map), 0);
    }

    #[tokio::test]
    async fn numeric_activation_code_is_forwarded() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(ACTIVATION_PATH);
                then.status(200).json_body(json!({ "activationCode": 12345 }));
            })
            .await;
        let employees_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(EMPLOYEES_PATH)
                    .json_body(json!({ "activationCode": 12345 }));
                then.status(200).json_body(json!([
                    { "firstName": "Ayesha", "lastName": "Khan", "city": "Multan", "country": "Pakistan", "latitude": 30.1575, "longitude": 71.5249 }
                ]));
            })
            .await;
        let fx = fixture(&server, SyncOptions::default());

        let outcome = fx.controller.sync_employees().await;

        employees_mock.assert_async().await;
        assert_eq!(outcome.result_label(), "completed");
        assert_eq!(fx.board.marker_count(fx.map), 1);
        assert_eq!(fx.controller.state().error, None);
    }
}
