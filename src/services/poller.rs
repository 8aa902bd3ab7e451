/// Real-time polling loop. Periodically re-fetches through the aggregator,
/// normalizes, and notifies subscribers when significant events appear.
use crate::domain::ProcessedWeatherEvent;
use crate::processing;
use crate::services::WeatherService;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

type EventCallback = Box<dyn Fn(&[ProcessedWeatherEvent]) + Send + Sync>;
type SubscriberList = Mutex<Vec<(u64, Arc<EventCallback>)>>;

/// Handle returned by `subscribe`; dropping it keeps the subscription alive,
/// calling `unsubscribe` removes it.
pub struct Subscription {
    id: u64,
    subscribers: Weak<SubscriberList>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers
                .lock()
                .expect("subscriber lock poisoned")
                .retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct RealTimePoller {
    weather: Arc<WeatherService>,
    subscribers: Arc<SubscriberList>,
    next_id: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RealTimePoller {
    pub fn new(weather: Arc<WeatherService>) -> Self {
        Self {
            weather,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
            handle: Mutex::new(None),
        }
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&[ProcessedWeatherEvent]) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push((id, Arc::new(Box::new(callback))));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Start the polling loop. A second call while running is a no-op.
    pub fn start(&self, interval: Duration) {
        let mut handle = self.handle.lock().expect("handle lock poisoned");
        if handle.is_some() {
            warn!("poller already running, ignoring start");
            return;
        }

        let weather = self.weather.clone();
        let subscribers = self.subscribers.clone();
        info!("starting weather poller (interval: {:?})", interval);

        *handle = Some(tokio::spawn(async move {
            loop {
                let events = weather.process_all_current_data().await;
                let significant: Vec<ProcessedWeatherEvent> = events
                    .into_iter()
                    .filter(processing::is_significant)
                    .collect();

                if !significant.is_empty() {
                    info!("{} significant event(s) this tick", significant.len());
                    notify(&subscribers, &significant);
                }

                tokio::time::sleep(interval).await;
            }
        }));
    }

    /// Cancel future ticks. In-flight work from the last tick is allowed to
    /// finish naturally. Idempotent.
    pub fn stop(&self) {
        let mut handle = self.handle.lock().expect("handle lock poisoned");
        if let Some(task) = handle.take() {
            task.abort();
            info!("weather poller stopped");
        }
    }

    #[cfg(test)]
    pub(crate) fn notify_subscribers(&self, events: &[ProcessedWeatherEvent]) {
        notify(&self.subscribers, events);
    }
}

impl Drop for RealTimePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Each callback runs inside its own panic boundary so one misbehaving
/// subscriber cannot starve the rest.
fn notify(subscribers: &SubscriberList, events: &[ProcessedWeatherEvent]) {
    let snapshot: Vec<Arc<EventCallback>> = subscribers
        .lock()
        .expect("subscriber lock poisoned")
        .iter()
        .map(|(_, cb)| cb.clone())
        .collect();

    for callback in snapshot {
        if catch_unwind(AssertUnwindSafe(|| (*callback)(events))).is_err() {
            error!("weather event subscriber panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::donki::{DonkiClient, DonkiConfig};
    use crate::clients::swpc::{SwpcClient, SwpcConfig};
    use crate::clients::testing::MockTransport;
    use crate::domain::FlareRecord;
    use crate::repo::MemoryStore;
    use serde_json::json;

    fn poller() -> RealTimePoller {
        let donki = Arc::new(DonkiClient::new(
            Arc::new(MockTransport::ok(json!([
                {"flrID": "f1", "classType": "M5.0"}
            ]))),
            DonkiConfig {
                base_url: "http://provider.test/DONKI".to_string(),
                api_key: String::new(),
                rate_limit_delay: Duration::from_millis(0),
                cache_ttl: Duration::from_secs(60),
                fallback_ttl: Duration::from_secs(60),
            },
        ));
        let swpc = Arc::new(SwpcClient::new(
            Arc::new(MockTransport::status(500)),
            SwpcConfig {
                base_url: String::new(),
                cache_ttl: Duration::from_secs(60),
                synthetic_seed: Some(3),
            },
        ));
        let weather = Arc::new(WeatherService::new(
            donki,
            swpc,
            Arc::new(MemoryStore::new()),
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        RealTimePoller::new(weather)
    }

    fn sample_event() -> ProcessedWeatherEvent {
        crate::processing::process_solar_flare(&FlareRecord {
            flr_id: "f1".to_string(),
            class_type: Some("M5.0".to_string()),
            begin_time: None,
            peak_time: None,
            source_location: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_panicking_subscriber_does_not_block_others() {
        let poller = poller();
        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let _bad = poller.subscribe(|_| panic!("subscriber bug"));
        let sink = received.clone();
        let _good = poller.subscribe(move |events| {
            sink.lock().unwrap().push(events[0].id.clone());
        });

        poller.notify_subscribers(&[sample_event()]);

        let got = received.lock().unwrap();
        assert_eq!(got.as_slice(), ["FLR-f1"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_callback() {
        let poller = poller();
        let count = Arc::new(AtomicU64::new(0));

        let counter = count.clone();
        let sub = poller.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        poller.notify_subscribers(&[sample_event()]);
        sub.unsubscribe();
        poller.notify_subscribers(&[sample_event()]);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poll_tick_notifies_on_significant_event() {
        let poller = poller();
        let count = Arc::new(AtomicU64::new(0));

        let counter = count.clone();
        let _sub = poller.subscribe(move |events| {
            assert!(events.iter().all(processing::is_significant));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        poller.start(Duration::from_secs(3600));
        // First tick fires right away; give it a moment to complete.
        tokio::time::sleep(Duration::from_millis(100)).await;
        poller.stop();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_halts_ticks() {
        let poller = poller();
        poller.start(Duration::from_millis(10));
        poller.stop();
        poller.stop();

        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let _sub = poller.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
