use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use once_cell::sync::{Lazy, OnceCell};

pub const DEFAULT_BUCKETS: &[f64] = &[0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

static SERVICE_NAME: OnceCell<&'static str> = OnceCell::new();
static PROCESS_START: OnceCell<Instant> = OnceCell::new();
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::default);

pub(crate) fn init(service: &str) {
    if SERVICE_NAME.get().is_some() {
        return;
    }
    let leaked: &'static str = Box::leak(service.to_string().into_boxed_str());
    SERVICE_NAME.set(leaked).ok();
    PROCESS_START.get_or_init(Instant::now);
}

/// Name the first initialized service registered, used as the `service` label.
pub fn service_name() -> Option<&'static str> {
    SERVICE_NAME.get().copied()
}

trait Collector: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, output: &mut String);
}

#[derive(Default)]
struct Registry {
    collectors: RwLock<Vec<Arc<dyn Collector>>>,
}

impl Registry {
    fn register(&self, collector: Arc<dyn Collector>) {
        let mut guard = self.collectors.write().expect("lock poisoned");
        if guard.iter().any(|existing| existing.name() == collector.name()) {
            return;
        }
        guard.push(collector);
    }

    fn encode(&self) -> String {
        let mut output = String::new();
        for collector in self.collectors.read().expect("lock poisoned").iter() {
            collector.encode(&mut output);
        }
        output
    }
}

struct CounterFamily {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    values: Mutex<BTreeMap<Vec<String>, u64>>,
}

impl Collector for CounterFamily {
    fn name(&self) -> &'static str {
        self.name
    }

    fn encode(&self, output: &mut String) {
        let _ = writeln!(output, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(output, "# TYPE {} counter", self.name);
        for (labels, value) in self.values.lock().expect("lock poisoned").iter() {
            output.push_str(self.name);
            write_labels(output, self.label_names, labels, None);
            let _ = writeln!(output, " {value}");
        }
    }
}

/// Counter family keyed by label values.
#[derive(Clone)]
pub struct CounterVec {
    inner: Arc<CounterFamily>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[&str], amount: u64) {
        let key = label_key(self.inner.label_names, labels);
        *self
            .inner
            .values
            .lock()
            .expect("lock poisoned")
            .entry(key)
            .or_default() += amount;
    }

    pub fn get(&self, labels: &[&str]) -> u64 {
        let key = label_key(self.inner.label_names, labels);
        self.inner
            .values
            .lock()
            .expect("lock poisoned")
            .get(&key)
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Clone)]
struct HistogramState {
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

struct HistogramFamily {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    buckets: &'static [f64],
    values: Mutex<BTreeMap<Vec<String>, HistogramState>>,
}

impl Collector for HistogramFamily {
    fn name(&self) -> &'static str {
        self.name
    }

    fn encode(&self, output: &mut String) {
        let _ = writeln!(output, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(output, "# TYPE {} histogram", self.name);
        let snapshot = self.values.lock().expect("lock poisoned").clone();
        for (labels, state) in snapshot {
            let mut cumulative = 0;
            for (idx, bound) in self.buckets.iter().enumerate() {
                cumulative += state.counts[idx];
                let _ = write!(output, "{}_bucket", self.name);
                write_labels(output, self.label_names, &labels, Some(&format_float(*bound)));
                let _ = writeln!(output, " {cumulative}");
            }
            let _ = write!(output, "{}_bucket", self.name);
            write_labels(output, self.label_names, &labels, Some("+Inf"));
            let _ = writeln!(output, " {}", state.count);

            let _ = write!(output, "{}_sum", self.name);
            write_labels(output, self.label_names, &labels, None);
            let _ = writeln!(output, " {}", format_float(state.sum));

            let _ = write!(output, "{}_count", self.name);
            write_labels(output, self.label_names, &labels, None);
            let _ = writeln!(output, " {}", state.count);
        }
    }
}

/// Histogram family keyed by label values.
#[derive(Clone)]
pub struct HistogramVec {
    inner: Arc<HistogramFamily>,
}

impl HistogramVec {
    pub fn observe(&self, labels: &[&str], value: f64) {
        let key = label_key(self.inner.label_names, labels);
        let buckets = self.inner.buckets;
        let mut guard = self.inner.values.lock().expect("lock poisoned");
        let state = guard.entry(key).or_insert_with(|| HistogramState {
            counts: vec![0; buckets.len()],
            sum: 0.0,
            count: 0,
        });
        state.count += 1;
        state.sum += value;
        // values above the last bound only land in +Inf
        if let Some(idx) = buckets.iter().position(|bound| value <= *bound) {
            state.counts[idx] += 1;
        }
    }
}

pub fn register_counter(
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
) -> CounterVec {
    let inner = Arc::new(CounterFamily {
        name,
        help,
        label_names,
        values: Mutex::new(BTreeMap::new()),
    });
    REGISTRY.register(inner.clone());
    CounterVec { inner }
}

pub fn register_histogram(
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    buckets: &'static [f64],
) -> HistogramVec {
    let inner = Arc::new(HistogramFamily {
        name,
        help,
        label_names,
        buckets,
        values: Mutex::new(BTreeMap::new()),
    });
    REGISTRY.register(inner.clone());
    HistogramVec { inner }
}

/// Render every registered family plus process uptime in the Prometheus text
/// exposition format.
pub fn encode_prometheus() -> String {
    let mut output = String::new();
    if let (Some(service), Some(start)) = (service_name(), PROCESS_START.get()) {
        output.push_str("# HELP process_uptime_seconds Process uptime in seconds\n");
        output.push_str("# TYPE process_uptime_seconds gauge\n");
        let _ = writeln!(
            output,
            "process_uptime_seconds{{service=\"{}\"}} {}",
            escape_label_value(service),
            format_float(start.elapsed().as_secs_f64())
        );
    }
    output.push_str(&REGISTRY.encode());
    output
}

static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter(
        "http_requests_total",
        "Total HTTP requests received",
        &["service", "route", "code"],
    )
});

static HANDLER_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram(
        "handler_latency_seconds",
        "HTTP handler latency in seconds",
        &["service", "route"],
        DEFAULT_BUCKETS,
    )
});

static WEBHOOK_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter(
        "webhook_events_total",
        "Inbound webhook deliveries by outcome",
        &["service", "kind"],
    )
});

static ENTITY_UPDATES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter(
        "entity_updates_total",
        "Entity state updates applied",
        &["service"],
    )
});

pub fn http_requests_total() -> &'static CounterVec {
    &HTTP_REQUESTS_TOTAL
}

pub fn handler_latency_seconds() -> &'static HistogramVec {
    &HANDLER_LATENCY_SECONDS
}

pub fn webhook_events_total() -> &'static CounterVec {
    &WEBHOOK_EVENTS_TOTAL
}

pub fn entity_updates_total() -> &'static CounterVec {
    &ENTITY_UPDATES_TOTAL
}

fn label_key(names: &[&str], values: &[&str]) -> Vec<String> {
    debug_assert_eq!(names.len(), values.len(), "label value count mismatch");
    values.iter().map(|value| value.to_string()).collect()
}

fn write_labels(output: &mut String, names: &[&str], values: &[String], le: Option<&str>) {
    if names.is_empty() && le.is_none() {
        return;
    }
    output.push('{');
    let mut first = true;
    for (name, value) in names.iter().zip(values) {
        if !first {
            output.push(',');
        }
        first = false;
        let _ = write!(output, "{}=\"{}\"", name, escape_label_value(value));
    }
    if let Some(le) = le {
        if !first {
            output.push(',');
        }
        let _ = write!(output, "le=\"{le}\"");
    }
    output.push('}');
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_float(value: f64) -> String {
    let formatted = format!("{value:.6}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}
