use std::{
    collections::{HashMap, VecDeque},
    io::Read,
    path::Path,
};

use num_complex::Complex64;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    cosim::federate::{FederateRuntime, PublicationHandle, SubscriptionHandle, TimeGrant},
    error::FederateError,
};

/// One subscription value delivered once the given time is granted.
///
/// Loaded from CSV with the columns `execute_at,key,re,im`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScheduledSample {
    /// Time at which this value becomes visible (in seconds).
    pub execute_at: f64,
    /// Subscription key, e.g. `feeder_1/Sa`.
    pub key: String,
    pub re: f64,
    pub im: f64,
}

impl ScheduledSample {
    pub fn value(&self) -> Complex64 {
        Complex64::new(self.re, self.im)
    }
}

/// Reads a sample schedule from CSV.
pub fn read_schedule<R: Read>(reader: R) -> Result<Vec<ScheduledSample>, FederateError> {
    csv::Reader::from_reader(reader)
        .deserialize()
        .collect::<Result<Vec<ScheduledSample>, _>>()
        .map_err(|e| FederateError::Runtime(format!("invalid schedule: {e}")))
}

pub fn load_schedule<P: AsRef<Path>>(path: P) -> Result<Vec<ScheduledSample>, FederateError> {
    let file = std::fs::File::open(path.as_ref()).map_err(|e| {
        FederateError::Runtime(format!("cannot open {}: {e}", path.as_ref().display()))
    })?;
    read_schedule(file)
}

#[derive(Debug, Clone)]
struct SubscriptionSlot {
    key: String,
    value: Complex64,
    fresh: bool,
}

#[derive(Debug, Clone)]
struct PublicationLog {
    key: String,
    history: Vec<(f64, Complex64)>,
}

/// In-process federate runtime that replays a schedule of subscription values
/// and records every publication.
///
/// Time is granted exactly as requested. Freshness follows the usual
/// semantics: a subscription is fresh from the grant at which it received a
/// value until the next grant.
#[derive(Debug, Clone)]
pub struct LoopbackFederate {
    period: f64,
    time: f64,
    executing: bool,
    finalized: bool,
    terminate_after: Option<f64>,
    subscriptions: Vec<SubscriptionSlot>,
    subscription_keys: HashMap<String, usize>,
    publications: Vec<PublicationLog>,
    publication_keys: HashMap<String, usize>,
    schedule: VecDeque<ScheduledSample>,
}

impl LoopbackFederate {
    pub fn new(period: f64) -> Self {
        Self {
            period,
            time: 0.0,
            executing: false,
            finalized: false,
            terminate_after: None,
            subscriptions: Vec::new(),
            subscription_keys: HashMap::new(),
            publications: Vec::new(),
            publication_keys: HashMap::new(),
            schedule: VecDeque::new(),
        }
    }

    /// Queues samples, ordered by time; equal times keep their input order.
    pub fn with_schedule(mut self, samples: impl IntoIterator<Item = ScheduledSample>) -> Self {
        let mut samples: Vec<_> = self.schedule.drain(..).chain(samples).collect();
        samples.sort_by(|a, b| a.execute_at.total_cmp(&b.execute_at));
        self.schedule = samples.into();
        self
    }

    /// Requests beyond `time` are answered with [`TimeGrant::Terminated`].
    pub fn terminate_after(mut self, time: f64) -> Self {
        self.terminate_after = Some(time);
        self
    }

    /// Delivers a value right away, marking the subscription fresh.
    pub fn inject(&mut self, key: &str, value: Complex64) -> Result<(), FederateError> {
        let idx = self
            .subscription_keys
            .get(key)
            .copied()
            .ok_or_else(|| FederateError::Runtime(format!("no subscription named {key}")))?;
        let slot = &mut self.subscriptions[idx];
        slot.value = value;
        slot.fresh = true;
        Ok(())
    }

    pub fn subscription_keys(&self) -> Vec<String> {
        self.subscriptions.iter().map(|s| s.key.clone()).collect()
    }

    /// Everything published on `key` as `(time, value)` pairs.
    pub fn published(&self, key: &str) -> Option<&[(f64, Complex64)]> {
        self.publication_keys
            .get(key)
            .map(|&idx| self.publications[idx].history.as_slice())
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn deliver_due(&mut self) {
        while let Some(sample) = self.schedule.front() {
            if sample.execute_at > self.time {
                break;
            }
            let Some(sample) = self.schedule.pop_front() else {
                break;
            };
            match self.subscription_keys.get(&sample.key) {
                Some(&idx) => {
                    let slot = &mut self.subscriptions[idx];
                    slot.value = sample.value();
                    slot.fresh = true;
                }
                None => warn!(key = %sample.key, "scheduled sample for unknown subscription dropped"),
            }
        }
    }

    fn ensure_running(&self) -> Result<(), FederateError> {
        if !self.executing {
            return Err(FederateError::Runtime("not in executing mode".into()));
        }
        if self.finalized {
            return Err(FederateError::Runtime("federate already finalized".into()));
        }
        Ok(())
    }

    fn ensure_configuring(&self, key: &str) -> Result<(), FederateError> {
        if self.executing || self.finalized {
            return Err(FederateError::Runtime(format!(
                "cannot register {key} after entering executing mode"
            )));
        }
        Ok(())
    }
}

impl FederateRuntime for LoopbackFederate {
    fn register_subscription(
        &mut self,
        key: &str,
        _units: &str,
    ) -> Result<SubscriptionHandle, FederateError> {
        self.ensure_configuring(key)?;
        if self.subscription_keys.contains_key(key) {
            return Err(FederateError::Runtime(format!(
                "subscription {key} registered twice"
            )));
        }
        let handle = SubscriptionHandle::from(self.subscriptions.len());
        self.subscriptions.push(SubscriptionSlot {
            key: key.to_owned(),
            value: Complex64::zero(),
            fresh: false,
        });
        self.subscription_keys.insert(key.to_owned(), handle.into());
        Ok(handle)
    }

    fn register_publication(
        &mut self,
        key: &str,
        _units: &str,
    ) -> Result<PublicationHandle, FederateError> {
        self.ensure_configuring(key)?;
        if self.publication_keys.contains_key(key) {
            return Err(FederateError::Runtime(format!(
                "publication {key} registered twice"
            )));
        }
        let idx = self.publications.len();
        self.publications.push(PublicationLog {
            key: key.to_owned(),
            history: Vec::new(),
        });
        self.publication_keys.insert(key.to_owned(), idx);
        Ok(PublicationHandle(idx))
    }

    fn period(&self) -> f64 {
        self.period
    }

    fn enter_executing_mode(&mut self) -> Result<(), FederateError> {
        if self.executing {
            return Err(FederateError::Runtime("already in executing mode".into()));
        }
        self.executing = true;
        self.deliver_due();
        Ok(())
    }

    fn request_time(&mut self, target: f64) -> Result<TimeGrant, FederateError> {
        self.ensure_running()?;
        if self.terminate_after.is_some_and(|end| target > end) {
            debug!(target, "termination instead of grant");
            return Ok(TimeGrant::Terminated);
        }
        for slot in &mut self.subscriptions {
            slot.fresh = false;
        }
        self.time = target.max(self.time);
        self.deliver_due();
        Ok(TimeGrant::Granted(self.time))
    }

    fn subscription_value(&self, handle: SubscriptionHandle) -> Result<Complex64, FederateError> {
        self.subscriptions
            .get(handle.0)
            .map(|slot| slot.value)
            .ok_or(FederateError::UnknownSubscription(handle.0))
    }

    fn subscription_is_fresh(&self, handle: SubscriptionHandle) -> Result<bool, FederateError> {
        self.subscriptions
            .get(handle.0)
            .map(|slot| slot.fresh)
            .ok_or(FederateError::UnknownSubscription(handle.0))
    }

    fn publish(
        &mut self,
        handle: PublicationHandle,
        value: Complex64,
    ) -> Result<(), FederateError> {
        self.ensure_running()?;
        let time = self.time;
        let log = self
            .publications
            .get_mut(handle.0)
            .ok_or(FederateError::UnknownPublication(handle.0))?;
        debug!(key = %log.key, time, value = %value, "publish");
        log.history.push((time, value));
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), FederateError> {
        self.finalized = true;
        Ok(())
    }
}
