use derive_more::derive::{From, Into};
use num_complex::Complex64;

use crate::error::FederateError;

/// Handle to a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Into)]
pub struct SubscriptionHandle(pub usize);

/// Handle to a registered publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Into)]
pub struct PublicationHandle(pub usize);

/// Answer to a time request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeGrant {
    Granted(f64),
    /// The co-simulation is shutting down; no further steps will be granted.
    Terminated,
}

/// Clock and pub/sub substrate of the co-simulation.
///
/// `request_time` is the only call allowed to block; it returns once every
/// other participant has reached the requested time.
pub trait FederateRuntime {
    fn register_subscription(
        &mut self,
        key: &str,
        units: &str,
    ) -> Result<SubscriptionHandle, FederateError>;

    fn register_publication(
        &mut self,
        key: &str,
        units: &str,
    ) -> Result<PublicationHandle, FederateError>;

    /// Time step this federate advances by, in seconds.
    fn period(&self) -> f64;

    fn enter_executing_mode(&mut self) -> Result<(), FederateError>;

    fn request_time(&mut self, target: f64) -> Result<TimeGrant, FederateError>;

    /// Last value received on a subscription.
    fn subscription_value(&self, handle: SubscriptionHandle) -> Result<Complex64, FederateError>;

    /// Whether the subscription received a value since the previous grant.
    fn subscription_is_fresh(&self, handle: SubscriptionHandle) -> Result<bool, FederateError>;

    fn publish(
        &mut self,
        handle: PublicationHandle,
        value: Complex64,
    ) -> Result<(), FederateError>;

    fn finalize(&mut self) -> Result<(), FederateError>;
}
