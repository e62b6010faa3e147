//! Appender configuration.

use std::sync::Arc;
use std::time::Duration;

use mosaic_crypto::Signer;

use crate::antispam::Antispam;
use crate::error::AppendError;

/// Minimum accepted checkpoint publication interval.
pub const MIN_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for an [`Appender`](crate::Appender).
///
/// The checkpoint signer is mandatory; everything else has defaults.
pub struct AppendOptions {
    pub(crate) batch_max_size: usize,
    pub(crate) batch_max_age: Duration,
    pub(crate) checkpoint_interval: Duration,
    pub(crate) origin: String,
    pub(crate) signers: Vec<Signer>,
    pub(crate) antispam: Option<Arc<Antispam>>,
}

impl AppendOptions {
    /// Options with the mandatory origin line and primary checkpoint signer.
    pub fn new(origin: impl Into<String>, signer: Signer) -> Self {
        Self {
            batch_max_size: 256,
            batch_max_age: Duration::from_millis(250),
            checkpoint_interval: Duration::from_secs(10),
            origin: origin.into(),
            signers: vec![signer],
            antispam: None,
        }
    }

    /// Set the maximum number of entries per batch.
    pub fn with_batch_max_size(mut self, max_size: usize) -> Self {
        self.batch_max_size = max_size;
        self
    }

    /// Set the maximum time an entry waits before its batch is flushed.
    pub fn with_batch_max_age(mut self, max_age: Duration) -> Self {
        self.batch_max_age = max_age;
        self
    }

    /// Set how frequently checkpoints are published.
    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Add a witness signer; every publish carries all signatures in order.
    pub fn with_additional_signer(mut self, signer: Signer) -> Self {
        self.signers.push(signer);
        self
    }

    /// Attach an antispam index for duplicate short-circuiting and
    /// pushback.
    pub fn with_antispam(mut self, antispam: Arc<Antispam>) -> Self {
        self.antispam = Some(antispam);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), AppendError> {
        if self.batch_max_size == 0 {
            return Err(AppendError::InvalidOptions(
                "BatchMaxSize must be positive".into(),
            ));
        }
        if self.batch_max_age.is_zero() {
            return Err(AppendError::InvalidOptions(
                "BatchMaxAge must be positive".into(),
            ));
        }
        if self.checkpoint_interval < MIN_CHECKPOINT_INTERVAL {
            return Err(AppendError::InvalidOptions(format!(
                "CheckpointInterval {:?} below the {:?} minimum",
                self.checkpoint_interval, MIN_CHECKPOINT_INTERVAL
            )));
        }
        if self.origin.is_empty() {
            return Err(AppendError::InvalidOptions(
                "origin must not be empty".into(),
            ));
        }
        Ok(())
    }
}
