//! Appender assembly: queue, integrator task and checkpoint publisher
//! wired over one driver.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use mosaic_core::Entry;
use mosaic_storage::LogDriver;

use crate::antispam::Antispam;
use crate::error::AppendError;
use crate::integrator::Integrator;
use crate::options::AppendOptions;
use crate::publisher::CheckpointPublisher;
use crate::queue::{IndexFuture, Queue};

/// The write head of a Mosaic log.
///
/// Owns the sequencer queue and the background integrator and publisher
/// tasks. Reads go straight to the driver; an `Appender` is only needed to
/// add entries.
pub struct Appender<D: LogDriver + 'static> {
    driver: Arc<D>,
    queue: Queue,
    antispam: Option<Arc<Antispam>>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl<D: LogDriver + 'static> Appender<D> {
    /// Start an appender over `driver`.
    ///
    /// Initialises the tree state on a fresh store and immediately asks the
    /// publisher for a checkpoint covering it.
    pub async fn new(driver: Arc<D>, options: AppendOptions) -> Result<Self, AppendError> {
        options.validate()?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let (updated_tx, updated_rx) = mpsc::channel(1);
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();

        let integrator = Integrator::init(driver.clone(), updated_tx).await?;
        info!(size = integrator.state().size, "Appender starting");

        let pushback = match &options.antispam {
            Some(antispam) => antispam.pushback_flag(),
            None => Arc::new(AtomicBool::new(false)),
        };
        let queue = Queue::new(
            batch_tx,
            options.batch_max_size,
            options.batch_max_age,
            pushback,
        );

        let tasks = vec![
            tokio::spawn(integrator.run(batch_rx, shutdown_tx.subscribe())),
            CheckpointPublisher::new(
                driver.clone(),
                options.origin,
                options.signers,
                options.checkpoint_interval,
            )
            .spawn(updated_rx, shutdown_tx.subscribe()),
        ];

        Ok(Self {
            driver,
            queue,
            antispam: options.antispam,
            shutdown_tx,
            tasks,
        })
    }

    /// Submit an entry for sequencing.
    ///
    /// The returned future resolves once the batch containing the entry
    /// commits. When an antispam index is attached and already maps this
    /// entry's leaf hash, the future resolves immediately with the prior
    /// index and no batch slot is consumed.
    pub fn add(&self, entry: Entry) -> IndexFuture {
        if let Some(antispam) = &self.antispam {
            match antispam.index(&entry.leaf_hash()) {
                Ok(Some(index)) => {
                    return IndexFuture::resolved(Ok(mosaic_core::SequencedIndex {
                        index,
                        is_duplicate: true,
                    }));
                }
                Ok(None) => {}
                // A broken index never blocks admission; fall through.
                Err(e) => warn!(error = %e, "Dedup lookup failed"),
            }
        }
        self.queue.add(entry)
    }

    /// The driver this appender writes through.
    pub fn reader(&self) -> Arc<D> {
        self.driver.clone()
    }

    /// A shutdown signal receiver, for wiring auxiliary tasks (such as an
    /// antispam follower) to this appender's lifecycle.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stop accepting entries, fail pending batches with `ShuttingDown`,
    /// and wait for the background tasks to finish.
    pub async fn shutdown(self) {
        self.queue.close();
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Appender stopped");
    }
}
