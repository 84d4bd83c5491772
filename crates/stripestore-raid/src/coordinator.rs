//! The RAID coordinator

use crate::plan::{plan_stripes, StripePlan};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use stripestore_catalog::Catalog;
use stripestore_client::{BlockTransport, StoreBlock};
use stripestore_common::config::ClusterConfig;
use stripestore_common::{
    checksum, verify_checksum, BlockId, BlockRef, Error, FileId, FileRecord, NodeId, Result,
    SystemStatus,
};
use stripestore_health::{HealthEvent, HealthMonitor};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Stripes in flight at once during a write or read
const STRIPE_PIPELINE: usize = 4;

/// Result of a successful upload
#[derive(Clone, Debug)]
pub struct UploadOutcome {
    pub file_id: FileId,
    pub blocks_created: usize,
    pub nodes_used: Vec<NodeId>,
}

/// The write, read, delete and recovery paths over a fixed node fleet.
///
/// The coordinator owns the catalog and a transport per node; it holds block
/// descriptors only, never payload bytes beyond the request at hand.
pub struct RaidCoordinator {
    cluster: ClusterConfig,
    catalog: Arc<Catalog>,
    transports: HashMap<NodeId, Arc<dyn BlockTransport>>,
    health: Arc<HealthMonitor>,
}

impl RaidCoordinator {
    /// Create a coordinator. Every configured node must have a transport.
    pub fn new(
        cluster: ClusterConfig,
        catalog: Arc<Catalog>,
        transports: HashMap<NodeId, Arc<dyn BlockTransport>>,
        health: Arc<HealthMonitor>,
    ) -> Result<Self> {
        for node_id in cluster.node_ids() {
            if !transports.contains_key(&node_id) {
                return Err(Error::InvalidConfig(format!(
                    "no transport bound for node {node_id}"
                )));
            }
        }
        Ok(Self {
            cluster,
            catalog,
            transports,
            health,
        })
    }

    /// The catalog this coordinator owns
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// The health monitor feeding recovery decisions
    #[must_use]
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Cluster configuration
    #[must_use]
    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    /// Derived cluster status
    #[must_use]
    pub fn system_status(&self) -> SystemStatus {
        self.health.availability_stats().status
    }

    fn transport(&self, node_id: NodeId) -> &Arc<dyn BlockTransport> {
        &self.transports[&node_id]
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Stripe a file across the fleet and publish its catalog record.
    ///
    /// A stripe commits only when all D+1 member stores succeed; any failure
    /// fails the whole write, reclaims already-stored blocks best-effort and
    /// surfaces as `StorageFailure`. The file becomes observable only after
    /// the catalog record is published.
    pub async fn store_file(
        &self,
        file_name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<UploadOutcome> {
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(Error::validation("file name must not be empty"));
        }
        if data.is_empty() {
            return Err(Error::validation("file is empty"));
        }
        if data.len() as u64 > self.cluster.max_file_size {
            return Err(Error::validation(format!(
                "file exceeds maximum size of {} bytes",
                self.cluster.max_file_size
            )));
        }

        // Writes take the strict path: every node must be online.
        if !self.health.all_online() {
            return Err(Error::ServiceDegraded(
                "writes require all storage nodes online".into(),
            ));
        }

        let file_id = FileId::new();
        let node_count = self.cluster.node_count();
        let sentinel = self.cluster.data_width() as u8;
        let plans = plan_stripes(data.len(), self.cluster.block_size, node_count);

        // Build every member up front: descriptors for the record, payloads
        // for dispatch.
        let mut blocks = Vec::new();
        let mut parity_refs = Vec::new();
        let mut stripe_payloads: Vec<(StripePlan, Vec<Bytes>, Bytes)> =
            Vec::with_capacity(plans.len());

        for plan in plans {
            let members: Vec<Bytes> = plan
                .data
                .iter()
                .map(|b| data.slice(b.offset..b.offset + b.len))
                .collect();
            let parity = Bytes::from(
                stripestore_parity::compute_parity(&members)
                    .map_err(Error::from)?,
            );

            for (block, payload) in plan.data.iter().zip(&members) {
                blocks.push(BlockRef {
                    node_id: block.node_id,
                    block_id: BlockId::data(file_id, plan.index, block.position).to_string(),
                    size: payload.len() as u64,
                    checksum: checksum(payload),
                    stripe_index: plan.index,
                    position: block.position,
                    is_parity: false,
                });
            }
            parity_refs.push(BlockRef {
                node_id: plan.parity_node,
                block_id: BlockId::parity(file_id, plan.index, sentinel).to_string(),
                size: parity.len() as u64,
                checksum: checksum(&parity),
                stripe_index: plan.index,
                position: sentinel,
                is_parity: true,
            });
            stripe_payloads.push((plan, members, parity));
        }
        blocks.extend(parity_refs);

        let record = FileRecord {
            file_id,
            file_name: file_name.to_string(),
            size: data.len() as u64,
            content_type: content_type.to_string(),
            uploaded_at: Utc::now(),
            blocks,
            complete: false,
        };

        // Durable intent first, so a crash mid-write reconciles at startup.
        self.catalog.begin(&record).await?;

        let result = self.dispatch_stripes(&record, stripe_payloads).await;
        if let Err(e) = result {
            warn!(file = file_name, "write failed, reclaiming blocks: {e}");
            self.reclaim_blocks(&record.blocks).await;
            self.catalog.abort(file_id, file_name).await?;
            return Err(Error::StorageFailure(format!("file write failed: {e}")));
        }

        let blocks_created = record.blocks.len();
        let nodes_used = record.nodes_used();
        self.catalog.publish(record).await?;
        info!(
            file = file_name,
            %file_id,
            blocks = blocks_created,
            "file stored"
        );
        Ok(UploadOutcome {
            file_id,
            blocks_created,
            nodes_used,
        })
    }

    /// Dispatch every stripe's D+1 stores; stripes are pipelined, members of
    /// one stripe go out concurrently.
    async fn dispatch_stripes(
        &self,
        record: &FileRecord,
        stripes: Vec<(StripePlan, Vec<Bytes>, Bytes)>,
    ) -> Result<()> {
        let by_block: HashMap<&str, &BlockRef> = record
            .blocks
            .iter()
            .map(|b| (b.block_id.as_str(), b))
            .collect();

        let stripe_futures = stripes.into_iter().map(|(plan, members, parity)| {
            let sentinel = self.cluster.data_width() as u8;
            let file_id = record.file_id;
            let by_block = &by_block;
            async move {
                let mut stores = Vec::with_capacity(members.len() + 1);
                for (block, payload) in plan.data.iter().zip(members) {
                    let block_id = BlockId::data(file_id, plan.index, block.position).to_string();
                    let reference = by_block[block_id.as_str()];
                    stores.push(self.store_member(reference, payload));
                }
                let parity_id = BlockId::parity(file_id, plan.index, sentinel).to_string();
                let parity_ref = by_block[parity_id.as_str()];
                stores.push(self.store_member(parity_ref, parity));

                for outcome in join_all(stores).await {
                    outcome?;
                }
                debug!(stripe = plan.index, "stripe committed");
                Ok::<(), Error>(())
            }
        });

        let mut results = stream::iter(stripe_futures).buffer_unordered(STRIPE_PIPELINE);
        while let Some(outcome) = results.next().await {
            outcome?;
        }
        Ok(())
    }

    async fn store_member(&self, reference: &BlockRef, payload: Bytes) -> Result<()> {
        let request = StoreBlock {
            block_id: reference.block_id.clone(),
            data: payload,
            checksum: reference.checksum.clone(),
            stripe_index: reference.stripe_index,
            position: reference.position,
            is_parity: reference.is_parity,
        };
        self.transport(reference.node_id)
            .store_block(&request)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Fetch a file, transparently reconstructing any single missing or
    /// corrupt member per stripe from parity.
    pub async fn fetch_file(&self, file_name: &str) -> Result<(FileRecord, Bytes)> {
        let record = self
            .catalog
            .get(file_name)
            .ok_or_else(|| Error::FileNotFound(file_name.to_string()))?;

        let stripes = group_by_stripe(&record);
        let stripe_futures = stripes
            .into_iter()
            .map(|(index, refs)| async move {
                let bytes = self.read_stripe(index, &refs).await?;
                Ok::<(u64, Vec<u8>), Error>((index, bytes))
            });

        let mut assembled: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
        let mut results = stream::iter(stripe_futures).buffer_unordered(STRIPE_PIPELINE);
        while let Some(outcome) = results.next().await {
            let (index, bytes) = outcome?;
            assembled.insert(index, bytes);
        }
        drop(results);

        // Reassemble in strict stripe order regardless of completion order.
        let mut out = BytesMut::with_capacity(record.size as usize);
        for (_, bytes) in assembled {
            out.extend_from_slice(&bytes);
        }
        out.truncate(record.size as usize);
        Ok((record, out.freeze()))
    }

    /// Read one stripe: fetch all data members in parallel, then repair at
    /// most one casualty from parity.
    async fn read_stripe(&self, stripe_index: u64, refs: &StripeRefs) -> Result<Vec<u8>> {
        let fetches = refs.data.iter().map(|r| self.fetch_member(r));
        let fetched: Vec<Option<Bytes>> = join_all(fetches).await;

        let missing: Vec<usize> = fetched
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.is_none().then_some(i))
            .collect();

        let mut members: Vec<Bytes> = Vec::with_capacity(refs.data.len());
        match missing.len() {
            0 => {
                for bytes in fetched {
                    members.push(bytes.expect("no member missing"));
                }
            }
            1 => {
                let lost = missing[0];
                let lost_ref = &refs.data[lost];
                info!(
                    stripe = stripe_index,
                    block = %lost_ref.block_id,
                    "reconstructing member from parity"
                );

                let parity_ref = refs.parity.as_ref().ok_or(Error::UnrecoverableLoss {
                    stripe_index,
                    missing: 1,
                })?;
                let parity = self
                    .fetch_member(parity_ref)
                    .await
                    .ok_or(Error::UnrecoverableLoss {
                        stripe_index,
                        missing: 2,
                    })?;

                let survivors: Vec<&Bytes> = fetched
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != lost)
                    .filter_map(|(_, b)| b.as_ref())
                    .collect();
                let mut recovered = stripestore_parity::recover_block(&survivors, &parity);
                recovered.truncate(lost_ref.size as usize);

                // Recovery must reproduce the recorded checksum exactly;
                // anything else means a second, silent casualty.
                if !verify_checksum(&recovered, &lost_ref.checksum) {
                    warn!(
                        stripe = stripe_index,
                        block = %lost_ref.block_id,
                        "reconstructed bytes fail checksum"
                    );
                    return Err(Error::UnrecoverableLoss {
                        stripe_index,
                        missing: 2,
                    });
                }

                let recovered = Bytes::from(recovered);
                for (i, bytes) in fetched.into_iter().enumerate() {
                    if i == lost {
                        members.push(recovered.clone());
                    } else {
                        members.push(bytes.expect("only one member missing"));
                    }
                }
            }
            n => {
                return Err(Error::UnrecoverableLoss {
                    stripe_index,
                    missing: n,
                });
            }
        }

        let mut out = Vec::with_capacity(members.iter().map(Bytes::len).sum());
        for member in members {
            out.extend_from_slice(&member);
        }
        Ok(out)
    }

    /// Fetch one member; any failure or checksum disagreement demotes it to
    /// missing. Transport-level retry already happened inside the client.
    async fn fetch_member(&self, reference: &BlockRef) -> Option<Bytes> {
        match self
            .transport(reference.node_id)
            .retrieve_block(&reference.block_id)
            .await
        {
            Ok(block) => {
                if verify_checksum(&block.data, &reference.checksum) {
                    Some(block.data)
                } else {
                    warn!(
                        block = %reference.block_id,
                        node = %reference.node_id,
                        "member fails catalog checksum, treating as missing"
                    );
                    None
                }
            }
            Err(e) => {
                warn!(
                    block = %reference.block_id,
                    node = %reference.node_id,
                    "member unavailable: {e}"
                );
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Delete path
    // ------------------------------------------------------------------

    /// Delete a file: best-effort parallel block deletes, then the catalog
    /// entry goes regardless. Survivors on unreachable nodes become orphans
    /// for node-side cleanup.
    pub async fn delete_file(&self, file_name: &str) -> Result<(FileRecord, usize)> {
        let record = self
            .catalog
            .get(file_name)
            .ok_or_else(|| Error::FileNotFound(file_name.to_string()))?;

        let deleted = self.reclaim_blocks(&record.blocks).await;
        let record = self.catalog.remove(file_name).await?;
        info!(
            file = file_name,
            deleted,
            total = record.blocks.len(),
            "file deleted"
        );
        Ok((record, deleted))
    }

    /// Best-effort deletion of a set of blocks; returns how many went away
    pub async fn reclaim_blocks(&self, blocks: &[BlockRef]) -> usize {
        let deletes = blocks.iter().map(|b| async move {
            match self.transport(b.node_id).delete_block(&b.block_id).await {
                Ok(()) => true,
                Err(e) if e.is_not_found() => true,
                Err(e) => {
                    warn!(block = %b.block_id, node = %b.node_id, "delete failed: {e}");
                    false
                }
            }
        });
        join_all(deletes).await.into_iter().filter(|ok| *ok).count()
    }

    // ------------------------------------------------------------------
    // Catalog queries
    // ------------------------------------------------------------------

    /// Full metadata record for one file
    pub fn file_info(&self, file_name: &str) -> Result<FileRecord> {
        self.catalog
            .get(file_name)
            .ok_or_else(|| Error::FileNotFound(file_name.to_string()))
    }

    /// All stored files
    #[must_use]
    pub fn list_files(&self) -> Vec<FileRecord> {
        self.catalog.list()
    }

    /// Substring search over file names; queries shorter than two
    /// characters are rejected
    pub fn search_files(&self, query: &str) -> Result<Vec<FileRecord>> {
        let query = query.trim();
        if query.chars().count() < 2 {
            return Err(Error::validation(
                "search query must be at least 2 characters",
            ));
        }
        Ok(self.catalog.search(query))
    }

    // ------------------------------------------------------------------
    // Recovery strategy
    // ------------------------------------------------------------------

    /// Consume the health event stream. There is no eager rebuild: a failure
    /// leaves the cluster degraded and reads repair through parity until the
    /// node returns; stale blocks on a returned node are checksum-gated on
    /// read and recomputed on demand if they fail.
    pub fn spawn_event_consumer(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.health.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    HealthEvent::NodeFailure { node_id, reason, .. } => {
                        warn!(
                            node = %node_id,
                            %reason,
                            "cluster degraded; reads will repair via parity"
                        );
                    }
                    HealthEvent::NodeRecovery { node_id, downtime } => {
                        info!(
                            node = %node_id,
                            downtime_secs = downtime.as_secs(),
                            "node back; stale blocks revalidate on read"
                        );
                    }
                }
            }
        })
    }
}

struct StripeRefs {
    /// Data members in position order
    data: Vec<BlockRef>,
    parity: Option<BlockRef>,
}

fn group_by_stripe(record: &FileRecord) -> BTreeMap<u64, StripeRefs> {
    let mut stripes: BTreeMap<u64, StripeRefs> = BTreeMap::new();
    for block in &record.blocks {
        let entry = stripes.entry(block.stripe_index).or_insert(StripeRefs {
            data: Vec::new(),
            parity: None,
        });
        if block.is_parity {
            entry.parity = Some(block.clone());
        } else {
            entry.data.push(block.clone());
        }
    }
    for refs in stripes.values_mut() {
        refs.data.sort_by_key(|b| b.position);
    }
    stripes
}
