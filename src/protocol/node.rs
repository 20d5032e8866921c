//! Per-node cooperation state machines.
//!
//! Every node plays two roles: the edge role (serving client gets and
//! writes from its cache wrapper) and the beacon role (directory authority
//! for the keys that hash to it). Handlers never hold a per-key lock
//! across a network round trip; invalidation fan-out, placement
//! deployment, and write-through run on scoped worker threads.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::cache::local::{CustomFunction, LocalCache};
use crate::cache::wrapper::CacheWrapper;
use crate::cluster::ClusterContext;
use crate::config::CoveredConfig;
use crate::directory::{DirectoryTable, LookupResult, MetadataNotify, WritelockStart};
use crate::error::{CoveredError, Result};
use crate::placement::{fast_path_wins, plan_placement};
use crate::popularity::aggregator::PopularityAggregator;
use crate::popularity::collected::{CollectedPopularity, FastPathHint};
use crate::popularity::edgeset::Edgeset;
use crate::protocol::cloud::CloudStore;
use crate::protocol::message::Message;
use crate::protocol::transport::MessageTransport;
use crate::types::{EdgeIndex, Key, ObjectSize, Value};
use crate::victim::dirinfo::DirinfoSet;
use crate::victim::sync::{SyncOutbox, VictimSync};
use crate::victim::syncset::VictimSyncset;
use crate::victim::tracker::VictimTracker;

/// Where a served get was satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HitSource {
    LocalHit,
    CooperativeHit,
    GlobalMiss,
}

#[derive(Clone, Debug)]
pub struct GetOutcome {
    pub value: Option<Value>,
    pub source: HitSource,
}

pub struct EdgeNode {
    idx: EdgeIndex,
    ctx: Arc<ClusterContext>,
    cfg: Arc<CoveredConfig>,
    cache: CacheWrapper,
    directory: DirectoryTable,
    victims: VictimTracker,
    aggregator: PopularityAggregator,
    outbox: SyncOutbox,
    transport: Arc<dyn MessageTransport>,
    cloud: Arc<dyn CloudStore>,
    deploying: Mutex<FxHashSet<Key>>,
}

impl EdgeNode {
    pub fn new(
        idx: EdgeIndex,
        ctx: Arc<ClusterContext>,
        cfg: Arc<CoveredConfig>,
        local: Box<dyn LocalCache>,
        transport: Arc<dyn MessageTransport>,
        cloud: Arc<dyn CloudStore>,
    ) -> Arc<Self> {
        assert!(idx < ctx.edge_count(), "edge index outside the cluster");
        let cache = CacheWrapper::new(idx, local, &cfg, ctx.weights);
        Arc::new(Self {
            idx,
            aggregator: PopularityAggregator::new(
                ctx.edge_count(),
                cfg.topk_edgecnt,
                cfg.popularity_aggregation_capacity_bytes,
                ctx.benefit,
            ),
            directory: DirectoryTable::new(idx),
            victims: VictimTracker::new(idx),
            outbox: SyncOutbox::new(),
            cache,
            ctx,
            cfg,
            transport,
            cloud,
            deploying: Mutex::new(FxHashSet::default()),
        })
    }

    pub fn edge_idx(&self) -> EdgeIndex {
        self.idx
    }

    pub fn cache(&self) -> &CacheWrapper {
        &self.cache
    }

    pub fn directory(&self) -> &DirectoryTable {
        &self.directory
    }

    pub fn victims(&self) -> &VictimTracker {
        &self.victims
    }

    pub fn aggregator(&self) -> &PopularityAggregator {
        &self.aggregator
    }

    pub fn context(&self) -> &ClusterContext {
        &self.ctx
    }

    // ---- piggyback plumbing ----

    fn local_victim_snapshot(&self) -> VictimSyncset {
        let victims = self.cache.get_local_synced_victim_cacheinfos();
        let beaconed: Vec<(Key, DirinfoSet)> = victims
            .iter()
            .filter(|v| self.ctx.beacon_of(&v.key) == self.idx)
            .map(|v| {
                (
                    v.key.clone(),
                    self.directory.cached_edges(&v.key).into_iter().collect(),
                )
            })
            .collect();
        VictimSyncset::complete(self.cache.cache_margin_bytes(), victims, beaconed)
    }

    fn outbound_sync(&self, dst: EdgeIndex) -> VictimSync {
        let snapshot = self.local_victim_snapshot();
        self.victims.refresh_local(snapshot.clone());
        self.outbox.prepare(dst, snapshot)
    }

    /// Pending stale-sync verdict to stamp on the next message to `dst`.
    fn sync_flags(&self, dst: EdgeIndex) -> bool {
        self.victims.take_needs_complete(dst)
    }

    /// Applies an incoming syncset; returns the verdict for the reply's
    /// `need_complete_sync` flag.
    fn apply_peer_sync(&self, from: EdgeIndex, sync: &VictimSync) -> bool {
        match self.victims.apply_syncset(from, sync, &self.ctx.weights) {
            Ok(()) => false,
            Err(err) => {
                warn!(node = self.idx, from, %err, "dropped victim syncset");
                true
            }
        }
    }

    fn note_peer_flag(&self, from: EdgeIndex, need_complete_sync: bool) {
        if need_complete_sync {
            self.outbox.mark_stale(from);
        }
    }

    /// Folds a piggybacked popularity report into the aggregator.
    fn fold_collected(
        &self,
        key: &Key,
        from: EdgeIndex,
        collected: CollectedPopularity,
        object_size: ObjectSize,
    ) {
        if collected.is_tracked {
            let is_cooperative_cached = self.directory.is_global_cached(key);
            self.aggregator.update(
                key,
                from,
                collected.local_uncached_popularity,
                is_cooperative_cached,
                object_size,
            );
        } else {
            self.aggregator.clear(key, from);
        }
    }

    fn send(self: &Arc<Self>, dst: EdgeIndex, message: Message) -> Result<Message> {
        if dst == self.idx {
            self.handle_message(self.idx, message)
        } else {
            self.transport.request(self.idx, dst, message)
        }
    }

    fn backoff(&self, base_ms: u64) {
        let base = base_ms.max(1);
        let jitter = rand::thread_rng().gen_range(0..=base);
        thread::sleep(Duration::from_millis(base + jitter));
    }

    // ---- client operations (edge role) ----

    /// Serves a read at this edge: local hit, cooperative hit via the
    /// directory, or global miss to the cloud.
    pub fn get(self: &Arc<Self>, key: &Key) -> Result<GetOutcome> {
        let lookup = self.cache.get(key, false);
        if lookup.hit() {
            let value = lookup.value.expect("valid hit carries a value");
            let value = (!value.is_deleted()).then_some(value);
            return Ok(GetOutcome {
                value,
                source: HitSource::LocalHit,
            });
        }
        self.cache.record_local_miss(key);

        let beacon = self.ctx.beacon_of(key);
        let mut attempt = 0u32;
        loop {
            let request = Message::DirectoryLookupRequest {
                key: key.clone(),
                collected: self.cache.collected_popularity(key),
                sync: self.outbound_sync(beacon),
                need_complete_sync: self.sync_flags(beacon),
            };
            let Message::DirectoryLookupResponse {
                is_being_written,
                dirinfo,
                fast_path_hint,
                sync,
                need_complete_sync,
                ..
            } = self.send(beacon, request)?
            else {
                return Err(CoveredError::UnexpectedMessage("directory lookup response"));
            };
            if beacon != self.idx {
                self.note_peer_flag(beacon, need_complete_sync);
                let _ = self.apply_peer_sync(beacon, &sync);
            }

            if is_being_written {
                attempt += 1;
                if attempt > self.cfg.lookup_max_retries {
                    return Err(CoveredError::Busy(format!("{key} is being written")));
                }
                self.backoff(self.cfg.lookup_backoff_ms);
                continue;
            }

            let is_global_cached = dirinfo.is_some();
            let mut source = HitSource::GlobalMiss;
            let mut fetched: Option<Value> = None;
            let mut deleted = false;

            if let Some(info) = dirinfo {
                if info.target_edge != self.idx {
                    match self.redirected_get(key, info.target_edge) {
                        Ok(Some((value, was_deleted))) => {
                            source = HitSource::CooperativeHit;
                            deleted = was_deleted;
                            if !was_deleted {
                                fetched = value;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(node = self.idx, %key, %err, "cooperative fetch failed")
                        }
                    }
                }
            }

            if fetched.is_none() && !deleted {
                fetched = self.cloud.get(key).filter(|v| !v.is_deleted());
            }

            match &fetched {
                Some(value) => {
                    if self.cache.update_if_invalid_for_getrsp(key, value.clone()) {
                        self.directory_update(key, true, value.size());
                    } else if !self.cache.is_locally_cached(key) {
                        self.consider_read_admission(key, value, fast_path_hint, is_global_cached);
                    }
                }
                None => {
                    if deleted {
                        self.cache.remove_if_invalid_for_getrsp(key);
                    }
                }
            }

            return Ok(GetOutcome {
                value: fetched,
                source,
            });
        }
    }

    pub fn put(self: &Arc<Self>, key: &Key, data: impl Into<Bytes>) -> Result<()> {
        self.write(key, Some(Value::new(data)))
    }

    pub fn del(self: &Arc<Self>, key: &Key) -> Result<()> {
        self.write(key, None)
    }

    /// Write path: writelock, parallel local apply + cloud write-through,
    /// release, then placement fan-out when the beacon planned one.
    fn write(self: &Arc<Self>, key: &Key, value: Option<Value>) -> Result<()> {
        let beacon = self.ctx.beacon_of(key);
        let mut attempt = 0u32;
        loop {
            let request = Message::AcquireWritelockRequest {
                key: key.clone(),
                collected: self.cache.collected_popularity(key),
                sync: self.outbound_sync(beacon),
                need_complete_sync: self.sync_flags(beacon),
            };
            let Message::AcquireWritelockResponse {
                granted,
                sync,
                need_complete_sync,
                ..
            } = self.send(beacon, request)?
            else {
                return Err(CoveredError::UnexpectedMessage("acquire writelock response"));
            };
            if beacon != self.idx {
                self.note_peer_flag(beacon, need_complete_sync);
                let _ = self.apply_peer_sync(beacon, &sync);
            }
            if granted {
                break;
            }
            attempt += 1;
            if attempt > self.cfg.writelock_max_retries {
                return Err(CoveredError::Busy(format!("writelock on {key}")));
            }
            self.backoff(self.cfg.writelock_backoff_ms);
        }

        let object_size = value.as_ref().map_or(0, Value::size);
        let mut evicted_victims = Vec::new();
        let writer_cached = thread::scope(|s| {
            let cloud_task = s.spawn(|| match &value {
                Some(v) => self.cloud.put(key, v.clone()),
                None => self.cloud.del(key),
            });
            let local = match &value {
                // Write-allocate: a fresh write leaves the writer holding
                // the object, so the directory can hand it out as a sharer.
                Some(v) => {
                    self.cache.update(key, v.clone())
                        || match self.cache.admit(key, v.clone(), true) {
                            Ok(evicted) => {
                                evicted_victims = evicted;
                                true
                            }
                            Err(_) => false,
                        }
                }
                None => self.cache.remove(key),
            };
            cloud_task.join().expect("cloud write-through worker");
            local
        });
        self.report_evictions(evicted_victims);

        let request = Message::ReleaseWritelockRequest {
            key: key.clone(),
            writer_cached,
            object_size,
            collected: self.cache.collected_popularity(key),
            sync: self.outbound_sync(beacon),
            need_complete_sync: self.sync_flags(beacon),
        };
        let Message::ReleaseWritelockResponse {
            placement,
            sync,
            need_complete_sync,
            ..
        } = self.send(beacon, request)?
        else {
            return Err(CoveredError::UnexpectedMessage("release writelock response"));
        };
        if beacon != self.idx {
            self.note_peer_flag(beacon, need_complete_sync);
            let _ = self.apply_peer_sync(beacon, &sync);
        }

        if let (Some(edgeset), Some(value)) = (placement, value) {
            self.deploy_to_edges(key, &value, &edgeset);
        }
        Ok(())
    }

    fn redirected_get(
        self: &Arc<Self>,
        key: &Key,
        target: EdgeIndex,
    ) -> Result<Option<(Option<Value>, bool)>> {
        let request = Message::RedirectedGetRequest {
            key: key.clone(),
            sync: self.outbound_sync(target),
            need_complete_sync: self.sync_flags(target),
        };
        let Message::RedirectedGetResponse {
            cached,
            valid,
            deleted,
            value,
            sync,
            need_complete_sync,
            ..
        } = self.send(target, request)?
        else {
            return Err(CoveredError::UnexpectedMessage("redirected get response"));
        };
        self.note_peer_flag(target, need_complete_sync);
        let _ = self.apply_peer_sync(target, &sync);
        if cached && valid {
            Ok(Some((value, deleted)))
        } else {
            Ok(None)
        }
    }

    /// Read-path admission is decided by the fast-path hint: without one
    /// the key is tracked at the beacon, which owns the placement decision
    /// for it.
    fn consider_read_admission(
        self: &Arc<Self>,
        key: &Key,
        value: &Value,
        hint: Option<FastPathHint>,
        is_global_cached: bool,
    ) {
        let Some(hint) = hint else {
            return;
        };
        let own = self.cache.collected_popularity(key);
        if !fast_path_wins(
            own.local_uncached_popularity,
            is_global_cached,
            hint.sum_local_uncached_popularity,
            hint.smallest_max_admission_benefit,
            &self.ctx.benefit,
        ) {
            debug!(node = self.idx, %key, "fast-path placement declined");
            return;
        }
        match self.cache.admit(key, value.clone(), true) {
            Ok(evicted) => {
                self.directory_update(key, true, value.size());
                self.report_evictions(evicted);
            }
            Err(err) => debug!(node = self.idx, %key, %err, "read-path admission rejected"),
        }
    }

    /// Registers or withdraws this edge in a key's directory at its beacon.
    fn directory_update(self: &Arc<Self>, key: &Key, is_admit: bool, object_size: ObjectSize) {
        let beacon = self.ctx.beacon_of(key);
        let request = Message::DirectoryUpdateRequest {
            key: key.clone(),
            is_admit,
            object_size,
            collected: self.cache.collected_popularity(key),
            sync: self.outbound_sync(beacon),
            need_complete_sync: self.sync_flags(beacon),
        };
        match self.send(beacon, request) {
            Ok(Message::DirectoryUpdateResponse {
                accepted,
                need_complete_sync,
                ..
            }) => {
                if beacon != self.idx {
                    self.note_peer_flag(beacon, need_complete_sync);
                }
                if is_admit && !accepted {
                    // A write raced our admission; the copy may be stale.
                    self.cache.invalidate_key_for_local_cached_object(key);
                }
            }
            Ok(_) => warn!(node = self.idx, %key, "unexpected directory update response"),
            Err(err) => warn!(node = self.idx, %key, %err, "directory update failed"),
        }
    }

    /// Tells every victim's beacon that this edge no longer holds it.
    fn report_evictions(self: &Arc<Self>, evicted: Vec<(Key, Value)>) {
        for (victim_key, value) in evicted {
            self.directory_update(&victim_key, false, value.size());
        }
    }

    // ---- message handling ----

    pub fn handle_message(self: &Arc<Self>, from: EdgeIndex, message: Message) -> Result<Message> {
        match message {
            Message::DirectoryLookupRequest {
                key,
                collected,
                sync,
                need_complete_sync,
            } => self.on_directory_lookup(from, key, collected, sync, need_complete_sync),
            Message::DirectoryUpdateRequest {
                key,
                is_admit,
                object_size,
                collected,
                sync,
                need_complete_sync,
            } => self.on_directory_update(
                from,
                key,
                is_admit,
                object_size,
                collected,
                sync,
                need_complete_sync,
            ),
            Message::MetadataUpdateRequest {
                key,
                is_cooperative_cached,
            } => self.on_metadata_update(key, is_cooperative_cached),
            Message::AcquireWritelockRequest {
                key,
                collected,
                sync,
                need_complete_sync,
            } => self.on_acquire_writelock(from, key, collected, sync, need_complete_sync),
            Message::FinishBlockRequest { key } => Ok(Message::FinishBlockResponse { key }),
            Message::InvalidationRequest {
                key,
                sync,
                need_complete_sync,
            } => self.on_invalidation(from, key, sync, need_complete_sync),
            Message::ReleaseWritelockRequest {
                key,
                writer_cached,
                object_size,
                collected,
                sync,
                need_complete_sync,
            } => self.on_release_writelock(
                from,
                key,
                writer_cached,
                object_size,
                collected,
                sync,
                need_complete_sync,
            ),
            Message::RedirectedGetRequest {
                key,
                sync,
                need_complete_sync,
            } => self.on_redirected_get(from, key, sync, need_complete_sync),
            Message::PlacementNotifyRequest {
                key,
                value,
                is_valid,
                sync,
                need_complete_sync,
            } => self.on_placement_notify(from, key, value, is_valid, sync, need_complete_sync),
            Message::VictimFetchRequest { key, required_size } => {
                self.on_victim_fetch(key, required_size)
            }
            _ => Err(CoveredError::UnexpectedMessage("not a request")),
        }
    }

    fn on_directory_lookup(
        self: &Arc<Self>,
        from: EdgeIndex,
        key: Key,
        collected: CollectedPopularity,
        sync: VictimSync,
        need_complete_sync: bool,
    ) -> Result<Message> {
        self.note_peer_flag(from, need_complete_sync);
        let stale = self.apply_peer_sync(from, &sync);
        // The hint depends on whether selective aggregation held a slot
        // before this request's own report is folded in.
        let had_slot = self.aggregator.contains(&key);
        self.fold_collected(&key, from, collected, 0);

        let (is_being_written, dirinfo) = match self.directory.lookup(&key, from) {
            LookupResult::BeingWritten => (true, None),
            LookupResult::Valid(info) => (false, Some(info)),
            LookupResult::Missing => (false, None),
        };
        let fast_path_hint = if !is_being_written && self.ctx.fast_path_enabled && !had_slot {
            Some(FastPathHint {
                sum_local_uncached_popularity: 0.0,
                smallest_max_admission_benefit: self.aggregator.smallest_max_admission_benefit(),
            })
        } else {
            None
        };
        self.maybe_deploy_background(&key);

        let need = stale || self.sync_flags(from);
        Ok(Message::DirectoryLookupResponse {
            sync: self.outbound_sync(from),
            key,
            is_being_written,
            dirinfo,
            fast_path_hint,
            need_complete_sync: need,
        })
    }

    fn on_directory_update(
        self: &Arc<Self>,
        from: EdgeIndex,
        key: Key,
        is_admit: bool,
        object_size: ObjectSize,
        collected: CollectedPopularity,
        sync: VictimSync,
        need_complete_sync: bool,
    ) -> Result<Message> {
        self.note_peer_flag(from, need_complete_sync);
        let stale = self.apply_peer_sync(from, &sync);
        let (accepted, notifies) = if is_admit {
            self.directory.admit(&key, from)
        } else {
            (true, self.directory.evict(&key, from))
        };
        if accepted {
            self.victims.update_synced_victim_dirinfo(&key, is_admit, from);
        }
        self.fold_collected(&key, from, collected, object_size);
        self.send_metadata_updates(&key, &notifies);

        let need = stale || self.sync_flags(from);
        Ok(Message::DirectoryUpdateResponse {
            key,
            accepted,
            need_complete_sync: need,
        })
    }

    fn send_metadata_updates(self: &Arc<Self>, key: &Key, notifies: &[MetadataNotify]) {
        for notify in notifies {
            if notify.target == self.idx {
                self.cache
                    .local_cache()
                    .invoke_custom_function(&CustomFunction::SetCooperativeCached {
                        key: key.clone(),
                        cached: notify.is_cooperative_cached,
                    });
                continue;
            }
            let message = Message::MetadataUpdateRequest {
                key: key.clone(),
                is_cooperative_cached: notify.is_cooperative_cached,
            };
            if let Err(err) = self.transport.request(self.idx, notify.target, message) {
                warn!(node = self.idx, %key, target = notify.target, %err, "metadata update failed");
            }
        }
    }

    fn on_metadata_update(&self, key: Key, is_cooperative_cached: bool) -> Result<Message> {
        self.cache
            .local_cache()
            .invoke_custom_function(&CustomFunction::SetCooperativeCached {
                key: key.clone(),
                cached: is_cooperative_cached,
            });
        Ok(Message::MetadataUpdateResponse { key })
    }

    fn on_acquire_writelock(
        self: &Arc<Self>,
        from: EdgeIndex,
        key: Key,
        collected: CollectedPopularity,
        sync: VictimSync,
        need_complete_sync: bool,
    ) -> Result<Message> {
        self.note_peer_flag(from, need_complete_sync);
        let stale = self.apply_peer_sync(from, &sync);
        self.fold_collected(&key, from, collected, 0);

        let granted = match self.directory.begin_writelock(&key, from) {
            WritelockStart::Granted => true,
            WritelockStart::Busy => false,
            WritelockStart::Blocking(targets) => self.run_invalidation_round(&key, from, &targets),
        };

        let need = stale || self.sync_flags(from);
        Ok(Message::AcquireWritelockResponse {
            sync: self.outbound_sync(from),
            key,
            granted,
            need_complete_sync: need,
        })
    }

    /// Delivers invalidations to every pending sharer in parallel and
    /// drives the directory's Blocking state with the acks. Any sharer
    /// that stays unreachable past the retry budget aborts the
    /// acquisition.
    fn run_invalidation_round(
        self: &Arc<Self>,
        key: &Key,
        holder: EdgeIndex,
        targets: &[EdgeIndex],
    ) -> bool {
        let results: Vec<(EdgeIndex, bool)> = thread::scope(|s| {
            let handles: Vec<_> = targets
                .iter()
                .map(|&target| {
                    let node = Arc::clone(self);
                    let key = key.clone();
                    s.spawn(move || (target, node.invalidate_one(&key, target)))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("invalidation worker"))
                .collect()
        });

        let mut granted = false;
        let mut all_acked = true;
        for (target, acked) in results {
            if acked {
                granted = self.directory.ack_invalidation(key, holder, target);
            } else {
                all_acked = false;
            }
        }
        if !all_acked {
            self.directory.abort_writelock(key, holder);
            warn!(beacon = self.idx, %key, holder, "writelock acquisition aborted");
            return false;
        }
        debug_assert!(granted, "all acks collected but lock not granted");
        granted
    }

    fn invalidate_one(self: &Arc<Self>, key: &Key, target: EdgeIndex) -> bool {
        for attempt in 0..=self.cfg.invalidation_max_retries {
            if attempt > 0 {
                thread::sleep(Duration::from_millis(self.cfg.invalidation_timeout_ms));
            }
            let message = Message::InvalidationRequest {
                key: key.clone(),
                sync: self.outbound_sync(target),
                need_complete_sync: self.sync_flags(target),
            };
            match self.send(target, message) {
                Ok(Message::InvalidationResponse {
                    need_complete_sync, ..
                }) => {
                    self.note_peer_flag(target, need_complete_sync);
                    return true;
                }
                Ok(_) => return false,
                Err(err) => {
                    warn!(beacon = self.idx, %key, target, attempt, %err, "invalidation attempt failed");
                }
            }
        }
        false
    }

    fn on_invalidation(
        &self,
        from: EdgeIndex,
        key: Key,
        sync: VictimSync,
        need_complete_sync: bool,
    ) -> Result<Message> {
        self.note_peer_flag(from, need_complete_sync);
        let stale = self.apply_peer_sync(from, &sync);
        self.cache.invalidate_key_for_local_cached_object(&key);
        let need = stale || self.sync_flags(from);
        Ok(Message::InvalidationResponse {
            key,
            need_complete_sync: need,
        })
    }

    fn on_release_writelock(
        self: &Arc<Self>,
        from: EdgeIndex,
        key: Key,
        writer_cached: bool,
        object_size: ObjectSize,
        collected: CollectedPopularity,
        sync: VictimSync,
        need_complete_sync: bool,
    ) -> Result<Message> {
        self.note_peer_flag(from, need_complete_sync);
        let stale = self.apply_peer_sync(from, &sync);
        self.directory.release_writelock(&key, from, writer_cached);
        self.fold_collected(&key, from, collected, object_size);

        let writer_popularity = collected
            .is_tracked
            .then_some(collected.local_uncached_popularity)
            .unwrap_or(0.0);
        let placement =
            self.plan_and_commit(&key, object_size, Some((from, writer_popularity)));

        let need = stale || self.sync_flags(from);
        Ok(Message::ReleaseWritelockResponse {
            sync: self.outbound_sync(from),
            key,
            placement,
            need_complete_sync: need,
        })
    }

    /// Plans a placement, lazily fetching extra victims once when the
    /// tracked ones cannot cover the object, and commits the winning plan
    /// against the tracker and the aggregator.
    fn plan_and_commit(
        self: &Arc<Self>,
        key: &Key,
        object_size: ObjectSize,
        writer: Option<(EdgeIndex, f32)>,
    ) -> Option<Edgeset> {
        if object_size == 0 {
            return None;
        }
        let cached = self.directory.cached_edges(key);
        let is_global_cached = !cached.is_empty();
        let aggregated = self.aggregator.snapshot(key);
        let mut plan = plan_placement(
            key,
            object_size,
            aggregated.as_ref(),
            writer,
            &cached,
            is_global_cached,
            &self.victims,
            &self.ctx.weights,
            &self.ctx.benefit,
        );
        if plan.need_more {
            for edge in plan.fetch_edgeset.iter() {
                let request = Message::VictimFetchRequest {
                    key: key.clone(),
                    required_size: u64::from(object_size),
                };
                match self.send(edge, request) {
                    Ok(Message::VictimFetchResponse { syncset, .. }) => {
                        match (syncset.complete_margin_bytes(), syncset.complete_victims()) {
                            (Ok(margin), Ok(infos)) => self.victims.note_fetched_victims(
                                edge,
                                infos,
                                margin,
                                &self.ctx.weights,
                            ),
                            _ => warn!(beacon = self.idx, %key, edge, "malformed victim fetch response"),
                        }
                    }
                    Ok(_) => warn!(beacon = self.idx, %key, edge, "unexpected victim fetch response"),
                    Err(err) => {
                        warn!(beacon = self.idx, %key, edge, %err, "victim fetch failed")
                    }
                }
            }
            plan = plan_placement(
                key,
                object_size,
                aggregated.as_ref(),
                writer,
                &cached,
                is_global_cached,
                &self.victims,
                &self.ctx.weights,
                &self.ctx.benefit,
            );
        }
        if plan.is_empty() {
            return None;
        }
        self.victims
            .remove_victims_for_placement(&plan.peredge_victim_keys());
        self.aggregator.clear_for_placement(key, &plan.edgeset);
        debug!(beacon = self.idx, %key, placement = %plan.edgeset, "committed placement");
        Some(plan.edgeset)
    }

    fn on_redirected_get(
        &self,
        from: EdgeIndex,
        key: Key,
        sync: VictimSync,
        need_complete_sync: bool,
    ) -> Result<Message> {
        self.note_peer_flag(from, need_complete_sync);
        let stale = self.apply_peer_sync(from, &sync);
        let lookup = self.cache.get(&key, true);
        let (deleted, value) = match lookup.value {
            Some(v) if v.is_deleted() => (true, None),
            Some(v) => (false, Some(v)),
            None => (false, None),
        };
        let need = stale || self.sync_flags(from);
        Ok(Message::RedirectedGetResponse {
            sync: self.outbound_sync(from),
            key,
            cached: lookup.cached,
            valid: lookup.valid,
            deleted,
            value,
            need_complete_sync: need,
        })
    }

    fn on_placement_notify(
        self: &Arc<Self>,
        from: EdgeIndex,
        key: Key,
        value: Value,
        is_valid: bool,
        sync: VictimSync,
        need_complete_sync: bool,
    ) -> Result<Message> {
        self.note_peer_flag(from, need_complete_sync);
        let stale = self.apply_peer_sync(from, &sync);
        let size = value.size();
        let admitted = match self.cache.admit(&key, value, is_valid) {
            Ok(evicted) => {
                self.report_evictions(evicted);
                true
            }
            Err(err) => {
                debug!(node = self.idx, %key, %err, "placement admission rejected");
                false
            }
        };
        if admitted && is_valid {
            self.directory_update(&key, true, size);
        }
        let need = stale || self.sync_flags(from);
        Ok(Message::PlacementNotifyResponse {
            collected: self.cache.collected_popularity(&key),
            key,
            admitted,
            need_complete_sync: need,
        })
    }

    fn on_victim_fetch(&self, key: Key, required_size: u64) -> Result<Message> {
        let mut infos = Vec::new();
        let has_enough = self
            .cache
            .fetch_victim_cacheinfos_for_required_size(&mut infos, required_size);
        let syncset =
            VictimSyncset::complete(self.cache.cache_margin_bytes(), infos, Vec::new());
        Ok(Message::VictimFetchResponse {
            key,
            has_enough,
            syncset,
        })
    }

    // ---- background placement deployment ----

    /// After popularity updates, the beacon may deploy a placement for a
    /// hot key without waiting for a write.
    fn maybe_deploy_background(self: &Arc<Self>, key: &Key) {
        if !self.cfg.background_placement_enabled {
            return;
        }
        let Some(aup) = self.aggregator.snapshot(key) else {
            return;
        };
        if aup.object_size() == 0 {
            return;
        }
        if !self.directory.write_lock_state(key).is_unlocked() {
            return;
        }
        let is_global_cached = self.directory.is_global_cached(key);
        let benefit = aup.max_admission_benefit(is_global_cached, &self.ctx.benefit);
        if benefit <= self.ctx.benefit.min_admission_benefit.max(0.0) {
            return;
        }
        if !self.deploying.lock().insert(key.clone()) {
            return;
        }
        let node = Arc::clone(self);
        let key = key.clone();
        thread::spawn(move || {
            node.background_deploy(&key);
            node.deploying.lock().remove(&key);
        });
    }

    fn background_deploy(self: &Arc<Self>, key: &Key) {
        let Some(value) = self.hybrid_fetch(key) else {
            debug!(beacon = self.idx, %key, "background placement found no value");
            return;
        };
        let Some(edgeset) = self.plan_and_commit(key, value.size(), None) else {
            return;
        };
        debug!(beacon = self.idx, %key, placement = %edgeset, "deploying background placement");
        self.deploy_to_edges(key, &value, &edgeset);
    }

    /// Hybrid data fetching: try a cooperative copy first, fall back to
    /// the authoritative cloud copy.
    fn hybrid_fetch(self: &Arc<Self>, key: &Key) -> Option<Value> {
        if let LookupResult::Valid(info) = self.directory.lookup(key, self.idx) {
            if info.target_edge != self.idx {
                if let Ok(Some((Some(value), false))) = self.redirected_get(key, info.target_edge)
                {
                    return Some(value);
                }
            }
        }
        self.cloud.get(key).filter(|v| !v.is_deleted())
    }

    /// Pushes the value to every planned placement edge; each edge admits
    /// and registers itself in the directory.
    fn deploy_to_edges(self: &Arc<Self>, key: &Key, value: &Value, edgeset: &Edgeset) {
        thread::scope(|s| {
            for edge in edgeset.iter() {
                let node = Arc::clone(self);
                let key = key.clone();
                let value = value.clone();
                s.spawn(move || {
                    let message = Message::PlacementNotifyRequest {
                        key: key.clone(),
                        value,
                        is_valid: true,
                        sync: node.outbound_sync(edge),
                        need_complete_sync: node.sync_flags(edge),
                    };
                    match node.send(edge, message) {
                        Ok(Message::PlacementNotifyResponse {
                            need_complete_sync,
                            admitted,
                            ..
                        }) => {
                            node.note_peer_flag(edge, need_complete_sync);
                            if !admitted {
                                debug!(node = node.idx, %key, edge, "placement declined");
                            }
                        }
                        Ok(_) => warn!(node = node.idx, %key, edge, "unexpected placement response"),
                        Err(err) => {
                            warn!(node = node.idx, %key, edge, %err, "placement notify failed")
                        }
                    }
                });
            }
        });
    }
}
