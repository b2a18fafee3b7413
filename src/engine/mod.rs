mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{compute_saturated_spans, free_slots, merge_overlapping, subtract_intervals};
pub use error::EngineError;

pub(crate) use conflict::now_ms;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::authz::GrantCache;
use crate::directory::Directory;
use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking engine for one organization: resource catalog, booking
/// ledger, identity directory, and the WAL that makes all of it durable.
pub struct Engine {
    pub state: DashMap<Ulid, SharedResourceState>,
    pub(crate) directory: Directory,
    pub(crate) grant_cache: GrantCache,
    /// Serializes directory mutations (admin plane) across check→WAL→apply.
    pub(super) directory_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → resource id.
    pub(super) booking_to_resource: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a ResourceState (no locking — caller holds the lock).
fn apply_to_resource(rs: &mut ResourceState, event: &Event, booking_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated {
            id,
            resource_id,
            user_id,
            span,
            status,
            expires_at,
        } => {
            rs.insert_booking(Booking {
                id: *id,
                user_id: *user_id,
                span: *span,
                status: *status,
                expires_at: *expires_at,
            });
            booking_map.insert(*id, *resource_id);
        }
        Event::BookingConfirmed { id, .. } => {
            if let Some(booking) = rs.booking_mut(*id) {
                booking.status = BookingStatus::Confirmed;
                booking.expires_at = None;
            }
        }
        Event::BookingRescheduled { id, span, .. } => {
            // Remove + reinsert to keep the vector sorted by start.
            if let Some(mut booking) = rs.remove_booking(*id) {
                booking.span = *span;
                rs.insert_booking(booking);
            }
        }
        Event::BookingCancelled { id, .. } => {
            // Row retained for audit; the index entry stays so repeated
            // cancels resolve to the same resource.
            if let Some(booking) = rs.booking_mut(*id) {
                booking.status = BookingStatus::Cancelled;
                booking.expires_at = None;
            }
        }
        Event::ResourceUpdated {
            name,
            capacity,
            window,
            active,
            ..
        } => {
            rs.name = name.clone();
            rs.capacity = *capacity;
            rs.window = *window;
            rs.active = *active;
        }
        // ResourceCreated is handled at the DashMap level; identity events
        // belong to the directory.
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            directory: Directory::new(),
            grant_cache: GrantCache::new(),
            directory_lock: Mutex::new(()),
            wal_tx,
            booking_to_resource: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy org
        // creation).
        for event in &events {
            match event {
                Event::UserRegistered { .. }
                | Event::UserDeactivated { .. }
                | Event::GroupCreated { .. }
                | Event::GroupDeleted { .. }
                | Event::MemberAdded { .. }
                | Event::MemberRemoved { .. }
                | Event::PermissionDefined { .. }
                | Event::GrantAdded { .. }
                | Event::GrantRevoked { .. } => {
                    engine.directory.apply_event(event);
                }
                Event::ResourceCreated { id, name, category, capacity, window } => {
                    let rs = ResourceState::new(*id, name.clone(), category.clone(), *capacity, *window);
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                other => {
                    if let Some(resource_id) = event_resource_id(other)
                        && let Some(entry) = engine.state.get(&resource_id) {
                            let rs_arc = entry.clone();
                            let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                            apply_to_resource(&mut guard, other, &engine.booking_to_resource);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn resource_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_resource.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call. Caller holds the resource write lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.booking_to_resource);
        Ok(())
    }

    /// WAL-append + apply to the directory. Caller holds the directory lock.
    pub(super) async fn persist_directory(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.directory.apply_event(event);
        Ok(())
    }

    /// Lookup booking → resource, get resource, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .resource_for_booking(booking_id)
            .ok_or(EngineError::UnknownBooking(*booking_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::UnknownResource(resource_id))?;
        let guard = rs.write_owned().await;
        Ok((resource_id, guard))
    }
}

/// Extract the resource_id from a ledger/catalog event.
fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { resource_id, .. }
        | Event::BookingConfirmed { resource_id, .. }
        | Event::BookingRescheduled { resource_id, .. }
        | Event::BookingCancelled { resource_id, .. } => Some(*resource_id),
        Event::ResourceUpdated { id, .. } => Some(*id),
        _ => None,
    }
}
