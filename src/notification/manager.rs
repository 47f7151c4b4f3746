//! Notification queue and lifecycle timers.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CloseHandler, Notification, NotificationConfig, NotificationItem, NotificationState};
use crate::error::ErrorDetails;
use crate::subscription::{lock, SubscriptionId, Subscribers};

/// Called with an oldest-first snapshot of every live item after each change.
pub type ChangeCallback = dyn Fn(&[NotificationItem]) + Send + Sync;

struct Entry {
    item: NotificationItem,
    on_close: Option<CloseHandler>,
    /// Bumped whenever the entry's content or timer changes; timers carry the
    /// generation they were scheduled for and do nothing if it moved on.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl Entry {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct Queue {
    entries: Vec<Entry>,
    next_generation: u64,
}

impl Queue {
    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.item.id == id)
    }

    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn snapshot(&self) -> Vec<NotificationItem> {
        self.entries.iter().map(|e| e.item.clone()).collect()
    }
}

struct Inner {
    config: NotificationConfig,
    queue: Mutex<Queue>,
    listeners: Mutex<Subscribers<ChangeCallback>>,
    next_id: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for entry in &mut lock(&self.queue).entries {
            entry.cancel_timer();
        }
    }
}

/// Owns the live notification queue. Cheap to clone; clones share the queue.
///
/// Timers run on the ambient tokio runtime. Without one, auto-dismiss is
/// skipped and dismissed items are removed immediately.
#[derive(Clone)]
pub struct NotificationManager {
    inner: Arc<Inner>,
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new(NotificationConfig::default())
    }
}

impl fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationManager")
            .field("config", &self.inner.config)
            .field("len", &self.len())
            .finish()
    }
}

impl NotificationManager {
    pub fn new(config: NotificationConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                queue: Mutex::new(Queue::default()),
                listeners: Mutex::new(Subscribers::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.inner.config
    }

    /// Registers a change callback.
    pub fn subscribe(
        &self,
        callback: impl Fn(&[NotificationItem]) + Send + Sync + 'static,
    ) -> SubscriptionId {
        lock(&self.inner.listeners).insert(Arc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.inner.listeners).remove(id)
    }

    /// Oldest-first snapshot of every live item, including those animating out.
    pub fn items(&self) -> Vec<NotificationItem> {
        lock(&self.inner.queue).snapshot()
    }

    /// The most recent `max_visible` items, oldest first.
    pub fn visible_items(&self) -> Vec<NotificationItem> {
        let mut items = self.items();
        let skip = items.len().saturating_sub(self.inner.config.max_visible);
        items.drain(..skip);
        items
    }

    pub fn get(&self, id: &str) -> Option<NotificationItem> {
        let queue = lock(&self.inner.queue);
        queue.position(id).map(|index| queue.entries[index].item.clone())
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.queue).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shows a notification and returns its id.
    ///
    /// If an item with the same id is live, its content is replaced in place
    /// and its timer restarts.
    pub fn enqueue(&self, request: Notification) -> String {
        let persistent = request.is_persistent();
        let Notification {
            id,
            kind,
            title,
            message,
            actions,
            duration,
            dismissible,
            on_close,
            ..
        } = request;

        let id = id.unwrap_or_else(|| self.generate_id());
        let expires_after = if persistent {
            None
        } else {
            Some(duration.unwrap_or_else(|| self.inner.config.duration_for(kind)))
        };

        let (snapshot, evicted) = {
            let mut queue = lock(&self.inner.queue);
            let generation = queue.bump();

            let index = match queue.position(&id) {
                Some(index) => {
                    let entry = &mut queue.entries[index];
                    entry.cancel_timer();
                    entry.generation = generation;
                    entry.on_close = on_close;
                    let item = &mut entry.item;
                    item.kind = kind;
                    item.title = title;
                    item.message = message;
                    item.actions = actions;
                    item.expires_after = expires_after;
                    item.persistent = persistent;
                    item.dismissible = dismissible;
                    debug!(id = %id, "Replaced notification in place");
                    index
                }
                None => {
                    let item = NotificationItem {
                        id: id.clone(),
                        kind,
                        title,
                        message,
                        actions,
                        created_at: Utc::now(),
                        expires_after,
                        persistent,
                        dismissible,
                        visible: false,
                        state: NotificationState::Created,
                    };
                    queue.entries.push(Entry {
                        item,
                        on_close,
                        generation,
                        timer: None,
                    });
                    queue.entries.len() - 1
                }
            };

            let item = &mut queue.entries[index].item;
            item.visible = true;
            item.state = NotificationState::Visible;

            if let Some(after) = expires_after {
                let timer = self.schedule(after, {
                    let id = id.clone();
                    move |manager| {
                        manager.expire(&id, generation);
                    }
                });
                if timer.is_none() {
                    warn!(id = %id, "No tokio runtime available; notification will not auto-dismiss");
                }
                queue.entries[index].timer = timer;
            }

            let evicted = self.evict_overflow(&mut queue);
            (queue.snapshot(), evicted)
        };

        for (evicted_id, on_close) in evicted {
            if let Some(on_close) = on_close {
                on_close(&evicted_id);
            }
        }
        self.publish(&snapshot);
        id
    }

    pub fn success(&self, message: impl Into<String>) -> String {
        self.enqueue(Notification::success(message))
    }

    pub fn error(&self, message: impl Into<String>) -> String {
        self.enqueue(Notification::error(message))
    }

    pub fn warning(&self, message: impl Into<String>) -> String {
        self.enqueue(Notification::warning(message))
    }

    pub fn info(&self, message: impl Into<String>) -> String {
        self.enqueue(Notification::info(message))
    }

    /// Shows a classified error. Critical errors never auto-dismiss.
    pub fn notify_error(&self, details: &ErrorDetails) -> String {
        self.enqueue(Notification::from_error(details))
    }

    /// Starts the exit of a visible item, cancelling its auto-dismiss timer.
    ///
    /// Returns false if the item is unknown or already leaving.
    pub fn dismiss(&self, id: &str) -> bool {
        let snapshot = {
            let mut queue = lock(&self.inner.queue);
            let Some(index) = queue.position(id) else {
                return false;
            };
            if queue.entries[index].item.state != NotificationState::Visible {
                return false;
            }
            queue.entries[index].cancel_timer();
            self.begin_exit(&mut queue, index);
            queue.snapshot()
        };

        self.publish(&snapshot);
        self.remove_unscheduled();
        true
    }

    /// Starts the exit of every visible item.
    pub fn dismiss_all(&self) {
        let snapshot = {
            let mut queue = lock(&self.inner.queue);
            let visible: Vec<usize> = queue
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.item.state == NotificationState::Visible)
                .map(|(index, _)| index)
                .collect();
            if visible.is_empty() {
                return;
            }
            for index in visible {
                queue.entries[index].cancel_timer();
                self.begin_exit(&mut queue, index);
            }
            queue.snapshot()
        };

        self.publish(&snapshot);
        self.remove_unscheduled();
    }

    /// Runs the handler of action `index` on item `id`, then dismisses it.
    pub fn trigger_action(&self, id: &str, index: usize) -> bool {
        let handler = {
            let queue = lock(&self.inner.queue);
            let Some(position) = queue.position(id) else {
                return false;
            };
            match queue.entries[position].item.actions.get(index) {
                Some(action) => action.handler.clone(),
                None => return false,
            }
        };

        if let Some(handler) = handler {
            handler();
        }
        self.dismiss(id);
        true
    }

    fn generate_id(&self) -> String {
        let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        format!("notification-{}", n)
    }

    /// Auto-dismiss timer target.
    fn expire(&self, id: &str, generation: u64) {
        let snapshot = {
            let mut queue = lock(&self.inner.queue);
            let Some(index) = queue.position(id) else {
                return;
            };
            let entry = &mut queue.entries[index];
            if entry.generation != generation || entry.item.state != NotificationState::Visible {
                return;
            }
            // This timer is the running task; detach rather than abort.
            entry.timer.take();
            debug!(id = %id, "Notification expired");
            self.begin_exit(&mut queue, index);
            queue.snapshot()
        };

        self.publish(&snapshot);
        self.remove_unscheduled();
    }

    /// Moves the entry at `index` to Dismissing and schedules its removal.
    fn begin_exit(&self, queue: &mut Queue, index: usize) {
        let generation = queue.bump();
        let id = queue.entries[index].item.id.clone();

        let timer = self.schedule(self.inner.config.exit_delay, move |manager| {
            manager.remove(&id, generation);
        });

        let entry = &mut queue.entries[index];
        entry.generation = generation;
        entry.item.visible = false;
        entry.item.state = NotificationState::Dismissing;
        entry.timer = timer;
    }

    /// Removal timer target.
    fn remove(&self, id: &str, generation: u64) {
        let (on_close, snapshot) = {
            let mut queue = lock(&self.inner.queue);
            let Some(index) = queue.position(id) else {
                return;
            };
            let entry = &queue.entries[index];
            if entry.generation != generation
                || entry.item.state != NotificationState::Dismissing
            {
                return;
            }
            let mut entry = queue.entries.remove(index);
            entry.timer.take();
            entry.item.state = NotificationState::Removed;
            (entry.on_close, queue.snapshot())
        };

        if let Some(on_close) = on_close {
            on_close(id);
        }
        self.publish(&snapshot);
    }

    /// Removes Dismissing entries that have no removal timer, which happens
    /// when there is no runtime to run the exit delay on.
    fn remove_unscheduled(&self) {
        let pending: Vec<(String, u64)> = lock(&self.inner.queue)
            .entries
            .iter()
            .filter(|e| e.item.state == NotificationState::Dismissing && e.timer.is_none())
            .map(|e| (e.item.id.clone(), e.generation))
            .collect();

        for (id, generation) in pending {
            self.remove(&id, generation);
        }
    }

    /// Drops the oldest entries beyond `max_queued`.
    fn evict_overflow(&self, queue: &mut Queue) -> Vec<(String, Option<CloseHandler>)> {
        let capacity = self.inner.config.max_queued.max(1);
        let overflow = queue.entries.len().saturating_sub(capacity);
        queue
            .entries
            .drain(..overflow)
            .map(|mut entry| {
                entry.cancel_timer();
                debug!(id = %entry.item.id, "Evicted notification over capacity");
                (entry.item.id, entry.on_close)
            })
            .collect()
    }

    fn publish(&self, snapshot: &[NotificationItem]) {
        let listeners = lock(&self.inner.listeners).snapshot();
        for (_, listener) in listeners {
            listener(snapshot);
        }
    }

    /// Spawns `action` after `delay` on the ambient runtime. The task holds
    /// only a weak reference, so a dropped manager cancels nothing but also
    /// acts on nothing.
    fn schedule<F>(&self, delay: Duration, action: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce(NotificationManager) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let weak = Arc::downgrade(&self.inner);
        Some(runtime.spawn(delayed(weak, delay, action)))
    }
}

fn delayed<F>(weak: Weak<Inner>, delay: Duration, action: F) -> impl Future<Output = ()>
where
    F: FnOnce(NotificationManager) + Send + 'static,
{
    async move {
        tokio::time::sleep(delay).await;
        if let Some(inner) = weak.upgrade() {
            action(NotificationManager { inner });
        }
    }
}
