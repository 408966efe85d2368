use tokio::sync::watch;

/// The one authoritative answer to "who is the current user". Starts
/// loading with no identity; reaches a terminal `loading=false` after
/// exactly one reconciliation pass, and re-enters loading only when a new
/// sign-in or a provider notification requires a re-fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationState<I> {
    pub loading: bool,
    pub identity: Option<I>,
}

impl<I> Default for ReconciliationState<I> {
    fn default() -> Self {
        Self {
            loading: true,
            identity: None,
        }
    }
}

/// Engine-owned state holder. The engine is the only writer; consumers get
/// a watch receiver and read-only snapshots.
pub struct StateCell<I> {
    tx: watch::Sender<ReconciliationState<I>>,
}

impl<I: Clone> StateCell<I> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ReconciliationState::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReconciliationState<I>> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ReconciliationState<I> {
        self.tx.borrow().clone()
    }

    pub fn update<F: FnOnce(&mut ReconciliationState<I>)>(&self, f: F) {
        self.tx.send_modify(f);
    }
}

impl<I: Clone> Default for StateCell<I> {
    fn default() -> Self {
        Self::new()
    }
}
