use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Options of a new driver transaction. The backend default isolation applies when `isolation`
/// is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
}

impl TxOptions {
    pub fn isolation(isolation: IsolationLevel) -> Self {
        Self {
            isolation: Some(isolation),
            read_only: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxStage {
    Open,
    Finishing,
    Done,
}

#[derive(Debug)]
pub(crate) struct TxState {
    pub(crate) depth: usize,
    pub(crate) stage: TxStage,
}

/// Per begin record of a driver transaction, attached to the [`crate::Context`].
pub(crate) struct TxHandle<C> {
    pub(crate) id: u64,
    pub(crate) connection: Arc<tokio::sync::Mutex<Option<C>>>,
    state: Mutex<TxState>,
    /// Cancelled once the transaction reaches its final state.
    pub(crate) done: CancellationToken,
}

impl<C> TxHandle<C> {
    pub(crate) fn new(id: u64, connection: C) -> Self {
        Self {
            id,
            connection: Arc::new(tokio::sync::Mutex::new(Some(connection))),
            state: Mutex::new(TxState {
                depth: 0,
                stage: TxStage::Open,
            }),
            done: CancellationToken::new(),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, TxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state().stage == TxStage::Open
    }

    /// Move to the final state, returns false if it was already there.
    pub(crate) fn finish(&self) -> bool {
        let mut state = self.state();
        let finished = state.stage != TxStage::Done;
        state.stage = TxStage::Done;
        drop(state);
        self.done.cancel();
        finished
    }
}
