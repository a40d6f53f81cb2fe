use std::fmt;
use std::sync::Arc;

use futures_util::future::select_all;
use tokio_util::sync::CancellationToken;

/// Owner side of a cancellation handle.
#[derive(Clone, Debug, Default)]
pub struct AbortController {
    token: CancellationToken,
}

impl AbortController {
    /// Creates a controller whose signal is not yet aborted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal tied to this controller. Clones observe the same abort.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            tokens: Arc::from(vec![self.token.clone()]),
        }
    }

    /// Cancels every operation observing this controller's signal.
    pub fn abort(&self) {
        self.token.cancel();
    }
}

/// Observer side of one or more cancellation sources.
///
/// Signals compare equal only when they are the same handle.
#[derive(Clone)]
pub struct AbortSignal {
    tokens: Arc<[CancellationToken]>,
}

impl AbortSignal {
    /// Signal that fires as soon as any of `signals` fires.
    pub fn any<I>(signals: I) -> Self
    where
        I: IntoIterator<Item = AbortSignal>,
    {
        let tokens: Vec<CancellationToken> = signals
            .into_iter()
            .flat_map(|signal| signal.tokens.iter().cloned().collect::<Vec<_>>())
            .collect();
        Self {
            tokens: Arc::from(tokens),
        }
    }

    /// Returns `true` once any source has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.tokens.iter().any(CancellationToken::is_cancelled)
    }

    /// Completes once any source is cancelled. Never completes for a signal
    /// without sources.
    pub async fn cancelled(&self) {
        match self.tokens.len() {
            0 => std::future::pending::<()>().await,
            1 => self.tokens[0].cancelled().await,
            _ => {
                select_all(self.tokens.iter().map(|token| Box::pin(token.cancelled()))).await;
            }
        }
    }
}

impl PartialEq for AbortSignal {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tokens, &other.tokens)
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("sources", &self.tokens.len())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
