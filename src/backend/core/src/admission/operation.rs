//! Units of work accepted by the admission controller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;

use crate::error::{Result, SmaError};

/// Priority class of a submitted operation.
///
/// Priority only decides where an operation waits in the queue. Once running,
/// operations are not ordered against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Jumps ahead of every normal and low entry
    High,
    /// Default for most work
    #[default]
    Normal,
    /// Waits in arrival order alongside normal entries
    Low,
}

impl Priority {
    /// Lowercase label used in logs, metrics and headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    pub fn is_high(&self) -> bool {
        matches!(self, Self::High)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = SmaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(SmaError::validation(format!("Unknown priority: {}", other))),
        }
    }
}

/// An opaque, side-effecting unit of work.
///
/// The controller owns an operation from submission until it finishes. On a
/// request timeout the operation keeps running in the background and its
/// result is discarded; nothing is forcibly cancelled.
///
/// Closures returning a future implement this trait:
///
/// ```rust,ignore
/// controller.submit(Priority::Normal, || async move { Ok(42) }).await?;
/// ```
#[async_trait]
pub trait Operation: Send + 'static {
    /// Value produced on success.
    type Output: Send + 'static;

    /// Run the work once.
    async fn execute(self) -> Result<Self::Output>;
}

#[async_trait]
impl<F, Fut, T> Operation for F
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    async fn execute(self) -> Result<T> {
        (self)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Double(u32);

    #[async_trait]
    impl Operation for Double {
        type Output = u32;

        async fn execute(self) -> Result<u32> {
            Ok(self.0 * 2)
        }
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(" NORMAL ".parse::<Priority>().unwrap(), Priority::Normal);
        assert_eq!("low".parse::<Priority>().unwrap(), Priority::Low);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_priority_default() {
        assert_eq!(Priority::default(), Priority::Normal);
        assert!(Priority::High.is_high());
        assert!(!Priority::Low.is_high());
    }

    #[tokio::test]
    async fn test_struct_operation() {
        assert_eq!(Double(21).execute().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_closure_operation() {
        let op = || async { Ok::<_, SmaError>("done") };
        assert_eq!(op.execute().await.unwrap(), "done");
    }
}
