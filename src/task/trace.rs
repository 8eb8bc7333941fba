use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation data propagated alongside a task for observability
///
/// Never consulted when making scheduling decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Shared by every span of one run
    pub correlation_id: Uuid,
    pub span_id: Uuid,
    pub parent_span_id: Option<Uuid>,
    pub depth: u32,
    pub timestamp: DateTime<Utc>,
}

impl TraceContext {
    /// Starts a root trace for a run
    pub fn root(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            span_id: Uuid::new_v4(),
            parent_span_id: None,
            depth: 0,
            timestamp: Utc::now(),
        }
    }

    /// Opens a child span one level deeper
    pub fn child(&self) -> Self {
        Self {
            correlation_id: self.correlation_id,
            span_id: Uuid::new_v4(),
            parent_span_id: Some(self.span_id),
            depth: self.depth + 1,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_span_links_to_parent() {
        let root = TraceContext::root(Uuid::new_v4());
        let child = root.child();

        assert_eq!(child.correlation_id, root.correlation_id);
        assert_eq!(child.parent_span_id, Some(root.span_id));
        assert_eq!(child.depth, 1);
        assert_ne!(child.span_id, root.span_id);
    }
}
