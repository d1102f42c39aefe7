//! Command buffer and queue descriptors.

/// Descriptor for creating a command buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CommandBufferDescriptor {
    /// Debug label, forwarded to native debug tooling.
    pub label: Option<String>,
}

impl CommandBufferDescriptor {
    /// Create a new descriptor with no label.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Per-buffer statistics, maintained by the encoders that record into it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CommandBufferStatistics {
    /// Number of draw calls recorded so far.
    pub current_draw_count: u32,
}

/// Descriptor for creating a command queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CommandQueueDescriptor {
    pub label: Option<String>,
}

impl CommandQueueDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Aggregate counters for everything submitted through a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QueueStatistics {
    pub submitted_command_buffers: u64,
    pub draw_calls: u64,
    pub presented_frames: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_label() {
        let desc = CommandBufferDescriptor::new().with_label("frame");
        assert_eq!(desc.label.as_deref(), Some("frame"));
        assert_eq!(CommandBufferDescriptor::default().label, None);
    }

    #[test]
    fn test_statistics_default() {
        assert_eq!(CommandBufferStatistics::default().current_draw_count, 0);
        assert_eq!(QueueStatistics::default().submitted_command_buffers, 0);
    }
}
