/// What happens to an entry that keeps failing
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Leave the entry pending forever
    #[default]
    Unbounded,
    /// Move the entry to `stream` once it has been delivered `max_deliveries` times
    DeadLetter { max_deliveries: u64, stream: String },
}

impl RetryPolicy {
    /// Dead-lettering with `max_deliveries == 0` is unbounded
    pub fn from_settings(max_deliveries: u64, stream: impl Into<String>) -> Self {
        if max_deliveries == 0 {
            RetryPolicy::Unbounded
        } else {
            RetryPolicy::DeadLetter {
                max_deliveries,
                stream: stream.into(),
            }
        }
    }

    /// Dead-letter stream to use for an entry delivered `delivery_count` times
    pub fn dead_letter_target(&self, delivery_count: u64) -> Option<&str> {
        match self {
            RetryPolicy::Unbounded => None,
            RetryPolicy::DeadLetter {
                max_deliveries,
                stream,
            } => (delivery_count >= *max_deliveries).then_some(stream.as_str()),
        }
    }
}
