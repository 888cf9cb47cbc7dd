pub mod tcp;

/// Counters collected by a channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    /// Script object ids reported back to the peer as released
    pub handles_released: u64,
    /// Calls from the peer serviced while waiting for a return
    pub reentrant_calls: u64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: &TransportStats) {
        self.messages_sent += other.messages_sent;
        self.messages_received += other.messages_received;
        self.bytes_sent += other.bytes_sent;
        self.handles_released += other.handles_released;
        self.reentrant_calls += other.reentrant_calls;
    }
}

impl std::fmt::Display for TransportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Channel Statistics:")?;
        writeln!(f, "  Messages sent:     {}", self.messages_sent)?;
        writeln!(f, "  Messages received: {}", self.messages_received)?;
        writeln!(f, "  Bytes sent:        {}", self.bytes_sent)?;
        writeln!(f, "  Handles released:  {}", self.handles_released)?;
        writeln!(f, "  Re-entrant calls:  {}", self.reentrant_calls)?;
        Ok(())
    }
}
