use crate::Fragment;

/// A fully reassembled unit of content, ready for one inference turn.
#[derive(Debug, Clone)]
pub struct LogicalMessage {
    /// Identity key the fragments were grouped under.
    pub identity: String,
    /// Received pieces, already in reassembly order.
    pub fragments: Vec<Fragment>,
    /// Declared fragment count, when any piece carried one.
    pub expected_total: Option<u64>,
    /// Set when the message was force-completed before all pieces arrived.
    pub partial: bool,
    /// The first sequence indices that never arrived, at most
    /// [`MAX_LISTED_GAPS`] of them.
    pub gaps: Vec<u64>,
    /// How many sequence indices never arrived in total.
    pub missing: u64,
}

/// Upper bound on the gap indices listed on a [`LogicalMessage`]. Peers
/// declare totals and indices freely, so only the count is unbounded.
pub const MAX_LISTED_GAPS: usize = 32;

impl LogicalMessage {
    /// Wrap a single frame as a complete message.
    #[must_use]
    pub fn single(fragment: Fragment) -> Self {
        Self {
            identity: fragment.identity_key().to_string(),
            expected_total: fragment.total,
            fragments: vec![fragment],
            partial: false,
            gaps: Vec::new(),
            missing: 0,
        }
    }

    /// Concatenated content of all pieces in order.
    #[must_use]
    pub fn content(&self) -> String {
        self.fragments.iter().map(|f| f.content.as_str()).collect()
    }

    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    #[must_use]
    pub fn has_gaps(&self) -> bool {
        self.missing > 0
    }
}
