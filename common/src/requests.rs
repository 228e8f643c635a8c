use std::collections::BTreeSet;

/// Opaque identity of a logical client (a zone or a parent group) asking an
/// actuator to be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequesterId(u64);

/// Hands out requester identities that are never reused.
#[derive(Debug, Default)]
pub struct RequesterIds {
    next: u64,
}

impl RequesterIds {
    pub fn allocate(&mut self) -> RequesterId {
        let id = RequesterId(self.next);
        self.next += 1;
        id
    }
}

/// Set of requesters currently asking for activation.
///
/// The aggregate demand is exactly "the set is non-empty"; duplicate inserts
/// and removals of non-members are no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequesterRegistry {
    requesters: BTreeSet<RequesterId>,
}

impl RequesterRegistry {
    pub fn set_request(&mut self, requester: RequesterId, requesting: bool) {
        if requesting {
            self.requesters.insert(requester);
        } else {
            self.requesters.remove(&requester);
        }
    }

    pub fn has_requests(&self) -> bool {
        !self.requesters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requesters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requesters.is_empty()
    }
}
