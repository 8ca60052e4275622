use std::collections::BTreeSet;

use crate::domain::feedback::UserId;

/// Static set of identities allowed to moderate. Built once at startup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdminAllowList {
    ids: BTreeSet<UserId>,
}

impl AdminAllowList {
    pub fn new(ids: impl IntoIterator<Item = UserId>) -> Self {
        Self { ids: ids.into_iter().collect() }
    }

    pub fn from_raw(ids: &[i64]) -> Self {
        Self::new(ids.iter().copied().map(UserId))
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.ids.contains(&user_id)
    }

    pub fn authorize(&self, user_id: UserId) -> Authorization {
        if self.contains(user_id) {
            Authorization::Granted(AdminCapability { admin: user_id })
        } else {
            Authorization::Denied
        }
    }

    /// Recipients for admin notifications, in ascending id order.
    pub fn recipients(&self) -> impl Iterator<Item = UserId> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Authorization {
    Granted(AdminCapability),
    Denied,
}

impl Authorization {
    pub fn granted(self) -> Option<AdminCapability> {
        match self {
            Self::Granted(capability) => Some(capability),
            Self::Denied => None,
        }
    }
}

/// Proof that the allow-list check passed. Only [`AdminAllowList::authorize`]
/// can produce one, so moderation operations that take it cannot be reached
/// without the check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminCapability {
    admin: UserId,
}

impl AdminCapability {
    pub fn admin(&self) -> UserId {
        self.admin
    }
}
